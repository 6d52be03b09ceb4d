use serde::{Deserialize, Serialize};

/// Monotonic id counters of a node.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IdGenerator {
    next_parasite_id: u64,
    next_bite_id: u64,
    next_vector_id: u64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_parasite_id(&mut self) -> u64 {
        self.next_parasite_id += 1;
        self.next_parasite_id
    }

    pub fn next_bite_id(&mut self) -> u64 {
        self.next_bite_id += 1;
        self.next_bite_id
    }

    pub fn next_vector_id(&mut self) -> u64 {
        self.next_vector_id += 1;
        self.next_vector_id
    }
}
