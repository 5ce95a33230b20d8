//! Store collaborators shipped with the crate.

pub mod memory;

pub use memory::MemoryCollection;
pub use memory::MemoryStore;
pub use memory::OpCounts;
