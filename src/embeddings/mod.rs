// Embedding cache module
// Author: kelexine (https://github.com/kelexine)

pub mod manager;
pub mod memory;

pub use manager::{content_hash, EmbeddingConfig, EmbeddingManager, EmbeddingStats};
pub use memory::{MemoryProbe, ProcessMemoryProbe, StaticMemoryProbe};
