pub mod in_memory;
pub mod pinecone;

pub use in_memory::InMemoryIndex;
pub use pinecone::{PineconeConfig, PineconeIndex};
