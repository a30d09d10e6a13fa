pub mod elastic;
pub mod memory;
pub mod trait_def;

pub use elastic::ElasticsearchIndex;
pub use memory::MemoryIndex;
pub use trait_def::{EventIndex, SearchError, SearchResult};
