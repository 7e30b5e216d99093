pub mod disk;
pub mod memory;
pub mod traits;

pub use disk::{FsDataBackend, FsMetadataStore};
pub use memory::{MemoryDataBackend, MemoryMetadataStore};
pub use traits::{DataBackend, KeyContext, ListOptions, ListedRecord, MetadataStore};
