mod data;
mod metadata;

pub use data::FsDataBackend;
pub use metadata::FsMetadataStore;

const SYS_DIR_NAME: &str = ".keel.sys";
