pub mod auth;
pub mod content;
pub mod error;
pub mod export;
pub mod file;
pub mod hub;
pub mod ingest;
pub mod project;
pub mod storage;

pub use auth::{Authenticator, Principal};
pub use content::{decode_data_uri, encode_data_uri, DataUri};
pub use error::{Error, Result};
pub use export::{download, export_archive, Archive, Download};
pub use file::{FileDraft, FileRecord};
pub use hub::{CreateModal, ProjectHub};
pub use ingest::{
    FileSource, IngestBatch, IngestFailure, IngestOptions, IngestPipeline, LocalFile, MemoryFile,
};
pub use project::{format_file_size, NewProject, Owner, Project};
pub use storage::{
    BatchPolicy, BatchSettings, EmbeddedStore, KeyValueStore, ProjectStore, RelationalStore,
    SqliteKeyValueStore,
};
