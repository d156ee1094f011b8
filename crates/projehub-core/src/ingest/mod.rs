mod imaging;
mod pipeline;
mod source;

pub use imaging::{fit_within, recompress, DEFAULT_JPEG_QUALITY, DEFAULT_MAX_DIMENSION};
pub use pipeline::{
    IngestBatch, IngestError, IngestFailure, IngestOptions, IngestPipeline, IngestStats,
};
pub use source::{FileSource, LocalFile, MemoryFile};
