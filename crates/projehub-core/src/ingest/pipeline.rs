use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;

use super::imaging::{self, DEFAULT_JPEG_QUALITY, DEFAULT_MAX_DIMENSION};
use super::source::FileSource;
use crate::content::{decoded_len, encode_data_uri};
use crate::file::FileDraft;

const RECOMPRESSED_MIME: &str = "image/jpeg";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file that could not be read. The rest of the batch is unaffected.
#[derive(Debug)]
pub struct IngestFailure {
    pub name: String,
    pub error: IngestError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    pub recompress_images: bool,
    pub max_dimension: u32,
    pub jpeg_quality: u8,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            recompress_images: true,
            max_dimension: DEFAULT_MAX_DIMENSION,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub files_read: usize,
    pub folder_entries: usize,
    pub images_recompressed: usize,
    pub failures: usize,
}

/// Result of ingesting one pick of files, in input order.
#[derive(Debug, Default)]
pub struct IngestBatch {
    pub accepted: Vec<FileDraft>,
    pub failed: Vec<IngestFailure>,
    pub stats: IngestStats,
}

impl IngestBatch {
    #[must_use]
    pub fn total(&self) -> usize {
        self.accepted.len() + self.failed.len()
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.accepted.iter().map(|f| f.size).sum()
    }
}

enum Outcome {
    Read(FileDraft),
    Recompressed(FileDraft),
    Folder(FileDraft),
    Failed(IngestFailure),
}

pub struct IngestPipeline {
    options: IngestOptions,
}

impl IngestPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: IngestOptions::default(),
        }
    }

    #[must_use]
    pub const fn with_options(mut self, options: IngestOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub const fn options(&self) -> &IngestOptions {
        &self.options
    }

    /// Read every source concurrently and wait for all of them.
    pub async fn ingest_all(&self, sources: Vec<Box<dyn FileSource>>) -> IngestBatch {
        let outcomes = join_all(sources.iter().map(|s| self.ingest_one(s.as_ref()))).await;

        let mut batch = IngestBatch::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Read(draft) => {
                    batch.stats.files_read += 1;
                    batch.accepted.push(draft);
                }
                Outcome::Recompressed(draft) => {
                    batch.stats.files_read += 1;
                    batch.stats.images_recompressed += 1;
                    batch.accepted.push(draft);
                }
                Outcome::Folder(draft) => {
                    batch.stats.folder_entries += 1;
                    batch.accepted.push(draft);
                }
                Outcome::Failed(failure) => {
                    batch.stats.failures += 1;
                    batch.failed.push(failure);
                }
            }
        }

        tracing::debug!(
            accepted = batch.accepted.len(),
            failed = batch.failed.len(),
            "ingested file batch"
        );

        batch
    }

    async fn ingest_one(&self, source: &dyn FileSource) -> Outcome {
        let name = source.qualified_name().to_string();

        if source.relative_path().is_some() {
            return Outcome::Folder(FileDraft::folder_entry(
                name,
                source.size(),
                source.mime_type(),
                source.last_modified(),
            ));
        }

        let bytes = match source.read().await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "failed to read file");
                return Outcome::Failed(IngestFailure {
                    name,
                    error: e.into(),
                });
            }
        };

        let bytes = Arc::new(bytes);

        if self.options.recompress_images && source.mime_type().starts_with("image/") {
            if let Some(jpeg) = self.recompress(&name, Arc::clone(&bytes)).await {
                let content = encode_data_uri(RECOMPRESSED_MIME, &jpeg);
                return Outcome::Recompressed(FileDraft::file(
                    name,
                    decoded_len(&content),
                    RECOMPRESSED_MIME,
                    source.last_modified(),
                    Some(content),
                ));
            }
        }

        let content = encode_data_uri(source.mime_type(), &bytes);
        Outcome::Read(FileDraft::file(
            name,
            bytes.len() as u64,
            source.mime_type(),
            source.last_modified(),
            Some(content),
        ))
    }

    async fn recompress(&self, name: &str, bytes: Arc<Vec<u8>>) -> Option<Vec<u8>> {
        let IngestOptions {
            max_dimension,
            jpeg_quality,
            ..
        } = self.options;

        let result = tokio::task::spawn_blocking(move || {
            imaging::recompress(&bytes, max_dimension, jpeg_quality)
        })
        .await;

        match result {
            Ok(Ok(jpeg)) => Some(jpeg),
            Ok(Err(e)) => {
                tracing::warn!(
                    file = %name,
                    error = %e,
                    "image recompression failed, storing original"
                );
                None
            }
            Err(e) => {
                tracing::warn!(
                    file = %name,
                    error = %e,
                    "image recompression task failed, storing original"
                );
                None
            }
        }
    }
}

impl Default for IngestPipeline {
    fn default() -> Self {
        Self::new()
    }
}
