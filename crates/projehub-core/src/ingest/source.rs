use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;

/// Bytes inspected when sniffing the type of a local file.
const SNIFF_LEN: usize = 8192;

/// A file handle picked by the user, before it has been read.
///
/// A handle that carries a relative path came from a folder pick.
#[async_trait::async_trait]
pub trait FileSource: Send + Sync {
    fn name(&self) -> &str;

    fn relative_path(&self) -> Option<&str>;

    fn size(&self) -> u64;

    fn mime_type(&self) -> &str;

    fn last_modified(&self) -> DateTime<Utc>;

    async fn read(&self) -> std::io::Result<Vec<u8>>;

    /// Name to store: the relative path for folder entries, else the file name.
    fn qualified_name(&self) -> &str {
        self.relative_path().unwrap_or_else(|| self.name())
    }
}

/// A file on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    name: String,
    relative_path: Option<String>,
    size: u64,
    mime_type: String,
    last_modified: DateTime<Utc>,
}

impl LocalFile {
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let mime_type = sniff_mime(&path).await?;

        Ok(Self {
            path,
            name,
            relative_path: None,
            size: metadata.len(),
            mime_type,
            last_modified,
        })
    }

    #[must_use]
    pub fn with_relative_path(mut self, relative_path: impl Into<String>) -> Self {
        self.relative_path = Some(relative_path.into());
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn sniff_mime(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut head = vec![0u8; SNIFF_LEN];
    let read = file.read(&mut head).await?;

    Ok(infer::get(&head[..read])
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_default())
}

#[async_trait::async_trait]
impl FileSource for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn relative_path(&self) -> Option<&str> {
        self.relative_path.as_deref()
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }
}

/// A file whose bytes are already in memory, e.g. a multipart upload.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    name: String,
    relative_path: Option<String>,
    mime_type: String,
    last_modified: DateTime<Utc>,
    bytes: Vec<u8>,
}

impl MemoryFile {
    #[must_use]
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            relative_path: None,
            mime_type: mime_type.into(),
            last_modified: Utc::now(),
            bytes,
        }
    }

    /// Build from an upload file name; a name containing `/` is treated as a
    /// path inside a picked folder.
    #[must_use]
    pub fn from_upload(file_name: &str, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.trim_start_matches('/');
        match file_name.rsplit_once('/') {
            Some((_, base)) => Self::new(base, mime_type, bytes).with_relative_path(file_name),
            None => Self::new(file_name, mime_type, bytes),
        }
    }

    #[must_use]
    pub fn with_relative_path(mut self, relative_path: impl Into<String>) -> Self {
        self.relative_path = Some(relative_path.into());
        self
    }

    #[must_use]
    pub const fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = last_modified;
        self
    }
}

#[async_trait::async_trait]
impl FileSource for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn relative_path(&self) -> Option<&str> {
        self.relative_path.as_deref()
    }

    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    async fn read(&self) -> std::io::Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }
}
