use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::content::{decode_data_uri, DataUri};
use crate::Result;

/// A normalized file entry that has not been persisted yet.
///
/// Folder-sourced entries never carry content; the constructors and the
/// deserializer both enforce this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FileDraftRepr")]
pub struct FileDraft {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub last_modified: DateTime<Utc>,
    is_folder: bool,
    content: Option<String>,
}

impl FileDraft {
    #[must_use]
    pub fn file(
        name: impl Into<String>,
        size: u64,
        mime_type: impl Into<String>,
        last_modified: DateTime<Utc>,
        content: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
            last_modified,
            is_folder: false,
            content,
        }
    }

    #[must_use]
    pub fn folder_entry(
        name: impl Into<String>,
        size: u64,
        mime_type: impl Into<String>,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
            last_modified,
            is_folder: true,
            content: None,
        }
    }

    #[must_use]
    pub const fn is_folder(&self) -> bool {
        self.is_folder
    }

    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    #[must_use]
    pub const fn has_content(&self) -> bool {
        self.content.is_some()
    }

    /// Final path segment of the name, used when saving a single file.
    #[must_use]
    pub fn base_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    pub fn decode(&self) -> Result<Option<DataUri>> {
        self.content.as_deref().map(decode_data_uri).transpose()
    }

    #[must_use]
    pub fn into_record(self) -> FileRecord {
        FileRecord {
            id: Uuid::new_v4(),
            file: self,
        }
    }
}

#[derive(Deserialize)]
struct FileDraftRepr {
    name: String,
    size: u64,
    #[serde(default)]
    mime_type: String,
    last_modified: DateTime<Utc>,
    #[serde(default)]
    is_folder: bool,
    #[serde(default)]
    content: Option<String>,
}

impl From<FileDraftRepr> for FileDraft {
    fn from(repr: FileDraftRepr) -> Self {
        if repr.is_folder {
            Self::folder_entry(repr.name, repr.size, repr.mime_type, repr.last_modified)
        } else {
            Self::file(
                repr.name,
                repr.size,
                repr.mime_type,
                repr.last_modified,
                repr.content,
            )
        }
    }
}

/// A file entry belonging to a stored project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    #[serde(flatten)]
    pub file: FileDraft,
}

impl FileRecord {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.file.name
    }

    #[must_use]
    pub const fn is_folder(&self) -> bool {
        self.file.is_folder()
    }

    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.file.content()
    }
}
