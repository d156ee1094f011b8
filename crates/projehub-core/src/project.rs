use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::file::{FileDraft, FileRecord};
use crate::{Error, Result};

/// Who a storage call is made on behalf of.
///
/// The embedded backend has a single local user; the relational backend scopes
/// every project to the signed-in principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Owner {
    Local,
    Principal(Uuid),
}

impl Owner {
    #[must_use]
    pub const fn id(&self) -> Option<Uuid> {
        match self {
            Self::Local => None,
            Self::Principal(id) => Some(*id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Uuid>,
    #[serde(default)]
    pub files: Vec<FileRecord>,
}

impl Project {
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.file.size).sum()
    }

    #[must_use]
    pub fn file(&self, file_id: Uuid) -> Option<&FileRecord> {
        self.files.iter().find(|f| f.id == file_id)
    }

    /// Case-insensitive match against name, description, and tags.
    #[must_use]
    pub fn matches(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return true;
        }
        self.name.to_lowercase().contains(&term)
            || self.description.to_lowercase().contains(&term)
            || self.tags.iter().any(|t| t.to_lowercase().contains(&term))
    }

    #[must_use]
    pub fn is_owned_by(&self, owner: &Owner) -> bool {
        match owner {
            Owner::Local => true,
            Owner::Principal(id) => self.owner == Some(*id),
        }
    }
}

/// Input for project creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub files: Vec<FileDraft>,
}

impl NewProject {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: &str) -> Self {
        add_tag(&mut self.tags, tag);
        self
    }

    #[must_use]
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    #[must_use]
    pub fn with_files(mut self, files: Vec<FileDraft>) -> Self {
        self.files = files;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("Project name is required".to_string()));
        }
        Ok(())
    }

    /// Validate and build the stored shape. Files are returned separately so
    /// that adapters can write them in batches.
    pub fn into_project(self, owner: &Owner) -> Result<(Project, Vec<FileDraft>)> {
        self.validate()?;

        let mut tags = Vec::with_capacity(self.tags.len());
        for tag in &self.tags {
            add_tag(&mut tags, tag);
        }

        let project = Project {
            id: Uuid::now_v7(),
            name: self.name.trim().to_string(),
            description: self.description,
            tags,
            created_at: Utc::now(),
            platform: self
                .platform
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(default_platform),
            owner: owner.id(),
            files: Vec::new(),
        };

        Ok((project, self.files))
    }
}

/// Append a trimmed tag unless it is empty or already present.
pub fn add_tag(tags: &mut Vec<String>, tag: &str) -> bool {
    let tag = tag.trim();
    if tag.is_empty() || tags.iter().any(|t| t == tag) {
        return false;
    }
    tags.push(tag.to_string());
    true
}

#[must_use]
pub fn default_platform() -> String {
    std::env::consts::OS.to_string()
}

/// Human readable size, e.g. `0 Bytes`, `1.5 KB`, `2.25 MB`.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let bytes = bytes as f64;
    let exponent = (bytes.ln() / 1024f64.ln()).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);
    let value = bytes / 1024f64.powi(exponent as i32);
    let rounded = (value * 100.0).round() / 100.0;

    format!("{rounded} {}", UNITS[exponent])
}
