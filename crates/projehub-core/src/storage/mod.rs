//! Persistence adapters.
//!
//! Two interchangeable backends implement [`ProjectStore`]:
//! [`EmbeddedStore`] keeps the whole project list as one JSON document in a
//! key-value store, and [`RelationalStore`] keeps projects and files in
//! separate tables and writes files in batches.

mod embedded;
mod kv;
mod relational;

use std::str::FromStr;

use uuid::Uuid;

use crate::file::{FileDraft, FileRecord};
use crate::project::{NewProject, Owner, Project};
use crate::{Error, Result};

pub use embedded::{EmbeddedStore, PROJECTS_KEY};
pub use kv::{KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore};
pub use relational::RelationalStore;

#[async_trait::async_trait]
pub trait ProjectStore: Send + Sync {
    /// Validate and persist a new project with its files.
    async fn create(&self, new_project: NewProject, owner: &Owner) -> Result<Project>;

    /// All projects visible to `owner`, newest first, with files attached.
    async fn list_all(&self, owner: &Owner) -> Result<Vec<Project>>;

    async fn get(&self, id: Uuid, owner: &Owner) -> Result<Project> {
        self.list_all(owner)
            .await?
            .into_iter()
            .find(|p| p.id == id)
            .ok_or(Error::ProjectNotFound(id))
    }

    /// Append files to an existing project.
    async fn add_files(
        &self,
        id: Uuid,
        files: Vec<FileDraft>,
        owner: &Owner,
    ) -> Result<Vec<FileRecord>>;

    /// Remove a project and every file that belongs to it.
    async fn delete_by_id(&self, id: Uuid, owner: &Owner) -> Result<()>;
}

/// What to do when one file batch fails after earlier batches succeeded.
///
/// Nothing is rolled back or retried under either policy; the caller gets an
/// [`Error::PartialInsert`] describing how many files made it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchPolicy {
    #[default]
    Abort,
    Continue,
}

impl BatchPolicy {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Continue => "continue",
        }
    }
}

impl std::fmt::Display for BatchPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "continue" => Ok(Self::Continue),
            _ => Err(Error::Validation(format!("Unknown batch policy: {s}"))),
        }
    }
}

/// Batch sizes for file inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub creation_batch: usize,
    pub addition_batch: usize,
    pub policy: BatchPolicy,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            creation_batch: 5,
            addition_batch: 3,
            policy: BatchPolicy::default(),
        }
    }
}
