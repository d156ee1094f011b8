use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use super::kv::KeyValueStore;
use super::ProjectStore;
use crate::file::{FileDraft, FileRecord};
use crate::project::{NewProject, Owner, Project};
use crate::{Error, Result};

/// Key under which the serialized project list lives.
pub const PROJECTS_KEY: &str = "projects-list";

/// Stores the entire project list as one JSON document.
///
/// Every mutation reads the document, changes it, and writes it back whole.
/// Mutations are serialized through `write_lock` so two concurrent writers
/// cannot drop each other's changes.
pub struct EmbeddedStore {
    kv: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl EmbeddedStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<Project>> {
        match self.kv.get(PROJECTS_KEY).await? {
            Some(document) => Ok(serde_json::from_str(&document)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, projects: &[Project]) -> Result<()> {
        let document = serde_json::to_string(projects)?;
        self.kv.set(PROJECTS_KEY, &document).await
    }

    /// Drop the whole document.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.kv.remove(PROJECTS_KEY).await
    }
}

#[async_trait::async_trait]
impl ProjectStore for EmbeddedStore {
    async fn create(&self, new_project: NewProject, owner: &Owner) -> Result<Project> {
        let (mut project, files) = new_project.into_project(owner)?;
        project.files = files.into_iter().map(FileDraft::into_record).collect();

        let _guard = self.write_lock.lock().await;
        let mut projects = self.load().await?;
        projects.push(project.clone());
        self.save(&projects).await?;

        tracing::info!(
            project_id = %project.id,
            files = project.files.len(),
            "created project"
        );

        Ok(project)
    }

    async fn list_all(&self, owner: &Owner) -> Result<Vec<Project>> {
        let mut projects: Vec<Project> = self
            .load()
            .await?
            .into_iter()
            .filter(|p| p.is_owned_by(owner))
            .collect();

        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(projects)
    }

    async fn add_files(
        &self,
        id: Uuid,
        files: Vec<FileDraft>,
        owner: &Owner,
    ) -> Result<Vec<FileRecord>> {
        let records: Vec<FileRecord> = files.into_iter().map(FileDraft::into_record).collect();

        let _guard = self.write_lock.lock().await;
        let mut projects = self.load().await?;
        let project = projects
            .iter_mut()
            .find(|p| p.id == id && p.is_owned_by(owner))
            .ok_or(Error::ProjectNotFound(id))?;

        project.files.extend(records.iter().cloned());
        self.save(&projects).await?;

        tracing::info!(project_id = %id, files = records.len(), "added files to project");

        Ok(records)
    }

    async fn delete_by_id(&self, id: Uuid, owner: &Owner) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut projects = self.load().await?;
        let before = projects.len();
        projects.retain(|p| !(p.id == id && p.is_owned_by(owner)));

        if projects.len() == before {
            return Err(Error::ProjectNotFound(id));
        }

        self.save(&projects).await?;
        tracing::info!(project_id = %id, "deleted project");

        Ok(())
    }
}
