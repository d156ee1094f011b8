//! In-memory view state: the loaded project list, search, selection, and the
//! create-project form.

use std::sync::Arc;

use uuid::Uuid;

use crate::file::FileRecord;
use crate::ingest::IngestBatch;
use crate::project::{add_tag, NewProject, Owner, Project};
use crate::storage::ProjectStore;
use crate::{Error, Result};

/// State of the create-project form.
///
/// `Validating` and `Persisting` only exist while [`ProjectHub::submit`] is
/// running.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CreateModal {
    #[default]
    Closed,
    Editing {
        draft: NewProject,
        error: Option<String>,
    },
    Validating,
    Persisting,
}

impl CreateModal {
    #[must_use]
    pub const fn is_open(&self) -> bool {
        !matches!(self, Self::Closed)
    }

    #[must_use]
    pub const fn draft(&self) -> Option<&NewProject> {
        match self {
            Self::Editing { draft, .. } => Some(draft),
            _ => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Editing { error, .. } => error.as_deref(),
            _ => None,
        }
    }
}

pub struct ProjectHub {
    store: Arc<dyn ProjectStore>,
    owner: Owner,
    projects: Vec<Project>,
    search: String,
    selected: Option<Uuid>,
    modal: CreateModal,
}

impl ProjectHub {
    #[must_use]
    pub fn new(store: Arc<dyn ProjectStore>, owner: Owner) -> Self {
        Self {
            store,
            owner,
            projects: Vec::new(),
            search: String::new(),
            selected: None,
            modal: CreateModal::Closed,
        }
    }

    #[must_use]
    pub const fn owner(&self) -> &Owner {
        &self.owner
    }

    #[must_use]
    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    #[must_use]
    pub const fn modal(&self) -> &CreateModal {
        &self.modal
    }

    /// Reload the project list from the store.
    pub async fn refresh(&mut self) -> Result<()> {
        self.projects = self.store.list_all(&self.owner).await?;

        if let Some(id) = self.selected {
            if !self.projects.iter().any(|p| p.id == id) {
                self.selected = None;
            }
        }

        Ok(())
    }

    // Search

    pub fn set_search(&mut self, term: impl Into<String>) {
        self.search = term.into();
    }

    #[must_use]
    pub fn search(&self) -> &str {
        &self.search
    }

    /// Projects matching the current search term, in list order.
    #[must_use]
    pub fn visible(&self) -> Vec<&Project> {
        self.projects
            .iter()
            .filter(|p| p.matches(&self.search))
            .collect()
    }

    // Selection

    pub fn select(&mut self, id: Uuid) -> Result<&Project> {
        let project = self
            .projects
            .iter()
            .find(|p| p.id == id)
            .ok_or(Error::ProjectNotFound(id))?;
        self.selected = Some(id);
        Ok(project)
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    #[must_use]
    pub fn selected(&self) -> Option<&Project> {
        let id = self.selected?;
        self.projects.iter().find(|p| p.id == id)
    }

    // Create-project form

    pub fn open_create(&mut self) {
        self.modal = CreateModal::Editing {
            draft: NewProject::default(),
            error: None,
        };
    }

    pub fn cancel(&mut self) {
        self.modal = CreateModal::Closed;
    }

    fn draft_mut(&mut self) -> Result<&mut NewProject> {
        match &mut self.modal {
            CreateModal::Editing { draft, .. } => Ok(draft),
            _ => Err(Error::Validation("No project draft is open".to_string())),
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<()> {
        self.draft_mut()?.name = name.into();
        Ok(())
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> Result<()> {
        self.draft_mut()?.description = description.into();
        Ok(())
    }

    pub fn set_platform(&mut self, platform: impl Into<String>) -> Result<()> {
        self.draft_mut()?.platform = Some(platform.into());
        Ok(())
    }

    /// Returns whether the tag was added.
    pub fn add_tag(&mut self, tag: &str) -> Result<bool> {
        Ok(add_tag(&mut self.draft_mut()?.tags, tag))
    }

    pub fn remove_tag(&mut self, index: usize) -> Result<String> {
        let tags = &mut self.draft_mut()?.tags;
        if index >= tags.len() {
            return Err(Error::Validation(format!("No tag at index {index}")));
        }
        Ok(tags.remove(index))
    }

    /// Replace the draft's files with a freshly ingested batch.
    pub fn attach_files(&mut self, batch: IngestBatch) -> Result<()> {
        for failure in &batch.failed {
            tracing::warn!(name = %failure.name, error = %failure.error, "file left out of draft");
        }
        self.draft_mut()?.files = batch.accepted;
        Ok(())
    }

    /// Validate and persist the open draft.
    ///
    /// On success the form closes and the list is reloaded. On failure the
    /// form returns to editing with the error message attached.
    pub async fn submit(&mut self) -> Result<Project> {
        let draft = match std::mem::replace(&mut self.modal, CreateModal::Validating) {
            CreateModal::Editing { draft, .. } => draft,
            other => {
                self.modal = other;
                return Err(Error::Validation("No project draft is open".to_string()));
            }
        };

        if let Err(e) = draft.validate() {
            self.modal = CreateModal::Editing {
                draft,
                error: Some(e.to_string()),
            };
            return Err(e);
        }

        self.modal = CreateModal::Persisting;

        match self.store.create(draft.clone(), &self.owner).await {
            Ok(project) => {
                self.modal = CreateModal::Closed;
                self.refresh().await?;
                Ok(project)
            }
            Err(e) => {
                tracing::warn!(error = %e, "project creation failed");
                self.modal = CreateModal::Editing {
                    draft,
                    error: Some(e.to_string()),
                };
                // A partial insert leaves the project row behind.
                if matches!(e, Error::PartialInsert { .. }) {
                    self.refresh().await?;
                }
                Err(e)
            }
        }
    }

    // Existing projects

    pub async fn add_files(&mut self, id: Uuid, batch: IngestBatch) -> Result<Vec<FileRecord>> {
        for failure in &batch.failed {
            tracing::warn!(
                project_id = %id,
                name = %failure.name,
                error = %failure.error,
                "file not added"
            );
        }

        let result = self.store.add_files(id, batch.accepted, &self.owner).await;
        self.refresh().await?;
        result
    }

    pub async fn delete_project(&mut self, id: Uuid) -> Result<()> {
        self.store.delete_by_id(id, &self.owner).await?;

        if self.selected == Some(id) {
            self.selected = None;
        }
        self.projects.retain(|p| p.id != id);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{GenericImageView, ImageFormat, Rgb, RgbImage};

    use super::*;
    use crate::content::decode_data_uri;
    use crate::ingest::{FileSource, IngestPipeline, MemoryFile};
    use crate::storage::{EmbeddedStore, MemoryKeyValueStore, RelationalStore};

    fn hub() -> ProjectHub {
        let store = EmbeddedStore::new(Arc::new(MemoryKeyValueStore::new()));
        ProjectHub::new(Arc::new(store), Owner::Local)
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buffer = Vec::new();
        RgbImage::from_pixel(width, height, Rgb([120, 40, 200]))
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    async fn ingest(files: Vec<MemoryFile>) -> IngestBatch {
        let sources: Vec<Box<dyn FileSource>> = files
            .into_iter()
            .map(|f| Box::new(f) as Box<dyn FileSource>)
            .collect();
        IngestPipeline::new().ingest_all(sources).await
    }

    async fn create(hub: &mut ProjectHub, name: &str) -> Project {
        hub.open_create();
        hub.set_name(name).unwrap();
        hub.submit().await.unwrap()
    }

    #[tokio::test]
    async fn test_demo_project_end_to_end() {
        let mut hub = hub();
        let batch = ingest(vec![
            MemoryFile::new("photo.png", "image/png", png(2000, 1000)),
            MemoryFile::from_upload("docs/readme.txt", "text/plain", b"read me".to_vec()),
        ])
        .await;
        assert!(batch.is_clean());

        hub.open_create();
        hub.set_name("Demo").unwrap();
        hub.attach_files(batch).unwrap();
        let project = hub.submit().await.unwrap();

        assert_eq!(hub.modal(), &CreateModal::Closed);
        assert_eq!(hub.projects().len(), 1);
        assert_eq!(project.files.len(), 2);

        let photo = &project.files[0];
        assert_eq!(photo.file.mime_type, "image/jpeg");
        let data = decode_data_uri(photo.content().unwrap()).unwrap();
        let decoded = image::load_from_memory(&data.bytes).unwrap();
        assert!(decoded.width() <= 1024 && decoded.height() <= 512);
        assert_eq!(photo.file.size, data.bytes.len() as u64);

        let folder = &project.files[1];
        assert_eq!(folder.name(), "docs/readme.txt");
        assert!(folder.is_folder());
        assert!(folder.content().is_none());
    }

    #[tokio::test]
    async fn test_empty_name_keeps_form_open() {
        let mut hub = hub();
        create(&mut hub, "existing").await;

        hub.open_create();
        hub.set_name("   ").unwrap();
        hub.add_tag("kept").unwrap();
        let result = hub.submit().await;

        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(hub.modal().error().is_some());
        assert_eq!(hub.modal().draft().unwrap().tags, vec!["kept"]);
        assert_eq!(hub.projects().len(), 1);

        hub.refresh().await.unwrap();
        assert_eq!(hub.projects().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_without_open_form() {
        let mut hub = hub();
        assert!(hub.submit().await.is_err());
        assert_eq!(hub.modal(), &CreateModal::Closed);
        assert!(hub.set_name("x").is_err());
    }

    #[tokio::test]
    async fn test_cancel_discards_draft() {
        let mut hub = hub();
        hub.open_create();
        hub.set_name("draft").unwrap();
        hub.cancel();

        assert!(!hub.modal().is_open());
        hub.refresh().await.unwrap();
        assert!(hub.projects().is_empty());
    }

    #[tokio::test]
    async fn test_tags_are_trimmed_deduped_and_removable() {
        let mut hub = hub();
        hub.open_create();
        assert!(hub.add_tag(" rust ").unwrap());
        assert!(!hub.add_tag("rust").unwrap());
        assert!(!hub.add_tag("").unwrap());
        assert!(hub.add_tag("web").unwrap());

        assert_eq!(hub.remove_tag(0).unwrap(), "rust");
        assert!(hub.remove_tag(5).is_err());
        assert_eq!(hub.modal().draft().unwrap().tags, vec!["web"]);
    }

    #[tokio::test]
    async fn test_attach_files_replaces_previous_pick() {
        let mut hub = hub();
        hub.open_create();
        hub.attach_files(ingest(vec![MemoryFile::new("a.txt", "text/plain", b"a".to_vec())]).await)
            .unwrap();
        hub.attach_files(ingest(vec![MemoryFile::new("b.txt", "text/plain", b"b".to_vec())]).await)
            .unwrap();

        let files = &hub.modal().draft().unwrap().files;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "b.txt");
    }

    #[tokio::test]
    async fn test_search_filters_visible_projects() {
        let mut hub = hub();
        create(&mut hub, "Invoices 2024").await;

        hub.open_create();
        hub.set_name("Holiday").unwrap();
        hub.set_description("Photos from the beach").unwrap();
        hub.add_tag("Travel").unwrap();
        hub.submit().await.unwrap();

        assert_eq!(hub.visible().len(), 2);

        hub.set_search("BEACH");
        let names: Vec<_> = hub.visible().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Holiday"]);

        hub.set_search("travel");
        assert_eq!(hub.visible().len(), 1);

        hub.set_search("nothing");
        assert!(hub.visible().is_empty());
    }

    #[tokio::test]
    async fn test_delete_clears_selection() {
        let mut hub = hub();
        let keep = create(&mut hub, "keep").await;
        let doomed = create(&mut hub, "doomed").await;

        hub.select(doomed.id).unwrap();
        assert_eq!(hub.selected().unwrap().id, doomed.id);

        hub.delete_project(doomed.id).await.unwrap();
        assert!(hub.selected().is_none());

        hub.select(keep.id).unwrap();
        hub.refresh().await.unwrap();
        assert_eq!(hub.selected().unwrap().id, keep.id);
        assert!(hub.projects().iter().all(|p| p.id != doomed.id));
    }

    #[tokio::test]
    async fn test_select_unknown_project() {
        let mut hub = hub();
        assert!(matches!(
            hub.select(Uuid::new_v4()),
            Err(Error::ProjectNotFound(_))
        ));
        hub.clear_selection();
        assert!(hub.selected().is_none());
    }

    #[tokio::test]
    async fn test_add_files_refreshes_list() {
        let store = RelationalStore::open_memory().await.unwrap();
        let mut hub = ProjectHub::new(Arc::new(store), Owner::Local);
        let project = create(&mut hub, "grow").await;

        let added = hub
            .add_files(
                project.id,
                ingest(vec![
                    MemoryFile::new("a.txt", "text/plain", b"a".to_vec()),
                    MemoryFile::new("b.txt", "text/plain", b"b".to_vec()),
                ])
                .await,
            )
            .await
            .unwrap();

        assert_eq!(added.len(), 2);
        assert_eq!(hub.projects()[0].files.len(), 2);
    }
}
