mod config;
mod draft;
mod projects;
mod session;

use std::collections::HashMap;

use axum::{
    extract::Multipart,
    http::StatusCode,
    routing::delete,
    Router,
};
use chrono::{DateTime, Utc};
use projehub_core::{
    format_file_size, Error, FileDraft, FileRecord, FileSource, IngestBatch, MemoryFile, Project,
};
use serde::Serialize;
use uuid::Uuid;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/config", config::router())
        .nest("/draft", draft::router())
        .nest("/projects", projects::router())
        .nest("/session", session::router())
        .route("/selection", delete(projects::clear_selection))
}

pub type ApiError = (StatusCode, String);

/// Map a core error onto the status the front end reacts to.
pub fn api_error(e: Error) -> ApiError {
    let status = match &e {
        Error::Validation(_) | Error::InvalidContent(_) => StatusCode::BAD_REQUEST,
        Error::ProjectNotFound(_) | Error::FileNotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidCredentials | Error::Unauthenticated => StatusCode::UNAUTHORIZED,
        Error::DuplicateAccount(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!(error = %e, "request failed");
    }

    (status, e.to_string())
}

#[derive(Debug, Serialize)]
pub struct FileSummary {
    pub id: Option<Uuid>,
    pub name: String,
    pub size: u64,
    pub formatted_size: String,
    pub mime_type: String,
    pub last_modified: DateTime<Utc>,
    pub is_folder: bool,
    pub has_content: bool,
}

impl FileSummary {
    fn from_draft(id: Option<Uuid>, file: &FileDraft) -> Self {
        Self {
            id,
            name: file.name.clone(),
            size: file.size,
            formatted_size: format_file_size(file.size),
            mime_type: file.mime_type.clone(),
            last_modified: file.last_modified,
            is_folder: file.is_folder(),
            has_content: file.has_content(),
        }
    }
}

impl From<&FileDraft> for FileSummary {
    fn from(file: &FileDraft) -> Self {
        Self::from_draft(None, file)
    }
}

impl From<&FileRecord> for FileSummary {
    fn from(record: &FileRecord) -> Self {
        Self::from_draft(Some(record.id), &record.file)
    }
}

/// Project card data; never includes file content.
#[derive(Debug, Serialize)]
pub struct ProjectSummary {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub platform: String,
    pub created_at: DateTime<Utc>,
    pub file_count: usize,
    pub total_size: u64,
    pub formatted_size: String,
}

impl From<&Project> for ProjectSummary {
    fn from(project: &Project) -> Self {
        let total_size = project.total_size();
        Self {
            id: project.id,
            name: project.name.clone(),
            description: project.description.clone(),
            tags: project.tags.clone(),
            platform: project.platform.clone(),
            created_at: project.created_at,
            file_count: project.files.len(),
            total_size,
            formatted_size: format_file_size(total_size),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub summary: ProjectSummary,
    pub files: Vec<FileSummary>,
}

impl From<&Project> for ProjectDetail {
    fn from(project: &Project) -> Self {
        Self {
            summary: project.into(),
            files: project.files.iter().map(FileSummary::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IngestFailureInfo {
    pub name: String,
    pub error: String,
}

/// Text fields and file parts of a multipart form.
#[derive(Default)]
pub struct UploadForm {
    pub fields: HashMap<String, String>,
    pub files: Vec<MemoryFile>,
}

impl UploadForm {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn into_sources(self) -> Vec<Box<dyn FileSource>> {
        self.files
            .into_iter()
            .map(|f| Box::new(f) as Box<dyn FileSource>)
            .collect()
    }
}

/// Read a multipart body. Parts with a file name become uploads (a name with
/// `/` marks a folder entry); other parts are kept as text fields.
pub async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read multipart: {e}")))?
    {
        let field_name = field.name().map(str::to_string).unwrap_or_default();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string).unwrap_or_default();

        let data = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read {field_name}: {e}")))?;

        match file_name {
            Some(file_name) => form
                .files
                .push(MemoryFile::from_upload(&file_name, content_type, data.to_vec())),
            None => {
                let value = String::from_utf8_lossy(&data).to_string();
                form.fields.insert(field_name, value);
            }
        }
    }

    Ok(form)
}

pub fn failure_info(batch: &IngestBatch) -> Vec<IngestFailureInfo> {
    batch
        .failed
        .iter()
        .map(|f| IngestFailureInfo {
            name: f.name.clone(),
            error: f.error.to_string(),
        })
        .collect()
}
