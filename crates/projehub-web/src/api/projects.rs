use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use projehub_core::{export, Error, Project, ProjectHub};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    api_error, failure_info, read_upload_form, ApiError, FileSummary, IngestFailureInfo,
    ProjectDetail, ProjectSummary,
};
use crate::session::SessionToken;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_projects))
        .route("/{id}", get(get_project).delete(delete_project))
        .route("/{id}/files", post(add_files))
        .route("/{id}/files/{file_id}/download", get(download_file))
        .route("/{id}/archive", get(export_archive))
}

/// The project as the hub sees it, reloading once if it is not in the list yet.
async fn load_project(hub: &mut ProjectHub, id: Uuid) -> Result<Project, Error> {
    if !hub.projects().iter().any(|p| p.id == id) {
        hub.refresh().await?;
    }

    hub.projects()
        .iter()
        .find(|p| p.id == id)
        .cloned()
        .ok_or(Error::ProjectNotFound(id))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub q: String,
}

async fn list_projects(
    State(state): State<AppState>,
    session: SessionToken,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let hub = state.hub(session.0).await.map_err(api_error)?;
    let mut hub = hub.lock().await;

    hub.refresh().await.map_err(api_error)?;
    hub.set_search(query.q);

    let projects: Vec<ProjectSummary> = hub
        .visible()
        .into_iter()
        .map(ProjectSummary::from)
        .collect();

    Ok(Json(projects))
}

async fn get_project(
    State(state): State<AppState>,
    session: SessionToken,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let hub = state.hub(session.0).await.map_err(api_error)?;
    let mut hub = hub.lock().await;

    load_project(&mut hub, id).await.map_err(api_error)?;
    let project = hub.select(id).map_err(api_error)?;

    Ok(Json(ProjectDetail::from(project)))
}

async fn delete_project(
    State(state): State<AppState>,
    session: SessionToken,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let hub = state.hub(session.0).await.map_err(api_error)?;
    let mut hub = hub.lock().await;

    hub.delete_project(id).await.map_err(api_error)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_selection(
    State(state): State<AppState>,
    session: SessionToken,
) -> Result<impl IntoResponse, ApiError> {
    let hub = state.hub(session.0).await.map_err(api_error)?;
    hub.lock().await.clear_selection();

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct AddFilesResponse {
    pub added: Vec<FileSummary>,
    pub failed: Vec<IngestFailureInfo>,
}

async fn add_files(
    State(state): State<AppState>,
    session: SessionToken,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let form = read_upload_form(multipart).await?;
    let batch = state.pipeline.ingest_all(form.into_sources()).await;
    let failed = failure_info(&batch);

    let hub = state.hub(session.0).await.map_err(api_error)?;
    let mut hub = hub.lock().await;
    let added = hub.add_files(id, batch).await.map_err(api_error)?;

    Ok(Json(AddFilesResponse {
        added: added.iter().map(FileSummary::from).collect(),
        failed,
    }))
}

/// `Content-Disposition` with an ASCII fallback name and the exact UTF-8 name
/// in the RFC 5987 `filename*` parameter.
fn attachment(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if c == '"' || c == '\\' || c.is_control() || !c.is_ascii() {
                '_'
            } else {
                c
            }
        })
        .collect();

    if fallback == file_name {
        return format!("attachment; filename=\"{fallback}\"");
    }

    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        utf8_percent_encode(file_name, FILENAME_ENCODE_SET)
    )
}

/// Everything outside the RFC 5987 `attr-char` set.
const FILENAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

async fn download_file(
    State(state): State<AppState>,
    session: SessionToken,
    Path((id, file_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let record = {
        let hub = state.hub(session.0).await.map_err(api_error)?;
        let mut hub = hub.lock().await;
        let project = load_project(&mut hub, id).await.map_err(api_error)?;
        project
            .file(file_id)
            .cloned()
            .ok_or_else(|| api_error(Error::FileNotFound(file_id)))?
    };

    let Some(download) = export::download(&record).map_err(api_error)? else {
        return Err((
            StatusCode::CONFLICT,
            format!("{} has no stored content", record.name()),
        ));
    };

    Ok((
        [
            (header::CONTENT_TYPE, download.mime_type),
            (header::CONTENT_DISPOSITION, attachment(&download.file_name)),
        ],
        download.bytes,
    ))
}

async fn export_archive(
    State(state): State<AppState>,
    session: SessionToken,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let project = {
        let hub = state.hub(session.0).await.map_err(api_error)?;
        let mut hub = hub.lock().await;
        let project = load_project(&mut hub, id).await.map_err(api_error)?;
        project
    };

    let archive = tokio::task::spawn_blocking(move || export::export_archive(&project))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(api_error)?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, attachment(&archive.file_name)),
        ],
        archive.bytes,
    ))
}
