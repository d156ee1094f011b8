//! The create-project form. Each session holds at most one draft.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, post},
    Json, Router,
};
use projehub_core::{format_file_size, CreateModal, ProjectHub};
use serde::{Deserialize, Serialize};

use super::{
    api_error, failure_info, read_upload_form, ApiError, FileSummary, IngestFailureInfo,
    ProjectDetail,
};
use crate::session::SessionToken;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            post(open_draft)
                .get(get_draft)
                .patch(update_draft)
                .delete(cancel_draft),
        )
        .route("/tags", post(add_tag))
        .route("/tags/{index}", delete(remove_tag))
        .route("/files", post(attach_files))
        .route("/submit", post(submit_draft))
}

#[derive(Debug, Default, Serialize)]
pub struct DraftResponse {
    pub open: bool,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub platform: Option<String>,
    pub files: Vec<FileSummary>,
    pub total_size: u64,
    pub formatted_size: String,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<IngestFailureInfo>,
}

impl From<&CreateModal> for DraftResponse {
    fn from(modal: &CreateModal) -> Self {
        let Some(draft) = modal.draft() else {
            return Self {
                formatted_size: format_file_size(0),
                ..Self::default()
            };
        };

        let total_size = draft.files.iter().map(|f| f.size).sum();
        Self {
            open: true,
            name: draft.name.clone(),
            description: draft.description.clone(),
            tags: draft.tags.clone(),
            platform: draft.platform.clone(),
            files: draft.files.iter().map(FileSummary::from).collect(),
            total_size,
            formatted_size: format_file_size(total_size),
            error: modal.error().map(str::to_string),
            failed: Vec::new(),
        }
    }
}

fn draft_response(hub: &ProjectHub) -> Json<DraftResponse> {
    Json(DraftResponse::from(hub.modal()))
}

async fn open_draft(
    State(state): State<AppState>,
    session: SessionToken,
) -> Result<impl IntoResponse, ApiError> {
    let hub = state.hub(session.0).await.map_err(api_error)?;
    let mut hub = hub.lock().await;

    hub.open_create();

    Ok(draft_response(&hub))
}

async fn get_draft(
    State(state): State<AppState>,
    session: SessionToken,
) -> Result<impl IntoResponse, ApiError> {
    let hub = state.hub(session.0).await.map_err(api_error)?;
    let hub = hub.lock().await;

    Ok(draft_response(&hub))
}

#[derive(Debug, Deserialize)]
pub struct UpdateDraftRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub platform: Option<String>,
}

async fn update_draft(
    State(state): State<AppState>,
    session: SessionToken,
    Json(req): Json<UpdateDraftRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let hub = state.hub(session.0).await.map_err(api_error)?;
    let mut hub = hub.lock().await;

    if let Some(name) = req.name {
        hub.set_name(name).map_err(api_error)?;
    }
    if let Some(description) = req.description {
        hub.set_description(description).map_err(api_error)?;
    }
    if let Some(platform) = req.platform {
        hub.set_platform(platform).map_err(api_error)?;
    }

    Ok(draft_response(&hub))
}

async fn cancel_draft(
    State(state): State<AppState>,
    session: SessionToken,
) -> Result<impl IntoResponse, ApiError> {
    let hub = state.hub(session.0).await.map_err(api_error)?;
    hub.lock().await.cancel();

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct AddTagRequest {
    pub tag: String,
}

async fn add_tag(
    State(state): State<AppState>,
    session: SessionToken,
    Json(req): Json<AddTagRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let hub = state.hub(session.0).await.map_err(api_error)?;
    let mut hub = hub.lock().await;

    hub.add_tag(&req.tag).map_err(api_error)?;

    Ok(draft_response(&hub))
}

async fn remove_tag(
    State(state): State<AppState>,
    session: SessionToken,
    Path(index): Path<usize>,
) -> Result<impl IntoResponse, ApiError> {
    let hub = state.hub(session.0).await.map_err(api_error)?;
    let mut hub = hub.lock().await;

    hub.remove_tag(index).map_err(api_error)?;

    Ok(draft_response(&hub))
}

/// Replace the draft's files. Text parts named `name`, `description`,
/// `platform`, and `tags` (comma separated) update the draft as well.
async fn attach_files(
    State(state): State<AppState>,
    session: SessionToken,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let form = read_upload_form(multipart).await?;
    let name = form.field("name").map(str::to_string);
    let description = form.field("description").map(str::to_string);
    let platform = form.field("platform").map(str::to_string);
    let tags: Vec<String> = form
        .field("tags")
        .map(|t| t.split(',').map(str::to_string).collect())
        .unwrap_or_default();

    let batch = state.pipeline.ingest_all(form.into_sources()).await;
    let failed = failure_info(&batch);

    tracing::debug!(
        files_read = batch.stats.files_read,
        folder_entries = batch.stats.folder_entries,
        images_recompressed = batch.stats.images_recompressed,
        failures = batch.stats.failures,
        "ingested draft files"
    );

    let hub = state.hub(session.0).await.map_err(api_error)?;
    let mut hub = hub.lock().await;

    if let Some(name) = name {
        hub.set_name(name).map_err(api_error)?;
    }
    if let Some(description) = description {
        hub.set_description(description).map_err(api_error)?;
    }
    if let Some(platform) = platform {
        hub.set_platform(platform).map_err(api_error)?;
    }
    for tag in &tags {
        hub.add_tag(tag).map_err(api_error)?;
    }
    hub.attach_files(batch).map_err(api_error)?;

    let mut response = DraftResponse::from(hub.modal());
    response.failed = failed;

    Ok(Json(response))
}

async fn submit_draft(
    State(state): State<AppState>,
    session: SessionToken,
) -> Result<impl IntoResponse, ApiError> {
    let hub = state.hub(session.0).await.map_err(api_error)?;
    let mut hub = hub.lock().await;

    let project = hub.submit().await.map_err(api_error)?;

    Ok((StatusCode::CREATED, Json(ProjectDetail::from(&project))))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use axum::http::StatusCode;
    use image::{ImageFormat, Rgb, RgbImage};
    use serde_json::json;

    use crate::api::test_support::{body_json, embedded_app, Client};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buffer = Vec::new();
        RgbImage::from_pixel(width, height, Rgb([200, 10, 10]))
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[tokio::test]
    async fn test_draft_lifecycle() {
        let client = Client::new(embedded_app());

        let body = body_json(client.get("/api/draft").await).await;
        assert_eq!(body["open"], false);

        let body = body_json(client.json("POST", "/api/draft", json!({})).await).await;
        assert_eq!(body["open"], true);

        client
            .json(
                "PATCH",
                "/api/draft",
                json!({"name": "Demo", "description": "first"}),
            )
            .await;
        client
            .json("POST", "/api/draft/tags", json!({"tag": " rust "}))
            .await;
        client
            .json("POST", "/api/draft/tags", json!({"tag": "rust"}))
            .await;
        let body = body_json(
            client
                .json("POST", "/api/draft/tags", json!({"tag": "web"}))
                .await,
        )
        .await;
        assert_eq!(body["tags"], json!(["rust", "web"]));

        let body = body_json(client.delete("/api/draft/tags/0").await).await;
        assert_eq!(body["tags"], json!(["web"]));
        assert_eq!(
            client.delete("/api/draft/tags/9").await.status(),
            StatusCode::BAD_REQUEST
        );

        let response = client.json("POST", "/api/draft/submit", json!({})).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let project = body_json(response).await;
        assert_eq!(project["name"], "Demo");
        assert_eq!(project["description"], "first");
        assert_eq!(project["tags"], json!(["web"]));

        let body = body_json(client.get("/api/draft").await).await;
        assert_eq!(body["open"], false);
    }

    #[tokio::test]
    async fn test_empty_name_is_rejected_and_form_stays_open() {
        let client = Client::new(embedded_app());
        client.json("POST", "/api/draft", json!({})).await;

        let response = client.json("POST", "/api/draft/submit", json!({})).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(client.get("/api/draft").await).await;
        assert_eq!(body["open"], true);
        assert!(body["error"].is_string());

        let projects = body_json(client.get("/api/projects").await).await;
        assert!(projects.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_recompresses_images_and_keeps_folder_entries() {
        let client = Client::new(embedded_app());
        client.json("POST", "/api/draft", json!({})).await;

        let image = png(2000, 1000);
        let response = client
            .multipart(
                "/api/draft/files",
                &[("name", "Demo"), ("tags", "photos, docs")],
                &[
                    ("photo.png", "image/png", &image),
                    ("docs/readme.txt", "text/plain", b"read me"),
                ],
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["name"], "Demo");
        assert_eq!(body["tags"], json!(["photos", "docs"]));

        let files = body["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0]["mime_type"], "image/jpeg");
        assert!(files[0]["size"].as_u64().unwrap() > 0);
        assert_eq!(files[0]["has_content"], true);
        assert_eq!(files[1]["name"], "docs/readme.txt");
        assert_eq!(files[1]["is_folder"], true);
        assert_eq!(files[1]["has_content"], false);

        let response = client.json("POST", "/api/draft/submit", json!({})).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let project = body_json(response).await;
        assert_eq!(project["file_count"], 2);
    }

    #[tokio::test]
    async fn test_cancel_discards_draft() {
        let client = Client::new(embedded_app());
        client.json("POST", "/api/draft", json!({})).await;
        client
            .json("PATCH", "/api/draft", json!({"name": "gone"}))
            .await;

        let response = client.delete("/api/draft").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = client.json("POST", "/api/draft/submit", json!({})).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            client
                .json("PATCH", "/api/draft", json!({"name": "x"}))
                .await
                .status(),
            StatusCode::BAD_REQUEST
        );
    }
}
