use std::sync::Arc;

use anyhow::anyhow;
use axum::{
    Json, Router,
    extract::{FromRequestParts, Multipart, Path, Query, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};

use crate::blobstore::BlobStore;
use crate::db;
use crate::error::{ErrorKind, LibError};
use crate::media;
use crate::models::{
    CreateNodePayload, CreateProjectPayload, ListMediaQuery, ListProjectsQuery, MediaId, MediaKind,
    NodeId, Paged, ProjectId, ReplaceAssetPayload, UpdateMediaPayload, UpdateNodePayload,
    UpdateProjectPayload, UploadMediaPayload, UserId,
};

#[derive(Debug)]
pub struct AppError(pub LibError);

impl From<LibError> for AppError {
    fn from(value: LibError) -> Self {
        Self(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ErrorKind::Database => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
            ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!(kind = ?self.0.kind, error = %self.0.source, "flow api request failed");
        (status, self.0.public).into_response()
    }
}

pub trait HasPool {
    fn pool(&self) -> Arc<sqlx::PgPool>;
}

pub trait HasBlobStore {
    fn blob_store(&self) -> Arc<dyn BlobStore>;
}

/// State capable of backing the full router.
pub trait FlowApp: HasPool + HasBlobStore {}

/// Identity of the requesting user, read from request extensions.
///
/// Authentication itself stays outside this crate: the embedding application
/// verifies credentials and inserts a [`UserId`] into the request before the
/// router sees it.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser(pub UserId);

impl AuthenticatedUser {
    pub fn id(&self) -> UserId {
        self.0
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserId>()
            .copied()
            .map(Self)
            .ok_or((StatusCode::UNAUTHORIZED, "Authentication required"))
    }
}

async fn create_project_handler<S>(
    State(app): State<S>,
    auth_user: AuthenticatedUser,
    Json(payload): Json<CreateProjectPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let graph = db::create_project(&app.pool(), auth_user.id(), payload).await?;
    Ok((StatusCode::CREATED, Json(graph)))
}

async fn list_projects_handler<S>(
    State(app): State<S>,
    auth_user: AuthenticatedUser,
    Query(query): Query<ListProjectsQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let (page, limit) = query.pagination();
    let items = db::list_projects(&app.pool(), auth_user.id(), page, limit).await?;
    Ok(Json(Paged { page, limit, items }))
}

async fn get_project_handler<S>(
    State(app): State<S>,
    auth_user: AuthenticatedUser,
    Path(project_id): Path<ProjectId>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let graph = db::get_project(&app.pool(), auth_user.id(), project_id).await?;
    Ok(Json(graph))
}

async fn update_project_handler<S>(
    State(app): State<S>,
    auth_user: AuthenticatedUser,
    Path(project_id): Path<ProjectId>,
    Json(payload): Json<UpdateProjectPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let project = db::update_project(&app.pool(), auth_user.id(), project_id, payload).await?;
    Ok(Json(project))
}

async fn delete_project_handler<S>(
    State(app): State<S>,
    auth_user: AuthenticatedUser,
    Path(project_id): Path<ProjectId>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let removed = db::delete_project(&app.pool(), auth_user.id(), project_id).await?;
    if !removed {
        return Err(AppError(LibError::message("Failed to delete project")));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn create_node_handler<S>(
    State(app): State<S>,
    auth_user: AuthenticatedUser,
    Json(payload): Json<CreateNodePayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let created = db::create_node(&app.pool(), auth_user.id(), payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_node_handler<S>(
    State(app): State<S>,
    auth_user: AuthenticatedUser,
    Path(node_id): Path<NodeId>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let node = db::get_node(&app.pool(), auth_user.id(), node_id).await?;
    Ok(Json(node))
}

async fn update_node_handler<S>(
    State(app): State<S>,
    auth_user: AuthenticatedUser,
    Path(node_id): Path<NodeId>,
    Json(payload): Json<UpdateNodePayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let node = db::update_node(&app.pool(), auth_user.id(), node_id, payload).await?;
    Ok(Json(node))
}

async fn delete_node_handler<S>(
    State(app): State<S>,
    auth_user: AuthenticatedUser,
    Path(node_id): Path<NodeId>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    db::delete_node(&app.pool(), auth_user.id(), node_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reset_node_position_handler<S>(
    State(app): State<S>,
    auth_user: AuthenticatedUser,
    Path(node_id): Path<NodeId>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let node = db::reset_node_position(&app.pool(), auth_user.id(), node_id).await?;
    Ok(Json(node))
}

async fn upload_media_handler<S>(
    State(app): State<S>,
    auth_user: AuthenticatedUser,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let payload = read_upload_form(multipart).await?;
    let store = app.blob_store();
    let record = media::upload_media(&app.pool(), store.as_ref(), auth_user.id(), payload).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_media_handler<S>(
    State(app): State<S>,
    auth_user: AuthenticatedUser,
    Query(query): Query<ListMediaQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let (page, limit) = query.pagination();
    let items = db::list_media(&app.pool(), auth_user.id(), &query).await?;
    Ok(Json(Paged { page, limit, items }))
}

async fn get_media_handler<S>(
    State(app): State<S>,
    auth_user: AuthenticatedUser,
    Path(media_id): Path<MediaId>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let record = db::get_media(&app.pool(), auth_user.id(), media_id).await?;
    Ok(Json(record))
}

async fn update_media_handler<S>(
    State(app): State<S>,
    auth_user: AuthenticatedUser,
    Path(media_id): Path<MediaId>,
    Json(payload): Json<UpdateMediaPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let record = db::update_media_metadata(&app.pool(), auth_user.id(), media_id, payload).await?;
    Ok(Json(record))
}

async fn delete_media_handler<S>(
    State(app): State<S>,
    auth_user: AuthenticatedUser,
    Path(media_id): Path<MediaId>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let store = app.blob_store();
    let removed = media::delete_media(&app.pool(), store.as_ref(), auth_user.id(), media_id).await?;
    if !removed {
        return Err(AppError(LibError::message("Failed to delete media file")));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn replace_media_asset_handler<S>(
    State(app): State<S>,
    auth_user: AuthenticatedUser,
    Path(media_id): Path<MediaId>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let payload = read_replacement_form(multipart).await?;
    let store = app.blob_store();
    let record =
        media::replace_asset(&app.pool(), store.as_ref(), auth_user.id(), media_id, payload)
            .await?;
    Ok(Json(record))
}

fn invalid_multipart(err: axum::extract::multipart::MultipartError) -> AppError {
    AppError(LibError::invalid("Invalid multipart payload", anyhow!(err)))
}

/// Collect the upload form: `title`, `type`, optional `description` and
/// `projectId` text fields plus the `file` part.
async fn read_upload_form(mut multipart: Multipart) -> Result<UploadMediaPayload, AppError> {
    let mut title = String::new();
    let mut description = None;
    let mut kind = None;
    let mut project_id = None;
    let mut file_name = String::new();
    let mut content_type = None;
    let mut bytes = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(invalid_multipart)? {
        match field.name() {
            Some("title") => title = field.text().await.map_err(invalid_multipart)?,
            Some("description") => {
                description = Some(field.text().await.map_err(invalid_multipart)?);
            }
            Some("type") => {
                let value = field.text().await.map_err(invalid_multipart)?;
                let parsed = MediaKind::from_db_value(value.trim()).ok_or_else(|| {
                    AppError(LibError::invalid(
                        "Unknown media type",
                        anyhow!("unrecognized media type {value:?}"),
                    ))
                })?;
                kind = Some(parsed);
            }
            Some("projectId") => {
                let value = field.text().await.map_err(invalid_multipart)?;
                let parsed = value.trim().parse::<ProjectId>().map_err(|err| {
                    AppError(LibError::invalid(
                        "Invalid project id",
                        anyhow!("bad projectId field: {err}"),
                    ))
                })?;
                project_id = Some(parsed);
            }
            Some("file") => {
                file_name = field.file_name().unwrap_or_default().to_string();
                content_type = field.content_type().map(str::to_string);
                bytes = field.bytes().await.map_err(invalid_multipart)?.to_vec();
            }
            _ => {}
        }
    }

    let kind = kind.ok_or_else(|| {
        AppError(LibError::invalid(
            "Media type is required",
            anyhow!("multipart upload without a type field"),
        ))
    })?;

    Ok(UploadMediaPayload {
        title,
        description,
        kind,
        project_id,
        file_name,
        content_type,
        bytes,
    })
}

/// Collect the replacement form; only the `file` part matters.
async fn read_replacement_form(mut multipart: Multipart) -> Result<ReplaceAssetPayload, AppError> {
    let mut file_name = String::new();
    let mut content_type = None;
    let mut bytes = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(invalid_multipart)? {
        if field.name() == Some("file") {
            file_name = field.file_name().unwrap_or_default().to_string();
            content_type = field.content_type().map(str::to_string);
            bytes = field.bytes().await.map_err(invalid_multipart)?.to_vec();
        }
    }

    Ok(ReplaceAssetPayload {
        file_name,
        content_type,
        bytes,
    })
}

pub fn routes<S>() -> Router<S>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    tracing::info!("Registering route /project [GET,POST]");
    tracing::info!("Registering route /project/{{project_id}} [GET,PATCH,DELETE]");
    tracing::info!("Registering route /node [POST]");
    tracing::info!("Registering route /node/{{node_id}} [GET,PATCH,DELETE]");
    tracing::info!("Registering route /node/{{node_id}}/position/reset [PATCH]");
    tracing::info!("Registering route /media [GET,POST]");
    tracing::info!("Registering route /media/{{media_id}} [GET,PATCH,DELETE]");
    tracing::info!("Registering route /media/{{media_id}}/replace [PATCH]");

    Router::new()
        .route(
            "/project",
            get(list_projects_handler::<S>).post(create_project_handler::<S>),
        )
        .route(
            "/project/{project_id}",
            get(get_project_handler::<S>)
                .patch(update_project_handler::<S>)
                .delete(delete_project_handler::<S>),
        )
        .route("/node", post(create_node_handler::<S>))
        .route(
            "/node/{node_id}",
            get(get_node_handler::<S>)
                .patch(update_node_handler::<S>)
                .delete(delete_node_handler::<S>),
        )
        .route(
            "/node/{node_id}/position/reset",
            patch(reset_node_position_handler::<S>),
        )
        .route(
            "/media",
            get(list_media_handler::<S>).post(upload_media_handler::<S>),
        )
        .route(
            "/media/{media_id}",
            get(get_media_handler::<S>)
                .patch(update_media_handler::<S>)
                .delete(delete_media_handler::<S>),
        )
        .route(
            "/media/{media_id}/replace",
            patch(replace_media_asset_handler::<S>),
        )
}
