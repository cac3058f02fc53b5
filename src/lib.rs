#[cfg(feature = "api")]
pub mod api;
pub mod blobstore;
#[cfg(feature = "cloudinary")]
pub mod cloudinary;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
#[cfg(feature = "sqlx")]
pub mod media;
pub mod models;
#[cfg(feature = "sqlx")]
pub mod operations;

pub mod prelude {
    #[cfg(feature = "api")]
    pub use crate::api::{AppError, AuthenticatedUser, FlowApp, HasBlobStore, HasPool};
    pub use crate::blobstore::{BlobKind, BlobStore, MemoryBlobStore, UploadedBlob};
    #[cfg(feature = "cloudinary")]
    pub use crate::cloudinary::{CloudinaryConfig, CloudinaryStore};
    #[cfg(feature = "sqlx")]
    pub use crate::db::{
        create_flow_tables, create_node, create_project, delete_node, delete_project, get_media,
        get_node, get_project, list_media, list_projects, reset_node_position,
        update_media_metadata, update_node, update_project,
    };
    pub use crate::error::{ErrorKind, LibError, Result};
    #[cfg(feature = "sqlx")]
    pub use crate::media::{delete_media, replace_asset, upload_media};
    pub use crate::models::{
        CreateNodePayload, CreateProjectPayload, CreatedNode, EdgeId, FlowEdge, FlowNode,
        ListMediaQuery, ListProjectsQuery, MediaId, MediaKind, MediaRecord, NodeId, Paged,
        Position, Project, ProjectGraph, ProjectId, ProjectSummary, ReplaceAssetPayload,
        UpdateMediaPayload, UpdateNodePayload, UpdateProjectPayload, UploadMediaPayload, UserId,
    };
    #[cfg(feature = "sqlx")]
    pub use crate::operations::{FlowOperation, FlowOperationResult, FlowOperations};
}
