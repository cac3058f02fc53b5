use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::blobstore::BlobStore;
use crate::db;
use crate::error::Result;
use crate::media;
use crate::models::{
    CreateNodePayload, CreateProjectPayload, CreatedNode, FlowEdge, FlowNode, ListMediaQuery,
    ListProjectsQuery, MediaId, MediaRecord, NodeId, Paged, Project, ProjectGraph, ProjectId,
    ProjectSummary, ReplaceAssetPayload, UpdateMediaPayload, UpdateNodePayload,
    UpdateProjectPayload, UploadMediaPayload, UserId,
};

/// MCP-friendly high-level project and media actions.
///
/// Callers must provide a trusted `actor` sourced from validated auth/session state,
/// not from model/tool arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum FlowOperation {
    CreateProject {
        payload: CreateProjectPayload,
    },
    GetProject {
        project_id: ProjectId,
    },
    ListProjects {
        query: ListProjectsQuery,
    },
    UpdateProject {
        project_id: ProjectId,
        payload: UpdateProjectPayload,
    },
    DeleteProject {
        project_id: ProjectId,
    },
    CreateNode {
        payload: CreateNodePayload,
    },
    GetNode {
        node_id: NodeId,
    },
    UpdateNode {
        node_id: NodeId,
        payload: UpdateNodePayload,
    },
    DeleteNode {
        node_id: NodeId,
    },
    ResetNodePosition {
        node_id: NodeId,
    },
    UploadMedia {
        payload: UploadMediaPayload,
    },
    GetMedia {
        media_id: MediaId,
    },
    ListMedia {
        query: ListMediaQuery,
    },
    UpdateMediaMetadata {
        media_id: MediaId,
        payload: UpdateMediaPayload,
    },
    DeleteMedia {
        media_id: MediaId,
    },
    ReplaceMediaAsset {
        media_id: MediaId,
        payload: ReplaceAssetPayload,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FlowOperationResult {
    Project {
        project: Project,
    },
    ProjectGraph {
        graph: ProjectGraph,
    },
    ProjectsPage {
        page: u32,
        limit: u32,
        items: Vec<ProjectSummary>,
    },
    CreatedNode {
        node: FlowNode,
        #[serde(skip_serializing_if = "Option::is_none")]
        edge: Option<FlowEdge>,
    },
    Node {
        node: FlowNode,
    },
    Media {
        media: MediaRecord,
    },
    MediaPage {
        page: u32,
        limit: u32,
        items: Vec<MediaRecord>,
    },
    Deleted,
    ProjectDeleted {
        removed: bool,
    },
    MediaDeleted {
        removed: bool,
    },
}

#[derive(Clone)]
pub struct FlowOperations {
    pool: Arc<PgPool>,
    store: Arc<dyn BlobStore>,
}

impl FlowOperations {
    pub fn new(pool: Arc<PgPool>, store: Arc<dyn BlobStore>) -> Self {
        Self { pool, store }
    }

    pub fn from_pool(pool: &PgPool, store: Arc<dyn BlobStore>) -> Self {
        Self {
            pool: Arc::new(pool.clone()),
            store,
        }
    }

    pub fn pool(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }

    pub fn store(&self) -> Arc<dyn BlobStore> {
        Arc::clone(&self.store)
    }

    pub async fn execute(
        &self,
        actor: UserId,
        operation: FlowOperation,
    ) -> Result<FlowOperationResult> {
        match operation {
            FlowOperation::CreateProject { payload } => {
                let graph = self.create_project(actor, payload).await?;
                Ok(FlowOperationResult::ProjectGraph { graph })
            }
            FlowOperation::GetProject { project_id } => {
                let graph = self.get_project(actor, project_id).await?;
                Ok(FlowOperationResult::ProjectGraph { graph })
            }
            FlowOperation::ListProjects { query } => {
                let page = self.list_projects(actor, query).await?;
                Ok(FlowOperationResult::ProjectsPage {
                    page: page.page,
                    limit: page.limit,
                    items: page.items,
                })
            }
            FlowOperation::UpdateProject { project_id, payload } => {
                let project = self.update_project(actor, project_id, payload).await?;
                Ok(FlowOperationResult::Project { project })
            }
            FlowOperation::DeleteProject { project_id } => {
                let removed = self.delete_project(actor, project_id).await?;
                Ok(FlowOperationResult::ProjectDeleted { removed })
            }
            FlowOperation::CreateNode { payload } => {
                let created = self.create_node(actor, payload).await?;
                Ok(FlowOperationResult::CreatedNode {
                    node: created.node,
                    edge: created.edge,
                })
            }
            FlowOperation::GetNode { node_id } => {
                let node = self.get_node(actor, node_id).await?;
                Ok(FlowOperationResult::Node { node })
            }
            FlowOperation::UpdateNode { node_id, payload } => {
                let node = self.update_node(actor, node_id, payload).await?;
                Ok(FlowOperationResult::Node { node })
            }
            FlowOperation::DeleteNode { node_id } => {
                self.delete_node(actor, node_id).await?;
                Ok(FlowOperationResult::Deleted)
            }
            FlowOperation::ResetNodePosition { node_id } => {
                let node = self.reset_node_position(actor, node_id).await?;
                Ok(FlowOperationResult::Node { node })
            }
            FlowOperation::UploadMedia { payload } => {
                let media = self.upload_media(actor, payload).await?;
                Ok(FlowOperationResult::Media { media })
            }
            FlowOperation::GetMedia { media_id } => {
                let media = self.get_media(actor, media_id).await?;
                Ok(FlowOperationResult::Media { media })
            }
            FlowOperation::ListMedia { query } => {
                let page = self.list_media(actor, query).await?;
                Ok(FlowOperationResult::MediaPage {
                    page: page.page,
                    limit: page.limit,
                    items: page.items,
                })
            }
            FlowOperation::UpdateMediaMetadata { media_id, payload } => {
                let media = self.update_media_metadata(actor, media_id, payload).await?;
                Ok(FlowOperationResult::Media { media })
            }
            FlowOperation::DeleteMedia { media_id } => {
                let removed = self.delete_media(actor, media_id).await?;
                Ok(FlowOperationResult::MediaDeleted { removed })
            }
            FlowOperation::ReplaceMediaAsset { media_id, payload } => {
                let media = self.replace_media_asset(actor, media_id, payload).await?;
                Ok(FlowOperationResult::Media { media })
            }
        }
    }

    pub async fn create_project(
        &self,
        actor: UserId,
        payload: CreateProjectPayload,
    ) -> Result<ProjectGraph> {
        db::create_project(&self.pool, actor, payload).await
    }

    pub async fn get_project(&self, actor: UserId, project_id: ProjectId) -> Result<ProjectGraph> {
        db::get_project(&self.pool, actor, project_id).await
    }

    pub async fn list_projects(
        &self,
        actor: UserId,
        query: ListProjectsQuery,
    ) -> Result<Paged<ProjectSummary>> {
        let (page, limit) = query.pagination();
        let items = db::list_projects(&self.pool, actor, page, limit).await?;
        Ok(Paged { page, limit, items })
    }

    pub async fn update_project(
        &self,
        actor: UserId,
        project_id: ProjectId,
        payload: UpdateProjectPayload,
    ) -> Result<Project> {
        db::update_project(&self.pool, actor, project_id, payload).await
    }

    /// Returns whether a row was actually removed; children go through the
    /// cascade either way.
    pub async fn delete_project(&self, actor: UserId, project_id: ProjectId) -> Result<bool> {
        db::delete_project(&self.pool, actor, project_id).await
    }

    pub async fn create_node(
        &self,
        actor: UserId,
        payload: CreateNodePayload,
    ) -> Result<CreatedNode> {
        db::create_node(&self.pool, actor, payload).await
    }

    pub async fn get_node(&self, actor: UserId, node_id: NodeId) -> Result<FlowNode> {
        db::get_node(&self.pool, actor, node_id).await
    }

    pub async fn update_node(
        &self,
        actor: UserId,
        node_id: NodeId,
        payload: UpdateNodePayload,
    ) -> Result<FlowNode> {
        db::update_node(&self.pool, actor, node_id, payload).await
    }

    pub async fn delete_node(&self, actor: UserId, node_id: NodeId) -> Result<()> {
        db::delete_node(&self.pool, actor, node_id).await
    }

    pub async fn reset_node_position(&self, actor: UserId, node_id: NodeId) -> Result<FlowNode> {
        db::reset_node_position(&self.pool, actor, node_id).await
    }

    pub async fn upload_media(
        &self,
        actor: UserId,
        payload: UploadMediaPayload,
    ) -> Result<MediaRecord> {
        media::upload_media(&self.pool, self.store.as_ref(), actor, payload).await
    }

    pub async fn get_media(&self, actor: UserId, media_id: MediaId) -> Result<MediaRecord> {
        db::get_media(&self.pool, actor, media_id).await
    }

    pub async fn list_media(
        &self,
        actor: UserId,
        query: ListMediaQuery,
    ) -> Result<Paged<MediaRecord>> {
        let (page, limit) = query.pagination();
        let items = db::list_media(&self.pool, actor, &query).await?;
        Ok(Paged { page, limit, items })
    }

    pub async fn update_media_metadata(
        &self,
        actor: UserId,
        media_id: MediaId,
        payload: UpdateMediaPayload,
    ) -> Result<MediaRecord> {
        db::update_media_metadata(&self.pool, actor, media_id, payload).await
    }

    /// Removes the catalog row and makes a best-effort attempt on the stored
    /// asset. Returns whether the row was actually deleted.
    pub async fn delete_media(&self, actor: UserId, media_id: MediaId) -> Result<bool> {
        media::delete_media(&self.pool, self.store.as_ref(), actor, media_id).await
    }

    pub async fn replace_media_asset(
        &self,
        actor: UserId,
        media_id: MediaId,
        payload: ReplaceAssetPayload,
    ) -> Result<MediaRecord> {
        media::replace_asset(&self.pool, self.store.as_ref(), actor, media_id, payload).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::models::DEFAULT_NODE_KIND;

    #[test]
    fn operations_deserialize_from_tagged_json() {
        let project_id = Uuid::new_v4();
        let operation: FlowOperation = serde_json::from_value(json!({
            "operation": "create_node",
            "payload": {
                "projectId": project_id,
                "sourceNodeId": null,
                "edgeType": "choice"
            }
        }))
        .expect("operation should deserialize");

        let FlowOperation::CreateNode { payload } = operation else {
            panic!("expected a create_node operation");
        };
        assert_eq!(payload.project_id.0, project_id);
        let definition = payload.normalize();
        assert_eq!(definition.kind, DEFAULT_NODE_KIND);
        assert_eq!(definition.edge_kind, "choice");
    }

    #[test]
    fn results_serialize_with_a_result_tag() {
        let deleted = serde_json::to_value(FlowOperationResult::Deleted).expect("serializable");
        assert_eq!(deleted, json!({ "result": "deleted" }));

        let removed = serde_json::to_value(FlowOperationResult::MediaDeleted { removed: true })
            .expect("serializable");
        assert_eq!(removed, json!({ "result": "media_deleted", "removed": true }));

        let removed = serde_json::to_value(FlowOperationResult::ProjectDeleted { removed: false })
            .expect("serializable");
        assert_eq!(removed, json!({ "result": "project_deleted", "removed": false }));
    }
}
