use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{LibError, Result};

/// Node kind used when a create payload does not specify one.
pub const DEFAULT_NODE_KIND: &str = "default";
/// Edge kind used when a create payload does not specify one.
pub const DEFAULT_EDGE_KIND: &str = "default";
/// Kind of the seeded entry node every project starts with.
pub const START_NODE_KIND: &str = "start";
/// Kind of the seeded terminal node every project starts with.
pub const END_NODE_KIND: &str = "end";
/// Status newly uploaded media records carry.
pub const MEDIA_STATUS_ACTIVE: &str = "active";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

impl MediaKind {
    pub const fn as_db_value(self) -> &'static str {
        match self {
            MediaKind::Image => "IMAGE",
            MediaKind::Video => "VIDEO",
            MediaKind::Audio => "AUDIO",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "IMAGE" => Some(MediaKind::Image),
            "VIDEO" => Some(MediaKind::Video),
            "AUDIO" => Some(MediaKind::Audio),
            _ => None,
        }
    }
}

/// Opaque identifier of the requesting principal.
///
/// Credential issuance and verification live outside this crate; callers
/// resolve a principal first and hand its id to every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct UserId(pub Uuid);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

impl From<Uuid> for UserId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ProjectId(pub Uuid);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

impl From<Uuid> for ProjectId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct NodeId(pub Uuid);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

impl From<Uuid> for NodeId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct EdgeId(pub Uuid);

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EdgeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

impl From<Uuid> for EdgeId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct MediaId(pub Uuid);

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MediaId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

impl From<Uuid> for MediaId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Canvas coordinates of a node.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: bool,
    pub owner_id: UserId,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: String,
    pub position: Position,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub node_order: i32,
    pub project_id: ProjectId,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEdge {
    pub id: EdgeId,
    #[serde(rename = "type")]
    pub kind: String,
    pub source: NodeId,
    pub target: NodeId,
    pub project_id: ProjectId,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A freshly inserted node and the edge that may have been wired to it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedNode {
    pub node: FlowNode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge: Option<FlowEdge>,
}

/// A project hydrated with its full graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectGraph {
    pub id: ProjectId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: bool,
    pub owner_id: UserId,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub id: ProjectId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: bool,
    pub owner_id: UserId,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub node_count: i64,
    pub edge_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    pub id: MediaId,
    pub owner_id: UserId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub size: i64,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub ext: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_id: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    pub page: u32,
    pub limit: u32,
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListProjectsQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ListProjectsQuery {
    pub fn pagination(&self) -> (u32, u32) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(25).clamp(1, 200);
        (page, limit)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMediaQuery {
    #[serde(rename = "type")]
    pub kind: Option<MediaKind>,
    pub project_id: Option<ProjectId>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ListMediaQuery {
    pub fn pagination(&self) -> (u32, u32) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(25).clamp(1, 200);
        (page, limit)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectPayload {
    pub title: String,
    pub description: Option<String>,
}

/// Normalized form of [`CreateProjectPayload`].
#[derive(Debug, Clone)]
pub struct ProjectDefinition {
    pub title: String,
    pub description: Option<String>,
}

impl CreateProjectPayload {
    pub fn normalize(self) -> Result<ProjectDefinition> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(LibError::invalid(
                "Project title is required",
                anyhow!("empty project title"),
            ));
        }

        Ok(ProjectDefinition {
            title,
            description: normalize_description(self.description),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectPayload {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<bool>,
}

/// Field-level changes to apply to a project; unset fields keep their value.
#[derive(Debug, Clone)]
pub struct ProjectChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<bool>,
}

impl UpdateProjectPayload {
    pub fn normalize(self) -> Result<ProjectChanges> {
        if self.title.is_none() && self.description.is_none() && self.status.is_none() {
            return Err(LibError::invalid(
                "At least one of \"title\", \"description\" or \"status\" must be provided",
                anyhow!("empty project update payload"),
            ));
        }

        let title = match self.title {
            Some(title) => {
                let title = title.trim().to_string();
                if title.is_empty() {
                    return Err(LibError::invalid(
                        "Project title is required",
                        anyhow!("empty project title in update"),
                    ));
                }
                Some(title)
            }
            None => None,
        };

        Ok(ProjectChanges {
            title,
            description: self.description.map(|d| d.trim().to_string()),
            status: self.status,
        })
    }
}

/// Node attributes supplied by create and update payloads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAttributes {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub position: Option<Position>,
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodePayload {
    pub project_id: ProjectId,
    pub source_node_id: Option<NodeId>,
    #[serde(default)]
    pub attributes: NodeAttributes,
    #[serde(rename = "edgeType")]
    pub edge_kind: Option<String>,
}

/// Normalized form of [`CreateNodePayload`] with defaults applied.
#[derive(Debug, Clone)]
pub struct NodeDefinition {
    pub project_id: ProjectId,
    pub source_node_id: Option<NodeId>,
    pub kind: String,
    pub position: Position,
    pub data: Option<Value>,
    pub edge_kind: String,
}

impl CreateNodePayload {
    pub fn normalize(self) -> NodeDefinition {
        NodeDefinition {
            project_id: self.project_id,
            source_node_id: self.source_node_id,
            kind: self
                .attributes
                .kind
                .unwrap_or_else(|| DEFAULT_NODE_KIND.to_string()),
            position: self.attributes.position.unwrap_or_default(),
            data: self.attributes.data,
            edge_kind: self
                .edge_kind
                .unwrap_or_else(|| DEFAULT_EDGE_KIND.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNodePayload {
    #[serde(default)]
    pub attributes: NodeAttributes,
}

/// Field-level changes to apply to a node; unset fields keep their value.
#[derive(Debug, Clone)]
pub struct NodeChanges {
    pub kind: Option<String>,
    pub position: Option<Position>,
    pub data: Option<Value>,
}

impl UpdateNodePayload {
    pub fn normalize(self) -> Result<NodeChanges> {
        let NodeAttributes {
            kind,
            position,
            data,
        } = self.attributes;

        if kind.is_none() && position.is_none() && data.is_none() {
            return Err(LibError::invalid(
                "At least one of \"type\", \"position\" or \"data\" must be provided",
                anyhow!("empty node update payload"),
            ));
        }

        Ok(NodeChanges {
            kind,
            position,
            data,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMediaPayload {
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub project_id: Option<ProjectId>,
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Normalized form of [`UploadMediaPayload`].
#[derive(Debug, Clone)]
pub struct MediaUploadDefinition {
    pub title: String,
    pub description: Option<String>,
    pub kind: MediaKind,
    pub project_id: Option<ProjectId>,
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadMediaPayload {
    pub fn normalize(self) -> Result<MediaUploadDefinition> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(LibError::invalid(
                "Media title is required",
                anyhow!("empty media title"),
            ));
        }

        let file_name = self.file_name.trim().to_string();
        if file_name.is_empty() {
            return Err(LibError::invalid(
                "Invalid file: no filename provided",
                anyhow!("empty upload file name"),
            ));
        }

        if self.bytes.is_empty() {
            return Err(LibError::invalid(
                "Invalid file: empty file body",
                anyhow!("empty upload body for {}", file_name),
            ));
        }

        Ok(MediaUploadDefinition {
            title,
            description: normalize_description(self.description),
            kind: self.kind,
            project_id: self.project_id,
            file_name,
            content_type: self.content_type,
            bytes: self.bytes,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMediaPayload {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<MediaKind>,
}

/// Field-level changes to apply to a media record's metadata.
#[derive(Debug, Clone)]
pub struct MediaChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub kind: Option<MediaKind>,
}

impl UpdateMediaPayload {
    pub fn normalize(self) -> Result<MediaChanges> {
        if self.title.is_none() && self.description.is_none() && self.kind.is_none() {
            return Err(LibError::invalid(
                "At least one of \"title\", \"description\" or \"type\" must be provided",
                anyhow!("empty media update payload"),
            ));
        }

        let title = match self.title {
            Some(title) => {
                let title = title.trim().to_string();
                if title.is_empty() {
                    return Err(LibError::invalid(
                        "Media title is required",
                        anyhow!("empty media title in update"),
                    ));
                }
                Some(title)
            }
            None => None,
        };

        Ok(MediaChanges {
            title,
            description: self.description.map(|d| d.trim().to_string()),
            kind: self.kind,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceAssetPayload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Normalized replacement upload for an existing media record.
#[derive(Debug, Clone)]
pub struct AssetReplacement {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl ReplaceAssetPayload {
    pub fn normalize(self) -> Result<AssetReplacement> {
        let file_name = self.file_name.trim().to_string();
        if file_name.is_empty() {
            return Err(LibError::invalid(
                "Invalid file: no filename provided",
                anyhow!("empty replacement file name"),
            ));
        }

        if self.bytes.is_empty() {
            return Err(LibError::invalid(
                "Invalid file: empty file body",
                anyhow!("empty replacement body for {}", file_name),
            ));
        }

        Ok(AssetReplacement {
            file_name,
            content_type: self.content_type,
            bytes: self.bytes,
        })
    }
}

fn normalize_description(description: Option<String>) -> Option<String> {
    description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        CreateNodePayload, CreateProjectPayload, MediaKind, NodeAttributes, Position,
        ReplaceAssetPayload, UpdateMediaPayload, UpdateNodePayload, UpdateProjectPayload,
        UploadMediaPayload,
    };

    #[test]
    fn create_project_trims_title_and_description() {
        let payload = CreateProjectPayload {
            title: "  Demo  ".to_string(),
            description: Some("  first flow  ".to_string()),
        };

        let definition = payload.normalize().expect("payload should normalize");
        assert_eq!(definition.title, "Demo");
        assert_eq!(definition.description.as_deref(), Some("first flow"));
    }

    #[test]
    fn create_project_rejects_blank_title() {
        let payload = CreateProjectPayload {
            title: "   ".to_string(),
            description: None,
        };

        let err = payload.normalize().expect_err("blank title should fail");
        assert_eq!(err.public, "Project title is required");
    }

    #[test]
    fn create_project_drops_empty_description() {
        let payload = CreateProjectPayload {
            title: "Demo".to_string(),
            description: Some("   ".to_string()),
        };

        let definition = payload.normalize().expect("payload should normalize");
        assert_eq!(definition.description, None);
    }

    #[test]
    fn update_project_requires_a_field() {
        let err = UpdateProjectPayload::default()
            .normalize()
            .expect_err("empty update should fail");
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn update_project_keeps_single_field_changes() {
        let changes = UpdateProjectPayload {
            title: None,
            description: None,
            status: Some(false),
        }
        .normalize()
        .expect("status-only update should normalize");

        assert_eq!(changes.title, None);
        assert_eq!(changes.description, None);
        assert_eq!(changes.status, Some(false));
    }

    #[test]
    fn create_node_applies_defaults() {
        let payload = CreateNodePayload {
            project_id: Default::default(),
            source_node_id: None,
            attributes: NodeAttributes::default(),
            edge_kind: None,
        };

        let definition = payload.normalize();
        assert_eq!(definition.kind, "default");
        assert_eq!(definition.position, Position::new(0.0, 0.0));
        assert_eq!(definition.data, None);
        assert_eq!(definition.edge_kind, "default");
    }

    #[test]
    fn create_node_keeps_supplied_attributes() {
        let payload = CreateNodePayload {
            project_id: Default::default(),
            source_node_id: None,
            attributes: NodeAttributes {
                kind: Some("question".to_string()),
                position: Some(Position::new(120.0, 64.0)),
                data: Some(json!({"prompt": "Why?"})),
            },
            edge_kind: Some("branch".to_string()),
        };

        let definition = payload.normalize();
        assert_eq!(definition.kind, "question");
        assert_eq!(definition.position, Position::new(120.0, 64.0));
        assert_eq!(definition.data, Some(json!({"prompt": "Why?"})));
        assert_eq!(definition.edge_kind, "branch");
    }

    #[test]
    fn update_node_requires_a_field() {
        let err = UpdateNodePayload::default()
            .normalize()
            .expect_err("empty node update should fail");
        assert_eq!(
            err.public,
            "At least one of \"type\", \"position\" or \"data\" must be provided"
        );
    }

    #[test]
    fn update_node_accepts_single_field() {
        let changes = UpdateNodePayload {
            attributes: NodeAttributes {
                kind: None,
                position: Some(Position::new(5.0, 9.0)),
                data: None,
            },
        }
        .normalize()
        .expect("position-only update should normalize");

        assert_eq!(changes.kind, None);
        assert_eq!(changes.position, Some(Position::new(5.0, 9.0)));
        assert_eq!(changes.data, None);
    }

    #[test]
    fn upload_media_rejects_empty_body() {
        let payload = UploadMediaPayload {
            title: "Intro".to_string(),
            description: None,
            kind: MediaKind::Video,
            project_id: None,
            file_name: "intro.mp4".to_string(),
            content_type: Some("video/mp4".to_string()),
            bytes: Vec::new(),
        };

        let err = payload.normalize().expect_err("empty body should fail");
        assert_eq!(err.public, "Invalid file: empty file body");
    }

    #[test]
    fn upload_media_rejects_blank_filename() {
        let payload = UploadMediaPayload {
            title: "Intro".to_string(),
            description: None,
            kind: MediaKind::Video,
            project_id: None,
            file_name: "  ".to_string(),
            content_type: None,
            bytes: vec![1, 2, 3],
        };

        let err = payload.normalize().expect_err("blank filename should fail");
        assert_eq!(err.public, "Invalid file: no filename provided");
    }

    #[test]
    fn update_media_requires_a_field() {
        let err = UpdateMediaPayload::default()
            .normalize()
            .expect_err("empty media update should fail");
        assert_eq!(
            err.public,
            "At least one of \"title\", \"description\" or \"type\" must be provided"
        );
    }

    #[test]
    fn replace_asset_requires_bytes() {
        let payload = ReplaceAssetPayload {
            file_name: "next.jpg".to_string(),
            content_type: Some("image/jpeg".to_string()),
            bytes: Vec::new(),
        };

        let err = payload.normalize().expect_err("empty body should fail");
        assert_eq!(err.public, "Invalid file: empty file body");
    }

    #[test]
    fn media_kind_round_trips_db_values() {
        for kind in [MediaKind::Image, MediaKind::Video, MediaKind::Audio] {
            assert_eq!(MediaKind::from_db_value(kind.as_db_value()), Some(kind));
        }
        assert_eq!(MediaKind::from_db_value("GIF"), None);
    }
}
