use anyhow::anyhow;
use once_cell::sync::Lazy;
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{LibError, Result};
use crate::models::{
    CreateNodePayload, CreateProjectPayload, CreatedNode, DEFAULT_EDGE_KIND, END_NODE_KIND,
    EdgeId, FlowEdge, FlowNode, ListMediaQuery, MEDIA_STATUS_ACTIVE, MediaChanges, MediaId,
    MediaKind, MediaRecord, NodeChanges, NodeDefinition, NodeId, Position, Project, ProjectGraph,
    ProjectId, ProjectSummary, START_NODE_KIND, UpdateMediaPayload, UpdateNodePayload,
    UpdateProjectPayload, UserId,
};

pub static MIGRATOR: Lazy<Migrator> = Lazy::new(|| {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator
});

pub async fn create_flow_tables(pool: &PgPool) -> std::result::Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Seed layout of the two nodes every new project starts with.
const START_NODE_POSITION: Position = Position::new(0.0, 40.0);
const END_NODE_POSITION: Position = Position::new(800.0, 40.0);

/// Postgres sqlstate for unique violations.
const PG_UNIQUE_VIOLATION: &str = "23505";
/// Constraint guarding one node_order per project, named in migrations.
const NODE_ORDER_CONSTRAINT: &str = "nodes_project_order_key";
/// Concurrent inserts racing for the same node_order are retried this many
/// times before the conflict is surfaced.
const ORDER_CONFLICT_RETRIES: u32 = 3;

#[derive(Debug, Clone, FromRow)]
struct ProjectRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    status: bool,
    owner_id: Uuid,
    created_at: chrono::NaiveDateTime,
    updated_at: chrono::NaiveDateTime,
}

#[derive(Debug, Clone, FromRow)]
struct ProjectSummaryRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    status: bool,
    owner_id: Uuid,
    created_at: chrono::NaiveDateTime,
    updated_at: chrono::NaiveDateTime,
    node_count: i64,
    edge_count: i64,
}

#[derive(Debug, Clone, FromRow)]
struct NodeRow {
    id: Uuid,
    kind: String,
    position: Json<Position>,
    data: Option<serde_json::Value>,
    node_order: i32,
    project_id: Uuid,
    created_at: chrono::NaiveDateTime,
    updated_at: chrono::NaiveDateTime,
}

#[derive(Debug, Clone, FromRow)]
struct EdgeRow {
    id: Uuid,
    kind: String,
    source: Uuid,
    target: Uuid,
    project_id: Uuid,
    created_at: chrono::NaiveDateTime,
    updated_at: chrono::NaiveDateTime,
}

#[derive(Debug, Clone, FromRow)]
struct MediaRow {
    id: Uuid,
    owner_id: Uuid,
    title: String,
    description: Option<String>,
    size: i64,
    kind: String,
    ext: String,
    url: String,
    blob_id: Option<String>,
    status: String,
    project_id: Option<Uuid>,
    created_at: chrono::NaiveDateTime,
    updated_at: chrono::NaiveDateTime,
}

impl From<ProjectRow> for Project {
    fn from(value: ProjectRow) -> Self {
        Self {
            id: ProjectId(value.id),
            title: value.title,
            description: value.description,
            status: value.status,
            owner_id: UserId(value.owner_id),
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

impl From<ProjectSummaryRow> for ProjectSummary {
    fn from(value: ProjectSummaryRow) -> Self {
        Self {
            id: ProjectId(value.id),
            title: value.title,
            description: value.description,
            status: value.status,
            owner_id: UserId(value.owner_id),
            created_at: value.created_at,
            updated_at: value.updated_at,
            node_count: value.node_count,
            edge_count: value.edge_count,
        }
    }
}

impl From<NodeRow> for FlowNode {
    fn from(value: NodeRow) -> Self {
        Self {
            id: NodeId(value.id),
            kind: value.kind,
            position: value.position.0,
            data: value.data,
            node_order: value.node_order,
            project_id: ProjectId(value.project_id),
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

impl From<EdgeRow> for FlowEdge {
    fn from(value: EdgeRow) -> Self {
        Self {
            id: EdgeId(value.id),
            kind: value.kind,
            source: NodeId(value.source),
            target: NodeId(value.target),
            project_id: ProjectId(value.project_id),
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

fn hydrate_project(row: ProjectRow, nodes: Vec<NodeRow>, edges: Vec<EdgeRow>) -> ProjectGraph {
    ProjectGraph {
        id: ProjectId(row.id),
        title: row.title,
        description: row.description,
        status: row.status,
        owner_id: UserId(row.owner_id),
        created_at: row.created_at,
        updated_at: row.updated_at,
        nodes: nodes.into_iter().map(FlowNode::from).collect(),
        edges: edges.into_iter().map(FlowEdge::from).collect(),
    }
}

fn media_record(row: MediaRow) -> Result<MediaRecord> {
    let kind = MediaKind::from_db_value(&row.kind).ok_or_else(|| {
        LibError::database(
            "Failed to read media record",
            anyhow!("unknown media kind {:?} on record {}", row.kind, row.id),
        )
    })?;

    Ok(MediaRecord {
        id: MediaId(row.id),
        owner_id: UserId(row.owner_id),
        title: row.title,
        description: row.description,
        size: row.size,
        kind,
        ext: row.ext,
        url: row.url,
        blob_id: row.blob_id,
        status: row.status,
        project_id: row.project_id.map(ProjectId),
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn db_err(public: &'static str, err: sqlx::Error) -> LibError {
    LibError::database(public, anyhow!(err))
}

/// True when an insert lost the race for a node_order slot.
fn is_order_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => order_slot_taken(db.code().as_deref(), db.constraint()),
        _ => false,
    }
}

fn order_slot_taken(code: Option<&str>, constraint: Option<&str>) -> bool {
    code == Some(PG_UNIQUE_VIOLATION) && constraint == Some(NODE_ORDER_CONSTRAINT)
}

async fn project_exists(pool: &PgPool, project_id: ProjectId) -> Result<bool> {
    let exists: (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS(
            SELECT 1
            FROM flow.projects
            WHERE id = $1
        )
        "#,
    )
    .bind(project_id.0)
    .fetch_one(pool)
    .await
    .map_err(|err| db_err("Failed to query project", err))?;

    Ok(exists.0)
}

async fn node_exists(pool: &PgPool, node_id: NodeId) -> Result<bool> {
    let exists: (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS(
            SELECT 1
            FROM flow.nodes
            WHERE id = $1
        )
        "#,
    )
    .bind(node_id.0)
    .fetch_one(pool)
    .await
    .map_err(|err| db_err("Failed to query node", err))?;

    Ok(exists.0)
}

async fn load_accessible_project(
    pool: &PgPool,
    actor: UserId,
    project_id: ProjectId,
) -> Result<ProjectRow> {
    let row = sqlx::query_as::<_, ProjectRow>(
        r#"
        SELECT
            p.id,
            p.title,
            p.description,
            p.status,
            p.owner_id,
            p.created_at,
            p.updated_at
        FROM flow.projects p
        WHERE p.id = $1
          AND p.owner_id = $2
        LIMIT 1
        "#,
    )
    .bind(project_id.0)
    .bind(actor.0)
    .fetch_optional(pool)
    .await
    .map_err(|err| db_err("Failed to query project", err))?;

    if let Some(row) = row {
        Ok(row)
    } else if project_exists(pool, project_id).await? {
        Err(LibError::forbidden(
            "You do not have access to this project",
            anyhow!("project {} access denied for user {}", project_id, actor),
        ))
    } else {
        Err(LibError::not_found(
            "Project not found",
            anyhow!("project {} not found", project_id),
        ))
    }
}

async fn load_accessible_node(pool: &PgPool, actor: UserId, node_id: NodeId) -> Result<NodeRow> {
    let row = sqlx::query_as::<_, NodeRow>(
        r#"
        SELECT
            n.id,
            n.kind,
            n.position,
            n.data,
            n.node_order,
            n.project_id,
            n.created_at,
            n.updated_at
        FROM flow.nodes n
        JOIN flow.projects p
        ON p.id = n.project_id
        WHERE n.id = $1
          AND p.owner_id = $2
        LIMIT 1
        "#,
    )
    .bind(node_id.0)
    .bind(actor.0)
    .fetch_optional(pool)
    .await
    .map_err(|err| db_err("Failed to query node", err))?;

    if let Some(row) = row {
        Ok(row)
    } else if node_exists(pool, node_id).await? {
        Err(LibError::forbidden(
            "You do not have access to this node",
            anyhow!("node {} access denied for user {}", node_id, actor),
        ))
    } else {
        Err(LibError::not_found(
            "Node not found",
            anyhow!("node {} not found", node_id),
        ))
    }
}

pub async fn create_project(
    pool: &PgPool,
    actor: UserId,
    payload: CreateProjectPayload,
) -> Result<ProjectGraph> {
    let definition = payload.normalize()?;
    let project_id = ProjectId(Uuid::new_v4());
    let start_id = NodeId(Uuid::new_v4());
    let end_id = NodeId(Uuid::new_v4());

    let mut tx = pool
        .begin()
        .await
        .map_err(|err| db_err("Failed to start transaction", err))?;

    sqlx::query(
        r#"
        INSERT INTO flow.projects (id, title, description, status, owner_id)
        VALUES ($1, $2, $3, TRUE, $4)
        "#,
    )
    .bind(project_id.0)
    .bind(&definition.title)
    .bind(&definition.description)
    .bind(actor.0)
    .execute(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to create project", err))?;

    sqlx::query(
        r#"
        INSERT INTO flow.nodes (id, project_id, kind, position, data, node_order)
        VALUES ($1, $2, $3, $4, NULL, 1)
        "#,
    )
    .bind(start_id.0)
    .bind(project_id.0)
    .bind(START_NODE_KIND)
    .bind(Json(START_NODE_POSITION))
    .execute(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to seed project nodes", err))?;

    sqlx::query(
        r#"
        INSERT INTO flow.nodes (id, project_id, kind, position, data, node_order)
        VALUES ($1, $2, $3, $4, NULL, 2)
        "#,
    )
    .bind(end_id.0)
    .bind(project_id.0)
    .bind(END_NODE_KIND)
    .bind(Json(END_NODE_POSITION))
    .execute(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to seed project nodes", err))?;

    sqlx::query(
        r#"
        INSERT INTO flow.edges (id, project_id, kind, source, target)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(project_id.0)
    .bind(DEFAULT_EDGE_KIND)
    .bind(start_id.0)
    .bind(end_id.0)
    .execute(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to seed project edges", err))?;

    tx.commit()
        .await
        .map_err(|err| db_err("Failed to commit transaction", err))?;

    get_project(pool, actor, project_id).await
}

pub async fn get_project(
    pool: &PgPool,
    actor: UserId,
    project_id: ProjectId,
) -> Result<ProjectGraph> {
    let project = load_accessible_project(pool, actor, project_id).await?;
    let nodes = sqlx::query_as::<_, NodeRow>(
        r#"
        SELECT id, kind, position, data, node_order, project_id, created_at, updated_at
        FROM flow.nodes
        WHERE project_id = $1
        ORDER BY node_order ASC, id ASC
        "#,
    )
    .bind(project_id.0)
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to query project nodes", err))?;

    let edges = sqlx::query_as::<_, EdgeRow>(
        r#"
        SELECT id, kind, source, target, project_id, created_at, updated_at
        FROM flow.edges
        WHERE project_id = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(project_id.0)
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to query project edges", err))?;

    Ok(hydrate_project(project, nodes, edges))
}

pub async fn list_projects(
    pool: &PgPool,
    actor: UserId,
    page: u32,
    limit: u32,
) -> Result<Vec<ProjectSummary>> {
    let offset = (page.saturating_sub(1) as i64).saturating_mul(limit as i64);

    let rows = sqlx::query_as::<_, ProjectSummaryRow>(
        r#"
        SELECT
            p.id,
            p.title,
            p.description,
            p.status,
            p.owner_id,
            p.created_at,
            p.updated_at,
            COALESCE(n.node_count, 0) AS node_count,
            COALESCE(e.edge_count, 0) AS edge_count
        FROM flow.projects p
        LEFT JOIN (
            SELECT project_id, COUNT(*)::bigint AS node_count
            FROM flow.nodes
            GROUP BY project_id
        ) n
        ON n.project_id = p.id
        LEFT JOIN (
            SELECT project_id, COUNT(*)::bigint AS edge_count
            FROM flow.edges
            GROUP BY project_id
        ) e
        ON e.project_id = p.id
        WHERE p.owner_id = $1
        ORDER BY p.updated_at DESC, p.id DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(actor.0)
    .bind(limit as i64)
    .bind(offset)
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to list projects", err))?;

    Ok(rows.into_iter().map(ProjectSummary::from).collect())
}

pub async fn update_project(
    pool: &PgPool,
    actor: UserId,
    project_id: ProjectId,
    payload: UpdateProjectPayload,
) -> Result<Project> {
    let changes = payload.normalize()?;
    let _project = load_accessible_project(pool, actor, project_id).await?;

    let row = sqlx::query_as::<_, ProjectRow>(
        r#"
        UPDATE flow.projects
        SET title = COALESCE($1, title),
            description = COALESCE($2, description),
            status = COALESCE($3, status),
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $4
        RETURNING id, title, description, status, owner_id, created_at, updated_at
        "#,
    )
    .bind(changes.title)
    .bind(changes.description)
    .bind(changes.status)
    .bind(project_id.0)
    .fetch_one(pool)
    .await
    .map_err(|err| db_err("Failed to update project", err))?;

    Ok(Project::from(row))
}

/// Nodes, edges and project-scoped media rows go with the project through
/// `ON DELETE CASCADE`. Returns whether a row was actually removed.
pub async fn delete_project(pool: &PgPool, actor: UserId, project_id: ProjectId) -> Result<bool> {
    let _project = load_accessible_project(pool, actor, project_id).await?;

    let result = sqlx::query(
        r#"
        DELETE FROM flow.projects
        WHERE id = $1
        "#,
    )
    .bind(project_id.0)
    .execute(pool)
    .await
    .map_err(|err| db_err("Failed to delete project", err))?;

    Ok(result.rows_affected() > 0)
}

async fn insert_node_once(
    pool: &PgPool,
    definition: &NodeDefinition,
) -> std::result::Result<(NodeRow, Option<EdgeRow>), sqlx::Error> {
    let mut tx = pool.begin().await?;

    let next_order: (i32,) = sqlx::query_as(
        r#"
        SELECT COALESCE(MAX(node_order), 0) + 1
        FROM flow.nodes
        WHERE project_id = $1
        "#,
    )
    .bind(definition.project_id.0)
    .fetch_one(&mut *tx)
    .await?;

    let node_id = NodeId(Uuid::new_v4());
    let node_row = sqlx::query_as::<_, NodeRow>(
        r#"
        INSERT INTO flow.nodes (id, project_id, kind, position, data, node_order)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, kind, position, data, node_order, project_id, created_at, updated_at
        "#,
    )
    .bind(node_id.0)
    .bind(definition.project_id.0)
    .bind(&definition.kind)
    .bind(Json(definition.position))
    .bind(&definition.data)
    .bind(next_order.0)
    .fetch_one(&mut *tx)
    .await?;

    // The source node is not checked for existence; the canvas is allowed to
    // wire a node to an id it has not persisted yet.
    let edge_row = match definition.source_node_id {
        Some(source) => Some(
            sqlx::query_as::<_, EdgeRow>(
                r#"
                INSERT INTO flow.edges (id, project_id, kind, source, target)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, kind, source, target, project_id, created_at, updated_at
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(definition.project_id.0)
            .bind(&definition.edge_kind)
            .bind(source.0)
            .bind(node_id.0)
            .fetch_one(&mut *tx)
            .await?,
        ),
        None => None,
    };

    tx.commit().await?;
    Ok((node_row, edge_row))
}

pub async fn create_node(
    pool: &PgPool,
    actor: UserId,
    payload: CreateNodePayload,
) -> Result<CreatedNode> {
    let definition = payload.normalize();
    let _project = load_accessible_project(pool, actor, definition.project_id).await?;

    let mut attempt = 0u32;
    loop {
        match insert_node_once(pool, &definition).await {
            Ok((node_row, edge_row)) => {
                return Ok(CreatedNode {
                    node: FlowNode::from(node_row),
                    edge: edge_row.map(FlowEdge::from),
                });
            }
            Err(err) if is_order_conflict(&err) && attempt < ORDER_CONFLICT_RETRIES => {
                attempt += 1;
                tracing::debug!(
                    project_id = %definition.project_id,
                    attempt,
                    "node order slot taken, retrying insert"
                );
            }
            Err(err) if is_order_conflict(&err) => {
                return Err(db_err("Failed to place node in sequence", err));
            }
            Err(err) => return Err(db_err("Failed to create node", err)),
        }
    }
}

pub async fn get_node(pool: &PgPool, actor: UserId, node_id: NodeId) -> Result<FlowNode> {
    let row = load_accessible_node(pool, actor, node_id).await?;
    Ok(FlowNode::from(row))
}

pub async fn update_node(
    pool: &PgPool,
    actor: UserId,
    node_id: NodeId,
    payload: UpdateNodePayload,
) -> Result<FlowNode> {
    let changes = payload.normalize()?;
    let _node = load_accessible_node(pool, actor, node_id).await?;

    let NodeChanges {
        kind,
        position,
        data,
    } = changes;

    let row = sqlx::query_as::<_, NodeRow>(
        r#"
        UPDATE flow.nodes
        SET kind = COALESCE($1, kind),
            position = COALESCE($2, position),
            data = COALESCE($3, data),
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $4
        RETURNING id, kind, position, data, node_order, project_id, created_at, updated_at
        "#,
    )
    .bind(kind)
    .bind(position.map(Json))
    .bind(data)
    .bind(node_id.0)
    .fetch_one(pool)
    .await
    .map_err(|err| db_err("Failed to update node", err))?;

    Ok(FlowNode::from(row))
}

pub async fn delete_node(pool: &PgPool, actor: UserId, node_id: NodeId) -> Result<()> {
    let _node = load_accessible_node(pool, actor, node_id).await?;

    let mut tx = pool
        .begin()
        .await
        .map_err(|err| db_err("Failed to start transaction", err))?;

    sqlx::query(
        r#"
        DELETE FROM flow.edges
        WHERE source = $1
           OR target = $1
        "#,
    )
    .bind(node_id.0)
    .execute(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to delete node edges", err))?;

    sqlx::query(
        r#"
        DELETE FROM flow.nodes
        WHERE id = $1
        "#,
    )
    .bind(node_id.0)
    .execute(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to delete node", err))?;

    tx.commit()
        .await
        .map_err(|err| db_err("Failed to commit transaction", err))?;

    Ok(())
}

pub async fn reset_node_position(
    pool: &PgPool,
    actor: UserId,
    node_id: NodeId,
) -> Result<FlowNode> {
    let _node = load_accessible_node(pool, actor, node_id).await?;

    let row = sqlx::query_as::<_, NodeRow>(
        r#"
        UPDATE flow.nodes
        SET position = $1,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $2
        RETURNING id, kind, position, data, node_order, project_id, created_at, updated_at
        "#,
    )
    .bind(Json(Position::default()))
    .bind(node_id.0)
    .fetch_one(pool)
    .await
    .map_err(|err| db_err("Failed to reset node position", err))?;

    Ok(FlowNode::from(row))
}

/// Column values for a freshly uploaded media record.
#[derive(Debug, Clone)]
pub(crate) struct NewMediaRecord {
    pub title: String,
    pub description: Option<String>,
    pub size: i64,
    pub kind: MediaKind,
    pub ext: String,
    pub url: String,
    pub blob_id: Option<String>,
    pub project_id: Option<ProjectId>,
}

/// Column values swapped in when a media asset is replaced.
#[derive(Debug, Clone)]
pub(crate) struct AssetSwap {
    pub size: i64,
    pub ext: String,
    pub url: String,
    pub blob_id: String,
}

pub(crate) async fn insert_media(
    pool: &PgPool,
    actor: UserId,
    record: NewMediaRecord,
) -> Result<MediaRecord> {
    let row = sqlx::query_as::<_, MediaRow>(
        r#"
        INSERT INTO flow.media (
            id,
            owner_id,
            title,
            description,
            size,
            kind,
            ext,
            url,
            blob_id,
            status,
            project_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING
            id, owner_id, title, description, size, kind, ext, url, blob_id,
            status, project_id, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(actor.0)
    .bind(&record.title)
    .bind(&record.description)
    .bind(record.size)
    .bind(record.kind.as_db_value())
    .bind(&record.ext)
    .bind(&record.url)
    .bind(&record.blob_id)
    .bind(MEDIA_STATUS_ACTIVE)
    .bind(record.project_id.map(|id| id.0))
    .fetch_one(pool)
    .await
    .map_err(|err| db_err("Failed to store media record", err))?;

    media_record(row)
}

pub(crate) async fn load_accessible_media(
    pool: &PgPool,
    actor: UserId,
    media_id: MediaId,
) -> Result<MediaRecord> {
    let row = sqlx::query_as::<_, MediaRow>(
        r#"
        SELECT
            id, owner_id, title, description, size, kind, ext, url, blob_id,
            status, project_id, created_at, updated_at
        FROM flow.media
        WHERE id = $1
          AND owner_id = $2
        LIMIT 1
        "#,
    )
    .bind(media_id.0)
    .bind(actor.0)
    .fetch_optional(pool)
    .await
    .map_err(|err| db_err("Failed to query media record", err))?;

    match row {
        Some(row) => media_record(row),
        None => Err(LibError::not_found(
            "Media not found",
            anyhow!("media {} not found for user {}", media_id, actor),
        )),
    }
}

pub async fn get_media(pool: &PgPool, actor: UserId, media_id: MediaId) -> Result<MediaRecord> {
    load_accessible_media(pool, actor, media_id).await
}

pub async fn list_media(
    pool: &PgPool,
    actor: UserId,
    query: &ListMediaQuery,
) -> Result<Vec<MediaRecord>> {
    let (page, limit) = query.pagination();
    let offset = (page.saturating_sub(1) as i64).saturating_mul(limit as i64);

    let rows = sqlx::query_as::<_, MediaRow>(
        r#"
        SELECT
            id, owner_id, title, description, size, kind, ext, url, blob_id,
            status, project_id, created_at, updated_at
        FROM flow.media
        WHERE owner_id = $1
          AND ($2::text IS NULL OR kind = $2)
          AND ($3::uuid IS NULL OR project_id = $3)
        ORDER BY created_at DESC, id DESC
        LIMIT $4 OFFSET $5
        "#,
    )
    .bind(actor.0)
    .bind(query.kind.map(MediaKind::as_db_value))
    .bind(query.project_id.map(|id| id.0))
    .bind(limit as i64)
    .bind(offset)
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to list media", err))?;

    rows.into_iter().map(media_record).collect()
}

pub async fn update_media_metadata(
    pool: &PgPool,
    actor: UserId,
    media_id: MediaId,
    payload: UpdateMediaPayload,
) -> Result<MediaRecord> {
    let changes = payload.normalize()?;
    let _media = load_accessible_media(pool, actor, media_id).await?;

    let MediaChanges {
        title,
        description,
        kind,
    } = changes;

    let row = sqlx::query_as::<_, MediaRow>(
        r#"
        UPDATE flow.media
        SET title = COALESCE($1, title),
            description = COALESCE($2, description),
            kind = COALESCE($3, kind),
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $4
        RETURNING
            id, owner_id, title, description, size, kind, ext, url, blob_id,
            status, project_id, created_at, updated_at
        "#,
    )
    .bind(title)
    .bind(description)
    .bind(kind.map(MediaKind::as_db_value))
    .bind(media_id.0)
    .fetch_one(pool)
    .await
    .map_err(|err| db_err("Failed to update media record", err))?;

    media_record(row)
}

pub(crate) async fn swap_media_asset(
    pool: &PgPool,
    media_id: MediaId,
    swap: AssetSwap,
) -> Result<MediaRecord> {
    let row = sqlx::query_as::<_, MediaRow>(
        r#"
        UPDATE flow.media
        SET size = $1,
            ext = $2,
            url = $3,
            blob_id = $4,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $5
        RETURNING
            id, owner_id, title, description, size, kind, ext, url, blob_id,
            status, project_id, created_at, updated_at
        "#,
    )
    .bind(swap.size)
    .bind(&swap.ext)
    .bind(&swap.url)
    .bind(&swap.blob_id)
    .bind(media_id.0)
    .fetch_one(pool)
    .await
    .map_err(|err| db_err("Failed to update media record", err))?;

    media_record(row)
}

pub(crate) async fn delete_media_row(pool: &PgPool, media_id: MediaId) -> Result<bool> {
    let result = sqlx::query(
        r#"
        DELETE FROM flow.media
        WHERE id = $1
        "#,
    )
    .bind(media_id.0)
    .execute(pool)
    .await
    .map_err(|err| db_err("Failed to delete media record", err))?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::{
        END_NODE_POSITION, NODE_ORDER_CONSTRAINT, PG_UNIQUE_VIOLATION, START_NODE_POSITION,
        is_order_conflict, order_slot_taken,
    };
    use crate::models::Position;

    #[test]
    fn seed_nodes_sit_at_the_canvas_defaults() {
        assert_eq!(START_NODE_POSITION, Position::new(0.0, 40.0));
        assert_eq!(END_NODE_POSITION, Position::new(800.0, 40.0));
    }

    #[test]
    fn order_conflicts_match_constraint_and_sqlstate() {
        assert!(order_slot_taken(
            Some(PG_UNIQUE_VIOLATION),
            Some(NODE_ORDER_CONSTRAINT)
        ));
    }

    #[test]
    fn non_database_errors_never_count_as_order_conflicts() {
        assert!(!is_order_conflict(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn other_unique_violations_are_not_order_conflicts() {
        assert!(!order_slot_taken(Some(PG_UNIQUE_VIOLATION), None));
        assert!(!order_slot_taken(
            Some(PG_UNIQUE_VIOLATION),
            Some("projects_pkey")
        ));
        assert!(!order_slot_taken(
            Some("23503"),
            Some(NODE_ORDER_CONSTRAINT)
        ));
        assert!(!order_slot_taken(None, Some(NODE_ORDER_CONSTRAINT)));
    }
}
