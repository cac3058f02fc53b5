use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{Next, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use storyflow::api::{AuthenticatedUser, FlowApp, HasBlobStore, HasPool};
use storyflow::blobstore::{BlobStore, MemoryBlobStore};
use storyflow::cloudinary::CloudinaryStore;
use storyflow::models::UserId;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

#[derive(Clone)]
struct DevAuthConfig {
    default_user_id: Uuid,
    require_dev_header: bool,
}

#[derive(Clone)]
struct ExampleApp {
    pool: Arc<PgPool>,
    store: Arc<dyn BlobStore>,
    auth: DevAuthConfig,
}

impl HasPool for ExampleApp {
    fn pool(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }
}

impl HasBlobStore for ExampleApp {
    fn blob_store(&self) -> Arc<dyn BlobStore> {
        Arc::clone(&self.store)
    }
}

impl FlowApp for ExampleApp {}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,storyflow=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url = env::var("DATABASE_URL")
        .context("DATABASE_URL is required to run demos/flow_api_server.rs")?;
    let bind = env::var("FLOW_EXAMPLE_BIND").unwrap_or_else(|_| "127.0.0.1:4020".to_string());
    let bind_addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid FLOW_EXAMPLE_BIND '{}'", bind))?;

    let default_user_id = env::var("FLOW_EXAMPLE_DEFAULT_USER_ID")
        .unwrap_or_else(|_| "00000000-0000-0000-0000-000000000001".to_string());
    let default_user_id = Uuid::parse_str(&default_user_id)
        .with_context(|| format!("invalid FLOW_EXAMPLE_DEFAULT_USER_ID '{}'", default_user_id))?;
    let auth = DevAuthConfig {
        default_user_id,
        require_dev_header: env_flag("FLOW_EXAMPLE_REQUIRE_DEV_HEADER"),
    };

    let store = build_blob_store()?;

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await
        .context("failed to connect to postgres")?;

    storyflow::db::create_flow_tables(&pool)
        .await
        .context("failed to run flow migrations")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to postgres")?;

    let app_state = ExampleApp {
        pool: Arc::new(pool),
        store,
        auth,
    };

    let api_v1 = Router::new()
        .route("/healthz", get(health_handler))
        .route("/example/whoami", get(whoami_handler))
        .merge(storyflow::api::routes::<ExampleApp>());

    let app = Router::new()
        .nest("/api/v1", api_v1)
        .layer(from_fn_with_state(
            app_state.clone(),
            dev_identity_middleware,
        ))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", bind_addr))?;

    println!("storyflow demo server listening on http://{}", bind_addr);
    println!("api base path: /api/v1");
    println!("auth shim header: x-dev-user-id");
    println!("set FLOW_EXAMPLE_REQUIRE_DEV_HEADER=true to require x-dev-user-id");

    axum::serve(listener, app)
        .await
        .context("demo server failed")
}

fn build_blob_store() -> anyhow::Result<Arc<dyn BlobStore>> {
    if env::var("CLOUDINARY_CLOUD_NAME").is_ok() {
        let store = CloudinaryStore::from_env().context("invalid Cloudinary configuration")?;
        println!("media assets go to Cloudinary");
        return Ok(Arc::new(store));
    }

    println!("CLOUDINARY_CLOUD_NAME is not set, media assets stay in memory");
    Ok(Arc::new(MemoryBlobStore::new()))
}

fn env_flag(name: &str) -> bool {
    match env::var(name) {
        Ok(value) => {
            let normalized = value.trim().to_ascii_lowercase();
            normalized == "1" || normalized == "true" || normalized == "yes"
        }
        Err(_) => false,
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "ok": true
    }))
}

async fn whoami_handler(auth_user: AuthenticatedUser) -> Json<serde_json::Value> {
    Json(json!({
        "userId": auth_user.id().to_string(),
    }))
}

async fn dev_identity_middleware(
    State(app): State<ExampleApp>,
    mut req: Request,
    next: Next,
) -> Response {
    let user_id = match parse_user_id(req.headers(), &app.auth) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };

    req.extensions_mut().insert(user_id);
    next.run(req).await
}

fn parse_user_id(headers: &HeaderMap, auth: &DevAuthConfig) -> Result<UserId, Response> {
    let Some(raw_user_id) = header_value(headers, "x-dev-user-id") else {
        if auth.require_dev_header {
            return Err(json_error(
                StatusCode::UNAUTHORIZED,
                "missing_dev_user_id",
                "x-dev-user-id header is required",
            ));
        }
        return Ok(UserId(auth.default_user_id));
    };

    Uuid::parse_str(raw_user_id).map(UserId).map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "invalid_dev_user_id",
            "invalid UUID",
        )
    })
}

fn header_value<'a>(headers: &'a HeaderMap, key: &str) -> Option<&'a str> {
    headers.get(key).and_then(|value| value.to_str().ok())
}

fn json_error(status: StatusCode, code: &'static str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        })),
    )
        .into_response()
}
