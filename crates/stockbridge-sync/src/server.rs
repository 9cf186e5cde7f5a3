//! # Sync Server
//!
//! HTTP endpoints served by an instance.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncServer (Axum)                                │
//! │                                                                         │
//! │  POST /sync/receive      SyncToken   apply a pushed batch              │
//! │  POST /sync/push         SyncToken   alias of /sync/receive            │
//! │  GET  /sync/master-data  SyncToken   catalog export (?since=)          │
//! │  GET  /sync/status       none        pending counters, checkpoints     │
//! │  POST /sync/trigger      Bearer      push then pull, synchronously     │
//! │  GET  /health            none        liveness, database reachable      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Authentication runs before the body is looked at, so a rejected request
//! never reaches the database.

use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::agent::{SyncAgent, SyncStatus};
use crate::auth::{verify_admin_token, verify_sync_token};
use crate::error::{SyncError, SyncResult};
use crate::protocol::{CycleReport, MasterDataQuery, MasterDataResponse, PushPayload, ReceiveResponse};
use crate::reconcile::export_master_data;

/// Builds the router for one instance.
pub fn router(agent: SyncAgent) -> Router {
    Router::new()
        .route("/sync/receive", post(receive_handler))
        .route("/sync/push", post(receive_handler))
        .route("/sync/master-data", get(master_data_handler))
        .route("/sync/status", get(status_handler))
        .route("/sync/trigger", post(trigger_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(agent)
}

// =============================================================================
// Server
// =============================================================================

pub struct SyncServer {
    agent: SyncAgent,
}

/// Handle for a running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and waits for in-flight requests.
    pub async fn shutdown(self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::Internal("server already stopped".into()))?;
        self.task
            .await
            .map_err(|e| SyncError::Internal(format!("Server task failed: {}", e)))
    }
}

impl SyncServer {
    pub fn new(agent: SyncAgent) -> Self {
        SyncServer { agent }
    }

    /// Binds `server.bind_addr:server.port` and serves in the background.
    pub async fn start(self) -> SyncResult<ServerHandle> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let bind_addr = self.agent.config().server.bind_address();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| SyncError::ConnectionFailed(format!("Failed to bind to {}: {}", bind_addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SyncError::ConnectionFailed(format!("Listener has no address: {}", e)))?;

        if self.agent.config().shared_secret().is_none() {
            warn!("No shared secret configured, every sync request will be rejected");
        }

        let app = router(self.agent);
        info!(addr = %local_addr, "Sync server started");

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await;
                    info!("Sync server shutting down");
                })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "Sync server stopped with an error");
            }
        });

        Ok(ServerHandle {
            local_addr,
            shutdown_tx,
            task,
        })
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_handler(State(agent): State<SyncAgent>) -> impl IntoResponse {
    if agent.database().health_check().await {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "DATABASE UNAVAILABLE")
    }
}

async fn receive_handler(
    State(agent): State<SyncAgent>,
    headers: HeaderMap,
    body: Result<Json<PushPayload>, JsonRejection>,
) -> SyncResult<Json<ReceiveResponse>> {
    verify_sync_token(&headers, agent.config().shared_secret())?;
    let Json(payload) = body.map_err(|e| SyncError::InvalidPayload(e.body_text()))?;

    info!(
        sales = payload.sales.len(),
        returns = payload.returns.len(),
        stock_updates = payload.stock_updates.len(),
        sync_timestamp = %payload.sync_timestamp,
        "Receiving batch"
    );
    let response = agent.receiver().receive(&payload).await?;
    Ok(Json(response))
}

async fn master_data_handler(
    State(agent): State<SyncAgent>,
    headers: HeaderMap,
    Query(query): Query<MasterDataQuery>,
) -> SyncResult<Json<MasterDataResponse>> {
    verify_sync_token(&headers, agent.config().shared_secret())?;
    let export = export_master_data(agent.database(), query.since()).await?;
    Ok(Json(export))
}

async fn status_handler(State(agent): State<SyncAgent>) -> SyncResult<Json<SyncStatus>> {
    Ok(Json(agent.status().await?))
}

async fn trigger_handler(
    State(agent): State<SyncAgent>,
    headers: HeaderMap,
) -> SyncResult<Json<CycleReport>> {
    verify_admin_token(&headers, agent.config().admin_token())?;
    info!("Manual sync triggered");
    Ok(Json(agent.full_sync().await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use stockbridge_core::{MovementMeta, MovementType, NewProduct, PaymentMethod};
    use stockbridge_db::{Database, DbConfig, SaleLine};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::checkpoint::Direction;
    use crate::config::{InstanceRole, SyncConfig};

    const SECRET: &str = "s3cret";

    async fn cloud_agent(dir: &TempDir) -> SyncAgent {
        let mut config = SyncConfig::default();
        config.instance.role = InstanceRole::Cloud;
        config.instance.name = "cloud".into();
        config.remote.shared_secret = Some(SECRET.into());
        config.server.bind_addr = "127.0.0.1".into();
        config.server.port = 0;
        config.server.admin_token = Some("adm1n".into());
        config.storage.checkpoint_dir = dir.path().join("cloud");

        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        SyncAgent::new(config, db).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn push_request(auth: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/sync/receive")
            .header("content-type", "application/json");
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    const ONE_SALE: &str = r#"{
        "sales": [{
            "local_id": "s-1",
            "created_at": "2026-03-14T09:00:00.123456Z",
            "subtotal_cents": 500, "tax_cents": 100, "total_cents": 600,
            "items": [{
                "product_barcode": "A", "product_name": "Milk", "quantity": 1,
                "unit_price_cents": 500, "line_total_cents": 500, "tax_rate_bps": 2000
            }]
        }],
        "sync_timestamp": "2026-03-14T09:05:00Z"
    }"#;

    #[tokio::test]
    async fn test_receive_requires_sync_token() {
        let dir = TempDir::new().unwrap();
        let agent = cloud_agent(&dir).await;

        for auth in [None, Some("SyncToken wrong"), Some("Bearer s3cret")] {
            let response = router(agent.clone())
                .oneshot(push_request(auth, ONE_SALE))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert!(body_json(response).await["error"].is_string());
        }
        assert_eq!(agent.database().sales().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_receive_accepts_valid_batch() {
        let dir = TempDir::new().unwrap();
        let agent = cloud_agent(&dir).await;

        let response = router(agent.clone())
            .oneshot(push_request(Some("SyncToken s3cret"), ONE_SALE))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["sales_created"], 1);
        assert_eq!(body["stock_updates_received"], 0);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let agent = cloud_agent(&dir).await;

        let response = router(agent.clone())
            .oneshot(push_request(Some("SyncToken s3cret"), r#"{"sales": 3}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let invalid = ONE_SALE.replace(r#""quantity": 1"#, r#""quantity": 0"#);
        let response = router(agent.clone())
            .oneshot(push_request(Some("SyncToken s3cret"), &invalid))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(agent.database().sales().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_status_and_health_need_no_auth() {
        let dir = TempDir::new().unwrap();
        let agent = cloud_agent(&dir).await;

        let response = router(agent.clone())
            .oneshot(Request::get("/sync/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["is_local_server"], false);
        assert_eq!(body["pending_sales"], 0);

        let response = router(agent)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_reports_closed_database() {
        let dir = TempDir::new().unwrap();
        let agent = cloud_agent(&dir).await;
        agent.database().close().await;

        let response = router(agent)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_trigger_is_admin_only() {
        let dir = TempDir::new().unwrap();
        let agent = cloud_agent(&dir).await;

        let request = Request::post("/sync/trigger")
            .header("authorization", "SyncToken s3cret")
            .body(Body::empty())
            .unwrap();
        let response = router(agent.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let request = Request::post("/sync/trigger")
            .header("authorization", "Bearer adm1n")
            .body(Body::empty())
            .unwrap();
        let response = router(agent).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        // A cloud instance has nothing to push or pull
        assert_eq!(body["push"]["success"], false);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_master_data_ignores_bad_since() {
        let dir = TempDir::new().unwrap();
        let agent = cloud_agent(&dir).await;
        agent
            .database()
            .products()
            .insert(&NewProduct::new("B", "Bread", 300))
            .await
            .unwrap();

        let request = Request::get("/sync/master-data?since=not-a-date")
            .header("authorization", "SyncToken s3cret")
            .body(Body::empty())
            .unwrap();
        let response = router(agent).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["products"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_full_cycle_between_two_instances() {
        let dir = TempDir::new().unwrap();
        let cloud = cloud_agent(&dir).await;
        let mut bread = NewProduct::new("B", "Bread", 300);
        bread.category = Some("Bakery".into());
        cloud.database().products().insert(&bread).await.unwrap();

        let handle = SyncServer::new(cloud.clone()).start().await.unwrap();

        let mut config = SyncConfig::default();
        config.instance.name = "downtown".into();
        config.remote.url = Some(format!("http://{}", handle.local_addr()));
        config.remote.shared_secret = Some(SECRET.into());
        config.storage.checkpoint_dir = dir.path().join("local");

        let local_db = Database::new(DbConfig::in_memory()).await.unwrap();
        local_db.products().insert(&NewProduct::new("A", "Milk", 500)).await.unwrap();
        local_db
            .ledger()
            .record_movement("A", MovementType::In, 10, MovementMeta::default())
            .await
            .unwrap();
        local_db
            .sales()
            .create_sale(None, PaymentMethod::Cash, &[SaleLine::new("A", 3)])
            .await
            .unwrap();

        let local = SyncAgent::new(config, local_db.clone()).unwrap();

        let report = local.full_sync().await;
        assert!(report.push.success, "{:?}", report.push.error);
        assert!(report.pull.success, "{:?}", report.pull.error);
        assert_eq!(report.push.records, 1);

        assert_eq!(cloud.database().sales().count().await.unwrap(), 1);
        assert_eq!(local_db.sales().count_unsynced().await.unwrap(), 0);

        let bread = local_db.products().get_by_barcode("B").await.unwrap().unwrap();
        assert_eq!(bread.stock, 0);
        assert_eq!(bread.category.as_deref(), Some("Bakery"));
        assert_eq!(local_db.products().get_by_barcode("A").await.unwrap().unwrap().stock, 7);

        let status = local.status().await.unwrap();
        assert!(status.cloud_configured);
        assert!(status.last_sync.is_some());
        assert!(status.last_pull.is_some());
        assert!(status.last_error.is_none());
        assert!(local.checkpoints().read(Direction::Push).await.unwrap().is_some());

        // Nothing new on the second cycle
        let again = local.full_sync().await;
        assert!(again.push.success);
        assert_eq!(again.push.records, 0);
        assert_eq!(cloud.database().sales().count().await.unwrap(), 1);

        handle.shutdown().await.unwrap();
    }
}
