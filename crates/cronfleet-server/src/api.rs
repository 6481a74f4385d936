use std::sync::Arc;

use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::get, Extension, Json,
    Router,
};
use chrono::{DateTime, Utc};
use cronfleet_scheduler::{SchedulerEngine, SchedulerStatus};
use serde::Serialize;
use sqlx::PgPool;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::middleware::{request_id, RequestId};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub engine: Arc<SchedulerEngine>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct HealthData {
    status: &'static str,
    database: &'static str,
}

impl ResponseMeta {
    fn new(request_id: String) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/scheduler/status", get(scheduler_status))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(request_id)),
        )
        .with_state(state)
}

async fn health(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> impl IntoResponse {
    let meta = ResponseMeta::new(req_id.0);

    match cronfleet_db::health_check(&state.pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse {
                data: HealthData {
                    status: "ok",
                    database: "ok",
                },
                meta,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "health check: database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse {
                    data: HealthData {
                        status: "degraded",
                        database: "unavailable",
                    },
                    meta,
                }),
            )
        }
    }
}

async fn scheduler_status(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Json<ApiResponse<SchedulerStatus>> {
    Json(ApiResponse {
        data: state.engine.status().await,
        meta: ResponseMeta::new(req_id.0),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::TimeZone;
    use cronfleet_scheduler::memory::{fixtures, MemoryQueue, MemoryStore};
    use cronfleet_scheduler::{
        Dispatcher, DispatchPlanner, Mirror, PoolGroup, ScheduleSource, SyncEngine,
    };
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    use super::*;

    /// A pool that never connects: port 1 refuses immediately.
    fn unreachable_pool() -> PgPool {
        PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(500))
            .connect_lazy("postgres://cronfleet@127.0.0.1:1/cronfleet")
            .expect("lazy pool")
    }

    async fn test_state() -> AppState {
        let mirror = Arc::new(Mirror::new());
        let clock = Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap();
        mirror
            .upsert(fixtures::record("fn-a", "*/5 * * * *", clock))
            .await;
        mirror
            .upsert(fixtures::record("fn-b", "0 * * * *", clock))
            .await;

        let store: Arc<dyn ScheduleSource> = Arc::new(MemoryStore::new());
        let queue = MemoryQueue::new().pool(4);
        let mut pools = PoolGroup::new();
        pools.register(queue.clone());

        let engine = SchedulerEngine::new(
            fixtures::REGION,
            Arc::clone(&mirror),
            SyncEngine::new(
                store,
                Arc::clone(&mirror),
                fixtures::REGION,
                100,
                clock,
            ),
            DispatchPlanner::new(Arc::clone(&mirror), Duration::from_secs(60)),
            Dispatcher::new(Arc::clone(&mirror), queue, pools.clone()),
            pools,
            Duration::from_secs(10),
        );

        AppState {
            pool: unreachable_pool(),
            engine: Arc::new(engine),
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header("x-request-id", "req-test")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        let status = response.status();
        assert_eq!(
            response.headers().get("x-request-id").unwrap(),
            "req-test"
        );
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        (status, serde_json::from_slice(&body).expect("json parse"))
    }

    #[tokio::test]
    async fn status_reports_mirror_size_and_region() {
        let app = build_app(test_state().await);
        let (status, json) = get_json(app, "/api/v1/scheduler/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["region"], "default");
        assert_eq!(json["data"]["mirrored"], 2);
        assert_eq!(json["data"]["pools"][0]["name"], "queue");
        assert_eq!(json["meta"]["request_id"], "req-test");
    }

    #[tokio::test]
    async fn health_is_degraded_without_database() {
        let app = build_app(test_state().await);
        let (status, json) = get_json(app, "/api/v1/health").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["data"]["status"], "degraded");
        assert_eq!(json["data"]["database"], "unavailable");
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let app = build_app(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/nope")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
