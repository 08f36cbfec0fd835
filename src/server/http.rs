//! Operator HTTP API
//!
//! Thin JSON layer over a [`ConsensusService`]. Writes are bounded by the
//! configured proposal timeout; a write sent to a follower is answered with
//! `307` and the leader address in `x-raft-leader`.
//!
//! The leader address is the leader's raft transport address, not its
//! operator API address, so there is no `Location` header to follow. Clients
//! map it to the leader's API endpoint themselves. The same address is in the
//! `leader` field of the JSON body.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::common::{Error, MetricsRegistry, Result};
use crate::consensus::ConsensusService;

/// Header carrying the leader's raft address on a `307` answer
pub const LEADER_HEADER: &str = "x-raft-leader";

#[derive(Clone)]
pub struct ServerState {
    pub consensus: Arc<dyn ConsensusService>,
    pub metrics: Arc<MetricsRegistry>,
    pub proposal_timeout: Duration,
}

pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/throttle-app/:app", post(throttle_app))
        .route("/unthrottle-app/:app", post(unthrottle_app))
        .route("/throttled-apps", get(throttled_apps))
        .route("/recent-apps", get(recent_apps))
        .route("/check/:app", get(check_app))
        .route("/leader", get(leader))
        .route("/raft/state", get(raft_state))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(err: Error) -> Response {
    let mut status = err.to_http_status();
    // Nowhere to redirect to while an election is running
    if matches!(&err, Error::NotLeader(_)) && err.leader_hint().is_none() {
        status = StatusCode::SERVICE_UNAVAILABLE;
    }

    let mut body = json!({ "error": err.to_string() });
    if let Some(leader) = err.leader_hint() {
        body["leader"] = json!(leader);
    }
    let mut response = (status, Json(body)).into_response();
    if let Some(value) = err.leader_hint().and_then(|l| HeaderValue::from_str(l).ok()) {
        response.headers_mut().insert(LEADER_HEADER, value);
    }
    response
}

/// Await a write, giving up after the proposal timeout
async fn bounded<F>(timeout: Duration, write: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    tokio::time::timeout(timeout, write)
        .await
        .map_err(|_| Error::ConsensusTimeout)?
}

#[derive(Debug, Default, Deserialize)]
struct ThrottleQuery {
    /// Minutes; ignored when `expire` is given
    ttl: Option<i64>,
    ratio: Option<f64>,
    /// RFC 3339 instant
    expire: Option<DateTime<Utc>>,
}

async fn throttle_app(
    State(state): State<ServerState>,
    Path(app): Path<String>,
    Query(query): Query<ThrottleQuery>,
) -> Response {
    let write = state.consensus.throttle_app(
        &app,
        query.ttl.unwrap_or(0),
        query.expire,
        query.ratio,
    );
    match bounded(state.proposal_timeout, write).await {
        Ok(()) => {
            let entry = state.consensus.throttled_apps_map().remove(&app);
            (StatusCode::OK, Json(json!({ "app": app, "throttle": entry }))).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn unthrottle_app(State(state): State<ServerState>, Path(app): Path<String>) -> Response {
    let write = state.consensus.unthrottle_app(&app);
    match bounded(state.proposal_timeout, write).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "app": app, "unthrottled": true }))).into_response(),
        Err(e) => error_response(e),
    }
}

async fn throttled_apps(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.consensus.throttled_apps_map())
}

async fn recent_apps(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.consensus.recent_apps_map())
}

async fn check_app(State(state): State<ServerState>, Path(app): Path<String>) -> impl IntoResponse {
    let throttled = state.consensus.check_app(&app);
    Json(json!({ "app": app, "throttled": throttled }))
}

async fn leader(State(state): State<ServerState>) -> impl IntoResponse {
    Json(json!({
        "leader": state.consensus.get_leader(),
        "is_leader": state.consensus.is_leader(),
    }))
}

async fn raft_state(State(state): State<ServerState>) -> Response {
    let consensus = &state.consensus;
    let membership = match consensus.get_shared_domain_services() {
        Ok(peers) => json!({ "peers": peers }),
        Err(e) => json!({ "error": e.to_string() }),
    };
    Json(json!({
        "role": consensus.role(),
        "leader": consensus.get_leader(),
        "description": consensus.get_state_description(),
        "membership": membership,
    }))
    .into_response()
}

/// 200 while this node is a leader or a follower, 503 otherwise
async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    let healthy = state.consensus.is_healthy();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "healthy": healthy,
            "role": state.consensus.role(),
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

async fn metrics(State(state): State<ServerState>) -> impl IntoResponse {
    (StatusCode::OK, state.metrics.to_prometheus())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::LocalCluster;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn router_for(cluster: &LocalCluster, index: usize) -> Router {
        create_router(ServerState {
            consensus: cluster.node(index),
            metrics: cluster.node(index).metrics().clone(),
            proposal_timeout: Duration::from_secs(1),
        })
    }

    async fn send(router: Router, method: &str, uri: &str) -> (StatusCode, Response) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        (response.status(), response)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_throttle_on_leader_and_read_on_follower() {
        let cluster = LocalCluster::new(3);
        cluster.elect(0).unwrap();

        let (status, _) = send(
            router_for(&cluster, 0),
            "POST",
            "/throttle-app/svc-a?ttl=5&ratio=0.5",
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, response) = send(router_for(&cluster, 2), "GET", "/throttled-apps").await;
        assert_eq!(status, StatusCode::OK);
        let apps = body_json(response).await;
        assert_eq!(apps["svc-a"]["ratio"], 0.5);
    }

    #[tokio::test]
    async fn test_follower_redirects_writes() {
        let cluster = LocalCluster::new(3);
        cluster.elect(1).unwrap();

        let (status, response) = send(router_for(&cluster, 0), "POST", "/unthrottle-app/svc-a").await;
        assert_eq!(status, StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[LEADER_HEADER], "node-1:10008");
        assert!(response.headers().get("location").is_none());
        assert_eq!(body_json(response).await["leader"], "node-1:10008");
    }

    #[tokio::test]
    async fn test_invalid_ratio_rejected() {
        let cluster = LocalCluster::new(1);
        cluster.elect(0).unwrap();
        let (status, _) = send(router_for(&cluster, 0), "POST", "/throttle-app/svc-a?ratio=2").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_follows_role() {
        let cluster = LocalCluster::new(3);
        let (status, _) = send(router_for(&cluster, 0), "GET", "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        cluster.elect(0).unwrap();
        let (status, response) = send(router_for(&cluster, 1), "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_json(response).await["role"], "Follower");
    }
}
