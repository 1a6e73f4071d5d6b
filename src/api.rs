use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::links::LinkManager;
use crate::notifications::NotificationLog;
use crate::registry::Registry;

/// the core's HTTP management surface: a health probe, the session
/// existence probe consumed by external collaborators, and CRUD over
/// persistent links.
///
/// like the reference server's controller, this carries no authentication
/// of its own — it is meant to sit behind a trusted boundary, not be
/// exposed directly.
struct AppState {
    registry: Arc<Registry>,
    links: Arc<LinkManager>,
    notifications: Arc<NotificationLog>,
}

pub async fn serve(
    listener: TcpListener,
    registry: Arc<Registry>,
    links: Arc<LinkManager>,
    notifications: Arc<NotificationLog>,
) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        registry,
        links,
        notifications,
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/session/:id", get(session_probe))
        .route("/api/links/:link_id", get(get_link).put(put_link).delete(delete_link))
        .route("/api/links/:link_id/keep-alive", post(keep_alive_link))
        .route("/api/links/:link_id/promote-nft", post(promote_link))
        .route("/api/links/:link_id/activity", post(record_link_activity))
        .route("/api/notifications", get(list_notifications))
        .with_state(state);

    log::info!("http management surface listening={:?}", listener.local_addr());
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.registry.snapshot().await;
    Json(json!({
        "status": "ok",
        "sessions": snapshot.sessions,
        "clients": snapshot.clients,
    }))
}

async fn session_probe(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.registry.lookup(&id).await {
        Some(result) => Json(json!({
            "exists": true,
            "hasHost": result.has_host,
            "clientCount": result.client_count,
        }))
        .into_response(),
        None => Json(json!({ "exists": false })).into_response(),
    }
}

#[derive(Deserialize)]
struct CreateLinkRequest {
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(rename = "walletAddress")]
    wallet_address: Option<String>,
    #[serde(default)]
    metadata: Value,
}

async fn put_link(
    State(state): State<Arc<AppState>>,
    Path(link_id): Path<String>,
    Json(body): Json<CreateLinkRequest>,
) -> Response {
    match state
        .links
        .create_or_regenerate(link_id, body.session_id, body.wallet_address, body.metadata)
        .await
    {
        Ok(link) => Json(link).into_response(),
        Err(e) => {
            log::error!("link create/regenerate failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn get_link(State(state): State<Arc<AppState>>, Path(link_id): Path<String>) -> Response {
    match state.links.get(&link_id).await {
        Some(link) => Json(link).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn delete_link(State(state): State<Arc<AppState>>, Path(link_id): Path<String>) -> Response {
    match state.links.remove(&link_id).await {
        Ok(Some(_)) => StatusCode::NO_CONTENT.into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            log::error!("link removal failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn keep_alive_link(State(state): State<Arc<AppState>>, Path(link_id): Path<String>) -> Response {
    match state.links.keep_alive(&link_id).await {
        Ok(Some(link)) => Json(link).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            log::error!("keep-alive failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// promotes a regular link to the permanent nft store (§3 "exactly one of
/// the two stores"). Not driven by any policy in this core — the caller
/// (the out-of-scope persistent-link manager, once it has confirmed
/// on-chain nft ownership) decides when a link qualifies.
async fn promote_link(State(state): State<Arc<AppState>>, Path(link_id): Path<String>) -> Response {
    match state.links.promote_to_nft(&link_id).await {
        Ok(Some(link)) => Json(link).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            log::error!("link promotion failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// records one activity tick against a link (§3 `activityCount`,
/// `lastActivityAt`), which in turn feeds the keep-alive recent-activity
/// condition (§4.5). The external collaborator driving real session usage
/// (the desktop client, via the out-of-scope persistent-link manager) is
/// expected to call this periodically while a link's session is in use.
async fn record_link_activity(State(state): State<Arc<AppState>>, Path(link_id): Path<String>) -> Response {
    match state.links.record_activity(&link_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            log::error!("recording link activity failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn list_notifications(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.notifications.recent().await)
}
