// src/api.rs
// HTTP surface: router, request/response marshalling, status-code mapping,
// and the WebSocket upgrade that feeds observers into the hub.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, Request, State,
    },
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::analytics::AnalyticsService;
use crate::domain::DateRange;
use crate::error::PipelineError;
use crate::hub::{HubHandle, ObserverConn};
use crate::pipeline::{Orchestrator, PipelineOutcome};
use crate::store::{Page, Store};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<dyn Store>,
    pub analytics: AnalyticsService,
    pub hub: HubHandle,
    pub pipeline_deadline: Duration,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/fetch_concalls", get(fetch_concalls))
        .route("/api/list_concalls", get(list_concalls))
        .route("/api/find_concalls", get(find_concalls))
        .route("/api/analytics", get(analytics_summary))
        .route("/ws/analytics", get(ws_analytics))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            track_list_visits,
        ))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Uptime-ping endpoint; deliberately touches nothing but the allocator.
async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// ------------------------------------------------------------
// Error mapping
// ------------------------------------------------------------

struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            PipelineError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, json!({ "error": msg }))
            }
            PipelineError::DeadlineExceeded => (
                StatusCode::GATEWAY_TIMEOUT,
                json!({ "error": self.0.to_string() }),
            ),
            // The caller is told work succeeded but storage failed, with the
            // count of records produced but not saved.
            PipelineError::Persistence { produced, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": self.0.to_string(),
                    "summary": "Processed but failed to save",
                    "count": produced,
                }),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": self.0.to_string() }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

// ------------------------------------------------------------
// Pipeline trigger
// ------------------------------------------------------------

async fn fetch_concalls(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let range = DateRange::parse(
        q.get("from").map(String::as_str),
        q.get("to").map(String::as_str),
    )?;

    let outcome = tokio::time::timeout(state.pipeline_deadline, state.orchestrator.run(&range))
        .await
        .map_err(|_| PipelineError::DeadlineExceeded)??;

    let body = match outcome {
        PipelineOutcome::NoAnnouncements => json!({
            "message": "No announcements found for the given date range",
            "count": 0,
            "summaries": [],
        }),
        PipelineOutcome::AllDuplicates { fetched } => json!({
            "message": "All announcements already processed",
            "count": 0,
            "fetched": fetched,
        }),
        PipelineOutcome::Completed { stats, records } => json!({
            "message": "Announcements processed and saved successfully",
            "count": records.len(),
            "summaries": records,
            "stats": stats,
        }),
    };
    Ok(Json(body))
}

// ------------------------------------------------------------
// Read endpoints
// ------------------------------------------------------------

/// Lenient pagination parsing: anything unparseable falls back to defaults,
/// matching how the UI has always called these endpoints.
fn page_from_query(q: &HashMap<String, String>) -> Page {
    let page = q.get("page").and_then(|v| v.parse().ok()).unwrap_or(1);
    let limit = q.get("limit").and_then(|v| v.parse().ok()).unwrap_or(10);
    Page::clamped(page, limit)
}

async fn list_concalls(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let page = page_from_query(&q);
    let result = state
        .store
        .list_guidances(page)
        .await
        .map_err(|e| PipelineError::Persistence { produced: 0, source: e })?;

    Ok(Json(json!({
        "meta": {
            "page": page.page,
            "limit": page.limit,
            "total": result.total,
            "totalPages": result.total_pages,
        },
        "data": result.items,
    })))
}

async fn find_concalls(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let raw_name = q.get("name").cloned().unwrap_or_default();
    // Some clients send + for spaces.
    let name = raw_name.replace('+', " ").trim().to_string();
    if name.is_empty() {
        return Err(PipelineError::Validation(
            "query parameter 'name' is required".to_string(),
        )
        .into());
    }

    let page = page_from_query(&q);
    let result = state
        .store
        .find_guidances(&name, page)
        .await
        .map_err(|e| PipelineError::Persistence { produced: 0, source: e })?;

    Ok(Json(json!({
        "meta": {
            "query": name,
            "page": page.page,
            "limit": page.limit,
            "total": result.total,
            "totalPages": result.total_pages,
        },
        "data": result.items,
    })))
}

async fn analytics_summary(
    State(state): State<AppState>,
) -> Result<Json<crate::analytics::AnalyticsSummary>, ApiError> {
    let summary = state
        .analytics
        .summary()
        .await
        .map_err(|e| PipelineError::Persistence { produced: 0, source: e })?;
    Ok(Json(summary))
}

// ------------------------------------------------------------
// Analytics tracking middleware
// ------------------------------------------------------------

/// Count hits on the list endpoint after responding. The increment runs on a
/// detached task so a slow store never delays a response and a client that
/// hangs up early still gets counted. 304s are not visits.
async fn track_list_visits(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let resp = next.run(req).await;

    if path == "/api/list_concalls" && resp.status() != StatusCode::NOT_MODIFIED {
        state.analytics.increment_detached();
    }
    resp
}

// ------------------------------------------------------------
// WebSocket observers
// ------------------------------------------------------------

async fn ws_analytics(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_observer(socket, state.hub))
}

/// Connection lifecycle: register with the hub, forward queued frames onto
/// the socket, unregister on disconnect. The hub closing our queue (the
/// slow-observer drop) also ends the connection.
async fn serve_observer(socket: WebSocket, hub: HubHandle) {
    let (mut sink, mut stream) = socket.split();
    let (conn, mut rx) = ObserverConn::new();
    let id = conn.id;
    hub.register(conn).await;

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Observers never send application messages; drain until close/error so
    // the transport can detect disconnects.
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    hub.unregister(id).await;
    let _ = writer.await;
    tracing::debug!(id, "observer connection closed");
}
