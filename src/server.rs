// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP SERVER (feature `server`)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Superfície HTTP mínima sobre o serviço:
//
// - `POST /api/research` - valida e enfileira → `{success, data:{id}}`
// - `GET  /api/health`   - 200 quando operacional
// - `GET  /api/status/:id` - projeção da task
// - `GET  /api/search`   - busca keyword em findings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::queue::{EnqueueRequest, QueueError};
use crate::service::ResearchService;
use crate::types::Depth;

/// Corpo de `POST /api/research`
#[derive(Debug, Deserialize)]
pub struct ResearchRequest {
    /// Query a pesquisar
    pub query: String,
    /// Profundidade (`quick|medium|deep`)
    #[serde(default)]
    pub depth: Option<String>,
    /// Contexto livre
    #[serde(default)]
    pub context: Option<String>,
    /// Prioridade 1..10
    #[serde(default)]
    pub priority: Option<i64>,
    /// Label do gatilho
    #[serde(default)]
    pub trigger: Option<String>,
    /// Sessão de origem
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Parâmetros de `GET /api/search`
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    /// Texto da busca
    pub q: String,
    /// Máximo de resultados (default 10)
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Inicia o servidor HTTP no endereço dado
pub async fn start_server(addr: SocketAddr, service: Arc<ResearchService>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/api/health", get(health))
        .route("/api/research", post(research))
        .route("/api/status/:id", get(task_status))
        .route("/api/search", get(search))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(service);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("🌐 research-crew server escutando em http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({"success": true, "status": "ok"}))
}

async fn research(
    State(service): State<Arc<ResearchService>>,
    Json(body): Json<ResearchRequest>,
) -> (StatusCode, Json<Value>) {
    let request = EnqueueRequest {
        query: body.query,
        context: body.context,
        depth: body.depth.as_deref().map(Depth::parse).unwrap_or_default(),
        trigger: body.trigger.unwrap_or_else(|| "api".to_string()),
        session_id: body.session_id,
        priority: body.priority,
    };

    match service.research(request).await {
        Ok(task) => (
            StatusCode::OK,
            Json(json!({"success": true, "data": {"id": task.id, "status": task.status.as_str()}})),
        ),
        Err(QueueError::Validation(message)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": message})),
        ),
        Err(QueueError::CapacityExceeded) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"success": false, "message": "queue capacity exceeded"})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "message": e.to_string()})),
        ),
    }
}

async fn task_status(
    State(service): State<Arc<ResearchService>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    let Ok(id) = Uuid::parse_str(&id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": "invalid task id"})),
        );
    };

    match service.store.get_task(id).await {
        Ok(Some(task)) => (
            StatusCode::OK,
            Json(json!({"success": true, "data": task})),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "message": "task not found"})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "message": e.to_string()})),
        ),
    }
}

async fn search(
    State(service): State<Arc<ResearchService>>,
    Query(params): Query<SearchParams>,
) -> (StatusCode, Json<Value>) {
    let limit = params.limit.unwrap_or(10).min(50);
    match service.store.search_findings(&params.q, limit).await {
        Ok(findings) => (
            StatusCode::OK,
            Json(json!({"success": true, "data": findings})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "message": e.to_string()})),
        ),
    }
}
