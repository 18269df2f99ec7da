//! HTTP 서버 - 채팅 API (axum)
//!
//! - `GET /` 상태 확인
//! - `POST /chat` 채팅 한 턴
//! - `GET /sessions?client_id=` 세션 목록 (최신순)
//! - `POST /sessions` 세션 생성
//! - `GET /sessions/{id}` 세션 메시지 + 마지막 분석
//! - `DELETE /sessions/{id}` 세션 삭제
//!
//! 브라우저 프런트엔드가 다른 오리진에서 호출하므로 CORS는 모두 허용합니다.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::knowledge::{AnalysisSnapshot, ConversationTurn, Session};
use crate::pipeline::{ChatPipeline, ChatReply, ChatRequest};

// ============================================================================
// State / Errors
// ============================================================================

/// 핸들러 공유 상태
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<ChatPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<ChatPipeline>) -> Self {
        Self { pipeline }
    }
}

/// API 에러 응답
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("session store unavailable: {0:#}")]
    StoreUnavailable(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            tracing::error!("{}", self);
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ClientQuery {
    #[serde(default)]
    pub client_id: String,
}

#[derive(Debug, Deserialize)]
pub struct NewSession {
    #[serde(default)]
    pub client_id: String,
}

/// 세션 목록 항목
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl From<Session> for SessionSummary {
    fn from(session: Session) -> Self {
        Self {
            id: session.id.to_string(),
            title: session.title,
            created_at: session.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedSession {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionMessages {
    pub messages: Vec<ConversationTurn>,
    pub analysis: Option<AnalysisSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Deleted {
    pub deleted: bool,
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/chat", post(chat))
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 서버 실행 (Ctrl+C로 종료)
pub async fn serve(bind: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;

    tracing::info!("Legal RAG API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await
        .context("HTTP server failed")
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let request = json_body(payload)?;
    if request.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }

    tracing::info!(
        "POST /chat client={} session={:?}",
        request.client_id,
        request.session_id
    );
    Ok(Json(state.pipeline.chat(request).await))
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ClientQuery>,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    let sessions = state
        .pipeline
        .store()
        .list_sessions(&query.client_id)
        .map_err(ApiError::StoreUnavailable)?;

    Ok(Json(sessions.into_iter().map(SessionSummary::from).collect()))
}

async fn create_session(
    State(state): State<AppState>,
    payload: Result<Json<NewSession>, JsonRejection>,
) -> Result<Json<CreatedSession>, ApiError> {
    let body = json_body(payload)?;
    let session = state
        .pipeline
        .store()
        .create_session(&body.client_id)
        .map_err(ApiError::StoreUnavailable)?;

    Ok(Json(CreatedSession {
        id: session.id.to_string(),
        title: session.title,
    }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionMessages>, ApiError> {
    let id = parse_session_id(&id)?;
    let detail = state
        .pipeline
        .store()
        .get_session(&id)
        .map_err(ApiError::StoreUnavailable)?;

    Ok(Json(SessionMessages {
        messages: detail.turns,
        analysis: detail.analysis,
    }))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Deleted>, ApiError> {
    let id = parse_session_id(&id)?;
    let deleted = state
        .pipeline
        .store()
        .delete_session(&id)
        .map_err(ApiError::StoreUnavailable)?;

    Ok(Json(Deleted { deleted }))
}

/// JSON 본문 추출 실패도 `{"error": ...}` 형태로 응답
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

fn parse_session_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| ApiError::BadRequest(format!("invalid session id: {}", raw)))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{test_pipeline, ScriptedGeneration};
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const ANSWER: &str = "結論：**罰鍰**\n---JSON_START---\n{\"domain\": \"交通\", \"risk_level\": \"medium\", \"keywords\": []}\n---JSON_END---";

    fn state(dir: &TempDir) -> AppState {
        let generation = Arc::new(ScriptedGeneration::replying(ANSWER));
        AppState::new(Arc::new(test_pipeline(
            dir.path(),
            generation,
            Duration::from_secs(5),
        )))
    }

    fn chat_request(message: &str, session_id: Option<String>) -> ChatRequest {
        ChatRequest {
            message: message.to_string(),
            style: None,
            session_id,
            client_id: "browser-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_chat_then_fetch_session() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);

        let Json(reply) = chat(State(state.clone()), Ok(Json(chat_request("超速罰多少", None))))
            .await
            .unwrap();
        assert_eq!(reply.analysis.as_ref().unwrap().risk_level, "medium");

        let Json(detail) = get_session(State(state.clone()), Path(reply.session_id.clone()))
            .await
            .unwrap();
        assert_eq!(detail.messages.len(), 2);
        assert_eq!(detail.analysis, reply.analysis);

        let Json(list) = list_sessions(
            State(state),
            Query(ClientQuery {
                client_id: "browser-1".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, reply.session_id);
        assert_eq!(list[0].title, "超速罰多少");
    }

    #[tokio::test]
    async fn test_create_list_delete() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);

        let Json(created) = create_session(
            State(state.clone()),
            Ok(Json(NewSession {
                client_id: "browser-2".to_string(),
            })),
        )
        .await
        .unwrap();
        assert_eq!(created.title, crate::knowledge::DEFAULT_SESSION_TITLE);

        let Json(deleted) = delete_session(State(state.clone()), Path(created.id.clone()))
            .await
            .unwrap();
        assert!(deleted.deleted);

        let Json(detail) = get_session(State(state.clone()), Path(created.id))
            .await
            .unwrap();
        assert!(detail.messages.is_empty());
        assert!(detail.analysis.is_none());

        let Json(list) = list_sessions(
            State(state),
            Query(ClientQuery {
                client_id: "browser-2".to_string(),
            }),
        )
        .await
        .unwrap();
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_blank_message_and_bad_id() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);

        let err = chat(State(state.clone()), Ok(Json(chat_request("   ", None))))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let err = get_session(State(state), Path("not-a-uuid".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_chat_body_returns_json_error() {
        let dir = TempDir::new().unwrap();
        let app = router(state(&dir));

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/chat")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{\"message\": "))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()));
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_any_origin() {
        let dir = TempDir::new().unwrap();
        let app = router(state(&dir));

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/chat")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_success());
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
        assert!(response
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
    }

    #[test]
    fn test_store_error_maps_to_503() {
        let err = ApiError::StoreUnavailable(anyhow::anyhow!("database is locked"));
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "ok");
    }
}
