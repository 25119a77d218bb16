//! Session turn API.
//!
//! - `POST   /v1/sessions`                : open a session
//! - `POST   /v1/sessions/{id}/messages`  : run one conversation turn
//! - `DELETE /v1/sessions/{id}`           : end a session and drop its state
//! - `POST   /v1/route`                   : routing dry run

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post},
    Json, Router,
};
use globaliq_agent::runtime::{AgentRuntime, SessionStore, TurnReply};
use globaliq_core::audit::AuditContext;
use globaliq_core::domain::route::{Route, RoutingDecision};
use globaliq_core::errors::InterfaceError;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

const MAX_MESSAGE_CHARS: usize = 4_000;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<AgentRuntime>,
    pub sessions: Arc<SessionStore>,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    pub text: String,
    pub hint: Option<Route>,
}

#[derive(Debug, Serialize)]
pub struct SessionCreated {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/sessions", post(create_session))
        .route("/v1/sessions/{id}/messages", post(post_message))
        .route("/v1/sessions/{id}", delete(end_session))
        .route("/v1/route", post(route_utterance))
        .with_state(state)
}

pub async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionCreated>) {
    let session_id = state.sessions.create();
    info!(event_name = "api.session_created", correlation_id = %session_id, session_id = %session_id);
    (StatusCode::CREATED, Json(SessionCreated { session_id }))
}

pub async fn post_message(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<MessageRequest>,
) -> ApiResult<Json<TurnReply>> {
    let text = validate_text(&request.text)?;
    let session = state.sessions.get(&session_id).ok_or_else(|| not_found(&session_id))?;
    let correlation_id = Uuid::new_v4().to_string();

    state
        .runtime
        .handle_turn(&session_id, &session, text, &correlation_id)
        .await
        .map(Json)
        .map_err(interface_error)
}

pub async fn end_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<StatusCode> {
    if state.sessions.remove(&session_id) {
        info!(event_name = "api.session_ended", correlation_id = %session_id, session_id = %session_id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&session_id))
    }
}

pub async fn route_utterance(
    State(state): State<AppState>,
    Json(request): Json<RouteRequest>,
) -> ApiResult<Json<RoutingDecision>> {
    let text = validate_text(&request.text)?;
    let audit = AuditContext::new(None, request.hint, Uuid::new_v4().to_string());
    Ok(Json(state.runtime.router().route(text, request.hint, &audit).await))
}

fn validate_text(text: &str) -> ApiResult<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Err(bad_request("text must not be empty"));
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(bad_request("text is too long"));
    }
    Ok(text)
}

fn bad_request(message: &str) -> (StatusCode, Json<ApiError>) {
    (StatusCode::BAD_REQUEST, Json(ApiError { error: message.to_string(), correlation_id: None }))
}

fn not_found(session_id: &str) -> (StatusCode, Json<ApiError>) {
    warn!(event_name = "api.session_not_found", correlation_id = %session_id, session_id = %session_id);
    (
        StatusCode::NOT_FOUND,
        Json(ApiError { error: "Session not found".to_string(), correlation_id: None }),
    )
}

fn interface_error(error: InterfaceError) -> (StatusCode, Json<ApiError>) {
    let status = match error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ApiError {
            error: error.user_message().to_string(),
            correlation_id: Some(error.correlation_id().to_string()),
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        extract::{Path, State},
        http::{Request, StatusCode},
        Json,
    };
    use globaliq_agent::runtime::{AgentRuntime, SessionStore};
    use globaliq_core::audit::NoopAuditSink;
    use globaliq_core::config::AppConfig;
    use globaliq_core::domain::route::{Route, RoutingMethod};
    use globaliq_core::errors::InterfaceError;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::{
        create_session, end_session, interface_error, post_message, route_utterance, router,
        AppState, MessageRequest, RouteRequest,
    };

    fn state() -> AppState {
        let runtime = AgentRuntime::from_config(&AppConfig::default(), Arc::new(NoopAuditSink))
            .expect("runtime");
        AppState { runtime: Arc::new(runtime), sessions: Arc::new(SessionStore::default()) }
    }

    #[tokio::test]
    async fn session_lifecycle_round_trip() {
        let state = state();

        let (status, Json(created)) = create_session(State(state.clone())).await;
        assert_eq!(status, StatusCode::CREATED);

        let Json(reply) = post_message(
            Path(created.session_id.clone()),
            State(state.clone()),
            Json(MessageRequest { text: "What can you do?".to_string() }),
        )
        .await
        .expect("guidance turn");
        assert_eq!(reply.session_id, created.session_id);
        assert_eq!(reply.routing.map(|decision| decision.route), Some(Route::Guidance));
        assert!(reply.message.contains("GlobalIQ"));

        let ended = end_session(Path(created.session_id.clone()), State(state.clone()))
            .await
            .expect("session ends");
        assert_eq!(ended, StatusCode::NO_CONTENT);
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn unknown_sessions_are_not_found() {
        let state = state();

        let error = post_message(
            Path("missing".to_string()),
            State(state.clone()),
            Json(MessageRequest { text: "hello".to_string() }),
        )
        .await
        .expect_err("no such session");
        assert_eq!(error.0, StatusCode::NOT_FOUND);

        let error = end_session(Path("missing".to_string()), State(state)).await.expect_err("gone");
        assert_eq!(error.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn blank_messages_are_rejected() {
        let state = state();
        let (_, Json(created)) = create_session(State(state.clone())).await;

        let error = post_message(
            Path(created.session_id),
            State(state),
            Json(MessageRequest { text: "   ".to_string() }),
        )
        .await
        .expect_err("blank text");
        assert_eq!(error.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn route_dry_run_uses_the_keyword_fast_path() {
        let Json(decision) = route_utterance(
            State(state()),
            Json(RouteRequest { text: "Which visa rules apply?".to_string(), hint: None }),
        )
        .await
        .expect("routed");

        assert_eq!(decision.route, Route::Policy);
        assert_eq!(decision.method, RoutingMethod::Keyword);
        assert_eq!(decision.confidence, 1.0);
    }

    #[tokio::test]
    async fn router_serves_session_creation() {
        let response = router(state())
            .oneshot(Request::post("/v1/sessions").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = to_bytes(response.into_body(), 1024).await.expect("body");
        let payload: Value = serde_json::from_slice(&body).expect("json");
        assert!(payload["session_id"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[test]
    fn interface_errors_carry_only_the_fixed_message() {
        let (status, Json(body)) = interface_error(InterfaceError::Timeout {
            message: "primary_dispatch exceeded 30000ms".to_string(),
            correlation_id: "req-9".to_string(),
        });

        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body.error, "That took longer than expected. Please try again.");
        assert_eq!(body.correlation_id.as_deref(), Some("req-9"));
    }
}
