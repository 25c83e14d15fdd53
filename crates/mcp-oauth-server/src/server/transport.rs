//! Streamable HTTP transport routes for the MCP resource server.
//!
//! A single `/mcp` endpoint carries the whole protocol: POST for JSON-RPC
//! messages, GET for the SSE event stream with `Last-Event-ID` replay, and
//! DELETE for session termination. Sessions are identified by the
//! `mcp-session-id` header; the only request allowed to arrive without one
//! is an `initialize` payload, which creates the session.

use std::borrow::Cow;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Extension, Json, Router,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{AccessClaims, TokenVerifier};
use crate::config::defaults;

use super::session::{SessionRegistry, SessionTransport, StreamableHttpTransport};

/// Header carrying the session id on every non-initialization request.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Whether this payload opens a new session.
    #[must_use]
    pub fn is_initialize(&self) -> bool {
        self.method == "initialize"
    }
}

/// JSON-RPC 2.0 response.
///
/// `id` always serializes (as `null` when absent) so protocol-error
/// envelopes keep their fixed `{jsonrpc, error, id: null}` shape.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 error.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcResponse {
    const VERSION: &'static str = "2.0";

    #[must_use]
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self { jsonrpc: Cow::Borrowed(Self::VERSION), result: Some(result), error: None, id }
    }

    #[must_use]
    pub fn error(id: Option<serde_json::Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(Self::VERSION),
            result: None,
            error: Some(JsonRpcError { code, message: message.into() }),
            id,
        }
    }
}

/// Shared state for the MCP resource server.
pub struct McpState {
    pub sessions: SessionRegistry<StreamableHttpTransport>,
    pub verifier: Arc<dyn TokenVerifier>,
    /// Public base URL of this resource server.
    pub base_url: String,
    /// Public base URL of the authorization server.
    pub auth_base_url: String,
}

impl McpState {
    /// URL of the protected-resource metadata document, referenced by the
    /// `WWW-Authenticate` challenge.
    #[must_use]
    pub fn resource_metadata_url(&self) -> String {
        format!("{}/.well-known/oauth-protected-resource", self.base_url)
    }
}

/// Create the MCP resource server router.
pub fn mcp_router(state: Arc<McpState>) -> Router {
    let protected = Router::new()
        .route(
            "/mcp",
            get(handle_mcp_get).post(handle_mcp_post).delete(handle_mcp_delete),
        )
        .layer(middleware::from_fn_with_state(Arc::clone(&state), require_bearer));

    Router::new()
        .route("/.well-known/oauth-protected-resource", get(handle_protected_resource))
        .route("/health", get(handle_health))
        .merge(protected)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── RFC 9728: Protected Resource Metadata ───────────────────────────────────

/// `GET /.well-known/oauth-protected-resource`
async fn handle_protected_resource(State(state): State<Arc<McpState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "resource": state.base_url,
        "authorization_servers": [state.auth_base_url],
        "bearer_methods_supported": ["header"],
        "scopes_supported": [defaults::SUPPORTED_SCOPE]
    }))
}

async fn handle_health(State(state): State<Arc<McpState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.len().await
    }))
}

// ─── Bearer middleware ───────────────────────────────────────────────────────

/// Require a valid bearer token on protected routes.
///
/// On success the verified [`AccessClaims`] are attached to the request
/// extensions; on failure the response is a 401 with a `WWW-Authenticate`
/// challenge naming the protected-resource metadata document. Verification
/// failures of any kind (unknown token, expiry, remote introspection
/// errors) produce the same 401, never a crash.
async fn require_bearer(
    State(state): State<Arc<McpState>>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(TypedHeader(bearer)) = bearer else {
        return unauthorized(&state, "Missing Authorization header");
    };

    match state.verifier.verify(bearer.token()).await {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!(error = %e, "Rejected bearer token");
            unauthorized(&state, "Invalid or expired access token")
        }
    }
}

fn unauthorized(state: &McpState, description: &str) -> Response {
    let challenge = format!(
        "Bearer resource_metadata=\"{}\"",
        state.resource_metadata_url()
    );
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": "invalid_token",
            "error_description": description
        })),
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&challenge) {
        response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

// ─── /mcp handlers ───────────────────────────────────────────────────────────

fn session_id_from(headers: &HeaderMap) -> Option<String> {
    headers.get(SESSION_ID_HEADER).and_then(|v| v.to_str().ok()).map(str::to_owned)
}

fn last_event_id_from(headers: &HeaderMap) -> u64 {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// The fixed protocol-error envelope for missing/unknown session ids.
fn session_error_response() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(JsonRpcResponse::error(
            None,
            -32000,
            "Bad Request: No valid session ID provided",
        )),
    )
        .into_response()
}

/// Attach the session id header to a response.
fn with_session_id(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_ID_HEADER, value);
    }
    response
}

/// `POST /mcp`
///
/// Routes to the session named by the `mcp-session-id` header. An
/// initialization payload without a session id creates one; the transport is
/// registered under its id before the response carrying that id is built,
/// so a follow-up request can never observe an id the registry does not
/// know.
async fn handle_mcp_post(
    State(state): State<Arc<McpState>>,
    Extension(claims): Extension<AccessClaims>,
    headers: HeaderMap,
    Json(request): Json<JsonRpcRequest>,
) -> Response {
    tracing::debug!(
        method = %request.method,
        client_id = %claims.client_id,
        "Handling MCP POST request"
    );

    if let Some(session_id) = session_id_from(&headers) {
        let Some(transport) = state.sessions.get(&session_id).await else {
            return session_error_response();
        };
        if transport.is_closed() {
            return session_error_response();
        }
        let response = dispatch(&request, &transport).await;
        return with_session_id(response, &session_id);
    }

    if !request.is_initialize() {
        return session_error_response();
    }

    let session_id = SessionRegistry::<StreamableHttpTransport>::generate_session_id();
    let transport = Arc::new(StreamableHttpTransport::new(session_id.clone()));
    state.sessions.add(session_id.clone(), Arc::clone(&transport)).await;

    let response = dispatch(&request, &transport).await;
    with_session_id(response, &session_id)
}

/// `GET /mcp`
///
/// SSE stream for server-initiated messages: replays events the client
/// missed (per `Last-Event-ID`), then follows with live events.
async fn handle_mcp_get(
    State(state): State<Arc<McpState>>,
    headers: HeaderMap,
) -> Response {
    let Some(session_id) = session_id_from(&headers) else {
        return session_error_response();
    };
    let Some(transport) = state.sessions.get(&session_id).await else {
        return session_error_response();
    };
    if transport.is_closed() {
        return session_error_response();
    }

    let last_event_id = last_event_id_from(&headers);
    tracing::info!(session_id = %session_id, last_event_id, "New SSE stream connection");

    let stream = build_sse_stream(transport, last_event_id).await;

    let response = (
        [
            ("X-Accel-Buffering", "no"),
            ("Cache-Control", "no-cache, no-store, must-revalidate"),
        ],
        Sse::new(stream)
            .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("ping")),
    )
        .into_response();
    with_session_id(response, &session_id)
}

/// `DELETE /mcp`
///
/// Terminates the session: closes the transport and removes it from the
/// registry. A close failure is logged and does not keep the entry alive.
async fn handle_mcp_delete(
    State(state): State<Arc<McpState>>,
    headers: HeaderMap,
) -> Response {
    let Some(session_id) = session_id_from(&headers) else {
        return session_error_response();
    };
    let Some(transport) = state.sessions.get(&session_id).await else {
        return session_error_response();
    };

    if let Err(e) = transport.close().await {
        tracing::error!(session_id = %session_id, error = %e, "Transport close failed");
    }
    state.sessions.remove(&session_id).await;

    StatusCode::OK.into_response()
}

/// Replay missed events, then follow the live broadcast.
async fn build_sse_stream(
    transport: Arc<StreamableHttpTransport>,
    last_event_id: u64,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let missed = transport.events_after(last_event_id).await;
    let replay = stream::iter(missed.into_iter().map(|e| {
        tracing::debug!(event_id = e.id, "Replaying missed event");
        Ok::<_, Infallible>(e.to_sse_event())
    }));

    let receiver = transport.subscribe();
    let live = BroadcastStream::new(receiver).filter_map(|result| async move {
        match result {
            Ok(event) => Some(Ok(event.to_sse_event())),
            Err(e) => {
                tracing::debug!(error = %e, "Broadcast lag, client will catch up via replay");
                None
            }
        }
    });

    replay.chain(live)
}

// ─── JSON-RPC dispatch ───────────────────────────────────────────────────────

/// Dispatch one protocol message on a session.
///
/// Tool execution is out of scope for this server; `tools/list` reports an
/// empty set and unknown methods get a method-not-found error.
async fn dispatch(request: &JsonRpcRequest, transport: &StreamableHttpTransport) -> Response {
    let is_notification = request.id.is_none();

    let response = match request.method.as_str() {
        "initialize" => JsonRpcResponse::success(request.id.clone(), initialize_result(&request.params)),
        "notifications/initialized" | "initialized" | "notifications/cancelled" => {
            if is_notification {
                return StatusCode::ACCEPTED.into_response();
            }
            JsonRpcResponse::success(request.id.clone(), serde_json::json!({}))
        }
        "ping" => JsonRpcResponse::success(request.id.clone(), serde_json::json!({})),
        "tools/list" => {
            JsonRpcResponse::success(request.id.clone(), serde_json::json!({ "tools": [] }))
        }
        _ => {
            if is_notification {
                return StatusCode::ACCEPTED.into_response();
            }
            JsonRpcResponse::error(
                request.id.clone(),
                -32601,
                format!("Method not found: {}", request.method),
            )
        }
    };

    // Mirror results into the mailbox so a reconnecting stream can replay them.
    if let Some(ref result) = response.result {
        let data = serde_json::to_string(&JsonRpcResponse::success(
            request.id.clone(),
            result.clone(),
        ))
        .unwrap_or_default();
        transport.push_event("message", data).await;
    }

    Json(response).into_response()
}

fn initialize_result(params: &serde_json::Value) -> serde_json::Value {
    let protocol_version = params
        .get("protocolVersion")
        .and_then(|v| v.as_str())
        .unwrap_or("2024-11-05");

    tracing::info!(protocol_version, "MCP initialize");

    serde_json::json!({
        "protocolVersion": protocol_version,
        "capabilities": {
            "tools": { "listChanged": false }
        },
        "serverInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}
