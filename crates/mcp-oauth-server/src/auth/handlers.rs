//! OAuth 2.0 endpoint handlers for the authorization server.
//!
//! Implements:
//! - RFC 8414: OAuth Authorization Server Metadata
//! - RFC 7591: Dynamic Client Registration
//! - RFC 7636: PKCE (S256)
//! - RFC 7662: Token Introspection
//! - RFC 6749: OAuth 2.0 Authorization Code Grant

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::defaults;
use crate::error::AuthError;

use super::authority::{AuthorizationAuthority, AuthorizeRequest};
use super::pkce;
use super::types::{Client, IntrospectionResponse};

/// Shared state for the authorization server handlers.
pub struct AuthState {
    pub authority: AuthorizationAuthority,
    /// Public issuer URL of this authorization server.
    pub base_url: String,
}

/// Create the authorization server router.
pub fn auth_router(state: Arc<AuthState>) -> Router {
    Router::new()
        .route("/.well-known/oauth-authorization-server", get(handle_metadata))
        .route("/register", post(handle_register))
        .route("/authorize", get(handle_authorize))
        .route("/token", post(handle_token))
        .route("/introspect", post(handle_introspect))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── RFC 8414: Authorization Server Metadata ─────────────────────────────────

/// `GET /.well-known/oauth-authorization-server`
async fn handle_metadata(State(state): State<Arc<AuthState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "issuer": state.base_url,
        "authorization_endpoint": format!("{}/authorize", state.base_url),
        "token_endpoint": format!("{}/token", state.base_url),
        "registration_endpoint": format!("{}/register", state.base_url),
        "introspection_endpoint": format!("{}/introspect", state.base_url),
        "scopes_supported": [defaults::SUPPORTED_SCOPE],
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code"],
        "token_endpoint_auth_methods_supported": ["none"],
        "code_challenge_methods_supported": ["S256"]
    }))
}

// ─── RFC 7591: Dynamic Client Registration ───────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default)]
    pub response_types: Vec<String>,
}

/// `POST /register`
async fn handle_register(
    State(state): State<Arc<AuthState>>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    let redirect_uris = req.redirect_uris.unwrap_or_default();
    if redirect_uris.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "invalid_client_metadata",
                "error_description": "redirect_uris is required"
            })),
        )
            .into_response();
    }

    let client = state
        .authority
        .clients()
        .register(Client {
            client_id: req.client_id.unwrap_or_default(),
            client_secret: req.client_secret,
            redirect_uris,
            grant_types: if req.grant_types.is_empty() {
                vec!["authorization_code".into()]
            } else {
                req.grant_types
            },
            response_types: if req.response_types.is_empty() {
                vec!["code".into()]
            } else {
                req.response_types
            },
        })
        .await;

    (StatusCode::CREATED, Json(client)).into_response()
}

// ─── Authorization Endpoint ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub scope: Option<String>,
}

/// `GET /authorize`
///
/// Auto-approves the request: this is a demo authority with no interactive
/// login, so any registered client with valid PKCE parameters and a
/// registered redirect URI gets a code. Validation failures return 400
/// without redirecting anywhere.
async fn handle_authorize(
    State(state): State<Arc<AuthState>>,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    let Some(client_id) = query.client_id.as_deref() else {
        return (StatusCode::BAD_REQUEST, "Missing client_id").into_response();
    };
    let Some(redirect_uri) = query.redirect_uri.as_deref() else {
        return (StatusCode::BAD_REQUEST, "Missing redirect_uri").into_response();
    };
    let Some(code_challenge) = query.code_challenge.as_deref() else {
        return (StatusCode::BAD_REQUEST, "Missing code_challenge").into_response();
    };
    if query.response_type.as_deref() != Some("code") {
        return (StatusCode::BAD_REQUEST, "response_type must be 'code'").into_response();
    }
    if query.code_challenge_method.as_deref() != Some("S256") {
        return (StatusCode::BAD_REQUEST, "code_challenge_method must be 'S256'").into_response();
    }

    let scopes = query
        .scope
        .as_deref()
        .unwrap_or(defaults::SUPPORTED_SCOPE)
        .split_whitespace()
        .map(str::to_owned)
        .collect();

    let request = AuthorizeRequest {
        redirect_uri: redirect_uri.to_owned(),
        code_challenge: code_challenge.to_owned(),
        scopes,
        state: query.state,
    };

    match state.authority.authorize(client_id, request).await {
        Ok(target) => (
            StatusCode::FOUND,
            [(header::LOCATION, target.location.to_string())],
        )
            .into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

// ─── Token Endpoint ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub code_verifier: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
}

/// `POST /token`
async fn handle_token(
    State(state): State<Arc<AuthState>>,
    axum::Form(form): axum::Form<TokenRequest>,
) -> Response {
    match form.grant_type.as_str() {
        "authorization_code" => handle_authorization_code_grant(&state.authority, &form).await,
        "refresh_token" => handle_refresh_token_grant(&state.authority, &form).await,
        _ => token_error(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            &format!("grant_type '{}' is not supported", form.grant_type),
        ),
    }
}

async fn handle_authorization_code_grant(
    authority: &AuthorizationAuthority,
    form: &TokenRequest,
) -> Response {
    let Some(ref client_id) = form.client_id else {
        return token_error(StatusCode::BAD_REQUEST, "invalid_request", "Missing client_id");
    };
    let Some(ref code) = form.code else {
        return token_error(StatusCode::BAD_REQUEST, "invalid_request", "Missing code");
    };
    let Some(ref code_verifier) = form.code_verifier else {
        return token_error(StatusCode::BAD_REQUEST, "invalid_request", "Missing code_verifier");
    };

    let Some(client) = authority.clients().lookup(client_id).await else {
        return token_error(StatusCode::UNAUTHORIZED, "invalid_client", "Unknown client");
    };

    // PKCE: the authority exposes the stored challenge, the comparison
    // happens here, and only a successful comparison reaches the exchange.
    let challenge = match authority.challenge_for_code(code).await {
        Ok(challenge) => challenge,
        Err(e) => return auth_error_response(&e),
    };
    if !pkce::verify_s256(code_verifier, &challenge) {
        return token_error(StatusCode::BAD_REQUEST, "invalid_grant", "PKCE verification failed");
    }

    match authority.exchange_code(&client, code).await {
        Ok(pair) => token_success(&pair),
        Err(e) => auth_error_response(&e),
    }
}

async fn handle_refresh_token_grant(
    authority: &AuthorizationAuthority,
    form: &TokenRequest,
) -> Response {
    let Some(ref client_id) = form.client_id else {
        return token_error(StatusCode::BAD_REQUEST, "invalid_request", "Missing client_id");
    };
    let Some(client) = authority.clients().lookup(client_id).await else {
        return token_error(StatusCode::UNAUTHORIZED, "invalid_client", "Unknown client");
    };

    let refresh_token = form.refresh_token.as_deref().unwrap_or_default();
    match authority.exchange_refresh_token(&client, refresh_token) {
        Ok(pair) => token_success(&pair),
        Err(e) => auth_error_response(&e),
    }
}

/// Build a token response with required OAuth 2.0 cache headers (RFC 6749 §5.1).
fn token_success(pair: &super::types::TokenResponse) -> Response {
    let mut response = Json(pair).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

fn auth_error_response(error: &AuthError) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::BAD_REQUEST);
    token_error(status, error.oauth_error_code(), &error.to_string())
}

fn token_error(status: StatusCode, error: &str, description: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": error,
            "error_description": description
        })),
    )
        .into_response()
}

// ─── RFC 7662: Token Introspection ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct IntrospectRequest {
    pub token: Option<String>,
}

/// `POST /introspect`
///
/// Always answers with a structured body: 200 with `active` true or false
/// for any well-formed query, 401 when the token parameter is missing.
async fn handle_introspect(
    State(state): State<Arc<AuthState>>,
    axum::Form(form): axum::Form<IntrospectRequest>,
) -> Response {
    let Some(token) = form.token.filter(|t| !t.is_empty()) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(IntrospectionResponse::inactive("invalid_request")),
        )
            .into_response();
    };

    Json(state.authority.introspect(&token).await).into_response()
}
