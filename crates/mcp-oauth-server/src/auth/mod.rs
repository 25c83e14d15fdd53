//! OAuth 2.0 authorization-code-grant authority.
//!
//! A self-contained, in-memory authorization server: client registration,
//! code issuance bound to a PKCE challenge, single-use code exchange for
//! bearer tokens, and token verification/introspection for the resource
//! server. Demo-grade by design: no persistence, no refresh tokens, no rate
//! limiting.
//!
//! ## Supported Standards
//! - RFC 8414: OAuth Authorization Server Metadata
//! - RFC 7591: Dynamic Client Registration
//! - RFC 7636: PKCE (S256)
//! - RFC 7662: Token Introspection
//! - RFC 6749: Authorization Code Grant

pub mod authority;
pub mod clients;
pub mod grants;
pub mod handlers;
pub mod pkce;
pub mod tokens;
pub mod types;
pub mod verifier;

pub use authority::{AuthorizationAuthority, AuthorizeRequest};
pub use clients::ClientRegistry;
pub use handlers::{AuthState, auth_router};
pub use types::{AccessClaims, Client, IntrospectionResponse, TokenResponse};
pub use verifier::{LocalVerifier, RemoteVerifier, TokenVerifier};
