//! OAuth2 / OpenID Connect authorization server.
//!
//! ## Supported Flows
//!
//! - Authorization Code, optionally with PKCE (mandatory for public clients)
//! - Refresh Token, with rotation
//!
//! ## Endpoints
//!
//! - `GET|POST /oauth2/auth` - Authorization endpoint
//! - `POST /oauth2/token` - Token endpoint
//! - `POST /oauth2/revoke` - Token revocation
//! - `POST /oauth2/introspect` - Token introspection
//! - `POST /oauth2/user` - Account behind an ID token
//! - `GET /oauth2/jwks` - Signing keys
//! - `GET /.well-known/openid-configuration` - OpenID Connect Discovery

pub mod authorize;
pub mod client_auth;
pub mod endpoints;
pub mod error;
mod state;
pub mod storage;
pub mod token;

pub use endpoints::router;
pub use error::OAuth2Error;
pub use state::OAuth2State;

/// OpenAPI tag for OAuth2 endpoints
pub const OAUTH2_TAG: &str = "OAuth2";
