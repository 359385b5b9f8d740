//! Storage contract of the authorization server, one trait per concern.
//!
//! Codes and tokens are addressed by signature (see
//! [`crate::crypto::token_signature`]); raw values never reach a store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::entity::oauth2_client;
use crate::error::StoreError;

/// Everything the engine needs to remember about an authorization request
/// between the authorize step and the token step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantRequest {
    /// Shared by the code and every token minted from it.
    pub request_id: String,
    pub client_id: String,
    pub username: String,
    pub redirect_uri: String,
    /// `redirect_uri` was part of the authorize request
    #[serde(default)]
    pub redirect_uri_given: bool,
    pub requested_scopes: Vec<String>,
    pub granted_scopes: Vec<String>,
    #[serde(default)]
    pub code_challenge: Option<String>,
    #[serde(default)]
    pub code_challenge_method: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    pub requested_at: i64,
    pub auth_time: i64,
}

impl GrantRequest {
    pub fn scope(&self) -> String {
        self.granted_scopes.join(" ")
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.granted_scopes.iter().any(|s| s == scope)
    }
}

/// Claims context kept for the code so an ID token can be produced when the
/// code is exchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenIdSession {
    pub subject: String,
    pub client_id: String,
    #[serde(default)]
    pub nonce: Option<String>,
    pub auth_time: i64,
    pub requested_at: i64,
}

/// A stored access or refresh token grant.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    pub signature: String,
    pub request: GrantRequest,
    pub expires_at: OffsetDateTime,
    pub issued_at: OffsetDateTime,
}

/// A token about to be persisted: its signature and expiry.
#[derive(Debug, Clone)]
pub struct NewToken {
    pub signature: String,
    pub expires_at: OffsetDateTime,
}

/// Tokens minted by one successful exchange.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access: NewToken,
    pub refresh: Option<NewToken>,
}

/// What a code exchange writes back onto the code's session row.
#[derive(Debug, Clone)]
pub struct ExchangeRecord {
    pub session_pk: String,
    pub id_token: Option<String>,
    pub kid: String,
}

#[async_trait]
pub trait CodeStore: Send + Sync {
    async fn create_authorization_code_session(
        &self,
        signature: &str,
        request: &GrantRequest,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// `Invalidated` once the code has been used, `Expired` past its lifetime.
    async fn get_authorization_code_session(
        &self,
        signature: &str,
    ) -> Result<GrantRequest, StoreError>;

    /// Flips `active` exactly once; a second call yields `Invalidated`.
    async fn invalidate_authorization_code_session(&self, signature: &str)
    -> Result<(), StoreError>;

    /// Persist a freshly minted code in one transaction: the grant, its
    /// OpenID session when given, and the `code` session row correlating the
    /// code with `request.username`.
    async fn issue_authorization_code(
        &self,
        signature: &str,
        request: &GrantRequest,
        expires_at: OffsetDateTime,
        openid: Option<&OpenIdSession>,
    ) -> Result<(), StoreError>;

    /// Invalidate the code, persist the tokens minted for it, drop its
    /// OpenID session and record the exchange on its session row, all in one
    /// transaction. Losing the race yields `Invalidated` and writes nothing.
    async fn redeem_authorization_code(
        &self,
        signature: &str,
        request: &GrantRequest,
        tokens: &IssuedTokens,
        record: &ExchangeRecord,
    ) -> Result<(), StoreError>;

    async fn create_openid_connect_session(
        &self,
        signature: &str,
        session: &OpenIdSession,
    ) -> Result<(), StoreError>;

    async fn get_openid_connect_session(&self, signature: &str)
    -> Result<OpenIdSession, StoreError>;

    async fn delete_openid_connect_session(&self, signature: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn create_access_token_session(
        &self,
        signature: &str,
        request: &GrantRequest,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    async fn get_access_token_session(&self, signature: &str) -> Result<TokenGrant, StoreError>;

    /// Idempotent.
    async fn delete_access_token_session(&self, signature: &str) -> Result<(), StoreError>;

    async fn create_refresh_token_session(
        &self,
        signature: &str,
        request: &GrantRequest,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// `Inactive` for a rotated or revoked refresh token.
    async fn get_refresh_token_session(&self, signature: &str) -> Result<TokenGrant, StoreError>;

    /// Idempotent.
    async fn delete_refresh_token_session(&self, signature: &str) -> Result<(), StoreError>;

    /// Delete every access token minted for `request_id`. Idempotent.
    async fn revoke_access_token(&self, request_id: &str) -> Result<(), StoreError>;

    /// Deactivate every refresh token minted for `request_id`. Idempotent.
    async fn revoke_refresh_token(&self, request_id: &str) -> Result<(), StoreError>;

    /// Retire `old_signature` and persist the replacement pair. Either both
    /// happen or neither does; a refresh token that was already retired
    /// yields `Inactive`.
    async fn rotate_refresh_token(
        &self,
        old_signature: &str,
        request: &GrantRequest,
        tokens: &IssuedTokens,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ClientStore: Send + Sync {
    /// `NotFound` for an unregistered client.
    async fn get_client(&self, client_id: &str) -> Result<oauth2_client::Model, StoreError>;

    /// `Unauthorized` unless `secret` matches the current or a rotated hash.
    /// Unknown clients are also `Unauthorized`.
    async fn authenticate_client(
        &self,
        client_id: &str,
        secret: &str,
    ) -> Result<oauth2_client::Model, StoreError>;
}

#[async_trait]
pub trait JtiStore: Send + Sync {
    /// `JtiKnown` if the JWT ID has been seen and has not expired yet.
    async fn client_assertion_jwt_valid(&self, jti: &str) -> Result<(), StoreError>;

    /// Remember `jti` until `expires_at`, evicting expired entries first.
    async fn set_client_assertion_jwt(
        &self,
        jti: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError>;
}
