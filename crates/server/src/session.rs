//! Session Bridge.
//!
//! Maps the identity token a browser carries (cookie, or a bearer header)
//! to its session row and account, and mints new tokens after a successful
//! sign-in. Resolution is read-only.

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, HeaderValue, header, request::Parts},
};
use sea_orm::DatabaseConnection;

use crate::AppResources;
use crate::config::AppConfig;
use crate::entity::account;
use crate::entity::session::{self as session_entity, SessionKind};
use crate::error::{SessionError, TokenError};
use crate::keys::KeyManager;
use crate::response::{ApiError, ResultCode};
use crate::store::{accounts, sessions};

/// A freshly minted identity token and the row it is bound to.
#[derive(Debug, Clone)]
pub struct IssuedIdentity {
    pub token: String,
    pub session: session_entity::Model,
}

#[derive(Clone, Debug)]
pub struct SessionBridge {
    db: Arc<DatabaseConnection>,
    keys: Arc<KeyManager>,
    config: Arc<AppConfig>,
}

impl SessionBridge {
    pub fn new(db: Arc<DatabaseConnection>, keys: Arc<KeyManager>, config: Arc<AppConfig>) -> Self {
        Self { db, keys, config }
    }

    /// Session row for `token`, or `None` when the token has expired or its
    /// row is gone. A token that fails signature or structure checks is an
    /// error.
    pub async fn resolve_from_token(
        &self,
        token: &str,
    ) -> Result<Option<session_entity::Model>, SessionError> {
        let token = strip_bearer(token);
        let verified = self.keys.verify_identity_token_allow_expired(token)?;
        if verified.expired {
            tracing::debug!(sub = %verified.claims.sub, "identity token expired");
            return Ok(None);
        }

        // ID tokens handed to OAuth2 clients are bound to `code` rows and are
        // not browser identities.
        let session = sessions::find_by_jwt_id(self.db.as_ref(), &verified.claims.jti).await?;
        Ok(session.filter(|s| s.username == verified.claims.sub && s.kind != SessionKind::Code))
    }

    /// Active account and session row behind the request's identity, or
    /// `None` for no identity, an expired token, a missing row or a disabled
    /// account.
    pub async fn resolve_signed_in(
        &self,
        headers: &HeaderMap,
    ) -> Result<Option<(account::Model, session_entity::Model)>, SessionError> {
        let Some(token) = self.carried_token(headers) else {
            return Ok(None);
        };
        let Some(session) = self.resolve_from_token(&token).await? else {
            return Ok(None);
        };

        match accounts::find_by_username(self.db.as_ref(), &session.username).await? {
            Some(account) if account.is_active() => Ok(Some((account, session))),
            Some(_) => {
                tracing::info!(username = %session.username, "session belongs to a disabled account");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Like [`resolve_signed_in`](Self::resolve_signed_in) but a corrupt
    /// token is treated as no identity.
    pub async fn resolve_signed_in_lenient(
        &self,
        headers: &HeaderMap,
    ) -> Result<Option<(account::Model, session_entity::Model)>, SessionError> {
        match self.resolve_signed_in(headers).await {
            Err(SessionError::Token(TokenError::Invalid(reason))) => {
                tracing::info!(%reason, "ignoring unusable identity token");
                Ok(None)
            }
            other => other,
        }
    }

    /// Account behind the request's identity, or the anonymous sentinel.
    pub async fn resolve_account(&self, headers: &HeaderMap) -> Result<account::Model, SessionError> {
        Ok(self
            .resolve_signed_in(headers)
            .await?
            .map(|(account, _)| account)
            .unwrap_or_else(account::Model::anonymous))
    }

    /// Lenient counterpart of [`resolve_account`](Self::resolve_account).
    pub async fn resolve_account_lenient(
        &self,
        headers: &HeaderMap,
    ) -> Result<account::Model, SessionError> {
        Ok(self
            .resolve_signed_in_lenient(headers)
            .await?
            .map(|(account, _)| account)
            .unwrap_or_else(account::Model::anonymous))
    }

    /// Create a session row for `username` and sign a token bound to it.
    pub async fn issue(
        &self,
        username: &str,
        kind: SessionKind,
    ) -> Result<IssuedIdentity, SessionError> {
        let mut new = sessions::NewSession::new(username, kind);
        new.kid = Some(self.keys.kid().to_string());
        new.bind_jwt_id = true;
        let session = sessions::insert_session(self.db.as_ref(), new).await?;

        let token =
            self.keys
                .sign_identity_token(username, &self.config.issuer_url, &session.pk)?;
        tracing::info!(username, kind = ?kind, session = %session.pk, "issued identity token");
        Ok(IssuedIdentity { token, session })
    }

    /// Delete the session row behind the carried token, if any. Unusable
    /// tokens are ignored.
    pub async fn end_session(&self, headers: &HeaderMap) -> Result<(), SessionError> {
        let Some(token) = self.carried_token(headers) else {
            return Ok(());
        };
        match self.resolve_from_token(&token).await {
            Ok(Some(session)) => {
                sessions::delete_session(self.db.as_ref(), &session.pk).await?;
                tracing::info!(username = %session.username, "session ended");
                Ok(())
            }
            Ok(None) | Err(SessionError::Token(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// `Set-Cookie` value carrying `token`.
    pub fn cookie_header(&self, token: &str) -> Result<HeaderValue, SessionError> {
        self.build_cookie(token, self.config.cookie.max_age)
    }

    /// `Set-Cookie` value that removes the identity cookie.
    pub fn clear_cookie_header(&self) -> Result<HeaderValue, SessionError> {
        self.build_cookie("", 0)
    }

    fn build_cookie(&self, value: &str, max_age: i64) -> Result<HeaderValue, SessionError> {
        let cookie = &self.config.cookie;
        let mut rendered = format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            cookie.name, value, max_age
        );
        if cookie.secure {
            rendered.push_str("; Secure");
        }
        if let Some(domain) = &cookie.domain {
            rendered.push_str("; Domain=");
            rendered.push_str(domain);
        }
        Ok(HeaderValue::from_str(&rendered)?)
    }

    fn carried_token(&self, headers: &HeaderMap) -> Option<String> {
        if let Some(value) = cookie_value(headers, &self.config.cookie.name) {
            return Some(value);
        }
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("Bearer "))
            .map(|v| strip_bearer(v).to_string())
    }
}

fn strip_bearer(token: &str) -> &str {
    token.strip_prefix("Bearer ").unwrap_or(token).trim()
}

/// First non-empty value of cookie `name` across all `Cookie` headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, v)| *k == name && !v.is_empty())
        .map(|(_, v)| v.trim_matches('"').to_string())
}

// =============================================================================
// Extractors
// =============================================================================

/// The caller's account, or the anonymous sentinel.
#[derive(Debug, Clone)]
pub struct CurrentAccount(pub account::Model);

impl<S> FromRequestParts<S> for CurrentAccount
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let resources = parts
            .extensions
            .get::<AppResources>()
            .cloned()
            .ok_or_else(|| {
                tracing::error!("AppResources not found in extensions");
                ApiError::internal()
            })?;

        let account = resources
            .session_bridge()
            .resolve_account(&parts.headers)
            .await?;
        Ok(CurrentAccount(account))
    }
}

/// A signed-in, non-anonymous account.
#[derive(Debug, Clone)]
pub struct SignedIn(pub account::Model);

impl<S> FromRequestParts<S> for SignedIn
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentAccount(account) = CurrentAccount::from_request_parts(parts, state).await?;
        if account.is_anonymous() {
            return Err(ApiError::new(ResultCode::NotLogin, "please sign in first"));
        }
        Ok(SignedIn(account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_value_parsing() {
        let mut headers = HeaderMap::new();
        headers.append(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; Portal-Authorization=abc.def.ghi"),
        );
        assert_eq!(
            cookie_value(&headers, "Portal-Authorization").as_deref(),
            Some("abc.def.ghi")
        );
        assert_eq!(cookie_value(&headers, "theme").as_deref(), Some("dark"));
        assert!(cookie_value(&headers, "missing").is_none());
    }

    #[test]
    fn test_empty_cookie_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("Portal-Authorization="));
        headers.append(header::COOKIE, HeaderValue::from_static("Portal-Authorization=tok"));
        assert_eq!(
            cookie_value(&headers, "Portal-Authorization").as_deref(),
            Some("tok")
        );
    }

    #[test]
    fn test_strip_bearer() {
        assert_eq!(strip_bearer("Bearer abc"), "abc");
        assert_eq!(strip_bearer("abc"), "abc");
    }
}
