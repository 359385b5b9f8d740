//! Identity and authorization gateway.
//!
//! An OAuth2 / OpenID Connect provider for first-party and third-party
//! applications. Users sign in with a password, an emailed one-time code or
//! a WebAuthn passkey; the signed-in browser carries an RS256 identity token
//! in a cookie, and the authorization server turns that identity into codes,
//! access tokens and ID tokens.

use std::sync::Arc;

use sea_orm::DatabaseConnection;
use webauthn_rs::Webauthn;

use crate::ceremony::CeremonyController;
use crate::config::AppConfig;
use crate::keys::KeyManager;
use crate::oauth2::OAuth2State;
use crate::response::ApiError;
use crate::session::SessionBridge;
use crate::validation::return_url::decode_return_url;

pub mod account;
pub mod api;
pub mod ceremony;
pub mod config;
pub mod crypto;
pub mod entity;
pub mod error;
pub mod keys;
pub mod oauth2;
pub mod response;
pub mod session;
pub mod store;
pub mod validation;

/// Shared, read-mostly handles every request may need.
#[derive(Clone)]
pub struct AppResources {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub keys: Arc<KeyManager>,
    pub webauthn: Arc<Webauthn>,
}

impl std::fmt::Debug for AppResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppResources")
            .field("config", &self.config)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl AppResources {
    pub fn session_bridge(&self) -> SessionBridge {
        SessionBridge::new(self.db.clone(), self.keys.clone(), self.config.clone())
    }

    pub fn ceremonies(&self) -> CeremonyController {
        CeremonyController::new(
            self.db.clone(),
            self.webauthn.clone(),
            self.config.tokens.ceremony_timeout,
        )
    }

    pub fn oauth2_state(&self) -> OAuth2State {
        OAuth2State::new(self.db.clone(), self.keys.clone(), self.config.clone())
    }

    /// Where to send the browser after a sign-in: the decoded `source`, or
    /// the web frontend when none was given.
    pub fn return_target(&self, source: Option<&str>) -> Result<String, ApiError> {
        match source.filter(|s| !s.is_empty()) {
            None => Ok(self.config.web_url.clone()),
            Some(source) => {
                let allowed = [self.config.self_url.as_str(), self.config.web_url.as_str()];
                let url = decode_return_url(source, &allowed).inspect_err(|e| {
                    tracing::info!(error = %e, "rejected return url");
                })?;
                Ok(url.into())
            }
        }
    }
}
