use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::AppConfig;
use crate::keys::KeyManager;
use crate::oauth2::storage::{ClientStore, CodeStore, JtiStore, TokenStore};
use crate::session::SessionBridge;
use crate::store::SeaOrmStore;

/// Router state of the authorization server.
#[derive(Clone)]
pub struct OAuth2State {
    pub codes: Arc<dyn CodeStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub clients: Arc<dyn ClientStore>,
    pub jtis: Arc<dyn JtiStore>,
    /// Session rows correlating codes and tokens with accounts
    pub db: Arc<DatabaseConnection>,
    pub keys: Arc<KeyManager>,
    pub config: Arc<AppConfig>,
}

impl OAuth2State {
    /// Every store backed by the same database.
    pub fn new(db: Arc<DatabaseConnection>, keys: Arc<KeyManager>, config: Arc<AppConfig>) -> Self {
        let store = Arc::new(SeaOrmStore::new(db.clone()));
        Self {
            codes: store.clone(),
            tokens: store.clone(),
            clients: store.clone(),
            jtis: store,
            db,
            keys,
            config,
        }
    }

    pub fn session_bridge(&self) -> SessionBridge {
        SessionBridge::new(self.db.clone(), self.keys.clone(), self.config.clone())
    }

    pub fn issuer(&self) -> &str {
        &self.config.issuer_url
    }

    /// Absolute URL of an endpoint served by this process.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.self_url, path)
    }

    pub fn token_endpoint(&self) -> String {
        self.endpoint("/oauth2/token")
    }

    pub fn access_token_lifetime(&self) -> time::Duration {
        time::Duration::seconds(self.config.tokens.access_token_lifetime)
    }

    pub fn refresh_token_lifetime(&self) -> time::Duration {
        time::Duration::seconds(self.config.tokens.refresh_token_lifetime)
    }

    pub fn code_lifetime(&self) -> time::Duration {
        time::Duration::seconds(self.config.tokens.authorization_code_lifetime)
    }
}
