//! Credential Store.
//!
//! All durable state lives here: accounts and their ceremony state, session
//! rows, and the authorization server's codes, tokens, clients and seen
//! client-assertion IDs. Every two-phase flow is bridged through these
//! tables so the second request may land on any instance.

pub mod accounts;
mod oauth2;
pub mod sessions;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// SeaORM-backed implementation of the OAuth2 storage traits.
#[derive(Clone, Debug)]
pub struct SeaOrmStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }
}
