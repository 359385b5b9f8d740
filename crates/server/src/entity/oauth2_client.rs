//! OAuth2 Client entity. Rows are managed by application tooling; the
//! gateway only reads them.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::crypto::verify_password;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth2_client")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Human-readable client name
    pub name: String,
    /// Argon2 hash of the current secret (None for public clients)
    #[serde(skip_serializing)]
    pub secret_hash: Option<String>,
    /// JSON array of former secret hashes still accepted during rollover
    #[serde(skip_serializing)]
    pub rotated_secret_hashes: String,
    /// JSON array of allowed redirect URIs
    pub redirect_uris: String,
    /// Space-separated list of allowed grant types
    pub grant_types: String,
    /// Space-separated list of allowed response types
    pub response_types: String,
    /// Space-separated list of allowed scopes
    pub scopes: String,
    /// Space-separated list of audiences tokens may be issued for
    pub audience: String,
    /// Whether this is a public client (no secret required)
    pub is_public: bool,
    /// RSA public key (PEM) for `private_key_jwt` client assertions
    pub public_key_pem: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parse redirect URIs from JSON string
    pub fn redirect_uris_list(&self) -> Vec<String> {
        serde_json::from_str(&self.redirect_uris).unwrap_or_default()
    }

    /// Parse grant types from space-separated string
    pub fn grant_types_list(&self) -> Vec<String> {
        self.grant_types
            .split_whitespace()
            .map(String::from)
            .collect()
    }

    /// Parse scopes from space-separated string
    pub fn scopes_list(&self) -> Vec<String> {
        self.scopes.split_whitespace().map(String::from).collect()
    }

    /// Check if a redirect URI is allowed for this client
    pub fn is_redirect_uri_allowed(&self, uri: &str) -> bool {
        self.redirect_uris_list()
            .iter()
            .any(|allowed| allowed == uri)
    }

    /// Check if a grant type is allowed for this client
    pub fn is_grant_type_allowed(&self, grant_type: &str) -> bool {
        self.grant_types_list().iter().any(|g| g == grant_type)
    }

    pub fn is_response_type_allowed(&self, response_type: &str) -> bool {
        self.response_types
            .split_whitespace()
            .any(|r| r == response_type)
    }

    pub fn is_scope_allowed(&self, scope: &str) -> bool {
        self.scopes.split_whitespace().any(|s| s == scope)
    }

    /// Check a presented secret against the current hash, then every
    /// rotated hash in order.
    pub fn check_secret(&self, secret: &str) -> bool {
        if let Some(current) = &self.secret_hash
            && verify_password(secret, current)
        {
            return true;
        }
        let rotated: Vec<String> =
            serde_json::from_str(&self.rotated_secret_hashes).unwrap_or_default();
        rotated.iter().any(|hash| verify_password(secret, hash))
    }
}
