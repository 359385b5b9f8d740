//! Account entity - a user, their credentials and the in-flight WebAuthn ceremony.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use webauthn_rs::prelude::Passkey;

pub const STATUS_ACTIVE: i32 = 1;
pub const STATUS_DISABLED: i32 = 0;

/// Username of the sentinel returned for requests without an identity.
pub const ANONYMOUS_USERNAME: &str = "anonymous";

/// Two-phase ceremony state stored on the account row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum CeremonyState {
    #[sea_orm(string_value = "not_started")]
    NotStarted,
    #[sea_orm(string_value = "challenge_issued")]
    ChallengeIssued,
    #[sea_orm(string_value = "completed")]
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum CeremonyKind {
    #[sea_orm(string_value = "registration")]
    Registration,
    #[sea_orm(string_value = "authentication")]
    Authentication,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "account")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub pk: String,
    #[sea_orm(unique)]
    pub username: String,
    /// Argon2 PHC string, `None` for passwordless accounts
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub nickname: String,
    pub mail: String,
    /// Set once control of `mail` was proven with an email code
    pub mail_verified: bool,
    /// JSON array of registered passkeys
    #[serde(skip_serializing)]
    pub credentials: String,
    pub ceremony_state: CeremonyState,
    pub ceremony_kind: Option<CeremonyKind>,
    /// Serialized webauthn-rs ceremony state, never sent to clients
    #[serde(skip_serializing)]
    pub ceremony_challenge: Option<String>,
    pub ceremony_issued_at: Option<OffsetDateTime>,
    pub status: i32,
    pub create_time: OffsetDateTime,
    pub update_time: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// The well-known anonymous account. Never persisted.
    pub fn anonymous() -> Self {
        let epoch = OffsetDateTime::UNIX_EPOCH;
        Self {
            pk: Uuid::nil().to_string(),
            username: ANONYMOUS_USERNAME.to_string(),
            password: None,
            nickname: ANONYMOUS_USERNAME.to_string(),
            mail: String::new(),
            mail_verified: false,
            credentials: "[]".to_string(),
            ceremony_state: CeremonyState::NotStarted,
            ceremony_kind: None,
            ceremony_challenge: None,
            ceremony_issued_at: None,
            status: STATUS_ACTIVE,
            create_time: epoch,
            update_time: epoch,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.pk == Uuid::nil().to_string() && self.username == ANONYMOUS_USERNAME
    }

    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }

    /// Registered passkeys.
    pub fn passkeys(&self) -> Result<Vec<Passkey>, serde_json::Error> {
        if self.credentials.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&self.credentials)
    }

    /// Whether any way of signing in has been set up for this account. A
    /// verified address counts: the owner signs in with email codes.
    pub fn has_sign_in_method(&self) -> bool {
        self.password.is_some()
            || self.mail_verified
            || self.passkeys().map(|p| !p.is_empty()).unwrap_or(true)
    }

    /// A row created by a passkey registration that never finished. Only
    /// such rows may be claimed by a later sign-up for the same username.
    pub fn is_abandoned_registration(&self) -> bool {
        !self.has_sign_in_method()
            && self.ceremony_kind == Some(CeremonyKind::Registration)
            && self.ceremony_state != CeremonyState::Completed
    }
}

/// Display name derived from a username: the local part of an email address.
pub fn display_name_for(username: &str) -> String {
    match username.split_once('@') {
        Some((local, _)) if !local.is_empty() => local.to_string(),
        _ => username.to_string(),
    }
}
