//! WebAuthn Ceremony Controller.
//!
//! Registration and authentication share one shape per account:
//! `NotStarted -> ChallengeIssued -> Completed`. Begin stores the
//! webauthn-rs state on the account row; Finish verifies against it and
//! moves the row to `Completed` with a conditional update, so two finishes
//! racing on the same challenge cannot both succeed.

pub mod endpoints;

use std::sync::Arc;

use sea_orm::DatabaseConnection;
use time::OffsetDateTime;
use webauthn_rs::prelude::*;

use crate::config::{ConfigError, WebauthnConfig};
use crate::entity::account::{self, CeremonyKind, CeremonyState, display_name_for};
use crate::error::{CeremonyError, StoreError};
use crate::store::accounts::{self, NewAccount};
use crate::validation::username::validate_username;

pub const WEBAUTHN_TAG: &str = "WebAuthn";

/// Build the relying party from configuration.
pub fn build_webauthn(config: &WebauthnConfig) -> Result<Webauthn, ConfigError> {
    let origin = Url::parse(&config.rp_origin)
        .map_err(|e| ConfigError::Validation(format!("webauthn.rp_origin: {e}")))?;
    WebauthnBuilder::new(&config.rp_id, &origin)
        .and_then(|builder| builder.rp_name(&config.rp_name).build())
        .map_err(|e| ConfigError::Validation(format!("webauthn relying party: {e}")))
}

#[derive(Clone)]
pub struct CeremonyController {
    db: Arc<DatabaseConnection>,
    webauthn: Arc<Webauthn>,
    timeout: time::Duration,
}

impl CeremonyController {
    pub fn new(db: Arc<DatabaseConnection>, webauthn: Arc<Webauthn>, timeout_secs: i64) -> Self {
        Self {
            db,
            webauthn,
            timeout: time::Duration::seconds(timeout_secs),
        }
    }

    /// Start registering a passkey for `username`, creating the account if
    /// needed. An existing account is only extended when the caller is
    /// signed in as it (`allow_existing`); otherwise only an abandoned
    /// registration may be restarted.
    #[tracing::instrument(skip(self))]
    pub async fn begin_registration(
        &self,
        username: &str,
        allow_existing: bool,
    ) -> Result<CreationChallengeResponse, CeremonyError> {
        validate_username(username)?;

        let account = match accounts::find_by_username(self.db.as_ref(), username).await? {
            Some(account) if !allow_existing && !account.is_abandoned_registration() => {
                return Err(CeremonyError::AccountExists);
            }
            Some(account) if !account.is_active() => return Err(CeremonyError::AccountNotFound),
            Some(account) => account,
            None => {
                accounts::insert_account(
                    self.db.as_ref(),
                    NewAccount {
                        username: username.to_string(),
                        password: None,
                        nickname: display_name_for(username),
                        mail: if username.contains('@') {
                            username.to_string()
                        } else {
                            String::new()
                        },
                        mail_verified: false,
                    },
                )
                .await?
            }
        };

        let user_id = Uuid::parse_str(&account.pk).map_err(|_| CeremonyError::CorruptState)?;
        let exclude: Vec<CredentialID> = account
            .passkeys()
            .map_err(|_| CeremonyError::CorruptState)?
            .iter()
            .map(|p| p.cred_id().clone())
            .collect();

        let (options, state) = self
            .webauthn
            .start_passkey_registration(user_id, &account.username, &account.nickname, Some(exclude))
            .map_err(|e| CeremonyError::Verification(e.to_string()))?;

        let challenge = serde_json::to_string(&state).map_err(StoreError::from)?;
        accounts::issue_challenge(
            self.db.as_ref(),
            username,
            CeremonyKind::Registration,
            challenge,
        )
        .await?;

        tracing::info!(username, "registration challenge issued");
        Ok(options)
    }

    /// Verify the authenticator's attestation and append the new passkey.
    #[tracing::instrument(skip(self, credential))]
    pub async fn finish_registration(
        &self,
        username: &str,
        credential: &str,
    ) -> Result<account::Model, CeremonyError> {
        let (account, challenge) = self.pending(username, CeremonyKind::Registration).await?;

        let state: PasskeyRegistration =
            serde_json::from_str(&challenge).map_err(|_| CeremonyError::CorruptState)?;
        let credential: RegisterPublicKeyCredential = serde_json::from_str(credential)
            .map_err(|e| CeremonyError::Verification(e.to_string()))?;
        let passkey = self
            .webauthn
            .finish_passkey_registration(&credential, &state)
            .map_err(|e| CeremonyError::Verification(e.to_string()))?;

        let mut passkeys = account
            .passkeys()
            .map_err(|_| CeremonyError::CorruptState)?;
        passkeys.push(passkey);
        let credentials = serde_json::to_string(&passkeys).map_err(StoreError::from)?;

        self.complete(username, CeremonyKind::Registration, &challenge, credentials)
            .await?;
        tracing::info!(username, "passkey registered");
        self.reload(username).await
    }

    /// Start a passkey sign-in for `username`.
    #[tracing::instrument(skip(self))]
    pub async fn begin_authentication(
        &self,
        username: &str,
    ) -> Result<RequestChallengeResponse, CeremonyError> {
        let account = accounts::find_by_username(self.db.as_ref(), username)
            .await?
            .filter(|a| a.is_active())
            .ok_or(CeremonyError::AccountNotFound)?;

        let passkeys = account
            .passkeys()
            .map_err(|_| CeremonyError::CorruptState)?;
        if passkeys.is_empty() {
            return Err(CeremonyError::AccountNotFound);
        }

        let (options, state) = self
            .webauthn
            .start_passkey_authentication(&passkeys)
            .map_err(|e| CeremonyError::Verification(e.to_string()))?;

        let challenge = serde_json::to_string(&state).map_err(StoreError::from)?;
        accounts::issue_challenge(
            self.db.as_ref(),
            username,
            CeremonyKind::Authentication,
            challenge,
        )
        .await?;

        tracing::info!(username, "authentication challenge issued");
        Ok(options)
    }

    /// Verify the assertion. Credential counters are persisted in the same
    /// conditional update that completes the ceremony.
    #[tracing::instrument(skip(self, credential))]
    pub async fn finish_authentication(
        &self,
        username: &str,
        credential: &str,
    ) -> Result<account::Model, CeremonyError> {
        let (account, challenge) = self.pending(username, CeremonyKind::Authentication).await?;
        if !account.is_active() {
            return Err(CeremonyError::AccountNotFound);
        }

        let state: PasskeyAuthentication =
            serde_json::from_str(&challenge).map_err(|_| CeremonyError::CorruptState)?;
        let credential: PublicKeyCredential = serde_json::from_str(credential)
            .map_err(|e| CeremonyError::Verification(e.to_string()))?;
        let result = self
            .webauthn
            .finish_passkey_authentication(&credential, &state)
            .map_err(|e| CeremonyError::Verification(e.to_string()))?;

        let mut passkeys = account
            .passkeys()
            .map_err(|_| CeremonyError::CorruptState)?;
        for passkey in passkeys.iter_mut() {
            passkey.update_credential(&result);
        }
        let credentials = serde_json::to_string(&passkeys).map_err(StoreError::from)?;

        self.complete(username, CeremonyKind::Authentication, &challenge, credentials)
            .await?;
        tracing::info!(username, "passkey authentication succeeded");
        self.reload(username).await
    }

    /// Account and stored challenge of an in-flight ceremony of `kind`.
    async fn pending(
        &self,
        username: &str,
        kind: CeremonyKind,
    ) -> Result<(account::Model, String), CeremonyError> {
        let Some(account) = accounts::find_by_username(self.db.as_ref(), username).await? else {
            return Err(CeremonyError::NoCeremony);
        };
        if account.ceremony_state != CeremonyState::ChallengeIssued
            || account.ceremony_kind != Some(kind)
        {
            return Err(CeremonyError::NoCeremony);
        }
        let Some(challenge) = account.ceremony_challenge.clone() else {
            return Err(CeremonyError::CorruptState);
        };
        let Some(issued_at) = account.ceremony_issued_at else {
            return Err(CeremonyError::CorruptState);
        };
        if OffsetDateTime::now_utc() >= issued_at + self.timeout {
            return Err(CeremonyError::TimedOut);
        }
        Ok((account, challenge))
    }

    async fn complete(
        &self,
        username: &str,
        kind: CeremonyKind,
        challenge: &str,
        credentials: String,
    ) -> Result<(), CeremonyError> {
        let won = accounts::complete_ceremony(
            self.db.as_ref(),
            username,
            kind,
            challenge,
            Some(credentials),
        )
        .await?;
        if !won {
            tracing::warn!(username, ?kind, "ceremony was completed or replaced concurrently");
            return Err(CeremonyError::NoCeremony);
        }
        Ok(())
    }

    async fn reload(&self, username: &str) -> Result<account::Model, CeremonyError> {
        accounts::find_by_username(self.db.as_ref(), username)
            .await?
            .ok_or(CeremonyError::AccountNotFound)
    }
}
