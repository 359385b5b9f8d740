//! Password sign-up and sign-in.

use axum::{
    Extension, Form,
    extract::Query,
    http::header,
    response::{IntoResponse, Redirect, Response},
};
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::ACCOUNT_TAG;
use crate::AppResources;
use crate::ceremony::endpoints::ReturnQuery;
use crate::crypto::{hash_password, verify_password};
use crate::entity::account::{self, display_name_for};
use crate::entity::session::SessionKind;
use crate::error::AccountError;
use crate::response::ApiError;
use crate::store::accounts::{self, NewAccount};
use crate::validation::username::{normalize_username, validate_password, validate_username};

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(signup_finish))
        .routes(routes!(signin_finish))
}

#[derive(Deserialize, ToSchema)]
pub struct PasswordForm {
    pub username: String,
    pub password: String,
    /// Display name; defaults to the local part of the username
    pub nickname: Option<String>,
}

impl std::fmt::Debug for PasswordForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordForm")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Create a password account. An account row left behind by an abandoned
/// passkey registration is claimed instead; any other existing row is a
/// conflict.
pub async fn signup_with_password(
    db: &DatabaseConnection,
    username: &str,
    password: &str,
    nickname: Option<&str>,
) -> Result<account::Model, AccountError> {
    validate_username(username)?;
    validate_password(password)?;
    let hash = hash_password(password).map_err(|e| AccountError::Hash(e.to_string()))?;

    match accounts::find_by_username(db, username).await? {
        Some(existing) if !existing.is_abandoned_registration() => {
            Err(AccountError::AccountExists)
        }
        Some(_) => {
            if !accounts::claim_with_password(db, username, &hash).await? {
                return Err(AccountError::AccountExists);
            }
            accounts::find_by_username(db, username)
                .await?
                .ok_or(AccountError::AuthenticationFailed)
        }
        None => {
            let nickname = nickname
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(String::from)
                .unwrap_or_else(|| display_name_for(username));
            let mail = if username.contains('@') {
                username.to_string()
            } else {
                String::new()
            };
            Ok(accounts::insert_account(
                db,
                NewAccount {
                    username: username.to_string(),
                    password: Some(hash),
                    nickname,
                    mail,
                    mail_verified: false,
                },
            )
            .await?)
        }
    }
}

/// Check a username/password pair. Every failure is the same error.
pub async fn signin_with_password(
    db: &DatabaseConnection,
    username: &str,
    password: &str,
) -> Result<account::Model, AccountError> {
    let account = accounts::find_by_username(db, username).await?;
    match account {
        Some(account)
            if account.is_active()
                && account
                    .password
                    .as_deref()
                    .is_some_and(|hash| verify_password(password, hash)) =>
        {
            Ok(account)
        }
        _ => {
            tracing::info!(username, "password sign-in rejected");
            Err(AccountError::AuthenticationFailed)
        }
    }
}

/// Issue the identity cookie for `account` and send the browser to `target`.
async fn signed_in_redirect(
    resources: &AppResources,
    account: &account::Model,
    target: &str,
) -> Result<Response, ApiError> {
    let bridge = resources.session_bridge();
    let issued = bridge.issue(&account.username, SessionKind::Password).await?;
    let cookie = bridge.cookie_header(&issued.token)?;
    Ok(([(header::SET_COOKIE, cookie)], Redirect::to(target)).into_response())
}

/// Password sign-up.
#[tracing::instrument(skip(resources, form))]
#[utoipa::path(
    post,
    path = "/signup/password/finish",
    tag = ACCOUNT_TAG,
    operation_id = "Password Sign-up",
    summary = "Create a password account and sign in",
    params(ReturnQuery),
    request_body(
        content = PasswordForm,
        content_type = "application/x-www-form-urlencoded",
        description = "Username, password and optional nickname"
    ),
    responses(
        (status = 303, description = "Account created; identity cookie set, redirect to `source`"),
        (status = 400, description = "Invalid username, password or `source` (code 603)"),
        (status = 409, description = "Account already exists (code 600)"),
    )
)]
pub async fn signup_finish(
    Extension(resources): Extension<AppResources>,
    Query(query): Query<ReturnQuery>,
    Form(form): Form<PasswordForm>,
) -> Result<Response, ApiError> {
    let target = resources.return_target(query.source.as_deref())?;
    let username = normalize_username(&form.username);
    let account = signup_with_password(
        resources.db.as_ref(),
        &username,
        &form.password,
        form.nickname.as_deref(),
    )
    .await?;
    tracing::info!(username = %account.username, "password account created");
    signed_in_redirect(&resources, &account, &target).await
}

/// Password sign-in.
#[tracing::instrument(skip(resources, form))]
#[utoipa::path(
    post,
    path = "/signin/password/finish",
    tag = ACCOUNT_TAG,
    operation_id = "Password Sign-in",
    summary = "Sign in with a password",
    params(ReturnQuery),
    request_body(
        content = PasswordForm,
        content_type = "application/x-www-form-urlencoded",
        description = "Username and password"
    ),
    responses(
        (status = 303, description = "Signed in; identity cookie set, redirect to `source`"),
        (status = 400, description = "`source` is not an allowed return URL (code 603)"),
        (status = 401, description = "Invalid username or credentials"),
    )
)]
pub async fn signin_finish(
    Extension(resources): Extension<AppResources>,
    Query(query): Query<ReturnQuery>,
    Form(form): Form<PasswordForm>,
) -> Result<Response, ApiError> {
    let target = resources.return_target(query.source.as_deref())?;
    let username = normalize_username(&form.username);
    let account = signin_with_password(resources.db.as_ref(), &username, &form.password).await?;
    signed_in_redirect(&resources, &account, &target).await
}
