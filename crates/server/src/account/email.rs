//! Email one-time-code sign-up and sign-in.
//!
//! Begin stores a six digit code on a `signup`/`signin` session row and
//! hands back the row id. Delivering the code is somebody else's job; it is
//! never returned or logged here. Finish consumes the row exactly once: a
//! wrong code burns it as well, so every attempt needs a fresh begin.

use axum::{
    Extension, Form,
    http::header,
    response::{IntoResponse, Response},
};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::ACCOUNT_TAG;
use crate::AppResources;
use crate::crypto::generate_email_code;
use crate::entity::account::{self, display_name_for};
use crate::entity::session::SessionKind;
use crate::error::AccountError;
use crate::response::{self, ApiError};
use crate::store::{
    accounts::{self, NewAccount},
    sessions::{self, NewSession},
};
use crate::validation::username::{normalize_username, validate_email};

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(signup_begin))
        .routes(routes!(signup_finish))
        .routes(routes!(signin_begin))
        .routes(routes!(signin_finish))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EmailBeginForm {
    /// Email address the code is sent to
    pub username: String,
}

#[derive(Deserialize, ToSchema)]
pub struct EmailFinishForm {
    /// Session id returned by the begin call
    pub session: String,
    /// Six digit code
    pub code: String,
    /// Display name for a new account (sign-up only)
    pub nickname: Option<String>,
}

impl std::fmt::Debug for EmailFinishForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailFinishForm")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PendingCode {
    pub session: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Authorization {
    /// Identity token, also set as the identity cookie
    pub authorization: String,
}

/// A code waiting to be confirmed. `code` goes to the mailer, `session` to
/// the browser.
#[derive(Debug, Clone)]
pub struct IssuedCode {
    pub session: String,
    pub code: String,
}

/// Store a fresh code for `username`. Known and unknown addresses are
/// treated the same.
pub async fn begin(
    db: &DatabaseConnection,
    kind: SessionKind,
    username: &str,
) -> Result<IssuedCode, AccountError> {
    validate_email(username)?;
    let code = generate_email_code()?;

    let mut new = NewSession::new(username, kind);
    new.code = Some(code.clone());
    let row = sessions::insert_session(db, new).await?;
    tracing::info!(username, kind = ?kind, session = %row.pk, "email code issued");
    Ok(IssuedCode {
        session: row.pk,
        code,
    })
}

/// Consume the pending code and return the account it proves control of.
pub async fn finish(
    db: &DatabaseConnection,
    kind: SessionKind,
    session_id: &str,
    code: &str,
    nickname: Option<&str>,
    lifetime_secs: i64,
) -> Result<account::Model, AccountError> {
    let Some(row) = sessions::find_by_id(db, session_id).await? else {
        return Err(AccountError::AuthenticationFailed);
    };
    if row.kind != kind {
        return Err(AccountError::AuthenticationFailed);
    }
    if row.is_code_expired(lifetime_secs) {
        sessions::delete_session(db, &row.pk).await?;
        tracing::info!(username = %row.username, "email code expired");
        return Err(AccountError::AuthenticationFailed);
    }
    if !sessions::consume_code(db, &row.pk, kind, code.trim()).await? {
        sessions::delete_session(db, &row.pk).await?;
        tracing::info!(username = %row.username, "email code rejected");
        return Err(AccountError::AuthenticationFailed);
    }

    let existing = accounts::find_by_username(db, &row.username).await?;
    match kind {
        SessionKind::Signup => {
            let nickname = nickname
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(String::from)
                .unwrap_or_else(|| display_name_for(&row.username));
            match existing {
                Some(existing) if !existing.is_abandoned_registration() => {
                    Err(AccountError::AccountExists)
                }
                Some(_) => {
                    if !accounts::claim_with_mail(db, &row.username, &nickname).await? {
                        return Err(AccountError::AccountExists);
                    }
                    tracing::info!(username = %row.username, "abandoned registration claimed by email");
                    accounts::find_by_username(db, &row.username)
                        .await?
                        .ok_or(AccountError::AuthenticationFailed)
                }
                None => {
                    let account = accounts::insert_account(
                        db,
                        NewAccount {
                            username: row.username.clone(),
                            password: None,
                            nickname,
                            mail: row.username.clone(),
                            mail_verified: true,
                        },
                    )
                    .await?;
                    tracing::info!(username = %account.username, "email account created");
                    Ok(account)
                }
            }
        }
        _ => match existing {
            Some(account) if account.is_active() => Ok(account),
            _ => {
                tracing::info!(username = %row.username, "email sign-in for unknown or disabled account");
                Err(AccountError::AuthenticationFailed)
            }
        },
    }
}

async fn authorized(resources: &AppResources, account: &account::Model) -> Result<Response, ApiError> {
    let bridge = resources.session_bridge();
    let issued = bridge.issue(&account.username, SessionKind::Auth).await?;
    let cookie = bridge.cookie_header(&issued.token)?;
    Ok((
        [(header::SET_COOKIE, cookie)],
        response::ok(Authorization {
            authorization: issued.token,
        }),
    )
        .into_response())
}

fn pending(issued: IssuedCode) -> Response {
    response::ok(PendingCode {
        session: issued.session,
    })
}

#[tracing::instrument(skip(resources, form))]
#[utoipa::path(
    post,
    path = "/signup/email/begin",
    tag = ACCOUNT_TAG,
    operation_id = "Email Sign-up Begin",
    summary = "Issue a sign-up code for an email address",
    request_body(content = EmailBeginForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Code issued", body = PendingCode),
        (status = 400, description = "Not an email address (code 603)"),
    )
)]
pub async fn signup_begin(
    Extension(resources): Extension<AppResources>,
    Form(form): Form<EmailBeginForm>,
) -> Result<Response, ApiError> {
    let username = normalize_username(&form.username);
    let issued = begin(resources.db.as_ref(), SessionKind::Signup, &username).await?;
    Ok(pending(issued))
}

#[tracing::instrument(skip(resources, form))]
#[utoipa::path(
    post,
    path = "/signup/email/finish",
    tag = ACCOUNT_TAG,
    operation_id = "Email Sign-up Finish",
    summary = "Confirm the code, create the account and sign in",
    request_body(content = EmailFinishForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Account created, identity cookie set", body = Authorization),
        (status = 401, description = "Invalid username or credentials"),
        (status = 409, description = "Account already exists (code 600)"),
    )
)]
pub async fn signup_finish(
    Extension(resources): Extension<AppResources>,
    Form(form): Form<EmailFinishForm>,
) -> Result<Response, ApiError> {
    let account = finish(
        resources.db.as_ref(),
        SessionKind::Signup,
        &form.session,
        &form.code,
        form.nickname.as_deref(),
        resources.config.tokens.email_code_lifetime,
    )
    .await?;
    authorized(&resources, &account).await
}

#[tracing::instrument(skip(resources, form))]
#[utoipa::path(
    post,
    path = "/signin/email/begin",
    tag = ACCOUNT_TAG,
    operation_id = "Email Sign-in Begin",
    summary = "Issue a sign-in code for an email address",
    request_body(content = EmailBeginForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Code issued", body = PendingCode),
        (status = 400, description = "Not an email address (code 603)"),
    )
)]
pub async fn signin_begin(
    Extension(resources): Extension<AppResources>,
    Form(form): Form<EmailBeginForm>,
) -> Result<Response, ApiError> {
    let username = normalize_username(&form.username);
    let issued = begin(resources.db.as_ref(), SessionKind::Signin, &username).await?;
    Ok(pending(issued))
}

#[tracing::instrument(skip(resources, form))]
#[utoipa::path(
    post,
    path = "/signin/email/finish",
    tag = ACCOUNT_TAG,
    operation_id = "Email Sign-in Finish",
    summary = "Confirm the code and sign in",
    request_body(content = EmailFinishForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Identity cookie set", body = Authorization),
        (status = 401, description = "Invalid username or credentials"),
    )
)]
pub async fn signin_finish(
    Extension(resources): Extension<AppResources>,
    Form(form): Form<EmailFinishForm>,
) -> Result<Response, ApiError> {
    let account = finish(
        resources.db.as_ref(),
        SessionKind::Signin,
        &form.session,
        &form.code,
        None,
        resources.config.tokens.email_code_lifetime,
    )
    .await?;
    authorized(&resources, &account).await
}
