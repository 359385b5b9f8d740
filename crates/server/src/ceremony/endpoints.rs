//! HTTP surface of the WebAuthn ceremonies.

use axum::{
    Extension, Form,
    extract::{Path, Query},
    http::header,
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

use super::WEBAUTHN_TAG;
use crate::AppResources;
use crate::entity::session::SessionKind;
use crate::response::{self, ApiError};
use crate::session::CurrentAccount;
use crate::validation::username::normalize_username;

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(signup_begin))
        .routes(routes!(signup_finish))
        .routes(routes!(signin_begin))
        .routes(routes!(signin_finish))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CeremonyOptions {
    /// Username the ceremony runs for; echo it on finish
    pub session: String,
    /// `PublicKeyCredentialCreationOptions` / `PublicKeyCredentialRequestOptions`
    /// wrapped in `publicKey`, ready for `navigator.credentials`
    #[schema(value_type = Object)]
    pub options: serde_json::Value,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FinishRequest {
    /// JSON-encoded credential returned by the authenticator
    #[serde(rename = "verifyData")]
    pub verify_data: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReturnQuery {
    /// Base64url-encoded URL to return to after signing in
    pub source: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisteredAccount {
    pub username: String,
    pub passkeys: usize,
}

fn options_json<T: Serialize>(username: String, options: &T) -> Result<Response, ApiError> {
    let options = serde_json::to_value(options).map_err(|e| {
        tracing::error!(error = %e, "failed to serialize ceremony options");
        ApiError::internal()
    })?;
    Ok(response::ok(CeremonyOptions {
        session: username,
        options,
    }))
}

/// Begin passkey registration.
#[tracing::instrument(skip(resources, current))]
#[utoipa::path(
    post,
    path = "/signup/webauthn/begin/{username}",
    tag = WEBAUTHN_TAG,
    operation_id = "WebAuthn Registration Begin",
    summary = "Start registering a passkey",
    description = "Creates the account when it does not exist yet and returns credential creation \
                   options. An account that can already sign in only accepts a new passkey from a \
                   browser signed in as that account.",
    params(("username" = String, Path, description = "Account username, usually an email address")),
    responses(
        (status = 200, description = "Creation options", body = CeremonyOptions),
        (status = 409, description = "Account already exists (code 600)"),
        (status = 400, description = "Invalid username (code 603)"),
    )
)]
pub async fn signup_begin(
    Extension(resources): Extension<AppResources>,
    CurrentAccount(current): CurrentAccount,
    Path(username): Path<String>,
) -> Result<Response, ApiError> {
    let username = normalize_username(&username);
    let allow_existing = !current.is_anonymous() && current.username == username;
    let options = resources
        .ceremonies()
        .begin_registration(&username, allow_existing)
        .await?;
    options_json(username, &options)
}

/// Finish passkey registration.
#[tracing::instrument(skip(resources, form))]
#[utoipa::path(
    post,
    path = "/signup/webauthn/finish/{username}",
    tag = WEBAUTHN_TAG,
    operation_id = "WebAuthn Registration Finish",
    summary = "Verify the new passkey and sign in",
    params(("username" = String, Path, description = "Account username")),
    request_body(
        content = FinishRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Authenticator attestation"
    ),
    responses(
        (status = 200, description = "Passkey stored, identity cookie set", body = RegisteredAccount),
        (status = 401, description = "Attestation did not verify"),
        (status = 409, description = "No ceremony in progress, or it timed out"),
    )
)]
pub async fn signup_finish(
    Extension(resources): Extension<AppResources>,
    Path(username): Path<String>,
    Form(form): Form<FinishRequest>,
) -> Result<Response, ApiError> {
    let username = normalize_username(&username);
    let account = resources
        .ceremonies()
        .finish_registration(&username, &form.verify_data)
        .await?;

    let bridge = resources.session_bridge();
    let issued = bridge.issue(&account.username, SessionKind::Webauthn).await?;
    let cookie = bridge.cookie_header(&issued.token)?;

    let passkeys = account.passkeys().map(|p| p.len()).unwrap_or_default();
    Ok((
        [(header::SET_COOKIE, cookie)],
        response::ok(RegisteredAccount {
            username: account.username,
            passkeys,
        }),
    )
        .into_response())
}

/// Begin passkey sign-in.
#[tracing::instrument(skip(resources))]
#[utoipa::path(
    post,
    path = "/signin/webauthn/begin/{username}",
    tag = WEBAUTHN_TAG,
    operation_id = "WebAuthn Authentication Begin",
    summary = "Start a passkey sign-in",
    params(("username" = String, Path, description = "Account username")),
    responses(
        (status = 200, description = "Request options", body = CeremonyOptions),
        (status = 404, description = "Account does not exist (code 601)"),
    )
)]
pub async fn signin_begin(
    Extension(resources): Extension<AppResources>,
    Path(username): Path<String>,
) -> Result<Response, ApiError> {
    let username = normalize_username(&username);
    let options = resources
        .ceremonies()
        .begin_authentication(&username)
        .await?;
    options_json(username, &options)
}

/// Finish passkey sign-in.
#[tracing::instrument(skip(resources, form))]
#[utoipa::path(
    post,
    path = "/signin/webauthn/finish/{username}",
    tag = WEBAUTHN_TAG,
    operation_id = "WebAuthn Authentication Finish",
    summary = "Verify the assertion, set the identity cookie and return",
    params(
        ("username" = String, Path, description = "Account username"),
        ReturnQuery,
    ),
    request_body(
        content = FinishRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Authenticator assertion"
    ),
    responses(
        (status = 303, description = "Signed in; redirect to the decoded `source`"),
        (status = 400, description = "`source` is not an allowed return URL (code 603)"),
        (status = 401, description = "Assertion did not verify"),
        (status = 409, description = "No ceremony in progress, or it timed out"),
    )
)]
pub async fn signin_finish(
    Extension(resources): Extension<AppResources>,
    Path(username): Path<String>,
    Query(query): Query<ReturnQuery>,
    Form(form): Form<FinishRequest>,
) -> Result<Response, ApiError> {
    let username = normalize_username(&username);
    // Checked before the ceremony so a bad link does not burn the challenge.
    let target = resources.return_target(query.source.as_deref())?;

    let account = resources
        .ceremonies()
        .finish_authentication(&username, &form.verify_data)
        .await?;

    let bridge = resources.session_bridge();
    let issued = bridge.issue(&account.username, SessionKind::Webauthn).await?;
    let cookie = bridge.cookie_header(&issued.token)?;

    Ok(([(header::SET_COOKIE, cookie)], Redirect::to(&target)).into_response())
}
