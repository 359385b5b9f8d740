use axum::{
    Extension,
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::ACCOUNT_TAG;
use crate::AppResources;
use crate::entity::account;
use crate::response::{self, ApiError};
use crate::session::CurrentAccount;

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(userinfo))
        .routes(routes!(signout))
}

/// Public view of an account.
#[derive(Debug, Serialize, ToSchema)]
pub struct AccountView {
    pub username: String,
    pub nickname: String,
    pub mail: String,
    /// Number of registered passkeys
    pub passkeys: usize,
    pub anonymous: bool,
}

impl From<&account::Model> for AccountView {
    fn from(account: &account::Model) -> Self {
        Self {
            username: account.username.clone(),
            nickname: account.nickname.clone(),
            mail: account.mail.clone(),
            passkeys: account.passkeys().map(|p| p.len()).unwrap_or_default(),
            anonymous: account.is_anonymous(),
        }
    }
}

/// Who the browser is signed in as.
#[tracing::instrument(skip_all)]
#[utoipa::path(
    get,
    path = "/userinfo",
    tag = ACCOUNT_TAG,
    operation_id = "Account Info",
    summary = "Account behind the identity cookie, or the anonymous account",
    responses(
        (status = 200, description = "Account view", body = AccountView),
        (status = 401, description = "Identity token is corrupt"),
    )
)]
pub async fn userinfo(CurrentAccount(account): CurrentAccount) -> Response {
    response::ok(AccountView::from(&account))
}

/// End the current session and clear the identity cookie.
#[tracing::instrument(skip_all)]
#[utoipa::path(
    post,
    path = "/signout",
    tag = ACCOUNT_TAG,
    operation_id = "Sign Out",
    summary = "Sign out",
    responses((status = 200, description = "Cookie cleared"))
)]
pub async fn signout(
    Extension(resources): Extension<AppResources>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let bridge = resources.session_bridge();
    bridge.end_session(&headers).await?;
    let cookie = bridge.clear_cookie_header()?;
    Ok(([(header::SET_COOKIE, cookie)], response::ok(())).into_response())
}
