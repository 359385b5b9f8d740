//! First-party account endpoints: password and email-code sign-up/sign-in,
//! plus the profile and sign-out helpers the web frontend calls.

pub mod email;
pub mod password;
pub mod profile;

use utoipa_axum::router::OpenApiRouter;

pub const ACCOUNT_TAG: &str = "Account";

/// Everything mounted under `/account`.
pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .merge(password::router())
        .merge(email::router())
        .merge(profile::router())
        .merge(crate::ceremony::endpoints::router())
}
