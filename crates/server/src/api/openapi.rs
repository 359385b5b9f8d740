//! OpenAPI/Utoipa configuration.

use crate::account::ACCOUNT_TAG;
use crate::api::health::MISC_TAG;
use crate::ceremony::WEBAUTHN_TAG;
use crate::oauth2::OAUTH2_TAG;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{
        ApiKey, ApiKeyValue, AuthorizationCode, Flow, HttpAuthScheme, HttpBuilder, OAuth2, Scopes,
        SecurityScheme,
    },
};

/// Security schemes for the OpenAPI document.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    #[tracing::instrument(skip(self, openapi))]
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            // Identity cookie set by the sign-in endpoints
            components.add_security_scheme(
                "IdentityCookie",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new("Portal-Authorization"))),
            );

            let basic = HttpBuilder::new()
                .scheme(HttpAuthScheme::Basic)
                .description(Some("OAuth2 client id and secret"))
                .build();
            components.add_security_scheme("ClientBasic", SecurityScheme::Http(basic));

            let oauth2 = OAuth2::new([Flow::AuthorizationCode(AuthorizationCode::new(
                "/oauth2/auth",
                "/oauth2/token",
                Scopes::from_iter([
                    ("openid", "OpenID Connect scope"),
                    ("email", "Access to user email"),
                    ("profile", "Access to user profile"),
                ]),
            ))]);
            components.add_security_scheme("OAuth2", SecurityScheme::OAuth2(oauth2));
        }
    }
}

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "Portal Gateway API",
        version = "1.0.0",
        description = "OAuth2 / OpenID Connect provider with password, email-code and WebAuthn sign-in."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = OAUTH2_TAG, description = "OAuth2 and OpenID Connect endpoints"),
        (name = ACCOUNT_TAG, description = "Password and email-code accounts"),
        (name = WEBAUTHN_TAG, description = "Passkey registration and sign-in")
    )
)]
pub struct ApiDoc;
