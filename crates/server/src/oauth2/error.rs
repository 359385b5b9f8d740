//! RFC 6749 error responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::{KeyError, StoreError};

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

/// A protocol error. Rendered as `{error, error_description}` or, once the
/// redirect URI is trusted, appended to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuth2Error {
    pub status: StatusCode,
    pub error: &'static str,
    pub description: Option<String>,
}

impl OAuth2Error {
    fn new(status: StatusCode, error: &'static str, description: impl Into<String>) -> Self {
        Self {
            status,
            error,
            description: Some(description.into()),
        }
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", description)
    }

    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "invalid_client", description)
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_grant", description)
    }

    pub fn unauthorized_client(description: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "unauthorized_client", description)
    }

    pub fn unsupported_grant_type(description: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "unsupported_grant_type", description)
    }

    pub fn unsupported_response_type(description: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "unsupported_response_type",
            description,
        )
    }

    pub fn invalid_scope(description: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_scope", description)
    }

    pub fn access_denied(description: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "access_denied", description)
    }

    pub fn invalid_token(description: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "invalid_token", description)
    }

    /// Details stay in the logs.
    pub fn server_error() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: "server_error",
            description: None,
        }
    }

    /// Send the error back to a redirect URI that has already been checked
    /// against the client registration.
    pub fn redirect(self, redirect_uri: &str, state: Option<&str>) -> Response {
        let Ok(mut url) = url::Url::parse(redirect_uri) else {
            return self.into_response();
        };
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("error", self.error);
            if let Some(description) = &self.description {
                pairs.append_pair("error_description", description);
            }
            if let Some(state) = state {
                pairs.append_pair("state", state);
            }
        }
        Redirect::to(url.as_str()).into_response()
    }
}

impl IntoResponse for OAuth2Error {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.error.to_string(),
                error_description: self.description,
            }),
        )
            .into_response()
    }
}

/// Infrastructure failures only; rejections are mapped where they happen.
impl From<StoreError> for OAuth2Error {
    fn from(e: StoreError) -> Self {
        if e.is_infrastructure() {
            tracing::error!(error = %e, "oauth2 store failure");
            return OAuth2Error::server_error();
        }
        match e {
            StoreError::Unauthorized => OAuth2Error::invalid_client("client authentication failed"),
            StoreError::NotFound => OAuth2Error::invalid_grant("grant not found"),
            StoreError::Invalidated { .. } => {
                OAuth2Error::invalid_grant("authorization code has already been used")
            }
            StoreError::Expired => OAuth2Error::invalid_grant("grant has expired"),
            StoreError::Inactive => OAuth2Error::invalid_grant("token is no longer active"),
            StoreError::JtiKnown(_) => {
                OAuth2Error::invalid_client("client assertion has already been used")
            }
            other => {
                tracing::error!(error = %other, "unexpected oauth2 store rejection");
                OAuth2Error::server_error()
            }
        }
    }
}

impl From<sea_orm::DbErr> for OAuth2Error {
    fn from(e: sea_orm::DbErr) -> Self {
        StoreError::Database(e).into()
    }
}

impl From<KeyError> for OAuth2Error {
    fn from(e: KeyError) -> Self {
        tracing::error!(error = %e, "id token signing failed");
        OAuth2Error::server_error()
    }
}

impl From<getrandom::Error> for OAuth2Error {
    fn from(e: getrandom::Error) -> Self {
        tracing::error!(error = %e, "random source failure");
        OAuth2Error::server_error()
    }
}
