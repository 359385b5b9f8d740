//! Uniform `{code, message, data}` envelope for first-party account,
//! ceremony and session endpoints.
//!
//! OAuth2 protocol errors do not use this envelope; they go through the
//! protocol engine's own `{error, error_description}` writer.

use crate::error::{AccountError, CeremonyError, SessionError, StoreError};
use crate::validation::ValidationError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Result codes understood by the web frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    Error,
    AccountExists,
    AccountNotExists,
    NotLogin,
    InvalidParameter,
    NotFound,
    Unauthorized,
    Conflict,
}

impl ResultCode {
    pub fn code(self) -> i32 {
        match self {
            ResultCode::Ok => 200,
            ResultCode::Error => 500,
            ResultCode::AccountExists => 600,
            ResultCode::AccountNotExists => 601,
            ResultCode::NotLogin => 602,
            ResultCode::InvalidParameter => 603,
            ResultCode::NotFound => 404,
            ResultCode::Unauthorized => 401,
            ResultCode::Conflict => 409,
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ResultCode::Ok => StatusCode::OK,
            ResultCode::Error => StatusCode::INTERNAL_SERVER_ERROR,
            ResultCode::AccountExists | ResultCode::Conflict => StatusCode::CONFLICT,
            ResultCode::AccountNotExists | ResultCode::NotFound => StatusCode::NOT_FOUND,
            ResultCode::NotLogin | ResultCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ResultCode::InvalidParameter => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

/// Successful envelope carrying `data`.
pub fn ok<T: Serialize>(data: T) -> Response {
    (
        StatusCode::OK,
        Json(Envelope {
            code: ResultCode::Ok.code(),
            message: None,
            data: Some(data),
        }),
    )
        .into_response()
}

/// Error envelope, to be returned from handlers with `?`.
#[derive(Debug)]
pub struct ApiError {
    pub code: ResultCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(ResultCode::InvalidParameter, message)
    }

    /// Generic failure; details stay in the logs.
    pub fn internal() -> Self {
        Self::new(ResultCode::Error, "internal server error")
    }

    /// The single message every credential failure shares.
    pub fn authentication_failed() -> Self {
        Self::new(ResultCode::Unauthorized, "invalid username or credentials")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.code.status(),
            Json(Envelope::<()> {
                code: self.code.code(),
                message: Some(self.message),
                data: None,
            }),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        if e.is_infrastructure() {
            tracing::error!(error = %e, "store failure");
            return ApiError::internal();
        }
        match e {
            StoreError::NotFound => ApiError::new(ResultCode::NotFound, "not found"),
            StoreError::Unauthorized => ApiError::authentication_failed(),
            other => ApiError::new(ResultCode::Conflict, other.to_string()),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Token(t) => {
                tracing::info!(error = %t, "rejected identity token");
                ApiError::new(ResultCode::NotLogin, "please sign in again")
            }
            SessionError::Store(s) => s.into(),
            SessionError::Key(k) => {
                tracing::error!(error = %k, "identity token signing failed");
                ApiError::internal()
            }
            SessionError::Cookie(c) => {
                tracing::error!(error = %c, "identity cookie could not be built");
                ApiError::internal()
            }
        }
    }
}

impl From<CeremonyError> for ApiError {
    fn from(e: CeremonyError) -> Self {
        match e {
            CeremonyError::AccountNotFound => {
                ApiError::new(ResultCode::AccountNotExists, e.to_string())
            }
            CeremonyError::AccountExists => ApiError::new(ResultCode::AccountExists, e.to_string()),
            CeremonyError::NoCeremony | CeremonyError::TimedOut | CeremonyError::CorruptState => {
                ApiError::new(ResultCode::Conflict, e.to_string())
            }
            CeremonyError::Verification(reason) => {
                tracing::warn!(%reason, "webauthn verification failed");
                ApiError::authentication_failed()
            }
            CeremonyError::InvalidParameter(_) => {
                ApiError::new(ResultCode::InvalidParameter, e.to_string())
            }
            CeremonyError::Store(s) => s.into(),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::invalid_parameter(e.to_string())
    }
}

impl From<AccountError> for ApiError {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::AccountExists => ApiError::new(ResultCode::AccountExists, e.to_string()),
            AccountError::AuthenticationFailed => ApiError::authentication_failed(),
            AccountError::InvalidParameter(v) => v.into(),
            AccountError::Random(_) | AccountError::Hash(_) => {
                tracing::error!(error = %e, "account flow failure");
                ApiError::internal()
            }
            AccountError::Session(s) => s.into(),
            AccountError::Store(s) => s.into(),
        }
    }
}

/// Body used by the panic catcher at the top of the middleware stack.
pub fn panic_body() -> String {
    serde_json::json!({
        "code": ResultCode::Error.code(),
        "message": "internal server error",
    })
    .to_string()
}
