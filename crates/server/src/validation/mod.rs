//! Input validation shared by the account, ceremony and OAuth2 flows.

pub mod return_url;
pub mod username;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("username must not be empty")]
    EmptyUsername,
    #[error("username is too long")]
    UsernameTooLong,
    #[error("username contains invalid characters")]
    InvalidUsernameCharacter,
    #[error("username is reserved")]
    ReservedUsername,
    #[error("not a valid email address")]
    InvalidEmail,
    #[error("password must be between {min} and {max} characters")]
    PasswordLength { min: usize, max: usize },
    #[error("return url is not valid base64url")]
    ReturnUrlEncoding,
    #[error("return url must be an absolute http(s) url")]
    ReturnUrlNotAbsolute,
    #[error("return url points to a foreign origin")]
    ReturnUrlForeignOrigin,
}
