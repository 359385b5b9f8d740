use super::ValidationError;
use crate::entity::account::ANONYMOUS_USERNAME;

pub const MAX_USERNAME_LEN: usize = 254;
pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;

/// Usernames are case-folded and trimmed before lookup or storage.
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

/// Accepts usernames for the password and WebAuthn flows. Email addresses
/// are valid usernames; whitespace, control and separator characters are not.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username.is_empty() {
        return Err(ValidationError::EmptyUsername);
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(ValidationError::UsernameTooLong);
    }
    if username == ANONYMOUS_USERNAME {
        return Err(ValidationError::ReservedUsername);
    }
    for c in username.chars() {
        if c.is_whitespace() || c.is_control() || matches!(c, '/' | '\\' | ':' | ';' | ',') {
            return Err(ValidationError::InvalidUsernameCharacter);
        }
    }
    Ok(())
}

/// Structural email check: one `@`, non-empty local part, dotted domain.
pub fn validate_email(address: &str) -> Result<(), ValidationError> {
    validate_username(address)?;

    let Some((local, domain)) = address.split_once('@') else {
        return Err(ValidationError::InvalidEmail);
    };
    if local.is_empty() || domain.contains('@') || local.len() > 64 {
        return Err(ValidationError::InvalidEmail);
    }
    if domain.len() < 3
        || !domain.contains('.')
        || domain.starts_with(['.', '-'])
        || domain.ends_with(['.', '-'])
        || domain.contains("..")
    {
        return Err(ValidationError::InvalidEmail);
    }
    if !domain
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    let len = password.chars().count();
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
        return Err(ValidationError::PasswordLength {
            min: MIN_PASSWORD_LEN,
            max: MAX_PASSWORD_LEN,
        });
    }
    Ok(())
}
