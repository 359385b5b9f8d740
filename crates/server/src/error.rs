use sea_orm::DbErr;
use thiserror::Error;

/// Closed set of rejection reasons a store lookup can produce.
///
/// Callers branch on these instead of inspecting error strings: a reused
/// code is `Invalidated`, a code that never existed is `NotFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Invalidated,
    Expired,
    Inactive,
    Unauthorized,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Invalidated => "invalidated",
            ErrorKind::Expired => "expired",
            ErrorKind::Inactive => "inactive",
            ErrorKind::Unauthorized => "unauthorized",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    /// The authorization code was already exchanged or explicitly invalidated.
    #[error("authorization code has been invalidated")]
    Invalidated { request_id: String },
    #[error("record has expired")]
    Expired,
    #[error("token is inactive")]
    Inactive,
    #[error("client authentication failed")]
    Unauthorized,
    #[error("JWT ID {0} has already been used")]
    JtiKnown(String),
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error("Stored payload is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl StoreError {
    /// Rejection kind, `None` for infrastructure failures.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            StoreError::NotFound => Some(ErrorKind::NotFound),
            StoreError::Invalidated { .. } | StoreError::JtiKnown(_) => {
                Some(ErrorKind::Invalidated)
            }
            StoreError::Expired => Some(ErrorKind::Expired),
            StoreError::Inactive => Some(ErrorKind::Inactive),
            StoreError::Unauthorized => Some(ErrorKind::Unauthorized),
            StoreError::Database(_) | StoreError::Corrupt(_) => None,
        }
    }

    pub fn is_infrastructure(&self) -> bool {
        self.kind().is_none()
    }
}

/// Failures while loading the signing keypair or signing a token.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Private key is not a valid PKCS#1/PKCS#8 RSA PEM: {0}")]
    PrivateKey(String),
    #[error("Public key is not a valid RSA PEM: {0}")]
    PublicKey(String),
    #[error("Public key does not belong to the private key")]
    Mismatch,
    #[error("Signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Verification outcome for identity tokens.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("identity token has expired")]
    Expired,
    #[error("identity token is invalid: {0}")]
    Invalid(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid(e.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("cookie could not be encoded: {0}")]
    Cookie(#[from] axum::http::header::InvalidHeaderValue),
}

impl From<DbErr> for SessionError {
    fn from(e: DbErr) -> Self {
        SessionError::Store(StoreError::Database(e))
    }
}

#[derive(Debug, Error)]
pub enum CeremonyError {
    #[error("account not found")]
    AccountNotFound,
    #[error("account already exists")]
    AccountExists,
    #[error("no ceremony in progress")]
    NoCeremony,
    #[error("ceremony has timed out, start again")]
    TimedOut,
    #[error("ceremony state is corrupt, start again")]
    CorruptState,
    #[error("credential verification failed: {0}")]
    Verification(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<DbErr> for CeremonyError {
    fn from(e: DbErr) -> Self {
        CeremonyError::Store(StoreError::Database(e))
    }
}

impl From<crate::validation::ValidationError> for CeremonyError {
    fn from(e: crate::validation::ValidationError) -> Self {
        CeremonyError::InvalidParameter(e.to_string())
    }
}

/// Password and email-code sign-up / sign-in failures.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("account already exists")]
    AccountExists,
    /// Wrong password, wrong or expired code, unknown or disabled account.
    /// Deliberately a single variant.
    #[error("invalid username or credentials")]
    AuthenticationFailed,
    #[error(transparent)]
    InvalidParameter(#[from] crate::validation::ValidationError),
    #[error("random source failure: {0}")]
    Random(#[from] getrandom::Error),
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<DbErr> for AccountError {
    fn from(e: DbErr) -> Self {
        AccountError::Store(StoreError::Database(e))
    }
}
