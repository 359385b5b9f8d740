use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// PEM-encoded RSA keypair used to sign identity tokens.
#[derive(Clone, Deserialize)]
pub struct KeysConfig {
    pub private_key: String,
    pub public_key: String,
}

impl std::fmt::Debug for KeysConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeysConfig")
            .field("private_key", &"<redacted>")
            .field("public_key_len", &self.public_key.len())
            .finish()
    }
}

/// Lifetimes, all in seconds.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_identity_token_lifetime")]
    pub identity_token_lifetime: i64,
    #[serde(default = "default_access_token_lifetime")]
    pub access_token_lifetime: i64,
    #[serde(default = "default_refresh_token_lifetime")]
    pub refresh_token_lifetime: i64,
    #[serde(default = "default_authorization_code_lifetime")]
    pub authorization_code_lifetime: i64,
    #[serde(default = "default_email_code_lifetime")]
    pub email_code_lifetime: i64,
    #[serde(default = "default_ceremony_timeout")]
    pub ceremony_timeout: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            identity_token_lifetime: default_identity_token_lifetime(),
            access_token_lifetime: default_access_token_lifetime(),
            refresh_token_lifetime: default_refresh_token_lifetime(),
            authorization_code_lifetime: default_authorization_code_lifetime(),
            email_code_lifetime: default_email_code_lifetime(),
            ceremony_timeout: default_ceremony_timeout(),
        }
    }
}

fn default_identity_token_lifetime() -> i64 {
    72 * 3600
}

fn default_access_token_lifetime() -> i64 {
    3600
}

fn default_refresh_token_lifetime() -> i64 {
    30 * 86400
}

fn default_authorization_code_lifetime() -> i64 {
    600
}

fn default_email_code_lifetime() -> i64 {
    600
}

fn default_ceremony_timeout() -> i64 {
    300
}

/// Identity cookie settings.
#[derive(Clone, Debug, Deserialize)]
pub struct CookieConfig {
    #[serde(default = "default_cookie_name")]
    pub name: String,
    /// Seconds. Must stay within 48h..=72h.
    #[serde(default = "default_cookie_max_age")]
    pub max_age: i64,
    #[serde(default = "default_true")]
    pub secure: bool,
    #[serde(default)]
    pub domain: Option<String>,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: default_cookie_name(),
            max_age: default_cookie_max_age(),
            secure: true,
            domain: None,
        }
    }
}

pub const MIN_COOKIE_MAX_AGE: i64 = 48 * 3600;
pub const MAX_COOKIE_MAX_AGE: i64 = 72 * 3600;

fn default_cookie_name() -> String {
    "Portal-Authorization".to_string()
}

fn default_cookie_max_age() -> i64 {
    MAX_COOKIE_MAX_AGE
}

fn default_true() -> bool {
    true
}

/// WebAuthn relying party.
#[derive(Clone, Debug, Deserialize)]
pub struct WebauthnConfig {
    pub rp_id: String,
    pub rp_origin: String,
    #[serde(default = "default_rp_name")]
    pub rp_name: String,
}

fn default_rp_name() -> String {
    "Portal".to_string()
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Issuer placed in every identity token and the discovery document.
    pub issuer_url: String,
    /// Public base URL of this service.
    pub self_url: String,
    /// Base URL of the first-party web frontend hosting the sign-in pages.
    pub web_url: String,
    pub keys: KeysConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub cookie: CookieConfig,
    pub webauthn: WebauthnConfig,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl AppConfig {
    /// Checks the invariants the server relies on and normalizes base URLs.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Validation("database_url must be set".into()));
        }

        self.issuer_url = normalize_base_url("issuer_url", &self.issuer_url)?;
        self.self_url = normalize_base_url("self_url", &self.self_url)?;
        self.web_url = normalize_base_url("web_url", &self.web_url)?;

        if self.keys.private_key.trim().is_empty() {
            return Err(ConfigError::Validation("keys.private_key must be set".into()));
        }
        if self.keys.public_key.trim().is_empty() {
            return Err(ConfigError::Validation("keys.public_key must be set".into()));
        }

        let lifetimes = [
            ("identity_token_lifetime", self.tokens.identity_token_lifetime),
            ("access_token_lifetime", self.tokens.access_token_lifetime),
            ("refresh_token_lifetime", self.tokens.refresh_token_lifetime),
            (
                "authorization_code_lifetime",
                self.tokens.authorization_code_lifetime,
            ),
            ("email_code_lifetime", self.tokens.email_code_lifetime),
            ("ceremony_timeout", self.tokens.ceremony_timeout),
        ];
        for (name, value) in lifetimes {
            if value <= 0 {
                return Err(ConfigError::Validation(format!(
                    "tokens.{name} must be > 0"
                )));
            }
        }

        if !(MIN_COOKIE_MAX_AGE..=MAX_COOKIE_MAX_AGE).contains(&self.cookie.max_age) {
            return Err(ConfigError::Validation(format!(
                "cookie.max_age must be between {MIN_COOKIE_MAX_AGE} and {MAX_COOKIE_MAX_AGE} seconds"
            )));
        }
        if self.cookie.name.is_empty()
            || self
                .cookie
                .name
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, ';' | ',' | '='))
        {
            return Err(ConfigError::Validation(
                "cookie.name must be a valid cookie token".into(),
            ));
        }

        if self.webauthn.rp_id.is_empty() {
            return Err(ConfigError::Validation("webauthn.rp_id must be set".into()));
        }
        url::Url::parse(&self.webauthn.rp_origin).map_err(|e| {
            ConfigError::Validation(format!("webauthn.rp_origin is not a valid URL: {e}"))
        })?;

        Ok(self)
    }
}

fn normalize_base_url(name: &str, value: &str) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| ConfigError::Validation(format!("{name} is not a valid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::Validation(format!(
            "{name} must use http or https"
        )));
    }
    Ok(value.trim_end_matches('/').to_string())
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Any environment variable matching the key path separated by double
/// underscores (e.g. `KEYS__PRIVATE_KEY`, `COOKIE__MAX_AGE`) overrides the
/// file value. The file itself is optional so a fully env-driven deployment
/// works too.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml").required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()
}

/// Convenience helper for the binary: configuration problems are fatal.
pub fn load_config_or_panic() -> AppConfig {
    match load_config() {
        Ok(c) => c,
        Err(e) => panic!("Failed to load configuration: {e}"),
    }
}
