//! Shared fixtures: throwaway signing keys, an in-memory database with the
//! full schema, and registered clients.

#![allow(dead_code)]

use std::sync::{Arc, OnceLock};

use axum::http::{HeaderName, HeaderValue, header};
use axum_test::{TestResponse, TestServer};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use migration::MigratorTrait;
use portal_gateway::{
    AppResources,
    api::app,
    ceremony::build_webauthn,
    config::{AppConfig, CookieConfig, KeysConfig, TokenConfig, WebauthnConfig},
    crypto::hash_password,
    entity::oauth2_client,
    keys::KeyManager,
    store::accounts::{self, NewAccount},
};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, Database};
use sha2::{Digest, Sha256};

pub const ISSUER: &str = "https://portal.example.com";
pub const WEB_URL: &str = "https://www.example.com";
pub const APP1_REDIRECT: &str = "https://app1.example.com/cb";
pub const APP1_SECRET: &str = "app1-secret";

/// PEM pair, generated once per test binary.
pub struct TestKeys {
    pub private_pem: String,
    pub public_pem: String,
}

pub fn rsa_keys() -> &'static TestKeys {
    static KEYS: OnceLock<TestKeys> = OnceLock::new();
    KEYS.get_or_init(generate_keys)
}

/// A second pair, for clients using `private_key_jwt`.
pub fn client_keys() -> &'static TestKeys {
    static KEYS: OnceLock<TestKeys> = OnceLock::new();
    KEYS.get_or_init(generate_keys)
}

fn generate_keys() -> TestKeys {
    let private = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("generate key");
    TestKeys {
        private_pem: private
            .to_pkcs8_pem(LineEnding::LF)
            .expect("encode private key")
            .as_str()
            .to_owned(),
        public_pem: private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .expect("encode public key"),
    }
}

pub fn test_config() -> AppConfig {
    let keys = rsa_keys();
    AppConfig {
        database_url: "sqlite::memory:".into(),
        listen_addr: "127.0.0.1:0".into(),
        issuer_url: ISSUER.into(),
        self_url: ISSUER.into(),
        web_url: WEB_URL.into(),
        keys: KeysConfig {
            private_key: keys.private_pem.clone(),
            public_key: keys.public_pem.clone(),
        },
        tokens: TokenConfig::default(),
        cookie: CookieConfig::default(),
        webauthn: WebauthnConfig {
            rp_id: "portal.example.com".into(),
            rp_origin: ISSUER.into(),
            rp_name: "Portal".into(),
        },
    }
}

pub async fn test_resources_with(config: AppConfig) -> AppResources {
    let db = Database::connect("sqlite::memory:").await.expect("connect");
    migration::Migrator::up(&db, None).await.expect("migrate");

    let keys = KeyManager::from_pem(
        &config.keys.private_key,
        &config.keys.public_key,
        config.tokens.identity_token_lifetime,
    )
    .expect("load keys");
    let webauthn = build_webauthn(&config.webauthn).expect("webauthn");

    AppResources {
        db: Arc::new(db),
        config: Arc::new(config),
        keys: Arc::new(keys),
        webauthn: Arc::new(webauthn),
    }
}

pub async fn test_resources() -> AppResources {
    test_resources_with(test_config()).await
}

pub struct TestApp {
    pub server: TestServer,
    pub resources: AppResources,
}

pub async fn test_app() -> TestApp {
    let resources = test_resources().await;
    let server = TestServer::new(app(resources.clone())).expect("create test server");
    TestApp { server, resources }
}

pub struct TestClient<'a> {
    pub id: &'a str,
    pub secret: Option<&'a str>,
    pub rotated: &'a [&'a str],
    pub redirect_uris: &'a [&'a str],
    pub grant_types: &'a str,
    pub scopes: &'a str,
    pub is_public: bool,
    pub public_key_pem: Option<&'a str>,
}

impl Default for TestClient<'_> {
    fn default() -> Self {
        Self {
            id: "app1",
            secret: Some(APP1_SECRET),
            rotated: &[],
            redirect_uris: &[APP1_REDIRECT],
            grant_types: "authorization_code refresh_token",
            scopes: "openid email profile",
            is_public: false,
            public_key_pem: None,
        }
    }
}

pub async fn register_client(resources: &AppResources, client: TestClient<'_>) {
    let rotated: Vec<String> = client
        .rotated
        .iter()
        .map(|s| hash_password(s).expect("hash"))
        .collect();
    oauth2_client::ActiveModel {
        id: Set(client.id.to_string()),
        name: Set(client.id.to_string()),
        secret_hash: Set(client.secret.map(|s| hash_password(s).expect("hash"))),
        rotated_secret_hashes: Set(serde_json::to_string(&rotated).unwrap()),
        redirect_uris: Set(serde_json::to_string(client.redirect_uris).unwrap()),
        grant_types: Set(client.grant_types.to_string()),
        response_types: Set("code".to_string()),
        scopes: Set(client.scopes.to_string()),
        audience: Set(String::new()),
        is_public: Set(client.is_public),
        public_key_pem: Set(client.public_key_pem.map(String::from)),
        created_at: Set(time::OffsetDateTime::now_utc()),
    }
    .insert(resources.db.as_ref())
    .await
    .expect("insert client");
}

pub async fn create_password_account(resources: &AppResources, username: &str, password: &str) {
    accounts::insert_account(
        resources.db.as_ref(),
        NewAccount {
            username: username.to_string(),
            password: Some(hash_password(password).expect("hash")),
            nickname: username.to_string(),
            mail: username.to_string(),
            mail_verified: false,
        },
    )
    .await
    .expect("insert account");
}

pub fn basic_auth(client_id: &str, secret: &str) -> (HeaderName, HeaderValue) {
    let encoded = STANDARD.encode(format!("{client_id}:{secret}"));
    (
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
    )
}

pub fn cookie_header(cookie: &str) -> (HeaderName, HeaderValue) {
    (header::COOKIE, HeaderValue::from_str(cookie).unwrap())
}

/// `name=value` of the identity cookie a response set.
pub fn identity_cookie(response: &TestResponse) -> String {
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .expect("set-cookie header");
    set_cookie
        .split(';')
        .next()
        .expect("cookie pair")
        .trim()
        .to_string()
}

pub fn location(response: &TestResponse) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}

/// Value of query parameter `name` in `url`.
pub fn query_param(url: &str, name: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

pub fn pkce_s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Sign in with a password and return the identity cookie.
pub async fn password_sign_in(server: &TestServer, username: &str, password: &str) -> String {
    let response = server
        .post("/account/signin/password/finish")
        .form(&[("username", username), ("password", password)])
        .await;
    response.assert_status_see_other();
    identity_cookie(&response)
}
