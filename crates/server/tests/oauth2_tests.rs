mod common;

use axum_test::TestServer;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::*;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};

const USER: &str = "alice@example.com";
const PASSWORD: &str = "correct horse battery";

/// Run `GET /oauth2/auth` with `params` as a signed-in browser and return the
/// client redirect.
async fn authorize_as(server: &TestServer, cookie: &str, params: &[(&str, &str)]) -> String {
    let (name, value) = cookie_header(cookie);
    let mut request = server.get("/oauth2/auth").add_header(name, value);
    for (k, v) in params {
        request = request.add_query_param(k, v);
    }
    let response = request.await;
    response.assert_status_see_other();
    location(&response)
}

fn app1_params<'a>(extra: &[(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
    let mut params = vec![
        ("response_type", "code"),
        ("client_id", "app1"),
        ("redirect_uri", APP1_REDIRECT),
        ("scope", "openid email"),
        ("state", "xyz"),
    ];
    params.extend_from_slice(extra);
    params
}

async fn exchange(server: &TestServer, code: &str) -> axum_test::TestResponse {
    let (name, value) = basic_auth("app1", APP1_SECRET);
    server
        .post("/oauth2/token")
        .add_header(name, value)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", APP1_REDIRECT),
        ])
        .await
}

async fn signed_in_app() -> (TestApp, String) {
    let app = test_app().await;
    register_client(&app.resources, TestClient::default()).await;
    create_password_account(&app.resources, USER, PASSWORD).await;
    let cookie = password_sign_in(&app.server, USER, PASSWORD).await;
    (app, cookie)
}

async fn issued_tokens(app: &TestApp, cookie: &str) -> Value {
    let redirect = authorize_as(&app.server, cookie, &app1_params(&[])).await;
    let code = query_param(&redirect, "code").expect("code in redirect");
    let response = exchange(&app.server, &code).await;
    response.assert_status_ok();
    response.json::<Value>()
}

// =============================================================================
// Authorization code flow
// =============================================================================

#[tokio::test]
async fn test_full_authorization_code_flow() {
    let app = test_app().await;
    register_client(&app.resources, TestClient::default()).await;
    create_password_account(&app.resources, USER, PASSWORD).await;

    // Anonymous browser is sent to the sign-in page with the request encoded.
    let mut request = app.server.get("/oauth2/auth");
    for (k, v) in app1_params(&[]) {
        request = request.add_query_param(k, v);
    }
    let response = request.await;
    response.assert_status_see_other();
    let signin = location(&response);
    assert!(signin.starts_with(&format!("{WEB_URL}/account/signin?source=")));

    let source = query_param(&signin, "source").expect("source");
    let replay = String::from_utf8(URL_SAFE_NO_PAD.decode(&source).unwrap()).unwrap();
    assert!(replay.starts_with(&format!("{ISSUER}/oauth2/auth?")));
    assert_eq!(query_param(&replay, "client_id").as_deref(), Some("app1"));
    assert_eq!(query_param(&replay, "state").as_deref(), Some("xyz"));

    // Password sign-in returns the browser to the replayed request.
    let response = app
        .server
        .post("/account/signin/password/finish")
        .add_query_param("source", &source)
        .form(&[("username", USER), ("password", PASSWORD)])
        .await;
    response.assert_status_see_other();
    let back = location(&response);
    assert!(back.starts_with(&format!("{ISSUER}/oauth2/auth?")));
    assert_eq!(query_param(&back, "scope").as_deref(), Some("openid email"));
    let cookie = identity_cookie(&response);

    // Replaying it mints a code.
    let replay_url = url::Url::parse(&replay).unwrap();
    let params: Vec<(String, String)> = replay_url.query_pairs().into_owned().collect();
    let params: Vec<(&str, &str)> = params
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let redirect = authorize_as(&app.server, &cookie, &params).await;
    assert!(redirect.starts_with(&format!("{APP1_REDIRECT}?code=")));
    assert_eq!(query_param(&redirect, "state").as_deref(), Some("xyz"));
    let code = query_param(&redirect, "code").unwrap();

    let response = exchange(&app.server, &code).await;
    response.assert_status_ok();
    assert_eq!(
        response
            .headers()
            .get("cache-control")
            .and_then(|v| v.to_str().ok()),
        Some("no-store")
    );
    let body = response.json::<Value>();
    assert_eq!(body["token_type"], "bearer");
    assert!(body["access_token"].as_str().is_some_and(|t| !t.is_empty()));
    assert!(body["id_token"].as_str().is_some());
    assert!(body["expires_in"].as_i64().unwrap() > 0);

    let claims = app
        .resources
        .keys
        .verify_identity_token(body["id_token"].as_str().unwrap())
        .expect("id token verifies");
    assert_eq!(claims.sub, USER);
    assert_eq!(claims.aud.as_deref(), Some("app1"));
    assert_eq!(claims.iss, ISSUER);

    // The code is spent.
    let response = exchange(&app.server, &code).await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_grant");
}

#[tokio::test]
async fn test_code_reuse_revokes_issued_tokens() {
    let (app, cookie) = signed_in_app().await;
    let redirect = authorize_as(&app.server, &cookie, &app1_params(&[])).await;
    let code = query_param(&redirect, "code").unwrap();

    let tokens = exchange(&app.server, &code).await.json::<Value>();
    exchange(&app.server, &code).await.assert_status_bad_request();

    let (name, value) = basic_auth("app1", APP1_SECRET);
    let response = app
        .server
        .post("/oauth2/introspect")
        .add_header(name, value)
        .form(&[("token", tokens["access_token"].as_str().unwrap())])
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["active"], false);

    let (name, value) = basic_auth("app1", APP1_SECRET);
    let response = app
        .server
        .post("/oauth2/token")
        .add_header(name, value)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", tokens["refresh_token"].as_str().unwrap()),
        ])
        .await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_grant");
}

#[tokio::test]
async fn test_unknown_code_is_invalid_grant() {
    let (app, _) = signed_in_app().await;
    let response = exchange(&app.server, "never-issued").await;
    response.assert_status_bad_request();
    let body = response.json::<Value>();
    assert_eq!(body["error"], "invalid_grant");
    assert_eq!(body["error_description"], "authorization code is not known");
}

#[tokio::test]
async fn test_token_requires_client_authentication() {
    let (app, cookie) = signed_in_app().await;
    let redirect = authorize_as(&app.server, &cookie, &app1_params(&[])).await;
    let code = query_param(&redirect, "code").unwrap();

    let (name, value) = basic_auth("app1", "wrong-secret");
    let response = app
        .server
        .post("/oauth2/token")
        .add_header(name, value)
        .form(&[("grant_type", "authorization_code"), ("code", code.as_str())])
        .await;
    response.assert_status_unauthorized();
    assert_eq!(response.json::<Value>()["error"], "invalid_client");

    // The failed attempt did not spend the code.
    exchange(&app.server, &code).await.assert_status_ok();
}

#[tokio::test]
async fn test_unsupported_grant_type() {
    let (app, _) = signed_in_app().await;
    let (name, value) = basic_auth("app1", APP1_SECRET);
    let response = app
        .server
        .post("/oauth2/token")
        .add_header(name, value)
        .form(&[("grant_type", "password")])
        .await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn test_id_token_auth_time_is_when_the_user_signed_in() {
    use portal_gateway::entity::session;
    use portal_gateway::store::sessions;
    use sea_orm::{ActiveModelTrait, ActiveValue::Set};

    let (app, cookie) = signed_in_app().await;
    let token = cookie.split_once('=').unwrap().1;
    let jti = app.resources.keys.verify_identity_token(token).unwrap().jti;
    let row = sessions::find_by_jwt_id(app.resources.db.as_ref(), &jti)
        .await
        .unwrap()
        .unwrap();

    let signed_in_at = (time::OffsetDateTime::now_utc() - time::Duration::hours(1))
        .replace_nanosecond(0)
        .unwrap();
    let mut active: session::ActiveModel = row.into();
    active.create_time = Set(signed_in_at);
    active.update(app.resources.db.as_ref()).await.unwrap();

    let body = issued_tokens(&app, &cookie).await;
    let claims = app
        .resources
        .keys
        .verify_identity_token(body["id_token"].as_str().unwrap())
        .unwrap();
    assert_eq!(claims.auth_time, Some(signed_in_at.unix_timestamp()));
    assert!(claims.iat > signed_in_at.unix_timestamp());
}

#[tokio::test]
async fn test_token_request_must_repeat_explicit_redirect_uri() {
    let (app, cookie) = signed_in_app().await;
    let redirect = authorize_as(&app.server, &cookie, &app1_params(&[])).await;
    let code = query_param(&redirect, "code").unwrap();

    let (name, value) = basic_auth("app1", APP1_SECRET);
    let response = app
        .server
        .post("/oauth2/token")
        .add_header(name, value)
        .form(&[("grant_type", "authorization_code"), ("code", code.as_str())])
        .await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_request");

    // The rejected request did not spend the code.
    exchange(&app.server, &code).await.assert_status_ok();
}

#[tokio::test]
async fn test_redirect_uri_may_be_omitted_when_never_sent() {
    let (app, cookie) = signed_in_app().await;
    let params = [
        ("response_type", "code"),
        ("client_id", "app1"),
        ("scope", "openid"),
    ];
    let redirect = authorize_as(&app.server, &cookie, &params).await;
    assert!(redirect.starts_with(&format!("{APP1_REDIRECT}?code=")));
    let code = query_param(&redirect, "code").unwrap();

    let (name, value) = basic_auth("app1", APP1_SECRET);
    app.server
        .post("/oauth2/token")
        .add_header(name, value)
        .form(&[("grant_type", "authorization_code"), ("code", code.as_str())])
        .await
        .assert_status_ok();
}

// =============================================================================
// Authorization request validation
// =============================================================================

#[tokio::test]
async fn test_unregistered_redirect_uri_is_not_followed() {
    let (app, cookie) = signed_in_app().await;
    let (name, value) = cookie_header(&cookie);
    let response = app
        .server
        .get("/oauth2/auth")
        .add_header(name, value)
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "app1")
        .add_query_param("redirect_uri", "https://evil.example.net/cb")
        .await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_request");
}

#[tokio::test]
async fn test_unknown_client_is_rejected() {
    let app = test_app().await;
    let response = app
        .server
        .get("/oauth2/auth")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "nobody")
        .add_query_param("redirect_uri", APP1_REDIRECT)
        .await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn test_disallowed_scope_redirects_with_error() {
    let (app, cookie) = signed_in_app().await;
    let redirect = authorize_as(
        &app.server,
        &cookie,
        &[
            ("response_type", "code"),
            ("client_id", "app1"),
            ("redirect_uri", APP1_REDIRECT),
            ("scope", "openid admin"),
            ("state", "s1"),
        ],
    )
    .await;
    assert!(redirect.starts_with(APP1_REDIRECT));
    assert_eq!(query_param(&redirect, "error").as_deref(), Some("invalid_scope"));
    assert_eq!(query_param(&redirect, "state").as_deref(), Some("s1"));
    assert!(query_param(&redirect, "code").is_none());
}

#[tokio::test]
async fn test_unsupported_response_type_redirects_with_error() {
    let (app, cookie) = signed_in_app().await;
    let redirect = authorize_as(
        &app.server,
        &cookie,
        &[
            ("response_type", "token"),
            ("client_id", "app1"),
            ("redirect_uri", APP1_REDIRECT),
        ],
    )
    .await;
    assert_eq!(
        query_param(&redirect, "error").as_deref(),
        Some("unsupported_response_type")
    );
}

#[tokio::test]
async fn test_consent_grants_only_requested_scopes() {
    let (app, cookie) = signed_in_app().await;
    let (name, value) = cookie_header(&cookie);
    let response = app
        .server
        .post("/oauth2/auth")
        .add_header(name, value)
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "app1")
        .add_query_param("redirect_uri", APP1_REDIRECT)
        .add_query_param("scope", "openid email")
        .form(&[("username", USER), ("scope", "email profile")])
        .await;
    response.assert_status_see_other();
    let code = query_param(&location(&response), "code").unwrap();

    let body = exchange(&app.server, &code).await.json::<Value>();
    assert_eq!(body["scope"], "email");
    assert!(body.get("id_token").is_none());
}

#[tokio::test]
async fn test_consent_for_another_user_is_denied() {
    let (app, cookie) = signed_in_app().await;
    let (name, value) = cookie_header(&cookie);
    let response = app
        .server
        .post("/oauth2/auth")
        .add_header(name, value)
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "app1")
        .add_query_param("redirect_uri", APP1_REDIRECT)
        .form(&[("username", "mallory@example.com")])
        .await;
    response.assert_status(axum::http::StatusCode::FORBIDDEN);
    assert_eq!(response.json::<Value>()["error"], "access_denied");
}

// =============================================================================
// PKCE
// =============================================================================

#[tokio::test]
async fn test_public_client_requires_pkce() {
    let app = test_app().await;
    register_client(
        &app.resources,
        TestClient {
            id: "spa",
            secret: None,
            is_public: true,
            ..Default::default()
        },
    )
    .await;
    create_password_account(&app.resources, USER, PASSWORD).await;
    let cookie = password_sign_in(&app.server, USER, PASSWORD).await;

    let redirect = authorize_as(
        &app.server,
        &cookie,
        &[
            ("response_type", "code"),
            ("client_id", "spa"),
            ("redirect_uri", APP1_REDIRECT),
        ],
    )
    .await;
    assert_eq!(query_param(&redirect, "error").as_deref(), Some("invalid_request"));

    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    let challenge = pkce_s256(verifier);
    let redirect = authorize_as(
        &app.server,
        &cookie,
        &[
            ("response_type", "code"),
            ("client_id", "spa"),
            ("redirect_uri", APP1_REDIRECT),
            ("scope", "openid"),
            ("code_challenge", &challenge),
            ("code_challenge_method", "S256"),
        ],
    )
    .await;
    let code = query_param(&redirect, "code").expect("code");

    let response = app
        .server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("client_id", "spa"),
            ("code", code.as_str()),
            ("redirect_uri", APP1_REDIRECT),
            ("code_verifier", "not-the-verifier"),
        ])
        .await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_grant");

    // A failed verifier does not spend the code.
    let response = app
        .server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("client_id", "spa"),
            ("code", code.as_str()),
            ("redirect_uri", APP1_REDIRECT),
            ("code_verifier", verifier),
        ])
        .await;
    response.assert_status_ok();
    assert!(response.json::<Value>()["id_token"].is_string());
}

#[tokio::test]
async fn test_missing_verifier_is_rejected() {
    let (app, cookie) = signed_in_app().await;
    let redirect = authorize_as(
        &app.server,
        &cookie,
        &app1_params(&[("code_challenge", "plain-challenge"), ("code_challenge_method", "plain")]),
    )
    .await;
    let code = query_param(&redirect, "code").unwrap();

    let response = exchange(&app.server, &code).await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_request");
}

// =============================================================================
// Refresh, introspection and revocation
// =============================================================================

#[tokio::test]
async fn test_refresh_token_rotation() {
    let (app, cookie) = signed_in_app().await;
    let tokens = issued_tokens(&app, &cookie).await;
    let first_refresh = tokens["refresh_token"].as_str().unwrap().to_string();

    let refresh = |token: String| {
        let (name, value) = basic_auth("app1", APP1_SECRET);
        app.server
            .post("/oauth2/token")
            .add_header(name, value)
            .form(&[("grant_type", "refresh_token".to_string()), ("refresh_token", token)])
    };

    let response = refresh(first_refresh.clone()).await;
    response.assert_status_ok();
    let rotated = response.json::<Value>();
    assert_ne!(rotated["refresh_token"], tokens["refresh_token"]);
    assert_ne!(rotated["access_token"], tokens["access_token"]);

    // The old refresh token is spent.
    let response = refresh(first_refresh).await;
    response.assert_status_bad_request();
    assert_eq!(
        response.json::<Value>()["error_description"],
        "refresh token has been revoked"
    );

    // The new one still works.
    refresh(rotated["refresh_token"].as_str().unwrap().to_string())
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_refresh_cannot_widen_scope() {
    let (app, cookie) = signed_in_app().await;
    let tokens = issued_tokens(&app, &cookie).await;

    let (name, value) = basic_auth("app1", APP1_SECRET);
    let response = app
        .server
        .post("/oauth2/token")
        .add_header(name, value)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", tokens["refresh_token"].as_str().unwrap()),
            ("scope", "openid profile"),
        ])
        .await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_scope");
}

#[tokio::test]
async fn test_introspection_accepts_rotated_secret() {
    let app = test_app().await;
    register_client(
        &app.resources,
        TestClient {
            rotated: &["previous-secret"],
            ..Default::default()
        },
    )
    .await;
    create_password_account(&app.resources, USER, PASSWORD).await;
    let cookie = password_sign_in(&app.server, USER, PASSWORD).await;
    let tokens = issued_tokens(&app, &cookie).await;

    let (name, value) = basic_auth("app1", "previous-secret");
    let response = app
        .server
        .post("/oauth2/introspect")
        .add_header(name, value)
        .form(&[("token", tokens["access_token"].as_str().unwrap())])
        .await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["active"], true);
    assert_eq!(body["client_id"], "app1");
    assert_eq!(body["sub"], USER);
    assert_eq!(body["scope"], "openid email");
    assert_eq!(body["token_type"], "bearer");

    let (name, value) = basic_auth("app1", "never-issued");
    app.server
        .post("/oauth2/introspect")
        .add_header(name, value)
        .form(&[("token", tokens["access_token"].as_str().unwrap())])
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn test_introspection_of_other_clients_token_is_inactive() {
    let (app, cookie) = signed_in_app().await;
    register_client(
        &app.resources,
        TestClient {
            id: "app2",
            secret: Some("app2-secret"),
            ..Default::default()
        },
    )
    .await;
    let tokens = issued_tokens(&app, &cookie).await;

    let (name, value) = basic_auth("app2", "app2-secret");
    let response = app
        .server
        .post("/oauth2/introspect")
        .add_header(name, value)
        .form(&[("token", tokens["access_token"].as_str().unwrap())])
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>(), json!({"active": false}));
}

#[tokio::test]
async fn test_revocation_is_idempotent() {
    let (app, cookie) = signed_in_app().await;
    let tokens = issued_tokens(&app, &cookie).await;
    let access = tokens["access_token"].as_str().unwrap();

    for _ in 0..2 {
        let (name, value) = basic_auth("app1", APP1_SECRET);
        app.server
            .post("/oauth2/revoke")
            .add_header(name, value)
            .form(&[("token", access)])
            .await
            .assert_status_ok();
    }

    let (name, value) = basic_auth("app1", APP1_SECRET);
    let response = app
        .server
        .post("/oauth2/introspect")
        .add_header(name, value)
        .form(&[("token", access)])
        .await;
    assert_eq!(response.json::<Value>()["active"], false);

    // Revoking the access token withdrew its refresh token too.
    let (name, value) = basic_auth("app1", APP1_SECRET);
    app.server
        .post("/oauth2/token")
        .add_header(name, value)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", tokens["refresh_token"].as_str().unwrap()),
        ])
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn test_revoking_unknown_token_succeeds() {
    let (app, _) = signed_in_app().await;
    let (name, value) = basic_auth("app1", APP1_SECRET);
    app.server
        .post("/oauth2/revoke")
        .add_header(name, value)
        .form(&[("token", "never-issued"), ("token_type_hint", "refresh_token")])
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_revoking_another_clients_token_fails() {
    let (app, cookie) = signed_in_app().await;
    register_client(
        &app.resources,
        TestClient {
            id: "app2",
            secret: Some("app2-secret"),
            ..Default::default()
        },
    )
    .await;
    let tokens = issued_tokens(&app, &cookie).await;

    let (name, value) = basic_auth("app2", "app2-secret");
    let response = app
        .server
        .post("/oauth2/revoke")
        .add_header(name, value)
        .form(&[("token", tokens["access_token"].as_str().unwrap())])
        .await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "unauthorized_client");
}

// =============================================================================
// Client assertions
// =============================================================================

fn client_assertion(client_id: &str, jti: &str) -> String {
    let exp = (time::OffsetDateTime::now_utc() + time::Duration::minutes(5)).unix_timestamp();
    let claims = json!({
        "iss": client_id,
        "sub": client_id,
        "aud": format!("{ISSUER}/oauth2/token"),
        "jti": jti,
        "exp": exp,
    });
    let key = EncodingKey::from_rsa_pem(client_keys().private_pem.as_bytes()).unwrap();
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key).unwrap()
}

#[tokio::test]
async fn test_client_assertion_jti_cannot_be_replayed() {
    let app = test_app().await;
    register_client(
        &app.resources,
        TestClient {
            id: "svc",
            secret: None,
            public_key_pem: Some(client_keys().public_pem.as_str()),
            ..Default::default()
        },
    )
    .await;
    let assertion = client_assertion("svc", "jti-1");
    let form = [
        ("grant_type", "authorization_code"),
        ("code", "never-issued"),
        (
            "client_assertion_type",
            "urn:ietf:params:oauth:client-assertion-type:jwt-bearer",
        ),
        ("client_assertion", assertion.as_str()),
    ];

    // Authenticated, so the failure is about the grant.
    let response = app.server.post("/oauth2/token").form(&form).await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_grant");

    let response = app.server.post("/oauth2/token").form(&form).await;
    response.assert_status_unauthorized();
    assert_eq!(response.json::<Value>()["error"], "invalid_client");
}

#[tokio::test]
async fn test_client_assertion_signed_by_wrong_key_is_rejected() {
    let app = test_app().await;
    register_client(
        &app.resources,
        TestClient {
            id: "svc",
            secret: None,
            // Registered with the gateway's key, signed with the client key.
            public_key_pem: Some(rsa_keys().public_pem.as_str()),
            ..Default::default()
        },
    )
    .await;
    let assertion = client_assertion("svc", "jti-2");
    let response = app
        .server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", "never-issued"),
            (
                "client_assertion_type",
                "urn:ietf:params:oauth:client-assertion-type:jwt-bearer",
            ),
            ("client_assertion", assertion.as_str()),
        ])
        .await;
    response.assert_status_unauthorized();
}

// =============================================================================
// Discovery, keys and the user endpoint
// =============================================================================

#[tokio::test]
async fn test_discovery_document() {
    let app = test_app().await;
    let response = app.server.get("/.well-known/openid-configuration").await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["issuer"], ISSUER);
    assert_eq!(body["authorization_endpoint"], format!("{ISSUER}/oauth2/auth"));
    assert_eq!(body["token_endpoint"], format!("{ISSUER}/oauth2/token"));
    assert_eq!(body["jwks_uri"], format!("{ISSUER}/oauth2/jwks"));
    assert_eq!(body["id_token_signing_alg_values_supported"], json!(["RS256"]));
}

#[tokio::test]
async fn test_jwks_publishes_the_signing_key() {
    let app = test_app().await;
    let response = app.server.get("/oauth2/jwks").await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    let keys = body["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["kty"], "RSA");
    assert_eq!(keys[0]["alg"], "RS256");
    assert_eq!(keys[0]["kid"], app.resources.keys.kid());
}

#[tokio::test]
async fn test_user_endpoint_resolves_id_token() {
    let (app, cookie) = signed_in_app().await;
    let tokens = issued_tokens(&app, &cookie).await;
    let id_token = tokens["id_token"].as_str().unwrap();

    let (name, value) = basic_auth("app1", APP1_SECRET);
    let response = app
        .server
        .post("/oauth2/user")
        .add_header(name, value)
        .form(&[("id_token", id_token)])
        .await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["username"], USER);
    assert_eq!(body["id_token"], id_token);

    // The identity cookie is not an ID token issued to the client.
    let browser_token = cookie.split_once('=').unwrap().1;
    let (name, value) = basic_auth("app1", APP1_SECRET);
    app.server
        .post("/oauth2/user")
        .add_header(name, value)
        .form(&[("id_token", browser_token)])
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn test_client_id_token_is_not_a_browser_identity() {
    let (app, cookie) = signed_in_app().await;
    let tokens = issued_tokens(&app, &cookie).await;
    let id_token = tokens["id_token"].as_str().unwrap();

    let (name, value) = cookie_header(&format!("Portal-Authorization={id_token}"));
    let response = app
        .server
        .get("/account/userinfo")
        .add_header(name, value)
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["data"]["anonymous"], true);
}
