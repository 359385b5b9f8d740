//! OAuth2 / OpenID Connect HTTP endpoints.

use axum::{
    Form, Json,
    extract::{Query, RawQuery, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::OAUTH2_TAG;
use super::authorize::{AuthorizeParams, AuthorizeRejection, split_scopes};
use super::client_auth::{self, ClientAuthFields};
use super::error::{ErrorResponse, OAuth2Error};
use super::state::OAuth2State;
use super::token::{TokenRequest, TokenResponse};
use crate::crypto::token_signature;
use crate::error::StoreError;
use crate::keys::JwkSet;
use crate::store::sessions;

/// Creates the OAuth2 router. Paths are absolute so discovery can live at
/// the root.
pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(authorize, authorize_consent))
        .routes(routes!(token))
        .routes(routes!(revoke))
        .routes(routes!(introspect))
        .routes(routes!(user))
        .routes(routes!(jwks))
        .routes(routes!(openid_configuration))
        .with_state(state)
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Consent submitted by the web frontend for a signed-in user.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ConsentForm {
    /// Must equal the signed-in account
    pub username: String,
    /// Space-separated subset of the requested scopes; all of them when absent
    pub scope: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RevokeRequest {
    #[serde(default)]
    pub token: String,
    /// `access_token` or `refresh_token`; anything else is ignored
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct IntrospectRequest {
    #[serde(default)]
    pub token: String,
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UserRequest {
    #[serde(default)]
    pub id_token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub username: String,
    /// The ID token stored for the session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OpenIdConfiguration {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub revocation_endpoint: String,
    pub introspection_endpoint: String,
    pub jwks_uri: String,
    /// Non-standard: resolves the account behind an ID token
    pub user_endpoint: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub claims_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn no_store<T: Serialize>(body: T) -> Response {
    (
        StatusCode::OK,
        [(header::CACHE_CONTROL, "no-store")],
        Json(body),
    )
        .into_response()
}

// =============================================================================
// Endpoints
// =============================================================================

/// OAuth2 Authorization endpoint.
#[tracing::instrument(skip(state, headers, raw_query))]
#[utoipa::path(
    get,
    path = "/oauth2/auth",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Authorize",
    summary = "Start the authorization code flow",
    description = "Validates the request against the client registration. A browser without a \
                   valid identity cookie is redirected to the web sign-in page with the request \
                   base64url-encoded in `source`, to be replayed after signing in. A signed-in \
                   browser is redirected back to the client with a single-use code.\n\n\
                   **PKCE:** `plain` and `S256` are supported and mandatory for public clients.",
    params(AuthorizeParams),
    responses(
        (status = 303, description = "Redirect to sign-in, or to the client with `code` or `error`"),
        (status = 400, description = "Unknown client or unregistered redirect URI", body = ErrorResponse),
    )
)]
pub async fn authorize(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    let validated = match state.validate_authorize(&params).await {
        Ok(v) => v,
        Err(rejection) => return rejection.into_response(),
    };

    let (account, session) = match state
        .session_bridge()
        .resolve_signed_in_lenient(&headers)
        .await
    {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            return Redirect::to(&state.signin_redirect(raw_query.as_deref())).into_response();
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to resolve identity");
            return OAuth2Error::server_error()
                .redirect(&validated.redirect_uri, validated.state.as_deref());
        }
    };

    let granted = validated.requested_scopes.clone();
    let auth_time = session.create_time.unix_timestamp();
    match state
        .issue_code(&validated, &account.username, granted, auth_time)
        .await
    {
        Ok(location) => Redirect::to(&location).into_response(),
        Err(e) => e.redirect(&validated.redirect_uri, validated.state.as_deref()),
    }
}

/// OAuth2 Authorization endpoint, consent submission.
#[tracing::instrument(skip(state, headers, form))]
#[utoipa::path(
    post,
    path = "/oauth2/auth",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Authorize Consent",
    summary = "Grant scopes for a signed-in user and mint a code",
    params(AuthorizeParams),
    request_body(
        content = ConsentForm,
        content_type = "application/x-www-form-urlencoded",
        description = "Username of the signed-in account and the scopes it grants"
    ),
    responses(
        (status = 303, description = "Redirect to the client with `code` or `error`"),
        (status = 400, description = "Unknown client or unregistered redirect URI", body = ErrorResponse),
        (status = 403, description = "Not signed in as `username`", body = ErrorResponse),
    )
)]
pub async fn authorize_consent(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    Query(params): Query<AuthorizeParams>,
    Form(form): Form<ConsentForm>,
) -> Response {
    let validated = match state.validate_authorize(&params).await {
        Ok(v) => v,
        Err(rejection) => return rejection.into_response(),
    };

    let (account, session) = match state.session_bridge().resolve_signed_in(&headers).await {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            tracing::info!(username = %form.username, "consent without a signed-in account");
            return AuthorizeRejection::Direct(OAuth2Error::access_denied("sign in again"))
                .into_response();
        }
        Err(e) => {
            tracing::info!(error = %e, "consent with unusable identity");
            return AuthorizeRejection::Direct(OAuth2Error::access_denied("sign in again"))
                .into_response();
        }
    };
    if account.username != form.username.trim().to_lowercase() {
        tracing::info!(username = %form.username, "consent does not match the signed-in account");
        return AuthorizeRejection::Direct(OAuth2Error::access_denied("sign in again"))
            .into_response();
    }

    let granted = match form.scope.as_deref() {
        None => validated.requested_scopes.clone(),
        Some(scope) => split_scopes(Some(scope))
            .into_iter()
            .filter(|s| validated.requested_scopes.contains(s))
            .collect(),
    };
    let auth_time = session.create_time.unix_timestamp();
    match state
        .issue_code(&validated, &account.username, granted, auth_time)
        .await
    {
        Ok(location) => Redirect::to(&location).into_response(),
        Err(e) => e.redirect(&validated.redirect_uri, validated.state.as_deref()),
    }
}

/// OAuth2 Token endpoint.
#[tracing::instrument(skip(state, headers, request))]
#[utoipa::path(
    post,
    path = "/oauth2/token",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Token",
    summary = "Exchange an authorization code or refresh token",
    description = "**Grant types:** `authorization_code`, `refresh_token`.\n\n\
                   **Client authentication:** `client_secret_basic`, `client_secret_post`, \
                   `none` (public clients, PKCE required) and `private_key_jwt`.\n\n\
                   A code can be exchanged once. Presenting it again fails with `invalid_grant` \
                   and revokes every token minted from it.",
    request_body(
        content = TokenRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token request parameters"
    ),
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 400, description = "Invalid request or grant", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
    )
)]
pub async fn token(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    Form(request): Form<TokenRequest>,
) -> Response {
    let client = match client_auth::authenticate(&state, &headers, &request.auth_fields()).await {
        Ok(client) => client,
        Err(e) => return e.into_response(),
    };

    let result = match request.grant_type.as_str() {
        "authorization_code" => state.exchange_code(&client, &request).await,
        "refresh_token" => state.refresh(&client, &request).await,
        "" => Err(OAuth2Error::invalid_request("grant_type is required")),
        other => Err(OAuth2Error::unsupported_grant_type(format!(
            "grant type `{other}` is not supported"
        ))),
    };
    match result {
        Ok(tokens) => no_store(tokens),
        Err(e) => e.into_response(),
    }
}

enum Revoked {
    Done,
    NotMine,
    Unknown,
}

async fn revoke_access(
    state: &OAuth2State,
    signature: &str,
    client_id: &str,
) -> Result<Revoked, StoreError> {
    match state.tokens.get_access_token_session(signature).await {
        Ok(grant) if grant.request.client_id != client_id => Ok(Revoked::NotMine),
        Ok(grant) => {
            state.tokens.revoke_access_token(&grant.request.request_id).await?;
            state.tokens.revoke_refresh_token(&grant.request.request_id).await?;
            Ok(Revoked::Done)
        }
        Err(StoreError::Expired) => {
            state.tokens.delete_access_token_session(signature).await?;
            Ok(Revoked::Done)
        }
        Err(StoreError::NotFound) => Ok(Revoked::Unknown),
        Err(e) => Err(e),
    }
}

async fn revoke_refresh(
    state: &OAuth2State,
    signature: &str,
    client_id: &str,
) -> Result<Revoked, StoreError> {
    match state.tokens.get_refresh_token_session(signature).await {
        Ok(grant) if grant.request.client_id != client_id => Ok(Revoked::NotMine),
        Ok(grant) => {
            state.tokens.revoke_refresh_token(&grant.request.request_id).await?;
            state.tokens.revoke_access_token(&grant.request.request_id).await?;
            Ok(Revoked::Done)
        }
        Err(StoreError::Inactive | StoreError::Expired) => Ok(Revoked::Done),
        Err(StoreError::NotFound) => Ok(Revoked::Unknown),
        Err(e) => Err(e),
    }
}

/// Token revocation endpoint (RFC 7009).
#[tracing::instrument(skip(state, headers, request))]
#[utoipa::path(
    post,
    path = "/oauth2/revoke",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Revoke Token",
    summary = "Revoke an access or refresh token",
    description = "Revokes the token and every token minted from the same authorization. \
                   Returns 200 for unknown and already revoked tokens, so revoking twice is \
                   not an error.",
    request_body(
        content = RevokeRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token revocation request"
    ),
    responses(
        (status = 200, description = "Token revoked (or was already invalid)"),
        (status = 400, description = "Missing token, or it belongs to another client", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
    )
)]
pub async fn revoke(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    Form(request): Form<RevokeRequest>,
) -> Response {
    let fields = ClientAuthFields {
        client_id: request.client_id.as_deref(),
        client_secret: request.client_secret.as_deref(),
        ..Default::default()
    };
    let client = match client_auth::authenticate(&state, &headers, &fields).await {
        Ok(client) => client,
        Err(e) => return e.into_response(),
    };
    if request.token.is_empty() {
        return OAuth2Error::invalid_request("token is required").into_response();
    }

    let signature = token_signature(&request.token);
    let refresh_first = request.token_type_hint.as_deref() == Some("refresh_token");

    let mut outcome = Revoked::Unknown;
    for try_refresh in [refresh_first, !refresh_first] {
        let attempt = if try_refresh {
            revoke_refresh(&state, &signature, &client.id).await
        } else {
            revoke_access(&state, &signature, &client.id).await
        };
        match attempt {
            Ok(Revoked::Unknown) => continue,
            Ok(found) => {
                outcome = found;
                break;
            }
            Err(e) => return OAuth2Error::from(e).into_response(),
        }
    }

    match outcome {
        Revoked::NotMine => {
            tracing::warn!(client_id = %client.id, "client tried to revoke another client's token");
            OAuth2Error::unauthorized_client("token was issued to another client").into_response()
        }
        Revoked::Done | Revoked::Unknown => StatusCode::OK.into_response(),
    }
}

/// Token introspection endpoint (RFC 7662).
#[tracing::instrument(skip(state, headers, request))]
#[utoipa::path(
    post,
    path = "/oauth2/introspect",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Introspect Token",
    summary = "Describe an access token",
    description = "The calling client authenticates with its current or any rotated secret and \
                   may only introspect its own tokens.",
    request_body(
        content = IntrospectRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token introspection request"
    ),
    responses(
        (status = 200, description = "Introspection result", body = IntrospectionResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
    )
)]
pub async fn introspect(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    Form(request): Form<IntrospectRequest>,
) -> Response {
    let fields = ClientAuthFields {
        client_id: request.client_id.as_deref(),
        client_secret: request.client_secret.as_deref(),
        ..Default::default()
    };
    let client = match client_auth::authenticate(&state, &headers, &fields).await {
        Ok(client) => client,
        Err(e) => return e.into_response(),
    };
    if request.token.is_empty() {
        return OAuth2Error::invalid_request("token is required").into_response();
    }

    let signature = token_signature(&request.token);
    let session =
        match sessions::find_by_client_access_token(state.db.as_ref(), &client.id, &signature)
            .await
        {
            Ok(Some(session)) => session,
            Ok(None) => return no_store(IntrospectionResponse::default()),
            Err(e) => return OAuth2Error::from(e).into_response(),
        };

    let grant = match state.tokens.get_access_token_session(&signature).await {
        Ok(grant) => grant,
        Err(StoreError::NotFound | StoreError::Expired) => {
            return no_store(IntrospectionResponse::default());
        }
        Err(e) => return OAuth2Error::from(e).into_response(),
    };

    no_store(IntrospectionResponse {
        active: true,
        scope: Some(grant.request.scope()),
        client_id: Some(client.id),
        username: Some(session.username.clone()),
        sub: Some(session.username),
        exp: Some(grant.expires_at.unix_timestamp()),
        iat: Some(grant.issued_at.unix_timestamp()),
        iss: Some(state.issuer().to_string()),
        token_type: Some("bearer".to_string()),
    })
}

/// Account behind an ID token (non-standard).
#[tracing::instrument(skip(state, headers, request))]
#[utoipa::path(
    post,
    path = "/oauth2/user",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 User",
    summary = "Resolve the account behind an ID token",
    description = "Non-standard extension for relying parties that only kept the ID token. \
                   The client authenticates with HTTP Basic; the token must have been issued \
                   to that client.",
    request_body(
        content = UserRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "ID token"
    ),
    responses(
        (status = 200, description = "Account found", body = UserResponse),
        (status = 401, description = "Client authentication failed or ID token rejected", body = ErrorResponse),
    )
)]
pub async fn user(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    Form(request): Form<UserRequest>,
) -> Response {
    let client =
        match client_auth::authenticate(&state, &headers, &ClientAuthFields::default()).await {
            Ok(client) => client,
            Err(e) => return e.into_response(),
        };
    if request.id_token.is_empty() {
        return OAuth2Error::invalid_request("id_token is required").into_response();
    }

    let claims = match state.keys.verify_identity_token(&request.id_token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::info!(client_id = %client.id, error = %e, "id token rejected");
            return OAuth2Error::invalid_token("id_token is not valid").into_response();
        }
    };
    if claims.aud.as_deref() != Some(client.id.as_str()) {
        return OAuth2Error::invalid_token("id_token was issued to another client").into_response();
    }
    let kid = jsonwebtoken::decode_header(&request.id_token)
        .ok()
        .and_then(|h| h.kid)
        .unwrap_or_else(|| state.keys.kid().to_string());

    match sessions::find_by_client_user_token(
        state.db.as_ref(),
        &client.id,
        &claims.sub,
        &kid,
        &claims.jti,
    )
    .await
    {
        Ok(Some(session)) => no_store(UserResponse {
            username: session.username,
            id_token: session.id_token,
        }),
        Ok(None) => OAuth2Error::invalid_token("no session for this id_token").into_response(),
        Err(e) => OAuth2Error::from(e).into_response(),
    }
}

/// Public signing keys.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/oauth2/jwks",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 JWKS",
    summary = "JSON Web Key Set used to verify ID tokens",
    responses((status = 200, description = "Key set", body = JwkSet))
)]
pub async fn jwks(State(state): State<OAuth2State>) -> Json<JwkSet> {
    Json(state.keys.jwk_set())
}

/// OpenID Connect Discovery document.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/.well-known/openid-configuration",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Connect Discovery",
    summary = "OpenID Connect Discovery document",
    responses(
        (status = 200, description = "OpenID Connect configuration document", body = OpenIdConfiguration),
    )
)]
pub async fn openid_configuration(State(state): State<OAuth2State>) -> Json<OpenIdConfiguration> {
    Json(OpenIdConfiguration {
        issuer: state.issuer().to_string(),
        authorization_endpoint: state.endpoint("/oauth2/auth"),
        token_endpoint: state.token_endpoint(),
        revocation_endpoint: state.endpoint("/oauth2/revoke"),
        introspection_endpoint: state.endpoint("/oauth2/introspect"),
        jwks_uri: state.endpoint("/oauth2/jwks"),
        user_endpoint: state.endpoint("/oauth2/user"),
        response_types_supported: strings(&["code"]),
        grant_types_supported: strings(&["authorization_code", "refresh_token"]),
        subject_types_supported: strings(&["public"]),
        id_token_signing_alg_values_supported: strings(&["RS256"]),
        scopes_supported: strings(&["openid", "email", "profile"]),
        token_endpoint_auth_methods_supported: strings(&[
            "client_secret_basic",
            "client_secret_post",
            "private_key_jwt",
            "none",
        ]),
        claims_supported: strings(&[
            "aud",
            "auth_time",
            "exp",
            "iat",
            "iss",
            "jti",
            "nonce",
            "sub",
        ]),
        code_challenge_methods_supported: strings(&["plain", "S256"]),
    })
}
