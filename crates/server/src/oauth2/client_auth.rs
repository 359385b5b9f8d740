//! Client authentication at the token, revocation and introspection
//! endpoints: `client_secret_basic`, `client_secret_post`, `none` and
//! `private_key_jwt`.

use axum::http::{HeaderMap, header};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use time::OffsetDateTime;

use super::error::OAuth2Error;
use super::state::OAuth2State;
use crate::entity::oauth2_client;
use crate::error::StoreError;

pub const JWT_BEARER_ASSERTION: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Client authentication fields that may appear in a form body.
#[derive(Debug, Default, Clone)]
pub struct ClientAuthFields<'a> {
    pub client_id: Option<&'a str>,
    pub client_secret: Option<&'a str>,
    pub client_assertion_type: Option<&'a str>,
    pub client_assertion: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCredentials {
    Secret { client_id: String, secret: String },
    Assertion {
        client_id: Option<String>,
        assertion: String,
    },
    Public { client_id: String },
    Missing,
}

/// Work out which authentication method the request uses. HTTP Basic wins
/// over anything in the body.
pub fn client_credentials(headers: &HeaderMap, fields: &ClientAuthFields<'_>) -> ClientCredentials {
    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        && let Ok(decoded) = STANDARD.decode(auth.trim())
        && let Ok(creds) = String::from_utf8(decoded)
        && let Some((id, secret)) = creds.split_once(':')
        && let Ok(id) = urlencoding::decode(id)
        && let Ok(secret) = urlencoding::decode(secret)
    {
        return ClientCredentials::Secret {
            client_id: id.into_owned(),
            secret: secret.into_owned(),
        };
    }

    if let Some(assertion) = fields.client_assertion {
        return ClientCredentials::Assertion {
            client_id: fields.client_id.map(String::from),
            assertion: assertion.to_string(),
        };
    }

    match (fields.client_id, fields.client_secret) {
        (Some(id), Some(secret)) => ClientCredentials::Secret {
            client_id: id.to_string(),
            secret: secret.to_string(),
        },
        (Some(id), None) => ClientCredentials::Public {
            client_id: id.to_string(),
        },
        _ => ClientCredentials::Missing,
    }
}

/// Authenticate the calling client.
pub async fn authenticate(
    state: &OAuth2State,
    headers: &HeaderMap,
    fields: &ClientAuthFields<'_>,
) -> Result<oauth2_client::Model, OAuth2Error> {
    if fields.client_assertion.is_some()
        && fields.client_assertion_type != Some(JWT_BEARER_ASSERTION)
    {
        return Err(OAuth2Error::invalid_request(
            "unsupported client_assertion_type",
        ));
    }

    match client_credentials(headers, fields) {
        ClientCredentials::Secret { client_id, secret } => {
            match state.clients.authenticate_client(&client_id, &secret).await {
                Ok(client) => Ok(client),
                Err(StoreError::Unauthorized) => {
                    tracing::info!(%client_id, "client secret rejected");
                    Err(OAuth2Error::invalid_client("client authentication failed"))
                }
                Err(e) => Err(e.into()),
            }
        }
        ClientCredentials::Public { client_id } => {
            let client = registered_client(state, &client_id).await?;
            if !client.is_public {
                return Err(OAuth2Error::invalid_client("client authentication failed"));
            }
            Ok(client)
        }
        ClientCredentials::Assertion {
            client_id,
            assertion,
        } => verify_client_assertion(state, client_id.as_deref(), &assertion).await,
        ClientCredentials::Missing => {
            Err(OAuth2Error::invalid_client("client authentication required"))
        }
    }
}

async fn registered_client(
    state: &OAuth2State,
    client_id: &str,
) -> Result<oauth2_client::Model, OAuth2Error> {
    match state.clients.get_client(client_id).await {
        Ok(client) => Ok(client),
        Err(StoreError::NotFound) => {
            tracing::info!(client_id, "unknown client");
            Err(OAuth2Error::invalid_client("client authentication failed"))
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Deserialize)]
struct AssertionClaims {
    sub: String,
    jti: String,
    exp: i64,
}

#[derive(Deserialize)]
struct UnverifiedIssuer {
    iss: String,
}

/// `iss` of a JWT before its signature is checked; only used to pick the
/// verification key.
fn unverified_issuer(assertion: &str) -> Option<String> {
    let payload = assertion.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice::<UnverifiedIssuer>(&bytes)
        .ok()
        .map(|peek| peek.iss)
}

async fn verify_client_assertion(
    state: &OAuth2State,
    claimed_id: Option<&str>,
    assertion: &str,
) -> Result<oauth2_client::Model, OAuth2Error> {
    let rejected = || OAuth2Error::invalid_client("client assertion rejected");

    let issuer = unverified_issuer(assertion).ok_or_else(rejected)?;
    if claimed_id.is_some_and(|id| id != issuer) {
        return Err(rejected());
    }

    let client = registered_client(state, &issuer).await?;
    let Some(pem) = client.public_key_pem.as_deref() else {
        tracing::info!(client_id = %client.id, "client has no key for private_key_jwt");
        return Err(rejected());
    };
    let key = DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| {
        tracing::error!(client_id = %client.id, error = %e, "registered client key is unusable");
        rejected()
    })?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&[
        state.token_endpoint(),
        format!("{}/oauth2/token", state.issuer()),
    ]);
    validation.set_issuer(&[client.id.as_str()]);
    validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

    let claims = jsonwebtoken::decode::<AssertionClaims>(assertion, &key, &validation)
        .map_err(|e| {
            tracing::info!(client_id = %client.id, error = %e, "client assertion did not verify");
            rejected()
        })?
        .claims;
    if claims.sub != client.id || claims.jti.is_empty() {
        return Err(rejected());
    }

    state.jtis.client_assertion_jwt_valid(&claims.jti).await?;
    let expires_at = OffsetDateTime::from_unix_timestamp(claims.exp).map_err(|_| rejected())?;
    state
        .jtis
        .set_client_assertion_jwt(&claims.jti, expires_at)
        .await?;
    Ok(client)
}
