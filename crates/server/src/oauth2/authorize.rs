//! Authorize step: validate the request against the client registration,
//! send anonymous browsers to sign in, and mint codes for signed-in ones.

use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use time::OffsetDateTime;
use utoipa::IntoParams;

use super::error::OAuth2Error;
use super::state::OAuth2State;
use super::storage::{GrantRequest, OpenIdSession};
use crate::crypto::{generate_token, token_signature};
use crate::entity::oauth2_client;
use crate::error::StoreError;
use crate::validation::return_url::encode_return_url;

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuthorizeParams {
    /// Must be `code`
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    /// Required when the client registered more than one
    pub redirect_uri: Option<String>,
    /// Space-separated scopes
    pub scope: Option<String>,
    /// Returned unchanged to the client
    pub state: Option<String>,
    /// Copied into the ID token
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    /// `plain` or `S256`
    pub code_challenge_method: Option<String>,
}

/// An authorize request that passed every registration check.
#[derive(Debug, Clone)]
pub struct ValidatedAuthorize {
    pub client: oauth2_client::Model,
    pub redirect_uri: String,
    /// The request named `redirect_uri` rather than falling back to the only
    /// registered one; the token request must then repeat it.
    pub redirect_uri_given: bool,
    pub requested_scopes: Vec<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// Before the redirect URI is trusted errors go back to the user agent;
/// after, they go to the client.
#[derive(Debug)]
pub enum AuthorizeRejection {
    Direct(OAuth2Error),
    Redirect {
        error: OAuth2Error,
        redirect_uri: String,
        state: Option<String>,
    },
}

impl IntoResponse for AuthorizeRejection {
    fn into_response(self) -> Response {
        match self {
            AuthorizeRejection::Direct(error) => error.into_response(),
            AuthorizeRejection::Redirect {
                error,
                redirect_uri,
                state,
            } => error.redirect(&redirect_uri, state.as_deref()),
        }
    }
}

pub fn split_scopes(scope: Option<&str>) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for s in scope.unwrap_or_default().split_whitespace() {
        if !scopes.iter().any(|seen| seen == s) {
            scopes.push(s.to_string());
        }
    }
    scopes
}

impl OAuth2State {
    pub async fn validate_authorize(
        &self,
        params: &AuthorizeParams,
    ) -> Result<ValidatedAuthorize, AuthorizeRejection> {
        let direct = AuthorizeRejection::Direct;

        let client_id = params
            .client_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| direct(OAuth2Error::invalid_request("client_id is required")))?;

        let client = match self.clients.get_client(client_id).await {
            Ok(client) => client,
            Err(StoreError::NotFound) => {
                tracing::info!(client_id, "authorize request for unknown client");
                return Err(direct(OAuth2Error::invalid_request("unknown client")));
            }
            Err(e) => return Err(direct(e.into())),
        };

        let redirect_uri = match params.redirect_uri.as_deref() {
            Some(uri) if client.is_redirect_uri_allowed(uri) => uri.to_string(),
            Some(uri) => {
                tracing::info!(client_id, redirect_uri = uri, "unregistered redirect_uri");
                return Err(direct(OAuth2Error::invalid_request(
                    "redirect_uri is not registered for this client",
                )));
            }
            None => match client.redirect_uris_list().as_slice() {
                [only] => only.clone(),
                _ => {
                    return Err(direct(OAuth2Error::invalid_request(
                        "redirect_uri is required",
                    )));
                }
            },
        };

        let redirect = |error: OAuth2Error| AuthorizeRejection::Redirect {
            error,
            redirect_uri: redirect_uri.clone(),
            state: params.state.clone(),
        };

        if params.response_type.as_deref() != Some("code") {
            return Err(redirect(OAuth2Error::unsupported_response_type(
                "only the `code` response type is supported",
            )));
        }
        if !client.is_response_type_allowed("code")
            || !client.is_grant_type_allowed("authorization_code")
        {
            return Err(redirect(OAuth2Error::unauthorized_client(
                "client may not use the authorization code grant",
            )));
        }

        let requested_scopes = split_scopes(params.scope.as_deref());
        if let Some(scope) = requested_scopes.iter().find(|s| !client.is_scope_allowed(s)) {
            return Err(redirect(OAuth2Error::invalid_scope(format!(
                "scope `{scope}` is not allowed for this client"
            ))));
        }

        let code_challenge = params.code_challenge.clone().filter(|c| !c.is_empty());
        let code_challenge_method = params.code_challenge_method.clone();
        match (&code_challenge, code_challenge_method.as_deref()) {
            (Some(_), None | Some("plain") | Some("S256")) => {}
            (Some(_), Some(_)) => {
                return Err(redirect(OAuth2Error::invalid_request(
                    "code_challenge_method must be `plain` or `S256`",
                )));
            }
            (None, Some(_)) => {
                return Err(redirect(OAuth2Error::invalid_request(
                    "code_challenge_method without code_challenge",
                )));
            }
            (None, None) if client.is_public => {
                return Err(redirect(OAuth2Error::invalid_request(
                    "public clients must use PKCE",
                )));
            }
            (None, None) => {}
        }

        Ok(ValidatedAuthorize {
            client,
            redirect_uri,
            redirect_uri_given: params.redirect_uri.is_some(),
            requested_scopes,
            state: params.state.clone(),
            nonce: params.nonce.clone(),
            code_challenge,
            code_challenge_method,
        })
    }

    /// Where an anonymous browser is sent: the web sign-in page, carrying the
    /// authorize request to replay afterwards.
    pub fn signin_redirect(&self, raw_query: Option<&str>) -> String {
        let source = match raw_query {
            Some(query) if !query.is_empty() => self.endpoint(&format!("/oauth2/auth?{query}")),
            _ => self.endpoint("/oauth2/auth"),
        };
        format!(
            "{}/account/signin?source={}",
            self.config.web_url,
            encode_return_url(&source)
        )
    }

    /// Mint an authorization code for `username`, who signed in at
    /// `auth_time`, and return the client redirect carrying it.
    pub async fn issue_code(
        &self,
        authorize: &ValidatedAuthorize,
        username: &str,
        granted_scopes: Vec<String>,
        auth_time: i64,
    ) -> Result<String, OAuth2Error> {
        let code = generate_token()?;
        let signature = token_signature(&code);
        let now = OffsetDateTime::now_utc();

        let request = GrantRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            client_id: authorize.client.id.clone(),
            username: username.to_string(),
            redirect_uri: authorize.redirect_uri.clone(),
            redirect_uri_given: authorize.redirect_uri_given,
            requested_scopes: authorize.requested_scopes.clone(),
            granted_scopes,
            code_challenge: authorize.code_challenge.clone(),
            code_challenge_method: authorize.code_challenge_method.clone(),
            nonce: authorize.nonce.clone(),
            state: authorize.state.clone(),
            requested_at: now.unix_timestamp(),
            auth_time,
        };
        let openid = request.has_scope("openid").then(|| OpenIdSession {
            subject: username.to_string(),
            client_id: request.client_id.clone(),
            nonce: request.nonce.clone(),
            auth_time: request.auth_time,
            requested_at: request.requested_at,
        });

        self.codes
            .issue_authorization_code(
                &signature,
                &request,
                now + self.code_lifetime(),
                openid.as_ref(),
            )
            .await?;

        let mut url = url::Url::parse(&authorize.redirect_uri)
            .map_err(|_| OAuth2Error::invalid_request("redirect_uri is not a valid URL"))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("code", &code);
            if let Some(state) = &authorize.state {
                pairs.append_pair("state", state);
            }
        }

        tracing::info!(
            client_id = %request.client_id,
            username,
            request_id = %request.request_id,
            "authorization code issued"
        );
        Ok(url.into())
    }
}
