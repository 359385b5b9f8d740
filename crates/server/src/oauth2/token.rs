//! Token step: authorization-code exchange and refresh-token rotation.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use super::authorize::split_scopes;
use super::client_auth::ClientAuthFields;
use super::error::OAuth2Error;
use super::state::OAuth2State;
use super::storage::{ExchangeRecord, GrantRequest, IssuedTokens, NewToken};
use crate::crypto::{generate_token, token_signature, verify_pkce};
use crate::entity::oauth2_client;
use crate::error::StoreError;
use crate::keys::IdentityClaims;
use crate::store::sessions;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TokenRequest {
    /// `authorization_code` or `refresh_token`
    #[serde(default)]
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    /// Refresh only: narrow the granted scope
    pub scope: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub client_assertion_type: Option<String>,
    pub client_assertion: Option<String>,
}

impl TokenRequest {
    pub fn auth_fields(&self) -> ClientAuthFields<'_> {
        ClientAuthFields {
            client_id: self.client_id.as_deref(),
            client_secret: self.client_secret.as_deref(),
            client_assertion_type: self.client_assertion_type.as_deref(),
            client_assertion: self.client_assertion.as_deref(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub scope: String,
}

/// Raw tokens for the response plus what gets persisted.
struct Minted {
    access: String,
    refresh: Option<String>,
    issued: IssuedTokens,
}

impl OAuth2State {
    fn mint(&self, client: &oauth2_client::Model) -> Result<Minted, OAuth2Error> {
        let now = OffsetDateTime::now_utc();
        let access = generate_token()?;
        let refresh = if client.is_grant_type_allowed("refresh_token") {
            Some(generate_token()?)
        } else {
            None
        };
        let issued = IssuedTokens {
            access: NewToken {
                signature: token_signature(&access),
                expires_at: now + self.access_token_lifetime(),
            },
            refresh: refresh.as_deref().map(|raw| NewToken {
                signature: token_signature(raw),
                expires_at: now + self.refresh_token_lifetime(),
            }),
        };
        Ok(Minted {
            access,
            refresh,
            issued,
        })
    }

    /// A spent code came back: everything minted from it is withdrawn.
    async fn revoke_request(&self, request_id: &str) {
        tracing::warn!(request_id, "authorization code replayed, revoking its tokens");
        if let Err(e) = self.tokens.revoke_access_token(request_id).await {
            tracing::error!(request_id, error = %e, "failed to revoke access tokens");
        }
        if let Err(e) = self.tokens.revoke_refresh_token(request_id).await {
            tracing::error!(request_id, error = %e, "failed to revoke refresh tokens");
        }
    }

    async fn code_rejection(&self, e: StoreError) -> OAuth2Error {
        match e {
            StoreError::Invalidated { request_id } => {
                self.revoke_request(&request_id).await;
                OAuth2Error::invalid_grant("authorization code has already been used")
            }
            StoreError::NotFound => OAuth2Error::invalid_grant("authorization code is not known"),
            StoreError::Expired => OAuth2Error::invalid_grant("authorization code has expired"),
            other => other.into(),
        }
    }

    pub async fn exchange_code(
        &self,
        client: &oauth2_client::Model,
        request: &TokenRequest,
    ) -> Result<TokenResponse, OAuth2Error> {
        if !client.is_grant_type_allowed("authorization_code") {
            return Err(OAuth2Error::unauthorized_client(
                "client may not use the authorization code grant",
            ));
        }
        let code = request
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| OAuth2Error::invalid_request("code is required"))?;
        let signature = token_signature(code);

        let grant = match self.codes.get_authorization_code_session(&signature).await {
            Ok(grant) => grant,
            Err(e) => return Err(self.code_rejection(e).await),
        };

        if grant.client_id != client.id {
            tracing::warn!(client_id = %client.id, "code presented by a different client");
            return Err(OAuth2Error::invalid_grant(
                "authorization code was issued to another client",
            ));
        }
        match request.redirect_uri.as_deref() {
            Some(uri) if uri != grant.redirect_uri => {
                return Err(OAuth2Error::invalid_grant("redirect_uri does not match"));
            }
            None if grant.redirect_uri_given => {
                return Err(OAuth2Error::invalid_request(
                    "redirect_uri is required when it was sent to the authorization endpoint",
                ));
            }
            _ => {}
        }
        match (&grant.code_challenge, request.code_verifier.as_deref()) {
            (Some(_), None) => {
                return Err(OAuth2Error::invalid_request("code_verifier is required"));
            }
            (Some(challenge), Some(verifier)) => {
                if !verify_pkce(challenge, grant.code_challenge_method.as_deref(), verifier) {
                    return Err(OAuth2Error::invalid_grant("PKCE verification failed"));
                }
            }
            (None, Some(_)) => {
                return Err(OAuth2Error::invalid_grant(
                    "code_verifier sent for a request without code_challenge",
                ));
            }
            (None, None) => {}
        }

        let Some(session) =
            sessions::find_by_client_code(self.db.as_ref(), &client.id, &signature).await?
        else {
            tracing::error!(client_id = %client.id, request_id = %grant.request_id, "code has no session row");
            return Err(OAuth2Error::invalid_grant("authorization code is not known"));
        };

        // Signed up front so the redemption below writes everything at once.
        let id_token = if grant.has_scope("openid") {
            Some(self.sign_id_token(&grant, &signature, &session.pk).await?)
        } else {
            None
        };
        let record = ExchangeRecord {
            session_pk: session.pk.clone(),
            id_token: id_token.clone(),
            kid: self.keys.kid().to_string(),
        };

        let minted = self.mint(client)?;
        if let Err(e) = self
            .codes
            .redeem_authorization_code(&signature, &grant, &minted.issued, &record)
            .await
        {
            return Err(self.code_rejection(e).await);
        }

        tracing::info!(
            client_id = %client.id,
            username = %grant.username,
            request_id = %grant.request_id,
            "authorization code exchanged"
        );
        Ok(TokenResponse {
            access_token: minted.access,
            token_type: "bearer".to_string(),
            expires_in: self.config.tokens.access_token_lifetime,
            refresh_token: minted.refresh,
            id_token,
            scope: grant.scope(),
        })
    }

    async fn sign_id_token(
        &self,
        grant: &GrantRequest,
        code_signature: &str,
        session_pk: &str,
    ) -> Result<String, OAuth2Error> {
        let (nonce, auth_time) = match self.codes.get_openid_connect_session(code_signature).await
        {
            Ok(oidc) => (oidc.nonce, oidc.auth_time),
            Err(StoreError::NotFound) => (grant.nonce.clone(), grant.auth_time),
            Err(e) => return Err(e.into()),
        };

        let now = OffsetDateTime::now_utc();
        let claims = IdentityClaims {
            iss: self.issuer().to_string(),
            sub: grant.username.clone(),
            aud: Some(grant.client_id.clone()),
            jti: session_pk.to_string(),
            iat: now.unix_timestamp(),
            exp: (now + self.keys.lifespan()).unix_timestamp(),
            auth_time: Some(auth_time),
            nonce,
        };
        Ok(self.keys.sign_claims(&claims)?)
    }

    pub async fn refresh(
        &self,
        client: &oauth2_client::Model,
        request: &TokenRequest,
    ) -> Result<TokenResponse, OAuth2Error> {
        if !client.is_grant_type_allowed("refresh_token") {
            return Err(OAuth2Error::unauthorized_client(
                "client may not use the refresh token grant",
            ));
        }
        let raw = request
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| OAuth2Error::invalid_request("refresh_token is required"))?;
        let signature = token_signature(raw);

        let rejection = |e: StoreError| match e {
            StoreError::NotFound => OAuth2Error::invalid_grant("refresh token is not known"),
            StoreError::Inactive => OAuth2Error::invalid_grant("refresh token has been revoked"),
            StoreError::Expired => OAuth2Error::invalid_grant("refresh token has expired"),
            other => other.into(),
        };

        let grant = self
            .tokens
            .get_refresh_token_session(&signature)
            .await
            .map_err(rejection)?;
        if grant.request.client_id != client.id {
            return Err(OAuth2Error::invalid_grant(
                "refresh token was issued to another client",
            ));
        }

        let mut narrowed = grant.request.clone();
        if request.scope.is_some() {
            let asked = split_scopes(request.scope.as_deref());
            if let Some(scope) = asked.iter().find(|s| !grant.request.has_scope(s)) {
                return Err(OAuth2Error::invalid_scope(format!(
                    "scope `{scope}` was not granted"
                )));
            }
            narrowed.granted_scopes = asked;
        }

        let minted = self.mint(client)?;
        self.tokens
            .rotate_refresh_token(&signature, &narrowed, &minted.issued)
            .await
            .map_err(rejection)?;

        tracing::info!(
            client_id = %client.id,
            request_id = %narrowed.request_id,
            "refresh token rotated"
        );
        Ok(TokenResponse {
            access_token: minted.access,
            token_type: "bearer".to_string(),
            expires_in: self.config.tokens.access_token_lifetime,
            refresh_token: minted.refresh,
            id_token: None,
            scope: narrowed.scope(),
        })
    }
}
