use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    TransactionTrait,
};
use time::OffsetDateTime;

use super::SeaOrmStore;
use crate::entity::session::SessionKind;
use crate::entity::{
    oauth2_access_token, oauth2_authorization_code, oauth2_client, oauth2_openid_session,
    oauth2_refresh_token, oauth2_used_jti,
};
use crate::error::StoreError;
use crate::oauth2::storage::{
    ClientStore, CodeStore, ExchangeRecord, GrantRequest, IssuedTokens, JtiStore, OpenIdSession,
    TokenGrant, TokenStore,
};
use crate::store::sessions::{self, NewSession};

// =============================================================================
// Row helpers shared by plain calls and transactions
// =============================================================================

async fn insert_access<C: ConnectionTrait>(
    db: &C,
    signature: &str,
    request: &GrantRequest,
    expires_at: OffsetDateTime,
) -> Result<(), StoreError> {
    oauth2_access_token::ActiveModel {
        signature: Set(signature.to_string()),
        request_id: Set(request.request_id.clone()),
        client_id: Set(request.client_id.clone()),
        content: Set(serde_json::to_string(request)?),
        expires_at: Set(expires_at),
        created_at: Set(OffsetDateTime::now_utc()),
    }
    .insert(db)
    .await?;
    Ok(())
}

async fn insert_refresh<C: ConnectionTrait>(
    db: &C,
    signature: &str,
    request: &GrantRequest,
    expires_at: OffsetDateTime,
) -> Result<(), StoreError> {
    oauth2_refresh_token::ActiveModel {
        signature: Set(signature.to_string()),
        request_id: Set(request.request_id.clone()),
        client_id: Set(request.client_id.clone()),
        content: Set(serde_json::to_string(request)?),
        active: Set(true),
        expires_at: Set(expires_at),
        created_at: Set(OffsetDateTime::now_utc()),
    }
    .insert(db)
    .await?;
    Ok(())
}

async fn insert_issued<C: ConnectionTrait>(
    db: &C,
    request: &GrantRequest,
    tokens: &IssuedTokens,
) -> Result<(), StoreError> {
    insert_access(db, &tokens.access.signature, request, tokens.access.expires_at).await?;
    if let Some(refresh) = &tokens.refresh {
        insert_refresh(db, &refresh.signature, request, refresh.expires_at).await?;
    }
    Ok(())
}

async fn insert_code<C: ConnectionTrait>(
    db: &C,
    signature: &str,
    request: &GrantRequest,
    expires_at: OffsetDateTime,
) -> Result<(), StoreError> {
    oauth2_authorization_code::ActiveModel {
        signature: Set(signature.to_string()),
        request_id: Set(request.request_id.clone()),
        client_id: Set(request.client_id.clone()),
        content: Set(serde_json::to_string(request)?),
        active: Set(true),
        expires_at: Set(expires_at),
        created_at: Set(OffsetDateTime::now_utc()),
    }
    .insert(db)
    .await?;
    Ok(())
}

async fn insert_openid<C: ConnectionTrait>(
    db: &C,
    signature: &str,
    session: &OpenIdSession,
) -> Result<(), StoreError> {
    oauth2_openid_session::ActiveModel {
        signature: Set(signature.to_string()),
        content: Set(serde_json::to_string(session)?),
        created_at: Set(OffsetDateTime::now_utc()),
    }
    .insert(db)
    .await?;
    Ok(())
}

/// `active = true -> false` on a code; the rows-affected count decides who won.
async fn deactivate_code<C: ConnectionTrait>(db: &C, signature: &str) -> Result<(), StoreError> {
    let result = oauth2_authorization_code::Entity::update_many()
        .set(oauth2_authorization_code::ActiveModel {
            active: Set(false),
            ..Default::default()
        })
        .filter(oauth2_authorization_code::Column::Signature.eq(signature))
        .filter(oauth2_authorization_code::Column::Active.eq(true))
        .exec(db)
        .await?;
    if result.rows_affected == 1 {
        return Ok(());
    }

    match oauth2_authorization_code::Entity::find_by_id(signature)
        .one(db)
        .await?
    {
        Some(code) => Err(StoreError::Invalidated {
            request_id: code.request_id,
        }),
        None => Err(StoreError::NotFound),
    }
}

async fn deactivate_refresh<C: ConnectionTrait>(
    db: &C,
    signature: &str,
) -> Result<(), StoreError> {
    let result = oauth2_refresh_token::Entity::update_many()
        .set(oauth2_refresh_token::ActiveModel {
            active: Set(false),
            ..Default::default()
        })
        .filter(oauth2_refresh_token::Column::Signature.eq(signature))
        .filter(oauth2_refresh_token::Column::Active.eq(true))
        .exec(db)
        .await?;
    if result.rows_affected == 1 {
        return Ok(());
    }

    match oauth2_refresh_token::Entity::find_by_id(signature)
        .one(db)
        .await?
    {
        Some(_) => Err(StoreError::Inactive),
        None => Err(StoreError::NotFound),
    }
}

// =============================================================================
// CodeStore
// =============================================================================

#[async_trait]
impl CodeStore for SeaOrmStore {
    async fn create_authorization_code_session(
        &self,
        signature: &str,
        request: &GrantRequest,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        insert_code(self.db(), signature, request, expires_at).await
    }

    async fn issue_authorization_code(
        &self,
        signature: &str,
        request: &GrantRequest,
        expires_at: OffsetDateTime,
        openid: Option<&OpenIdSession>,
    ) -> Result<(), StoreError> {
        let mut row = NewSession::new(request.username.clone(), SessionKind::Code);
        row.code = Some(signature.to_string());
        row.client_id = Some(request.client_id.clone());
        row.redirect_uri = Some(request.redirect_uri.clone());
        row.scope = Some(request.scope());
        row.state = request.state.clone();
        row.nonce = request.nonce.clone();
        row.request_id = Some(request.request_id.clone());

        let txn = self.db().begin().await?;
        insert_code(&txn, signature, request, expires_at).await?;
        if let Some(openid) = openid {
            insert_openid(&txn, signature, openid).await?;
        }
        sessions::insert_session(&txn, row).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn get_authorization_code_session(
        &self,
        signature: &str,
    ) -> Result<GrantRequest, StoreError> {
        let code = oauth2_authorization_code::Entity::find_by_id(signature)
            .one(self.db())
            .await?
            .ok_or(StoreError::NotFound)?;

        if !code.active {
            return Err(StoreError::Invalidated {
                request_id: code.request_id,
            });
        }
        if code.is_expired() {
            return Err(StoreError::Expired);
        }
        Ok(serde_json::from_str(&code.content)?)
    }

    async fn invalidate_authorization_code_session(
        &self,
        signature: &str,
    ) -> Result<(), StoreError> {
        deactivate_code(self.db(), signature).await
    }

    async fn redeem_authorization_code(
        &self,
        signature: &str,
        request: &GrantRequest,
        tokens: &IssuedTokens,
        record: &ExchangeRecord,
    ) -> Result<(), StoreError> {
        let txn = self.db().begin().await?;
        // Dropping `txn` on an early return rolls back.
        deactivate_code(&txn, signature).await?;
        insert_issued(&txn, request, tokens).await?;
        oauth2_openid_session::Entity::delete_by_id(signature)
            .exec(&txn)
            .await?;
        sessions::attach_tokens(
            &txn,
            &record.session_pk,
            &tokens.access.signature,
            record.id_token.clone(),
            Some(record.session_pk.clone()),
            &record.kid,
        )
        .await?;
        txn.commit().await?;
        Ok(())
    }

    async fn create_openid_connect_session(
        &self,
        signature: &str,
        session: &OpenIdSession,
    ) -> Result<(), StoreError> {
        insert_openid(self.db(), signature, session).await
    }

    async fn get_openid_connect_session(
        &self,
        signature: &str,
    ) -> Result<OpenIdSession, StoreError> {
        let row = oauth2_openid_session::Entity::find_by_id(signature)
            .one(self.db())
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(serde_json::from_str(&row.content)?)
    }

    async fn delete_openid_connect_session(&self, signature: &str) -> Result<(), StoreError> {
        oauth2_openid_session::Entity::delete_by_id(signature)
            .exec(self.db())
            .await?;
        Ok(())
    }
}

// =============================================================================
// TokenStore
// =============================================================================

#[async_trait]
impl TokenStore for SeaOrmStore {
    async fn create_access_token_session(
        &self,
        signature: &str,
        request: &GrantRequest,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        insert_access(self.db(), signature, request, expires_at).await
    }

    async fn get_access_token_session(&self, signature: &str) -> Result<TokenGrant, StoreError> {
        let row = oauth2_access_token::Entity::find_by_id(signature)
            .one(self.db())
            .await?
            .ok_or(StoreError::NotFound)?;
        if row.is_expired() {
            return Err(StoreError::Expired);
        }
        Ok(TokenGrant {
            request: serde_json::from_str(&row.content)?,
            signature: row.signature,
            expires_at: row.expires_at,
            issued_at: row.created_at,
        })
    }

    async fn delete_access_token_session(&self, signature: &str) -> Result<(), StoreError> {
        oauth2_access_token::Entity::delete_by_id(signature)
            .exec(self.db())
            .await?;
        Ok(())
    }

    async fn create_refresh_token_session(
        &self,
        signature: &str,
        request: &GrantRequest,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        insert_refresh(self.db(), signature, request, expires_at).await
    }

    async fn get_refresh_token_session(&self, signature: &str) -> Result<TokenGrant, StoreError> {
        let row = oauth2_refresh_token::Entity::find_by_id(signature)
            .one(self.db())
            .await?
            .ok_or(StoreError::NotFound)?;
        if !row.active {
            return Err(StoreError::Inactive);
        }
        if row.is_expired() {
            return Err(StoreError::Expired);
        }
        Ok(TokenGrant {
            request: serde_json::from_str(&row.content)?,
            signature: row.signature,
            expires_at: row.expires_at,
            issued_at: row.created_at,
        })
    }

    async fn delete_refresh_token_session(&self, signature: &str) -> Result<(), StoreError> {
        oauth2_refresh_token::Entity::delete_by_id(signature)
            .exec(self.db())
            .await?;
        Ok(())
    }

    async fn revoke_access_token(&self, request_id: &str) -> Result<(), StoreError> {
        let result = oauth2_access_token::Entity::delete_many()
            .filter(oauth2_access_token::Column::RequestId.eq(request_id))
            .exec(self.db())
            .await?;
        tracing::debug!(request_id, removed = result.rows_affected, "revoked access tokens");
        Ok(())
    }

    async fn revoke_refresh_token(&self, request_id: &str) -> Result<(), StoreError> {
        oauth2_refresh_token::Entity::update_many()
            .set(oauth2_refresh_token::ActiveModel {
                active: Set(false),
                ..Default::default()
            })
            .filter(oauth2_refresh_token::Column::RequestId.eq(request_id))
            .exec(self.db())
            .await?;
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        old_signature: &str,
        request: &GrantRequest,
        tokens: &IssuedTokens,
    ) -> Result<(), StoreError> {
        let txn = self.db().begin().await?;
        deactivate_refresh(&txn, old_signature).await?;
        oauth2_access_token::Entity::delete_many()
            .filter(oauth2_access_token::Column::RequestId.eq(request.request_id.as_str()))
            .exec(&txn)
            .await?;
        insert_issued(&txn, request, tokens).await?;
        crate::store::sessions::replace_access_token(
            &txn,
            &request.client_id,
            &request.request_id,
            &tokens.access.signature,
        )
        .await?;
        txn.commit().await?;
        Ok(())
    }
}

// =============================================================================
// ClientStore
// =============================================================================

#[async_trait]
impl ClientStore for SeaOrmStore {
    async fn get_client(&self, client_id: &str) -> Result<oauth2_client::Model, StoreError> {
        oauth2_client::Entity::find_by_id(client_id)
            .one(self.db())
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn authenticate_client(
        &self,
        client_id: &str,
        secret: &str,
    ) -> Result<oauth2_client::Model, StoreError> {
        let client = match self.get_client(client_id).await {
            Ok(client) => client,
            Err(StoreError::NotFound) => return Err(StoreError::Unauthorized),
            Err(e) => return Err(e),
        };
        if client.is_public || !client.check_secret(secret) {
            return Err(StoreError::Unauthorized);
        }
        Ok(client)
    }
}

// =============================================================================
// JtiStore
// =============================================================================

#[async_trait]
impl JtiStore for SeaOrmStore {
    async fn client_assertion_jwt_valid(&self, jti: &str) -> Result<(), StoreError> {
        match oauth2_used_jti::Entity::find_by_id(jti)
            .one(self.db())
            .await?
        {
            Some(seen) if seen.expires_at > OffsetDateTime::now_utc() => {
                Err(StoreError::JtiKnown(jti.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn set_client_assertion_jwt(
        &self,
        jti: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let txn = self.db().begin().await?;
        oauth2_used_jti::Entity::delete_many()
            .filter(oauth2_used_jti::Column::ExpiresAt.lte(OffsetDateTime::now_utc()))
            .exec(&txn)
            .await?;
        if oauth2_used_jti::Entity::find_by_id(jti)
            .one(&txn)
            .await?
            .is_some()
        {
            return Err(StoreError::JtiKnown(jti.to_string()));
        }
        oauth2_used_jti::ActiveModel {
            jti: Set(jti.to_string()),
            expires_at: Set(expires_at),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;
        Ok(())
    }
}
