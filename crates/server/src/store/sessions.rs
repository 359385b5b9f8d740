//! Session rows: minted identity tokens, pending email codes and the
//! authorization-code correlation records.

use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DbErr, EntityTrait,
    QueryFilter,
};
use time::OffsetDateTime;

use crate::entity::session::{self, SessionKind};

#[derive(Debug, Clone)]
pub struct NewSession {
    pub username: String,
    pub kind: SessionKind,
    pub code: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub request_id: Option<String>,
    pub kid: Option<String>,
    /// When set, `jwt_id` is the row's own primary key.
    pub bind_jwt_id: bool,
}

impl NewSession {
    pub fn new(username: impl Into<String>, kind: SessionKind) -> Self {
        Self {
            username: username.into(),
            kind,
            code: None,
            client_id: None,
            redirect_uri: None,
            scope: None,
            state: None,
            nonce: None,
            request_id: None,
            kid: None,
            bind_jwt_id: false,
        }
    }
}

pub async fn insert_session<C: ConnectionTrait>(
    db: &C,
    new: NewSession,
) -> Result<session::Model, DbErr> {
    let now = OffsetDateTime::now_utc();
    let pk = uuid::Uuid::new_v4().to_string();
    session::ActiveModel {
        jwt_id: Set(new.bind_jwt_id.then(|| pk.clone())),
        pk: Set(pk),
        username: Set(new.username),
        kind: Set(new.kind),
        code: Set(new.code),
        client_id: Set(new.client_id),
        redirect_uri: Set(new.redirect_uri),
        scope: Set(new.scope),
        state: Set(new.state),
        nonce: Set(new.nonce),
        id_token: Set(None),
        access_token: Set(None),
        request_id: Set(new.request_id),
        kid: Set(new.kid),
        create_time: Set(now),
        update_time: Set(now),
    }
    .insert(db)
    .await
}

pub async fn find_by_id<C: ConnectionTrait>(
    db: &C,
    pk: &str,
) -> Result<Option<session::Model>, DbErr> {
    session::Entity::find_by_id(pk).one(db).await
}

pub async fn find_by_jwt_id<C: ConnectionTrait>(
    db: &C,
    jti: &str,
) -> Result<Option<session::Model>, DbErr> {
    session::Entity::find()
        .filter(session::Column::JwtId.eq(jti))
        .one(db)
        .await
}

pub async fn find_by_client_code<C: ConnectionTrait>(
    db: &C,
    client_id: &str,
    code_signature: &str,
) -> Result<Option<session::Model>, DbErr> {
    session::Entity::find()
        .filter(session::Column::Kind.eq(SessionKind::Code))
        .filter(session::Column::ClientId.eq(client_id))
        .filter(session::Column::Code.eq(code_signature))
        .one(db)
        .await
}

pub async fn find_by_client_access_token<C: ConnectionTrait>(
    db: &C,
    client_id: &str,
    access_signature: &str,
) -> Result<Option<session::Model>, DbErr> {
    session::Entity::find()
        .filter(session::Column::ClientId.eq(client_id))
        .filter(session::Column::AccessToken.eq(access_signature))
        .one(db)
        .await
}

/// Lookup used by the `/oauth2/user` extension: the ID token's subject,
/// signing key and `jti` must all belong to the same row.
pub async fn find_by_client_user_token<C: ConnectionTrait>(
    db: &C,
    client_id: &str,
    username: &str,
    kid: &str,
    jti: &str,
) -> Result<Option<session::Model>, DbErr> {
    session::Entity::find()
        .filter(session::Column::ClientId.eq(client_id))
        .filter(session::Column::Username.eq(username))
        .filter(session::Column::Kid.eq(kid))
        .filter(session::Column::JwtId.eq(jti))
        .one(db)
        .await
}

/// Record what an exchange produced on the code's session row.
pub async fn attach_tokens<C: ConnectionTrait>(
    db: &C,
    pk: &str,
    access_signature: &str,
    id_token: Option<String>,
    jwt_id: Option<String>,
    kid: &str,
) -> Result<(), DbErr> {
    session::Entity::update_many()
        .set(session::ActiveModel {
            access_token: Set(Some(access_signature.to_string())),
            id_token: Set(id_token),
            jwt_id: Set(jwt_id),
            kid: Set(Some(kid.to_string())),
            update_time: Set(OffsetDateTime::now_utc()),
            ..Default::default()
        })
        .filter(session::Column::Pk.eq(pk))
        .exec(db)
        .await?;
    Ok(())
}

/// Point the session of `request_id` at a rotated access token.
pub async fn replace_access_token<C: ConnectionTrait>(
    db: &C,
    client_id: &str,
    request_id: &str,
    access_signature: &str,
) -> Result<(), DbErr> {
    session::Entity::update_many()
        .set(session::ActiveModel {
            access_token: Set(Some(access_signature.to_string())),
            update_time: Set(OffsetDateTime::now_utc()),
            ..Default::default()
        })
        .filter(session::Column::ClientId.eq(client_id))
        .filter(session::Column::RequestId.eq(request_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Single-use consumption of a pending email code. The row is deleted only
/// if kind and code match; exactly one caller can observe `true`.
pub async fn consume_code<C: ConnectionTrait>(
    db: &C,
    pk: &str,
    kind: SessionKind,
    code: &str,
) -> Result<bool, DbErr> {
    let result = session::Entity::delete_many()
        .filter(session::Column::Pk.eq(pk))
        .filter(session::Column::Kind.eq(kind))
        .filter(session::Column::Code.eq(code))
        .exec(db)
        .await?;
    Ok(result.rows_affected == 1)
}

pub async fn delete_session<C: ConnectionTrait>(db: &C, pk: &str) -> Result<(), DbErr> {
    session::Entity::delete_by_id(pk).exec(db).await?;
    Ok(())
}
