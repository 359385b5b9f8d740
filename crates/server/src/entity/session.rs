//! Session entity - one row per minted identity token or pending one-time code.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// What produced the session row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    #[sea_orm(string_value = "password")]
    Password,
    #[sea_orm(string_value = "webauthn")]
    Webauthn,
    /// Pending email sign-in code
    #[sea_orm(string_value = "signin")]
    Signin,
    /// Pending email sign-up code
    #[sea_orm(string_value = "signup")]
    Signup,
    /// Authorization code issued to an OAuth2 client
    #[sea_orm(string_value = "code")]
    Code,
    /// Identity token minted after an email-code sign-in
    #[sea_orm(string_value = "auth")]
    Auth,
    #[sea_orm(string_value = "anonymous")]
    Anonymous,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "session")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub pk: String,
    pub username: String,
    #[sea_orm(column_name = "type")]
    pub kind: SessionKind,
    /// One-time email code, or the signature of an OAuth2 authorization code
    #[serde(skip_serializing)]
    pub code: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub id_token: Option<String>,
    /// Signature of the access token issued for this session
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    /// OAuth2 request id shared by the code and its tokens
    pub request_id: Option<String>,
    /// `jti` of the identity token bound to this row
    pub jwt_id: Option<String>,
    pub kid: Option<String>,
    pub create_time: OffsetDateTime,
    pub update_time: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether a one-time code stored on this row is older than `lifetime_secs`.
    pub fn is_code_expired(&self, lifetime_secs: i64) -> bool {
        self.create_time + time::Duration::seconds(lifetime_secs) < OffsetDateTime::now_utc()
    }
}
