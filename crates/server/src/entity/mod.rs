//! SeaORM entities for every table the gateway owns.

pub mod account;
pub mod oauth2_access_token;
pub mod oauth2_authorization_code;
pub mod oauth2_client;
pub mod oauth2_openid_session;
pub mod oauth2_refresh_token;
pub mod oauth2_used_jti;
pub mod session;
