use axum::http::StatusCode;
use axum::response::IntoResponse;
use portal_gateway::error::{AccountError, CeremonyError, ErrorKind, StoreError, TokenError};
use portal_gateway::oauth2::OAuth2Error;
use portal_gateway::response::{ApiError, ResultCode};

#[test]
fn test_store_error_display() {
    assert_eq!(StoreError::NotFound.to_string(), "record not found");
    assert_eq!(
        StoreError::Invalidated {
            request_id: "r1".into()
        }
        .to_string(),
        "authorization code has been invalidated"
    );
    assert!(
        StoreError::JtiKnown("abc".into())
            .to_string()
            .contains("abc")
    );
    assert_eq!(StoreError::Expired.kind(), Some(ErrorKind::Expired));
    assert_eq!(ErrorKind::Invalidated.to_string(), "invalidated");
}

#[test]
fn test_authentication_failures_share_one_message() {
    let account = ApiError::from(AccountError::AuthenticationFailed);
    let ceremony = ApiError::from(CeremonyError::Verification("bad signature".into()));
    assert_eq!(account.code, ResultCode::Unauthorized);
    assert_eq!(ceremony.code, ResultCode::Unauthorized);
    assert_eq!(account.message, ceremony.message);
    assert!(!ceremony.message.contains("bad signature"));
}

#[test]
fn test_ceremony_errors_map_to_result_codes() {
    assert_eq!(
        ApiError::from(CeremonyError::AccountNotFound).code,
        ResultCode::AccountNotExists
    );
    assert_eq!(
        ApiError::from(CeremonyError::AccountExists).code,
        ResultCode::AccountExists
    );
    assert_eq!(
        ApiError::from(CeremonyError::TimedOut).code,
        ResultCode::Conflict
    );
}

#[test]
fn test_token_errors_ask_for_sign_in() {
    let error = ApiError::from(portal_gateway::error::SessionError::Token(TokenError::Expired));
    assert_eq!(error.code, ResultCode::NotLogin);
    assert_eq!(error.into_response().status(), StatusCode::UNAUTHORIZED);
}

#[test]
fn test_oauth2_errors_from_store() {
    let replayed = OAuth2Error::from(StoreError::Invalidated {
        request_id: "r1".into(),
    });
    assert_eq!(replayed.error, "invalid_grant");
    assert_eq!(replayed.status, StatusCode::BAD_REQUEST);

    let unknown = OAuth2Error::from(StoreError::NotFound);
    assert_eq!(unknown.error, "invalid_grant");
    assert_ne!(replayed.description, unknown.description);

    let db = OAuth2Error::from(StoreError::Database(sea_orm::DbErr::Custom("down".into())));
    assert_eq!(db.error, "server_error");
    assert_eq!(db.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(db.description.is_none());

    let replayed_jti = OAuth2Error::from(StoreError::JtiKnown("j".into()));
    assert_eq!(replayed_jti.status, StatusCode::UNAUTHORIZED);
}
