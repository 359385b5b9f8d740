//! Account rows and the ceremony state machine persisted on them.

use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DbErr, EntityTrait,
    QueryFilter,
};
use time::OffsetDateTime;

use crate::entity::account::{self, CeremonyKind, CeremonyState, STATUS_ACTIVE};

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    /// Argon2 PHC string
    pub password: Option<String>,
    pub nickname: String,
    pub mail: String,
    /// Control of `mail` was proven with a one-time code
    pub mail_verified: bool,
}

pub async fn find_by_username<C: ConnectionTrait>(
    db: &C,
    username: &str,
) -> Result<Option<account::Model>, DbErr> {
    account::Entity::find()
        .filter(account::Column::Username.eq(username))
        .one(db)
        .await
}

pub async fn insert_account<C: ConnectionTrait>(
    db: &C,
    new: NewAccount,
) -> Result<account::Model, DbErr> {
    let now = OffsetDateTime::now_utc();
    account::ActiveModel {
        pk: Set(uuid::Uuid::new_v4().to_string()),
        username: Set(new.username),
        password: Set(new.password),
        nickname: Set(new.nickname),
        mail: Set(new.mail),
        mail_verified: Set(new.mail_verified),
        credentials: Set("[]".to_string()),
        ceremony_state: Set(CeremonyState::NotStarted),
        ceremony_kind: Set(None),
        ceremony_challenge: Set(None),
        ceremony_issued_at: Set(None),
        status: Set(STATUS_ACTIVE),
        create_time: Set(now),
        update_time: Set(now),
    }
    .insert(db)
    .await
}

/// Take over a row left behind by a passkey registration that never
/// finished. The guards repeat [`account::Model::is_abandoned_registration`]
/// so a concurrent sign-up or registration finish cannot be overwritten.
async fn claim_abandoned<C: ConnectionTrait>(
    db: &C,
    username: &str,
    update: account::ActiveModel,
) -> Result<bool, DbErr> {
    let result = account::Entity::update_many()
        .set(update)
        .filter(account::Column::Username.eq(username))
        .filter(account::Column::Password.is_null())
        .filter(account::Column::MailVerified.eq(false))
        .filter(account::Column::Credentials.eq("[]"))
        .filter(account::Column::CeremonyKind.eq(CeremonyKind::Registration))
        .filter(account::Column::CeremonyState.ne(CeremonyState::Completed))
        .exec(db)
        .await?;
    Ok(result.rows_affected == 1)
}

/// Claim an abandoned registration by setting a password on it.
pub async fn claim_with_password<C: ConnectionTrait>(
    db: &C,
    username: &str,
    password_hash: &str,
) -> Result<bool, DbErr> {
    let now = OffsetDateTime::now_utc();
    claim_abandoned(
        db,
        username,
        account::ActiveModel {
            password: Set(Some(password_hash.to_string())),
            ceremony_state: Set(CeremonyState::NotStarted),
            ceremony_kind: Set(None),
            ceremony_challenge: Set(None),
            ceremony_issued_at: Set(None),
            update_time: Set(now),
            ..Default::default()
        },
    )
    .await
}

/// Claim an abandoned registration for an address proven by email code.
pub async fn claim_with_mail<C: ConnectionTrait>(
    db: &C,
    username: &str,
    nickname: &str,
) -> Result<bool, DbErr> {
    let now = OffsetDateTime::now_utc();
    claim_abandoned(
        db,
        username,
        account::ActiveModel {
            nickname: Set(nickname.to_string()),
            mail: Set(username.to_string()),
            mail_verified: Set(true),
            ceremony_state: Set(CeremonyState::NotStarted),
            ceremony_kind: Set(None),
            ceremony_challenge: Set(None),
            ceremony_issued_at: Set(None),
            update_time: Set(now),
            ..Default::default()
        },
    )
    .await
}

/// `* -> ChallengeIssued`. Overwrites any earlier challenge, so beginning a
/// ceremony again abandons the previous one.
pub async fn issue_challenge<C: ConnectionTrait>(
    db: &C,
    username: &str,
    kind: CeremonyKind,
    challenge: String,
) -> Result<OffsetDateTime, DbErr> {
    let now = OffsetDateTime::now_utc();
    let result = account::Entity::update_many()
        .set(account::ActiveModel {
            ceremony_state: Set(CeremonyState::ChallengeIssued),
            ceremony_kind: Set(Some(kind)),
            ceremony_challenge: Set(Some(challenge)),
            ceremony_issued_at: Set(Some(now)),
            update_time: Set(now),
            ..Default::default()
        })
        .filter(account::Column::Username.eq(username))
        .exec(db)
        .await?;
    if result.rows_affected != 1 {
        return Err(DbErr::RecordNotUpdated);
    }
    Ok(now)
}

/// `ChallengeIssued -> Completed`, only if the row still holds exactly the
/// challenge the caller verified against. Clears the challenge and, when
/// given, stores the new credential list in the same statement.
///
/// Returns false when another request completed or replaced the ceremony
/// first.
pub async fn complete_ceremony<C: ConnectionTrait>(
    db: &C,
    username: &str,
    kind: CeremonyKind,
    expected_challenge: &str,
    credentials: Option<String>,
) -> Result<bool, DbErr> {
    let mut update = account::ActiveModel {
        ceremony_state: Set(CeremonyState::Completed),
        ceremony_challenge: Set(None),
        update_time: Set(OffsetDateTime::now_utc()),
        ..Default::default()
    };
    if let Some(credentials) = credentials {
        update.credentials = Set(credentials);
    }

    let result = account::Entity::update_many()
        .set(update)
        .filter(account::Column::Username.eq(username))
        .filter(account::Column::CeremonyState.eq(CeremonyState::ChallengeIssued))
        .filter(account::Column::CeremonyKind.eq(kind))
        .filter(account::Column::CeremonyChallenge.eq(expected_challenge))
        .exec(db)
        .await?;
    Ok(result.rows_affected == 1)
}
