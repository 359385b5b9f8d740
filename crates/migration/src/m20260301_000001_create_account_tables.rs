//! Creates the first-party identity tables.
//!
//! - account: users, their credentials and the in-flight WebAuthn ceremony
//! - session: one row per minted identity token or pending one-time code

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Account::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Account::Pk).string().not_null().primary_key())
                    .col(
                        ColumnDef::new(Account::Username)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Account::Password).string_len(255).null())
                    .col(ColumnDef::new(Account::Nickname).string().not_null())
                    .col(ColumnDef::new(Account::Mail).string().not_null())
                    .col(
                        ColumnDef::new(Account::MailVerified)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Account::Credentials)
                            .text()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(Account::CeremonyState)
                            .string_len(32)
                            .not_null()
                            .default("not_started"),
                    )
                    .col(ColumnDef::new(Account::CeremonyKind).string_len(32).null())
                    .col(ColumnDef::new(Account::CeremonyChallenge).text().null())
                    .col(
                        ColumnDef::new(Account::CeremonyIssuedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Account::Status)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(Account::CreateTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Account::UpdateTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Session::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Session::Pk).string().not_null().primary_key())
                    .col(ColumnDef::new(Session::Username).string().not_null())
                    .col(ColumnDef::new(Session::Type).string_len(32).not_null())
                    .col(ColumnDef::new(Session::Code).string().null())
                    .col(ColumnDef::new(Session::ClientId).string().null())
                    .col(ColumnDef::new(Session::RedirectUri).string().null())
                    .col(ColumnDef::new(Session::Scope).text().null())
                    .col(ColumnDef::new(Session::State).string().null())
                    .col(ColumnDef::new(Session::Nonce).string().null())
                    .col(ColumnDef::new(Session::IdToken).text().null())
                    .col(ColumnDef::new(Session::AccessToken).string().null())
                    .col(ColumnDef::new(Session::RequestId).string().null())
                    .col(ColumnDef::new(Session::JwtId).string().null())
                    .col(ColumnDef::new(Session::Kid).string().null())
                    .col(
                        ColumnDef::new(Session::CreateTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Session::UpdateTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_session_client_code")
                    .table(Session::Table)
                    .col(Session::ClientId)
                    .col(Session::Code)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_session_client_access_token")
                    .table(Session::Table)
                    .col(Session::ClientId)
                    .col(Session::AccessToken)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_session_jwt_id")
                    .table(Session::Table)
                    .col(Session::JwtId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_session_jwt_id").to_owned())
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_session_client_access_token")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(Index::drop().name("idx_session_client_code").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Session::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Account::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Account {
    Table,
    Pk,
    Username,
    Password,
    Nickname,
    Mail,
    MailVerified,
    Credentials,
    CeremonyState,
    CeremonyKind,
    CeremonyChallenge,
    CeremonyIssuedAt,
    Status,
    CreateTime,
    UpdateTime,
}

#[derive(DeriveIden)]
enum Session {
    Table,
    Pk,
    Username,
    Type,
    Code,
    ClientId,
    RedirectUri,
    Scope,
    State,
    Nonce,
    IdToken,
    AccessToken,
    RequestId,
    JwtId,
    Kid,
    CreateTime,
    UpdateTime,
}
