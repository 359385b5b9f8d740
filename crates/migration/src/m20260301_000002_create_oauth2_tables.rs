//! Creates the OAuth2/OIDC provider tables.
//!
//! Codes and tokens are keyed by their signature (base64url SHA-256 of the
//! raw value). `request_id` columns index every token back to the
//! authorization request it was issued for.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 1. Registered client applications (owned by application tooling)
        manager
            .create_table(
                Table::create()
                    .table(Oauth2Client::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Oauth2Client::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Oauth2Client::Name).string().not_null())
                    .col(ColumnDef::new(Oauth2Client::SecretHash).string().null())
                    .col(
                        ColumnDef::new(Oauth2Client::RotatedSecretHashes)
                            .text()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::RedirectUris)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::GrantTypes)
                            .text()
                            .not_null()
                            .default("authorization_code"),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::ResponseTypes)
                            .text()
                            .not_null()
                            .default("code"),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::Scopes)
                            .text()
                            .not_null()
                            .default("openid profile email"),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::Audience)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::IsPublic)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Oauth2Client::PublicKeyPem).text().null())
                    .col(
                        ColumnDef::new(Oauth2Client::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 2. Authorization codes
        manager
            .create_table(
                Table::create()
                    .table(Oauth2AuthorizationCode::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::Signature)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::RequestId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::ClientId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::Content)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 3. OpenID Connect sessions, keyed by the code they were issued with
        manager
            .create_table(
                Table::create()
                    .table(Oauth2OpenidSession::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Oauth2OpenidSession::Signature)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Oauth2OpenidSession::Content)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2OpenidSession::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 4. Access tokens
        manager
            .create_table(
                Table::create()
                    .table(Oauth2AccessToken::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Oauth2AccessToken::Signature)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AccessToken::RequestId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AccessToken::ClientId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AccessToken::Content)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AccessToken::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AccessToken::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 5. Refresh tokens
        manager
            .create_table(
                Table::create()
                    .table(Oauth2RefreshToken::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Oauth2RefreshToken::Signature)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Oauth2RefreshToken::RequestId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2RefreshToken::ClientId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2RefreshToken::Content)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2RefreshToken::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Oauth2RefreshToken::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2RefreshToken::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 6. Seen client-assertion JWT IDs
        manager
            .create_table(
                Table::create()
                    .table(Oauth2UsedJti::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Oauth2UsedJti::Jti)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Oauth2UsedJti::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Request-id index: lets revocation find rows without the raw token
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_authorization_code_request_id")
                    .table(Oauth2AuthorizationCode::Table)
                    .col(Oauth2AuthorizationCode::RequestId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_access_token_request_id")
                    .table(Oauth2AccessToken::Table)
                    .col(Oauth2AccessToken::RequestId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_refresh_token_request_id")
                    .table(Oauth2RefreshToken::Table)
                    .col(Oauth2RefreshToken::RequestId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_used_jti_expires_at")
                    .table(Oauth2UsedJti::Table)
                    .col(Oauth2UsedJti::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for index in [
            "idx_oauth2_used_jti_expires_at",
            "idx_oauth2_refresh_token_request_id",
            "idx_oauth2_access_token_request_id",
            "idx_oauth2_authorization_code_request_id",
        ] {
            manager
                .drop_index(Index::drop().name(index).to_owned())
                .await?;
        }

        manager
            .drop_table(Table::drop().table(Oauth2UsedJti::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Oauth2RefreshToken::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Oauth2AccessToken::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Oauth2OpenidSession::Table).to_owned())
            .await?;
        manager
            .drop_table(
                Table::drop()
                    .table(Oauth2AuthorizationCode::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(Oauth2Client::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Oauth2Client {
    Table,
    Id,
    Name,
    SecretHash,
    RotatedSecretHashes,
    RedirectUris,
    GrantTypes,
    ResponseTypes,
    Scopes,
    Audience,
    IsPublic,
    PublicKeyPem,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Oauth2AuthorizationCode {
    Table,
    Signature,
    RequestId,
    ClientId,
    Content,
    Active,
    ExpiresAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Oauth2OpenidSession {
    Table,
    Signature,
    Content,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Oauth2AccessToken {
    Table,
    Signature,
    RequestId,
    ClientId,
    Content,
    ExpiresAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Oauth2RefreshToken {
    Table,
    Signature,
    RequestId,
    ClientId,
    Content,
    Active,
    ExpiresAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Oauth2UsedJti {
    Table,
    Jti,
    ExpiresAt,
}
