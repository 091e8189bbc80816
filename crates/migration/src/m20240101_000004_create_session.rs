//! Create `session` table: one row per device login.
//!
//! Refresh and access tokens are stored as SHA-256 digests.
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Session::Table)
                    .if_not_exists()
                    .col(uuid(Session::Id).primary_key())
                    .col(uuid(Session::UserId).not_null())
                    .col(string_len(Session::RefreshTokenHash, 64).unique_key().not_null())
                    .col(ColumnDef::new(Session::AccessTokenHash).string_len(64).null())
                    .col(ColumnDef::new(Session::UserAgent).string_len(512).null())
                    .col(ColumnDef::new(Session::IpAddress).string_len(64).null())
                    .col(boolean(Session::IsValid).not_null().default(true))
                    .col(ColumnDef::new(Session::RevokedAt).timestamp_with_time_zone().null())
                    .col(ColumnDef::new(Session::RevokedReason).string_len(255).null())
                    .col(timestamp_with_time_zone(Session::ExpiresAt).not_null())
                    .col(ColumnDef::new(Session::LastUsedAt).timestamp_with_time_zone().null())
                    .col(timestamp_with_time_zone(Session::CreatedAt).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_session_user")
                            .from(Session::Table, Session::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Session::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum Session {
    Table,
    Id,
    UserId,
    RefreshTokenHash,
    AccessTokenHash,
    UserAgent,
    IpAddress,
    IsValid,
    RevokedAt,
    RevokedReason,
    ExpiresAt,
    LastUsedAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum User { Table, Id }
