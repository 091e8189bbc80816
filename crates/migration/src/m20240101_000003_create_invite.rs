//! Create `invite` table.
//!
//! Only the SHA-256 digest of the invite token is stored. `used_by_id` is
//! unique: one user redeems a single-use invite at most once.
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Invite::Table)
                    .if_not_exists()
                    .col(uuid(Invite::Id).primary_key())
                    .col(string_len(Invite::TokenHash, 64).unique_key().not_null())
                    .col(string_len(Invite::Email, 255).not_null())
                    .col(string_len(Invite::Role, 32).not_null())
                    .col(uuid(Invite::CompanyId).not_null())
                    .col(uuid(Invite::InvitedById).not_null())
                    .col(ColumnDef::new(Invite::UsedById).uuid().unique_key().null())
                    .col(integer(Invite::MaxUses).not_null().default(1))
                    .col(integer(Invite::Uses).not_null().default(0))
                    .col(timestamp_with_time_zone(Invite::ExpiresAt).not_null())
                    .col(ColumnDef::new(Invite::UsedAt).timestamp_with_time_zone().null())
                    .col(timestamp_with_time_zone(Invite::CreatedAt).not_null())
                    .check(Expr::col(Invite::Uses).lte(Expr::col(Invite::MaxUses)))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_invite_company")
                            .from(Invite::Table, Invite::CompanyId)
                            .to(Company::Table, Company::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_invite_invited_by")
                            .from(Invite::Table, Invite::InvitedById)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_invite_used_by")
                            .from(Invite::Table, Invite::UsedById)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Invite::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum Invite {
    Table,
    Id,
    TokenHash,
    Email,
    Role,
    CompanyId,
    InvitedById,
    UsedById,
    MaxUses,
    Uses,
    ExpiresAt,
    UsedAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Company { Table, Id }

#[derive(DeriveIden)]
enum User { Table, Id }
