//! Create `company` table, the root of tenant isolation.
//!
//! Companies are soft-deleted through `deleted_at` and never removed while
//! children reference them.
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Company::Table)
                    .if_not_exists()
                    .col(uuid(Company::Id).primary_key())
                    .col(string_len(Company::Name, 128).not_null())
                    .col(string_len(Company::Slug, 64).unique_key().not_null())
                    .col(ColumnDef::new(Company::Cnpj).string_len(18).unique_key().null())
                    .col(string_len(Company::Plan, 32).not_null())
                    .col(integer(Company::MaxUsers).not_null())
                    .col(integer(Company::MaxAgents).not_null())
                    .col(boolean(Company::IsActive).not_null().default(true))
                    .col(timestamp_with_time_zone(Company::CreatedAt).not_null())
                    .col(timestamp_with_time_zone(Company::UpdatedAt).not_null())
                    .col(
                        ColumnDef::new(Company::DeletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Company::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum Company { Table, Id, Name, Slug, Cnpj, Plan, MaxUsers, MaxAgents, IsActive, CreatedAt, UpdatedAt, DeletedAt }
