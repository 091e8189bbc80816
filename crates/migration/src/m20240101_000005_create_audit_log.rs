//! Create `audit_log` table (append-only).
//!
//! `user_id` and `company_id` are nullable for system-level entries. No FK
//! cascades: the trail outlives the rows it describes.
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AuditLog::Table)
                    .if_not_exists()
                    .col(uuid(AuditLog::Id).primary_key())
                    .col(string_len(AuditLog::Action, 32).not_null())
                    .col(string_len(AuditLog::EntityType, 64).not_null())
                    .col(ColumnDef::new(AuditLog::EntityId).uuid().null())
                    .col(ColumnDef::new(AuditLog::OldData).json_binary().null())
                    .col(ColumnDef::new(AuditLog::NewData).json_binary().null())
                    .col(ColumnDef::new(AuditLog::UserId).uuid().null())
                    .col(ColumnDef::new(AuditLog::CompanyId).uuid().null())
                    .col(string_len(AuditLog::Risk, 16).not_null())
                    .col(ColumnDef::new(AuditLog::IpAddress).string_len(64).null())
                    .col(ColumnDef::new(AuditLog::UserAgent).string_len(512).null())
                    .col(timestamp_with_time_zone(AuditLog::CreatedAt).not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(AuditLog::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum AuditLog {
    Table,
    Id,
    Action,
    EntityType,
    EntityId,
    OldData,
    NewData,
    UserId,
    CompanyId,
    Risk,
    IpAddress,
    UserAgent,
    CreatedAt,
}
