//! Create `conversation` table (support workflow, company-scoped).
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Conversation::Table)
                    .if_not_exists()
                    .col(uuid(Conversation::Id).primary_key())
                    .col(uuid(Conversation::CompanyId).not_null())
                    .col(ColumnDef::new(Conversation::ClientId).uuid().null())
                    .col(ColumnDef::new(Conversation::AssigneeId).uuid().null())
                    .col(string_len(Conversation::Channel, 32).not_null())
                    .col(string_len(Conversation::Status, 32).not_null())
                    .col(timestamp_with_time_zone(Conversation::CreatedAt).not_null())
                    .col(timestamp_with_time_zone(Conversation::UpdatedAt).not_null())
                    .col(ColumnDef::new(Conversation::ClosedAt).timestamp_with_time_zone().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_conversation_company")
                            .from(Conversation::Table, Conversation::CompanyId)
                            .to(Company::Table, Company::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_conversation_client")
                            .from(Conversation::Table, Conversation::ClientId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_conversation_assignee")
                            .from(Conversation::Table, Conversation::AssigneeId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Conversation::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum Conversation { Table, Id, CompanyId, ClientId, AssigneeId, Channel, Status, CreatedAt, UpdatedAt, ClosedAt }

#[derive(DeriveIden)]
enum Company { Table, Id }

#[derive(DeriveIden)]
enum User { Table, Id }
