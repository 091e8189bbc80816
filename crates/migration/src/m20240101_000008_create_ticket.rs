//! Create `ticket` table (support workflow, company-scoped).
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Ticket::Table)
                    .if_not_exists()
                    .col(uuid(Ticket::Id).primary_key())
                    .col(uuid(Ticket::CompanyId).not_null())
                    .col(ColumnDef::new(Ticket::ConversationId).uuid().null())
                    .col(string_len(Ticket::Title, 255).not_null())
                    .col(string_len(Ticket::Status, 32).not_null())
                    .col(string_len(Ticket::Priority, 16).not_null())
                    .col(ColumnDef::new(Ticket::CreatedById).uuid().null())
                    .col(ColumnDef::new(Ticket::AssigneeId).uuid().null())
                    .col(timestamp_with_time_zone(Ticket::CreatedAt).not_null())
                    .col(timestamp_with_time_zone(Ticket::UpdatedAt).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_ticket_company")
                            .from(Ticket::Table, Ticket::CompanyId)
                            .to(Company::Table, Company::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_ticket_conversation")
                            .from(Ticket::Table, Ticket::ConversationId)
                            .to(Conversation::Table, Conversation::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Ticket::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum Ticket {
    Table,
    Id,
    CompanyId,
    ConversationId,
    Title,
    Status,
    Priority,
    CreatedById,
    AssigneeId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Company { Table, Id }

#[derive(DeriveIden)]
enum Conversation { Table, Id }
