use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Users: seat counting per company
        manager
            .create_index(
                Index::create()
                    .name("idx_user_company_role")
                    .table(User::Table)
                    .col(User::CompanyId)
                    .col(User::Role)
                    .to_owned(),
            )
            .await?;

        // Invites: outstanding reservations per company
        manager
            .create_index(
                Index::create()
                    .name("idx_invite_company_expires")
                    .table(Invite::Table)
                    .col(Invite::CompanyId)
                    .col(Invite::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        // Sessions: revoke-all and sweep
        manager
            .create_index(
                Index::create()
                    .name("idx_session_user")
                    .table(Session::Table)
                    .col(Session::UserId)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_session_expires")
                    .table(Session::Table)
                    .col(Session::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        // AuditLog: keyset pagination by (company_id, created_at, id)
        manager
            .create_index(
                Index::create()
                    .name("idx_audit_company_created")
                    .table(AuditLog::Table)
                    .col(AuditLog::CompanyId)
                    .col(AuditLog::CreatedAt)
                    .col(AuditLog::Id)
                    .to_owned(),
            )
            .await?;

        // Support entities: tenant lookups
        manager
            .create_index(
                Index::create()
                    .name("idx_conversation_company")
                    .table(Conversation::Table)
                    .col(Conversation::CompanyId)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_ticket_company")
                    .table(Ticket::Table)
                    .col(Ticket::CompanyId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_user_company_role").table(User::Table).to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_invite_company_expires").table(Invite::Table).to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_session_user").table(Session::Table).to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_session_expires").table(Session::Table).to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_audit_company_created").table(AuditLog::Table).to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_conversation_company").table(Conversation::Table).to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_ticket_company").table(Ticket::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum User { Table, CompanyId, Role }

#[derive(DeriveIden)]
enum Invite { Table, CompanyId, ExpiresAt }

#[derive(DeriveIden)]
enum Session { Table, UserId, ExpiresAt }

#[derive(DeriveIden)]
enum AuditLog { Table, CompanyId, CreatedAt, Id }

#[derive(DeriveIden)]
enum Conversation { Table, CompanyId }

#[derive(DeriveIden)]
enum Ticket { Table, CompanyId }
