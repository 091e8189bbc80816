//! Migrator registering entity-specific migrations in dependency order.
//! Indexes are applied last.
pub use sea_orm_migration::prelude::*;

mod m20240101_000001_create_company;
mod m20240101_000002_create_user;
mod m20240101_000003_create_invite;
mod m20240101_000004_create_session;
mod m20240101_000005_create_audit_log;
mod m20240101_000006_create_conversation;
mod m20240101_000007_create_message;
mod m20240101_000008_create_ticket;
mod m20240101_000009_add_indexes;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_company::Migration),
            Box::new(m20240101_000002_create_user::Migration),
            Box::new(m20240101_000003_create_invite::Migration),
            Box::new(m20240101_000004_create_session::Migration),
            Box::new(m20240101_000005_create_audit_log::Migration),
            Box::new(m20240101_000006_create_conversation::Migration),
            Box::new(m20240101_000007_create_message::Migration),
            Box::new(m20240101_000008_create_ticket::Migration),
            // Indexes should always be applied last
            Box::new(m20240101_000009_add_indexes::Migration),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_registered_in_dependency_order() {
        let names: Vec<String> = Migrator::migrations().iter().map(|m| m.name().to_string()).collect();
        assert_eq!(names.len(), 9);
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted, "file prefixes encode the dependency order");
        assert!(names.last().unwrap().ends_with("add_indexes"));
    }
}
