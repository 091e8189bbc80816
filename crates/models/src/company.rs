use sea_orm::{entity::prelude::*, Set, DatabaseConnection};
use uuid::Uuid;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "company")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    #[sea_orm(unique)]
    pub slug: String,
    #[sea_orm(unique)]
    pub cnpj: Option<String>,
    pub plan: String,
    pub max_users: i32,
    pub max_agents: i32,
    pub is_active: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
    pub deleted_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef { panic!("no relations defined here") }
}

impl ActiveModelBehavior for ActiveModel {}

/// Slugs are lowercase ascii, digits and `-`.
pub fn validate_slug(slug: &str) -> Result<(), errors::ModelError> {
    let ok = !slug.is_empty()
        && slug.len() <= 64
        && slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if ok { Ok(()) } else { Err(errors::ModelError::Validation("invalid slug".into())) }
}

/// Provision a company. Companies are created outside the identity core
/// (onboarding, fixtures); this helper keeps the row well-formed.
pub async fn create(
    db: &DatabaseConnection,
    name: &str,
    slug: &str,
    plan: &str,
    max_users: i32,
    max_agents: i32,
) -> Result<Model, errors::ModelError> {
    if name.trim().is_empty() { return Err(errors::ModelError::Validation("name required".into())); }
    validate_slug(slug)?;
    if max_users < 0 || max_agents < 0 { return Err(errors::ModelError::Validation("seat limits must be >= 0".into())); }
    let now = Utc::now().into();
    let am = ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        slug: Set(slug.to_string()),
        cnpj: Set(None),
        plan: Set(plan.to_string()),
        max_users: Set(max_users),
        max_agents: Set(max_agents),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        deleted_at: Set(None),
    };
    am.insert(db).await.map_err(|e| errors::ModelError::Db(e.to_string()))
}

pub async fn soft_delete(db: &DatabaseConnection, id: Uuid) -> Result<(), errors::ModelError> {
    let mut found: ActiveModel = Entity::find_by_id(id).one(db).await?.ok_or_else(|| errors::ModelError::Validation("company not found".into()))?.into();
    let now = Utc::now().into();
    found.deleted_at = Set(Some(now));
    found.updated_at = Set(now);
    found.update(db).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_rules() {
        assert!(validate_slug("acme-support-2").is_ok());
        assert!(validate_slug("").is_err());
        assert!(validate_slug("Acme").is_err());
        assert!(validate_slug("acme support").is_err());
    }
}
