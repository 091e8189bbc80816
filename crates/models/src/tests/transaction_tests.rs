use super::{setup_test_db, unique_slug};
use crate::{audit_log, company};
use anyhow::Result;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set, TransactionTrait};
use uuid::Uuid;

fn audit_row(company_id: Uuid) -> audit_log::ActiveModel {
    audit_log::ActiveModel {
        id: Set(Uuid::new_v4()),
        action: Set("LOGIN".into()),
        entity_type: Set("session".into()),
        entity_id: Set(None),
        old_data: Set(None),
        new_data: Set(Some(serde_json::json!({ "ok": true }))),
        user_id: Set(None),
        company_id: Set(Some(company_id)),
        risk: Set("LOW".into()),
        ip_address: Set(None),
        user_agent: Set(None),
        created_at: Set(Utc::now().into()),
    }
}

#[tokio::test]
async fn test_transaction_commit() -> Result<()> {
    let Some(db) = setup_test_db().await else { return Ok(()) };
    let c = company::create(&db, "Tx Co", &unique_slug("txc"), "free", 1, 1).await?;

    let txn = db.begin().await?;
    let row = audit_row(c.id).insert(&txn).await?;
    txn.commit().await?;

    assert!(audit_log::Entity::find_by_id(row.id).one(&db).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_transaction_rollback_on_drop() -> Result<()> {
    let Some(db) = setup_test_db().await else { return Ok(()) };
    let c = company::create(&db, "Tx Co", &unique_slug("txr"), "free", 1, 1).await?;

    let id = {
        let txn = db.begin().await?;
        let row = audit_row(c.id).insert(&txn).await?;
        row.id
        // dropped without commit
    };

    assert!(audit_log::Entity::find_by_id(id).one(&db).await?.is_none());
    Ok(())
}
