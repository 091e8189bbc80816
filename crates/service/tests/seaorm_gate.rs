//! AccessGate over PostgreSQL. Skipped when `SKIP_DB_TESTS` is set or no
//! database answers at `DATABASE_URL`.

use std::sync::Arc;

use anyhow::Result;
use argon2::Params;
use migration::MigratorTrait;
use sea_orm::DatabaseConnection;
use uuid::Uuid;

use service::domain::{AuditAction, AuditFilter, ClientInfo, CreateUserInput, InviteRequest, Role, SeatClass};
use service::ports::{Argon2Hasher, OsTokenGenerator, PasswordHasher, Ports, SystemClock};
use service::repository::seaorm::SeaOrmIdentityRepository;
use service::repository::IdentityRepository;
use service::{AccessError, AccessGate, IdentityConfig};

const PASSWORD: &str = "postgres-flow-pass";

async fn setup_db() -> Option<DatabaseConnection> {
    if std::env::var("SKIP_DB_TESTS").is_ok() {
        return None;
    }
    let db = match models::db::connect().await {
        Ok(db) => db,
        Err(e) => {
            eprintln!("skip: cannot connect to db: {}", e);
            return None;
        }
    };
    if let Err(e) = migration::Migrator::up(&db, None).await {
        eprintln!("skip: migrate up failed: {}", e);
        return None;
    }
    Some(db)
}

fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, &Uuid::new_v4().simple().to_string()[..12])
}

struct Env {
    db: DatabaseConnection,
    gate: AccessGate,
    hash: String,
}

impl Env {
    fn new(db: DatabaseConnection) -> Result<Self> {
        let hasher = Arc::new(Argon2Hasher::with_params(Params::new(8, 1, 1, None).unwrap()));
        let hash = hasher.hash(PASSWORD)?;
        let ports = Ports { clock: Arc::new(SystemClock), tokens: Arc::new(OsTokenGenerator::default()), hasher };
        let repo = Arc::new(SeaOrmIdentityRepository::new(db.clone()));
        let gate = AccessGate::new(repo, ports, IdentityConfig::new("postgres-flow-secret-0123"));
        Ok(Self { db, gate, hash })
    }
}

#[tokio::test]
async fn login_invite_and_audit_against_postgres() -> Result<()> {
    let Some(db) = setup_db().await else { return Ok(()) };
    let env = Env::new(db)?;
    let client = ClientInfo::new(Some("192.0.2.10".into()), Some("pg-test".into()));

    let company = models::company::create(&env.db, "Pg Co", &unique("pg"), "pro", 10, 3).await?;
    let admin_email = format!("{}@pg.test", unique("admin"));
    models::user::create(&env.db, company.id, &admin_email, "Pg Admin", &env.hash, "ADMIN").await?;

    let issued = env.gate.login(&admin_email, PASSWORD, &client).await?;
    let ctx = env.gate.authenticate(&issued.tokens.access_token).await?;
    assert_eq!(ctx.company_id, company.id);

    let invite_email = format!("{}@pg.test", unique("agent"));
    let req = InviteRequest { email: invite_email.clone(), role: Role::Operator, expires_in_hours: None, max_uses: None };
    let invite = env.gate.issue_invite(&ctx, req, &client).await?;
    let user = env.gate.redeem_invite(&invite.token, "Pg Agent".into(), "agent-password".into(), &client).await?;
    assert_eq!(user.company_id, company.id);

    let again = env.gate.redeem_invite(&invite.token, "Twice".into(), "agent-password".into(), &client).await;
    assert!(matches!(again, Err(AccessError::InviteExhausted)));

    let filter = AuditFilter { action: Some(AuditAction::Create), ..Default::default() };
    let page = env.gate.audit_page(&ctx, &filter, None, Some(10)).await?;
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].entity_id, Some(user.id));
    Ok(())
}

#[tokio::test]
async fn refresh_rotation_and_logout_against_postgres() -> Result<()> {
    let Some(db) = setup_db().await else { return Ok(()) };
    let env = Env::new(db)?;
    let client = ClientInfo::default();

    let company = models::company::create(&env.db, "Rot Co", &unique("rot"), "pro", 10, 3).await?;
    let email = format!("{}@pg.test", unique("op"));
    models::user::create(&env.db, company.id, &email, "Rot Op", &env.hash, "OPERATOR").await?;

    let first = env.gate.login(&email, PASSWORD, &client).await?;
    let rotated = env.gate.refresh(&first.tokens.refresh_token).await?;
    assert_ne!(rotated.refresh_token, first.tokens.refresh_token);
    assert!(matches!(env.gate.refresh(&first.tokens.refresh_token).await, Err(AccessError::SessionInvalid)));

    let ctx = env.gate.authenticate(&rotated.access_token).await?;
    assert!(env.gate.logout(&ctx, &client).await?);
    assert!(matches!(env.gate.authenticate(&rotated.access_token).await, Err(AccessError::SessionInvalid)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creations_respect_agent_seats_against_postgres() -> Result<()> {
    let Some(db) = setup_db().await else { return Ok(()) };
    let env = Env::new(db)?;
    let repo = SeaOrmIdentityRepository::new(env.db.clone());
    let client = ClientInfo::default();

    for round in 0..20 {
        let company = models::company::create(&env.db, "Seat Co", &unique("seat"), "pro", 10, 2).await?;
        let admin_email = format!("{}@pg.test", unique("admin"));
        models::user::create(&env.db, company.id, &admin_email, "Seat Admin", &env.hash, "ADMIN").await?;
        let issued = env.gate.login(&admin_email, PASSWORD, &client).await?;
        let ctx = env.gate.authenticate(&issued.tokens.access_token).await?;

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let gate = env.gate.clone();
                let client = client.clone();
                let input = CreateUserInput {
                    email: format!("{}@pg.test", unique("op")),
                    name: "Seat Op".into(),
                    password: "operator-password".into(),
                    role: Role::Operator,
                };
                tokio::spawn(async move { gate.create_user(&ctx, input, &client).await })
            })
            .collect();
        let mut created = 0;
        for attempt in attempts {
            match attempt.await? {
                Ok(_) => created += 1,
                Err(AccessError::QuotaExceeded(_)) => {}
                Err(other) => anyhow::bail!("round {round}: unexpected {other:?}"),
            }
        }
        assert_eq!(created, 1, "round {round}");
        assert_eq!(repo.count_active_users(company.id, SeatClass::Agents).await?, 2, "round {round}");
    }
    Ok(())
}
