#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::Duration;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use storefront_api::{
    config::{AppConfig, GatewayKind, PaymentConfig, RateLimitSettings},
    db::{create_orm_conn, now, run_migrations},
    entity::{products, users},
    gateway::InMemoryGateway,
    mailer::{Mail, Mailer},
    middleware::auth::{AuthUser, issue_token},
    services::payment_service::PaymentService,
    state::AppState,
};
use tempfile::TempDir;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test-secret";

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Mail>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<Mail> {
        self.sent.lock().unwrap().clone()
    }
}

impl Mailer for RecordingMailer {
    fn enqueue(&self, mail: Mail) {
        self.sent.lock().unwrap().push(mail);
    }
}

pub struct TestApp {
    pub state: AppState,
    pub gateway: Arc<InMemoryGateway>,
    pub mailer: Arc<RecordingMailer>,
    _dir: TempDir,
}

impl TestApp {
    pub fn db(&self) -> &DatabaseConnection {
        &self.state.orm
    }

    pub fn payments(&self) -> &PaymentService {
        &self.state.payments
    }
}

pub fn test_config(database_url: String) -> AppConfig {
    AppConfig {
        database_url,
        host: "127.0.0.1".to_string(),
        port: 0,
        jwt_secret: JWT_SECRET.to_string(),
        currency: "usd".to_string(),
        cart_ttl_days: 30,
        reaper_interval_secs: 3600,
        payment: PaymentConfig {
            gateway: GatewayKind::Memory,
            stripe_secret_key: None,
            stripe_api_version: "2024-06-20".to_string(),
            webhook_secret: None,
            timeout_secs: 5,
        },
        rate_limit: RateLimitSettings {
            max_requests: 1_000,
            window_secs: 60,
            trust_proxy: false,
        },
    }
}

pub async fn setup() -> anyhow::Result<TestApp> {
    setup_with(|_| {}).await
}

/// Fresh SQLite database in a temp dir with the sandbox gateway wired in.
pub async fn setup_with(tweak: impl FnOnce(&mut AppConfig)) -> anyhow::Result<TestApp> {
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("store.db").display());
    let orm = create_orm_conn(&url).await?;
    run_migrations(&orm).await?;

    let mut config = test_config(url);
    tweak(&mut config);

    let gateway = Arc::new(InMemoryGateway::new());
    let mailer = Arc::new(RecordingMailer::default());
    let state = AppState::new(orm, config, gateway.clone(), mailer.clone());
    Ok(TestApp {
        state,
        gateway,
        mailer,
        _dir: dir,
    })
}

pub async fn create_user(
    db: &DatabaseConnection,
    email: &str,
    role: &str,
) -> anyhow::Result<users::Model> {
    Ok(users::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        name: Set(Some("Test Person".to_string())),
        role: Set(role.to_string()),
        created_at: Set(now()),
    }
    .insert(db)
    .await?)
}

pub async fn create_product(
    db: &DatabaseConnection,
    name: &str,
    price: i64,
    stock: i32,
) -> anyhow::Result<products::Model> {
    let timestamp = now();
    Ok(products::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        sku: Set(format!("SKU-{}", Uuid::new_v4().simple())),
        description: Set(None),
        price: Set(price),
        inventory_quantity: Set(stock),
        track_inventory: Set(true),
        taxable: Set(true),
        active: Set(true),
        created_at: Set(timestamp),
        updated_at: Set(timestamp),
    }
    .insert(db)
    .await?)
}

pub fn auth(user: &users::Model) -> AuthUser {
    AuthUser {
        user_id: user.id,
        role: user.role.clone(),
    }
}

pub fn bearer(user: &users::Model) -> String {
    let token = issue_token(JWT_SECRET, user.id, &user.role, Duration::hours(1)).unwrap();
    format!("Bearer {token}")
}
