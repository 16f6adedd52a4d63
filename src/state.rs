use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::{
    config::AppConfig,
    gateway::PaymentGateway,
    mailer::Mailer,
    middleware::rate_limit::RateLimiter,
    services::payment_service::PaymentService,
};

#[derive(Clone)]
pub struct AppState {
    pub orm: DatabaseConnection,
    pub config: Arc<AppConfig>,
    pub payments: PaymentService,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(
        orm: DatabaseConnection,
        config: AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let rate_limiter = RateLimiter::new(
            config.rate_limit.max_requests,
            std::time::Duration::from_secs(config.rate_limit.window_secs),
        )
        .with_trusted_proxy(config.rate_limit.trust_proxy);
        Self {
            orm,
            payments: PaymentService::new(gateway, mailer),
            config: Arc::new(config),
            rate_limiter,
        }
    }
}
