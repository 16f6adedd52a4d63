use std::{env, str::FromStr};

use anyhow::{Context, bail};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayKind {
    Stripe,
    /// In-process sandbox gateway, useful for local development.
    Memory,
}

impl FromStr for GatewayKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stripe" => Ok(GatewayKind::Stripe),
            "memory" | "sandbox" => Ok(GatewayKind::Memory),
            other => bail!("unknown payment gateway `{other}`"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub gateway: GatewayKind,
    pub stripe_secret_key: Option<String>,
    pub stripe_api_version: String,
    pub webhook_secret: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window_secs: u64,
    /// Take the client address from `x-forwarded-for` / `x-real-ip`. Only
    /// enable behind a proxy that overwrites those headers.
    pub trust_proxy: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub currency: String,
    pub cart_ttl_days: i64,
    pub reaper_interval_secs: u64,
    pub payment: PaymentConfig,
    pub rate_limit: RateLimitSettings,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET is not set")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env_or("APP_PORT", 3000)?;

        let gateway: GatewayKind = env_or("PAYMENT_GATEWAY", GatewayKind::Stripe)?;
        let stripe_secret_key = env::var("STRIPE_SECRET_KEY").ok().filter(|k| !k.is_empty());
        if gateway == GatewayKind::Stripe && stripe_secret_key.is_none() {
            bail!("STRIPE_SECRET_KEY is required when PAYMENT_GATEWAY=stripe");
        }

        let payment = PaymentConfig {
            gateway,
            stripe_secret_key,
            stripe_api_version: env::var("STRIPE_API_VERSION")
                .unwrap_or_else(|_| "2024-06-20".to_string()),
            webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").ok().filter(|s| !s.is_empty()),
            timeout_secs: env_or("GATEWAY_TIMEOUT_SECS", 30)?,
        };

        let rate_limit = RateLimitSettings {
            max_requests: env_or("RATE_LIMIT_MAX_REQUESTS", 30)?,
            window_secs: env_or("RATE_LIMIT_WINDOW_SECS", 60)?,
            trust_proxy: env_or("RATE_LIMIT_TRUST_PROXY", false)?,
        };

        Ok(Self {
            database_url,
            host,
            port,
            jwt_secret,
            currency: env::var("STORE_CURRENCY")
                .unwrap_or_else(|_| "usd".to_string())
                .to_ascii_lowercase(),
            cart_ttl_days: env_or("CART_TTL_DAYS", 30)?,
            reaper_interval_secs: env_or("CART_REAPER_INTERVAL_SECS", 3600)?,
            payment,
            rate_limit,
        })
    }

    pub fn cart_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.cart_ttl_days)
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}")),
        _ => Ok(default),
    }
}
