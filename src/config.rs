use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub rails: RailsConfig,
    pub ledger: LedgerConfig,
    pub workers: WorkersConfig,
    pub webhook: WebhookConfig,
    pub funding: FundingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RailsConfig {
    /// "mock" or "http"; mocks simulate latency and failures locally.
    pub mode: String,
    pub mobile_money_url: String,
    pub chain_url: String,
    pub treasury_address: String,
    /// External rail calls carry a fixed timeout; on expiry the enclosing
    /// job is failed-and-retryable, never assumed to have succeeded.
    pub request_timeout_secs: u64,
    pub mock_latency_ms: u64,
    pub mock_success_rate: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LedgerConfig {
    pub default_daily_limit_minor: i64,
    /// Category names tagged one-time (cap-bypassing) at escrow creation.
    pub one_time_categories: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkersConfig {
    /// Money-moving queues stay at 1-3 to bound simultaneous external calls.
    pub activation_concurrency: usize,
    pub confirmation_concurrency: usize,
    pub refund_concurrency: usize,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub poll_interval_ms: u64,
    pub expiry_sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebhookConfig {
    pub dedup_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FundingConfig {
    /// Minimum intent age before a status poll may trigger the fallback
    /// reconciliation lookup against the provider.
    pub fallback_poll_min_age_secs: i64,
    pub fallback_polls_per_minute: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8084)?
            .set_default("server.workers", 4)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("rails.mode", "mock")?
            .set_default("rails.mobile_money_url", "http://localhost:9470")?
            .set_default("rails.chain_url", "http://localhost:9471")?
            .set_default("rails.treasury_address", "0x0000000000000000000000000000000000000000")?
            .set_default("rails.request_timeout_secs", 12)?
            .set_default("rails.mock_latency_ms", 50)?
            .set_default("rails.mock_success_rate", 1.0)?
            .set_default("ledger.default_daily_limit_minor", 50_000)?
            .set_default("ledger.one_time_categories", vec!["rent", "education"])?
            .set_default("workers.activation_concurrency", 2)?
            .set_default("workers.confirmation_concurrency", 2)?
            .set_default("workers.refund_concurrency", 1)?
            .set_default("workers.max_attempts", 5)?
            .set_default("workers.initial_backoff_ms", 2_000)?
            .set_default("workers.max_backoff_ms", 60_000)?
            .set_default("workers.poll_interval_ms", 1_000)?
            .set_default("workers.expiry_sweep_interval_secs", 300)?
            .set_default("webhook.dedup_ttl_secs", 86_400)?
            .set_default("funding.fallback_poll_min_age_secs", 120)?
            .set_default("funding.fallback_polls_per_minute", 6)?;

        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder
                .add_source(File::with_name(&format!("config/{}", environment)).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("ESCROW_ENGINE")
                .separator("__")
                .list_separator(","),
        );

        if let Ok(db_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", db_url)?;
        }

        if let Ok(redis_url) = env::var("REDIS_URL") {
            builder = builder.set_override("redis.url", redis_url)?;
        }

        if let Ok(port) = env::var("ESCROW_ENGINE_PORT") {
            builder = builder.set_override("server.port", port)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }

        if self.database.url.is_empty() {
            return Err("Database URL is required".to_string());
        }

        if self.redis.url.is_empty() {
            return Err("Redis URL is required".to_string());
        }

        if self.rails.mode != "mock" && self.rails.mode != "http" {
            return Err(format!("Unknown rails mode: {}", self.rails.mode));
        }

        if self.ledger.default_daily_limit_minor <= 0 {
            return Err("Default daily limit must be positive".to_string());
        }

        if self.workers.max_attempts == 0 {
            return Err("Worker attempt cap must be at least 1".to_string());
        }

        if !(0.0..=1.0).contains(&self.rails.mock_success_rate) {
            return Err("Mock success rate must be within [0, 1]".to_string());
        }

        Ok(())
    }
}
