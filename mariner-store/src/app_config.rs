use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    #[serde(default)]
    pub kafka: Option<KafkaConfig>,
    pub auth: AuthConfig,
    pub business_rules: BusinessRules,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    pub pending_order_ttl_minutes: i64,
    pub paid_order_ttl_minutes: i64,
    pub expiry_sweep_seconds: u64,
    #[serde(default = "default_claim_retries")]
    pub max_claim_retries: u32,
    #[serde(default = "default_max_units")]
    pub max_units_per_order: u32,
    pub rate_limit_per_minute: i64,
    #[serde(default)]
    pub loyalty_tiers: Vec<LoyaltyTierConfig>,
}

fn default_claim_retries() -> u32 {
    3
}

fn default_max_units() -> u32 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoyaltyTierConfig {
    pub name: String,
    pub min_spend_usd: Decimal,
    pub discount_percent: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides are optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `MARINER_STORAGE__BACKEND=postgres`
            .add_source(config::Environment::with_prefix("MARINER").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_layered_sources() {
        let raw = r#"
            [server]
            port = 8080

            [storage]
            backend = "memory"

            [database]
            url = "postgres://localhost/mariner"

            [auth]
            jwt_secret = "secret"

            [business_rules]
            pending_order_ttl_minutes = 30
            paid_order_ttl_minutes = 60
            expiry_sweep_seconds = 60
            rate_limit_per_minute = 120

            [[business_rules.loyalty_tiers]]
            name = "Silver"
            min_spend_usd = "500"
            discount_percent = "5"
        "#;

        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.business_rules.max_claim_retries, 3);
        assert!(config.redis.is_none());
        assert_eq!(config.business_rules.loyalty_tiers.len(), 1);
        assert_eq!(config.business_rules.loyalty_tiers[0].discount_percent, Decimal::from(5));
    }
}
