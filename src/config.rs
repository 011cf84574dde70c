use crate::domain::Decimal;
use crate::engine::{CommissionPolicy, TierSchedule};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    /// Upper bound on any single storage round trip.
    pub db_timeout_ms: u64,
    /// Attempts made on a concurrency conflict before it is surfaced.
    pub conflict_retry_limit: u32,
    pub kol_default_rate: Decimal,
    pub ol_default_rate: Decimal,
    pub tier_threshold: i64,
    pub tier_1_4_unit_price: Decimal,
    pub tier_5_plus_unit_price: Decimal,
    pub currency_scale: u32,
    /// 0 disables the background rollup task.
    pub rollup_interval_secs: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

fn parse_or<T: std::str::FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
    expected: &str,
) -> Result<T, ConfigError> {
    env_map
        .get(key)
        .map(|s| s.as_str())
        .unwrap_or(default)
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(key.to_string(), format!("must be {}", expected)))
}

fn percent(env_map: &HashMap<String, String>, key: &str, default: &str) -> Result<Decimal, ConfigError> {
    let rate: Decimal = parse_or(env_map, key, default, "a decimal percentage")?;
    if rate.is_negative() || rate > Decimal::hundred() {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("must be between 0 and 100, got {}", rate),
        ));
    }
    Ok(rate)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or::<u16>(&env_map, "PORT", "8080", "a valid u16")?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let db_timeout_ms = parse_or::<u64>(&env_map, "DB_TIMEOUT_MS", "5000", "a valid u64")?;
        if db_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "DB_TIMEOUT_MS".to_string(),
                "must be greater than 0".to_string(),
            ));
        }

        let conflict_retry_limit =
            parse_or::<u32>(&env_map, "CONFLICT_RETRY_LIMIT", "3", "a valid u32")?;
        if conflict_retry_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "CONFLICT_RETRY_LIMIT".to_string(),
                "must allow at least one attempt".to_string(),
            ));
        }

        let kol_default_rate = percent(&env_map, "KOL_DEFAULT_RATE", "30")?;
        let ol_default_rate = percent(&env_map, "OL_DEFAULT_RATE", "20")?;

        let tier_threshold = parse_or::<i64>(&env_map, "TIER_THRESHOLD", "5", "a valid i64")?;
        if tier_threshold <= 0 {
            return Err(ConfigError::InvalidValue(
                "TIER_THRESHOLD".to_string(),
                "must be positive".to_string(),
            ));
        }

        let tier_1_4_unit_price: Decimal =
            parse_or(&env_map, "TIER_1_4_UNIT_PRICE", "1500000", "a decimal amount")?;
        let tier_5_plus_unit_price: Decimal =
            parse_or(&env_map, "TIER_5_PLUS_UNIT_PRICE", "2500000", "a decimal amount")?;
        for (key, value) in [
            ("TIER_1_4_UNIT_PRICE", tier_1_4_unit_price),
            ("TIER_5_PLUS_UNIT_PRICE", tier_5_plus_unit_price),
        ] {
            if value.is_negative() {
                return Err(ConfigError::InvalidValue(
                    key.to_string(),
                    "must not be negative".to_string(),
                ));
            }
            if value > Decimal::max_amount() {
                return Err(ConfigError::InvalidValue(
                    key.to_string(),
                    format!("must be at most {}", Decimal::max_amount()),
                ));
            }
        }

        let currency_scale = parse_or::<u32>(&env_map, "CURRENCY_SCALE", "0", "a valid u32")?;
        if currency_scale > 8 {
            return Err(ConfigError::InvalidValue(
                "CURRENCY_SCALE".to_string(),
                "must be at most 8".to_string(),
            ));
        }

        let rollup_interval_secs =
            parse_or::<u64>(&env_map, "ROLLUP_INTERVAL_SECS", "3600", "a valid u64")?;

        Ok(Config {
            port,
            database_path,
            db_timeout_ms,
            conflict_retry_limit,
            kol_default_rate,
            ol_default_rate,
            tier_threshold,
            tier_1_4_unit_price,
            tier_5_plus_unit_price,
            currency_scale,
            rollup_interval_secs,
        })
    }

    /// Defaults for everything except the database location.
    pub fn for_database(database_path: impl Into<String>) -> Self {
        let mut env_map = HashMap::new();
        env_map.insert("DATABASE_PATH".to_string(), database_path.into());
        match Self::from_env_map(env_map) {
            Ok(config) => config,
            Err(e) => unreachable!("defaults are valid: {e}"),
        }
    }

    pub fn db_timeout(&self) -> Duration {
        Duration::from_millis(self.db_timeout_ms)
    }

    pub fn commission_policy(&self) -> CommissionPolicy {
        CommissionPolicy {
            kol_rate: self.kol_default_rate,
            ol_rate: self.ol_default_rate,
            currency_scale: self.currency_scale,
        }
    }

    pub fn tier_schedule(&self) -> TierSchedule {
        TierSchedule {
            threshold: self.tier_threshold,
            tier_1_4_price: self.tier_1_4_unit_price,
            tier_5_plus_price: self.tier_5_plus_unit_price,
        }
    }
}
