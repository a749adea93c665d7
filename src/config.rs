use crate::domain::Decimal;
use crate::engine::{LineDedup, StairStepTable};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub plan: PlanConfig,
}

/// Compensation plan parameters.
///
/// Passed by value into every computation so that two configurations can be
/// evaluated side by side by the same service.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanConfig {
    pub cycle_amount: Decimal,
    pub cycle_commission: Decimal,
    pub max_cycles_per_day: u32,
    /// Percent of the sale amount, e.g. `2` for 2%.
    pub leadership_bonus_percent: Decimal,
    pub max_compressed_depth: u32,
    /// Explicit manager step; defaults to the highest stair-step.
    pub manager_step: Option<u32>,
    pub stairstep: StairStepTable,
    pub max_traversal_nodes: usize,
    pub line_dedup: LineDedup,
    /// Balance assigned to nodes enrolled as `deferred` without one.
    pub deferred_payment_amount: Decimal,
}

impl PlanConfig {
    pub fn manager_step(&self) -> u32 {
        self.manager_step
            .unwrap_or_else(|| self.stairstep.highest_step())
    }
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            cycle_amount: Decimal::from_u32(2000),
            cycle_commission: Decimal::from_u32(200),
            max_cycles_per_day: 10,
            leadership_bonus_percent: Decimal::from_u32(2),
            max_compressed_depth: 7,
            manager_step: None,
            stairstep: StairStepTable::default(),
            max_traversal_nodes: 100_000,
            line_dedup: LineDedup::Shared,
            deferred_payment_amount: Decimal::zero(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or(&env_map, "PORT", "8080", "must be a valid u16")?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let plan = PlanConfig::from_env_map(&env_map)?;

        Ok(Config {
            port,
            database_path,
            plan,
        })
    }
}

impl PlanConfig {
    pub fn from_env_map(env_map: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = PlanConfig::default();

        let cycle_amount = parse_decimal(env_map, "CYCLE_AMOUNT", defaults.cycle_amount)?;
        if !cycle_amount.is_positive() {
            return Err(ConfigError::InvalidValue(
                "CYCLE_AMOUNT".to_string(),
                "must be positive".to_string(),
            ));
        }
        let cycle_commission =
            parse_decimal(env_map, "CYCLE_COMMISSION", defaults.cycle_commission)?;
        let leadership_bonus_percent = parse_decimal(
            env_map,
            "LEADERSHIP_BONUS_PERCENT",
            defaults.leadership_bonus_percent,
        )?;
        let deferred_payment_amount = parse_decimal(
            env_map,
            "DEFERRED_PAYMENT_AMOUNT",
            defaults.deferred_payment_amount,
        )?;
        for (key, value) in [
            ("CYCLE_COMMISSION", cycle_commission),
            ("LEADERSHIP_BONUS_PERCENT", leadership_bonus_percent),
            ("DEFERRED_PAYMENT_AMOUNT", deferred_payment_amount),
        ] {
            if value.is_negative() {
                return Err(ConfigError::InvalidValue(
                    key.to_string(),
                    "must not be negative".to_string(),
                ));
            }
        }

        let max_cycles_per_day =
            parse_or(env_map, "MAX_CYCLES_PER_DAY", "10", "must be a valid u32")?;

        let max_compressed_depth: u32 =
            parse_or(env_map, "MAX_COMPRESSED_DEPTH", "7", "must be a valid u32")?;
        if max_compressed_depth == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_COMPRESSED_DEPTH".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let manager_step = match env_map.get("MANAGER_STEP") {
            Some(raw) => Some(raw.trim().parse::<u32>().map_err(|_| {
                ConfigError::InvalidValue(
                    "MANAGER_STEP".to_string(),
                    "must be a valid u32".to_string(),
                )
            })?),
            None => None,
        };

        let stairstep = match env_map.get("STAIRSTEP_PERCENTS") {
            Some(raw) => StairStepTable::from_str(raw).map_err(|e| {
                ConfigError::InvalidValue("STAIRSTEP_PERCENTS".to_string(), e.to_string())
            })?,
            None => defaults.stairstep,
        };

        let max_traversal_nodes =
            parse_or(env_map, "MAX_TRAVERSAL_NODES", "100000", "must be a valid usize")?;

        let line_dedup = match env_map
            .get("LINE_DEDUP")
            .map(|s| s.as_str())
            .unwrap_or("shared")
        {
            "shared" => LineDedup::Shared,
            "per_line" => LineDedup::PerLine,
            other => {
                return Err(ConfigError::InvalidValue(
                    "LINE_DEDUP".to_string(),
                    format!("must be shared or per_line, got {}", other),
                ))
            }
        };

        Ok(PlanConfig {
            cycle_amount,
            cycle_commission,
            max_cycles_per_day,
            leadership_bonus_percent,
            max_compressed_depth,
            manager_step,
            stairstep,
            max_traversal_nodes,
            line_dedup,
            deferred_payment_amount,
        })
    }
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
    message: &str,
) -> Result<T, ConfigError> {
    env_map
        .get(key)
        .map(|s| s.trim())
        .unwrap_or(default)
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(key.to_string(), message.to_string()))
}

fn parse_decimal(
    env_map: &HashMap<String, String>,
    key: &str,
    default: Decimal,
) -> Result<Decimal, ConfigError> {
    match env_map.get(key) {
        Some(raw) => Decimal::from_str_canonical(raw).map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), "must be a decimal number".to_string())
        }),
        None => Ok(default),
    }
}
