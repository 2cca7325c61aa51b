//! Configuration loading and representation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use forgecost_inventory::ValuationMethod;
use forgecost_observability::LogFormat;

pub const ENV_DEFAULT_VALUATION_METHOD: &str = "FORGECOST_DEFAULT_VALUATION_METHOD";
pub const ENV_AUTO_REPAIR_QUEUES: &str = "FORGECOST_AUTO_REPAIR_QUEUES";
pub const ENV_MAX_CONFLICT_RETRIES: &str = "FORGECOST_MAX_CONFLICT_RETRIES";
pub const ENV_LOG_FORMAT: &str = "FORGECOST_LOG_FORMAT";

/// Settings of the costing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostingConfig {
    /// Method given to products registered without an explicit one.
    pub default_valuation_method: ValuationMethod,
    /// Collapse a corrupt batch queue on load instead of failing with
    /// `QueueIntegrity`. Repairs lose lot history and are logged.
    pub auto_repair_queues: bool,
    /// How often a write is re-run after an optimistic concurrency conflict.
    pub max_conflict_retries: u32,
    /// Output format of the logs installed by [`CostingConfig::init_observability`].
    pub log_format: LogFormat,
}

impl Default for CostingConfig {
    fn default() -> Self {
        Self {
            default_valuation_method: ValuationMethod::WeightedAverage,
            auto_repair_queues: false,
            max_conflict_retries: 3,
            log_format: LogFormat::Json,
        }
    }
}

impl CostingConfig {
    /// Defaults overridden by `FORGECOST_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_DEFAULT_VALUATION_METHOD) {
            config.default_valuation_method = raw
                .parse()
                .with_context(|| format!("invalid {ENV_DEFAULT_VALUATION_METHOD}: '{raw}'"))?;
        }
        if let Some(raw) = lookup(ENV_AUTO_REPAIR_QUEUES) {
            config.auto_repair_queues = parse_bool(&raw)
                .with_context(|| format!("invalid {ENV_AUTO_REPAIR_QUEUES}: '{raw}'"))?;
        }
        if let Some(raw) = lookup(ENV_MAX_CONFLICT_RETRIES) {
            config.max_conflict_retries = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid {ENV_MAX_CONFLICT_RETRIES}: '{raw}'"))?;
        }
        if let Some(raw) = lookup(ENV_LOG_FORMAT) {
            config.log_format = raw
                .parse()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("invalid {ENV_LOG_FORMAT}: '{raw}'"))?;
        }

        Ok(config)
    }

    /// Install process-wide logging in the configured format.
    ///
    /// Later calls are no-ops, so a host can call this once at startup.
    pub fn init_observability(&self) {
        forgecost_observability::init_with(self.log_format);
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got '{other}'"),
    }
}
