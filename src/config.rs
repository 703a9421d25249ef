// 🔧 Configuration - defaults, optional JSON file, then environment
//
// Loading order (later wins):
//   1. built-in defaults
//   2. JSON file (explicit path, or LIVESTOCK_GATE_CONFIG)
//   3. LIVESTOCK_DB / LIVESTOCK_BIND_ADDR / LIVESTOCK_CLOCK_POLICY

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::clock::{ClockSkewPolicy, MAX_CLOCK_EPSILON_MICROS};

pub const CONFIG_ENV: &str = "LIVESTOCK_GATE_CONFIG";
pub const DB_ENV: &str = "LIVESTOCK_DB";
pub const BIND_ENV: &str = "LIVESTOCK_BIND_ADDR";
pub const CLOCK_POLICY_ENV: &str = "LIVESTOCK_CLOCK_POLICY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub database_path: PathBuf,

    /// Address the HTTP server binds to
    pub bind_addr: String,

    pub clock_skew_policy: ClockSkewPolicy,

    /// Step used when clamping a skewed timestamp past the last event
    pub clock_epsilon_micros: i64,

    /// Default tracing filter when RUST_LOG is unset
    pub log_filter: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        GateConfig {
            database_path: PathBuf::from("livestock.db"),
            bind_addr: "0.0.0.0:3001".to_string(),
            clock_skew_policy: ClockSkewPolicy::Clamp,
            clock_epsilon_micros: 1,
            log_filter: "livestock_gate=info".to_string(),
        }
    }
}

impl GateConfig {
    /// Load configuration, optionally from an explicit file path.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let file = path.map(Path::to_path_buf).or(from_env);

        let mut config = match file {
            Some(file) => Self::load_from_file(&file)?,
            None => GateConfig::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Apply environment-style overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = lookup(DB_ENV) {
            self.database_path = PathBuf::from(db);
        }
        if let Some(addr) = lookup(BIND_ENV) {
            self.bind_addr = addr;
        }
        if let Some(policy) = lookup(CLOCK_POLICY_ENV) {
            self.clock_skew_policy = policy
                .parse()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("Invalid {}", CLOCK_POLICY_ENV))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_CLOCK_EPSILON_MICROS).contains(&self.clock_epsilon_micros) {
            anyhow::bail!(
                "clock_epsilon_micros must be between 1 and {}, got {}",
                MAX_CLOCK_EPSILON_MICROS,
                self.clock_epsilon_micros
            );
        }
        if self.bind_addr.trim().is_empty() {
            anyhow::bail!("bind_addr must not be empty");
        }
        Ok(())
    }

    pub fn clock_epsilon(&self) -> Duration {
        Duration::microseconds(self.clock_epsilon_micros)
    }
}
