//! Configuration management with validation and defaults
//!
//! `CrashConfig` is loaded from an optional TOML file, then `CRASH_*`
//! environment overrides are applied, then the result is validated.

use serde::{Deserialize, Serialize};
use std::{env, path::Path, time::Duration};

use crate::errors::ConfigurationError;
use crate::fairness::FairnessParams;
use crate::ledger::{AccountId, Amount};
use crate::reconciler::StakeLimits;
use crate::round::{Multiplier, MultiplierCurve, RoundTimings};

/// Complete engine configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashConfig {
    pub round: RoundConfig,
    pub fairness: FairnessConfig,
    pub settlement: SettlementConfig,
    pub broadcast: BroadcastConfig,
    pub api: ApiConfig,
    pub wallet: WalletConfig,
}

/// Round lifecycle timing and curve
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundConfig {
    pub betting_ms: u64,
    pub cooldown_ms: u64,
    /// Clock tick; also the multiplier broadcast cadence
    pub tick_ms: u64,
    pub growth_rate: f64,
    /// Revealed rounds kept for history and verification
    pub history_capacity: usize,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            betting_ms: 5_000,
            cooldown_ms: 3_000,
            tick_ms: 100,
            growth_rate: 0.06,
            history_capacity: 50,
        }
    }
}

/// Crash point derivation
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FairnessConfig {
    pub house_edge_bps: u32,
    /// Cap on the crash point, e.g. `10000.0`
    pub max_crash_point: f64,
}

impl Default for FairnessConfig {
    fn default() -> Self {
        let params = FairnessParams::default();
        Self {
            house_edge_bps: params.house_edge_bps,
            max_crash_point: params.max_crash_point.as_f64(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub timeout_ms: u64,
    pub retry_interval_ms: u64,
    pub min_stake: Amount,
    pub max_stake: Amount,
    pub archived_bet_capacity: usize,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        let limits = StakeLimits::default();
        Self {
            timeout_ms: 2_000,
            retry_interval_ms: 1_000,
            min_stake: limits.min,
            max_stake: limits.max,
            archived_bet_capacity: 10_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub channel_capacity: usize,
    pub heartbeat_secs: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            heartbeat_secs: 30,
        }
    }
}

/// HTTP and WebSocket server
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Empty means any origin
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: Vec::new(),
            request_timeout_secs: 30,
        }
    }
}

/// Accounts seeded into the bundled in-memory wallet
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub accounts: Vec<WalletAccount>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAccount {
    pub id: AccountId,
    pub balance: Amount,
}

impl CrashConfig {
    /// Short rounds and funded demo accounts for local runs
    pub fn development() -> Self {
        Self {
            round: RoundConfig {
                betting_ms: 3_000,
                cooldown_ms: 2_000,
                ..Default::default()
            },
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                ..Default::default()
            },
            wallet: WalletConfig {
                accounts: ["alice", "bob", "carol"]
                    .into_iter()
                    .map(|id| WalletAccount {
                        id: id.to_string(),
                        balance: 1_000_000,
                    })
                    .collect(),
            },
            ..Default::default()
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigurationError {
            ConfigurationError::InvalidValue {
                field: field.to_string(),
                value: value.to_string(),
                reason: reason.to_string(),
            }
        }

        let round = &self.round;
        if round.betting_ms == 0 {
            return Err(invalid("round.betting_ms", 0, "Betting window cannot be zero"));
        }
        if round.tick_ms == 0 {
            return Err(invalid("round.tick_ms", 0, "Tick interval cannot be zero"));
        }
        if round.tick_ms > round.betting_ms {
            return Err(invalid(
                "round.tick_ms",
                round.tick_ms,
                "Tick interval must not exceed the betting window",
            ));
        }
        if !round.growth_rate.is_finite() || round.growth_rate <= 0.0 {
            return Err(invalid(
                "round.growth_rate",
                round.growth_rate,
                "Growth rate must be a positive number",
            ));
        }
        if round.history_capacity == 0 {
            return Err(invalid("round.history_capacity", 0, "History capacity cannot be zero"));
        }

        if self.fairness.house_edge_bps >= 10_000 {
            return Err(invalid(
                "fairness.house_edge_bps",
                self.fairness.house_edge_bps,
                "House edge must be below 10000 basis points",
            ));
        }
        let max_crash = self.max_crash_point()?;
        if max_crash <= Multiplier::ONE {
            return Err(invalid(
                "fairness.max_crash_point",
                self.fairness.max_crash_point,
                "Maximum crash point must exceed 1.00",
            ));
        }

        let settlement = &self.settlement;
        if settlement.timeout_ms == 0 {
            return Err(invalid("settlement.timeout_ms", 0, "Gateway timeout cannot be zero"));
        }
        if settlement.retry_interval_ms == 0 {
            return Err(invalid("settlement.retry_interval_ms", 0, "Retry interval cannot be zero"));
        }
        if settlement.min_stake == 0 || settlement.min_stake > settlement.max_stake {
            return Err(ConfigurationError::ValidationFailed(format!(
                "stake limits must satisfy 0 < min ({}) <= max ({})",
                settlement.min_stake, settlement.max_stake
            )));
        }
        if max_crash.apply(settlement.max_stake).is_none() {
            return Err(ConfigurationError::ValidationFailed(format!(
                "a max stake of {} paid at {} overflows the payout amount",
                settlement.max_stake, max_crash
            )));
        }

        if self.broadcast.channel_capacity == 0 {
            return Err(invalid("broadcast.channel_capacity", 0, "Channel capacity cannot be zero"));
        }
        if self.broadcast.heartbeat_secs == 0 {
            return Err(invalid("broadcast.heartbeat_secs", 0, "Heartbeat period cannot be zero"));
        }

        if self.api.port == 0 {
            return Err(invalid("api.port", 0, "Port cannot be zero"));
        }

        Ok(())
    }

    fn max_crash_point(&self) -> Result<Multiplier, ConfigurationError> {
        Multiplier::from_f64(self.fairness.max_crash_point).ok_or_else(|| {
            ConfigurationError::InvalidValue {
                field: "fairness.max_crash_point".to_string(),
                value: self.fairness.max_crash_point.to_string(),
                reason: "Not a representable multiplier".to_string(),
            }
        })
    }

    pub fn timings(&self) -> RoundTimings {
        RoundTimings {
            betting: Duration::from_millis(self.round.betting_ms),
            cooldown: Duration::from_millis(self.round.cooldown_ms),
        }
    }

    pub fn curve(&self) -> MultiplierCurve {
        MultiplierCurve::new(self.round.growth_rate)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.round.tick_ms)
    }

    pub fn fairness_params(&self) -> Result<FairnessParams, ConfigurationError> {
        Ok(FairnessParams {
            house_edge_bps: self.fairness.house_edge_bps,
            max_crash_point: self.max_crash_point()?,
        })
    }

    pub fn stake_limits(&self) -> StakeLimits {
        StakeLimits {
            min: self.settlement.min_stake,
            max: self.settlement.max_stake,
        }
    }

    pub fn settlement_timeout(&self) -> Duration {
        Duration::from_millis(self.settlement.timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.settlement.retry_interval_ms)
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_secs(self.broadcast.heartbeat_secs)
    }
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    config_path: Option<String>,
    base: CrashConfig,
    lookup: EnvLookup,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            base: CrashConfig::default(),
            lookup: Box::new(|key| env::var(key).ok()),
        }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Configuration used when no file is given
    pub fn with_base(mut self, base: CrashConfig) -> Self {
        self.base = base;
        self
    }

    /// Replace the process environment as the override source
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.lookup = Box::new(lookup);
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> Result<CrashConfig, ConfigurationError> {
        let mut config = match self.config_path {
            Some(ref path) => Self::load_from_file(path)?,
            None => self.base.clone(),
        };

        self.apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    fn load_from_file(path: &str) -> Result<CrashConfig, ConfigurationError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;
        Ok(toml::from_str(&content)?)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, reason: &str) -> Result<Option<T>, ConfigurationError> {
        match (self.lookup)(key) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| ConfigurationError::InvalidValue {
                    field: key.to_string(),
                    value,
                    reason: reason.to_string(),
                }),
        }
    }

    fn apply_env_overrides(&self, config: &mut CrashConfig) -> Result<(), ConfigurationError> {
        if let Some(host) = (self.lookup)("CRASH_API_HOST") {
            config.api.host = host;
        }
        if let Some(port) = self.parse("CRASH_API_PORT", "Invalid port number")? {
            config.api.port = port;
        }
        if let Some(origins) = (self.lookup)("CRASH_ALLOWED_ORIGINS") {
            config.api.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(ms) = self.parse("CRASH_BETTING_MS", "Invalid duration")? {
            config.round.betting_ms = ms;
        }
        if let Some(ms) = self.parse("CRASH_COOLDOWN_MS", "Invalid duration")? {
            config.round.cooldown_ms = ms;
        }
        if let Some(ms) = self.parse("CRASH_TICK_MS", "Invalid duration")? {
            config.round.tick_ms = ms;
        }
        if let Some(rate) = self.parse("CRASH_GROWTH_RATE", "Invalid growth rate")? {
            config.round.growth_rate = rate;
        }

        if let Some(bps) = self.parse("CRASH_HOUSE_EDGE_BPS", "Invalid basis points")? {
            config.fairness.house_edge_bps = bps;
        }
        if let Some(max) = self.parse("CRASH_MAX_CRASH_POINT", "Invalid multiplier")? {
            config.fairness.max_crash_point = max;
        }

        if let Some(ms) = self.parse("CRASH_SETTLEMENT_TIMEOUT_MS", "Invalid duration")? {
            config.settlement.timeout_ms = ms;
        }
        if let Some(stake) = self.parse("CRASH_MIN_STAKE", "Invalid amount")? {
            config.settlement.min_stake = stake;
        }
        if let Some(stake) = self.parse("CRASH_MAX_STAKE", "Invalid amount")? {
            config.settlement.max_stake = stake;
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(config: &CrashConfig, path: &str) -> Result<(), ConfigurationError> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
