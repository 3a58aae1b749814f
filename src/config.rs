use crate::chips::{PolarizationSupply, RfInput};
use core::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Worker defaults
const POLL_INTERVAL_MS: u64 = 200;
const FIRST_CONFIG_WAIT_MS: u64 = 250;
const BUS_TIMEOUT_MS: u64 = 100;
const SETTLE_DELAY_MS: u64 = 10;
const TELEMETRY_CHANNEL_CAPACITY: usize = 16;

/// One tuning request. Producers build it and hand it to the queue; the
/// worker applies it once and drops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationRequest {
    pub frequency_hz: u32,
    pub symbol_rate: u32,
    /// Route the secondary RF input to the tuner.
    pub rf_input_b: bool,
    pub polarization_supply: bool,
    /// Only meaningful with `polarization_supply` set.
    pub polarization_horizontal: bool,
}

impl ConfigurationRequest {
    pub fn new(frequency_hz: u32, symbol_rate: u32) -> Self {
        Self {
            frequency_hz,
            symbol_rate,
            rf_input_b: false,
            polarization_supply: false,
            polarization_horizontal: false,
        }
    }

    pub fn with_input_b(mut self, rf_input_b: bool) -> Self {
        self.rf_input_b = rf_input_b;
        self
    }

    pub fn with_polarization(mut self, supply: PolarizationSupply) -> Self {
        let (enable, horizontal) = supply.adapter_flags();
        self.polarization_supply = enable;
        self.polarization_horizontal = horizontal;
        self
    }

    pub fn rf_input(&self) -> RfInput {
        RfInput::from_secondary(self.rf_input_b)
    }

    pub fn polarization(&self) -> PolarizationSupply {
        match (self.polarization_supply, self.polarization_horizontal) {
            (false, _) => PolarizationSupply::Off,
            (true, false) => PolarizationSupply::Vertical,
            (true, true) => PolarizationSupply::Horizontal,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid worker config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("worker config field `{0}` must be non-zero")]
    Zero(&'static str),
}

/// Timing and sizing for one worker instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Idle wait between telemetry polls.
    pub poll_interval_ms: u64,
    /// How long to block on an empty queue before any configuration
    /// has been applied, before re-checking for a stop request.
    pub first_config_wait_ms: u64,
    /// Per-operation bus timeout handed to the adapter.
    pub bus_timeout_ms: u64,
    /// Pause before each apply sequence.
    pub settle_delay_ms: u64,
    /// Snapshots buffered per subscriber before the oldest are dropped.
    pub telemetry_channel_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: POLL_INTERVAL_MS,
            first_config_wait_ms: FIRST_CONFIG_WAIT_MS,
            bus_timeout_ms: BUS_TIMEOUT_MS,
            settle_delay_ms: SETTLE_DELAY_MS,
            telemetry_channel_capacity: TELEMETRY_CHANNEL_CAPACITY,
        }
    }
}

impl WorkerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Zero("poll_interval_ms"));
        }
        if self.first_config_wait_ms == 0 {
            return Err(ConfigError::Zero("first_config_wait_ms"));
        }
        if self.bus_timeout_ms == 0 {
            return Err(ConfigError::Zero("bus_timeout_ms"));
        }
        if self.telemetry_channel_capacity == 0 {
            return Err(ConfigError::Zero("telemetry_channel_capacity"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn first_config_wait(&self) -> Duration {
        Duration::from_millis(self.first_config_wait_ms)
    }

    pub fn bus_timeout(&self) -> Duration {
        Duration::from_millis(self.bus_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
