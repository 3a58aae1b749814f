pub mod nim;
pub mod demod;
pub mod tuner;
pub mod lna;

pub use nim::{Nim, NimInput};
pub use demod::{ConstellationSample, Demodulator, LockState, ModcodInfo};
pub use tuner::{PllDividers, RfInput, Tuner};
pub use lna::{Lna, LnaAgc, LnaPower};

use crate::bus::BusFault;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error(transparent)]
    Bus(#[from] BusFault),
    #[error("device {device:#04x} reported id {found:#04x}, expected {expected:#04x}")]
    UnexpectedChipId { device: u8, expected: u8, found: u8 },
    #[error("symbol rate {0} Bd outside demodulator range")]
    SymbolRateOutOfRange(u32),
    #[error("frequency {0} Hz outside tuner range")]
    FrequencyOutOfRange(u32),
    #[error("tuner PLL not locked after {attempts} polls")]
    PllUnlocked { attempts: u32 },
}

impl DriverError {
    /// Nonzero fault code for logs and telemetry consumers.
    pub fn code(&self) -> u8 {
        match self {
            DriverError::Bus(fault) => fault.code(),
            DriverError::UnexpectedChipId { .. } => 0x10,
            DriverError::SymbolRateOutOfRange(_) => 0x20,
            DriverError::FrequencyOutOfRange(_) => 0x30,
            DriverError::PllUnlocked { .. } => 0x31,
        }
    }
}

/// LNB supply state derived from a configuration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PolarizationSupply {
    #[default]
    Off,
    /// 13 V
    Vertical,
    /// 18 V
    Horizontal,
}

impl PolarizationSupply {
    /// `(enable, horizontal)` as passed to the adapter.
    pub fn adapter_flags(self) -> (bool, bool) {
        match self {
            PolarizationSupply::Off => (false, false),
            PolarizationSupply::Vertical => (true, false),
            PolarizationSupply::Horizontal => (true, true),
        }
    }
}
