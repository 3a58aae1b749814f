//! STV6120-class satellite tuner synthesizer.

use super::nim::Nim;
use super::DriverError;
use crate::bus::BusAdapter;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use tracing::debug;

pub const CRYSTAL_KHZ: u64 = 27_000;
pub const FREQUENCY_MIN_HZ: u32 = 250_000_000;
pub const FREQUENCY_MAX_HZ: u32 = 2_150_000_000;

const VCO_MIN_KHZ: u64 = 2_700_000;
const VCO_MAX_KHZ: u64 = 5_400_000;
const P_DIVIDERS: [u8; 4] = [2, 4, 8, 16];
const FRACTION_BITS: u32 = 18;

pub const REG_CTRL1: u8 = 0x00;
pub const REG_CTRL2: u8 = 0x01;
pub const REG_N_LSB: u8 = 0x03;
pub const REG_F_N_MSB: u8 = 0x04;
pub const REG_F_MID: u8 = 0x05;
pub const REG_P_F_MSB: u8 = 0x06;
pub const REG_RFSEL: u8 = 0x0A;
pub const REG_STAT1: u8 = 0x0C;

pub const CTRL1_DEFAULT: u8 = 0x75; // K = 27, output clock divider /1
pub const CTRL2_POWER_ON: u8 = 0x33;
pub const RFSEL_INPUT_A: u8 = 0x01;
pub const RFSEL_INPUT_B: u8 = 0x02;
pub const STAT1_LOCK: u8 = 0x01;
pub const STAT1_CALVCO_START: u8 = 0x02;

pub const PLL_LOCK_ATTEMPTS: u32 = 10;
const PLL_LOCK_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RfInput {
    A,
    B,
}

impl RfInput {
    pub fn from_secondary(secondary: bool) -> Self {
        if secondary {
            RfInput::B
        } else {
            RfInput::A
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllDividers {
    pub p: u8,
    pub n: u16,
    pub f: u32,
}

impl PllDividers {
    /// Let the VCO run inside its 2.7-5.4 GHz range and split the division
    /// from the crystal into integer and 18-bit fractional parts.
    pub fn for_frequency(frequency_hz: u32) -> Result<Self, DriverError> {
        if !(FREQUENCY_MIN_HZ..=FREQUENCY_MAX_HZ).contains(&frequency_hz) {
            return Err(DriverError::FrequencyOutOfRange(frequency_hz));
        }

        let frequency_khz = u64::from(frequency_hz) / 1000;
        let (p, vco_khz) = P_DIVIDERS
            .iter()
            .map(|&p| (p, frequency_khz * u64::from(p)))
            .find(|&(_, vco)| (VCO_MIN_KHZ..=VCO_MAX_KHZ).contains(&vco))
            .ok_or(DriverError::FrequencyOutOfRange(frequency_hz))?;

        let n = (vco_khz / CRYSTAL_KHZ) as u16;
        let f = (((vco_khz % CRYSTAL_KHZ) << FRACTION_BITS) / CRYSTAL_KHZ) as u32;
        Ok(Self { p, n, f })
    }

    /// Register image for N, F and P, in write order starting at `REG_N_LSB`.
    pub fn registers(&self) -> [(u8, u8); 4] {
        let p_code = self.p.trailing_zeros() as u8 - 1;
        [
            (REG_N_LSB, (self.n & 0xFF) as u8),
            (REG_F_N_MSB, (((self.f & 0x7F) << 1) as u8) | ((self.n >> 8) & 0x01) as u8),
            (REG_F_MID, ((self.f >> 7) & 0xFF) as u8),
            (REG_P_F_MSB, (p_code << 5) | ((self.f >> 15) & 0x07) as u8),
        ]
    }
}

#[derive(Debug, Default)]
pub struct Tuner {
    dividers: Option<PllDividers>,
}

impl Tuner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dividers(&self) -> Option<PllDividers> {
        self.dividers
    }

    pub fn init<B: BusAdapter>(
        &mut self,
        nim: &mut Nim<B>,
        frequency_hz: u32,
        input: RfInput,
    ) -> Result<(), DriverError> {
        let dividers = PllDividers::for_frequency(frequency_hz)?;

        nim.write_tuner(REG_CTRL1, CTRL1_DEFAULT)?;
        nim.write_tuner(REG_CTRL2, CTRL2_POWER_ON)?;
        for (register, value) in dividers.registers() {
            nim.write_tuner(register, value)?;
        }

        let rfsel = match input {
            RfInput::A => RFSEL_INPUT_A,
            RfInput::B => RFSEL_INPUT_B,
        };
        nim.write_tuner(REG_RFSEL, rfsel)?;

        nim.write_tuner(REG_STAT1, STAT1_CALVCO_START)?;
        self.wait_for_lock(nim)?;

        debug!(frequency_hz, ?input, p = dividers.p, n = dividers.n, f = dividers.f, "tuner locked");
        self.dividers = Some(dividers);
        Ok(())
    }

    fn wait_for_lock<B: BusAdapter>(&self, nim: &mut Nim<B>) -> Result<(), DriverError> {
        for attempt in 0..PLL_LOCK_ATTEMPTS {
            if nim.read_tuner(REG_STAT1)? & STAT1_LOCK != 0 {
                return Ok(());
            }
            if attempt + 1 < PLL_LOCK_ATTEMPTS {
                thread::sleep(PLL_LOCK_POLL);
            }
        }
        Err(DriverError::PllUnlocked {
            attempts: PLL_LOCK_ATTEMPTS,
        })
    }
}
