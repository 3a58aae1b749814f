//! STVVGLNA-class variable gain LNA, optional on either RF input.
//!
//! Boards are built with zero, one or two LNAs fitted, so a missing device is
//! a normal outcome of [`Lna::init`] rather than a fault.

use super::nim::{Nim, NimInput};
use super::DriverError;
use crate::bus::{BusAdapter, BusFault};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const REG0: u8 = 0x00;
pub const REG1: u8 = 0x01;
pub const REG2: u8 = 0x02;
pub const REG3: u8 = 0x03;

pub const LNA_CHIP_ID: u8 = 0x05;
pub const REG1_LNA_ON: u8 = 0x12; // RF AGC loop running
pub const REG1_LNA_OFF: u8 = 0x80; // shutdown, bypass path active
const AGC_FIELD_MASK: u8 = 0x1F;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LnaPower {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LnaAgc {
    pub gain: u8,
    pub vgo: u8,
}

impl LnaAgc {
    /// Packed as `(gain << 5) | vgo`.
    pub fn code(self) -> u16 {
        (u16::from(self.gain) << 5) | u16::from(self.vgo)
    }
}

#[derive(Debug)]
pub struct Lna {
    input: NimInput,
    present: bool,
}

impl Lna {
    pub fn new(input: NimInput) -> Self {
        Self { input, present: false }
    }

    pub fn input(&self) -> NimInput {
        self.input
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    /// Forget a previous detection until the next [`Lna::init`].
    pub fn clear(&mut self) {
        self.present = false;
    }

    /// Detect and configure the LNA. Returns whether one is fitted.
    ///
    /// Only a NACK from the LNA's own address means "not fitted". A NACK from
    /// the demodulator while opening the repeater is a bus fault.
    pub fn init<B: BusAdapter>(&mut self, nim: &mut Nim<B>, power: LnaPower) -> Result<bool, DriverError> {
        self.clear();

        let id = match nim.read_lna(self.input, REG0) {
            Ok(value) => value >> 4,
            Err(DriverError::Bus(BusFault::NoAcknowledge { device })) if device == self.input.lna_address() => {
                debug!(input = ?self.input, "no LNA fitted");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if id != LNA_CHIP_ID {
            warn!(input = ?self.input, id, "unrecognised device at LNA address, treating as absent");
            return Ok(false);
        }

        let reg1 = match power {
            LnaPower::On => REG1_LNA_ON,
            LnaPower::Off => REG1_LNA_OFF,
        };
        nim.write_lna(self.input, REG1, reg1)?;

        self.present = true;
        debug!(input = ?self.input, ?power, "LNA initialised");
        Ok(true)
    }

    pub fn read_agc<B: BusAdapter>(&self, nim: &mut Nim<B>) -> Result<LnaAgc, DriverError> {
        let gain = nim.read_lna(self.input, REG2)? & AGC_FIELD_MASK;
        let vgo = nim.read_lna(self.input, REG3)? & AGC_FIELD_MASK;
        Ok(LnaAgc { gain, vgo })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_forgets_detection() {
        let mut lna = Lna::new(NimInput::Bottom);
        lna.present = true;
        lna.clear();
        assert!(!lna.is_present());
    }

    #[test]
    fn test_agc_code_packing() {
        let agc = LnaAgc { gain: 0x1F, vgo: 0x03 };
        assert_eq!(agc.code(), (0x1F << 5) | 0x03);
        assert_eq!(LnaAgc::default().code(), 0);
    }
}
