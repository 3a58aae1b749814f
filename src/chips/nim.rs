//! Bus multiplexing for the NIM board.
//!
//! Only the demodulator sits directly on the adapter's I2C bus. The tuner and
//! both LNAs are reached through the demodulator's I2C repeater, which has to
//! be opened around every access and closed again afterwards.

use super::{DriverError, PolarizationSupply};
use crate::bus::{BusAdapter, RegisterAddress};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEMOD_ADDRESS: u8 = 0xD2;
pub const TUNER_ADDRESS: u8 = 0xC0;
pub const LNA_TOP_ADDRESS: u8 = 0xC8;
pub const LNA_BOTTOM_ADDRESS: u8 = 0xCA;

pub const REG_MID: u16 = 0xF100;
pub const REG_I2CRPT: u16 = 0xF12A;

pub const DEMOD_CHIP_ID: u8 = 0x51;
pub const I2CRPT_CLOSED: u8 = 0x38;
pub const I2CRPT_OPEN: u8 = 0xB8;

/// RF input path on the NIM, each with its own LNA footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NimInput {
    Top,
    Bottom,
}

impl NimInput {
    pub fn lna_address(self) -> u8 {
        match self {
            NimInput::Top => LNA_TOP_ADDRESS,
            NimInput::Bottom => LNA_BOTTOM_ADDRESS,
        }
    }
}

#[derive(Debug)]
pub struct Nim<B> {
    bus: B,
}

impl<B: BusAdapter> Nim<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn into_inner(self) -> B {
        self.bus
    }

    /// Put the repeater in a known state and check the demodulator answers
    /// with the expected chip id.
    pub fn init(&mut self) -> Result<(), DriverError> {
        self.write_demod(REG_I2CRPT, I2CRPT_CLOSED)?;

        let found = self.read_demod(REG_MID)?;
        if found != DEMOD_CHIP_ID {
            return Err(DriverError::UnexpectedChipId {
                device: DEMOD_ADDRESS,
                expected: DEMOD_CHIP_ID,
                found,
            });
        }

        debug!(chip_id = found, "demodulator detected");
        Ok(())
    }

    pub fn read_demod(&mut self, register: u16) -> Result<u8, DriverError> {
        Ok(self.bus.read_register(RegisterAddress::new(DEMOD_ADDRESS, register))?)
    }

    pub fn write_demod(&mut self, register: u16, value: u8) -> Result<(), DriverError> {
        Ok(self.bus.write_register(RegisterAddress::new(DEMOD_ADDRESS, register), value)?)
    }

    pub fn read_tuner(&mut self, register: u8) -> Result<u8, DriverError> {
        self.read_behind_repeater(TUNER_ADDRESS, register)
    }

    pub fn write_tuner(&mut self, register: u8, value: u8) -> Result<(), DriverError> {
        self.write_behind_repeater(TUNER_ADDRESS, register, value)
    }

    pub fn read_lna(&mut self, input: NimInput, register: u8) -> Result<u8, DriverError> {
        self.read_behind_repeater(input.lna_address(), register)
    }

    pub fn write_lna(&mut self, input: NimInput, register: u8, value: u8) -> Result<(), DriverError> {
        self.write_behind_repeater(input.lna_address(), register, value)
    }

    pub fn set_polarization_supply(&mut self, supply: PolarizationSupply) -> Result<(), DriverError> {
        let (enable, horizontal) = supply.adapter_flags();
        Ok(self.bus.set_polarization_supply(enable, horizontal)?)
    }

    fn read_behind_repeater(&mut self, device: u8, register: u8) -> Result<u8, DriverError> {
        self.write_demod(REG_I2CRPT, I2CRPT_OPEN)?;
        let result = self
            .bus
            .read_register(RegisterAddress::new(device, u16::from(register)))
            .map_err(DriverError::from);
        // The transfer error wins over a failed close.
        let closed = self.write_demod(REG_I2CRPT, I2CRPT_CLOSED);
        let value = result?;
        closed?;
        Ok(value)
    }

    fn write_behind_repeater(&mut self, device: u8, register: u8, value: u8) -> Result<(), DriverError> {
        self.write_demod(REG_I2CRPT, I2CRPT_OPEN)?;
        let result = self
            .bus
            .write_register(RegisterAddress::new(device, u16::from(register)), value)
            .map_err(DriverError::from);
        let closed = self.write_demod(REG_I2CRPT, I2CRPT_CLOSED);
        result?;
        closed
    }
}
