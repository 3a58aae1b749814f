use core::fmt;
use core::num::NonZeroU8;
use core::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fault code reported for a bus operation that ran past its timeout.
pub const TIMEOUT_FAULT_CODE: u8 = 0xFE;
/// Fault code reported when an addressed device does not acknowledge.
pub const NACK_FAULT_CODE: u8 = 0xFD;

/// A register on one I2C device behind the USB adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterAddress {
    /// 8-bit I2C write address of the device.
    pub device: u8,
    /// Register index; 16-bit for the demodulator, 8-bit for the others.
    pub register: u16,
}

impl RegisterAddress {
    pub const fn new(device: u8, register: u16) -> Self {
        Self { device, register }
    }
}

impl fmt::Display for RegisterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}:{:#06x}", self.device, self.register)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusFault {
    #[error("device {device:#04x} did not acknowledge")]
    NoAcknowledge { device: u8 },
    #[error("bus operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("adapter fault code {0}")]
    Adapter(NonZeroU8),
}

impl BusFault {
    /// Nonzero fault code, as the adapter would report it.
    pub fn code(&self) -> u8 {
        match self {
            BusFault::NoAcknowledge { .. } => NACK_FAULT_CODE,
            BusFault::Timeout(_) => TIMEOUT_FAULT_CODE,
            BusFault::Adapter(code) => code.get(),
        }
    }
}

/// Byte-level transport to the NIM (USB/I2C bridge).
///
/// Every operation blocks until the adapter answers or the configured
/// timeout elapses; an elapsed timeout is reported as [`BusFault::Timeout`].
pub trait BusAdapter: Send {
    fn read_register(&mut self, address: RegisterAddress) -> Result<u8, BusFault>;

    fn write_register(&mut self, address: RegisterAddress, value: u8) -> Result<(), BusFault>;

    /// Drive the LNB supply: 13 V (vertical) or 18 V (horizontal) when enabled.
    fn set_polarization_supply(&mut self, enable: bool, horizontal: bool) -> Result<(), BusFault>;

    /// Upper bound for any single operation.
    fn set_timeout(&mut self, timeout: Duration);
}

impl<B: BusAdapter + ?Sized> BusAdapter for Box<B> {
    fn read_register(&mut self, address: RegisterAddress) -> Result<u8, BusFault> {
        (**self).read_register(address)
    }

    fn write_register(&mut self, address: RegisterAddress, value: u8) -> Result<(), BusFault> {
        (**self).write_register(address, value)
    }

    fn set_polarization_supply(&mut self, enable: bool, horizontal: bool) -> Result<(), BusFault> {
        (**self).set_polarization_supply(enable, horizontal)
    }

    fn set_timeout(&mut self, timeout: Duration) {
        (**self).set_timeout(timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_codes_are_nonzero() {
        let faults = [
            BusFault::NoAcknowledge { device: 0xC8 },
            BusFault::Timeout(Duration::from_millis(100)),
            BusFault::Adapter(NonZeroU8::new(3).unwrap()),
        ];
        for fault in faults {
            assert_ne!(fault.code(), 0);
        }
        assert_eq!(faults[2].code(), 3);
    }

    #[test]
    fn test_register_address_display() {
        let address = RegisterAddress::new(0xD2, 0xF41B);
        assert_eq!(address.to_string(), "0xd2:0xf41b");
    }
}
