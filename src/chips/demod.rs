//! STV0910-class dual DVB-S/S2 demodulator, top path only.

use super::nim::Nim;
use super::DriverError;
use crate::bus::BusAdapter;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Demodulator master clock in Hz.
pub const MASTER_CLOCK_HZ: u64 = 135_000_000;

pub const SYMBOL_RATE_MIN: u32 = 33_000;
pub const SYMBOL_RATE_MAX: u32 = 45_000_000;

pub const REG_NCOARSE: u16 = 0xF111;
pub const REG_AGCIQIN1: u16 = 0xF40E;
pub const REG_AGCIQIN0: u16 = 0xF40F;
pub const REG_DMDCFGMD: u16 = 0xF410;
pub const REG_DMDISTATE: u16 = 0xF416;
pub const REG_DMDSTATE: u16 = 0xF41B;
pub const REG_AGC2I1: u16 = 0xF436;
pub const REG_AGC2I0: u16 = 0xF437;
pub const REG_CFRUP1: u16 = 0xF442;
pub const REG_CFRLOW1: u16 = 0xF444;
pub const REG_CFR2: u16 = 0xF448;
pub const REG_CFR1: u16 = 0xF449;
pub const REG_CFR0: u16 = 0xF44A;
pub const REG_SFRINIT1: u16 = 0xF45E;
pub const REG_SFRINIT0: u16 = 0xF45F;
pub const REG_SFR3: u16 = 0xF464;
pub const REG_SFR2: u16 = 0xF465;
pub const REG_SFR1: u16 = 0xF466;
pub const REG_SFR0: u16 = 0xF467;
pub const REG_POWERI: u16 = 0xF4A0;
pub const REG_POWERQ: u16 = 0xF4A1;
pub const REG_ISYMB: u16 = 0xF4A8;
pub const REG_QSYMB: u16 = 0xF4A9;
pub const REG_MER1: u16 = 0xF4B0;
pub const REG_MER0: u16 = 0xF4B1;
pub const REG_VITCURPUN: u16 = 0xF53C;
pub const REG_DMDMODCOD: u16 = 0xF547;
pub const REG_TSCFGH: u16 = 0xF572;
pub const REG_ERRCNT12: u16 = 0xF598;
pub const REG_ERRCNT11: u16 = 0xF599;
pub const REG_ERRCNT10: u16 = 0xF59A;
pub const REG_ERRCNT22: u16 = 0xF59C;
pub const REG_ERRCNT21: u16 = 0xF59D;
pub const REG_ERRCNT20: u16 = 0xF59E;
pub const REG_BCHERR: u16 = 0xFA16;
pub const REG_BCHCNT1: u16 = 0xFA17;
pub const REG_BCHCNT0: u16 = 0xFA18;
pub const REG_LDPCCNT1: u16 = 0xFA1A;
pub const REG_LDPCCNT0: u16 = 0xFA1B;

pub const DMDISTATE_RESET: u8 = 0x1F;
pub const DMDISTATE_BLIND_SEARCH: u8 = 0x15;

// DMDSTATE: HEADER_MODE in bits 6:5, search engine running in bit 4.
pub const DMDSTATE_HEADER_SHIFT: u8 = 5;
pub const DMDSTATE_SEARCHING: u8 = 0x10;
pub const HEADER_MODE_HUNTING: u8 = 0;
pub const HEADER_MODE_FOUND_HEADER: u8 = 1;
pub const HEADER_MODE_DVBS2: u8 = 2;
pub const HEADER_MODE_DVBS: u8 = 3;

pub const BCHERR_UNCORRECTED: u8 = 0x01;

const INIT_REGISTERS: &[(u16, u8)] = &[
    (REG_NCOARSE, 0x39),  // PLL: 135 MHz master clock from 30 MHz crystal
    (REG_DMDCFGMD, 0xC9), // search DVB-S and DVB-S2
    (REG_CFRUP1, 0x0F),   // carrier search window +/-
    (REG_CFRLOW1, 0xF0),
    (REG_TSCFGH, 0x20), // parallel TS, punctured clock
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LockState {
    #[default]
    Unlocked,
    Searching,
    LockedS,
    LockedS2,
}

impl LockState {
    pub fn from_dmdstate(raw: u8) -> Self {
        match (raw >> DMDSTATE_HEADER_SHIFT) & 0x03 {
            HEADER_MODE_DVBS2 => LockState::LockedS2,
            HEADER_MODE_DVBS => LockState::LockedS,
            HEADER_MODE_FOUND_HEADER => LockState::Searching,
            _ if raw & DMDSTATE_SEARCHING != 0 => LockState::Searching,
            _ => LockState::Unlocked,
        }
    }

    pub fn is_locked(self) -> bool {
        matches!(self, LockState::LockedS | LockState::LockedS2)
    }
}

/// One demodulated symbol, signed I and Q.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConstellationSample {
    pub i: i8,
    pub q: i8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModcodInfo {
    pub modcod: u8,
    pub short_frame: bool,
    pub pilots: bool,
}

impl ModcodInfo {
    pub fn from_dmdmodcod(raw: u8) -> Self {
        Self {
            modcod: (raw >> 2) & 0x1F,
            short_frame: raw & 0x02 != 0,
            pilots: raw & 0x01 != 0,
        }
    }
}

pub fn symbol_rate_to_sfrinit(symbol_rate: u32) -> u16 {
    ((u64::from(symbol_rate) << 16) / MASTER_CLOCK_HZ) as u16
}

pub fn sfr_to_symbol_rate(raw: u32) -> u32 {
    ((u64::from(raw) * MASTER_CLOCK_HZ) >> 32) as u32
}

/// Sign-extends the 24-bit CFR word and scales it to Hz.
pub fn cfr_to_offset_hz(raw: u32) -> i32 {
    let signed = ((raw << 8) as i32) >> 8;
    ((i64::from(signed) * MASTER_CLOCK_HZ as i64) >> 24) as i32
}

#[derive(Debug, Default)]
pub struct Demodulator {
    symbol_rate: u32,
}

impl Demodulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last symbol rate programmed by [`Demodulator::init`].
    pub fn symbol_rate(&self) -> u32 {
        self.symbol_rate
    }

    pub fn init<B: BusAdapter>(&mut self, nim: &mut Nim<B>, symbol_rate: u32) -> Result<(), DriverError> {
        if !(SYMBOL_RATE_MIN..=SYMBOL_RATE_MAX).contains(&symbol_rate) {
            return Err(DriverError::SymbolRateOutOfRange(symbol_rate));
        }

        nim.write_demod(REG_DMDISTATE, DMDISTATE_RESET)?;
        for &(register, value) in INIT_REGISTERS {
            nim.write_demod(register, value)?;
        }

        let sfrinit = symbol_rate_to_sfrinit(symbol_rate);
        let [high, low] = sfrinit.to_be_bytes();
        nim.write_demod(REG_SFRINIT1, high)?;
        nim.write_demod(REG_SFRINIT0, low)?;

        self.symbol_rate = symbol_rate;
        debug!(symbol_rate, sfrinit, "demodulator initialised");
        Ok(())
    }

    pub fn start_scan<B: BusAdapter>(&mut self, nim: &mut Nim<B>) -> Result<(), DriverError> {
        nim.write_demod(REG_DMDISTATE, DMDISTATE_RESET)?;
        nim.write_demod(REG_DMDISTATE, DMDISTATE_BLIND_SEARCH)
    }

    pub fn read_lock_state<B: BusAdapter>(&self, nim: &mut Nim<B>) -> Result<LockState, DriverError> {
        Ok(LockState::from_dmdstate(nim.read_demod(REG_DMDSTATE)?))
    }

    pub fn read_power<B: BusAdapter>(&self, nim: &mut Nim<B>) -> Result<(u8, u8), DriverError> {
        let i = nim.read_demod(REG_POWERI)?;
        let q = nim.read_demod(REG_POWERQ)?;
        Ok((i, q))
    }

    pub fn read_constellation<B: BusAdapter>(&self, nim: &mut Nim<B>) -> Result<ConstellationSample, DriverError> {
        let i = nim.read_demod(REG_ISYMB)? as i8;
        let q = nim.read_demod(REG_QSYMB)? as i8;
        Ok(ConstellationSample { i, q })
    }

    pub fn read_puncture_rate<B: BusAdapter>(&self, nim: &mut Nim<B>) -> Result<u8, DriverError> {
        Ok(nim.read_demod(REG_VITCURPUN)? & 0x1F)
    }

    pub fn read_carrier_offset<B: BusAdapter>(&self, nim: &mut Nim<B>) -> Result<i32, DriverError> {
        let raw = read_be(nim, &[REG_CFR2, REG_CFR1, REG_CFR0])?;
        Ok(cfr_to_offset_hz(raw))
    }

    pub fn read_symbol_rate<B: BusAdapter>(&self, nim: &mut Nim<B>) -> Result<u32, DriverError> {
        let raw = read_be(nim, &[REG_SFR3, REG_SFR2, REG_SFR1, REG_SFR0])?;
        Ok(sfr_to_symbol_rate(raw))
    }

    pub fn read_viterbi_error_rate<B: BusAdapter>(&self, nim: &mut Nim<B>) -> Result<u32, DriverError> {
        read_be(nim, &[REG_ERRCNT12, REG_ERRCNT11, REG_ERRCNT10])
    }

    pub fn read_ber<B: BusAdapter>(&self, nim: &mut Nim<B>) -> Result<u32, DriverError> {
        read_be(nim, &[REG_ERRCNT22, REG_ERRCNT21, REG_ERRCNT20])
    }

    pub fn read_bch_uncorrected<B: BusAdapter>(&self, nim: &mut Nim<B>) -> Result<bool, DriverError> {
        Ok(nim.read_demod(REG_BCHERR)? & BCHERR_UNCORRECTED != 0)
    }

    pub fn read_bch_error_count<B: BusAdapter>(&self, nim: &mut Nim<B>) -> Result<u32, DriverError> {
        read_be(nim, &[REG_BCHCNT1, REG_BCHCNT0])
    }

    pub fn read_ldpc_error_count<B: BusAdapter>(&self, nim: &mut Nim<B>) -> Result<u32, DriverError> {
        read_be(nim, &[REG_LDPCCNT1, REG_LDPCCNT0])
    }

    pub fn read_agc1_gain<B: BusAdapter>(&self, nim: &mut Nim<B>) -> Result<u16, DriverError> {
        Ok(read_be(nim, &[REG_AGCIQIN1, REG_AGCIQIN0])? as u16)
    }

    pub fn read_agc2_gain<B: BusAdapter>(&self, nim: &mut Nim<B>) -> Result<u16, DriverError> {
        Ok(read_be(nim, &[REG_AGC2I1, REG_AGC2I0])? as u16)
    }

    /// MER estimate in tenths of a dB.
    pub fn read_mer<B: BusAdapter>(&self, nim: &mut Nim<B>) -> Result<u32, DriverError> {
        read_be(nim, &[REG_MER1, REG_MER0])
    }

    pub fn read_modcod<B: BusAdapter>(&self, nim: &mut Nim<B>) -> Result<ModcodInfo, DriverError> {
        Ok(ModcodInfo::from_dmdmodcod(nim.read_demod(REG_DMDMODCOD)?))
    }
}

// Most significant register first; reading the MSB latches the rest.
fn read_be<B: BusAdapter>(nim: &mut Nim<B>, registers: &[u16]) -> Result<u32, DriverError> {
    let mut value = 0u32;
    for &register in registers {
        value = (value << 8) | u32::from(nim.read_demod(register)?);
    }
    Ok(value)
}
