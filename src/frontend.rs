use crate::bus::BusAdapter;
use crate::chips::{
    ConstellationSample, Demodulator, DriverError, LnaPower, LockState, ModcodInfo, Nim, NimInput,
    Lna, PolarizationSupply, RfInput, Tuner,
};
use core::time::Duration;

/// Hardware operations the worker drives, one method per apply step or
/// telemetry register group.
///
/// All methods block until the hardware answers or the bus timeout expires.
pub trait Frontend: Send {
    fn set_bus_timeout(&mut self, timeout: Duration);

    // Apply sequence
    fn reset(&mut self) -> Result<(), DriverError>;
    fn init_demodulator(&mut self, symbol_rate: u32) -> Result<(), DriverError>;
    fn init_tuner(&mut self, frequency_hz: u32, input: RfInput) -> Result<(), DriverError>;
    /// `Ok(false)` when no LNA is fitted on `input`.
    fn init_lna(&mut self, input: NimInput, power: LnaPower) -> Result<bool, DriverError>;
    fn start_scan(&mut self) -> Result<(), DriverError>;
    fn set_polarization_supply(&mut self, supply: PolarizationSupply) -> Result<(), DriverError>;

    // Telemetry
    fn read_lock_state(&mut self) -> Result<LockState, DriverError>;
    fn read_lna_gain(&mut self, input: NimInput) -> Result<u16, DriverError>;
    fn read_power(&mut self) -> Result<(u8, u8), DriverError>;
    fn read_constellation(&mut self) -> Result<ConstellationSample, DriverError>;
    fn read_puncture_rate(&mut self) -> Result<u8, DriverError>;
    fn read_carrier_offset(&mut self) -> Result<i32, DriverError>;
    fn read_symbol_rate(&mut self) -> Result<u32, DriverError>;
    fn read_viterbi_error_rate(&mut self) -> Result<u32, DriverError>;
    fn read_ber(&mut self) -> Result<u32, DriverError>;
    fn read_bch_uncorrected(&mut self) -> Result<bool, DriverError>;
    fn read_bch_error_count(&mut self) -> Result<u32, DriverError>;
    fn read_ldpc_error_count(&mut self) -> Result<u32, DriverError>;
    fn read_agc1_gain(&mut self) -> Result<u16, DriverError>;
    fn read_agc2_gain(&mut self) -> Result<u16, DriverError>;
    fn read_mer(&mut self) -> Result<u32, DriverError>;
    fn read_modcod(&mut self) -> Result<ModcodInfo, DriverError>;
}

/// The chipset of one NIM board over a single bus adapter.
#[derive(Debug)]
pub struct NimFrontend<B> {
    nim: Nim<B>,
    demod: Demodulator,
    tuner: Tuner,
    lna_top: Lna,
    lna_bottom: Lna,
}

impl<B: BusAdapter> NimFrontend<B> {
    pub fn new(bus: B) -> Self {
        Self {
            nim: Nim::new(bus),
            demod: Demodulator::new(),
            tuner: Tuner::new(),
            lna_top: Lna::new(NimInput::Top),
            lna_bottom: Lna::new(NimInput::Bottom),
        }
    }

    pub fn tuner(&self) -> &Tuner {
        &self.tuner
    }

    pub fn demodulator(&self) -> &Demodulator {
        &self.demod
    }

    pub fn into_bus(self) -> B {
        self.nim.into_inner()
    }
}

impl<B: BusAdapter> Frontend for NimFrontend<B> {
    fn set_bus_timeout(&mut self, timeout: Duration) {
        self.nim.bus_mut().set_timeout(timeout);
    }

    fn reset(&mut self) -> Result<(), DriverError> {
        // Presence is re-detected by this apply's LNA steps.
        self.lna_top.clear();
        self.lna_bottom.clear();
        self.nim.init()
    }

    fn init_demodulator(&mut self, symbol_rate: u32) -> Result<(), DriverError> {
        self.demod.init(&mut self.nim, symbol_rate)
    }

    fn init_tuner(&mut self, frequency_hz: u32, input: RfInput) -> Result<(), DriverError> {
        self.tuner.init(&mut self.nim, frequency_hz, input)
    }

    fn init_lna(&mut self, input: NimInput, power: LnaPower) -> Result<bool, DriverError> {
        match input {
            NimInput::Top => self.lna_top.init(&mut self.nim, power),
            NimInput::Bottom => self.lna_bottom.init(&mut self.nim, power),
        }
    }

    fn start_scan(&mut self) -> Result<(), DriverError> {
        self.demod.start_scan(&mut self.nim)
    }

    fn set_polarization_supply(&mut self, supply: PolarizationSupply) -> Result<(), DriverError> {
        self.nim.set_polarization_supply(supply)
    }

    fn read_lock_state(&mut self) -> Result<LockState, DriverError> {
        self.demod.read_lock_state(&mut self.nim)
    }

    fn read_lna_gain(&mut self, input: NimInput) -> Result<u16, DriverError> {
        let lna = match input {
            NimInput::Top => &self.lna_top,
            NimInput::Bottom => &self.lna_bottom,
        };
        if !lna.is_present() {
            return Ok(0);
        }
        Ok(lna.read_agc(&mut self.nim)?.code())
    }

    fn read_power(&mut self) -> Result<(u8, u8), DriverError> {
        self.demod.read_power(&mut self.nim)
    }

    fn read_constellation(&mut self) -> Result<ConstellationSample, DriverError> {
        self.demod.read_constellation(&mut self.nim)
    }

    fn read_puncture_rate(&mut self) -> Result<u8, DriverError> {
        self.demod.read_puncture_rate(&mut self.nim)
    }

    fn read_carrier_offset(&mut self) -> Result<i32, DriverError> {
        self.demod.read_carrier_offset(&mut self.nim)
    }

    fn read_symbol_rate(&mut self) -> Result<u32, DriverError> {
        self.demod.read_symbol_rate(&mut self.nim)
    }

    fn read_viterbi_error_rate(&mut self) -> Result<u32, DriverError> {
        self.demod.read_viterbi_error_rate(&mut self.nim)
    }

    fn read_ber(&mut self) -> Result<u32, DriverError> {
        self.demod.read_ber(&mut self.nim)
    }

    fn read_bch_uncorrected(&mut self) -> Result<bool, DriverError> {
        self.demod.read_bch_uncorrected(&mut self.nim)
    }

    fn read_bch_error_count(&mut self) -> Result<u32, DriverError> {
        self.demod.read_bch_error_count(&mut self.nim)
    }

    fn read_ldpc_error_count(&mut self) -> Result<u32, DriverError> {
        self.demod.read_ldpc_error_count(&mut self.nim)
    }

    fn read_agc1_gain(&mut self) -> Result<u16, DriverError> {
        self.demod.read_agc1_gain(&mut self.nim)
    }

    fn read_agc2_gain(&mut self) -> Result<u16, DriverError> {
        self.demod.read_agc2_gain(&mut self.nim)
    }

    fn read_mer(&mut self) -> Result<u32, DriverError> {
        self.demod.read_mer(&mut self.nim)
    }

    fn read_modcod(&mut self) -> Result<ModcodInfo, DriverError> {
        self.demod.read_modcod(&mut self.nim)
    }
}
