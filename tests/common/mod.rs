#![allow(dead_code)]

use nimbus::apply::ApplyStep;
use nimbus::bus::BusFault;
use nimbus::chips::{
    ConstellationSample, DriverError, LnaPower, LockState, ModcodInfo, NimInput, PolarizationSupply,
    RfInput,
};
use nimbus::{Frontend, WorkerConfig};
use parking_lot::Mutex;
use std::num::NonZeroU8;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const SCRIPTED_FAULT_CODE: u8 = 0x42;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Read {
    LockState,
    LnaGain(NimInput),
    Power,
    Constellation,
    PunctureRate,
    CarrierOffset,
    SymbolRate,
    ViterbiErrorRate,
    Ber,
    BchUncorrected,
    BchErrorCount,
    LdpcErrorCount,
    Agc1,
    Agc2,
    Mer,
    Modcod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    SetBusTimeout(Duration),
    Reset,
    InitDemodulator(u32),
    InitTuner(u32, RfInput),
    InitLna(NimInput, LnaPower),
    StartScan,
    Polarization(PolarizationSupply),
    Read(Read),
}

impl Call {
    pub fn step(&self) -> Option<ApplyStep> {
        Some(match self {
            Call::Reset => ApplyStep::ResetNim,
            Call::InitDemodulator(_) => ApplyStep::InitDemodulator,
            Call::InitTuner(..) => ApplyStep::InitTuner,
            Call::InitLna(NimInput::Top, _) => ApplyStep::InitLnaTop,
            Call::InitLna(NimInput::Bottom, _) => ApplyStep::InitLnaBottom,
            Call::StartScan => ApplyStep::StartScan,
            Call::Polarization(_) => ApplyStep::PolarizationSupply,
            Call::SetBusTimeout(_) | Call::Read(_) => return None,
        })
    }
}

/// Values the scripted hardware reports, and where it fails.
#[derive(Debug, Clone)]
pub struct Script {
    pub fail_step: Option<ApplyStep>,
    pub fail_read: Option<Read>,
    pub lock_state: LockState,
    pub lna_top_present: bool,
    pub lna_bottom_present: bool,
    pub lna_gain: u16,
    pub power: (u8, u8),
    pub constellation: ConstellationSample,
    pub agc1: u16,
    pub agc2: u16,
    pub mer: u32,
    pub modcod: ModcodInfo,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            fail_step: None,
            fail_read: None,
            lock_state: LockState::LockedS2,
            lna_top_present: true,
            lna_bottom_present: false,
            lna_gain: 0x185,
            power: (70, 68),
            constellation: ConstellationSample { i: 40, q: -40 },
            agc1: 30_100,
            agc2: 400,
            mer: 87,
            modcod: ModcodInfo {
                modcod: 11,
                short_frame: true,
                pilots: true,
            },
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    script: Script,
    calls: Vec<Call>,
}

/// A [`Frontend`] that records every call and answers from a [`Script`].
#[derive(Debug)]
pub struct ScriptedFrontend {
    shared: Arc<Mutex<Shared>>,
}

/// Test-side view of a [`ScriptedFrontend`], usable while a worker owns it.
#[derive(Debug, Clone)]
pub struct ScriptControl {
    shared: Arc<Mutex<Shared>>,
}

pub fn scripted(script: Script) -> (ScriptedFrontend, ScriptControl) {
    let shared = Arc::new(Mutex::new(Shared {
        script,
        calls: Vec::new(),
    }));
    (
        ScriptedFrontend {
            shared: Arc::clone(&shared),
        },
        ScriptControl { shared },
    )
}

fn scripted_fault() -> DriverError {
    DriverError::Bus(BusFault::Adapter(NonZeroU8::new(SCRIPTED_FAULT_CODE).unwrap()))
}

impl ScriptedFrontend {
    fn record_step(&mut self, call: Call) -> Result<Script, DriverError> {
        let mut shared = self.shared.lock();
        shared.calls.push(call);
        if call.step().is_some() && call.step() == shared.script.fail_step {
            return Err(scripted_fault());
        }
        Ok(shared.script.clone())
    }

    fn record_read(&mut self, read: Read) -> Result<Script, DriverError> {
        let mut shared = self.shared.lock();
        shared.calls.push(Call::Read(read));
        if shared.script.fail_read == Some(read) {
            return Err(scripted_fault());
        }
        Ok(shared.script.clone())
    }
}

impl Frontend for ScriptedFrontend {
    fn set_bus_timeout(&mut self, timeout: Duration) {
        self.shared.lock().calls.push(Call::SetBusTimeout(timeout));
    }

    fn reset(&mut self) -> Result<(), DriverError> {
        self.record_step(Call::Reset).map(drop)
    }

    fn init_demodulator(&mut self, symbol_rate: u32) -> Result<(), DriverError> {
        self.record_step(Call::InitDemodulator(symbol_rate)).map(drop)
    }

    fn init_tuner(&mut self, frequency_hz: u32, input: RfInput) -> Result<(), DriverError> {
        self.record_step(Call::InitTuner(frequency_hz, input)).map(drop)
    }

    fn init_lna(&mut self, input: NimInput, power: LnaPower) -> Result<bool, DriverError> {
        let script = self.record_step(Call::InitLna(input, power))?;
        Ok(match input {
            NimInput::Top => script.lna_top_present,
            NimInput::Bottom => script.lna_bottom_present,
        })
    }

    fn start_scan(&mut self) -> Result<(), DriverError> {
        self.record_step(Call::StartScan).map(drop)
    }

    fn set_polarization_supply(&mut self, supply: PolarizationSupply) -> Result<(), DriverError> {
        self.record_step(Call::Polarization(supply)).map(drop)
    }

    fn read_lock_state(&mut self) -> Result<LockState, DriverError> {
        Ok(self.record_read(Read::LockState)?.lock_state)
    }

    fn read_lna_gain(&mut self, input: NimInput) -> Result<u16, DriverError> {
        Ok(self.record_read(Read::LnaGain(input))?.lna_gain)
    }

    fn read_power(&mut self) -> Result<(u8, u8), DriverError> {
        Ok(self.record_read(Read::Power)?.power)
    }

    fn read_constellation(&mut self) -> Result<ConstellationSample, DriverError> {
        Ok(self.record_read(Read::Constellation)?.constellation)
    }

    fn read_puncture_rate(&mut self) -> Result<u8, DriverError> {
        self.record_read(Read::PunctureRate).map(|_| 0x0D)
    }

    fn read_carrier_offset(&mut self) -> Result<i32, DriverError> {
        self.record_read(Read::CarrierOffset).map(|_| -3_000)
    }

    fn read_symbol_rate(&mut self) -> Result<u32, DriverError> {
        self.record_read(Read::SymbolRate).map(|_| 1_499_998)
    }

    fn read_viterbi_error_rate(&mut self) -> Result<u32, DriverError> {
        self.record_read(Read::ViterbiErrorRate).map(|_| 2)
    }

    fn read_ber(&mut self) -> Result<u32, DriverError> {
        self.record_read(Read::Ber).map(|_| 9)
    }

    fn read_bch_uncorrected(&mut self) -> Result<bool, DriverError> {
        self.record_read(Read::BchUncorrected).map(|_| true)
    }

    fn read_bch_error_count(&mut self) -> Result<u32, DriverError> {
        self.record_read(Read::BchErrorCount).map(|_| 4)
    }

    fn read_ldpc_error_count(&mut self) -> Result<u32, DriverError> {
        self.record_read(Read::LdpcErrorCount).map(|_| 5)
    }

    fn read_agc1_gain(&mut self) -> Result<u16, DriverError> {
        Ok(self.record_read(Read::Agc1)?.agc1)
    }

    fn read_agc2_gain(&mut self) -> Result<u16, DriverError> {
        Ok(self.record_read(Read::Agc2)?.agc2)
    }

    fn read_mer(&mut self) -> Result<u32, DriverError> {
        Ok(self.record_read(Read::Mer)?.mer)
    }

    fn read_modcod(&mut self) -> Result<ModcodInfo, DriverError> {
        Ok(self.record_read(Read::Modcod)?.modcod)
    }
}

impl ScriptControl {
    pub fn calls(&self) -> Vec<Call> {
        self.shared.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.shared.lock().calls.clear();
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.shared.lock().calls.iter().filter(|call| predicate(call)).count()
    }

    pub fn resets(&self) -> usize {
        self.count(|call| *call == Call::Reset)
    }

    pub fn tuned_frequencies(&self) -> Vec<u32> {
        self.shared
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::InitTuner(frequency_hz, _) => Some(*frequency_hz),
                _ => None,
            })
            .collect()
    }

    pub fn fail_step(&self, step: Option<ApplyStep>) {
        self.shared.lock().script.fail_step = step;
    }

    pub fn fail_read(&self, read: Option<Read>) {
        self.shared.lock().script.fail_read = read;
    }

    /// False once the worker has dropped the frontend.
    pub fn frontend_alive(&self) -> bool {
        Arc::strong_count(&self.shared) > 1
    }
}

/// Timings short enough to keep worker tests fast.
pub fn fast_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval_ms: 5,
        first_config_wait_ms: 20,
        bus_timeout_ms: 50,
        settle_delay_ms: 0,
        telemetry_channel_capacity: 64,
    }
}

/// Polls `condition` until it holds, panicking after two seconds.
pub fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}
