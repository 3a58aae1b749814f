//! In-process stand-in for the USB/I2C adapter and the NIM behind it.
//!
//! The simulated board answers like a fitted NIM: the demodulator reports
//! its chip id, tuner and LNAs only respond while the repeater is open,
//! the tuner PLL locks after VCO calibration and a blind search reports
//! the lock state of the configured [`SignalProfile`]. Faults are injected
//! per device, per register or on the LNB supply through [`SimHandle`].

use crate::bus::{BusAdapter, BusFault, RegisterAddress};
use crate::chips::demod::{
    self, DMDISTATE_BLIND_SEARCH, DMDISTATE_RESET, DMDSTATE_HEADER_SHIFT, DMDSTATE_SEARCHING,
    HEADER_MODE_DVBS, HEADER_MODE_DVBS2, MASTER_CLOCK_HZ,
};
use crate::chips::lna::{self, LNA_CHIP_ID};
use crate::chips::nim::{
    DEMOD_ADDRESS, DEMOD_CHIP_ID, I2CRPT_OPEN, LNA_BOTTOM_ADDRESS, LNA_TOP_ADDRESS, REG_I2CRPT,
    REG_MID, TUNER_ADDRESS,
};
use crate::chips::tuner::{REG_STAT1, STAT1_CALVCO_START, STAT1_LOCK};
use crate::chips::{LockState, NimInput};
use core::num::NonZeroU8;
use core::time::Duration;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);
const RNG_SEED: u64 = 0x5EED_1234_ABCD_0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimFault {
    Nack,
    Timeout,
    Adapter(NonZeroU8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultTarget {
    /// Every register operation addressed to the device.
    Device(u8),
    Register(RegisterAddress),
    PolarizationSupply,
    /// Every operation on the adapter.
    Everything,
}

/// One injected fault. Persistent unless limited with [`FaultRule::times`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRule {
    pub target: FaultTarget,
    pub fault: SimFault,
    /// Remaining hits before the rule expires; `None` never expires.
    pub remaining: Option<u32>,
}

impl FaultRule {
    pub fn new(target: FaultTarget, fault: SimFault) -> Self {
        Self {
            target,
            fault,
            remaining: None,
        }
    }

    pub fn nack(device: u8) -> Self {
        Self::new(FaultTarget::Device(device), SimFault::Nack)
    }

    pub fn timeout(device: u8) -> Self {
        Self::new(FaultTarget::Device(device), SimFault::Timeout)
    }

    pub fn adapter(device: u8, code: NonZeroU8) -> Self {
        Self::new(FaultTarget::Device(device), SimFault::Adapter(code))
    }

    pub fn on_register(address: RegisterAddress, fault: SimFault) -> Self {
        Self::new(FaultTarget::Register(address), fault)
    }

    pub fn on_polarization(fault: SimFault) -> Self {
        Self::new(FaultTarget::PolarizationSupply, fault)
    }

    pub fn everything(fault: SimFault) -> Self {
        Self::new(FaultTarget::Everything, fault)
    }

    pub fn times(mut self, hits: u32) -> Self {
        self.remaining = Some(hits);
        self
    }

    fn matches(&self, operation: Operation) -> bool {
        match (self.target, operation) {
            (FaultTarget::Everything, _) => true,
            (FaultTarget::Device(device), Operation::Register(address)) => address.device == device,
            (FaultTarget::Register(target), Operation::Register(address)) => target == address,
            (FaultTarget::PolarizationSupply, Operation::Polarization) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Register(RegisterAddress),
    Polarization,
}

/// What the demodulator reports once a blind search has run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalProfile {
    pub lock_state: LockState,
    pub power_i: u8,
    pub power_q: u8,
    pub puncture_rate: u8,
    pub carrier_offset_hz: i32,
    pub symbol_rate: u32,
    pub viterbi_errors: u32,
    pub ber: u32,
    pub bch_uncorrected: bool,
    pub bch_errors: u16,
    pub ldpc_errors: u16,
    pub agc1: u16,
    pub agc2: u16,
    /// Tenths of a dB.
    pub mer: u16,
    pub modcod: u8,
    pub short_frame: bool,
    pub pilots: bool,
    pub lna_gain: u8,
    pub lna_vgo: u8,
    /// Whether the tuner PLL locks after VCO calibration.
    pub pll_locks: bool,
}

impl Default for SignalProfile {
    fn default() -> Self {
        Self {
            lock_state: LockState::LockedS2,
            power_i: 0x48,
            power_q: 0x46,
            puncture_rate: 0x0D,
            carrier_offset_hz: -12_500,
            symbol_rate: 1_500_000,
            viterbi_errors: 0,
            ber: 42,
            bch_uncorrected: false,
            bch_errors: 3,
            ldpc_errors: 17,
            agc1: 30_100,
            agc2: 400,
            mer: 92,
            modcod: 6,
            short_frame: false,
            pilots: true,
            lna_gain: 0x0C,
            lna_vgo: 0x05,
            pll_locks: true,
        }
    }
}

impl SignalProfile {
    /// A transponder that never locks: the demodulator keeps searching.
    pub fn no_signal() -> Self {
        Self {
            lock_state: LockState::Searching,
            power_i: 0x04,
            power_q: 0x05,
            carrier_offset_hz: 0,
            symbol_rate: 0,
            ber: 0,
            bch_errors: 0,
            ldpc_errors: 0,
            agc1: 37_700,
            mer: 0,
            modcod: 0,
            pilots: false,
            ..Self::default()
        }
    }

    fn dmdstate(&self) -> u8 {
        match self.lock_state {
            LockState::Unlocked => 0,
            LockState::Searching => DMDSTATE_SEARCHING,
            LockState::LockedS => HEADER_MODE_DVBS << DMDSTATE_HEADER_SHIFT,
            LockState::LockedS2 => HEADER_MODE_DVBS2 << DMDSTATE_HEADER_SHIFT,
        }
    }

    fn dmdmodcod(&self) -> u8 {
        ((self.modcod & 0x1F) << 2) | (u8::from(self.short_frame) << 1) | u8::from(self.pilots)
    }

    fn demod_registers(&self) -> Vec<(u16, u8)> {
        let sfr = ((u64::from(self.symbol_rate) << 32) / MASTER_CLOCK_HZ) as u32;
        let cfr = ((i64::from(self.carrier_offset_hz) << 24) / MASTER_CLOCK_HZ as i64) as u32 & 0x00FF_FFFF;
        let [_, cfr2, cfr1, cfr0] = cfr.to_be_bytes();
        let [sfr3, sfr2, sfr1, sfr0] = sfr.to_be_bytes();
        let [_, vit2, vit1, vit0] = self.viterbi_errors.to_be_bytes();
        let [_, ber2, ber1, ber0] = self.ber.to_be_bytes();
        let [bch1, bch0] = self.bch_errors.to_be_bytes();
        let [ldpc1, ldpc0] = self.ldpc_errors.to_be_bytes();
        let [agc1_hi, agc1_lo] = self.agc1.to_be_bytes();
        let [agc2_hi, agc2_lo] = self.agc2.to_be_bytes();
        let [mer1, mer0] = self.mer.to_be_bytes();

        vec![
            (demod::REG_POWERI, self.power_i),
            (demod::REG_POWERQ, self.power_q),
            (demod::REG_VITCURPUN, self.puncture_rate),
            (demod::REG_CFR2, cfr2),
            (demod::REG_CFR1, cfr1),
            (demod::REG_CFR0, cfr0),
            (demod::REG_SFR3, sfr3),
            (demod::REG_SFR2, sfr2),
            (demod::REG_SFR1, sfr1),
            (demod::REG_SFR0, sfr0),
            (demod::REG_ERRCNT12, vit2),
            (demod::REG_ERRCNT11, vit1),
            (demod::REG_ERRCNT10, vit0),
            (demod::REG_ERRCNT22, ber2),
            (demod::REG_ERRCNT21, ber1),
            (demod::REG_ERRCNT20, ber0),
            (demod::REG_BCHERR, u8::from(self.bch_uncorrected)),
            (demod::REG_BCHCNT1, bch1),
            (demod::REG_BCHCNT0, bch0),
            (demod::REG_LDPCCNT1, ldpc1),
            (demod::REG_LDPCCNT0, ldpc0),
            (demod::REG_AGCIQIN1, agc1_hi),
            (demod::REG_AGCIQIN0, agc1_lo),
            (demod::REG_AGC2I1, agc2_hi),
            (demod::REG_AGC2I0, agc2_lo),
            (demod::REG_MER1, mer1),
            (demod::REG_MER0, mer0),
            (demod::REG_DMDMODCOD, self.dmdmodcod()),
        ]
    }
}

/// Operation counters, including operations that faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BusStats {
    pub reads: u64,
    pub writes: u64,
    pub polarization_calls: u64,
    pub faults_injected: u64,
}

impl BusStats {
    pub fn total_operations(&self) -> u64 {
        self.reads + self.writes + self.polarization_calls
    }
}

#[derive(Debug)]
struct SimState {
    registers: HashMap<RegisterAddress, u8>,
    profile: SignalProfile,
    lna_top_fitted: bool,
    lna_bottom_fitted: bool,
    scanning: bool,
    rules: Vec<FaultRule>,
    stats: BusStats,
    polarization: Option<(bool, bool)>,
    timeout: Duration,
    rng_state: u64,
}

impl SimState {
    fn new(profile: SignalProfile) -> Self {
        let mut state = Self {
            registers: HashMap::new(),
            profile,
            lna_top_fitted: true,
            lna_bottom_fitted: true,
            scanning: false,
            rules: Vec::new(),
            stats: BusStats::default(),
            polarization: None,
            timeout: DEFAULT_TIMEOUT,
            rng_state: RNG_SEED,
        };
        state.load_profile();
        state
    }

    fn load_profile(&mut self) {
        self.registers
            .insert(RegisterAddress::new(DEMOD_ADDRESS, REG_MID), DEMOD_CHIP_ID);
        for (register, value) in self.profile.demod_registers() {
            self.registers
                .insert(RegisterAddress::new(DEMOD_ADDRESS, register), value);
        }
        for device in [LNA_TOP_ADDRESS, LNA_BOTTOM_ADDRESS] {
            self.registers
                .insert(RegisterAddress::new(device, u16::from(lna::REG0)), LNA_CHIP_ID << 4);
            self.registers
                .insert(RegisterAddress::new(device, u16::from(lna::REG2)), self.profile.lna_gain);
            self.registers
                .insert(RegisterAddress::new(device, u16::from(lna::REG3)), self.profile.lna_vgo);
        }
    }

    fn check_faults(&mut self, operation: Operation) -> Result<(), BusFault> {
        let Some(index) = self.rules.iter().position(|rule| rule.matches(operation)) else {
            return Ok(());
        };

        let rule = &mut self.rules[index];
        let fault = rule.fault;
        let expired = match rule.remaining.as_mut() {
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
            None => false,
        };
        if expired {
            self.rules.remove(index);
        }
        self.stats.faults_injected += 1;

        let device = match operation {
            Operation::Register(address) => address.device,
            Operation::Polarization => DEMOD_ADDRESS,
        };
        trace!(?operation, ?fault, "injecting bus fault");
        Err(match fault {
            SimFault::Nack => BusFault::NoAcknowledge { device },
            SimFault::Timeout => BusFault::Timeout(self.timeout),
            SimFault::Adapter(code) => BusFault::Adapter(code),
        })
    }

    fn repeater_open(&self) -> bool {
        self.registers
            .get(&RegisterAddress::new(DEMOD_ADDRESS, REG_I2CRPT))
            .is_some_and(|value| value & 0x80 == I2CRPT_OPEN & 0x80)
    }

    // Whether a device acknowledges its address right now.
    fn responds(&self, device: u8) -> bool {
        match device {
            DEMOD_ADDRESS => true,
            TUNER_ADDRESS => self.repeater_open(),
            LNA_TOP_ADDRESS => self.repeater_open() && self.lna_top_fitted,
            LNA_BOTTOM_ADDRESS => self.repeater_open() && self.lna_bottom_fitted,
            _ => false,
        }
    }

    fn next_random(&mut self) -> u64 {
        self.rng_state = self.rng_state.wrapping_mul(1664525).wrapping_add(1013904223);
        self.rng_state
    }

    // Scatter around one of the four QPSK points.
    fn constellation_point(&mut self) -> u8 {
        let random = self.next_random();
        let sign: i8 = if random & 0x100 == 0 { 1 } else { -1 };
        let noise = ((random >> 16) % 17) as i8 - 8;
        (sign * 40 + noise) as u8
    }

    fn read(&mut self, address: RegisterAddress) -> Result<u8, BusFault> {
        self.stats.reads += 1;
        self.check_faults(Operation::Register(address))?;
        if !self.responds(address.device) {
            return Err(BusFault::NoAcknowledge { device: address.device });
        }

        if address.device == DEMOD_ADDRESS {
            match address.register {
                demod::REG_DMDSTATE => {
                    return Ok(if self.scanning { self.profile.dmdstate() } else { 0 });
                }
                demod::REG_ISYMB | demod::REG_QSYMB => return Ok(self.constellation_point()),
                _ => {}
            }
        }

        Ok(self.registers.get(&address).copied().unwrap_or(0))
    }

    fn write(&mut self, address: RegisterAddress, value: u8) -> Result<(), BusFault> {
        self.stats.writes += 1;
        self.check_faults(Operation::Register(address))?;
        if !self.responds(address.device) {
            return Err(BusFault::NoAcknowledge { device: address.device });
        }

        match (address.device, address.register) {
            (DEMOD_ADDRESS, demod::REG_DMDISTATE) => match value {
                DMDISTATE_RESET => self.scanning = false,
                DMDISTATE_BLIND_SEARCH => self.scanning = true,
                _ => {}
            },
            (TUNER_ADDRESS, register) if register == u16::from(REG_STAT1) => {
                let locked = value & STAT1_CALVCO_START != 0 && self.profile.pll_locks;
                self.registers
                    .insert(address, if locked { STAT1_LOCK } else { 0 });
                return Ok(());
            }
            _ => {}
        }

        self.registers.insert(address, value);
        Ok(())
    }

    fn set_polarization_supply(&mut self, enable: bool, horizontal: bool) -> Result<(), BusFault> {
        self.stats.polarization_calls += 1;
        self.check_faults(Operation::Polarization)?;
        self.polarization = Some((enable, horizontal));
        Ok(())
    }
}

/// The adapter end, owned by the frontend.
#[derive(Debug)]
pub struct SimulatedBus {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedBus {
    pub fn new() -> (Self, SimHandle) {
        Self::with_profile(SignalProfile::default())
    }

    pub fn with_profile(profile: SignalProfile) -> (Self, SimHandle) {
        let state = Arc::new(Mutex::new(SimState::new(profile)));
        let handle = SimHandle {
            state: Arc::clone(&state),
        };
        (Self { state }, handle)
    }
}

impl BusAdapter for SimulatedBus {
    fn read_register(&mut self, address: RegisterAddress) -> Result<u8, BusFault> {
        self.state.lock().read(address)
    }

    fn write_register(&mut self, address: RegisterAddress, value: u8) -> Result<(), BusFault> {
        self.state.lock().write(address, value)
    }

    fn set_polarization_supply(&mut self, enable: bool, horizontal: bool) -> Result<(), BusFault> {
        self.state.lock().set_polarization_supply(enable, horizontal)
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.state.lock().timeout = timeout;
    }
}

/// Test-side control of a [`SimulatedBus`]. Cloneable; usable from any thread.
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    pub fn inject(&self, rule: FaultRule) {
        self.state.lock().rules.push(rule);
    }

    pub fn clear_faults(&self) {
        self.state.lock().rules.clear();
    }

    pub fn active_faults(&self) -> usize {
        self.state.lock().rules.len()
    }

    pub fn stats(&self) -> BusStats {
        self.state.lock().stats
    }

    pub fn total_operations(&self) -> u64 {
        self.stats().total_operations()
    }

    /// Last `(enable, horizontal)` pair accepted by the LNB supply.
    pub fn polarization(&self) -> Option<(bool, bool)> {
        self.state.lock().polarization
    }

    /// Takes effect on registers immediately; a changed lock state shows
    /// once a scan is running.
    pub fn set_profile(&self, profile: SignalProfile) {
        let mut state = self.state.lock();
        state.profile = profile;
        state.load_profile();
    }

    pub fn set_lna_fitted(&self, input: NimInput, fitted: bool) {
        let mut state = self.state.lock();
        match input {
            NimInput::Top => state.lna_top_fitted = fitted,
            NimInput::Bottom => state.lna_bottom_fitted = fitted,
        }
    }

    /// Current register content, bypassing faults and the repeater.
    pub fn register(&self, address: RegisterAddress) -> Option<u8> {
        self.state.lock().registers.get(&address).copied()
    }

    pub fn timeout(&self) -> Duration {
        self.state.lock().timeout
    }

    pub fn is_scanning(&self) -> bool {
        self.state.lock().scanning
    }
}
