use nimbus::apply::{apply_configuration, ApplyStep};
use nimbus::bus::{BusFault, RegisterAddress, TIMEOUT_FAULT_CODE};
use nimbus::chips::demod::{self, REG_SFRINIT0, REG_SFRINIT1};
use nimbus::chips::nim::{DEMOD_ADDRESS, TUNER_ADDRESS};
use nimbus::chips::tuner::{REG_RFSEL, RFSEL_INPUT_B};
use nimbus::chips::{DriverError, LnaPower, LockState, NimInput, PolarizationSupply, RfInput};
use nimbus::sim::{FaultRule, SignalProfile, SimFault};
use nimbus::telemetry::{collect_snapshot, StatusSnapshot};
use nimbus::worker::FAULT_LIMIT;
use nimbus::{
    ConfigurationRequest, Frontend, NimFrontend, PowerLevelLookup, SimulatedBus, WorkerBuilder,
    WorkerConfig, WorkerExit,
};
use std::thread;
use std::time::Duration;

fn request() -> ConfigurationRequest {
    ConfigurationRequest::new(1_296_000_000, 1_500_000)
}

fn collect<F: Frontend>(frontend: &mut F) -> (Result<(), DriverError>, StatusSnapshot) {
    let lookup = PowerLevelLookup::builtin().unwrap();
    let mut snapshot = StatusSnapshot::default();
    let result = collect_snapshot(frontend, &lookup, &mut snapshot);
    (result, snapshot)
}

#[test]
fn test_apply_programs_the_board() {
    let (bus, sim) = SimulatedBus::new();
    let mut frontend = NimFrontend::new(bus);
    let request = request().with_input_b(true).with_polarization(PolarizationSupply::Vertical);

    apply_configuration(&mut frontend, &request).unwrap();

    let sfrinit = demod::symbol_rate_to_sfrinit(1_500_000).to_be_bytes();
    assert_eq!(sim.register(RegisterAddress::new(DEMOD_ADDRESS, REG_SFRINIT1)), Some(sfrinit[0]));
    assert_eq!(sim.register(RegisterAddress::new(DEMOD_ADDRESS, REG_SFRINIT0)), Some(sfrinit[1]));
    assert_eq!(
        sim.register(RegisterAddress::new(TUNER_ADDRESS, u16::from(REG_RFSEL))),
        Some(RFSEL_INPUT_B)
    );
    assert!(sim.is_scanning());
    assert_eq!(sim.polarization(), Some((true, false)));

    let dividers = frontend.tuner().dividers().unwrap();
    assert_eq!(dividers.p, 4);
    assert_eq!(frontend.demodulator().symbol_rate(), 1_500_000);
}

#[test]
fn test_telemetry_from_simulated_signal() {
    let (bus, _sim) = SimulatedBus::new();
    let mut frontend = NimFrontend::new(bus);
    apply_configuration(&mut frontend, &request()).unwrap();

    let (result, snapshot) = collect(&mut frontend);
    result.unwrap();

    let profile = SignalProfile::default();
    assert_eq!(snapshot.lock_state, LockState::LockedS2);
    assert_eq!(snapshot.lna_gain, (u16::from(profile.lna_gain) << 5) | u16::from(profile.lna_vgo));
    assert_eq!((snapshot.power_i, snapshot.power_q), (profile.power_i, profile.power_q));
    assert!(snapshot.constellation.iter().any(|s| s.i != 0));
    assert!(profile.symbol_rate.abs_diff(snapshot.symbol_rate) <= 1);
    assert!((snapshot.carrier_offset_hz - profile.carrier_offset_hz).abs() <= 10);
    assert_eq!(snapshot.ber, profile.ber);
    assert_eq!(snapshot.bch_error_count, u32::from(profile.bch_errors));
    assert_eq!(snapshot.ldpc_error_count, u32::from(profile.ldpc_errors));
    assert_eq!(snapshot.agc1_gain, profile.agc1);
    assert_eq!(snapshot.input_power_dbm, -45);
    assert_eq!(snapshot.mer, u32::from(profile.mer));
    assert_eq!(snapshot.modcod, profile.modcod);
    assert!(snapshot.pilots);
    assert!(!snapshot.short_frame);
}

#[test]
fn test_unlocked_before_scan() {
    let (bus, _sim) = SimulatedBus::new();
    let mut frontend = NimFrontend::new(bus);
    let (result, snapshot) = collect(&mut frontend);
    result.unwrap();
    assert_eq!(snapshot.lock_state, LockState::Unlocked);
    assert_eq!(snapshot.mer, 0);
}

#[test]
fn test_missing_lnas_are_not_faults() {
    let (bus, sim) = SimulatedBus::new();
    sim.set_lna_fitted(NimInput::Top, false);
    sim.set_lna_fitted(NimInput::Bottom, false);
    let mut frontend = NimFrontend::new(bus);

    let report = apply_configuration(&mut frontend, &request()).unwrap();
    assert!(!report.lna_top_present);
    assert!(!report.lna_bottom_present);

    let (result, snapshot) = collect(&mut frontend);
    result.unwrap();
    assert_eq!(snapshot.lna_gain, 0);
}

#[test]
fn test_demod_nack_during_lna_detection_is_a_fault() {
    let (bus, sim) = SimulatedBus::new();
    let mut frontend = NimFrontend::new(bus);
    frontend.reset().unwrap();
    frontend.init_demodulator(1_500_000).unwrap();
    frontend.init_tuner(1_296_000_000, RfInput::A).unwrap();

    // The repeater open is the first transfer of the detection read
    sim.inject(FaultRule::nack(DEMOD_ADDRESS).times(1));
    assert_eq!(
        frontend.init_lna(NimInput::Top, LnaPower::On),
        Err(DriverError::Bus(BusFault::NoAcknowledge { device: DEMOD_ADDRESS }))
    );
    assert_eq!(sim.stats().faults_injected, 1);

    assert_eq!(frontend.init_lna(NimInput::Top, LnaPower::On), Ok(true));
}

#[test]
fn test_failed_apply_forgets_lna_presence() {
    let (bus, sim) = SimulatedBus::new();
    let mut frontend = NimFrontend::new(bus);
    apply_configuration(&mut frontend, &request()).unwrap();
    let (result, snapshot) = collect(&mut frontend);
    result.unwrap();
    assert_ne!(snapshot.lna_gain, 0);

    sim.inject(FaultRule::nack(TUNER_ADDRESS).times(1));
    let error = apply_configuration(&mut frontend, &request()).unwrap_err();
    assert_eq!(error.step, ApplyStep::InitTuner);

    let (_, snapshot) = collect(&mut frontend);
    assert_eq!(snapshot.lna_gain, 0);
}

#[test]
fn test_tuner_pll_that_never_locks() {
    let (bus, _sim) = SimulatedBus::with_profile(SignalProfile {
        pll_locks: false,
        ..SignalProfile::default()
    });
    let mut frontend = NimFrontend::new(bus);

    let error = apply_configuration(&mut frontend, &request()).unwrap_err();
    assert_eq!(error.step, ApplyStep::InitTuner);
    assert!(matches!(error.source, DriverError::PllUnlocked { .. }));
}

#[test]
fn test_out_of_range_request_fails_before_bus_traffic() {
    let (bus, sim) = SimulatedBus::new();
    let mut frontend = NimFrontend::new(bus);

    let error = apply_configuration(&mut frontend, &ConfigurationRequest::new(3_000_000_000, 1_500_000))
        .unwrap_err();
    assert_eq!(error.step, ApplyStep::InitTuner);
    assert_eq!(error.source, DriverError::FrequencyOutOfRange(3_000_000_000));

    let writes = sim.stats().writes;
    let error = apply_configuration(&mut frontend, &ConfigurationRequest::new(1_200_000_000, 10))
        .unwrap_err();
    assert_eq!(error.step, ApplyStep::InitDemodulator);
    // Only the reset step touched the bus
    assert_eq!(sim.stats().writes, writes + 1);
}

#[test]
fn test_polarization_fault_leaves_board_scanning() {
    let (bus, sim) = SimulatedBus::new();
    sim.inject(FaultRule::on_polarization(SimFault::Timeout));
    let mut frontend = NimFrontend::new(bus);
    frontend.set_bus_timeout(Duration::from_millis(30));

    let report = apply_configuration(&mut frontend, &request()).unwrap();
    let fault = report.polarization.unwrap_err();
    assert_eq!(fault, DriverError::Bus(BusFault::Timeout(Duration::from_millis(30))));
    assert_eq!(fault.code(), TIMEOUT_FAULT_CODE);
    assert!(sim.is_scanning());

    let (result, snapshot) = collect(&mut frontend);
    result.unwrap();
    assert_eq!(snapshot.lock_state, LockState::LockedS2);
}

#[test]
fn test_lock_read_timeout_leaves_defaults() {
    let (bus, sim) = SimulatedBus::new();
    let mut frontend = NimFrontend::new(bus);
    apply_configuration(&mut frontend, &request()).unwrap();

    sim.inject(FaultRule::on_register(
        RegisterAddress::new(DEMOD_ADDRESS, demod::REG_DMDSTATE),
        SimFault::Timeout,
    ));
    let reads = sim.stats().reads;
    let (result, snapshot) = collect(&mut frontend);

    assert!(matches!(result, Err(DriverError::Bus(BusFault::Timeout(_)))));
    assert_eq!(snapshot, StatusSnapshot::default());
    assert_eq!(sim.stats().reads, reads + 1);
}

#[test]
fn test_worker_stops_bus_traffic_after_fault_limit() {
    let (bus, sim) = SimulatedBus::new();
    sim.inject(FaultRule::nack(DEMOD_ADDRESS));
    let config = WorkerConfig {
        poll_interval_ms: 5,
        first_config_wait_ms: 10,
        settle_delay_ms: 0,
        ..WorkerConfig::default()
    };
    let worker = WorkerBuilder::new(NimFrontend::new(bus), PowerLevelLookup::builtin().unwrap())
        .config(config)
        .spawn()
        .unwrap();

    for _ in 0..FAULT_LIMIT {
        worker.enqueue(request()).unwrap();
    }
    let exit = worker.join().unwrap();
    assert!(matches!(exit, WorkerExit::FaultLimit { last_fault } if last_fault.step == ApplyStep::ResetNim));

    // Each failed reset is a single write to the repeater register
    assert_eq!(sim.stats().writes, u64::from(FAULT_LIMIT));
    let operations = sim.total_operations();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(sim.total_operations(), operations);
}

#[test]
fn test_worker_recovers_after_transient_fault() {
    let (bus, sim) = SimulatedBus::new();
    sim.inject(FaultRule::timeout(TUNER_ADDRESS).times(1));
    let config = WorkerConfig {
        poll_interval_ms: 5,
        first_config_wait_ms: 10,
        settle_delay_ms: 0,
        ..WorkerConfig::default()
    };
    let worker = WorkerBuilder::new(NimFrontend::new(bus), PowerLevelLookup::builtin().unwrap())
        .config(config)
        .spawn()
        .unwrap();
    let mut telemetry = worker.subscribe();

    worker.enqueue(request()).unwrap();
    worker.enqueue(request()).unwrap();
    let snapshot = telemetry.blocking_recv().unwrap();
    assert!(snapshot.reconfigured);
    assert_eq!(snapshot.lock_state, LockState::LockedS2);
    assert_eq!(sim.stats().faults_injected, 1);

    assert_eq!(worker.shutdown().unwrap(), WorkerExit::Stopped);
}
