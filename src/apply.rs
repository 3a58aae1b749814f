use crate::chips::{DriverError, LnaPower, NimInput};
use crate::config::ConfigurationRequest;
use crate::frontend::Frontend;
use core::fmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ApplyStep {
    ResetNim,
    InitDemodulator,
    InitTuner,
    InitLnaTop,
    InitLnaBottom,
    StartScan,
    PolarizationSupply,
}

impl ApplyStep {
    pub const ALL: [ApplyStep; 7] = [
        ApplyStep::ResetNim,
        ApplyStep::InitDemodulator,
        ApplyStep::InitTuner,
        ApplyStep::InitLnaTop,
        ApplyStep::InitLnaBottom,
        ApplyStep::StartScan,
        ApplyStep::PolarizationSupply,
    ];
}

impl fmt::Display for ApplyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApplyStep::ResetNim => "reset nim",
            ApplyStep::InitDemodulator => "init demodulator",
            ApplyStep::InitTuner => "init tuner",
            ApplyStep::InitLnaTop => "init top lna",
            ApplyStep::InitLnaBottom => "init bottom lna",
            ApplyStep::StartScan => "start demodulator scan",
            ApplyStep::PolarizationSupply => "set lnb supply",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{step} failed: {source}")]
pub struct ApplyError {
    pub step: ApplyStep,
    pub source: DriverError,
}

impl ApplyError {
    fn at(step: ApplyStep) -> impl FnOnce(DriverError) -> ApplyError {
        move |source| ApplyError { step, source }
    }

    pub fn code(&self) -> u8 {
        self.source.code()
    }
}

/// What a successful apply sequence found on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyReport {
    pub lna_top_present: bool,
    pub lna_bottom_present: bool,
    /// Outcome of the LNB supply call. A supply fault does not fail the
    /// sequence: the chipset is configured and scanning regardless.
    pub polarization: Result<(), DriverError>,
}

/// Run the initialisation sequence for one request. The chip steps run
/// strictly in order and the first failure ends the sequence. The LNB supply
/// is set last once they all succeeded; its result goes in the report.
pub fn apply_configuration<F: Frontend + ?Sized>(
    frontend: &mut F,
    request: &ConfigurationRequest,
) -> Result<ApplyReport, ApplyError> {
    debug!(step = %ApplyStep::ResetNim, "apply");
    frontend.reset().map_err(ApplyError::at(ApplyStep::ResetNim))?;

    debug!(step = %ApplyStep::InitDemodulator, symbol_rate = request.symbol_rate, "apply");
    frontend
        .init_demodulator(request.symbol_rate)
        .map_err(ApplyError::at(ApplyStep::InitDemodulator))?;

    debug!(step = %ApplyStep::InitTuner, frequency_hz = request.frequency_hz, "apply");
    frontend
        .init_tuner(request.frequency_hz, request.rf_input())
        .map_err(ApplyError::at(ApplyStep::InitTuner))?;

    debug!(step = %ApplyStep::InitLnaTop, "apply");
    let lna_top_present = frontend
        .init_lna(NimInput::Top, LnaPower::On)
        .map_err(ApplyError::at(ApplyStep::InitLnaTop))?;

    debug!(step = %ApplyStep::InitLnaBottom, "apply");
    let lna_bottom_present = frontend
        .init_lna(NimInput::Bottom, LnaPower::Off)
        .map_err(ApplyError::at(ApplyStep::InitLnaBottom))?;

    debug!(step = %ApplyStep::StartScan, "apply");
    frontend.start_scan().map_err(ApplyError::at(ApplyStep::StartScan))?;

    // Always called: a disabled supply has to be switched off actively.
    let supply = request.polarization();
    debug!(step = %ApplyStep::PolarizationSupply, ?supply, "apply");
    let polarization = frontend.set_polarization_supply(supply);
    if let Err(fault) = &polarization {
        error!(?supply, code = fault.code(), error = %fault, "lnb supply fault");
    }

    Ok(ApplyReport {
        lna_top_present,
        lna_bottom_present,
        polarization,
    })
}
