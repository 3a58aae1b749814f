//! AGC code to input power level calibration.
//!
//! The demodulator's AGC1 loop tracks the RF input level across most of the
//! useful range. On very strong signals AGC1 backs off completely and reads
//! zero; from there on only AGC2 still moves, so it carries the reading.
//! Tables follow the MiniTiouner power level indication curves.

use heapless::Vec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use thiserror::Error;

pub const MAX_CALIBRATION_POINTS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub threshold: u16,
    pub power_dbm: i16,
}

const fn point(threshold: u16, power_dbm: i16) -> CalibrationPoint {
    CalibrationPoint { threshold, power_dbm }
}

pub const AGC1_POINTS: &[CalibrationPoint] = &[
    point(10, -38), point(21_800, -39), point(25_100, -40), point(27_100, -41),
    point(28_100, -42), point(28_900, -43), point(29_600, -44), point(30_100, -45),
    point(30_550, -46), point(31_000, -47), point(31_350, -48), point(31_700, -49),
    point(32_050, -50), point(32_400, -51), point(32_700, -52), point(33_000, -53),
    point(33_300, -54), point(33_600, -55), point(33_900, -56), point(34_200, -57),
    point(34_500, -58), point(34_750, -59), point(35_000, -60), point(35_250, -61),
    point(35_500, -62), point(35_750, -63), point(36_000, -64), point(36_200, -65),
    point(36_400, -66), point(36_600, -67), point(36_800, -68), point(37_000, -69),
    point(37_200, -70), point(37_400, -71), point(37_600, -72), point(37_700, -73),
];

pub const AGC2_POINTS: &[CalibrationPoint] = &[
    point(182, -12), point(200, -14), point(225, -16), point(255, -18),
    point(290, -20), point(330, -22), point(375, -24), point(425, -26),
    point(480, -28), point(540, -30), point(605, -32), point(675, -34),
    point(750, -36), point(830, -37),
];

const fn strictly_ascending(points: &[CalibrationPoint]) -> bool {
    let mut i = 1;
    while i < points.len() {
        if points[i].threshold <= points[i - 1].threshold {
            return false;
        }
        i += 1;
    }
    true
}

const_assert!(!AGC1_POINTS.is_empty() && AGC1_POINTS.len() <= MAX_CALIBRATION_POINTS);
const_assert!(!AGC2_POINTS.is_empty() && AGC2_POINTS.len() <= MAX_CALIBRATION_POINTS);
const_assert!(strictly_ascending(AGC1_POINTS));
const_assert!(strictly_ascending(AGC2_POINTS));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CalibrationError {
    #[error("calibration table is empty")]
    Empty,
    #[error("calibration table holds more than {MAX_CALIBRATION_POINTS} points")]
    TooLarge,
    #[error("threshold at index {index} is not above its predecessor")]
    NotAscending { index: usize },
}

/// Ascending `(threshold, power)` pairs for one AGC source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationTable {
    points: Vec<CalibrationPoint, MAX_CALIBRATION_POINTS>,
}

impl CalibrationTable {
    pub fn new(points: &[CalibrationPoint]) -> Result<Self, CalibrationError> {
        if points.is_empty() {
            return Err(CalibrationError::Empty);
        }
        if let Some(index) = points
            .windows(2)
            .position(|pair| pair[1].threshold <= pair[0].threshold)
        {
            return Err(CalibrationError::NotAscending { index: index + 1 });
        }

        let points = Vec::from_slice(points).map_err(|()| CalibrationError::TooLarge)?;
        Ok(Self { points })
    }

    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    /// Exact match, else the next higher bucket, clamped to the last entry.
    pub fn bucket_index(&self, code: u16) -> usize {
        match self.points.binary_search_by_key(&code, |p| p.threshold) {
            Ok(index) => index,
            Err(insert_at) => insert_at.min(self.points.len() - 1),
        }
    }

    pub fn power_dbm(&self, code: u16) -> i16 {
        self.points[self.bucket_index(code)].power_dbm
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerLevelLookup {
    agc1: CalibrationTable,
    agc2: CalibrationTable,
}

impl PowerLevelLookup {
    pub fn new(agc1: CalibrationTable, agc2: CalibrationTable) -> Self {
        Self { agc1, agc2 }
    }

    /// Lookup built from the shipped MiniTiouner tables.
    pub fn builtin() -> Result<Self, CalibrationError> {
        Ok(Self::new(
            CalibrationTable::new(AGC1_POINTS)?,
            CalibrationTable::new(AGC2_POINTS)?,
        ))
    }

    pub fn agc1(&self) -> &CalibrationTable {
        &self.agc1
    }

    pub fn agc2(&self) -> &CalibrationTable {
        &self.agc2
    }

    pub fn input_power_dbm(&self, agc1: u16, agc2: u16) -> i16 {
        if agc1 > 0 {
            self.agc1.power_dbm(agc1)
        } else {
            self.agc2.power_dbm(agc2)
        }
    }
}
