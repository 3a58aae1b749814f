use crate::calibration::PowerLevelLookup;
use crate::chips::{ConstellationSample, DriverError, LockState, NimInput};
use crate::frontend::Frontend;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

pub const CONSTELLATION_SAMPLES: usize = 16;

const_assert_eq!(CONSTELLATION_SAMPLES, 16);

/// Receiver state sampled in one poll cycle.
///
/// Fields after `lock_state` stay at their zero/false defaults when the
/// register read feeding them, or any read before it, failed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Set on the first snapshot after a successful apply sequence.
    pub reconfigured: bool,
    pub lock_state: LockState,
    pub lna_top_present: bool,
    pub lna_bottom_present: bool,
    pub lna_gain: u16,
    pub power_i: u8,
    pub power_q: u8,
    /// Read every cycle; only meaningful while locked.
    pub constellation: [ConstellationSample; CONSTELLATION_SAMPLES],
    pub puncture_rate: u8,
    pub carrier_offset_hz: i32,
    pub symbol_rate: u32,
    pub viterbi_error_rate: u32,
    pub ber: u32,
    pub bch_uncorrected: bool,
    pub bch_error_count: u32,
    pub ldpc_error_count: u32,
    pub agc1_gain: u16,
    pub agc2_gain: u16,
    pub input_power_dbm: i16,
    /// Tenths of a dB; zero unless locked.
    pub mer: u32,
    pub modcod: u8,
    /// DVB-S2 only.
    pub short_frame: bool,
    /// DVB-S2 only.
    pub pilots: bool,
}

impl StatusSnapshot {
    pub fn is_locked(&self) -> bool {
        self.lock_state.is_locked()
    }
}

/// Input whose LNA gain is reported. Boards without a top LNA report 0.
pub const GAIN_INPUT: NimInput = NimInput::Top;

/// Read every telemetry register into `snapshot`, in order, stopping at the
/// first failed read. Returns that read's error.
pub fn collect_snapshot<F: Frontend + ?Sized>(
    frontend: &mut F,
    lookup: &PowerLevelLookup,
    snapshot: &mut StatusSnapshot,
) -> Result<(), DriverError> {
    snapshot.lock_state = frontend.read_lock_state()?;
    snapshot.lna_gain = frontend.read_lna_gain(GAIN_INPUT)?;

    let (power_i, power_q) = frontend.read_power()?;
    snapshot.power_i = power_i;
    snapshot.power_q = power_q;

    for sample in &mut snapshot.constellation {
        *sample = frontend.read_constellation()?;
    }

    snapshot.puncture_rate = frontend.read_puncture_rate()?;
    snapshot.carrier_offset_hz = frontend.read_carrier_offset()?;
    snapshot.symbol_rate = frontend.read_symbol_rate()?;
    snapshot.viterbi_error_rate = frontend.read_viterbi_error_rate()?;
    snapshot.ber = frontend.read_ber()?;
    snapshot.bch_uncorrected = frontend.read_bch_uncorrected()?;
    snapshot.bch_error_count = frontend.read_bch_error_count()?;
    snapshot.ldpc_error_count = frontend.read_ldpc_error_count()?;
    snapshot.agc1_gain = frontend.read_agc1_gain()?;
    snapshot.agc2_gain = frontend.read_agc2_gain()?;
    snapshot.input_power_dbm = lookup.input_power_dbm(snapshot.agc1_gain, snapshot.agc2_gain);

    if snapshot.lock_state.is_locked() {
        snapshot.mer = frontend.read_mer()?;
    }

    let modcod = frontend.read_modcod()?;
    snapshot.modcod = modcod.modcod;
    if snapshot.lock_state == LockState::LockedS2 {
        snapshot.short_frame = modcod.short_frame;
        snapshot.pilots = modcod.pilots;
    }

    Ok(())
}

pub type StatusCallback = Box<dyn FnMut(&StatusSnapshot) + Send>;

/// Fans snapshots out to broadcast subscribers and the direct callback,
/// both on the calling thread.
pub struct TelemetryPublisher {
    subscribers: broadcast::Sender<Arc<StatusSnapshot>>,
    callback: Option<StatusCallback>,
    published: u64,
}

impl TelemetryPublisher {
    pub fn new(capacity: usize) -> Self {
        let (subscribers, _) = broadcast::channel(capacity.max(1));
        Self {
            subscribers,
            callback: None,
            published: 0,
        }
    }

    /// Dropping the receiver unsubscribes. A subscriber that falls more than
    /// the channel capacity behind skips the oldest snapshots.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StatusSnapshot>> {
        self.subscribers.subscribe()
    }

    /// Sender side, for handing out subscriptions from other threads.
    pub fn subscription_source(&self) -> broadcast::Sender<Arc<StatusSnapshot>> {
        self.subscribers.clone()
    }

    pub fn set_callback<C>(&mut self, callback: C)
    where
        C: FnMut(&StatusSnapshot) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    pub fn clear_callback(&mut self) {
        self.callback = None;
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.receiver_count()
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn publish(&mut self, snapshot: StatusSnapshot) {
        if let Some(callback) = self.callback.as_mut() {
            callback(&snapshot);
        }

        // No subscribers is the common case for headless use
        if self.subscribers.send(Arc::new(snapshot)).is_err() {
            trace!("snapshot published with no subscribers");
        }
        self.published = self.published.wrapping_add(1);
    }
}

impl fmt::Debug for TelemetryPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryPublisher")
            .field("subscribers", &self.subscribers.receiver_count())
            .field("callback", &self.callback.is_some())
            .field("published", &self.published)
            .finish()
    }
}
