//! The per-NIM worker: one thread owning the frontend, applying queued
//! configurations and polling telemetry between them.

use crate::apply::{apply_configuration, ApplyError};
use crate::calibration::PowerLevelLookup;
use crate::config::{ConfigError, ConfigurationRequest, WorkerConfig};
use crate::frontend::Frontend;
use crate::queue::{config_queue, ConfigReceiver, ConfigSender, QueueError};
use crate::telemetry::{collect_snapshot, StatusCallback, StatusSnapshot, TelemetryPublisher};
use core::time::Duration;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Consecutive failed apply sequences after which the worker gives up.
pub const FAULT_LIMIT: u32 = 5;

const_assert!(FAULT_LIMIT > 0);

const DEFAULT_THREAD_NAME: &str = "nim-worker";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaultCounter {
    consecutive: u32,
}

impl FaultCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one failed apply sequence and return the new total.
    pub fn record_fault(&mut self) -> u32 {
        self.consecutive = self.consecutive.saturating_add(1);
        self.consecutive
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn count(&self) -> u32 {
        self.consecutive
    }

    pub fn is_exhausted(&self) -> bool {
        self.consecutive >= FAULT_LIMIT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    Stopped,
    FaultLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// Waiting for the first usable configuration.
    Idle,
    Applying,
    Polling,
    Terminated(TerminationReason),
}

impl WorkerState {
    pub fn is_terminated(self) -> bool {
        matches!(self, WorkerState::Terminated(_))
    }
}

/// Why the worker thread returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Stopped,
    FaultLimit { last_fault: ApplyError },
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to build worker runtime: {0}")]
    Runtime(#[source] io::Error),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("worker thread panicked")]
    Panicked,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

enum Wait {
    Request(ConfigurationRequest),
    Elapsed,
    Stop,
    Disconnected,
}

pub struct WorkerBuilder<F> {
    frontend: F,
    lookup: PowerLevelLookup,
    config: WorkerConfig,
    callback: Option<StatusCallback>,
    name: String,
}

impl<F: Frontend + 'static> WorkerBuilder<F> {
    pub fn new(frontend: F, lookup: PowerLevelLookup) -> Self {
        Self {
            frontend,
            lookup,
            config: WorkerConfig::default(),
            callback: None,
            name: DEFAULT_THREAD_NAME.to_string(),
        }
    }

    pub fn config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// The direct callback, run on the worker thread for every snapshot.
    pub fn callback<C>(mut self, callback: C) -> Self
    where
        C: FnMut(&StatusSnapshot) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Thread name, also recorded on the worker's log span.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn spawn(self) -> Result<WorkerHandle, WorkerError> {
        self.config.validate()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(WorkerError::Runtime)?;

        let (sender, queue) = config_queue();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(WorkerState::Idle);

        let mut publisher = TelemetryPublisher::new(self.config.telemetry_channel_capacity);
        if let Some(callback) = self.callback {
            publisher.set_callback(callback);
        }
        let subscriptions = publisher.subscription_source();

        let worker = NimWorker {
            frontend: self.frontend,
            lookup: self.lookup,
            config: self.config,
            queue,
            publisher,
            stop: stop_rx,
            state: state_tx,
            faults: FaultCounter::new(),
            configured: false,
            reconfigured: false,
            lna_top_present: false,
            lna_bottom_present: false,
        };

        let span = info_span!("nim_worker", name = %self.name);
        let thread = thread::Builder::new()
            .name(self.name)
            .spawn(move || runtime.block_on(worker.run().instrument(span)))
            .map_err(WorkerError::Spawn)?;

        Ok(WorkerHandle {
            sender,
            subscriptions,
            state: state_rx,
            stop: stop_tx,
            thread: Some(thread),
        })
    }
}

struct NimWorker<F> {
    frontend: F,
    lookup: PowerLevelLookup,
    config: WorkerConfig,
    queue: ConfigReceiver,
    publisher: TelemetryPublisher,
    stop: watch::Receiver<bool>,
    state: watch::Sender<WorkerState>,
    faults: FaultCounter,
    /// At least one apply sequence has fully succeeded.
    configured: bool,
    /// The next snapshot is the first after a successful apply.
    reconfigured: bool,
    lna_top_present: bool,
    lna_bottom_present: bool,
}

impl<F: Frontend> NimWorker<F> {
    async fn run(mut self) -> WorkerExit {
        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            bus_timeout_ms = self.config.bus_timeout_ms,
            "worker started"
        );
        self.frontend.set_bus_timeout(self.config.bus_timeout());

        let exit = loop {
            if self.stop_requested() {
                break WorkerExit::Stopped;
            }

            // Pending requests always go before telemetry.
            if let Some(request) = self.queue.try_next() {
                if let Err(last_fault) = self.apply(request).await {
                    break WorkerExit::FaultLimit { last_fault };
                }
                continue;
            }

            if !self.configured {
                self.set_state(WorkerState::Idle);
                match self.wait_for_request(self.config.first_config_wait()).await {
                    Wait::Request(request) => {
                        if let Err(last_fault) = self.apply(request).await {
                            break WorkerExit::FaultLimit { last_fault };
                        }
                    }
                    Wait::Elapsed | Wait::Stop => {}
                    Wait::Disconnected => {
                        warn!("all producers gone before any configuration was applied");
                        break WorkerExit::Stopped;
                    }
                }
                continue;
            }

            self.set_state(WorkerState::Polling);
            self.poll_once();
            self.idle_wait(self.config.poll_interval()).await;
        };

        let reason = match exit {
            WorkerExit::Stopped => TerminationReason::Stopped,
            WorkerExit::FaultLimit { .. } => TerminationReason::FaultLimit,
        };
        self.set_state(WorkerState::Terminated(reason));
        info!(?reason, published = self.publisher.published(), "worker terminated");
        exit
    }

    fn stop_requested(&self) -> bool {
        // A dropped handle counts as a stop request.
        *self.stop.borrow() || self.stop.has_changed().is_err()
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    /// Runs one apply sequence. Errors only once the fault limit is reached.
    async fn apply(&mut self, request: ConfigurationRequest) -> Result<(), ApplyError> {
        self.set_state(WorkerState::Applying);

        let settle = self.config.settle_delay();
        if !settle.is_zero() {
            sleep(settle).await;
        }

        match apply_configuration(&mut self.frontend, &request) {
            Ok(report) => {
                self.faults.reset();
                self.configured = true;
                self.reconfigured = true;
                self.lna_top_present = report.lna_top_present;
                self.lna_bottom_present = report.lna_bottom_present;
                info!(
                    frequency_hz = request.frequency_hz,
                    symbol_rate = request.symbol_rate,
                    lna_top = report.lna_top_present,
                    lna_bottom = report.lna_bottom_present,
                    lnb_supply_ok = report.polarization.is_ok(),
                    "configuration applied"
                );
                Ok(())
            }
            Err(fault) => {
                self.lna_top_present = false;
                self.lna_bottom_present = false;
                let consecutive = self.faults.record_fault();
                error!(
                    step = %fault.step,
                    code = fault.code(),
                    consecutive,
                    error = %fault,
                    "apply sequence failed"
                );
                if self.faults.is_exhausted() {
                    error!(limit = FAULT_LIMIT, "too many consecutive hardware faults, worker giving up");
                    return Err(fault);
                }
                Ok(())
            }
        }
    }

    fn poll_once(&mut self) {
        let mut snapshot = StatusSnapshot {
            reconfigured: self.reconfigured,
            lna_top_present: self.lna_top_present,
            lna_bottom_present: self.lna_bottom_present,
            ..StatusSnapshot::default()
        };

        if let Err(fault) = collect_snapshot(&mut self.frontend, &self.lookup, &mut snapshot) {
            debug!(code = fault.code(), error = %fault, "telemetry read failed, rest of cycle skipped");
        }

        self.reconfigured = false;
        self.publisher.publish(snapshot);
    }

    async fn wait_for_request(&mut self, timeout: Duration) -> Wait {
        tokio::select! {
            request = self.queue.next() => match request {
                Some(request) => Wait::Request(request),
                None => Wait::Disconnected,
            },
            _ = sleep(timeout) => Wait::Elapsed,
            _ = self.stop.changed() => Wait::Stop,
        }
    }

    async fn idle_wait(&mut self, period: Duration) {
        tokio::select! {
            _ = sleep(period) => {}
            _ = self.stop.changed() => {}
        }
    }
}

/// Owner-side control of a running worker. Dropping it asks the worker to
/// stop without waiting for the thread.
#[derive(Debug)]
pub struct WorkerHandle {
    sender: ConfigSender,
    subscriptions: broadcast::Sender<Arc<StatusSnapshot>>,
    state: watch::Receiver<WorkerState>,
    stop: watch::Sender<bool>,
    thread: Option<JoinHandle<WorkerExit>>,
}

impl WorkerHandle {
    pub fn enqueue(&self, request: ConfigurationRequest) -> Result<(), QueueError> {
        self.sender.enqueue(request)
    }

    /// Extra producer for other threads.
    pub fn sender(&self) -> ConfigSender {
        self.sender.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StatusSnapshot>> {
        self.subscriptions.subscribe()
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        match &self.thread {
            Some(thread) => thread.is_finished(),
            None => true,
        }
    }

    /// Takes effect at the worker's next loop iteration; an apply step
    /// already on the bus runs to completion.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn join(mut self) -> Result<WorkerExit, WorkerError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| WorkerError::Panicked),
            None => Ok(WorkerExit::Stopped),
        }
    }

    pub fn shutdown(self) -> Result<WorkerExit, WorkerError> {
        self.stop();
        self.join()
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_counter_exhausts_at_limit() {
        let mut counter = FaultCounter::new();
        for expected in 1..FAULT_LIMIT {
            assert_eq!(counter.record_fault(), expected);
            assert!(!counter.is_exhausted());
        }
        assert_eq!(counter.record_fault(), FAULT_LIMIT);
        assert!(counter.is_exhausted());

        counter.reset();
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_state_terminal_check() {
        assert!(!WorkerState::Polling.is_terminated());
        assert!(WorkerState::Terminated(TerminationReason::FaultLimit).is_terminated());
    }
}
