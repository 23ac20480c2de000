//! Periodic polling of the register block and availability tracking.
//!
//! A [`PollingCoordinator`] runs one cycle at a time: it reads the block
//! (in bulk or register by register), retries transient failures with a
//! linear backoff, installs the results in the gateway cache and updates
//! the device's availability. Cycle results are returned as values and
//! published through a [`watch`] channel; nothing here panics or aborts
//! the process on a failed cycle.

use ectocontrol_common::{DeviceLiveness, DeviceStatus};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, watch};
use tracing::{debug, error, info, warn};

use crate::gateway::RegisterGateway;
use crate::registers::{BLOCK_COUNT, BLOCK_START, block_addresses};
use crate::transport::{DEFAULT_TIMEOUT, TransportError};

/// Default time between cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Default number of retries after a failed read.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Default number of failed cycles before the device is unavailable.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Unit of the linear retry backoff.
pub const BACKOFF_STEP: Duration = Duration::from_millis(500);

/// Delay before retry `attempt` (1-indexed): `step × attempt`.
pub fn backoff_delay(step: Duration, attempt: u32) -> Duration {
    step.saturating_mul(attempt)
}

/// Polling parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    /// Device name used in logs and diagnostics.
    pub name: String,
    pub interval: Duration,
    /// Retries after the first failed attempt.
    pub retry_count: u32,
    /// Read one register per transaction instead of the whole block.
    pub sequential: bool,
    /// Timeout of each read transaction.
    pub read_timeout: Duration,
    pub failure_threshold: u32,
    pub backoff_step: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            name: "ectocontrol".to_string(),
            interval: DEFAULT_POLL_INTERVAL,
            retry_count: DEFAULT_RETRY_COUNT,
            sequential: false,
            read_timeout: DEFAULT_TIMEOUT,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            backoff_step: BACKOFF_STEP,
        }
    }
}

/// Consecutive-failure counter and the availability derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AvailabilityState {
    pub consecutive_failures: u32,
    pub available: bool,
}

impl Default for AvailabilityState {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            available: true,
        }
    }
}

impl AvailabilityState {
    /// Record a successful cycle. Returns `true` if the device came back.
    pub fn record_success(&mut self) -> bool {
        let recovered = !self.available;
        self.consecutive_failures = 0;
        self.available = true;
        recovered
    }

    /// Record a failed cycle. Returns `true` if the device just became
    /// unavailable.
    pub fn record_failure(&mut self, threshold: u32) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.available && self.consecutive_failures >= threshold {
            self.available = false;
            return true;
        }
        false
    }
}

/// Why a cycle produced no data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinatorFailure {
    #[error("All {attempts} read attempts failed, last error: {last_error}")]
    AllRetriesExhausted {
        attempts: u32,
        last_error: TransportError,
    },

    #[error("Read rejected by device: {0}")]
    Rejected(TransportError),

    #[error("No register in the block could be read ({} failed)", .failed.len())]
    ZeroAddressesSucceeded { failed: Vec<u16> },

    #[error("Cycle cancelled by shutdown")]
    Cancelled,
}

/// Result of one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Every register was read.
    Complete { registers: usize },
    /// Sequential cycle where some addresses failed.
    Partial { registers: usize, failed: Vec<u16> },
    Failed(CoordinatorFailure),
}

impl PollOutcome {
    /// Whether the cycle counts as a success for availability.
    pub fn is_success(&self) -> bool {
        !matches!(self, PollOutcome::Failed(_))
    }

    /// Whether the cycle was cut short by shutdown.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PollOutcome::Failed(CoordinatorFailure::Cancelled))
    }

    pub fn kind(&self) -> CycleKind {
        match self {
            PollOutcome::Complete { .. } => CycleKind::Complete,
            PollOutcome::Partial { .. } => CycleKind::Partial,
            PollOutcome::Failed(_) => CycleKind::Failed,
        }
    }
}

/// Kind of the last finished cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleKind {
    Complete,
    Partial,
    Failed,
}

/// Whether a cycle is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePhase {
    #[default]
    Idle,
    Acquiring,
}

/// Snapshot of the coordinator published after every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorStatus {
    pub available: bool,
    pub consecutive_failures: u32,
    pub device_status: DeviceStatus,
    pub phase: CyclePhase,
    /// Finish time of the last successful cycle (millis since epoch).
    pub last_success: Option<i64>,
    pub last_error: Option<String>,
    pub last_cycle: Option<CycleKind>,
    /// Number of finished cycles.
    pub cycles: u64,
}

impl Default for CoordinatorStatus {
    fn default() -> Self {
        let availability = AvailabilityState::default();
        Self {
            available: availability.available,
            consecutive_failures: availability.consecutive_failures,
            device_status: DeviceStatus::Unknown,
            phase: CyclePhase::Idle,
            last_success: None,
            last_error: None,
            last_cycle: None,
            cycles: 0,
        }
    }
}

impl CoordinatorStatus {
    /// Liveness view for status consumers.
    pub fn liveness(&self, device: &str) -> DeviceLiveness {
        DeviceLiveness {
            device: device.to_string(),
            status: self.device_status,
            available: self.available,
            last_seen: self.last_success.unwrap_or(0),
            consecutive_failures: self.consecutive_failures,
            last_error: self.last_error.clone(),
        }
    }
}

fn device_status(outcome: &PollOutcome, availability: &AvailabilityState) -> DeviceStatus {
    match outcome {
        PollOutcome::Complete { .. } => DeviceStatus::Online,
        PollOutcome::Partial { .. } => DeviceStatus::Degraded,
        PollOutcome::Failed(_) if availability.available => DeviceStatus::Degraded,
        PollOutcome::Failed(_) => DeviceStatus::Offline,
    }
}

/// Drives poll cycles for one gateway.
pub struct PollingCoordinator {
    settings: PollSettings,
    gateway: Arc<RegisterGateway>,
    cycle: tokio::sync::Mutex<()>,
    availability: Mutex<AvailabilityState>,
    status: watch::Sender<CoordinatorStatus>,
    refresh_requested: Notify,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for PollingCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingCoordinator")
            .field("settings", &self.settings)
            .field("availability", &*self.availability.lock())
            .finish()
    }
}

impl PollingCoordinator {
    pub fn new(gateway: Arc<RegisterGateway>, settings: PollSettings) -> Self {
        let (status, _) = watch::channel(CoordinatorStatus::default());
        let (shutdown, _) = watch::channel(false);
        Self {
            settings,
            gateway,
            cycle: tokio::sync::Mutex::new(()),
            availability: Mutex::new(AvailabilityState::default()),
            status,
            refresh_requested: Notify::new(),
            shutdown,
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    pub fn gateway(&self) -> &Arc<RegisterGateway> {
        &self.gateway
    }

    pub fn is_available(&self) -> bool {
        self.availability.lock().available
    }

    pub fn availability(&self) -> AvailabilityState {
        *self.availability.lock()
    }

    /// Latest published status.
    pub fn status(&self) -> CoordinatorStatus {
        self.status.borrow().clone()
    }

    /// Receive every status change.
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorStatus> {
        self.status.subscribe()
    }

    /// Wake the run loop for a cycle now instead of at the next tick.
    ///
    /// A request made while a cycle is running triggers one more cycle
    /// right after it.
    pub fn request_immediate_refresh(&self) {
        debug!(device = %self.settings.name, "Immediate refresh requested");
        self.refresh_requested.notify_one();
    }

    /// Stop polling.
    ///
    /// A running cycle lets its in-flight transaction finish, then stops
    /// without starting another or sleeping through a backoff. Later
    /// calls to [`refresh`](Self::refresh) return
    /// [`CoordinatorFailure::Cancelled`].
    pub fn shutdown(&self) {
        info!("Device '{}': shutdown requested", self.settings.name);
        self.shutdown.send_replace(true);
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run one poll cycle.
    ///
    /// Cycles never overlap: a second caller waits for the running cycle
    /// to finish, retries included. A cancelled cycle leaves the cache
    /// and availability untouched.
    pub async fn refresh(&self) -> PollOutcome {
        let _cycle = self.cycle.lock().await;
        self.status.send_modify(|s| s.phase = CyclePhase::Acquiring);

        let outcome = if self.settings.sequential {
            self.poll_sequential().await
        } else {
            self.poll_bulk().await
        };

        if outcome.is_cancelled() {
            debug!("Device '{}': cycle cancelled", self.settings.name);
            self.status.send_modify(|s| s.phase = CyclePhase::Idle);
        } else {
            self.record(&outcome);
        }
        outcome
    }

    /// Poll until [`shutdown`](Self::shutdown) is called, then release the
    /// transport.
    ///
    /// Shutdown cuts a running cycle short after its in-flight
    /// transaction completes or times out.
    pub async fn run(&self) {
        let mut shutdown = self.shutdown.subscribe();
        info!(
            "Starting poller for device '{}' on {} (interval: {}s, sequential: {})",
            self.settings.name,
            self.gateway.transport().endpoint(),
            self.settings.interval.as_secs(),
            self.settings.sequential
        );

        while !*shutdown.borrow_and_update() {
            let outcome = self.refresh().await;
            debug!(device = %self.settings.name, cycle = ?outcome.kind(), "Poll cycle finished");

            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {}
                _ = self.refresh_requested.notified() => {}
                _ = shutdown.changed() => {}
            }
        }

        self.gateway.transport().disconnect().await;
        info!("Poller for device '{}' stopped", self.settings.name);
    }

    async fn poll_bulk(&self) -> PollOutcome {
        match self.read_with_retry(BLOCK_START, BLOCK_COUNT).await {
            Ok(words) => {
                let values: BTreeMap<u16, u16> = block_addresses().zip(words).collect();
                let registers = values.len();
                self.gateway.replace_cache(values, false);
                PollOutcome::Complete { registers }
            }
            Err(failure) => PollOutcome::Failed(failure),
        }
    }

    async fn poll_sequential(&self) -> PollOutcome {
        let mut values = BTreeMap::new();
        let mut failed = Vec::new();

        for address in block_addresses() {
            match self.read_with_retry(address, 1).await {
                Ok(words) => {
                    if let Some(&word) = words.first() {
                        values.insert(address, word);
                    }
                }
                Err(CoordinatorFailure::Cancelled) => {
                    return PollOutcome::Failed(CoordinatorFailure::Cancelled);
                }
                Err(failure) => {
                    debug!(address, error = %failure, "Register skipped this cycle");
                    failed.push(address);
                }
            }
        }

        if values.is_empty() {
            return PollOutcome::Failed(CoordinatorFailure::ZeroAddressesSucceeded { failed });
        }

        let registers = values.len();
        self.gateway.replace_cache(values, true);
        if failed.is_empty() {
            PollOutcome::Complete { registers }
        } else {
            warn!(
                "Device '{}': degraded cycle, {} registers read, {} kept from cache",
                self.settings.name,
                registers,
                failed.len()
            );
            PollOutcome::Partial { registers, failed }
        }
    }

    /// Read with up to `retry_count` retries of transient failures.
    ///
    /// No attempt starts once shutdown is requested, and a pending backoff
    /// is abandoned.
    async fn read_with_retry(
        &self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, CoordinatorFailure> {
        let transport = self.gateway.transport();
        let slave = self.gateway.slave_id();
        let attempts = self.settings.retry_count.saturating_add(1);
        let mut shutdown = self.shutdown.subscribe();
        let mut attempt: u32 = 0;

        loop {
            if self.is_shutting_down() {
                return Err(CoordinatorFailure::Cancelled);
            }
            attempt = attempt.saturating_add(1);
            let result = match transport.connect().await {
                Ok(()) => {
                    transport
                        .read_registers(slave, address, count, Some(self.settings.read_timeout))
                        .await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(words) => {
                    if attempt > 1 {
                        info!(
                            "Device '{}': read of {:#06x} recovered after {} retries",
                            self.settings.name,
                            address,
                            attempt - 1
                        );
                    }
                    return Ok(words);
                }
                Err(e) if !e.is_transient() => {
                    warn!(
                        "Device '{}': read of {:#06x} rejected, not retrying: {}",
                        self.settings.name, address, e
                    );
                    return Err(CoordinatorFailure::Rejected(e));
                }
                Err(e) if attempt >= attempts => {
                    error!(address, count, attempts, error = %e, "Read failed after all retries");
                    return Err(CoordinatorFailure::AllRetriesExhausted {
                        attempts,
                        last_error: e,
                    });
                }
                Err(e) => {
                    let delay = backoff_delay(self.settings.backoff_step, attempt);
                    warn!(
                        "Device '{}': read of {:#06x} failed (attempt {}/{}), retrying in {}ms: {}",
                        self.settings.name,
                        address,
                        attempt,
                        attempts,
                        delay.as_millis(),
                        e
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
    }

    fn record(&self, outcome: &PollOutcome) {
        let availability = {
            let mut availability = self.availability.lock();
            if outcome.is_success() {
                if availability.record_success() {
                    info!("Device '{}' available again", self.settings.name);
                }
            } else if availability.record_failure(self.settings.failure_threshold) {
                warn!(
                    device = %self.settings.name,
                    failures = availability.consecutive_failures,
                    "Device unavailable"
                );
            }
            *availability
        };

        let now = chrono::Utc::now().timestamp_millis();
        self.status.send_modify(|status| {
            status.available = availability.available;
            status.consecutive_failures = availability.consecutive_failures;
            status.device_status = device_status(outcome, &availability);
            status.phase = CyclePhase::Idle;
            status.last_cycle = Some(outcome.kind());
            status.cycles += 1;
            match outcome {
                PollOutcome::Complete { .. } => {
                    status.last_success = Some(now);
                    status.last_error = None;
                }
                PollOutcome::Partial { failed, .. } => {
                    status.last_success = Some(now);
                    status.last_error = Some(format!("{} registers unreadable", failed.len()));
                }
                PollOutcome::Failed(failure) => {
                    status.last_error = Some(failure.to_string());
                }
            }
        });
    }
}
