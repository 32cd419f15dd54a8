//! Connection lifecycle: frame dispatch, status telemetry and reconnect
//! backoff.
//!
//! [`ConnectionManager`] does no I/O. The driver in `lib.rs` feeds it
//! transport events, sends whatever it leaves in its outbox, and sleeps for
//! the delay it returns on close.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::HostBindings;
use crate::config::HostConfig;
use crate::error::GridError;
use crate::interpolate::Interpolator;
use crate::protocol::{
    self, Addressing, DeltaFrame, InboundFrame, Operation, OutboundFrame, RefreshReason,
    StatusReport,
};
use crate::schema::Column;
use crate::table::TableState;
use crate::view::TableView;

const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1000);
const DEFAULT_BACKOFF_CAP: Duration = Duration::from_millis(30_000);

/// Capped exponential reconnect delay.
///
/// A close seen with attempt counter `n` waits `min(cap, (2^n - 1) * base)`.
/// The counter starts at 0, so a host that never connected retries at once
/// and then after 1s, 3s, 7s, 15s and the cap. An open resets it to 1, so a
/// dropped connection waits 1s before the first retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP)
    }
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1_u32
            .checked_shl(attempt)
            .map_or(u32::MAX, |power| power - 1);

        self.base
            .checked_mul(factor)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    pub attempts: u32,
    pub is_open: bool,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            attempts: 0,
            is_open: false,
        }
    }
}

/// Connection indicator shown by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusIcon {
    Success,
    Failure,
    Pending,
}

/// Stops the reconnect loop. Triggering wakes a pending backoff wait.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (flag, signal) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        signal.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps up to `delay`. Returns true if shutdown was triggered.
    pub fn wait(&self, delay: Duration) -> bool {
        let (flag, signal) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _timeout) = signal
            .wait_timeout_while(guard, delay, |triggered| !*triggered)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

pub struct ConnectionManager<B: HostBindings> {
    bindings: B,
    tables: HashMap<String, TableState>,
    state: ConnectionState,
    phase: Phase,
    backoff: Backoff,
    max_rows: usize,
    addressing: Addressing,
    interpolator: Interpolator,
    user: String,
    outbox: Vec<OutboundFrame>,
}

impl<B: HostBindings> ConnectionManager<B> {
    pub fn new(bindings: B, config: &HostConfig) -> Self {
        Self {
            bindings,
            tables: HashMap::new(),
            state: ConnectionState::default(),
            phase: Phase::Connecting,
            backoff: config.backoff,
            max_rows: config.max_rows,
            addressing: config.addressing.clone(),
            interpolator: Interpolator::new(config.interpolation_passes),
            user: config.user(),
            outbox: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn bindings(&self) -> &B {
        &self.bindings
    }

    pub fn bindings_mut(&mut self) -> &mut B {
        &mut self.bindings
    }

    pub fn into_bindings(self) -> B {
        self.bindings
    }

    pub fn table(&self, address: &str) -> Option<&TableState> {
        self.tables.get(address)
    }

    pub fn drain_outbox(&mut self) -> Vec<OutboundFrame> {
        std::mem::take(&mut self.outbox)
    }

    pub fn begin_connect(&mut self) {
        self.phase = Phase::Connecting;
        debug!(attempt = self.state.attempts, "connecting");
    }

    pub fn on_open(&mut self) {
        self.phase = Phase::Open;
        self.state = ConnectionState {
            attempts: 1,
            is_open: true,
        };
        info!("connection open");
        self.report_transition(StatusIcon::Success, Operation::Open);
    }

    pub fn on_error(&mut self, reason: &str) {
        warn!(reason, "connection error");
        self.phase = Phase::Closed;
        self.state.is_open = false;
        self.report_transition(StatusIcon::Failure, Operation::Error);
    }

    /// Records a close and returns how long to wait before the next attempt.
    pub fn on_close(&mut self) -> Duration {
        let delay = self.backoff.delay(self.state.attempts);
        self.state.attempts = self.state.attempts.saturating_add(1);
        self.state.is_open = false;
        self.phase = Phase::Closed;

        info!(
            delay_ms = delay.as_millis() as u64,
            next_attempt = self.state.attempts,
            "connection closed; reconnect scheduled"
        );
        self.report_transition(StatusIcon::Pending, Operation::Close);
        delay
    }

    /// Decodes and applies one inbound frame.
    pub fn on_message(&mut self, text: &str) {
        let started = Instant::now();

        match protocol::decode_frame(text, &self.addressing) {
            Ok(InboundFrame::Schema { address, columns }) => self.apply_schema(&address, columns),
            Ok(InboundFrame::Table(delta)) => {
                self.apply_delta(delta, Operation::UpdateTable, started);
            }
            Ok(InboundFrame::Highlight(delta)) => {
                self.apply_delta(delta, Operation::HighlightTable, started);
            }
            Err(err) => {
                warn!(%err, frame_len = text.len(), "dropping inbound frame");
                self.outbox
                    .push(OutboundFrame::Refresh(RefreshReason::MalformedFrame));
            }
        }
    }

    fn apply_schema(&mut self, address: &str, columns: Vec<Column>) {
        let Some(view) = self.bindings.view_mut(address) else {
            debug!(address, "schema for unbound table ignored");
            return;
        };

        let max_rows = self.max_rows;
        let table = self
            .tables
            .entry(address.to_string())
            .or_insert_with(|| TableState::with_max_rows(max_rows));
        table.apply_schema(view, columns, &mut self.outbox);
        debug!(address, width = table.schema().len(), "schema applied");
    }

    fn apply_delta(&mut self, delta: DeltaFrame, operation: Operation, started: Instant) {
        let Some(view) = self.bindings.view_mut(&delta.address) else {
            debug!(address = %delta.address, "delta for unbound table ignored");
            return;
        };

        let max_rows = self.max_rows;
        let table = self
            .tables
            .entry(delta.address.clone())
            .or_insert_with(|| TableState::with_max_rows(max_rows));
        let applied = match operation {
            Operation::HighlightTable => {
                table.apply_highlight(view, &delta.changes, &self.interpolator)
            }
            _ => table.apply_table(view, &delta.changes, &self.interpolator, &mut self.outbox),
        };

        let change = match applied {
            Ok(change) => change,
            Err(err) => {
                warn!(%err, address = %delta.address, "delta batch rejected");
                self.outbox
                    .push(OutboundFrame::Refresh(refresh_reason_for(&err)));
                0
            }
        };
        let rows = view.row_count();

        self.bindings.set_status(StatusIcon::Success);
        self.outbox.push(OutboundFrame::Status(StatusReport {
            rows,
            delta: delta.payload_len,
            change,
            duration_ms: started.elapsed().as_millis() as u64,
            sequence: delta.sequence.unwrap_or_else(|| "0".to_string()),
            operation,
            address: delta.address,
            user: self.user.clone(),
        }));
    }

    fn report_transition(&mut self, icon: StatusIcon, operation: Operation) {
        self.bindings.set_status(icon);
        self.outbox
            .push(OutboundFrame::Status(StatusReport::idle(operation, &self.user)));
    }
}

fn refresh_reason_for(err: &GridError) -> RefreshReason {
    match err {
        GridError::UndeclaredColumn { .. } => RefreshReason::UndeclaredColumn,
        _ => RefreshReason::MalformedFrame,
    }
}
