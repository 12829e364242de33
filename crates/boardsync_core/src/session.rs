//! The board session: one task that owns all mutable sync state.
//!
//! # Architecture
//!
//! ```text
//!   editing surface ──ChangeRecord──┐
//!   SessionHandle ─────Control──────┤
//!   termination signal ─────────────┤      ┌──────────────────────┐
//!   channel pump ─────ChannelEvent──┼────► │     BoardSession     │
//!   persist tasks ──PersistOutcome──┤      │ store  observer      │
//!   debounce/sweep deadline ────────┘      │ scheduler  listener  │
//!                                          │ guard                │
//!                                          └──────────┬───────────┘
//!                                                     │ tokio::spawn
//!                                                     ▼
//!                                          PersistenceEndpoint::persist
//! ```
//!
//! Every input is an arm of one `tokio::select!` loop, so the store, the
//! scheduler and the listener baseline are only ever touched from this task
//! and need no locking. Persists run on their own tasks and report back, so
//! a slow server never delays the next change record.
//!
//! # Teardown
//!
//! Unmount cancels the debounce and the sweep, waits for persists already in
//! flight (a failed one comes back as pending), awaits one final persist of
//! any pending state, releases the channel, and drops the termination
//! listener. Terminate cannot wait: it picks up outcomes that have already
//! arrived, hands the pending state to the durability guard's beacon, then
//! does the same releases.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::SyncTimingConfig;
use crate::error::{Result, SyncError};
use crate::guard::{DurabilityGuard, FlushOutcome};
use crate::listener::{MergeOutcome, RemoteSnapshot, RemoteUpdateListener};
use crate::observer::{ChangeRecord, LocalEditObserver};
use crate::protocol::PersistRequest;
use crate::provisioner::{ChannelProvisioner, ProvisionState};
use crate::scheduler::{PersistScheduler, PersistTrigger};
use crate::state::EditableState;
use crate::store::SnapshotStore;
use crate::surface::EditingSurface;
use crate::sync_types::{ChannelStatus, SyncEvent, SyncEventHandler};
use crate::transport::{
    ChannelConnector, ChannelEvent, PersistenceEndpoint, TeardownTransport, TokenEndpoint,
};

/// How long teardown waits for the channel to unsubscribe and close.
pub const CHANNEL_RELEASE_TIMEOUT: Duration = Duration::from_secs(2);

/// How long unmount waits for persists that were dispatched before it.
pub const PERSIST_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Future that resolves when the process is about to terminate.
pub type TerminationSignal = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Configuration for one board session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Board being edited.
    pub board_id: String,
    /// Local participant. Remote snapshots from this id are ignored.
    pub user_id: String,
    /// Debounce and sweep timing.
    pub timing: SyncTimingConfig,
    /// State the board was loaded with, used as the first merge baseline.
    pub initial_state: Option<EditableState>,
}

impl SessionConfig {
    /// Default timing, no initial state.
    pub fn new(board_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            board_id: board_id.into(),
            user_id: user_id.into(),
            timing: SyncTimingConfig::default(),
            initial_state: None,
        }
    }

    /// Override the timing (builder pattern).
    pub fn with_timing(mut self, timing: SyncTimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Seed the merge baseline (builder pattern).
    pub fn with_initial_state(mut self, state: EditableState) -> Self {
        self.initial_state = Some(state);
        self
    }
}

/// Everything a session talks to.
#[derive(Clone)]
pub struct SessionCollaborators {
    /// The editing surface.
    pub surface: Arc<dyn EditingSurface>,
    /// Normal persist path.
    pub persistence: Arc<dyn PersistenceEndpoint>,
    /// Persist path used on process termination.
    pub teardown: Arc<dyn TeardownTransport>,
    /// Credential endpoints for the real-time channel.
    pub tokens: Arc<dyn TokenEndpoint>,
    /// Real-time connection factory.
    pub connector: Arc<dyn ChannelConnector>,
    /// Optional event sink.
    pub events: Option<Arc<dyn SyncEventHandler>>,
}

/// Which teardown path ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownKind {
    /// Normal close.
    Unmount,
    /// Process termination.
    Terminate,
}

/// Result of tearing a session down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    /// Which path ran.
    pub kind: TeardownKind,
    /// What happened to the pending save.
    pub flush: FlushOutcome,
    /// Whether the store still reported unsent edits afterwards.
    pub has_pending_change: bool,
    /// Persists dispatched before teardown whose outcome never arrived.
    pub unanswered_persists: usize,
}

enum Control {
    Flush(oneshot::Sender<FlushOutcome>),
    Unmount,
    Terminate,
}

struct PersistOutcome {
    dispatch: u64,
    trigger: PersistTrigger,
    request: PersistRequest,
    result: Result<()>,
}

/// Handle to a running board session.
///
/// Dropping the handle unmounts the session.
pub struct SessionHandle {
    control: mpsc::UnboundedSender<Control>,
    provision: watch::Receiver<ProvisionState>,
    task: JoinHandle<TeardownReport>,
}

impl SessionHandle {
    /// Persist any pending state now and wait for the result.
    ///
    /// Returns [`FlushOutcome::NothingPending`] when there is nothing to send.
    pub async fn flush(&self) -> Result<FlushOutcome> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(Control::Flush(tx))
            .map_err(|_| SyncError::SessionClosed)?;
        rx.await.map_err(|_| SyncError::SessionClosed)
    }

    /// Close the session normally.
    pub async fn unmount(self) -> Result<TeardownReport> {
        let _ = self.control.send(Control::Unmount);
        Self::join(self.task).await
    }

    /// Run the termination path as if the process were going away.
    pub async fn terminate(self) -> Result<TeardownReport> {
        let _ = self.control.send(Control::Terminate);
        Self::join(self.task).await
    }

    /// Wait for the session to end on its own (termination signal).
    pub async fn wait(self) -> Result<TeardownReport> {
        Self::join(self.task).await
    }

    /// Resolves once the session task has stopped accepting commands.
    pub async fn closed(&self) {
        self.control.closed().await
    }

    /// Current channel provisioning state.
    pub fn provision_state(&self) -> ProvisionState {
        self.provision.borrow().clone()
    }

    /// Watch channel provisioning transitions.
    pub fn watch_provision(&self) -> watch::Receiver<ProvisionState> {
        self.provision.clone()
    }

    async fn join(task: JoinHandle<TeardownReport>) -> Result<TeardownReport> {
        task.await.map_err(|e| {
            log::error!("[BoardSession] Session task failed: {}", e);
            SyncError::SessionClosed
        })
    }
}

/// The session state owned by the run loop.
pub struct BoardSession {
    board_id: String,
    store: SnapshotStore,
    observer: LocalEditObserver,
    scheduler: PersistScheduler,
    listener: RemoteUpdateListener,
    guard: DurabilityGuard,
    surface: Arc<dyn EditingSurface>,
    persistence: Arc<dyn PersistenceEndpoint>,
    teardown: Arc<dyn TeardownTransport>,
    events: Option<Arc<dyn SyncEventHandler>>,
    outcomes: mpsc::UnboundedSender<PersistOutcome>,
    last_dispatch: u64,
    in_flight: usize,
    flush_waiters: HashMap<u64, oneshot::Sender<FlushOutcome>>,
}

impl BoardSession {
    /// Start a session with no termination signal.
    ///
    /// `changes` is the editing surface's change stream. Must be called from
    /// within a tokio runtime.
    pub fn start(
        config: SessionConfig,
        collaborators: SessionCollaborators,
        changes: mpsc::UnboundedReceiver<ChangeRecord>,
    ) -> SessionHandle {
        Self::start_with_termination(
            config,
            collaborators,
            changes,
            Box::pin(std::future::pending()),
        )
    }

    /// Start a session that runs the termination path when `signal` resolves.
    pub fn start_with_termination(
        config: SessionConfig,
        collaborators: SessionCollaborators,
        changes: mpsc::UnboundedReceiver<ChangeRecord>,
        signal: TerminationSignal,
    ) -> SessionHandle {
        let SessionCollaborators {
            surface,
            persistence,
            teardown,
            tokens,
            connector,
            events,
        } = collaborators;

        let provisioner = ChannelProvisioner::new(config.board_id.as_str(), tokens, connector)
            .with_events(events.clone());
        let provision = provisioner.watch_state();

        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let pump = tokio::spawn(run_channel(provisioner, channel_tx, stop_rx));

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        let store = match config.initial_state {
            Some(initial) => SnapshotStore::with_baseline(initial),
            None => SnapshotStore::new(),
        };

        let session = BoardSession {
            board_id: config.board_id.clone(),
            store,
            observer: LocalEditObserver::new(),
            scheduler: PersistScheduler::new(config.timing, Instant::now()),
            listener: RemoteUpdateListener::new(config.user_id),
            guard: DurabilityGuard::new(config.board_id),
            surface,
            persistence,
            teardown,
            events,
            outcomes: outcome_tx,
            last_dispatch: 0,
            in_flight: 0,
            flush_waiters: HashMap::new(),
        };

        let inputs = SessionInputs {
            control: control_rx,
            changes,
            channel: channel_rx,
            outcomes: outcome_rx,
            signal,
            pump: ChannelPump {
                stop: Some(stop_tx),
                task: pump,
            },
        };

        log::info!("[BoardSession] Starting session for board {}", session.board_id);
        let task = tokio::spawn(session.run(inputs));

        SessionHandle {
            control: control_tx,
            provision,
            task,
        }
    }

    async fn run(mut self, mut inputs: SessionInputs) -> TeardownReport {
        let mut changes_open = true;
        let mut channel_open = true;

        let kind = loop {
            let deadline = self.scheduler.next_deadline();

            tokio::select! {
                control = inputs.control.recv() => match control {
                    Some(Control::Flush(reply)) => {
                        self.drain_changes(&mut inputs.changes);
                        self.flush(reply);
                    }
                    Some(Control::Unmount) | None => break TeardownKind::Unmount,
                    Some(Control::Terminate) => break TeardownKind::Terminate,
                },
                _ = &mut inputs.signal => {
                    log::info!("[BoardSession] Termination signal received");
                    break TeardownKind::Terminate;
                }
                record = inputs.changes.recv(), if changes_open => match record {
                    Some(record) => self.on_change(&record),
                    None => {
                        log::debug!("[BoardSession] Change stream closed");
                        changes_open = false;
                    }
                },
                event = inputs.channel.recv(), if channel_open => match event {
                    Some(event) => self.on_channel_event(event),
                    None => channel_open = false,
                },
                Some(outcome) = inputs.outcomes.recv() => self.on_persist_outcome(outcome),
                _ = sleep_until_deadline(deadline) => {
                    if let Some(trigger) = self.scheduler.poll_due(Instant::now()) {
                        self.dispatch(trigger);
                    }
                }
            }
        };

        self.teardown(kind, inputs).await
    }

    /// Apply change records that are already queued, so a flush or teardown
    /// sees every edit made before it was requested.
    fn drain_changes(&mut self, changes: &mut mpsc::UnboundedReceiver<ChangeRecord>) {
        while let Ok(record) = changes.try_recv() {
            self.on_change(&record);
        }
    }

    fn on_change(&mut self, record: &ChangeRecord) {
        self.observer.observe(
            record,
            self.surface.as_ref(),
            &mut self.store,
            &mut self.scheduler,
            Instant::now(),
        );
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                log::info!("[BoardSession] Channel connected");
                self.emit(SyncEvent::StatusChanged {
                    status: ChannelStatus::Connected,
                });
            }
            ChannelEvent::Disconnected { reason } => {
                log::warn!("[BoardSession] Channel disconnected: {}", reason);
                self.emit(SyncEvent::StatusChanged {
                    status: ChannelStatus::Disconnected,
                });
            }
            ChannelEvent::Publication(data) => match RemoteSnapshot::from_publication(data) {
                Ok(snapshot) => {
                    let author = snapshot.author_id.clone();
                    let outcome =
                        self.listener
                            .handle(snapshot, &mut self.store, self.surface.as_ref());
                    if let MergeOutcome::Applied { diff } = outcome {
                        self.emit(SyncEvent::RemoteApplied {
                            author,
                            changed: diff.len(),
                        });
                    }
                }
                Err(e) => {
                    log::warn!("[BoardSession] Dropping remote message: {}", e);
                    self.emit(SyncEvent::Error {
                        message: e.to_string(),
                    });
                }
            },
        }
    }

    /// Take the pending save and send it on its own task.
    ///
    /// Returns the dispatch number, or `None` when nothing was pending.
    fn dispatch(&mut self, trigger: PersistTrigger) -> Option<u64> {
        let state = self.store.take_pending()?;
        self.scheduler.record_persist(Instant::now());
        self.last_dispatch += 1;
        self.in_flight += 1;
        let dispatch = self.last_dispatch;

        log::debug!(
            "[BoardSession] Persist #{} ({:?}, {} records)",
            dispatch,
            trigger,
            state.record_count()
        );

        let request = PersistRequest::new(self.board_id.as_str(), state);
        let persistence = self.persistence.clone();
        let outcomes = self.outcomes.clone();
        tokio::spawn(async move {
            let result = persistence.persist(&request).await;
            let _ = outcomes.send(PersistOutcome {
                dispatch,
                trigger,
                request,
                result,
            });
        });

        Some(dispatch)
    }

    fn flush(&mut self, reply: oneshot::Sender<FlushOutcome>) {
        match self.dispatch(PersistTrigger::Flush) {
            Some(dispatch) => {
                self.flush_waiters.insert(dispatch, reply);
            }
            None => {
                let _ = reply.send(FlushOutcome::NothingPending);
            }
        }
    }

    fn on_persist_outcome(&mut self, outcome: PersistOutcome) {
        let PersistOutcome {
            dispatch,
            trigger,
            request,
            result,
        } = outcome;
        self.in_flight = self.in_flight.saturating_sub(1);

        let flush_result = match result {
            Ok(()) => {
                log::debug!("[BoardSession] Persist #{} confirmed", dispatch);
                self.emit(SyncEvent::Persisted {
                    trigger,
                    at: Utc::now(),
                    records: request.snapshot.record_count(),
                });
                self.store.mark_confirmed(request.snapshot);
                FlushOutcome::Persisted
            }
            Err(e) => {
                log::error!("[BoardSession] Persist #{} failed: {}", dispatch, e);
                self.emit(SyncEvent::PersistFailed {
                    trigger,
                    message: e.to_string(),
                });
                // Only the most recent dispatch may come back; an older one
                // would overwrite a newer snapshot on the next sweep.
                if dispatch == self.last_dispatch && self.store.restore_failed(request.snapshot) {
                    log::info!("[BoardSession] Failed snapshot kept for the next sweep");
                }
                FlushOutcome::PersistFailed(e.to_string())
            }
        };

        if let Some(reply) = self.flush_waiters.remove(&dispatch) {
            let _ = reply.send(flush_result);
        }
    }

    async fn teardown(mut self, kind: TeardownKind, inputs: SessionInputs) -> TeardownReport {
        let SessionInputs {
            mut changes,
            mut outcomes,
            signal,
            pump,
            ..
        } = inputs;
        self.drain_changes(&mut changes);
        drop(changes);

        let flush = match kind {
            TeardownKind::Terminate => {
                while let Ok(outcome) = outcomes.try_recv() {
                    self.on_persist_outcome(outcome);
                }
                let flush = self
                    .guard
                    .on_terminate(&mut self.store, self.teardown.as_ref());
                self.scheduler.cancel_debounce();
                self.scheduler.cancel_sweep();
                flush
            }
            TeardownKind::Unmount => {
                self.scheduler.cancel_debounce();
                self.scheduler.cancel_sweep();
                self.settle_in_flight(&mut outcomes).await;
                self.guard
                    .on_unmount(&mut self.store, self.persistence.as_ref())
                    .await
            }
        };

        pump.stop().await;
        drop(signal);

        log::info!(
            "[BoardSession] Session for board {} closed ({:?}, {:?})",
            self.board_id,
            kind,
            flush
        );

        TeardownReport {
            kind,
            flush,
            has_pending_change: self.store.has_pending_change(),
            unanswered_persists: self.in_flight,
        }
    }

    /// Wait, up to [`PERSIST_SETTLE_TIMEOUT`], for dispatched persists to
    /// report back. A failed latest persist is restored as pending, so the
    /// final unmount persist re-sends it.
    async fn settle_in_flight(&mut self, outcomes: &mut mpsc::UnboundedReceiver<PersistOutcome>) {
        if self.in_flight == 0 {
            return;
        }
        log::debug!(
            "[BoardSession] Waiting for {} persist(s) in flight",
            self.in_flight
        );
        let deadline = Instant::now() + PERSIST_SETTLE_TIMEOUT;
        while self.in_flight > 0 {
            match tokio::time::timeout_at(deadline, outcomes.recv()).await {
                Ok(Some(outcome)) => self.on_persist_outcome(outcome),
                Ok(None) => break,
                Err(_) => {
                    log::warn!(
                        "[BoardSession] {} persist(s) still unanswered at teardown",
                        self.in_flight
                    );
                    break;
                }
            }
        }
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(events) = &self.events {
            events.on_event(event);
        }
    }
}

struct SessionInputs {
    control: mpsc::UnboundedReceiver<Control>,
    changes: mpsc::UnboundedReceiver<ChangeRecord>,
    channel: mpsc::UnboundedReceiver<ChannelEvent>,
    outcomes: mpsc::UnboundedReceiver<PersistOutcome>,
    signal: TerminationSignal,
    pump: ChannelPump,
}

struct ChannelPump {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ChannelPump {
    /// Ask the pump to unsubscribe and wait for it, up to a bound.
    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if tokio::time::timeout(CHANNEL_RELEASE_TIMEOUT, &mut self.task)
            .await
            .is_err()
        {
            log::warn!("[BoardSession] Channel release timed out");
            self.task.abort();
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Provision the channel, then forward its events until told to stop.
async fn run_channel(
    provisioner: ChannelProvisioner,
    events: mpsc::UnboundedSender<ChannelEvent>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut channel = tokio::select! {
        result = provisioner.provision() => match result {
            Ok(channel) => channel,
            // Already logged; the session keeps editing and persisting.
            Err(_) => return,
        },
        _ = &mut stop => {
            provisioner.mark_torn_down();
            return;
        }
    };

    loop {
        tokio::select! {
            event = channel.next_event() => match event {
                Some(event) => {
                    if events.send(event).is_err() {
                        break;
                    }
                }
                None => {
                    log::warn!("[BoardSession] Channel closed by transport");
                    break;
                }
            },
            _ = &mut stop => break,
        }
    }

    channel.release().await;
    provisioner.mark_torn_down();
}
