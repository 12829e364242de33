//! Persistence scheduling: a two-tier debounce plus a fixed-period sweep.
//!
//! The scheduler only keeps deadlines. It never sleeps and never sends
//! anything; the session's run loop asks it for the next deadline, waits
//! for it, and calls [`PersistScheduler::poll_due`] to find out what fired.
//!
//! ```text
//!  edit ──► on_edit ──► debounce_at = now + (urgent&&rapid ? 100ms : 500ms)
//!                                   │
//!  run loop: sleep_until(next_deadline) ──► poll_due ──► Debounce | Sweep
//!                                   │
//!  sweep_at advances every 30s regardless of debounce activity
//! ```

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::SyncTimingConfig;
use crate::observer::{EditKind, SaveTiming};

/// What caused a persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PersistTrigger {
    /// The debounce window closed.
    Debounce,
    /// The periodic sweep found unsent edits.
    Sweep,
    /// Someone asked for an immediate flush.
    Flush,
}

/// Debounce and sweep deadlines for one session.
#[derive(Debug)]
pub struct PersistScheduler {
    config: SyncTimingConfig,
    debounce_at: Option<Instant>,
    sweep_at: Option<Instant>,
    last_persist_at: Option<Instant>,
}

impl PersistScheduler {
    /// Create a scheduler whose first sweep is one interval after `now`.
    ///
    /// A zero `sweep_interval` disables the sweep.
    pub fn new(config: SyncTimingConfig, now: Instant) -> Self {
        let sweep_at = if config.sweep_interval.is_zero() {
            log::warn!("[Scheduler] Zero sweep interval, sweep disabled");
            None
        } else {
            Some(now + config.sweep_interval)
        };
        Self {
            config,
            debounce_at: None,
            sweep_at,
            last_persist_at: None,
        }
    }

    /// Time since the last persist, if there was one.
    pub fn since_last_persist(&self, now: Instant) -> Option<Duration> {
        self.last_persist_at
            .map(|at| now.saturating_duration_since(at))
    }

    /// Cancel any pending debounce and arm a new one for this edit.
    pub fn on_edit(&mut self, kind: EditKind, now: Instant) -> SaveTiming {
        let timing = SaveTiming::compute(kind, self.since_last_persist(now), &self.config);
        self.debounce_at = Some(now + timing.delay);
        timing
    }

    /// Armed debounce deadline, if any.
    pub fn debounce_deadline(&self) -> Option<Instant> {
        self.debounce_at
    }

    /// Next sweep tick, if the sweep is running.
    pub fn sweep_deadline(&self) -> Option<Instant> {
        self.sweep_at
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.debounce_at, self.sweep_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Consume every deadline that has passed.
    ///
    /// Returns the trigger to persist with, or `None` when nothing was due.
    /// The caller still decides whether there is anything to persist; a
    /// timer firing with no pending change is a no-op.
    pub fn poll_due(&mut self, now: Instant) -> Option<PersistTrigger> {
        let mut fired = None;

        if let Some(at) = self.sweep_at
            && at <= now
        {
            // Skip ticks missed while the loop was busy.
            let interval = self.config.sweep_interval;
            let behind = now.saturating_duration_since(at).as_nanos() / interval.as_nanos();
            let ticks = u32::try_from(behind + 1).unwrap_or(u32::MAX);
            self.sweep_at = Some(at + interval.saturating_mul(ticks));
            fired = Some(PersistTrigger::Sweep);
        }

        if let Some(at) = self.debounce_at
            && at <= now
        {
            self.debounce_at = None;
            fired = Some(PersistTrigger::Debounce);
        }

        fired
    }

    /// Note that a persist was dispatched at `now`. The pending state has
    /// been sent, so the debounce no longer has anything to wait for.
    pub fn record_persist(&mut self, now: Instant) {
        self.last_persist_at = Some(now);
        self.debounce_at = None;
    }

    /// Stop the debounce timer.
    pub fn cancel_debounce(&mut self) {
        self.debounce_at = None;
    }

    /// Stop the sweep.
    pub fn cancel_sweep(&mut self) {
        self.sweep_at = None;
    }
}
