//! The per-tick decision procedure and its observability record.
//!
//! A tick never retries beyond the target list: observe, bail out if attached or
//! if nothing can be done, otherwise walk the targets in order and stop at the
//! first success. The controller decides *when* ticks run; this module decides
//! what one tick does.

use crate::lock::LockState;
use crate::observer::StateObserver;
use crate::probe::Actuator;
use crate::targets::TargetList;
use holdfast_provider::TargetId;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

/// Lifetime counters; saturate instead of wrapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileCounters {
    /// Ticks that invoked the actuator at least once.
    pub attempts: u64,
    /// Ticks that ended attached to one of the targets.
    pub successes: u64,
}

impl ReconcileCounters {
    fn record(&mut self, succeeded: bool) {
        self.attempts = self.attempts.saturating_add(1);
        if succeeded {
            self.successes = self.successes.saturating_add(1);
        }
    }
}

/// What a tick ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickOutcome {
    /// Lock released; nothing to do.
    Unlocked,
    /// Attachment could not be observed; skipped.
    ObserverUnavailable,
    /// Already attached somewhere; nothing to correct.
    AlreadyAttached,
    /// No attach capability (or no targets); reported, not corrected.
    Degraded,
    /// A target accepted the attach call.
    Attached,
    /// Every target failed.
    Exhausted,
    /// The controller stopped while the actuator call was in flight.
    Discarded,
}

/// One failed attach call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFailure {
    pub target: TargetId,
    pub reason: String,
}

/// Observability record emitted after every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickRecord {
    pub attempted: bool,
    pub succeeded: bool,
    pub chosen_target: Option<TargetId>,
    pub reason: Option<String>,
    pub outcome: TickOutcome,
    pub failures: Vec<TargetFailure>,
    /// Counter values after this tick.
    pub counters: ReconcileCounters,
}

impl TickRecord {
    fn idle(outcome: TickOutcome, reason: Option<String>, counters: ReconcileCounters) -> Self {
        Self {
            attempted: false,
            succeeded: false,
            chosen_target: None,
            reason,
            outcome,
            failures: Vec::new(),
            counters,
        }
    }
}

/// Everything a tick reads; borrowed from the controller for one tick.
pub struct TickContext<'a> {
    pub lock: LockState,
    pub observer: &'a dyn StateObserver,
    pub actuator: Option<&'a Actuator>,
    pub targets: Option<&'a TargetList>,
}

/// Owns the counters and runs ticks.
#[derive(Debug, Default)]
pub struct Reconciler {
    counters: ReconcileCounters,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> ReconcileCounters {
        self.counters
    }

    /// Run one tick. `stop_requested` is checked after every actuator call; once
    /// it reports true the remaining targets are skipped and the result is
    /// discarded without touching the counters.
    pub async fn tick<F>(&mut self, ctx: TickContext<'_>, stop_requested: F) -> TickRecord
    where
        F: Fn() -> bool,
    {
        if !ctx.lock.is_locked() {
            return TickRecord::idle(TickOutcome::Unlocked, None, self.counters);
        }

        let state = match ctx.observer.current_attachment().await {
            Ok(state) => state,
            Err(err) => {
                debug!("skipping tick: {err}");
                return TickRecord::idle(
                    TickOutcome::ObserverUnavailable,
                    Some(err.to_string()),
                    self.counters,
                );
            }
        };

        if let Some(current) = state.attached_to {
            debug!("already attached to {current}; nothing to do");
            return TickRecord::idle(TickOutcome::AlreadyAttached, None, self.counters);
        }

        let Some(actuator) = ctx.actuator else {
            warn!("detached but no attach function is available");
            return TickRecord::idle(
                TickOutcome::Degraded,
                Some("no attach capability discovered".to_string()),
                self.counters,
            );
        };

        let Some(targets) = ctx.targets else {
            warn!("detached but no targets are configured");
            return TickRecord::idle(
                TickOutcome::Degraded,
                Some("no targets configured".to_string()),
                self.counters,
            );
        };

        let mut failures = Vec::new();
        for (position, target) in targets.iter().enumerate() {
            let result = actuator.attach(target).await;

            if stop_requested() {
                info!("controller stopped during attach to {target}; discarding result");
                return TickRecord {
                    attempted: true,
                    succeeded: false,
                    chosen_target: None,
                    reason: Some("controller stopped".to_string()),
                    outcome: TickOutcome::Discarded,
                    failures,
                    counters: self.counters,
                };
            }

            match result {
                Ok(()) => {
                    self.counters.record(true);
                    let role = if position == 0 { "primary" } else { "fallback" };
                    info!(
                        "attached to {role} target {target} (successes: {})",
                        self.counters.successes
                    );
                    return TickRecord {
                        attempted: true,
                        succeeded: true,
                        chosen_target: Some(target.clone()),
                        reason: None,
                        outcome: TickOutcome::Attached,
                        failures,
                        counters: self.counters,
                    };
                }
                Err(err) => {
                    warn!("attach to {target} failed: {err}");
                    failures.push(TargetFailure {
                        target: target.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        self.counters.record(false);
        error!("all {} target(s) failed this tick", targets.len());
        TickRecord {
            attempted: true,
            succeeded: false,
            chosen_target: None,
            reason: Some(format!("all {} target(s) failed", targets.len())),
            outcome: TickOutcome::Exhausted,
            failures,
            counters: self.counters,
        }
    }
}
