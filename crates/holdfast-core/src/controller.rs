//! Owned controller: lock state machine plus the timer-driven reconcile loop.
//!
//! A single driver task owns the timer, lock state, targets, actuator and
//! counters. Everything else talks to it through [`ControllerHandle`], so a
//! toggle can never flip the state halfway through a tick and ticks can never
//! overlap: a tick runs to completion before the next command or tick is looked
//! at.

use crate::config::{validate_interval_ms, ControllerCfg, DEFAULT_INTERVAL_MS};
use crate::error::{HoldfastError, HoldfastResult};
use crate::lock::LockState;
use crate::observer::StateObserver;
use crate::probe::{Actuator, CapabilityProbe};
use crate::reconcile::{ReconcileCounters, Reconciler, TickContext, TickRecord};
use crate::store::{PersistedState, StateStore, StoredState};
use crate::targets::TargetList;
use holdfast_provider::Registry;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

const COMMAND_QUEUE: usize = 32;
const RECORD_QUEUE: usize = 64;

/// Point-in-time view of a controller, for status surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub identity: String,
    pub lock: LockState,
    pub targets: Vec<String>,
    pub interval_ms: u64,
    pub counters: ReconcileCounters,
    /// Where the attach function was found; `None` while degraded.
    pub actuator: Option<String>,
    pub last_tick: Option<TickRecord>,
}

enum Command {
    Toggle {
        reply: oneshot::Sender<HoldfastResult<LockState>>,
    },
    SetTargets {
        targets: Vec<String>,
        reply: oneshot::Sender<HoldfastResult<Vec<String>>>,
    },
    SetInterval {
        interval_ms: u64,
        reply: oneshot::Sender<HoldfastResult<Duration>>,
    },
    Status {
        reply: oneshot::Sender<ControllerStatus>,
    },
}

/// Cloneable handle used by toggle triggers, settings editors and status readers.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    records: broadcast::Sender<TickRecord>,
}

impl ControllerHandle {
    /// Flip the lock. Locking with an empty target list fails with `ConfigInvalid`.
    pub async fn toggle(&self) -> HoldfastResult<LockState> {
        self.request(|reply| Command::Toggle { reply }).await?
    }

    /// Replace the target list; an empty list is refused and nothing changes.
    pub async fn set_targets<I, T>(&self, targets: I) -> HoldfastResult<Vec<String>>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let targets: Vec<String> = targets.into_iter().map(Into::into).collect();
        self.request(|reply| Command::SetTargets { targets, reply })
            .await?
    }

    /// Change the period; while locked the timer is re-armed from now.
    pub async fn set_interval_ms(&self, interval_ms: u64) -> HoldfastResult<Duration> {
        self.request(|reply| Command::SetInterval { interval_ms, reply })
            .await?
    }

    pub async fn status(&self) -> HoldfastResult<ControllerStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Receive every tick record from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TickRecord> {
        self.records.subscribe()
    }

    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> HoldfastResult<R> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| HoldfastError::ControllerStopped)?;
        response.await.map_err(|_| HoldfastError::ControllerStopped)
    }
}

/// Running controller. Dropping it stops the loop; [`Controller::stop`] also
/// waits for an in-flight tick to wind down.
pub struct Controller {
    handle: ControllerHandle,
    shutdown: watch::Sender<bool>,
    driver: Option<JoinHandle<()>>,
}

impl Controller {
    /// Probe `registry` once for the attach function, then launch.
    pub fn start(
        cfg: &ControllerCfg,
        store: Arc<dyn StateStore>,
        observer: Arc<dyn StateObserver>,
        probe: &CapabilityProbe,
        registry: &Registry,
    ) -> Self {
        let actuator = probe.discover(registry);
        Self::launch(cfg, store, observer, actuator)
    }

    /// Restore persisted state and spawn the driver. Must run inside a Tokio runtime.
    pub fn launch(
        cfg: &ControllerCfg,
        store: Arc<dyn StateStore>,
        observer: Arc<dyn StateObserver>,
        actuator: Option<Actuator>,
    ) -> Self {
        let identity = cfg.identity.clone();
        let stored = store.load(&identity).unwrap_or_else(|err| {
            warn!("failed to read persisted state for {identity}: {err}; using defaults");
            StoredState::default()
        });
        let restored = stored.resolve(cfg);

        let targets = TargetList::new(&restored.targets).ok();
        let interval = validate_interval_ms(restored.interval_ms).unwrap_or_else(|err| {
            warn!("{err}; falling back to {DEFAULT_INTERVAL_MS} ms");
            Duration::from_millis(DEFAULT_INTERVAL_MS)
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (records, _) = broadcast::channel(RECORD_QUEUE);

        let mut driver = Driver {
            identity,
            store,
            observer,
            actuator,
            lock: LockState::from_locked(restored.locked),
            targets,
            interval,
            ticker: None,
            reconciler: Reconciler::new(),
            last_tick: None,
            records: records.clone(),
            shutdown: shutdown_rx,
        };

        if driver.lock.is_locked() && driver.targets.is_none() {
            warn!(
                "controller {} was locked with no targets; resetting to unlocked",
                driver.identity
            );
            driver.lock = LockState::Unlocked;
            driver.persist();
        }

        info!(
            "controller {} started | lock: {} | attach function: {} | interval: {} ms",
            driver.identity,
            driver.lock,
            driver
                .actuator
                .as_ref()
                .map(Actuator::describe)
                .unwrap_or_else(|| "none".to_string()),
            driver.interval.as_millis()
        );

        let task = tokio::spawn(driver.run(command_rx));

        Self {
            handle: ControllerHandle { commands, records },
            shutdown,
            driver: Some(task),
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    /// Cancel the timer and wait for the driver to exit. An attach call already in
    /// flight completes, but its result is discarded.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(driver) = self.driver.take() {
            if let Err(err) = driver.await {
                warn!("controller driver ended abnormally: {err}");
            }
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

struct Driver {
    identity: String,
    store: Arc<dyn StateStore>,
    observer: Arc<dyn StateObserver>,
    actuator: Option<Actuator>,
    lock: LockState,
    targets: Option<TargetList>,
    interval: Duration,
    ticker: Option<Interval>,
    reconciler: Reconciler,
    last_tick: Option<TickRecord>,
    records: broadcast::Sender<TickRecord>,
    shutdown: watch::Receiver<bool>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        if self.lock.is_locked() {
            self.engage().await;
        }

        loop {
            if self.stop_requested() {
                break;
            }

            tokio::select! {
                biased;

                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = next_tick(&mut self.ticker) => self.tick().await,
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }

        self.ticker = None;
        debug!("controller {} driver exited", self.identity);
    }

    fn stop_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Toggle { reply } => {
                let next = self.lock.toggled();
                if next.is_locked() && self.targets.is_none() {
                    let _ = reply.send(Err(HoldfastError::ConfigInvalid(
                        "target list is empty; refusing to lock".to_string(),
                    )));
                    return;
                }

                self.lock = next;
                self.persist();
                info!("controller {} {}", self.identity, self.lock);
                let _ = reply.send(Ok(next));

                if next.is_locked() {
                    self.engage().await;
                } else {
                    self.ticker = None;
                }
            }
            Command::SetTargets { targets, reply } => match TargetList::new(&targets) {
                Ok(list) => {
                    let applied = list.to_strings();
                    info!("controller {} targets: {}", self.identity, applied.join(", "));
                    self.targets = Some(list);
                    self.persist();
                    let _ = reply.send(Ok(applied));
                }
                Err(err) => {
                    let _ = reply.send(Err(err));
                }
            },
            Command::SetInterval { interval_ms, reply } => match validate_interval_ms(interval_ms) {
                Ok(interval) => {
                    self.interval = interval;
                    self.persist();
                    if self.lock.is_locked() {
                        self.arm();
                    }
                    info!("controller {} interval: {interval_ms} ms", self.identity);
                    let _ = reply.send(Ok(interval));
                }
                Err(err) => {
                    let _ = reply.send(Err(err));
                }
            },
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    /// Immediate tick, then periodic ticks from the moment it finished.
    async fn engage(&mut self) {
        self.tick().await;
        if self.lock.is_locked() && !self.stop_requested() {
            self.arm();
        }
    }

    fn arm(&mut self) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
    }

    async fn tick(&mut self) {
        let shutdown = self.shutdown.clone();
        let record = self
            .reconciler
            .tick(
                TickContext {
                    lock: self.lock,
                    observer: self.observer.as_ref(),
                    actuator: self.actuator.as_ref(),
                    targets: self.targets.as_ref(),
                },
                move || *shutdown.borrow(),
            )
            .await;

        self.last_tick = Some(record.clone());
        let _ = self.records.send(record);
    }

    fn status(&self) -> ControllerStatus {
        ControllerStatus {
            identity: self.identity.clone(),
            lock: self.lock,
            targets: self
                .targets
                .as_ref()
                .map(TargetList::to_strings)
                .unwrap_or_default(),
            interval_ms: duration_ms(self.interval),
            counters: self.reconciler.counters(),
            actuator: self.actuator.as_ref().map(Actuator::describe),
            last_tick: self.last_tick.clone(),
        }
    }

    /// Persistence is best effort: a failed write is logged and the in-memory
    /// state stays authoritative.
    fn persist(&self) {
        let state = PersistedState {
            locked: self.lock.is_locked(),
            targets: self
                .targets
                .as_ref()
                .map(TargetList::to_strings)
                .unwrap_or_default(),
            interval_ms: duration_ms(self.interval),
        };
        if let Err(err) = self.store.save(&self.identity, &state) {
            warn!("failed to persist state for {}: {err}", self.identity);
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
