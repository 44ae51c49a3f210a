//! Core building blocks shared by Holdfast binaries.
//!
//! Discovery, observation, the lock state machine and the reconcile loop live
//! here so the daemon and CLI only deal with host wiring and operator surfaces.

pub mod config;
pub mod control;
pub mod controller;
pub mod error;
pub mod lock;
pub mod logging;
pub mod observer;
pub mod probe;
pub mod reconcile;
pub mod store;
pub mod targets;

pub use config::{ControlCfg, ControllerCfg, HoldfastConfig, HostCfg, StateCfg, ToggleCfg};
pub use control::{ControlRequest, ControlResponse};
pub use controller::{Controller, ControllerHandle, ControllerStatus};
pub use error::{HoldfastError, HoldfastResult};
pub use lock::{LockState, ToggleDebouncer, ToggleEvent};
pub use observer::{AttachmentState, HostStateObserver, StateObserver};
pub use probe::{Actuator, CapabilityProbe, ShapePredicate};
pub use reconcile::{ReconcileCounters, TickOutcome, TickRecord};
pub use store::{FileStateStore, MemoryStateStore, PersistedState, StateStore};
pub use targets::TargetList;
