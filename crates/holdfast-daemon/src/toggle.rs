//! Toggle triggers: `SIGUSR1` and control-socket toggles share one debouncer.

use holdfast_core::control::{dispatch, ControlRequest, ControlResponse};
use holdfast_core::{ControllerHandle, ToggleDebouncer, ToggleEvent};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Shared gate in front of `ControllerHandle::toggle`.
#[derive(Clone)]
pub(crate) struct ToggleGate {
    debouncer: Arc<Mutex<ToggleDebouncer>>,
}

impl ToggleGate {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            debouncer: Arc::new(Mutex::new(ToggleDebouncer::new(window))),
        }
    }

    fn admit(&self, event: ToggleEvent) -> bool {
        self.debouncer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .accept(event, Instant::now())
    }

    /// Forward `event` to the controller unless the debouncer drops it.
    pub(crate) async fn toggle(
        &self,
        handle: &ControllerHandle,
        event: ToggleEvent,
    ) -> ControlResponse {
        if !self.admit(event) {
            return ControlResponse::Ignored {
                reason: "toggle debounced".to_string(),
            };
        }
        dispatch(handle, ControlRequest::Toggle).await
    }
}

/// Toggle the lock on every `SIGUSR1`.
#[cfg(unix)]
pub(crate) async fn watch_signal(handle: ControllerHandle, gate: ToggleGate) -> anyhow::Result<()> {
    use anyhow::Context;
    use tokio::signal::unix::{signal, SignalKind};

    let mut usr1 = signal(SignalKind::user_defined1()).context("install SIGUSR1 handler")?;
    info!("send SIGUSR1 to toggle the lock");

    while usr1.recv().await.is_some() {
        match gate.toggle(&handle, ToggleEvent::press()).await {
            ControlResponse::Lock { lock } => info!("SIGUSR1 toggle: now {lock}"),
            ControlResponse::Ignored { reason } => debug!("SIGUSR1 ignored: {reason}"),
            ControlResponse::Error { message } => warn!("SIGUSR1 toggle refused: {message}"),
            other => debug!("SIGUSR1 toggle: {other:?}"),
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) async fn watch_signal(
    _handle: ControllerHandle,
    _gate: ToggleGate,
) -> anyhow::Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}
