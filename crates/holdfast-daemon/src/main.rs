//! Background daemon that keeps the client attached to its configured targets.

use anyhow::{Context, Result};
use holdfast_core::{
    logging, Controller, FileStateStore, HoldfastConfig, TickOutcome, TickRecord,
};
use holdfast_host::CommandHost;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{select, signal, sync::broadcast};

mod control;
mod toggle;

use toggle::ToggleGate;

/// Entry point for the Tokio runtime; logs failures before exit.
#[tokio::main(flavor = "multi_thread")]
async fn main() {
    if let Err(err) = run().await {
        error!("daemon exit: {err:?}");
        std::process::exit(1);
    }
}

/// Load configuration, start the controller and its triggers, then wait for shutdown.
async fn run() -> Result<()> {
    logging::init("info");
    let config_path = HoldfastConfig::resolve_path();
    let config = HoldfastConfig::load_or_bootstrap(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;

    if config.path != config_path {
        warn!(
            "configuration missing at {}; using bootstrap at {}",
            config_path.display(),
            config.path.display()
        );
    }
    for issue in config.validate() {
        warn!("config: {issue}");
    }

    info!("Holdfast daemon booting (config: {})", config.path.display());

    let host = CommandHost::from_config(&config);
    let state_dir = config.state_dir();
    info!("persisting controller state under {}", state_dir.display());

    let controller = Controller::start(
        &config.controller,
        Arc::new(FileStateStore::new(state_dir)),
        Arc::new(host.observer()),
        &host.probe(),
        &host.registry(),
    );
    let handle = controller.handle();
    let gate = ToggleGate::new(config.debounce_window());

    let addr: SocketAddr = config
        .control
        .listen_addr
        .parse()
        .with_context(|| format!("parse [control] listen_addr `{}`", config.control.listen_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind control socket {addr}"))?;
    info!("control socket listening on {addr}");

    let report_handle = tokio::spawn(report_ticks(handle.subscribe()));
    let signal_handle = tokio::spawn(toggle::watch_signal(handle.clone(), gate.clone()));
    let control_handle = tokio::spawn(control::serve(listener, handle, gate));

    select! {
        res = control_handle => res??,
        res = signal_handle => res??,
        _ = signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    report_handle.abort();
    controller.stop().await;
    info!("Holdfast daemon stopped");
    Ok(())
}

/// Keep a running tally in the log; per-target detail is logged by the loop itself.
async fn report_ticks(mut records: broadcast::Receiver<TickRecord>) {
    loop {
        match records.recv().await {
            Ok(record) => {
                let counters = record.counters;
                match record.outcome {
                    TickOutcome::Attached => info!(
                        "holding {} ({} of {} attach calls succeeded)",
                        record
                            .chosen_target
                            .as_ref()
                            .map(ToString::to_string)
                            .unwrap_or_default(),
                        counters.successes,
                        counters.attempts
                    ),
                    TickOutcome::Exhausted => warn!(
                        "no target accepted the attach ({} of {} attach calls succeeded)",
                        counters.successes, counters.attempts
                    ),
                    other => debug!(
                        "tick: {other:?} ({})",
                        record.reason.as_deref().unwrap_or("no reason given")
                    ),
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("tick reporter fell behind; {missed} records skipped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
