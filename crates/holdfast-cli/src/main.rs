//! Holdfast command-line interface for inspecting and steering the daemon.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use holdfast_core::{
    config::{bootstrap_template_with, validate_interval_ms, DEFAULT_CONFIG_PATH},
    logging, ControlRequest, ControlResponse, ControllerStatus, FileStateStore,
    HoldfastConfig, PersistedState, StateStore, TargetList,
};
use holdfast_host::CommandHost;
use schemars::schema_for;
use serde_json::to_string_pretty;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

mod client;

use client::ControlClient;

fn load_cli_config(path: &Path) -> Result<HoldfastConfig> {
    let config = HoldfastConfig::load_or_bootstrap(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;

    if config.path != path {
        println!(
            "Using bootstrap configuration at {} (override HOLDFAST_CONFIG to replace).",
            config.path.display()
        );
    }

    Ok(config)
}

/// Top-level command-line options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "holdfast",
    version,
    about = "Keep a client attached to its configured targets."
)]
struct Cli {
    /// Path to the Holdfast configuration file (defaults to $HOLDFAST_CONFIG, then /etc/holdfast.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control socket address; overrides [control] listen_addr.
    #[arg(long)]
    addr: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show lock state, targets, counters and the last tick.
    Status,

    /// Flip the lock on the running daemon.
    Toggle,

    /// Show or change the target list and tick interval.
    ///
    /// Changes go to the running daemon; when it is unreachable the persisted
    /// state is edited directly and picked up on next start.
    Settings {
        /// Ordered target list, primary first (comma separated).
        #[arg(long, value_delimiter = ',', num_args = 1..)]
        targets: Option<Vec<String>>,

        /// Tick interval in milliseconds (minimum 3000).
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Run attach-function discovery against the configured host and report the match.
    Probe,

    /// Write a bootstrap configuration file.
    Init {
        /// Targets to pre-populate, primary first (comma separated).
        #[arg(long, value_delimiter = ',', num_args = 0..)]
        targets: Vec<String>,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Validate a configuration file or emit the config schema.
    Validate {
        /// Path to the configuration file to validate.
        #[arg(short = 'f', long, default_value = DEFAULT_CONFIG_PATH)]
        file: PathBuf,

        /// Output the JSON schema instead of validating a file.
        #[arg(long)]
        schema: bool,
    },
}

/// Entry point: parse arguments and surface errors with an exit code.
fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    logging::init("warn");
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(HoldfastConfig::resolve_path);

    match cli.command {
        Commands::Status => {
            let config = load_cli_config(&config_path)?;
            let mut client = connect(&config, cli.addr.as_deref())?;
            match client.send(&ControlRequest::Status)? {
                ControlResponse::Status { status } => print_status(&status),
                other => bail!(unexpected(other)),
            }
        }
        Commands::Toggle => {
            let config = load_cli_config(&config_path)?;
            let mut client = connect(&config, cli.addr.as_deref())?;
            match client.send(&ControlRequest::Toggle)? {
                ControlResponse::Lock { lock } => println!("Controller is now {lock}."),
                ControlResponse::Ignored { reason } => println!("Toggle ignored: {reason}."),
                other => bail!(unexpected(other)),
            }
        }
        Commands::Settings {
            targets,
            interval_ms,
        } => {
            let config = load_cli_config(&config_path)?;
            if targets.is_none() && interval_ms.is_none() {
                println!("No settings were changed. Use --targets or --interval-ms to update values.");
                match control_addr(&config, cli.addr.as_deref())
                    .ok()
                    .and_then(|addr| ControlClient::connect(addr).ok())
                {
                    Some(mut client) => match client.send(&ControlRequest::Status)? {
                        ControlResponse::Status { status } => print_status(&status),
                        other => bail!(unexpected(other)),
                    },
                    None => print_persisted(&config, &persisted_state(&config)?),
                }
                return Ok(());
            }

            let online = control_addr(&config, cli.addr.as_deref())
                .ok()
                .and_then(|addr| ControlClient::connect(addr).ok());
            match online {
                Some(mut client) => apply_online(&mut client, targets, interval_ms)?,
                None => {
                    println!("Daemon not reachable; editing persisted state directly.");
                    let state = apply_offline(&config, targets, interval_ms)?;
                    print_persisted(&config, &state);
                }
            }
        }
        Commands::Probe => {
            let config = load_cli_config(&config_path)?;
            let host = CommandHost::from_config(&config);
            let registry = host.registry();
            let probe = host.probe();
            match probe.discover(&registry) {
                Some(actuator) => {
                    println!("Attach function found");
                    println!("  Shape:  {}", actuator.shape());
                    println!("  Module: {}", actuator.module_id());
                    println!("  Path:   {}", actuator.export_path());
                    if let Some(class) = actuator.bound_to() {
                        println!("  Bound:  {class}");
                    }
                }
                None => {
                    println!("No attach function found. Shapes tried:");
                    for predicate in probe.predicates() {
                        println!("  - {}", predicate.describe());
                    }
                    bail!("attach function unavailable; the daemon would run degraded");
                }
            }
        }
        Commands::Init { targets, force } => {
            if config_path.exists() && !force {
                bail!(
                    "{} already exists; pass --force to overwrite",
                    config_path.display()
                );
            }
            if let Some(parent) = config_path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            fs::write(&config_path, bootstrap_template_with(&targets))
                .with_context(|| format!("write {}", config_path.display()))?;
            println!("Configuration written to {}", config_path.display());
            if targets.is_empty() {
                println!("Tip: set [controller] targets before locking.");
            }
        }
        Commands::Validate { file, schema } => {
            if schema {
                let schema = schema_for!(HoldfastConfig);
                println!("{}", to_string_pretty(&schema)?);
                return Ok(());
            }

            let cfg = HoldfastConfig::load(&file)
                .with_context(|| format!("failed to load configuration from {}", file.display()))?;
            let issues = cfg.validate();
            if issues.is_empty() {
                println!(
                    "Configuration valid ({} targets, interval {} ms).",
                    cfg.controller.targets.len(),
                    cfg.controller.interval_ms
                );
            } else {
                println!("Configuration issues:");
                for issue in &issues {
                    println!("  - {issue}");
                }
                bail!("{} issue(s) found in {}", issues.len(), file.display());
            }
        }
    }

    Ok(())
}

fn control_addr(config: &HoldfastConfig, override_addr: Option<&str>) -> Result<SocketAddr> {
    let raw = override_addr.unwrap_or(&config.control.listen_addr);
    raw.parse()
        .with_context(|| format!("invalid control address `{raw}`"))
}

fn connect(config: &HoldfastConfig, override_addr: Option<&str>) -> Result<ControlClient> {
    let addr = control_addr(config, override_addr)?;
    ControlClient::connect(addr)
        .with_context(|| format!("daemon not reachable at {addr}; is holdfast-daemon running?"))
}

fn unexpected(response: ControlResponse) -> String {
    match response {
        ControlResponse::Error { message } => message,
        other => format!("unexpected response from daemon: {other:?}"),
    }
}

fn apply_online(
    client: &mut ControlClient,
    targets: Option<Vec<String>>,
    interval_ms: Option<u64>,
) -> Result<()> {
    if let Some(targets) = targets {
        match client.send(&ControlRequest::SetTargets { targets })? {
            ControlResponse::Targets { targets } => {
                println!("• Targets updated: {}", targets.join(", "))
            }
            other => bail!(unexpected(other)),
        }
    }
    if let Some(interval_ms) = interval_ms {
        match client.send(&ControlRequest::SetInterval { interval_ms })? {
            ControlResponse::Interval { interval_ms } => {
                println!("• Interval set to {interval_ms} ms")
            }
            other => bail!(unexpected(other)),
        }
    }
    Ok(())
}

fn persisted_state(config: &HoldfastConfig) -> Result<PersistedState> {
    let store = FileStateStore::new(config.state_dir());
    let stored = store.load(&config.controller.identity)?;
    Ok(stored.resolve(&config.controller))
}

/// Validate and write settings straight into the state store.
fn apply_offline(
    config: &HoldfastConfig,
    targets: Option<Vec<String>>,
    interval_ms: Option<u64>,
) -> Result<PersistedState> {
    let mut state = persisted_state(config)?;
    if let Some(targets) = targets {
        state.targets = TargetList::new(&targets)?.to_strings();
    }
    if let Some(interval_ms) = interval_ms {
        validate_interval_ms(interval_ms)?;
        state.interval_ms = interval_ms;
    }

    let store = FileStateStore::new(config.state_dir());
    store.save(&config.controller.identity, &state)?;
    Ok(state)
}

fn print_status(status: &ControllerStatus) {
    println!("Controller {}", status.identity);
    println!("  Lock: {}", status.lock);
    println!("  Interval: {} ms", status.interval_ms);
    println!("  Targets:");
    print_targets(&status.targets);
    println!(
        "  Attach function: {}",
        status
            .actuator
            .as_deref()
            .unwrap_or("not found (degraded)")
    );
    println!(
        "  Attach calls: {} attempted, {} succeeded",
        status.counters.attempts, status.counters.successes
    );
    match &status.last_tick {
        Some(tick) => {
            let chosen = tick
                .chosen_target
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  Last tick: {:?} (attempted: {}, succeeded: {}, target: {chosen})",
                tick.outcome, tick.attempted, tick.succeeded
            );
            if let Some(reason) = &tick.reason {
                println!("    {reason}");
            }
        }
        None => println!("  Last tick: none yet"),
    }
}

fn print_persisted(config: &HoldfastConfig, state: &PersistedState) {
    println!("Persisted settings for {}", config.controller.identity);
    println!("  Locked: {}", state.locked);
    println!("  Interval: {} ms", state.interval_ms);
    println!("  Targets:");
    print_targets(&state.targets);
}

fn print_targets(targets: &[String]) {
    if targets.is_empty() {
        println!("    (none configured)");
        return;
    }
    for (idx, target) in targets.iter().enumerate() {
        if idx == 0 {
            println!("    - {target} (primary)");
        } else {
            println!("    - {target}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdfast_core::config::STATE_DIR_ENV;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn config_in(dir: &Path) -> HoldfastConfig {
        let mut config = HoldfastConfig::default();
        config.controller.identity = "cli-test".into();
        config.controller.targets = vec!["seed".into()];
        config.state.dir = Some(dir.to_string_lossy().into_owned());
        config
    }

    #[test]
    fn settings_accepts_comma_separated_targets() {
        let cli = Cli::try_parse_from([
            "holdfast",
            "settings",
            "--targets",
            "1469136426250801152,1459856756816613548",
            "--interval-ms",
            "5000",
        ])
        .unwrap();
        match cli.command {
            Commands::Settings {
                targets,
                interval_ms,
            } => {
                assert_eq!(
                    targets.unwrap(),
                    vec!["1469136426250801152", "1459856756816613548"]
                );
                assert_eq!(interval_ms, Some(5000));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn offline_settings_write_the_state_store() {
        let _lock = ENV_LOCK.lock().unwrap();
        std::env::remove_var(STATE_DIR_ENV);
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());

        let state = apply_offline(&config, Some(vec!["b".into(), "a".into()]), Some(4_000)).unwrap();
        assert_eq!(state.targets, vec!["b", "a"]);
        assert_eq!(state.interval_ms, 4_000);
        assert!(!state.locked);

        let reloaded = persisted_state(&config).unwrap();
        assert_eq!(reloaded, state);
    }

    #[test]
    fn offline_settings_reject_invalid_values() {
        let _lock = ENV_LOCK.lock().unwrap();
        std::env::remove_var(STATE_DIR_ENV);
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());

        assert!(apply_offline(&config, Some(vec![" ".into()]), None).is_err());
        assert!(apply_offline(&config, None, Some(1_000)).is_err());
        assert_eq!(persisted_state(&config).unwrap().targets, vec!["seed"]);
    }
}
