//! Configuration model and helpers used by Holdfast services.

use crate::error::{HoldfastError, HoldfastResult};
use directories_next::ProjectDirs;
use log::{info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/holdfast.toml";
pub const CONFIG_ENV: &str = "HOLDFAST_CONFIG";
pub const STATE_DIR_ENV: &str = "HOLDFAST_STATE_DIR";
pub const DEFAULT_INTERVAL_MS: u64 = 7_000;
/// Floor that keeps the loop from hammering the host's attachment service.
pub const MIN_INTERVAL_MS: u64 = 3_000;
pub const DEFAULT_DEBOUNCE_MS: u64 = 400;
pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:8797";
pub const DEFAULT_IDENTITY: &str = "holdfast";
pub const DEFAULT_EXPORT_NAME: &str = "selectVoiceChannel";
const BOOTSTRAP_FILE_NAME: &str = "holdfast.toml";
const APP_QUALIFIER: &str = "io";
const APP_ORGANIZATION: &str = "Holdfast";
const APP_NAME: &str = "holdfast";

pub(crate) fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
}

/// Check a tick interval against the enforced minimum.
pub fn validate_interval_ms(interval_ms: u64) -> HoldfastResult<Duration> {
    if interval_ms < MIN_INTERVAL_MS {
        return Err(HoldfastError::ConfigInvalid(format!(
            "interval must be at least {MIN_INTERVAL_MS} ms, got {interval_ms} ms"
        )));
    }
    Ok(Duration::from_millis(interval_ms))
}

fn render_bootstrap_template(targets: Option<&[String]>) -> String {
    let selected = targets
        .map(|list| {
            list.iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let target_list = selected
        .iter()
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "# Auto-generated Holdfast configuration bootstrap.\n# List the primary target first; the rest are fallbacks tried in order.\n\n[controller]\nidentity = \"{DEFAULT_IDENTITY}\"\ntargets = [{target_list}]\ninterval_ms = {DEFAULT_INTERVAL_MS}\n\n[host]\nexport_name = \"{DEFAULT_EXPORT_NAME}\"\n# argv template; {{target}} is replaced with the target id.\nattach_command = []\n# identity_command = [\"host-ctl\", \"whoami\"]\n# attachment_command = [\"host-ctl\", \"voice-state\", \"{{identity}}\"]\n# self_state_command = [\"host-ctl\", \"voice-state\", \"--self\"]\ntimeout_secs = 10\n\n[toggle]\ndebounce_ms = {DEFAULT_DEBOUNCE_MS}\n\n[control]\nlisten_addr = \"{DEFAULT_CONTROL_ADDR}\"\n\n[state]\n# dir = \"/var/lib/holdfast\"\n"
    )
}

pub fn bootstrap_template() -> String {
    render_bootstrap_template(None)
}

pub fn bootstrap_template_with(targets: &[String]) -> String {
    render_bootstrap_template(Some(targets))
}

/// Which targets to hold and how often to check.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ControllerCfg {
    /// Key under which lock state and settings are persisted.
    #[serde(default = "default_identity")]
    pub identity: String,

    /// Primary target first, fallbacks after it. Seeds the persisted settings.
    #[serde(default)]
    pub targets: Vec<String>,

    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_identity() -> String {
    DEFAULT_IDENTITY.to_string()
}

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

impl Default for ControllerCfg {
    fn default() -> Self {
        Self {
            identity: default_identity(),
            targets: Vec::new(),
            interval_ms: default_interval_ms(),
        }
    }
}

/// Commands backing the host integration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HostCfg {
    /// Name the attach command is exported under in the host registry.
    #[serde(default = "default_export_name")]
    pub export_name: String,

    /// argv template; `{target}` is substituted.
    #[serde(default)]
    pub attach_command: Vec<String>,

    /// Prints the current identity on stdout; empty output means none yet.
    #[serde(default)]
    pub identity_command: Option<Vec<String>>,

    /// argv template; `{identity}` is substituted. Prints the attached target id.
    #[serde(default)]
    pub attachment_command: Option<Vec<String>>,

    /// Prints the attached target id of the local client.
    #[serde(default)]
    pub self_state_command: Option<Vec<String>>,

    #[serde(default = "default_host_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_export_name() -> String {
    DEFAULT_EXPORT_NAME.to_string()
}

fn default_host_timeout_secs() -> u64 {
    10
}

impl Default for HostCfg {
    fn default() -> Self {
        Self {
            export_name: default_export_name(),
            attach_command: Vec::new(),
            identity_command: None,
            attachment_command: None,
            self_state_command: None,
            timeout_secs: default_host_timeout_secs(),
        }
    }
}

/// Toggle trigger tuning.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToggleCfg {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

impl Default for ToggleCfg {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Control socket the daemon listens on and the CLI talks to.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ControlCfg {
    #[serde(default = "default_control_addr")]
    pub listen_addr: String,
}

fn default_control_addr() -> String {
    DEFAULT_CONTROL_ADDR.to_string()
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            listen_addr: default_control_addr(),
        }
    }
}

/// Where persisted controller state lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct StateCfg {
    #[serde(default)]
    pub dir: Option<String>,
}

/// Top-level configuration snapshot loaded from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct HoldfastConfig {
    #[serde(default)]
    pub controller: ControllerCfg,

    #[serde(default)]
    pub host: HostCfg,

    #[serde(default)]
    pub toggle: ToggleCfg,

    #[serde(default)]
    pub control: ControlCfg,

    #[serde(default)]
    pub state: StateCfg,

    #[serde(skip)]
    pub path: PathBuf,

    #[serde(skip)]
    pub format: ConfigFormat,
}

/// Tracks whether we parsed TOML or YAML so writes preserve format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigFormat {
    #[default]
    Toml,
    Yaml,
}

impl HoldfastConfig {
    /// Return the canonical system-wide configuration path.
    pub fn default_path() -> &'static Path {
        Path::new(DEFAULT_CONFIG_PATH)
    }

    /// `HOLDFAST_CONFIG` when set, otherwise the system-wide path.
    pub fn resolve_path() -> PathBuf {
        env::var(CONFIG_ENV)
            .ok()
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Resolve the per-user configuration path used for bootstrapping.
    pub fn user_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(BOOTSTRAP_FILE_NAME))
    }

    /// Load configuration from disk, creating a bootstrap copy when missing.
    ///
    /// When the caller asks for the system-wide default and the process cannot
    /// create it, a per-user configuration is written to the platform config
    /// directory instead.
    pub fn load_or_bootstrap<P: AsRef<Path>>(path: P) -> HoldfastResult<Self> {
        let target = path.as_ref();
        if target.exists() {
            return Self::load(target);
        }

        match ensure_bootstrap_file(target) {
            Ok(created) => {
                if created {
                    info!("holdfast config bootstrap created at {}", target.display());
                }
                Self::load(target)
            }
            Err(err) => {
                if target != Self::default_path() {
                    return Err(HoldfastError::ConfigInvalid(format!(
                        "failed to initialise configuration at {}: {err}",
                        target.display()
                    )));
                }

                let user_path = Self::user_config_path().ok_or_else(|| {
                    HoldfastError::ConfigInvalid(
                        "unable to determine user configuration directory; \
                        create /etc/holdfast.toml manually"
                            .to_string(),
                    )
                })?;

                let created_user = ensure_bootstrap_file(&user_path).map_err(|io_err| {
                    HoldfastError::ConfigInvalid(format!(
                        "failed to prepare bootstrap configuration at {}: {io_err}",
                        user_path.display()
                    ))
                })?;

                if created_user {
                    info!(
                        "holdfast config bootstrap created at {}",
                        user_path.display()
                    );
                }

                warn!(
                    "configuration missing at {}; using per-user bootstrap at {}",
                    target.display(),
                    user_path.display()
                );

                Self::load(&user_path)
            }
        }
    }

    /// Read a config file from disk and detect its format. Range checks live in [`Self::validate`].
    pub fn load<P: AsRef<Path>>(path: P) -> HoldfastResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let is_toml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some(ext) if ext.eq_ignore_ascii_case("toml")
        );
        let mut cfg = if is_toml {
            toml::from_str::<Self>(&contents)?
        } else {
            serde_yaml::from_str::<Self>(&contents)?
        };

        cfg.path = path.to_path_buf();
        cfg.format = if is_toml {
            ConfigFormat::Toml
        } else {
            ConfigFormat::Yaml
        };

        Ok(cfg)
    }

    /// Perform a best-effort validation pass and return human-readable issues.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.controller.identity.trim().is_empty() {
            issues.push("controller.identity must not be empty".to_string());
        }

        if self.controller.targets.is_empty() {
            issues.push(
                "controller.targets is empty; locking will be refused until a target is set"
                    .to_string(),
            );
        }

        let mut seen = std::collections::HashSet::new();
        for target in &self.controller.targets {
            let trimmed = target.trim();
            if trimmed.is_empty() {
                issues.push("controller.targets contains an empty entry".to_string());
                continue;
            }
            if !seen.insert(trimmed.to_string()) {
                issues.push(format!("duplicate target entry detected: {trimmed}"));
            }
        }

        if self.controller.interval_ms < MIN_INTERVAL_MS {
            issues.push(format!(
                "controller.interval_ms must be at least {MIN_INTERVAL_MS}"
            ));
        }

        if self.host.attach_command.is_empty() {
            issues.push("host.attach_command is empty; no attach capability will be exported".to_string());
        } else if !self.host.attach_command.iter().any(|arg| arg.contains("{target}")) {
            issues.push("host.attach_command never references {target}".to_string());
        }

        if self.host.export_name.trim().is_empty() {
            issues.push("host.export_name must not be empty".to_string());
        }

        if self.host.timeout_secs == 0 {
            issues.push("host.timeout_secs must be greater than 0".to_string());
        }

        if self.control.listen_addr.parse::<SocketAddr>().is_err() {
            issues.push(format!(
                "control.listen_addr is not a socket address: {}",
                self.control.listen_addr
            ));
        }

        issues
    }

    /// Timeout applied to each host command.
    pub fn host_timeout(&self) -> Duration {
        Duration::from_secs(self.host.timeout_secs)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.toggle.debounce_ms)
    }

    /// Resolve where persisted controller state is written.
    ///
    /// `HOLDFAST_STATE_DIR` wins, then `[state] dir`, then the platform data dir.
    pub fn state_dir(&self) -> PathBuf {
        if let Ok(override_dir) = env::var(STATE_DIR_ENV) {
            if !override_dir.is_empty() {
                return PathBuf::from(override_dir);
            }
        }
        if let Some(dir) = self.state.dir.as_deref().filter(|dir| !dir.is_empty()) {
            return PathBuf::from(dir);
        }
        project_dirs()
            .map(|dirs| dirs.data_local_dir().join("state"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/holdfast"))
    }

    /// Persist the configuration back to its original on-disk format.
    pub fn save(&self) -> HoldfastResult<()> {
        let payload = match self.format {
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
            ConfigFormat::Yaml => serde_yaml::to_string(self)?,
        };
        fs::write(&self.path, payload)?;
        Ok(())
    }
}

fn ensure_bootstrap_file(path: &Path) -> io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    match OpenOptions::new().create_new(true).write(true).open(path) {
        Ok(mut file) => {
            let template = bootstrap_template();
            file.write_all(template.as_bytes())?;
            file.flush()?;
            #[cfg(unix)]
            {
                let mode = if path.starts_with("/etc/") {
                    0o640
                } else {
                    0o600
                };
                fs::set_permissions(path, PermissionsExt::from_mode(mode))?;
            }
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        key: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: impl Into<String>) -> Self {
            let prev = env::var(key).ok();
            env::set_var(key, value.into());
            Self { key, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(prev) = &self.prev {
                env::set_var(self.key, prev);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    #[test]
    fn bootstrap_template_round_trips_through_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("holdfast.toml");
        fs::write(
            &path,
            bootstrap_template_with(&["1469136426250801152".into(), " 1459856756816613548 ".into()]),
        )
        .unwrap();

        let cfg = HoldfastConfig::load(&path).expect("template should parse");
        assert_eq!(
            cfg.controller.targets,
            vec!["1469136426250801152", "1459856756816613548"]
        );
        assert_eq!(cfg.controller.interval_ms, DEFAULT_INTERVAL_MS);
        assert_eq!(cfg.host.export_name, DEFAULT_EXPORT_NAME);
        assert_eq!(cfg.format, ConfigFormat::Toml);
        assert_eq!(cfg.path, path);
    }

    #[test]
    fn load_or_bootstrap_creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("holdfast.toml");

        let cfg = HoldfastConfig::load_or_bootstrap(&path).expect("bootstrap");
        assert!(path.exists());
        assert!(cfg.controller.targets.is_empty());
        #[cfg(unix)]
        {
            let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn low_interval_loads_and_is_reported_by_validate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("holdfast.toml");
        fs::write(&path, "[controller]\ntargets = [\"a\"]\ninterval_ms = 1000\n").unwrap();

        let cfg = HoldfastConfig::load(&path).unwrap();
        assert_eq!(cfg.controller.interval_ms, 1_000);
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|issue| issue.contains("interval_ms") && issue.contains("3000")));
    }

    #[test]
    fn yaml_configs_keep_their_format_on_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("holdfast.yaml");
        fs::write(&path, "controller:\n  targets: [a, b]\n").unwrap();

        let mut cfg = HoldfastConfig::load(&path).unwrap();
        assert_eq!(cfg.format, ConfigFormat::Yaml);
        cfg.controller.targets.push("c".into());
        cfg.save().unwrap();

        let reloaded = HoldfastConfig::load(&path).unwrap();
        assert_eq!(reloaded.controller.targets, vec!["a", "b", "c"]);
    }

    #[test]
    fn validate_reports_common_mistakes() {
        let mut cfg = HoldfastConfig::default();
        cfg.controller.targets = vec!["a".into(), "a".into(), " ".into()];
        cfg.controller.interval_ms = 500;
        cfg.host.attach_command = vec!["host-ctl".into(), "join".into()];
        cfg.host.timeout_secs = 0;
        cfg.control.listen_addr = "localhost".into();

        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.contains("duplicate target")));
        assert!(issues.iter().any(|i| i.contains("empty entry")));
        assert!(issues.iter().any(|i| i.contains("interval_ms")));
        assert!(issues.iter().any(|i| i.contains("{target}")));
        assert!(issues.iter().any(|i| i.contains("timeout_secs")));
        assert!(issues.iter().any(|i| i.contains("listen_addr")));
    }

    #[test]
    fn validate_accepts_a_complete_config() {
        let mut cfg = HoldfastConfig::default();
        cfg.controller.targets = vec!["a".into()];
        cfg.host.attach_command = vec!["host-ctl".into(), "join".into(), "{target}".into()];
        assert!(cfg.validate().is_empty(), "{:?}", cfg.validate());
    }

    #[test]
    fn state_dir_respects_env_override() {
        let _lock = ENV_LOCK.lock().unwrap();
        let mut cfg = HoldfastConfig::default();
        cfg.state.dir = Some("/srv/holdfast".into());

        let guard = EnvGuard::set(STATE_DIR_ENV, "/tmp/holdfast-state");
        assert_eq!(cfg.state_dir(), PathBuf::from("/tmp/holdfast-state"));
        drop(guard);
        assert_eq!(cfg.state_dir(), PathBuf::from("/srv/holdfast"));
    }

    #[test]
    fn interval_validation_enforces_floor() {
        assert!(validate_interval_ms(MIN_INTERVAL_MS - 1).is_err());
        assert_eq!(
            validate_interval_ms(MIN_INTERVAL_MS).unwrap(),
            Duration::from_millis(3_000)
        );
    }
}
