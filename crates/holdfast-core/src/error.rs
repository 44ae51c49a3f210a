//! Error type shared by Holdfast library code.

use thiserror::Error;

pub type HoldfastResult<T> = Result<T, HoldfastError>;

#[derive(Debug, Error)]
pub enum HoldfastError {
    /// A configuration or settings change that must not take effect.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("failed to render TOML: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("failed to process YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to process JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The controller's driver task has exited.
    #[error("controller stopped")]
    ControllerStopped,
}
