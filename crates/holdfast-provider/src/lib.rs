#![forbid(unsafe_code)]

//! Host contracts shared across Holdfast.
//!
//! The host application owns the attach function and the identity/attachment
//! stores; Holdfast only sees them through the narrow interfaces declared here.
//! Concrete hosts live in crates such as `holdfast-host`.

pub mod lookup;
pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use lookup::{AttachmentLookup, AttachmentRecord, HostServices, IdentityLookup};
pub use registry::{HostClass, HostFunction, HostValue, Module, Namespace, Registry};

/// Opaque identifier of an attachable resource (a channel, a room, a group).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TargetId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Why a single attach call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActuatorError {
    /// The host refused the request (permissions, full channel, policy).
    #[error("host rejected attach: {0}")]
    Rejected(String),

    /// Something that may work on the next period (timeouts, network).
    #[error("transient attach failure: {0}")]
    Transient(String),

    /// The host does not know the target.
    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

/// Why the current attachment could not be observed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObserverError {
    /// A lookup service is not resolvable yet (host still initialising).
    #[error("lookup service unavailable: {0}")]
    Unavailable(String),

    /// The lookup service exists but the query itself failed.
    #[error("lookup failed: {0}")]
    Lookup(String),
}

/// The capability the reconciliation loop drives: attach the client to `target`.
#[async_trait]
pub trait Attach: Send + Sync {
    async fn attach(&self, target: &TargetId) -> Result<(), ActuatorError>;
}
