//! Identity and attachment lookups exposed by the host.
//!
//! Either service may be missing while the host is still starting; resolution
//! goes through [`HostServices`] on every observation so a late-initialising host
//! is picked up without restarting the controller.

use crate::{ObserverError, TargetId};
use async_trait::async_trait;
use std::sync::Arc;

/// Per-identity attachment record as reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentRecord {
    /// Resource the identity is attached to, if any.
    pub channel: Option<TargetId>,
}

impl AttachmentRecord {
    pub fn attached(channel: impl Into<TargetId>) -> Self {
        Self {
            channel: Some(channel.into()),
        }
    }

    pub fn detached() -> Self {
        Self { channel: None }
    }
}

/// Resolves the identity of the local client.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    /// `Ok(None)` means the host has no signed-in identity yet.
    async fn current_identity(&self) -> Result<Option<String>, ObserverError>;
}

/// Resolves where an identity is currently attached.
#[async_trait]
pub trait AttachmentLookup: Send + Sync {
    /// `Ok(None)` means the host keeps no record for `identity`.
    async fn attachment_for(
        &self,
        identity: &str,
    ) -> Result<Option<AttachmentRecord>, ObserverError>;

    /// Self-state view some hosts expose instead of per-identity records.
    async fn self_attachment(&self) -> Result<Option<AttachmentRecord>, ObserverError> {
        Ok(None)
    }
}

/// Late-bound access to the host's lookup services.
pub trait HostServices: Send + Sync {
    fn identity_lookup(&self) -> Option<Arc<dyn IdentityLookup>>;

    fn attachment_lookup(&self) -> Option<Arc<dyn AttachmentLookup>>;
}
