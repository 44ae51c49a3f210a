//! Observation of the client's actual attachment.

use async_trait::async_trait;
use holdfast_provider::{HostServices, ObserverError, TargetId};
use serde::Serialize;
use std::sync::Arc;

/// Read-only snapshot of where the client is attached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttachmentState {
    pub attached_to: Option<TargetId>,
}

impl AttachmentState {
    pub fn detached() -> Self {
        Self { attached_to: None }
    }

    pub fn attached(target: impl Into<TargetId>) -> Self {
        Self {
            attached_to: Some(target.into()),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached_to.is_some()
    }
}

#[async_trait]
pub trait StateObserver: Send + Sync {
    /// `Err` means "cannot tell", which is never the same as "detached".
    async fn current_attachment(&self) -> Result<AttachmentState, ObserverError>;
}

/// Observer backed by the host's identity and attachment lookups.
///
/// Services are resolved on every call so a host that finishes initialising
/// after the controller started is picked up on the next tick.
pub struct HostStateObserver {
    services: Arc<dyn HostServices>,
}

impl HostStateObserver {
    pub fn new(services: Arc<dyn HostServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl StateObserver for HostStateObserver {
    async fn current_attachment(&self) -> Result<AttachmentState, ObserverError> {
        let identities = self
            .services
            .identity_lookup()
            .ok_or_else(|| ObserverError::Unavailable("identity lookup not resolvable".into()))?;
        let attachments = self
            .services
            .attachment_lookup()
            .ok_or_else(|| ObserverError::Unavailable("attachment lookup not resolvable".into()))?;

        let identity = identities
            .current_identity()
            .await?
            .ok_or_else(|| ObserverError::Unavailable("no current identity".into()))?;

        let record = match attachments.attachment_for(&identity).await? {
            Some(record) => Some(record),
            None => attachments.self_attachment().await?,
        };

        Ok(AttachmentState {
            attached_to: record.and_then(|r| r.channel),
        })
    }
}
