//! Command-backed host: the registry the probe inspects plus the lookups the
//! observer reads.

use crate::command::{
    classify_attach_failure, classify_run_error, lookup_failure, HostCommand, NO_RECORD_EXIT,
};
use async_trait::async_trait;
use holdfast_core::observer::HostStateObserver;
use holdfast_core::probe::{CapabilityProbe, TopLevelField};
use holdfast_core::HoldfastConfig;
use holdfast_provider::{
    ActuatorError, Attach, AttachmentLookup, AttachmentRecord, HostFunction, HostServices,
    HostValue, IdentityLookup, Module, Namespace, ObserverError, Registry, TargetId,
};
use log::{debug, warn};
use std::sync::Arc;

/// Module id the command host registers its exports under.
pub const COMMAND_HOST_MODULE: &str = "holdfast.command-host";

/// Host adapter built from the `[host]` config section.
#[derive(Clone)]
pub struct CommandHost {
    export_name: String,
    attach: Option<HostCommand>,
    identity: Option<Arc<CommandIdentityLookup>>,
    attachments: Option<Arc<CommandAttachmentLookup>>,
}

impl CommandHost {
    pub fn from_config(config: &HoldfastConfig) -> Self {
        let timeout = config.host_timeout();
        let host = &config.host;

        let attach = HostCommand::new(&host.attach_command, timeout);
        if attach.is_none() {
            warn!("[host] attach_command is empty; the registry will export nothing callable");
        }

        let identity = host
            .identity_command
            .as_deref()
            .and_then(|argv| HostCommand::new(argv, timeout))
            .map(|command| Arc::new(CommandIdentityLookup { command }));

        let per_identity = host
            .attachment_command
            .as_deref()
            .and_then(|argv| HostCommand::new(argv, timeout));
        let self_state = host
            .self_state_command
            .as_deref()
            .and_then(|argv| HostCommand::new(argv, timeout));
        let attachments = if per_identity.is_some() || self_state.is_some() {
            Some(Arc::new(CommandAttachmentLookup {
                per_identity,
                self_state,
            }))
        } else {
            None
        };

        Self {
            export_name: host.export_name.clone(),
            attach,
            identity,
            attachments,
        }
    }

    /// Snapshot of the host registry: one module exporting the attach command
    /// under the configured name.
    pub fn registry(&self) -> Registry {
        let mut exports = Namespace::new();
        if let Some(command) = &self.attach {
            let callable = Arc::new(CommandAttach {
                command: command.clone(),
            });
            exports.insert(
                self.export_name.clone(),
                HostValue::Function(HostFunction::new(
                    self.export_name.clone(),
                    command.display(),
                    callable,
                )),
            );
        }
        Registry::new(vec![Module::new(COMMAND_HOST_MODULE, exports)])
    }

    /// Default probe with the configured export name checked first, so a
    /// custom `export_name` is still found.
    pub fn probe(&self) -> CapabilityProbe {
        CapabilityProbe::default().prefer(Box::new(TopLevelField {
            name: self.export_name.clone(),
        }))
    }

    /// Observer that resolves this host's lookups on every tick.
    pub fn observer(&self) -> HostStateObserver {
        HostStateObserver::new(Arc::new(self.clone()))
    }
}

impl HostServices for CommandHost {
    fn identity_lookup(&self) -> Option<Arc<dyn IdentityLookup>> {
        self.identity
            .clone()
            .map(|lookup| lookup as Arc<dyn IdentityLookup>)
    }

    fn attachment_lookup(&self) -> Option<Arc<dyn AttachmentLookup>> {
        self.attachments
            .clone()
            .map(|lookup| lookup as Arc<dyn AttachmentLookup>)
    }
}

struct CommandAttach {
    command: HostCommand,
}

#[async_trait]
impl Attach for CommandAttach {
    async fn attach(&self, target: &TargetId) -> Result<(), ActuatorError> {
        let out = self
            .command
            .run(&[("target", target.as_str())])
            .await
            .map_err(|err| classify_run_error(target, err))?;
        if out.status == 0 {
            debug!("attach command accepted {target}");
            return Ok(());
        }
        Err(classify_attach_failure(target, &out))
    }
}

struct CommandIdentityLookup {
    command: HostCommand,
}

#[async_trait]
impl IdentityLookup for CommandIdentityLookup {
    async fn current_identity(&self) -> Result<Option<String>, ObserverError> {
        let out = self
            .command
            .run(&[])
            .await
            .map_err(|err| ObserverError::Unavailable(err.to_string()))?;
        if out.status != 0 {
            return Err(lookup_failure("identity command", &out));
        }
        Ok(out.first_line().map(str::to_string))
    }
}

/// Exit 0 with a line means attached, exit 0 with no output means detached,
/// exit [`NO_RECORD_EXIT`] means the host keeps no record.
struct CommandAttachmentLookup {
    per_identity: Option<HostCommand>,
    self_state: Option<HostCommand>,
}

impl CommandAttachmentLookup {
    async fn query(
        command: &HostCommand,
        substitutions: &[(&str, &str)],
        what: &str,
    ) -> Result<Option<AttachmentRecord>, ObserverError> {
        let out = command
            .run(substitutions)
            .await
            .map_err(|err| ObserverError::Unavailable(err.to_string()))?;
        match out.status {
            0 => Ok(Some(match out.first_line() {
                Some(channel) => AttachmentRecord::attached(channel),
                None => AttachmentRecord::detached(),
            })),
            NO_RECORD_EXIT => Ok(None),
            _ => Err(lookup_failure(what, &out)),
        }
    }
}

#[async_trait]
impl AttachmentLookup for CommandAttachmentLookup {
    async fn attachment_for(
        &self,
        identity: &str,
    ) -> Result<Option<AttachmentRecord>, ObserverError> {
        match &self.per_identity {
            Some(command) => {
                Self::query(command, &[("identity", identity)], "attachment command").await
            }
            None => Ok(None),
        }
    }

    async fn self_attachment(&self) -> Result<Option<AttachmentRecord>, ObserverError> {
        match &self.self_state {
            Some(command) => Self::query(command, &[], "self-state command").await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdfast_core::{AttachmentState, StateObserver};

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    fn config_with(attach: Vec<String>) -> HoldfastConfig {
        let mut config = HoldfastConfig::default();
        config.host.attach_command = attach;
        config.host.timeout_secs = 5;
        config
    }

    #[test]
    fn registry_exports_the_attach_command_under_the_configured_name() {
        let mut config = config_with(vec!["host-ctl".into(), "join".into(), "{target}".into()]);
        config.host.export_name = "joinVoiceChannel".into();
        let registry = CommandHost::from_config(&config).registry();

        let module = &registry.modules()[0];
        assert_eq!(module.id, COMMAND_HOST_MODULE);
        let func = module
            .exports
            .get("joinVoiceChannel")
            .and_then(HostValue::as_function)
            .expect("exported function");
        assert_eq!(func.source(), "host-ctl join {target}");
    }

    #[test]
    fn empty_attach_command_exports_nothing() {
        let registry = CommandHost::from_config(&config_with(Vec::new())).registry();
        assert_eq!(registry.modules()[0].exports.iter().count(), 0);
        assert!(CapabilityProbe::default().discover(&registry).is_none());
    }

    #[tokio::test]
    async fn probe_finds_the_command_and_attach_classifies_failures() {
        let mut argv = sh(
            "case \"$0\" in good) exit 0 ;; busy) echo 'try again later' >&2; exit 1 ;; *) echo 'Unknown Channel' >&2; exit 1 ;; esac",
        );
        argv.push("{target}".into());
        let config = config_with(argv);

        let actuator = CapabilityProbe::default()
            .discover(&CommandHost::from_config(&config).registry())
            .expect("attach command discovered");
        assert_eq!(actuator.module_id(), COMMAND_HOST_MODULE);
        assert_eq!(actuator.export_path(), "selectVoiceChannel");

        assert!(actuator.attach(&TargetId::from("good")).await.is_ok());
        assert!(matches!(
            actuator.attach(&TargetId::from("busy")).await,
            Err(ActuatorError::Transient(_))
        ));
        assert!(matches!(
            actuator.attach(&TargetId::from("gone")).await,
            Err(ActuatorError::InvalidTarget(_))
        ));
    }

    #[test]
    fn custom_export_name_is_found_by_the_host_probe() {
        let mut config = config_with(sh("true"));
        config.host.export_name = "hopTo".into();
        let host = CommandHost::from_config(&config);
        let registry = host.registry();

        assert!(CapabilityProbe::default().discover(&registry).is_none());
        let actuator = host.probe().discover(&registry).expect("custom export found");
        assert_eq!(actuator.export_path(), "hopTo");
        assert_eq!(actuator.shape(), "field `hopTo`");
    }

    #[tokio::test]
    async fn observer_is_unavailable_without_lookups() {
        let host = CommandHost::from_config(&config_with(sh("true")));
        assert!(matches!(
            host.observer().current_attachment().await,
            Err(ObserverError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn observer_reads_per_identity_attachment() {
        let mut config = config_with(sh("true"));
        config.host.identity_command = Some(sh("echo alice"));
        config.host.attachment_command = Some({
            let mut argv = sh("test \"$0\" = alice && echo 1469136426250801152");
            argv.push("{identity}".into());
            argv
        });
        let host = CommandHost::from_config(&config);

        assert_eq!(
            host.observer().current_attachment().await.unwrap(),
            AttachmentState::attached("1469136426250801152")
        );
    }

    #[tokio::test]
    async fn missing_record_falls_back_to_self_state() {
        let mut config = config_with(sh("true"));
        config.host.identity_command = Some(sh("echo alice"));
        config.host.attachment_command = Some(sh("exit 3"));
        config.host.self_state_command = Some(sh("echo lobby"));
        let host = CommandHost::from_config(&config);

        assert_eq!(
            host.observer().current_attachment().await.unwrap(),
            AttachmentState::attached("lobby")
        );
    }

    #[tokio::test]
    async fn empty_attachment_output_means_detached() {
        let mut config = config_with(sh("true"));
        config.host.identity_command = Some(sh("echo alice"));
        config.host.attachment_command = Some(sh("true"));
        config.host.self_state_command = Some(sh("echo lobby"));
        let host = CommandHost::from_config(&config);

        assert_eq!(
            host.observer().current_attachment().await.unwrap(),
            AttachmentState::detached()
        );
    }

    #[tokio::test]
    async fn signed_out_identity_is_unavailable() {
        let mut config = config_with(sh("true"));
        config.host.identity_command = Some(sh("true"));
        config.host.self_state_command = Some(sh("echo lobby"));
        let host = CommandHost::from_config(&config);

        assert!(matches!(
            host.observer().current_attachment().await,
            Err(ObserverError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn failing_lookup_is_a_lookup_error() {
        let mut config = config_with(sh("true"));
        config.host.identity_command = Some(sh("echo alice"));
        config.host.attachment_command = Some(sh("echo 'service down' >&2; exit 9"));
        let host = CommandHost::from_config(&config);

        match host.observer().current_attachment().await {
            Err(ObserverError::Lookup(message)) => {
                assert!(message.contains("service down"));
                assert!(message.contains("exit code 9"));
            }
            other => panic!("unexpected observation: {other:?}"),
        }
    }
}
