//! Capability discovery over the host's module registry.
//!
//! The host never promises where its attach function lives; it has moved between
//! top-level exports, a `default` namespace, class prototypes and anonymous
//! helpers across releases. Each known location is a [`ShapePredicate`] and the
//! probe evaluates them in priority order, so supporting a new host release
//! means adding a predicate, never touching the reconciliation loop.

use holdfast_provider::{ActuatorError, Attach, HostValue, Module, Registry, TargetId};
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;

/// Field names the attach function has been exported under, most specific first.
pub const KNOWN_FIELD_NAMES: &[&str] = &[
    "selectVoiceChannel",
    "joinVoiceChannel",
    "transitionToVoiceChannel",
    "connectToVoiceChannel",
    "selectVoice",
    "joinChannel",
    "join",
];

/// Names probed under the module's `default` namespace.
pub const KNOWN_DEFAULT_NAMES: &[&str] = &["selectVoiceChannel", "joinVoiceChannel"];

/// Identifiers an anonymous attach implementation is expected to mention.
pub const SOURCE_NEEDLES: &[&str] = &["channelId", "voice"];

/// A value a predicate located inside one module.
#[derive(Debug)]
pub struct ShapeHit<'m> {
    pub value: &'m HostValue,
    /// Dotted path of the value inside the module's exports.
    pub path: String,
    /// Class the method is bound to, for prototype methods.
    pub bound_to: Option<String>,
}

/// One plausible way the host exposes the attach function.
pub trait ShapePredicate: Send + Sync {
    /// Short human-readable label used in logs and probe reports.
    fn describe(&self) -> String;

    /// Locate a candidate in `module`; callability is checked by the probe.
    fn extract<'m>(&self, module: &'m Module) -> Option<ShapeHit<'m>>;
}

/// `module.<name>`
#[derive(Debug, Clone)]
pub struct TopLevelField {
    pub name: String,
}

impl ShapePredicate for TopLevelField {
    fn describe(&self) -> String {
        format!("field `{}`", self.name)
    }

    fn extract<'m>(&self, module: &'m Module) -> Option<ShapeHit<'m>> {
        module.exports.get(&self.name).map(|value| ShapeHit {
            value,
            path: self.name.clone(),
            bound_to: None,
        })
    }
}

/// `module.<namespace>.<name>`, e.g. `default.joinVoiceChannel`.
#[derive(Debug, Clone)]
pub struct NestedField {
    pub namespace: String,
    pub name: String,
}

impl ShapePredicate for NestedField {
    fn describe(&self) -> String {
        format!("nested `{}.{}`", self.namespace, self.name)
    }

    fn extract<'m>(&self, module: &'m Module) -> Option<ShapeHit<'m>> {
        let value = module
            .exports
            .lookup_path(&[self.namespace.as_str(), self.name.as_str()])?;
        Some(ShapeHit {
            value,
            path: format!("{}.{}", self.namespace, self.name),
            bound_to: None,
        })
    }
}

/// `module.<export>.prototype.<method>`, bound to the class it came from.
#[derive(Debug, Clone)]
pub struct PrototypeMethod {
    pub export: String,
    pub method: String,
}

impl ShapePredicate for PrototypeMethod {
    fn describe(&self) -> String {
        format!("prototype `{}.prototype.{}`", self.export, self.method)
    }

    fn extract<'m>(&self, module: &'m Module) -> Option<ShapeHit<'m>> {
        let HostValue::Class(class) = module.exports.get(&self.export)? else {
            return None;
        };
        let value = module.exports.lookup_path(&[
            self.export.as_str(),
            "prototype",
            self.method.as_str(),
        ])?;
        Some(ShapeHit {
            value,
            path: format!("{}.prototype.{}", self.export, self.method),
            bound_to: Some(class.name.clone()),
        })
    }
}

/// Any top-level function whose implementation mentions every needle.
#[derive(Debug, Clone)]
pub struct SourceScan {
    pub needles: Vec<String>,
}

impl ShapePredicate for SourceScan {
    fn describe(&self) -> String {
        format!("source scan for {:?}", self.needles)
    }

    fn extract<'m>(&self, module: &'m Module) -> Option<ShapeHit<'m>> {
        module.exports.iter().find_map(|(name, value)| {
            let func = value.as_function()?;
            self.needles
                .iter()
                .all(|needle| func.source().contains(needle.as_str()))
                .then(|| ShapeHit {
                    value,
                    path: name.to_string(),
                    bound_to: None,
                })
        })
    }
}

/// Predicate list in host-history order: exact fields, then `default`, then
/// prototypes, then the source heuristic.
pub fn default_predicates() -> Vec<Box<dyn ShapePredicate>> {
    let mut predicates: Vec<Box<dyn ShapePredicate>> = Vec::new();
    for name in KNOWN_FIELD_NAMES {
        predicates.push(Box::new(TopLevelField {
            name: (*name).to_string(),
        }));
    }
    for name in KNOWN_DEFAULT_NAMES {
        predicates.push(Box::new(NestedField {
            namespace: "default".to_string(),
            name: (*name).to_string(),
        }));
    }
    predicates.push(Box::new(PrototypeMethod {
        export: "default".to_string(),
        method: "joinVoice".to_string(),
    }));
    predicates.push(Box::new(SourceScan {
        needles: SOURCE_NEEDLES.iter().map(|n| n.to_string()).collect(),
    }));
    predicates
}

/// The discovered attach capability, resolved once and never re-inspected.
#[derive(Clone)]
pub struct Actuator {
    shape: String,
    module: String,
    path: String,
    bound_to: Option<String>,
    inner: Arc<dyn Attach>,
}

impl Actuator {
    /// Wrap an attach capability that did not come from a registry scan.
    pub fn direct(label: impl Into<String>, inner: Arc<dyn Attach>) -> Self {
        let label = label.into();
        Self {
            shape: "direct".to_string(),
            module: label.clone(),
            path: label,
            bound_to: None,
            inner,
        }
    }

    pub async fn attach(&self, target: &TargetId) -> Result<(), ActuatorError> {
        self.inner.attach(target).await
    }

    /// Which predicate matched.
    pub fn shape(&self) -> &str {
        &self.shape
    }

    pub fn module_id(&self) -> &str {
        &self.module
    }

    pub fn export_path(&self) -> &str {
        &self.path
    }

    pub fn bound_to(&self) -> Option<&str> {
        self.bound_to.as_deref()
    }

    /// `module:path` plus the binding, for logs and status output.
    pub fn describe(&self) -> String {
        match &self.bound_to {
            Some(class) => format!("{}:{} (bound to {class})", self.module, self.path),
            None => format!("{}:{}", self.module, self.path),
        }
    }
}

impl fmt::Debug for Actuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actuator")
            .field("shape", &self.shape)
            .field("module", &self.module)
            .field("path", &self.path)
            .field("bound_to", &self.bound_to)
            .finish_non_exhaustive()
    }
}

/// Ordered predicate list evaluated against a registry.
pub struct CapabilityProbe {
    predicates: Vec<Box<dyn ShapePredicate>>,
}

impl Default for CapabilityProbe {
    fn default() -> Self {
        Self::new(default_predicates())
    }
}

impl CapabilityProbe {
    pub fn new(predicates: Vec<Box<dyn ShapePredicate>>) -> Self {
        Self { predicates }
    }

    /// Add a predicate ahead of every existing one.
    pub fn prefer(mut self, predicate: Box<dyn ShapePredicate>) -> Self {
        self.predicates.insert(0, predicate);
        self
    }

    pub fn predicates(&self) -> impl Iterator<Item = &dyn ShapePredicate> {
        self.predicates.iter().map(|p| p.as_ref())
    }

    /// Return the first callable matched by the highest-priority predicate.
    ///
    /// `None` is a degraded state rather than an error: the controller keeps
    /// running and reports instead of correcting.
    pub fn discover(&self, registry: &Registry) -> Option<Actuator> {
        for predicate in &self.predicates {
            for module in registry.modules() {
                let Some(hit) = predicate.extract(module) else {
                    continue;
                };
                let HostValue::Function(func) = hit.value else {
                    debug!(
                        "{} matched non-callable {}:{}; skipping",
                        predicate.describe(),
                        module.id,
                        hit.path
                    );
                    continue;
                };

                let actuator = Actuator {
                    shape: predicate.describe(),
                    module: module.id.clone(),
                    path: hit.path,
                    bound_to: hit.bound_to,
                    inner: func.callable(),
                };
                let name = if func.name().is_empty() {
                    "(anonymous)"
                } else {
                    func.name()
                };
                info!(
                    "attach function found via {}: {} [{name}]",
                    actuator.shape(),
                    actuator.describe()
                );
                return Some(actuator);
            }
        }

        warn!(
            "no attach function found in {} module(s); corrections disabled until restart",
            registry.modules().len()
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use holdfast_provider::{HostClass, HostFunction, Namespace};
    use std::sync::Mutex;

    /// Records which export was invoked so tests can tell candidates apart.
    struct Tagged {
        tag: &'static str,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Attach for Tagged {
        async fn attach(&self, target: &TargetId) -> Result<(), ActuatorError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.tag, target));
            Ok(())
        }
    }

    fn func(tag: &'static str, source: &str, calls: &Arc<Mutex<Vec<String>>>) -> HostValue {
        HostValue::Function(HostFunction::new(
            tag,
            source,
            Arc::new(Tagged {
                tag,
                calls: Arc::clone(calls),
            }),
        ))
    }

    fn calls() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn empty_registry_yields_none() {
        assert!(CapabilityProbe::default().discover(&Registry::default()).is_none());
    }

    #[tokio::test]
    async fn top_level_field_wins_over_later_shapes() {
        let log = calls();
        let registry = Registry::new(vec![
            Module::new(
                "scanner",
                Namespace::new().with("anon", func("anon", "e => voice(channelId)", &log)),
            ),
            Module::new(
                "nested",
                Namespace::new().with(
                    "default",
                    HostValue::Namespace(
                        Namespace::new().with("selectVoiceChannel", func("nested", "", &log)),
                    ),
                ),
            ),
            Module::new(
                "actions",
                Namespace::new().with("joinVoiceChannel", func("field", "", &log)),
            ),
        ]);

        let actuator = CapabilityProbe::default().discover(&registry).unwrap();
        assert_eq!(actuator.module_id(), "actions");
        assert_eq!(actuator.export_path(), "joinVoiceChannel");
        actuator.attach(&TargetId::from("t")).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["field:t"]);
    }

    #[test]
    fn field_names_are_tried_in_priority_order() {
        let log = calls();
        let registry = Registry::new(vec![
            Module::new("a", Namespace::new().with("join", func("join", "", &log))),
            Module::new(
                "b",
                Namespace::new().with("selectVoice", func("selectVoice", "", &log)),
            ),
        ]);

        let actuator = CapabilityProbe::default().discover(&registry).unwrap();
        assert_eq!(actuator.export_path(), "selectVoice");
        assert_eq!(actuator.shape(), "field `selectVoice`");
    }

    #[test]
    fn non_callable_match_is_skipped() {
        let log = calls();
        let registry = Registry::new(vec![
            Module::new(
                "flags",
                Namespace::new().with("selectVoiceChannel", HostValue::Scalar(true.into())),
            ),
            Module::new(
                "actions",
                Namespace::new().with("connectToVoiceChannel", func("connect", "", &log)),
            ),
        ]);

        let actuator = CapabilityProbe::default().discover(&registry).unwrap();
        assert_eq!(actuator.module_id(), "actions");
        assert_eq!(actuator.export_path(), "connectToVoiceChannel");
    }

    #[test]
    fn nested_default_namespace_is_found() {
        let log = calls();
        let registry = Registry::new(vec![Module::new(
            "voice",
            Namespace::new().with(
                "default",
                HostValue::Namespace(
                    Namespace::new().with("joinVoiceChannel", func("nested", "", &log)),
                ),
            ),
        )]);

        let actuator = CapabilityProbe::default().discover(&registry).unwrap();
        assert_eq!(actuator.export_path(), "default.joinVoiceChannel");
        assert_eq!(actuator.bound_to(), None);
    }

    #[tokio::test]
    async fn prototype_method_is_bound_to_its_class() {
        let log = calls();
        let registry = Registry::new(vec![Module::new(
            "rtc",
            Namespace::new().with(
                "default",
                HostValue::Class(HostClass::new(
                    "RTCConnection",
                    Namespace::new().with("joinVoice", func("proto", "", &log)),
                )),
            ),
        )]);

        let actuator = CapabilityProbe::default().discover(&registry).unwrap();
        assert_eq!(actuator.export_path(), "default.prototype.joinVoice");
        assert_eq!(actuator.bound_to(), Some("RTCConnection"));
        assert!(actuator.describe().contains("bound to RTCConnection"));
        actuator.attach(&TargetId::from("x")).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["proto:x"]);
    }

    #[test]
    fn source_scan_requires_every_needle() {
        let log = calls();
        let registry = Registry::new(vec![
            Module::new(
                "partial",
                Namespace::new().with("a", func("a", "function(channelId) {}", &log)),
            ),
            Module::new(
                "full",
                Namespace::new()
                    .with("label", HostValue::Scalar("voice channelId".into()))
                    .with("b", func("", "function(channelId) { voice.connect() }", &log)),
            ),
        ]);

        let actuator = CapabilityProbe::default().discover(&registry).unwrap();
        assert_eq!(actuator.module_id(), "full");
        assert_eq!(actuator.export_path(), "b");
    }

    #[test]
    fn registry_without_any_shape_yields_none() {
        let log = calls();
        let registry = Registry::new(vec![Module::new(
            "users",
            Namespace::new()
                .with("getCurrentUser", func("getCurrentUser", "() => user", &log))
                .with("default", HostValue::Namespace(Namespace::new())),
        )]);

        assert!(CapabilityProbe::default().discover(&registry).is_none());
    }

    #[test]
    fn preferred_predicates_run_first() {
        let log = calls();
        let registry = Registry::new(vec![Module::new(
            "actions",
            Namespace::new()
                .with("selectVoiceChannel", func("standard", "", &log))
                .with("hopTo", func("custom", "", &log)),
        )]);

        let probe = CapabilityProbe::default().prefer(Box::new(TopLevelField {
            name: "hopTo".into(),
        }));
        assert_eq!(probe.discover(&registry).unwrap().export_path(), "hopTo");
        assert_eq!(probe.predicates().count(), default_predicates().len() + 1);
    }
}
