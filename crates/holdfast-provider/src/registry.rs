//! Model of the host's module registry.
//!
//! The host publishes an unstructured set of modules whose shape changes between
//! host releases. Entries keep their insertion order because discovery scans
//! "the first matching value" and the host's own ordering is the tie-break.

use crate::Attach;
use std::fmt;
use std::sync::Arc;

/// Every module the host currently exposes, in host order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    modules: Vec<Module>,
}

impl Registry {
    pub fn new(modules: Vec<Module>) -> Self {
        Self { modules }
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }
}

/// One registry entry: an identifier plus its exported namespace.
#[derive(Debug, Clone)]
pub struct Module {
    pub id: String,
    pub exports: Namespace,
}

impl Module {
    pub fn new(id: impl Into<String>, exports: Namespace) -> Self {
        Self {
            id: id.into(),
            exports,
        }
    }
}

/// Ordered name → value map.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    entries: Vec<(String, HostValue)>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; a repeated name replaces the earlier value in place.
    pub fn with(mut self, name: impl Into<String>, value: HostValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: HostValue) {
        let name = name.into();
        if let Some(slot) = self.entries.iter_mut().find(|(key, _)| *key == name) {
            slot.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&HostValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Follow a path of field names through nested namespaces and class prototypes.
    ///
    /// A class is entered through a literal `prototype` segment; a path that ends
    /// on `prototype` itself resolves to nothing.
    pub fn lookup_path(&self, path: &[&str]) -> Option<&HostValue> {
        let (first, mut remaining) = path.split_first()?;
        let mut current = self.get(first)?;
        while let Some((segment, tail)) = remaining.split_first() {
            current = match current {
                HostValue::Namespace(ns) => {
                    remaining = tail;
                    ns.get(segment)?
                }
                HostValue::Class(class) if *segment == "prototype" => {
                    let (method, after) = tail.split_first()?;
                    remaining = after;
                    class.prototype.get(method)?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HostValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }
}

/// A value found in the registry.
#[derive(Debug, Clone)]
pub enum HostValue {
    Function(HostFunction),
    Namespace(Namespace),
    Class(HostClass),
    /// Anything else the host stores (strings, numbers, flags, plain objects).
    Scalar(serde_json::Value),
}

impl HostValue {
    pub fn is_callable(&self) -> bool {
        matches!(self, HostValue::Function(_))
    }

    pub fn as_function(&self) -> Option<&HostFunction> {
        match self {
            HostValue::Function(func) => Some(func),
            _ => None,
        }
    }
}

/// A callable exported by the host together with its implementation text.
#[derive(Clone)]
pub struct HostFunction {
    name: String,
    source: String,
    callable: Arc<dyn Attach>,
}

impl HostFunction {
    pub fn new(name: impl Into<String>, source: impl Into<String>, callable: Arc<dyn Attach>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            callable,
        }
    }

    /// Name the host reports for the function; may be empty for anonymous functions.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Implementation text, used by heuristic source scans.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn callable(&self) -> Arc<dyn Attach> {
        Arc::clone(&self.callable)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name)
            .field("source_len", &self.source.len())
            .finish_non_exhaustive()
    }
}

/// A class-like export whose methods live on its prototype.
#[derive(Debug, Clone, Default)]
pub struct HostClass {
    pub name: String,
    pub prototype: Namespace,
}

impl HostClass {
    pub fn new(name: impl Into<String>, prototype: Namespace) -> Self {
        Self {
            name: name.into(),
            prototype,
        }
    }
}
