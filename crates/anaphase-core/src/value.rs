//! Tagged parameter values and their partial ordering.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Path segment marking an unnamed or locally defined callable.
pub const CLOSURE_MARKER: &str = "{closure}";

/// A parameter value, classified once at construction.
///
/// Each value carries its classification in the tag: scalar, ordered
/// sequence, unordered collection, mapping or callable. The canonical
/// formatter dispatches on the tag instead of re-inspecting the value at
/// every recursion step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    /// Absent value, rendered `None`.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// Floating point scalar.
    Float(f64),
    /// String scalar, rendered quoted to disambiguate from bare scalars.
    Str(String),
    /// Ordered sequence.
    List(Vec<ParamValue>),
    /// Unordered collection; insertion order is not semantically meaningful.
    Set(Vec<ParamValue>),
    /// Mapping; insertion order is not semantically meaningful.
    Map(Vec<(ParamValue, ParamValue)>),
    /// Reference to a callable.
    Func(FuncRef),
}

impl ParamValue {
    /// Compares two values where a stable order exists.
    ///
    /// Scalars of like kind compare naturally and numbers cross-compare as
    /// floats. Containers, callables and mixed kinds have no stable order
    /// and return `None`; the formatter falls back to insertion order.
    pub fn try_cmp(&self, other: &ParamValue) -> Option<Ordering> {
        use ParamValue::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
            (Str(a), Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Converts the value into plain JSON for handing to experiment steps.
    ///
    /// Callables are passed as their rendered path string; the identity
    /// layer has already validated them by the time a program runs.
    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::Null => Value::Null,
            ParamValue::Bool(b) => Value::Bool(*b),
            ParamValue::Int(i) => Value::Number((*i).into()),
            ParamValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            ParamValue::Str(s) => Value::String(s.clone()),
            ParamValue::List(items) | ParamValue::Set(items) => {
                Value::Array(items.iter().map(ParamValue::to_json).collect())
            }
            ParamValue::Map(entries) => {
                let mut map = serde_json::Map::new();
                for (key, value) in entries {
                    let key = match key {
                        ParamValue::Str(s) => s.clone(),
                        other => other.to_json().to_string(),
                    };
                    map.insert(key, value.to_json());
                }
                Value::Object(map)
            }
            ParamValue::Func(f) => Value::String(f.path()),
        }
    }
}

impl From<BTreeMap<String, ParamValue>> for ParamValue {
    fn from(map: BTreeMap<String, ParamValue>) -> Self {
        ParamValue::Map(
            map.into_iter()
                .map(|(k, v)| (ParamValue::Str(k), v))
                .collect(),
        )
    }
}

/// Reference to a callable by declaring module and qualified name.
///
/// `token` is the identity of the underlying object. The validator checks
/// that resolving `qual_name` inside `module` yields the same token, which
/// guards against re-definitions and proxies shadowing the original.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuncRef {
    module: String,
    qual_name: String,
    token: u64,
}

impl FuncRef {
    /// Creates a reference to a named callable.
    pub fn new(module: impl Into<String>, qual_name: impl Into<String>, token: u64) -> Self {
        Self {
            module: module.into(),
            qual_name: qual_name.into(),
            token,
        }
    }

    /// Creates a reference to an anonymous callable.
    ///
    /// Anonymous callables can never be canonicalized; the reference exists
    /// so the formatter can name the failure precisely.
    pub fn anonymous(module: impl Into<String>, token: u64) -> Self {
        Self {
            module: module.into(),
            qual_name: CLOSURE_MARKER.to_string(),
            token,
        }
    }

    /// Declaring module name.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Qualified name inside the declaring module.
    pub fn qual_name(&self) -> &str {
        &self.qual_name
    }

    /// Identity token of the referenced object.
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Full dotted path, `module.qual_name`.
    pub fn path(&self) -> String {
        format!("{}.{}", self.module, self.qual_name)
    }

    /// Registry key used by in-process environments, `module:qual_name`.
    pub fn registry_key(&self) -> String {
        format!("{}:{}", self.module, self.qual_name)
    }

    /// True when the callable has no name of its own.
    pub fn is_anonymous(&self) -> bool {
        self.qual_name.is_empty()
            || self.qual_name.split("::").last() == Some(CLOSURE_MARKER)
    }

    /// True when the callable is named but defined inside a nested scope.
    pub fn in_local_scope(&self) -> bool {
        !self.is_anonymous()
            && self
                .qual_name
                .split("::")
                .any(|segment| segment == CLOSURE_MARKER)
    }
}

/// Table of loaded modules the callable validator resolves against.
///
/// Maps module name to the qualified names it exports and their identity
/// tokens. The entry module, if set, names the process entry point; names
/// declared there are not importable from anywhere else and are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleIndex {
    entry_module: Option<String>,
    modules: BTreeMap<String, BTreeMap<String, u64>>,
}

impl ModuleIndex {
    /// Creates an empty index with no entry module.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name of the process entry module.
    pub fn set_entry_module(&mut self, name: impl Into<String>) {
        self.entry_module = Some(name.into());
    }

    /// Name of the entry module, if any.
    pub fn entry_module(&self) -> Option<&str> {
        self.entry_module.as_deref()
    }

    /// Records a qualified name exported by a module.
    pub fn insert(
        &mut self,
        module: impl Into<String>,
        qual_name: impl Into<String>,
        token: u64,
    ) {
        self.modules
            .entry(module.into())
            .or_default()
            .insert(qual_name.into(), token);
    }

    /// Records a callable reference under its own module and name.
    pub fn register(&mut self, func: &FuncRef) {
        self.insert(func.module(), func.qual_name(), func.token());
    }

    /// True when the named module is loaded.
    pub fn has_module(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }

    /// Resolves a qualified name inside a module to its identity token.
    pub fn resolve(&self, module: &str, qual_name: &str) -> Option<u64> {
        self.modules.get(module)?.get(qual_name).copied()
    }
}
