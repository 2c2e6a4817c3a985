//! Experimental parameters and the master variant key.

use serde::{Deserialize, Serialize};

use crate::value::ParamValue;

/// A module required to reconstruct a parameter value inside the run
/// environment, together with the names it must expose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleBinding {
    /// Module name to load.
    pub module: String,
    /// Names to bind from the module into the run scope.
    #[serde(default)]
    pub names: Vec<String>,
}

impl ModuleBinding {
    /// Creates a binding for a module and the names it provides.
    pub fn new(module: impl Into<String>, names: Vec<String>) -> Self {
        Self {
            module: module.into(),
            names,
        }
    }
}

/// A named experimental input, immutable once constructed.
///
/// `variant` is the human label for this particular choice of value, unique
/// within `arg_name`. Values that cannot be embedded as literals carry the
/// module bindings required to reconstruct them from a serialized payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    variant: String,
    arg_name: String,
    value: ParamValue,
    #[serde(default)]
    modules: Vec<ModuleBinding>,
}

impl Parameter {
    /// Creates a parameter embeddable as a literal.
    pub fn new(
        variant: impl Into<String>,
        arg_name: impl Into<String>,
        value: ParamValue,
    ) -> Self {
        Self {
            variant: variant.into(),
            arg_name: arg_name.into(),
            value,
            modules: Vec::new(),
        }
    }

    /// Creates a parameter whose value must be transferred by payload.
    pub fn with_modules(
        variant: impl Into<String>,
        arg_name: impl Into<String>,
        value: ParamValue,
        modules: Vec<ModuleBinding>,
    ) -> Self {
        Self {
            variant: variant.into(),
            arg_name: arg_name.into(),
            value,
            modules,
        }
    }

    /// Variant id, the short human label for this value.
    pub fn variant(&self) -> &str {
        &self.variant
    }

    /// Argument name the value binds to in the experiment call.
    pub fn arg_name(&self) -> &str {
        &self.arg_name
    }

    /// The value itself.
    pub fn value(&self) -> &ParamValue {
        &self.value
    }

    /// Modules required to reconstruct the value, empty for literals.
    pub fn modules(&self) -> &[ModuleBinding] {
        &self.modules
    }

    /// True when the value must be serialized to a payload file instead of
    /// being embedded directly into the generated run.
    pub fn needs_payload(&self) -> bool {
        !self.modules.is_empty()
    }
}

/// Builds the composite key identifying one exact combination of parameter
/// choices: pairs are sorted lexicographically by argument name and the
/// variant ids joined with `-`.
///
/// Argument names are unique within one run. Should duplicates occur, the
/// sort is stable and duplicates keep their input order; no further order
/// between them is specified.
pub fn master_variant_key(params: &[Parameter]) -> String {
    let mut pairs: Vec<(&str, &str)> = params
        .iter()
        .map(|p| (p.arg_name(), p.variant()))
        .collect();
    pairs.sort_by_key(|(arg, _)| *arg);
    pairs
        .iter()
        .map(|(_, variant)| *variant)
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_sorts_by_argument_name() {
        let params = vec![
            Parameter::new("A", "foo", ParamValue::Int(1)),
            Parameter::new("B", "bar", ParamValue::Int(2)),
        ];
        assert_eq!(master_variant_key(&params), "B-A");
    }

    #[test]
    fn key_ignores_input_ordering() {
        let forward = vec![
            Parameter::new("lo", "alpha", ParamValue::Int(1)),
            Parameter::new("hi", "beta", ParamValue::Int(2)),
        ];
        let reverse: Vec<_> = forward.iter().rev().cloned().collect();
        assert_eq!(master_variant_key(&forward), master_variant_key(&reverse));
        assert_eq!(master_variant_key(&forward), "lo-hi");
    }
}
