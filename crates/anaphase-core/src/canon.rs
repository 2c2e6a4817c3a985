//! Canonical, deterministic stringification of parameter values.
//!
//! Two values that are semantically equal must canonicalize to the same
//! bytes across runs and processes: mappings and unordered collections are
//! order-normalized before rendering, and callables are only rendered when
//! they can be resolved back to the identical object through their
//! declaring module. Everything else in the trial identity system is built
//! on this invariant.

use std::fmt::Write as _;

use crate::errors::{AnaphaseError, ErrorInfo};
use crate::value::{FuncRef, ModuleIndex, ParamValue};

/// Why a callable reference cannot be reproducibly named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncRejection {
    /// The callable has no name of its own.
    Anonymous,
    /// The callable is declared in the process entry module.
    EntryPointModule,
    /// The callable is named but defined inside a nested scope.
    LocalScope,
    /// The declaring module is not loaded.
    ModuleNotLoaded,
    /// The qualified name resolves to a different object than the one held.
    NameMismatch,
}

impl FuncRejection {
    /// Short label used in error context.
    pub fn label(&self) -> &'static str {
        match self {
            FuncRejection::Anonymous => "anonymous",
            FuncRejection::EntryPointModule => "entry_point_module",
            FuncRejection::LocalScope => "local_scope",
            FuncRejection::ModuleNotLoaded => "module_not_loaded",
            FuncRejection::NameMismatch => "name_mismatch",
        }
    }
}

/// Checks that a callable is reachable as `module.qual_name` and resolves
/// back to the identical object.
pub fn validate_func(func: &FuncRef, index: &ModuleIndex) -> Result<(), FuncRejection> {
    if func.is_anonymous() {
        return Err(FuncRejection::Anonymous);
    }
    if index.entry_module() == Some(func.module()) {
        return Err(FuncRejection::EntryPointModule);
    }
    if func.in_local_scope() {
        return Err(FuncRejection::LocalScope);
    }
    if !index.has_module(func.module()) {
        return Err(FuncRejection::ModuleNotLoaded);
    }
    match index.resolve(func.module(), func.qual_name()) {
        Some(token) if token == func.token() => Ok(()),
        _ => Err(FuncRejection::NameMismatch),
    }
}

/// Converts a value into its canonical string form.
///
/// Fails with [`AnaphaseError::Unreproducible`] when the value contains a
/// callable that cannot be reproducibly named. There is no fallback
/// rendering: an unstable string would silently corrupt trial identity.
pub fn canonicalize(value: &ParamValue, index: &ModuleIndex) -> Result<String, AnaphaseError> {
    match value {
        ParamValue::Null => Ok("None".to_string()),
        ParamValue::Bool(b) => Ok(b.to_string()),
        ParamValue::Int(i) => Ok(i.to_string()),
        ParamValue::Float(f) => Ok(render_float(*f)),
        ParamValue::Str(s) => Ok(format!("'{s}'")),
        // Sequences and unordered collections normalize to the same sorted
        // rendering: a set and a list holding the same values are the same
        // choice of parameter.
        ParamValue::List(items) | ParamValue::Set(items) => {
            let ordered = sorted_or_insertion(items);
            let mut out = String::from("[");
            for (idx, item) in ordered.iter().enumerate() {
                if idx > 0 {
                    out.push_str(", ");
                }
                out.push_str(&canonicalize(item, index)?);
            }
            out.push(']');
            Ok(out)
        }
        ParamValue::Map(entries) => {
            let mut rendered = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                rendered.push((canonicalize(key, index)?, canonicalize(value, index)?));
            }
            rendered.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = String::from("{");
            for (idx, (key, value)) in rendered.iter().enumerate() {
                if idx > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{key}: {value}");
            }
            out.push('}');
            Ok(out)
        }
        ParamValue::Func(func) => match validate_func(func, index) {
            Ok(()) => Ok(format!("<function {}>", func.path())),
            Err(reason) => Err(unreproducible(func, reason)),
        },
    }
}

/// Floats always render with a decimal point so `1.0` and the integer `1`
/// never share a canonical string.
fn render_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// Sorts elements where a stable order exists; otherwise keeps insertion
/// order so unorderable collections still canonicalize stably for
/// identical construction order.
///
/// Comparability under [`ParamValue::try_cmp`] partitions values into
/// classes, so checking adjacent pairs is enough to know the whole slice
/// is mutually comparable.
fn sorted_or_insertion(items: &[ParamValue]) -> Vec<&ParamValue> {
    let comparable = items.windows(2).all(|pair| pair[0].try_cmp(&pair[1]).is_some());
    let mut ordered: Vec<&ParamValue> = items.iter().collect();
    if comparable {
        ordered.sort_by(|a, b| a.try_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    }
    ordered
}

fn unreproducible(func: &FuncRef, reason: FuncRejection) -> AnaphaseError {
    let code = match reason {
        FuncRejection::Anonymous => "canon.anonymous_func",
        _ => "canon.unimportable_func",
    };
    AnaphaseError::Unreproducible(
        ErrorInfo::new(
            code,
            format!(
                "callable {} cannot be reproducibly named ({})",
                func.path(),
                reason.label()
            ),
        )
        .with_context("module", func.module())
        .with_context("qual_name", func.qual_name())
        .with_hint("stored callables must be importable as module.qual_name"),
    )
}
