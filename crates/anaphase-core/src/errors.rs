//! Structured error types shared across anaphase crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Diagnostic payload carried by every [`AnaphaseError`].
///
/// `code` is a stable dotted identifier (`ledger.iteration_taken`,
/// `canon.anonymous_func`) that callers may match on; everything else is
/// for humans. Context keys are sorted so renderings are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Dotted machine-matchable code, stable across releases.
    pub code: String,
    /// One-line diagnostic.
    pub message: String,
    /// Named details: argument names, variant ids, paths, iterations.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Remediation note, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Builds a payload from a code and a message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Attaches one context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Attaches a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        for (key, value) in &self.context {
            write!(f, "; {key}={value}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " (hint: {hint})")?;
        }
        Ok(())
    }
}

/// Canonical error type for the anaphase trial system.
///
/// The four families map directly onto the failure taxonomy of the run
/// lifecycle: identity errors (`Unreproducible`, `VariantConflict`) occur
/// before any ledger row exists, `Ledger` errors abort a run attempt, and
/// `Execution` errors are recorded in the ledger and then surfaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum AnaphaseError {
    /// A parameter value cannot be canonically stringified.
    #[error("unreproducible value: {0}")]
    Unreproducible(ErrorInfo),
    /// A (argument, variant id) pair was re-registered with a different value.
    #[error("variant conflict: {0}")]
    VariantConflict(ErrorInfo),
    /// The trial ledger is unreachable or rejected a write.
    #[error("ledger error: {0}")]
    Ledger(ErrorInfo),
    /// The experiment code or its run environment failed.
    #[error("execution error: {0}")]
    Execution(ErrorInfo),
}

impl AnaphaseError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            AnaphaseError::Unreproducible(info)
            | AnaphaseError::VariantConflict(info)
            | AnaphaseError::Ledger(info)
            | AnaphaseError::Execution(info) => info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendering_is_code_first_with_sorted_context() {
        let info = ErrorInfo::new("ledger.iteration_taken", "row already exists")
            .with_context("variant", "fast-small")
            .with_context("iteration", "3")
            .with_hint("re-invoke to renumber");
        assert_eq!(
            info.to_string(),
            "[ledger.iteration_taken] row already exists; iteration=3; variant=fast-small \
             (hint: re-invoke to renumber)"
        );
    }

    #[test]
    fn family_wrapper_prefixes_the_payload() {
        let err = AnaphaseError::Ledger(ErrorInfo::new("ledger.unreachable", "no store"));
        assert_eq!(err.to_string(), "ledger error: [ledger.unreachable] no store");
        assert_eq!(err.info().code, "ledger.unreachable");
    }
}
