//! Isolated run environments.
//!
//! The orchestrator depends on exactly three things: run the program's
//! blocks in order in a fresh environment rooted at the program's working
//! directory, hand back the text output of the final block, and report
//! distinctly whether any block faulted. Environments are owned by one run
//! for its whole duration and never pooled.

use std::collections::BTreeMap;
use std::fs;
use std::process::Command;

use anaphase_core::errors::{AnaphaseError, ErrorInfo};
use serde_json::Value;

use crate::program::{read_payload, ArgSource, RunProgram};

/// A fault raised by experiment code inside the environment, kept distinct
/// from infrastructure failures of the environment itself.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvFault {
    /// Name of the step (or environment stage) that faulted.
    pub step: String,
    /// Diagnostic message captured from the environment.
    pub message: String,
}

/// What the environment observed: the text output of the last block that
/// produced any, and the fault if one occurred. Partial output before a
/// fault is preserved for best-effort metrics recovery.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnvReport {
    /// Text output of the final completed block, if any.
    pub final_output: Option<String>,
    /// The fault, when any block raised.
    pub fault: Option<EnvFault>,
}

/// Contract between the orchestrator and an isolated run environment.
pub trait RunEnvironment {
    /// Executes the program. `Err` means the environment itself could not
    /// run (infrastructure failure); experiment faults come back inside
    /// the report.
    fn run(&mut self, program: &RunProgram) -> Result<EnvReport, AnaphaseError>;
}

/// Input handed to an in-process step: its named arguments as plain JSON
/// plus the previous step's output.
#[derive(Debug, Clone)]
pub struct StepInput {
    /// Named arguments resolved from literals and payload files.
    pub args: BTreeMap<String, Value>,
    /// Output of the preceding step, `None` for the first step.
    pub upstream: Option<Value>,
}

/// An in-process step implementation. A string error marks the step as
/// faulted without tearing down the environment.
pub type StepFn = dyn Fn(&StepInput) -> Result<Value, String> + Send + Sync;

/// Run environment for experiments compiled into the host binary.
///
/// Steps are registered under their entry point's `module:qual_name` key
/// and executed in program order, each receiving the previous step's
/// output. The final result is persisted to the program's artifact path
/// and its compact JSON rendering returned as the final output.
#[derive(Default)]
pub struct LocalEnvironment {
    steps: BTreeMap<String, Box<StepFn>>,
}

impl LocalEnvironment {
    /// Creates an environment with no registered steps.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a step implementation under `module:qual_name`.
    pub fn register<F>(&mut self, key: impl Into<String>, step: F)
    where
        F: Fn(&StepInput) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.steps.insert(key.into(), Box::new(step));
    }

    fn resolve_args(
        call: &crate::program::StepCall,
    ) -> Result<BTreeMap<String, Value>, AnaphaseError> {
        let mut args = BTreeMap::new();
        for (name, source) in &call.args {
            let value = match source {
                ArgSource::Literal { value } => value.to_json(),
                ArgSource::Payload { path } => read_payload(path)?.to_json(),
            };
            args.insert(name.clone(), value);
        }
        Ok(args)
    }
}

impl RunEnvironment for LocalEnvironment {
    fn run(&mut self, program: &RunProgram) -> Result<EnvReport, AnaphaseError> {
        let mut report = EnvReport::default();
        let mut upstream: Option<Value> = None;
        for call in &program.entries {
            let key = call.entry.registry_key();
            let Some(step) = self.steps.get(&key) else {
                report.fault = Some(EnvFault {
                    step: call.name.clone(),
                    message: format!("no step registered for entry point {key}"),
                });
                return Ok(report);
            };
            let input = StepInput {
                args: Self::resolve_args(call)?,
                upstream: upstream.take(),
            };
            match step(&input) {
                Ok(value) => {
                    report.final_output = Some(value.to_string());
                    upstream = Some(value);
                }
                Err(message) => {
                    report.fault = Some(EnvFault {
                        step: call.name.clone(),
                        message,
                    });
                    return Ok(report);
                }
            }
        }
        if let Some(result) = &upstream {
            fs::write(&program.artifact_path, result.to_string()).map_err(|err| {
                AnaphaseError::Execution(
                    ErrorInfo::new("env.artifact_write", "failed to persist run result")
                        .with_context("path", program.artifact_path.display().to_string())
                        .with_hint(err.to_string()),
                )
            })?;
        }
        Ok(report)
    }
}

/// Run environment that hands the program to an external runner process.
///
/// The program is rendered to `program.json` under the working directory
/// and the configured runner command invoked with that manifest as its
/// final argument, the working directory as its cwd and no timeout;
/// experiments may run arbitrarily long. Stdout becomes the final output;
/// a non-zero exit becomes a fault carrying the tail of stderr.
#[derive(Debug, Clone)]
pub struct ProcessEnvironment {
    runner: Vec<String>,
}

impl ProcessEnvironment {
    /// Creates an environment invoking the given runner command line.
    pub fn new(runner: Vec<String>) -> Self {
        Self { runner }
    }
}

impl RunEnvironment for ProcessEnvironment {
    fn run(&mut self, program: &RunProgram) -> Result<EnvReport, AnaphaseError> {
        let Some((cmd, cmd_args)) = self.runner.split_first() else {
            return Err(AnaphaseError::Execution(ErrorInfo::new(
                "env.runner_missing",
                "process environment configured with an empty runner command",
            )));
        };
        let manifest_path = program.workdir.join("program.json");
        let manifest = serde_json::to_vec_pretty(program).map_err(|err| {
            AnaphaseError::Execution(
                ErrorInfo::new("env.manifest_encode", "failed to encode run program")
                    .with_hint(err.to_string()),
            )
        })?;
        fs::write(&manifest_path, manifest).map_err(|err| {
            AnaphaseError::Execution(
                ErrorInfo::new("env.manifest_write", "failed to write run program")
                    .with_context("path", manifest_path.display().to_string())
                    .with_hint(err.to_string()),
            )
        })?;

        let output = Command::new(cmd)
            .args(cmd_args)
            .arg(&manifest_path)
            .current_dir(&program.workdir)
            .output()
            .map_err(|err| {
                AnaphaseError::Execution(
                    ErrorInfo::new("env.spawn", "failed to spawn runner process")
                        .with_context("runner", cmd)
                        .with_hint(err.to_string()),
                )
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let final_output = (!stdout.is_empty()).then_some(stdout);
        let fault = (!output.status.success()).then(|| {
            let stderr = String::from_utf8_lossy(&output.stderr);
            EnvFault {
                step: "runner".to_string(),
                message: tail(stderr.trim(), 512),
            }
        });
        Ok(EnvReport {
            final_output,
            fault,
        })
    }
}

/// Last `limit` bytes of a diagnostic string, on a char boundary.
fn tail(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
