//! Timed execution of a run program inside an isolated environment.

use std::path::Path;

use anaphase_core::errors::{AnaphaseError, ErrorInfo};
use cpu_time::ProcessTime;
use rand::Rng;
use tracing::{debug, warn};

use crate::environment::{EnvFault, RunEnvironment};
use crate::program::{materialize, ExpStep, RunProgram};

/// Outcome of one execution. `metrics` is best-effort on failure: whatever
/// final output the environment produced before faulting, possibly none.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    /// Result metrics captured from the environment's final output.
    pub metrics: Option<String>,
    /// The experiment's fault, if it raised.
    pub fault: Option<EnvFault>,
    /// Process CPU seconds between environment invocation and return.
    pub cpu_time: f64,
}

/// Materializes the steps into `workdir` and executes them.
///
/// Prepared: parameter values are serialized into the run environment.
/// Running: the environment is invoked with no timeout. Completed or
/// Failed: either way the outcome carries CPU time and best-effort
/// metrics, and faults are returned to the caller, never swallowed.
///
/// Timing is process CPU time clamped immediately around the environment
/// invocation, so it stays comparable across machines under different
/// load.
pub fn execute(
    env: &mut dyn RunEnvironment,
    steps: &[ExpStep],
    workdir: &Path,
    rng: &mut impl Rng,
) -> Result<ExecutionOutcome, AnaphaseError> {
    let program = materialize(steps, workdir, rng)?;
    execute_program(env, &program)
}

/// Executes an already-materialized program. Split out so callers that
/// prepared the program themselves still get identical timing semantics.
pub fn execute_program(
    env: &mut dyn RunEnvironment,
    program: &RunProgram,
) -> Result<ExecutionOutcome, AnaphaseError> {
    debug!(steps = program.entries.len(), workdir = %program.workdir.display(), "invoking run environment");
    let clock = ProcessTime::try_now().map_err(|err| {
        AnaphaseError::Execution(
            ErrorInfo::new("orchestrator.cpu_clock", "failed to read process CPU clock")
                .with_hint(err.to_string()),
        )
    })?;
    let report = env.run(program);
    let cpu_time = clock
        .try_elapsed()
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0);
    let report = report?;
    if let Some(fault) = &report.fault {
        warn!(step = %fault.step, "experiment faulted: {}", fault.message);
    }
    Ok(ExecutionOutcome {
        metrics: report.final_output,
        fault: report.fault,
        cpu_time,
    })
}
