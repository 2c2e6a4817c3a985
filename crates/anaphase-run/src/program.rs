//! Run programs: the materialized form of an experiment handed to an
//! isolated run environment.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anaphase_core::errors::{AnaphaseError, ErrorInfo};
use anaphase_core::{FuncRef, ModuleBinding, Parameter, ParamValue};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Name of the artifact file the final step's result is persisted to.
pub const ARTIFACT_FILENAME: &str = "results.json";

/// One step of an experiment pipeline: a named entry point plus the
/// parameters bound to it. Steps execute in list order, each receiving the
/// previous step's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpStep {
    /// Human label for the step.
    pub name: String,
    /// Entry point invoked for this step.
    pub entry: FuncRef,
    /// Parameters bound to the step's arguments.
    pub params: Vec<Parameter>,
}

impl ExpStep {
    /// Creates a step from a name, an entry point and its parameters.
    pub fn new(name: impl Into<String>, entry: FuncRef, params: Vec<Parameter>) -> Self {
        Self {
            name: name.into(),
            entry,
            params,
        }
    }
}

/// Where a step argument's value comes from at invocation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ArgSource {
    /// Plain value embedded directly into the generated run.
    Literal {
        /// The embedded value.
        value: ParamValue,
    },
    /// Value serialized to a side-channel payload file, to be
    /// reconstituted inside the environment before invocation.
    Payload {
        /// Path of the payload file under the run's working directory.
        path: PathBuf,
    },
}

/// One entry-point invocation inside a run program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCall {
    /// Step label, carried through to fault reports.
    pub name: String,
    /// Entry point to invoke.
    pub entry: FuncRef,
    /// Named arguments and where each value comes from.
    pub args: BTreeMap<String, ArgSource>,
}

/// The complete program an environment executes: module bindings, the
/// ordered step invocations and the artifact path the final result is
/// persisted to. This is the only thing the environment ever sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunProgram {
    /// Working directory the environment is rooted at.
    pub workdir: PathBuf,
    /// Modules to load before any step runs.
    pub bindings: Vec<ModuleBinding>,
    /// Step invocations, in order.
    pub entries: Vec<StepCall>,
    /// Where the final step's result is persisted.
    pub artifact_path: PathBuf,
}

/// Materializes steps into a run program rooted at `workdir`.
///
/// Parameters without module bindings are embedded as literals. Parameters
/// carrying bindings cannot appear as literals in generated run code, so
/// their values are serialized to payload files and referenced by path.
pub fn materialize(
    steps: &[ExpStep],
    workdir: &Path,
    rng: &mut impl Rng,
) -> Result<RunProgram, AnaphaseError> {
    let mut bindings: Vec<ModuleBinding> = Vec::new();
    let mut entries = Vec::with_capacity(steps.len());
    for step in steps {
        let mut args = BTreeMap::new();
        for param in &step.params {
            let source = if param.needs_payload() {
                bindings.extend(param.modules().iter().cloned());
                ArgSource::Payload {
                    path: write_payload(param, workdir, rng)?,
                }
            } else {
                ArgSource::Literal {
                    value: param.value().clone(),
                }
            };
            args.insert(param.arg_name().to_string(), source);
        }
        entries.push(StepCall {
            name: step.name.clone(),
            entry: step.entry.clone(),
            args,
        });
    }
    Ok(RunProgram {
        workdir: workdir.to_path_buf(),
        bindings,
        entries,
        artifact_path: workdir.join(ARTIFACT_FILENAME),
    })
}

/// Serializes one parameter value to `arg_<hex>.json` under the workdir.
fn write_payload(
    param: &Parameter,
    workdir: &Path,
    rng: &mut impl Rng,
) -> Result<PathBuf, AnaphaseError> {
    let path = workdir.join(format!("arg_{}.json", hex_suffix(rng, 8)));
    let file = File::create(&path).map_err(|err| payload_error(param, &path, err))?;
    serde_json::to_writer(BufWriter::new(file), param.value())
        .map_err(|err| payload_error(param, &path, err))?;
    Ok(path)
}

/// Reads a payload file back into its parameter value.
pub fn read_payload(path: &Path) -> Result<ParamValue, AnaphaseError> {
    let file = File::open(path).map_err(|err| {
        AnaphaseError::Execution(
            ErrorInfo::new("program.payload_read", "failed to open payload file")
                .with_context("path", path.display().to_string())
                .with_hint(err.to_string()),
        )
    })?;
    serde_json::from_reader(file).map_err(|err| {
        AnaphaseError::Execution(
            ErrorInfo::new("program.payload_parse", "failed to parse payload file")
                .with_context("path", path.display().to_string())
                .with_hint(err.to_string()),
        )
    })
}

/// Random lowercase hex string used to keep payload files and debug trial
/// folders from colliding.
pub(crate) fn hex_suffix(rng: &mut impl Rng, len: usize) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    (0..len)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect()
}

fn payload_error(param: &Parameter, path: &Path, err: impl ToString) -> AnaphaseError {
    AnaphaseError::Execution(
        ErrorInfo::new("program.payload_write", "failed to write payload file")
            .with_context("arg_name", param.arg_name())
            .with_context("path", path.display().to_string())
            .with_hint(err.to_string()),
    )
}
