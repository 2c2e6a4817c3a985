#![deny(missing_docs)]
#![doc = "Execution orchestrator for reproducible anaphase trials."]

pub mod config;
pub mod environment;
pub mod export;
pub mod hash;
pub mod orchestrator;
pub mod program;
pub mod run;

pub use config::RunOptions;
pub use environment::{EnvFault, EnvReport, LocalEnvironment, ProcessEnvironment, RunEnvironment, StepInput};
pub use export::{ArtifactExporter, ExportFormat, RawRecordExporter};
pub use hash::{stable_hash_string, to_canonical_json_bytes};
pub use orchestrator::{execute, execute_program, ExecutionOutcome};
pub use program::{materialize, read_payload, ArgSource, ExpStep, RunProgram, StepCall, ARTIFACT_FILENAME};
pub use run::{load_trial_record, run, RunKey};
