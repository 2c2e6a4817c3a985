//! Top-level trial lifecycle: identity, ledger phases, execution, export.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use anaphase_core::canon::validate_func;
use anaphase_core::errors::{AnaphaseError, ErrorInfo};
use anaphase_core::{master_variant_key, ModuleIndex, Parameter, SourceSnapshot, DEBUG_SOURCE_ID};
use anaphase_ledger::{register_variant, TrialLedger, TrialRecord};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info};

use crate::config::RunOptions;
use crate::environment::RunEnvironment;
use crate::export::ArtifactExporter;
use crate::hash::stable_hash_string;
use crate::orchestrator::execute;
use crate::program::{hex_suffix, ExpStep};

/// Stable identifier of one finished (or failed) trial run, derived from
/// the trial table, master variant key and iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunKey(String);

impl RunKey {
    /// The key as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Runs an experiment once and records it in the trial ledger.
///
/// Lifecycle: refuse dirty trees (non-debug), register every tracked
/// parameter's variant and build the master key (identity errors abort
/// before any ledger row exists), claim the next iteration, open the trial
/// row, materialize and execute in the environment, export the artifact,
/// close the row with whatever outcome data exists, and only then surface
/// an experiment fault to the caller.
///
/// Debug runs bypass the ledger entirely and pin iteration 0.
pub fn run(
    experiment: &str,
    steps: &[ExpStep],
    env: &mut dyn RunEnvironment,
    snapshot: &dyn SourceSnapshot,
    exporter: &dyn ArtifactExporter,
    index: &ModuleIndex,
    opts: &RunOptions,
) -> Result<RunKey, AnaphaseError> {
    if !opts.debug && snapshot.is_dirty() {
        return Err(AnaphaseError::Execution(
            ErrorInfo::new("run.dirty_tree", "source tree has uncommitted changes")
                .with_hint("commit or stash all changes, or run in debug mode"),
        ));
    }
    let source_id = if opts.debug {
        DEBUG_SOURCE_ID.to_string()
    } else {
        snapshot.head_id()
    };

    // Identity phase: nothing below may touch the ledger until every
    // parameter and entry point has a reproducible name.
    let params: Vec<&Parameter> = steps.iter().flat_map(|s| s.params.iter()).collect();
    for step in steps {
        if let Err(reason) = validate_func(&step.entry, index) {
            return Err(AnaphaseError::Unreproducible(
                ErrorInfo::new(
                    "run.unimportable_entry",
                    format!(
                        "step '{}' entry point {} cannot be reproducibly named ({})",
                        step.name,
                        step.entry.path(),
                        reason.label()
                    ),
                )
                .with_context("step", &step.name),
            ));
        }
    }

    fs::create_dir_all(&opts.trials_folder).map_err(|err| {
        AnaphaseError::Ledger(
            ErrorInfo::new("run.trials_folder", "failed to create trials folder")
                .with_context("path", opts.trials_folder.display().to_string())
                .with_hint(err.to_string()),
        )
    })?;

    let ledger = if opts.debug {
        None
    } else {
        Some(TrialLedger::open_store(
            opts.trials_folder.join(&opts.logfile),
            experiment,
            opts.group.as_deref(),
        )?)
    };
    if let Some(ledger) = &ledger {
        for param in &params {
            if opts.untracked_params.iter().any(|u| u == param.arg_name()) {
                continue;
            }
            register_variant(ledger, param, index)?;
        }
    }
    let owned: Vec<Parameter> = params.iter().map(|p| (*p).clone()).collect();
    let master_key = master_variant_key(&owned);

    let mut rng = StdRng::from_entropy();
    let iteration = match &ledger {
        Some(ledger) => ledger.next_iteration(&master_key)?,
        None => 0,
    };
    if let Some(ledger) = &ledger {
        ledger.open_trial(&master_key, iteration, &source_id)?;
    }
    info!(
        experiment,
        variant = %master_key,
        iteration,
        source = %source_id,
        debug = opts.debug,
        "trial started"
    );

    let trial_folder = trial_folder(experiment, &master_key, iteration, opts, &mut rng);
    fs::create_dir_all(&trial_folder).map_err(|err| {
        AnaphaseError::Execution(
            ErrorInfo::new("run.trial_folder", "failed to create trial folder")
                .with_context("path", trial_folder.display().to_string())
                .with_hint(err.to_string()),
        )
    })?;

    let outcome = execute(env, steps, &trial_folder, &mut rng)?;

    let mut record = match &ledger {
        Some(ledger) => ledger
            .load_trial(&master_key, iteration)?
            .ok_or_else(|| {
                AnaphaseError::Ledger(ErrorInfo::new(
                    "ledger.close_without_open",
                    "open trial row disappeared before close",
                ))
            })?,
        None => TrialRecord {
            variant: master_key.clone(),
            iteration,
            source_id: source_id.clone(),
            opened_at: Utc::now().to_rfc3339(),
            cpu_time: None,
            results: None,
            filename: None,
        },
    };
    record.cpu_time = Some(outcome.cpu_time);
    record.results = outcome.metrics.clone();

    // Export before close so the ledger row can record the filename. An
    // export failure must not prevent the close; it surfaces afterwards.
    let exported = exporter.export(&record, opts.export, &trial_folder);
    let filename = match &exported {
        Ok(Some(path)) => path
            .file_name()
            .map(|name| name.to_string_lossy().to_string()),
        _ => None,
    };
    if let Some(ledger) = &ledger {
        ledger.close_trial(
            &master_key,
            iteration,
            Some(outcome.cpu_time),
            outcome.metrics.as_deref(),
            filename.as_deref(),
        )?;
    }
    info!(
        experiment,
        variant = %master_key,
        iteration,
        cpu_time = outcome.cpu_time,
        faulted = outcome.fault.is_some(),
        "trial closed"
    );

    if let Some(fault) = outcome.fault {
        error!(step = %fault.step, "surfacing experiment fault: {}", fault.message);
        return Err(AnaphaseError::Execution(
            ErrorInfo::new(
                "run.experiment_failed",
                format!("step '{}' failed: {}", fault.step, fault.message),
            )
            .with_context("step", fault.step)
            .with_context("variant", &master_key)
            .with_context("iteration", iteration.to_string()),
        ));
    }
    exported?;

    Ok(RunKey(stable_hash_string(&(
        table_label(experiment, opts.group.as_deref()),
        &master_key,
        iteration,
    ))?))
}

/// Resolves a run key back to its trial record for inspection.
pub fn load_trial_record(
    experiment: &str,
    opts: &RunOptions,
    key: &RunKey,
) -> Result<Option<TrialRecord>, AnaphaseError> {
    let ledger = TrialLedger::open_store(
        opts.trials_folder.join(&opts.logfile),
        experiment,
        opts.group.as_deref(),
    )?;
    let label = table_label(experiment, opts.group.as_deref());
    for record in ledger.all_trials()? {
        let candidate = stable_hash_string(&(&label, &record.variant, record.iteration))?;
        if candidate == key.as_str() {
            return Ok(Some(record));
        }
    }
    Ok(None)
}

fn table_label(experiment: &str, group: Option<&str>) -> String {
    match group {
        Some(group) => format!("trials_{experiment}_{group}"),
        None => format!("trials_{experiment}"),
    }
}

fn trial_folder(
    experiment: &str,
    master_key: &str,
    iteration: i64,
    opts: &RunOptions,
    rng: &mut StdRng,
) -> PathBuf {
    let mut name = format!("trial_{experiment}");
    if let Some(group) = &opts.group {
        name.push('_');
        name.push_str(group);
    }
    name.push('_');
    name.push_str(master_key);
    name.push('_');
    name.push_str(&iteration.to_string());
    if opts.debug {
        // Debug runs all share iteration 0; the suffix keeps their
        // folders from colliding.
        name.push('_');
        name.push_str(&hex_suffix(rng, 6));
    }
    opts.trials_folder.join(name)
}
