use std::path::Path;

use anaphase_core::{
    AnaphaseError, DebugSnapshot, FuncRef, ModuleBinding, ModuleIndex, ParamValue, Parameter,
    SourceSnapshot,
};
use anaphase_ledger::{stored_variant, TrialLedger};
use anaphase_run::{
    load_trial_record, run, ExpStep, ExportFormat, LocalEnvironment, RawRecordExporter,
    RunOptions,
};
use serde_json::{json, Value};
use tempfile::tempdir;

fn gen_data_ref() -> FuncRef {
    FuncRef::new("pipeline::mock", "gen_data", 11)
}

fn fit_ref() -> FuncRef {
    FuncRef::new("pipeline::mock", "fit_and_score", 12)
}

fn loaded_index() -> ModuleIndex {
    let mut index = ModuleIndex::new();
    index.register(&gen_data_ref());
    index.register(&fit_ref());
    index
}

/// Data step followed by a scoring step that carries the data through.
fn mock_pipeline() -> LocalEnvironment {
    let mut env = LocalEnvironment::new();
    env.register("pipeline::mock:gen_data", |input| {
        let length = input
            .args
            .get("length")
            .and_then(Value::as_i64)
            .ok_or("missing length")?;
        let data: Vec<i64> = (0..length).collect();
        Ok(json!({ "data": data }))
    });
    env.register("pipeline::mock:fit_and_score", |input| {
        let upstream = input.upstream.as_ref().ok_or("missing upstream")?;
        let data = upstream.get("data").and_then(Value::as_array).ok_or("no data")?;
        Ok(json!({ "score": data.len(), "data": data }))
    });
    env
}

fn mock_steps() -> Vec<ExpStep> {
    vec![
        ExpStep::new(
            "data",
            gen_data_ref(),
            vec![Parameter::new("test", "length", ParamValue::Int(5))],
        ),
        ExpStep::new(
            "fit",
            fit_ref(),
            vec![Parameter::new("len", "metric", ParamValue::Str("len".into()))],
        ),
    ]
}

fn options(folder: &Path) -> RunOptions {
    RunOptions {
        trials_folder: folder.to_path_buf(),
        export: ExportFormat::Raw,
        ..RunOptions::default()
    }
}

#[test]
fn two_step_pipeline_records_one_closed_trial() {
    let dir = tempdir().expect("tempdir");
    let opts = options(dir.path());
    let mut env = mock_pipeline();
    let key = run(
        "demo",
        &mock_steps(),
        &mut env,
        &DebugSnapshot,
        &RawRecordExporter,
        &loaded_index(),
        &opts,
    )
    .expect("run");

    let record = load_trial_record("demo", &opts, &key)
        .expect("load")
        .expect("record exists");
    assert_eq!(record.variant, "test-len");
    assert_eq!(record.iteration, 1);
    assert!(record.is_closed());
    assert!(record.cpu_time.is_some());
    let metrics: Value =
        serde_json::from_str(record.results.as_deref().expect("metrics")).expect("json");
    assert_eq!(metrics["data"].as_array().expect("data").len(), 5);

    // Exactly one row, and the artifact made it to disk.
    let ledger = TrialLedger::open_store(dir.path().join("trials.db"), "demo", None)
        .expect("open store");
    assert_eq!(ledger.load_trials("test-len").expect("rows").len(), 1);
    let artifact = dir.path().join("trial_demo_test-len_1").join("results.json");
    let body: Value =
        serde_json::from_str(&std::fs::read_to_string(artifact).expect("artifact")).expect("json");
    assert_eq!(body["data"].as_array().expect("data").len(), 5);
    let exported = record.filename.expect("exported filename");
    assert!(dir.path().join("trial_demo_test-len_1").join(exported).exists());
}

#[test]
fn repeated_runs_advance_the_iteration() {
    let dir = tempdir().expect("tempdir");
    let opts = options(dir.path());
    let index = loaded_index();
    for _ in 0..2 {
        let mut env = mock_pipeline();
        run(
            "demo",
            &mock_steps(),
            &mut env,
            &DebugSnapshot,
            &RawRecordExporter,
            &index,
            &opts,
        )
        .expect("run");
    }
    let ledger = TrialLedger::open_store(dir.path().join("trials.db"), "demo", None)
        .expect("open store");
    let rows = ledger.load_trials("test-len").expect("rows");
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.is_closed()));
    assert_eq!(rows[1].iteration, 2);
}

#[test]
fn failed_experiments_still_close_their_row() {
    let dir = tempdir().expect("tempdir");
    let opts = options(dir.path());
    let mut env = LocalEnvironment::new();
    env.register("pipeline::mock:gen_data", |_| {
        Ok(json!({ "data": [1, 2, 3] }))
    });
    env.register("pipeline::mock:fit_and_score", |_| {
        Err("fit blew up".to_string())
    });

    let err = run(
        "demo",
        &mock_steps(),
        &mut env,
        &DebugSnapshot,
        &RawRecordExporter,
        &loaded_index(),
        &opts,
    )
    .expect_err("must propagate the fault");
    assert_eq!(err.info().code, "run.experiment_failed");
    assert!(err.info().message.contains("fit blew up"));

    let ledger = TrialLedger::open_store(dir.path().join("trials.db"), "demo", None)
        .expect("open store");
    let rows = ledger.load_trials("test-len").expect("rows");
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_closed());
    // Best-effort metrics: the data step finished before the fault.
    let partial: Value =
        serde_json::from_str(rows[0].results.as_deref().expect("partial")).expect("json");
    assert_eq!(partial["data"].as_array().expect("data").len(), 3);
}

#[test]
fn variant_conflicts_abort_before_any_row_opens() {
    let dir = tempdir().expect("tempdir");
    let opts = options(dir.path());
    let index = loaded_index();
    let mut env = mock_pipeline();
    run(
        "demo",
        &mock_steps(),
        &mut env,
        &DebugSnapshot,
        &RawRecordExporter,
        &index,
        &opts,
    )
    .expect("first run");

    // Same variant id, different value.
    let mut steps = mock_steps();
    steps[0].params[0] = Parameter::new("test", "length", ParamValue::Int(9));
    let mut env = mock_pipeline();
    let err = run(
        "demo",
        &steps,
        &mut env,
        &DebugSnapshot,
        &RawRecordExporter,
        &index,
        &opts,
    )
    .expect_err("must conflict");
    assert!(matches!(err, AnaphaseError::VariantConflict(_)));

    let ledger = TrialLedger::open_store(dir.path().join("trials.db"), "demo", None)
        .expect("open store");
    assert_eq!(ledger.load_trials("test-len").expect("rows").len(), 1);
}

#[test]
fn debug_runs_touch_no_ledger() {
    let dir = tempdir().expect("tempdir");
    let opts = RunOptions {
        debug: true,
        ..options(dir.path())
    };
    let mut env = mock_pipeline();
    run(
        "demo",
        &mock_steps(),
        &mut env,
        &DebugSnapshot,
        &RawRecordExporter,
        &loaded_index(),
        &opts,
    )
    .expect("debug run");

    assert!(!dir.path().join("trials.db").exists());
    // Iteration pinned to 0 with a collision-avoiding suffix.
    let folders: Vec<String> = std::fs::read_dir(dir.path())
        .expect("read dir")
        .map(|e| e.expect("entry").file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(folders.len(), 1);
    assert!(folders[0].starts_with("trial_demo_test-len_0_"));
}

#[test]
fn payload_parameters_reach_the_step_reconstituted() {
    let dir = tempdir().expect("tempdir");
    let opts = options(dir.path());
    let mut index = loaded_index();
    let entry = gen_data_ref();
    index.register(&entry);

    let steps = vec![ExpStep::new(
        "data",
        entry,
        vec![
            Parameter::new("test", "length", ParamValue::Int(2)),
            Parameter::with_modules(
                "tuned",
                "weights",
                ParamValue::List(vec![ParamValue::Float(0.5), ParamValue::Float(1.5)]),
                vec![ModuleBinding::new("models", vec!["Net".into()])],
            ),
        ],
    )];
    let mut env = LocalEnvironment::new();
    env.register("pipeline::mock:gen_data", |input| {
        let weights = input
            .args
            .get("weights")
            .and_then(Value::as_array)
            .ok_or("weights not reconstituted")?;
        Ok(json!({ "data": weights }))
    });
    let key = run(
        "demo",
        &steps,
        &mut env,
        &DebugSnapshot,
        &RawRecordExporter,
        &index,
        &opts,
    )
    .expect("run");
    let record = load_trial_record("demo", &opts, &key)
        .expect("load")
        .expect("record");
    let metrics: Value =
        serde_json::from_str(record.results.as_deref().expect("metrics")).expect("json");
    assert_eq!(metrics["data"], json!([0.5, 1.5]));
}

#[test]
fn untracked_params_skip_registration_but_key_the_master_variant() {
    let dir = tempdir().expect("tempdir");
    let opts = RunOptions {
        untracked_params: vec!["seed".to_string()],
        ..options(dir.path())
    };
    let mut steps = mock_steps();
    steps[0]
        .params
        .push(Parameter::new("seedA", "seed", ParamValue::Int(42)));
    let mut env = mock_pipeline();
    run(
        "demo",
        &steps,
        &mut env,
        &DebugSnapshot,
        &RawRecordExporter,
        &loaded_index(),
        &opts,
    )
    .expect("run");

    let ledger = TrialLedger::open_store(dir.path().join("trials.db"), "demo", None)
        .expect("open store");
    // No variant row for the untracked argument, so a later run may reuse
    // the id "seedA" with a different value without conflicting.
    assert_eq!(stored_variant(&ledger, "seed", "seedA").expect("lookup"), None);
    assert_eq!(
        stored_variant(&ledger, "length", "test")
            .expect("lookup")
            .as_deref(),
        Some("5")
    );
    // The variant id still participates in the master key.
    let rows = ledger.load_trials("test-len-seedA").expect("rows");
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_closed());
}

struct DirtySnapshot;

impl SourceSnapshot for DirtySnapshot {
    fn is_dirty(&self) -> bool {
        true
    }
    fn head_id(&self) -> String {
        "deadbee".to_string()
    }
}

#[test]
fn dirty_trees_are_refused_outside_debug() {
    let dir = tempdir().expect("tempdir");
    let opts = options(dir.path());
    let mut env = mock_pipeline();
    let err = run(
        "demo",
        &mock_steps(),
        &mut env,
        &DirtySnapshot,
        &RawRecordExporter,
        &loaded_index(),
        &opts,
    )
    .expect_err("must refuse");
    assert_eq!(err.info().code, "run.dirty_tree");
    assert!(!dir.path().join("trials.db").exists());
}

#[test]
fn unregistered_entry_points_fail_before_the_ledger() {
    let dir = tempdir().expect("tempdir");
    let opts = options(dir.path());
    let mut env = mock_pipeline();
    // Index without the fit entry point.
    let mut index = ModuleIndex::new();
    index.register(&gen_data_ref());
    let err = run(
        "demo",
        &mock_steps(),
        &mut env,
        &DebugSnapshot,
        &RawRecordExporter,
        &index,
        &opts,
    )
    .expect_err("must reject");
    assert!(matches!(err, AnaphaseError::Unreproducible(_)));
    assert!(!dir.path().join("trials.db").exists());
}
