use anaphase_core::{AnaphaseError, ModuleIndex, ParamValue, Parameter};
use anaphase_ledger::{register_variant, stored_variant, TrialLedger};
use tempfile::tempdir;

fn scratch_ledger(dir: &tempfile::TempDir) -> TrialLedger {
    TrialLedger::open_store(dir.path().join("trials.db"), "demo", None).expect("open store")
}

#[test]
fn first_registration_inserts_canonical_string() {
    let dir = tempdir().expect("tempdir");
    let ledger = scratch_ledger(&dir);
    let index = ModuleIndex::new();
    let param = Parameter::new(
        "small",
        "grid",
        ParamValue::Map(vec![
            (ParamValue::Str("b".into()), ParamValue::Int(1)),
            (ParamValue::Str("a".into()), ParamValue::Int(2)),
        ]),
    );
    register_variant(&ledger, &param, &index).expect("register");
    let stored = stored_variant(&ledger, "grid", "small").expect("lookup");
    assert_eq!(stored.as_deref(), Some("{'a': 2, 'b': 1}"));
}

#[test]
fn reregistration_with_same_value_is_idempotent() {
    let dir = tempdir().expect("tempdir");
    let ledger = scratch_ledger(&dir);
    let index = ModuleIndex::new();
    // Key order differs; canonical form does not.
    let first = Parameter::new(
        "small",
        "grid",
        ParamValue::Map(vec![
            (ParamValue::Str("a".into()), ParamValue::Int(2)),
            (ParamValue::Str("b".into()), ParamValue::Int(1)),
        ]),
    );
    let second = Parameter::new(
        "small",
        "grid",
        ParamValue::Map(vec![
            (ParamValue::Str("b".into()), ParamValue::Int(1)),
            (ParamValue::Str("a".into()), ParamValue::Int(2)),
        ]),
    );
    register_variant(&ledger, &first, &index).expect("first");
    register_variant(&ledger, &second, &index).expect("second");
    let stored = stored_variant(&ledger, "grid", "small").expect("lookup");
    assert_eq!(stored.as_deref(), Some("{'a': 2, 'b': 1}"));
}

#[test]
fn redefinition_with_different_value_conflicts() {
    let dir = tempdir().expect("tempdir");
    let ledger = scratch_ledger(&dir);
    let index = ModuleIndex::new();
    register_variant(
        &ledger,
        &Parameter::new("small", "grid", ParamValue::Int(5)),
        &index,
    )
    .expect("register");
    let err = register_variant(
        &ledger,
        &Parameter::new("small", "grid", ParamValue::Int(6)),
        &index,
    )
    .expect_err("must conflict");
    match err {
        AnaphaseError::VariantConflict(info) => {
            assert_eq!(info.context.get("stored").map(String::as_str), Some("5"));
            assert_eq!(info.context.get("attempted").map(String::as_str), Some("6"));
            assert_eq!(info.context.get("arg_name").map(String::as_str), Some("grid"));
        }
        other => panic!("unexpected error family: {other:?}"),
    }
}

#[test]
fn unreproducible_values_never_reach_the_store() {
    let dir = tempdir().expect("tempdir");
    let ledger = scratch_ledger(&dir);
    let index = ModuleIndex::new();
    let param = Parameter::new(
        "op",
        "reducer",
        ParamValue::Func(anaphase_core::FuncRef::anonymous("main", 1)),
    );
    let err = register_variant(&ledger, &param, &index).expect_err("must reject");
    assert!(matches!(err, AnaphaseError::Unreproducible(_)));
    let stored = stored_variant(&ledger, "reducer", "op").expect("lookup");
    assert_eq!(stored, None);
}
