use anaphase_core::{canonicalize, FuncRef, ModuleIndex, ParamValue};
use proptest::prelude::*;

fn canon(value: &ParamValue) -> String {
    canonicalize(value, &ModuleIndex::new()).expect("canonicalize")
}

fn map(entries: Vec<(&str, i64)>) -> ParamValue {
    ParamValue::Map(
        entries
            .into_iter()
            .map(|(k, v)| (ParamValue::Str(k.into()), ParamValue::Int(v)))
            .collect(),
    )
}

#[test]
fn mapping_keys_render_sorted() {
    assert_eq!(canon(&map(vec![("b", 1), ("a", 2)])), "{'a': 2, 'b': 1}");
    assert_eq!(canon(&map(vec![("a", 2), ("b", 1)])), "{'a': 2, 'b': 1}");
}

#[test]
fn repeated_calls_are_byte_identical() {
    let value = ParamValue::Map(vec![
        (
            ParamValue::Str("grid".into()),
            ParamValue::List(vec![ParamValue::Int(3), ParamValue::Int(1)]),
        ),
        (ParamValue::Str("rate".into()), ParamValue::Float(0.5)),
    ]);
    assert_eq!(canon(&value), canon(&value));
}

#[test]
fn strings_are_quoted() {
    assert_eq!(canon(&ParamValue::Str("a".into())), "'a'");
    assert_eq!(
        canon(&ParamValue::List(vec![ParamValue::Str("a".into())])),
        "['a']"
    );
    assert_eq!(
        canon(&map(vec![("a", 1)])),
        "{'a': 1}"
    );
}

#[test]
fn sequences_and_sets_normalize_to_sorted_form() {
    let list = ParamValue::List(vec![
        ParamValue::Int(3),
        ParamValue::Int(1),
        ParamValue::Int(2),
    ]);
    let set = ParamValue::Set(vec![
        ParamValue::Int(2),
        ParamValue::Int(3),
        ParamValue::Int(1),
    ]);
    assert_eq!(canon(&list), "[1, 2, 3]");
    assert_eq!(canon(&list), canon(&set));
}

#[test]
fn unorderable_elements_keep_insertion_order() {
    let mixed = ParamValue::List(vec![
        ParamValue::Str("z".into()),
        ParamValue::Int(1),
        ParamValue::Str("a".into()),
    ]);
    assert_eq!(canon(&mixed), "['z', 1, 'a']");
}

#[test]
fn floats_never_collide_with_integers() {
    assert_eq!(canon(&ParamValue::Int(1)), "1");
    assert_eq!(canon(&ParamValue::Float(1.0)), "1.0");
    assert_eq!(canon(&ParamValue::Float(2.5)), "2.5");
}

#[test]
fn nested_containers_recurse() {
    let mut index = ModuleIndex::new();
    let scale = FuncRef::new("pipeline::ops", "scale", 41);
    index.register(&scale);
    let value = ParamValue::Map(vec![(
        ParamValue::Str("b".into()),
        ParamValue::Map(vec![(
            ParamValue::Str("a".into()),
            ParamValue::List(vec![ParamValue::List(vec![ParamValue::Func(scale)])]),
        )]),
    )]);
    assert_eq!(
        canonicalize(&value, &index).expect("canonicalize"),
        "{'b': {'a': [[<function pipeline::ops.scale>]]}}"
    );
}

proptest! {
    // Equal mappings canonicalize identically regardless of the order
    // entries were inserted in.
    #[test]
    fn mapping_insertion_order_is_irrelevant(
        entries in proptest::collection::btree_map("[a-z]{1,6}", -1000i64..1000, 1..8),
        seed in 0u64..1000,
    ) {
        let forward: Vec<(ParamValue, ParamValue)> = entries
            .iter()
            .map(|(k, v)| (ParamValue::Str(k.clone()), ParamValue::Int(*v)))
            .collect();
        let mut shuffled = forward.clone();
        // Cheap deterministic shuffle: rotate by the seed.
        let len = shuffled.len();
        shuffled.rotate_left((seed as usize) % len);
        prop_assert_eq!(
            canon(&ParamValue::Map(forward)),
            canon(&ParamValue::Map(shuffled))
        );
    }

    #[test]
    fn integer_collections_always_sort(values in proptest::collection::vec(-1000i64..1000, 0..16)) {
        let list = ParamValue::List(values.iter().copied().map(ParamValue::Int).collect());
        let mut sorted = values.clone();
        sorted.sort_unstable();
        let sorted_list = ParamValue::List(sorted.into_iter().map(ParamValue::Int).collect());
        prop_assert_eq!(canon(&list), canon(&sorted_list));
    }
}
