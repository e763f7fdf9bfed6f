//! Loading and exporting rule documents across several trees.

use cairn_graph::names::Names;
use cairn_rules::prelude::*;

const WIDGETS: &str = r#"{
    "trees": [
        {
            "name": "toggle",
            "steps": [
                { "id": 0, "parent_id": -1, "type": "reference", "reference": "disabled" },
                { "id": 1, "parent_id": -1, "type": "condition",
                  "condition_field": "on", "condition_expected": true },
                { "id": 2, "parent_id": 1, "type": "result", "result_state": "On" },
                { "id": 3, "parent_id": -1, "type": "result", "result_state": "Off" }
            ]
        },
        {
            "name": "disabled",
            "steps": [
                { "id": 0, "parent_id": -1, "type": "condition",
                  "condition_field": "enabled", "condition_expected": true, "condition_negate": true },
                { "id": 1, "parent_id": 0, "type": "result", "result_state": "Disabled" }
            ]
        }
    ]
}"#;

fn load(json: &str) -> (RuleLibrary, Names) {
    let doc = RuleDocument::from_json(json).unwrap();
    let mut names = Names::new();
    let mut lib = RuleLibrary::new();
    lib.load_document(&doc, &mut names).unwrap();
    (lib, names)
}

#[test]
fn shared_sub_tree_overrides_local_rules() {
    let (lib, names) = load(WIDGETS);
    let toggle = lib.tree_id("toggle").unwrap();
    let on = names.fields.find("on").unwrap();
    let enabled = names.fields.find("enabled").unwrap();
    let state = |s: &str| names.states.find(s).unwrap();

    // Absent `enabled` satisfies the negated condition.
    assert_eq!(lib.evaluate(toggle, &Mask::new().with(on, 1)), state("Disabled"));
    assert_eq!(
        lib.evaluate(toggle, &Mask::new().with(enabled, 1).with(on, 1)),
        state("On")
    );
    assert_eq!(
        lib.evaluate(toggle, &Mask::new().with(enabled, 1).with(on, 0)),
        state("Off")
    );
}

#[test]
fn introspection_spans_the_document() {
    let (lib, names) = load(WIDGETS);
    let toggle = lib.tree_id("toggle").unwrap();
    let disabled = lib.tree_id("disabled").unwrap();

    assert_eq!(lib.reachable_trees(toggle), vec![toggle, disabled]);
    assert_eq!(lib.referenced_fields(toggle).len(), 2);
    assert_eq!(lib.produced_states(toggle).len(), 3);
    assert!(lib.has_root_fallback(toggle));
    assert!(!lib.has_root_fallback(disabled));
    assert_eq!(names.states.len(), 3);
}

#[test]
fn exported_document_reloads_identically() {
    let (lib, names) = load(WIDGETS);
    let json = lib.export_document(&names).to_json().unwrap();

    let (reloaded, reloaded_names) = load(&json);
    assert_eq!(reloaded.len(), lib.len());
    for name in ["toggle", "disabled"] {
        let a = lib.tree_id(name).unwrap();
        let b = reloaded.tree_id(name).unwrap();
        assert_eq!(lib.plan(a), reloaded.plan(b));
    }
    assert_eq!(
        reloaded_names.fields.iter().collect::<Vec<_>>(),
        names.fields.iter().collect::<Vec<_>>()
    );
}

#[test]
fn reloading_same_steps_keeps_cached_plan() {
    let (mut lib, names) = load(WIDGETS);
    let toggle = lib.tree_id("toggle").unwrap();
    let steps = lib.steps(toggle).unwrap().to_vec();
    assert!(!lib.replace_steps(toggle, steps).unwrap());

    let idle = names.states.find("Off").unwrap();
    assert!(lib.replace_steps(toggle, vec![Step::result(0, -1, idle)]).unwrap());
    assert_eq!(lib.evaluate(toggle, &Mask::new()), idle);
}

#[test]
fn unknown_step_type_rejects_the_document() {
    let json = r#"{ "trees": [ { "name": "t", "steps": [
        { "id": 0, "parent_id": -1, "type": "sometimes" }
    ] } ] }"#;
    assert!(matches!(RuleDocument::from_json(json), Err(RuleError::Json(_))));
}

#[test]
fn missing_reference_target_is_dropped() {
    let json = r#"{ "trees": [ { "name": "t", "steps": [
        { "id": 0, "parent_id": -1, "type": "reference", "reference": "  " },
        { "id": 1, "parent_id": -1, "type": "result", "result_state": "Fallback" }
    ] } ] }"#;
    let (lib, names) = load(json);
    let t = lib.tree_id("t").unwrap();
    assert_eq!(lib.plan(t).unwrap().len(), 1);
    assert_eq!(lib.evaluate(t, &Mask::new()), names.states.find("Fallback").unwrap());
}

#[test]
fn repeated_tree_name_keeps_first_definition() {
    let json = r#"{ "trees": [
        { "name": "t", "steps": [ { "id": 0, "parent_id": -1, "type": "result", "result_state": "First" } ] },
        { "name": "t", "steps": [ { "id": 0, "parent_id": -1, "type": "result", "result_state": "Second" } ] }
    ] }"#;
    let doc = RuleDocument::from_json(json).unwrap();
    let mut names = Names::new();
    let mut lib = RuleLibrary::new();
    let loaded = lib.load_document(&doc, &mut names).unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(lib.len(), 1);
    assert_eq!(lib.evaluate(loaded[0], &Mask::new()), names.states.find("First").unwrap());
}
