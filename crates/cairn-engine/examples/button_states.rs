//! Drive a small panel of buttons through a scripted pointer session and
//! print every state transition.
//!
//! Run with: `RUST_LOG=cairn_graph=debug cargo run --example button_states`

use cairn_engine::prelude::*;

const RULES: &str = r#"{
    "trees": [
        {
            "name": "button",
            "steps": [
                { "id": 0, "parent_id": -1, "type": "condition",
                  "condition_field": "pressed", "condition_expected": true },
                { "id": 1, "parent_id": 0, "type": "result", "result_state": "Pressed" },
                { "id": 2, "parent_id": -1, "type": "condition",
                  "condition_field": "hover", "condition_expected": true },
                { "id": 3, "parent_id": 2, "type": "result", "result_state": "Hover" }
            ]
        }
    ]
}"#;

/// Pointer x position per tick; the pointer button is held on odd ticks.
const POINTER_PATH: [i64; 8] = [0, 1, 1, 2, 2, 3, 0, 0];

fn main() -> Result<(), anyhow::Error> {
    init_logging("warn");

    let config = EngineConfig::from_json_str(r#"{ "fixed_dt": 0.05 }"#)?;
    let mut engine = Engine::new(config);
    let trees = engine.load_rules_json(RULES)?;
    let tree = trees[0];

    let pointer = engine.spawn_owner("pointer");
    let x = engine.add_input(pointer, "x", 0)?;
    let down = engine.add_input(pointer, "down", 0)?;

    let mut buttons = Vec::new();
    for slot in 1..=3i64 {
        let owner = engine.spawn_owner(&format!("button {slot}"));
        let hover = engine.add_field(owner, "hover", Derivation::Equals(x, slot))?;
        let pointer_down = engine.add_field(owner, "pointer_down", Derivation::Copy(down))?;
        engine.add_field(owner, "pressed", Derivation::All(vec![hover, pointer_down]))?;
        engine.assign_rules(owner, tree, "Idle")?;
        buttons.push(owner);
    }

    for (tick, &position) in POINTER_PATH.iter().enumerate() {
        engine.set_input(x, position)?;
        engine.set_input(down, (tick % 2) as i64)?;
        let report = engine.tick();
        for t in &report.transitions {
            let name = |id| engine.names().states.name_of(id).unwrap_or("-");
            let owner = engine.owner(t.owner).map(Owner::name).unwrap_or("?");
            println!(
                "t={:.2}s  {owner}: {} -> {}",
                engine.sim_time(),
                name(t.from),
                name(t.to)
            );
        }
    }

    for &button in &buttons {
        let owner = engine.owner(button).map(Owner::name).unwrap_or("?");
        println!("final {owner}: {}", engine.state_name_of(button).unwrap_or("-"));
    }
    println!("digest {}", engine.digest());
    let diag = engine.last_diagnostics();
    println!(
        "last tick: {} fields, {} owners, {:?}",
        diag.fields_evaluated, diag.owners_evaluated, diag.total_time
    );
    Ok(())
}
