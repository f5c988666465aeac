//! Dispatch properties exercised through the public API: rule priority,
//! change detection, queue ordering, and re-entrancy through listeners.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use actions::core::expr::FunctionLibrary;
use actions::core::legacy::upgrade;
use actions::core::patch::{Document, Patch};
use actions::core::rules::RuleSet;
use actions::engine::{EngineOptions, RuleEngine};
use actions::error::EngineError;
use actions::store::{Listener, StateStore};
use actions::test_support::{engine_with, record_calls, rule, rule_set};
use serde_json::{Value, json};

fn press(engine: &RuleEngine, origin: &str) {
    engine
        .dispatch(origin, "press", Document::new())
        .expect("dispatch");
}

#[test]
fn counter_stops_at_three_and_fourth_press_is_silent() {
    let engine = engine_with(vec![rule(
        "btn1",
        &["$count < 3"],
        &[("$count", "$count + 1")],
    )]);
    let store = Rc::clone(engine.store());
    store.define("$count", json!(0)).expect("define");
    let (listener, calls) = record_calls();
    store.observe(listener, &["$count"]);

    for _ in 0..3 {
        press(&engine, "btn1");
    }
    assert_eq!(store.get("$count"), json!(3));
    assert_eq!(calls.borrow().len(), 3);

    let outcome = engine
        .dispatch("btn1", "press", Document::new())
        .expect("fourth");
    assert_eq!(outcome.fired_rules(), Vec::<usize>::new());
    assert!(outcome.changed_keys().is_empty());
    assert_eq!(store.get("$count"), json!(3));
    assert_eq!(calls.borrow().len(), 3);
}

#[test]
fn earliest_eligible_rule_fires_and_later_ones_do_not() {
    let engine = engine_with(vec![
        rule("a", &["$x > 0"], &[("$fired", "'first'")]),
        rule("a", &["$x > -1"], &[("$fired", "'second'")]),
        rule("*", &[], &[("$fired", "'wildcard'")]),
    ]);
    engine
        .store()
        .update_value(json!({"$x": 1}))
        .expect("seed");
    let outcome = engine
        .dispatch("a", "press", Document::new())
        .expect("dispatch");
    assert_eq!(outcome.fired_rules(), vec![0]);
    assert_eq!(engine.store().get("$fired"), json!("first"));
}

#[test]
fn wildcard_origin_accepts_origins_no_rule_names() {
    let engine = engine_with(vec![
        rule("a", &[], &[("$last", "'a'")]),
        rule("*", &[], &[("$last", "'any'")]),
    ]);
    for origin in ["a", "never-mentioned", ""] {
        press(&engine, origin);
        let expected = if origin == "a" { "a" } else { "any" };
        assert_eq!(engine.store().get("$last"), json!(expected), "{origin}");
    }
}

#[test]
fn change_set_is_exactly_changed_and_removed_keys() {
    let store = StateStore::in_memory();
    store
        .update_value(json!({"$same": 1, "$changed": 1, "$gone": 1, "$nested": {"a": 1}}))
        .expect("seed");
    let changes = store
        .update(
            Patch::new()
                .set("$same", json!(1))
                .set("$changed", json!(2))
                .remove("$gone")
                .assign("$nested", json!({"a": 1}))
                .set("$new", json!(null)),
        )
        .expect("update");
    assert_eq!(
        changes.iter().collect::<Vec<_>>(),
        vec!["$changed", "$gone", "$new"]
    );
}

#[test]
fn define_never_overwrites() {
    let store = StateStore::in_memory();
    store.update_value(json!({"$mode": "edit"})).expect("seed");
    store.define("$mode", json!("view")).expect("define");
    assert_eq!(store.get("$mode"), json!("edit"));

    store.update_value(json!({"$flag": false})).expect("falsy");
    store.define("$flag", json!(true)).expect("define falsy");
    assert_eq!(store.get("$flag"), json!(false));
}

#[test]
fn queued_events_run_most_recent_first() {
    let engine = engine_with(vec![
        rule(
            "w",
            &[],
            &[("$queued", "queue('x', 'tick') && queue('y', 'tick')")],
        ),
        rule("x", &[], &[("$trail", "concat($trail, 'x')")]),
        rule("y", &[], &[("$trail", "concat($trail, 'y')")]),
    ]);
    let outcome = engine
        .dispatch("w", "press", Document::new())
        .expect("dispatch");
    assert_eq!(outcome.origins(), vec!["w", "y", "x"]);
    assert_eq!(engine.pending_events(), 0);
}

#[test]
fn queued_cycles_start_with_empty_event_data() {
    let engine = engine_with(vec![
        rule("key", &[], &[("$q", "queue('echo', 'tick')"), ("$first", "label")]),
        rule("echo", &["empty(#label)"], &[("$echoed", "true")]),
    ]);
    let data = json!({"label": "a"}).as_object().cloned().expect("object");
    engine.dispatch("key", "press", data).expect("dispatch");
    assert_eq!(engine.store().get("$first"), json!("a"));
    assert_eq!(engine.store().get("$echoed"), json!(true));
}

#[test]
fn listener_can_dispatch_reentrantly() {
    let store = Rc::new(StateStore::in_memory());
    let rules = rule_set(vec![
        rule("btn", &[], &[("$mode", "'speak'")]),
        rule("speaker", &["$mode == 'speak'"], &[("$spoken", "$spoken + 1")]),
    ]);
    let engine = Rc::new(
        RuleEngine::new(
            Rc::clone(&store),
            &rules,
            FunctionLibrary::standard(),
            EngineOptions::default(),
        )
        .expect("engine"),
    );

    let weak: Weak<RuleEngine> = Rc::downgrade(&engine);
    let nested_cycles = Rc::new(Cell::new(0));
    let counter = Rc::clone(&nested_cycles);
    store.observe(
        Listener::callback(move |_, _| {
            if let Some(engine) = weak.upgrade() {
                let outcome = engine
                    .dispatch("speaker", "changed", Document::new())
                    .expect("nested dispatch");
                counter.set(counter.get() + outcome.cycles.len());
            }
        }),
        &["$mode"],
    );

    engine
        .dispatch("btn", "press", Document::new())
        .expect("dispatch");
    assert_eq!(store.get("$spoken"), json!(1));
    assert_eq!(nested_cycles.get(), 1);
    assert_eq!(engine.last_dispatch().origin, "btn");
    assert_eq!(engine.pending_events(), 0);
}

#[test]
fn runaway_nested_dispatch_is_refused() {
    let store = Rc::new(StateStore::in_memory());
    let engine = Rc::new(
        RuleEngine::new(
            Rc::clone(&store),
            &rule_set(vec![rule("tick", &[], &[("$n", "$n + 1")])]),
            FunctionLibrary::standard(),
            EngineOptions {
                max_cycles: 100,
                max_nesting: 3,
            },
        )
        .expect("engine"),
    );
    let weak = Rc::downgrade(&engine);
    let refused = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&refused);
    store.observe(
        Listener::callback(move |_, _| {
            if let Some(engine) = weak.upgrade()
                && let Err(err) = engine.dispatch("tick", "again", Document::new())
            {
                sink.borrow_mut().push(err.to_string());
            }
        }),
        &["$n"],
    );

    engine
        .dispatch("tick", "press", Document::new())
        .expect("outer dispatch");
    assert_eq!(store.get("$n"), json!(3));
    assert_eq!(refused.borrow().len(), 1);
    assert!(refused.borrow()[0].contains("nested dispatch depth exceeded 3"));
}

#[test]
fn unbounded_self_trigger_is_reported_not_hung() {
    let engine = RuleEngine::new(
        Rc::new(StateStore::in_memory()),
        &rule_set(vec![rule(
            "loop",
            &[],
            &[("$n", "$n + 1"), ("$again", "queue('loop', 'tick')")],
        )]),
        FunctionLibrary::standard(),
        EngineOptions {
            max_cycles: 50,
            max_nesting: 4,
        },
    )
    .expect("engine");
    let err = engine
        .dispatch("loop", "press", Document::new())
        .expect_err("runaway");
    let EngineError::UnboundedCycle {
        limit,
        origin,
        event,
    } = err
    else {
        panic!("expected an unbounded cycle, got {err}");
    };
    assert_eq!((limit, origin.as_str(), event.as_str()), (50, "loop", "tick"));
    assert_eq!(engine.store().get("$n"), json!(50));
}

#[test]
fn failing_update_keeps_earlier_cycles() {
    let engine = engine_with(vec![
        rule("start", &[], &[("$a", "1"), ("$q", "queue('boom', 'tick')")]),
        rule("boom", &[], &[("$b", "nope + 1")]),
    ]);
    let err = engine
        .dispatch("start", "press", Document::new())
        .expect_err("abort");
    assert!(matches!(err, EngineError::Update { rule: 1, .. }));
    assert_eq!(engine.store().get("$a"), json!(1));
    assert_eq!(engine.store().get("$b"), Value::Null);
    assert_eq!(engine.pending_events(), 0);
}

#[test]
fn legacy_rules_upgrade_to_one_init_rule() {
    let design = upgrade(json!([
        {"event": "init", "conditions": ["$x"], "updates": {"$y": "1"}}
    ]))
    .expect("upgrade");
    let rules = RuleSet::from_design(&design).expect("rules");
    assert_eq!(rules.rules.len(), 1);
    assert_eq!(rules.rules[0].origin, "init");
    assert_eq!(rules.rules[0].conditions().count(), 1);
    assert_eq!(rules.rules[0].updates().count(), 1);

    let engine = RuleEngine::new(
        Rc::new(StateStore::in_memory()),
        &rules,
        FunctionLibrary::standard(),
        EngineOptions::default(),
    )
    .expect("engine");
    engine.store().update_value(json!({"$x": true})).expect("seed");
    engine.init().expect("init");
    assert_eq!(engine.store().get("$y"), json!(1));
}

#[test]
fn upgraded_updates_queue_events_in_authoring_order() {
    let document: Value = serde_json::from_str(
        r#"[
            {"event": "press", "origin": "b",
             "updates": {"$z": "queue('first', 't')", "$a": "queue('second', 't')"}},
            {"event": "t", "origin": "*", "updates": {"$seen": "1"}}
        ]"#,
    )
    .expect("json");
    let rules = RuleSet::from_design(&upgrade(document).expect("upgrade")).expect("rules");
    let engine = RuleEngine::new(
        Rc::new(StateStore::in_memory()),
        &rules,
        FunctionLibrary::standard(),
        EngineOptions::default(),
    )
    .expect("engine");

    let outcome = engine
        .dispatch("b", "press", Document::new())
        .expect("dispatch");
    assert_eq!(outcome.origins(), vec!["b", "second", "first"]);
}
