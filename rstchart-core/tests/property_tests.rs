//! Property-based tests for the step engine.
//!
//! Charts are generated with a random shape (compound and parallel states
//! with atomic children) and random event-driven transitions between any
//! two states.

use proptest::prelude::*;
use rstchart_core::{ActionRegistry, ChartDocument, Executor, Model, StateIdx, StateKind, Status};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

const EVENTS: [&str; 3] = ["e0", "e1", "e2"];

fn build_chart(shape: &[(usize, bool)], edges: &[(usize, usize, usize)]) -> Value {
    let mut ids = Vec::new();
    for (i, (children, _)) in shape.iter().enumerate() {
        ids.push(format!("s{}", i));
        for j in 0..*children {
            ids.push(format!("s{}_{}", i, j));
        }
    }

    let mut transitions: Map<String, Value> = Map::new();
    for (event, source, target) in edges {
        let source = &ids[source % ids.len()];
        let target = &ids[target % ids.len()];
        let entry = transitions
            .entry(source.clone())
            .or_insert_with(|| json!([]));
        if let Value::Array(list) = entry {
            list.push(json!({"event": EVENTS[event % EVENTS.len()], "target": target}));
        }
    }
    let transitions_of = |id: &str| transitions.get(id).cloned().unwrap_or_else(|| json!([]));

    let states: Vec<Value> = shape
        .iter()
        .enumerate()
        .map(|(i, (children, parallel))| {
            let id = format!("s{}", i);
            let kids: Vec<Value> = (0..*children)
                .map(|j| {
                    let kid = format!("s{}_{}", i, j);
                    json!({"id": kid, "transitions": transitions_of(&kid)})
                })
                .collect();
            json!({
                "id": id,
                "parallel": *parallel && *children > 0,
                "states": kids,
                "transitions": transitions_of(&id),
            })
        })
        .collect();

    json!({"name": "generated", "states": states})
}

prop_compose! {
    fn arbitrary_chart()(
        shape in prop::collection::vec((0..4usize, any::<bool>()), 1..5),
        edges in prop::collection::vec((0..3usize, 0..64usize, 0..64usize), 0..16),
    ) -> Value {
        build_chart(&shape, &edges)
    }
}

fn arbitrary_events() -> impl Strategy<Value = Vec<&'static str>> {
    prop::collection::vec(prop::sample::select(EVENTS.to_vec()), 0..20)
}

fn executor(model: &Arc<Model>) -> Executor {
    let mut executor = Executor::new(model.clone());
    executor.start().unwrap();
    executor
}

fn check_configuration(model: &Model, status: &Status) -> Result<(), TestCaseError> {
    let active: HashSet<StateIdx> = status
        .active
        .iter()
        .map(|id| model.find(id).unwrap())
        .collect();

    let top = model
        .state(StateIdx::ROOT)
        .children
        .iter()
        .filter(|c| active.contains(c))
        .count();
    prop_assert_eq!(top, 1);

    for (idx, node) in model.states() {
        if !active.contains(&idx) {
            continue;
        }
        if let Some(parent) = node.parent {
            prop_assert!(parent == StateIdx::ROOT || active.contains(&parent));
        }
        let active_children = node.children.iter().filter(|c| active.contains(c)).count();
        match node.kind {
            StateKind::Compound => {
                prop_assert_eq!(active_children, 1);
            }
            StateKind::Parallel => {
                prop_assert_eq!(active_children, node.children.len());
            }
            StateKind::Atomic | StateKind::Final => {
                prop_assert!(status.states.contains(&node.id));
            }
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn configuration_is_always_a_leaf_frontier(chart in arbitrary_chart(), events in arbitrary_events()) {
        let model = Arc::new(Model::from_json(&chart, &ActionRegistry::new()).unwrap());
        let mut executor = executor(&model);
        check_configuration(&model, &executor.status())?;

        for event in events {
            let status = executor.submit(event).unwrap();
            check_configuration(&model, &status)?;
        }
    }

    #[test]
    fn execution_is_deterministic(chart in arbitrary_chart(), events in arbitrary_events()) {
        let model = Arc::new(Model::from_json(&chart, &ActionRegistry::new()).unwrap());
        let mut first = executor(&model);
        let mut second = executor(&model);

        for event in events {
            prop_assert_eq!(first.submit(event).unwrap(), second.submit(event).unwrap());
        }
    }

    #[test]
    fn formatting_does_not_change_model(chart in arbitrary_chart(), events in arbitrary_events()) {
        let registry = ActionRegistry::new();
        let compact = serde_json::to_string(&chart).unwrap();
        let pretty = serde_json::to_string_pretty(&chart).unwrap();

        let a = Arc::new(Model::build(&ChartDocument::from_json_str(&compact).unwrap(), &registry).unwrap());
        let b = Arc::new(Model::build(&ChartDocument::from_json_str(&pretty).unwrap(), &registry).unwrap());
        prop_assert_eq!(a.checksum(), b.checksum());

        let mut first = executor(&a);
        let mut second = executor(&b);
        for event in events {
            prop_assert_eq!(first.submit(event).unwrap(), second.submit(event).unwrap());
        }
    }

    #[test]
    fn unmatched_event_is_a_noop(chart in arbitrary_chart(), events in arbitrary_events()) {
        let model = Arc::new(Model::from_json(&chart, &ActionRegistry::new()).unwrap());
        let mut executor = executor(&model);
        for event in events {
            executor.submit(event).unwrap();
        }

        let before = executor.status();
        let data = executor.data().clone();
        prop_assert_eq!(executor.submit("unrelated").unwrap(), before);
        prop_assert_eq!(executor.data(), &data);
    }
}
