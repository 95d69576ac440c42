//! Scene lifecycle: node creation, interface operators, state transitions,
//! connection resolution, removal and relayout.

mod common;

use std::sync::Arc;

use common::test_runtime;
use core_path::Path;
use core_runtime::layout::kinds as layout_kinds;
use core_runtime::node::{NodeDescription, StateDescription};
use core_runtime::{Claim, EmitterStatus, GraphError, Runtime, Size2f, Stretch};
use core_value::{Value, den};
use indexmap::IndexMap;

fn leaf_description(claim: Claim) -> Arc<NodeDescription> {
    let mut interface = IndexMap::new();
    interface.insert("input".to_string(), Value::from(0.0));
    let state = StateDescription {
        claim,
        ..StateDescription::default()
    };
    Arc::new(NodeDescription::single_state(interface, state))
}

fn pipeline_description(test_kinds: common::TestKinds) -> Arc<NodeDescription> {
    // root: |tick -> double -> child/|input
    let mut interface = IndexMap::new();
    interface.insert("tick".to_string(), Value::from(0.0));

    let mut operators = IndexMap::new();
    operators.insert("double".to_string(), (test_kinds.doubler, Value::none()));

    let mut children = IndexMap::new();
    children.insert("child".to_string(), leaf_description(Claim::default()));

    let state = StateDescription {
        operators,
        connections: vec![
            (Path::parse("|tick").unwrap(), Path::parse("double").unwrap()),
            (
                Path::parse("double").unwrap(),
                Path::parse("child/|input").unwrap(),
            ),
        ],
        children,
        ..StateDescription::default()
    };
    Arc::new(NodeDescription::single_state(interface, state))
}

#[test]
fn scene_initialization_builds_interface_and_children() {
    let (mut rt, test_kinds) = test_runtime();
    let root = rt.initialize_scene(pipeline_description(test_kinds)).unwrap();

    assert_eq!(rt.root(), root);
    assert_eq!(rt.node_state(root).as_deref(), Some("default"));
    // declared interface plus the widget builtins
    assert!(rt.get_interop(root, "tick").is_some());
    assert!(rt.get_interop(root, "widget.opacity").is_some());
    assert!(rt.get_interop(root, "widget.claim").is_some());

    let child = rt.get_node(&Path::parse("/child").unwrap()).unwrap();
    assert_eq!(rt.node_name(child).as_deref(), Some("child"));
    assert_eq!(rt.node_path(child).to_string(), "/child");
    assert_eq!(rt.node_parent(child), Some(root));
    assert_eq!(rt.node_path(root).to_string(), "/");
}

#[test]
fn connections_route_through_dynamic_operators() {
    let (mut rt, test_kinds) = test_runtime();
    let root = rt.initialize_scene(pipeline_description(test_kinds)).unwrap();
    let tick = rt.get_interop(root, "tick").unwrap();
    let child = rt.get_node(&Path::parse("/child").unwrap()).unwrap();
    let input = rt.get_interop(child, "input").unwrap();

    rt.emit_next(tick, Value::from(21.0));
    // tick -> doubler -> child input
    assert_eq!(rt.op_value(input).unwrap(), &Value::from(42.0));
    assert!(rt.take_errors().is_empty());
}

#[test]
fn relative_paths_resolve_against_nodes() {
    let (mut rt, test_kinds) = test_runtime();
    let root = rt.initialize_scene(pipeline_description(test_kinds)).unwrap();
    let child = rt.get_node(&Path::parse("/child").unwrap()).unwrap();

    // down, up, and in place
    assert_eq!(
        rt.node_descendant(root, &Path::parse("child").unwrap()).unwrap(),
        child
    );
    assert_eq!(
        rt.node_descendant(child, &Path::parse("..").unwrap()).unwrap(),
        root
    );
    assert_eq!(
        rt.node_descendant(child, &Path::parse(".").unwrap()).unwrap(),
        child
    );
    assert!(matches!(
        rt.node_descendant(root, &Path::parse("missing").unwrap()),
        Err(GraphError::Path(_))
    ));
    assert!(matches!(
        rt.node_descendant(root, &Path::parse("..").unwrap()),
        Err(GraphError::Path(_))
    ));
}

#[test]
fn unresolvable_connection_fails_the_transition() {
    let (mut rt, _) = test_runtime();
    let state = StateDescription {
        connections: vec![(
            Path::parse("|missing").unwrap(),
            Path::parse("nowhere").unwrap(),
        )],
        ..StateDescription::default()
    };
    let description = Arc::new(NodeDescription::single_state(IndexMap::new(), state));
    assert!(matches!(
        rt.initialize_scene(description).unwrap_err(),
        GraphError::UnknownInterop { .. }
    ));
}

#[test]
fn state_transitions_rebuild_the_network() {
    let (mut rt, test_kinds) = test_runtime();

    let mut off_ops = IndexMap::new();
    off_ops.insert("watch".to_string(), (test_kinds.doubler, Value::none()));
    let off = StateDescription {
        operators: off_ops,
        ..StateDescription::default()
    };

    let mut on_ops = IndexMap::new();
    on_ops.insert("watch".to_string(), (test_kinds.doubler, Value::none()));
    on_ops.insert("extra".to_string(), (test_kinds.doubler, Value::none()));
    let mut on_children = IndexMap::new();
    on_children.insert("panel".to_string(), leaf_description(Claim::default()));
    let on = StateDescription {
        operators: on_ops,
        children: on_children,
        ..StateDescription::default()
    };

    let mut states = IndexMap::new();
    states.insert("off".to_string(), off);
    states.insert("on".to_string(), on);
    let description = Arc::new(NodeDescription {
        interface: IndexMap::new(),
        states,
        transitions: vec![("off".to_string(), "on".to_string())],
        initial_state: "off".to_string(),
    });

    let root = rt.initialize_scene(description).unwrap();
    assert_eq!(rt.node_state(root).as_deref(), Some("off"));
    let ops_in_off = rt.operator_count();

    rt.transition_into(root, "on").unwrap();
    assert_eq!(rt.node_state(root).as_deref(), Some("on"));
    assert!(rt.get_node(&Path::parse("/panel").unwrap()).is_ok());
    assert!(rt.operator_count() > ops_in_off);

    // "on" -> "off" was never allowed
    assert!(matches!(
        rt.transition_into(root, "off").unwrap_err(),
        GraphError::TransitionDenied { .. }
    ));
    // and unknown states are rejected outright
    assert!(matches!(
        rt.transition_into(root, "limbo").unwrap_err(),
        GraphError::UnknownState(_)
    ));
}

#[test]
fn node_removal_cleans_every_table() {
    let (mut rt, test_kinds) = test_runtime();
    rt.initialize_scene(pipeline_description(test_kinds)).unwrap();
    assert!(rt.operator_count() > 0);
    assert!(rt.node_count() > 0);

    rt.clear_scene();
    assert_eq!(rt.node_count(), 0);
    assert_eq!(rt.operator_count(), 0);
    assert!(rt.root().is_null());
}

#[test]
fn removing_a_node_completes_nothing_but_detaches_everything() {
    let (mut rt, test_kinds) = test_runtime();
    let root = rt.initialize_scene(pipeline_description(test_kinds)).unwrap();
    let tick = rt.get_interop(root, "tick").unwrap();
    let child = rt.get_node(&Path::parse("/child").unwrap()).unwrap();

    rt.remove_node(child);
    assert!(rt.get_node(&Path::parse("/child").unwrap()).is_err());
    // the doubler lost its subscriber (the child input) and was reaped with
    // it; emitting into the tick is now a no-op but not an error
    rt.emit_next(tick, Value::from(1.0));
    assert!(rt.take_errors().is_empty());
    assert_eq!(rt.op_status(tick), Some(EmitterStatus::Idle));
}

#[test]
fn flex_layout_distributes_width_and_relayout_skips_unchanged() {
    let (mut rt, _) = test_runtime();

    let mut children = IndexMap::new();
    children.insert(
        "left".to_string(),
        leaf_description(Claim {
            horizontal: Stretch::new(100.0, 50.0, 150.0, 1.0, 0.0),
            vertical: Stretch::fixed(40.0),
        }),
    );
    children.insert(
        "right".to_string(),
        leaf_description(Claim {
            horizontal: Stretch::new(100.0, 50.0, 400.0, 3.0, 0.0),
            vertical: Stretch::fixed(40.0),
        }),
    );
    let state = StateDescription {
        children,
        layout: (layout_kinds::FLEX, Value::none()),
        ..StateDescription::default()
    };
    let description = Arc::new(NodeDescription::single_state(IndexMap::new(), state));
    let root = rt.initialize_scene(description).unwrap();

    rt.set_size(Size2f::new(600.0, 100.0)).unwrap();
    let layout = {
        let composition = rt
            .layout_composition(rt_layout(&rt, root))
            .expect("composition present")
            .clone();
        composition
    };
    let left = &layout.nodes["left"];
    let right = &layout.nodes["right"];
    // 400 spare pixels split 1:3, capped by the claims
    assert_eq!(left.grant.width, 150.0);
    assert_eq!(right.grant.width, 400.0);
    assert_eq!(left.grant.height, 40.0);
    // the right child is offset by the left child's width
    assert_eq!(right.xform.apply(core_runtime::V2f::default()).x, 150.0);

    // a same-size set_size is a no-op
    rt.set_size(Size2f::new(600.0, 100.0)).unwrap();
}

#[test]
fn overlay_layout_clamps_grants_to_claims() {
    let (mut rt, _) = test_runtime();
    let mut children = IndexMap::new();
    children.insert(
        "card".to_string(),
        leaf_description(Claim::fixed(120.0, 80.0)),
    );
    let state = StateDescription {
        children,
        ..StateDescription::default()
    };
    let description = Arc::new(NodeDescription::single_state(IndexMap::new(), state));
    let root = rt.initialize_scene(description).unwrap();

    rt.set_size(Size2f::new(500.0, 500.0)).unwrap();
    let composition = rt
        .layout_composition(rt_layout(&rt, root))
        .expect("composition present");
    let card = &composition.nodes["card"];
    assert_eq!(card.grant, Size2f::new(120.0, 80.0));
}

#[test]
fn duplicate_child_names_are_rejected() {
    let (mut rt, _) = test_runtime();
    let description = Arc::new(NodeDescription::single_state(
        IndexMap::new(),
        StateDescription::default(),
    ));
    let root = rt.initialize_scene(description.clone()).unwrap();
    rt.create_child(root, "twin", description.clone()).unwrap();
    assert!(matches!(
        rt.create_child(root, "twin", description).unwrap_err(),
        GraphError::DuplicateChild(_)
    ));
}

#[test]
fn reserved_interface_namespace_is_rejected() {
    let (mut rt, _) = test_runtime();
    let mut interface = IndexMap::new();
    interface.insert("widget.opacity".to_string(), Value::from(1.0));
    let description = Arc::new(NodeDescription::single_state(
        interface,
        StateDescription::default(),
    ));
    assert!(matches!(
        rt.initialize_scene(description).unwrap_err(),
        GraphError::ReservedInterface(_)
    ));
}

#[test]
fn claims_flow_through_the_claim_interop() {
    let (mut rt, _) = test_runtime();
    let mut children = IndexMap::new();
    children.insert(
        "sized".to_string(),
        leaf_description(Claim::fixed(64.0, 32.0)),
    );
    let state = StateDescription {
        children,
        ..StateDescription::default()
    };
    let description = Arc::new(NodeDescription::single_state(IndexMap::new(), state));
    rt.initialize_scene(description).unwrap();

    let child = rt.get_node(&Path::parse("/sized").unwrap()).unwrap();
    let claim_op = rt.get_interop(child, "widget.claim").unwrap();
    let claim = Claim::from_value(rt.op_value(claim_op).unwrap()).unwrap();
    assert_eq!(claim, Claim::fixed(64.0, 32.0));
}

#[test]
fn values_on_interops_round_trip_as_records() {
    let (mut rt, _) = test_runtime();
    let mut interface = IndexMap::new();
    let position = Value::from_denotable(den!({"x": 0, "y": 0})).unwrap();
    interface.insert("press".to_string(), position.clone());
    let description = Arc::new(NodeDescription::single_state(
        interface,
        StateDescription::default(),
    ));
    let root = rt.initialize_scene(description).unwrap();
    let press = rt.get_interop(root, "press").unwrap();

    let point = Value::from_denotable(den!({"x": 3, "y": 4})).unwrap();
    rt.emit_next(press, point.clone());
    assert_eq!(rt.op_value(press).unwrap(), &point);
}

/// The root node's current layout handle.
fn rt_layout(rt: &Runtime, root: core_table::RowHandle) -> core_table::RowHandle {
    rt.node_layout(root)
}
