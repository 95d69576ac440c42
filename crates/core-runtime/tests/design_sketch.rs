//! Designs and sketches: expression evaluation, caches, marks, painting
//! and hit testing.

mod common;

use std::sync::Arc;

use common::test_runtime;
use core_path::Path;
use core_runtime::design::{CallSpec, DesignSpec, PaintSpec, ShapeSpec, ValueSpec};
use core_runtime::node::{NodeDescription, StateDescription};
use core_runtime::{DrawCall, GraphError, Painter, Size2f, Sketch, V2f, Xform};
use core_table::RowHandle;
use core_value::{Value, den};
use indexmap::IndexMap;

fn red() -> PaintSpec {
    PaintSpec::Color {
        r: 1.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    }
}

/// A bar whose width follows the grant and whose height follows the
/// `level` interop, plus a press-mark over the top-left corner.
fn bar_description() -> Arc<NodeDescription> {
    let mut interface = IndexMap::new();
    interface.insert("level".to_string(), Value::from(20.0));
    interface.insert(
        "press".to_string(),
        Value::from_denotable(den!({"x": 0, "y": 0})).unwrap(),
    );

    let bar = ShapeSpec::RoundedRect {
        x: ValueSpec::number(0.0),
        y: ValueSpec::number(0.0),
        width: ValueSpec::expression("grant.width / 2"),
        height: ValueSpec::Interop("level".to_string()),
        radius: ValueSpec::number(0.0),
    };
    let press_zone = ShapeSpec::RoundedRect {
        x: ValueSpec::number(0.0),
        y: ValueSpec::number(0.0),
        width: ValueSpec::number(50.0),
        height: ValueSpec::number(50.0),
        radius: ValueSpec::number(0.0),
    };
    let design = DesignSpec::new(vec![
        CallSpec::fill(bar, red()),
        CallSpec::Mark {
            shape: press_zone,
            interop: "press".to_string(),
        },
    ]);

    let state = StateDescription {
        design,
        ..StateDescription::default()
    };
    Arc::new(NodeDescription::single_state(interface, state))
}

struct TestPainter {
    calls: Vec<(RowHandle, Xform, f64, usize)>,
}

impl Painter for TestPainter {
    fn paint(&mut self, node: RowHandle, xform: &Xform, opacity: f64, sketch: &Sketch) {
        self.calls.push((node, *xform, opacity, sketch.draw_calls.len()));
    }
}

fn fill_bounds(sketch: &Sketch) -> (f64, f64) {
    match &sketch.draw_calls[0] {
        DrawCall::Fill(fill) => (fill.shape.aabr().max.x, fill.shape.aabr().max.y),
        DrawCall::Stroke(_) => panic!("expected a fill"),
    }
}

#[test]
fn expressions_see_the_grant_and_interops() {
    let (mut rt, _) = test_runtime();
    let root = rt.initialize_scene(bar_description()).unwrap();
    rt.set_size(Size2f::new(300.0, 200.0)).unwrap();

    let sketch = rt.sketch_node(root).unwrap();
    assert_eq!(sketch.draw_calls.len(), 1);
    let (width, height) = fill_bounds(&sketch);
    assert_eq!(width, 150.0); // grant.width / 2
    assert_eq!(height, 20.0); // the level interop's initial value
}

#[test]
fn interop_changes_flow_into_the_next_generation() {
    let (mut rt, _) = test_runtime();
    let root = rt.initialize_scene(bar_description()).unwrap();
    rt.set_size(Size2f::new(300.0, 200.0)).unwrap();

    let (_, height) = fill_bounds(&rt.sketch_node(root).unwrap());
    assert_eq!(height, 20.0);

    let level = rt.get_interop(root, "level").unwrap();
    rt.emit_next(level, Value::from(77.0));
    let (width, height) = fill_bounds(&rt.sketch_node(root).unwrap());
    assert_eq!(height, 77.0);
    assert_eq!(width, 150.0);
}

#[test]
fn sketches_are_stable_across_unchanged_generations() {
    let (mut rt, _) = test_runtime();
    let root = rt.initialize_scene(bar_description()).unwrap();
    rt.set_size(Size2f::new(300.0, 200.0)).unwrap();

    let first = rt.sketch_node(root).unwrap();
    let second = rt.sketch_node(root).unwrap();
    assert_eq!(first.draw_calls, second.draw_calls);
    assert_eq!(first.hitboxes.len(), second.hitboxes.len());
}

#[test]
fn marks_become_hitboxes_bound_to_interops() {
    let (mut rt, _) = test_runtime();
    let root = rt.initialize_scene(bar_description()).unwrap();
    rt.set_size(Size2f::new(300.0, 200.0)).unwrap();

    let mut painter = TestPainter { calls: Vec::new() };
    rt.paint(&mut painter).unwrap();
    assert_eq!(painter.calls.len(), 1);

    let press = rt.get_interop(root, "press").unwrap();
    let hits: Vec<_> = rt.iter_hitboxes(V2f::new(10.0, 10.0)).collect();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].operator, press);

    assert_eq!(rt.iter_hitboxes(V2f::new(200.0, 10.0)).count(), 0);

    // a hit routes input through the marked interop
    let point = Value::from_denotable(den!({"x": 10, "y": 10})).unwrap();
    rt.emit_next(press, point.clone());
    assert_eq!(rt.op_value(press).unwrap(), &point);
}

#[test]
fn marks_require_a_position_interop() {
    let (mut rt, _) = test_runtime();
    let mut interface = IndexMap::new();
    interface.insert("not_a_point".to_string(), Value::from(0.0));
    let design = DesignSpec::new(vec![CallSpec::Mark {
        shape: ShapeSpec::RoundedRect {
            x: ValueSpec::number(0.0),
            y: ValueSpec::number(0.0),
            width: ValueSpec::number(10.0),
            height: ValueSpec::number(10.0),
            radius: ValueSpec::number(0.0),
        },
        interop: "not_a_point".to_string(),
    }]);
    let state = StateDescription {
        design,
        ..StateDescription::default()
    };
    let description = Arc::new(NodeDescription::single_state(interface, state));
    assert!(matches!(
        rt.initialize_scene(description).unwrap_err(),
        GraphError::Design(_)
    ));
}

#[test]
fn paint_walks_children_and_respects_visibility() {
    let (mut rt, _) = test_runtime();

    // root with one designed child
    let mut children = IndexMap::new();
    children.insert("bar".to_string(), bar_description());
    let state = StateDescription {
        children,
        ..StateDescription::default()
    };
    let description = Arc::new(NodeDescription::single_state(IndexMap::new(), state));
    rt.initialize_scene(description).unwrap();
    rt.set_size(Size2f::new(300.0, 200.0)).unwrap();

    let mut painter = TestPainter { calls: Vec::new() };
    rt.paint(&mut painter).unwrap();
    // root (no design -> zero draw calls) plus the bar
    assert_eq!(painter.calls.len(), 2);
    assert_eq!(painter.calls[0].3, 0);
    assert_eq!(painter.calls[1].3, 1);

    // hiding the child prunes its subtree from the paint walk
    let bar = rt.get_node(&Path::parse("/bar").unwrap()).unwrap();
    let visibility = rt.get_interop(bar, "widget.visibility").unwrap();
    rt.emit_next(visibility, Value::from(0.0));
    let mut painter = TestPainter { calls: Vec::new() };
    rt.paint(&mut painter).unwrap();
    assert_eq!(painter.calls.len(), 1);
    // its hitboxes disappeared with it
    assert_eq!(rt.iter_hitboxes(V2f::new(10.0, 10.0)).count(), 0);
}

#[test]
fn reverse_draw_order_puts_the_topmost_hit_first() {
    let (mut rt, _) = test_runtime();

    // two overlapping marked bars; "top" is painted later via depth
    let mut children = IndexMap::new();
    children.insert("bottom".to_string(), bar_description());
    children.insert("top".to_string(), bar_description());
    let state = StateDescription {
        children,
        ..StateDescription::default()
    };
    let description = Arc::new(NodeDescription::single_state(IndexMap::new(), state));
    rt.initialize_scene(description).unwrap();
    rt.set_size(Size2f::new(300.0, 200.0)).unwrap();

    let bottom = rt.get_node(&Path::parse("/bottom").unwrap()).unwrap();
    let top = rt.get_node(&Path::parse("/top").unwrap()).unwrap();
    let depth = rt.get_interop(top, "widget.depth").unwrap();
    rt.emit_next(depth, Value::from(1.0));

    let mut painter = TestPainter { calls: Vec::new() };
    rt.paint(&mut painter).unwrap();

    let bottom_press = rt.get_interop(bottom, "press").unwrap();
    let top_press = rt.get_interop(top, "press").unwrap();
    let hits: Vec<_> = rt.iter_hitboxes(V2f::new(10.0, 10.0)).collect();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].operator, top_press, "topmost first");
    assert_eq!(hits[1].operator, bottom_press);
}
