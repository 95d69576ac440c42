//! The host-facing scene surface.
//!
//! Hosts talk to the runtime in exactly three ways: they push external
//! events through [`Fact`]s (named root interops driven from outside), they
//! ask for a repaint ([`Runtime::paint`] walks the tree in draw order and
//! refreshes the hitbox list), and they route input by querying
//! [`Runtime::iter_hitboxes`]. Everything else happens inside the event
//! loop.

use std::sync::Arc;

use core_events::EventSink;
use core_table::RowHandle;
use core_value::{Schema, Value};

use crate::geometry::{Size2f, V2f, Xform};
use crate::node::NodeDescription;
use crate::op::EmitKind;
use crate::runtime::Runtime;
use crate::sketch::{Hitbox, Painter, Sketch};
use crate::GraphError;

/// An externally driven emission source: a named interface operator on the
/// root node. Facts are handed to host threads; every call goes through
/// the event queue, so emissions stay linearized with everything else.
pub struct Fact {
    op: RowHandle,
    schema: Schema,
    sink: EventSink<Runtime>,
}

impl Fact {
    pub fn handle(&self) -> RowHandle {
        self.op
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Emits a value. The schema is validated eagerly so a host bug
    /// surfaces at the call site, not as a failed operator later.
    pub fn next(&self, value: Value) -> Result<(), GraphError> {
        if value.schema() != &self.schema {
            return Err(GraphError::EmitSchemaMismatch(self.op));
        }
        let op = self.op;
        self.sink.blocking_call(move |rt| rt.emit(op, EmitKind::Next, value));
        Ok(())
    }

    pub fn fail(&self, error: Value) {
        let op = self.op;
        self.sink.blocking_call(move |rt| rt.emit(op, EmitKind::Fail, error));
    }

    pub fn complete(&self) {
        let op = self.op;
        self.sink
            .blocking_call(move |rt| rt.emit(op, EmitKind::Complete, Value::none()));
    }
}

impl Runtime {
    /// Builds the scene: creates the root node from `description` and
    /// transitions it into its initial state. Replaces any existing scene.
    pub fn initialize_scene(
        &mut self,
        description: Arc<NodeDescription>,
    ) -> Result<RowHandle, GraphError> {
        self.clear_scene();
        let root = self.create_node_row(RowHandle::null(), None, description.clone())?;
        self.scene.root = root;
        self.transition_into(root, &description.initial_state)?;
        tracing::info!(target: "runtime.scene", root = ?root, "scene initialized");
        Ok(root)
    }

    /// Tears the scene down: the root and everything it owns.
    pub fn clear_scene(&mut self) {
        let root = self.scene.root;
        if !root.is_null() {
            self.remove_node(root);
        }
        self.scene.root = RowHandle::null();
        self.scene.hitboxes.clear();
    }

    pub fn root(&self) -> RowHandle {
        self.scene.root
    }

    pub fn size(&self) -> Size2f {
        self.scene.size
    }

    /// Resizes the scene; triggers a top-down relayout when the size
    /// actually changed.
    pub fn set_size(&mut self, size: Size2f) -> Result<(), GraphError> {
        if size == self.scene.size {
            return Ok(());
        }
        self.scene.size = size;
        let root = self.scene.root;
        if root.is_null() {
            return Ok(());
        }
        self.relayout_down(root, size)
    }

    /// A fact handle for a named root interop.
    pub fn get_fact(&self, name: &str) -> Result<Fact, GraphError> {
        let root = self.scene.root;
        let op = self
            .get_interop(root, name)
            .ok_or_else(|| GraphError::UnknownInterop {
                node: root,
                name: name.to_string(),
            })?;
        let schema = self
            .op_value(op)
            .map(|value| value.schema().clone())
            .ok_or(GraphError::StaleOperator(op))?;
        let sink = self.sink().ok_or(GraphError::NoSink)?.clone();
        Ok(Fact { op, schema, sink })
    }

    /// Evaluates one node's design against its current grant. Nodes
    /// without a design produce an empty sketch.
    pub fn sketch_node(&self, node: RowHandle) -> Result<Sketch, GraphError> {
        let row = self.nodes().get(node).ok_or(GraphError::StaleNode(node))?;
        let Some(design) = &row.design else {
            return Ok(Sketch::default());
        };
        let grant = self.node_composition(node).grant;
        design.sketch(self, node, grant)
    }

    /// Paints the whole scene in draw order and refreshes the hitbox list
    /// (hitboxes are stored in scene coordinates).
    pub fn paint(&mut self, painter: &mut dyn Painter) -> Result<(), GraphError> {
        let root = self.scene.root;
        if root.is_null() {
            return Ok(());
        }
        let mut painted: Vec<(RowHandle, Xform, f64, Sketch)> = Vec::new();
        self.collect_paint(root, Xform::identity(), 1.0, &mut painted)?;

        self.scene.hitboxes = painted
            .iter()
            .flat_map(|(_, xform, _, sketch)| {
                sketch.hitboxes.iter().map(|hitbox| Hitbox {
                    shape: hitbox.shape.transformed(xform),
                    operator: hitbox.operator,
                })
            })
            .collect();

        for (node, xform, opacity, sketch) in &painted {
            painter.paint(*node, xform, *opacity, sketch);
        }
        Ok(())
    }

    fn collect_paint(
        &self,
        node: RowHandle,
        parent_xform: Xform,
        parent_opacity: f64,
        out: &mut Vec<(RowHandle, Xform, f64, Sketch)>,
    ) -> Result<(), GraphError> {
        if self.node_visibility(node) < 0.5 {
            return Ok(()); // invisible nodes hide their whole subtree
        }
        let composition = self.node_composition(node);
        let xform = parent_xform
            .concat(&composition.xform)
            .concat(&self.node_xform(node));
        let opacity = parent_opacity * composition.opacity.clamp(0.0, 1.0);
        let sketch = self.sketch_node(node)?;
        out.push((node, xform, opacity, sketch));

        let layout = self.nodes().get(node).map(|row| row.layout);
        if let Some(layout) = layout.filter(|layout| !layout.is_null()) {
            for child in self.layout_draw_order(layout) {
                self.collect_paint(child, xform, opacity, out)?;
            }
        }
        Ok(())
    }

    /// Hitboxes under a position, in reverse draw order (topmost first).
    pub fn iter_hitboxes(&self, pos: V2f) -> impl Iterator<Item = &Hitbox> {
        self.scene
            .hitboxes
            .iter()
            .rev()
            .filter(move |hitbox| hitbox.shape.contains(pos))
    }

    fn node_visibility(&self, node: RowHandle) -> f64 {
        self.get_interop(node, "widget.visibility")
            .and_then(|op| self.op_value(op))
            .and_then(|value| value.as_f64().ok())
            .unwrap_or(1.0)
    }

    /// The node's own `widget.xform` interop as a transform.
    fn node_xform(&self, node: RowHandle) -> Xform {
        let Some(value) = self
            .get_interop(node, "widget.xform")
            .and_then(|op| self.op_value(op))
        else {
            return Xform::identity();
        };
        let mut words = [0.0f64; 6];
        for (index, slot) in words.iter_mut().enumerate() {
            match value.index(index as i64).and_then(|v| Ok(v.as_f64()?)) {
                Ok(number) => *slot = number,
                Err(_) => return Xform::identity(),
            }
        }
        Xform(words)
    }
}
