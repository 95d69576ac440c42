//! The explicit runtime: owner of every table, registry and scene state.
//!
//! One `Runtime` instance is handed to the event loop, which owns it for
//! the lifetime of the application and linearizes all access. There is no
//! global; everything that wants to touch the graph goes through a
//! `&mut Runtime` it was given.
//!
//! Teardown order matters: dropping the runtime removes the scene first
//! (nodes own interface operators and layouts), then the tables go away in
//! reverse dependency order with the struct itself.

use core_events::EventSink;
use core_table::{RowHandle, Table};

use crate::geometry::Size2f;
use crate::layout::{LayoutRegistry, LayoutRow};
use crate::node::NodeRow;
use crate::op::OperatorRow;
use crate::registry::Registry;
use crate::sketch::Hitbox;
use crate::{GraphError, LAYOUTS, NODES, OPERATORS};

/// Scene-level state owned by the runtime.
pub(crate) struct SceneState {
    pub root: RowHandle,
    pub size: Size2f,
    /// Hitboxes of the last paint, in draw order.
    pub hitboxes: Vec<Hitbox>,
}

/// Collects contained runtime errors (cyclic emissions, callback failures)
/// instead of letting them unwind across the event loop boundary. The host
/// drains it; tests assert on it.
#[derive(Default)]
pub struct ErrorSink {
    entries: Vec<GraphError>,
}

impl ErrorSink {
    pub fn report(&mut self, error: GraphError) {
        tracing::error!(target: "runtime", error = %error, "runtime error");
        self.entries.push(error);
    }

    pub fn entries(&self) -> &[GraphError] {
        &self.entries
    }

    pub fn take(&mut self) -> Vec<GraphError> {
        std::mem::take(&mut self.entries)
    }
}

pub struct Runtime {
    ops: Table<OperatorRow>,
    nodes: Table<NodeRow>,
    layouts: Table<LayoutRow>,
    registry: Registry,
    layout_registry: LayoutRegistry,
    sink: Option<EventSink<Runtime>>,
    errors: ErrorSink,
    pub(crate) scene: SceneState,
    redraw_requested: bool,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// A runtime with the builtin operator and layout registries and an
    /// empty scene. Attach a sink before using operators that schedule.
    pub fn new() -> Self {
        Self {
            ops: Table::new(OPERATORS),
            nodes: Table::new(NODES),
            layouts: Table::new(LAYOUTS),
            registry: Registry::with_builtins(),
            layout_registry: LayoutRegistry::with_builtins(),
            sink: None,
            errors: ErrorSink::default(),
            scene: SceneState {
                root: RowHandle::null(),
                size: Size2f::default(),
                hitboxes: Vec::new(),
            },
            redraw_requested: false,
        }
    }

    /// Wires the runtime to its event loop; required for `schedule`, facts
    /// and every operator kind that produces asynchronously.
    pub fn attach_sink(&mut self, sink: EventSink<Runtime>) {
        self.sink = Some(sink);
    }

    pub fn sink(&self) -> Option<&EventSink<Runtime>> {
        self.sink.as_ref()
    }

    pub(crate) fn ops(&self) -> &Table<OperatorRow> {
        &self.ops
    }

    pub(crate) fn ops_mut(&mut self) -> &mut Table<OperatorRow> {
        &mut self.ops
    }

    pub(crate) fn nodes(&self) -> &Table<NodeRow> {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut Table<NodeRow> {
        &mut self.nodes
    }

    pub(crate) fn layouts(&self) -> &Table<LayoutRow> {
        &self.layouts
    }

    pub(crate) fn layouts_mut(&mut self) -> &mut Table<LayoutRow> {
        &mut self.layouts
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Mutable registry access for installing additional operator kinds.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub(crate) fn layout_registry(&self) -> &LayoutRegistry {
        &self.layout_registry
    }

    pub fn report_error(&mut self, error: GraphError) {
        self.errors.report(error);
    }

    /// Errors contained since the last drain.
    pub fn errors(&self) -> &[GraphError] {
        self.errors.entries()
    }

    pub fn take_errors(&mut self) -> Vec<GraphError> {
        self.errors.take()
    }

    /// Set by operators that animate (e.g. Sine); drained by the host once
    /// per frame.
    pub fn request_redraw(&mut self) {
        self.redraw_requested = true;
    }

    pub fn take_redraw_request(&mut self) -> bool {
        std::mem::take(&mut self.redraw_requested)
    }

    /// Live operator count (diagnostics and tests).
    pub fn operator_count(&self) -> usize {
        self.ops.len()
    }

    /// Live node count (diagnostics and tests).
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn op_downstream(&self, op: RowHandle) -> Vec<RowHandle> {
        self.ops
            .get(op)
            .map(|row| row.downstream.clone())
            .unwrap_or_default()
    }

    pub fn op_upstream(&self, op: RowHandle) -> Vec<RowHandle> {
        self.ops
            .get(op)
            .map(|row| row.upstream.clone())
            .unwrap_or_default()
    }

}

impl Drop for Runtime {
    fn drop(&mut self) {
        // remove the scene first; nodes own interface operators and layouts
        let root = self.scene.root;
        if !root.is_null() {
            self.remove_node(root);
        }
    }
}
