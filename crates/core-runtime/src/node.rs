//! Nodes: the scene tree and its state machines.
//!
//! A node's static surface is its interface (one relay operator per named
//! slot, stable for the node's lifetime). Everything else is owned by the
//! current state and rebuilt atomically by `transition_into`: the dynamic
//! operator network, the layout, the state-owned children and the design.
//!
//! Interface operators are created external: the node destroys them
//! explicitly on removal, and losing a subscriber must not reap them.
//!
//! Every node also carries the built-in `widget.*` interops (opacity,
//! visibility, depth, xform, claim); user interfaces may not claim that
//! namespace.

use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use indexmap::IndexMap;

use core_path::{Path, PathError};
use core_table::RowHandle;
use core_value::{Denotable, Value};

use crate::claim::Claim;
use crate::design::{Design, DesignSpec};
use crate::geometry::Size2f;
use crate::layout::{self, LayoutKind, NodeComposition};
use crate::registry::{self, OperatorKind};
use crate::runtime::Runtime;
use crate::{GraphError, STATE_TRANSITIONS};

/// Namespace of the built-in interops; reserved.
pub const WIDGET_NAMESPACE: &str = "widget";

/// The interops every node carries besides its declared interface.
pub fn builtin_interops() -> Vec<(String, Value)> {
    vec![
        (format!("{WIDGET_NAMESPACE}.opacity"), Value::from(1.0)),
        (format!("{WIDGET_NAMESPACE}.visibility"), Value::from(1.0)),
        (format!("{WIDGET_NAMESPACE}.depth"), Value::from(0.0)),
        (
            format!("{WIDGET_NAMESPACE}.xform"),
            Value::from_denotable(Denotable::Tuple(
                [1.0, 0.0, 0.0, 1.0, 0.0, 0.0]
                    .into_iter()
                    .map(Denotable::Number)
                    .collect(),
            ))
            .expect("a tuple of numbers is a valid denotable"),
        ),
        (
            format!("{WIDGET_NAMESPACE}.claim"),
            Claim::default().to_value(),
        ),
    ]
}

/// A node's type: interface, states, allowed transitions.
#[derive(Debug, Clone, Default)]
pub struct NodeDescription {
    /// Interface slot name → initial value.
    pub interface: IndexMap<String, Value>,
    pub states: IndexMap<String, StateDescription>,
    /// Allowed `(from, to)` transitions.
    pub transitions: Vec<(String, String)>,
    pub initial_state: String,
}

impl NodeDescription {
    /// A description with a single state named "default" and no further
    /// transitions.
    pub fn single_state(interface: IndexMap<String, Value>, state: StateDescription) -> Self {
        let mut states = IndexMap::new();
        states.insert("default".to_string(), state);
        Self {
            interface,
            states,
            transitions: Vec::new(),
            initial_state: "default".to_string(),
        }
    }
}

/// Everything one state contributes to its node.
#[derive(Debug, Clone)]
pub struct StateDescription {
    /// Local name → (operator kind, creation args).
    pub operators: IndexMap<String, (OperatorKind, Value)>,
    /// `(source, sink)` paths. A single-segment relative node path names a
    /// dynamic operator from `operators`; everything else resolves to an
    /// interop.
    pub connections: Vec<(Path, Path)>,
    pub design: DesignSpec,
    pub children: IndexMap<String, Arc<NodeDescription>>,
    pub layout: (LayoutKind, Value),
    pub claim: Claim,
}

impl Default for StateDescription {
    fn default() -> Self {
        Self {
            operators: IndexMap::new(),
            connections: Vec::new(),
            design: DesignSpec::default(),
            children: IndexMap::new(),
            layout: (layout::kinds::OVERLAY, Value::none()),
            claim: Claim::default(),
        }
    }
}

/// One row of the node table.
pub struct NodeRow {
    pub description: Arc<NodeDescription>,
    pub parent: RowHandle,
    /// Interface slot name → relay operator, in declaration order.
    pub interface: IndexMap<String, RowHandle>,
    pub state: String,
    pub layout: RowHandle,
    /// Dynamic operators of the current state, by local name.
    pub network: IndexMap<String, RowHandle>,
    /// All children by name, in insertion order.
    pub children: IndexMap<String, RowHandle>,
    /// Names of children created by the current state (removed on
    /// transition, unlike externally created children).
    pub state_children: Vec<String>,
    /// Per-node design instance of the current state.
    pub design: Option<Design>,
}

impl Runtime {
    /// Creates a child node under `parent` and brings it into its
    /// description's initial state.
    pub fn create_child(
        &mut self,
        parent: RowHandle,
        name: &str,
        description: Arc<NodeDescription>,
    ) -> Result<RowHandle, GraphError> {
        Path::check_name(name)?;
        let child = self.create_node_row(parent, Some(name), description.clone())?;
        self.transition_into(child, &description.initial_state)?;
        Ok(child)
    }

    pub(crate) fn create_node_row(
        &mut self,
        parent: RowHandle,
        name: Option<&str>,
        description: Arc<NodeDescription>,
    ) -> Result<RowHandle, GraphError> {
        if let Some(name) = name
            && self
                .nodes()
                .get(parent)
                .is_some_and(|row| row.children.contains_key(name))
        {
            return Err(GraphError::DuplicateChild(name.to_string()));
        }
        for slot in description.interface.keys() {
            if slot.starts_with(&format!("{WIDGET_NAMESPACE}.")) {
                return Err(GraphError::ReservedInterface(WIDGET_NAMESPACE.to_string()));
            }
        }

        // interface: one external relay per declared slot, builtins last
        let mut interface = IndexMap::new();
        for (slot, value) in description
            .interface
            .iter()
            .map(|(slot, value)| (slot.clone(), value.clone()))
            .chain(builtin_interops())
        {
            let op = self.create_interface_op(&value)?;
            interface.insert(slot, op);
        }

        let handle = self.nodes_mut().add_row(NodeRow {
            description,
            parent,
            interface,
            state: String::new(),
            layout: RowHandle::null(),
            network: IndexMap::new(),
            children: IndexMap::new(),
            state_children: Vec::new(),
            design: None,
        });
        if let (Some(name), Some(parent_row)) = (name, self.nodes_mut().get_mut(parent)) {
            parent_row.children.insert(name.to_string(), handle);
        }
        tracing::debug!(target: "runtime.scene", node = ?handle, name = name.unwrap_or("/"), "node created");
        Ok(handle)
    }

    fn create_interface_op(&mut self, value: &Value) -> Result<RowHandle, GraphError> {
        let create = self
            .registry()
            .vtable(registry::kinds::RELAY)
            .ok_or(GraphError::UnknownKind(registry::kinds::RELAY.0))?
            .create;
        let description = create(self.registry(), value)?.external(true);
        Ok(self.insert_operator(description))
    }

    /// Atomically rebuilds the dynamic portion of a node for the target
    /// state: design, state children, layout, operator network,
    /// connections, claim.
    pub fn transition_into(&mut self, node: RowHandle, target: &str) -> Result<(), GraphError> {
        let (current, description) = {
            let row = self.nodes().get(node).ok_or(GraphError::StaleNode(node))?;
            (row.state.clone(), row.description.clone())
        };
        if !current.is_empty()
            && !description
                .transitions
                .iter()
                .any(|(from, to)| *from == current && to == target)
        {
            return Err(GraphError::TransitionDenied {
                from: current,
                to: target.to_string(),
            });
        }
        let state = description
            .states
            .get(target)
            .ok_or_else(|| GraphError::UnknownState(target.to_string()))?
            .clone();

        // out with the previous state's dependencies
        self.clear_state_dependencies(node);

        if let Some(row) = self.nodes_mut().get_mut(node) {
            row.state = target.to_string();
        }

        // the design binds against the (stable) interface
        let design = Design::from_spec(&state.design)?;
        design.bind(self, node)?;
        if let Some(row) = self.nodes_mut().get_mut(node) {
            row.design = Some(design);
        }

        // state-owned children
        let mut created: Vec<RowHandle> = Vec::new();
        for (name, child_description) in &state.children {
            let child = self.create_child(node, name, child_description.clone())?;
            created.push(child);
            if let Some(row) = self.nodes_mut().get_mut(node) {
                row.state_children.push(name.clone());
            }
        }

        // the layout arranges exactly the state's children
        let layout = self.create_layout(state.layout.0, state.layout.1.clone())?;
        for child in &created {
            self.layout_add_node(layout, *child);
        }
        if let Some(row) = self.nodes_mut().get_mut(node) {
            row.layout = layout;
        }

        // dynamic operator network
        let mut network: IndexMap<String, RowHandle> = IndexMap::new();
        for (name, (kind, args)) in &state.operators {
            let op = self.create_operator(*kind, args)?;
            network.insert(name.clone(), op);
        }
        if let Some(row) = self.nodes_mut().get_mut(node) {
            row.network = network;
        }

        // wire the connections
        for (source, sink) in &state.connections {
            let source_op = self.resolve_connection_endpoint(node, source)?;
            let sink_op = self.resolve_connection_endpoint(node, sink)?;
            self.subscribe(source_op, sink_op)?;
        }

        // publish the claim; may trigger a parent relayout later
        self.set_claim(node, state.claim);

        STATE_TRANSITIONS.fetch_add(1, Relaxed);
        tracing::info!(target: "runtime.scene", node = ?node, state = target, "state entered");
        Ok(())
    }

    /// Removes the network, layout, design and state-owned children of the
    /// current state.
    fn clear_state_dependencies(&mut self, node: RowHandle) {
        let (network, layout, state_children) = {
            let Some(row) = self.nodes().get(node) else { return };
            (
                row.network.values().copied().collect::<Vec<_>>(),
                row.layout,
                row.state_children.clone(),
            )
        };
        for op in network {
            self.remove_operator(op);
        }
        if !layout.is_null() {
            self.remove_layout(layout);
        }
        for name in state_children {
            let child = self
                .nodes()
                .get(node)
                .and_then(|row| row.children.get(&name).copied());
            if let Some(child) = child {
                self.remove_node(child);
            }
        }
        if let Some(row) = self.nodes_mut().get_mut(node) {
            row.network.clear();
            row.layout = RowHandle::null();
            row.state_children.clear();
            row.design = None;
        }
    }

    /// Removes a node and its whole subtree.
    pub fn remove_node(&mut self, node: RowHandle) {
        // unregister from the parent first
        let parent = self.nodes().get(node).map(|row| row.parent);
        if let Some(parent) = parent
            && let Some(parent_row) = self.nodes_mut().get_mut(parent)
        {
            parent_row.children.retain(|_, handle| *handle != node);
        }
        self.remove_node_recursive(node);
    }

    /// Unlike [`Runtime::remove_node`] this skips the parent unlink: the
    /// parent is itself being removed.
    fn remove_node_recursive(&mut self, node: RowHandle) {
        let Some(row) = self.nodes().get(node) else { return };
        let children: Vec<RowHandle> = row.children.values().copied().collect();
        let network: Vec<RowHandle> = row.network.values().copied().collect();
        let interface: Vec<RowHandle> = row.interface.values().copied().collect();
        let layout = row.layout;

        for child in children {
            self.remove_node_recursive(child);
        }
        for op in network {
            self.remove_operator(op);
        }
        for op in interface {
            self.remove_operator(op);
        }
        if !layout.is_null() {
            self.remove_layout(layout);
        }
        self.nodes_mut().remove_row(node);
        tracing::debug!(target: "runtime.scene", node = ?node, "node removed");
    }

    /// Resolves one endpoint of a state connection. A single-segment
    /// relative node path names a dynamic operator of the current state;
    /// anything else must be an interop path.
    fn resolve_connection_endpoint(
        &self,
        node: RowHandle,
        path: &Path,
    ) -> Result<RowHandle, GraphError> {
        if path.is_node_path() {
            if path.is_relative()
                && path.len() == 1
                && path.segments()[0] != core_path::STEP_UP
                && path.segments()[0] != "."
            {
                let name = &path.segments()[0];
                return self
                    .nodes()
                    .get(node)
                    .and_then(|row| row.network.get(name).copied())
                    .ok_or_else(|| GraphError::UnknownDynamicOperator(name.clone()));
            }
            return Err(GraphError::UnresolvedConnection(path.to_string()));
        }
        if !path.is_interop_path() {
            return Err(GraphError::UnresolvedConnection(path.to_string()));
        }
        let target = if path.is_absolute() {
            self.get_node(&path.node_path())?
        } else {
            self.node_descendant(node, &path.node_path())?
        };
        let name = path.interop().unwrap_or_default();
        self.get_interop(target, name)
            .ok_or_else(|| GraphError::UnknownInterop {
                node: target,
                name: name.to_string(),
            })
    }

    /// Resolves an absolute path to a node, starting at the scene root.
    pub fn get_node(&self, path: &Path) -> Result<RowHandle, GraphError> {
        let root = self.scene.root;
        if root.is_null() {
            return Err(GraphError::StaleNode(root));
        }
        self.node_descendant(root, path)
    }

    /// Walks a path relative to `node` (`..` steps to the parent).
    pub fn node_descendant(&self, node: RowHandle, path: &Path) -> Result<RowHandle, GraphError> {
        let mut current = node;
        for segment in path.segments() {
            if segment == core_path::STEP_UP {
                let parent = self
                    .nodes()
                    .get(current)
                    .ok_or(GraphError::StaleNode(current))?
                    .parent;
                if parent.is_null() {
                    return Err(GraphError::Path(PathError::NoParent(
                        self.node_path(current).to_string(),
                    )));
                }
                current = parent;
            } else if segment == "." {
                // stay in place
            } else {
                current = self
                    .nodes()
                    .get(current)
                    .ok_or(GraphError::StaleNode(current))?
                    .children
                    .get(segment)
                    .copied()
                    .ok_or_else(|| GraphError::Path(PathError::NodeNotFound(segment.clone())))?;
            }
        }
        Ok(current)
    }

    /// The interface operator registered under `name`, if any.
    pub fn get_interop(&self, node: RowHandle, name: &str) -> Option<RowHandle> {
        self.nodes()
            .get(node)
            .and_then(|row| row.interface.get(name).copied())
    }

    pub fn node_state(&self, node: RowHandle) -> Option<String> {
        self.nodes().get(node).map(|row| row.state.clone())
    }

    /// The node's current layout row (null while no state is entered).
    pub fn node_layout(&self, node: RowHandle) -> RowHandle {
        self.nodes()
            .get(node)
            .map(|row| row.layout)
            .unwrap_or_else(RowHandle::null)
    }

    pub fn node_parent(&self, node: RowHandle) -> Option<RowHandle> {
        self.nodes()
            .get(node)
            .map(|row| row.parent)
            .filter(|parent| !parent.is_null())
    }

    /// A node's name under its parent; the root is "/".
    pub fn node_name(&self, node: RowHandle) -> Option<String> {
        let row = self.nodes().get(node)?;
        if row.parent.is_null() {
            return Some("/".to_string());
        }
        let parent = self.nodes().get(row.parent)?;
        parent
            .children
            .iter()
            .find(|(_, handle)| **handle == node)
            .map(|(name, _)| name.clone())
    }

    /// The absolute path of a node, assembled by walking its parents.
    pub fn node_path(&self, node: RowHandle) -> Path {
        let mut names: Vec<String> = Vec::new();
        let mut current = Some(node);
        while let Some(handle) = current {
            match self.node_parent(handle) {
                Some(parent) => {
                    if let Some(name) = self.node_name(handle) {
                        names.push(name);
                    }
                    current = Some(parent);
                }
                None => current = None,
            }
        }
        names.reverse();
        let text = format!("/{}", names.join("/"));
        Path::parse(&text).unwrap_or_default()
    }

    /// Where the parent's layout put this node; the root composes against
    /// the scene size.
    pub fn node_composition(&self, node: RowHandle) -> NodeComposition {
        let fallback = NodeComposition {
            xform: crate::geometry::Xform::identity(),
            grant: self.scene.size,
            opacity: 1.0,
        };
        let Some(parent) = self.node_parent(node) else {
            return fallback;
        };
        let Some(name) = self.node_name(node) else {
            return fallback;
        };
        let layout = self.nodes().get(parent).map(|row| row.layout);
        layout
            .and_then(|layout| self.layout_composition(layout))
            .and_then(|composition| composition.nodes.get(&name).cloned())
            .unwrap_or(fallback)
    }

    pub(crate) fn node_claim(&self, node: RowHandle) -> Claim {
        self.get_interop(node, "widget.claim")
            .and_then(|op| self.op_value(op))
            .and_then(|value| Claim::from_value(value).ok())
            .unwrap_or_default()
    }

    pub(crate) fn node_opacity(&self, node: RowHandle) -> f64 {
        self.get_interop(node, "widget.opacity")
            .and_then(|op| self.op_value(op))
            .and_then(|value| value.as_f64().ok())
            .map(|opacity| opacity.clamp(0.0, 1.0))
            .unwrap_or(1.0)
    }

    pub(crate) fn node_depth(&self, node: RowHandle) -> f64 {
        self.get_interop(node, "widget.depth")
            .and_then(|op| self.op_value(op))
            .and_then(|value| value.as_f64().ok())
            .unwrap_or(0.0)
    }

    /// Publishes a node's claim through its `widget.claim` interop.
    pub fn set_claim(&mut self, node: RowHandle, claim: Claim) {
        if self.node_parent(node).is_none() {
            return; // the root answers to the scene size, not to a layout
        }
        let Some(op) = self.get_interop(node, "widget.claim") else {
            return;
        };
        let value = claim.to_value();
        if let Some(row) = self.ops_mut().get_mut(op)
            && value.schema() == row.value.schema()
        {
            row.value = value;
        }
    }

    /// Re-lays-out a node with a new grant, recursing only into children
    /// whose own grant changed.
    pub fn relayout_down(&mut self, node: RowHandle, grant: Size2f) -> Result<(), GraphError> {
        let layout = self
            .nodes()
            .get(node)
            .ok_or(GraphError::StaleNode(node))?
            .layout;
        if layout.is_null() {
            return Ok(());
        }
        let old = self.layout_composition(layout).cloned().unwrap_or_default();
        let new = self.perform_layout(layout, grant)?;
        crate::RELAYOUTS.fetch_add(1, Relaxed);

        for (name, composition) in &new.nodes {
            if old
                .nodes
                .get(name)
                .is_some_and(|previous| previous.grant == composition.grant)
            {
                continue; // unchanged branch
            }
            let child = self
                .nodes()
                .get(node)
                .and_then(|row| row.children.get(name).copied());
            match child {
                Some(child) => self.relayout_down(child, composition.grant)?,
                None => {
                    tracing::warn!(target: "runtime.scene", name = %name, "layout placed an unknown child");
                }
            }
        }
        Ok(())
    }
}
