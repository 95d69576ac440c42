//! The reactive runtime core: operator graph, scene tree, designs.
//!
//! Everything long-lived lives in one of three generational tables owned by
//! [`Runtime`]: operators (the dataflow graph), nodes (the scene tree) and
//! layouts. All cross references are row handles; callbacks receive handles,
//! never references, so removal is always safe and stale access fails
//! validity checks instead of aliasing recycled rows.
//!
//! The runtime is an explicit struct threaded through every operation. It
//! is owned by the event loop, which linearizes all mutations on one logic
//! thread (see `core-events`); there is no process-wide singleton.
//!
//! Module map:
//! - [`op`]: operator rows, status flags, subscribe/unsubscribe/emit.
//! - [`registry`]: the per-kind vtable and the builtin operator kinds.
//! - [`node`]: node rows, descriptions, state transitions.
//! - [`layout`] / [`claim`]: layout vtable, grants and space claims.
//! - [`design`] / [`expr`] / [`sketch`]: the Design → Sketch pipeline.
//! - [`runtime`] / [`scene`]: the `Runtime` itself and the host-facing
//!   scene surface (facts, painting, hit testing).

pub mod claim;
pub mod design;
pub mod expr;
pub mod geometry;
pub mod layout;
pub mod node;
pub mod op;
pub mod registry;
pub mod runtime;
pub mod scene;
pub mod sketch;

use std::sync::atomic::AtomicU64;

use core_table::{RowHandle, TableIndex};

pub use claim::{Claim, Stretch};
pub use design::{Design, DesignSpec};
pub use geometry::{Aabrf, Size2f, V2f, Xform};
pub use layout::{LayoutComposition, LayoutKind, NodeComposition};
pub use node::{NodeDescription, StateDescription};
pub use op::{EmitKind, EmitterStatus, OperatorRowDescription};
pub use registry::{OperatorKind, OperatorVtable, Registry};
pub use runtime::Runtime;
pub use scene::Fact;
pub use sketch::{DrawCall, Hitbox, Painter, Shape, Sketch};

/// Table ids for the three runtime-owned tables.
pub const OPERATORS: TableIndex = TableIndex(0);
pub const NODES: TableIndex = TableIndex(1);
pub const LAYOUTS: TableIndex = TableIndex(2);

// -------------------------------------------------------------------------
// Telemetry
// -------------------------------------------------------------------------
// Hot-path counters; relaxed atomics, snapshot on demand.
pub static EMISSIONS_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static CYCLES_DETECTED: AtomicU64 = AtomicU64::new(0);
pub static CALLBACK_ERRORS: AtomicU64 = AtomicU64::new(0);
pub static STATE_TRANSITIONS: AtomicU64 = AtomicU64::new(0);
pub static RELAYOUTS: AtomicU64 = AtomicU64::new(0);
pub static SKETCHES_PRODUCED: AtomicU64 = AtomicU64::new(0);

/// Snapshot of the runtime counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeMetricsSnapshot {
    pub emissions: u64,
    pub cycles_detected: u64,
    pub callback_errors: u64,
    pub state_transitions: u64,
    pub relayouts: u64,
    pub sketches: u64,
}

pub fn metrics_snapshot() -> RuntimeMetricsSnapshot {
    use std::sync::atomic::Ordering::Relaxed;
    RuntimeMetricsSnapshot {
        emissions: EMISSIONS_TOTAL.load(Relaxed),
        cycles_detected: CYCLES_DETECTED.load(Relaxed),
        callback_errors: CALLBACK_ERRORS.load(Relaxed),
        state_transitions: STATE_TRANSITIONS.load(Relaxed),
        relayouts: RELAYOUTS.load(Relaxed),
        sketches: SKETCHES_PRODUCED.load(Relaxed),
    }
}

/// The runtime error taxonomy. Synchronous value and wiring errors surface
/// to the caller; emission-time errors are contained per event and routed
/// to the error sink instead of unwinding.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("operator handle {0:?} is stale")]
    StaleOperator(RowHandle),
    #[error("node handle {0:?} is stale")]
    StaleNode(RowHandle),
    #[error("layout handle {0:?} is stale")]
    StaleLayout(RowHandle),
    #[error("schema mismatch subscribing {upstream:?} -> {downstream:?}")]
    SubscribeSchemaMismatch {
        upstream: RowHandle,
        downstream: RowHandle,
    },
    #[error("operator {0:?} is not multicast and already has a subscriber")]
    NotMulticast(RowHandle),
    #[error("cyclic emission detected on operator {0:?}")]
    CyclicEmission(RowHandle),
    #[error("emitted value does not match the schema of operator {0:?}")]
    EmitSchemaMismatch(RowHandle),
    #[error("callback of operator {operator:?} failed: {error}")]
    Callback { operator: RowHandle, error: String },
    #[error("operator {0:?} returned data with a different schema")]
    DataSchemaChanged(RowHandle),
    #[error("unknown operator kind {0}")]
    UnknownKind(usize),
    #[error("unknown layout kind {0}")]
    UnknownLayoutKind(usize),
    #[error("the event loop sink is not attached")]
    NoSink,
    #[error("a property operator requires a non-none initial value")]
    PropertyWithoutValue,
    #[error("state transition \"{from}\" -> \"{to}\" is not allowed")]
    TransitionDenied { from: String, to: String },
    #[error("node has no state named \"{0}\"")]
    UnknownState(String),
    #[error("a child named \"{0}\" already exists")]
    DuplicateChild(String),
    #[error("interface names may not use the \"{0}\" namespace")]
    ReservedInterface(String),
    #[error("no interop named \"{name}\" on node {node:?}")]
    UnknownInterop { node: RowHandle, name: String },
    #[error("no dynamic operator named \"{0}\" in this state")]
    UnknownDynamicOperator(String),
    #[error("connection endpoint \"{0}\" did not resolve to an operator")]
    UnresolvedConnection(String),
    #[error("design: {0}")]
    Design(String),
    #[error(transparent)]
    Value(#[from] core_value::ValueError),
    #[error(transparent)]
    Path(#[from] core_path::PathError),
}
