//! Operator rows and the emission engine.
//!
//! Every operator is one row in a single wide table. Not every kind uses
//! every field, but one table keeps the hot path cache-local and spares the
//! engine special cases per storage shape; if rows ever grow too wide the
//! fix is boxing the cold fields, not splitting the table.
//!
//! Status machine (three active states, three passive):
//!
//! ```text
//!     IDLE <-> EMITTING
//!       |
//!       +--> FAILING ----> FAILED      (terminal)
//!       |
//!       +--> COMPLETING -> COMPLETED   (terminal)
//! ```
//!
//! An emitter that is asked to emit while already in an active state has
//! been re-entered through its own downstream: that is a cyclic emission.
//! The cycle is reported, the in-progress fan-out stops, and the operator
//! fails; recursion is never allowed to run away.
//!
//! Invariants kept by this module:
//! - `upstream`/`downstream` are mutual, except transiently inside `emit`.
//! - a non-multicast operator has at most one downstream.
//! - a terminal operator has an empty downstream and never emits again.
//! - `data` keeps one schema for the operator's whole lifetime.

use std::sync::atomic::Ordering::Relaxed;

use core_table::RowHandle;
use core_value::{Schema, Value};

use crate::registry::OperatorKind;
use crate::runtime::Runtime;
use crate::{CALLBACK_ERRORS, CYCLES_DETECTED, EMISSIONS_TOTAL, GraphError};

bitflags::bitflags! {
    /// Boolean operator flags; the 3-bit status field lives above them in
    /// the same word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpFlags: u8 {
        /// Owned externally: survives losing its last subscriber and is
        /// destroyed explicitly (interface operators, facts).
        const EXTERNAL = 1 << 0;
        /// May have more than one downstream subscriber.
        const MULTICAST = 1 << 1;
        /// A cyclic emission was detected while this operator was mid
        /// fan-out; the outer emission aborts and fails the operator.
        const POISONED = 1 << 5;
    }
}

const STATUS_SHIFT: u8 = 2;
const STATUS_MASK: u8 = 0b111 << STATUS_SHIFT;

/// Emitter status. Discriminants are laid out so that an active status and
/// its terminal counterpart differ by 3, and the first three match the
/// corresponding callback index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EmitterStatus {
    Emitting = 0,
    Failing = 1,
    Completing = 2,
    Idle = 3,
    Failed = 4,
    Completed = 5,
}

impl EmitterStatus {
    pub fn is_active(self) -> bool {
        (self as u8) < EmitterStatus::Idle as u8
    }

    /// Every status except IDLE and EMITTING counts as completed: an
    /// operator that started failing or completing will never take new
    /// input again.
    pub fn is_completed(self) -> bool {
        !matches!(self, EmitterStatus::Idle | EmitterStatus::Emitting)
    }

    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => EmitterStatus::Emitting,
            1 => EmitterStatus::Failing,
            2 => EmitterStatus::Completing,
            3 => EmitterStatus::Idle,
            4 => EmitterStatus::Failed,
            _ => EmitterStatus::Completed,
        }
    }
}

/// The three emission entry points; the discriminant doubles as the active
/// status and the vtable callback index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitKind {
    Next,
    Fail,
    Complete,
}

impl EmitKind {
    fn active_status(self) -> EmitterStatus {
        match self {
            EmitKind::Next => EmitterStatus::Emitting,
            EmitKind::Fail => EmitterStatus::Failing,
            EmitKind::Complete => EmitterStatus::Completing,
        }
    }

    fn terminal_status(self) -> EmitterStatus {
        match self {
            EmitKind::Next => EmitterStatus::Idle,
            EmitKind::Fail => EmitterStatus::Failed,
            EmitKind::Complete => EmitterStatus::Completed,
        }
    }
}

/// One row of the operator table.
pub struct OperatorRow {
    pub kind: OperatorKind,
    flags: u8,
    /// Expected schema of incoming values; the None schema accepts anything
    /// (the callback then receives the empty Value).
    pub input_schema: Schema,
    /// Last emitted value, or the failure/completion payload. The value
    /// schema is fixed at creation; terminal payloads bypass the check.
    pub value: Value,
    /// Immutable per-operator constructor arguments.
    pub args: Value,
    /// Mutable per-operator state; schema is stable for the row's lifetime.
    pub data: Value,
    pub upstream: Vec<RowHandle>,
    pub downstream: Vec<RowHandle>,
}

impl OperatorRow {
    pub fn status(&self) -> EmitterStatus {
        EmitterStatus::from_bits((self.flags & STATUS_MASK) >> STATUS_SHIFT)
    }

    pub(crate) fn set_status(&mut self, status: EmitterStatus) {
        self.flags = (self.flags & !STATUS_MASK) | ((status as u8) << STATUS_SHIFT);
    }

    pub fn is_external(&self) -> bool {
        OpFlags::from_bits_truncate(self.flags).contains(OpFlags::EXTERNAL)
    }

    pub fn is_multicast(&self) -> bool {
        OpFlags::from_bits_truncate(self.flags).contains(OpFlags::MULTICAST)
    }

    fn is_poisoned(&self) -> bool {
        OpFlags::from_bits_truncate(self.flags).contains(OpFlags::POISONED)
    }

    fn set_poisoned(&mut self, poisoned: bool) {
        if poisoned {
            self.flags |= OpFlags::POISONED.bits();
        } else {
            self.flags &= !OpFlags::POISONED.bits();
        }
    }
}

/// Everything a kind's factory produces; the runtime turns it into a row.
/// Factory-style kinds also use it to inspect a would-be operator without
/// creating one.
#[derive(Debug, Clone)]
pub struct OperatorRowDescription {
    pub kind: OperatorKind,
    pub initial_value: Value,
    pub input_schema: Schema,
    pub args: Value,
    pub data: Value,
    pub external: bool,
    pub multicast: bool,
}

impl OperatorRowDescription {
    pub fn new(kind: OperatorKind, initial_value: Value) -> Self {
        Self {
            kind,
            initial_value,
            input_schema: Schema::none(),
            args: Value::none(),
            data: Value::none(),
            external: false,
            multicast: false,
        }
    }

    pub fn with_input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn external(mut self, external: bool) -> Self {
        self.external = external;
        self
    }

    pub fn multicast(mut self, multicast: bool) -> Self {
        self.multicast = multicast;
        self
    }
}

impl Runtime {
    /// Creates an operator by running its kind's factory on `args`.
    pub fn create_operator(
        &mut self,
        kind: OperatorKind,
        args: &Value,
    ) -> Result<RowHandle, GraphError> {
        let create = self
            .registry()
            .vtable(kind)
            .ok_or(GraphError::UnknownKind(kind.0))?
            .create;
        let mut description = create(self.registry(), args)?;
        // the registry index wins: factories of registered kinds cannot
        // know their own index
        description.kind = kind;
        Ok(self.insert_operator(description))
    }

    /// Inserts a described operator row. Status always starts at IDLE.
    pub fn insert_operator(&mut self, description: OperatorRowDescription) -> RowHandle {
        let mut flags = OpFlags::empty();
        if description.external {
            flags |= OpFlags::EXTERNAL;
        }
        if description.multicast {
            flags |= OpFlags::MULTICAST;
        }
        let mut row = OperatorRow {
            kind: description.kind,
            flags: flags.bits(),
            input_schema: description.input_schema,
            value: description.initial_value,
            args: description.args,
            data: description.data,
            upstream: Vec::new(),
            downstream: Vec::new(),
        };
        row.set_status(EmitterStatus::Idle);
        let handle = self.ops_mut().add_row(row);
        tracing::trace!(target: "runtime.ops", op = ?handle, "operator created");
        handle
    }

    pub fn is_op_valid(&self, op: RowHandle) -> bool {
        self.ops().is_handle_valid(op)
    }

    pub fn op_value(&self, op: RowHandle) -> Option<&Value> {
        self.ops().get(op).map(|row| &row.value)
    }

    pub fn op_data(&self, op: RowHandle) -> Option<&Value> {
        self.ops().get(op).map(|row| &row.data)
    }

    pub fn op_argument(&self, op: RowHandle, name: &str) -> Result<Value, GraphError> {
        let row = self.ops().get(op).ok_or(GraphError::StaleOperator(op))?;
        Ok(row.args.index(name)?)
    }

    pub fn op_status(&self, op: RowHandle) -> Option<EmitterStatus> {
        self.ops().get(op).map(OperatorRow::status)
    }

    /// Replaces an operator's mutable data; the schema must not change.
    pub fn set_op_data(&mut self, op: RowHandle, data: Value) -> Result<(), GraphError> {
        let row = self.ops_mut().get_mut(op).ok_or(GraphError::StaleOperator(op))?;
        if data.schema() != row.data.schema() {
            return Err(GraphError::DataSchemaChanged(op));
        }
        row.data = data;
        Ok(())
    }

    /// Subscribes `downstream` to `upstream`'s emissions.
    ///
    /// If the upstream has already completed, the matching terminal
    /// callback runs on the downstream once and no link is created. The
    /// input-schema check applies to live links only; terminal payloads are
    /// delivered as stored (see DESIGN.md on the payload/schema question).
    pub fn subscribe(
        &mut self,
        upstream: RowHandle,
        downstream: RowHandle,
    ) -> Result<(), GraphError> {
        let up = self.ops().get(upstream).ok_or(GraphError::StaleOperator(upstream))?;
        let down = self
            .ops()
            .get(downstream)
            .ok_or(GraphError::StaleOperator(downstream))?;

        if !down.input_schema.is_none() && up.value.schema() != &down.input_schema {
            return Err(GraphError::SubscribeSchemaMismatch {
                upstream,
                downstream,
            });
        }

        let status = up.status();
        if status.is_completed() {
            let kind = match status {
                EmitterStatus::Failing | EmitterStatus::Failed => EmitKind::Fail,
                _ => EmitKind::Complete,
            };
            let payload = up.value.clone();
            self.run_callback(downstream, upstream, kind, &payload);
            return Ok(());
        }

        if !up.downstream.is_empty() && !up.is_multicast() {
            return Err(GraphError::NotMulticast(upstream));
        }

        // mutual, append-if-absent
        {
            let up = self.ops_mut().get_mut(upstream).expect("validated above");
            if !up.downstream.contains(&downstream) {
                up.downstream.push(downstream);
            }
        }
        {
            let down = self.ops_mut().get_mut(downstream).expect("validated above");
            if !down.upstream.contains(&upstream) {
                down.upstream.push(upstream);
            }
        }
        tracing::trace!(target: "runtime.ops", up = ?upstream, down = ?downstream, "subscribed");

        // generator-style kinds start producing here
        let kind = self.ops().get(upstream).expect("validated above").kind;
        if let Some(on_subscribe) = self
            .registry()
            .vtable(kind)
            .and_then(|vtable| vtable.on_subscribe)
        {
            on_subscribe(self, upstream, downstream);
        }
        Ok(())
    }

    /// Severs the link between two operators. Absent links (possible when
    /// the upstream completed before the subscription) are ignored. An
    /// internal upstream that loses its last subscriber is removed.
    pub fn unsubscribe(&mut self, upstream: RowHandle, downstream: RowHandle) {
        let linked = self
            .ops()
            .get(downstream)
            .is_some_and(|down| down.upstream.contains(&upstream));
        if !linked {
            return;
        }
        if let Some(down) = self.ops_mut().get_mut(downstream) {
            down.upstream.retain(|handle| *handle != upstream);
        }
        let mut remove_upstream = false;
        if let Some(up) = self.ops_mut().get_mut(upstream) {
            up.downstream.retain(|handle| *handle != downstream);
            remove_upstream = up.downstream.is_empty() && !up.is_external();
        }
        tracing::trace!(target: "runtime.ops", up = ?upstream, down = ?downstream, "unsubscribed");
        if remove_upstream {
            self.remove_operator(upstream);
        }
    }

    /// Removes an operator and all of its edges. Stale handles are a no-op.
    pub fn remove_operator(&mut self, op: RowHandle) {
        let Some(row) = self.ops().get(op) else { return };
        let downstream = row.downstream.clone();
        let upstream = row.upstream.clone();

        for down in downstream {
            if let Some(row) = self.ops_mut().get_mut(down) {
                row.upstream.retain(|handle| *handle != op);
            }
        }
        // unsubscribing may remove internal upstreams in turn
        for up in upstream {
            self.unsubscribe(up, op);
        }
        self.ops_mut().remove_row(op);
        tracing::trace!(target: "runtime.ops", op = ?op, "operator removed");
    }

    pub fn emit_next(&mut self, op: RowHandle, value: Value) {
        self.emit(op, EmitKind::Next, value);
    }

    pub fn emit_fail(&mut self, op: RowHandle, error: Value) {
        self.emit(op, EmitKind::Fail, error);
    }

    pub fn emit_complete(&mut self, op: RowHandle, message: Value) {
        self.emit(op, EmitKind::Complete, message);
    }

    /// The single emission routine behind next/fail/complete.
    ///
    /// Completed operators ignore the call. Re-entry on an active operator
    /// is a cyclic emission: the error goes to the sink, the in-progress
    /// fan-out aborts, and the operator fails with the error payload.
    pub fn emit(&mut self, op: RowHandle, kind: EmitKind, value: Value) {
        let Some(status) = self.op_status(op) else { return };
        if status.is_completed() {
            return;
        }
        if status.is_active() {
            CYCLES_DETECTED.fetch_add(1, Relaxed);
            if let Some(row) = self.ops_mut().get_mut(op) {
                row.set_poisoned(true);
            }
            self.report_error(GraphError::CyclicEmission(op));
            return;
        }

        if kind == EmitKind::Next {
            let mismatch = self
                .ops()
                .get(op)
                .is_some_and(|row| value.schema() != row.value.schema());
            if mismatch {
                // type error: the operator cannot emit this value and fails
                self.report_error(GraphError::EmitSchemaMismatch(op));
                let payload = Value::from(GraphError::EmitSchemaMismatch(op).to_string());
                self.emit(op, EmitKind::Fail, payload);
                return;
            }
        }

        EMISSIONS_TOTAL.fetch_add(1, Relaxed);
        let row = self.ops_mut().get_mut(op).expect("checked above");
        row.set_status(kind.active_status());
        // store the payload; terminal payloads bypass the schema check
        row.value = value.clone();
        // snapshot so subscriptions made during fan-out see nothing
        let snapshot = row.downstream.clone();

        match kind {
            EmitKind::Next => {
                for down in &snapshot {
                    self.run_callback(*down, op, EmitKind::Next, &value);
                    // a downstream re-entered us: stop the fan-out
                    if self.ops().get(op).is_none_or(OperatorRow::is_poisoned) {
                        break;
                    }
                }
                let Some(row) = self.ops_mut().get_mut(op) else { return };
                let poisoned = row.is_poisoned();
                row.set_poisoned(false);
                row.set_status(EmitterStatus::Idle);
                if poisoned {
                    let payload = Value::from(format!("{}", GraphError::CyclicEmission(op)));
                    self.emit(op, EmitKind::Fail, payload);
                }
            }
            EmitKind::Fail | EmitKind::Complete => {
                for down in &snapshot {
                    self.run_callback(*down, op, kind, &value);
                }
                if let Some(row) = self.ops_mut().get_mut(op) {
                    row.set_poisoned(false);
                    row.set_status(kind.terminal_status());
                }
                // unsubscribing everyone may remove the operator itself,
                // so it is the very last thing that happens
                for down in &snapshot {
                    self.unsubscribe(op, *down);
                    // auto-completion: the terminal signal severed the
                    // link; a receiver left without upstreams completes as
                    // well, propagating leaf-ward
                    let orphaned = self.ops().get(*down).is_some_and(|row| {
                        row.upstream.is_empty() && !row.status().is_completed()
                    });
                    if orphaned {
                        self.emit(*down, EmitKind::Complete, Value::none());
                    }
                }
                if let Some(row) = self.ops().get(op) {
                    debug_assert!(row.is_external());
                    debug_assert!(row.downstream.is_empty());
                }
            }
        }
    }

    /// Runs one of the three callbacks of `op` in response to `source`.
    ///
    /// For Next the callback's returned data replaces the row's `data`
    /// (same schema enforced); a callback error fails the operator and is
    /// routed to the error sink. Fail/Complete callbacks return nothing and
    /// are free to emit further; the link bookkeeping for terminal signals
    /// lives in `emit`.
    pub(crate) fn run_callback(
        &mut self,
        op: RowHandle,
        source: RowHandle,
        kind: EmitKind,
        value: &Value,
    ) {
        let (op_kind, accepts_any) = {
            let Some(row) = self.ops().get(op) else { return };
            if row.status().is_completed() {
                return;
            }
            (row.kind, row.input_schema.is_none())
        };
        // fn pointers are copied out so the vtable borrow ends here
        let (on_next, on_fail, on_complete) = match self.registry().vtable(op_kind) {
            Some(vtable) => (vtable.on_next, vtable.on_fail, vtable.on_complete),
            None => {
                self.report_error(GraphError::UnknownKind(op_kind.0));
                return;
            }
        };

        match kind {
            EmitKind::Next => {
                let Some(on_next) = on_next else { return };
                let input = if accepts_any {
                    Value::none()
                } else {
                    value.clone()
                };
                match on_next(self, op, source, input) {
                    Ok(new_data) => {
                        // the callback may have removed or completed the row
                        let mut schema_changed = false;
                        if let Some(row) = self.ops_mut().get_mut(op) {
                            if new_data.schema() == row.data.schema() {
                                row.data = new_data;
                            } else {
                                schema_changed = true;
                            }
                        }
                        if schema_changed {
                            self.report_error(GraphError::DataSchemaChanged(op));
                        }
                    }
                    Err(error) => {
                        CALLBACK_ERRORS.fetch_add(1, Relaxed);
                        let report = GraphError::Callback {
                            operator: op,
                            error: error.to_string(),
                        };
                        self.report_error(report.clone());
                        self.emit(op, EmitKind::Fail, Value::from(report.to_string()));
                    }
                }
            }
            EmitKind::Fail | EmitKind::Complete => {
                let callback = match kind {
                    EmitKind::Fail => on_fail,
                    _ => on_complete,
                };
                if let Some(callback) = callback
                    && let Err(error) = callback(self, op, source, value.clone())
                {
                    CALLBACK_ERRORS.fetch_add(1, Relaxed);
                    self.report_error(GraphError::Callback {
                        operator: op,
                        error: error.to_string(),
                    });
                }
            }
        }
    }

    /// Spawns a cooperative task on behalf of an operator. When the task
    /// resolves to `Some(data)`, the operator's data is replaced, if the
    /// operator is still alive by then; a removed operator's result is
    /// discarded.
    pub fn schedule<F>(&mut self, op: RowHandle, task: F) -> bool
    where
        F: FnOnce(
                core_events::TaskContext<Runtime>,
                RowHandle,
            ) -> futures::future::LocalBoxFuture<'static, Option<Value>>
            + Send
            + 'static,
    {
        let Some(sink) = self.sink() else {
            self.report_error(GraphError::NoSink);
            return false;
        };
        sink.spawn_task(move |task_ctx| {
            Box::pin(async move {
                let result = task(task_ctx.clone(), op).await;
                if let Some(new_data) = result {
                    task_ctx.with(|rt| {
                        if rt.is_op_valid(op)
                            && let Err(error) = rt.set_op_data(op, new_data)
                        {
                            rt.report_error(error);
                        }
                    });
                }
            })
        })
    }
}
