//! The operator registry: one vtable per operator kind.
//!
//! A kind is five function pointers: `create` builds the row description,
//! `on_next`/`on_fail`/`on_complete` react to incoming signals, and
//! `on_subscribe` lets generator-style kinds start producing. Adding a new
//! kind is purely a registry entry; the runtime never special-cases kinds.
//!
//! The registry starts with the seven builtin kinds in [`kinds`]; tests and
//! embedders extend it with [`Registry::register`].

use std::time::Duration;

use core_table::RowHandle;
use core_value::{Denotable, Schema, Value};

use crate::op::{EmitKind, OperatorRowDescription};
use crate::runtime::Runtime;
use crate::GraphError;

/// Index into the operator registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperatorKind(pub usize);

pub type CreateFn = fn(&Registry, &Value) -> Result<OperatorRowDescription, GraphError>;
/// `(runtime, self, source, value) -> new data`. The returned Value must
/// keep the schema of the operator's stored data.
pub type OnNextFn = fn(&mut Runtime, RowHandle, RowHandle, Value) -> Result<Value, GraphError>;
pub type OnSignalFn = fn(&mut Runtime, RowHandle, RowHandle, Value) -> Result<(), GraphError>;
pub type OnSubscribeFn = fn(&mut Runtime, RowHandle, RowHandle);

#[derive(Clone, Copy)]
pub struct OperatorVtable {
    pub name: &'static str,
    pub create: CreateFn,
    pub on_next: Option<OnNextFn>,
    pub on_fail: Option<OnSignalFn>,
    pub on_complete: Option<OnSignalFn>,
    pub on_subscribe: Option<OnSubscribeFn>,
}

impl OperatorVtable {
    pub const fn new(name: &'static str, create: CreateFn) -> Self {
        Self {
            name,
            create,
            on_next: None,
            on_fail: None,
            on_complete: None,
            on_subscribe: None,
        }
    }

    pub const fn with_on_next(mut self, on_next: OnNextFn) -> Self {
        self.on_next = Some(on_next);
        self
    }

    pub const fn with_on_subscribe(mut self, on_subscribe: OnSubscribeFn) -> Self {
        self.on_subscribe = Some(on_subscribe);
        self
    }
}

/// The builtin kind indices; `Registry::with_builtins` installs them in
/// exactly this order.
pub mod kinds {
    use super::OperatorKind;

    pub const RELAY: OperatorKind = OperatorKind(0);
    pub const PROPERTY: OperatorKind = OperatorKind(1);
    pub const BUFFER: OperatorKind = OperatorKind(2);
    pub const FACTORY: OperatorKind = OperatorKind(3);
    pub const COUNTDOWN: OperatorKind = OperatorKind(4);
    pub const PRINTER: OperatorKind = OperatorKind(5);
    pub const SINE: OperatorKind = OperatorKind(6);
}

pub struct Registry {
    entries: Vec<OperatorVtable>,
}

impl Registry {
    /// A registry holding only the builtin kinds.
    pub fn with_builtins() -> Self {
        let entries = vec![
            OperatorVtable::new("relay", relay::create).with_on_next(relay::on_next),
            OperatorVtable::new("property", property::create).with_on_next(relay::on_next),
            OperatorVtable::new("buffer", buffer::create).with_on_next(buffer::on_next),
            OperatorVtable::new("factory", factory::create).with_on_next(factory::on_next),
            OperatorVtable::new("countdown", countdown::create)
                .with_on_subscribe(countdown::on_subscribe),
            OperatorVtable::new("printer", printer::create).with_on_next(printer::on_next),
            OperatorVtable::new("sine", sine::create).with_on_subscribe(sine::on_subscribe),
        ];
        debug_assert_eq!(entries[kinds::SINE.0].name, "sine");
        Self { entries }
    }

    /// Registers a new kind and returns its index.
    pub fn register(&mut self, vtable: OperatorVtable) -> OperatorKind {
        self.entries.push(vtable);
        OperatorKind(self.entries.len() - 1)
    }

    pub fn vtable(&self, kind: OperatorKind) -> Option<&OperatorVtable> {
        self.entries.get(kind.0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// -------------------------------------------------------------------------
// Builtin kinds
// -------------------------------------------------------------------------

/// Pass-through. The args are the initial value; input and output schemas
/// are that value's schema. Multicast: relays are the fan-out points of the
/// graph (and the building block of node interfaces).
mod relay {
    use super::*;

    pub(super) fn create(
        _registry: &Registry,
        value: &Value,
    ) -> Result<OperatorRowDescription, GraphError> {
        Ok(
            OperatorRowDescription::new(kinds::RELAY, value.clone())
                .with_input_schema(value.schema().clone())
                .multicast(true),
        )
    }

    pub(super) fn on_next(
        rt: &mut Runtime,
        op: RowHandle,
        _source: RowHandle,
        value: Value,
    ) -> Result<Value, GraphError> {
        rt.emit_next(op, value);
        Ok(rt.op_data(op).cloned().unwrap_or_default())
    }
}

/// A relay whose value schema must not be None; the building block of node
/// interface state. Shares the relay's `on_next`.
mod property {
    use super::*;

    pub(super) fn create(
        _registry: &Registry,
        value: &Value,
    ) -> Result<OperatorRowDescription, GraphError> {
        if value.schema().is_none() {
            return Err(GraphError::PropertyWithoutValue);
        }
        Ok(OperatorRowDescription::new(kinds::PROPERTY, value.clone())
            .with_input_schema(value.schema().clone()))
    }
}

/// Collects input events and emits their count after `time_span` seconds of
/// inactivity.
mod buffer {
    use super::*;

    pub(super) fn create(
        _registry: &Registry,
        args: &Value,
    ) -> Result<OperatorRowDescription, GraphError> {
        let input_schema = Schema::from_value(&args.index("schema")?)?;
        let time_span = args.index("time_span")?.as_f64()?;
        let op_args = Value::from_denotable(Denotable::Record(vec![(
            "time_span".to_string(),
            Denotable::Number(time_span),
        )]))?;
        let data = Value::from_denotable(Denotable::Record(vec![
            ("is_running".to_string(), Denotable::Number(0.0)),
            ("counter".to_string(), Denotable::Number(0.0)),
        ]))?;
        Ok(OperatorRowDescription::new(kinds::BUFFER, Value::from(0.0))
            .with_input_schema(input_schema)
            .with_args(op_args)
            .with_data(data))
    }

    pub(super) fn on_next(
        rt: &mut Runtime,
        op: RowHandle,
        _source: RowHandle,
        _value: Value,
    ) -> Result<Value, GraphError> {
        let data = rt.op_data(op).cloned().ok_or(GraphError::StaleOperator(op))?;
        if data.index("is_running")?.as_f64()? == 1.0 {
            // already buffering: bump the counter
            let counter = data.index("counter")?.as_f64()?;
            return Ok(data.mutate(&["counter".into()], counter + 1.0)?);
        }

        let time_span = rt.op_argument(op, "time_span")?.as_f64()?;
        rt.schedule(op, move |task_ctx, op| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs_f64(time_span)).await;
                task_ctx.with(|rt| {
                    if !rt.is_op_valid(op) {
                        return None;
                    }
                    let data = rt.op_data(op).cloned()?;
                    let count = data.index("counter").ok()?.as_f64().ok()?;
                    tracing::debug!(
                        target: "runtime.ops",
                        op = ?op,
                        count,
                        seconds = time_span,
                        "buffer window closed"
                    );
                    rt.emit_next(op, Value::from(count));
                    rt.op_data(op)
                        .cloned()?
                        .mutate(&["is_running".into()], 0.0)
                        .ok()
                })
            })
        });
        Ok(data.multi_mutate([
            (vec!["is_running".into()], 1.0),
            (vec!["counter".into()], 1.0),
        ])?)
    }
}

/// On each trigger, creates a fresh inner operator per subscriber,
/// subscribes the subscriber to it, and runs its `on_next` once with the
/// inner's current value. Materializes short-lived pipelines per
/// subscription.
mod factory {
    use super::*;

    pub(super) fn create(
        registry: &Registry,
        args: &Value,
    ) -> Result<OperatorRowDescription, GraphError> {
        let inner_kind = OperatorKind(args.index("id")?.as_f64()? as usize);
        let inner_args = args.index("args")?;
        let inner_create = registry
            .vtable(inner_kind)
            .ok_or(GraphError::UnknownKind(inner_kind.0))?
            .create;
        // inspect the would-be inner operator without creating one
        let example = inner_create(registry, &inner_args)?;
        Ok(
            OperatorRowDescription::new(kinds::FACTORY, example.initial_value)
                .with_args(args.clone()),
        )
    }

    pub(super) fn on_next(
        rt: &mut Runtime,
        op: RowHandle,
        _source: RowHandle,
        _value: Value,
    ) -> Result<Value, GraphError> {
        let current_data = rt.op_data(op).cloned().unwrap_or_default();
        let subscribers = rt.op_downstream(op);
        if subscribers.is_empty() {
            return Ok(current_data);
        }

        let inner_kind = OperatorKind(rt.op_argument(op, "id")?.as_f64()? as usize);
        let inner_args = rt.op_argument(op, "args")?;
        let inner_create = rt
            .registry()
            .vtable(inner_kind)
            .ok_or(GraphError::UnknownKind(inner_kind.0))?
            .create;
        for subscriber in subscribers {
            let mut description = inner_create(rt.registry(), &inner_args)?;
            description.kind = inner_kind;
            let inner = rt.insert_operator(description);
            rt.subscribe(inner, subscriber)?;
            let value = rt.op_value(inner).cloned().unwrap_or_default();
            rt.run_callback(inner, op, EmitKind::Next, &value);
        }
        Ok(current_data)
    }
}

/// On subscribe, counts from `start` down to 0 at one-second intervals,
/// then completes.
mod countdown {
    use super::*;

    pub(super) fn create(
        _registry: &Registry,
        args: &Value,
    ) -> Result<OperatorRowDescription, GraphError> {
        let start = args.index("start")?.as_f64()?;
        let op_args = Value::from_denotable(Denotable::Record(vec![(
            "start".to_string(),
            Denotable::Number(start),
        )]))?;
        Ok(OperatorRowDescription::new(kinds::COUNTDOWN, Value::from(0.0)).with_args(op_args))
    }

    pub(super) fn on_subscribe(rt: &mut Runtime, op: RowHandle, _downstream: RowHandle) {
        let start = match rt.op_argument(op, "start").and_then(|v| Ok(v.as_f64()?)) {
            Ok(start) => start.max(0.0).floor(),
            Err(error) => {
                rt.report_error(error);
                return;
            }
        };
        rt.schedule(op, move |task_ctx, op| {
            Box::pin(async move {
                let mut counter = start;
                let alive = task_ctx.with(|rt| {
                    rt.emit_next(op, Value::from(counter));
                    rt.is_op_valid(op)
                });
                if !alive {
                    return None;
                }
                while counter > 0.0 {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    counter -= 1.0;
                    let alive = task_ctx.with(|rt| {
                        if !rt.is_op_valid(op) {
                            return false;
                        }
                        rt.emit_next(op, Value::from(counter));
                        rt.is_op_valid(op)
                    });
                    if !alive {
                        return None;
                    }
                }
                task_ctx.with(|rt| rt.emit_complete(op, Value::none()));
                None
            })
        });
    }
}

/// Debug sink: logs whatever arrives.
mod printer {
    use super::*;

    pub(super) fn create(
        _registry: &Registry,
        value: &Value,
    ) -> Result<OperatorRowDescription, GraphError> {
        Ok(OperatorRowDescription::new(kinds::PRINTER, value.clone())
            .with_input_schema(value.schema().clone()))
    }

    pub(super) fn on_next(
        rt: &mut Runtime,
        op: RowHandle,
        source: RowHandle,
        value: Value,
    ) -> Result<Value, GraphError> {
        tracing::info!(target: "runtime.ops", source = ?source, value = ?value, "printer received");
        Ok(rt.op_data(op).cloned().unwrap_or_default())
    }
}

/// On subscribe, emits `(sin(2*pi*f*t) + 1) * A / 2` at `samples` Hz and
/// requests a redraw per sample.
mod sine {
    use super::*;

    pub(super) fn create(
        _registry: &Registry,
        args: &Value,
    ) -> Result<OperatorRowDescription, GraphError> {
        let mut frequency = 0.5_f64;
        let mut amplitude = 100.0_f64;
        let mut samples = 72.0_f64; // per second; comfortably above 60 fps
        if !args.is_none() {
            if let Ok(value) = args.index("frequency") {
                frequency = value.as_f64()?;
            }
            if let Ok(value) = args.index("amplitude") {
                amplitude = value.as_f64()?;
            }
            if let Ok(value) = args.index("samples") {
                samples = value.as_f64()?;
            }
        }
        let op_args = Value::from_denotable(Denotable::Record(vec![
            ("frequency".to_string(), Denotable::Number(frequency)),
            ("amplitude".to_string(), Denotable::Number(amplitude)),
            ("samples".to_string(), Denotable::Number(samples.max(1.0))),
        ]))?;
        Ok(OperatorRowDescription::new(kinds::SINE, Value::from(0.0))
            .with_args(op_args)
            .multicast(true))
    }

    pub(super) fn on_subscribe(rt: &mut Runtime, op: RowHandle, _downstream: RowHandle) {
        let params = (|| -> Result<(f64, f64, f64), GraphError> {
            Ok((
                rt.op_argument(op, "frequency")?.as_f64()?,
                rt.op_argument(op, "amplitude")?.as_f64()?,
                rt.op_argument(op, "samples")?.as_f64()?,
            ))
        })();
        let (frequency, amplitude, samples) = match params {
            Ok(params) => params,
            Err(error) => {
                rt.report_error(error);
                return;
            }
        };
        rt.schedule(op, move |task_ctx, op| {
            Box::pin(async move {
                let started = std::time::Instant::now();
                loop {
                    let alive = task_ctx.with(|rt| {
                        if !rt.is_op_valid(op) {
                            return false;
                        }
                        let t = started.elapsed().as_secs_f64();
                        let sample =
                            ((2.0 * std::f64::consts::PI * frequency * t).sin() + 1.0)
                                * amplitude
                                * 0.5;
                        rt.emit_next(op, Value::from(sample));
                        rt.request_redraw();
                        rt.is_op_valid(op)
                    });
                    if !alive {
                        return None;
                    }
                    tokio::time::sleep(Duration::from_secs_f64(1.0 / samples)).await;
                }
            })
        });
    }
}
