//! Shared helpers for the runtime integration tests: a handful of custom
//! operator kinds (recorders, transforms, deliberate failures) registered
//! on top of the builtins, plus an event-loop harness with a completion
//! predicate.
#![allow(dead_code)] // not every test binary uses every helper

use std::time::Duration;

use core_events::{EventLoop, EventSink};
use core_runtime::op::OperatorRowDescription;
use core_runtime::registry::{OperatorVtable, Registry};
use core_runtime::{GraphError, OperatorKind, Runtime};
use core_table::RowHandle;
use core_value::{Denotable, Value, den};

/// Placeholder written by test factories; `create_operator` overrides it
/// with the registry index of the dispatched kind.
const PATCHED: OperatorKind = OperatorKind(usize::MAX);

/// The custom kinds every test runtime carries.
#[derive(Debug, Clone, Copy)]
pub struct TestKinds {
    /// Records everything it receives into its data as debug strings.
    pub recorder: OperatorKind,
    /// Emits `2 * x` for every incoming number.
    pub doubler: OperatorKind,
    /// Emits the debug rendering of every incoming number as a string.
    pub stringifier: OperatorKind,
    /// Collects numbers pairwise and emits `{x, y}` records.
    pub group_two: OperatorKind,
    /// Relays numbers but fails on a configured trigger value.
    pub fail_on: OperatorKind,
}

pub fn test_runtime() -> (Runtime, TestKinds) {
    let mut rt = Runtime::new();
    let kinds = register_test_kinds(rt.registry_mut());
    (rt, kinds)
}

pub fn register_test_kinds(registry: &mut Registry) -> TestKinds {
    let mut recorder_vtable =
        OperatorVtable::new("test-recorder", recorder::create).with_on_next(recorder::on_next);
    recorder_vtable.on_fail = Some(recorder::on_fail);
    recorder_vtable.on_complete = Some(recorder::on_complete);
    TestKinds {
        recorder: registry.register(recorder_vtable),
        doubler: registry.register(
            OperatorVtable::new("test-doubler", doubler::create).with_on_next(doubler::on_next),
        ),
        stringifier: registry.register(
            OperatorVtable::new("test-stringifier", stringifier::create)
                .with_on_next(stringifier::on_next),
        ),
        group_two: registry.register(
            OperatorVtable::new("test-group-two", group_two::create)
                .with_on_next(group_two::on_next),
        ),
        fail_on: registry.register(
            OperatorVtable::new("test-fail-on", fail_on::create).with_on_next(fail_on::on_next),
        ),
    }
}

/// An external multicast number source, the head of most pipelines here.
pub fn number_source(rt: &mut Runtime) -> RowHandle {
    let value = Value::from(0.0);
    rt.insert_operator(
        OperatorRowDescription::new(core_runtime::registry::kinds::RELAY, value.clone())
            .with_input_schema(value.schema().clone())
            .external(true)
            .multicast(true),
    )
}

/// What a recorder has seen so far, in order.
pub fn recorded(rt: &Runtime, recorder: RowHandle) -> Vec<String> {
    let Some(data) = rt.op_data(recorder) else {
        return Vec::new();
    };
    let Ok(log) = data.index("log") else {
        return Vec::new();
    };
    log.items()
        .map(|item| item.as_str().unwrap_or_default().to_string())
        .collect()
}

mod recorder {
    use super::*;

    pub fn create(
        _registry: &Registry,
        example: &Value,
    ) -> Result<OperatorRowDescription, GraphError> {
        // data schema: {log: [String]}, created zeroed so the list starts
        // empty
        let data_template = Value::from_denotable(den!({"log": ["x"]}))?;
        let data = Value::from_schema(data_template.schema());
        Ok(
            OperatorRowDescription::new(PATCHED, example.clone())
                .with_input_schema(example.schema().clone())
                .with_data(data)
                .external(true),
        )
    }

    fn append(rt: &mut Runtime, op: RowHandle, entry: String) -> Result<Value, GraphError> {
        let data = rt
            .op_data(op)
            .cloned()
            .ok_or(GraphError::StaleOperator(op))?;
        let mut log: Vec<Denotable> = data
            .index("log")?
            .items()
            .map(|item| Denotable::String(item.as_str().unwrap_or_default().to_string()))
            .collect();
        log.push(Denotable::String(entry));
        Ok(data.mutate(&["log".into()], Denotable::List(log))?)
    }

    pub fn on_next(
        rt: &mut Runtime,
        op: RowHandle,
        _source: RowHandle,
        value: Value,
    ) -> Result<Value, GraphError> {
        append(rt, op, format!("{value:?}"))
    }

    pub fn on_fail(
        rt: &mut Runtime,
        op: RowHandle,
        _source: RowHandle,
        error: Value,
    ) -> Result<(), GraphError> {
        let data = append(rt, op, format!("fail:{error:?}"))?;
        rt.set_op_data(op, data)
    }

    pub fn on_complete(
        rt: &mut Runtime,
        op: RowHandle,
        _source: RowHandle,
        _message: Value,
    ) -> Result<(), GraphError> {
        let data = append(rt, op, "complete".to_string())?;
        rt.set_op_data(op, data)
    }
}

mod doubler {
    use super::*;

    pub fn create(
        _registry: &Registry,
        _args: &Value,
    ) -> Result<OperatorRowDescription, GraphError> {
        let value = Value::from(0.0);
        Ok(
            OperatorRowDescription::new(PATCHED, value.clone())
                .with_input_schema(value.schema().clone())
                .multicast(true),
        )
    }

    pub fn on_next(
        rt: &mut Runtime,
        op: RowHandle,
        _source: RowHandle,
        value: Value,
    ) -> Result<Value, GraphError> {
        let doubled = value.mul(2.0)?;
        rt.emit_next(op, doubled);
        Ok(rt.op_data(op).cloned().unwrap_or_default())
    }
}

mod stringifier {
    use super::*;

    pub fn create(
        _registry: &Registry,
        _args: &Value,
    ) -> Result<OperatorRowDescription, GraphError> {
        Ok(
            OperatorRowDescription::new(PATCHED, Value::from(""))
                .with_input_schema(Value::from(0.0).schema().clone())
                .multicast(true),
        )
    }

    pub fn on_next(
        rt: &mut Runtime,
        op: RowHandle,
        _source: RowHandle,
        value: Value,
    ) -> Result<Value, GraphError> {
        let text = format!("{:?}", value.as_f64()?);
        rt.emit_next(op, Value::from(text));
        Ok(rt.op_data(op).cloned().unwrap_or_default())
    }
}

mod group_two {
    use super::*;

    pub fn create(
        _registry: &Registry,
        _args: &Value,
    ) -> Result<OperatorRowDescription, GraphError> {
        let pair = Value::from_denotable(den!({"x": 0, "y": 0}))?;
        let data = Value::from_denotable(den!({"pending": 0, "has_pending": 0}))?;
        Ok(OperatorRowDescription::new(PATCHED, pair)
            .with_input_schema(Value::from(0.0).schema().clone())
            .with_data(data)
            .multicast(true))
    }

    pub fn on_next(
        rt: &mut Runtime,
        op: RowHandle,
        _source: RowHandle,
        value: Value,
    ) -> Result<Value, GraphError> {
        let data = rt
            .op_data(op)
            .cloned()
            .ok_or(GraphError::StaleOperator(op))?;
        let incoming = value.as_f64()?;
        if data.index("has_pending")?.as_f64()? == 1.0 {
            let pair = Value::from_denotable(Denotable::Record(vec![
                (
                    "x".to_string(),
                    Denotable::Number(data.index("pending")?.as_f64()?),
                ),
                ("y".to_string(), Denotable::Number(incoming)),
            ]))?;
            rt.emit_next(op, pair);
            let data = rt
                .op_data(op)
                .cloned()
                .ok_or(GraphError::StaleOperator(op))?;
            Ok(data.multi_mutate([
                (vec!["pending".into()], 0.0),
                (vec!["has_pending".into()], 0.0),
            ])?)
        } else {
            Ok(data.multi_mutate([
                (vec!["pending".into()], incoming),
                (vec!["has_pending".into()], 1.0),
            ])?)
        }
    }
}

mod fail_on {
    use super::*;

    pub fn create(
        _registry: &Registry,
        args: &Value,
    ) -> Result<OperatorRowDescription, GraphError> {
        let trigger = args.index("trigger")?.as_f64()?;
        let value = Value::from(0.0);
        let op_args = Value::from_denotable(Denotable::Record(vec![(
            "trigger".to_string(),
            Denotable::Number(trigger),
        )]))?;
        Ok(
            OperatorRowDescription::new(PATCHED, value.clone())
                .with_input_schema(value.schema().clone())
                .with_args(op_args)
                .multicast(true),
        )
    }

    pub fn on_next(
        rt: &mut Runtime,
        op: RowHandle,
        _source: RowHandle,
        value: Value,
    ) -> Result<Value, GraphError> {
        let trigger = rt.op_argument(op, "trigger")?.as_f64()?;
        if value.as_f64()? == trigger {
            return Err(GraphError::Design(format!("refusing input {trigger}")));
        }
        rt.emit_next(op, value);
        Ok(rt.op_data(op).cloned().unwrap_or_default())
    }
}

// -------------------------------------------------------------------------
// Event-loop harness
// -------------------------------------------------------------------------

/// Runs a runtime on an event loop: `seed` runs as the first event, then a
/// watcher polls `done` every few milliseconds and shuts the loop down
/// when it returns true (or after `timeout`). Returns the runtime for
/// inspection.
pub fn run_until(
    rt: Runtime,
    seed: impl FnOnce(&mut Runtime) + Send + 'static,
    done: impl Fn(&mut Runtime) -> bool + Send + 'static,
    timeout: Duration,
) -> Runtime {
    let (event_loop, sink) = EventLoop::new(1024);
    let mut rt = rt;
    rt.attach_sink(sink.clone());
    sink.call(seed);

    let watcher_sink: EventSink<Runtime> = sink.clone();
    sink.spawn_task(move |task_ctx| {
        Box::pin(async move {
            let started = std::time::Instant::now();
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let finished = task_ctx.with(|rt| done(rt));
                if finished || started.elapsed() > timeout {
                    watcher_sink.shutdown();
                    return;
                }
            }
        })
    });
    drop(sink);

    event_loop.run(rt).expect("event loop runs to completion")
}
