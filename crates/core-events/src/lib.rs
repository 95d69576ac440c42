//! The cooperative event loop: one logic thread, one FIFO queue.
//!
//! Every mutation of the runtime state is linearized through this loop. The
//! loop owns the state (`C`), receives events over a bounded mpsc channel,
//! and executes them strictly in enqueue order; the side effects of one
//! event (including newly enqueued events) are visible to the next.
//!
//! Long-running work is spawned as a cooperative task on the same thread
//! (`tokio` current-thread runtime + `LocalSet`). Tasks touch the state only
//! through [`TaskContext::with`], which borrows for the duration of one
//! closure; suspension happens only at explicit `await` points, so a borrow
//! is never held across one. Finished tasks are reaped after every event;
//! shutdown aborts and awaits whatever is still in flight.
//!
//! Channel policy: the queue is bounded (default `EVENT_CHANNEL_CAP`) to
//! provide memory safety and natural producer backpressure. Host threads
//! use `blocking_send`, parking until space is available rather than
//! dropping events; senders on the loop thread itself must use `try_send`
//! (blocking there would deadlock the single consumer). Telemetry counters
//! record send failures for inspection in tests or periodic logging.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

use futures::future::LocalBoxFuture;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, LocalSet};

/// Default bound of the event channel.
pub const EVENT_CHANNEL_CAP: usize = 8192;

// -------------------------------------------------------------------------
// Telemetry
// -------------------------------------------------------------------------
// Simple atomic counters (no locking, relaxed ordering). Inspected by unit
// tests and logged by the binary at shutdown.
pub static CHANNEL_SEND_FAILURES: AtomicU64 = AtomicU64::new(0);
pub static CHANNEL_BLOCKING_SENDS: AtomicU64 = AtomicU64::new(0);
pub static EVENTS_PROCESSED: AtomicU64 = AtomicU64::new(0);
pub static TASKS_SPAWNED: AtomicU64 = AtomicU64::new(0);
pub static TASKS_REAPED: AtomicU64 = AtomicU64::new(0);
pub static TASKS_CANCELLED: AtomicU64 = AtomicU64::new(0);

/// A snapshot of the loop counters, taken with relaxed loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopMetricsSnapshot {
    pub send_failures: u64,
    pub blocking_sends: u64,
    pub events_processed: u64,
    pub tasks_spawned: u64,
    pub tasks_reaped: u64,
    pub tasks_cancelled: u64,
}

pub fn metrics_snapshot() -> LoopMetricsSnapshot {
    LoopMetricsSnapshot {
        send_failures: CHANNEL_SEND_FAILURES.load(Relaxed),
        blocking_sends: CHANNEL_BLOCKING_SENDS.load(Relaxed),
        events_processed: EVENTS_PROCESSED.load(Relaxed),
        tasks_spawned: TASKS_SPAWNED.load(Relaxed),
        tasks_reaped: TASKS_REAPED.load(Relaxed),
        tasks_cancelled: TASKS_CANCELLED.load(Relaxed),
    }
}

/// A synchronous event: runs against the loop-owned state.
pub type Call<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Builds a cooperative task once it reaches the loop thread. The factory
/// crosses threads (hence `Send`); the future it builds does not.
pub type TaskFactory<C> = Box<dyn FnOnce(TaskContext<C>) -> LocalBoxFuture<'static, ()> + Send>;

pub enum Event<C> {
    Call(Call<C>),
    Spawn(TaskFactory<C>),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoopError {
    #[error("failed to build the event loop runtime: {0}")]
    Runtime(String),
    #[error("a task outlived loop shutdown and still holds the context")]
    ContextLeaked,
}

/// Cloneable sending half of the event queue.
pub struct EventSink<C> {
    tx: mpsc::Sender<Event<C>>,
}

impl<C> Clone for EventSink<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<C> EventSink<C> {
    /// Enqueues a synchronous event from the loop thread (or any context
    /// that must not block). Returns false if the queue is full or closed.
    pub fn call(&self, event: impl FnOnce(&mut C) + Send + 'static) -> bool {
        match self.tx.try_send(Event::Call(Box::new(event))) {
            Ok(()) => true,
            Err(error) => {
                CHANNEL_SEND_FAILURES.fetch_add(1, Relaxed);
                tracing::warn!(target: "runtime.events", error = %error, "event dropped");
                false
            }
        }
    }

    /// Enqueues a synchronous event from a host thread, parking until the
    /// queue has space. Returns false once the loop is gone.
    pub fn blocking_call(&self, event: impl FnOnce(&mut C) + Send + 'static) -> bool {
        match self.tx.blocking_send(Event::Call(Box::new(event))) {
            Ok(()) => {
                CHANNEL_BLOCKING_SENDS.fetch_add(1, Relaxed);
                true
            }
            Err(_) => {
                CHANNEL_SEND_FAILURES.fetch_add(1, Relaxed);
                false
            }
        }
    }

    /// Enqueues a cooperative task. The factory runs on the loop thread and
    /// receives a [`TaskContext`] for state access.
    pub fn spawn_task(
        &self,
        factory: impl FnOnce(TaskContext<C>) -> LocalBoxFuture<'static, ()> + Send + 'static,
    ) -> bool {
        match self.tx.try_send(Event::Spawn(Box::new(factory))) {
            Ok(()) => true,
            Err(error) => {
                CHANNEL_SEND_FAILURES.fetch_add(1, Relaxed);
                tracing::warn!(target: "runtime.events", error = %error, "task dropped");
                false
            }
        }
    }

    /// Requests loop shutdown. Queued events ahead of the request still run.
    pub fn shutdown(&self) {
        if self.tx.try_send(Event::Shutdown).is_err() {
            // A full queue cannot take the marker; blocking here would
            // deadlock the loop thread, so only record the failure. The
            // loop also stops once every sink is dropped.
            CHANNEL_SEND_FAILURES.fetch_add(1, Relaxed);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Handed to cooperative tasks: shared access to the loop-owned state plus
/// a sink for follow-up events. Never leaves the loop thread.
pub struct TaskContext<C> {
    ctx: Rc<RefCell<C>>,
    sink: EventSink<C>,
}

impl<C> Clone for TaskContext<C> {
    fn clone(&self) -> Self {
        Self {
            ctx: Rc::clone(&self.ctx),
            sink: self.sink.clone(),
        }
    }
}

impl<C> TaskContext<C> {
    /// Runs a closure against the state. The borrow lasts exactly for the
    /// closure and is released before this returns; do not nest `with`.
    pub fn with<R>(&self, body: impl FnOnce(&mut C) -> R) -> R {
        body(&mut self.ctx.borrow_mut())
    }

    pub fn sink(&self) -> &EventSink<C> {
        &self.sink
    }
}

/// The receiving half plus the run loop itself.
pub struct EventLoop<C> {
    rx: mpsc::Receiver<Event<C>>,
    /// Weak so that the loop itself never keeps its own channel open; it
    /// only upgrades to hand sinks to spawned tasks.
    weak: mpsc::WeakSender<Event<C>>,
}

impl<C: 'static> EventLoop<C> {
    /// Creates a loop with the given channel capacity (clamped to at least
    /// 16) and returns it with its sink.
    pub fn new(capacity: usize) -> (Self, EventSink<C>) {
        let (tx, rx) = mpsc::channel(capacity.max(16));
        let sink = EventSink { tx };
        (
            Self {
                rx,
                weak: sink.tx.downgrade(),
            },
            sink,
        )
    }

    /// Blocks the current thread processing events until shutdown, then
    /// cancels and joins all in-flight tasks and returns the state.
    pub fn run(self, ctx: C) -> Result<C, LoopError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|error| LoopError::Runtime(error.to_string()))?;
        let local = LocalSet::new();
        let shared = Rc::new(RefCell::new(ctx));

        let EventLoop { mut rx, weak } = self;
        let loop_ctx = Rc::clone(&shared);
        local.block_on(&runtime, async move {
            let mut tasks: Vec<JoinHandle<()>> = Vec::new();
            while let Some(event) = rx.recv().await {
                match event {
                    Event::Call(call) => call(&mut loop_ctx.borrow_mut()),
                    Event::Spawn(factory) => {
                        // a spawn observed by the loop means a sender still
                        // exists, so the upgrade only fails mid-teardown
                        let Some(tx) = weak.upgrade() else { continue };
                        let task_ctx = TaskContext {
                            ctx: Rc::clone(&loop_ctx),
                            sink: EventSink { tx },
                        };
                        tasks.push(tokio::task::spawn_local(factory(task_ctx)));
                        TASKS_SPAWNED.fetch_add(1, Relaxed);
                    }
                    Event::Shutdown => break,
                }
                EVENTS_PROCESSED.fetch_add(1, Relaxed);

                // reap completed tasks after every event
                tasks.retain(|task| {
                    if task.is_finished() {
                        TASKS_REAPED.fetch_add(1, Relaxed);
                        false
                    } else {
                        true
                    }
                });
            }

            // cancel pending tasks and await them all
            for task in &tasks {
                if !task.is_finished() {
                    TASKS_CANCELLED.fetch_add(1, Relaxed);
                    task.abort();
                }
            }
            for task in tasks {
                let _ = task.await;
            }
            rx.close();
            tracing::debug!(target: "runtime.events", "event loop drained");
        });

        drop(local);
        Rc::try_unwrap(shared)
            .map(RefCell::into_inner)
            .map_err(|_| LoopError::ContextLeaked)
    }
}

// -------------------------------------------------------------------------
// Async event sources
// -------------------------------------------------------------------------
// External producers (input bridges, timers, watchers) register uniformly as
// sources. Each source is one cooperative task that feeds the sink and must
// terminate promptly once the sink reports the channel closed. Failure
// isolation and restart policy can wrap the registry without changing this
// contract.

/// A named producer of events. `run` builds the source's long-running
/// future once it reaches the loop thread.
pub trait AsyncEventSource<C>: Send + 'static {
    /// Stable identifier used for logging and diagnostics.
    fn name(&self) -> &'static str;
    fn run(self: Box<Self>, sink: EventSink<C>) -> LocalBoxFuture<'static, ()>;
}

/// Registry of event sources; attach them all before the loop starts
/// consuming (each registration is itself an event).
pub struct EventSourceRegistry<C> {
    sources: Vec<Box<dyn AsyncEventSource<C>>>,
}

impl<C: 'static> Default for EventSourceRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: 'static> EventSourceRegistry<C> {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    pub fn register<S: AsyncEventSource<C>>(&mut self, source: S) {
        self.sources.push(Box::new(source));
    }

    /// Hands every registered source to the loop as a spawned task. Takes
    /// the sources so a second call cannot double-spawn them.
    pub fn attach(&mut self, sink: &EventSink<C>) {
        for source in self.sources.drain(..) {
            let name = source.name();
            tracing::info!(target: "runtime.events", source = name, "spawning event source");
            sink.spawn_task(move |task_ctx| {
                let sink = task_ctx.sink().clone();
                source.run(sink)
            });
        }
    }
}

/// Built-in periodic tick source: applies `on_tick` to the state at a fixed
/// interval until the channel closes.
pub struct TickEventSource<C> {
    interval: std::time::Duration,
    on_tick: std::sync::Arc<dyn Fn(&mut C) + Send + Sync>,
}

impl<C> TickEventSource<C> {
    pub fn new(
        interval: std::time::Duration,
        on_tick: impl Fn(&mut C) + Send + Sync + 'static,
    ) -> Self {
        Self {
            interval,
            on_tick: std::sync::Arc::new(on_tick),
        }
    }
}

impl<C: 'static> AsyncEventSource<C> for TickEventSource<C> {
    fn name(&self) -> &'static str {
        "tick"
    }

    fn run(self: Box<Self>, sink: EventSink<C>) -> LocalBoxFuture<'static, ()> {
        Box::pin(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let on_tick = std::sync::Arc::clone(&self.on_tick);
                if !sink.call(move |ctx| on_tick(ctx)) && sink.is_closed() {
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    /// Loop-owned state for tests: a trace of executed markers plus a sink
    /// back into the owning loop.
    struct TestCtx {
        trace: Vec<u32>,
        sink: Option<EventSink<TestCtx>>,
    }

    fn run_loop(seed: impl FnOnce(&EventSink<TestCtx>)) -> Vec<u32> {
        let (event_loop, sink) = EventLoop::new(EVENT_CHANNEL_CAP);
        let ctx = TestCtx {
            trace: Vec::new(),
            sink: Some(sink.clone()),
        };
        seed(&sink);
        drop(sink);
        let ctx = event_loop.run(ctx).expect("loop runs");
        ctx.trace
    }

    #[test]
    fn events_run_in_enqueue_order() {
        let trace = run_loop(|sink| {
            for marker in 0..5 {
                sink.call(move |ctx| ctx.trace.push(marker));
            }
            sink.shutdown();
        });
        assert_eq!(trace, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn events_scheduled_during_an_event_run_after_queued_ones() {
        let trace = run_loop(|sink| {
            sink.call(|ctx| {
                ctx.trace.push(1);
                let sink = ctx.sink.clone().unwrap();
                sink.call(|ctx| ctx.trace.push(3));
                sink.shutdown();
            });
            sink.call(|ctx| ctx.trace.push(2));
        });
        // the follow-up of event 1 runs strictly after the queued event 2,
        // and the shutdown marker was enqueued before both of them reached
        // the queue tail -- 3 still makes it in ahead of it
        assert_eq!(trace, vec![1, 2, 3]);
    }

    #[test]
    fn tasks_interleave_at_await_points() {
        let trace = run_loop(|sink| {
            sink.spawn_task(|task_ctx| {
                Box::pin(async move {
                    task_ctx.with(|ctx| ctx.trace.push(10));
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    task_ctx.with(|ctx| {
                        ctx.trace.push(30);
                        ctx.sink.as_ref().unwrap().shutdown();
                    });
                })
            });
            sink.call(|ctx| ctx.trace.push(20));
        });
        assert_eq!(trace, vec![10, 20, 30]);
    }

    #[test]
    fn shutdown_cancels_pending_tasks() {
        let cancelled_ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled_ran);
        run_loop(move |sink| {
            sink.spawn_task(move |_task_ctx| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    flag.store(true, Relaxed);
                })
            });
            // give the spawn event a chance to be processed before shutdown
            sink.call(|_ctx| {});
            sink.shutdown();
        });
        assert!(
            !cancelled_ran.load(Relaxed),
            "the sleeping task must be cancelled, not completed"
        );
    }

    #[test]
    fn tick_source_fires_until_shutdown() {
        let trace = run_loop(|sink| {
            let mut registry = EventSourceRegistry::new();
            registry.register(TickEventSource::new(
                Duration::from_millis(2),
                |ctx: &mut TestCtx| {
                    ctx.trace.push(7);
                    if ctx.trace.len() >= 3 {
                        ctx.sink.as_ref().unwrap().shutdown();
                    }
                },
            ));
            registry.attach(sink);
        });
        assert!(trace.len() >= 3);
        assert!(trace.iter().all(|&marker| marker == 7));
    }

    #[test]
    fn loop_stops_when_all_sinks_drop() {
        let (event_loop, sink) = EventLoop::new(64);
        sink.call(|ctx: &mut TestCtx| ctx.trace.push(1));
        drop(sink);
        let ctx = event_loop
            .run(TestCtx {
                trace: Vec::new(),
                sink: None,
            })
            .expect("loop runs");
        assert_eq!(ctx.trace, vec![1]);
    }
}
