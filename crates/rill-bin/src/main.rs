//! rill entrypoint: a headless demo of the reactive runtime.
//!
//! Builds a small scene (a click-counting buffer feeding a printer, plus a
//! sine-driven bar), runs the event loop on a dedicated logic thread, and
//! drives it from this host thread with synthetic clicks and a periodic
//! paint tick. A real host would swap the [`DebugPainter`] and the
//! synthetic input for a window backend.

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use core_config::Config;
use core_events::{EventLoop, EventSourceRegistry, TickEventSource};
use core_path::Path;
use core_runtime::design::{CallSpec, DesignSpec, PaintSpec, ShapeSpec, ValueSpec};
use core_runtime::node::{NodeDescription, StateDescription};
use core_runtime::registry::kinds;
use core_runtime::{Fact, Painter, Runtime, Size2f, Sketch, Xform};
use core_table::RowHandle;
use core_value::{Denotable, Value, den};
use indexmap::IndexMap;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "rill", version, about = "rill reactive runtime demo")]
struct Args {
    /// Optional configuration file path (overrides discovery of `rill.toml`).
    #[arg(long = "config")]
    config: Option<std::path::PathBuf>,
    /// How long the demo runs, in milliseconds.
    #[arg(long = "run-ms", default_value_t = 1500)]
    run_ms: u64,
    /// Synthetic clicks to feed into the click fact.
    #[arg(long = "clicks", default_value_t = 5)]
    clicks: u32,
}

/// A painter that logs draw batches instead of rasterizing them.
struct DebugPainter;

impl Painter for DebugPainter {
    fn paint(&mut self, node: RowHandle, _xform: &Xform, opacity: f64, sketch: &Sketch) {
        tracing::debug!(
            target: "paint",
            node = ?node,
            opacity,
            draw_calls = sketch.draw_calls.len(),
            hitboxes = sketch.hitboxes.len(),
            "paint"
        );
    }
}

fn configure_logging(config: &Config) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.file.log.directory)
        .with_context(|| format!("creating log directory {:?}", config.file.log.directory))?;
    let appender = tracing_appender::rolling::daily(&config.file.log.directory, "rill.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.file.log.filter.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

/// The demo scene: clicks buffer into counts that a printer logs; a sine
/// animates the bar's `level` interop, which its design reads back.
fn demo_description() -> Arc<NodeDescription> {
    let click = Value::from_denotable(den!({"x": 0, "y": 0})).expect("click point literal");
    let click_schema_words: Vec<Denotable> = click
        .schema()
        .words()
        .iter()
        .map(|&word| Denotable::Number(word as f64))
        .collect();

    // the bar child: level + press interface, a design that draws the bar
    // and marks the press zone
    let mut bar_interface = IndexMap::new();
    bar_interface.insert("level".to_string(), Value::from(0.0));
    bar_interface.insert("press".to_string(), click.clone());
    let bar_shape = ShapeSpec::RoundedRect {
        x: ValueSpec::number(10.0),
        y: ValueSpec::number(10.0),
        width: ValueSpec::expression("grant.width - 20"),
        height: ValueSpec::expression("max(node.level, 1)"),
        radius: ValueSpec::number(4.0),
    };
    let bar_design = DesignSpec::new(vec![
        CallSpec::fill(
            bar_shape.clone(),
            PaintSpec::Color {
                r: 0.2,
                g: 0.6,
                b: 0.9,
                a: 1.0,
            },
        ),
        CallSpec::Mark {
            shape: bar_shape,
            interop: "press".to_string(),
        },
    ]);
    let bar = Arc::new(NodeDescription::single_state(
        bar_interface,
        StateDescription {
            design: bar_design,
            ..StateDescription::default()
        },
    ));

    // the root: click/tick facts, buffer -> printer, sine -> bar level
    let mut interface = IndexMap::new();
    interface.insert("click".to_string(), click);

    let mut operators = IndexMap::new();
    operators.insert(
        "buffer".to_string(),
        (
            kinds::BUFFER,
            Value::from_denotable(Denotable::Record(vec![
                (
                    "schema".to_string(),
                    Denotable::List(click_schema_words),
                ),
                ("time_span".to_string(), Denotable::Number(0.25)),
            ]))
            .expect("buffer args literal"),
        ),
    );
    operators.insert(
        "printer".to_string(),
        (kinds::PRINTER, Value::from(0.0)),
    );
    operators.insert(
        "sine".to_string(),
        (
            kinds::SINE,
            Value::from_denotable(den!({
                "frequency": 1.0,
                "amplitude": 120.0,
                "samples": 60.0,
            }))
            .expect("sine args literal"),
        ),
    );

    let mut children = IndexMap::new();
    children.insert("bar".to_string(), bar);

    let state = StateDescription {
        operators,
        connections: vec![
            (path("|click"), path("buffer")),
            (path("buffer"), path("printer")),
            (path("sine"), path("bar/|level")),
        ],
        children,
        ..StateDescription::default()
    };
    Arc::new(NodeDescription::single_state(interface, state))
}

fn path(text: &str) -> Path {
    Path::parse(text).expect("demo path literal")
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = core_config::load_from(args.config.clone())?;
    let _log_guard = configure_logging(&config)?;
    info!(
        target: "runtime",
        title = %config.file.window.title,
        capacity = config.effective_capacity,
        "startup"
    );

    let (event_loop, sink) = EventLoop::new(config.effective_capacity);
    let window = Size2f::new(
        config.file.window.width as f64,
        config.file.window.height as f64,
    );

    // the logic thread owns the runtime; fact handles come back over a
    // one-shot channel
    let (fact_tx, fact_rx) = mpsc::channel::<Fact>();
    let loop_sink = sink.clone();
    let logic = std::thread::Builder::new()
        .name("rill-logic".to_string())
        .spawn(move || -> Result<()> {
            let mut rt = Runtime::new();
            rt.attach_sink(loop_sink);
            rt.initialize_scene(demo_description())?;
            rt.set_size(window)?;
            fact_tx
                .send(rt.get_fact("click")?)
                .ok();
            let mut rt = event_loop.run(rt)?;
            for error in rt.take_errors() {
                tracing::warn!(target: "runtime", error = %error, "contained error");
            }
            Ok(())
        })
        .context("spawning the logic thread")?;

    // paint whenever an operator asked for a redraw
    if let Some(interval) = config.tick_interval() {
        let mut sources = EventSourceRegistry::new();
        sources.register(TickEventSource::new(interval, |rt: &mut Runtime| {
            if rt.take_redraw_request()
                && let Err(error) = rt.paint(&mut DebugPainter)
            {
                rt.report_error(error);
            }
        }));
        sources.attach(&sink);
    }

    let click = fact_rx
        .recv_timeout(Duration::from_secs(5))
        .context("waiting for the click fact")?;

    // synthetic input: a burst of clicks, then let the buffer window close
    for index in 0..args.clicks {
        let point = Value::from_denotable(den!({"x": (index as f64), "y": 0}))
            .expect("click literal");
        click.next(point)?;
        std::thread::sleep(Duration::from_millis(10));
    }

    std::thread::sleep(Duration::from_millis(args.run_ms));
    sink.shutdown();
    logic
        .join()
        .map_err(|_| anyhow::anyhow!("logic thread panicked"))??;

    let loop_metrics = core_events::metrics_snapshot();
    let runtime_metrics = core_runtime::metrics_snapshot();
    info!(
        target: "runtime",
        events = loop_metrics.events_processed,
        tasks = loop_metrics.tasks_spawned,
        emissions = runtime_metrics.emissions,
        sketches = runtime_metrics.sketches,
        "shutdown complete"
    );
    Ok(())
}
