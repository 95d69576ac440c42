//! Designs: immutable DAGs that produce Sketches.
//!
//! A [`DesignSpec`] is the declarative form stored in node state
//! descriptions: value, shape and paint nodes plus fill/stroke/mark calls.
//! A [`Design`] is the per-node instance compiled from a spec when the node
//! enters the state. Per node, because every DAG node caches its last
//! produced value keyed by an evaluation generation, and those caches must
//! not be shared between nodes.
//!
//! Equal spec nodes are deduplicated at compile time, so a sub-expression
//! used by several calls evaluates once per generation.
//!
//! `mark` calls bind a hitbox shape to an interface operator; binding
//! happens in `Design::bind` during the state transition, after the
//! interface exists. Mark interops must accept `{x, y}` values, which is
//! what input routing will send them.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::Ordering::Relaxed;

use core_table::RowHandle;
use core_value::{Denotable, Value};
use indexmap::IndexMap;

use crate::expr::{EvalScope, Expr};
use crate::geometry::Size2f;
use crate::runtime::Runtime;
use crate::sketch::{
    Color, DrawCall, FillCall, Hitbox, LineCap, LineJoin, Paint, Shape, Sketch, StrokeCall,
};
use crate::{GraphError, SKETCHES_PRODUCED};

// -------------------------------------------------------------------------
// Spec (declarative, shareable)
// -------------------------------------------------------------------------

/// A value-producing DAG node.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSpec {
    Constant(Value),
    /// Reads the node's interface operator of that name.
    Interop(String),
    /// A compiled expression over named sub-values plus the `node` and
    /// `grant` proxies.
    Expression {
        source: String,
        kwargs: IndexMap<String, ValueSpec>,
    },
}

impl ValueSpec {
    pub fn number(number: f64) -> Self {
        ValueSpec::Constant(Value::from(number))
    }

    pub fn expression(source: impl Into<String>) -> Self {
        ValueSpec::Expression {
            source: source.into(),
            kwargs: IndexMap::new(),
        }
    }
}

/// A shape-producing DAG node.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeSpec {
    RoundedRect {
        x: ValueSpec,
        y: ValueSpec,
        width: ValueSpec,
        height: ValueSpec,
        radius: ValueSpec,
    },
    Constant(Vec<Shape>),
}

/// A paint-producing DAG node. Colors are `{r, g, b, a}` records.
#[derive(Debug, Clone, PartialEq)]
pub enum PaintSpec {
    Color { r: f64, g: f64, b: f64, a: f64 },
}

/// One call of a design.
#[derive(Debug, Clone, PartialEq)]
pub enum CallSpec {
    Fill {
        shape: ShapeSpec,
        paint: PaintSpec,
        opacity: ValueSpec,
    },
    Stroke {
        shape: ShapeSpec,
        paint: PaintSpec,
        opacity: ValueSpec,
        line_width: ValueSpec,
        cap: ValueSpec,
        join: ValueSpec,
    },
    /// Registers the shape as a hitbox bound to the named interop.
    Mark { shape: ShapeSpec, interop: String },
}

impl CallSpec {
    /// A fill call with full opacity.
    pub fn fill(shape: ShapeSpec, paint: PaintSpec) -> Self {
        CallSpec::Fill {
            shape,
            paint,
            opacity: ValueSpec::number(1.0),
        }
    }

    /// A stroke call with the default line style (hairline, butt cap,
    /// miter join).
    pub fn stroke(shape: ShapeSpec, paint: PaintSpec) -> Self {
        CallSpec::Stroke {
            shape,
            paint,
            opacity: ValueSpec::number(1.0),
            line_width: ValueSpec::number(1.0),
            cap: ValueSpec::number(0.0),
            join: ValueSpec::number(4.0),
        }
    }
}

/// The declarative design: a list of calls over a DAG of value, shape and
/// paint nodes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DesignSpec {
    pub calls: Vec<CallSpec>,
}

impl DesignSpec {
    pub fn new(calls: Vec<CallSpec>) -> Self {
        Self { calls }
    }
}

// -------------------------------------------------------------------------
// Instance (per node, cached)
// -------------------------------------------------------------------------

struct ValueNode {
    kind: ValueNodeKind,
    cache: RefCell<Value>,
    generation: Cell<u64>,
}

enum ValueNodeKind {
    Constant(Value),
    Interop(String),
    Expression {
        expr: Expr,
        kwargs: Vec<(String, Rc<ValueNode>)>,
    },
}

struct ShapeNode {
    kind: ShapeNodeKind,
    cache: RefCell<Vec<Shape>>,
    generation: Cell<u64>,
}

enum ShapeNodeKind {
    RoundedRect {
        x: Rc<ValueNode>,
        y: Rc<ValueNode>,
        width: Rc<ValueNode>,
        height: Rc<ValueNode>,
        radius: Rc<ValueNode>,
    },
    Constant(Vec<Shape>),
}

enum DrawNode {
    Fill {
        shape: Rc<ShapeNode>,
        paint: Paint,
        opacity: Rc<ValueNode>,
    },
    Stroke {
        shape: Rc<ShapeNode>,
        paint: Paint,
        opacity: Rc<ValueNode>,
        line_width: Rc<ValueNode>,
        cap: Rc<ValueNode>,
        join: Rc<ValueNode>,
    },
}

struct MarkNode {
    shape: Rc<ShapeNode>,
    interop_name: String,
    operator: Cell<RowHandle>,
}

/// A design instance bound to one node.
pub struct Design {
    draw_calls: Vec<DrawNode>,
    marks: Vec<MarkNode>,
    generation: Cell<u64>,
}

struct EvalContext<'a> {
    rt: &'a Runtime,
    node: RowHandle,
    generation: u64,
    grant: Size2f,
}

impl ValueNode {
    /// Returns the value and whether it differs from the previous
    /// generation's.
    fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<(Value, bool), GraphError> {
        match &self.kind {
            ValueNodeKind::Constant(value) => Ok((value.clone(), false)),
            ValueNodeKind::Interop(name) => {
                let first_run = self.generation.get() == 0;
                if !first_run && self.generation.get() == ctx.generation {
                    return Ok((self.cache.borrow().clone(), false));
                }
                self.generation.set(ctx.generation);
                let fresh = ctx
                    .rt
                    .get_interop(ctx.node, name)
                    .and_then(|op| ctx.rt.op_value(op).cloned())
                    .ok_or_else(|| GraphError::UnknownInterop {
                        node: ctx.node,
                        name: name.clone(),
                    })?;
                if !first_run && fresh == *self.cache.borrow() {
                    return Ok((fresh, false));
                }
                *self.cache.borrow_mut() = fresh.clone();
                Ok((fresh, true))
            }
            ValueNodeKind::Expression { expr, kwargs } => {
                if self.generation.get() == ctx.generation {
                    return Ok((self.cache.borrow().clone(), false));
                }
                self.generation.set(ctx.generation);
                let mut scope_values: IndexMap<String, Value> = IndexMap::new();
                for (name, node) in kwargs {
                    scope_values.insert(name.clone(), node.evaluate(ctx)?.0);
                }
                let vars = |name: &str| scope_values.get(name).cloned();
                let interop = |name: &str| {
                    ctx.rt
                        .get_interop(ctx.node, name)
                        .and_then(|op| ctx.rt.op_value(op).cloned())
                };
                let scope = EvalScope {
                    vars: &vars,
                    interop: &interop,
                    grant: ctx.grant,
                };
                let fresh = expr
                    .evaluate(&scope)
                    .map_err(|error| GraphError::Design(error.to_string()))?;
                if fresh == *self.cache.borrow() {
                    return Ok((fresh, false));
                }
                *self.cache.borrow_mut() = fresh.clone();
                Ok((fresh, true))
            }
        }
    }
}

impl ShapeNode {
    fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<(Vec<Shape>, bool), GraphError> {
        match &self.kind {
            ShapeNodeKind::Constant(shapes) => Ok((shapes.clone(), false)),
            ShapeNodeKind::RoundedRect {
                x,
                y,
                width,
                height,
                radius,
            } => {
                if self.generation.get() == ctx.generation {
                    return Ok((self.cache.borrow().clone(), false));
                }
                self.generation.set(ctx.generation);

                let mut any_new = false;
                let mut number = |node: &Rc<ValueNode>| -> Result<f64, GraphError> {
                    let (value, is_new) = node.evaluate(ctx)?;
                    any_new |= is_new;
                    Ok(value.as_f64()?)
                };
                let x = number(x)?;
                let y = number(y)?;
                let width = number(width)?;
                let height = number(height)?;
                let radius = number(radius)?;
                if !any_new && !self.cache.borrow().is_empty() {
                    return Ok((self.cache.borrow().clone(), false));
                }

                let shapes = vec![Shape::rounded_rect(x, y, width, height, radius)];
                *self.cache.borrow_mut() = shapes.clone();
                Ok((shapes, true))
            }
        }
    }
}

/// Compiler state: dedups DAG nodes so shared sub-specs evaluate once per
/// generation.
#[derive(Default)]
struct Compiler {
    values: Vec<(ValueSpec, Rc<ValueNode>)>,
    shapes: Vec<(ShapeSpec, Rc<ShapeNode>)>,
}

impl Compiler {
    fn value(&mut self, spec: &ValueSpec) -> Result<Rc<ValueNode>, GraphError> {
        if let Some((_, node)) = self.values.iter().find(|(known, _)| known == spec) {
            return Ok(Rc::clone(node));
        }
        let kind = match spec {
            ValueSpec::Constant(value) => ValueNodeKind::Constant(value.clone()),
            ValueSpec::Interop(name) => ValueNodeKind::Interop(name.clone()),
            ValueSpec::Expression { source, kwargs } => {
                let expr = Expr::compile(source)
                    .map_err(|error| GraphError::Design(error.to_string()))?;
                let mut compiled = Vec::with_capacity(kwargs.len());
                for (name, sub) in kwargs {
                    compiled.push((name.clone(), self.value(sub)?));
                }
                ValueNodeKind::Expression {
                    expr,
                    kwargs: compiled,
                }
            }
        };
        let node = Rc::new(ValueNode {
            kind,
            cache: RefCell::new(Value::none()),
            generation: Cell::new(0),
        });
        self.values.push((spec.clone(), Rc::clone(&node)));
        Ok(node)
    }

    fn shape(&mut self, spec: &ShapeSpec) -> Result<Rc<ShapeNode>, GraphError> {
        if let Some((_, node)) = self.shapes.iter().find(|(known, _)| known == spec) {
            return Ok(Rc::clone(node));
        }
        let kind = match spec {
            ShapeSpec::Constant(shapes) => ShapeNodeKind::Constant(shapes.clone()),
            ShapeSpec::RoundedRect {
                x,
                y,
                width,
                height,
                radius,
            } => ShapeNodeKind::RoundedRect {
                x: self.value(x)?,
                y: self.value(y)?,
                width: self.value(width)?,
                height: self.value(height)?,
                radius: self.value(radius)?,
            },
        };
        let node = Rc::new(ShapeNode {
            kind,
            cache: RefCell::new(Vec::new()),
            generation: Cell::new(0),
        });
        self.shapes.push((spec.clone(), Rc::clone(&node)));
        Ok(node)
    }
}

fn paint_of(spec: &PaintSpec) -> Paint {
    match spec {
        PaintSpec::Color { r, g, b, a } => Paint::Solid(Color {
            r: *r,
            g: *g,
            b: *b,
            a: *a,
        }),
    }
}

impl Design {
    /// Compiles a spec into a fresh (unbound) instance.
    pub fn from_spec(spec: &DesignSpec) -> Result<Design, GraphError> {
        let mut compiler = Compiler::default();
        let mut draw_calls = Vec::new();
        let mut marks = Vec::new();
        for call in &spec.calls {
            match call {
                CallSpec::Fill {
                    shape,
                    paint,
                    opacity,
                } => draw_calls.push(DrawNode::Fill {
                    shape: compiler.shape(shape)?,
                    paint: paint_of(paint),
                    opacity: compiler.value(opacity)?,
                }),
                CallSpec::Stroke {
                    shape,
                    paint,
                    opacity,
                    line_width,
                    cap,
                    join,
                } => draw_calls.push(DrawNode::Stroke {
                    shape: compiler.shape(shape)?,
                    paint: paint_of(paint),
                    opacity: compiler.value(opacity)?,
                    line_width: compiler.value(line_width)?,
                    cap: compiler.value(cap)?,
                    join: compiler.value(join)?,
                }),
                CallSpec::Mark { shape, interop } => marks.push(MarkNode {
                    shape: compiler.shape(shape)?,
                    interop_name: interop.clone(),
                    operator: Cell::new(RowHandle::null()),
                }),
            }
        }
        Ok(Design {
            draw_calls,
            marks,
            generation: Cell::new(0),
        })
    }

    /// Binds mark calls to the node's interface operators. Mark interops
    /// must accept `{x, y}` input.
    pub fn bind(&self, rt: &Runtime, node: RowHandle) -> Result<(), GraphError> {
        let position_schema = Value::from_denotable(Denotable::Record(vec![
            ("x".to_string(), Denotable::Number(0.0)),
            ("y".to_string(), Denotable::Number(0.0)),
        ]))?
        .schema()
        .clone();
        for mark in &self.marks {
            let op = rt
                .get_interop(node, &mark.interop_name)
                .ok_or_else(|| GraphError::UnknownInterop {
                    node,
                    name: mark.interop_name.clone(),
                })?;
            let accepts = rt
                .op_value(op)
                .is_some_and(|value| value.schema() == &position_schema);
            if !accepts {
                return Err(GraphError::Design(format!(
                    "mark interop \"{}\" must accept {{x, y}} values",
                    mark.interop_name
                )));
            }
            mark.operator.set(op);
        }
        Ok(())
    }

    /// Evaluates every DAG node once for a new generation and assembles
    /// the Sketch. Caches make unchanged subtrees cheap.
    pub fn sketch(
        &self,
        rt: &Runtime,
        node: RowHandle,
        grant: Size2f,
    ) -> Result<Sketch, GraphError> {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        let ctx = EvalContext {
            rt,
            node,
            generation,
            grant,
        };

        let mut sketch = Sketch::default();
        for call in &self.draw_calls {
            match call {
                DrawNode::Fill {
                    shape,
                    paint,
                    opacity,
                } => {
                    let opacity = opacity.evaluate(&ctx)?.0.as_f64()?;
                    for shape in shape.evaluate(&ctx)?.0 {
                        sketch.draw_calls.push(DrawCall::Fill(FillCall {
                            shape,
                            paint: *paint,
                            opacity,
                        }));
                    }
                }
                DrawNode::Stroke {
                    shape,
                    paint,
                    opacity,
                    line_width,
                    cap,
                    join,
                } => {
                    let opacity = opacity.evaluate(&ctx)?.0.as_f64()?;
                    let line_width = line_width.evaluate(&ctx)?.0.as_f64()?;
                    let cap = LineCap::from_index(cap.evaluate(&ctx)?.0.as_f64()? as u32);
                    let join = LineJoin::from_index(join.evaluate(&ctx)?.0.as_f64()? as u32);
                    for shape in shape.evaluate(&ctx)?.0 {
                        sketch.draw_calls.push(DrawCall::Stroke(StrokeCall {
                            shape,
                            paint: *paint,
                            opacity,
                            line_width,
                            cap,
                            join,
                        }));
                    }
                }
            }
        }
        for mark in &self.marks {
            let operator = mark.operator.get();
            if !rt.is_op_valid(operator) {
                continue; // bound interop is gone; nothing to route to
            }
            for shape in mark.shape.evaluate(&ctx)?.0 {
                sketch.hitboxes.push(Hitbox { shape, operator });
            }
        }
        SKETCHES_PRODUCED.fetch_add(1, Relaxed);
        Ok(sketch)
    }
}
