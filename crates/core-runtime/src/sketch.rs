//! Sketches: the hit-testable draw list a Design produces.
//!
//! A Sketch is everything the painter backend needs to put pixels on
//! screen, while staying high-level enough to persist between frames. The
//! backend itself (rasterizer, fonts, windowing) is out of scope; the
//! [`Painter`] trait is the boundary the core drives.

use core_table::RowHandle;

use crate::geometry::{Aabrf, Size2f, V2f, Xform};

/// Circle-to-cubic-Bezier approximation constant.
pub const KAPPA: f64 = 0.552_284_749_830_793_5;

/// One cubic segment of a shape outline; the start point is the previous
/// segment's end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubicSegment {
    pub ctrl1: V2f,
    pub ctrl2: V2f,
    pub end: V2f,
}

/// A closed outline of cubic segments with a precomputed bounding
/// rectangle. Tessellation is the backend's business; the core only needs
/// the outline and a containment test for hitboxes.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    start: V2f,
    segments: Vec<CubicSegment>,
    aabr: Aabrf,
}

impl Shape {
    pub fn new(start: V2f, segments: Vec<CubicSegment>) -> Self {
        let mut aabr = Aabrf {
            min: start,
            max: start,
        };
        for segment in &segments {
            aabr.include(segment.ctrl1);
            aabr.include(segment.ctrl2);
            aabr.include(segment.end);
        }
        Self {
            start,
            segments,
            aabr,
        }
    }

    /// A rectangle with rounded corners, built from eight cubic segments
    /// (four edges, four KAPPA-approximated quarter circles).
    pub fn rounded_rect(x: f64, y: f64, width: f64, height: f64, radius: f64) -> Self {
        let r = radius.clamp(0.0, width.abs().min(height.abs()) / 2.0);
        let line = |end: V2f, from: V2f| CubicSegment {
            // a straight edge: control points on the line
            ctrl1: from,
            ctrl2: end,
            end,
        };
        let start = V2f::new(x + r, y);
        let mut segments = Vec::with_capacity(8);
        let top_right = V2f::new(x + width - r, y);
        segments.push(line(top_right, start));
        segments.push(CubicSegment {
            ctrl1: V2f::new(x + width - r + KAPPA * r, y),
            ctrl2: V2f::new(x + width, y + r - KAPPA * r),
            end: V2f::new(x + width, y + r),
        });
        let bottom_right = V2f::new(x + width, y + height - r);
        segments.push(line(bottom_right, segments[1].end));
        segments.push(CubicSegment {
            ctrl1: V2f::new(x + width, y + height - r + r * KAPPA),
            ctrl2: V2f::new(x + width - r + r * KAPPA, y + height),
            end: V2f::new(x + width - r, y + height),
        });
        let bottom_left = V2f::new(x + r, y + height);
        segments.push(line(bottom_left, segments[3].end));
        segments.push(CubicSegment {
            ctrl1: V2f::new(x + r - r * KAPPA, y + height),
            ctrl2: V2f::new(x, y + height - r + r * KAPPA),
            end: V2f::new(x, y + height - r),
        });
        let top_left = V2f::new(x, y + r);
        segments.push(line(top_left, segments[5].end));
        segments.push(CubicSegment {
            ctrl1: V2f::new(x, y + r - r * KAPPA),
            ctrl2: V2f::new(x + r - r * KAPPA, y),
            end: start,
        });
        Self::new(start, segments)
    }

    pub fn start(&self) -> V2f {
        self.start
    }

    pub fn segments(&self) -> &[CubicSegment] {
        &self.segments
    }

    pub fn aabr(&self) -> &Aabrf {
        &self.aabr
    }

    /// Containment against the bounding rectangle; precise enough for
    /// hitboxes of the shapes the designs produce.
    pub fn contains(&self, pos: V2f) -> bool {
        self.aabr.contains(pos)
    }

    /// The shape mapped through an affine transform.
    pub fn transformed(&self, xform: &Xform) -> Shape {
        Shape::new(
            xform.apply(self.start),
            self.segments
                .iter()
                .map(|segment| CubicSegment {
                    ctrl1: xform.apply(segment.ctrl1),
                    ctrl2: xform.apply(segment.ctrl2),
                    end: xform.apply(segment.end),
                })
                .collect(),
        )
    }
}

/// RGBA color, components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

/// What to fill or stroke with. Solid colors are all the builtin designs
/// need; gradients would slot in as further variants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Paint {
    Solid(Color),
}

/// Stroke end-cap style. Numeric values follow the painter convention
/// (butt 0, round 1, square 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineCap {
    #[default]
    Butt,
    Round,
    Square,
}

impl LineCap {
    pub fn from_index(index: u32) -> Self {
        match index {
            1 => LineCap::Round,
            2 => LineCap::Square,
            _ => LineCap::Butt,
        }
    }
}

/// Stroke join style (miter 4, round 1, bevel 3, painter convention).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineJoin {
    #[default]
    Miter,
    Round,
    Bevel,
}

impl LineJoin {
    pub fn from_index(index: u32) -> Self {
        match index {
            1 => LineJoin::Round,
            3 => LineJoin::Bevel,
            _ => LineJoin::Miter,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FillCall {
    pub shape: Shape,
    pub paint: Paint,
    pub opacity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrokeCall {
    pub shape: Shape,
    pub paint: Paint,
    pub opacity: f64,
    pub line_width: f64,
    pub cap: LineCap,
    pub join: LineJoin,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCall {
    Fill(FillCall),
    Stroke(StrokeCall),
}

/// A shape registered for input routing, bound to an interface operator.
#[derive(Debug, Clone)]
pub struct Hitbox {
    pub shape: Shape,
    pub operator: RowHandle,
}

/// The result of evaluating a Design for one node.
#[derive(Debug, Clone, Default)]
pub struct Sketch {
    pub draw_calls: Vec<DrawCall>,
    pub hitboxes: Vec<Hitbox>,
}

/// The out-of-scope backend boundary. The core hands the painter one
/// sketch per node, pre-composed transform and opacity included, in draw
/// order.
pub trait Painter {
    fn paint(&mut self, node: RowHandle, xform: &Xform, opacity: f64, sketch: &Sketch);

    /// The surface size, if the painter has one; used by hosts that drive
    /// `set_size` from the painter.
    fn surface_size(&self) -> Option<Size2f> {
        None
    }
}
