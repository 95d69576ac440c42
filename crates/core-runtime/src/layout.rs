//! Layouts: how a node distributes its grant among its children.
//!
//! Layouts mirror the operator design: one row per live layout in a table,
//! one vtable per kind in a registry. A layout consumes the claims of its
//! nodes and produces a [`LayoutComposition`]: a grant + transform +
//! opacity per child and the children in draw order (sorted by their
//! `widget.depth` interop).
//!
//! Builtins: **overlay** stacks every child at the origin with the grant
//! clamped to its claim; **flex** distributes the main axis, shrinking
//! toward claim minimums when space is short and growing toward maximums
//! (weighted by scale factor) when there is spare room.

use indexmap::IndexMap;

use core_table::RowHandle;
use core_value::Value;

use crate::claim::Claim;
use crate::geometry::{Aabrf, Size2f, Xform};
use crate::runtime::Runtime;
use crate::GraphError;

/// Index into the layout registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayoutKind(pub usize);

/// The builtin layout kinds, in registry order.
pub mod kinds {
    use super::LayoutKind;

    pub const OVERLAY: LayoutKind = LayoutKind(0);
    pub const FLEX: LayoutKind = LayoutKind(1);
}

/// Where a layout placed one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeComposition {
    pub xform: Xform,
    pub grant: Size2f,
    pub opacity: f64,
}

/// The result of one layout pass.
#[derive(Debug, Clone, Default)]
pub struct LayoutComposition {
    /// Node name → placement.
    pub nodes: IndexMap<String, NodeComposition>,
    /// All nodes in draw order.
    pub order: Vec<RowHandle>,
    /// Union of the child rectangles.
    pub aabr: Aabrf,
    /// The combined claim the layout makes on behalf of its children.
    pub claim: Claim,
}

pub type LayoutCreateFn = fn(&Value) -> Result<(), GraphError>;
pub type LayoutFn = fn(&Runtime, RowHandle, Size2f) -> LayoutComposition;

#[derive(Clone, Copy)]
pub struct LayoutVtable {
    pub name: &'static str,
    /// Validates the args at creation.
    pub create: LayoutCreateFn,
    pub layout: LayoutFn,
}

pub struct LayoutRegistry {
    entries: Vec<LayoutVtable>,
}

impl LayoutRegistry {
    pub fn with_builtins() -> Self {
        Self {
            entries: vec![
                LayoutVtable {
                    name: "overlay",
                    create: overlay::create,
                    layout: overlay::layout,
                },
                LayoutVtable {
                    name: "flex",
                    create: flex::create,
                    layout: flex::layout,
                },
            ],
        }
    }

    pub fn register(&mut self, vtable: LayoutVtable) -> LayoutKind {
        self.entries.push(vtable);
        LayoutKind(self.entries.len() - 1)
    }

    pub fn vtable(&self, kind: LayoutKind) -> Option<&LayoutVtable> {
        self.entries.get(kind.0)
    }
}

/// One row of the layout table. Layouts hold arguments, the nodes they
/// arrange (in insertion order) and their last composition; they carry no
/// other mutable state.
pub struct LayoutRow {
    pub kind: LayoutKind,
    pub args: Value,
    pub nodes: Vec<RowHandle>,
    pub composition: LayoutComposition,
}

impl Runtime {
    pub fn create_layout(&mut self, kind: LayoutKind, args: Value) -> Result<RowHandle, GraphError> {
        let create = self
            .layout_registry()
            .vtable(kind)
            .ok_or(GraphError::UnknownLayoutKind(kind.0))?
            .create;
        create(&args)?;
        Ok(self.layouts_mut().add_row(LayoutRow {
            kind,
            args,
            nodes: Vec::new(),
            composition: LayoutComposition::default(),
        }))
    }

    /// Appends a node to the layout; a node already present moves to the
    /// end.
    pub fn layout_add_node(&mut self, layout: RowHandle, node: RowHandle) {
        if let Some(row) = self.layouts_mut().get_mut(layout) {
            row.nodes.retain(|handle| *handle != node);
            row.nodes.push(node);
        }
    }

    pub fn layout_composition(&self, layout: RowHandle) -> Option<&LayoutComposition> {
        self.layouts().get(layout).map(|row| &row.composition)
    }

    /// Runs the layout against a grant and stores the composition.
    pub fn perform_layout(
        &mut self,
        layout: RowHandle,
        grant: Size2f,
    ) -> Result<LayoutComposition, GraphError> {
        let kind = self
            .layouts()
            .get(layout)
            .ok_or(GraphError::StaleLayout(layout))?
            .kind;
        let layout_fn = self
            .layout_registry()
            .vtable(kind)
            .ok_or(GraphError::UnknownLayoutKind(kind.0))?
            .layout;
        let composition = layout_fn(self, layout, grant);
        if let Some(row) = self.layouts_mut().get_mut(layout) {
            row.composition = composition.clone();
        }
        Ok(composition)
    }

    pub fn remove_layout(&mut self, layout: RowHandle) {
        self.layouts_mut().remove_row(layout);
    }

    /// The layout's nodes sorted by their `widget.depth` interop (stable, so
    /// equal depths keep insertion order).
    pub(crate) fn layout_draw_order(&self, layout: RowHandle) -> Vec<RowHandle> {
        let Some(row) = self.layouts().get(layout) else {
            return Vec::new();
        };
        let mut order = row.nodes.clone();
        order.sort_by(|a, b| {
            let depth_a = self.node_depth(*a);
            let depth_b = self.node_depth(*b);
            depth_a
                .partial_cmp(&depth_b)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order
    }
}

mod overlay {
    use super::*;

    pub(super) fn create(_args: &Value) -> Result<(), GraphError> {
        Ok(())
    }

    pub(super) fn layout(rt: &Runtime, layout: RowHandle, grant: Size2f) -> LayoutComposition {
        let Some(row) = rt.layouts().get(layout) else {
            return LayoutComposition::default();
        };
        let mut nodes = IndexMap::new();
        for node in &row.nodes {
            let Some(name) = rt.node_name(*node) else {
                continue;
            };
            let claim = rt.node_claim(*node);
            let node_grant = Size2f::new(
                grant.width.min(claim.horizontal.max()).max(claim.horizontal.min()),
                grant.height.min(claim.vertical.max()).max(claim.vertical.min()),
            );
            nodes.insert(
                name,
                NodeComposition {
                    xform: Xform::identity(),
                    grant: node_grant,
                    opacity: rt.node_opacity(*node),
                },
            );
        }
        LayoutComposition {
            nodes,
            order: rt.layout_draw_order(layout),
            aabr: Aabrf::from_size(grant),
            claim: Claim::default(),
        }
    }
}

mod flex {
    use super::*;

    pub(super) fn create(args: &Value) -> Result<(), GraphError> {
        // spacing is optional but must be a number when present
        if !args.is_none()
            && let Ok(spacing) = args.index("spacing")
        {
            spacing.as_f64()?;
        }
        Ok(())
    }

    pub(super) fn layout(rt: &Runtime, layout: RowHandle, grant: Size2f) -> LayoutComposition {
        let Some(row) = rt.layouts().get(layout) else {
            return LayoutComposition::default();
        };
        let spacing = if row.args.is_none() {
            0.0
        } else {
            row.args
                .index("spacing")
                .and_then(|value| value.as_f64())
                .unwrap_or(0.0)
        };

        let claims: Vec<(RowHandle, String, Claim)> = row
            .nodes
            .iter()
            .filter_map(|node| {
                rt.node_name(*node)
                    .map(|name| (*node, name, rt.node_claim(*node)))
            })
            .collect();
        if claims.is_empty() {
            return LayoutComposition {
                order: Vec::new(),
                aabr: Aabrf::from_size(grant),
                ..LayoutComposition::default()
            };
        }

        let total_spacing = spacing * (claims.len() as f64 - 1.0);
        let available = (grant.width - total_spacing).max(0.0);
        let preferred_sum: f64 = claims
            .iter()
            .map(|(_, _, claim)| claim.horizontal.preferred())
            .sum();

        // widths start at preferred, then shrink toward min or grow toward
        // max to absorb the difference
        let mut widths: Vec<f64> = claims
            .iter()
            .map(|(_, _, claim)| claim.horizontal.preferred())
            .collect();
        if preferred_sum > available {
            let mut deficit = preferred_sum - available;
            let shrinkable: f64 = claims
                .iter()
                .map(|(_, _, claim)| claim.horizontal.preferred() - claim.horizontal.min())
                .sum();
            if shrinkable > 0.0 {
                deficit = deficit.min(shrinkable);
                for (width, (_, _, claim)) in widths.iter_mut().zip(&claims) {
                    let slack = claim.horizontal.preferred() - claim.horizontal.min();
                    *width -= deficit * slack / shrinkable;
                }
            }
        } else if preferred_sum < available {
            let surplus = available - preferred_sum;
            let weight_sum: f64 = claims
                .iter()
                .map(|(_, _, claim)| claim.horizontal.scale_factor())
                .sum();
            if weight_sum > 0.0 {
                for (width, (_, _, claim)) in widths.iter_mut().zip(&claims) {
                    let share = surplus * claim.horizontal.scale_factor() / weight_sum;
                    *width = (*width + share).min(claim.horizontal.max());
                }
            }
        }

        let mut nodes = IndexMap::new();
        let mut x = 0.0;
        let mut aabr = Aabrf::default();
        for ((node, name, claim), width) in claims.iter().zip(&widths) {
            let height = grant
                .height
                .min(claim.vertical.max())
                .max(claim.vertical.min());
            let node_grant = Size2f::new(*width, height);
            nodes.insert(
                name.clone(),
                NodeComposition {
                    xform: Xform::translation(x, 0.0),
                    grant: node_grant,
                    opacity: rt.node_opacity(*node),
                },
            );
            aabr.include(crate::geometry::V2f::new(x + width, height));
            x += width + spacing;
        }

        LayoutComposition {
            nodes,
            order: rt.layout_draw_order(layout),
            aabr,
            claim: Claim::default(),
        }
    }
}
