//! Stateless query engine: box coverage and line traversal across grids.
//!
//! Every query here is deterministic: candidate grids are visited in
//! ascending slot order and lattice cells in ascending coordinate order, so
//! the same inputs against the same world state produce the same output
//! sequence, run after run, machine after machine.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;

use crate::fixed::{Fixed, FixedPoint};
use crate::grid::Grid;
use crate::node::{NodeCoord, NodeToken};
use crate::quantize;
use crate::registry::{GridSlot, GridWorld};
use crate::scan_cell::{ScanCellCoord, ScanToken};

/// The distinct nodes one grid contributes to a query, in query order.
#[derive(Debug, Clone)]
pub struct GridCoverage {
    /// The covered grid.
    pub grid: Arc<Grid>,
    /// Coordinates of the distinct covered nodes, in the order the query
    /// visited them.
    pub nodes: Vec<NodeCoord>,
}

/// One scan cell hit by a coverage query.
#[derive(Debug, Clone)]
pub struct ScanCellHit {
    /// The grid owning the scan cell.
    pub grid: Arc<Grid>,
    /// Coordinate of the scan cell within its grid's scan lattice.
    pub coord: ScanCellCoord,
    /// Identity token used for cross-grid deduplication.
    pub token: ScanToken,
}

/// Quantized inclusive node-coordinate box for a padded world-space region.
fn quantized_box(min: FixedPoint, max: FixedPoint, padding: Fixed) -> (NodeCoord, NodeCoord) {
    let lo = min.component_min(max);
    let hi = min.component_max(max);
    let pad = FixedPoint::new(padding, padding, padding);
    let lo = quantize::floor_to_node_size(lo - pad);
    let hi = quantize::ceil_to_node_size(hi + pad);
    (quantize::node_coord_of(lo), quantize::node_coord_of(hi))
}

/// Collects the nodes of every grid intersecting the padded, quantized box
/// `[min, max]`, grouped per grid.
///
/// Groups appear in ascending slot order; nodes within a group in ascending
/// coordinate order (x fastest). Each node appears at most once per group,
/// keyed by its identity token. Every returned node's cell corner lies
/// within `[floor(min - padding), ceil(max + padding)]` on all axes.
///
/// # Example
///
/// ```
/// use worldgrid::{trace, Fixed, FixedPoint, GridConfig, GridWorld};
/// use nalgebra::Point3;
///
/// let world = GridWorld::new();
/// world
///     .try_add_grid(&GridConfig::from_world(
///         Point3::new(0.0, 0.0, 0.0),
///         Point3::new(8.0, 1.0, 8.0),
///         4,
///     ))
///     .unwrap();
///
/// let covered = trace::covered_nodes(
///     &world,
///     FixedPoint::from_xyz(1.2, 0.0, 1.2),
///     FixedPoint::from_xyz(2.8, 1.0, 1.8),
///     Fixed::ZERO,
/// );
/// assert_eq!(covered.len(), 1);
/// // x in 1..=3, y in 0..=1 clipped to the grid's single layer, z in 1..=2.
/// assert_eq!(covered[0].nodes.len(), 6);
/// ```
#[must_use]
pub fn covered_nodes(
    world: &GridWorld,
    min: FixedPoint,
    max: FixedPoint,
    padding: Fixed,
) -> Vec<GridCoverage> {
    let (lo, hi) = quantized_box(min, max, padding);
    let mut groups = Vec::new();

    for grid in world.grids_overlapping_box(lo, hi) {
        let mut nodes = Vec::new();
        let mut seen: HashSet<NodeToken> = HashSet::new();
        for z in lo.z..=hi.z {
            for y in lo.y..=hi.y {
                for x in lo.x..=hi.x {
                    let coord = NodeCoord::new(x, y, z);
                    if let Some(node) = grid.node(coord) {
                        if seen.insert(node.token()) {
                            nodes.push(coord);
                        }
                    }
                }
            }
        }
        if !nodes.is_empty() {
            groups.push(GridCoverage { grid, nodes });
        }
    }
    groups
}

/// Collects the scan cells of every grid intersecting the padded, quantized
/// box `[min, max]`, as one flat sequence deduplicated by scan token.
///
/// Candidate discovery matches [`covered_nodes`], but iteration runs at each
/// grid's scan-cell stride instead of node stride.
#[must_use]
pub fn covered_scan_cells(
    world: &GridWorld,
    min: FixedPoint,
    max: FixedPoint,
    padding: Fixed,
) -> Vec<ScanCellHit> {
    let (lo, hi) = quantized_box(min, max, padding);
    let mut hits = Vec::new();
    let mut seen: HashSet<ScanToken> = HashSet::new();

    for grid in world.grids_overlapping_box(lo, hi) {
        let size = grid.scan_cell_size();
        let a = ScanCellCoord::containing(lo, size);
        let b = ScanCellCoord::containing(hi, size);
        for z in a.z..=b.z {
            for y in a.y..=b.y {
                for x in a.x..=b.x {
                    let coord = ScanCellCoord::new(x, y, z);
                    if let Some(cell) = grid.scan_cell(coord) {
                        if seen.insert(cell.token()) {
                            hits.push(ScanCellHit {
                                grid: Arc::clone(&grid),
                                coord,
                                token: cell.token(),
                            });
                        }
                    }
                }
            }
        }
    }
    hits
}

/// Accumulates per-grid visit-ordered node groups for line tracing.
struct LineGroups {
    groups: BTreeMap<GridSlot, (Arc<Grid>, Vec<NodeCoord>, HashSet<NodeToken>)>,
}

impl LineGroups {
    fn new() -> Self {
        Self {
            groups: BTreeMap::new(),
        }
    }

    fn visit(&mut self, world: &GridWorld, coord: NodeCoord) {
        for grid in world.grids_overlapping_box(coord, coord) {
            let entry = self
                .groups
                .entry(grid.slot())
                .or_insert_with(|| (grid, Vec::new(), HashSet::new()));
            if let Some(node) = entry.0.node(coord) {
                if entry.2.insert(node.token()) {
                    entry.1.push(coord);
                }
            }
        }
    }

    fn finish(self) -> Vec<GridCoverage> {
        self.groups
            .into_values()
            .filter(|(_, nodes, _)| !nodes.is_empty())
            .map(|(grid, nodes, _)| GridCoverage { grid, nodes })
            .collect()
    }
}

/// Traces the node cells intersected by the segment from `start` to `end`.
///
/// The segment is sampled at a fixed-point stride derived from its dominant
/// axis: with `steps` the ceiling of the largest absolute delta component,
/// sample `i` of `0..=steps` lies at `start + i * delta / (steps + 1)`. Each
/// sample is floored to the lattice and resolved through every grid whose
/// macro-cells contain it. `padding` widens each sample to a cube of that
/// half-width, pulling in neighboring cells the segment passes close to.
///
/// Nodes are recorded once per grid, in visit order, which is monotonic from
/// `start` toward `end`; groups are emitted in ascending slot order. With
/// `include_end` the node containing the exact end position is appended even
/// if stepping never lands in it; without it, the end node only appears when
/// a sample falls inside.
///
/// # Example
///
/// ```
/// use worldgrid::{trace, Fixed, FixedPoint, GridConfig, GridWorld};
/// use nalgebra::Point3;
///
/// let world = GridWorld::new();
/// world
///     .try_add_grid(&GridConfig::from_world(
///         Point3::new(0.0, 0.0, 0.0),
///         Point3::new(10.0, 1.0, 10.0),
///         4,
///     ))
///     .unwrap();
///
/// let groups = trace::trace_line(
///     &world,
///     FixedPoint::from_xyz(0.5, 0.5, 0.5),
///     FixedPoint::from_xyz(9.5, 0.5, 0.5),
///     Fixed::ZERO,
///     true,
/// );
/// let nodes = &groups[0].nodes;
/// assert_eq!(nodes.first().unwrap().as_tuple(), (0, 0, 0));
/// assert_eq!(nodes.last().unwrap().as_tuple(), (9, 0, 0));
/// assert_eq!(nodes.len(), 10);
/// ```
#[must_use]
pub fn trace_line(
    world: &GridWorld,
    start: FixedPoint,
    end: FixedPoint,
    padding: Fixed,
    include_end: bool,
) -> Vec<GridCoverage> {
    let delta = end - start;
    let largest = delta.x.abs().max(delta.y.abs()).max(delta.z.abs());
    let steps = largest.ceil_units();
    let n = steps + 1;
    let inc = FixedPoint::new(delta.x / n, delta.y / n, delta.z / n);

    let mut groups = LineGroups::new();
    for i in 0..=steps {
        let sample = start + FixedPoint::new(inc.x * i, inc.y * i, inc.z * i);
        if padding == Fixed::ZERO {
            groups.visit(world, quantize::node_coord_of(sample));
        } else {
            let pad = FixedPoint::new(padding, padding, padding);
            let lo = quantize::node_coord_of(sample - pad);
            let hi = quantize::node_coord_of(sample + pad);
            for z in lo.z..=hi.z {
                for y in lo.y..=hi.y {
                    for x in lo.x..=hi.x {
                        groups.visit(world, NodeCoord::new(x, y, z));
                    }
                }
            }
        }
    }
    if include_end {
        groups.visit(world, quantize::node_coord_of(end));
    }
    groups.finish()
}

/// 2-D convenience form of [`trace_line`]: traces in the X/Y plane with the
/// height axis held at zero.
#[must_use]
pub fn trace_line_2d(
    world: &GridWorld,
    start: (Fixed, Fixed),
    end: (Fixed, Fixed),
    padding: Fixed,
    include_end: bool,
) -> Vec<GridCoverage> {
    trace_line(
        world,
        FixedPoint::new(start.0, start.1, Fixed::ZERO),
        FixedPoint::new(end.0, end.1, Fixed::ZERO),
        padding,
        include_end,
    )
}
