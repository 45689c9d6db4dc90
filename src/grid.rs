//! Bounded grids: configuration, world-space bounds, and the node lattice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use nalgebra::Point3;
use tracing::warn;

use crate::blocker::BlockageToken;
use crate::fixed::FixedPoint;
use crate::node::{Node, NodeCoord};
use crate::quantize;
use crate::registry::GridSlot;
use crate::scan_cell::{ScanCell, ScanCellCoord, ScanToken};

/// Scan-cell edge length (in nodes) substituted when a configuration
/// supplies a non-positive value.
pub const DEFAULT_SCAN_CELL_SIZE: u32 = 8;

/// An axis-aligned box in fixed-point world space.
///
/// Both corners are inclusive. Construction auto-orders the corners so
/// `min <= max` holds on every axis.
///
/// # Example
///
/// ```
/// use worldgrid::{FixedPoint, WorldBounds};
///
/// let bounds = WorldBounds::new(
///     FixedPoint::from_xyz(4.0, 0.0, 0.0),
///     FixedPoint::from_xyz(0.0, 1.0, 4.0),
/// );
/// assert_eq!(bounds.min(), FixedPoint::from_xyz(0.0, 0.0, 0.0));
/// assert!(bounds.contains(FixedPoint::from_xyz(2.0, 0.5, 3.0)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "RawWorldBounds"))]
pub struct WorldBounds {
    min: FixedPoint,
    max: FixedPoint,
}

// Deserialized payloads re-enter through the ordering constructor, so a
// hand-edited file cannot smuggle in corners with min > max.
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawWorldBounds {
    min: FixedPoint,
    max: FixedPoint,
}

#[cfg(feature = "serde")]
impl From<RawWorldBounds> for WorldBounds {
    fn from(raw: RawWorldBounds) -> Self {
        Self::new(raw.min, raw.max)
    }
}

impl WorldBounds {
    /// Creates bounds from two corners, auto-ordering them per axis.
    #[must_use]
    pub fn new(a: FixedPoint, b: FixedPoint) -> Self {
        Self {
            min: a.component_min(b),
            max: a.component_max(b),
        }
    }

    /// Minimum corner.
    #[must_use]
    pub const fn min(&self) -> FixedPoint {
        self.min
    }

    /// Maximum corner.
    #[must_use]
    pub const fn max(&self) -> FixedPoint {
        self.max
    }

    /// Center point.
    #[must_use]
    pub fn center(&self) -> FixedPoint {
        FixedPoint::new(
            (self.min.x + self.max.x) / 2,
            (self.min.y + self.max.y) / 2,
            (self.min.z + self.max.z) / 2,
        )
    }

    /// Whether the point lies inside these bounds (inclusive on all faces).
    #[must_use]
    pub fn contains(&self, p: FixedPoint) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Whether two bounds share any volume, face, or edge.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Intersection of two bounds, or `None` if they do not overlap.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Self {
            min: self.min.component_max(other.min),
            max: self.max.component_min(other.max),
        })
    }
}

/// Configuration value object for constructing a grid.
///
/// Invalid input is corrected, never rejected: swapped bounds are reordered
/// and quantized to the node lattice, and a non-positive scan-cell size falls
/// back to [`DEFAULT_SCAN_CELL_SIZE`]. Corrections are logged as warnings.
///
/// # Example
///
/// ```
/// use worldgrid::GridConfig;
/// use nalgebra::Point3;
///
/// let config = GridConfig::from_world(
///     Point3::new(-40.0, 0.0, -40.0),
///     Point3::new(-30.0, 0.0, -30.0),
///     4,
/// );
/// assert_eq!(config.scan_cell_size(), 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "RawGridConfig"))]
pub struct GridConfig {
    bounds: WorldBounds,
    scan_cell_size: u32,
}

// Same normalization funnel as `RawWorldBounds`: deserialized configs run
// through `GridConfig::new`, so quantization, degenerate-axis widening, and
// the scan-cell-size fallback all apply to loaded payloads too.
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawGridConfig {
    bounds: WorldBounds,
    scan_cell_size: u32,
}

#[cfg(feature = "serde")]
impl From<RawGridConfig> for GridConfig {
    fn from(raw: RawGridConfig) -> Self {
        let scan_cell_size = i32::try_from(raw.scan_cell_size).unwrap_or(i32::MAX);
        Self::new(raw.bounds.min(), raw.bounds.max(), scan_cell_size)
    }
}

impl GridConfig {
    /// Creates a configuration from fixed-point corners and a scan-cell
    /// size in nodes.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn new(bounds_min: FixedPoint, bounds_max: FixedPoint, scan_cell_size: i32) -> Self {
        let (min, max) = quantize::snap_bounds_to_node_size(bounds_min, bounds_max);
        let scan_cell_size = if scan_cell_size > 0 {
            scan_cell_size as u32
        } else {
            warn!(
                scan_cell_size,
                default = DEFAULT_SCAN_CELL_SIZE,
                "non-positive scan cell size; using default"
            );
            DEFAULT_SCAN_CELL_SIZE
        };
        Self {
            bounds: WorldBounds { min, max },
            scan_cell_size,
        }
    }

    /// Creates a configuration from floating-point world corners.
    #[must_use]
    pub fn from_world(min: Point3<f64>, max: Point3<f64>, scan_cell_size: i32) -> Self {
        Self::new(min.into(), max.into(), scan_cell_size)
    }

    /// The normalized, lattice-aligned bounds.
    #[must_use]
    pub const fn bounds(&self) -> WorldBounds {
        self.bounds
    }

    /// The scan-cell edge length, in nodes.
    #[must_use]
    pub const fn scan_cell_size(&self) -> u32 {
        self.scan_cell_size
    }
}

/// A bounded lattice of nodes and scan cells.
///
/// Grids are constructed through [`GridWorld::try_add_grid`] and identified
/// by their slot index. All nodes inside the bounds are materialized eagerly
/// at construction, so node identity and iteration order are fully
/// deterministic. A world position resolves to the node whose half-open cell
/// `[c, c + 1)` contains it; positions exactly on the maximum face therefore
/// resolve to no node.
///
/// Two grids may claim overlapping world volumes; each owns its own nodes
/// for the shared region.
///
/// [`GridWorld::try_add_grid`]: crate::GridWorld::try_add_grid
///
/// # Example
///
/// ```
/// use worldgrid::{FixedPoint, GridConfig, GridWorld};
/// use nalgebra::Point3;
///
/// let world = GridWorld::new();
/// let slot = world
///     .try_add_grid(&GridConfig::from_world(
///         Point3::new(0.0, 0.0, 0.0),
///         Point3::new(4.0, 1.0, 4.0),
///         2,
///     ))
///     .unwrap();
///
/// let grid = world.grid(slot).unwrap();
/// assert_eq!(grid.node_count(), 16); // 4 x 1 x 4
///
/// let node = grid.try_get_node(FixedPoint::from_xyz(3.5, 0.5, 0.5)).unwrap();
/// assert_eq!(node.coord().as_tuple(), (3, 0, 0));
/// assert!(grid.try_get_node(FixedPoint::from_xyz(9.0, 0.0, 0.0)).is_none());
/// ```
pub struct Grid {
    slot: GridSlot,
    bounds: WorldBounds,
    node_min: NodeCoord,
    node_max: NodeCoord,
    scan_cell_size: u32,
    nodes: HashMap<NodeCoord, Node>,
    scan_cells: HashMap<ScanCellCoord, ScanCell>,
    scan_tokens: HashMap<ScanToken, ScanCellCoord>,
    obstacle_count: AtomicU64,
}

impl Grid {
    pub(crate) fn build(slot: GridSlot, config: &GridConfig) -> Self {
        let bounds = config.bounds();
        let node_min = quantize::node_coord_of(bounds.min());
        // Bounds are lattice-aligned and non-degenerate, so the coordinate
        // of the max corner is one past the last node on each axis.
        let past_max = quantize::node_coord_of(bounds.max());
        let node_max = NodeCoord::new(past_max.x - 1, past_max.y - 1, past_max.z - 1);

        let scan_cell_size = config.scan_cell_size();
        let mut nodes = HashMap::new();
        let mut scan_cells: HashMap<ScanCellCoord, ScanCell> = HashMap::new();

        for z in node_min.z..=node_max.z {
            for y in node_min.y..=node_max.y {
                for x in node_min.x..=node_max.x {
                    let coord = NodeCoord::new(x, y, z);
                    nodes.insert(coord, Node::new(coord));

                    let scan_coord = ScanCellCoord::containing(coord, scan_cell_size);
                    scan_cells
                        .entry(scan_coord)
                        .or_insert_with(|| ScanCell::new(scan_coord, scan_cell_size))
                        .push_node(coord);
                }
            }
        }
        for cell in scan_cells.values_mut() {
            cell.sort_nodes();
        }
        let scan_tokens = scan_cells
            .iter()
            .map(|(coord, cell)| (cell.token(), *coord))
            .collect();

        Self {
            slot,
            bounds,
            node_min,
            node_max,
            scan_cell_size,
            nodes,
            scan_cells,
            scan_tokens,
            obstacle_count: AtomicU64::new(0),
        }
    }

    /// Registry slot index identifying this grid.
    #[must_use]
    pub const fn slot(&self) -> GridSlot {
        self.slot
    }

    /// World-space bounds (lattice-aligned).
    #[must_use]
    pub const fn bounds(&self) -> WorldBounds {
        self.bounds
    }

    /// World-space center of the bounds.
    #[must_use]
    pub fn center(&self) -> FixedPoint {
        self.bounds.center()
    }

    /// Scan-cell edge length, in nodes.
    #[must_use]
    pub const fn scan_cell_size(&self) -> u32 {
        self.scan_cell_size
    }

    /// Inclusive range of node coordinates this grid materializes.
    #[must_use]
    pub const fn node_range(&self) -> (NodeCoord, NodeCoord) {
        (self.node_min, self.node_max)
    }

    /// Whether the given global node coordinate belongs to this grid.
    #[must_use]
    pub const fn contains_node_coord(&self, coord: NodeCoord) -> bool {
        coord.x >= self.node_min.x
            && coord.x <= self.node_max.x
            && coord.y >= self.node_min.y
            && coord.y <= self.node_max.y
            && coord.z >= self.node_min.z
            && coord.z <= self.node_max.z
    }

    /// Number of materialized nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of materialized scan cells.
    #[must_use]
    pub fn scan_cell_count(&self) -> usize {
        self.scan_cells.len()
    }

    /// Resolves a world position to this grid's node containing it.
    ///
    /// Returns `None` when the position lies outside the grid's bounds; this
    /// is a normal control path, not a fault.
    #[must_use]
    pub fn try_get_node(&self, pos: FixedPoint) -> Option<&Node> {
        self.nodes.get(&quantize::node_coord_of(pos))
    }

    /// Looks up a node by its global coordinate.
    #[must_use]
    pub fn node(&self, coord: NodeCoord) -> Option<&Node> {
        self.nodes.get(&coord)
    }

    /// Looks up a scan cell by its identity token.
    #[must_use]
    pub fn try_get_scan_cell(&self, token: ScanToken) -> Option<&ScanCell> {
        self.scan_cells.get(self.scan_tokens.get(&token)?)
    }

    /// Looks up a scan cell by its coordinate.
    #[must_use]
    pub fn scan_cell(&self, coord: ScanCellCoord) -> Option<&ScanCell> {
        self.scan_cells.get(&coord)
    }

    /// Scan-cell coordinate containing a world position.
    #[must_use]
    pub fn snap_to_scan_cell(&self, pos: FixedPoint) -> ScanCellCoord {
        ScanCellCoord::containing(quantize::node_coord_of(pos), self.scan_cell_size)
    }

    /// Stacks one obstruction contribution on the node at `coord`.
    ///
    /// Returns `false` when the coordinate is outside this grid. Safe to
    /// call concurrently from multiple blockers covering overlapping
    /// regions; no update is ever lost.
    pub fn try_add_obstacle(&self, coord: NodeCoord, token: BlockageToken) -> bool {
        let Some(node) = self.nodes.get(&coord) else {
            return false;
        };
        node.stack_obstruction(token);
        self.obstacle_count.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Releases one obstruction contribution from the node at `coord`.
    ///
    /// Removing a contribution that was never added (or already removed) is
    /// a no-op returning `false`; counters are clamped at zero, never
    /// negative.
    pub fn try_remove_obstacle(&self, coord: NodeCoord, token: BlockageToken) -> bool {
        let Some(node) = self.nodes.get(&coord) else {
            return false;
        };
        if !node.release_obstruction(token) {
            return false;
        }
        self.obstacle_count.fetch_sub(1, Ordering::AcqRel);
        true
    }

    /// Total obstruction contributions across all nodes, maintained
    /// incrementally for O(1) reads.
    #[must_use]
    pub fn obstacle_count(&self) -> u64 {
        self.obstacle_count.load(Ordering::Acquire)
    }

    /// Iterates all nodes, in unspecified order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Iterates the currently-blocked nodes, in unspecified order.
    pub fn blocked_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|node| node.is_blocked())
    }
}

impl std::fmt::Debug for Grid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Grid")
            .field("slot", &self.slot)
            .field("bounds", &self.bounds)
            .field("scan_cell_size", &self.scan_cell_size)
            .field("node_count", &self.nodes.len())
            .field("obstacle_count", &self.obstacle_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::registry::GridSlot;

    fn test_grid(min: [f64; 3], max: [f64; 3], scan: i32) -> Grid {
        let config = GridConfig::new(min.into(), max.into(), scan);
        Grid::build(GridSlot::new(0), &config)
    }

    #[test]
    fn test_world_bounds_auto_order() {
        let b = WorldBounds::new(
            FixedPoint::from_xyz(5.0, -1.0, 2.0),
            FixedPoint::from_xyz(-5.0, 1.0, -2.0),
        );
        assert_eq!(b.min(), FixedPoint::from_xyz(-5.0, -1.0, -2.0));
        assert_eq!(b.max(), FixedPoint::from_xyz(5.0, 1.0, 2.0));
    }

    #[test]
    fn test_world_bounds_overlap_and_intersection() {
        let a = WorldBounds::new(FixedPoint::from_xyz(0.0, 0.0, 0.0), FixedPoint::from_xyz(4.0, 4.0, 4.0));
        let b = WorldBounds::new(FixedPoint::from_xyz(2.0, 2.0, 2.0), FixedPoint::from_xyz(6.0, 6.0, 6.0));
        let c = WorldBounds::new(FixedPoint::from_xyz(5.0, 5.0, 5.0), FixedPoint::from_xyz(7.0, 7.0, 7.0));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        let i = a.intersection(&b).unwrap();
        assert_eq!(i.min(), FixedPoint::from_xyz(2.0, 2.0, 2.0));
        assert_eq!(i.max(), FixedPoint::from_xyz(4.0, 4.0, 4.0));
    }

    #[test]
    fn test_config_corrects_scan_cell_size() {
        let config = GridConfig::new(
            FixedPoint::origin(),
            FixedPoint::from_xyz(4.0, 4.0, 4.0),
            0,
        );
        assert_eq!(config.scan_cell_size(), DEFAULT_SCAN_CELL_SIZE);
        let config = GridConfig::new(
            FixedPoint::origin(),
            FixedPoint::from_xyz(4.0, 4.0, 4.0),
            -3,
        );
        assert_eq!(config.scan_cell_size(), DEFAULT_SCAN_CELL_SIZE);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialized_bounds_are_reordered() {
        // Swapped corners in a hand-edited payload (raw ticks, 1 unit =
        // 65536) come out ordered, same as construction.
        let json = r#"{"min":{"x":655360,"y":0,"z":0},"max":{"x":0,"y":65536,"z":262144}}"#;
        let bounds: WorldBounds = serde_json::from_str(json).unwrap();
        assert_eq!(bounds.min(), FixedPoint::from_xyz(0.0, 0.0, 0.0));
        assert_eq!(bounds.max(), FixedPoint::from_xyz(10.0, 1.0, 4.0));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialized_config_is_renormalized() {
        // Off-lattice max, degenerate y axis, and a zero scan-cell size all
        // go through the same corrections as a constructed config.
        let json = r#"{"bounds":{"min":{"x":0,"y":0,"z":0},"max":{"x":32768,"y":0,"z":262144}},"scan_cell_size":0}"#;
        let config: GridConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.scan_cell_size(), DEFAULT_SCAN_CELL_SIZE);
        assert_eq!(config.bounds().max(), FixedPoint::from_xyz(1.0, 1.0, 4.0));
    }

    #[test]
    fn test_eager_materialization() {
        let grid = test_grid([-40.0, 0.0, -40.0], [-30.0, 0.0, -30.0], 5);
        // Flat y axis is widened to one node layer.
        assert_eq!(grid.node_count(), 100);
        assert_eq!(grid.node_range().0, NodeCoord::new(-40, 0, -40));
        assert_eq!(grid.node_range().1, NodeCoord::new(-31, 0, -31));
    }

    #[test]
    fn test_try_get_node_inside_and_outside() {
        let grid = test_grid([-40.0, 0.0, -40.0], [-30.0, 0.0, -30.0], 5);
        let node = grid
            .try_get_node(FixedPoint::from_xyz(-39.5, 0.5, -39.5))
            .unwrap();
        assert_eq!(node.coord(), NodeCoord::new(-40, 0, -40));

        assert!(grid.try_get_node(FixedPoint::from_xyz(0.0, 0.0, 0.0)).is_none());
        // The max face is exclusive for point resolution.
        assert!(grid
            .try_get_node(FixedPoint::from_xyz(-30.0, 0.0, -30.0))
            .is_none());
    }

    #[test]
    fn test_scan_cells_cover_all_nodes() {
        let grid = test_grid([0.0, 0.0, 0.0], [10.0, 1.0, 10.0], 4);
        let total: usize = grid
            .scan_cells
            .values()
            .map(super::ScanCell::len)
            .sum();
        assert_eq!(total, grid.node_count());
        // 10 nodes per axis at scan size 4 -> cells 0..2 on x/z, 1 on y.
        assert_eq!(grid.scan_cell_count(), 9);
    }

    #[test]
    fn test_scan_cell_token_lookup() {
        let grid = test_grid([0.0, 0.0, 0.0], [8.0, 1.0, 8.0], 4);
        let coord = grid.snap_to_scan_cell(FixedPoint::from_xyz(5.0, 0.5, 5.0));
        assert_eq!(coord, ScanCellCoord::new(1, 0, 1));
        let cell = grid.scan_cell(coord).unwrap();
        let by_token = grid.try_get_scan_cell(cell.token()).unwrap();
        assert_eq!(by_token.coord(), coord);
    }

    #[test]
    fn test_obstacle_count_incremental() {
        let grid = test_grid([0.0, 0.0, 0.0], [4.0, 1.0, 4.0], 2);
        let a = NodeCoord::new(0, 0, 0);
        let b = NodeCoord::new(3, 0, 3);
        let token = BlockageToken(11);

        assert!(grid.try_add_obstacle(a, token));
        assert!(grid.try_add_obstacle(b, token));
        assert_eq!(grid.obstacle_count(), 2);

        assert!(grid.try_remove_obstacle(a, token));
        assert_eq!(grid.obstacle_count(), 1);
        // Double-remove is clamped to a no-op.
        assert!(!grid.try_remove_obstacle(a, token));
        assert_eq!(grid.obstacle_count(), 1);
    }

    #[test]
    fn test_obstacle_outside_grid_rejected() {
        let grid = test_grid([0.0, 0.0, 0.0], [4.0, 1.0, 4.0], 2);
        assert!(!grid.try_add_obstacle(NodeCoord::new(99, 0, 0), BlockageToken(1)));
        assert_eq!(grid.obstacle_count(), 0);
    }
}
