//! The grid world: slot-indexed grid registry and macro-cell spatial hash.
//!
//! A [`GridWorld`] owns every active grid and a coarse spatial hash mapping
//! macro-cells (broad swaths of node space) to the grids overlapping them.
//! Point and box queries inspect only the macro-cells they touch, so lookup
//! cost scales with candidate grids, not with the total grid count.
//!
//! There is deliberately no process-wide singleton: a `GridWorld` is an
//! explicitly-owned context, so independent simulations (and tests) each run
//! against their own isolated world.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::error;

use crate::blocker::{BlockageEvent, BlockageObserver};
use crate::error::GridWorldError;
use crate::fixed::FixedPoint;
use crate::grid::{Grid, GridConfig};
use crate::node::NodeCoord;
use crate::quantize;

/// Edge length of a macro-cell, in nodes.
///
/// Chosen so a typical grid occupies O(1) macro-cells while point queries
/// still only inspect a handful of buckets.
pub const MACRO_CELL_NODES: i32 = 64;

/// Maximum number of concurrently registered grids (16-bit slot space).
pub const MAX_GRIDS: usize = u16::MAX as usize;

/// Stable slot index identifying a registered grid.
///
/// Slots are reused after their grid is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GridSlot(u16);

impl GridSlot {
    /// Creates a slot from a raw index.
    #[must_use]
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// Raw slot index.
    #[must_use]
    pub const fn index(self) -> u16 {
        self.0
    }
}

/// Identifier returned by [`GridWorld::subscribe_blockage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Coordinate of a macro-cell bucket in the spatial hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MacroCellCoord {
    x: i32,
    y: i32,
    z: i32,
}

impl MacroCellCoord {
    fn containing(node: NodeCoord) -> Self {
        Self {
            x: node.x.div_euclid(MACRO_CELL_NODES),
            y: node.y.div_euclid(MACRO_CELL_NODES),
            z: node.z.div_euclid(MACRO_CELL_NODES),
        }
    }
}

/// Iterates every macro-cell touched by an inclusive node-coordinate box.
fn macro_cells_in(lo: NodeCoord, hi: NodeCoord) -> impl Iterator<Item = MacroCellCoord> {
    let a = MacroCellCoord::containing(lo);
    let b = MacroCellCoord::containing(hi);
    (a.z..=b.z).flat_map(move |z| {
        (a.y..=b.y).flat_map(move |y| (a.x..=b.x).map(move |x| MacroCellCoord { x, y, z }))
    })
}

struct WorldInner {
    slots: Vec<Option<Arc<Grid>>>,
    free: Vec<GridSlot>,
    macro_cells: HashMap<MacroCellCoord, HashSet<GridSlot>>,
}

impl WorldInner {
    fn grid(&self, slot: GridSlot) -> Option<&Arc<Grid>> {
        self.slots.get(usize::from(slot.index()))?.as_ref()
    }

    /// Candidate slots whose macro-cells intersect the box, in ascending
    /// slot order. The macro-cell hash only narrows; callers still apply an
    /// exact check.
    fn candidates_in(&self, lo: NodeCoord, hi: NodeCoord) -> BTreeSet<GridSlot> {
        let mut found = BTreeSet::new();
        for cell in macro_cells_in(lo, hi) {
            if let Some(slots) = self.macro_cells.get(&cell) {
                found.extend(slots.iter().copied());
            }
        }
        found
    }
}

/// Process-explicit registry of active grids plus the coarse spatial hash
/// used to find candidate grids for a query.
///
/// All methods take `&self`; the world is internally synchronized. Grid
/// addition and removal are atomic with respect to concurrent queries: a
/// query observes either the pre- or post-mutation state, never a
/// partially-indexed grid.
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
///         Point3::new(10.0, 1.0, 10.0),
///         4,
///     ))
///     .unwrap();
///
/// let grid = world.try_get_grid(FixedPoint::from_xyz(5.0, 0.5, 5.0)).unwrap();
/// assert_eq!(grid.slot(), slot);
///
/// world.reset();
/// assert!(world.is_empty());
/// ```
pub struct GridWorld {
    inner: RwLock<WorldInner>,
    observers: Mutex<Vec<(ObserverId, Arc<dyn BlockageObserver>)>>,
    next_observer: AtomicU64,
}

impl GridWorld {
    /// Creates an empty world.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(WorldInner {
                slots: Vec::new(),
                free: Vec::new(),
                macro_cells: HashMap::new(),
            }),
            observers: Mutex::new(Vec::new()),
            next_observer: AtomicU64::new(0),
        }
    }

    /// Registers a new grid built from `config` and indexes its bounds into
    /// every macro-cell they overlap.
    ///
    /// Reuses a freed slot when one is available.
    ///
    /// # Errors
    ///
    /// Returns [`GridWorldError::SlotsExhausted`] when all [`MAX_GRIDS`]
    /// slots are in use; recoverable by removing an unused grid first.
    pub fn try_add_grid(&self, config: &GridConfig) -> Result<GridSlot, GridWorldError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let slot = if let Some(slot) = inner.free.pop() {
            slot
        } else if inner.slots.len() < MAX_GRIDS {
            #[allow(clippy::cast_possible_truncation)]
            let slot = GridSlot::new(inner.slots.len() as u16);
            inner.slots.push(None);
            slot
        } else {
            return Err(GridWorldError::SlotsExhausted {
                in_use: inner.slots.iter().flatten().count(),
            });
        };

        let grid = Arc::new(Grid::build(slot, config));
        let (lo, hi) = grid.node_range();
        for cell in macro_cells_in(lo, hi) {
            inner.macro_cells.entry(cell).or_default().insert(slot);
        }
        inner.slots[usize::from(slot.index())] = Some(grid);
        Ok(slot)
    }

    /// Removes a grid, purging all of its macro-cell memberships and
    /// recycling its slot. Returns `false` if the slot holds no grid.
    pub fn remove_grid(&self, slot: GridSlot) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = inner.slots.get_mut(usize::from(slot.index())) else {
            return false;
        };
        let Some(grid) = entry.take() else {
            return false;
        };
        let (lo, hi) = grid.node_range();
        for cell in macro_cells_in(lo, hi) {
            if let Some(slots) = inner.macro_cells.get_mut(&cell) {
                slots.remove(&slot);
                if slots.is_empty() {
                    inner.macro_cells.remove(&cell);
                }
            }
        }
        inner.free.push(slot);
        true
    }

    /// Clears all grids and the spatial hash, restoring a known-empty state.
    pub fn reset(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.slots.clear();
        inner.free.clear();
        inner.macro_cells.clear();
    }

    /// Returns the grid registered at `slot`, if any.
    #[must_use]
    pub fn grid(&self, slot: GridSlot) -> Option<Arc<Grid>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .grid(slot)
            .cloned()
    }

    /// Number of registered grids.
    #[must_use]
    pub fn grid_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .iter()
            .flatten()
            .count()
    }

    /// Whether no grids are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grid_count() == 0
    }

    /// Slots of all registered grids, in ascending order.
    #[must_use]
    pub fn slots(&self) -> Vec<GridSlot> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .iter()
            .flatten()
            .map(|grid| grid.slot())
            .collect()
    }

    /// Finds the grid containing a world position.
    ///
    /// Only the macro-cell containing the position is scanned. When several
    /// overlapping grids contain the position, the one with the lowest slot
    /// index is returned, deterministically.
    #[must_use]
    pub fn try_get_grid(&self, pos: FixedPoint) -> Option<Arc<Grid>> {
        self.try_get_grid_and_node(pos).map(|(grid, _)| grid)
    }

    /// Finds the grid containing a world position along with the coordinate
    /// of its node there.
    #[must_use]
    pub fn try_get_grid_and_node(&self, pos: FixedPoint) -> Option<(Arc<Grid>, NodeCoord)> {
        let coord = quantize::node_coord_of(pos);
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        for slot in inner.candidates_in(coord, coord) {
            if let Some(grid) = inner.grid(slot) {
                if grid.contains_node_coord(coord) {
                    return Some((Arc::clone(grid), coord));
                }
            }
        }
        None
    }

    /// Every other active grid whose bounds intersect the given grid's
    /// bounds, in ascending slot order.
    ///
    /// The macro-cell hash pre-filters candidates; the exact box-vs-box
    /// overlap check is authoritative.
    #[must_use]
    pub fn find_overlapping_grids(&self, slot: GridSlot) -> Vec<Arc<Grid>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let Some(grid) = inner.grid(slot) else {
            return Vec::new();
        };
        let bounds = grid.bounds();
        let (lo, hi) = grid.node_range();
        inner
            .candidates_in(lo, hi)
            .into_iter()
            .filter(|&candidate| candidate != slot)
            .filter_map(|candidate| inner.grid(candidate))
            .filter(|other| other.bounds().overlaps(&bounds))
            .cloned()
            .collect()
    }

    /// Grids whose node ranges intersect the inclusive coordinate box, in
    /// ascending slot order. Used by the tracer for candidate discovery.
    pub(crate) fn grids_overlapping_box(&self, lo: NodeCoord, hi: NodeCoord) -> Vec<Arc<Grid>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .candidates_in(lo, hi)
            .into_iter()
            .filter_map(|slot| inner.grid(slot))
            .filter(|grid| {
                let (gmin, gmax) = grid.node_range();
                gmin.x <= hi.x
                    && gmax.x >= lo.x
                    && gmin.y <= hi.y
                    && gmax.y >= lo.y
                    && gmin.z <= hi.z
                    && gmax.z >= lo.z
            })
            .cloned()
            .collect()
    }

    /// Registers an observer for blockage change notifications.
    pub fn subscribe_blockage(&self, observer: Arc<dyn BlockageObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    /// Removes a previously registered observer. Returns `false` if the id
    /// is unknown.
    pub fn unsubscribe_blockage(&self, id: ObserverId) -> bool {
        let mut observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    /// Delivers a blockage event to every subscriber, synchronously and
    /// best-effort. A failing or panicking observer is logged and skipped;
    /// it never rolls back the state change that produced the event.
    pub(crate) fn notify_blockage(&self, event: &BlockageEvent) {
        let observers: Vec<Arc<dyn BlockageObserver>> = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in observers {
            let outcome = catch_unwind(AssertUnwindSafe(|| observer.on_blockage_changed(event)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(%err, ?event, "blockage observer reported an error");
                }
                Err(_) => {
                    error!(?event, "blockage observer panicked");
                }
            }
        }
    }
}

impl Default for GridWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GridWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridWorld")
            .field("grid_count", &self.grid_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    fn add(world: &GridWorld, min: [f64; 3], max: [f64; 3]) -> GridSlot {
        world
            .try_add_grid(&GridConfig::from_world(
                Point3::new(min[0], min[1], min[2]),
                Point3::new(max[0], max[1], max[2]),
                4,
            ))
            .unwrap()
    }

    #[test]
    fn test_macro_cell_of_negative_coords() {
        let cell = MacroCellCoord::containing(NodeCoord::new(-1, 0, -65));
        assert_eq!((cell.x, cell.y, cell.z), (-1, 0, -2));
    }

    #[test]
    fn test_add_and_lookup() {
        let world = GridWorld::new();
        let slot = add(&world, [0.0, 0.0, 0.0], [10.0, 1.0, 10.0]);
        assert_eq!(world.grid_count(), 1);

        let (grid, coord) = world
            .try_get_grid_and_node(FixedPoint::from_xyz(5.5, 0.5, 5.5))
            .unwrap();
        assert_eq!(grid.slot(), slot);
        assert_eq!(coord, NodeCoord::new(5, 0, 5));

        assert!(world
            .try_get_grid(FixedPoint::from_xyz(50.0, 0.0, 50.0))
            .is_none());
    }

    #[test]
    fn test_slot_reuse_after_removal() {
        let world = GridWorld::new();
        let a = add(&world, [0.0, 0.0, 0.0], [4.0, 1.0, 4.0]);
        let b = add(&world, [20.0, 0.0, 20.0], [24.0, 1.0, 24.0]);
        assert_ne!(a, b);

        assert!(world.remove_grid(a));
        assert!(!world.remove_grid(a));

        let c = add(&world, [40.0, 0.0, 40.0], [44.0, 1.0, 44.0]);
        assert_eq!(c, a);
    }

    #[test]
    fn test_slot_exhaustion_and_recovery() {
        let world = GridWorld::new();
        let config = GridConfig::from_world(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 1.0),
            1,
        );
        for _ in 0..MAX_GRIDS {
            world.try_add_grid(&config).unwrap();
        }
        assert_eq!(world.grid_count(), MAX_GRIDS);

        let err = world.try_add_grid(&config).unwrap_err();
        assert!(matches!(
            err,
            GridWorldError::SlotsExhausted { in_use } if in_use == MAX_GRIDS
        ));

        // Exhaustion is recoverable: freeing any slot lets the next add
        // succeed, reusing exactly that slot.
        let freed = GridSlot::new(17);
        assert!(world.remove_grid(freed));
        assert_eq!(world.try_add_grid(&config).unwrap(), freed);
    }

    #[test]
    fn test_removal_purges_spatial_hash() {
        let world = GridWorld::new();
        let slot = add(&world, [0.0, 0.0, 0.0], [10.0, 1.0, 10.0]);
        assert!(world.remove_grid(slot));
        assert!(world
            .try_get_grid(FixedPoint::from_xyz(5.0, 0.5, 5.0))
            .is_none());
        let inner = world.inner.read().unwrap();
        assert!(inner.macro_cells.is_empty());
    }

    #[test]
    fn test_overlapping_grids_exact_filter() {
        let world = GridWorld::new();
        let a = add(&world, [0.0, 0.0, 0.0], [10.0, 1.0, 10.0]);
        // Overlaps a.
        let b = add(&world, [5.0, 0.0, 5.0], [15.0, 1.0, 15.0]);
        // Same macro-cell as a, but no bounds overlap.
        let c = add(&world, [20.0, 0.0, 20.0], [30.0, 1.0, 30.0]);

        let overlapping = world.find_overlapping_grids(a);
        let slots: Vec<_> = overlapping.iter().map(|grid| grid.slot()).collect();
        assert_eq!(slots, vec![b]);
        assert!(!slots.contains(&c));
    }

    #[test]
    fn test_adjacent_grids_share_boundary() {
        // Touching faces count as overlap (inclusive bounds).
        let world = GridWorld::new();
        let a = add(&world, [0.0, 0.0, 0.0], [10.0, 1.0, 10.0]);
        let _b = add(&world, [10.0, 0.0, 0.0], [20.0, 1.0, 10.0]);
        assert_eq!(world.find_overlapping_grids(a).len(), 1);
    }

    #[test]
    fn test_lowest_slot_wins_for_overlapping_point() {
        let world = GridWorld::new();
        let a = add(&world, [0.0, 0.0, 0.0], [10.0, 1.0, 10.0]);
        let _b = add(&world, [0.0, 0.0, 0.0], [10.0, 1.0, 10.0]);
        let grid = world.try_get_grid(FixedPoint::from_xyz(5.0, 0.5, 5.0)).unwrap();
        assert_eq!(grid.slot(), a);
    }

    #[test]
    fn test_reset() {
        let world = GridWorld::new();
        add(&world, [0.0, 0.0, 0.0], [4.0, 1.0, 4.0]);
        add(&world, [8.0, 0.0, 8.0], [12.0, 1.0, 12.0]);
        world.reset();
        assert!(world.is_empty());
        assert!(world
            .try_get_grid(FixedPoint::from_xyz(2.0, 0.5, 2.0))
            .is_none());
    }

    #[test]
    fn test_concurrent_queries_during_mutation() {
        let world = GridWorld::new();
        add(&world, [0.0, 0.0, 0.0], [10.0, 1.0, 10.0]);

        std::thread::scope(|scope| {
            for i in 0..8 {
                let world = &world;
                scope.spawn(move || {
                    let base = f64::from(i) * 20.0 + 100.0;
                    let slot = add(world, [base, 0.0, 0.0], [base + 10.0, 1.0, 10.0]);
                    // Readers racing with the writes must always see a fully
                    // indexed grid or none at all.
                    let found = world.try_get_grid(FixedPoint::from_xyz(5.0, 0.5, 5.0));
                    assert!(found.is_some());
                    assert!(world.remove_grid(slot));
                });
            }
        });
        assert_eq!(world.grid_count(), 1);
    }
}
