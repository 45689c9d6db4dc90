//! Blockers: stackable obstruction sources over world-space regions.
//!
//! A [`Blocker`] stamps one obstruction contribution onto every node covered
//! by its region, across every grid the region touches. Contributions stack:
//! a node's obstruction count equals the number of currently-applied
//! blockers covering it, so removing one blocker leaves the node blocked
//! while others remain.

use std::fmt;
use std::sync::Arc;

use crate::fixed::{Fixed, FixedPoint};
use crate::node::NodeCoord;
use crate::quantize;
use crate::registry::GridWorld;
use crate::trace::{self, GridCoverage};

/// Salt mixed into blockage tokens so a blocker over some region can never
/// collide with the node identity hash of the same coordinates.
const BLOCKAGE_TOKEN_SALT: u64 = 0xA076_1D64_78BD_642F;

/// Deterministic identity of one obstruction source, derived from its
/// region's quantized bounds.
///
/// Two blockers over identical regions share a token; the per-node
/// obstruction multiset still counts their contributions individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockageToken(pub u64);

/// Derives the blockage token for a region spanning the given quantized
/// node-coordinate corners.
#[must_use]
pub fn blockage_token(min: NodeCoord, max: NodeCoord) -> BlockageToken {
    let a = quantize::spawn_hash(min.x, min.y, min.z);
    let b = quantize::spawn_hash(max.x, max.y, max.z);
    BlockageToken(a.rotate_left(17) ^ b ^ BLOCKAGE_TOKEN_SALT)
}

/// A region shape a blocker can cover.
///
/// The only capability the index needs from a shape is resolving it to a
/// world-space min/max bound; new shapes plug in by implementing this trait.
pub trait BlockerRegion: fmt::Debug + Send + Sync {
    /// World-space corners of the region. Callers order the corners, so
    /// implementations may return them in any order.
    fn resolve_bounds(&self) -> (FixedPoint, FixedPoint);
}

/// An axis-aligned box region.
///
/// # Example
///
/// ```
/// use worldgrid::{BlockerRegion, BoxRegion, FixedPoint};
///
/// let region = BoxRegion::new(
///     FixedPoint::from_xyz(2.0, 0.0, 2.0),
///     FixedPoint::from_xyz(0.0, 1.0, 0.0),
/// );
/// let (min, _max) = region.resolve_bounds();
/// assert_eq!(min, FixedPoint::from_xyz(0.0, 0.0, 0.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoxRegion {
    min: FixedPoint,
    max: FixedPoint,
}

impl BoxRegion {
    /// Creates a box region, auto-ordering the corners.
    #[must_use]
    pub fn new(a: FixedPoint, b: FixedPoint) -> Self {
        Self {
            min: a.component_min(b),
            max: a.component_max(b),
        }
    }
}

impl BlockerRegion for BoxRegion {
    fn resolve_bounds(&self) -> (FixedPoint, FixedPoint) {
        (self.min, self.max)
    }
}

/// Kind of blockage change carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockageChange {
    /// A blocker was applied over the region.
    Added,
    /// A blocker was removed from the region.
    Removed,
}

/// Notification payload delivered to blockage observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockageEvent {
    /// Whether the region was blocked or released.
    pub change: BlockageChange,
    /// Quantized minimum corner of the affected region.
    pub min: FixedPoint,
    /// Quantized maximum corner of the affected region.
    pub max: FixedPoint,
}

/// Subscriber to blockage change notifications.
///
/// Delivery is synchronous and best-effort: a returned error (or a panic)
/// is logged at the notification boundary and neither propagates to the
/// caller nor rolls back the blockage change.
pub trait BlockageObserver: Send + Sync {
    /// Called after a blocker applies or removes its obstruction.
    ///
    /// # Errors
    ///
    /// Implementations may fail; failures are logged and swallowed.
    fn on_blockage_changed(
        &self,
        event: &BlockageEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

enum BlockerState {
    Inactive,
    Blocking {
        token: BlockageToken,
        cached: Option<Vec<GridCoverage>>,
    },
}

/// One obstruction source: a region, an activation flag, and the machinery
/// to stamp the region's coverage onto the world.
///
/// `apply` and `remove_blockage` only transition state when it actually
/// changes; re-applying while blocking (or removing while inactive) is a
/// no-op, which makes blocker teardown idempotent.
///
/// # Coverage caching
///
/// With [`cache_coverage`](Self::with_cached_coverage) enabled, the node set
/// resolved at apply time is retained and re-used at removal time. A cached
/// blocker therefore releases exactly the nodes it originally touched even
/// if grids were added or removed in between; an uncached blocker re-resolves
/// coverage at removal and may touch a different node set if the world
/// changed.
///
/// # Example
///
/// ```
/// use worldgrid::{Blocker, BoxRegion, FixedPoint, GridConfig, GridWorld};
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
/// let mut blocker = Blocker::from_box(
///     FixedPoint::from_xyz(2.0, 0.0, 2.0),
///     FixedPoint::from_xyz(3.0, 1.0, 3.0),
/// );
/// assert!(blocker.apply(&world));
/// assert!(!blocker.apply(&world)); // already blocking
///
/// let grid = world.try_get_grid(FixedPoint::from_xyz(2.5, 0.5, 2.5)).unwrap();
/// assert!(grid.try_get_node(FixedPoint::from_xyz(2.5, 0.5, 2.5)).unwrap().is_blocked());
///
/// assert!(blocker.remove_blockage(&world));
/// assert!(!grid.try_get_node(FixedPoint::from_xyz(2.5, 0.5, 2.5)).unwrap().is_blocked());
/// ```
pub struct Blocker {
    region: Box<dyn BlockerRegion>,
    enabled: bool,
    cache_coverage: bool,
    state: BlockerState,
}

impl Blocker {
    /// Creates an enabled, non-caching blocker over the given region.
    #[must_use]
    pub fn new<R: BlockerRegion + 'static>(region: R) -> Self {
        Self {
            region: Box::new(region),
            enabled: true,
            cache_coverage: false,
            state: BlockerState::Inactive,
        }
    }

    /// Creates a blocker over an axis-aligned box.
    #[must_use]
    pub fn from_box(a: FixedPoint, b: FixedPoint) -> Self {
        Self::new(BoxRegion::new(a, b))
    }

    /// Enables coverage caching (see the type-level docs for the
    /// correctness/performance trade-off).
    #[must_use]
    pub fn with_cached_coverage(mut self, cache: bool) -> Self {
        self.cache_coverage = cache;
        self
    }

    /// Sets the activation flag. A disabled blocker ignores `apply`; an
    /// already-applied blocker keeps blocking until removed.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether the activation flag is set.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Whether this blocker is currently contributing obstruction.
    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        matches!(self.state, BlockerState::Blocking { .. })
    }

    /// The token derived at apply time, while blocking.
    #[must_use]
    pub fn token(&self) -> Option<BlockageToken> {
        match &self.state {
            BlockerState::Blocking { token, .. } => Some(*token),
            BlockerState::Inactive => None,
        }
    }

    /// Quantized world-space bounds of the region.
    fn quantized_bounds(&self) -> (FixedPoint, FixedPoint) {
        let (a, b) = self.region.resolve_bounds();
        let min = a.component_min(b);
        let max = a.component_max(b);
        (
            quantize::floor_to_node_size(min),
            quantize::ceil_to_node_size(max),
        )
    }

    /// Applies this blocker's obstruction to every covered node of every
    /// covered grid.
    ///
    /// No-op returning `false` when the activation flag is off or the
    /// blocker is already blocking. Observers are notified after the state
    /// change; their failures are logged, never propagated.
    pub fn apply(&mut self, world: &GridWorld) -> bool {
        if !self.enabled || self.is_blocking() {
            return false;
        }

        let (qmin, qmax) = self.quantized_bounds();
        let token = blockage_token(
            quantize::node_coord_of(qmin),
            quantize::node_coord_of(qmax),
        );

        let coverage = trace::covered_nodes(world, qmin, qmax, Fixed::ZERO);
        for group in &coverage {
            for &coord in &group.nodes {
                group.grid.try_add_obstacle(coord, token);
            }
        }

        let cached = if self.cache_coverage {
            Some(coverage)
        } else {
            None
        };
        self.state = BlockerState::Blocking { token, cached };

        world.notify_blockage(&BlockageEvent {
            change: BlockageChange::Added,
            min: qmin,
            max: qmax,
        });
        true
    }

    /// Removes this blocker's obstruction contribution.
    ///
    /// No-op returning `false` when not blocking. Uses the cached coverage
    /// when caching was requested, otherwise re-resolves the region against
    /// the current world state.
    pub fn remove_blockage(&mut self, world: &GridWorld) -> bool {
        let state = std::mem::replace(&mut self.state, BlockerState::Inactive);
        let BlockerState::Blocking { token, cached } = state else {
            return false;
        };

        let (qmin, qmax) = self.quantized_bounds();
        let coverage =
            cached.unwrap_or_else(|| trace::covered_nodes(world, qmin, qmax, Fixed::ZERO));
        for group in &coverage {
            for &coord in &group.nodes {
                group.grid.try_remove_obstacle(coord, token);
            }
        }

        world.notify_blockage(&BlockageEvent {
            change: BlockageChange::Removed,
            min: qmin,
            max: qmax,
        });
        true
    }
}

impl fmt::Debug for Blocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blocker")
            .field("region", &self.region)
            .field("enabled", &self.enabled)
            .field("cache_coverage", &self.cache_coverage)
            .field("blocking", &self.is_blocking())
            .finish()
    }
}

struct FnObserver<F>(F);

impl<F> BlockageObserver for FnObserver<F>
where
    F: Fn(&BlockageEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync,
{
    fn on_blockage_changed(
        &self,
        event: &BlockageEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (self.0)(event)
    }
}

/// Wraps a closure as a subscribable observer.
#[must_use]
pub fn observer_fn<F>(f: F) -> Arc<dyn BlockageObserver>
where
    F: Fn(&BlockageEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnObserver(f))
}
