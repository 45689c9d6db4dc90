//! Node lattice cells: coordinates, identity tokens, and per-cell state.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::blocker::BlockageToken;
use crate::fixed::FixedPoint;
use crate::quantize::{self, NODE_SIZE};

/// A discrete global node coordinate.
///
/// Node coordinates are world positions divided by the node size, rounded
/// toward negative infinity. They are global: two grids covering the same
/// world volume address the same coordinates, each with its own [`Node`].
///
/// # Example
///
/// ```
/// use worldgrid::NodeCoord;
///
/// let c = NodeCoord::new(-40, 0, -40);
/// assert_eq!(c.as_tuple(), (-40, 0, -40));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeCoord {
    /// X coordinate (width axis).
    pub x: i32,
    /// Y coordinate (depth axis).
    pub y: i32,
    /// Z coordinate (height axis).
    pub z: i32,
}

impl NodeCoord {
    /// Creates a new node coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The coordinate at the origin.
    #[must_use]
    pub const fn origin() -> Self {
        Self::new(0, 0, 0)
    }

    /// Returns the coordinate as a tuple.
    #[must_use]
    pub const fn as_tuple(self) -> (i32, i32, i32) {
        (self.x, self.y, self.z)
    }

    /// Returns the coordinate as an array.
    #[must_use]
    pub const fn as_array(self) -> [i32; 3] {
        [self.x, self.y, self.z]
    }

    /// World-space minimum corner of this node's cell.
    #[must_use]
    pub fn to_world_min(self) -> FixedPoint {
        FixedPoint::new(
            NODE_SIZE * i64::from(self.x),
            NODE_SIZE * i64::from(self.y),
            NODE_SIZE * i64::from(self.z),
        )
    }

    /// The identity token for this coordinate.
    #[must_use]
    pub const fn token(self) -> NodeToken {
        NodeToken(quantize::spawn_hash(self.x, self.y, self.z))
    }

    /// Chebyshev distance to another coordinate (maximum axis difference).
    #[must_use]
    pub fn chebyshev_distance(self, other: Self) -> u32 {
        let dx = self.x.abs_diff(other.x);
        let dy = self.y.abs_diff(other.y);
        let dz = self.z.abs_diff(other.z);
        dx.max(dy).max(dz)
    }
}

impl From<(i32, i32, i32)> for NodeCoord {
    fn from((x, y, z): (i32, i32, i32)) -> Self {
        Self::new(x, y, z)
    }
}

impl From<[i32; 3]> for NodeCoord {
    fn from([x, y, z]: [i32; 3]) -> Self {
        Self::new(x, y, z)
    }
}

impl std::ops::Add for NodeCoord {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(
            self.x.wrapping_add(other.x),
            self.y.wrapping_add(other.y),
            self.z.wrapping_add(other.z),
        )
    }
}

impl std::ops::Sub for NodeCoord {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::new(
            self.x.wrapping_sub(other.x),
            self.y.wrapping_sub(other.y),
            self.z.wrapping_sub(other.z),
        )
    }
}

/// Deterministic identity token of a node, derived from its global
/// coordinate via [`spawn_hash`](crate::quantize::spawn_hash).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeToken(pub u64);

/// Opaque identity of an entity occupying a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OccupantId(pub u64);

/// Key of a partition-metadata slot. At most one payload per kind is stored
/// on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PartitionKind(pub u16);

/// Opaque partition payload. The index stores and returns these without ever
/// inspecting their contents.
pub type PartitionData = Box<dyn Any + Send + Sync>;

/// A single lattice cell of a grid.
///
/// A node carries three pieces of state:
///
/// - an **obstruction multiset**: one entry per currently-applied blocker
///   contribution, keyed by blockage token, mirrored into an atomic counter
///   for lock-free blocked checks;
/// - an **occupant set** of entities currently located here;
/// - a **partition table** mapping partition kind to an opaque payload.
///
/// All mutation goes through `&self`: nodes are shared across the threads
/// applying blockers concurrently, and the internal locking guarantees no
/// update is ever lost.
pub struct Node {
    coord: NodeCoord,
    token: NodeToken,
    /// Blockage token -> number of stacked contributions with that token.
    blockers: Mutex<HashMap<BlockageToken, u32>>,
    /// Mirror of the total multiset size, for lock-free reads.
    obstruction: AtomicU32,
    occupants: Mutex<HashSet<OccupantId>>,
    partitions: Mutex<HashMap<PartitionKind, PartitionData>>,
}

impl Node {
    pub(crate) fn new(coord: NodeCoord) -> Self {
        Self {
            coord,
            token: coord.token(),
            blockers: Mutex::new(HashMap::new()),
            obstruction: AtomicU32::new(0),
            occupants: Mutex::new(HashSet::new()),
            partitions: Mutex::new(HashMap::new()),
        }
    }

    /// Global coordinate of this node.
    #[must_use]
    pub const fn coord(&self) -> NodeCoord {
        self.coord
    }

    /// Identity token of this node.
    #[must_use]
    pub const fn token(&self) -> NodeToken {
        self.token
    }

    /// Number of currently-stacked obstruction contributions.
    #[must_use]
    pub fn obstruction_count(&self) -> u32 {
        self.obstruction.load(Ordering::Acquire)
    }

    /// Whether at least one blocker currently covers this node.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.obstruction_count() > 0
    }

    /// Stacks one obstruction contribution for `token`. Returns the new
    /// obstruction count.
    pub(crate) fn stack_obstruction(&self, token: BlockageToken) -> u32 {
        let mut blockers = self
            .blockers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *blockers.entry(token).or_insert(0) += 1;
        self.obstruction.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Releases one obstruction contribution for `token`. Removing a token
    /// that was never stacked is a no-op and returns `false`; the counter
    /// never goes negative.
    pub(crate) fn release_obstruction(&self, token: BlockageToken) -> bool {
        let mut blockers = self
            .blockers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match blockers.get_mut(&token) {
            Some(count) if *count > 1 => {
                *count -= 1;
            }
            Some(_) => {
                blockers.remove(&token);
            }
            None => return false,
        }
        self.obstruction.fetch_sub(1, Ordering::AcqRel);
        true
    }

    /// Adds an occupant. Returns `false` if it was already present.
    pub fn add_occupant(&self, id: OccupantId) -> bool {
        self.occupants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id)
    }

    /// Removes an occupant. Returns `false` if it was not present.
    pub fn remove_occupant(&self, id: OccupantId) -> bool {
        self.occupants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Whether the given occupant is located here.
    #[must_use]
    pub fn has_occupant(&self, id: OccupantId) -> bool {
        self.occupants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    /// Number of occupants located here.
    #[must_use]
    pub fn occupant_count(&self) -> usize {
        self.occupants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Snapshot of the occupants, in ascending id order.
    #[must_use]
    pub fn occupants(&self) -> Vec<OccupantId> {
        let mut ids: Vec<_> = self
            .occupants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Stores a partition payload, replacing and returning any previous
    /// payload of the same kind.
    pub fn set_partition(&self, kind: PartitionKind, data: PartitionData) -> Option<PartitionData> {
        self.partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, data)
    }

    /// Removes and returns the payload of the given kind, if any.
    pub fn take_partition(&self, kind: PartitionKind) -> Option<PartitionData> {
        self.partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&kind)
    }

    /// Whether a payload of the given kind is stored here.
    #[must_use]
    pub fn has_partition(&self, kind: PartitionKind) -> bool {
        self.partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&kind)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("coord", &self.coord)
            .field("token", &self.token)
            .field("obstruction", &self.obstruction_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::blocker::BlockageToken;

    #[test]
    fn test_coord_token_matches_spawn_hash() {
        let c = NodeCoord::new(-40, 0, -40);
        assert_eq!(c.token().0, quantize::spawn_hash(-40, 0, -40));
    }

    #[test]
    fn test_world_min_corner() {
        let c = NodeCoord::new(-40, 0, 3);
        assert_eq!(c.to_world_min(), FixedPoint::from_xyz(-40.0, 0.0, 3.0));
    }

    #[test]
    fn test_obstruction_stack_and_release() {
        let node = Node::new(NodeCoord::origin());
        let a = BlockageToken(1);
        let b = BlockageToken(2);

        assert_eq!(node.stack_obstruction(a), 1);
        assert_eq!(node.stack_obstruction(b), 2);
        assert!(node.is_blocked());

        assert!(node.release_obstruction(a));
        assert_eq!(node.obstruction_count(), 1);
        assert!(node.is_blocked());

        assert!(node.release_obstruction(b));
        assert!(!node.is_blocked());
    }

    #[test]
    fn test_release_never_stacked_is_noop() {
        let node = Node::new(NodeCoord::origin());
        assert!(!node.release_obstruction(BlockageToken(7)));
        assert_eq!(node.obstruction_count(), 0);
    }

    #[test]
    fn test_same_token_stacks_as_multiset() {
        // Two blockers over identical regions derive the same token; they
        // must still count individually.
        let node = Node::new(NodeCoord::origin());
        let t = BlockageToken(9);
        node.stack_obstruction(t);
        node.stack_obstruction(t);
        assert_eq!(node.obstruction_count(), 2);

        assert!(node.release_obstruction(t));
        assert_eq!(node.obstruction_count(), 1);
        assert!(node.release_obstruction(t));
        assert!(!node.release_obstruction(t));
        assert_eq!(node.obstruction_count(), 0);
    }

    #[test]
    fn test_occupants() {
        let node = Node::new(NodeCoord::origin());
        assert!(node.add_occupant(OccupantId(5)));
        assert!(!node.add_occupant(OccupantId(5)));
        assert!(node.add_occupant(OccupantId(2)));
        assert_eq!(node.occupants(), vec![OccupantId(2), OccupantId(5)]);
        assert!(node.remove_occupant(OccupantId(5)));
        assert!(!node.remove_occupant(OccupantId(5)));
        assert_eq!(node.occupant_count(), 1);
    }

    #[test]
    fn test_partitions_opaque_round_trip() {
        let node = Node::new(NodeCoord::origin());
        let kind = PartitionKind(3);
        assert!(node.set_partition(kind, Box::new("payload")).is_none());
        assert!(node.has_partition(kind));

        let replaced = node.set_partition(kind, Box::new(42u32));
        assert!(replaced.is_some());

        let taken = node.take_partition(kind).unwrap();
        assert_eq!(taken.downcast_ref::<u32>(), Some(&42));
        assert!(!node.has_partition(kind));
    }

    #[test]
    fn test_concurrent_stacking_no_lost_updates() {
        let node = Node::new(NodeCoord::origin());
        std::thread::scope(|scope| {
            for i in 0..32 {
                let node = &node;
                scope.spawn(move || {
                    node.stack_obstruction(BlockageToken(i));
                });
            }
        });
        assert_eq!(node.obstruction_count(), 32);
    }
}
