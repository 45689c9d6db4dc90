//! Coordinate quantization and deterministic hashing.
//!
//! Every world position entering the index is snapped to the node lattice
//! here, and every lattice coordinate is condensed into a single hash token
//! by [`spawn_hash`]. Both operations are pure integer arithmetic, so any two
//! machines agree bit-for-bit.

use tracing::warn;

use crate::fixed::{Fixed, FixedPoint};
use crate::node::NodeCoord;

/// Edge length of a node in world units. Process-wide constant.
pub const NODE_SIZE: Fixed = Fixed::ONE;

/// Rounds each axis of a world point down to the nearest node boundary.
///
/// # Example
///
/// ```
/// use worldgrid::{quantize, FixedPoint};
///
/// let p = FixedPoint::from_xyz(1.25, -0.5, 3.0);
/// let snapped = quantize::floor_to_node_size(p);
/// assert_eq!(snapped, FixedPoint::from_xyz(1.0, -1.0, 3.0));
/// ```
#[must_use]
pub fn floor_to_node_size(p: FixedPoint) -> FixedPoint {
    FixedPoint::new(
        p.x.floor_to(NODE_SIZE),
        p.y.floor_to(NODE_SIZE),
        p.z.floor_to(NODE_SIZE),
    )
}

/// Rounds each axis of a world point up to the nearest node boundary.
///
/// # Example
///
/// ```
/// use worldgrid::{quantize, FixedPoint};
///
/// let p = FixedPoint::from_xyz(1.25, -0.5, 3.0);
/// let snapped = quantize::ceil_to_node_size(p);
/// assert_eq!(snapped, FixedPoint::from_xyz(2.0, 0.0, 3.0));
/// ```
#[must_use]
pub fn ceil_to_node_size(p: FixedPoint) -> FixedPoint {
    FixedPoint::new(
        p.x.ceil_to(NODE_SIZE),
        p.y.ceil_to(NODE_SIZE),
        p.z.ceil_to(NODE_SIZE),
    )
}

/// Snaps a min/max pair to a valid, non-degenerate, lattice-aligned box.
///
/// Axes where `min > max` are swapped, the result is floored/ceiled to the
/// lattice, and any axis that collapses to zero width is widened by one node.
/// This never fails; corrections are logged as warnings instead.
///
/// # Example
///
/// ```
/// use worldgrid::{quantize, FixedPoint};
///
/// // Swapped input is corrected, not rejected.
/// let (min, max) = quantize::snap_bounds_to_node_size(
///     FixedPoint::from_xyz(10.0, 0.0, 0.0),
///     FixedPoint::from_xyz(0.5, 0.0, 4.0),
/// );
/// assert_eq!(min, FixedPoint::from_xyz(0.0, 0.0, 0.0));
/// assert_eq!(max, FixedPoint::from_xyz(10.0, 1.0, 4.0));
/// ```
#[must_use]
pub fn snap_bounds_to_node_size(min: FixedPoint, max: FixedPoint) -> (FixedPoint, FixedPoint) {
    if min.x > max.x || min.y > max.y || min.z > max.z {
        warn!(
            min = ?min.to_point(),
            max = ?max.to_point(),
            "bounds min/max swapped on at least one axis; reordering"
        );
    }
    let lo = min.component_min(max);
    let hi = min.component_max(max);

    let lo = floor_to_node_size(lo);
    let mut hi = ceil_to_node_size(hi);

    // A zero-width axis would produce a grid with no nodes on it.
    if hi.x == lo.x {
        hi.x = hi.x + NODE_SIZE;
    }
    if hi.y == lo.y {
        hi.y = hi.y + NODE_SIZE;
    }
    if hi.z == lo.z {
        hi.z = hi.z + NODE_SIZE;
    }

    (lo, hi)
}

/// Returns the global node coordinate of the lattice cell containing `p`.
///
/// A node with coordinate `c` covers the half-open world interval
/// `[c * NODE_SIZE, (c + 1) * NODE_SIZE)` on each axis.
///
/// # Example
///
/// ```
/// use worldgrid::{quantize, FixedPoint, NodeCoord};
///
/// let c = quantize::node_coord_of(FixedPoint::from_xyz(-39.5, 0.0, 2.9));
/// assert_eq!(c, NodeCoord::new(-40, 0, 2));
/// ```
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn node_coord_of(p: FixedPoint) -> NodeCoord {
    let x = p.x.div_floor_by(NODE_SIZE);
    let y = p.y.div_floor_by(NODE_SIZE);
    let z = p.z.div_floor_by(NODE_SIZE);
    // Node coordinates are 32-bit; positions beyond that lattice range are
    // malformed input, not something to wrap silently.
    debug_assert!(
        i32::try_from(x).is_ok() && i32::try_from(y).is_ok() && i32::try_from(z).is_ok(),
        "world position ({x}, {y}, {z}) outside the 32-bit lattice range"
    );
    NodeCoord::new(x as i32, y as i32, z as i32)
}

/// Combines a signed integer triple into one deterministic 64-bit token.
///
/// Each axis is spread by a distinct odd multiplier and the combined value is
/// run through a SplitMix-style finalizer, giving a well-distributed hash that
/// is identical on every platform. Collisions are treated as non-fatal and
/// are astronomically rare for realistic coordinate ranges (tens of thousands
/// of nodes per axis).
///
/// The output is an identity token, not an order-preserving key: use it for
/// map lookups and dedup sets only.
///
/// # Example
///
/// ```
/// use worldgrid::quantize::spawn_hash;
///
/// assert_eq!(spawn_hash(1, 2, 3), spawn_hash(1, 2, 3));
/// assert_ne!(spawn_hash(1, 2, 3), spawn_hash(3, 2, 1));
/// ```
#[must_use]
pub const fn spawn_hash(x: i32, y: i32, z: i32) -> u64 {
    let h = (x as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (y as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
        ^ (z as u64).wrapping_mul(0x1656_67B1_9E37_79F9);
    let h = (h ^ (h >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    let h = (h ^ (h >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    h ^ (h >> 31)
}
