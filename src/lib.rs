//! Deterministic multi-grid spatial index for simulation worlds.
//!
//! The world is a set of independent, bounded **grids**, each a lattice of
//! unit-sized **nodes** grouped into coarser **scan cells**. Grids register
//! with a [`GridWorld`], which maintains a macro-cell spatial hash so point
//! and box queries only touch candidate grids instead of scanning all of
//! them. On top of that sit the stateless tracer ([`trace`]) for box
//! coverage and line traversal, and [`Blocker`]s, which stamp stackable
//! obstruction onto every node their region covers.
//!
//! # Determinism
//!
//! All spatial math runs on 48.16 fixed-point integers ([`Fixed`]); floats
//! are converted exactly once at the API boundary. Identity tokens are
//! multiplicative hashes of integer coordinates, candidate grids are always
//! visited in ascending slot order, and lattice cells in ascending
//! coordinate order. The same inputs against the same world state yield
//! bit-identical results on every platform, which is what lets independent
//! simulation replicas stay in lockstep.
//!
//! # Example
//!
//! ```
//! use worldgrid::{Blocker, FixedPoint, GridConfig, GridWorld};
//! use nalgebra::Point3;
//!
//! let world = GridWorld::new();
//! world
//!     .try_add_grid(&GridConfig::from_world(
//!         Point3::new(-40.0, 0.0, -40.0),
//!         Point3::new(-30.0, 0.0, -30.0),
//!         5,
//!     ))
//!     .unwrap();
//!
//! let mut blocker = Blocker::from_box(
//!     FixedPoint::from_xyz(-40.0, 0.0, -40.0),
//!     FixedPoint::from_xyz(-39.5, 0.0, -39.5),
//! );
//! blocker.apply(&world);
//!
//! let grid = world
//!     .try_get_grid(FixedPoint::from_xyz(-39.9, 0.5, -39.9))
//!     .unwrap();
//! assert!(grid
//!     .try_get_node(FixedPoint::from_xyz(-39.9, 0.5, -39.9))
//!     .unwrap()
//!     .is_blocked());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod blocker;
pub mod error;
pub mod fixed;
pub mod grid;
pub mod node;
pub mod quantize;
pub mod registry;
pub mod scan_cell;
pub mod trace;

pub use blocker::{
    blockage_token, observer_fn, BlockageChange, BlockageEvent, BlockageObserver, BlockageToken,
    Blocker, BlockerRegion, BoxRegion,
};
pub use error::GridWorldError;
pub use fixed::{Fixed, FixedPoint};
pub use grid::{Grid, GridConfig, WorldBounds, DEFAULT_SCAN_CELL_SIZE};
pub use node::{Node, NodeCoord, NodeToken, OccupantId, PartitionData, PartitionKind};
pub use quantize::NODE_SIZE;
pub use registry::{GridSlot, GridWorld, ObserverId, MACRO_CELL_NODES, MAX_GRIDS};
pub use scan_cell::{ScanCell, ScanCellCoord, ScanToken};
pub use trace::{GridCoverage, ScanCellHit};
