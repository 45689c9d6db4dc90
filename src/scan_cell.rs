//! Scan cells: coarse buckets grouping blocks of nodes for batch scans.

use crate::node::NodeCoord;
use crate::quantize;

/// Mixed into scan tokens so a scan cell can never share a token with a node
/// at the same integer coordinates.
const SCAN_TOKEN_SALT: u64 = 0x517C_C1B7_2722_0A95;

/// A discrete scan-cell coordinate: node coordinates divided by the owning
/// grid's scan-cell size, rounded toward negative infinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanCellCoord {
    /// X coordinate.
    pub x: i32,
    /// Y coordinate.
    pub y: i32,
    /// Z coordinate.
    pub z: i32,
}

impl ScanCellCoord {
    /// Creates a new scan-cell coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The scan cell containing the given node, for a scan-cell edge length
    /// of `cell_size` nodes.
    ///
    /// # Example
    ///
    /// ```
    /// use worldgrid::{NodeCoord, ScanCellCoord};
    ///
    /// let c = ScanCellCoord::containing(NodeCoord::new(-1, 0, 17), 8);
    /// assert_eq!(c, ScanCellCoord::new(-1, 0, 2));
    /// ```
    #[must_use]
    pub const fn containing(node: NodeCoord, cell_size: u32) -> Self {
        let size = cell_size as i32;
        Self::new(
            node.x.div_euclid(size),
            node.y.div_euclid(size),
            node.z.div_euclid(size),
        )
    }

    /// Identity token of this scan cell for a given cell size.
    ///
    /// The size participates in the hash: cells of different granularities
    /// are distinct identities even at equal coordinates.
    #[must_use]
    pub const fn token(self, cell_size: u32) -> ScanToken {
        let base = quantize::spawn_hash(self.x, self.y, self.z);
        ScanToken(base ^ (cell_size as u64).wrapping_mul(SCAN_TOKEN_SALT))
    }
}

impl From<(i32, i32, i32)> for ScanCellCoord {
    fn from((x, y, z): (i32, i32, i32)) -> Self {
        Self::new(x, y, z)
    }
}

/// Deterministic identity token of a scan cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanToken(pub u64);

/// A coarse bucket of nodes inside one grid.
///
/// Scan cells exist purely to let batch spatial scans skip whole blocks of
/// irrelevant nodes cheaply; they hold no obstruction state of their own.
#[derive(Debug, Clone)]
pub struct ScanCell {
    coord: ScanCellCoord,
    token: ScanToken,
    cell_size: u32,
    nodes: Vec<NodeCoord>,
}

impl ScanCell {
    pub(crate) fn new(coord: ScanCellCoord, cell_size: u32) -> Self {
        Self {
            coord,
            token: coord.token(cell_size),
            cell_size,
            nodes: Vec::new(),
        }
    }

    pub(crate) fn push_node(&mut self, node: NodeCoord) {
        self.nodes.push(node);
    }

    pub(crate) fn sort_nodes(&mut self) {
        self.nodes.sort_unstable();
    }

    /// Scan-cell coordinate.
    #[must_use]
    pub const fn coord(&self) -> ScanCellCoord {
        self.coord
    }

    /// Identity token.
    #[must_use]
    pub const fn token(&self) -> ScanToken {
        self.token
    }

    /// Edge length of this cell, in nodes.
    #[must_use]
    pub const fn cell_size(&self) -> u32 {
        self.cell_size
    }

    /// Coordinates of the member nodes, in ascending order.
    #[must_use]
    pub fn node_coords(&self) -> &[NodeCoord] {
        &self.nodes
    }

    /// Number of member nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether this cell has no member nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_containing_negative_coords() {
        assert_eq!(
            ScanCellCoord::containing(NodeCoord::new(-1, -8, -9), 8),
            ScanCellCoord::new(-1, -1, -2)
        );
        assert_eq!(
            ScanCellCoord::containing(NodeCoord::new(0, 7, 8), 8),
            ScanCellCoord::new(0, 0, 1)
        );
    }

    #[test]
    fn test_token_differs_from_node_token() {
        let node = NodeCoord::new(3, 4, 5);
        let scan = ScanCellCoord::new(3, 4, 5);
        assert_ne!(scan.token(8).0, node.token().0);
    }

    #[test]
    fn test_token_distinguishes_cell_size() {
        let c = ScanCellCoord::new(1, 2, 3);
        assert_ne!(c.token(4), c.token(8));
    }

    #[test]
    fn test_scan_cell_membership() {
        let mut cell = ScanCell::new(ScanCellCoord::new(0, 0, 0), 2);
        cell.push_node(NodeCoord::new(1, 1, 1));
        cell.push_node(NodeCoord::new(0, 0, 0));
        cell.sort_nodes();
        assert_eq!(cell.len(), 2);
        assert_eq!(cell.node_coords()[0], NodeCoord::new(0, 0, 0));
    }
}
