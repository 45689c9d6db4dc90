//! Error types for world-grid operations.

/// Errors that can occur while mutating a grid world.
///
/// Lookup misses are reported as `Option`/`bool` results rather than errors,
/// and correctable input (swapped bounds, non-positive scan-cell sizes) is
/// fixed up with a logged warning. The only failure surfaced as an error
/// value is resource exhaustion, which the caller can recover from by
/// removing an unused grid.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GridWorldError {
    /// All grid slots are in use. The slot index is 16-bit, so at most
    /// 65535 grids can be registered at once.
    #[error("grid slot space exhausted ({in_use} grids registered)")]
    SlotsExhausted {
        /// Number of grids currently registered.
        in_use: usize,
    },
}
