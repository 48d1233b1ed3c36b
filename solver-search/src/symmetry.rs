//! Symmetry stabilizer contract.

use std::sync::Arc;

use crate::domain::LocalDomain;

/// Stabilizer orbits of the symmetry group under the branchings of a path.
///
/// Immutable after computation; a subtree shares one instance by reference
/// count and a frame only ever replaces its handle, never the contents.
pub trait StabilizerOrbits: Send + Sync {
    /// Columns covered by the stabilizer orbits.
    fn orbit_cols(&self) -> &[usize];

    /// Whether `col` is stabilized by the branchings this stabilizer was
    /// computed for.
    fn is_stabilized(&self, col: usize) -> bool;

    /// Fix variables implied by the orbits in `domain`. Returns the number
    /// of bounds changed.
    fn orbital_fixing(&self, domain: &mut dyn LocalDomain) -> usize;
}

/// Reference-counted handle to a stabilizer.
pub type SharedOrbits = Arc<dyn StabilizerOrbits>;
