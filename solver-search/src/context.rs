//! Shared MIP state contract and the per-call collaborator bundle.

use crate::domain::{ConflictPool, LocalDomain};
use crate::error::SearchResult;
use crate::pseudocost::PseudocostStore;
use crate::queue::NodeQueue;
use crate::relaxation::LpRelaxation;
use crate::symmetry::SharedOrbits;

/// Where an incumbent was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncumbentSource {
    /// Found by a primal heuristic dive.
    Heuristic,
    /// Found while strong branching.
    Branching,
    /// Found by a regular tree node.
    Tree,
}

/// Local search counters, also the unit flushed into the MIP-wide totals.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SearchStats {
    /// Nodes evaluated.
    pub nodes: i64,
    /// Pruned tree weight, `sum 2^-depth` over pruned subtrees.
    pub tree_weight: f64,
    /// LP iterations spent on node evaluation.
    pub lp_iterations: i64,
    /// LP iterations spent inside heuristic dives.
    pub heuristic_lp_iterations: i64,
    /// LP iterations spent on strong-branching probes.
    pub sb_lp_iterations: i64,
}

/// Generator turning dual proofs into pool cuts.
pub trait CutGenerator {
    /// Derive a conflict cut from the proof row `inds`/`vals`/`rhs` under
    /// the local domain and offer it to the cut pool. The proof buffers may
    /// be strengthened in place.
    fn generate_conflict(
        &self,
        domain: &mut dyn LocalDomain,
        inds: &mut Vec<usize>,
        vals: &mut Vec<f64>,
        rhs: &mut f64,
    ) -> SearchResult<()>;
}

/// Contract to the enclosing MIP solver's shared state.
///
/// Everything here is reachable from several drivers at once, so methods
/// take `&self` and implementations synchronise internally. The driver calls
/// in at well-defined points and assumes each operation is atomic with
/// respect to the others.
pub trait MipContext {
    /// Number of columns in the model.
    fn num_cols(&self) -> usize;

    /// Objective coefficient of a column.
    fn col_cost(&self, col: usize) -> f64;

    /// Whether a column is integer-constrained.
    fn is_integer(&self, col: usize) -> bool;

    /// Integer feasibility tolerance.
    fn feastol(&self) -> f64;

    /// General zero tolerance.
    fn epsilon(&self) -> f64;

    /// Objective of the best known integer-feasible solution, adjusted for
    /// cutoff use; `f64::INFINITY` while none exists.
    fn upper_limit(&self) -> f64;

    /// Whether the shared global domain has been proven infeasible.
    fn global_infeasible(&self) -> bool;

    /// Offer a new integer-feasible solution to the incumbent store.
    fn add_incumbent(&self, solution: &[f64], objective: f64, source: IncumbentSource);

    /// MIP-wide limit check (time, nodes, interrupts). `true` means stop.
    fn check_limits(&self) -> bool;

    /// The shared conflict pool.
    fn conflict_pool(&self) -> &dyn ConflictPool;

    /// The shared cut generator.
    fn cut_generator(&self) -> &dyn CutGenerator;

    /// The shared queue of open nodes.
    fn node_queue(&self) -> &dyn NodeQueue;

    /// Whether symmetry information was detected for the model.
    fn has_symmetries(&self) -> bool;

    /// Compute stabilizer orbits for the branchings in `domain`. `None`
    /// when no symmetry data is available.
    fn compute_stabilizer_orbits(&self, domain: &dyn LocalDomain) -> Option<SharedOrbits>;

    /// Orbits of the full symmetry group, valid at the root.
    fn global_orbits(&self) -> Option<SharedOrbits>;

    /// Whether `col` participates in any detected symmetry.
    fn is_symmetry_tracked(&self, col: usize) -> bool;

    /// LP solution of the root relaxation; empty if not solved yet.
    fn root_lp_solution(&self) -> &[f64];

    /// Snapshot of the MIP-wide counters.
    fn statistics(&self) -> SearchStats;

    /// Atomically add a driver's local counters into the MIP-wide totals.
    fn flush_statistics(&self, delta: &SearchStats);

    /// Build a fresh LP over all model rows with the current local bounds,
    /// for the last-resort ladder. The primary LP is left untouched.
    fn build_all_rows_lp(
        &self,
        domain: &dyn LocalDomain,
    ) -> SearchResult<Box<dyn LpRelaxation + '_>>;
}

/// The collaborators a driver borrows for the duration of one call.
///
/// The driver itself only owns its node stack and counters; domain, LP,
/// pseudocosts and the shared MIP state are borrowed through this bundle so
/// the caller stays in control of their lifetimes.
pub struct SearchContext<'a> {
    /// Shared MIP state.
    pub mip: &'a dyn MipContext,
    /// The LP relaxation bound to this driver.
    pub lp: &'a mut dyn LpRelaxation,
    /// The driver's local domain.
    pub domain: &'a mut dyn LocalDomain,
    /// The driver's pseudocost model.
    pub pseudocost: &'a mut dyn PseudocostStore,
}
