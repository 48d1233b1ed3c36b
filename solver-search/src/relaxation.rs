//! LP relaxation oracle contract.

use std::sync::Arc;

use crate::domain::LocalDomain;
use crate::pseudocost::PseudocostStore;

/// Outcome of an LP solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LpStatus {
    /// No solve has happened yet.
    #[default]
    NotSet,
    /// Optimal in the unscaled model.
    Optimal,
    /// Optimal in the scaled model, dual feasible after unscaling.
    UnscaledDualFeasible,
    /// Optimal in the scaled model, primal feasible after unscaling.
    UnscaledPrimalFeasible,
    /// Optimal in the scaled model only.
    UnscaledInfeasible,
    /// Proven infeasible.
    Infeasible,
    /// The solver failed; the node stays open for the fallback path.
    Error,
}

/// A stored LP warm-start. Immutable after publication; frames share it by
/// reference count.
pub trait LpBasis {
    /// Number of rows the basis was stored for. A basis is only restored
    /// into an LP with a matching row count.
    fn num_rows(&self) -> usize;
}

/// Reference-counted handle to a stored basis.
pub type SharedBasis = Arc<dyn LpBasis + Send + Sync>;

/// Configuration steps of the last-resort LP ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackMode {
    /// Re-solve with presolve enabled.
    Presolved,
    /// Re-solve from scratch with primal simplex.
    PrimalSimplex,
    /// Re-solve with an interior-point method.
    InteriorPoint,
}

/// The LP relaxation oracle.
///
/// One instance is bound to one driver; the oracle keeps its own handle to
/// the global problem data (rows, objective, scaling), so infeasibility
/// proofs are computed without the driver passing the global domain around.
pub trait LpRelaxation {
    /// Apply the local domain's pending bound changes to the LP columns and
    /// clear the domain's changed-column markers.
    fn flush_domain(&mut self, domain: &mut dyn LocalDomain);

    /// Set the objective cutoff for subsequent solves.
    fn set_objective_limit(&mut self, limit: f64);

    /// Solve from the current state.
    fn run(&mut self) -> LpStatus;

    /// Flush `domain` and solve, retrying with safeguards on failure.
    fn resolve(&mut self, domain: &mut dyn LocalDomain) -> LpStatus;

    /// Status of the most recent solve.
    fn status(&self) -> LpStatus;

    /// Column values of the most recent solution.
    fn solution(&self) -> &[f64];

    /// Objective value of the most recent solution.
    fn objective(&self) -> f64;

    /// Integer-constrained columns at fractional values in the most recent
    /// solution, as `(column, value)` pairs.
    fn fractional_integers(&self) -> &[(usize, f64)];

    /// Snapshot the current basis for sharing.
    fn store_basis(&mut self);

    /// The most recently stored basis.
    fn stored_basis(&self) -> Option<SharedBasis>;

    /// Replace the stored basis.
    fn set_stored_basis(&mut self, basis: Option<SharedBasis>);

    /// Warm-start the solver from the stored basis.
    fn recover_basis(&mut self);

    /// Number of rows currently in the LP.
    fn num_rows(&self) -> usize;

    /// Total simplex/IPM iterations performed by this oracle.
    fn num_lp_iterations(&self) -> i64;

    /// Derive a dual proof that the objective exceeds `upper_limit`. On
    /// success the proof row is written to `inds`/`vals`/`rhs`.
    fn compute_dual_proof(
        &mut self,
        upper_limit: f64,
        inds: &mut Vec<usize>,
        vals: &mut Vec<f64>,
        rhs: &mut f64,
    ) -> bool;

    /// Derive a dual proof of primal infeasibility. On success the proof row
    /// is written to `inds`/`vals`/`rhs`.
    fn compute_dual_inf_proof(
        &mut self,
        inds: &mut Vec<usize>,
        vals: &mut Vec<f64>,
        rhs: &mut f64,
    ) -> bool;

    /// Degeneracy factor of the most recent solve; values at or above the
    /// configured threshold disable reliability probing for the node.
    fn compute_degeneracy(&mut self, domain: &dyn LocalDomain) -> f64;

    /// Pseudocost-weighted primal estimate for the current solution.
    fn compute_best_estimate(&self, pseudocost: &dyn PseudocostStore) -> f64;

    /// Strengthen local bounds of nonbasic columns from the dual values,
    /// given the incumbent cutoff.
    fn reduced_cost_fixing(&self, cutoff: f64, domain: &mut dyn LocalDomain);

    /// Whether an [`LpStatus::Infeasible`] outcome was caused by the
    /// objective bound rather than primal infeasibility.
    fn infeasible_due_to_objective_bound(&self) -> bool;

    /// Restore the default iteration limit.
    fn reset_iteration_limit(&mut self);

    /// Reconfigure the oracle for one step of the fallback ladder. Only
    /// meaningful on oracles built by
    /// [`crate::context::MipContext::build_all_rows_lp`].
    fn set_fallback_mode(&mut self, mode: FallbackMode);

    /// Whether `status` is optimal at least in the scaled model.
    fn scaled_optimal(&self, status: LpStatus) -> bool {
        matches!(
            status,
            LpStatus::Optimal
                | LpStatus::UnscaledDualFeasible
                | LpStatus::UnscaledPrimalFeasible
                | LpStatus::UnscaledInfeasible
        )
    }

    /// Whether `status` implies a primal-feasible unscaled solution.
    fn unscaled_primal_feasible(&self, status: LpStatus) -> bool {
        matches!(
            status,
            LpStatus::Optimal | LpStatus::UnscaledPrimalFeasible
        )
    }

    /// Whether `status` implies a dual-feasible unscaled solution, so the
    /// objective is a valid lower bound.
    fn unscaled_dual_feasible(&self, status: LpStatus) -> bool {
        matches!(status, LpStatus::Optimal | LpStatus::UnscaledDualFeasible)
    }
}
