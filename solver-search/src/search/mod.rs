//! The branch-and-bound search driver.

mod backtrack;
mod brancher;
mod evaluate;
mod frame;
mod probe;

pub use frame::NodeFrame;

use std::collections::HashMap;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::context::{MipContext, SearchContext, SearchStats};
use crate::domain::{BoundKind, DomainChange, LocalDomain};
use crate::numerics::CompensatedSum;
use crate::settings::{ChildSelection, SearchSettings};

/// Outcome of evaluating or branching a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeResult {
    /// The node still needs branching or further evaluation.
    Open,
    /// Propagation emptied the local domain.
    DomainInfeasible,
    /// The LP relaxation is infeasible.
    LpInfeasible,
    /// The dual bound exceeds the cutoff (or an integer-feasible solution
    /// closed the node).
    BoundExceeding,
    /// A child frame was pushed.
    Branched,
    /// A heuristic dive was abandoned without improving the incumbent.
    SubOptimal,
}

const UP_RELIABLE: u8 = 1;
const DOWN_RELIABLE: u8 = 2;

/// The search driver: one worker exploring the branching tree depth-first.
///
/// The driver owns only its node stack, counters and scratch space; the LP,
/// domain, pseudocosts and shared MIP state are borrowed per call through a
/// [`SearchContext`].
pub struct Search {
    settings: SearchSettings,
    node_stack: Vec<NodeFrame>,
    depth_offset: i32,

    // local statistics, flushed into the shared totals on demand
    nnodes: i64,
    tree_weight: CompensatedSum,
    lp_iterations: i64,
    heuristic_lp_iterations: i64,
    sb_lp_iterations: i64,

    // driver-local cutoff; the effective cutoff is the min with the
    // MIP-wide upper limit
    upper_limit: f64,
    in_heuristic: bool,

    child_selection: ChildSelection,
    rng: SmallRng,

    // columns probed to reliability at the current dive's node
    reliable_at_node: HashMap<usize, u8>,

    // LP solution of the current subtree root, for root-distance rounding
    subroot_sol: Vec<f64>,

    // scratch buffers for dual proof rows
    proof_inds: Vec<usize>,
    proof_vals: Vec<f64>,
}

impl Search {
    /// New driver with the given settings.
    pub fn new(settings: SearchSettings) -> Self {
        let rng = SmallRng::seed_from_u64(settings.random_seed);
        let child_selection = settings.child_selection;
        Self {
            settings,
            node_stack: Vec::new(),
            depth_offset: 0,
            nnodes: 0,
            tree_weight: CompensatedSum::new(),
            lp_iterations: 0,
            heuristic_lp_iterations: 0,
            sb_lp_iterations: 0,
            upper_limit: f64::INFINITY,
            in_heuristic: false,
            child_selection,
            rng,
            reliable_at_node: HashMap::new(),
            subroot_sol: Vec::new(),
            proof_inds: Vec::new(),
            proof_vals: Vec::new(),
        }
    }

    /// Whether the driver currently holds a node.
    pub fn has_node(&self) -> bool {
        !self.node_stack.is_empty()
    }

    /// Logical depth of the current node: stack size minus one plus the
    /// depth offset accumulated from skipped one-sided branches and
    /// installed queue nodes.
    pub fn current_depth(&self) -> i32 {
        self.node_stack.len() as i32 - 1 + self.depth_offset
    }

    /// The accumulated depth offset.
    pub fn depth_offset(&self) -> i32 {
        self.depth_offset
    }

    /// The frames of the current root-to-leaf path, root first.
    pub fn frames(&self) -> &[NodeFrame] {
        &self.node_stack
    }

    /// Dual bound of the current node; `-inf` without a node.
    pub fn current_lower_bound(&self) -> f64 {
        self.node_stack
            .last()
            .map_or(f64::NEG_INFINITY, |frame| frame.lower_bound)
    }

    /// Pruned tree weight accumulated since the last flush.
    pub fn pruned_tree_weight(&self) -> f64 {
        self.tree_weight.value()
    }

    /// Set the driver-local objective cutoff.
    pub fn set_upper_limit(&mut self, limit: f64) {
        self.upper_limit = limit;
    }

    /// Mark the driver as running inside a primal heuristic. Incumbents are
    /// tagged accordingly and LP iterations count against the heuristic
    /// budget.
    pub fn set_in_heuristic(&mut self, in_heuristic: bool) {
        self.in_heuristic = in_heuristic;
    }

    /// The effective cutoff bound: the smaller of the MIP-wide upper limit
    /// and the driver-local one.
    pub fn cutoff_bound(&self, mip: &dyn MipContext) -> f64 {
        mip.upper_limit().min(self.upper_limit)
    }

    /// Seat a fresh node on the stack, anchored at the current position of
    /// the domain-change stack.
    pub fn create_new_node(&mut self, domain: &dyn LocalDomain) {
        let mut frame = NodeFrame::new();
        frame.domchg_stack_pos = domain.num_changes();
        self.node_stack.push(frame);
    }

    /// Close the current node without exploring its children.
    pub fn cutoff_node(&mut self) {
        if let Some(frame) = self.node_stack.last_mut() {
            frame.open_subtrees = 0;
        }
    }

    /// Whether the current frame's stabilizer orbits stay valid in the
    /// child created by `change`: either the branched column is stabilized,
    /// or the branch is a down branch on a globally binary column.
    pub fn orbits_valid_in_child_node(
        &self,
        change: &DomainChange,
        domain: &dyn LocalDomain,
    ) -> bool {
        let frame = self.node_stack.last().expect("no current node");
        match &frame.stabilizer_orbits {
            None => true,
            Some(orbits) => {
                if orbits.orbit_cols().is_empty() || orbits.is_stabilized(change.column) {
                    return true;
                }
                change.kind == BoundKind::Upper && domain.is_global_binary(change.column)
            }
        }
    }

    /// Descend into the down child: `col <= new_ub`, where `new_ub` is the
    /// floor of the fractional value `branch_point`.
    pub fn branch_downwards(
        &mut self,
        ctx: &mut SearchContext,
        col: usize,
        new_ub: f64,
        branch_point: f64,
    ) {
        self.push_branch(ctx, DomainChange::upper(col, new_ub), branch_point);
    }

    /// Descend into the up child: `col >= new_lb`, where `new_lb` is the
    /// ceiling of the fractional value `branch_point`.
    pub fn branch_upwards(
        &mut self,
        ctx: &mut SearchContext,
        col: usize,
        new_lb: f64,
        branch_point: f64,
    ) {
        self.push_branch(ctx, DomainChange::lower(col, new_lb), branch_point);
    }

    fn push_branch(&mut self, ctx: &mut SearchContext, decision: DomainChange, branch_point: f64) {
        debug_assert!(ctx.mip.is_integer(decision.column));
        debug_assert_eq!(self.node_stack.last().map(|f| f.open_subtrees), Some(2));

        let pass_orbits = self.orbits_valid_in_child_node(&decision, ctx.domain);
        let domchg_pos = ctx.domain.num_changes();

        let frame = self.node_stack.last_mut().expect("no current node");
        frame.open_subtrees = 1;
        frame.branching_point = branch_point;
        frame.branching_decision = Some(decision);
        let lower_bound = frame.lower_bound;
        let estimate = frame.estimate;
        let basis = frame.node_basis.clone();
        let orbits = if pass_orbits {
            frame.stabilizer_orbits.clone()
        } else {
            None
        };

        ctx.domain.change_bound(decision);
        let mut child = NodeFrame::child(lower_bound, estimate, basis, orbits);
        child.domchg_stack_pos = domchg_pos;
        self.node_stack.push(child);
    }

    /// Objective value of `sol` under compensated summation, and whether all
    /// integer-constrained columns are within feastol of an integer.
    pub fn check_solution(&self, mip: &dyn MipContext, sol: &[f64]) -> (f64, bool) {
        let mut objective = CompensatedSum::new();
        let mut integer_feasible = true;
        for col in 0..mip.num_cols() {
            debug_assert!(sol[col].is_finite());
            objective += sol[col] * mip.col_cost(col);

            if !integer_feasible || !mip.is_integer(col) {
                continue;
            }
            let intval = (sol[col] + 0.5).floor();
            if (sol[col] - intval).abs() > mip.feastol() {
                integer_feasible = false;
            }
        }
        (objective.value(), integer_feasible)
    }

    /// Fix integer columns whose relaxation value agrees with the incumbent
    /// `basesol`, restricting the search to the RINS neighbourhood.
    pub fn set_rins_neighbourhood(
        &self,
        ctx: &mut SearchContext,
        basesol: &[f64],
        relaxsol: &[f64],
    ) {
        for col in 0..ctx.mip.num_cols() {
            if !ctx.mip.is_integer(col) {
                continue;
            }
            let lower = ctx.domain.col_lower(col);
            let upper = ctx.domain.col_upper(col);
            if lower == upper {
                continue;
            }
            let intval = (basesol[col] + 0.5).floor();
            if (relaxsol[col] - intval).abs() < ctx.mip.feastol() {
                if lower < intval {
                    ctx.domain
                        .tighten_bound(DomainChange::lower(col, intval.min(upper)));
                }
                if upper > intval {
                    ctx.domain
                        .tighten_bound(DomainChange::upper(col, intval.max(lower)));
                }
            }
        }
    }

    /// Restrict integer columns to the rounding interval of the relaxation
    /// solution (the RENS neighbourhood). Infeasibility detected midway
    /// early-returns; callers observe it through the domain and prune.
    pub fn set_rens_neighbourhood(&self, ctx: &mut SearchContext, lpsol: &[f64]) {
        for col in 0..ctx.mip.num_cols() {
            if !ctx.mip.is_integer(col) {
                continue;
            }
            let lower = ctx.domain.col_lower(col);
            let upper = ctx.domain.col_upper(col);
            if lower == upper {
                continue;
            }
            let downval = (lpsol[col] + ctx.mip.feastol()).floor();
            let upval = (lpsol[col] - ctx.mip.feastol()).ceil();

            if ctx.domain.col_lower(col) < downval {
                ctx.domain
                    .tighten_bound(DomainChange::lower(col, downval.min(upper)));
                if ctx.domain.infeasible() {
                    return;
                }
            }
            if ctx.domain.col_upper(col) > upval {
                let lower = ctx.domain.col_lower(col);
                ctx.domain
                    .tighten_bound(DomainChange::upper(col, upval.max(lower)));
                if ctx.domain.infeasible() {
                    return;
                }
            }
        }
    }

    /// Restore the local domain and the LP bounds to the global domain.
    /// Only valid between dives, with an empty node stack.
    pub fn reset_local_domain(&mut self, ctx: &mut SearchContext) {
        debug_assert!(self.node_stack.is_empty());
        ctx.domain.backtrack_to_global();
        ctx.lp.flush_domain(ctx.domain);
    }

    /// Atomically add the local counters into the MIP-wide totals and zero
    /// them locally.
    pub fn flush_statistics(&mut self, mip: &dyn MipContext) {
        mip.flush_statistics(&SearchStats {
            nodes: self.nnodes,
            tree_weight: self.tree_weight.value(),
            lp_iterations: self.lp_iterations,
            heuristic_lp_iterations: self.heuristic_lp_iterations,
            sb_lp_iterations: self.sb_lp_iterations,
        });
        self.nnodes = 0;
        self.tree_weight.clear();
        self.lp_iterations = 0;
        self.heuristic_lp_iterations = 0;
        self.sb_lp_iterations = 0;
    }

    /// LP iterations spent by this driver since the last flush.
    pub fn local_lp_iterations(&self) -> i64 {
        self.lp_iterations
    }

    /// Total LP iterations, local plus MIP-wide.
    pub fn total_lp_iterations(&self, mip: &dyn MipContext) -> i64 {
        self.lp_iterations + mip.statistics().lp_iterations
    }

    /// Heuristic LP iterations, local plus MIP-wide.
    pub fn heuristic_lp_iterations(&self, mip: &dyn MipContext) -> i64 {
        self.heuristic_lp_iterations + mip.statistics().heuristic_lp_iterations
    }

    /// Strong-branching LP iterations, local plus MIP-wide.
    pub fn strong_branching_lp_iterations(&self, mip: &dyn MipContext) -> i64 {
        self.sb_lp_iterations + mip.statistics().sb_lp_iterations
    }

    /// Repeatedly evaluate and branch until the current path closes, a
    /// branching fails, or a limit fires (in which case the result may be
    /// [`NodeResult::Open`]).
    pub fn dive(&mut self, ctx: &mut SearchContext) -> NodeResult {
        self.reliable_at_node.clear();

        loop {
            self.nnodes += 1;
            let result = self.evaluate_node(ctx);

            if ctx.mip.check_limits() {
                return result;
            }
            if result != NodeResult::Open {
                return result;
            }

            let result = self.branch(ctx);
            if result != NodeResult::Branched {
                return result;
            }
        }
    }

    /// Depth-first search from the current node: dive, then backtrack, for
    /// at most `max_backtracks` backtracks or until the stack empties.
    pub fn solve_depth_first(&mut self, ctx: &mut SearchContext, max_backtracks: i64) {
        let mut remaining = max_backtracks;
        loop {
            if remaining == 0 {
                break;
            }

            let result = self.dive(ctx);
            // a limit may leave the node open; the caller parks it
            if result == NodeResult::Open {
                break;
            }
            remaining -= 1;

            if !self.backtrack(ctx) {
                break;
            }
        }
    }

    pub(crate) fn parent_index(&self) -> Option<usize> {
        self.node_stack.len().checked_sub(2)
    }

    pub(crate) fn add_pruned_weight(&mut self, logical_depth: i32) {
        self.tree_weight += (0.5f64).powi(logical_depth);
    }

    pub(crate) fn mark_up_reliable_at_node(&mut self, col: usize) {
        *self.reliable_at_node.entry(col).or_insert(0) |= UP_RELIABLE;
    }

    pub(crate) fn mark_down_reliable_at_node(&mut self, col: usize) {
        *self.reliable_at_node.entry(col).or_insert(0) |= DOWN_RELIABLE;
    }

    pub(crate) fn branching_var_reliable_at_node(&self, col: usize) -> bool {
        self.reliable_at_node
            .get(&col)
            .is_some_and(|flags| *flags == UP_RELIABLE | DOWN_RELIABLE)
    }
}
