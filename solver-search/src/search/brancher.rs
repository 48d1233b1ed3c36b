//! Branching: candidate selection, child-selection rules and the
//! last-resort fallback paths.

use log::warn;
use rand::Rng;

use super::{NodeResult, Search};
use crate::context::SearchContext;
use crate::domain::DomainChange;
use crate::relaxation::FallbackMode;
use crate::settings::ChildSelection;

impl Search {
    /// Branch the current node: pick a fractional integer through the
    /// reliability probe, decide the first child by the child-selection
    /// rule and push its frame.
    ///
    /// Falls back to branching on an arbitrary unfixed integer column, and
    /// finally to the all-rows LP ladder, when the LP left the node open
    /// without fractional candidates.
    pub fn branch(&mut self, ctx: &mut SearchContext) -> NodeResult {
        debug_assert_eq!(ctx.domain.num_changed_cols(), 0);
        debug_assert_eq!(self.node_stack.last().map(|f| f.open_subtrees), Some(2));

        let min_reliable = ctx.pseudocost.min_reliable();
        let mut chosen: Option<(DomainChange, f64)> = None;

        let mut result = NodeResult::Open;
        loop {
            {
                let back = self.node_stack.last().expect("no current node");
                if back.open_subtrees != 2
                    || !ctx.lp.scaled_optimal(ctx.lp.status())
                    || ctx.lp.fractional_integers().is_empty()
                {
                    break;
                }
            }

            // shrink the reliability requirement as the probing budget
            // drains; past the budget probing is off entirely
            let mut sb_max_iters = 0i64;
            if min_reliable > 0 {
                let sb_iters = self.strong_branching_lp_iterations(ctx.mip);
                sb_max_iters = self.settings.strong_branching_base_iters
                    + ((self.total_lp_iterations(ctx.mip)
                        - self.heuristic_lp_iterations(ctx.mip)
                        - self.strong_branching_lp_iterations(ctx.mip))
                        >> 1);
                if sb_iters > sb_max_iters {
                    ctx.pseudocost.set_min_reliable(0);
                } else if sb_iters > sb_max_iters / 2 {
                    let reduction_ratio = (sb_iters - sb_max_iters / 2) as f64
                        / (sb_max_iters - sb_max_iters / 2) as f64;
                    let min_rel_reduced = (min_reliable as f64
                        - reduction_ratio * (min_reliable - 1) as f64)
                        as i32;
                    ctx.pseudocost
                        .set_min_reliable(min_reliable.min(min_rel_reduced));
                }
            }

            let degeneracy = ctx.lp.compute_degeneracy(ctx.domain);
            ctx.pseudocost.set_degeneracy_factor(degeneracy);
            if degeneracy >= self.settings.degeneracy_disable_threshold {
                ctx.pseudocost.set_min_reliable(0);
            }

            match self.select_branching_candidate(ctx, sb_max_iters) {
                Some(candidate) => {
                    let (col, point) = ctx.lp.fractional_integers()[candidate];
                    let decision = self.select_child(ctx, col, point);
                    chosen = Some((decision, point));
                    result = NodeResult::Branched;
                    break;
                }
                None => {
                    // a trial already committed the surviving branch
                    debug_assert!(ctx.domain.num_changed_cols() > 0);
                    result = self.evaluate_node(ctx);
                }
            }
        }

        ctx.pseudocost.set_min_reliable(min_reliable);
        ctx.pseudocost.set_degeneracy_factor(1.0);

        {
            let back = self.node_stack.last().expect("no current node");
            debug_assert!(back.open_subtrees == 2 || back.open_subtrees == 0);
            if back.open_subtrees != 2 {
                return result;
            }
        }

        if chosen.is_none() {
            // solution branching failed (LP error); branch on any unfixed
            // integer column ranked by pseudocost score
            chosen = self.select_fallback_column(ctx);
        }

        let Some((decision, point)) = chosen else {
            return self.solve_fallback_ladder(ctx);
        };

        self.push_branch(ctx, decision, point);
        NodeResult::Branched
    }

    /// Decide which child of the branching on `col` at `point` to descend
    /// into first.
    fn select_child(&mut self, ctx: &mut SearchContext, col: usize, point: f64) -> DomainChange {
        let down_val = point.floor();
        let up_val = point.ceil();

        match self.child_selection {
            ChildSelection::Up => DomainChange::lower(col, up_val),
            ChildSelection::Down => DomainChange::upper(col, down_val),
            ChildSelection::RootSolDistance => {
                let mut down_prio = ctx.pseudocost.avg_inferences_down(col) + ctx.mip.epsilon();
                let mut up_prio = ctx.pseudocost.avg_inferences_up(col) + ctx.mip.epsilon();

                if !self.subroot_sol.is_empty() {
                    let root_sol = self.subroot_sol[col].clamp(down_val, up_val);
                    up_prio *= 1.0 + (point - root_sol);
                    down_prio *= 1.0 + (root_sol - point);
                } else {
                    let lp_objective = self
                        .node_stack
                        .last()
                        .map_or(f64::NEG_INFINITY, |f| f.lp_objective);
                    if lp_objective != f64::NEG_INFINITY {
                        self.subroot_sol = ctx.lp.solution().to_vec();
                    }
                    let root = ctx.mip.root_lp_solution();
                    if !root.is_empty() {
                        let root_sol = root[col].clamp(down_val, up_val);
                        up_prio *= 1.0 + (point - root_sol);
                        down_prio *= 1.0 + (root_sol - point);
                    }
                }

                if up_prio + ctx.mip.epsilon() >= down_prio {
                    DomainChange::lower(col, up_val)
                } else {
                    DomainChange::upper(col, down_val)
                }
            }
            ChildSelection::ObjectiveSign => {
                if ctx.mip.col_cost(col) >= 0.0 {
                    DomainChange::lower(col, up_val)
                } else {
                    DomainChange::upper(col, down_val)
                }
            }
            ChildSelection::Random => {
                if self.rng.gen::<bool>() {
                    DomainChange::lower(col, up_val)
                } else {
                    DomainChange::upper(col, down_val)
                }
            }
            ChildSelection::BestPseudocost => {
                let up = ctx
                    .pseudocost
                    .pseudocost_up(col, point, ctx.mip.feastol());
                let down = ctx
                    .pseudocost
                    .pseudocost_down(col, point, ctx.mip.feastol());
                if up > down {
                    DomainChange::upper(col, down_val)
                } else {
                    DomainChange::lower(col, up_val)
                }
            }
            ChildSelection::WorstPseudocost => {
                let up = ctx.pseudocost.pseudocost_up(col, point, 0.0);
                let down = ctx.pseudocost.pseudocost_down(col, point, 0.0);
                if up >= down {
                    DomainChange::lower(col, up_val)
                } else {
                    DomainChange::upper(col, down_val)
                }
            }
            ChildSelection::OpenNodeDisjunction => {
                let num_up = ctx.mip.node_queue().num_nodes_up(col);
                let num_down = ctx.mip.node_queue().num_nodes_down(col);
                if num_up > num_down {
                    DomainChange::lower(col, up_val)
                } else if num_down > num_up {
                    DomainChange::upper(col, down_val)
                } else if ctx.mip.col_cost(col) >= 0.0 {
                    DomainChange::lower(col, up_val)
                } else {
                    DomainChange::upper(col, down_val)
                }
            }
            ChildSelection::HybridInferenceCost => {
                let up_score = (1.0 + ctx.pseudocost.avg_inferences_up(col))
                    / ctx.pseudocost.pseudocost_up(col, point, ctx.mip.feastol());
                let down_score = (1.0 + ctx.pseudocost.avg_inferences_down(col))
                    / ctx.pseudocost.pseudocost_down(col, point, ctx.mip.feastol());
                if up_score >= down_score {
                    DomainChange::lower(col, up_val)
                } else {
                    DomainChange::upper(col, down_val)
                }
            }
        }
    }

    /// Pick any integer column with a non-degenerate domain, ranked by
    /// pseudocost score, rounding against the objective sign. The branching
    /// point is tied to the bound value so the flip logic recognizes it as
    /// a fallback branch.
    fn select_fallback_column(&self, ctx: &mut SearchContext) -> Option<(DomainChange, f64)> {
        let mut best_score = -1.0;
        let mut chosen = None;

        for col in 0..ctx.mip.num_cols() {
            if !ctx.mip.is_integer(col) {
                continue;
            }
            let lower = ctx.domain.col_lower(col);
            let upper = ctx.domain.col_upper(col);
            if upper - lower < 0.5 {
                continue;
            }

            let frac_val = if lower != f64::NEG_INFINITY {
                lower + 0.5
            } else if upper != f64::INFINITY {
                upper - 0.5
            } else {
                0.5
            };

            let score = ctx.pseudocost.score(col, frac_val);
            debug_assert!(score >= 0.0);

            if score > best_score {
                best_score = score;
                chosen = Some(if ctx.mip.col_cost(col) >= 0.0 {
                    let up_val = frac_val.ceil();
                    (DomainChange::lower(col, up_val), up_val)
                } else {
                    let down_val = frac_val.floor();
                    (DomainChange::upper(col, down_val), down_val)
                });
            }
        }

        chosen
    }

    /// Last resort after every integer column is fixed and the LP failed:
    /// re-evaluate the node on a fresh LP over the model rows only, retried
    /// presolved, then with primal simplex, then with an interior-point
    /// solve. Only after all three fail is the node declared infeasible.
    fn solve_fallback_ladder(&mut self, ctx: &mut SearchContext) -> NodeResult {
        ctx.lp.reset_iteration_limit();

        let mut fallback = match ctx.mip.build_all_rows_lp(ctx.domain) {
            Ok(lp) => lp,
            Err(err) => {
                warn!("failed to build fallback LP ({err}); declaring node infeasible");
                self.cutoff_node();
                return NodeResult::LpInfeasible;
            }
        };

        let mut result = NodeResult::Open;
        for mode in [
            FallbackMode::Presolved,
            FallbackMode::PrimalSimplex,
            FallbackMode::InteriorPoint,
        ] {
            fallback.set_fallback_mode(mode);
            let mut sub = SearchContext {
                mip: ctx.mip,
                lp: fallback.as_mut(),
                domain: &mut *ctx.domain,
                pseudocost: &mut *ctx.pseudocost,
            };
            result = self.evaluate_node(&mut sub);
            if result != NodeResult::Open {
                break;
            }
        }

        if result == NodeResult::Open {
            warn!("failed to solve node with all integer columns fixed; declaring node infeasible");
            self.cutoff_node();
            result = NodeResult::LpInfeasible;
        }

        result
    }
}
