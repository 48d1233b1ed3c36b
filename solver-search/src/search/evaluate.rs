//! Node evaluation: propagate, solve the relaxation, classify, learn.

use log::debug;

use super::{NodeResult, Search};
use crate::context::{IncumbentSource, SearchContext};
use crate::domain::BoundKind;
use crate::relaxation::LpStatus;

/// Snapshot of the parent frame's branching, taken before the current frame
/// is mutated.
struct ParentBranch {
    column: usize,
    up_branch: bool,
    bound_value: f64,
    branching_point: f64,
    lp_objective: f64,
}

impl Search {
    fn parent_branch(&self) -> Option<ParentBranch> {
        let parent = &self.node_stack[self.parent_index()?];
        let decision = parent.branching_decision?;
        Some(ParentBranch {
            column: decision.column,
            up_branch: decision.kind == BoundKind::Lower,
            bound_value: decision.value,
            branching_point: parent.branching_point,
            lp_objective: parent.lp_objective,
        })
    }

    /// Record a cutoff observation on the parent branching, unless it was a
    /// fallback branch with no fractional origin or the parent never solved
    /// its LP.
    fn record_parent_cutoff(&self, ctx: &mut SearchContext) {
        if let Some(parent) = self.parent_branch() {
            if parent.lp_objective != f64::NEG_INFINITY
                && parent.branching_point != parent.bound_value
            {
                ctx.pseudocost
                    .add_cutoff_observation(parent.column, parent.up_branch);
            }
        }
    }

    /// Evaluate the current node: propagate the local domain, apply orbital
    /// fixing, solve the LP relaxation and classify the outcome. Non-open
    /// outcomes close the frame and account its pruned tree weight.
    pub fn evaluate_node(&mut self, ctx: &mut SearchContext) -> NodeResult {
        debug_assert!(!self.node_stack.is_empty());
        let pos = self.node_stack.len() - 1;

        ctx.domain.propagate();

        if !ctx.domain.infeasible() {
            // compute a fresh stabilizer unless the parent's was empty, in
            // which case symmetry is exhausted along this path
            let needs_orbits = ctx.mip.has_symmetries()
                && self.node_stack[pos].stabilizer_orbits.is_none()
                && self.parent_index().map_or(true, |parent| {
                    match &self.node_stack[parent].stabilizer_orbits {
                        None => true,
                        Some(orbits) => !orbits.orbit_cols().is_empty(),
                    }
                });
            if needs_orbits {
                self.node_stack[pos].stabilizer_orbits =
                    ctx.mip.compute_stabilizer_orbits(ctx.domain);
            }

            if let Some(orbits) = self.node_stack[pos].stabilizer_orbits.clone() {
                orbits.orbital_fixing(ctx.domain);
            }
        }

        if let Some(parent) = self.parent_branch() {
            let inferences = ctx.domain.num_changes() as i64
                - (self.node_stack[pos].domchg_stack_pos as i64 + 1);
            ctx.pseudocost
                .add_inference_observation(parent.column, inferences, parent.up_branch);
        }

        let mut result = NodeResult::Open;

        if ctx.domain.infeasible() {
            result = NodeResult::DomainInfeasible;
            ctx.domain.clear_changed_cols();
            self.record_parent_cutoff(ctx);
            ctx.domain
                .conflict_analysis_reasons(ctx.mip.conflict_pool());
        } else {
            ctx.lp.flush_domain(ctx.domain);
            ctx.lp.set_objective_limit(ctx.mip.upper_limit());

            let old_iters = ctx.lp.num_lp_iterations();
            let status = ctx.lp.resolve(ctx.domain);
            let spent = ctx.lp.num_lp_iterations() - old_iters;
            self.lp_iterations += spent;
            if self.in_heuristic {
                self.heuristic_lp_iterations += spent;
            }

            if ctx.domain.infeasible() {
                // propagation inside the resolve emptied the domain
                result = NodeResult::DomainInfeasible;
                ctx.domain.clear_changed_cols();
                self.record_parent_cutoff(ctx);
                ctx.domain
                    .conflict_analysis_reasons(ctx.mip.conflict_pool());
            } else if ctx.lp.scaled_optimal(status) {
                ctx.lp.store_basis();
                let lp_objective = ctx.lp.objective();
                let estimate = ctx.lp.compute_best_estimate(ctx.pseudocost);
                {
                    let frame = &mut self.node_stack[pos];
                    frame.node_basis = ctx.lp.stored_basis();
                    frame.estimate = estimate;
                    frame.lp_objective = lp_objective;
                }

                if let Some(parent) = self.parent_branch() {
                    if parent.lp_objective != f64::NEG_INFINITY
                        && parent.branching_point != parent.bound_value
                    {
                        let delta = parent.bound_value - parent.branching_point;
                        let objdelta = (lp_objective - parent.lp_objective).max(0.0);
                        ctx.pseudocost
                            .add_observation(parent.column, delta, objdelta);
                    }
                }

                if ctx.lp.unscaled_primal_feasible(status)
                    && ctx.lp.fractional_integers().is_empty()
                {
                    result = NodeResult::BoundExceeding;
                    let cutoff = self.cutoff_bound(ctx.mip);
                    let source = if self.in_heuristic {
                        IncumbentSource::Heuristic
                    } else {
                        IncumbentSource::Tree
                    };
                    ctx.mip.add_incumbent(ctx.lp.solution(), lp_objective, source);
                    if ctx.mip.upper_limit() < cutoff {
                        ctx.lp.set_objective_limit(ctx.mip.upper_limit());
                    }
                    self.add_bound_exceeding_conflict(ctx);
                }

                if result == NodeResult::Open {
                    if ctx.lp.unscaled_dual_feasible(status) {
                        let lower_bound = {
                            let frame = &mut self.node_stack[pos];
                            frame.lower_bound = frame.lower_bound.max(lp_objective);
                            frame.lower_bound
                        };

                        if lower_bound > self.cutoff_bound(ctx.mip) {
                            result = NodeResult::BoundExceeding;
                            self.add_bound_exceeding_conflict(ctx);
                        } else if ctx.mip.upper_limit() != f64::INFINITY {
                            ctx.lp.reduced_cost_fixing(ctx.mip.upper_limit(), ctx.domain);
                            if ctx.domain.infeasible() {
                                result = NodeResult::BoundExceeding;
                                self.add_bound_exceeding_conflict(ctx);
                                ctx.domain.clear_changed_cols();
                            } else if ctx.domain.num_changed_cols() > 0 {
                                return self.evaluate_node(ctx);
                            }
                        }
                    } else if ctx.lp.objective() > self.cutoff_bound(ctx.mip) {
                        // not dual feasible after unscaling; derive the proof
                        // with the oracle's relaxed dual tolerance and
                        // repropagate to see whether the node dies
                        self.add_bound_exceeding_conflict(ctx);
                        ctx.domain.propagate();
                        if ctx.domain.infeasible() {
                            result = NodeResult::BoundExceeding;
                        }
                    }
                }
            } else if status == LpStatus::Infeasible {
                result = if ctx.lp.infeasible_due_to_objective_bound() {
                    NodeResult::BoundExceeding
                } else {
                    NodeResult::LpInfeasible
                };
                self.add_infeasible_conflict(ctx);
                self.record_parent_cutoff(ctx);
            }
            // LpStatus::Error keeps the node open; the brancher's fallback
            // path takes over from here
        }

        if result != NodeResult::Open {
            self.add_pruned_weight(self.current_depth());
            self.node_stack[pos].open_subtrees = 0;
        }

        result
    }

    /// Derive a dual proof that the node's objective exceeds the cutoff and
    /// feed it to conflict analysis and the cut generator.
    pub(crate) fn add_bound_exceeding_conflict(&mut self, ctx: &mut SearchContext) {
        if ctx.mip.upper_limit() == f64::INFINITY {
            return;
        }
        let mut rhs = 0.0;
        if ctx.lp.compute_dual_proof(
            ctx.mip.upper_limit(),
            &mut self.proof_inds,
            &mut self.proof_vals,
            &mut rhs,
        ) {
            if ctx.mip.global_infeasible() {
                return;
            }
            ctx.domain.conflict_analysis(
                &self.proof_inds,
                &self.proof_vals,
                rhs,
                ctx.mip.conflict_pool(),
            );
            if let Err(err) = ctx.mip.cut_generator().generate_conflict(
                ctx.domain,
                &mut self.proof_inds,
                &mut self.proof_vals,
                &mut rhs,
            ) {
                debug!("dropped bound-exceeding conflict: {err}");
            }
        }
    }

    /// Derive a dual proof of LP infeasibility and feed it to conflict
    /// analysis and the cut generator.
    pub(crate) fn add_infeasible_conflict(&mut self, ctx: &mut SearchContext) {
        let mut rhs = 0.0;
        if ctx
            .lp
            .compute_dual_inf_proof(&mut self.proof_inds, &mut self.proof_vals, &mut rhs)
        {
            if ctx.mip.global_infeasible() {
                return;
            }
            ctx.domain.conflict_analysis(
                &self.proof_inds,
                &self.proof_vals,
                rhs,
                ctx.mip.conflict_pool(),
            );
            if let Err(err) = ctx.mip.cut_generator().generate_conflict(
                ctx.domain,
                &mut self.proof_inds,
                &mut self.proof_vals,
                &mut rhs,
            ) {
                debug!("dropped infeasibility conflict: {err}");
            }
        }
    }
}
