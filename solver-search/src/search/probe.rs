//! Reliability strong branching: probe trial bounds until the best
//! candidate's pseudocosts are reliable on both sides.

use super::Search;
use crate::context::SearchContext;
use crate::domain::DomainChange;
use crate::pseudocost::PseudocostStore;
use crate::queue::NodeQueue;
use crate::relaxation::LpStatus;

/// Pick the highest-scoring candidate, marking sides whose score dropped
/// below the moving minimum as reliable. Ties within feastol break on the
/// fraction-of-children heuristic, then on total child count.
#[allow(clippy::too_many_arguments)]
fn select_best_score(
    final_selection: bool,
    fracints: &[(usize, f64)],
    upscore: &[f64],
    downscore: &[f64],
    upreliable: &mut [bool],
    downreliable: &mut [bool],
    min_score: &mut f64,
    pseudocost: &dyn PseudocostStore,
    queue: &dyn NodeQueue,
    feastol: f64,
) -> usize {
    let mut best = 0;
    let mut best_score = -1.0;
    let mut best_nodes = -1.0;
    let mut best_num_nodes: i64 = 0;

    let old_min_score = *min_score;
    for (k, &(col, frac_val)) in fracints.iter().enumerate() {
        if upscore[k] <= old_min_score {
            upreliable[k] = true;
        }
        if downscore[k] <= old_min_score {
            downreliable[k] = true;
        }

        let floor = 1e-3
            * f64::min(
                if upreliable[k] { upscore[k] } else { 0.0 },
                if downreliable[k] { downscore[k] } else { 0.0 },
            );
        *min_score = min_score.max(floor);

        let score = if upscore[k] <= old_min_score || downscore[k] <= old_min_score {
            pseudocost.score_deltas(
                col,
                upscore[k].min(old_min_score),
                downscore[k].min(old_min_score),
            )
        } else if upscore[k] == f64::INFINITY || downscore[k] == f64::INFINITY {
            if final_selection {
                pseudocost.score(col, frac_val)
            } else {
                f64::INFINITY
            }
        } else {
            pseudocost.score_deltas(col, upscore[k], downscore[k])
        };
        debug_assert!(score >= 0.0);

        let up_nodes = queue.num_nodes_up(col);
        let down_nodes = queue.num_nodes_down(col);
        let num_nodes = up_nodes + down_nodes;
        let nodes = if num_nodes != 0 {
            (down_nodes as f64 / num_nodes as f64) * (up_nodes as f64 / num_nodes as f64)
        } else {
            0.0
        };

        if score > best_score
            || (score > best_score - feastol && (nodes, num_nodes) > (best_nodes, best_num_nodes))
        {
            best = k;
            best_score = score;
            best_nodes = nodes;
            best_num_nodes = num_nodes;
        }
    }

    best
}

impl Search {
    /// Commit the sibling of an infeasible or bound-exceeding trial branch.
    /// The branched frame is closed on the spot and the one-sided descent
    /// does not count as tree depth.
    fn commit_opposite_branch(
        &mut self,
        ctx: &mut SearchContext,
        col: usize,
        probe_down: bool,
        down_val: f64,
        up_val: f64,
        frac_val: f64,
    ) {
        if probe_down {
            self.branch_upwards(ctx, col, up_val, frac_val);
        } else {
            self.branch_downwards(ctx, col, down_val, frac_val);
        }

        let parent = self.node_stack.len() - 2;
        self.node_stack[parent].open_subtrees = 0;
        self.node_stack[parent].skip_depth_count = 1;
        self.depth_offset -= 1;

        let basis = self
            .node_stack
            .last()
            .and_then(|frame| frame.node_basis.clone());
        ctx.lp.set_stored_basis(basis);
    }

    /// Select a branching candidate among the current fractional integers.
    ///
    /// Probes unreliable candidate sides with trial bounds and strong-
    /// branching LPs, recording pseudocost, cutoff and inference
    /// observations, until the best candidate is reliable on both sides or
    /// the iteration budget `max_sb_iters` (or a MIP-wide limit) stops the
    /// loop. Returns `None` when a trial proved one side infeasible or
    /// bound-exceeding and the opposite branch has already been committed;
    /// the caller then evaluates the committed branch instead of selecting.
    pub fn select_branching_candidate(
        &mut self,
        ctx: &mut SearchContext,
        max_sb_iters: i64,
    ) -> Option<usize> {
        debug_assert!(!ctx.lp.fractional_integers().is_empty());

        let basis_threshold = self.settings.basis_restart_threshold;
        let fracints: Vec<(usize, f64)> = ctx.lp.fractional_integers().to_vec();
        let num_frac = fracints.len();

        let mut upscore = vec![f64::INFINITY; num_frac];
        let mut downscore = vec![f64::INFINITY; num_frac];
        let mut upreliable = vec![false; num_frac];
        let mut downreliable = vec![false; num_frac];

        // seed candidates whose pseudocosts are already reliable so they
        // are not probed again
        for (k, &(col, frac_val)) in fracints.iter().enumerate() {
            debug_assert!(frac_val > ctx.domain.col_lower(col) + ctx.mip.feastol());
            debug_assert!(frac_val < ctx.domain.col_upper(col) - ctx.mip.feastol());

            if ctx.pseudocost.is_reliable(col) || self.branching_var_reliable_at_node(col) {
                upscore[k] = ctx.pseudocost.pseudocost_up(col, frac_val, 0.0);
                downscore[k] = ctx.pseudocost.pseudocost_down(col, frac_val, 0.0);
                upreliable[k] = true;
                downreliable[k] = true;
            }
        }

        let mut min_score = ctx.mip.feastol();
        let mut reset_basis = false;

        loop {
            let must_stop = self.strong_branching_lp_iterations(ctx.mip) >= max_sb_iters
                || ctx.mip.check_limits();

            let candidate = select_best_score(
                must_stop,
                &fracints,
                &upscore,
                &downscore,
                &mut upreliable,
                &mut downreliable,
                &mut min_score,
                ctx.pseudocost,
                ctx.mip.node_queue(),
                ctx.mip.feastol(),
            );

            if (upreliable[candidate] && downreliable[candidate]) || must_stop {
                if reset_basis {
                    let basis = self
                        .node_stack
                        .last()
                        .and_then(|frame| frame.node_basis.clone());
                    ctx.lp.set_stored_basis(basis);
                    ctx.lp.recover_basis();
                    ctx.lp.run();
                }
                return Some(candidate);
            }

            ctx.lp.set_objective_limit(ctx.mip.upper_limit());

            let (col, frac_val) = fracints[candidate];
            let down_val = frac_val.floor();
            let up_val = frac_val.ceil();
            let probe_down = !downreliable[candidate];
            let trial = if probe_down {
                DomainChange::upper(col, down_val)
            } else {
                DomainChange::lower(col, up_val)
            };

            let mut inferences = -(ctx.domain.num_changes() as i64) - 1;
            let current_orbits = self
                .node_stack
                .last()
                .and_then(|frame| frame.stabilizer_orbits.clone());
            let mut orbital_fixing = current_orbits.is_some()
                && self.orbits_valid_in_child_node(&trial, ctx.domain);

            ctx.domain.change_bound(trial);
            ctx.domain.propagate();

            if ctx.domain.infeasible() {
                orbital_fixing = false;
            }
            if orbital_fixing {
                if let Some(orbits) = &current_orbits {
                    orbits.orbital_fixing(ctx.domain);
                }
            }

            inferences += ctx.domain.num_changes() as i64;
            if ctx.domain.infeasible() {
                ctx.domain
                    .conflict_analysis_reasons(ctx.mip.conflict_pool());
                ctx.pseudocost.add_cutoff_observation(col, !probe_down);
                ctx.domain.backtrack();
                ctx.domain.clear_changed_cols();

                self.commit_opposite_branch(ctx, col, probe_down, down_val, up_val, frac_val);
                return None;
            }

            ctx.pseudocost
                .add_inference_observation(col, inferences, !probe_down);

            ctx.lp.flush_domain(ctx.domain);

            reset_basis = true;
            let old_iters = ctx.lp.num_lp_iterations();
            let status = ctx.lp.run();
            let num_iters = ctx.lp.num_lp_iterations() - old_iters;
            self.lp_iterations += num_iters;
            self.sb_lp_iterations += num_iters;

            if ctx.lp.scaled_optimal(status) {
                let node_objective = self
                    .node_stack
                    .last()
                    .map_or(f64::NEG_INFINITY, |frame| frame.lp_objective);
                let delta = if probe_down {
                    down_val - frac_val
                } else {
                    up_val - frac_val
                };

                let (sol_objective, integer_feasible) =
                    self.check_solution(ctx.mip, ctx.lp.solution());

                let mut objdelta = (sol_objective - node_objective).max(0.0);
                if objdelta <= ctx.mip.epsilon() {
                    objdelta = 0.0;
                }

                if probe_down {
                    downscore[candidate] = objdelta;
                    downreliable[candidate] = true;
                    self.mark_down_reliable_at_node(col);
                } else {
                    upscore[candidate] = objdelta;
                    upreliable[candidate] = true;
                    self.mark_up_reliable_at_node(col);
                }
                ctx.pseudocost.add_observation(col, delta, objdelta);

                // candidates driven to their floor or ceiling by this trial
                // LP bound the respective side's score as well
                for (k, &(other_col, other_frac)) in fracints.iter().enumerate() {
                    let other_down = other_frac.floor();
                    let other_up = other_frac.ceil();
                    let value = ctx.lp.solution()[other_col];
                    if value <= other_down + ctx.mip.feastol() {
                        if objdelta <= min_score
                            && ctx.domain.col_upper(other_col) <= other_down + ctx.mip.feastol()
                        {
                            ctx.pseudocost
                                .add_observation(other_col, other_down - other_frac, objdelta);
                        }
                        downscore[k] = downscore[k].min(objdelta);
                    } else if value >= other_up - ctx.mip.feastol() {
                        if objdelta <= min_score
                            && ctx.domain.col_lower(other_col) >= other_up - ctx.mip.feastol()
                        {
                            ctx.pseudocost
                                .add_observation(other_col, other_up - other_frac, objdelta);
                        }
                        upscore[k] = upscore[k].min(objdelta);
                    }
                }

                if ctx.lp.unscaled_primal_feasible(status) && integer_feasible {
                    let cutoff = self.cutoff_bound(ctx.mip);
                    let source = if self.in_heuristic {
                        crate::context::IncumbentSource::Heuristic
                    } else {
                        crate::context::IncumbentSource::Branching
                    };
                    ctx.mip.add_incumbent(ctx.lp.solution(), sol_objective, source);
                    if ctx.mip.upper_limit() < cutoff {
                        ctx.lp.set_objective_limit(ctx.mip.upper_limit());
                    }
                }

                if ctx.lp.unscaled_dual_feasible(status) {
                    if sol_objective > self.cutoff_bound(ctx.mip) {
                        self.add_bound_exceeding_conflict(ctx);
                        ctx.domain.backtrack();
                        ctx.lp.flush_domain(ctx.domain);

                        self.commit_opposite_branch(
                            ctx, col, probe_down, down_val, up_val, frac_val,
                        );
                        if num_iters > basis_threshold {
                            ctx.lp.recover_basis();
                        }
                        return None;
                    }
                } else if sol_objective > self.cutoff_bound(ctx.mip) {
                    self.add_bound_exceeding_conflict(ctx);
                    ctx.domain.propagate();
                    if ctx.domain.infeasible() {
                        ctx.domain.backtrack();
                        ctx.lp.flush_domain(ctx.domain);

                        self.commit_opposite_branch(
                            ctx, col, probe_down, down_val, up_val, frac_val,
                        );
                        if num_iters > basis_threshold {
                            ctx.lp.recover_basis();
                        }
                        return None;
                    }
                }
            } else if status == LpStatus::Infeasible {
                self.add_infeasible_conflict(ctx);
                ctx.pseudocost.add_cutoff_observation(col, !probe_down);
                ctx.domain.backtrack();
                ctx.lp.flush_domain(ctx.domain);

                self.commit_opposite_branch(ctx, col, probe_down, down_val, up_val, frac_val);
                if num_iters > basis_threshold {
                    ctx.lp.recover_basis();
                }
                return None;
            } else {
                // LP error: zero both scores so the candidate is not chosen
                // again unless nothing better exists
                downscore[candidate] = 0.0;
                upscore[candidate] = 0.0;
                downreliable[candidate] = true;
                upreliable[candidate] = true;
                self.mark_up_reliable_at_node(col);
                self.mark_down_reliable_at_node(col);
            }

            ctx.domain.backtrack();
            ctx.lp.flush_domain(ctx.domain);
            if num_iters > basis_threshold {
                ctx.lp.recover_basis();
            }
        }
    }
}
