//! Backtracking, subtree parking and node installation.

use super::{NodeFrame, Search};
use crate::context::SearchContext;
use crate::domain::{BoundKind, DomainChange};
use crate::queue::OpenNode;

impl Search {
    /// Pop fully closed frames, restoring one branching level of the domain
    /// per frame. Reopened frames are re-propagated, since conflicts learned
    /// while their sibling was explored may have killed them. Returns
    /// `false` when the stack empties.
    fn unwind_closed_frames(&mut self, ctx: &mut SearchContext) -> bool {
        while self
            .node_stack
            .last()
            .map_or(false, |frame| frame.open_subtrees == 0)
        {
            let popped = self.node_stack.pop().expect("checked non-empty");
            self.depth_offset += popped.skip_depth_count;

            if self.node_stack.is_empty() {
                ctx.domain.backtrack_to_global();
                ctx.lp.flush_domain(ctx.domain);
                return false;
            }

            let branch_chg = ctx.domain.backtrack();
            let back = self.node_stack.len() - 1;

            if self.node_stack[back].open_subtrees != 0 {
                let old_num_changes = ctx.domain.num_changes();
                let old_changed_cols = ctx.domain.num_changed_cols();
                ctx.domain.propagate();
                if let Some(orbits) = self.node_stack[back].stabilizer_orbits.clone() {
                    if !ctx.domain.infeasible() && old_num_changes != ctx.domain.num_changes() {
                        orbits.orbital_fixing(ctx.domain);
                    }
                }
                if ctx.domain.infeasible() {
                    ctx.domain.clear_changed_cols_from(old_changed_cols);
                    self.node_stack[back].open_subtrees = 0;
                }
            }

            #[cfg(debug_assertions)]
            if let (Some(chg), Some(decision)) =
                (branch_chg, self.node_stack[back].branching_decision)
            {
                debug_assert_eq!(chg.column, decision.column);
                debug_assert_eq!(chg.kind, decision.kind);
                match chg.kind {
                    BoundKind::Lower => debug_assert!(chg.value >= decision.value),
                    BoundKind::Upper => debug_assert!(chg.value <= decision.value),
                }
            }
            #[cfg(not(debug_assertions))]
            let _ = branch_chg;
        }

        true
    }

    /// Flip the current frame's branching decision to the unexplored
    /// sibling: an up branch becomes `upper(floor(value - 0.5))`, a down
    /// branch becomes `lower(ceil(value + 0.5))`. Returns the flipped
    /// change and whether the branch was a fallback branch (no fractional
    /// origin), in which case the branching point stays tied to the bound.
    fn flip_to_sibling(&mut self) -> (DomainChange, bool) {
        let frame = self.node_stack.last_mut().expect("no current node");
        debug_assert_eq!(frame.open_subtrees, 1);
        frame.open_subtrees = 0;

        let decision = frame
            .branching_decision
            .expect("half-open frame without branching decision");
        let fallback_branch = decision.value == frame.branching_point;

        let flipped = match decision.kind {
            BoundKind::Lower => DomainChange::upper(decision.column, (decision.value - 0.5).floor()),
            BoundKind::Upper => DomainChange::lower(decision.column, (decision.value + 0.5).ceil()),
        };
        frame.branching_decision = Some(flipped);
        if fallback_branch {
            frame.branching_point = flipped.value;
        }

        (flipped, fallback_branch)
    }

    /// Unwind closed subtrees and descend into the first surviving sibling.
    /// Returns `false` when the stack empties instead.
    pub fn backtrack(&mut self, ctx: &mut SearchContext) -> bool {
        self.backtrack_impl(ctx, true)
    }

    pub(crate) fn backtrack_impl(&mut self, ctx: &mut SearchContext, recover_basis: bool) -> bool {
        if self.node_stack.is_empty() {
            return false;
        }
        debug_assert_eq!(self.node_stack.last().map(|f| f.open_subtrees), Some(0));

        loop {
            if !self.unwind_closed_frames(ctx) {
                return false;
            }

            let (flipped, _) = self.flip_to_sibling();
            let domchg_pos = ctx.domain.num_changes();
            let num_changed_cols = ctx.domain.num_changed_cols();
            let pass_orbits = self.orbits_valid_in_child_node(&flipped, ctx.domain);
            ctx.domain.change_bound(flipped);

            if self.prune_flipped_sibling(ctx, pass_orbits) {
                ctx.domain.backtrack();
                ctx.domain.clear_changed_cols_from(num_changed_cols);
                self.add_pruned_weight(self.current_depth() + 1);
                continue;
            }

            self.push_sibling_frame(ctx, domchg_pos, pass_orbits);
            break;
        }

        if recover_basis {
            if let Some(basis) = self
                .node_stack
                .last()
                .and_then(|frame| frame.node_basis.clone())
            {
                ctx.lp.set_stored_basis(Some(basis));
                ctx.lp.recover_basis();
            }
        }

        true
    }

    /// Bound, propagation and orbital-fixing checks on a freshly flipped
    /// sibling. `true` means the sibling is dead.
    fn prune_flipped_sibling(&mut self, ctx: &mut SearchContext, pass_orbits: bool) -> bool {
        let lower_bound = self.node_stack.last().expect("no current node").lower_bound;
        let mut prune = lower_bound > self.cutoff_bound(ctx.mip) || ctx.domain.infeasible();
        if !prune {
            ctx.domain.propagate();
            prune = ctx.domain.infeasible();
            if prune {
                ctx.domain
                    .conflict_analysis_reasons(ctx.mip.conflict_pool());
            }
        }
        if !prune && pass_orbits {
            if let Some(orbits) = self
                .node_stack
                .last()
                .and_then(|frame| frame.stabilizer_orbits.clone())
            {
                orbits.orbital_fixing(ctx.domain);
                prune = ctx.domain.infeasible();
            }
        }
        prune
    }

    fn push_sibling_frame(&mut self, ctx: &mut SearchContext, domchg_pos: usize, pass_orbits: bool) {
        let frame = self.node_stack.last().expect("no current node");
        let mut child = NodeFrame::child(
            frame.lower_bound,
            frame.estimate,
            frame.node_basis.clone(),
            if pass_orbits {
                frame.stabilizer_orbits.clone()
            } else {
                None
            },
        );
        child.domchg_stack_pos = domchg_pos;
        self.node_stack.push(child);
        ctx.lp.flush_domain(ctx.domain);
    }

    /// Plunge variant of [`Search::backtrack`]: before descending into a
    /// flipped sibling, its directional score is compared against the
    /// inactive-minus-active score of the nearest still-open ancestor; if
    /// the ancestor's unexplored direction wins by more than feastol the
    /// sibling is parked in the shared queue and unwinding continues.
    pub fn backtrack_plunge(&mut self, ctx: &mut SearchContext) -> bool {
        if self.node_stack.is_empty() {
            return false;
        }
        debug_assert_eq!(self.node_stack.last().map(|f| f.open_subtrees), Some(0));

        loop {
            if !self.unwind_closed_frames(ctx) {
                return false;
            }

            let (flipped, fallback_branch) = self.flip_to_sibling();
            let branch_point = if fallback_branch {
                0.5
            } else {
                self.node_stack
                    .last()
                    .expect("no current node")
                    .branching_point
            };
            let node_score = match flipped.kind {
                BoundKind::Upper => ctx.pseudocost.score_down(flipped.column, branch_point),
                BoundKind::Lower => ctx.pseudocost.score_up(flipped.column, branch_point),
            };

            let domchg_pos = ctx.domain.num_changes();
            let num_changed_cols = ctx.domain.num_changed_cols();
            let pass_orbits = self.orbits_valid_in_child_node(&flipped, ctx.domain);
            ctx.domain.change_bound(flipped);

            if self.prune_flipped_sibling(ctx, pass_orbits) {
                ctx.domain.backtrack();
                ctx.domain.clear_changed_cols_from(num_changed_cols);
                self.add_pruned_weight(self.current_depth() + 1);
                continue;
            }

            if self.ancestor_dominates(ctx, node_score) {
                let mut branch_positions = Vec::new();
                let domchg_stack = ctx.domain.reduced_change_stack(&mut branch_positions);
                let back = self.node_stack.last().expect("no current node");
                ctx.mip.node_queue().emplace_node(OpenNode {
                    domchg_stack,
                    branch_positions,
                    lower_bound: back.lower_bound,
                    estimate: back.estimate,
                    depth: self.current_depth() + 2,
                });
                ctx.domain.backtrack();
                ctx.domain.clear_changed_cols_from(num_changed_cols);
                continue;
            }

            self.push_sibling_frame(ctx, domchg_pos, pass_orbits);
            break;
        }

        if let Some(basis) = self
            .node_stack
            .last()
            .and_then(|frame| frame.node_basis.clone())
        {
            ctx.lp.set_stored_basis(Some(basis));
            ctx.lp.recover_basis();
        }

        true
    }

    /// Whether the nearest still-open ancestor's unexplored direction
    /// outscores descending into a sibling worth `node_score`.
    fn ancestor_dominates(&self, ctx: &mut SearchContext, node_score: f64) -> bool {
        for i in (0..self.node_stack.len().saturating_sub(1)).rev() {
            if self.node_stack[i].open_subtrees == 0 {
                continue;
            }

            let decision = self.node_stack[i]
                .branching_decision
                .expect("open ancestor without branching decision");
            let fallback_branch = decision.value == self.node_stack[i].branching_point;
            let branch_point = if fallback_branch {
                0.5
            } else {
                self.node_stack[i].branching_point
            };

            let (score_active, score_inactive) = match decision.kind {
                BoundKind::Lower => (
                    ctx.pseudocost.score_up(decision.column, branch_point),
                    ctx.pseudocost.score_down(decision.column, branch_point),
                ),
                BoundKind::Upper => (
                    ctx.pseudocost.score_down(decision.column, branch_point),
                    ctx.pseudocost.score_up(decision.column, branch_point),
                ),
            };

            return score_inactive - score_active > node_score + ctx.mip.feastol();
        }

        false
    }

    /// Unwind to `target_depth`, closing every frame at or below it, then
    /// descend into the first sibling above. No pruning checks are applied
    /// on the way up. Returns `false` when the stack empties.
    pub fn backtrack_until_depth(&mut self, ctx: &mut SearchContext, target_depth: i32) -> bool {
        if self.node_stack.is_empty() {
            return false;
        }

        if self.current_depth() >= target_depth {
            self.cutoff_node();
        }

        while self
            .node_stack
            .last()
            .expect("checked non-empty")
            .open_subtrees
            == 0
        {
            let popped = self.node_stack.pop().expect("checked non-empty");
            self.depth_offset += popped.skip_depth_count;

            let branch_chg = ctx.domain.backtrack();
            if self.node_stack.is_empty() {
                ctx.lp.flush_domain(ctx.domain);
                return false;
            }

            #[cfg(debug_assertions)]
            if let (Some(chg), Some(decision)) = (
                branch_chg,
                self.node_stack.last().and_then(|f| f.branching_decision),
            ) {
                debug_assert_eq!(chg.column, decision.column);
                debug_assert_eq!(chg.kind, decision.kind);
            }
            #[cfg(not(debug_assertions))]
            let _ = branch_chg;

            if self.current_depth() >= target_depth {
                self.cutoff_node();
            }
        }

        let (flipped, _) = self.flip_to_sibling();
        let domchg_pos = ctx.domain.num_changes();
        let pass_orbits = self.orbits_valid_in_child_node(&flipped, ctx.domain);
        ctx.domain.change_bound(flipped);
        self.push_sibling_frame(ctx, domchg_pos, pass_orbits);

        if let Some(basis) = self
            .node_stack
            .last()
            .and_then(|frame| frame.node_basis.clone())
        {
            if basis.num_rows() == ctx.lp.num_rows() {
                ctx.lp.set_stored_basis(Some(basis));
            }
        }
        ctx.lp.recover_basis();

        true
    }

    /// Park the current node in the shared queue (or prune it if dead) and
    /// backtrack away from it.
    pub fn current_node_to_queue(&mut self, ctx: &mut SearchContext) {
        let old_changed_cols = ctx.domain.num_changed_cols();
        let mut prune =
            self.node_stack.last().expect("no current node").lower_bound > self.cutoff_bound(ctx.mip);
        if !prune {
            ctx.domain.propagate();
            ctx.domain.clear_changed_cols_from(old_changed_cols);
            prune = ctx.domain.infeasible();
            if prune {
                ctx.domain
                    .conflict_analysis_reasons(ctx.mip.conflict_pool());
            }
        }

        if !prune {
            let mut branch_positions = Vec::new();
            let domchg_stack = ctx.domain.reduced_change_stack(&mut branch_positions);
            let back = self.node_stack.last().expect("no current node");
            ctx.mip.node_queue().emplace_node(OpenNode {
                domchg_stack,
                branch_positions,
                lower_bound: back.lower_bound,
                estimate: back.estimate,
                depth: self.current_depth() + 1,
            });
        } else {
            self.add_pruned_weight(self.current_depth());
        }
        self.cutoff_node();

        self.backtrack_impl(ctx, true);
        ctx.lp.flush_domain(ctx.domain);
        if let Some(basis) = self
            .node_stack
            .last()
            .and_then(|frame| frame.node_basis.clone())
        {
            ctx.lp.set_stored_basis(Some(basis));
            ctx.lp.recover_basis();
        }
    }

    /// Park every still-open frame of the current path in the shared queue
    /// and unwind the whole stack. Dead frames are pruned instead. The most
    /// recently stored basis is kept for the next dive when its dimensions
    /// still match the LP.
    pub fn open_nodes_to_queue(&mut self, ctx: &mut SearchContext) {
        if self.node_stack.is_empty() {
            return;
        }

        let mut basis = None;
        if self.node_stack.last().expect("checked non-empty").open_subtrees == 0 {
            if let Some(taken) = self
                .node_stack
                .last_mut()
                .expect("checked non-empty")
                .node_basis
                .take()
            {
                basis = Some(taken);
            }
            self.backtrack_impl(ctx, false);
        }

        while !self.node_stack.is_empty() {
            let old_changed_cols = ctx.domain.num_changed_cols();
            let mut prune = self.node_stack.last().expect("checked non-empty").lower_bound
                > self.cutoff_bound(ctx.mip);
            if !prune {
                ctx.domain.propagate();
                ctx.domain.clear_changed_cols_from(old_changed_cols);
                prune = ctx.domain.infeasible();
                if prune {
                    ctx.domain
                        .conflict_analysis_reasons(ctx.mip.conflict_pool());
                }
            }

            if !prune {
                let mut branch_positions = Vec::new();
                let domchg_stack = ctx.domain.reduced_change_stack(&mut branch_positions);
                let back = self.node_stack.last().expect("checked non-empty");
                ctx.mip.node_queue().emplace_node(OpenNode {
                    domchg_stack,
                    branch_positions,
                    lower_bound: back.lower_bound,
                    estimate: back.estimate,
                    depth: self.current_depth() + 1,
                });
            } else {
                self.add_pruned_weight(self.current_depth());
            }

            let back = self.node_stack.last_mut().expect("checked non-empty");
            back.open_subtrees = 0;
            if let Some(taken) = back.node_basis.take() {
                basis = Some(taken);
            }

            self.backtrack_impl(ctx, false);
        }

        ctx.lp.flush_domain(ctx.domain);
        if let Some(basis) = basis {
            if basis.num_rows() == ctx.lp.num_rows() {
                ctx.lp.set_stored_basis(Some(basis));
            }
            ctx.lp.recover_basis();
        }
    }

    /// Seat an open node taken from the shared queue: replay its reduced
    /// domain-change stack, decide whether the global orbits survive its
    /// branchings, and push a fresh frame for it.
    ///
    /// Global orbits stay valid only if every branching on a
    /// symmetry-tracked column is a binary branching that does not raise a
    /// lower bound to one (an up branch on a tracked binary, or any
    /// branching on a tracked general-integer column, invalidates them).
    pub fn install_node(&mut self, ctx: &mut SearchContext, node: OpenNode) {
        ctx.domain
            .install_change_stack(&node.domchg_stack, &node.branch_positions);

        let mut orbits = None;
        if let Some(global) = ctx.mip.global_orbits() {
            let stack = ctx.domain.change_stack();
            let valid = ctx.domain.branching_positions().iter().all(|&pos| {
                let chg = stack[pos];
                if !ctx.mip.is_symmetry_tracked(chg.column) {
                    return true;
                }
                ctx.domain.is_global_binary(chg.column)
                    && !(chg.kind == BoundKind::Lower && chg.value == 1.0)
            });
            if valid {
                orbits = Some(global);
            }
        }

        let mut frame = NodeFrame::child(node.lower_bound, node.estimate, None, orbits);
        frame.domchg_stack_pos = 0;
        self.node_stack.push(frame);
        self.subroot_sol.clear();
        self.depth_offset = node.depth - 1;
    }
}
