//! Test collaborators: a bound-vector domain with activity propagation, a
//! scripted LP oracle, a counting pseudocost store and recording pools.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

use sprs::CsMat;

use solver_search::context::{
    CutGenerator, IncumbentSource, MipContext, SearchStats,
};
use solver_search::domain::{BoundKind, ConflictPool, DomainChange, LocalDomain};
use solver_search::error::{SearchError, SearchResult};
use solver_search::pseudocost::PseudocostStore;
use solver_search::queue::{NodeQueue, OpenNode};
use solver_search::relaxation::{FallbackMode, LpBasis, LpRelaxation, LpStatus, SharedBasis};
use solver_search::symmetry::{SharedOrbits, StabilizerOrbits};

const TOL: f64 = 1e-9;

// === Domain ===

struct StackEntry {
    change: DomainChange,
    old_value: f64,
    branching: bool,
}

/// Bound-vector domain with an undo stack and activity-based propagation
/// over a sparse row set `A x >= b`.
pub struct VecDomain {
    lower: Vec<f64>,
    upper: Vec<f64>,
    global_lower: Vec<f64>,
    global_upper: Vec<f64>,
    integer: Vec<bool>,
    rows: Option<CsMat<f64>>,
    rhs: Vec<f64>,

    entries: Vec<StackEntry>,
    stack: Vec<DomainChange>,
    branch_positions: Vec<usize>,
    changed_cols: Vec<usize>,
    infeasible: bool,

    pub conflict_calls: Cell<usize>,
}

impl VecDomain {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>, integer: Vec<bool>) -> Self {
        Self {
            global_lower: lower.clone(),
            global_upper: upper.clone(),
            lower,
            upper,
            integer,
            rows: None,
            rhs: Vec::new(),
            entries: Vec::new(),
            stack: Vec::new(),
            branch_positions: Vec::new(),
            changed_cols: Vec::new(),
            infeasible: false,
            conflict_calls: Cell::new(0),
        }
    }

    pub fn binary(num_cols: usize) -> Self {
        Self::new(vec![0.0; num_cols], vec![1.0; num_cols], vec![true; num_cols])
    }

    /// Attach constraint rows `A x >= b` used by propagation.
    pub fn with_rows(mut self, rows: CsMat<f64>, rhs: Vec<f64>) -> Self {
        assert_eq!(rows.rows(), rhs.len());
        self.rows = Some(rows);
        self.rhs = rhs;
        self
    }

    fn apply(&mut self, change: DomainChange, branching: bool) {
        let old_value = match change.kind {
            BoundKind::Lower => std::mem::replace(&mut self.lower[change.column], change.value),
            BoundKind::Upper => std::mem::replace(&mut self.upper[change.column], change.value),
        };
        if branching {
            self.branch_positions.push(self.entries.len());
        }
        self.entries.push(StackEntry {
            change,
            old_value,
            branching,
        });
        self.stack.push(change);
        self.changed_cols.push(change.column);
        if self.lower[change.column] > self.upper[change.column] + TOL {
            self.infeasible = true;
        }
    }

    fn undo_one(&mut self) -> StackEntry {
        let entry = self.entries.pop().expect("empty change stack");
        match entry.change.kind {
            BoundKind::Lower => self.lower[entry.change.column] = entry.old_value,
            BoundKind::Upper => self.upper[entry.change.column] = entry.old_value,
        }
        self.stack.pop();
        if entry.branching {
            self.branch_positions.pop();
        }
        entry
    }

    fn recheck_infeasible(&mut self) {
        self.infeasible = (0..self.lower.len()).any(|c| self.lower[c] > self.upper[c] + TOL);
    }
}

impl LocalDomain for VecDomain {
    fn num_changes(&self) -> usize {
        self.stack.len()
    }

    fn change_stack(&self) -> &[DomainChange] {
        &self.stack
    }

    fn branching_positions(&self) -> &[usize] {
        &self.branch_positions
    }

    fn col_lower(&self, col: usize) -> f64 {
        self.lower[col]
    }

    fn col_upper(&self, col: usize) -> f64 {
        self.upper[col]
    }

    fn is_binary(&self, col: usize) -> bool {
        self.integer[col] && self.lower[col] == 0.0 && self.upper[col] == 1.0
    }

    fn is_global_binary(&self, col: usize) -> bool {
        self.integer[col] && self.global_lower[col] == 0.0 && self.global_upper[col] == 1.0
    }

    fn change_bound(&mut self, change: DomainChange) {
        self.apply(change, true);
    }

    fn tighten_bound(&mut self, change: DomainChange) {
        self.apply(change, false);
    }

    fn propagate(&mut self) {
        if self.infeasible {
            return;
        }
        let Some(rows) = self.rows.clone() else {
            return;
        };

        for _ in 0..16 {
            let mut changed = false;
            for (row, vec) in rows.outer_iterator().enumerate() {
                let mut max_activity = 0.0f64;
                for (col, &coef) in vec.iter() {
                    max_activity += if coef > 0.0 {
                        coef * self.upper[col]
                    } else {
                        coef * self.lower[col]
                    };
                }
                if max_activity < self.rhs[row] - TOL {
                    self.infeasible = true;
                    return;
                }
                if !max_activity.is_finite() {
                    continue;
                }

                for (col, &coef) in vec.iter() {
                    let contribution = if coef > 0.0 {
                        coef * self.upper[col]
                    } else {
                        coef * self.lower[col]
                    };
                    let residual = max_activity - contribution;
                    let implied = (self.rhs[row] - residual) / coef;
                    if coef > 0.0 {
                        let mut new_lower = implied;
                        if self.integer[col] {
                            new_lower = (new_lower - TOL).ceil();
                        }
                        if new_lower > self.lower[col] + TOL {
                            self.apply(DomainChange::lower(col, new_lower), false);
                            changed = true;
                        }
                    } else {
                        let mut new_upper = implied;
                        if self.integer[col] {
                            new_upper = (new_upper + TOL).floor();
                        }
                        if new_upper < self.upper[col] - TOL {
                            self.apply(DomainChange::upper(col, new_upper), false);
                            changed = true;
                        }
                    }
                    if self.infeasible {
                        return;
                    }
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn infeasible(&self) -> bool {
        self.infeasible
    }

    fn backtrack(&mut self) -> Option<DomainChange> {
        self.branch_positions.last().copied()?;
        loop {
            let entry = self.undo_one();
            if entry.branching {
                self.recheck_infeasible();
                return Some(entry.change);
            }
        }
    }

    fn backtrack_to_global(&mut self) {
        while !self.entries.is_empty() {
            self.undo_one();
        }
        self.changed_cols.clear();
        self.infeasible = false;
    }

    fn num_changed_cols(&self) -> usize {
        self.changed_cols.len()
    }

    fn clear_changed_cols(&mut self) {
        self.changed_cols.clear();
    }

    fn clear_changed_cols_from(&mut self, first: usize) {
        self.changed_cols.truncate(first);
    }

    fn reduced_change_stack(&self, branch_positions: &mut Vec<usize>) -> Vec<DomainChange> {
        branch_positions.clear();
        branch_positions.extend_from_slice(&self.branch_positions);
        self.stack.clone()
    }

    fn install_change_stack(&mut self, stack: &[DomainChange], branch_positions: &[usize]) {
        self.backtrack_to_global();
        for (pos, &change) in stack.iter().enumerate() {
            if branch_positions.contains(&pos) {
                self.change_bound(change);
            } else {
                self.tighten_bound(change);
            }
        }
        self.changed_cols.clear();
    }

    fn conflict_analysis(
        &mut self,
        inds: &[usize],
        vals: &[f64],
        rhs: f64,
        pool: &dyn ConflictPool,
    ) {
        self.conflict_calls.set(self.conflict_calls.get() + 1);
        let _ = pool.add_conflict(inds, vals, rhs);
    }

    fn conflict_analysis_reasons(&mut self, pool: &dyn ConflictPool) {
        self.conflict_calls.set(self.conflict_calls.get() + 1);
        let _ = pool.add_conflict(&[], &[], 0.0);
    }
}

// === LP oracle ===

pub struct TestBasis {
    pub rows: usize,
}

impl LpBasis for TestBasis {
    fn num_rows(&self) -> usize {
        self.rows
    }
}

/// One scripted solve outcome.
#[derive(Clone)]
pub struct LpOutcome {
    pub status: LpStatus,
    pub objective: f64,
    pub solution: Vec<f64>,
    pub fractional: Vec<(usize, f64)>,
    pub iterations: i64,
    pub degeneracy: f64,
    pub dual_proof: Option<(Vec<usize>, Vec<f64>, f64)>,
    pub objective_bound_reason: bool,
}

impl LpOutcome {
    pub fn optimal(objective: f64, solution: Vec<f64>, fractional: Vec<(usize, f64)>) -> Self {
        Self {
            status: LpStatus::Optimal,
            objective,
            solution,
            fractional,
            iterations: 0,
            degeneracy: 1.0,
            dual_proof: None,
            objective_bound_reason: false,
        }
    }

    pub fn infeasible() -> Self {
        Self {
            status: LpStatus::Infeasible,
            objective: f64::INFINITY,
            solution: Vec::new(),
            fractional: Vec::new(),
            iterations: 0,
            degeneracy: 1.0,
            dual_proof: None,
            objective_bound_reason: false,
        }
    }

    pub fn error() -> Self {
        Self {
            status: LpStatus::Error,
            objective: f64::NEG_INFINITY,
            solution: Vec::new(),
            fractional: Vec::new(),
            iterations: 0,
            degeneracy: 1.0,
            dual_proof: None,
            objective_bound_reason: false,
        }
    }

    pub fn with_proof(mut self, inds: Vec<usize>, vals: Vec<f64>, rhs: f64) -> Self {
        self.dual_proof = Some((inds, vals, rhs));
        self
    }

    pub fn with_iterations(mut self, iterations: i64) -> Self {
        self.iterations = iterations;
        self
    }
}

/// LP oracle replaying a scripted sequence of outcomes.
pub struct ScriptedLp {
    script: VecDeque<LpOutcome>,
    current: Option<LpOutcome>,
    status: LpStatus,
    total_iterations: i64,
    stored: Option<SharedBasis>,
    num_rows: usize,

    pub flush_count: usize,
    pub recover_count: usize,
    pub fallback_modes: Rc<RefCell<Vec<FallbackMode>>>,
    pub objective_limits: Vec<f64>,
}

impl ScriptedLp {
    pub fn new(outcomes: Vec<LpOutcome>) -> Self {
        Self {
            script: outcomes.into(),
            current: None,
            status: LpStatus::NotSet,
            total_iterations: 0,
            stored: None,
            num_rows: 1,
            flush_count: 0,
            recover_count: 0,
            fallback_modes: Rc::new(RefCell::new(Vec::new())),
            objective_limits: Vec::new(),
        }
    }

    pub fn with_mode_log(mut self, log: Rc<RefCell<Vec<FallbackMode>>>) -> Self {
        self.fallback_modes = log;
        self
    }

    fn solve(&mut self) -> LpStatus {
        let outcome = self
            .script
            .pop_front()
            .expect("scripted LP ran out of outcomes");
        self.total_iterations += outcome.iterations;
        self.status = outcome.status;
        self.current = Some(outcome);
        self.status
    }
}

impl LpRelaxation for ScriptedLp {
    fn flush_domain(&mut self, domain: &mut dyn LocalDomain) {
        self.flush_count += 1;
        domain.clear_changed_cols();
    }

    fn set_objective_limit(&mut self, limit: f64) {
        self.objective_limits.push(limit);
    }

    fn run(&mut self) -> LpStatus {
        self.solve()
    }

    fn resolve(&mut self, _domain: &mut dyn LocalDomain) -> LpStatus {
        self.solve()
    }

    fn status(&self) -> LpStatus {
        self.status
    }

    fn solution(&self) -> &[f64] {
        match &self.current {
            Some(outcome) => &outcome.solution,
            None => &[],
        }
    }

    fn objective(&self) -> f64 {
        self.current
            .as_ref()
            .map_or(f64::NEG_INFINITY, |o| o.objective)
    }

    fn fractional_integers(&self) -> &[(usize, f64)] {
        match &self.current {
            Some(outcome) => &outcome.fractional,
            None => &[],
        }
    }

    fn store_basis(&mut self) {
        self.stored = Some(Arc::new(TestBasis {
            rows: self.num_rows,
        }));
    }

    fn stored_basis(&self) -> Option<SharedBasis> {
        self.stored.clone()
    }

    fn set_stored_basis(&mut self, basis: Option<SharedBasis>) {
        self.stored = basis;
    }

    fn recover_basis(&mut self) {
        self.recover_count += 1;
    }

    fn num_rows(&self) -> usize {
        self.num_rows
    }

    fn num_lp_iterations(&self) -> i64 {
        self.total_iterations
    }

    fn compute_dual_proof(
        &mut self,
        _upper_limit: f64,
        inds: &mut Vec<usize>,
        vals: &mut Vec<f64>,
        rhs: &mut f64,
    ) -> bool {
        match self.current.as_ref().and_then(|o| o.dual_proof.clone()) {
            Some((pi, pv, pr)) => {
                *inds = pi;
                *vals = pv;
                *rhs = pr;
                true
            }
            None => false,
        }
    }

    fn compute_dual_inf_proof(
        &mut self,
        inds: &mut Vec<usize>,
        vals: &mut Vec<f64>,
        rhs: &mut f64,
    ) -> bool {
        self.compute_dual_proof(0.0, inds, vals, rhs)
    }

    fn compute_degeneracy(&mut self, _domain: &dyn LocalDomain) -> f64 {
        self.current.as_ref().map_or(1.0, |o| o.degeneracy)
    }

    fn compute_best_estimate(&self, _pseudocost: &dyn PseudocostStore) -> f64 {
        self.objective()
    }

    fn reduced_cost_fixing(&self, _cutoff: f64, _domain: &mut dyn LocalDomain) {}

    fn infeasible_due_to_objective_bound(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|o| o.objective_bound_reason)
    }

    fn reset_iteration_limit(&mut self) {}

    fn set_fallback_mode(&mut self, mode: FallbackMode) {
        self.fallback_modes.borrow_mut().push(mode);
    }
}

// === Pseudocost ===

/// Pseudocost store with running averages and call counters.
pub struct CountingPseudocost {
    up_cost: Vec<f64>,
    down_cost: Vec<f64>,
    up_count: Vec<i64>,
    down_count: Vec<i64>,
    up_inferences: Vec<f64>,
    down_inferences: Vec<f64>,
    min_reliable: i32,
    degeneracy: f64,

    pub observation_count: usize,
    pub cutoff_count: usize,
    pub inference_count: usize,

    pub score_up_override: HashMap<usize, f64>,
    pub score_down_override: HashMap<usize, f64>,
}

impl CountingPseudocost {
    pub fn new(num_cols: usize) -> Self {
        Self {
            up_cost: vec![1.0; num_cols],
            down_cost: vec![1.0; num_cols],
            up_count: vec![0; num_cols],
            down_count: vec![0; num_cols],
            up_inferences: vec![0.0; num_cols],
            down_inferences: vec![0.0; num_cols],
            min_reliable: 0,
            degeneracy: 1.0,
            observation_count: 0,
            cutoff_count: 0,
            inference_count: 0,
            score_up_override: HashMap::new(),
            score_down_override: HashMap::new(),
        }
    }

    pub fn with_min_reliable(mut self, min_reliable: i32) -> Self {
        self.min_reliable = min_reliable;
        self
    }
}

impl PseudocostStore for CountingPseudocost {
    fn is_reliable(&self, col: usize) -> bool {
        self.up_count[col].min(self.down_count[col]) >= self.min_reliable as i64
    }

    fn min_reliable(&self) -> i32 {
        self.min_reliable
    }

    fn set_min_reliable(&mut self, min_reliable: i32) {
        self.min_reliable = min_reliable;
    }

    fn set_degeneracy_factor(&mut self, factor: f64) {
        self.degeneracy = factor;
    }

    fn pseudocost_up(&self, col: usize, frac_val: f64, offset: f64) -> f64 {
        (self.up_cost[col] * (frac_val.ceil() - frac_val)).max(offset)
    }

    fn pseudocost_down(&self, col: usize, frac_val: f64, offset: f64) -> f64 {
        (self.down_cost[col] * (frac_val - frac_val.floor())).max(offset)
    }

    fn score(&self, col: usize, frac_val: f64) -> f64 {
        self.pseudocost_up(col, frac_val, 0.0) * self.pseudocost_down(col, frac_val, 0.0)
    }

    fn score_deltas(&self, _col: usize, up_delta: f64, down_delta: f64) -> f64 {
        (up_delta.max(0.0) + 1e-6) * (down_delta.max(0.0) + 1e-6)
    }

    fn score_up(&self, col: usize, frac_val: f64) -> f64 {
        self.score_up_override
            .get(&col)
            .copied()
            .unwrap_or_else(|| self.pseudocost_up(col, frac_val, 0.0))
    }

    fn score_down(&self, col: usize, frac_val: f64) -> f64 {
        self.score_down_override
            .get(&col)
            .copied()
            .unwrap_or_else(|| self.pseudocost_down(col, frac_val, 0.0))
    }

    fn add_observation(&mut self, col: usize, delta: f64, objdelta: f64) {
        self.observation_count += 1;
        let unit = objdelta / delta.abs().max(1e-9);
        if delta > 0.0 {
            let count = self.up_count[col] as f64;
            self.up_cost[col] = (self.up_cost[col] * count + unit) / (count + 1.0);
            self.up_count[col] += 1;
        } else {
            let count = self.down_count[col] as f64;
            self.down_cost[col] = (self.down_cost[col] * count + unit) / (count + 1.0);
            self.down_count[col] += 1;
        }
    }

    fn add_cutoff_observation(&mut self, col: usize, up_branch: bool) {
        self.cutoff_count += 1;
        if up_branch {
            self.up_count[col] += 1;
        } else {
            self.down_count[col] += 1;
        }
    }

    fn add_inference_observation(&mut self, col: usize, inferences: i64, up_branch: bool) {
        self.inference_count += 1;
        let value = inferences as f64;
        if up_branch {
            self.up_inferences[col] = 0.5 * (self.up_inferences[col] + value);
        } else {
            self.down_inferences[col] = 0.5 * (self.down_inferences[col] + value);
        }
    }

    fn avg_inferences_up(&self, col: usize) -> f64 {
        self.up_inferences[col]
    }

    fn avg_inferences_down(&self, col: usize) -> f64 {
        self.down_inferences[col]
    }
}

// === Pools, queue, symmetry ===

#[derive(Default)]
pub struct RecordingPool {
    pub entries: RefCell<Vec<(Vec<usize>, Vec<f64>, f64)>>,
    pub reject: Cell<bool>,
}

impl ConflictPool for RecordingPool {
    fn add_conflict(&self, inds: &[usize], vals: &[f64], rhs: f64) -> SearchResult<()> {
        if self.reject.get() {
            return Err(SearchError::ConflictRejected("pool full".into()));
        }
        self.entries
            .borrow_mut()
            .push((inds.to_vec(), vals.to_vec(), rhs));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingCutGen {
    pub calls: Cell<usize>,
    pub fail: Cell<bool>,
}

impl CutGenerator for RecordingCutGen {
    fn generate_conflict(
        &self,
        _domain: &mut dyn LocalDomain,
        _inds: &mut Vec<usize>,
        _vals: &mut Vec<f64>,
        _rhs: &mut f64,
    ) -> SearchResult<()> {
        self.calls.set(self.calls.get() + 1);
        if self.fail.get() {
            return Err(SearchError::CutGeneration("numerics".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct VecQueue {
    pub nodes: RefCell<Vec<OpenNode>>,
    pub up_counts: RefCell<HashMap<usize, i64>>,
    pub down_counts: RefCell<HashMap<usize, i64>>,
}

impl NodeQueue for VecQueue {
    fn emplace_node(&self, node: OpenNode) {
        self.nodes.borrow_mut().push(node);
    }

    fn num_nodes_up(&self, col: usize) -> i64 {
        self.up_counts.borrow().get(&col).copied().unwrap_or(0)
    }

    fn num_nodes_down(&self, col: usize) -> i64 {
        self.down_counts.borrow().get(&col).copied().unwrap_or(0)
    }
}

pub struct TestOrbits {
    pub cols: Vec<usize>,
    pub stabilized: Vec<usize>,
}

impl StabilizerOrbits for TestOrbits {
    fn orbit_cols(&self) -> &[usize] {
        &self.cols
    }

    fn is_stabilized(&self, col: usize) -> bool {
        self.stabilized.contains(&col)
    }

    fn orbital_fixing(&self, _domain: &mut dyn LocalDomain) -> usize {
        0
    }
}

// === MIP context ===

/// Shared-state double with interior mutability throughout.
pub struct TestMip {
    pub num_cols: usize,
    pub col_cost: Vec<f64>,
    pub integer: Vec<bool>,
    pub feastol: f64,
    pub epsilon: f64,
    pub upper_limit: Cell<f64>,
    pub incumbents: RefCell<Vec<(Vec<f64>, f64, IncumbentSource)>>,
    pub limits_hit: Cell<bool>,
    pub pool: RecordingPool,
    pub cutgen: RecordingCutGen,
    pub queue: VecQueue,
    pub stabilizer: Option<SharedOrbits>,
    pub global: Option<SharedOrbits>,
    pub symmetry_tracked: Vec<usize>,
    pub root_sol: Vec<f64>,
    pub stats: RefCell<SearchStats>,
    pub fallback_script: RefCell<Option<Vec<LpOutcome>>>,
    pub fallback_modes: Rc<RefCell<Vec<FallbackMode>>>,
    pub fallback_builds: Cell<usize>,
}

impl TestMip {
    pub fn new(num_cols: usize) -> Self {
        Self {
            num_cols,
            col_cost: vec![1.0; num_cols],
            integer: vec![true; num_cols],
            feastol: 1e-6,
            epsilon: 1e-9,
            upper_limit: Cell::new(f64::INFINITY),
            incumbents: RefCell::new(Vec::new()),
            limits_hit: Cell::new(false),
            pool: RecordingPool::default(),
            cutgen: RecordingCutGen::default(),
            queue: VecQueue::default(),
            stabilizer: None,
            global: None,
            symmetry_tracked: Vec::new(),
            root_sol: Vec::new(),
            stats: RefCell::new(SearchStats::default()),
            fallback_script: RefCell::new(None),
            fallback_modes: Rc::new(RefCell::new(Vec::new())),
            fallback_builds: Cell::new(0),
        }
    }
}

impl MipContext for TestMip {
    fn num_cols(&self) -> usize {
        self.num_cols
    }

    fn col_cost(&self, col: usize) -> f64 {
        self.col_cost[col]
    }

    fn is_integer(&self, col: usize) -> bool {
        self.integer[col]
    }

    fn feastol(&self) -> f64 {
        self.feastol
    }

    fn epsilon(&self) -> f64 {
        self.epsilon
    }

    fn upper_limit(&self) -> f64 {
        self.upper_limit.get()
    }

    fn global_infeasible(&self) -> bool {
        false
    }

    fn add_incumbent(&self, solution: &[f64], objective: f64, source: IncumbentSource) {
        self.incumbents
            .borrow_mut()
            .push((solution.to_vec(), objective, source));
        if objective < self.upper_limit.get() {
            self.upper_limit.set(objective);
        }
    }

    fn check_limits(&self) -> bool {
        self.limits_hit.get()
    }

    fn conflict_pool(&self) -> &dyn ConflictPool {
        &self.pool
    }

    fn cut_generator(&self) -> &dyn CutGenerator {
        &self.cutgen
    }

    fn node_queue(&self) -> &dyn NodeQueue {
        &self.queue
    }

    fn has_symmetries(&self) -> bool {
        self.stabilizer.is_some() || self.global.is_some()
    }

    fn compute_stabilizer_orbits(&self, _domain: &dyn LocalDomain) -> Option<SharedOrbits> {
        self.stabilizer.clone()
    }

    fn global_orbits(&self) -> Option<SharedOrbits> {
        self.global.clone()
    }

    fn is_symmetry_tracked(&self, col: usize) -> bool {
        self.symmetry_tracked.contains(&col)
    }

    fn root_lp_solution(&self) -> &[f64] {
        &self.root_sol
    }

    fn statistics(&self) -> SearchStats {
        *self.stats.borrow()
    }

    fn flush_statistics(&self, delta: &SearchStats) {
        let mut stats = self.stats.borrow_mut();
        stats.nodes += delta.nodes;
        stats.tree_weight += delta.tree_weight;
        stats.lp_iterations += delta.lp_iterations;
        stats.heuristic_lp_iterations += delta.heuristic_lp_iterations;
        stats.sb_lp_iterations += delta.sb_lp_iterations;
    }

    fn build_all_rows_lp(
        &self,
        _domain: &dyn LocalDomain,
    ) -> SearchResult<Box<dyn LpRelaxation + '_>> {
        self.fallback_builds.set(self.fallback_builds.get() + 1);
        match self.fallback_script.borrow_mut().take() {
            Some(outcomes) => Ok(Box::new(
                ScriptedLp::new(outcomes).with_mode_log(Rc::clone(&self.fallback_modes)),
            )),
            None => Err(SearchError::Relaxation("no fallback model".into())),
        }
    }
}
