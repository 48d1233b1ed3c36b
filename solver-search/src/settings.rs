//! Configuration settings for the search driver.

/// Rule deciding which child of a branching is descended into first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChildSelection {
    /// Always take the up branch.
    Up,

    /// Always take the down branch.
    Down,

    /// Weight directions by inference rate and distance to the subroot
    /// (or global root) LP solution.
    #[default]
    RootSolDistance,

    /// Round against the sign of the objective coefficient.
    ObjectiveSign,

    /// Pick a random direction.
    Random,

    /// Descend the direction with the smaller pseudocost.
    BestPseudocost,

    /// Descend the direction with the larger pseudocost.
    WorstPseudocost,

    /// Follow the direction with more open nodes in the shared queue.
    OpenNodeDisjunction,

    /// Combine inference averages and pseudocosts; the default for sub-MIPs.
    HybridInferenceCost,
}

/// Search driver settings.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    /// Child-selection rule applied after a branching variable is fixed.
    pub child_selection: ChildSelection,

    /// Base budget of strong-branching simplex iterations. The effective
    /// budget grows with half the non-heuristic, non-probe LP iterations
    /// spent so far.
    pub strong_branching_base_iters: i64,

    /// A trial LP that took more simplex iterations than this gets its
    /// parent basis restored before the next probe.
    pub basis_restart_threshold: i64,

    /// LP degeneracy factor at or above which reliability probing is
    /// disabled for the node.
    pub degeneracy_disable_threshold: f64,

    /// Seed for the RNG behind [`ChildSelection::Random`].
    pub random_seed: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            child_selection: ChildSelection::default(),
            strong_branching_base_iters: 100_000,
            basis_restart_threshold: 20,
            degeneracy_disable_threshold: 10.0,
            random_seed: 0,
        }
    }
}

impl SearchSettings {
    /// Settings for a driver running inside a sub-MIP.
    pub fn for_sub_mip() -> Self {
        Self {
            child_selection: ChildSelection::HybridInferenceCost,
            ..Self::default()
        }
    }

    /// Set the child-selection rule.
    pub fn with_child_selection(mut self, rule: ChildSelection) -> Self {
        self.child_selection = rule;
        self
    }

    /// Set the RNG seed.
    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }
}
