//! Node frames of the search stack.

use crate::domain::DomainChange;
use crate::relaxation::SharedBasis;
use crate::symmetry::SharedOrbits;

/// One frame of the root-to-leaf path, one per depth.
///
/// A frame starts with both children unexplored (`open_subtrees == 2`),
/// drops to 1 once a branching descends into one child and to 0 when the
/// subtree is fully closed (pruned, solved, or both children explored).
#[derive(Clone)]
pub struct NodeFrame {
    /// Best dual bound known for this subtree.
    pub lower_bound: f64,

    /// Pseudocost estimate of the best attainable objective.
    pub estimate: f64,

    /// LP relaxation objective at this node; `-inf` until solved.
    pub lp_objective: f64,

    /// The fractional LP value that motivated the branching. Distinct from
    /// the branching decision's bound value, which is its floor or ceiling.
    pub branching_point: f64,

    /// The bound change of the child currently descended into.
    pub branching_decision: Option<DomainChange>,

    /// Unexplored subtrees below this frame: 2, 1 or 0.
    pub open_subtrees: u8,

    /// Added to the depth offset when this frame is popped, so that
    /// one-sided branches do not count as tree depth.
    pub skip_depth_count: i32,

    /// Index into the domain-change stack where this frame started.
    pub domchg_stack_pos: usize,

    /// Shared LP warm-start, inherited from the parent until this node
    /// solves its own LP.
    pub node_basis: Option<SharedBasis>,

    /// Shared stabilizer orbits valid for the branchings on the path.
    pub stabilizer_orbits: Option<SharedOrbits>,
}

impl NodeFrame {
    /// Fresh frame with unknown bounds, as created for a new root.
    pub fn new() -> Self {
        Self {
            lower_bound: f64::NEG_INFINITY,
            estimate: f64::NEG_INFINITY,
            lp_objective: f64::NEG_INFINITY,
            branching_point: f64::NAN,
            branching_decision: None,
            open_subtrees: 2,
            skip_depth_count: 0,
            domchg_stack_pos: 0,
            node_basis: None,
            stabilizer_orbits: None,
        }
    }

    /// Child frame inheriting the parent's bound, estimate, warm-start and
    /// (conditionally) stabilizer orbits.
    pub fn child(
        lower_bound: f64,
        estimate: f64,
        node_basis: Option<SharedBasis>,
        stabilizer_orbits: Option<SharedOrbits>,
    ) -> Self {
        Self {
            lower_bound,
            estimate,
            node_basis,
            stabilizer_orbits,
            ..Self::new()
        }
    }
}

impl Default for NodeFrame {
    fn default() -> Self {
        Self::new()
    }
}
