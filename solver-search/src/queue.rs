//! Shared node queue contract.

use crate::domain::DomainChange;

/// A parked open subtree, detached from any driver.
///
/// Carries everything needed to re-seat the node in a fresh driver: the
/// reduced domain-change stack with its branching positions, the dual bound,
/// the pseudocost estimate and the logical depth (1-based, so a parked root
/// child has depth 1).
#[derive(Debug, Clone)]
pub struct OpenNode {
    /// Reduced domain-change stack for replay.
    pub domchg_stack: Vec<DomainChange>,

    /// Branching positions within `domchg_stack`.
    pub branch_positions: Vec<usize>,

    /// Best dual bound known for the subtree.
    pub lower_bound: f64,

    /// Pseudocost estimate of the best attainable objective.
    pub estimate: f64,

    /// 1-based depth of the node in the global tree.
    pub depth: i32,
}

/// The shared queue of open nodes.
///
/// All methods take `&self`: the queue is shared between concurrently
/// running drivers and synchronises internally.
pub trait NodeQueue {
    /// Park an open node.
    fn emplace_node(&self, node: OpenNode);

    /// Number of queued nodes whose path contains an up branch on `col`.
    fn num_nodes_up(&self, col: usize) -> i64;

    /// Number of queued nodes whose path contains a down branch on `col`.
    fn num_nodes_down(&self, col: usize) -> i64;
}
