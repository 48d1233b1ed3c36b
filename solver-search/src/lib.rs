//! Branch-and-bound search driver for mixed-integer linear optimization.
//!
//! This crate implements the tree-search worker of a MIP solver: given an LP
//! relaxation oracle, a local domain with propagation, a pseudocost model and
//! the shared pools/queues of the enclosing solver, it explores the binary
//! tree of branching decisions with an explicit node stack, prunes subtrees by
//! bounds and infeasibility, learns conflicts from failed nodes, discovers
//! incumbents and hands open subtrees back to a shared node queue.
//!
//! The collaborators (LP solver, domain/propagation engine, pseudocost store,
//! cut and conflict pools, node queue, symmetry data) are external and reached
//! through the contracts in [`relaxation`], [`domain`], [`pseudocost`],
//! [`queue`], [`symmetry`] and [`context`]. A driver instance is
//! single-threaded; the shared collaborators are expected to be safe under
//! concurrent access from several drivers.

#![warn(missing_docs)]

pub mod context;
pub mod domain;
pub mod error;
pub mod numerics;
pub mod pseudocost;
pub mod queue;
pub mod relaxation;
pub mod search;
pub mod settings;
pub mod symmetry;

pub use context::{MipContext, SearchContext};
pub use error::{SearchError, SearchResult};
pub use search::{NodeResult, Search};
pub use settings::{ChildSelection, SearchSettings};
