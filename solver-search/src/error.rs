//! Error types for the search driver.

use thiserror::Error;

/// Errors surfaced by collaborator calls.
///
/// Node-level failures (infeasibility, cutoff, LP trouble) are not errors;
/// they are [`crate::search::NodeResult`] variants. These errors cover the
/// genuinely fallible collaborator operations. A rejected conflict is not
/// fatal: the driver logs it and continues.
#[derive(Error, Debug)]
pub enum SearchError {
    /// Conflict pool refused a derived constraint.
    #[error("conflict pool rejected constraint: {0}")]
    ConflictRejected(String),

    /// Cut generation from a dual proof failed.
    #[error("cut generation failed: {0}")]
    CutGeneration(String),

    /// A fallback LP relaxation could not be built.
    #[error("LP relaxation unavailable: {0}")]
    Relaxation(String),
}

/// Result type for fallible search operations.
pub type SearchResult<T> = Result<T, SearchError>;
