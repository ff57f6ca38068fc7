//! Error taxonomy for the compiler core. Three named variants map
//! to the failure conditions handlers can hit deterministically; `Other`
//! catches everything else (collaborator failures, serialization, I/O in the
//! peripheral config/renderer modules).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Error)]
pub enum CompileError {
    /// A structural precondition the plan is supposed to guarantee was
    /// violated — the plan was not well-formed going in. The compiler assumes a
    /// well-formed plan, so this indicates a bug upstream of the compiler, not
    /// a user-facing validation failure.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The plan is well-formed but asks for something this compiler doesn't
    /// (yet) support, e.g. a time-spine join at a finer granularity than the
    /// configured spine provides.
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    /// The plan shape itself is malformed in a way distinct from an
    /// invariant violation — e.g. a combine-aggregated-outputs node whose
    /// parents don't all carry `COMPLETE` measures.
    #[error("malformed plan: {0}")]
    MalformedPlan(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
