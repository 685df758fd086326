//! Errors of an analysis run

use std::{error, fmt};

/// Why an analysis was interrupted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptReason {
    /// The walltime limit was exceeded
    Timeout,
    /// Shutdown was requested, for example by the user or another component
    Requested(String),
}

impl fmt::Display for InterruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptReason::Timeout => write!(f, "walltime limit exceeded"),
            InterruptReason::Requested(reason) => write!(f, "{reason}"),
        }
    }
}

/// Errors that abort an analysis run
///
/// None of these errors is retried: each one is turned into an inconclusive
/// [`crate::result::AnalysisResult`].
#[derive(Debug)]
pub enum CpaError {
    /// A domain cannot handle a construct of the program
    UnrecognizedCode(String),
    /// Cooperative shutdown was requested
    Interrupted(InterruptReason),
    /// The solver could not decide a query
    SolverUnknown,
    /// Communication with the solver failed
    Solver(Box<dyn error::Error + Send + Sync>),
    /// Refinement could not make progress on an infeasible path
    RefinementFailed(String),
}

impl CpaError {
    /// Create a [`CpaError::UnrecognizedCode`]
    pub fn unrecognized(msg: impl ToString) -> Self {
        CpaError::UnrecognizedCode(msg.to_string())
    }

    /// Check whether the error was caused by a shutdown request
    pub fn is_interrupt(&self) -> bool {
        matches!(self, CpaError::Interrupted(_))
    }
}

impl fmt::Display for CpaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpaError::UnrecognizedCode(msg) => write!(f, "Unsupported construct: {msg}"),
            CpaError::Interrupted(reason) => write!(f, "Analysis interrupted: {reason}"),
            CpaError::SolverUnknown => write!(f, "Solver returned unknown"),
            CpaError::Solver(err) => write!(f, "Solver failure: {err}"),
            CpaError::RefinementFailed(msg) => write!(f, "Refinement failed: {msg}"),
        }
    }
}

impl error::Error for CpaError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            CpaError::Solver(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}
