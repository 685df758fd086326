//! Interval invariants generated alongside the main analysis
//!
//! The [`generator::InvariantGenerator`] explores the whole program with the
//! interval analysis. Its result is an [`supplier::InvariantSupplier`] that
//! lets the main analysis drop target states at locations that can never be
//! reached. If the exploration finds no target state at all, the generator
//! proves the program safe and may stop the main analysis.

use std::{error, fmt, io};

use cpa_core::error::CpaError;

pub mod generator;
pub mod supplier;

/// Errors while generating invariants
#[derive(Debug)]
pub enum InvariantGenerationError {
    /// The runtime of the generator could not be set up
    Runtime(io::Error),
    /// The fixpoint computation failed or was interrupted
    Analysis(CpaError),
    /// The generator task ended without a result
    TaskFailed(String),
    /// An earlier attempt to generate the invariants failed
    Unavailable,
}

impl fmt::Display for InvariantGenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantGenerationError::Runtime(err) => {
                write!(f, "Failed to start the invariant generator: {err}")
            }
            InvariantGenerationError::Analysis(err) => {
                write!(f, "Invariant generation failed: {err}")
            }
            InvariantGenerationError::TaskFailed(msg) => {
                write!(f, "Invariant generation task failed: {msg}")
            }
            InvariantGenerationError::Unavailable => {
                write!(f, "Invariants are unavailable after an earlier failure")
            }
        }
    }
}

impl error::Error for InvariantGenerationError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            InvariantGenerationError::Runtime(err) => Some(err),
            InvariantGenerationError::Analysis(err) => Some(err),
            _ => None,
        }
    }
}
