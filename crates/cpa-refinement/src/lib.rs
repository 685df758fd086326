//! Counterexample-guided abstraction refinement
//!
//! A counterexample found by the reachability algorithm is replayed under
//! full precision by a [`feasibility::GenericFeasibilityChecker`]. If it is
//! spurious, a [`prefix::PrefixProvider`] extracts the infeasible prefixes of
//! the path, an interpolator derives the facts needed to exclude them, and
//! the [`refiner::InterpolationRefiner`] adds the variables of these facts
//! to the precision and prunes the ARG below the refinement root.
//!
//! The [`delegating::DelegatingRefiner`] chains the refiners of the value
//! and interval domains, and the [`cegar::CegarAlgorithm`] alternates
//! between reachability and refinement until a verdict is reached.

use std::fmt;

use cpa_core::{arg::ArgStateId, error::CpaError, path::ArgPath, reached_set::ArgReachedSet};
use cpa_smt_encoder::expression_encoding::SMTSolverError;

pub mod cegar;
pub mod config;
pub mod delegating;
pub mod feasibility;
pub mod forgetful;
pub mod interpolant;
pub mod interpolator;
pub mod predicate_prefix;
pub mod prefix;
pub mod refiner;
pub mod strongest_post;
pub mod use_def;

/// Outcome of a successful refinement round
#[derive(Debug, Clone, PartialEq)]
pub enum RefinementOutcome {
    /// The precision was refined and the ARG pruned, exploration continues
    Refined,
    /// The path to the target could not be excluded
    Feasible {
        /// Path to the target
        path: ArgPath,
        /// Whether the path was confirmed by a precise check
        is_precise: bool,
    },
}

impl fmt::Display for RefinementOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefinementOutcome::Refined => write!(f, "refined"),
            RefinementOutcome::Feasible { is_precise, .. } => {
                if *is_precise {
                    write!(f, "feasible")
                } else {
                    write!(f, "feasible (imprecise)")
                }
            }
        }
    }
}

/// Refinement of the precision of an [`ArgReachedSet`]
pub trait Refiner<S, P> {
    /// Exclude the path to `target` from the reached set or report it as
    /// feasible
    ///
    /// Fails with [`CpaError::RefinementFailed`] if the path is infeasible but
    /// no progress could be made.
    fn perform_refinement(
        &mut self,
        reached: &mut ArgReachedSet<S, P>,
        target: ArgStateId,
    ) -> Result<RefinementOutcome, CpaError>;
}

impl<S, P, R: Refiner<S, P> + ?Sized> Refiner<S, P> for Box<R> {
    fn perform_refinement(
        &mut self,
        reached: &mut ArgReachedSet<S, P>,
        target: ArgStateId,
    ) -> Result<RefinementOutcome, CpaError> {
        (**self).perform_refinement(reached, target)
    }
}

/// Convert an error of the solver into the error of the analysis
pub(crate) fn solver_error(err: SMTSolverError) -> CpaError {
    match err {
        SMTSolverError::SolverUnknown => CpaError::SolverUnknown,
        err => CpaError::Solver(Box::new(err)),
    }
}
