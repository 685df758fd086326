//! Verdict of an analysis

use std::{collections::BTreeSet, fmt};

use cpa_display_utils::join_iterator;
use log::error;

use crate::{
    error::{CpaError, InterruptReason},
    path::ArgPath,
};

/// Error path reaching a target location
#[derive(Debug, Clone, PartialEq)]
pub struct Counterexample {
    path: ArgPath,
    violated_properties: BTreeSet<String>,
    is_precise: bool,
}

impl Counterexample {
    /// Counterexample along `path`
    ///
    /// A precise counterexample was confirmed feasible by an exact check; an
    /// imprecise one was only found feasible by the abstract domains.
    pub fn new(path: ArgPath, violated_properties: BTreeSet<String>, is_precise: bool) -> Self {
        Self {
            path,
            violated_properties,
            is_precise,
        }
    }

    /// Error path
    pub fn path(&self) -> &ArgPath {
        &self.path
    }

    /// Properties violated at the end of the path
    pub fn violated_properties(&self) -> &BTreeSet<String> {
        &self.violated_properties
    }

    /// Check whether feasibility was confirmed exactly
    pub fn is_precise(&self) -> bool {
        self.is_precise
    }
}

impl fmt::Display for Counterexample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Violated properties: {}{}",
            join_iterator(self.violated_properties.iter(), ", "),
            if self.is_precise { "" } else { " (imprecise)" }
        )?;
        for edge in self.path.full_edges() {
            writeln!(f, "  {edge}")?;
        }
        Ok(())
    }
}

/// Why an analysis could not reach a verdict
#[derive(Debug, Clone, PartialEq)]
pub enum UnknownReason {
    /// Walltime limit exceeded
    Timeout,
    /// Shutdown was requested
    Interrupted(String),
    /// The program uses a construct the analysis cannot handle
    UnsupportedConstruct(String),
    /// The solver could not decide a query
    SolverUnknown,
    /// Communication with the solver failed
    SolverFailure(String),
    /// Refinement could not eliminate a spurious counterexample
    RefinementExhausted(String),
    /// Exploration was incomplete, for example because a limit truncated it
    Incomplete(String),
}

impl fmt::Display for UnknownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownReason::Timeout => write!(f, "timeout"),
            UnknownReason::Interrupted(r) => write!(f, "interrupted ({r})"),
            UnknownReason::UnsupportedConstruct(r) => write!(f, "unsupported construct ({r})"),
            UnknownReason::SolverUnknown => write!(f, "solver returned unknown"),
            UnknownReason::SolverFailure(r) => write!(f, "solver failure ({r})"),
            UnknownReason::RefinementExhausted(r) => write!(f, "refinement exhausted ({r})"),
            UnknownReason::Incomplete(r) => write!(f, "incomplete exploration ({r})"),
        }
    }
}

/// Overall result of an analysis
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisResult {
    /// No target location is reachable
    Safe,
    /// A target location is reachable
    Unsafe(Box<Counterexample>),
    /// No verdict
    Unknown(UnknownReason),
}

impl AnalysisResult {
    /// Inconclusive result for an error that aborted the analysis
    pub fn from_error(err: CpaError) -> Self {
        let reason = match err {
            CpaError::UnrecognizedCode(msg) => UnknownReason::UnsupportedConstruct(msg),
            CpaError::Interrupted(InterruptReason::Timeout) => UnknownReason::Timeout,
            CpaError::Interrupted(InterruptReason::Requested(r)) => UnknownReason::Interrupted(r),
            CpaError::SolverUnknown => UnknownReason::SolverUnknown,
            CpaError::Solver(e) => {
                error!("Solver failure: {e}");
                UnknownReason::SolverFailure(e.to_string())
            }
            CpaError::RefinementFailed(msg) => UnknownReason::RefinementExhausted(msg),
        };
        AnalysisResult::Unknown(reason)
    }

    /// Check whether the program was proven safe
    pub fn is_safe(&self) -> bool {
        matches!(self, AnalysisResult::Safe)
    }

    /// Check whether a counterexample was found
    pub fn is_unsafe(&self) -> bool {
        matches!(self, AnalysisResult::Unsafe(_))
    }
}

impl fmt::Display for AnalysisResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisResult::Safe => write!(f, "SAFE"),
            AnalysisResult::Unsafe(cex) => write!(f, "UNSAFE\n{cex}"),
            AnalysisResult::Unknown(reason) => write!(f, "UNKNOWN: {reason}"),
        }
    }
}
