//! Replaying paths under full precision

use std::marker::PhantomData;

use cpa_cfa::CfaEdge;
use cpa_core::{error::CpaError, path::ArgPath, shutdown::ShutdownNotifier};
use log::{debug, trace};

use crate::{forgetful::ForgetfulState, strongest_post::StrongestPostOperator};

/// Checks whether a path can be executed in the concrete domain `S`
///
/// No abstraction is applied while replaying, a path is infeasible exactly
/// if the strongest post of one of its edges is empty.
#[derive(Debug, Clone)]
pub struct GenericFeasibilityChecker<S, O> {
    post: O,
    shutdown: ShutdownNotifier,
    _state: PhantomData<S>,
}

impl<S, O> GenericFeasibilityChecker<S, O>
where
    S: ForgetfulState,
    O: StrongestPostOperator<S>,
{
    /// Checker computing successors with `post`
    pub fn new(post: O, shutdown: ShutdownNotifier) -> Self {
        Self {
            post,
            shutdown,
            _state: PhantomData,
        }
    }

    /// The strongest post operator
    pub fn post(&self) -> &O {
        &self.post
    }

    /// Check whether `path` is feasible from a state without facts
    pub fn is_feasible(&self, path: &ArgPath) -> Result<bool, CpaError> {
        let feasible = self.is_feasible_from(path.edges(), S::empty(), Vec::new())?;
        debug!(
            "Path to {} is {}",
            path.last_state(),
            if feasible { "feasible" } else { "infeasible" }
        );
        Ok(feasible)
    }

    /// Check whether `edges` can be executed from `start` with the callers'
    /// states on `callstack`
    pub fn is_feasible_from(
        &self,
        edges: &[CfaEdge],
        start: S,
        mut callstack: Vec<S>,
    ) -> Result<bool, CpaError> {
        Ok(self.replay(edges, start, &mut callstack)?.is_some())
    }

    /// State at the end of `edges` executed from `start`, `None` if the edges
    /// are infeasible
    pub fn replay(
        &self,
        edges: &[CfaEdge],
        start: S,
        callstack: &mut Vec<S>,
    ) -> Result<Option<S>, CpaError> {
        let mut state = start;
        for edge in edges {
            self.shutdown.shutdown_if_necessary()?;
            match self.post.step(&state, edge, callstack)? {
                Some(next) => state = next,
                None => {
                    trace!("Replay stopped at infeasible edge {edge}");
                    return Ok(None);
                }
            }
        }
        Ok(Some(state))
    }
}
