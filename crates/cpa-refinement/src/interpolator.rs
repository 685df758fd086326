//! Interpolation by forgetting facts that are not needed
//!
//! The [`GenericEdgeInterpolator`] computes the interpolant after a single
//! edge from the interpolant before it: it takes the strongest post and then
//! drops every fact without which the remaining path stays infeasible. The
//! [`PathInterpolator`] chains it along a whole infeasible prefix.

use cpa_cfa::{CfaEdge, EdgeKind};
use cpa_core::{error::CpaError, path::ArgPath, shutdown::ShutdownNotifier};
use log::{debug, trace};

use crate::{
    feasibility::GenericFeasibilityChecker,
    forgetful::ForgetfulState,
    interpolant::{Interpolant, StateInterpolant},
    strongest_post::StrongestPostOperator,
};

/// Interpolation along a single edge
#[derive(Debug, Clone)]
pub struct GenericEdgeInterpolator<S, O> {
    post: O,
    checker: GenericFeasibilityChecker<S, O>,
    shutdown: ShutdownNotifier,
}

impl<S, O> GenericEdgeInterpolator<S, O>
where
    S: ForgetfulState,
    O: StrongestPostOperator<S> + Clone,
{
    /// Interpolator computing successors with `post`
    pub fn new(post: O, shutdown: ShutdownNotifier) -> Self {
        Self {
            checker: GenericFeasibilityChecker::new(post.clone(), shutdown.clone()),
            post,
            shutdown,
        }
    }

    /// Interpolant after `edges[offset]` given the interpolant `input`
    /// before it
    ///
    /// `callstack` holds the interpolant states of the callers active before
    /// the edge.
    pub fn derive_interpolant(
        &self,
        edges: &[CfaEdge],
        offset: usize,
        input: &StateInterpolant<S>,
        callstack: &[S],
    ) -> Result<StateInterpolant<S>, CpaError> {
        let Some(state) = input.state() else {
            return Ok(StateInterpolant::False);
        };
        let mut callstack = callstack.to_vec();
        let Some(mut post) = self.post.step(state, &edges[offset], &mut callstack)? else {
            trace!("Post of {input} along {} is empty", edges[offset]);
            return Ok(StateInterpolant::False);
        };

        let suffix = &edges[offset + 1..];
        if !self.checker.is_feasible_from(suffix, S::empty(), Vec::new())? {
            return Ok(StateInterpolant::true_interpolant());
        }

        for var in post.tracked_variables() {
            self.shutdown.shutdown_if_necessary()?;
            let value = post.forget(&var);
            if self
                .checker
                .is_feasible_from(suffix, post.clone(), callstack.clone())?
            {
                if let Some(value) = value {
                    post.remember(var, value);
                }
            }
        }
        Ok(StateInterpolant::State(post))
    }
}

/// Interpolation along a whole infeasible prefix
#[derive(Debug, Clone)]
pub struct PathInterpolator<S, O> {
    interpolator: GenericEdgeInterpolator<S, O>,
}

impl<S, O> PathInterpolator<S, O>
where
    S: ForgetfulState,
    O: StrongestPostOperator<S> + Clone,
{
    /// Path interpolator computing successors with `post`
    pub fn new(post: O, shutdown: ShutdownNotifier) -> Self {
        Self {
            interpolator: GenericEdgeInterpolator::new(post, shutdown),
        }
    }

    /// One interpolant per edge of `path`, for the position before the edge
    ///
    /// The first interpolant is `true`. The interpolant after the last edge
    /// is `false` and not part of the result.
    pub fn interpolate(&self, path: &ArgPath) -> Result<Vec<StateInterpolant<S>>, CpaError> {
        let edges = path.edges();
        let mut interpolants = Vec::with_capacity(edges.len());
        let mut callstack: Vec<S> = Vec::new();
        let mut current = StateInterpolant::true_interpolant();

        for (k, edge) in edges.iter().enumerate() {
            interpolants.push(current.clone());
            if k + 1 == edges.len() || current.is_false() {
                continue;
            }
            let next = self
                .interpolator
                .derive_interpolant(edges, k, &current, &callstack)?;
            trace!("Interpolant after {edge}: {next}");

            if let Some(state) = current.state() {
                match edge.kind() {
                    EdgeKind::FunctionCall { .. } => callstack.push(state.clone()),
                    EdgeKind::FunctionReturn { .. } => {
                        callstack.pop();
                    }
                    _ => {}
                }
            }
            current = next;
        }

        debug!(
            "Interpolated path to {} with {} non-trivial interpolants",
            path.last_state(),
            interpolants.iter().filter(|i| !i.is_true()).count()
        );
        Ok(interpolants)
    }
}
