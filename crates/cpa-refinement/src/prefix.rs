//! Extraction of infeasible prefixes from spurious counterexamples
//!
//! A path can be infeasible for several independent reasons. A prefix
//! provider walks the path, closes a prefix at every edge that cannot be
//! taken, replaces that edge by a no-op and continues, so that the refiner
//! can exclude all reasons at once.

use std::{fmt, marker::PhantomData};

use cpa_cfa::CfaEdge;
use cpa_core::{
    error::CpaError,
    path::{ArgPath, ArgPathBuilder},
    shutdown::ShutdownNotifier,
};
use log::{debug, trace};

use crate::{
    forgetful::ForgetfulState,
    interpolant::{Interpolant, UseDefInterpolant},
    strongest_post::StrongestPostOperator,
    use_def::UseDefBasedInterpolator,
};

/// Default bound on the number of prefixes extracted from one path
pub const DEFAULT_MAX_PREFIX_COUNT: usize = 64;

/// Default number of edges after which no further prefix is searched once
/// one was found
pub const DEFAULT_MAX_PREFIX_LENGTH: usize = 1024;

/// Prefix of a path that cannot be executed, ending with its failing edge
#[derive(Debug, Clone, PartialEq)]
pub struct InfeasiblePrefix<I> {
    path: ArgPath,
    interpolants: Vec<I>,
}

impl<I: Interpolant> InfeasiblePrefix<I> {
    /// Prefix `path` with one interpolant per edge
    ///
    /// # Panics
    ///
    /// Panics if the number of interpolants differs from the number of edges.
    pub fn new(path: ArgPath, interpolants: Vec<I>) -> Self {
        assert_eq!(
            path.len(),
            interpolants.len(),
            "an infeasible prefix needs one interpolant per edge"
        );
        Self { path, interpolants }
    }

    /// The prefix, earlier failing edges are replaced by no-ops
    pub fn path(&self) -> &ArgPath {
        &self.path
    }

    /// Interpolant at the position before each edge
    pub fn interpolants(&self) -> &[I] {
        &self.interpolants
    }

    /// Edge that cannot be taken
    pub fn failing_edge(&self) -> &CfaEdge {
        &self.path.edges()[self.path.len() - 1]
    }

    /// Number of edges
    pub fn len(&self) -> usize {
        self.path.len()
    }

    /// Check whether the prefix has no edges, which never holds for a
    /// constructed prefix
    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }
}

impl<I: Interpolant> fmt::Display for InfeasiblePrefix<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (interpolant, edge) in self.interpolants.iter().zip(self.path.edges()) {
            writeln!(f, "{{{interpolant}}}")?;
            writeln!(f, "  {edge}")?;
        }
        write!(f, "{{false}}")
    }
}

/// Infeasible prefixes of a path
#[derive(Debug, Clone, PartialEq)]
pub struct PrefixExtraction<I> {
    prefixes: Vec<InfeasiblePrefix<I>>,
    remainder: ArgPath,
}

impl<I> PrefixExtraction<I> {
    /// The extracted prefixes, shortest first
    pub fn prefixes(&self) -> &[InfeasiblePrefix<I>] {
        &self.prefixes
    }

    /// The path with every failing edge replaced by a no-op
    pub fn feasible_remainder(&self) -> &ArgPath {
        &self.remainder
    }

    /// Take the prefixes
    pub fn into_prefixes(self) -> Vec<InfeasiblePrefix<I>> {
        self.prefixes
    }
}

/// Collector of the prefixes found during a walk along a path
pub(crate) struct PrefixCollector<'a> {
    path: &'a ArgPath,
    builder: ArgPathBuilder,
    remainder: ArgPath,
}

impl<'a> PrefixCollector<'a> {
    pub(crate) fn new(path: &'a ArgPath) -> Self {
        Self {
            path,
            builder: ArgPathBuilder::new(path.first_state(), path.locations()[0]),
            remainder: path.clone(),
        }
    }

    /// Record that the `k`-th edge was taken
    pub(crate) fn take(&mut self, k: usize) {
        let builder = self.builder.clone();
        self.builder = builder.add(self.path.edges()[k].clone(), self.path.states()[k + 1]);
    }

    /// Record that the `k`-th edge failed, return the prefix ending with it
    pub(crate) fn fail(&mut self, k: usize) -> ArgPath {
        let edge = &self.path.edges()[k];
        let state = self.path.states()[k + 1];
        let prefix = self.builder.clone().add(edge.clone(), state).build();

        let noop = edge.noop();
        self.remainder = self.remainder.with_edge_replaced(k, noop.clone());
        let builder = self.builder.clone();
        self.builder = builder.add(noop, state);
        prefix
    }

    pub(crate) fn finish<I>(self, prefixes: Vec<InfeasiblePrefix<I>>) -> PrefixExtraction<I> {
        PrefixExtraction {
            prefixes,
            remainder: self.remainder,
        }
    }
}

/// Source of infeasible prefixes of spurious paths
pub trait PrefixProvider {
    /// Interpolants attached to the prefixes
    type Interpolant: Interpolant;

    /// Prefixes of `path` that are infeasible on their own
    ///
    /// Returns no prefix if `path` is feasible.
    fn extract_infeasible_prefixes(
        &mut self,
        path: &ArgPath,
    ) -> Result<PrefixExtraction<Self::Interpolant>, CpaError>;
}

/// Prefix provider replaying the path in a forgetful domain
///
/// Prefix interpolants are computed by the
/// [`UseDefBasedInterpolator`].
#[derive(Debug, Clone)]
pub struct GenericPrefixProvider<S, O> {
    post: O,
    shutdown: ShutdownNotifier,
    max_prefix_count: usize,
    max_prefix_length: usize,
    _state: PhantomData<S>,
}

impl<S, O> GenericPrefixProvider<S, O>
where
    S: ForgetfulState,
    O: StrongestPostOperator<S>,
{
    /// Provider computing successors with `post`
    pub fn new(post: O, shutdown: ShutdownNotifier) -> Self {
        Self {
            post,
            shutdown,
            max_prefix_count: DEFAULT_MAX_PREFIX_COUNT,
            max_prefix_length: DEFAULT_MAX_PREFIX_LENGTH,
            _state: PhantomData,
        }
    }

    /// Extract at most `max` prefixes
    pub fn with_max_prefix_count(mut self, max: usize) -> Self {
        self.max_prefix_count = max.max(1);
        self
    }

    /// Stop searching after `max` edges once a prefix was found
    pub fn with_max_prefix_length(mut self, max: usize) -> Self {
        self.max_prefix_length = max;
        self
    }

    /// Bound on the number of prefixes
    pub fn max_prefix_count(&self) -> usize {
        self.max_prefix_count
    }

    /// Bound on the length of the walk once a prefix was found
    pub fn max_prefix_length(&self) -> usize {
        self.max_prefix_length
    }
}

impl<S, O> PrefixProvider for GenericPrefixProvider<S, O>
where
    S: ForgetfulState,
    O: StrongestPostOperator<S>,
{
    type Interpolant = UseDefInterpolant;

    fn extract_infeasible_prefixes(
        &mut self,
        path: &ArgPath,
    ) -> Result<PrefixExtraction<UseDefInterpolant>, CpaError> {
        let mut collector = PrefixCollector::new(path);
        let mut prefixes = Vec::new();
        let mut state = S::empty();
        let mut callstack = Vec::new();

        for (k, edge) in path.edges().iter().enumerate() {
            self.shutdown.shutdown_if_necessary()?;
            if !prefixes.is_empty() && k >= self.max_prefix_length {
                debug!("Stopping prefix search after {k} edges");
                break;
            }

            let mut next_callstack = callstack.clone();
            match self.post.step(&state, edge, &mut next_callstack)? {
                Some(next) => {
                    state = next;
                    callstack = next_callstack;
                    collector.take(k);
                }
                None => {
                    trace!("Found infeasible prefix ending with {edge}");
                    let prefix = collector.fail(k);
                    let interpolants = UseDefBasedInterpolator.interpolate(prefix.edges());
                    prefixes.push(InfeasiblePrefix::new(prefix, interpolants));
                    if prefixes.len() >= self.max_prefix_count {
                        debug!("Reached the limit of {} prefixes", self.max_prefix_count);
                        break;
                    }
                }
            }
        }

        debug!("Extracted {} infeasible prefixes", prefixes.len());
        Ok(collector.finish(prefixes))
    }
}
