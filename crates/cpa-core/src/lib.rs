//! Core of the configurable program analysis
//!
//! An analysis explores the abstract state space of a [`cpa_cfa::Cfa`]
//! guided by an abstract domain implementing [`ConfigurableProgramAnalysis`].
//! Explored states are recorded in an abstract reachability graph
//! ([`arg::Arg`]) and a reached set ([`reached_set::ReachedSet`]); the
//! [`algorithm::CpaAlgorithm`] computes their fixpoint.
//!
//! Refinement, which needs to prune and re-explore parts of the graph, works
//! on [`reached_set::ArgReachedSet`].

use std::fmt;

use cpa_cfa::{CfaEdge, CfaNode};

use crate::error::CpaError;

pub mod algorithm;
pub mod arg;
pub mod error;
pub mod path;
pub mod precision;
pub mod reached_set;
pub mod result;
pub mod shutdown;

/// Abstract domain with its transfer relation and its merge and stop
/// operators
pub trait ConfigurableProgramAnalysis {
    /// Abstract state of the domain
    type State: Clone + fmt::Debug + fmt::Display + PartialEq;
    /// Precision the transfer relation is computed under
    type Precision: Clone + fmt::Debug + PartialEq;

    /// Abstract state at the program entry `node`
    fn initial_state(&self, node: &CfaNode) -> Self::State;

    /// Precision at the program entry `node`
    fn initial_precision(&self, node: &CfaNode) -> Self::Precision;

    /// Successors of `state` along `edge`
    ///
    /// An empty result means that `edge` cannot be taken from `state`.
    fn abstract_successors_for_edge(
        &self,
        state: &Self::State,
        precision: &Self::Precision,
        edge: &CfaEdge,
    ) -> Result<Vec<Self::State>, CpaError>;

    /// Merge a new `successor` into an already `reached` state
    ///
    /// Returns `reached` unchanged if no merge should happen. The result must
    /// be at least as abstract as both inputs, and `merge(s, s) == s`.
    fn merge(
        &self,
        successor: &Self::State,
        reached: &Self::State,
        precision: &Self::Precision,
    ) -> Self::State {
        let _ = (successor, precision);
        reached.clone()
    }

    /// Extrapolate from `previous` to `next`, where `next` is the merge of
    /// `previous` with a state derived from it
    ///
    /// Applied instead of the merge result when merging into a state of the
    /// current exploration branch; repeated widening must stabilize.
    fn widen(
        &self,
        previous: &Self::State,
        next: &Self::State,
        precision: &Self::Precision,
    ) -> Self::State {
        let _ = (previous, precision);
        next.clone()
    }

    /// Check whether `state` is subsumed by `other`
    fn is_less_or_equal(&self, state: &Self::State, other: &Self::State) -> bool;

    /// Find a reached state covering `state`
    ///
    /// Returns the index into `reached` of the covering state.
    fn stop(
        &self,
        state: &Self::State,
        reached: &[&Self::State],
        precision: &Self::Precision,
    ) -> Option<usize> {
        let _ = precision;
        reached
            .iter()
            .position(|other| self.is_less_or_equal(state, other))
    }
}

/// Precision made of components of which some can be replaced
pub trait WrapperPrecision: Sized {
    /// Type of the components
    type Component;

    /// Replace every component matching `predicate` by `new_component`
    fn replace_matching(
        &self,
        new_component: &Self::Component,
        predicate: impl Fn(&Self::Component) -> bool,
    ) -> Self;

    /// First component matching `predicate`
    fn retrieve_matching(
        &self,
        predicate: impl Fn(&Self::Component) -> bool,
    ) -> Option<&Self::Component>;
}
