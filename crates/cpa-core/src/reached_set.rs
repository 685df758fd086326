//! Reached set and its coupling with the ARG
//!
//! The [`ReachedSet`] stores every discovered state with the precision it is
//! explored under, indexed by location, and the waitlist of states still to
//! be expanded. [`ArgReachedSet`] keeps a reached set and an [`Arg`]
//! consistent with each other and implements the surgery refinement needs.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    fmt,
};

use cpa_cfa::{CfaEdge, CfaNodeId};
use log::{debug, trace};

#[cfg(feature = "config_deserialize")]
use serde::Deserialize;

use crate::{
    WrapperPrecision,
    arg::{Arg, ArgState, ArgStateId},
};

/// Order in which waiting states are expanded
///
/// The order decides which counterexample is found first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "config_deserialize", derive(Deserialize))]
#[cfg_attr(feature = "config_deserialize", serde(rename_all = "snake_case"))]
pub enum WaitlistOrder {
    /// Expand the most recently added state first (stack)
    #[default]
    DepthFirst,
    /// Expand the least recently added state first (queue)
    BreadthFirst,
}

impl fmt::Display for WaitlistOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitlistOrder::DepthFirst => write!(f, "depth-first"),
            WaitlistOrder::BreadthFirst => write!(f, "breadth-first"),
        }
    }
}

/// States discovered so far together with their precisions
#[derive(Debug, Clone)]
pub struct ReachedSet<P> {
    order: WaitlistOrder,
    precisions: BTreeMap<ArgStateId, P>,
    by_location: BTreeMap<CfaNodeId, BTreeSet<ArgStateId>>,
    locations: BTreeMap<ArgStateId, CfaNodeId>,
    waitlist: VecDeque<ArgStateId>,
    waiting: BTreeSet<ArgStateId>,
    last: Option<ArgStateId>,
}

impl<P: Clone + PartialEq> ReachedSet<P> {
    /// Empty reached set
    pub fn new(order: WaitlistOrder) -> Self {
        Self {
            order,
            precisions: BTreeMap::new(),
            by_location: BTreeMap::new(),
            locations: BTreeMap::new(),
            waitlist: VecDeque::new(),
            waiting: BTreeSet::new(),
            last: None,
        }
    }

    /// Add `state` with `precision` to the reached set and the waitlist
    ///
    /// Adding a state that is present with the same precision has no effect.
    /// If it is present with a different precision, the precision is
    /// replaced and the state is waiting again.
    pub fn add(&mut self, state: ArgStateId, location: CfaNodeId, precision: P) {
        match self.precisions.get(&state) {
            Some(p) if *p == precision => {}
            Some(_) => {
                self.precisions.insert(state, precision);
                self.re_add(state);
            }
            None => {
                self.add_without_waiting(state, location, precision);
                self.re_add(state);
            }
        }
    }

    /// Add `state` to the reached set without scheduling it for expansion
    pub fn add_without_waiting(&mut self, state: ArgStateId, location: CfaNodeId, precision: P) {
        self.precisions.insert(state, precision);
        self.by_location.entry(location).or_default().insert(state);
        self.locations.insert(state, location);
        self.last = Some(state);
    }

    /// Put a reached state back on the waitlist
    ///
    /// # Panics
    ///
    /// Panics if `state` is not in the reached set.
    pub fn re_add(&mut self, state: ArgStateId) {
        assert!(
            self.precisions.contains_key(&state),
            "state {state} is not in the reached set"
        );
        if self.waiting.insert(state) {
            self.waitlist.push_back(state);
        }
    }

    /// Remove and return the next waiting state
    pub fn pop_from_waitlist(&mut self) -> Option<ArgStateId> {
        let next = match self.order {
            WaitlistOrder::DepthFirst => self.waitlist.pop_back(),
            WaitlistOrder::BreadthFirst => self.waitlist.pop_front(),
        }?;
        self.waiting.remove(&next);
        Some(next)
    }

    /// Remove `state` from the reached set and the waitlist
    pub fn remove(&mut self, state: ArgStateId) {
        self.precisions.remove(&state);
        if let Some(loc) = self.locations.remove(&state) {
            if let Some(states) = self.by_location.get_mut(&loc) {
                states.remove(&state);
                if states.is_empty() {
                    self.by_location.remove(&loc);
                }
            }
        }
        if self.waiting.remove(&state) {
            self.waitlist.retain(|s| *s != state);
        }
        if self.last == Some(state) {
            self.last = None;
        }
    }

    /// Replace the precision of a reached state
    pub fn update_precision(&mut self, state: ArgStateId, precision: P) {
        if let Some(p) = self.precisions.get_mut(&state) {
            *p = precision;
        }
    }

    /// Precision of `state`
    pub fn precision(&self, state: ArgStateId) -> Option<&P> {
        self.precisions.get(&state)
    }

    /// Check whether `state` is reached
    pub fn contains(&self, state: ArgStateId) -> bool {
        self.precisions.contains_key(&state)
    }

    /// Check whether `state` is waiting
    pub fn is_waiting(&self, state: ArgStateId) -> bool {
        self.waiting.contains(&state)
    }

    /// Check whether states are waiting
    pub fn has_waiting_state(&self) -> bool {
        !self.waitlist.is_empty()
    }

    /// Waiting states in insertion order
    pub fn waitlist(&self) -> impl Iterator<Item = ArgStateId> + '_ {
        self.waitlist.iter().copied()
    }

    /// Reached states at `location`
    pub fn states_at(&self, location: CfaNodeId) -> impl Iterator<Item = ArgStateId> + '_ {
        self.by_location
            .get(&location)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    /// All reached states
    pub fn states(&self) -> impl Iterator<Item = ArgStateId> + '_ {
        self.precisions.keys().copied()
    }

    /// Most recently added state
    pub fn last_state(&self) -> Option<ArgStateId> {
        self.last
    }

    /// Number of reached states
    pub fn len(&self) -> usize {
        self.precisions.len()
    }

    /// Check whether no state has been reached
    pub fn is_empty(&self) -> bool {
        self.precisions.is_empty()
    }
}

/// Reached set and ARG updated together
#[derive(Debug, Clone)]
pub struct ArgReachedSet<S, P> {
    arg: Arg<S>,
    reached: ReachedSet<P>,
}

impl<S, P> ArgReachedSet<S, P>
where
    S: Clone + PartialEq,
    P: Clone + PartialEq,
{
    /// Start with the root state waiting for expansion
    pub fn new(
        location: CfaNodeId,
        state: S,
        precision: P,
        violated_properties: BTreeSet<String>,
        order: WaitlistOrder,
    ) -> Self {
        let mut arg = Arg::new();
        let root = arg.create_root(location, state, violated_properties);
        let mut reached = ReachedSet::new(order);
        reached.add(root, location, precision);
        Self { arg, reached }
    }

    /// The ARG
    pub fn arg(&self) -> &Arg<S> {
        &self.arg
    }

    /// The reached set
    pub fn reached(&self) -> &ReachedSet<P> {
        &self.reached
    }

    /// ARG state with identifier `id`
    pub fn state(&self, id: ArgStateId) -> Option<&ArgState<S>> {
        self.arg.state(id)
    }

    /// Precision of `id`
    pub fn precision(&self, id: ArgStateId) -> Option<&P> {
        self.reached.precision(id)
    }

    /// Remove and return the next waiting state
    pub fn pop_from_waitlist(&mut self) -> Option<ArgStateId> {
        self.reached.pop_from_waitlist()
    }

    /// Put `id` back on the waitlist
    pub fn re_add(&mut self, id: ArgStateId) {
        self.reached.re_add(id);
    }

    /// Add a successor of `parent` and schedule it for expansion
    pub fn add_successor(
        &mut self,
        parent: ArgStateId,
        edge: &CfaEdge,
        state: S,
        precision: P,
        violated_properties: BTreeSet<String>,
    ) -> ArgStateId {
        let id = self.arg.add_child(parent, edge, state, violated_properties);
        self.reached.add(id, edge.successor(), precision);
        id
    }

    /// Add a successor of `parent` that is covered by `by`
    ///
    /// The successor stays in the ARG for path reconstruction but is never
    /// expanded.
    pub fn add_covered_successor(
        &mut self,
        parent: ArgStateId,
        edge: &CfaEdge,
        state: S,
        precision: P,
        violated_properties: BTreeSet<String>,
        by: ArgStateId,
    ) -> ArgStateId {
        let id = self.arg.add_child(parent, edge, state, violated_properties);
        self.arg.set_covered(id, by);
        self.reached
            .add_without_waiting(id, edge.successor(), precision);
        id
    }

    /// Non-covered reached states at `location`
    pub fn uncovered_states_at(&self, location: CfaNodeId) -> Vec<ArgStateId> {
        self.reached
            .states_at(location)
            .filter(|id| self.arg.state(*id).is_some_and(|s| !s.is_covered()))
            .collect()
    }

    /// Replace the abstract state of `id` by `state` after a merge
    ///
    /// The subtree below `id` was computed from the old state and is
    /// discarded; `id` is expanded again under `precision`. States uncovered
    /// by the removal wait again with their own precision. If `parent` is
    /// given, an edge from `parent` to `id` is added.
    pub fn replace_merged(
        &mut self,
        id: ArgStateId,
        state: S,
        precision: P,
        parent: Option<(ArgStateId, &CfaEdge)>,
    ) {
        trace!("Replacing state {id} by merged state");
        self.arg.set_wrapped(id, state);
        if let Some((parent, edge)) = parent {
            self.arg.add_parent_edge(parent, id, edge);
        }
        self.prune_below(id, |_| precision, P::clone);
    }

    /// Remove the subtree below `root` and explore `root` again
    ///
    /// Every strict descendant of `root` that is not reachable from the ARG
    /// root without passing through `root` is removed from the ARG and the
    /// reached set. States formerly covered by a removed state are uncovered
    /// and waiting again. `root` and the uncovered states get the precision
    /// computed by `adapt` from their current precision.
    ///
    /// # Panics
    ///
    /// Panics if `root` is not in the reached set.
    pub fn remove_subtree_with(&mut self, root: ArgStateId, adapt: impl Fn(&P) -> P) {
        self.prune_below(root, &adapt, &adapt);
    }

    fn prune_below(
        &mut self,
        root: ArgStateId,
        adapt_root: impl FnOnce(&P) -> P,
        adapt_uncovered: impl Fn(&P) -> P,
    ) {
        assert!(
            self.reached.contains(root),
            "refinement root {root} is not in the reached set"
        );

        let surviving = self.arg.reachable_avoiding(root);
        let to_remove: BTreeSet<_> = self
            .arg
            .subtree(root)
            .into_iter()
            .filter(|id| *id != root && !surviving.contains(id))
            .collect();
        debug!(
            "Removing {} states below refinement root {root}",
            to_remove.len()
        );

        let mut uncovered = BTreeSet::new();
        for id in to_remove.iter() {
            uncovered.extend(self.arg.remove_from_arg(*id));
            self.reached.remove(*id);
        }
        self.arg.uncover(root);

        let root_precision = self.reached.precision(root).map(adapt_root);
        if let Some(p) = root_precision {
            self.reached.update_precision(root, p);
        }
        self.reached.re_add(root);

        for id in uncovered.difference(&to_remove) {
            if let Some(p) = self.reached.precision(*id).map(&adapt_uncovered) {
                trace!("Re-adding formerly covered state {id}");
                self.reached.update_precision(*id, p);
                self.reached.re_add(*id);
            }
        }
    }

    /// Remove the subtree below `root` and explore `root` again with the
    /// precision components matching `predicate` replaced by `new_precision`
    ///
    /// See [`ArgReachedSet::remove_subtree_with`].
    pub fn remove_subtree<C>(
        &mut self,
        root: ArgStateId,
        new_precision: &C,
        predicate: impl Fn(&C) -> bool,
    ) where
        P: WrapperPrecision<Component = C>,
    {
        self.remove_subtree_with(root, |p| p.replace_matching(new_precision, &predicate));
    }

    /// Mark `covered` as covered by `by`
    pub fn set_covered(&mut self, covered: ArgStateId, by: ArgStateId) {
        self.arg.set_covered(covered, by);
        self.reached.remove_from_waitlist(covered);
    }

    /// Consume the structure and return the ARG
    pub fn into_arg(self) -> Arg<S> {
        self.arg
    }
}

impl<P> ReachedSet<P> {
    fn remove_from_waitlist(&mut self, state: ArgStateId) {
        if self.waiting.remove(&state) {
            self.waitlist.retain(|s| *s != state);
        }
    }
}
