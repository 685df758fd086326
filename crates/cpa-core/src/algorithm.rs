//! Reachability algorithm
//!
//! The algorithm repeatedly takes a state from the waitlist and computes its
//! successors. Each successor is either covered by a reached state, merged
//! into a reached state, or added as a new state. Processing a state is
//! atomic: successors are only added once all of them have been computed.

use std::sync::Arc;

use cpa_cfa::{Cfa, CfaNodeId};
use log::{debug, info, trace, warn};

use crate::{
    ConfigurableProgramAnalysis,
    arg::ArgStateId,
    error::CpaError,
    reached_set::{ArgReachedSet, WaitlistOrder},
    shutdown::ShutdownNotifier,
};

/// Location invariants computed by a separate analysis
pub trait LocationInvariants: Send + Sync {
    /// Check whether the invariants prove that `location` is unreachable
    fn proves_unreachable(&self, location: CfaNodeId) -> bool;
}

/// Outcome of a run of the [`CpaAlgorithm`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgorithmStatus {
    sound: bool,
    target: Option<ArgStateId>,
}

impl AlgorithmStatus {
    /// Check whether the exploration was complete
    ///
    /// An unsound run must never be taken as a proof of safety.
    pub fn is_sound(&self) -> bool {
        self.sound
    }

    /// Target state that ended the run early
    pub fn target(&self) -> Option<ArgStateId> {
        self.target
    }
}

/// Fixpoint computation over an [`ArgReachedSet`]
pub struct CpaAlgorithm<'a, A: ConfigurableProgramAnalysis> {
    cpa: &'a A,
    cfa: &'a Cfa,
    shutdown: ShutdownNotifier,
    stop_at_target: bool,
    invariants: Option<Arc<dyn LocationInvariants>>,
    max_reached_states: Option<usize>,
}

impl<'a, A: ConfigurableProgramAnalysis> CpaAlgorithm<'a, A> {
    /// Algorithm exploring until the waitlist is empty
    pub fn new(cpa: &'a A, cfa: &'a Cfa, shutdown: ShutdownNotifier) -> Self {
        Self {
            cpa,
            cfa,
            shutdown,
            stop_at_target: false,
            invariants: None,
            max_reached_states: None,
        }
    }

    /// Stop as soon as a state processed completely produced a target state
    pub fn with_stop_at_target(mut self, stop: bool) -> Self {
        self.stop_at_target = stop;
        self
    }

    /// Drop target successors at locations `invariants` prove unreachable
    pub fn with_invariants(mut self, invariants: Arc<dyn LocationInvariants>) -> Self {
        self.invariants = Some(invariants);
        self
    }

    /// Stop exploring once the reached set has `max` states, making the run
    /// unsound
    pub fn with_max_reached_states(mut self, max: Option<usize>) -> Self {
        self.max_reached_states = max;
        self
    }

    /// Reached set containing the initial state at the program entry
    pub fn initial_reached_set(
        &self,
        order: WaitlistOrder,
    ) -> ArgReachedSet<A::State, A::Precision> {
        let entry = self.cfa.entry_node();
        ArgReachedSet::new(
            entry.id(),
            self.cpa.initial_state(entry),
            self.cpa.initial_precision(entry),
            self.cfa.violated_properties(entry.id()),
            order,
        )
    }

    /// Explore until the waitlist is empty, or a target was found if the
    /// algorithm stops at targets
    ///
    /// If a shutdown is requested or a transfer fails, the state being
    /// processed is put back on the waitlist unchanged and the error is
    /// returned.
    pub fn run(
        &self,
        reached: &mut ArgReachedSet<A::State, A::Precision>,
    ) -> Result<AlgorithmStatus, CpaError> {
        let mut status = AlgorithmStatus {
            sound: true,
            target: None,
        };

        loop {
            self.shutdown.shutdown_if_necessary()?;

            if !reached.reached().has_waiting_state() {
                break;
            }

            if self
                .max_reached_states
                .is_some_and(|max| reached.reached().len() >= max)
            {
                warn!(
                    "Reached set exceeds {} states, exploration is incomplete",
                    reached.reached().len()
                );
                status.sound = false;
                break;
            }

            let Some(state) = reached.pop_from_waitlist() else {
                break;
            };

            match self.handle_state(reached, state) {
                Ok(Some(target)) if self.stop_at_target => {
                    info!("Found target state {target}");
                    status.target = Some(target);
                    return Ok(status);
                }
                Ok(_) => {}
                Err(err) => {
                    reached.re_add(state);
                    return Err(err);
                }
            }
        }

        debug!(
            "Exploration finished with {} reached states",
            reached.reached().len()
        );
        Ok(status)
    }

    /// Compute and insert all successors of `state`
    ///
    /// Returns a target state produced while doing so that is still part of
    /// the ARG.
    fn handle_state(
        &self,
        reached: &mut ArgReachedSet<A::State, A::Precision>,
        state: ArgStateId,
    ) -> Result<Option<ArgStateId>, CpaError> {
        let (location, wrapped) = match reached.state(state) {
            Some(s) => (s.location(), s.wrapped().clone()),
            None => panic!("waiting state {state} is not in the ARG"),
        };
        let precision = match reached.precision(state) {
            Some(p) => p.clone(),
            None => panic!("waiting state {state} has no precision"),
        };
        trace!("Expanding {state} at {location}: {wrapped}");

        let mut successors = Vec::new();
        for edge in self.cfa.leaving_edges(location) {
            for succ in self
                .cpa
                .abstract_successors_for_edge(&wrapped, &precision, edge)?
            {
                successors.push((edge, succ));
            }
        }

        let mut found_target = None;
        for (edge, succ) in successors {
            let succ_loc = edge.successor();
            let properties = self.cfa.violated_properties(succ_loc);
            let is_target = !properties.is_empty();

            if is_target
                && self
                    .invariants
                    .as_ref()
                    .is_some_and(|inv| inv.proves_unreachable(succ_loc))
            {
                debug!("Invariants prove target location {succ_loc} unreachable");
                continue;
            }

            let candidates = reached.uncovered_states_at(succ_loc);
            let candidate_states: Vec<&A::State> = candidates
                .iter()
                .filter_map(|id| reached.state(*id).map(|s| s.wrapped()))
                .collect();

            if let Some(idx) = self.cpa.stop(&succ, &candidate_states, &precision) {
                let by = candidates[idx];
                let id = reached.add_covered_successor(
                    state,
                    edge,
                    succ,
                    precision.clone(),
                    properties,
                    by,
                );
                trace!("Successor {id} is covered by {by}");
                continue;
            }

            let mut absorbed_by = None;
            for candidate in candidates {
                let Some(old) = reached.state(candidate).map(|s| s.wrapped().clone()) else {
                    continue;
                };
                let merged = self.cpa.merge(&succ, &old, &precision);
                if merged == old {
                    continue;
                }

                if reached.arg().is_ancestor(candidate, state) {
                    // merging into the current branch restarts from the
                    // widened ancestor, which discards `state` itself
                    let widened = self.cpa.widen(&old, &merged, &precision);
                    trace!("Widening ancestor {candidate} of {state}");
                    reached.replace_merged(candidate, widened, precision.clone(), None);
                    // targets added for earlier successors may have been pruned
                    let kept = found_target.filter(|t| reached.arg().contains(*t));
                    return Ok(kept.or(is_target.then_some(candidate)));
                }

                trace!("Merging successor of {state} into {candidate}");
                reached.replace_merged(candidate, merged, precision.clone(), Some((state, edge)));
                absorbed_by = Some(candidate);
                break;
            }

            if let Some(candidate) = absorbed_by {
                if is_target {
                    found_target = Some(candidate);
                }
                continue;
            }

            let id = reached.add_successor(state, edge, succ, precision.clone(), properties);
            if is_target {
                found_target = Some(id);
            }
        }

        Ok(found_target.filter(|t| reached.arg().contains(*t)))
    }
}
