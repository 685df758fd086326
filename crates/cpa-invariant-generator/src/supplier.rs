//! Location invariants extracted from a reached set

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::{Arc, OnceLock},
};

use cpa_cfa::{Cfa, CfaNodeId};
use cpa_core::{algorithm::LocationInvariants, reached_set::ArgReachedSet};
use cpa_domains::{
    composite::{CompositePrecision, CompositeState},
    interval::IntervalAnalysisState,
};

/// Interval invariants per program location
///
/// The invariant of a location is the join of the interval states reached
/// at it. A location that was never reached has the invariant `false`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InvariantSupplier {
    invariants: BTreeMap<CfaNodeId, IntervalAnalysisState>,
    unreached: BTreeSet<CfaNodeId>,
    sound: bool,
}

impl InvariantSupplier {
    /// Supplier that knows nothing, every invariant is `true`
    pub fn trivial() -> Self {
        Self::default()
    }

    /// Invariants of the states in a completely explored `reached` set
    pub fn from_reached(
        cfa: &Cfa,
        reached: &ArgReachedSet<CompositeState, CompositePrecision>,
    ) -> Self {
        let mut invariants: BTreeMap<CfaNodeId, IntervalAnalysisState> = BTreeMap::new();
        for id in reached.reached().states() {
            let Some(state) = reached.state(id) else {
                continue;
            };
            let interval = state.wrapped().interval().cloned().unwrap_or_default();
            invariants
                .entry(state.location())
                .and_modify(|inv| *inv = inv.join(&interval))
                .or_insert(interval);
        }

        let unreached = cfa
            .nodes()
            .map(|n| n.id())
            .filter(|id| !invariants.contains_key(id))
            .collect();

        Self {
            invariants,
            unreached,
            sound: true,
        }
    }

    /// Check whether the supplier carries no information
    pub fn is_trivial(&self) -> bool {
        !self.sound
    }

    /// Invariant at `location`, `None` if the invariant is `false`
    pub fn invariant_at(&self, location: CfaNodeId) -> Option<IntervalAnalysisState> {
        if !self.sound {
            return Some(IntervalAnalysisState::new());
        }
        if self.unreached.contains(&location) {
            return None;
        }
        Some(self.invariants.get(&location).cloned().unwrap_or_default())
    }

    /// Locations the invariants prove unreachable
    pub fn unreached_locations(&self) -> impl Iterator<Item = CfaNodeId> + '_ {
        self.unreached.iter().copied()
    }
}

impl LocationInvariants for InvariantSupplier {
    fn proves_unreachable(&self, location: CfaNodeId) -> bool {
        self.sound && self.unreached.contains(&location)
    }
}

impl fmt::Display for InvariantSupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.sound {
            return write!(f, "(no invariants)");
        }
        for (location, invariant) in &self.invariants {
            writeln!(f, "{location}: {invariant}")?;
        }
        for location in &self.unreached {
            writeln!(f, "{location}: false")?;
        }
        Ok(())
    }
}

/// Invariants that become available once a generator has finished
///
/// Until then no location is proven unreachable.
#[derive(Debug, Clone, Default)]
pub struct PublishedInvariants(Arc<OnceLock<Arc<InvariantSupplier>>>);

impl PublishedInvariants {
    /// Nothing published yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `supplier` visible to all clones, only the first call has an effect
    pub fn publish(&self, supplier: Arc<InvariantSupplier>) {
        let _ = self.0.set(supplier);
    }

    /// The published supplier
    pub fn get(&self) -> Option<&Arc<InvariantSupplier>> {
        self.0.get()
    }
}

impl LocationInvariants for PublishedInvariants {
    fn proves_unreachable(&self, location: CfaNodeId) -> bool {
        self.get()
            .is_some_and(|supplier| supplier.proves_unreachable(location))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cpa_cfa::{
        CfaFunction, CfaNode, EdgeKind,
        builder::CfaBuilder,
        expressions::{BooleanExpression, ComparisonOp, Variable},
    };
    use cpa_core::{
        algorithm::CpaAlgorithm,
        precision::VariableTrackingPrecision,
        reached_set::WaitlistOrder,
        shutdown::ShutdownNotifier,
    };
    use cpa_domains::{
        composite::{ComponentKind, CompositeCpa},
        interval::Interval,
    };

    use super::*;

    /// `if (x > 0) { if (x < 0) error(); }`
    fn contradiction() -> Arc<Cfa> {
        let x = || Variable::new("x");
        let assume = |op, truth| EdgeKind::Assume {
            condition: BooleanExpression::compare(x(), op, 0),
            truth,
        };
        let cfa = CfaBuilder::new("main")
            .with_function(CfaFunction::new("main", CfaNodeId(0), CfaNodeId(3)))
            .unwrap()
            .with_nodes((0..4).map(|i| CfaNode::new(CfaNodeId(i), "main")))
            .unwrap()
            .with_global_variable(x())
            .unwrap()
            .initialize()
            .with_edges([
                (CfaNodeId(0), CfaNodeId(1), assume(ComparisonOp::Gt, true)),
                (CfaNodeId(1), CfaNodeId(2), assume(ComparisonOp::Lt, true)),
                (CfaNodeId(0), CfaNodeId(3), assume(ComparisonOp::Gt, false)),
                (CfaNodeId(1), CfaNodeId(3), assume(ComparisonOp::Lt, false)),
            ])
            .unwrap()
            .with_target_location(CfaNodeId(2), "unreach-call")
            .unwrap()
            .build()
            .unwrap();
        Arc::new(cfa)
    }

    fn explore(cfa: &Arc<Cfa>) -> InvariantSupplier {
        let cpa = CompositeCpa::with_kinds(
            cfa.clone(),
            [ComponentKind::Interval],
            VariableTrackingPrecision::full(),
        );
        let algorithm = CpaAlgorithm::new(&cpa, cfa, ShutdownNotifier::new());
        let mut reached = algorithm.initial_reached_set(WaitlistOrder::BreadthFirst);
        assert!(algorithm.run(&mut reached).unwrap().is_sound());
        InvariantSupplier::from_reached(cfa, &reached)
    }

    #[test]
    fn test_unreached_target_is_proven_unreachable() {
        let cfa = contradiction();
        let supplier = explore(&cfa);

        assert!(!supplier.is_trivial());
        assert!(supplier.proves_unreachable(CfaNodeId(2)));
        assert!(!supplier.proves_unreachable(CfaNodeId(1)));
        assert_eq!(
            supplier.unreached_locations().collect::<Vec<_>>(),
            vec![CfaNodeId(2)]
        );
        assert_eq!(supplier.invariant_at(CfaNodeId(2)), None);
    }

    #[test]
    fn test_invariants_join_all_states_at_a_location() {
        let cfa = contradiction();
        let supplier = explore(&cfa);

        let at_1 = supplier.invariant_at(CfaNodeId(1)).unwrap();
        assert_eq!(at_1.get(&Variable::new("x")), Interval::at_least(1));

        // reached with x <= 0 and with x >= 1
        let at_3 = supplier.invariant_at(CfaNodeId(3)).unwrap();
        assert!(at_3.get(&Variable::new("x")).is_top());

        let at_0 = supplier.invariant_at(CfaNodeId(0)).unwrap();
        assert!(at_0.is_empty());
    }

    #[test]
    fn test_trivial_supplier_proves_nothing() {
        let supplier = InvariantSupplier::trivial();

        assert!(supplier.is_trivial());
        assert!(!supplier.proves_unreachable(CfaNodeId(2)));
        assert_eq!(
            supplier.invariant_at(CfaNodeId(2)),
            Some(IntervalAnalysisState::new())
        );
        assert_eq!(supplier.to_string(), "(no invariants)");
    }

    #[test]
    fn test_published_invariants() {
        let published = PublishedInvariants::new();
        let observer = published.clone();
        assert!(!observer.proves_unreachable(CfaNodeId(2)));

        published.publish(Arc::new(explore(&contradiction())));
        assert!(observer.proves_unreachable(CfaNodeId(2)));

        // later suppliers are ignored
        published.publish(Arc::new(InvariantSupplier::trivial()));
        assert!(observer.proves_unreachable(CfaNodeId(2)));
    }
}
