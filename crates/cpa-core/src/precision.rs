//! Precision tracking program variables
//!
//! A precision is immutable. Refinement produces a new precision from an old
//! one and a [`PrecisionIncrement`], and the result always tracks at least
//! what the old one tracked.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

use cpa_cfa::{Cfa, CfaNode, CfaNodeId, expressions::Variable};
use cpa_display_utils::join_iterator;
use log::warn;

#[cfg(feature = "config_deserialize")]
use serde::Deserialize;

/// Variables to track additionally, per CFA location
pub type PrecisionIncrement = BTreeMap<CfaNodeId, BTreeSet<Variable>>;

/// Granularity at which tracked variables are recorded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "config_deserialize", derive(Deserialize))]
#[cfg_attr(feature = "config_deserialize", serde(rename_all = "snake_case"))]
pub enum PrecisionScope {
    /// A variable is tracked at the locations it was refined at
    #[default]
    Location,
    /// A variable is tracked in the whole function it was refined in
    Function,
    /// A variable is tracked everywhere
    Global,
}

impl fmt::Display for PrecisionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrecisionScope::Location => write!(f, "location"),
            PrecisionScope::Function => write!(f, "function"),
            PrecisionScope::Global => write!(f, "global"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum ScopeKey {
    Global,
    Function(String),
    Location(CfaNodeId),
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKey::Global => write!(f, "*"),
            ScopeKey::Function(name) => write!(f, "{name}"),
            ScopeKey::Location(id) => write!(f, "{id}"),
        }
    }
}

/// Set of variables an analysis tracks, at a given [`PrecisionScope`]
///
/// Clones are cheap and share the tracked sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableTrackingPrecision {
    scope: PrecisionScope,
    full: bool,
    tracked: Arc<BTreeMap<ScopeKey, BTreeSet<Variable>>>,
}

impl VariableTrackingPrecision {
    /// Precision tracking no variable
    pub fn empty(scope: PrecisionScope) -> Self {
        Self {
            scope,
            full: false,
            tracked: Arc::new(BTreeMap::new()),
        }
    }

    /// Precision tracking every variable everywhere
    pub fn full() -> Self {
        Self {
            scope: PrecisionScope::Global,
            full: true,
            tracked: Arc::new(BTreeMap::new()),
        }
    }

    /// Scope of the precision
    pub fn scope(&self) -> PrecisionScope {
        self.scope
    }

    /// Check whether every variable is tracked
    pub fn is_full(&self) -> bool {
        self.full
    }

    fn key(&self, node: &CfaNode) -> ScopeKey {
        match self.scope {
            PrecisionScope::Location => ScopeKey::Location(node.id()),
            PrecisionScope::Function => ScopeKey::Function(node.function().to_string()),
            PrecisionScope::Global => ScopeKey::Global,
        }
    }

    /// Check whether `var` is tracked at `node`
    pub fn is_tracking(&self, node: &CfaNode, var: &Variable) -> bool {
        self.full
            || self
                .tracked
                .get(&self.key(node))
                .is_some_and(|vars| vars.contains(var))
    }

    /// Variables tracked at `node`, `None` if all variables are tracked
    pub fn tracked_at(&self, node: &CfaNode) -> Option<BTreeSet<Variable>> {
        if self.full {
            return None;
        }
        Some(self.tracked.get(&self.key(node)).cloned().unwrap_or_default())
    }

    /// New precision tracking additionally the variables of `increment`
    ///
    /// Locations unknown to `cfa` are ignored.
    pub fn with_increment(&self, increment: &PrecisionIncrement, cfa: &Cfa) -> Self {
        if self.full {
            return self.clone();
        }
        let mut tracked = (*self.tracked).clone();
        for (loc, vars) in increment.iter().filter(|(_, vars)| !vars.is_empty()) {
            let Some(node) = cfa.node(*loc) else {
                warn!("Ignoring precision increment for unknown location {loc}");
                continue;
            };
            tracked
                .entry(self.key(node))
                .or_default()
                .extend(vars.iter().cloned());
        }
        Self {
            scope: self.scope,
            full: false,
            tracked: Arc::new(tracked),
        }
    }

    /// Check whether `increment` contains a variable not yet tracked
    pub fn is_new_increment(&self, increment: &PrecisionIncrement, cfa: &Cfa) -> bool {
        increment.iter().any(|(loc, vars)| {
            cfa.node(*loc)
                .is_some_and(|node| vars.iter().any(|v| !self.is_tracking(node, v)))
        })
    }

    /// Check whether this precision tracks everything `other` tracks
    pub fn is_at_least_as_precise_as(&self, other: &Self) -> bool {
        if self.full {
            return true;
        }
        if other.full || self.scope != other.scope {
            return false;
        }
        other.tracked.iter().all(|(key, vars)| {
            self.tracked
                .get(key)
                .is_some_and(|own| vars.is_subset(own))
        })
    }

    /// Number of tracked (scope, variable) pairs
    pub fn size(&self) -> usize {
        self.tracked.values().map(|v| v.len()).sum()
    }
}

impl fmt::Display for VariableTrackingPrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.full {
            return write!(f, "full precision");
        }
        write!(
            f,
            "{}",
            join_iterator(
                self.tracked
                    .iter()
                    .map(|(key, vars)| format!("{key}: {{{}}}", join_iterator(vars.iter(), ", "))),
                "; "
            )
        )
    }
}

#[cfg(test)]
mod tests {
    use cpa_cfa::{CfaFunction, EdgeKind, builder::CfaBuilder};

    use super::*;

    fn cfa() -> Cfa {
        CfaBuilder::new("main")
            .with_function(CfaFunction::new("main", CfaNodeId(0), CfaNodeId(2)))
            .unwrap()
            .with_nodes([
                CfaNode::new(CfaNodeId(0), "main"),
                CfaNode::new(CfaNodeId(1), "main"),
                CfaNode::new(CfaNodeId(2), "main"),
            ])
            .unwrap()
            .initialize()
            .with_edge(
                CfaNodeId(0),
                CfaNodeId(1),
                EdgeKind::Blank {
                    description: String::new(),
                },
            )
            .unwrap()
            .with_edge(
                CfaNodeId(1),
                CfaNodeId(2),
                EdgeKind::Blank {
                    description: String::new(),
                },
            )
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_location_scope() {
        let cfa = cfa();
        let x = Variable::new("x");
        let inc = PrecisionIncrement::from([(CfaNodeId(1), BTreeSet::from([x.clone()]))]);

        let empty = VariableTrackingPrecision::empty(PrecisionScope::Location);
        let refined = empty.with_increment(&inc, &cfa);

        assert!(refined.is_tracking(cfa.node(CfaNodeId(1)).unwrap(), &x));
        assert!(!refined.is_tracking(cfa.node(CfaNodeId(2)).unwrap(), &x));
        assert!(!empty.is_tracking(cfa.node(CfaNodeId(1)).unwrap(), &x));
        assert!(empty.is_new_increment(&inc, &cfa));
        assert!(!refined.is_new_increment(&inc, &cfa));
        assert_eq!(refined.size(), 1);
    }

    #[test]
    fn test_function_scope() {
        let cfa = cfa();
        let x = Variable::new("x");
        let inc = PrecisionIncrement::from([(CfaNodeId(1), BTreeSet::from([x.clone()]))]);
        let refined = VariableTrackingPrecision::empty(PrecisionScope::Function).with_increment(&inc, &cfa);
        assert!(refined.is_tracking(cfa.node(CfaNodeId(2)).unwrap(), &x));
    }

    #[test]
    fn test_monotonic_increments() {
        let cfa = cfa();
        let increments = [
            PrecisionIncrement::from([(CfaNodeId(1), BTreeSet::from([Variable::new("x")]))]),
            PrecisionIncrement::from([(CfaNodeId(2), BTreeSet::from([Variable::new("y")]))]),
            PrecisionIncrement::from([(CfaNodeId(1), BTreeSet::from([Variable::new("y")]))]),
            PrecisionIncrement::new(),
        ];

        let mut precision = VariableTrackingPrecision::empty(PrecisionScope::Location);
        for inc in increments.iter() {
            let next = precision.with_increment(inc, &cfa);
            assert!(next.is_at_least_as_precise_as(&precision));
            precision = next;
        }
        assert_eq!(precision.size(), 3);
        assert!(!VariableTrackingPrecision::empty(PrecisionScope::Location).is_at_least_as_precise_as(&precision));
        assert!(VariableTrackingPrecision::full().is_at_least_as_precise_as(&precision));
    }

    #[test]
    fn test_structural_equality_and_display() {
        let cfa = cfa();
        let inc = PrecisionIncrement::from([(CfaNodeId(1), BTreeSet::from([Variable::new("x")]))]);
        let a = VariableTrackingPrecision::empty(PrecisionScope::Location).with_increment(&inc, &cfa);
        let b = VariableTrackingPrecision::empty(PrecisionScope::Location).with_increment(&inc, &cfa);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "N1: {x}");
        assert_eq!(VariableTrackingPrecision::full().to_string(), "full precision");
    }
}
