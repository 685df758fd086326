//! Paths through the ARG
//!
//! An [`ArgPath`] alternates between ARG states and the CFA edges connecting
//! them. It always contains exactly one more state than edges.

use std::fmt;

use cpa_cfa::{Cfa, CfaEdge, CfaNodeId};

use crate::arg::{Arg, ArgStateId};

/// Path of ARG states connected by CFA edges
#[derive(Debug, Clone, PartialEq)]
pub struct ArgPath {
    states: Vec<ArgStateId>,
    locations: Vec<CfaNodeId>,
    edges: Vec<CfaEdge>,
}

impl ArgPath {
    /// States of the path
    pub fn states(&self) -> &[ArgStateId] {
        &self.states
    }

    /// Edges of the path, edge `k` connects state `k` and state `k + 1`
    pub fn edges(&self) -> &[CfaEdge] {
        &self.edges
    }

    /// Location of the `k`-th state
    pub fn location(&self, k: usize) -> Option<CfaNodeId> {
        self.locations.get(k).copied()
    }

    /// Locations of all states
    pub fn locations(&self) -> &[CfaNodeId] {
        &self.locations
    }

    /// First state of the path
    pub fn first_state(&self) -> ArgStateId {
        self.states[0]
    }

    /// Last state of the path
    pub fn last_state(&self) -> ArgStateId {
        self.states[self.states.len() - 1]
    }

    /// Number of edges
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Check whether the path has no edges
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// All edges, with multi edges replaced by their sub-edges
    pub fn full_edges(&self) -> impl Iterator<Item = &CfaEdge> {
        self.edges.iter().flat_map(|e| e.sub_edges())
    }

    /// Path consisting of the first `len` edges
    pub fn prefix(&self, len: usize) -> ArgPath {
        let len = len.min(self.edges.len());
        ArgPath {
            states: self.states[..=len].to_vec(),
            locations: self.locations[..=len].to_vec(),
            edges: self.edges[..len].to_vec(),
        }
    }

    /// Same path with edge `k` replaced by `edge`
    ///
    /// # Panics
    ///
    /// Panics if `edge` does not connect the same locations as the edge it
    /// replaces.
    pub fn with_edge_replaced(&self, k: usize, edge: CfaEdge) -> ArgPath {
        assert_eq!(edge.predecessor(), self.locations[k]);
        assert_eq!(edge.successor(), self.locations[k + 1]);
        let mut path = self.clone();
        path.edges[k] = edge;
        path
    }

    /// Check the structural invariants of the path
    ///
    /// The path must contain one more state than edges, every edge must
    /// leave its predecessor location in `cfa` and connect the locations of
    /// its states in `arg`. Blank edges created as replacement of another
    /// edge only need to connect the right locations.
    pub fn is_valid<S>(&self, cfa: &Cfa, arg: &Arg<S>) -> bool {
        if self.states.len() != self.edges.len() + 1 || self.locations.len() != self.states.len() {
            return false;
        }
        let locations_match = self
            .states
            .iter()
            .zip(self.locations.iter())
            .all(|(s, loc)| arg.state(*s).is_some_and(|s| s.location() == *loc));

        locations_match
            && self.edges.iter().enumerate().all(|(k, edge)| {
                edge.predecessor() == self.locations[k]
                    && edge.successor() == self.locations[k + 1]
                    && (cfa.has_edge(edge)
                        || (edge.is_blank()
                            && cfa.edge(edge.id()).is_some_and(|orig| {
                                orig.predecessor() == edge.predecessor()
                                    && orig.successor() == edge.successor()
                            })))
            })
    }
}

impl fmt::Display for ArgPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.states[0])?;
        for (edge, state) in self.edges.iter().zip(self.states.iter().skip(1)) {
            write!(f, " -[{}]-> {state}", edge.kind())?;
        }
        Ok(())
    }
}

/// Builder assembling an [`ArgPath`] front to back
#[derive(Debug, Clone)]
pub struct ArgPathBuilder {
    path: ArgPath,
}

impl ArgPathBuilder {
    /// Start a path at `state` located at `location`
    pub fn new(state: ArgStateId, location: CfaNodeId) -> Self {
        Self {
            path: ArgPath {
                states: vec![state],
                locations: vec![location],
                edges: Vec::new(),
            },
        }
    }

    /// Append `edge` leading to `state`
    pub fn add(mut self, edge: CfaEdge, state: ArgStateId) -> Self {
        self.path.locations.push(edge.successor());
        self.path.edges.push(edge);
        self.path.states.push(state);
        self
    }

    /// Remove the last edge and state, the first state is always kept
    pub fn remove_last(mut self) -> Self {
        if !self.path.edges.is_empty() {
            self.path.edges.pop();
            self.path.states.pop();
            self.path.locations.pop();
        }
        self
    }

    /// Finish the path
    pub fn build(self) -> ArgPath {
        self.path
    }
}

/// Path from the root of `arg` to `target`
///
/// If `target` is covered, the path leads to its covering state instead. At
/// states with multiple parents the parent with the smallest identifier is
/// chosen.
///
/// # Panics
///
/// Panics if `target` is not part of `arg`, or if the ARG is inconsistent.
pub fn get_one_path_to<S>(arg: &Arg<S>, target: ArgStateId) -> ArgPath {
    let target = arg.resolve_covering(target);
    let mut states = vec![target];
    let mut current = target;
    loop {
        let state = match arg.state(current) {
            Some(s) => s,
            None => panic!("state {current} on path is not in the ARG"),
        };
        let Some(parent) = state.parents().next() else {
            break;
        };
        states.push(parent);
        current = parent;
    }
    states.reverse();

    let first = arg
        .state(states[0])
        .map(|s| s.location())
        .unwrap_or_else(|| panic!("state {} on path is not in the ARG", states[0]));
    let mut builder = ArgPathBuilder::new(states[0], first);
    for pair in states.windows(2) {
        let edge = match arg.edge(pair[0], pair[1]) {
            Some(e) => e.clone(),
            None => panic!("missing ARG edge between {} and {}", pair[0], pair[1]),
        };
        builder = builder.add(edge, pair[1]);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use cpa_cfa::{CfaFunction, CfaNode, EdgeKind, builder::CfaBuilder};

    use super::*;

    fn cfa() -> Cfa {
        let blank = || EdgeKind::Blank {
            description: String::new(),
        };
        CfaBuilder::new("main")
            .with_function(CfaFunction::new("main", CfaNodeId(0), CfaNodeId(2)))
            .unwrap()
            .with_nodes((0..3).map(|i| CfaNode::new(CfaNodeId(i), "main")))
            .unwrap()
            .initialize()
            .with_edges([
                (CfaNodeId(0), CfaNodeId(1), blank()),
                (CfaNodeId(1), CfaNodeId(2), blank()),
                (CfaNodeId(0), CfaNodeId(2), blank()),
            ])
            .unwrap()
            .build()
            .unwrap()
    }

    fn cfa_edge(cfa: &Cfa, from: u32, to: u32) -> CfaEdge {
        cfa.leaving_edges(CfaNodeId(from))
            .find(|e| e.successor() == CfaNodeId(to))
            .unwrap()
            .clone()
    }

    #[test]
    fn test_path_through_covering() {
        let cfa = cfa();
        let mut arg = Arg::new();
        let s0 = arg.create_root(CfaNodeId(0), (), BTreeSet::new());
        let s1 = arg.add_child(s0, &cfa_edge(&cfa, 0, 1), (), BTreeSet::new());
        let s2 = arg.add_child(s1, &cfa_edge(&cfa, 1, 2), (), BTreeSet::new());
        let s3 = arg.add_child(s0, &cfa_edge(&cfa, 0, 2), (), BTreeSet::new());
        arg.set_covered(s3, s2);

        let path = get_one_path_to(&arg, s3);
        assert_eq!(path.states(), &[s0, s1, s2]);
        assert_eq!(path.len(), 2);
        assert_eq!(path.locations(), &[CfaNodeId(0), CfaNodeId(1), CfaNodeId(2)]);
        assert!(path.is_valid(&cfa, &arg));

        let prefix = path.prefix(1);
        assert_eq!(prefix.states(), &[s0, s1]);
        assert_eq!(prefix.last_state(), s1);
        assert!(prefix.is_valid(&cfa, &arg));
    }

    #[test]
    fn test_noop_replacement_stays_valid() {
        let cfa = cfa();
        let mut arg = Arg::new();
        let s0 = arg.create_root(CfaNodeId(0), (), BTreeSet::new());
        let e = cfa_edge(&cfa, 0, 2);
        let s1 = arg.add_child(s0, &e, (), BTreeSet::new());

        let path = get_one_path_to(&arg, s1).with_edge_replaced(0, e.noop());
        assert!(path.is_valid(&cfa, &arg));
        assert!(path.edges()[0].is_blank());
    }

    #[test]
    fn test_invalid_edge() {
        let cfa = cfa();
        let mut arg = Arg::new();
        let s0 = arg.create_root(CfaNodeId(0), (), BTreeSet::new());
        let s1 = arg.add_child(s0, &cfa_edge(&cfa, 0, 1), (), BTreeSet::new());

        let bogus = CfaEdge::new(
            cpa_cfa::CfaEdgeId(99),
            CfaNodeId(0),
            CfaNodeId(1),
            EdgeKind::Blank {
                description: "bogus".into(),
            },
        );
        let path = ArgPathBuilder::new(s0, CfaNodeId(0)).add(bogus, s1).build();
        assert!(!path.is_valid(&cfa, &arg));
    }

    #[test]
    fn test_builder_remove_last() {
        let cfa = cfa();
        let path = ArgPathBuilder::new(ArgStateId(0), CfaNodeId(0))
            .add(cfa_edge(&cfa, 0, 1), ArgStateId(1))
            .remove_last()
            .remove_last()
            .build();
        assert_eq!(path.states(), &[ArgStateId(0)]);
        assert!(path.is_empty());
    }
}
