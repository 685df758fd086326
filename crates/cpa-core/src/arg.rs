//! Abstract reachability graph (ARG)
//!
//! The ARG records which abstract state was derived from which other state
//! by which CFA edge. States live in an arena and refer to each other by
//! [`ArgStateId`], so pruning a subtree only invalidates ids and never leaves
//! dangling references behind.
//!
//! Covering is a side relation: a covered state is subsumed by its covering
//! state, has no children, and is not part of the parent/child DAG order.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    fmt,
};

use cpa_cfa::{CfaEdge, CfaNodeId};
use cpa_display_utils::join_iterator;
use log::trace;

/// Identifier of a state in an [`Arg`]
///
/// Identifiers increase monotonically in the order states are created and
/// are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArgStateId(pub usize);

impl fmt::Display for ArgStateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// State of the ARG wrapping an abstract state at a CFA location
#[derive(Debug, Clone, PartialEq)]
pub struct ArgState<S> {
    id: ArgStateId,
    location: CfaNodeId,
    wrapped: S,
    parents: BTreeSet<ArgStateId>,
    children: BTreeSet<ArgStateId>,
    covered_by: Option<ArgStateId>,
    covers: BTreeSet<ArgStateId>,
    violated_properties: BTreeSet<String>,
}

impl<S> ArgState<S> {
    /// Identifier of the state
    pub fn id(&self) -> ArgStateId {
        self.id
    }

    /// CFA location of the state
    pub fn location(&self) -> CfaNodeId {
        self.location
    }

    /// Wrapped abstract state
    pub fn wrapped(&self) -> &S {
        &self.wrapped
    }

    /// Parents of the state
    pub fn parents(&self) -> impl Iterator<Item = ArgStateId> + '_ {
        self.parents.iter().copied()
    }

    /// Children of the state
    pub fn children(&self) -> impl Iterator<Item = ArgStateId> + '_ {
        self.children.iter().copied()
    }

    /// State covering this state, if any
    pub fn covered_by(&self) -> Option<ArgStateId> {
        self.covered_by
    }

    /// Check whether the state is covered
    pub fn is_covered(&self) -> bool {
        self.covered_by.is_some()
    }

    /// States covered by this state
    pub fn covers(&self) -> impl Iterator<Item = ArgStateId> + '_ {
        self.covers.iter().copied()
    }

    /// Check whether the state violates a property
    pub fn is_target(&self) -> bool {
        !self.violated_properties.is_empty()
    }

    /// Properties violated in this state
    pub fn violated_properties(&self) -> &BTreeSet<String> {
        &self.violated_properties
    }
}

impl<S: fmt::Display> fmt::Display for ArgState<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}: {}", self.id, self.location, self.wrapped)?;
        if let Some(cover) = self.covered_by {
            write!(f, " (covered by {cover})")?;
        }
        if self.is_target() {
            write!(f, " (target: {})", join_iterator(self.violated_properties.iter(), ", "))?;
        }
        Ok(())
    }
}

/// Abstract reachability graph
#[derive(Debug, Clone, PartialEq)]
pub struct Arg<S> {
    states: Vec<Option<ArgState<S>>>,
    edges: BTreeMap<(ArgStateId, ArgStateId), CfaEdge>,
    root: Option<ArgStateId>,
}

impl<S> Default for Arg<S> {
    fn default() -> Self {
        Self {
            states: Vec::new(),
            edges: BTreeMap::new(),
            root: None,
        }
    }
}

impl<S> Arg<S> {
    /// Empty ARG
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the root state
    ///
    /// # Panics
    ///
    /// Panics if the ARG already has a root.
    pub fn create_root(
        &mut self,
        location: CfaNodeId,
        wrapped: S,
        violated_properties: BTreeSet<String>,
    ) -> ArgStateId {
        assert!(self.root.is_none(), "ARG already has a root");
        let id = self.push_state(location, wrapped, violated_properties);
        self.root = Some(id);
        id
    }

    /// Create a successor of `parent` reached via `edge`
    ///
    /// # Panics
    ///
    /// Panics if `parent` is not in the ARG.
    pub fn add_child(
        &mut self,
        parent: ArgStateId,
        edge: &CfaEdge,
        wrapped: S,
        violated_properties: BTreeSet<String>,
    ) -> ArgStateId {
        let id = self.push_state(edge.successor(), wrapped, violated_properties);
        self.add_parent_edge(parent, id, edge);
        id
    }

    /// Add `edge` from `parent` to an existing state `child`
    ///
    /// # Panics
    ///
    /// Panics if one of the states is not in the ARG.
    pub fn add_parent_edge(&mut self, parent: ArgStateId, child: ArgStateId, edge: &CfaEdge) {
        self.expect_state_mut(parent).children.insert(child);
        self.expect_state_mut(child).parents.insert(parent);
        self.edges.insert((parent, child), edge.clone());
    }

    fn push_state(
        &mut self,
        location: CfaNodeId,
        wrapped: S,
        violated_properties: BTreeSet<String>,
    ) -> ArgStateId {
        let id = ArgStateId(self.states.len());
        trace!("Creating ARG state {id} at {location}");
        self.states.push(Some(ArgState {
            id,
            location,
            wrapped,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            covered_by: None,
            covers: BTreeSet::new(),
            violated_properties,
        }));
        id
    }

    /// Root state of the ARG
    pub fn root(&self) -> Option<ArgStateId> {
        self.root
    }

    /// State with identifier `id`, if it is still part of the ARG
    pub fn state(&self, id: ArgStateId) -> Option<&ArgState<S>> {
        self.states.get(id.0).and_then(|s| s.as_ref())
    }

    /// Check whether `id` is still part of the ARG
    pub fn contains(&self, id: ArgStateId) -> bool {
        self.state(id).is_some()
    }

    /// All states of the ARG ordered by identifier
    pub fn states(&self) -> impl Iterator<Item = &ArgState<S>> {
        self.states.iter().flatten()
    }

    /// Number of states in the ARG
    pub fn len(&self) -> usize {
        self.states().count()
    }

    /// Check whether the ARG has no states
    pub fn is_empty(&self) -> bool {
        self.states().next().is_none()
    }

    /// CFA edge between `parent` and `child`
    pub fn edge(&self, parent: ArgStateId, child: ArgStateId) -> Option<&CfaEdge> {
        self.edges.get(&(parent, child))
    }

    /// All non-covered target states
    pub fn target_states(&self) -> impl Iterator<Item = &ArgState<S>> {
        self.states().filter(|s| s.is_target() && !s.is_covered())
    }

    fn expect_state(&self, id: ArgStateId) -> &ArgState<S> {
        match self.state(id) {
            Some(state) => state,
            None => panic!("ARG state {id} does not exist"),
        }
    }

    fn expect_state_mut(&mut self, id: ArgStateId) -> &mut ArgState<S> {
        match self.states.get_mut(id.0).and_then(|s| s.as_mut()) {
            Some(state) => state,
            None => panic!("ARG state {id} does not exist"),
        }
    }

    /// Replace the abstract state wrapped by `id`
    pub(crate) fn set_wrapped(&mut self, id: ArgStateId, wrapped: S) {
        self.expect_state_mut(id).wrapped = wrapped;
    }

    /// Mark `covered` as covered by `by`
    ///
    /// # Panics
    ///
    /// Panics if `covered` already has children, as a covered state must not
    /// contribute successors.
    pub fn set_covered(&mut self, covered: ArgStateId, by: ArgStateId) {
        assert_ne!(covered, by, "state cannot cover itself");
        let state = self.expect_state_mut(covered);
        assert!(
            state.children.is_empty(),
            "covered state {covered} must not have children"
        );
        if let Some(old) = state.covered_by.replace(by) {
            self.expect_state_mut(old).covers.remove(&covered);
        }
        self.expect_state_mut(by).covers.insert(covered);
    }

    /// Remove the covering of `id`, if any
    pub fn uncover(&mut self, id: ArgStateId) {
        if let Some(by) = self.expect_state_mut(id).covered_by.take() {
            if let Some(cover) = self.states.get_mut(by.0).and_then(|s| s.as_mut()) {
                cover.covers.remove(&id);
            }
        }
    }

    /// Follow covering links starting at `id` to a non-covered state
    pub fn resolve_covering(&self, id: ArgStateId) -> ArgStateId {
        let mut current = id;
        let mut visited = BTreeSet::new();
        while let Some(next) = self.state(current).and_then(|s| s.covered_by) {
            if !visited.insert(current) {
                break;
            }
            current = next;
        }
        current
    }

    /// Remove `id` with all its links from the ARG
    ///
    /// Returns the states that were covered by `id`; they are no longer
    /// covered afterwards.
    pub fn remove_from_arg(&mut self, id: ArgStateId) -> BTreeSet<ArgStateId> {
        let Some(state) = self.states.get_mut(id.0).and_then(|s| s.take()) else {
            return BTreeSet::new();
        };
        trace!("Removing ARG state {id}");

        for parent in state.parents.iter() {
            self.edges.remove(&(*parent, id));
            if let Some(p) = self.states.get_mut(parent.0).and_then(|s| s.as_mut()) {
                p.children.remove(&id);
            }
        }
        for child in state.children.iter() {
            self.edges.remove(&(id, *child));
            if let Some(c) = self.states.get_mut(child.0).and_then(|s| s.as_mut()) {
                c.parents.remove(&id);
            }
        }
        if let Some(by) = state.covered_by {
            if let Some(cover) = self.states.get_mut(by.0).and_then(|s| s.as_mut()) {
                cover.covers.remove(&id);
            }
        }
        for covered in state.covers.iter() {
            if let Some(c) = self.states.get_mut(covered.0).and_then(|s| s.as_mut()) {
                c.covered_by = None;
            }
        }
        if self.root == Some(id) {
            self.root = None;
        }

        state.covers
    }

    /// All states reachable from `root` via child edges, including `root`
    pub fn subtree(&self, root: ArgStateId) -> BTreeSet<ArgStateId> {
        let mut result = BTreeSet::new();
        let mut queue = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            if !result.insert(id) {
                continue;
            }
            if let Some(state) = self.state(id) {
                queue.extend(state.children.iter().copied());
            }
        }
        result
    }

    /// States reachable from the root without passing through `avoid`
    pub(crate) fn reachable_avoiding(&self, avoid: ArgStateId) -> BTreeSet<ArgStateId> {
        let mut result = BTreeSet::new();
        let Some(root) = self.root else {
            return result;
        };
        if root == avoid {
            return result;
        }
        let mut queue = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            if !result.insert(id) {
                continue;
            }
            if let Some(state) = self.state(id) {
                queue.extend(state.children.iter().copied().filter(|c| *c != avoid));
            }
        }
        result
    }

    /// Check whether `ancestor` equals `id` or reaches it via child edges
    pub fn is_ancestor(&self, ancestor: ArgStateId, id: ArgStateId) -> bool {
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            if current == ancestor {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(state) = self.state(current) {
                queue.extend(state.parents.iter().copied());
            }
        }
        false
    }

    /// Check that no state is its own descendant
    ///
    /// Covering links are not considered.
    pub fn is_acyclic(&self) -> bool {
        // Kahn's algorithm: all states must be removable in topological order
        let mut in_degree: BTreeMap<ArgStateId, usize> =
            self.states().map(|s| (s.id, s.parents.len())).collect();
        let mut queue: VecDeque<ArgStateId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut removed = 0;
        while let Some(id) = queue.pop_front() {
            removed += 1;
            for child in self.expect_state(id).children.iter() {
                if let Some(d) = in_degree.get_mut(child) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(*child);
                    }
                }
            }
        }
        removed == in_degree.len()
    }
}

impl<S: Clone> Arg<S> {
    /// Copy all states reachable from `root` into a new ARG
    ///
    /// Identifiers are preserved. Links to states outside the copied part,
    /// including covering links, are dropped.
    pub fn copy_subgraph(&self, root: ArgStateId) -> Arg<S> {
        let reachable = self.subtree(root);
        // states covering a copied state are copied as well
        let covering: BTreeSet<_> = reachable
            .iter()
            .filter_map(|id| self.state(*id).and_then(|s| s.covered_by))
            .flat_map(|c| self.subtree(c))
            .collect();
        let copied: BTreeSet<_> = reachable.union(&covering).copied().collect();

        let mut states: Vec<Option<ArgState<S>>> = vec![None; self.states.len()];
        for id in copied.iter() {
            if let Some(state) = self.state(*id) {
                let mut copy = state.clone();
                copy.parents.retain(|p| copied.contains(p));
                copy.children.retain(|c| copied.contains(c));
                copy.covers.retain(|c| copied.contains(c));
                if copy.covered_by.is_some_and(|c| !copied.contains(&c)) {
                    copy.covered_by = None;
                }
                states[id.0] = Some(copy);
            }
        }

        let edges = self
            .edges
            .iter()
            .filter(|((p, c), _)| copied.contains(p) && copied.contains(c))
            .map(|(k, e)| (*k, e.clone()))
            .collect();

        Arg {
            states,
            edges,
            root: Some(root),
        }
    }
}

impl<S: fmt::Display> fmt::Display for Arg<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for state in self.states() {
            writeln!(f, "{state}")?;
            for child in state.children.iter() {
                if let Some(edge) = self.edge(state.id, *child) {
                    writeln!(f, "  -> {child} via {edge}")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cpa_cfa::{CfaEdgeId, EdgeKind};

    use super::*;

    fn edge(id: u32, from: u32, to: u32) -> CfaEdge {
        CfaEdge::new(
            CfaEdgeId(id),
            CfaNodeId(from),
            CfaNodeId(to),
            EdgeKind::Blank {
                description: String::new(),
            },
        )
    }

    /// s0 -> s1 -> s2, s0 -> s3, with s3 covered by s1
    fn small_arg() -> Arg<u32> {
        let mut arg = Arg::new();
        let s0 = arg.create_root(CfaNodeId(0), 0, BTreeSet::new());
        let s1 = arg.add_child(s0, &edge(0, 0, 1), 1, BTreeSet::new());
        let _s2 = arg.add_child(s1, &edge(1, 1, 2), 2, BTreeSet::from(["p".to_string()]));
        let s3 = arg.add_child(s0, &edge(2, 0, 1), 3, BTreeSet::new());
        arg.set_covered(s3, s1);
        arg
    }

    #[test]
    fn test_structure() {
        let arg = small_arg();
        assert_eq!(arg.len(), 4);
        assert_eq!(arg.root(), Some(ArgStateId(0)));

        let s1 = arg.state(ArgStateId(1)).unwrap();
        assert_eq!(s1.location(), CfaNodeId(1));
        assert_eq!(s1.parents().collect::<Vec<_>>(), vec![ArgStateId(0)]);
        assert_eq!(s1.covers().collect::<Vec<_>>(), vec![ArgStateId(3)]);

        assert_eq!(
            arg.target_states().map(|s| s.id()).collect::<Vec<_>>(),
            vec![ArgStateId(2)]
        );
        assert_eq!(arg.edge(ArgStateId(1), ArgStateId(2)).unwrap().id(), CfaEdgeId(1));
        assert!(arg.is_acyclic());
    }

    #[test]
    fn test_resolve_covering() {
        let arg = small_arg();
        assert_eq!(arg.resolve_covering(ArgStateId(3)), ArgStateId(1));
        assert_eq!(arg.resolve_covering(ArgStateId(2)), ArgStateId(2));
    }

    #[test]
    fn test_remove_uncovers() {
        let mut arg = small_arg();
        let uncovered = arg.remove_from_arg(ArgStateId(1));
        assert_eq!(uncovered, BTreeSet::from([ArgStateId(3)]));
        assert!(!arg.contains(ArgStateId(1)));
        assert!(!arg.state(ArgStateId(3)).unwrap().is_covered());
        assert_eq!(arg.state(ArgStateId(2)).unwrap().parents().count(), 0);
        assert!(arg.edge(ArgStateId(0), ArgStateId(1)).is_none());
    }

    #[test]
    fn test_subtree_and_ancestry() {
        let arg = small_arg();
        assert_eq!(
            arg.subtree(ArgStateId(1)),
            BTreeSet::from([ArgStateId(1), ArgStateId(2)])
        );
        assert!(arg.is_ancestor(ArgStateId(0), ArgStateId(2)));
        assert!(arg.is_ancestor(ArgStateId(2), ArgStateId(2)));
        assert!(!arg.is_ancestor(ArgStateId(3), ArgStateId(2)));
        assert_eq!(
            arg.reachable_avoiding(ArgStateId(1)),
            BTreeSet::from([ArgStateId(0), ArgStateId(3)])
        );
    }

    #[test]
    fn test_cycle_detected() {
        let mut arg = small_arg();
        arg.add_parent_edge(ArgStateId(2), ArgStateId(1), &edge(3, 2, 1));
        assert!(!arg.is_acyclic());
    }

    #[test]
    #[should_panic(expected = "must not have children")]
    fn test_cover_with_children_panics() {
        let mut arg = small_arg();
        arg.set_covered(ArgStateId(1), ArgStateId(3));
    }

    #[test]
    fn test_copy_subgraph_keeps_covering() {
        let arg = small_arg();
        let copy = arg.copy_subgraph(ArgStateId(0));
        assert_eq!(copy, arg);

        let partial = arg.copy_subgraph(ArgStateId(1));
        assert_eq!(partial.len(), 2);
        assert_eq!(partial.root(), Some(ArgStateId(1)));
        assert!(partial.state(ArgStateId(1)).unwrap().parents().next().is_none());
        assert!(partial.state(ArgStateId(1)).unwrap().covers().next().is_none());
    }
}
