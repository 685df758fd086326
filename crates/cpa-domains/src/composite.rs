//! Product of the callstack, value and interval domains
//!
//! A [`CompositeCpa`] runs its components side by side. Successors are the
//! cartesian product of the component successors, merge is "merge-agree"
//! and a state is covered only if a single reached state covers every
//! component.

use std::{fmt, sync::Arc};

use cpa_cfa::{Cfa, CfaEdge, CfaNode};
use cpa_core::{
    ConfigurableProgramAnalysis, WrapperPrecision, error::CpaError,
    precision::VariableTrackingPrecision,
};
use cpa_display_utils::join_iterator;

use crate::{
    callstack::{CallstackCpa, CallstackState},
    interval::{IntervalAnalysisCpa, IntervalAnalysisState},
    value::{ValueAnalysisCpa, ValueAnalysisState},
};

/// Kind of a component of the composite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    /// [`CallstackCpa`]
    Callstack,
    /// [`ValueAnalysisCpa`]
    Value,
    /// [`IntervalAnalysisCpa`]
    Interval,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::Callstack => write!(f, "callstack"),
            ComponentKind::Value => write!(f, "value"),
            ComponentKind::Interval => write!(f, "interval"),
        }
    }
}

/// Component analysis
#[derive(Debug, Clone)]
pub enum AnalysisComponent {
    /// Callstack
    Callstack(CallstackCpa),
    /// Explicit values
    Value(ValueAnalysisCpa),
    /// Intervals
    Interval(IntervalAnalysisCpa),
}

impl AnalysisComponent {
    /// Kind of the component
    pub fn kind(&self) -> ComponentKind {
        match self {
            AnalysisComponent::Callstack(_) => ComponentKind::Callstack,
            AnalysisComponent::Value(_) => ComponentKind::Value,
            AnalysisComponent::Interval(_) => ComponentKind::Interval,
        }
    }
}

/// State of one component
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ComponentState {
    /// Callstack
    Callstack(CallstackState),
    /// Explicit values
    Value(ValueAnalysisState),
    /// Intervals
    Interval(IntervalAnalysisState),
}

impl ComponentState {
    /// Kind of the component
    pub fn kind(&self) -> ComponentKind {
        match self {
            ComponentState::Callstack(_) => ComponentKind::Callstack,
            ComponentState::Value(_) => ComponentKind::Value,
            ComponentState::Interval(_) => ComponentKind::Interval,
        }
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentState::Callstack(s) => write!(f, "{s}"),
            ComponentState::Value(s) => write!(f, "{s}"),
            ComponentState::Interval(s) => write!(f, "{s}"),
        }
    }
}

/// Precision of one component
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentPrecision {
    /// The callstack has no precision
    Callstack,
    /// Variables the value analysis tracks
    Value(VariableTrackingPrecision),
    /// Variables the interval analysis tracks
    Interval(VariableTrackingPrecision),
}

impl ComponentPrecision {
    /// Kind of the component
    pub fn kind(&self) -> ComponentKind {
        match self {
            ComponentPrecision::Callstack => ComponentKind::Callstack,
            ComponentPrecision::Value(_) => ComponentKind::Value,
            ComponentPrecision::Interval(_) => ComponentKind::Interval,
        }
    }

    /// Variable precision of value and interval components
    pub fn variables(&self) -> Option<&VariableTrackingPrecision> {
        match self {
            ComponentPrecision::Callstack => None,
            ComponentPrecision::Value(p) | ComponentPrecision::Interval(p) => Some(p),
        }
    }
}

impl fmt::Display for ComponentPrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentPrecision::Callstack => write!(f, "callstack"),
            ComponentPrecision::Value(p) => write!(f, "value: {p}"),
            ComponentPrecision::Interval(p) => write!(f, "interval: {p}"),
        }
    }
}

/// State of a [`CompositeCpa`], one entry per component
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeState(Vec<ComponentState>);

impl CompositeState {
    /// Composite of `components`
    pub fn new(components: Vec<ComponentState>) -> Self {
        Self(components)
    }

    /// Component states in component order
    pub fn components(&self) -> &[ComponentState] {
        &self.0
    }

    /// Value component, if present
    pub fn value(&self) -> Option<&ValueAnalysisState> {
        self.0.iter().find_map(|c| match c {
            ComponentState::Value(s) => Some(s),
            _ => None,
        })
    }

    /// Interval component, if present
    pub fn interval(&self) -> Option<&IntervalAnalysisState> {
        self.0.iter().find_map(|c| match c {
            ComponentState::Interval(s) => Some(s),
            _ => None,
        })
    }

    /// Callstack component, if present
    pub fn callstack(&self) -> Option<&CallstackState> {
        self.0.iter().find_map(|c| match c {
            ComponentState::Callstack(s) => Some(s),
            _ => None,
        })
    }
}

impl fmt::Display for CompositeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", join_iterator(self.0.iter(), ", "))
    }
}

/// Precision of a [`CompositeCpa`], one entry per component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositePrecision(Vec<ComponentPrecision>);

impl CompositePrecision {
    /// Composite of `components`
    pub fn new(components: Vec<ComponentPrecision>) -> Self {
        Self(components)
    }

    /// Component precisions in component order
    pub fn components(&self) -> &[ComponentPrecision] {
        &self.0
    }

    /// Variable precision of the component of kind `kind`
    pub fn variables_of(&self, kind: ComponentKind) -> Option<&VariableTrackingPrecision> {
        self.retrieve_matching(|c| c.kind() == kind)
            .and_then(ComponentPrecision::variables)
    }
}

impl WrapperPrecision for CompositePrecision {
    type Component = ComponentPrecision;

    fn replace_matching(
        &self,
        new_component: &ComponentPrecision,
        predicate: impl Fn(&ComponentPrecision) -> bool,
    ) -> Self {
        Self(
            self.0
                .iter()
                .map(|c| {
                    if predicate(c) {
                        new_component.clone()
                    } else {
                        c.clone()
                    }
                })
                .collect(),
        )
    }

    fn retrieve_matching(
        &self,
        predicate: impl Fn(&ComponentPrecision) -> bool,
    ) -> Option<&ComponentPrecision> {
        self.0.iter().find(|c| predicate(c))
    }
}

impl fmt::Display for CompositePrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", join_iterator(self.0.iter(), "; "))
    }
}

/// Product analysis of several components
#[derive(Debug, Clone)]
pub struct CompositeCpa {
    components: Vec<AnalysisComponent>,
}

impl CompositeCpa {
    /// Composite of `components`
    pub fn new(components: Vec<AnalysisComponent>) -> Self {
        Self { components }
    }

    /// Composite of a callstack analysis and one analysis per entry of
    /// `kinds`, each starting with `precision`
    pub fn with_kinds(
        cfa: Arc<Cfa>,
        kinds: impl IntoIterator<Item = ComponentKind>,
        precision: VariableTrackingPrecision,
    ) -> Self {
        let mut components = vec![AnalysisComponent::Callstack(CallstackCpa::new(cfa.clone()))];
        for kind in kinds {
            match kind {
                ComponentKind::Callstack => {}
                ComponentKind::Value => components.push(AnalysisComponent::Value(
                    ValueAnalysisCpa::new(cfa.clone(), precision.clone()),
                )),
                ComponentKind::Interval => components.push(AnalysisComponent::Interval(
                    IntervalAnalysisCpa::new(cfa.clone(), precision.clone()),
                )),
            }
        }
        Self { components }
    }

    /// Kinds of the components in component order
    pub fn kinds(&self) -> impl Iterator<Item = ComponentKind> + '_ {
        self.components.iter().map(AnalysisComponent::kind)
    }

    fn components_of<'a>(
        &'a self,
        state: &'a CompositeState,
        precision: &'a CompositePrecision,
    ) -> impl Iterator<Item = (&'a AnalysisComponent, &'a ComponentState, &'a ComponentPrecision)>
    {
        debug_assert_eq!(self.components.len(), state.0.len());
        debug_assert_eq!(self.components.len(), precision.0.len());
        self.components
            .iter()
            .zip(state.0.iter())
            .zip(precision.0.iter())
            .map(|((c, s), p)| (c, s, p))
    }
}

fn mismatch(component: &AnalysisComponent, state: &ComponentState) -> CpaError {
    CpaError::unrecognized(format!(
        "state of kind {} passed to component {}",
        state.kind(),
        component.kind()
    ))
}

fn successors_of(
    component: &AnalysisComponent,
    state: &ComponentState,
    precision: &ComponentPrecision,
    edge: &CfaEdge,
) -> Result<Vec<ComponentState>, CpaError> {
    match (component, state, precision) {
        (AnalysisComponent::Callstack(cpa), ComponentState::Callstack(s), _) => Ok(cpa
            .abstract_successors_for_edge(s, &(), edge)?
            .into_iter()
            .map(ComponentState::Callstack)
            .collect()),
        (AnalysisComponent::Value(cpa), ComponentState::Value(s), ComponentPrecision::Value(p)) => {
            Ok(cpa
                .abstract_successors_for_edge(s, p, edge)?
                .into_iter()
                .map(ComponentState::Value)
                .collect())
        }
        (
            AnalysisComponent::Interval(cpa),
            ComponentState::Interval(s),
            ComponentPrecision::Interval(p),
        ) => Ok(cpa
            .abstract_successors_for_edge(s, p, edge)?
            .into_iter()
            .map(ComponentState::Interval)
            .collect()),
        _ => Err(mismatch(component, state)),
    }
}

impl ConfigurableProgramAnalysis for CompositeCpa {
    type State = CompositeState;
    type Precision = CompositePrecision;

    fn initial_state(&self, node: &CfaNode) -> CompositeState {
        CompositeState(
            self.components
                .iter()
                .map(|c| match c {
                    AnalysisComponent::Callstack(cpa) => {
                        ComponentState::Callstack(cpa.initial_state(node))
                    }
                    AnalysisComponent::Value(cpa) => ComponentState::Value(cpa.initial_state(node)),
                    AnalysisComponent::Interval(cpa) => {
                        ComponentState::Interval(cpa.initial_state(node))
                    }
                })
                .collect(),
        )
    }

    fn initial_precision(&self, node: &CfaNode) -> CompositePrecision {
        CompositePrecision(
            self.components
                .iter()
                .map(|c| match c {
                    AnalysisComponent::Callstack(_) => ComponentPrecision::Callstack,
                    AnalysisComponent::Value(cpa) => {
                        ComponentPrecision::Value(cpa.initial_precision(node))
                    }
                    AnalysisComponent::Interval(cpa) => {
                        ComponentPrecision::Interval(cpa.initial_precision(node))
                    }
                })
                .collect(),
        )
    }

    fn abstract_successors_for_edge(
        &self,
        state: &CompositeState,
        precision: &CompositePrecision,
        edge: &CfaEdge,
    ) -> Result<Vec<CompositeState>, CpaError> {
        let mut products: Vec<Vec<ComponentState>> = vec![Vec::new()];
        for (component, s, p) in self.components_of(state, precision) {
            let successors = successors_of(component, s, p, edge)?;
            if successors.is_empty() {
                return Ok(Vec::new());
            }
            products = products
                .into_iter()
                .flat_map(|prefix| {
                    successors.iter().map(move |succ| {
                        let mut next = prefix.clone();
                        next.push(succ.clone());
                        next
                    })
                })
                .collect();
        }
        Ok(products.into_iter().map(CompositeState).collect())
    }

    fn merge(
        &self,
        successor: &CompositeState,
        reached: &CompositeState,
        _precision: &CompositePrecision,
    ) -> CompositeState {
        let agree = successor
            .0
            .iter()
            .zip(reached.0.iter())
            .all(|(s, r)| matches!(s, ComponentState::Interval(_)) || s == r);
        if !agree {
            return reached.clone();
        }
        CompositeState(
            successor
                .0
                .iter()
                .zip(reached.0.iter())
                .map(|(s, r)| match (s, r) {
                    (ComponentState::Interval(s), ComponentState::Interval(r)) => {
                        ComponentState::Interval(s.join(r))
                    }
                    _ => r.clone(),
                })
                .collect(),
        )
    }

    fn widen(
        &self,
        previous: &CompositeState,
        next: &CompositeState,
        _precision: &CompositePrecision,
    ) -> CompositeState {
        CompositeState(
            previous
                .0
                .iter()
                .zip(next.0.iter())
                .map(|(p, n)| match (p, n) {
                    (ComponentState::Interval(p), ComponentState::Interval(n)) => {
                        ComponentState::Interval(p.widen(n))
                    }
                    _ => n.clone(),
                })
                .collect(),
        )
    }

    fn is_less_or_equal(&self, state: &CompositeState, other: &CompositeState) -> bool {
        state.0.len() == other.0.len()
            && state
                .0
                .iter()
                .zip(other.0.iter())
                .all(|pair| match pair {
                    (ComponentState::Callstack(s), ComponentState::Callstack(o)) => s == o,
                    (ComponentState::Value(s), ComponentState::Value(o)) => s.is_less_or_equal(o),
                    (ComponentState::Interval(s), ComponentState::Interval(o)) => {
                        s.is_less_or_equal(o)
                    }
                    _ => false,
                })
    }
}

#[cfg(test)]
mod tests {
    use cpa_cfa::{
        CfaFunction, CfaNodeId, EdgeKind,
        builder::CfaBuilder,
        expressions::{BooleanExpression, ComparisonOp, IntegerExpression, Variable},
    };
    use cpa_core::precision::PrecisionScope;

    use super::*;
    use crate::interval::Interval;

    fn x() -> Variable {
        Variable::new_local("main", "x")
    }

    fn cfa() -> Arc<Cfa> {
        let cfa = CfaBuilder::new("main")
            .with_function(CfaFunction::new("main", CfaNodeId(0), CfaNodeId(2)))
            .unwrap()
            .with_nodes((0..3).map(|i| CfaNode::new(CfaNodeId(i), "main")))
            .unwrap()
            .initialize()
            .with_edge(
                CfaNodeId(0),
                CfaNodeId(1),
                EdgeKind::Assignment {
                    variable: x(),
                    expression: IntegerExpression::Nondet,
                },
            )
            .unwrap()
            .with_edge(
                CfaNodeId(1),
                CfaNodeId(2),
                EdgeKind::Assume {
                    condition: BooleanExpression::compare(x(), ComparisonOp::Gt, 3),
                    truth: true,
                },
            )
            .unwrap()
            .build()
            .unwrap();
        Arc::new(cfa)
    }

    fn composite(cfa: Arc<Cfa>) -> CompositeCpa {
        CompositeCpa::with_kinds(
            cfa,
            [ComponentKind::Value, ComponentKind::Interval],
            VariableTrackingPrecision::full(),
        )
    }

    #[test]
    fn test_successors_of_all_components() {
        let cfa = cfa();
        let cpa = composite(cfa.clone());
        let init = cpa.initial_state(cfa.entry_node());
        let prec = cpa.initial_precision(cfa.entry_node());
        assert_eq!(
            cpa.kinds().collect::<Vec<_>>(),
            vec![ComponentKind::Callstack, ComponentKind::Value, ComponentKind::Interval]
        );

        let edges = cfa.edges().cloned().collect::<Vec<_>>();
        let succ = cpa
            .abstract_successors_for_edge(&init, &prec, &edges[0])
            .unwrap();
        assert_eq!(succ.len(), 1);
        let succ = cpa
            .abstract_successors_for_edge(&succ[0], &prec, &edges[1])
            .unwrap();
        assert_eq!(succ.len(), 1);
        assert_eq!(succ[0].interval().unwrap().get(&x()), Interval::at_least(4));
        assert!(succ[0].value().unwrap().is_empty());
        assert_eq!(succ[0].callstack().unwrap().current_function(), "main");
    }

    #[test]
    fn test_merge_agree() {
        let cfa = cfa();
        let cpa = composite(cfa.clone());
        let prec = cpa.initial_precision(cfa.entry_node());

        let with = |value: Option<i64>, low: i64| {
            let mut v = ValueAnalysisState::new();
            if let Some(c) = value {
                v.assign(x(), c);
            }
            let mut i = IntervalAnalysisState::new();
            i.set(x(), Interval::at_least(low));
            CompositeState::new(vec![
                ComponentState::Callstack(CallstackState::new("main")),
                ComponentState::Value(v),
                ComponentState::Interval(i),
            ])
        };

        let merged = cpa.merge(&with(None, 1), &with(None, 5), &prec);
        assert_eq!(merged, with(None, 1));

        let reached = with(Some(2), 5);
        assert_eq!(cpa.merge(&with(None, 1), &reached, &prec), reached);
        assert_eq!(cpa.merge(&reached, &reached, &prec), reached);
    }

    #[test]
    fn test_stop_requires_single_covering_state() {
        let cfa = cfa();
        let cpa = composite(cfa.clone());
        let prec = cpa.initial_precision(cfa.entry_node());

        let state = |value: Option<i64>, interval: Option<Interval>| {
            let mut v = ValueAnalysisState::new();
            if let Some(c) = value {
                v.assign(x(), c);
            }
            let mut i = IntervalAnalysisState::new();
            if let Some(b) = interval {
                i.set(x(), b);
            }
            CompositeState::new(vec![
                ComponentState::Callstack(CallstackState::new("main")),
                ComponentState::Value(v),
                ComponentState::Interval(i),
            ])
        };

        let s = state(Some(3), Some(Interval::singleton(3)));
        let covers_value = state(Some(3), Some(Interval::singleton(7)));
        let covers_interval = state(Some(4), Some(Interval::at_least(0)));
        assert_eq!(cpa.stop(&s, &[&covers_value, &covers_interval], &prec), None);

        let covers_both = state(None, Some(Interval::at_least(0)));
        assert_eq!(
            cpa.stop(&s, &[&covers_value, &covers_interval, &covers_both], &prec),
            Some(2)
        );
    }

    #[test]
    fn test_replace_component_precision() {
        let cfa = cfa();
        let cpa = CompositeCpa::with_kinds(
            cfa.clone(),
            [ComponentKind::Value, ComponentKind::Interval],
            VariableTrackingPrecision::empty(PrecisionScope::Location),
        );
        let prec = cpa.initial_precision(cfa.entry_node());
        let refined = prec.replace_matching(
            &ComponentPrecision::Value(VariableTrackingPrecision::full()),
            |c| c.kind() == ComponentKind::Value,
        );

        assert!(refined.variables_of(ComponentKind::Value).unwrap().is_full());
        assert!(!refined.variables_of(ComponentKind::Interval).unwrap().is_full());
        assert!(refined.variables_of(ComponentKind::Callstack).is_none());
        assert_eq!(
            prec.variables_of(ComponentKind::Interval),
            refined.variables_of(ComponentKind::Interval)
        );
    }
}
