//! Abstract domains
//!
//! - [`value`]: explicit values of variables
//! - [`interval`]: bounds of variables
//! - [`callstack`]: the stack of active function calls
//! - [`composite`]: the product of the above
//!
//! Value and interval states implement [`TransferableState`], which gives
//! the effect of a single edge on the state. Their CPAs apply multi edges
//! sub-edge by sub-edge and afterwards drop every variable the precision
//! does not track at the successor location.

use cpa_cfa::{Cfa, CfaEdge, CfaNode, CfaNodeId, expressions::Variable};
use cpa_core::{error::CpaError, precision::VariableTrackingPrecision};

pub mod callstack;
pub mod composite;
pub mod interval;
pub mod value;

/// State with an effect for every kind of (non-multi) edge
pub trait TransferableState: Sized {
    /// State after taking `edge`, `None` if `edge` cannot be taken
    ///
    /// Returns an error for multi edges, apply their sub-edges instead.
    fn apply_edge(&self, edge: &CfaEdge) -> Result<Option<Self>, CpaError>;

    /// Drop every variable not satisfying `keep`
    fn retain_variables(&mut self, keep: impl Fn(&Variable) -> bool);

    /// Drop every variable local to `function`
    fn drop_locals_of(&mut self, function: &str) {
        self.retain_variables(|v| v.function() != Some(function));
    }
}

/// Apply all sub-edges of `edge`, then drop every variable the precision
/// does not track at the successor of `edge`
pub(crate) fn apply_with_abstraction<S: TransferableState>(
    state: &S,
    edge: &CfaEdge,
    precision: &VariableTrackingPrecision,
    cfa: &Cfa,
) -> Result<Option<S>, CpaError> {
    let mut sub_edges = edge.sub_edges();
    let Some(first) = sub_edges.next() else {
        return Err(multi_edge_error(edge));
    };
    let mut current = state.apply_edge(first)?;
    for sub in sub_edges {
        let Some(s) = current else {
            return Ok(None);
        };
        current = s.apply_edge(sub)?;
    }
    let Some(mut next) = current else {
        return Ok(None);
    };
    abstract_state(&mut next, precision, node(cfa, edge.successor())?);
    Ok(Some(next))
}

/// Drop every variable `precision` does not track at `node`
pub fn abstract_state<S: TransferableState>(
    state: &mut S,
    precision: &VariableTrackingPrecision,
    node: &CfaNode,
) {
    if precision.is_full() {
        return;
    }
    state.retain_variables(|v| precision.is_tracking(node, v));
}

pub(crate) fn node(cfa: &Cfa, id: CfaNodeId) -> Result<&CfaNode, CpaError> {
    cfa.node(id)
        .ok_or_else(|| CpaError::unrecognized(format!("edge to unknown location {id}")))
}

pub(crate) fn multi_edge_error(edge: &CfaEdge) -> CpaError {
    CpaError::unrecognized(format!(
        "multi edge {edge} must be applied sub-edge by sub-edge"
    ))
}

#[cfg(test)]
mod tests {
    use cpa_cfa::{
        CfaEdgeId, CfaFunction, EdgeKind, builder::CfaBuilder, expressions::IntegerExpression,
    };
    use cpa_core::precision::{PrecisionIncrement, PrecisionScope};

    use super::*;
    use crate::value::ValueAnalysisState;

    fn var(name: &str) -> Variable {
        Variable::new_local("main", name)
    }

    fn assign(from: u32, to: u32, variable: Variable, expression: IntegerExpression) -> CfaEdge {
        CfaEdge::new(
            CfaEdgeId(0),
            CfaNodeId(from),
            CfaNodeId(to),
            EdgeKind::Assignment {
                variable,
                expression,
            },
        )
    }

    /// N0 -{x = 1; y = x}-> N2
    fn cfa() -> Cfa {
        CfaBuilder::new("main")
            .with_function(CfaFunction::new("main", CfaNodeId(0), CfaNodeId(2)))
            .unwrap()
            .with_nodes((0..3).map(|i| CfaNode::new(CfaNodeId(i), "main")))
            .unwrap()
            .initialize()
            .with_edge(
                CfaNodeId(0),
                CfaNodeId(2),
                EdgeKind::Multi(vec![
                    assign(0, 1, var("x"), IntegerExpression::Const(1)),
                    assign(1, 2, var("y"), IntegerExpression::Atom(var("x"))),
                ]),
            )
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_multi_edge_abstracts_at_successor_only() {
        let cfa = cfa();
        let edge = cfa.edges().next().unwrap().clone();
        let increment = PrecisionIncrement::from([(CfaNodeId(2), [var("y")].into())]);
        let precision =
            VariableTrackingPrecision::empty(PrecisionScope::Location).with_increment(&increment, &cfa);

        let next = apply_with_abstraction(&ValueAnalysisState::new(), &edge, &precision, &cfa)
            .unwrap()
            .unwrap();
        assert_eq!(next.get(&var("y")), Some(1));
        assert!(!next.contains(&var("x")));
    }

    #[test]
    fn test_drop_locals() {
        let mut state = ValueAnalysisState::new();
        state.assign(var("x"), 1);
        state.assign(Variable::new_local("f", "a"), 2);
        state.assign(Variable::new("g"), 3);
        state.drop_locals_of("f");
        assert_eq!(state.variables().cloned().collect::<Vec<_>>(), vec![Variable::new("g"), var("x")]);
    }
}
