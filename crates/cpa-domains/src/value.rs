//! Explicit-value domain
//!
//! A [`ValueAnalysisState`] maps variables to concrete values. Variables
//! without an entry can have any value. The domain is precise for
//! everything it tracks and relies on the precision to keep the number of
//! tracked variables small.

use std::{collections::BTreeMap, fmt, sync::Arc};

use cpa_cfa::{
    Cfa, CfaEdge, CfaNode, EdgeKind,
    expressions::{
        BooleanConnective, BooleanExpression, ComparisonOp, IntegerExpression, Variable,
        properties::Valuation,
    },
};
use cpa_core::{ConfigurableProgramAnalysis, error::CpaError, precision::VariableTrackingPrecision};
use cpa_display_utils::join_iterator;
use log::trace;

use crate::{TransferableState, apply_with_abstraction, multi_edge_error};

/// Partial mapping from variables to values
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ValueAnalysisState {
    values: BTreeMap<Variable, i64>,
}

impl ValueAnalysisState {
    /// State without any known value
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of `var`, if known
    pub fn get(&self, var: &Variable) -> Option<i64> {
        self.values.get(var).copied()
    }

    /// Check whether the value of `var` is known
    pub fn contains(&self, var: &Variable) -> bool {
        self.values.contains_key(var)
    }

    /// Set the value of `var`
    pub fn assign(&mut self, var: Variable, value: i64) {
        self.values.insert(var, value);
    }

    /// Forget the value of `var`, returning the forgotten value
    pub fn forget(&mut self, var: &Variable) -> Option<i64> {
        self.values.remove(var)
    }

    /// Variables with a known value
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.values.keys()
    }

    /// Known values
    pub fn iter(&self) -> impl Iterator<Item = (&Variable, &i64)> {
        self.values.iter()
    }

    /// Number of variables with a known value
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check whether no value is known
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Check whether every value known in `other` is known with the same
    /// value in this state, i.e. this state is less or equal to `other`
    pub fn is_less_or_equal(&self, other: &Self) -> bool {
        other.values.len() <= self.values.len()
            && other
                .values
                .iter()
                .all(|(var, val)| self.values.get(var) == Some(val))
    }

    /// Values both states agree on
    pub fn join(&self, other: &Self) -> Self {
        let values = self
            .values
            .iter()
            .filter(|(var, val)| other.values.get(*var) == Some(*val))
            .map(|(var, val)| (var.clone(), *val))
            .collect();
        Self { values }
    }

    /// Evaluate `expression` and store the result in `var`, forgetting `var`
    /// if the result is unknown
    fn assign_expression(&mut self, var: &Variable, expression: &IntegerExpression) {
        match expression.evaluate(self) {
            Ok(value) => self.assign(var.clone(), value),
            Err(err) => {
                trace!("Forgetting {var}: {err}");
                self.forget(var);
            }
        }
    }

    /// Strengthen the state by `condition`, `None` if the condition is
    /// violated
    fn assume(mut self, condition: &BooleanExpression) -> Option<Self> {
        match condition {
            BooleanExpression::BinaryExpression(lhs, BooleanConnective::And, rhs) => {
                self.assume(lhs)?.assume(rhs)
            }
            BooleanExpression::Not(inner) => self.assume(&inner.negate()),
            BooleanExpression::ComparisonExpression(lhs, ComparisonOp::Eq, rhs) => {
                if let Some((var, value)) = self.undecided_equality(lhs, rhs) {
                    self.assign(var, value);
                    return Some(self);
                }
                self.check(condition)
            }
            _ => self.check(condition),
        }
    }

    /// For `x == e` with unknown `x` and known `e`, the value of `x`
    fn undecided_equality(
        &self,
        lhs: &IntegerExpression,
        rhs: &IntegerExpression,
    ) -> Option<(Variable, i64)> {
        match (lhs, rhs) {
            (IntegerExpression::Atom(x), e) | (e, IntegerExpression::Atom(x))
                if !self.contains(x) =>
            {
                e.evaluate(self).ok().map(|value| (x.clone(), value))
            }
            _ => None,
        }
    }

    fn check(self, condition: &BooleanExpression) -> Option<Self> {
        match condition.evaluate(&self) {
            Ok(false) => None,
            _ => Some(self),
        }
    }
}

impl Valuation for ValueAnalysisState {
    fn value_of(&self, var: &Variable) -> Option<i64> {
        self.get(var)
    }
}

impl TransferableState for ValueAnalysisState {
    fn apply_edge(&self, edge: &CfaEdge) -> Result<Option<Self>, CpaError> {
        let mut next = self.clone();
        match edge.kind() {
            EdgeKind::Blank { .. } => {}
            EdgeKind::Declaration {
                variable,
                initializer,
            } => match initializer {
                Some(init) => next.assign_expression(variable, init),
                None => {
                    next.forget(variable);
                }
            },
            EdgeKind::Assignment {
                variable,
                expression,
            } => next.assign_expression(variable, expression),
            EdgeKind::Assume { .. } => {
                let condition = edge
                    .kind()
                    .assumed_condition()
                    .ok_or_else(|| CpaError::unrecognized(format!("assume edge {edge}")))?;
                return Ok(next.assume(&condition));
            }
            EdgeKind::FunctionCall { arguments, .. } => {
                let values = arguments
                    .iter()
                    .map(|(param, arg)| (param, arg.evaluate(self).ok()))
                    .collect::<Vec<_>>();
                for (param, value) in values {
                    match value {
                        Some(value) => next.assign(param.clone(), value),
                        None => {
                            next.forget(param);
                        }
                    }
                }
            }
            EdgeKind::FunctionReturn {
                function,
                assign_to,
                return_variable,
            } => {
                if let Some(target) = assign_to {
                    match return_variable.as_ref().and_then(|r| self.get(r)) {
                        Some(value) => next.assign(target.clone(), value),
                        None => {
                            next.forget(target);
                        }
                    }
                }
                next.drop_locals_of(function);
            }
            EdgeKind::Multi(_) => return Err(multi_edge_error(edge)),
        }
        Ok(Some(next))
    }

    fn retain_variables(&mut self, keep: impl Fn(&Variable) -> bool) {
        self.values.retain(|var, _| keep(var));
    }
}

impl fmt::Display for ValueAnalysisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]",
            join_iterator(self.values.iter().map(|(v, c)| format!("{v}={c}")), ", ")
        )
    }
}

/// Explicit-value analysis
#[derive(Debug, Clone)]
pub struct ValueAnalysisCpa {
    cfa: Arc<Cfa>,
    precision: VariableTrackingPrecision,
}

impl ValueAnalysisCpa {
    /// Analysis of `cfa` starting with `precision`
    pub fn new(cfa: Arc<Cfa>, precision: VariableTrackingPrecision) -> Self {
        Self { cfa, precision }
    }
}

impl ConfigurableProgramAnalysis for ValueAnalysisCpa {
    type State = ValueAnalysisState;
    type Precision = VariableTrackingPrecision;

    fn initial_state(&self, _node: &CfaNode) -> ValueAnalysisState {
        ValueAnalysisState::new()
    }

    fn initial_precision(&self, _node: &CfaNode) -> VariableTrackingPrecision {
        self.precision.clone()
    }

    fn abstract_successors_for_edge(
        &self,
        state: &ValueAnalysisState,
        precision: &VariableTrackingPrecision,
        edge: &CfaEdge,
    ) -> Result<Vec<ValueAnalysisState>, CpaError> {
        Ok(apply_with_abstraction(state, edge, precision, &self.cfa)?
            .into_iter()
            .collect())
    }

    fn is_less_or_equal(&self, state: &ValueAnalysisState, other: &ValueAnalysisState) -> bool {
        state.is_less_or_equal(other)
    }
}

#[cfg(test)]
mod tests {
    use cpa_cfa::{CfaEdgeId, CfaNodeId, expressions::IntegerOp};

    use super::*;

    fn edge(kind: EdgeKind) -> CfaEdge {
        CfaEdge::new(CfaEdgeId(0), CfaNodeId(0), CfaNodeId(1), kind)
    }

    fn x() -> Variable {
        Variable::new("x")
    }

    fn state(values: &[(&str, i64)]) -> ValueAnalysisState {
        let mut s = ValueAnalysisState::new();
        for (v, c) in values {
            s.assign(Variable::new(*v), *c);
        }
        s
    }

    #[test]
    fn test_assignment_evaluates_or_forgets() {
        let s = state(&[("x", 1), ("y", 5)]);

        let inc = edge(EdgeKind::Assignment {
            variable: x(),
            expression: IntegerExpression::BinaryExpr(
                Box::new(IntegerExpression::Atom(x())),
                IntegerOp::Add,
                Box::new(IntegerExpression::Const(1)),
            ),
        });
        assert_eq!(s.apply_edge(&inc).unwrap(), Some(state(&[("x", 2), ("y", 5)])));

        let havoc = edge(EdgeKind::Assignment {
            variable: Variable::new("y"),
            expression: IntegerExpression::Nondet,
        });
        assert_eq!(s.apply_edge(&havoc).unwrap(), Some(state(&[("x", 1)])));
    }

    #[test]
    fn test_declaration_without_initializer_is_unknown() {
        let s = state(&[("x", 1)]);
        let decl = edge(EdgeKind::Declaration {
            variable: x(),
            initializer: None,
        });
        assert_eq!(s.apply_edge(&decl).unwrap(), Some(ValueAnalysisState::new()));

        let decl = edge(EdgeKind::Declaration {
            variable: x(),
            initializer: Some(IntegerExpression::Const(7)),
        });
        assert_eq!(s.apply_edge(&decl).unwrap(), Some(state(&[("x", 7)])));
    }

    #[test]
    fn test_assume_blocks_or_strengthens() {
        let cond = BooleanExpression::compare(x(), ComparisonOp::Eq, 3);
        let pos = edge(EdgeKind::Assume {
            condition: cond.clone(),
            truth: true,
        });
        let neg = edge(EdgeKind::Assume {
            condition: cond,
            truth: false,
        });

        assert_eq!(
            ValueAnalysisState::new().apply_edge(&pos).unwrap(),
            Some(state(&[("x", 3)]))
        );
        assert_eq!(
            ValueAnalysisState::new().apply_edge(&neg).unwrap(),
            Some(ValueAnalysisState::new())
        );
        assert_eq!(state(&[("x", 3)]).apply_edge(&neg).unwrap(), None);
        assert_eq!(state(&[("x", 4)]).apply_edge(&pos).unwrap(), None);
    }

    #[test]
    fn test_call_and_return_bind_values() {
        let param = Variable::new_local("f", "a");
        let ret = Variable::new_local("f", "r");
        let call = edge(EdgeKind::FunctionCall {
            function: "f".into(),
            arguments: vec![(param.clone(), IntegerExpression::Atom(x()))],
            return_site: CfaNodeId(5),
        });
        let s = state(&[("x", 2)]).apply_edge(&call).unwrap().unwrap();
        assert_eq!(s.get(&param), Some(2));

        let mut s = s;
        s.assign(ret.clone(), 9);
        let ret_edge = edge(EdgeKind::FunctionReturn {
            function: "f".into(),
            assign_to: Some(x()),
            return_variable: Some(ret),
        });
        let s = s.apply_edge(&ret_edge).unwrap().unwrap();
        assert_eq!(s, state(&[("x", 9)]));
    }

    #[test]
    fn test_multi_edge_is_rejected() {
        let multi = edge(EdgeKind::Multi(vec![]));
        assert!(ValueAnalysisState::new().apply_edge(&multi).is_err());
    }

    #[test]
    fn test_order_and_join() {
        let a = state(&[("x", 1), ("y", 2)]);
        let b = state(&[("x", 1)]);
        assert!(a.is_less_or_equal(&b));
        assert!(!b.is_less_or_equal(&a));
        assert!(a.is_less_or_equal(&a));
        assert_eq!(a.join(&state(&[("x", 1), ("y", 3)])), b);
    }

    #[test]
    fn test_display() {
        assert_eq!(state(&[("x", 1), ("y", -2)]).to_string(), "[x=1, y=-2]");
    }
}
