//! Strongest post along single edges, with an explicit call stack

use std::{marker::PhantomData, sync::Arc};

use cpa_cfa::{Cfa, CfaEdge, CfaNode, EdgeKind};
use cpa_core::{error::CpaError, precision::VariableTrackingPrecision};
use cpa_domains::abstract_state;
use log::trace;

use crate::forgetful::ForgetfulState;

/// Successor computation used when replaying paths
///
/// Function calls and returns are handled around the post: before a call
/// edge the caller state is saved with [`handle_function_call`], before a
/// return edge [`handle_function_return`] restores the facts about the
/// caller's locals that were dropped while executing the callee.
///
/// [`handle_function_call`]: StrongestPostOperator::handle_function_call
/// [`handle_function_return`]: StrongestPostOperator::handle_function_return
pub trait StrongestPostOperator<S> {
    /// State after `edge`, `None` if `edge` cannot be taken from `state`
    fn strongest_post(&self, state: &S, edge: &CfaEdge) -> Result<Option<S>, CpaError>;

    /// Save the caller state before the call `edge`
    fn handle_function_call(&self, state: S, edge: &CfaEdge, callstack: &mut Vec<S>) -> S;

    /// Rebuild the state before the return `edge`
    ///
    /// Facts about globals and about locals of the returning function are
    /// taken from `state`, facts about locals of other functions from the
    /// caller state on top of `callstack`.
    fn handle_function_return(&self, state: S, edge: &CfaEdge, callstack: &mut Vec<S>) -> S;

    /// Drop the facts `precision` does not track at `location`
    fn perform_abstraction(
        &self,
        state: S,
        location: &CfaNode,
        precision: &VariableTrackingPrecision,
    ) -> S;

    /// Apply call and return handling for `edge`, then the post
    fn step(&self, state: &S, edge: &CfaEdge, callstack: &mut Vec<S>) -> Result<Option<S>, CpaError>
    where
        S: Clone,
    {
        let state = match edge.kind() {
            EdgeKind::FunctionCall { .. } => {
                self.handle_function_call(state.clone(), edge, callstack)
            }
            EdgeKind::FunctionReturn { .. } => {
                self.handle_function_return(state.clone(), edge, callstack)
            }
            _ => state.clone(),
        };
        self.strongest_post(&state, edge)
    }
}

/// Strongest post of any [`ForgetfulState`]
#[derive(Debug, Clone)]
pub struct GenericStrongestPost<S> {
    cfa: Arc<Cfa>,
    _state: PhantomData<S>,
}

impl<S> GenericStrongestPost<S> {
    /// Operator for paths through `cfa`
    pub fn new(cfa: Arc<Cfa>) -> Self {
        Self {
            cfa,
            _state: PhantomData,
        }
    }

    /// The program
    pub fn cfa(&self) -> &Arc<Cfa> {
        &self.cfa
    }
}

impl<S: ForgetfulState> StrongestPostOperator<S> for GenericStrongestPost<S> {
    fn strongest_post(&self, state: &S, edge: &CfaEdge) -> Result<Option<S>, CpaError> {
        let mut current = state.clone();
        for sub in edge.sub_edges() {
            match current.apply_edge(sub)? {
                Some(next) => current = next,
                None => {
                    trace!("Edge {sub} is infeasible from {state}");
                    return Ok(None);
                }
            }
        }
        Ok(Some(current))
    }

    fn handle_function_call(&self, state: S, _edge: &CfaEdge, callstack: &mut Vec<S>) -> S {
        callstack.push(state.clone());
        state
    }

    fn handle_function_return(&self, state: S, edge: &CfaEdge, callstack: &mut Vec<S>) -> S {
        let EdgeKind::FunctionReturn { function, .. } = edge.kind() else {
            return state;
        };
        let Some(caller) = callstack.pop() else {
            // The path started inside the returning function
            return state;
        };

        let mut rebuilt = state;
        for var in rebuilt.tracked_variables() {
            if var.function().is_some_and(|f| f != function) {
                rebuilt.forget(&var);
            }
        }
        for var in caller.tracked_variables() {
            if var.function().is_some_and(|f| f != function) {
                if let Some(value) = caller.retrieve(&var) {
                    rebuilt.remember(var, value);
                }
            }
        }
        rebuilt
    }

    fn perform_abstraction(
        &self,
        mut state: S,
        location: &CfaNode,
        precision: &VariableTrackingPrecision,
    ) -> S {
        abstract_state(&mut state, precision, location);
        state
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use cpa_cfa::{
        CfaFunction, CfaNodeId,
        builder::CfaBuilder,
        expressions::{IntegerExpression, Variable},
    };
    use cpa_core::precision::PrecisionScope;
    use cpa_domains::value::ValueAnalysisState;

    use super::*;

    fn a() -> Variable {
        Variable::new_local("main", "a")
    }

    fn p() -> Variable {
        Variable::new_local("f", "p")
    }

    fn r() -> Variable {
        Variable::new_local("f", "r")
    }

    fn g() -> Variable {
        Variable::new("g")
    }

    /// `main: a = 1; a = f(a);` with `f(p) { g = p; r = p + 1; return r; }`
    fn program() -> Arc<Cfa> {
        let cfa = CfaBuilder::new("main")
            .with_function(CfaFunction::new("main", CfaNodeId(0), CfaNodeId(3)))
            .unwrap()
            .with_function(
                CfaFunction::new("f", CfaNodeId(10), CfaNodeId(12))
                    .with_parameters([p()])
                    .with_return_variable(r()),
            )
            .unwrap()
            .with_nodes((0..4).map(|i| CfaNode::new(CfaNodeId(i), "main")))
            .unwrap()
            .with_nodes((10..13).map(|i| CfaNode::new(CfaNodeId(i), "f")))
            .unwrap()
            .with_global_variable(g())
            .unwrap()
            .initialize()
            .with_edges([
                (
                    CfaNodeId(0),
                    CfaNodeId(1),
                    EdgeKind::Declaration {
                        variable: a(),
                        initializer: Some(IntegerExpression::Const(1)),
                    },
                ),
                (
                    CfaNodeId(1),
                    CfaNodeId(10),
                    EdgeKind::FunctionCall {
                        function: "f".into(),
                        arguments: vec![(p(), IntegerExpression::Atom(a()))],
                        return_site: CfaNodeId(2),
                    },
                ),
                (
                    CfaNodeId(10),
                    CfaNodeId(11),
                    EdgeKind::Assignment {
                        variable: g(),
                        expression: IntegerExpression::Atom(p()),
                    },
                ),
                (
                    CfaNodeId(11),
                    CfaNodeId(12),
                    EdgeKind::Assignment {
                        variable: r(),
                        expression: IntegerExpression::Atom(p()) + IntegerExpression::Const(1),
                    },
                ),
                (
                    CfaNodeId(12),
                    CfaNodeId(2),
                    EdgeKind::FunctionReturn {
                        function: "f".into(),
                        assign_to: Some(a()),
                        return_variable: Some(r()),
                    },
                ),
            ])
            .unwrap()
            .build()
            .unwrap();
        Arc::new(cfa)
    }

    #[test]
    fn test_return_restores_caller_locals() {
        let cfa = program();
        let post = GenericStrongestPost::<ValueAnalysisState>::new(cfa.clone());
        // inside the callee only `p` and `g` are tracked
        let precision = VariableTrackingPrecision::empty(PrecisionScope::Location).with_increment(
            &BTreeMap::from([(CfaNodeId(11), BTreeSet::from([p(), g()]))]),
            &cfa,
        );
        let mut callstack = Vec::new();

        let mut state = ValueAnalysisState::empty();
        state.remember(Variable::new_local("main", "b"), 7);
        for edge in cfa.edges() {
            state = post.step(&state, edge, &mut callstack).unwrap().unwrap();
            if edge.successor() == CfaNodeId(11) {
                state = post.perform_abstraction(
                    state,
                    cfa.node(edge.successor()).unwrap(),
                    &precision,
                );
                assert_eq!(state.tracked_variables(), BTreeSet::from([g(), p()]));
            }
        }

        assert!(callstack.is_empty());
        assert_eq!(state.get(&a()), Some(2));
        assert_eq!(state.get(&Variable::new_local("main", "b")), Some(7));
        assert_eq!(state.get(&g()), Some(1));
        assert!(!state.contains(&p()));
        assert!(!state.contains(&r()));
    }
}
