//! Callstack domain
//!
//! Tracks the active function calls so that a return edge is only taken
//! back to the call site it belongs to. Recursion is not supported.

use std::{fmt, sync::Arc};

use cpa_cfa::{Cfa, CfaEdge, CfaNode, CfaNodeId, EdgeKind};
use cpa_core::{ConfigurableProgramAnalysis, error::CpaError};
use cpa_display_utils::join_iterator;

/// Active call of `function`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallFrame {
    function: String,
    return_site: Option<CfaNodeId>,
}

impl CallFrame {
    /// Called function
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Location execution continues at after the call, `None` for the entry
    /// function
    pub fn return_site(&self) -> Option<CfaNodeId> {
        self.return_site
    }
}

/// Stack of active calls, innermost call last
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallstackState {
    frames: Vec<CallFrame>,
}

impl CallstackState {
    /// Stack containing only the call of the entry function `main`
    pub fn new(main: impl ToString) -> Self {
        Self {
            frames: vec![CallFrame {
                function: main.to_string(),
                return_site: None,
            }],
        }
    }

    /// Innermost active call
    pub fn current(&self) -> &CallFrame {
        self.frames
            .last()
            .expect("callstack always contains the entry function")
    }

    /// Function currently executing
    pub fn current_function(&self) -> &str {
        self.current().function()
    }

    /// Number of active calls
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Active calls, outermost first
    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    /// Successor along `edge`, `None` if `edge` returns to another call site
    pub fn apply_edge(&self, edge: &CfaEdge) -> Result<Option<Self>, CpaError> {
        match edge.kind() {
            EdgeKind::FunctionCall {
                function,
                return_site,
                ..
            } => {
                if self.frames.iter().any(|f| &f.function == function) {
                    return Err(CpaError::unrecognized(format!(
                        "recursive call of {function} at {edge}"
                    )));
                }
                let mut next = self.clone();
                next.frames.push(CallFrame {
                    function: function.clone(),
                    return_site: Some(*return_site),
                });
                Ok(Some(next))
            }
            EdgeKind::FunctionReturn { function, .. } => {
                let top = self.current();
                if &top.function != function {
                    return Err(CpaError::unrecognized(format!(
                        "return from {function} while {} is active",
                        top.function
                    )));
                }
                if top.return_site != Some(edge.successor()) {
                    return Ok(None);
                }
                let mut next = self.clone();
                next.frames.pop();
                Ok(Some(next))
            }
            EdgeKind::Multi(edges) => {
                let mut current = self.clone();
                for sub in edges {
                    match current.apply_edge(sub)? {
                        Some(next) => current = next,
                        None => return Ok(None),
                    }
                }
                Ok(Some(current))
            }
            _ => Ok(Some(self.clone())),
        }
    }
}

impl fmt::Display for CallstackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            join_iterator(self.frames.iter().map(|frame| &frame.function), " > ")
        )
    }
}

/// Analysis tracking the callstack
#[derive(Debug, Clone)]
pub struct CallstackCpa {
    cfa: Arc<Cfa>,
}

impl CallstackCpa {
    /// Callstack analysis of `cfa`
    pub fn new(cfa: Arc<Cfa>) -> Self {
        Self { cfa }
    }
}

impl ConfigurableProgramAnalysis for CallstackCpa {
    type State = CallstackState;
    type Precision = ();

    fn initial_state(&self, _node: &CfaNode) -> CallstackState {
        CallstackState::new(self.cfa.main_function().name())
    }

    fn initial_precision(&self, _node: &CfaNode) -> Self::Precision {}

    fn abstract_successors_for_edge(
        &self,
        state: &CallstackState,
        _precision: &(),
        edge: &CfaEdge,
    ) -> Result<Vec<CallstackState>, CpaError> {
        Ok(state.apply_edge(edge)?.into_iter().collect())
    }

    fn is_less_or_equal(&self, state: &CallstackState, other: &CallstackState) -> bool {
        state == other
    }
}

#[cfg(test)]
mod tests {
    use cpa_cfa::CfaEdgeId;

    use super::*;

    fn call(function: &str, return_site: u32) -> CfaEdge {
        CfaEdge::new(
            CfaEdgeId(0),
            CfaNodeId(0),
            CfaNodeId(10),
            EdgeKind::FunctionCall {
                function: function.into(),
                arguments: vec![],
                return_site: CfaNodeId(return_site),
            },
        )
    }

    fn ret(function: &str, to: u32) -> CfaEdge {
        CfaEdge::new(
            CfaEdgeId(1),
            CfaNodeId(11),
            CfaNodeId(to),
            EdgeKind::FunctionReturn {
                function: function.into(),
                assign_to: None,
                return_variable: None,
            },
        )
    }

    #[test]
    fn test_return_matches_call_site() {
        let s = CallstackState::new("main");
        let in_f = s.apply_edge(&call("f", 3)).unwrap().unwrap();
        assert_eq!(in_f.depth(), 2);
        assert_eq!(in_f.current_function(), "f");
        assert_eq!(in_f.to_string(), "main > f");

        assert_eq!(in_f.apply_edge(&ret("f", 4)).unwrap(), None);
        assert_eq!(in_f.apply_edge(&ret("f", 3)).unwrap(), Some(s));
    }

    #[test]
    fn test_recursion_is_unsupported() {
        let s = CallstackState::new("main")
            .apply_edge(&call("f", 3))
            .unwrap()
            .unwrap();
        let err = s.apply_edge(&call("f", 5)).unwrap_err();
        assert!(matches!(err, CpaError::UnrecognizedCode(_)));
    }

    #[test]
    fn test_return_from_inactive_function() {
        let s = CallstackState::new("main");
        assert!(s.apply_edge(&ret("f", 3)).is_err());
    }
}
