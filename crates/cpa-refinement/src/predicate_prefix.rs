//! Prefix extraction with an incremental SMT solver
//!
//! Every edge of the path is a block whose SSA formula is pushed onto the
//! solver's assertion stack. When the stack becomes unsatisfiable the prefix
//! is closed, the failing block is replaced by `true` and the walk
//! continues.
//!
//! Interpolants are weakest preconditions of `false` over the remaining
//! edges of a prefix. Values chosen nondeterministically on the way are
//! represented by universally quantified variables.

use std::{collections::BTreeSet, io};

use cpa_cfa::{
    CfaEdge, EdgeKind, EdgeType,
    expressions::{BooleanExpression, IntegerExpression, Variable},
};
use cpa_core::{error::CpaError, path::ArgPath, shutdown::ShutdownNotifier};
use cpa_smt_encoder::{
    SMTSolution, SMTSolver, SMTSolverBuilder, SMTSolverContext,
    expression_encoding::{SMTSolverError, StaticSMTContext},
    path_formula::{PathFormulaManager, SsaMap},
};
use log::{debug, trace};

use crate::{
    interpolant::{FormulaInterpolant, Interpolant},
    prefix::{
        DEFAULT_MAX_PREFIX_COUNT, DEFAULT_MAX_PREFIX_LENGTH, InfeasiblePrefix, PrefixCollector,
        PrefixExtraction, PrefixProvider,
    },
    solver_error,
};

/// Prefix provider based on an incremental SMT solver
#[derive(Debug, Clone)]
pub struct PredicatePrefixProvider {
    solver_builder: SMTSolverBuilder,
    shutdown: ShutdownNotifier,
    max_prefix_count: usize,
    max_prefix_length: usize,
}

impl PredicatePrefixProvider {
    /// Provider starting solver sessions with `solver_builder`
    pub fn new(solver_builder: SMTSolverBuilder, shutdown: ShutdownNotifier) -> Self {
        Self {
            solver_builder,
            shutdown,
            max_prefix_count: DEFAULT_MAX_PREFIX_COUNT,
            max_prefix_length: DEFAULT_MAX_PREFIX_LENGTH,
        }
    }

    /// Extract at most `max` prefixes
    pub fn with_max_prefix_count(mut self, max: usize) -> Self {
        self.max_prefix_count = max.max(1);
        self
    }

    /// Stop searching after `max` edges once a prefix was found
    pub fn with_max_prefix_length(mut self, max: usize) -> Self {
        self.max_prefix_length = max;
        self
    }

    fn extract(
        &self,
        solver: &mut SMTSolver,
        depth: &mut usize,
        path: &ArgPath,
    ) -> Result<PrefixExtraction<FormulaInterpolant>, CpaError> {
        // with multi edges a location is not necessarily an abstraction point
        let single_block = path.edges().iter().all(|e| e.edge_type() != EdgeType::Multi);
        let mut manager = PathFormulaManager::new();
        let mut ssa = SsaMap::new();
        let mut collector = PrefixCollector::new(path);
        let mut prefixes = Vec::new();
        let mut simplifier = StaticSMTContext::new(&self.solver_builder).map_err(solver_error)?;

        for (k, edge) in path.edges().iter().enumerate() {
            self.shutdown.shutdown_if_necessary()?;
            if !prefixes.is_empty() && k >= self.max_prefix_length {
                debug!("Stopping prefix search after {k} edges");
                break;
            }

            let formula = manager
                .make_edge_formula(solver, edge, &mut ssa)
                .map_err(solver_error)?;
            solver.push().map_err(io_error)?;
            *depth += 1;
            solver.assert(formula).map_err(io_error)?;

            if single_block && edge.edge_type() != EdgeType::Assume {
                collector.take(k);
                continue;
            }
            match solver.check_assertions().map_err(solver_error)? {
                SMTSolution::SAT => collector.take(k),
                SMTSolution::UNSAT => {
                    trace!("Block formula of {edge} is unsatisfiable");
                    solver.pop().map_err(io_error)?;
                    solver.push().map_err(io_error)?;
                    let t = solver.true_();
                    solver.assert(t).map_err(io_error)?;

                    let prefix = collector.fail(k);
                    let interpolants = interpolate(&mut simplifier, prefix.edges())?;
                    prefixes.push(InfeasiblePrefix::new(prefix, interpolants));
                    if prefixes.len() >= self.max_prefix_count {
                        debug!("Reached the limit of {} prefixes", self.max_prefix_count);
                        break;
                    }
                }
            }
        }

        debug!("Extracted {} infeasible prefixes", prefixes.len());
        Ok(collector.finish(prefixes))
    }
}

impl PrefixProvider for PredicatePrefixProvider {
    type Interpolant = FormulaInterpolant;

    fn extract_infeasible_prefixes(
        &mut self,
        path: &ArgPath,
    ) -> Result<PrefixExtraction<FormulaInterpolant>, CpaError> {
        let mut solver = self.solver_builder.new_solver().map_err(solver_error)?;
        let mut depth = 0;
        let res = self.extract(&mut solver, &mut depth, path);
        for _ in 0..depth {
            solver.pop().map_err(io_error)?;
        }
        res
    }
}

fn io_error(err: io::Error) -> CpaError {
    solver_error(SMTSolverError::from(err))
}

/// Weakest preconditions of `false` over every suffix of the prefix
/// `edges`, simplified to `true` or `false` where the solver can decide them
fn interpolate(
    ctx: &mut StaticSMTContext,
    edges: &[CfaEdge],
) -> Result<Vec<FormulaInterpolant>, CpaError> {
    let mut wp = WeakestPrecondition::default();
    let conditions = wp.along_suffixes(edges);

    let mut interpolants = Vec::with_capacity(edges.len());
    for (k, condition) in conditions.into_iter().enumerate() {
        if k == 0 {
            interpolants.push(FormulaInterpolant::true_interpolant());
            continue;
        }
        let condition = if ctx.is_valid(&condition).map_err(solver_error)? {
            BooleanExpression::True
        } else if !ctx.is_satisfiable(&condition).map_err(solver_error)? {
            BooleanExpression::False
        } else {
            condition.simplify()
        };
        interpolants.push(FormulaInterpolant::new(condition, wp.quantified.clone()));
    }
    Ok(interpolants)
}

/// Backward computation of weakest preconditions
#[derive(Debug, Default)]
pub(crate) struct WeakestPrecondition {
    fresh: u32,
    quantified: BTreeSet<Variable>,
}

impl WeakestPrecondition {
    /// Weakest precondition of `false` before each edge of `edges`
    pub(crate) fn along_suffixes(&mut self, edges: &[CfaEdge]) -> Vec<BooleanExpression> {
        let mut conditions = vec![BooleanExpression::False; edges.len()];
        let mut post = BooleanExpression::False;
        for (k, edge) in edges.iter().enumerate().rev() {
            let sub_edges: Vec<_> = edge.sub_edges().collect();
            for sub in sub_edges.into_iter().rev() {
                post = self.of_edge(sub, post);
            }
            conditions[k] = post.clone();
        }
        conditions
    }

    fn of_edge(&mut self, edge: &CfaEdge, post: BooleanExpression) -> BooleanExpression {
        match edge.kind() {
            EdgeKind::Blank { .. } | EdgeKind::Multi(_) => post,
            EdgeKind::Assume { .. } => match edge.kind().assumed_condition() {
                Some(condition) => (condition.negate() | post).simplify(),
                None => post,
            },
            EdgeKind::Declaration {
                variable,
                initializer,
            } => {
                let value = match initializer {
                    Some(init) => self.replace_nondet(init),
                    None => IntegerExpression::Atom(self.fresh_variable(variable)),
                };
                post.substitute(variable, &value)
            }
            EdgeKind::Assignment {
                variable,
                expression,
            } => {
                let value = self.replace_nondet(expression);
                post.substitute(variable, &value)
            }
            EdgeKind::FunctionCall { arguments, .. } => {
                arguments.iter().fold(post, |post, (param, argument)| {
                    let value = self.replace_nondet(argument);
                    post.substitute(param, &value)
                })
            }
            EdgeKind::FunctionReturn {
                assign_to,
                return_variable,
                ..
            } => match assign_to {
                Some(target) => {
                    let value = match return_variable {
                        Some(r) => IntegerExpression::Atom(r.clone()),
                        None => IntegerExpression::Atom(self.fresh_variable(target)),
                    };
                    post.substitute(target, &value)
                }
                None => post,
            },
        }
    }

    fn replace_nondet(&mut self, expr: &IntegerExpression) -> IntegerExpression {
        match expr {
            IntegerExpression::Nondet => {
                IntegerExpression::Atom(self.fresh_variable(&Variable::new("nondet")))
            }
            IntegerExpression::Neg(e) => -self.replace_nondet(e),
            IntegerExpression::BinaryExpr(lhs, op, rhs) => IntegerExpression::BinaryExpr(
                Box::new(self.replace_nondet(lhs)),
                *op,
                Box::new(self.replace_nondet(rhs)),
            ),
            IntegerExpression::Atom(_) | IntegerExpression::Const(_) => expr.clone(),
        }
    }

    fn fresh_variable(&mut self, base: &Variable) -> Variable {
        let var = Variable::new(format!("{base}!{}", self.fresh));
        self.fresh += 1;
        self.quantified.insert(var.clone());
        var
    }
}

#[cfg(test)]
mod tests {
    use cpa_cfa::{CfaEdgeId, CfaNodeId, expressions::ComparisonOp};

    use super::*;

    fn x() -> Variable {
        Variable::new("x")
    }

    fn edge(k: u32, kind: EdgeKind) -> CfaEdge {
        CfaEdge::new(CfaEdgeId(k), CfaNodeId(k), CfaNodeId(k + 1), kind)
    }

    #[test]
    fn test_weakest_preconditions_of_contradiction() {
        let edges = vec![
            edge(
                0,
                EdgeKind::Assignment {
                    variable: x(),
                    expression: IntegerExpression::Atom(x()) + IntegerExpression::Const(1),
                },
            ),
            edge(
                1,
                EdgeKind::Assume {
                    condition: BooleanExpression::compare(x(), ComparisonOp::Lt, 0),
                    truth: false,
                },
            ),
            edge(
                2,
                EdgeKind::Assume {
                    condition: BooleanExpression::compare(x(), ComparisonOp::Lt, 0),
                    truth: true,
                },
            ),
        ];
        let mut wp = WeakestPrecondition::default();
        let conditions = wp.along_suffixes(&edges);
        assert_eq!(conditions[2].to_string(), "x >= 0");
        // !(x >= 0) || x >= 0
        assert_eq!(conditions[1].to_string(), "(x < 0 || x >= 0)");
        assert_eq!(conditions[0].to_string(), "((x + 1) < 0 || (x + 1) >= 0)");
        assert!(wp.quantified.is_empty());
    }

    #[test]
    fn test_havoc_is_quantified() {
        let edges = vec![
            edge(
                0,
                EdgeKind::Declaration {
                    variable: x(),
                    initializer: None,
                },
            ),
            edge(
                1,
                EdgeKind::Assume {
                    condition: BooleanExpression::compare(x(), ComparisonOp::Gt, 0),
                    truth: true,
                },
            ),
        ];
        let mut wp = WeakestPrecondition::default();
        let conditions = wp.along_suffixes(&edges);
        assert_eq!(conditions[0].to_string(), "x!0 <= 0");
        assert_eq!(wp.quantified, BTreeSet::from([Variable::new("x!0")]));

        let interpolant = FormulaInterpolant::new(conditions[0].clone(), wp.quantified.clone());
        assert!(interpolant.variables().is_empty());
    }
}
