//! Path formulas in static single assignment form
//!
//! Every assignment to a program variable introduces a new version of the
//! variable (its SSA index). The formula of an edge relates the versions
//! before the edge to those after it, and the formula of a path is the
//! conjunction of its edge formulas.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use cpa_cfa::{
    CfaEdge, EdgeKind,
    expressions::{BooleanExpression, IntegerExpression, Variable},
};
use cpa_display_utils::display_mapping;
use log::trace;

use crate::{
    SMTExpr, SMTSolver,
    expression_encoding::{DeclaresVariable, EncodeToSMT, SMTSolverError, SMTVariableContext},
};

/// Current SSA index of every variable, variables not in the map have
/// index `0`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SsaMap {
    indices: BTreeMap<Variable, u32>,
}

impl SsaMap {
    /// Map assigning index `0` to every variable
    pub fn new() -> Self {
        Self::default()
    }

    /// Current index of `var`
    pub fn index(&self, var: &Variable) -> u32 {
        self.indices.get(var).copied().unwrap_or(0)
    }

    /// Advance `var` to a new index and return it
    pub fn make_fresh(&mut self, var: &Variable) -> u32 {
        let idx = self.indices.entry(var.clone()).or_insert(0);
        *idx += 1;
        *idx
    }
}

impl fmt::Display for SsaMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", display_mapping(self.indices.iter()))
    }
}

/// Path formula together with the SSA indices at its end
#[derive(Debug, Clone)]
pub struct PathFormula {
    formula: SMTExpr,
    ssa: SsaMap,
}

impl PathFormula {
    /// Formula of the path
    pub fn formula(&self) -> SMTExpr {
        self.formula
    }

    /// SSA indices after the path
    pub fn ssa(&self) -> &SsaMap {
        &self.ssa
    }
}

/// Encodes edges and paths into SSA formulas
///
/// The manager remembers which versions of which variables have been
/// declared in the solver. Declarations made inside an assertion level are
/// discarded by the solver on `pop`, therefore a manager must not outlive the
/// assertion level it was used in.
#[derive(Debug, Default)]
pub struct PathFormulaManager {
    declared: HashMap<(Variable, u32), SMTExpr>,
    nondet_count: u32,
}

/// Lookup of variables at the indices of an [`SsaMap`]
struct SsaContext<'a> {
    ssa: &'a SsaMap,
    declared: &'a HashMap<(Variable, u32), SMTExpr>,
}

impl SMTVariableContext<Variable> for SsaContext<'_> {
    fn get_expr_for(&self, expr: &Variable) -> Result<SMTExpr, SMTSolverError> {
        self.declared
            .get(&(expr.clone(), self.ssa.index(expr)))
            .copied()
            .ok_or_else(|| SMTSolverError::UndeclaredVariable(expr.clone()))
    }
}

impl PathFormulaManager {
    /// Manager without any declarations
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode the conjunction of all edge formulas of `edges`, starting from
    /// index `0` for all variables
    pub fn make_path_formula<'a>(
        &mut self,
        solver: &mut SMTSolver,
        edges: impl IntoIterator<Item = &'a CfaEdge>,
    ) -> Result<PathFormula, SMTSolverError> {
        let mut ssa = SsaMap::new();
        let mut formula = solver.true_();
        for edge in edges {
            let edge_formula = self.make_edge_formula(solver, edge, &mut ssa)?;
            formula = solver.and(formula, edge_formula);
        }
        Ok(PathFormula { formula, ssa })
    }

    /// Encode the effect of `edge` and advance `ssa` past it
    pub fn make_edge_formula(
        &mut self,
        solver: &mut SMTSolver,
        edge: &CfaEdge,
        ssa: &mut SsaMap,
    ) -> Result<SMTExpr, SMTSolverError> {
        trace!("Encoding edge {edge}");
        match edge.kind() {
            EdgeKind::Blank { .. } => Ok(solver.true_()),
            EdgeKind::Declaration {
                variable,
                initializer,
            } => match initializer {
                Some(init) => self.encode_assignment(solver, variable, init, ssa),
                None => {
                    self.havoc(solver, variable, ssa)?;
                    Ok(solver.true_())
                }
            },
            EdgeKind::Assignment {
                variable,
                expression,
            } => self.encode_assignment(solver, variable, expression, ssa),
            EdgeKind::Assume { .. } => {
                let cond = edge
                    .kind()
                    .assumed_condition()
                    .unwrap_or(BooleanExpression::True);
                self.encode_condition(solver, &cond, ssa)
            }
            EdgeKind::FunctionCall { arguments, .. } => {
                // all arguments are evaluated before any parameter is bound
                let values = arguments
                    .iter()
                    .map(|(_, arg)| self.encode_value(solver, arg, ssa))
                    .collect::<Result<Vec<_>, _>>()?;

                let mut formula = solver.true_();
                for ((param, _), value) in arguments.iter().zip(values) {
                    let param = self.havoc(solver, param, ssa)?;
                    formula = solver.and(formula, solver.eq(param, value));
                }
                Ok(formula)
            }
            EdgeKind::FunctionReturn {
                assign_to,
                return_variable,
                ..
            } => match (assign_to, return_variable) {
                (Some(target), Some(ret)) => {
                    let value = IntegerExpression::Atom(ret.clone());
                    self.encode_assignment(solver, target, &value, ssa)
                }
                (Some(target), None) => {
                    self.havoc(solver, target, ssa)?;
                    Ok(solver.true_())
                }
                _ => Ok(solver.true_()),
            },
            EdgeKind::Multi(edges) => {
                let mut formula = solver.true_();
                for sub_edge in edges {
                    let sub = self.make_edge_formula(solver, sub_edge, ssa)?;
                    formula = solver.and(formula, sub);
                }
                Ok(formula)
            }
        }
    }

    /// Encode `cond` over the variable versions of `ssa`
    ///
    /// Every occurrence of a nondeterministic value becomes a fresh
    /// unconstrained constant.
    pub fn encode_condition(
        &mut self,
        solver: &mut SMTSolver,
        cond: &BooleanExpression,
        ssa: &SsaMap,
    ) -> Result<SMTExpr, SMTSolverError> {
        let cond = self.replace_nondet_in_condition(solver, cond)?;
        for var in cond.variables() {
            self.declare(solver, &var, ssa.index(&var))?;
        }
        let ctx = SsaContext {
            ssa,
            declared: &self.declared,
        };
        cond.encode_to_smt_with_ctx(solver, &ctx)
    }

    /// Encode `expr` over the variable versions of `ssa`
    pub fn encode_value(
        &mut self,
        solver: &mut SMTSolver,
        expr: &IntegerExpression,
        ssa: &SsaMap,
    ) -> Result<SMTExpr, SMTSolverError> {
        let expr = self.replace_nondet(solver, expr)?;
        for var in expr.variables() {
            self.declare(solver, &var, ssa.index(&var))?;
        }
        let ctx = SsaContext {
            ssa,
            declared: &self.declared,
        };
        expr.encode_to_smt_with_ctx(solver, &ctx)
    }

    /// SMT constant of `var` at its current version in `ssa`
    pub fn current_version(
        &mut self,
        solver: &mut SMTSolver,
        var: &Variable,
        ssa: &SsaMap,
    ) -> Result<SMTExpr, SMTSolverError> {
        self.declare(solver, var, ssa.index(var))
    }

    fn encode_assignment(
        &mut self,
        solver: &mut SMTSolver,
        var: &Variable,
        expr: &IntegerExpression,
        ssa: &mut SsaMap,
    ) -> Result<SMTExpr, SMTSolverError> {
        let value = self.encode_value(solver, expr, ssa)?;
        let target = self.havoc(solver, var, ssa)?;
        Ok(solver.eq(target, value))
    }

    /// Give `var` a new unconstrained version
    fn havoc(
        &mut self,
        solver: &mut SMTSolver,
        var: &Variable,
        ssa: &mut SsaMap,
    ) -> Result<SMTExpr, SMTSolverError> {
        let idx = ssa.make_fresh(var);
        self.declare(solver, var, idx)
    }

    fn declare(
        &mut self,
        solver: &mut SMTSolver,
        var: &Variable,
        idx: u32,
    ) -> Result<SMTExpr, SMTSolverError> {
        if let Some(expr) = self.declared.get(&(var.clone(), idx)) {
            return Ok(*expr);
        }
        let expr = var.declare_variable(solver, idx)?;
        self.declared.insert((var.clone(), idx), expr);
        Ok(expr)
    }

    fn fresh_nondet(&mut self, solver: &mut SMTSolver) -> Result<Variable, SMTSolverError> {
        let var = Variable::new(format!("__nondet{}", self.nondet_count));
        self.nondet_count += 1;
        self.declare(solver, &var, 0)?;
        Ok(var)
    }

    fn replace_nondet(
        &mut self,
        solver: &mut SMTSolver,
        expr: &IntegerExpression,
    ) -> Result<IntegerExpression, SMTSolverError> {
        Ok(match expr {
            IntegerExpression::Nondet => IntegerExpression::Atom(self.fresh_nondet(solver)?),
            IntegerExpression::Atom(_) | IntegerExpression::Const(_) => expr.clone(),
            IntegerExpression::BinaryExpr(lhs, op, rhs) => IntegerExpression::BinaryExpr(
                Box::new(self.replace_nondet(solver, lhs)?),
                *op,
                Box::new(self.replace_nondet(solver, rhs)?),
            ),
            IntegerExpression::Neg(ex) => {
                IntegerExpression::Neg(Box::new(self.replace_nondet(solver, ex)?))
            }
        })
    }

    fn replace_nondet_in_condition(
        &mut self,
        solver: &mut SMTSolver,
        cond: &BooleanExpression,
    ) -> Result<BooleanExpression, SMTSolverError> {
        Ok(match cond {
            BooleanExpression::True | BooleanExpression::False => cond.clone(),
            BooleanExpression::ComparisonExpression(lhs, op, rhs) => {
                BooleanExpression::ComparisonExpression(
                    Box::new(self.replace_nondet(solver, lhs)?),
                    *op,
                    Box::new(self.replace_nondet(solver, rhs)?),
                )
            }
            BooleanExpression::BinaryExpression(lhs, op, rhs) => {
                BooleanExpression::BinaryExpression(
                    Box::new(self.replace_nondet_in_condition(solver, lhs)?),
                    *op,
                    Box::new(self.replace_nondet_in_condition(solver, rhs)?),
                )
            }
            BooleanExpression::Not(inner) => {
                BooleanExpression::Not(Box::new(self.replace_nondet_in_condition(solver, inner)?))
            }
        })
    }
}
