//! Encoding of CFA expressions into [`SMTExpr`]
//!
//! Expressions are encoded relative to a context that maps program variables
//! to SMT constants. Program integers are unbounded mathematical integers in
//! the encoding, while division and remainder follow the truncating semantics
//! of [`IntegerOp::apply`].

use std::{collections::HashMap, fmt, io};

use cpa_cfa::expressions::{
    BooleanConnective, BooleanExpression, ComparisonOp, IntegerExpression, IntegerOp,
    SCOPE_SEPARATOR, Variable,
};

use crate::{SMTExpr, SMTSolution, SMTSolver, SMTSolverBuilder, SMTSolverContext};

/// Encoding of `T` into an [`SMTExpr`] relative to a context of type `C`
pub trait EncodeToSMT<T, C> {
    /// Encode into an SMT expression using `solver` and `ctx`
    fn encode_to_smt_with_ctx(&self, solver: &SMTSolver, ctx: &C) -> Result<SMTExpr, SMTSolverError>;
}

/// Context mapping variables of type `T` to declared SMT constants
pub trait SMTVariableContext<T> {
    /// Get the SMT constant currently associated with `expr`
    ///
    /// Fails if no constant has been declared for `expr`.
    fn get_expr_for(&self, expr: &T) -> Result<SMTExpr, SMTSolverError>;
}

/// Types that are declared as SMT constants
pub trait DeclaresVariable {
    /// Name of the SMT constant for the `index`-th version of the variable
    fn get_name(&self, index: u32) -> String;

    /// Declare the `index`-th version of the variable as an integer constant
    fn declare_variable(&self, solver: &mut SMTSolver, index: u32) -> Result<SMTExpr, SMTSolverError> {
        let sort = solver.int_sort();
        Ok(solver.declare_const(self.get_name(index), sort)?)
    }
}

impl DeclaresVariable for Variable {
    fn get_name(&self, index: u32) -> String {
        // colons are reserved for keywords in SMT-LIB symbols
        format!("var_{}@{}", self.name().replace(SCOPE_SEPARATOR, "."), index)
    }
}

impl<C> EncodeToSMT<IntegerExpression, C> for IntegerExpression
where
    C: SMTVariableContext<Variable>,
{
    fn encode_to_smt_with_ctx(&self, solver: &SMTSolver, ctx: &C) -> Result<SMTExpr, SMTSolverError> {
        match self {
            IntegerExpression::Atom(v) => ctx.get_expr_for(v),
            IntegerExpression::Const(c) => Ok(solver.numeral(*c)),
            IntegerExpression::Nondet => Err(SMTSolverError::UnsupportedExpression(
                "nondeterministic value outside of an assignment".to_string(),
            )),
            IntegerExpression::BinaryExpr(lhs, op, rhs) => {
                let lhs = lhs.encode_to_smt_with_ctx(solver, ctx)?;
                let rhs = rhs.encode_to_smt_with_ctx(solver, ctx)?;

                Ok(match op {
                    IntegerOp::Add => solver.plus(lhs, rhs),
                    IntegerOp::Sub => solver.sub(lhs, rhs),
                    IntegerOp::Mul => solver.times(lhs, rhs),
                    IntegerOp::Div => truncating_div(solver, lhs, rhs),
                    IntegerOp::Mod => {
                        let quotient = truncating_div(solver, lhs, rhs);
                        solver.sub(lhs, solver.times(rhs, quotient))
                    }
                })
            }
            IntegerExpression::Neg(expr) => {
                let expr = expr.encode_to_smt_with_ctx(solver, ctx)?;
                Ok(solver.negate(expr))
            }
        }
    }
}

/// Division rounding towards zero
///
/// SMT-LIB `div` rounds towards negative infinity for positive divisors,
/// therefore the operation is performed on absolute values.
fn truncating_div(solver: &SMTSolver, lhs: SMTExpr, rhs: SMTExpr) -> SMTExpr {
    let zero = solver.numeral(0);
    let lhs_nonneg = solver.gte(lhs, zero);
    let rhs_pos = solver.gt(rhs, zero);

    let neg_lhs = solver.negate(lhs);
    let neg_rhs = solver.negate(rhs);

    solver.ite(
        lhs_nonneg,
        solver.ite(
            rhs_pos,
            solver.div(lhs, rhs),
            solver.negate(solver.div(lhs, neg_rhs)),
        ),
        solver.ite(
            rhs_pos,
            solver.negate(solver.div(neg_lhs, rhs)),
            solver.div(neg_lhs, neg_rhs),
        ),
    )
}

impl<C> EncodeToSMT<BooleanExpression, C> for BooleanExpression
where
    C: SMTVariableContext<Variable>,
{
    fn encode_to_smt_with_ctx(&self, solver: &SMTSolver, ctx: &C) -> Result<SMTExpr, SMTSolverError> {
        match self {
            BooleanExpression::ComparisonExpression(lhs, op, rhs) => {
                let lhs = lhs.encode_to_smt_with_ctx(solver, ctx)?;
                let rhs = rhs.encode_to_smt_with_ctx(solver, ctx)?;

                Ok(match op {
                    ComparisonOp::Gt => solver.gt(lhs, rhs),
                    ComparisonOp::Geq => solver.gte(lhs, rhs),
                    ComparisonOp::Eq => solver.eq(lhs, rhs),
                    ComparisonOp::Neq => solver.not(solver.eq(lhs, rhs)),
                    ComparisonOp::Leq => solver.lte(lhs, rhs),
                    ComparisonOp::Lt => solver.lt(lhs, rhs),
                })
            }
            BooleanExpression::BinaryExpression(lhs, op, rhs) => {
                let lhs = lhs.encode_to_smt_with_ctx(solver, ctx)?;
                let rhs = rhs.encode_to_smt_with_ctx(solver, ctx)?;

                Ok(match op {
                    BooleanConnective::And => solver.and(lhs, rhs),
                    BooleanConnective::Or => solver.or(lhs, rhs),
                })
            }
            BooleanExpression::Not(expr) => {
                let expr = expr.encode_to_smt_with_ctx(solver, ctx)?;
                Ok(solver.not(expr))
            }
            BooleanExpression::True => Ok(solver.true_()),
            BooleanExpression::False => Ok(solver.false_()),
        }
    }
}

/// Errors while interacting with an SMT solver
#[derive(Debug)]
pub enum SMTSolverError {
    /// Error on the connection to the solver process
    EasySMTErr(io::Error),
    /// Solver answered `unknown`, for example because of a timeout
    SolverUnknown,
    /// Solver command could not be executed
    SolverNotInstalled(String),
    /// Variable accessed before being declared
    UndeclaredVariable(Variable),
    /// Expression cannot be encoded in the current position
    UnsupportedExpression(String),
    /// Value in a model could not be parsed as an integer
    SolutionExtractionParseIntError(String),
    /// Attempted to extract a model from an unsatisfiable query
    ExtractionFromUnsat,
}

impl std::error::Error for SMTSolverError {}

impl fmt::Display for SMTSolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SMTSolverError::EasySMTErr(err) => {
                write!(f, "Error from connection to SMT solver: {err}")
            }
            SMTSolverError::SolverUnknown => write!(f, "SMT solver returned unknown"),
            SMTSolverError::SolverNotInstalled(cmd) => {
                write!(f, "SMT solver `{cmd}` could not be started")
            }
            SMTSolverError::UndeclaredVariable(variable) => {
                write!(f, "Undeclared variable: {variable}")
            }
            SMTSolverError::UnsupportedExpression(r) => {
                write!(f, "Expression cannot be encoded: {r}")
            }
            SMTSolverError::SolutionExtractionParseIntError(s) => write!(
                f,
                "Failed to parse SMT solver supplied solution into integer: {s} not an integer"
            ),
            SMTSolverError::ExtractionFromUnsat => write!(
                f,
                "Attempted to extract the solution assignment from an unsatisfiable expression"
            ),
        }
    }
}

impl From<io::Error> for SMTSolverError {
    fn from(error: io::Error) -> Self {
        SMTSolverError::EasySMTErr(error)
    }
}

/// Context for checking formulas over unindexed program variables
///
/// Every variable is declared once, on first use, as its `0`-th version.
/// Queries are asserted in their own assertion level, so the context can be
/// reused for an arbitrary number of checks.
pub struct StaticSMTContext {
    solver: SMTSolver,
    vars: HashMap<Variable, SMTExpr>,
}

impl StaticSMTContext {
    /// Start a new solver session
    pub fn new(solver_builder: &SMTSolverBuilder) -> Result<Self, SMTSolverError> {
        Ok(Self {
            solver: solver_builder.new_solver()?,
            vars: HashMap::new(),
        })
    }

    /// Encode `expr`, declaring its variables if necessary
    pub fn encode(&mut self, expr: &BooleanExpression) -> Result<SMTExpr, SMTSolverError> {
        for v in expr.variables() {
            if !self.vars.contains_key(&v) {
                let smt = v.declare_variable(&mut self.solver, 0)?;
                self.vars.insert(v, smt);
            }
        }
        expr.encode_to_smt_with_ctx(&self.solver, self)
    }

    /// Check whether `expr` has a satisfying assignment
    pub fn is_satisfiable(&mut self, expr: &BooleanExpression) -> Result<bool, SMTSolverError> {
        let smt = self.encode(expr)?;
        Ok(!self.is_unsat(smt)?)
    }

    /// Check whether `expr` holds under every assignment
    pub fn is_valid(&mut self, expr: &BooleanExpression) -> Result<bool, SMTSolverError> {
        let smt = self.encode(expr)?;
        let negated = self.solver.not(smt);
        self.is_unsat(negated)
    }

    /// Check whether `lhs` implies `rhs`
    pub fn implies(
        &mut self,
        lhs: &BooleanExpression,
        rhs: &BooleanExpression,
    ) -> Result<bool, SMTSolverError> {
        let lhs = self.encode(lhs)?;
        let rhs = self.encode(rhs)?;
        let counterexample = self.solver.and(lhs, self.solver.not(rhs));
        self.is_unsat(counterexample)
    }

    /// Integer value of `var` in a model of `expr`
    ///
    /// Returns `None` if `var` does not occur in `expr`.
    pub fn get_value_in_model(
        &mut self,
        expr: &BooleanExpression,
        var: &Variable,
    ) -> Result<Option<i64>, SMTSolverError> {
        let smt = self.encode(expr)?;
        let Some(var_smt) = self.vars.get(var).copied() else {
            return Ok(None);
        };

        self.solver.push()?;
        let res = self.assert_and_check_expr(smt).and_then(|sol| match sol {
            SMTSolution::UNSAT => Err(SMTSolverError::ExtractionFromUnsat),
            SMTSolution::SAT => {
                let values = self.solver.get_value(vec![var_smt])?;
                let (_, value) = values[0];
                self.solver
                    .get_i64(value)
                    .map(Some)
                    .ok_or_else(|| SMTSolverError::SolutionExtractionParseIntError(self.solver.display(value).to_string()))
            }
        });
        self.solver.pop()?;
        res
    }
}

impl SMTVariableContext<Variable> for StaticSMTContext {
    fn get_expr_for(&self, expr: &Variable) -> Result<SMTExpr, SMTSolverError> {
        self.vars
            .get(expr)
            .copied()
            .ok_or_else(|| SMTSolverError::UndeclaredVariable(expr.clone()))
    }
}

impl SMTSolverContext for StaticSMTContext {
    fn get_smt_solver_mut(&mut self) -> &mut SMTSolver {
        &mut self.solver
    }

    fn get_smt_solver(&self) -> &SMTSolver {
        &self.solver
    }
}

#[cfg(test)]
mod tests {
    use cpa_cfa::expressions::{BooleanExpression, ComparisonOp, IntegerExpression, Variable};

    use crate::{SMTSolverBuilder, SMTSolverBuilderCfg};

    use super::*;

    fn get_ctx() -> StaticSMTContext {
        let builder = SMTSolverBuilder::new(&SMTSolverBuilderCfg::new_z3()).unwrap();
        StaticSMTContext::new(&builder).unwrap()
    }

    #[test]
    fn test_variable_names() {
        assert_eq!(Variable::new("x").get_name(3), "var_x@3");
        assert_eq!(Variable::new_local("main", "i").get_name(0), "var_main.i@0");
    }

    #[test]
    fn test_validity_and_satisfiability() {
        let mut ctx = get_ctx();
        let x = Variable::new("x");

        let tautology = BooleanExpression::compare(x.clone(), ComparisonOp::Gt, 0)
            | BooleanExpression::compare(x.clone(), ComparisonOp::Leq, 0);
        assert!(ctx.is_valid(&tautology).unwrap());

        let contradiction = BooleanExpression::compare(x.clone(), ComparisonOp::Gt, 0)
            & BooleanExpression::compare(x.clone(), ComparisonOp::Lt, 0);
        assert!(!ctx.is_satisfiable(&contradiction).unwrap());

        let positive = BooleanExpression::compare(x.clone(), ComparisonOp::Gt, 1);
        assert!(ctx.is_satisfiable(&positive).unwrap());
        assert!(!ctx.is_valid(&positive).unwrap());

        let weaker = BooleanExpression::compare(x, ComparisonOp::Geq, 0);
        assert!(ctx.implies(&positive, &weaker).unwrap());
        assert!(!ctx.implies(&weaker, &positive).unwrap());
    }

    #[test]
    fn test_truncating_division() {
        let mut ctx = get_ctx();
        let x = Variable::new("x");

        // -7 / 2 == -3 and -7 % 2 == -1 in truncating semantics
        let div = BooleanExpression::compare(
            IntegerExpression::from(-7) / IntegerExpression::from(2),
            ComparisonOp::Eq,
            x.clone(),
        );
        assert_eq!(ctx.get_value_in_model(&div, &x).unwrap(), Some(-3));

        let rem = BooleanExpression::compare(
            IntegerExpression::from(-7) % IntegerExpression::from(2),
            ComparisonOp::Eq,
            x.clone(),
        );
        assert_eq!(ctx.get_value_in_model(&rem, &x).unwrap(), Some(-1));

        let div = BooleanExpression::compare(
            IntegerExpression::from(7) / IntegerExpression::from(-2),
            ComparisonOp::Eq,
            x.clone(),
        );
        assert_eq!(ctx.get_value_in_model(&div, &x).unwrap(), Some(-3));
    }

    #[test]
    fn test_nondet_not_encodable() {
        let mut ctx = get_ctx();
        let cond = BooleanExpression::compare(IntegerExpression::Nondet, ComparisonOp::Gt, 0);
        assert!(matches!(
            ctx.encode(&cond),
            Err(SMTSolverError::UnsupportedExpression(_))
        ));
    }
}
