//! Evaluation, substitution and simplification of expressions

use core::fmt;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    error, ops,
};

use super::{BooleanConnective, BooleanExpression, ComparisonOp, IntegerExpression, IntegerOp, Variable};

/// Partial assignment of values to variables
///
/// Variables without a value are treated as unknown during evaluation.
pub trait Valuation {
    /// Value of `var`, if known
    fn value_of(&self, var: &Variable) -> Option<i64>;
}

impl Valuation for HashMap<Variable, i64> {
    fn value_of(&self, var: &Variable) -> Option<i64> {
        self.get(var).copied()
    }
}

impl Valuation for BTreeMap<Variable, i64> {
    fn value_of(&self, var: &Variable) -> Option<i64> {
        self.get(var).copied()
    }
}

/// Evaluation error of an expression
///
/// Error that can occur during the evaluation of an expression under a
/// [`Valuation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    /// The valuation does not assign a value to the variable
    UnknownVariable(Variable),
    /// The expression contains a nondeterministic value
    Nondet,
    /// Division or remainder by zero
    DivisionByZero,
    /// The result does not fit into a 64 bit integer
    Overflow,
}

impl error::Error for EvaluationError {}

impl fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EvaluationError::UnknownVariable(v) => write!(f, "Value of variable {v} is unknown"),
            EvaluationError::Nondet => write!(f, "Expression contains a nondeterministic value"),
            EvaluationError::DivisionByZero => write!(f, "Division by zero"),
            EvaluationError::Overflow => write!(f, "Integer overflow"),
        }
    }
}

impl IntegerOp {
    /// Apply the operator to two concrete values
    ///
    /// # Example
    ///
    /// ```
    /// use cpa_cfa::expressions::IntegerOp;
    ///
    /// assert_eq!(IntegerOp::Div.apply(-7, 2), Ok(-3));
    /// assert_eq!(IntegerOp::Mod.apply(-7, 2), Ok(-1));
    /// assert!(IntegerOp::Div.apply(1, 0).is_err());
    /// ```
    pub fn apply(self, lhs: i64, rhs: i64) -> Result<i64, EvaluationError> {
        let res = match self {
            IntegerOp::Add => lhs.checked_add(rhs),
            IntegerOp::Sub => lhs.checked_sub(rhs),
            IntegerOp::Mul => lhs.checked_mul(rhs),
            IntegerOp::Div => {
                if rhs == 0 {
                    return Err(EvaluationError::DivisionByZero);
                }
                lhs.checked_div(rhs)
            }
            IntegerOp::Mod => {
                if rhs == 0 {
                    return Err(EvaluationError::DivisionByZero);
                }
                lhs.checked_rem(rhs)
            }
        };
        res.ok_or(EvaluationError::Overflow)
    }
}

impl ComparisonOp {
    /// Compare two concrete values
    pub fn apply(self, lhs: i64, rhs: i64) -> bool {
        match self {
            ComparisonOp::Gt => lhs > rhs,
            ComparisonOp::Geq => lhs >= rhs,
            ComparisonOp::Eq => lhs == rhs,
            ComparisonOp::Neq => lhs != rhs,
            ComparisonOp::Leq => lhs <= rhs,
            ComparisonOp::Lt => lhs < rhs,
        }
    }

    /// Invert the operation
    ///
    /// # Example
    ///
    /// ```
    /// use cpa_cfa::expressions::ComparisonOp;
    ///
    /// assert_eq!(ComparisonOp::Eq.invert(), ComparisonOp::Neq);
    /// assert_eq!(ComparisonOp::Lt.invert(), ComparisonOp::Geq);
    /// ```
    pub fn invert(self) -> Self {
        match self {
            ComparisonOp::Eq => ComparisonOp::Neq,
            ComparisonOp::Neq => ComparisonOp::Eq,
            ComparisonOp::Lt => ComparisonOp::Geq,
            ComparisonOp::Leq => ComparisonOp::Gt,
            ComparisonOp::Gt => ComparisonOp::Leq,
            ComparisonOp::Geq => ComparisonOp::Lt,
        }
    }

    /// Operator to use when the sides of the comparison are swapped
    ///
    /// # Example
    ///
    /// ```
    /// use cpa_cfa::expressions::ComparisonOp;
    ///
    /// assert_eq!(ComparisonOp::Lt.get_swap_side(), ComparisonOp::Gt);
    /// ```
    pub fn get_swap_side(self) -> Self {
        match self {
            ComparisonOp::Gt => ComparisonOp::Lt,
            ComparisonOp::Geq => ComparisonOp::Leq,
            ComparisonOp::Eq => ComparisonOp::Eq,
            ComparisonOp::Neq => ComparisonOp::Neq,
            ComparisonOp::Leq => ComparisonOp::Geq,
            ComparisonOp::Lt => ComparisonOp::Gt,
        }
    }
}

impl BooleanConnective {
    /// Dual connective
    pub fn invert(self) -> Self {
        match self {
            BooleanConnective::And => BooleanConnective::Or,
            BooleanConnective::Or => BooleanConnective::And,
        }
    }
}

impl IntegerExpression {
    /// Evaluate the expression under the valuation `env`
    ///
    /// # Example
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use cpa_cfa::expressions::{*, properties::EvaluationError};
    ///
    /// let env = HashMap::from([(Variable::new("x"), 3)]);
    /// let e = IntegerExpression::Atom(Variable::new("x")) * IntegerExpression::Const(2);
    /// assert_eq!(e.evaluate(&env), Ok(6));
    ///
    /// let e = IntegerExpression::Atom(Variable::new("y"));
    /// assert_eq!(e.evaluate(&env), Err(EvaluationError::UnknownVariable(Variable::new("y"))));
    /// ```
    pub fn evaluate<V: Valuation + ?Sized>(&self, env: &V) -> Result<i64, EvaluationError> {
        match self {
            IntegerExpression::Atom(v) => env
                .value_of(v)
                .ok_or_else(|| EvaluationError::UnknownVariable(v.clone())),
            IntegerExpression::Const(c) => Ok(*c),
            IntegerExpression::Nondet => Err(EvaluationError::Nondet),
            IntegerExpression::Neg(ex) => ex
                .evaluate(env)?
                .checked_neg()
                .ok_or(EvaluationError::Overflow),
            IntegerExpression::BinaryExpr(lhs, op, rhs) => {
                op.apply(lhs.evaluate(env)?, rhs.evaluate(env)?)
            }
        }
    }

    /// Try to evaluate the expression without any variable values
    pub fn try_to_evaluate_to_const(&self) -> Option<i64> {
        self.evaluate(&HashMap::new()).ok()
    }

    /// Check whether the expression references `var`
    pub fn contains_variable(&self, var: &Variable) -> bool {
        match self {
            IntegerExpression::Atom(v) => v == var,
            IntegerExpression::Const(_) | IntegerExpression::Nondet => false,
            IntegerExpression::Neg(ex) => ex.contains_variable(var),
            IntegerExpression::BinaryExpr(lhs, _, rhs) => {
                lhs.contains_variable(var) || rhs.contains_variable(var)
            }
        }
    }

    /// Check whether the expression contains a nondeterministic value
    pub fn contains_nondet(&self) -> bool {
        match self {
            IntegerExpression::Nondet => true,
            IntegerExpression::Atom(_) | IntegerExpression::Const(_) => false,
            IntegerExpression::Neg(ex) => ex.contains_nondet(),
            IntegerExpression::BinaryExpr(lhs, _, rhs) => {
                lhs.contains_nondet() || rhs.contains_nondet()
            }
        }
    }

    /// Add all variables referenced by the expression to `vars`
    pub fn collect_variables(&self, vars: &mut BTreeSet<Variable>) {
        match self {
            IntegerExpression::Atom(v) => {
                vars.insert(v.clone());
            }
            IntegerExpression::Const(_) | IntegerExpression::Nondet => (),
            IntegerExpression::Neg(ex) => ex.collect_variables(vars),
            IntegerExpression::BinaryExpr(lhs, _, rhs) => {
                lhs.collect_variables(vars);
                rhs.collect_variables(vars);
            }
        }
    }

    /// Variables referenced by the expression
    pub fn variables(&self) -> BTreeSet<Variable> {
        let mut vars = BTreeSet::new();
        self.collect_variables(&mut vars);
        vars
    }

    /// Replace every occurrence of `var` by `replacement`
    ///
    /// # Example
    ///
    /// ```
    /// use cpa_cfa::expressions::*;
    ///
    /// let e = IntegerExpression::Atom(Variable::new("x")) + IntegerExpression::Const(1);
    /// let e = e.substitute(&Variable::new("x"), &IntegerExpression::Atom(Variable::new("y")));
    /// assert_eq!(e.to_string(), "(y + 1)");
    /// ```
    pub fn substitute(&self, var: &Variable, replacement: &IntegerExpression) -> IntegerExpression {
        match self {
            IntegerExpression::Atom(v) if v == var => replacement.clone(),
            IntegerExpression::Atom(_) | IntegerExpression::Const(_) | IntegerExpression::Nondet => {
                self.clone()
            }
            IntegerExpression::Neg(ex) => -ex.substitute(var, replacement),
            IntegerExpression::BinaryExpr(lhs, op, rhs) => IntegerExpression::BinaryExpr(
                Box::new(lhs.substitute(var, replacement)),
                *op,
                Box::new(rhs.substitute(var, replacement)),
            ),
        }
    }

    /// Fold constant sub-expressions
    ///
    /// Sub-expressions whose evaluation fails (e.g. a division by zero) are
    /// left untouched.
    pub fn simplify(&self) -> IntegerExpression {
        if let Some(c) = self.try_to_evaluate_to_const() {
            return IntegerExpression::Const(c);
        }
        match self {
            IntegerExpression::Neg(ex) => -ex.simplify(),
            IntegerExpression::BinaryExpr(lhs, op, rhs) => {
                IntegerExpression::BinaryExpr(Box::new(lhs.simplify()), *op, Box::new(rhs.simplify()))
            }
            _ => self.clone(),
        }
    }
}

impl BooleanExpression {
    /// Build the comparison `lhs op rhs`
    pub fn compare(
        lhs: impl Into<IntegerExpression>,
        op: ComparisonOp,
        rhs: impl Into<IntegerExpression>,
    ) -> Self {
        BooleanExpression::ComparisonExpression(Box::new(lhs.into()), op, Box::new(rhs.into()))
    }

    /// Evaluate the condition under the valuation `env`
    ///
    /// Conjunctions (disjunctions) evaluate to `false` (`true`) as soon as one
    /// operand does, even if the other operand cannot be evaluated.
    ///
    /// # Example
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use cpa_cfa::expressions::*;
    ///
    /// let env = HashMap::from([(Variable::new("x"), 3)]);
    /// let x_pos = BooleanExpression::compare(Variable::new("x"), ComparisonOp::Gt, 0);
    /// let y_pos = BooleanExpression::compare(Variable::new("y"), ComparisonOp::Gt, 0);
    ///
    /// assert_eq!(x_pos.evaluate(&env), Ok(true));
    /// assert!(y_pos.evaluate(&env).is_err());
    /// assert_eq!((x_pos | y_pos).evaluate(&env), Ok(true));
    /// ```
    pub fn evaluate<V: Valuation + ?Sized>(&self, env: &V) -> Result<bool, EvaluationError> {
        match self {
            BooleanExpression::True => Ok(true),
            BooleanExpression::False => Ok(false),
            BooleanExpression::ComparisonExpression(lhs, op, rhs) => {
                Ok(op.apply(lhs.evaluate(env)?, rhs.evaluate(env)?))
            }
            BooleanExpression::Not(b) => Ok(!b.evaluate(env)?),
            BooleanExpression::BinaryExpression(lhs, con, rhs) => {
                let dominating = *con == BooleanConnective::Or;
                let l = lhs.evaluate(env);
                if l == Ok(dominating) {
                    return l;
                }
                let r = rhs.evaluate(env);
                if r == Ok(dominating) {
                    return r;
                }
                l?;
                r
            }
        }
    }

    /// Check whether the condition references `var`
    pub fn contains_variable(&self, var: &Variable) -> bool {
        match self {
            BooleanExpression::True | BooleanExpression::False => false,
            BooleanExpression::ComparisonExpression(lhs, _, rhs) => {
                lhs.contains_variable(var) || rhs.contains_variable(var)
            }
            BooleanExpression::Not(b) => b.contains_variable(var),
            BooleanExpression::BinaryExpression(lhs, _, rhs) => {
                lhs.contains_variable(var) || rhs.contains_variable(var)
            }
        }
    }

    /// Add all variables referenced by the condition to `vars`
    pub fn collect_variables(&self, vars: &mut BTreeSet<Variable>) {
        match self {
            BooleanExpression::True | BooleanExpression::False => (),
            BooleanExpression::ComparisonExpression(lhs, _, rhs) => {
                lhs.collect_variables(vars);
                rhs.collect_variables(vars);
            }
            BooleanExpression::Not(b) => b.collect_variables(vars),
            BooleanExpression::BinaryExpression(lhs, _, rhs) => {
                lhs.collect_variables(vars);
                rhs.collect_variables(vars);
            }
        }
    }

    /// Variables referenced by the condition
    pub fn variables(&self) -> BTreeSet<Variable> {
        let mut vars = BTreeSet::new();
        self.collect_variables(&mut vars);
        vars
    }

    /// Replace every occurrence of `var` by `replacement`
    pub fn substitute(&self, var: &Variable, replacement: &IntegerExpression) -> BooleanExpression {
        match self {
            BooleanExpression::True | BooleanExpression::False => self.clone(),
            BooleanExpression::ComparisonExpression(lhs, op, rhs) => {
                BooleanExpression::ComparisonExpression(
                    Box::new(lhs.substitute(var, replacement)),
                    *op,
                    Box::new(rhs.substitute(var, replacement)),
                )
            }
            BooleanExpression::Not(b) => !b.substitute(var, replacement),
            BooleanExpression::BinaryExpression(lhs, con, rhs) => {
                BooleanExpression::BinaryExpression(
                    Box::new(lhs.substitute(var, replacement)),
                    *con,
                    Box::new(rhs.substitute(var, replacement)),
                )
            }
        }
    }

    /// Negation with the negation pushed down to the comparisons
    ///
    /// # Example
    ///
    /// ```
    /// use cpa_cfa::expressions::*;
    ///
    /// let c = BooleanExpression::compare(Variable::new("x"), ComparisonOp::Gt, 0)
    ///     & BooleanExpression::True;
    /// assert_eq!(c.negate().to_string(), "(x <= 0 || false)");
    /// ```
    pub fn negate(&self) -> BooleanExpression {
        match self {
            BooleanExpression::True => BooleanExpression::False,
            BooleanExpression::False => BooleanExpression::True,
            BooleanExpression::ComparisonExpression(lhs, op, rhs) => {
                BooleanExpression::ComparisonExpression(lhs.clone(), op.invert(), rhs.clone())
            }
            BooleanExpression::Not(b) => (**b).clone(),
            BooleanExpression::BinaryExpression(lhs, con, rhs) => {
                BooleanExpression::BinaryExpression(
                    Box::new(lhs.negate()),
                    con.invert(),
                    Box::new(rhs.negate()),
                )
            }
        }
    }

    /// Fold constant comparisons and remove neutral or dominating operands
    ///
    /// # Example
    ///
    /// ```
    /// use cpa_cfa::expressions::*;
    ///
    /// let c = BooleanExpression::compare(1, ComparisonOp::Lt, 0)
    ///     | BooleanExpression::compare(Variable::new("x"), ComparisonOp::Eq, 2 + 3);
    /// assert_eq!(c.simplify().to_string(), "x == 5");
    /// ```
    pub fn simplify(&self) -> BooleanExpression {
        match self {
            BooleanExpression::True | BooleanExpression::False => self.clone(),
            BooleanExpression::ComparisonExpression(lhs, op, rhs) => {
                let (lhs, rhs) = (lhs.simplify(), rhs.simplify());
                match (&lhs, &rhs) {
                    (IntegerExpression::Const(l), IntegerExpression::Const(r)) => {
                        BooleanExpression::from(op.apply(*l, *r))
                    }
                    _ => BooleanExpression::ComparisonExpression(Box::new(lhs), *op, Box::new(rhs)),
                }
            }
            BooleanExpression::Not(b) => match b.simplify() {
                BooleanExpression::True => BooleanExpression::False,
                BooleanExpression::False => BooleanExpression::True,
                BooleanExpression::Not(inner) => *inner,
                b => !b,
            },
            BooleanExpression::BinaryExpression(lhs, con, rhs) => {
                let (lhs, rhs) = (lhs.simplify(), rhs.simplify());
                let (neutral, dominating) = match con {
                    BooleanConnective::And => (BooleanExpression::True, BooleanExpression::False),
                    BooleanConnective::Or => (BooleanExpression::False, BooleanExpression::True),
                };
                if lhs == dominating || rhs == dominating {
                    dominating
                } else if lhs == neutral || lhs == rhs {
                    rhs
                } else if rhs == neutral {
                    lhs
                } else {
                    BooleanExpression::BinaryExpression(Box::new(lhs), *con, Box::new(rhs))
                }
            }
        }
    }

    /// Conjunction of all conditions in `conditions`, `true` if empty
    pub fn conjunction(conditions: impl IntoIterator<Item = BooleanExpression>) -> Self {
        conditions
            .into_iter()
            .reduce(|acc, c| acc & c)
            .unwrap_or(BooleanExpression::True)
    }
}

impl From<Variable> for IntegerExpression {
    fn from(value: Variable) -> Self {
        IntegerExpression::Atom(value)
    }
}

impl From<i64> for IntegerExpression {
    fn from(value: i64) -> Self {
        IntegerExpression::Const(value)
    }
}

impl From<i32> for IntegerExpression {
    fn from(value: i32) -> Self {
        IntegerExpression::Const(i64::from(value))
    }
}

impl From<bool> for BooleanExpression {
    fn from(value: bool) -> Self {
        if value {
            BooleanExpression::True
        } else {
            BooleanExpression::False
        }
    }
}

// Overload operators for easier construction of expressions

impl ops::Add for IntegerExpression {
    type Output = IntegerExpression;

    fn add(self, other: IntegerExpression) -> IntegerExpression {
        IntegerExpression::BinaryExpr(Box::new(self), IntegerOp::Add, Box::new(other))
    }
}

impl ops::Sub for IntegerExpression {
    type Output = IntegerExpression;

    fn sub(self, other: IntegerExpression) -> IntegerExpression {
        IntegerExpression::BinaryExpr(Box::new(self), IntegerOp::Sub, Box::new(other))
    }
}

impl ops::Mul for IntegerExpression {
    type Output = IntegerExpression;

    fn mul(self, other: IntegerExpression) -> IntegerExpression {
        IntegerExpression::BinaryExpr(Box::new(self), IntegerOp::Mul, Box::new(other))
    }
}

impl ops::Div for IntegerExpression {
    type Output = IntegerExpression;

    fn div(self, other: IntegerExpression) -> IntegerExpression {
        IntegerExpression::BinaryExpr(Box::new(self), IntegerOp::Div, Box::new(other))
    }
}

impl ops::Rem for IntegerExpression {
    type Output = IntegerExpression;

    fn rem(self, other: IntegerExpression) -> IntegerExpression {
        IntegerExpression::BinaryExpr(Box::new(self), IntegerOp::Mod, Box::new(other))
    }
}

impl ops::Neg for IntegerExpression {
    type Output = IntegerExpression;

    fn neg(self) -> IntegerExpression {
        IntegerExpression::Neg(Box::new(self))
    }
}

impl ops::Not for BooleanExpression {
    type Output = BooleanExpression;

    fn not(self) -> BooleanExpression {
        BooleanExpression::Not(Box::new(self))
    }
}

impl ops::BitAnd for BooleanExpression {
    type Output = BooleanExpression;

    fn bitand(self, other: BooleanExpression) -> BooleanExpression {
        BooleanExpression::BinaryExpression(Box::new(self), BooleanConnective::And, Box::new(other))
    }
}

impl ops::BitOr for BooleanExpression {
    type Output = BooleanExpression;

    fn bitor(self, other: BooleanExpression) -> BooleanExpression {
        BooleanExpression::BinaryExpression(Box::new(self), BooleanConnective::Or, Box::new(other))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn x() -> IntegerExpression {
        IntegerExpression::Atom(Variable::new("x"))
    }

    #[test]
    fn test_evaluate_arithmetic() {
        let env = BTreeMap::from([(Variable::new("x"), 7)]);

        assert_eq!((x() + IntegerExpression::Const(3)).evaluate(&env), Ok(10));
        assert_eq!((x() - IntegerExpression::Const(10)).evaluate(&env), Ok(-3));
        assert_eq!((x() / IntegerExpression::Const(2)).evaluate(&env), Ok(3));
        assert_eq!((x() % IntegerExpression::Const(4)).evaluate(&env), Ok(3));
        assert_eq!((-x()).evaluate(&env), Ok(-7));
    }

    #[test]
    fn test_evaluate_errors() {
        let env = BTreeMap::from([(Variable::new("x"), 7)]);

        assert_eq!(
            (x() / IntegerExpression::Const(0)).evaluate(&env),
            Err(EvaluationError::DivisionByZero)
        );
        assert_eq!(
            (x() + IntegerExpression::Nondet).evaluate(&env),
            Err(EvaluationError::Nondet)
        );
        assert_eq!(
            (IntegerExpression::Const(i64::MAX) + x()).evaluate(&env),
            Err(EvaluationError::Overflow)
        );
    }

    #[test]
    fn test_evaluate_short_circuit() {
        let env: BTreeMap<Variable, i64> = BTreeMap::new();
        let unknown = BooleanExpression::compare(x(), ComparisonOp::Gt, 0);

        assert_eq!((unknown.clone() & BooleanExpression::False).evaluate(&env), Ok(false));
        assert_eq!((BooleanExpression::True | unknown.clone()).evaluate(&env), Ok(true));
        assert_eq!(
            (unknown & BooleanExpression::True).evaluate(&env),
            Err(EvaluationError::UnknownVariable(Variable::new("x")))
        );
    }

    #[test]
    fn test_variables_and_substitute() {
        let cond = BooleanExpression::compare(
            x() + IntegerExpression::Atom(Variable::new("y")),
            ComparisonOp::Leq,
            IntegerExpression::Atom(Variable::new("z")),
        );
        assert_eq!(
            cond.variables(),
            BTreeSet::from([Variable::new("x"), Variable::new("y"), Variable::new("z")])
        );

        let substituted = cond.substitute(&Variable::new("y"), &IntegerExpression::Const(1));
        assert_eq!(substituted.to_string(), "(x + 1) <= z");
        assert!(!substituted.contains_variable(&Variable::new("y")));
    }

    #[test]
    fn test_negate_is_equivalent() {
        let cond = BooleanExpression::compare(x(), ComparisonOp::Gt, 0)
            | !BooleanExpression::compare(x(), ComparisonOp::Eq, -4);

        for value in -6..6 {
            let env = BTreeMap::from([(Variable::new("x"), value)]);
            assert_eq!(
                cond.negate().evaluate(&env).unwrap(),
                !cond.evaluate(&env).unwrap()
            );
        }
    }

    #[test]
    fn test_simplify() {
        let cond = (BooleanExpression::compare(3, ComparisonOp::Gt, 2)
            & BooleanExpression::compare(x(), ComparisonOp::Lt, IntegerExpression::Const(2) * IntegerExpression::Const(2)))
            | BooleanExpression::False;
        assert_eq!(cond.simplify().to_string(), "x < 4");

        assert_eq!((!!BooleanExpression::compare(x(), ComparisonOp::Lt, 0)).simplify().to_string(), "x < 0");
        assert_eq!(
            (BooleanExpression::compare(x(), ComparisonOp::Lt, 0) & BooleanExpression::False).simplify(),
            BooleanExpression::False
        );
    }

    #[test]
    fn test_conjunction() {
        assert_eq!(BooleanExpression::conjunction(vec![]), BooleanExpression::True);
        let c = BooleanExpression::conjunction(vec![BooleanExpression::True, BooleanExpression::False]);
        assert_eq!(c.to_string(), "(true && false)");
    }
}
