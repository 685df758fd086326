//! Integer and boolean expressions appearing on the edges of a CFA
//!
//! Expressions are built over program [`Variable`]s. Function local
//! variables are qualified with the name of the function they belong to
//! (`main::x`), all other variables are global.
//!
//! Arithmetic is represented by [`IntegerExpression`]s, which can be compared
//! using a [`ComparisonOp`] to form [`BooleanExpression`]s.

use std::fmt::{self, Display};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub mod properties;

/// Separator between the function name and the name of a local variable
pub const SCOPE_SEPARATOR: &str = "::";

/// Program variable
///
/// The name of a function local variable carries the function as prefix, e.g.
/// `main::x`.
#[derive(Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Variable(String);

impl Variable {
    /// Create a new variable with the given (qualified) name
    pub fn new(name: impl ToString) -> Self {
        Variable(name.to_string())
    }

    /// Create a variable local to `function`
    ///
    /// # Example
    ///
    /// ```
    /// use cpa_cfa::expressions::Variable;
    ///
    /// let x = Variable::new_local("main", "x");
    /// assert_eq!(x.name(), "main::x");
    /// assert_eq!(x.function(), Some("main"));
    /// ```
    pub fn new_local(function: &str, name: &str) -> Self {
        Variable(format!("{function}{SCOPE_SEPARATOR}{name}"))
    }

    /// Qualified name of the variable
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Function the variable is local to, `None` for global variables
    pub fn function(&self) -> Option<&str> {
        self.0
            .split_once(SCOPE_SEPARATOR)
            .map(|(function, _)| function)
    }

    /// Check whether the variable is global
    pub fn is_global(&self) -> bool {
        self.function().is_none()
    }
}

impl From<&str> for Variable {
    fn from(value: &str) -> Self {
        Variable::new(value)
    }
}

/// Boolean expression, e.g. the condition of an assume edge
///
/// # Example
///
/// ```
/// use cpa_cfa::expressions::*;
///
/// // x > 0 && y < 10
/// let cond = BooleanExpression::ComparisonExpression(
///         Box::new(IntegerExpression::Atom(Variable::new("x"))),
///         ComparisonOp::Gt,
///         Box::new(IntegerExpression::Const(0)),
///     ) & BooleanExpression::ComparisonExpression(
///         Box::new(IntegerExpression::Atom(Variable::new("y"))),
///         ComparisonOp::Lt,
///         Box::new(IntegerExpression::Const(10)),
///     );
/// assert_eq!(cond.to_string(), "(x > 0 && y < 10)");
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BooleanExpression {
    /// Comparison between two integer expressions
    ComparisonExpression(Box<IntegerExpression>, ComparisonOp, Box<IntegerExpression>),
    /// Boolean expressions combined through boolean connective
    BinaryExpression(Box<BooleanExpression>, BooleanConnective, Box<BooleanExpression>),
    /// Negation of boolean expression
    Not(Box<BooleanExpression>),
    /// true
    True,
    /// false
    False,
}

/// Integer expression over program variables and constants
///
/// # Example
///
/// ```
/// use cpa_cfa::expressions::*;
///
/// // x + 5
/// let e = IntegerExpression::Atom(Variable::new("x")) + IntegerExpression::Const(5);
/// assert_eq!(e.to_string(), "(x + 5)");
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IntegerExpression {
    /// Program variable
    Atom(Variable),
    /// Integer constant
    Const(i64),
    /// Nondeterministically chosen value, e.g. an unknown input
    Nondet,
    /// Integer expression combining two integer expressions through an
    /// arithmetic operator
    BinaryExpr(Box<IntegerExpression>, IntegerOp, Box<IntegerExpression>),
    /// Negated expression
    Neg(Box<IntegerExpression>),
}

/// Operators for comparing integer values
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ComparisonOp {
    /// Greater
    Gt,
    /// Greater equal
    Geq,
    /// Equal
    Eq,
    /// Not equal
    Neq,
    /// Less equal
    Leq,
    /// Less
    Lt,
}

/// Connectives for boolean expressions
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BooleanConnective {
    /// And
    And,
    /// Or
    Or,
}

/// Binary operators for integer expressions
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IntegerOp {
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division, truncating towards zero
    Div,
    /// Remainder of the truncating division
    Mod,
}

impl Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for BooleanExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BooleanExpression::ComparisonExpression(lhs, op, rhs) => {
                write!(f, "{lhs} {op} {rhs}")
            }
            BooleanExpression::BinaryExpression(lhs, op, rhs) => {
                write!(f, "({lhs} {op} {rhs})")
            }
            BooleanExpression::True => write!(f, "true"),
            BooleanExpression::False => write!(f, "false"),
            BooleanExpression::Not(b) => write!(f, "!({b})"),
        }
    }
}

impl Display for IntegerExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegerExpression::Atom(a) => write!(f, "{a}"),
            IntegerExpression::Const(c) => write!(f, "{c}"),
            IntegerExpression::Nondet => write!(f, "nondet()"),
            IntegerExpression::BinaryExpr(lhs, op, rhs) => write!(f, "({lhs} {op} {rhs})"),
            IntegerExpression::Neg(ex) => write!(f, "-{ex}"),
        }
    }
}

impl Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonOp::Gt => write!(f, ">"),
            ComparisonOp::Geq => write!(f, ">="),
            ComparisonOp::Eq => write!(f, "=="),
            ComparisonOp::Neq => write!(f, "!="),
            ComparisonOp::Leq => write!(f, "<="),
            ComparisonOp::Lt => write!(f, "<"),
        }
    }
}

impl Display for BooleanConnective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BooleanConnective::And => write!(f, "&&"),
            BooleanConnective::Or => write!(f, "||"),
        }
    }
}

impl Display for IntegerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegerOp::Add => write!(f, "+"),
            IntegerOp::Sub => write!(f, "-"),
            IntegerOp::Mul => write!(f, "*"),
            IntegerOp::Div => write!(f, "/"),
            IntegerOp::Mod => write!(f, "%"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_scope() {
        let local = Variable::new_local("f", "x");
        assert_eq!(local.name(), "f::x");
        assert_eq!(local.function(), Some("f"));
        assert!(!local.is_global());

        let global = Variable::new("g");
        assert_eq!(global.function(), None);
        assert!(global.is_global());
    }

    #[test]
    fn test_comparison_display() {
        let cond = BooleanExpression::ComparisonExpression(
            Box::new(IntegerExpression::Atom(Variable::new("x"))),
            ComparisonOp::Geq,
            Box::new(IntegerExpression::Const(-5)),
        );
        assert_eq!(cond.to_string(), "x >= -5");
    }

    #[test]
    fn test_integer_expression_display() {
        let expr = IntegerExpression::Atom(Variable::new("x")) % IntegerExpression::Const(2);
        assert_eq!(expr.to_string(), "(x % 2)");
        assert_eq!(IntegerExpression::Nondet.to_string(), "nondet()");
        assert_eq!((-IntegerExpression::Const(3)).to_string(), "-3");
    }

    #[test]
    fn test_boolean_expression_display() {
        let expr = !(BooleanExpression::True | BooleanExpression::False);
        assert_eq!(expr.to_string(), "!((true || false))");
    }

    #[test]
    fn test_op_display() {
        assert_eq!(ComparisonOp::Neq.to_string(), "!=");
        assert_eq!(ComparisonOp::Leq.to_string(), "<=");
        assert_eq!(BooleanConnective::Or.to_string(), "||");
        assert_eq!(IntegerOp::Div.to_string(), "/");
    }
}
