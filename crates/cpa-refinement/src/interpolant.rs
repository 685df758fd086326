//! Interpolants attached to the positions of infeasible prefixes
//!
//! The refinement only needs the variables an interpolant talks about, these
//! become the precision increment at the location of the position.

use std::{collections::BTreeSet, fmt};

use cpa_cfa::expressions::{BooleanExpression, Variable};
use cpa_display_utils::join_iterator;

use crate::forgetful::ForgetfulState;

/// Fact at a position of a path
pub trait Interpolant: Clone + fmt::Debug + fmt::Display {
    /// Trivial interpolant that holds everywhere
    fn true_interpolant() -> Self;

    /// Check whether the interpolant holds everywhere
    fn is_true(&self) -> bool;

    /// Check whether the interpolant holds nowhere
    fn is_false(&self) -> bool;

    /// Interpolant with the facts of both
    fn join(&self, other: &Self) -> Self;

    /// Variables the interpolant talks about
    fn variables(&self) -> BTreeSet<Variable>;
}

/// Interpolant given by a state of a forgetful domain
#[derive(Debug, Clone, PartialEq)]
pub enum StateInterpolant<S> {
    /// No state satisfies the interpolant
    False,
    /// States at least as strong as the given one
    State(S),
}

impl<S: ForgetfulState> StateInterpolant<S> {
    /// The state, `None` for the false interpolant
    pub fn state(&self) -> Option<&S> {
        match self {
            StateInterpolant::False => None,
            StateInterpolant::State(s) => Some(s),
        }
    }
}

impl<S: ForgetfulState> Interpolant for StateInterpolant<S> {
    fn true_interpolant() -> Self {
        StateInterpolant::State(S::empty())
    }

    fn is_true(&self) -> bool {
        matches!(self, StateInterpolant::State(s) if s.size() == 0)
    }

    fn is_false(&self) -> bool {
        matches!(self, StateInterpolant::False)
    }

    fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (StateInterpolant::False, i) | (i, StateInterpolant::False) => i.clone(),
            (StateInterpolant::State(a), StateInterpolant::State(b)) => {
                StateInterpolant::State(a.union(b))
            }
        }
    }

    fn variables(&self) -> BTreeSet<Variable> {
        self.state()
            .map(|s| s.tracked_variables())
            .unwrap_or_default()
    }
}

impl<S: ForgetfulState> fmt::Display for StateInterpolant<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateInterpolant::False => write!(f, "false"),
            StateInterpolant::State(s) if s.size() == 0 => write!(f, "true"),
            StateInterpolant::State(s) => write!(f, "{s}"),
        }
    }
}

/// Interpolant made of the variables relevant for the infeasibility of the
/// remaining path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UseDefInterpolant(BTreeSet<Variable>);

impl UseDefInterpolant {
    /// Interpolant of the variables `relevant`
    pub fn new(relevant: BTreeSet<Variable>) -> Self {
        Self(relevant)
    }
}

impl Interpolant for UseDefInterpolant {
    fn true_interpolant() -> Self {
        Self::default()
    }

    fn is_true(&self) -> bool {
        self.0.is_empty()
    }

    fn is_false(&self) -> bool {
        false
    }

    fn join(&self, other: &Self) -> Self {
        Self(self.0.union(&other.0).cloned().collect())
    }

    fn variables(&self) -> BTreeSet<Variable> {
        self.0.clone()
    }
}

impl fmt::Display for UseDefInterpolant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", join_iterator(self.0.iter(), ", "))
    }
}

/// Interpolant given by a condition
///
/// Variables in `quantified` are universally quantified, they stand for
/// values chosen nondeterministically on the remaining path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaInterpolant {
    formula: BooleanExpression,
    quantified: BTreeSet<Variable>,
}

impl FormulaInterpolant {
    /// Interpolant `forall quantified. formula`
    pub fn new(formula: BooleanExpression, quantified: BTreeSet<Variable>) -> Self {
        let quantified = quantified
            .into_iter()
            .filter(|v| formula.contains_variable(v))
            .collect();
        Self {
            formula,
            quantified,
        }
    }

    /// Condition of the interpolant
    pub fn formula(&self) -> &BooleanExpression {
        &self.formula
    }

    /// Universally quantified variables
    pub fn quantified(&self) -> &BTreeSet<Variable> {
        &self.quantified
    }
}

impl Interpolant for FormulaInterpolant {
    fn true_interpolant() -> Self {
        Self::new(BooleanExpression::True, BTreeSet::new())
    }

    fn is_true(&self) -> bool {
        self.formula == BooleanExpression::True
    }

    fn is_false(&self) -> bool {
        self.formula == BooleanExpression::False
    }

    fn join(&self, other: &Self) -> Self {
        Self::new(
            (self.formula.clone() & other.formula.clone()).simplify(),
            self.quantified.union(&other.quantified).cloned().collect(),
        )
    }

    fn variables(&self) -> BTreeSet<Variable> {
        self.formula
            .variables()
            .difference(&self.quantified)
            .cloned()
            .collect()
    }
}

impl fmt::Display for FormulaInterpolant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.quantified.is_empty() {
            write!(f, "{}", self.formula)
        } else {
            write!(
                f,
                "forall {}. {}",
                join_iterator(self.quantified.iter(), ", "),
                self.formula
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use cpa_cfa::expressions::ComparisonOp;
    use cpa_domains::interval::{Interval, IntervalAnalysisState};

    use super::*;

    fn x() -> Variable {
        Variable::new("x")
    }

    #[test]
    fn test_state_interpolant() {
        let t = StateInterpolant::<IntervalAnalysisState>::true_interpolant();
        assert!(t.is_true());
        assert_eq!(t.to_string(), "true");

        let mut s = IntervalAnalysisState::new();
        s.set(x(), Interval::at_least(1));
        let i = StateInterpolant::State(s);
        assert!(!i.is_true() && !i.is_false());
        assert_eq!(i.variables(), BTreeSet::from([x()]));

        let f = StateInterpolant::<IntervalAnalysisState>::False;
        assert!(f.is_false());
        assert!(f.variables().is_empty());
        assert_eq!(f.join(&i), i);
        assert_eq!(t.join(&i), i);
    }

    #[test]
    fn test_use_def_interpolant() {
        let a = UseDefInterpolant::new(BTreeSet::from([x()]));
        let b = UseDefInterpolant::new(BTreeSet::from([Variable::new("y")]));
        assert_eq!(a.join(&b).to_string(), "{x, y}");
        assert!(UseDefInterpolant::true_interpolant().is_true());
    }

    #[test]
    fn test_quantified_variables_are_not_free() {
        let q = Variable::new("q");
        let i = FormulaInterpolant::new(
            BooleanExpression::compare(x(), ComparisonOp::Gt, q.clone()),
            BTreeSet::from([q.clone(), Variable::new("unused")]),
        );
        assert_eq!(i.quantified(), &BTreeSet::from([q]));
        assert_eq!(i.variables(), BTreeSet::from([x()]));
        assert_eq!(i.to_string(), "forall q. x > q");
    }
}
