//! Interval domain
//!
//! An [`IntervalAnalysisState`] bounds every tracked variable by an
//! [`Interval`]. Variables without an entry are unbounded.

use std::{collections::BTreeMap, fmt, sync::Arc};

use cpa_cfa::{
    Cfa, CfaEdge, CfaNode, EdgeKind,
    expressions::{
        BooleanConnective, BooleanExpression, ComparisonOp, IntegerExpression, IntegerOp, Variable,
    },
};
use cpa_core::{ConfigurableProgramAnalysis, error::CpaError, precision::VariableTrackingPrecision};
use cpa_display_utils::join_iterator;

use crate::{TransferableState, apply_with_abstraction, multi_edge_error};

/// Non-empty interval of integers
///
/// A missing bound means that the interval is unbounded in that direction.
/// Arithmetic that overflows drops the affected bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    low: Option<i64>,
    high: Option<i64>,
}

impl Interval {
    /// Interval `[low, high]`, `None` if it is empty
    pub fn new(low: Option<i64>, high: Option<i64>) -> Option<Self> {
        match (low, high) {
            (Some(l), Some(h)) if l > h => None,
            _ => Some(Self { low, high }),
        }
    }

    /// Interval of all integers
    pub fn top() -> Self {
        Self {
            low: None,
            high: None,
        }
    }

    /// Interval containing only `c`
    pub fn singleton(c: i64) -> Self {
        Self {
            low: Some(c),
            high: Some(c),
        }
    }

    /// Interval `[low, inf)`
    pub fn at_least(low: i64) -> Self {
        Self {
            low: Some(low),
            high: None,
        }
    }

    /// Interval `(-inf, high]`
    pub fn at_most(high: i64) -> Self {
        Self {
            low: None,
            high: Some(high),
        }
    }

    /// Lower bound
    pub fn low(&self) -> Option<i64> {
        self.low
    }

    /// Upper bound
    pub fn high(&self) -> Option<i64> {
        self.high
    }

    /// Check whether the interval is unbounded in both directions
    pub fn is_top(&self) -> bool {
        self.low.is_none() && self.high.is_none()
    }

    /// The only element of the interval, if there is exactly one
    pub fn as_singleton(&self) -> Option<i64> {
        match (self.low, self.high) {
            (Some(l), Some(h)) if l == h => Some(l),
            _ => None,
        }
    }

    /// Check whether `c` lies in the interval
    pub fn contains(&self, c: i64) -> bool {
        self.low.is_none_or(|l| l <= c) && self.high.is_none_or(|h| c <= h)
    }

    /// Check whether this interval is a subset of `other`
    pub fn is_subset_of(&self, other: &Self) -> bool {
        let low_ok = match (self.low, other.low) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(l), Some(ol)) => ol <= l,
        };
        let high_ok = match (self.high, other.high) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(h), Some(oh)) => h <= oh,
        };
        low_ok && high_ok
    }

    /// Smallest interval containing both intervals
    pub fn join(&self, other: &Self) -> Self {
        Self {
            low: self.low.zip(other.low).map(|(a, b)| a.min(b)),
            high: self.high.zip(other.high).map(|(a, b)| a.max(b)),
        }
    }

    /// Intersection of both intervals, `None` if it is empty
    pub fn meet(&self, other: &Self) -> Option<Self> {
        let low = match (self.low, other.low) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let high = match (self.high, other.high) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self::new(low, high)
    }

    /// Drop every bound of `next` that moved away from this interval
    pub fn widen(&self, next: &Self) -> Self {
        let low = match (self.low, next.low) {
            (Some(a), Some(b)) if b >= a => Some(b),
            _ => None,
        };
        let high = match (self.high, next.high) {
            (Some(a), Some(b)) if b <= a => Some(b),
            _ => None,
        };
        Self { low, high }
    }

    fn negate(&self) -> Self {
        Self {
            low: self.high.and_then(i64::checked_neg),
            high: self.low.and_then(i64::checked_neg),
        }
    }

    fn add(&self, other: &Self) -> Self {
        Self {
            low: self.low.zip(other.low).and_then(|(a, b)| a.checked_add(b)),
            high: self.high.zip(other.high).and_then(|(a, b)| a.checked_add(b)),
        }
    }

    fn mul(&self, other: &Self) -> Self {
        if self.as_singleton() == Some(0) || other.as_singleton() == Some(0) {
            return Self::singleton(0);
        }
        let (Some(a), Some(b), Some(c), Some(d)) = (self.low, self.high, other.low, other.high)
        else {
            return Self::top();
        };
        let products = [a.checked_mul(c), a.checked_mul(d), b.checked_mul(c), b.checked_mul(d)];
        if products.iter().any(Option::is_none) {
            return Self::top();
        }
        let products = products.into_iter().flatten();
        Self {
            low: products.clone().min(),
            high: products.max(),
        }
    }

    fn apply(&self, op: IntegerOp, other: &Self) -> Self {
        if let (Some(l), Some(r)) = (self.as_singleton(), other.as_singleton()) {
            return op.apply(l, r).map_or_else(|_| Self::top(), Self::singleton);
        }
        match op {
            IntegerOp::Add => self.add(other),
            IntegerOp::Sub => self.add(&other.negate()),
            IntegerOp::Mul => self.mul(other),
            IntegerOp::Div | IntegerOp::Mod => Self::top(),
        }
    }

    /// Check whether some element of this interval and some element of
    /// `other` satisfy `op`
    pub fn may_satisfy(&self, op: ComparisonOp, other: &Self) -> bool {
        match op {
            ComparisonOp::Lt => lt_bounds(self.low, other.high, 1),
            ComparisonOp::Leq => lt_bounds(self.low, other.high, 0),
            ComparisonOp::Gt => lt_bounds(other.low, self.high, 1),
            ComparisonOp::Geq => lt_bounds(other.low, self.high, 0),
            ComparisonOp::Eq => self.meet(other).is_some(),
            ComparisonOp::Neq => {
                self.as_singleton().is_none() || self.as_singleton() != other.as_singleton()
            }
        }
    }

    /// Elements of this interval that satisfy `op` with some element of
    /// `other`
    fn restrict(&self, op: ComparisonOp, other: &Self) -> Option<Self> {
        let bound = match op {
            ComparisonOp::Lt => Self {
                low: None,
                high: other.high.and_then(|h| h.checked_sub(1)),
            },
            ComparisonOp::Leq => Self {
                low: None,
                high: other.high,
            },
            ComparisonOp::Gt => Self {
                low: other.low.and_then(|l| l.checked_add(1)),
                high: None,
            },
            ComparisonOp::Geq => Self {
                low: other.low,
                high: None,
            },
            ComparisonOp::Eq => *other,
            ComparisonOp::Neq => {
                let Some(c) = other.as_singleton() else {
                    return Some(*self);
                };
                let mut trimmed = *self;
                if trimmed.low == Some(c) {
                    trimmed.low = c.checked_add(1);
                }
                if trimmed.high == Some(c) {
                    trimmed.high = c.checked_sub(1);
                }
                return Self::new(trimmed.low, trimmed.high);
            }
        };
        self.meet(&bound)
    }
}

/// `low + gap <= high`, where a missing bound is infinite
fn lt_bounds(low: Option<i64>, high: Option<i64>, gap: i64) -> bool {
    match (low, high) {
        (Some(l), Some(h)) => (l as i128) + (gap as i128) <= h as i128,
        _ => true,
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.low {
            Some(l) => write!(f, "[{l}, ")?,
            None => write!(f, "(-inf, ")?,
        }
        match self.high {
            Some(h) => write!(f, "{h}]"),
            None => write!(f, "inf)"),
        }
    }
}

/// Bounds of variables
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct IntervalAnalysisState {
    intervals: BTreeMap<Variable, Interval>,
}

impl IntervalAnalysisState {
    /// State without any bounds
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds of `var`
    pub fn get(&self, var: &Variable) -> Interval {
        self.intervals.get(var).copied().unwrap_or_else(Interval::top)
    }

    /// Check whether `var` is bounded
    pub fn contains(&self, var: &Variable) -> bool {
        self.intervals.contains_key(var)
    }

    /// Bound `var` by `interval`
    pub fn set(&mut self, var: Variable, interval: Interval) {
        if interval.is_top() {
            self.intervals.remove(&var);
        } else {
            self.intervals.insert(var, interval);
        }
    }

    /// Drop the bounds of `var`, returning the dropped bounds
    pub fn forget(&mut self, var: &Variable) -> Option<Interval> {
        self.intervals.remove(var)
    }

    /// Bounded variables
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.intervals.keys()
    }

    /// Bounded variables with their bounds
    pub fn iter(&self) -> impl Iterator<Item = (&Variable, &Interval)> {
        self.intervals.iter()
    }

    /// Number of bounded variables
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// Check whether no variable is bounded
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Bounds of `expression` under this state
    pub fn evaluate(&self, expression: &IntegerExpression) -> Interval {
        match expression {
            IntegerExpression::Atom(v) => self.get(v),
            IntegerExpression::Const(c) => Interval::singleton(*c),
            IntegerExpression::Nondet => Interval::top(),
            IntegerExpression::Neg(e) => self.evaluate(e).negate(),
            IntegerExpression::BinaryExpr(lhs, op, rhs) => {
                self.evaluate(lhs).apply(*op, &self.evaluate(rhs))
            }
        }
    }

    /// Check whether every bound of `other` is implied by this state
    pub fn is_less_or_equal(&self, other: &Self) -> bool {
        other
            .intervals
            .iter()
            .all(|(var, bound)| self.get(var).is_subset_of(bound))
    }

    /// Pointwise join
    pub fn join(&self, other: &Self) -> Self {
        let mut joined = Self::new();
        for (var, bound) in &self.intervals {
            if let Some(o) = other.intervals.get(var) {
                joined.set(var.clone(), bound.join(o));
            }
        }
        joined
    }

    /// Pointwise widening from this state to `next`
    pub fn widen(&self, next: &Self) -> Self {
        let mut widened = Self::new();
        for (var, bound) in &next.intervals {
            if let Some(prev) = self.intervals.get(var) {
                widened.set(var.clone(), prev.widen(bound));
            }
        }
        widened
    }

    /// Strengthen the state by `condition`, `None` if it cannot hold
    pub fn assume(&self, condition: &BooleanExpression) -> Option<Self> {
        match condition {
            BooleanExpression::True => Some(self.clone()),
            BooleanExpression::False => None,
            BooleanExpression::Not(inner) => self.assume(&inner.negate()),
            BooleanExpression::BinaryExpression(lhs, BooleanConnective::And, rhs) => {
                self.assume(lhs)?.assume(rhs)
            }
            BooleanExpression::BinaryExpression(lhs, BooleanConnective::Or, rhs) => {
                match (self.assume(lhs), self.assume(rhs)) {
                    (Some(l), Some(r)) => Some(l.join(&r)),
                    (l, r) => l.or(r),
                }
            }
            BooleanExpression::ComparisonExpression(lhs, op, rhs) => {
                self.assume_comparison(lhs, *op, rhs)
            }
        }
    }

    fn assume_comparison(
        &self,
        lhs: &IntegerExpression,
        op: ComparisonOp,
        rhs: &IntegerExpression,
    ) -> Option<Self> {
        let (l, r) = (self.evaluate(lhs), self.evaluate(rhs));
        if !l.may_satisfy(op, &r) {
            return None;
        }
        let mut next = self.clone();
        if let IntegerExpression::Atom(x) = lhs {
            next.set(x.clone(), l.restrict(op, &r)?);
        }
        if let IntegerExpression::Atom(y) = rhs {
            let current = next.get(y);
            next.set(y.clone(), current.restrict(op.get_swap_side(), &l)?);
        }
        Some(next)
    }
}

impl TransferableState for IntervalAnalysisState {
    fn apply_edge(&self, edge: &CfaEdge) -> Result<Option<Self>, CpaError> {
        let mut next = self.clone();
        match edge.kind() {
            EdgeKind::Blank { .. } => {}
            EdgeKind::Declaration {
                variable,
                initializer,
            } => {
                let bound = initializer
                    .as_ref()
                    .map_or_else(Interval::top, |init| self.evaluate(init));
                next.set(variable.clone(), bound);
            }
            EdgeKind::Assignment {
                variable,
                expression,
            } => next.set(variable.clone(), self.evaluate(expression)),
            EdgeKind::Assume { .. } => {
                let condition = edge
                    .kind()
                    .assumed_condition()
                    .ok_or_else(|| CpaError::unrecognized(format!("assume edge {edge}")))?;
                return Ok(self.assume(&condition));
            }
            EdgeKind::FunctionCall { arguments, .. } => {
                for (param, arg) in arguments {
                    next.set(param.clone(), self.evaluate(arg));
                }
            }
            EdgeKind::FunctionReturn {
                function,
                assign_to,
                return_variable,
            } => {
                if let Some(target) = assign_to {
                    let bound = return_variable
                        .as_ref()
                        .map_or_else(Interval::top, |r| self.get(r));
                    next.set(target.clone(), bound);
                }
                next.drop_locals_of(function);
            }
            EdgeKind::Multi(_) => return Err(multi_edge_error(edge)),
        }
        Ok(Some(next))
    }

    fn retain_variables(&mut self, keep: impl Fn(&Variable) -> bool) {
        self.intervals.retain(|var, _| keep(var));
    }
}

impl fmt::Display for IntervalAnalysisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]",
            join_iterator(self.intervals.iter().map(|(v, i)| format!("{v} in {i}")), ", ")
        )
    }
}

/// Interval analysis with merge by join
#[derive(Debug, Clone)]
pub struct IntervalAnalysisCpa {
    cfa: Arc<Cfa>,
    precision: VariableTrackingPrecision,
}

impl IntervalAnalysisCpa {
    /// Analysis of `cfa` starting with `precision`
    pub fn new(cfa: Arc<Cfa>, precision: VariableTrackingPrecision) -> Self {
        Self { cfa, precision }
    }
}

impl ConfigurableProgramAnalysis for IntervalAnalysisCpa {
    type State = IntervalAnalysisState;
    type Precision = VariableTrackingPrecision;

    fn initial_state(&self, _node: &CfaNode) -> IntervalAnalysisState {
        IntervalAnalysisState::new()
    }

    fn initial_precision(&self, _node: &CfaNode) -> VariableTrackingPrecision {
        self.precision.clone()
    }

    fn abstract_successors_for_edge(
        &self,
        state: &IntervalAnalysisState,
        precision: &VariableTrackingPrecision,
        edge: &CfaEdge,
    ) -> Result<Vec<IntervalAnalysisState>, CpaError> {
        Ok(apply_with_abstraction(state, edge, precision, &self.cfa)?
            .into_iter()
            .collect())
    }

    fn merge(
        &self,
        successor: &IntervalAnalysisState,
        reached: &IntervalAnalysisState,
        _precision: &VariableTrackingPrecision,
    ) -> IntervalAnalysisState {
        successor.join(reached)
    }

    fn widen(
        &self,
        previous: &IntervalAnalysisState,
        next: &IntervalAnalysisState,
        _precision: &VariableTrackingPrecision,
    ) -> IntervalAnalysisState {
        previous.widen(next)
    }

    fn is_less_or_equal(
        &self,
        state: &IntervalAnalysisState,
        other: &IntervalAnalysisState,
    ) -> bool {
        state.is_less_or_equal(other)
    }
}

#[cfg(test)]
mod tests {
    use cpa_cfa::{CfaEdgeId, CfaNodeId};

    use super::*;

    fn x() -> Variable {
        Variable::new("x")
    }

    fn assume(condition: BooleanExpression, truth: bool) -> CfaEdge {
        CfaEdge::new(
            CfaEdgeId(0),
            CfaNodeId(0),
            CfaNodeId(1),
            EdgeKind::Assume { condition, truth },
        )
    }

    #[test]
    fn test_interval_lattice() {
        let a = Interval::new(Some(0), Some(5)).unwrap();
        let b = Interval::at_least(3);
        assert_eq!(a.join(&b), Interval::at_least(0));
        assert_eq!(a.meet(&b), Interval::new(Some(3), Some(5)));
        assert_eq!(a.meet(&Interval::at_least(6)), None);
        assert!(Interval::singleton(4).is_subset_of(&a));
        assert!(!b.is_subset_of(&a));
        assert!(a.is_subset_of(&Interval::top()));
        assert_eq!(Interval::new(Some(2), Some(1)), None);
    }

    #[test]
    fn test_widening_drops_moving_bounds() {
        let prev = Interval::new(Some(0), Some(1)).unwrap();
        let next = Interval::new(Some(0), Some(2)).unwrap();
        assert_eq!(prev.widen(&next), Interval::at_least(0));
        assert_eq!(prev.widen(&prev), prev);
    }

    #[test]
    fn test_arithmetic() {
        let mut s = IntervalAnalysisState::new();
        s.set(x(), Interval::new(Some(1), Some(3)).unwrap());
        let e = IntegerExpression::Atom(x()) * IntegerExpression::Const(-2);
        assert_eq!(s.evaluate(&e), Interval::new(Some(-6), Some(-2)).unwrap());

        let e = IntegerExpression::Atom(x()) - IntegerExpression::Atom(Variable::new("y"));
        assert_eq!(s.evaluate(&e), Interval::top());

        let e = IntegerExpression::Const(i64::MAX) + IntegerExpression::Const(1);
        assert_eq!(s.evaluate(&e), Interval::top());
    }

    #[test]
    fn test_assume_refines_bounds() {
        let gt = BooleanExpression::compare(x(), ComparisonOp::Gt, 0);
        let s = IntervalAnalysisState::new()
            .apply_edge(&assume(gt.clone(), true))
            .unwrap()
            .unwrap();
        assert_eq!(s.get(&x()), Interval::at_least(1));

        let lt = BooleanExpression::compare(x(), ComparisonOp::Lt, 0);
        assert_eq!(s.apply_edge(&assume(lt, true)).unwrap(), None);

        let s = s.apply_edge(&assume(gt, false));
        assert_eq!(s.unwrap(), None);
    }

    #[test]
    fn test_assume_with_variable_on_right() {
        let c = BooleanExpression::compare(5, ComparisonOp::Geq, x());
        let s = IntervalAnalysisState::new().assume(&c).unwrap();
        assert_eq!(s.get(&x()), Interval::at_most(5));

        let neq = BooleanExpression::compare(x(), ComparisonOp::Neq, 5);
        assert_eq!(s.assume(&neq).unwrap().get(&x()), Interval::at_most(4));
    }

    #[test]
    fn test_assume_disjunction_joins() {
        let c = BooleanExpression::compare(x(), ComparisonOp::Eq, 1)
            | BooleanExpression::compare(x(), ComparisonOp::Eq, 4);
        let s = IntervalAnalysisState::new().assume(&c).unwrap();
        assert_eq!(s.get(&x()), Interval::new(Some(1), Some(4)).unwrap());
    }

    #[test]
    fn test_order_join_and_merge_idempotent() {
        let mut a = IntervalAnalysisState::new();
        a.set(x(), Interval::singleton(1));
        let mut b = IntervalAnalysisState::new();
        b.set(x(), Interval::singleton(2));

        let j = a.join(&b);
        assert!(a.is_less_or_equal(&j));
        assert!(b.is_less_or_equal(&j));
        assert!(!j.is_less_or_equal(&a));
        assert!(a.is_less_or_equal(&IntervalAnalysisState::new()));
        assert_eq!(a.join(&a), a);
    }

    #[test]
    fn test_display() {
        let mut s = IntervalAnalysisState::new();
        s.set(x(), Interval::at_least(1));
        s.set(Variable::new("y"), Interval::new(Some(-1), Some(2)).unwrap());
        assert_eq!(s.to_string(), "[x in [1, inf), y in [-1, 2]]");
        s.set(x(), Interval::top());
        assert_eq!(s.to_string(), "[y in [-1, 2]]");
    }
}
