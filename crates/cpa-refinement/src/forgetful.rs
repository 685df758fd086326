//! States that can drop and restore facts about single variables
//!
//! The edge interpolator finds out which variables are needed to keep a
//! suffix infeasible by forgetting them one at a time, and restoring them if
//! the suffix becomes feasible.

use std::{collections::BTreeSet, fmt};

use cpa_cfa::expressions::{BooleanExpression, ComparisonOp, Variable};
use cpa_core::precision::VariableTrackingPrecision;
use cpa_domains::{
    TransferableState,
    composite::{ComponentKind, ComponentPrecision, CompositeState},
    interval::{Interval, IntervalAnalysisState},
    value::ValueAnalysisState,
};

/// State mapping variables to facts that can be removed and restored
pub trait ForgetfulState:
    Clone + fmt::Debug + fmt::Display + PartialEq + TransferableState
{
    /// Fact stored per variable
    type Value: Clone + fmt::Debug + PartialEq;

    /// Component of the composite analysis holding states of this type
    const KIND: ComponentKind;

    /// State without any facts
    fn empty() -> Self;

    /// Remove the fact about `var` and return it
    fn forget(&mut self, var: &Variable) -> Option<Self::Value>;

    /// Store `value` as the fact about `var`
    fn remember(&mut self, var: Variable, value: Self::Value);

    /// Fact about `var`
    fn retrieve(&self, var: &Variable) -> Option<Self::Value>;

    /// Variables with a fact
    fn tracked_variables(&self) -> BTreeSet<Variable>;

    /// Check whether `self` is at least as strong as `other`
    fn is_less_or_equal(&self, other: &Self) -> bool;

    /// Condition describing the facts of the state
    fn to_condition(&self) -> BooleanExpression;

    /// Wrap `precision` as precision of this component
    fn component_precision(precision: VariableTrackingPrecision) -> ComponentPrecision;

    /// Component of `state` holding a state of this type
    fn component_of(state: &CompositeState) -> Option<&Self>;

    /// Number of variables with a fact
    fn size(&self) -> usize {
        self.tracked_variables().len()
    }

    /// State with the facts of `self` and the facts of `other` about
    /// variables `self` has no fact about
    fn union(&self, other: &Self) -> Self {
        let mut union = self.clone();
        for var in other.tracked_variables() {
            if self.retrieve(&var).is_some() {
                continue;
            }
            if let Some(value) = other.retrieve(&var) {
                union.remember(var, value);
            }
        }
        union
    }
}

impl ForgetfulState for ValueAnalysisState {
    type Value = i64;

    const KIND: ComponentKind = ComponentKind::Value;

    fn empty() -> Self {
        ValueAnalysisState::new()
    }

    fn forget(&mut self, var: &Variable) -> Option<i64> {
        ValueAnalysisState::forget(self, var)
    }

    fn remember(&mut self, var: Variable, value: i64) {
        self.assign(var, value);
    }

    fn retrieve(&self, var: &Variable) -> Option<i64> {
        self.get(var)
    }

    fn tracked_variables(&self) -> BTreeSet<Variable> {
        self.variables().cloned().collect()
    }

    fn is_less_or_equal(&self, other: &Self) -> bool {
        ValueAnalysisState::is_less_or_equal(self, other)
    }

    fn to_condition(&self) -> BooleanExpression {
        BooleanExpression::conjunction(
            self.iter()
                .map(|(var, value)| BooleanExpression::compare(var.clone(), ComparisonOp::Eq, *value)),
        )
    }

    fn component_precision(precision: VariableTrackingPrecision) -> ComponentPrecision {
        ComponentPrecision::Value(precision)
    }

    fn component_of(state: &CompositeState) -> Option<&Self> {
        state.value()
    }
}

impl ForgetfulState for IntervalAnalysisState {
    type Value = Interval;

    const KIND: ComponentKind = ComponentKind::Interval;

    fn empty() -> Self {
        IntervalAnalysisState::new()
    }

    fn forget(&mut self, var: &Variable) -> Option<Interval> {
        IntervalAnalysisState::forget(self, var)
    }

    fn remember(&mut self, var: Variable, value: Interval) {
        self.set(var, value);
    }

    fn retrieve(&self, var: &Variable) -> Option<Interval> {
        self.contains(var).then(|| self.get(var))
    }

    fn tracked_variables(&self) -> BTreeSet<Variable> {
        self.variables().cloned().collect()
    }

    fn is_less_or_equal(&self, other: &Self) -> bool {
        IntervalAnalysisState::is_less_or_equal(self, other)
    }

    fn to_condition(&self) -> BooleanExpression {
        BooleanExpression::conjunction(self.iter().flat_map(|(var, interval)| {
            let low = interval
                .low()
                .map(|l| BooleanExpression::compare(var.clone(), ComparisonOp::Geq, l));
            let high = interval
                .high()
                .map(|h| BooleanExpression::compare(var.clone(), ComparisonOp::Leq, h));
            low.into_iter().chain(high)
        }))
    }

    fn component_precision(precision: VariableTrackingPrecision) -> ComponentPrecision {
        ComponentPrecision::Interval(precision)
    }

    fn component_of(state: &CompositeState) -> Option<&Self> {
        state.interval()
    }
}
