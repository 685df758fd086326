//! Def-use analysis of infeasible prefixes
//!
//! Walking an infeasible prefix backwards from its failing assume edge, a
//! variable is relevant if its value may influence the outcome of the
//! failing edge or of an assume edge on relevant variables. The relevant
//! variables before each edge form a cheap substitute for interpolants.

use std::collections::BTreeSet;

use cpa_cfa::{CfaEdge, EdgeKind, expressions::Variable};
use log::trace;

use crate::interpolant::{Interpolant, UseDefInterpolant};

/// Relevant variables at each position of an infeasible prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseDefRelation {
    relevant: Vec<BTreeSet<Variable>>,
}

impl UseDefRelation {
    /// Relation of the prefix `edges`, whose last edge is the failing one
    pub fn new(edges: &[CfaEdge]) -> Self {
        let mut relevant = vec![BTreeSet::new(); edges.len() + 1];
        let mut current = BTreeSet::new();
        for (k, edge) in edges.iter().enumerate().rev() {
            let failing = k + 1 == edges.len();
            let sub_edges: Vec<_> = edge.sub_edges().collect();
            for sub in sub_edges.into_iter().rev() {
                update_relevant(&mut current, sub, failing);
            }
            trace!("Relevant before edge {edge}: {current:?}");
            relevant[k] = current.clone();
        }
        Self { relevant }
    }

    /// Variables relevant before the `k`-th edge
    pub fn relevant_before(&self, k: usize) -> Option<&BTreeSet<Variable>> {
        self.relevant.get(k)
    }

    /// All variables relevant at some position
    pub fn relevant_variables(&self) -> BTreeSet<Variable> {
        self.relevant.iter().flatten().cloned().collect()
    }
}

fn update_relevant(relevant: &mut BTreeSet<Variable>, edge: &CfaEdge, failing: bool) {
    match edge.kind() {
        EdgeKind::Blank { .. } | EdgeKind::Multi(_) => {}
        EdgeKind::Declaration {
            variable,
            initializer,
        } => {
            if relevant.remove(variable) {
                if let Some(init) = initializer {
                    relevant.extend(init.variables());
                }
            }
        }
        EdgeKind::Assignment {
            variable,
            expression,
        } => {
            if relevant.remove(variable) {
                relevant.extend(expression.variables());
            }
        }
        EdgeKind::Assume { condition, .. } => {
            let vars = condition.variables();
            if failing || !vars.is_disjoint(relevant) {
                relevant.extend(vars);
            }
        }
        EdgeKind::FunctionCall { arguments, .. } => {
            for (param, argument) in arguments {
                if relevant.remove(param) {
                    relevant.extend(argument.variables());
                }
            }
        }
        EdgeKind::FunctionReturn {
            assign_to,
            return_variable,
            ..
        } => {
            if let Some(target) = assign_to {
                if relevant.remove(target) {
                    relevant.extend(return_variable.iter().cloned());
                }
            }
        }
    }
}

/// Interpolation by the [`UseDefRelation`]
#[derive(Debug, Clone, Copy, Default)]
pub struct UseDefBasedInterpolator;

impl UseDefBasedInterpolator {
    /// One interpolant per edge of the infeasible prefix `edges`, for the
    /// position before the edge
    ///
    /// The first interpolant is always `true`.
    pub fn interpolate(&self, edges: &[CfaEdge]) -> Vec<UseDefInterpolant> {
        let relation = UseDefRelation::new(edges);
        (0..edges.len())
            .map(|k| match relation.relevant_before(k) {
                Some(vars) if k > 0 => UseDefInterpolant::new(vars.clone()),
                _ => UseDefInterpolant::true_interpolant(),
            })
            .collect()
    }
}
