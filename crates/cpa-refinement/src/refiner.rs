//! Refinement of the precision of one domain by interpolation
//!
//! A round replays the path to the target under full precision. If the path
//! is spurious, the infeasible prefixes of the path are interpolated, the
//! variables of the interpolants are added to the precision at the location
//! of their position, and the ARG is pruned below the refinement root so
//! that the pruned part is explored again under the new precision.

use std::{
    collections::BTreeSet,
    fmt,
    sync::Arc,
};

use cpa_cfa::{Cfa, expressions::Variable};
use cpa_core::{
    arg::ArgStateId,
    error::CpaError,
    path::{ArgPath, get_one_path_to},
    precision::{PrecisionIncrement, VariableTrackingPrecision},
    reached_set::ArgReachedSet,
    shutdown::ShutdownNotifier,
};
use cpa_domains::composite::{CompositePrecision, CompositeState};
use log::{debug, info, trace};

#[cfg(feature = "config_deserialize")]
use serde::Deserialize;

use crate::{
    RefinementOutcome, Refiner,
    feasibility::GenericFeasibilityChecker,
    forgetful::ForgetfulState,
    interpolant::Interpolant,
    interpolator::PathInterpolator,
    prefix::PrefixProvider,
    strongest_post::StrongestPostOperator,
};

/// Source of the interpolants of a refinement round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "config_deserialize", derive(Deserialize))]
#[cfg_attr(feature = "config_deserialize", serde(rename_all = "snake_case"))]
pub enum InterpolationStrategy {
    /// Interpolate every prefix with the interpolator of the domain
    #[default]
    Edge,
    /// Use the interpolants the prefix provider attached to the prefixes
    Prefix,
}

impl fmt::Display for InterpolationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpolationStrategy::Edge => write!(f, "edge"),
            InterpolationStrategy::Prefix => write!(f, "prefix"),
        }
    }
}

/// Refiner of the precision of the component `S` of a composite analysis
pub struct InterpolationRefiner<S, O, P> {
    cfa: Arc<Cfa>,
    checker: GenericFeasibilityChecker<S, O>,
    interpolator: PathInterpolator<S, O>,
    prefix_provider: P,
    strategy: InterpolationStrategy,
    check_for_repeated_refinements: bool,
    previous_root: Option<ArgStateId>,
}

impl<S, O, P> InterpolationRefiner<S, O, P>
where
    S: ForgetfulState,
    O: StrongestPostOperator<S> + Clone,
    P: PrefixProvider,
{
    /// Refiner replaying paths with `post` and extracting prefixes with
    /// `prefix_provider`
    pub fn new(
        cfa: Arc<Cfa>,
        post: O,
        prefix_provider: P,
        shutdown: ShutdownNotifier,
    ) -> Self {
        Self {
            cfa,
            checker: GenericFeasibilityChecker::new(post.clone(), shutdown.clone()),
            interpolator: PathInterpolator::new(post, shutdown),
            prefix_provider,
            strategy: InterpolationStrategy::default(),
            check_for_repeated_refinements: true,
            previous_root: None,
        }
    }

    /// Set the source of interpolants
    pub fn with_strategy(mut self, strategy: InterpolationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Enable or disable widening of repeated refinement roots
    pub fn with_check_for_repeated_refinements(mut self, check: bool) -> Self {
        self.check_for_repeated_refinements = check;
        self
    }

    /// Root chosen by the last successful round
    pub fn previous_root(&self) -> Option<ArgStateId> {
        self.previous_root
    }

    /// Variables of the joined interpolants at each position of `path`
    fn interpolate_prefixes(
        &mut self,
        path: &ArgPath,
    ) -> Result<Vec<BTreeSet<Variable>>, CpaError> {
        let extraction = self.prefix_provider.extract_infeasible_prefixes(path)?;
        if extraction.prefixes().is_empty() {
            return Err(CpaError::RefinementFailed(format!(
                "no infeasible prefix found on spurious path to {}",
                path.last_state()
            )));
        }
        debug!(
            "Interpolating {} infeasible prefixes with strategy {}",
            extraction.prefixes().len(),
            self.strategy
        );

        match self.strategy {
            InterpolationStrategy::Prefix => {
                let sequences = extraction
                    .prefixes()
                    .iter()
                    .map(|prefix| prefix.interpolants().to_vec());
                Ok(variables_per_position(path.len(), sequences))
            }
            InterpolationStrategy::Edge => {
                let mut sequences = Vec::new();
                for prefix in extraction.prefixes() {
                    if self.checker.is_feasible(prefix.path())? {
                        trace!("Prefix is feasible in the {} domain:\n{prefix}", S::KIND);
                        continue;
                    }
                    sequences.push(self.interpolator.interpolate(prefix.path())?);
                }
                Ok(variables_per_position(path.len(), sequences))
            }
        }
    }

    /// Join of the precisions of `S` in the subtree below `root`
    fn joined_precision(
        &self,
        reached: &ArgReachedSet<CompositeState, CompositePrecision>,
        root: ArgStateId,
        start: VariableTrackingPrecision,
    ) -> VariableTrackingPrecision {
        let mut joined = start;
        let mut seen: Vec<&VariableTrackingPrecision> = Vec::new();
        for id in reached.arg().subtree(root) {
            let Some(precision) = reached.precision(id).and_then(|p| p.variables_of(S::KIND))
            else {
                continue;
            };
            if seen.contains(&precision) || joined.is_at_least_as_precise_as(precision) {
                continue;
            }
            seen.push(precision);

            let increment: PrecisionIncrement = self
                .cfa
                .nodes()
                .filter_map(|node| precision.tracked_at(node).map(|vars| (node.id(), vars)))
                .collect();
            joined = joined.with_increment(&increment, &self.cfa);
        }
        joined
    }
}

/// Per position, the variables of the join of the interpolants of all
/// sequences at that position
fn variables_per_position<I: Interpolant>(
    len: usize,
    sequences: impl IntoIterator<Item = Vec<I>>,
) -> Vec<BTreeSet<Variable>> {
    let mut joined: Vec<Option<I>> = vec![None; len];
    for sequence in sequences {
        for (k, interpolant) in sequence.into_iter().enumerate().take(len) {
            joined[k] = Some(match joined[k].take() {
                Some(other) => other.join(&interpolant),
                None => interpolant,
            });
        }
    }
    joined
        .into_iter()
        .map(|i| i.map(|i| i.variables()).unwrap_or_default())
        .collect()
}

/// Choose the state the ARG is pruned below
///
/// `first_new` is the first position whose interpolant mentions a variable
/// not yet tracked there, `first_fact` the first position with a
/// non-trivial interpolant. The root is the state before that position. If
/// `previous` is the same root, the root is widened to the first state of
/// the path; without new facts the round fails if no widening is possible.
pub fn select_refinement_root(
    path: &ArgPath,
    first_new: Option<usize>,
    first_fact: Option<usize>,
    previous: Option<ArgStateId>,
) -> Result<ArgStateId, CpaError> {
    let state_before = |k: usize| path.states()[k.saturating_sub(1)];
    let has_new = first_new.is_some();
    let root = match first_new.or(first_fact) {
        Some(k) => state_before(k),
        None => path.first_state(),
    };

    if previous != Some(root) {
        if !has_new {
            return Err(CpaError::RefinementFailed(format!(
                "refinement of the path to {} made no progress",
                path.last_state()
            )));
        }
        return Ok(root);
    }

    if root != path.first_state() {
        info!(
            "Repeated refinement root {root}, widening to {}",
            path.first_state()
        );
        return Ok(path.first_state());
    }
    if has_new {
        return Ok(root);
    }
    Err(CpaError::RefinementFailed(format!(
        "repeated refinement at the first state {root} without progress"
    )))
}

impl<S, O, P> Refiner<CompositeState, CompositePrecision> for InterpolationRefiner<S, O, P>
where
    S: ForgetfulState,
    O: StrongestPostOperator<S> + Clone,
    P: PrefixProvider,
{
    fn perform_refinement(
        &mut self,
        reached: &mut ArgReachedSet<CompositeState, CompositePrecision>,
        target: ArgStateId,
    ) -> Result<RefinementOutcome, CpaError> {
        let path = get_one_path_to(reached.arg(), target);
        debug!(
            "Refining the {} precision along a path of {} edges",
            S::KIND,
            path.len()
        );

        if self.checker.is_feasible(&path)? {
            return Ok(RefinementOutcome::Feasible {
                path,
                is_precise: false,
            });
        }

        let variables = self.interpolate_prefixes(&path)?;

        let mut increment = PrecisionIncrement::new();
        let mut first_new = None;
        let mut first_fact = None;
        for (k, vars) in variables.into_iter().enumerate() {
            if vars.is_empty() {
                continue;
            }
            first_fact.get_or_insert(k);
            let state = path.states()[k];
            let location = path.locations()[k];
            if first_new.is_none() {
                let tracked = reached.precision(state).and_then(|p| p.variables_of(S::KIND));
                let is_new = match (tracked, self.cfa.node(location)) {
                    (Some(precision), Some(node)) => {
                        vars.iter().any(|v| !precision.is_tracking(node, v))
                    }
                    _ => true,
                };
                if is_new {
                    first_new = Some(k);
                }
            }
            increment.entry(location).or_default().extend(vars);
        }

        if increment.is_empty() {
            return Err(CpaError::RefinementFailed(format!(
                "the {} domain found only trivial interpolants for the path to {target}",
                S::KIND
            )));
        }

        let previous = self
            .previous_root
            .filter(|_| self.check_for_repeated_refinements);
        let root = select_refinement_root(&path, first_new, first_fact, previous)?;

        let Some(target_precision) = reached
            .precision(target)
            .and_then(|p| p.variables_of(S::KIND))
            .cloned()
        else {
            return Err(CpaError::RefinementFailed(format!(
                "the analysis has no {} component",
                S::KIND
            )));
        };
        let precision = self
            .joined_precision(reached, root, target_precision)
            .with_increment(&increment, &self.cfa);

        info!(
            "Refined the {} precision at {} locations, refinement root {root}",
            S::KIND,
            increment.len()
        );
        debug!("Precision increment: {increment:?}");
        trace!("New precision: {precision}");

        reached.remove_subtree(root, &S::component_precision(precision), |c| {
            c.kind() == S::KIND
        });
        self.previous_root = Some(root);
        Ok(RefinementOutcome::Refined)
    }
}
