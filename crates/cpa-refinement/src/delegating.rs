//! Refinement by several domains in turn

use cpa_core::{
    arg::ArgStateId, error::CpaError, path::ArgPath, reached_set::ArgReachedSet,
    shutdown::ShutdownNotifier,
};
use cpa_domains::composite::{CompositePrecision, CompositeState};
use cpa_smt_encoder::{
    SMTSolution, SMTSolverBuilder, SMTSolverContext, path_formula::PathFormulaManager,
};
use log::{debug, info, warn};

use crate::{RefinementOutcome, Refiner, solver_error};

/// Refiner of a composite analysis delegating to one refiner per domain
///
/// The refiners are tried in order until one of them refines. A path every
/// domain considers feasible is checked with the SMT solver if one is
/// configured, otherwise it is reported as an imprecise counterexample.
pub struct DelegatingRefiner {
    refiners: Vec<Box<dyn Refiner<CompositeState, CompositePrecision>>>,
    solver_builder: Option<SMTSolverBuilder>,
    shutdown: ShutdownNotifier,
}

impl DelegatingRefiner {
    /// Refiner trying `refiners` in the given order
    pub fn new(
        refiners: Vec<Box<dyn Refiner<CompositeState, CompositePrecision>>>,
        shutdown: ShutdownNotifier,
    ) -> Self {
        Self {
            refiners,
            solver_builder: None,
            shutdown,
        }
    }

    /// Confirm counterexamples with sessions of `solver_builder`
    pub fn with_solver(mut self, solver_builder: SMTSolverBuilder) -> Self {
        self.solver_builder = Some(solver_builder);
        self
    }

    /// Number of delegates
    pub fn len(&self) -> usize {
        self.refiners.len()
    }

    /// Check whether there is no delegate
    pub fn is_empty(&self) -> bool {
        self.refiners.is_empty()
    }

    /// Check `path` precisely, `None` without a solver
    fn check_precisely(&self, path: &ArgPath) -> Result<Option<bool>, CpaError> {
        let Some(builder) = &self.solver_builder else {
            return Ok(None);
        };
        self.shutdown.shutdown_if_necessary()?;

        let mut solver = builder.new_solver().map_err(solver_error)?;
        let formula = PathFormulaManager::new()
            .make_path_formula(&mut solver, path.edges())
            .map_err(solver_error)?;
        let feasible = solver
            .assert_and_check_expr(formula.formula())
            .map_err(solver_error)?
            == SMTSolution::SAT;
        debug!(
            "Solver considers the path to {} {}",
            path.last_state(),
            if feasible { "feasible" } else { "infeasible" }
        );
        Ok(Some(feasible))
    }
}

impl Refiner<CompositeState, CompositePrecision> for DelegatingRefiner {
    fn perform_refinement(
        &mut self,
        reached: &mut ArgReachedSet<CompositeState, CompositePrecision>,
        target: ArgStateId,
    ) -> Result<RefinementOutcome, CpaError> {
        let mut feasible_path = None;
        let mut failure = None;

        for (k, refiner) in self.refiners.iter_mut().enumerate() {
            match refiner.perform_refinement(reached, target) {
                Ok(RefinementOutcome::Refined) => {
                    debug!("Refiner {k} refined the precision");
                    return Ok(RefinementOutcome::Refined);
                }
                Ok(RefinementOutcome::Feasible { path, .. }) => {
                    debug!("Refiner {k} considers the path feasible");
                    feasible_path.get_or_insert(path);
                }
                Err(CpaError::RefinementFailed(msg)) => {
                    debug!("Refiner {k} made no progress: {msg}");
                    failure = Some(CpaError::RefinementFailed(msg));
                }
                Err(err) => return Err(err),
            }
        }

        // a domain found the path infeasible but could not exclude it
        if let Some(err) = failure {
            return Err(err);
        }
        let Some(path) = feasible_path else {
            return Err(CpaError::RefinementFailed(
                "no refiner is configured".to_string(),
            ));
        };

        match self.check_precisely(&path)? {
            Some(true) => {
                info!("Counterexample to {target} confirmed by the solver");
                Ok(RefinementOutcome::Feasible {
                    path,
                    is_precise: true,
                })
            }
            Some(false) => Err(CpaError::RefinementFailed(format!(
                "path to {target} is infeasible but no domain can express why"
            ))),
            None => {
                warn!("Reporting counterexample to {target} without a precise check");
                Ok(RefinementOutcome::Feasible {
                    path,
                    is_precise: false,
                })
            }
        }
    }
}
