//! The CEGAR loop
//!
//! Reachability runs until it finds a target state. The path to the target
//! is handed to the refiner, which either prunes the ARG under a finer
//! precision, after which reachability continues from the waitlist, or
//! reports the path as a counterexample.

use std::{sync::Arc, time::Duration};

use cpa_cfa::Cfa;
use cpa_core::{
    algorithm::{CpaAlgorithm, LocationInvariants},
    error::CpaError,
    precision::VariableTrackingPrecision,
    reached_set::ArgReachedSet,
    result::{AnalysisResult, Counterexample, UnknownReason},
    shutdown::{ProgramSafeSignal, ShutdownNotifier},
};
use cpa_display_utils::join_iterator;
use cpa_domains::{
    composite::{CompositeCpa, CompositePrecision, CompositeState},
    interval::IntervalAnalysisState,
    value::ValueAnalysisState,
};
use cpa_smt_encoder::SMTSolverBuilder;
use log::{debug, info};

use crate::{
    RefinementOutcome, Refiner,
    config::{CegarConfig, DomainKind, PrefixProviderKind},
    delegating::DelegatingRefiner,
    forgetful::ForgetfulState,
    predicate_prefix::PredicatePrefixProvider,
    prefix::GenericPrefixProvider,
    refiner::InterpolationRefiner,
    solver_error,
    strongest_post::GenericStrongestPost,
};

type CompositeRefiner = Box<dyn Refiner<CompositeState, CompositePrecision>>;

/// Counterexample-guided abstraction refinement over a [`CompositeCpa`]
pub struct CegarAlgorithm {
    cfa: Arc<Cfa>,
    cpa: CompositeCpa,
    refiner: CompositeRefiner,
    config: CegarConfig,
    shutdown: ShutdownNotifier,
    safe_signal: ProgramSafeSignal,
    invariants: Option<Arc<dyn LocationInvariants>>,
    refinements: usize,
}

impl CegarAlgorithm {
    /// Analysis of `cfa` configured by `config`
    ///
    /// Fails if a configured SMT solver cannot be started.
    pub fn new(
        cfa: Arc<Cfa>,
        config: CegarConfig,
        shutdown: ShutdownNotifier,
    ) -> Result<Self, CpaError> {
        let shutdown = match config.timeout_secs() {
            Some(secs) => shutdown.child_with_timeout(Duration::from_secs(secs)),
            None => shutdown,
        };

        let needs_solver = config.smt_solver().is_some()
            || config.prefix_provider() == PrefixProviderKind::Predicate;
        let solver_builder = if needs_solver {
            let cfg = config.smt_solver().cloned().unwrap_or_default().builder_cfg();
            Some(SMTSolverBuilder::new(&cfg).map_err(solver_error)?)
        } else {
            None
        };

        let mut refiners: Vec<CompositeRefiner> = Vec::new();
        for domain in config.domains() {
            let refiner = match domain {
                DomainKind::Value => build_refiner::<ValueAnalysisState>(
                    &cfa,
                    &config,
                    solver_builder.as_ref(),
                    &shutdown,
                ),
                DomainKind::Interval => build_refiner::<IntervalAnalysisState>(
                    &cfa,
                    &config,
                    solver_builder.as_ref(),
                    &shutdown,
                ),
            };
            refiners.push(refiner);
        }

        let mut refiner = DelegatingRefiner::new(refiners, shutdown.clone());
        if config.smt_solver().is_some() {
            if let Some(builder) = solver_builder {
                refiner = refiner.with_solver(builder);
            }
        }

        let cpa = CompositeCpa::with_kinds(
            cfa.clone(),
            config.domains().iter().map(DomainKind::component_kind),
            VariableTrackingPrecision::empty(config.precision_scope()),
        );

        Ok(Self {
            cfa,
            cpa,
            refiner: Box::new(refiner),
            config,
            shutdown,
            safe_signal: ProgramSafeSignal::new(),
            invariants: None,
            refinements: 0,
        })
    }

    /// Replace the refiner
    pub fn with_refiner(mut self, refiner: CompositeRefiner) -> Self {
        self.refiner = refiner;
        self
    }

    /// Report `Safe` as soon as `signal` is set
    pub fn with_safe_signal(mut self, signal: ProgramSafeSignal) -> Self {
        self.safe_signal = signal;
        self
    }

    /// Use `invariants` to drop unreachable targets
    pub fn with_invariants(mut self, invariants: Arc<dyn LocationInvariants>) -> Self {
        self.invariants = Some(invariants);
        self
    }

    /// The analysis
    pub fn cpa(&self) -> &CompositeCpa {
        &self.cpa
    }

    /// Notifier polled by the analysis, including the configured timeout
    pub fn shutdown(&self) -> &ShutdownNotifier {
        &self.shutdown
    }

    /// Number of refinement rounds so far
    pub fn refinements(&self) -> usize {
        self.refinements
    }

    /// Reached set holding the initial state
    pub fn initial_reached_set(&self) -> ArgReachedSet<CompositeState, CompositePrecision> {
        self.algorithm()
            .initial_reached_set(self.config.waitlist_order())
    }

    fn algorithm(&self) -> CpaAlgorithm<'_, CompositeCpa> {
        let algorithm = CpaAlgorithm::new(&self.cpa, &self.cfa, self.shutdown.clone())
            .with_stop_at_target(true)
            .with_max_reached_states(self.config.max_reached_states());
        match &self.invariants {
            Some(invariants) => algorithm.with_invariants(invariants.clone()),
            None => algorithm,
        }
    }

    /// Analyze the program from its entry
    pub fn run(&mut self) -> AnalysisResult {
        info!(
            "Starting CEGAR analysis with domains {}",
            join_iterator(self.config.domains().iter(), ", ")
        );
        let mut reached = self.initial_reached_set();
        let result = match self.run_with(&mut reached) {
            Ok(result) => result,
            Err(err) => AnalysisResult::from_error(err),
        };
        info!(
            "Analysis finished after {} refinements: {result}",
            self.refinements
        );
        result
    }

    /// Continue the analysis on `reached`
    ///
    /// An interruption after the safe signal was set counts as a proof of
    /// safety.
    pub fn run_with(
        &mut self,
        reached: &mut ArgReachedSet<CompositeState, CompositePrecision>,
    ) -> Result<AnalysisResult, CpaError> {
        match self.refinement_loop(reached) {
            Err(err) if err.is_interrupt() && self.safe_signal.is_safe() => {
                info!("Analysis interrupted after the program was proven safe");
                Ok(AnalysisResult::Safe)
            }
            result => result,
        }
    }

    fn refinement_loop(
        &mut self,
        reached: &mut ArgReachedSet<CompositeState, CompositePrecision>,
    ) -> Result<AnalysisResult, CpaError> {
        loop {
            if self.safe_signal.is_safe() {
                info!("Program was proven safe by another analysis");
                return Ok(AnalysisResult::Safe);
            }

            let status = self.algorithm().run(reached)?;

            let Some(target) = status.target() else {
                if status.is_sound() {
                    return Ok(AnalysisResult::Safe);
                }
                return Ok(AnalysisResult::Unknown(UnknownReason::Incomplete(format!(
                    "exploration stopped at {} reached states",
                    reached.reached().len()
                ))));
            };

            if let Some(max) = self.config.max_refinements() {
                if self.refinements >= max {
                    return Err(CpaError::RefinementFailed(format!(
                        "limit of {max} refinements reached"
                    )));
                }
            }
            self.refinements += 1;
            debug!("Refinement round {} for target {target}", self.refinements);

            match self.refiner.perform_refinement(reached, target)? {
                RefinementOutcome::Refined => {}
                RefinementOutcome::Feasible { path, is_precise } => {
                    let properties = reached
                        .state(target)
                        .map(|s| s.violated_properties().clone())
                        .unwrap_or_default();
                    return Ok(AnalysisResult::Unsafe(Box::new(Counterexample::new(
                        path, properties, is_precise,
                    ))));
                }
            }
        }
    }
}

fn build_refiner<S: ForgetfulState + 'static>(
    cfa: &Arc<Cfa>,
    config: &CegarConfig,
    solver_builder: Option<&SMTSolverBuilder>,
    shutdown: &ShutdownNotifier,
) -> CompositeRefiner {
    let post = GenericStrongestPost::<S>::new(cfa.clone());
    match (config.prefix_provider(), solver_builder) {
        (PrefixProviderKind::Predicate, Some(builder)) => {
            let provider = PredicatePrefixProvider::new(builder.clone(), shutdown.clone())
                .with_max_prefix_count(config.max_prefix_count())
                .with_max_prefix_length(config.max_prefix_length());
            Box::new(
                InterpolationRefiner::new(cfa.clone(), post, provider, shutdown.clone())
                    .with_strategy(config.interpolation_strategy())
                    .with_check_for_repeated_refinements(config.check_for_repeated_refinements()),
            )
        }
        _ => {
            let provider = GenericPrefixProvider::new(post.clone(), shutdown.clone())
                .with_max_prefix_count(config.max_prefix_count())
                .with_max_prefix_length(config.max_prefix_length());
            Box::new(
                InterpolationRefiner::new(cfa.clone(), post, provider, shutdown.clone())
                    .with_strategy(config.interpolation_strategy())
                    .with_check_for_repeated_refinements(config.check_for_repeated_refinements()),
            )
        }
    }
}
