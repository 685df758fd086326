//! Scheduling of the invariant generation
//!
//! The generator runs its own reachability fixpoint with the interval
//! analysis under full precision. In asynchronous mode the fixpoint is
//! computed on a blocking task of a dedicated `tokio` runtime while the main
//! analysis proceeds; otherwise it is computed on the first call to
//! [`InvariantGenerator::get`].

use std::{mem, panic, sync::Arc};

use cpa_cfa::Cfa;
use cpa_core::{
    algorithm::CpaAlgorithm,
    error::CpaError,
    precision::VariableTrackingPrecision,
    reached_set::WaitlistOrder,
    shutdown::{ProgramSafeSignal, ShutdownNotifier},
};
use cpa_domains::composite::{ComponentKind, CompositeCpa};
use log::{debug, info, warn};
use tokio::{
    runtime::{Builder, Runtime},
    task::JoinHandle,
};

use crate::{
    InvariantGenerationError,
    supplier::{InvariantSupplier, PublishedInvariants},
};

/// Reason given to the main analysis when it is stopped early
pub const SAFE_SHUTDOWN_REASON: &str = "program proven safe by invariant generation";

enum GeneratorState {
    Created,
    Running {
        runtime: Runtime,
        handle: JoinHandle<Result<Arc<InvariantSupplier>, CpaError>>,
    },
    Finished(Arc<InvariantSupplier>),
    Failed,
}

/// Everything the fixpoint computation needs, movable to another thread
#[derive(Clone)]
struct GenerationTask {
    cfa: Arc<Cfa>,
    shutdown: ShutdownNotifier,
    main_shutdown: Option<ShutdownNotifier>,
    safe_signal: ProgramSafeSignal,
    max_reached_states: Option<usize>,
    published: PublishedInvariants,
}

impl GenerationTask {
    fn generate(self) -> Result<Arc<InvariantSupplier>, CpaError> {
        let cpa = CompositeCpa::with_kinds(
            self.cfa.clone(),
            [ComponentKind::Interval],
            VariableTrackingPrecision::full(),
        );
        let algorithm = CpaAlgorithm::new(&cpa, &self.cfa, self.shutdown.clone())
            .with_max_reached_states(self.max_reached_states);
        let mut reached = algorithm.initial_reached_set(WaitlistOrder::BreadthFirst);

        let status = algorithm.run(&mut reached)?;
        if !status.is_sound() {
            warn!("Invariant generation did not reach a fixpoint, no invariants are available");
            let supplier = Arc::new(InvariantSupplier::trivial());
            self.published.publish(supplier.clone());
            return Ok(supplier);
        }

        let supplier = Arc::new(InvariantSupplier::from_reached(&self.cfa, &reached));
        debug!("Generated invariants:\n{supplier}");
        self.published.publish(supplier.clone());

        if reached.arg().target_states().next().is_none() {
            info!("Invariant generation proved the program safe");
            self.safe_signal.set_safe();
            if let Some(main) = &self.main_shutdown {
                main.request_shutdown(SAFE_SHUTDOWN_REASON);
            }
        } else {
            info!(
                "Invariant generation finished after {} reached states",
                reached.reached().len()
            );
        }
        Ok(supplier)
    }
}

/// Generator of interval invariants for the locations of a CFA
///
/// The generator observes shutdown requests of the analysis it was created
/// for, while [`InvariantGenerator::cancel`] only stops the generator.
pub struct InvariantGenerator {
    task: GenerationTask,
    asynchronous: bool,
    shutdown_on_safe: bool,
    main_shutdown: ShutdownNotifier,
    state: GeneratorState,
}

impl InvariantGenerator {
    /// Generator for `cfa` that runs alongside the analysis stopped by
    /// `main_shutdown`
    pub fn new(cfa: Arc<Cfa>, main_shutdown: &ShutdownNotifier) -> Self {
        Self {
            task: GenerationTask {
                cfa,
                shutdown: main_shutdown.child(),
                main_shutdown: None,
                safe_signal: ProgramSafeSignal::new(),
                max_reached_states: None,
                published: PublishedInvariants::new(),
            },
            asynchronous: true,
            shutdown_on_safe: true,
            main_shutdown: main_shutdown.clone(),
            state: GeneratorState::Created,
        }
    }

    /// Compute the invariants on a separate task (default) or lazily
    pub fn with_asynchronous(mut self, asynchronous: bool) -> Self {
        self.asynchronous = asynchronous;
        self
    }

    /// Stop the main analysis once the program is proven safe (default)
    pub fn with_shutdown_on_safe(mut self, shutdown_on_safe: bool) -> Self {
        self.shutdown_on_safe = shutdown_on_safe;
        self
    }

    /// Signal to set once the program is proven safe
    pub fn with_safe_signal(mut self, signal: ProgramSafeSignal) -> Self {
        self.task.safe_signal = signal;
        self
    }

    /// Give up on invariants once the reached set exceeds `max` states
    pub fn with_max_reached_states(mut self, max: Option<usize>) -> Self {
        self.task.max_reached_states = max;
        self
    }

    /// Signal set once the program is proven safe
    pub fn safe_signal(&self) -> &ProgramSafeSignal {
        &self.task.safe_signal
    }

    /// Invariants for the main analysis, available as soon as the generator
    /// has finished
    pub fn published(&self) -> PublishedInvariants {
        self.task.published.clone()
    }

    /// Check whether the generator is currently running
    pub fn is_running(&self) -> bool {
        matches!(self.state, GeneratorState::Running { .. })
    }

    fn prepared_task(&self) -> GenerationTask {
        let mut task = self.task.clone();
        if self.shutdown_on_safe {
            task.main_shutdown = Some(self.main_shutdown.clone());
        }
        task
    }

    /// Start the generation
    ///
    /// In synchronous mode, or if the generator was started before, this
    /// does nothing.
    pub fn start(&mut self) -> Result<(), InvariantGenerationError> {
        if !self.asynchronous || !matches!(self.state, GeneratorState::Created) {
            return Ok(());
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("cpa-invariant-generator")
            .build()
            .map_err(InvariantGenerationError::Runtime)?;
        let task = self.prepared_task();
        let handle = runtime.spawn_blocking(move || task.generate());

        info!("Started invariant generation");
        self.state = GeneratorState::Running { runtime, handle };
        Ok(())
    }

    /// Wait for the invariants, computing them now if the generator was not
    /// started
    pub fn get(&mut self) -> Result<Arc<InvariantSupplier>, InvariantGenerationError> {
        let result = match mem::replace(&mut self.state, GeneratorState::Failed) {
            GeneratorState::Finished(supplier) => Ok(supplier),
            GeneratorState::Failed => Err(InvariantGenerationError::Unavailable),
            GeneratorState::Created => self
                .prepared_task()
                .generate()
                .map_err(InvariantGenerationError::Analysis),
            GeneratorState::Running { runtime, handle } => match runtime.block_on(handle) {
                Ok(result) => result.map_err(InvariantGenerationError::Analysis),
                Err(err) if err.is_panic() => panic::resume_unwind(err.into_panic()),
                Err(err) => Err(InvariantGenerationError::TaskFailed(err.to_string())),
            },
        };

        match result {
            Ok(supplier) => {
                self.state = GeneratorState::Finished(supplier.clone());
                Ok(supplier)
            }
            Err(err) => {
                debug!("Invariant generation failed: {err}");
                Err(err)
            }
        }
    }

    /// Request the generator to stop
    ///
    /// Does not affect the main analysis.
    pub fn cancel(&self) {
        if !self.task.shutdown.should_shutdown() {
            self.task
                .shutdown
                .request_shutdown("invariant generation cancelled");
        }
    }
}

impl Drop for InvariantGenerator {
    fn drop(&mut self) {
        // dropping the runtime waits for the blocking task
        if self.is_running() {
            self.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cpa_cfa::{
        CfaFunction, CfaNode, CfaNodeId, EdgeKind,
        builder::CfaBuilder,
        expressions::{BooleanExpression, ComparisonOp, Variable},
    };
    use cpa_core::algorithm::LocationInvariants;

    use super::*;

    fn x() -> Variable {
        Variable::new("x")
    }

    fn assume(op: ComparisonOp, truth: bool) -> EdgeKind {
        EdgeKind::Assume {
            condition: BooleanExpression::compare(x(), op, 0),
            truth,
        }
    }

    /// `if (x > 0) { if (x < 0) error(); }`
    fn safe_program() -> Arc<Cfa> {
        let cfa = CfaBuilder::new("main")
            .with_function(CfaFunction::new("main", CfaNodeId(0), CfaNodeId(3)))
            .unwrap()
            .with_nodes((0..4).map(|i| CfaNode::new(CfaNodeId(i), "main")))
            .unwrap()
            .with_global_variable(x())
            .unwrap()
            .initialize()
            .with_edges([
                (CfaNodeId(0), CfaNodeId(1), assume(ComparisonOp::Gt, true)),
                (CfaNodeId(1), CfaNodeId(2), assume(ComparisonOp::Lt, true)),
                (CfaNodeId(0), CfaNodeId(3), assume(ComparisonOp::Gt, false)),
                (CfaNodeId(1), CfaNodeId(3), assume(ComparisonOp::Lt, false)),
            ])
            .unwrap()
            .with_target_location(CfaNodeId(2), "unreach-call")
            .unwrap()
            .build()
            .unwrap();
        Arc::new(cfa)
    }

    /// `if (x > 0) error();`
    fn unsafe_program() -> Arc<Cfa> {
        let cfa = CfaBuilder::new("main")
            .with_function(CfaFunction::new("main", CfaNodeId(0), CfaNodeId(2)))
            .unwrap()
            .with_nodes((0..3).map(|i| CfaNode::new(CfaNodeId(i), "main")))
            .unwrap()
            .with_global_variable(x())
            .unwrap()
            .initialize()
            .with_edges([
                (CfaNodeId(0), CfaNodeId(1), assume(ComparisonOp::Gt, true)),
                (CfaNodeId(0), CfaNodeId(2), assume(ComparisonOp::Gt, false)),
            ])
            .unwrap()
            .with_target_location(CfaNodeId(1), "unreach-call")
            .unwrap()
            .build()
            .unwrap();
        Arc::new(cfa)
    }

    #[test]
    fn test_synchronous_generation_is_lazy() {
        let main = ShutdownNotifier::new();
        let mut generator =
            InvariantGenerator::new(safe_program(), &main).with_asynchronous(false);

        generator.start().unwrap();
        assert!(!generator.is_running());
        assert!(!generator.safe_signal().is_safe());

        let supplier = generator.get().unwrap();
        assert!(supplier.proves_unreachable(CfaNodeId(2)));
        assert!(generator.safe_signal().is_safe());
        assert!(generator.published().proves_unreachable(CfaNodeId(2)));

        // the second call returns the same invariants
        assert!(Arc::ptr_eq(&supplier, &generator.get().unwrap()));
    }

    #[test]
    fn test_safe_program_stops_main_analysis() {
        let main = ShutdownNotifier::new();
        let mut generator = InvariantGenerator::new(safe_program(), &main);

        generator.start().unwrap();
        assert!(generator.is_running());
        generator.get().unwrap();

        assert!(generator.safe_signal().is_safe());
        assert!(main.should_shutdown());
        assert_eq!(
            main.reason().map(|r| r.to_string()),
            Some(SAFE_SHUTDOWN_REASON.to_string())
        );
    }

    #[test]
    fn test_safe_program_without_shutdown_on_safe() {
        let main = ShutdownNotifier::new();
        let signal = ProgramSafeSignal::new();
        let mut generator = InvariantGenerator::new(safe_program(), &main)
            .with_shutdown_on_safe(false)
            .with_safe_signal(signal.clone());

        generator.start().unwrap();
        generator.get().unwrap();

        assert!(signal.is_safe());
        assert!(!main.should_shutdown());
    }

    #[test]
    fn test_unsafe_program_is_not_proven_safe() {
        let main = ShutdownNotifier::new();
        let mut generator = InvariantGenerator::new(unsafe_program(), &main);

        generator.start().unwrap();
        let supplier = generator.get().unwrap();

        assert!(!supplier.is_trivial());
        assert!(!supplier.proves_unreachable(CfaNodeId(1)));
        assert!(!generator.safe_signal().is_safe());
        assert!(!main.should_shutdown());
    }

    #[test]
    fn test_incomplete_fixpoint_gives_trivial_invariants() {
        let main = ShutdownNotifier::new();
        let mut generator = InvariantGenerator::new(safe_program(), &main)
            .with_asynchronous(false)
            .with_max_reached_states(Some(1));

        let supplier = generator.get().unwrap();
        assert!(supplier.is_trivial());
        assert!(!generator.safe_signal().is_safe());
    }

    #[test]
    fn test_cancelled_generation_fails() {
        let main = ShutdownNotifier::new();
        let mut generator =
            InvariantGenerator::new(safe_program(), &main).with_asynchronous(false);

        generator.cancel();
        let err = generator.get().unwrap_err();
        assert!(matches!(
            err,
            InvariantGenerationError::Analysis(CpaError::Interrupted(_))
        ));
        assert!(!main.should_shutdown());

        assert!(matches!(
            generator.get().unwrap_err(),
            InvariantGenerationError::Unavailable
        ));
    }

    #[test]
    fn test_main_shutdown_stops_generator() {
        let main = ShutdownNotifier::new();
        let mut generator =
            InvariantGenerator::new(safe_program(), &main).with_asynchronous(false);

        main.request_shutdown("user abort");
        assert!(matches!(
            generator.get().unwrap_err(),
            InvariantGenerationError::Analysis(CpaError::Interrupted(_))
        ));
    }
}
