//! Options of the CEGAR analysis
//!
//! With the `config_deserialize` feature, [`CegarConfig`] can be read from
//! structured configuration. Missing options take their default value.

use std::fmt;

use cpa_core::{precision::PrecisionScope, reached_set::WaitlistOrder};
use cpa_domains::composite::ComponentKind;
use cpa_smt_encoder::SMTSolverBuilderCfg;

#[cfg(feature = "config_deserialize")]
use serde::Deserialize;

pub use crate::refiner::InterpolationStrategy;
use crate::prefix::{DEFAULT_MAX_PREFIX_COUNT, DEFAULT_MAX_PREFIX_LENGTH};

/// Domain refined by the CEGAR loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "config_deserialize", derive(Deserialize))]
#[cfg_attr(feature = "config_deserialize", serde(rename_all = "snake_case"))]
pub enum DomainKind {
    /// Explicit values
    Value,
    /// Intervals
    Interval,
}

impl DomainKind {
    /// Component of the composite analysis running the domain
    pub fn component_kind(&self) -> ComponentKind {
        match self {
            DomainKind::Value => ComponentKind::Value,
            DomainKind::Interval => ComponentKind::Interval,
        }
    }
}

impl fmt::Display for DomainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.component_kind())
    }
}

/// Which prefix provider extracts infeasible prefixes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "config_deserialize", derive(Deserialize))]
#[cfg_attr(feature = "config_deserialize", serde(rename_all = "snake_case"))]
pub enum PrefixProviderKind {
    /// Replay in the refined domain
    #[default]
    Generic,
    /// Incremental SMT solving
    Predicate,
}

impl fmt::Display for PrefixProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrefixProviderKind::Generic => write!(f, "generic"),
            PrefixProviderKind::Predicate => write!(f, "predicate"),
        }
    }
}

/// SMT solver used for precise feasibility checks and the predicate prefix
/// provider
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "config_deserialize", derive(Deserialize))]
#[cfg_attr(feature = "config_deserialize", serde(rename_all = "snake_case"))]
pub enum SolverChoice {
    /// Z3 with its default options
    #[default]
    Z3,
    /// cvc5 with its default options
    Cvc5,
    /// A custom solver command
    Custom(SMTSolverBuilderCfg),
}

impl SolverChoice {
    /// Configuration of the solver builder
    pub fn builder_cfg(&self) -> SMTSolverBuilderCfg {
        match self {
            SolverChoice::Z3 => SMTSolverBuilderCfg::new_z3(),
            SolverChoice::Cvc5 => SMTSolverBuilderCfg::new_cvc5(),
            SolverChoice::Custom(cfg) => cfg.clone(),
        }
    }
}

/// Options of the invariant generator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "config_deserialize", derive(Deserialize))]
#[cfg_attr(feature = "config_deserialize", serde(default))]
pub struct InvariantGenerationConfig {
    /// Run the invariant generator
    enabled: bool,
    /// Compute invariants concurrently with the main analysis
    asynchronous: bool,
    /// Stop the main analysis once the invariants prove the program safe
    shutdown_on_safe: bool,
}

impl Default for InvariantGenerationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            asynchronous: true,
            shutdown_on_safe: true,
        }
    }
}

impl InvariantGenerationConfig {
    /// Whether invariants are generated
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Whether invariants are computed concurrently
    pub fn asynchronous(&self) -> bool {
        self.asynchronous
    }

    /// Whether a safety proof stops the main analysis
    pub fn shutdown_on_safe(&self) -> bool {
        self.shutdown_on_safe
    }

    /// Enable or disable the generator
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Compute invariants concurrently or lazily on first use
    pub fn with_asynchronous(mut self, asynchronous: bool) -> Self {
        self.asynchronous = asynchronous;
        self
    }

    /// Stop the main analysis once the program is proven safe
    pub fn with_shutdown_on_safe(mut self, shutdown_on_safe: bool) -> Self {
        self.shutdown_on_safe = shutdown_on_safe;
        self
    }
}

/// Options of the [`crate::cegar::CegarAlgorithm`]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config_deserialize", derive(Deserialize))]
#[cfg_attr(feature = "config_deserialize", serde(default))]
pub struct CegarConfig {
    waitlist_order: WaitlistOrder,
    domains: Vec<DomainKind>,
    precision_scope: PrecisionScope,
    prefix_provider: PrefixProviderKind,
    interpolation_strategy: InterpolationStrategy,
    max_prefix_count: usize,
    max_prefix_length: usize,
    check_for_repeated_refinements: bool,
    max_refinements: Option<usize>,
    max_reached_states: Option<usize>,
    timeout_secs: Option<u64>,
    invariant_generation: InvariantGenerationConfig,
    smt_solver: Option<SolverChoice>,
}

impl Default for CegarConfig {
    fn default() -> Self {
        Self {
            waitlist_order: WaitlistOrder::default(),
            domains: vec![DomainKind::Value, DomainKind::Interval],
            precision_scope: PrecisionScope::default(),
            prefix_provider: PrefixProviderKind::default(),
            interpolation_strategy: InterpolationStrategy::default(),
            max_prefix_count: DEFAULT_MAX_PREFIX_COUNT,
            max_prefix_length: DEFAULT_MAX_PREFIX_LENGTH,
            check_for_repeated_refinements: true,
            max_refinements: None,
            max_reached_states: None,
            timeout_secs: None,
            invariant_generation: InvariantGenerationConfig::default(),
            smt_solver: None,
        }
    }
}

impl CegarConfig {
    /// Order in which waiting states are explored
    pub fn waitlist_order(&self) -> WaitlistOrder {
        self.waitlist_order
    }

    /// Refined domains, in refinement order
    pub fn domains(&self) -> &[DomainKind] {
        &self.domains
    }

    /// Granularity of the precisions
    pub fn precision_scope(&self) -> PrecisionScope {
        self.precision_scope
    }

    /// Provider of infeasible prefixes
    pub fn prefix_provider(&self) -> PrefixProviderKind {
        self.prefix_provider
    }

    /// Source of the interpolants
    pub fn interpolation_strategy(&self) -> InterpolationStrategy {
        self.interpolation_strategy
    }

    /// Bound on the number of prefixes per path
    pub fn max_prefix_count(&self) -> usize {
        self.max_prefix_count
    }

    /// Length after which the prefix search stops once a prefix was found
    pub fn max_prefix_length(&self) -> usize {
        self.max_prefix_length
    }

    /// Whether repeated refinement roots are widened
    pub fn check_for_repeated_refinements(&self) -> bool {
        self.check_for_repeated_refinements
    }

    /// Bound on the number of refinement rounds
    pub fn max_refinements(&self) -> Option<usize> {
        self.max_refinements
    }

    /// Bound on the size of the reached set
    pub fn max_reached_states(&self) -> Option<usize> {
        self.max_reached_states
    }

    /// Walltime limit in seconds
    pub fn timeout_secs(&self) -> Option<u64> {
        self.timeout_secs
    }

    /// Options of the invariant generator
    pub fn invariant_generation(&self) -> &InvariantGenerationConfig {
        &self.invariant_generation
    }

    /// Configured SMT solver
    pub fn smt_solver(&self) -> Option<&SolverChoice> {
        self.smt_solver.as_ref()
    }

    /// Set the waitlist order
    pub fn with_waitlist_order(mut self, order: WaitlistOrder) -> Self {
        self.waitlist_order = order;
        self
    }

    /// Set the refined domains
    pub fn with_domains(mut self, domains: impl IntoIterator<Item = DomainKind>) -> Self {
        self.domains = domains.into_iter().collect();
        self
    }

    /// Set the precision scope
    pub fn with_precision_scope(mut self, scope: PrecisionScope) -> Self {
        self.precision_scope = scope;
        self
    }

    /// Set the prefix provider
    pub fn with_prefix_provider(mut self, provider: PrefixProviderKind) -> Self {
        self.prefix_provider = provider;
        self
    }

    /// Set the interpolation strategy
    pub fn with_interpolation_strategy(mut self, strategy: InterpolationStrategy) -> Self {
        self.interpolation_strategy = strategy;
        self
    }

    /// Set the bound on the number of prefixes
    pub fn with_max_prefix_count(mut self, max: usize) -> Self {
        self.max_prefix_count = max;
        self
    }

    /// Set the prefix search length
    pub fn with_max_prefix_length(mut self, max: usize) -> Self {
        self.max_prefix_length = max;
        self
    }

    /// Enable or disable widening of repeated refinement roots
    pub fn with_check_for_repeated_refinements(mut self, check: bool) -> Self {
        self.check_for_repeated_refinements = check;
        self
    }

    /// Set the bound on refinement rounds
    pub fn with_max_refinements(mut self, max: Option<usize>) -> Self {
        self.max_refinements = max;
        self
    }

    /// Set the bound on the reached set
    pub fn with_max_reached_states(mut self, max: Option<usize>) -> Self {
        self.max_reached_states = max;
        self
    }

    /// Set the walltime limit
    pub fn with_timeout_secs(mut self, timeout: Option<u64>) -> Self {
        self.timeout_secs = timeout;
        self
    }

    /// Set the options of the invariant generator
    pub fn with_invariant_generation(mut self, cfg: InvariantGenerationConfig) -> Self {
        self.invariant_generation = cfg;
        self
    }

    /// Set the SMT solver
    pub fn with_smt_solver(mut self, solver: Option<SolverChoice>) -> Self {
        self.smt_solver = solver;
        self
    }
}
