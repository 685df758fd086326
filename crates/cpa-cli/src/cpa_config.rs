//! Configuration of the analysis
//!
//! Options can be given in a configuration file, through environment
//! variables prefixed with `CPA` and through command line flags, where later
//! sources override earlier ones.

use cpa_refinement::config::{
    CegarConfig, DomainKind, InterpolationStrategy, PrefixProviderKind, SolverChoice,
};
use serde::Deserialize;

/// Configuration options of the `cpa` tool
///
/// This type implements `serde::Deserialize` so it can be read from
/// structured configuration, e.g.
///
/// ```toml
/// [cegar]
/// domains = ["interval"]
/// max_refinements = 20
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CpaConfig {
    /// Options of the CEGAR analysis
    #[serde(default)]
    cegar: CegarConfig,
}

impl CpaConfig {
    /// Options of the CEGAR analysis
    pub fn cegar(&self) -> &CegarConfig {
        &self.cegar
    }

    /// Consume the configuration and return the analysis options
    pub fn into_cegar(self) -> CegarConfig {
        self.cegar
    }

    fn update(&mut self, f: impl FnOnce(CegarConfig) -> CegarConfig) {
        self.cegar = f(std::mem::take(&mut self.cegar));
    }

    /// Use `solver` to confirm counterexamples
    pub fn set_smt_solver(&mut self, solver: SolverChoice) {
        self.update(|c| c.with_smt_solver(Some(solver)));
    }

    /// Analyze with `domains` in the given order
    pub fn set_domains(&mut self, domains: Vec<DomainKind>) {
        self.update(|c| c.with_domains(domains));
    }

    /// Extract infeasible prefixes with `provider`
    pub fn set_prefix_provider(&mut self, provider: PrefixProviderKind) {
        self.update(|c| c.with_prefix_provider(provider));
    }

    /// Interpolate infeasible prefixes with `strategy`
    pub fn set_interpolation_strategy(&mut self, strategy: InterpolationStrategy) {
        self.update(|c| c.with_interpolation_strategy(strategy));
    }

    /// Give up after `max` refinements
    pub fn set_max_refinements(&mut self, max: usize) {
        self.update(|c| c.with_max_refinements(Some(max)));
    }

    /// Stop the analysis after `secs` seconds
    pub fn set_timeout_secs(&mut self, secs: u64) {
        self.update(|c| c.with_timeout_secs(Some(secs)));
    }

    /// Generate invariants next to the analysis
    pub fn enable_invariant_generation(&mut self) {
        self.update(|c| {
            let invariants = c.invariant_generation().with_enabled(true);
            c.with_invariant_generation(invariants)
        });
    }
}
