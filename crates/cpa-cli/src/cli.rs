//! Command Line Interface of the CPA refinement analysis
//!
//! The `clap` crate parses the command line arguments. This module defines
//! all available commands and options (and their documentation) as well as
//! the utility functions that apply them.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use cpa_cfa::Cfa;
use cpa_core::{
    result::AnalysisResult,
    shutdown::{ProgramSafeSignal, ShutdownNotifier},
};
use cpa_invariant_generator::generator::InvariantGenerator;
use cpa_refinement::{
    cegar::CegarAlgorithm,
    config::{CegarConfig, DomainKind, InterpolationStrategy, PrefixProviderKind, SolverChoice},
};
use log::{LevelFilter, debug, info, warn};
use log4rs::{
    Config,
    append::console::ConsoleAppender,
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
};

use crate::{cli::program_format::ProgramDescription, cpa_config::CpaConfig};

mod program_format;

/// CPA refinement analysis - Command Line Interface
///
/// Checks whether the target locations of a program, given as a control-flow
/// automaton in JSON, are reachable. Reachability is explored with abstract
/// domains whose precision is refined along spurious counterexamples.
///
/// You can use the --help / -h flag to get all available commands and
/// options.
#[derive(Parser, Debug)]
#[command(version, name = "CPA CLI", about, long_about)]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) log_config: LoggerConfig,
    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Read the program and check whether a target location is reachable
    Check {
        /// Location and name of the program file (JSON)
        input_file: PathBuf,

        /// Configuration file for the analysis
        #[arg(short, long, value_name = "CONFIG_FILE")]
        config_file: Option<PathBuf>,

        /// Select the SMT solver that confirms counterexamples
        #[arg(short, long, value_name = "SMT_SOLVER")]
        smt_solver: Option<SMTSolverDefaultOptions>,

        /// Domains to refine, in the order they are tried
        #[arg(short, long, value_name = "DOMAINS", value_delimiter = ',')]
        domains: Option<Vec<DomainOption>>,

        /// Extract infeasible prefixes by replay or with the SMT solver
        #[arg(long, value_name = "PREFIX_PROVIDER")]
        prefix_provider: Option<PrefixProviderOption>,

        /// Interpolate every prefix edge by edge, or reuse the interpolants
        /// of the prefix provider
        #[arg(long, value_name = "STRATEGY")]
        interpolation: Option<InterpolationOption>,

        /// Give up after this many refinements
        #[arg(short, long, value_name = "MAX_REFINEMENTS")]
        max_refinements: Option<usize>,

        /// Walltime limit in seconds
        #[arg(short, long, value_name = "SECONDS")]
        timeout: Option<u64>,

        /// Generate interval invariants next to the analysis
        #[arg(short, long, default_value_t = false)]
        invariants: bool,
    },
    /// Read the program and print its control-flow automaton
    Show {
        /// Location and name of the program file (JSON)
        input_file: PathBuf,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
/// SMT solvers that are supported by default
pub(crate) enum SMTSolverDefaultOptions {
    /// Z3 SMT solver
    Z3,
    /// CVC5 SMT solver
    CVC5,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub(crate) enum DomainOption {
    /// Explicit values of variables
    Value,
    /// Intervals of variables
    Interval,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub(crate) enum PrefixProviderOption {
    /// Replay the error path in the refined domain
    Generic,
    /// Check the error path block by block with the SMT solver
    Predicate,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub(crate) enum InterpolationOption {
    /// Interpolate each prefix edge by edge in the refined domain
    Edge,
    /// Use the interpolants attached to each prefix
    Prefix,
}

#[derive(Debug, Args)]
pub(crate) struct LoggerConfig {
    /// Read the logger configuration from file.
    /// Logger configuration can be provided in the log4rs specification format.
    #[arg(long)]
    logger_config_file: Option<String>,

    /// Enable debug output.
    /// **Note**: This flag must be passed first, before any command.
    #[arg(short, long, default_value_t = false)]
    debug: bool,
}

/// Command line overrides of the configuration
#[derive(Debug, Default)]
pub(crate) struct ConfigOverrides {
    pub(crate) smt_solver: Option<SMTSolverDefaultOptions>,
    pub(crate) domains: Option<Vec<DomainOption>>,
    pub(crate) prefix_provider: Option<PrefixProviderOption>,
    pub(crate) interpolation: Option<InterpolationOption>,
    pub(crate) max_refinements: Option<usize>,
    pub(crate) timeout: Option<u64>,
    pub(crate) invariants: bool,
}

/// Initialize the logger as specified in `cfg`
///
/// By default the logger is configured to log to stdout. If a log4rs
/// configuration file is given in `cfg`, the configuration from that file will
/// be used instead
pub(crate) fn initialize_logger(cfg: LoggerConfig) -> Result<(), anyhow::Error> {
    if let Some(f) = cfg.logger_config_file {
        log4rs::init_file(&f, Default::default())
            .with_context(|| format!("Failed to read logger config file '{f}'"))?;
        return Ok(());
    }

    let p_encoder = match cfg.debug {
        true => PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S)} - {h({l})} - [{f}:{L} - {M}] - {m}{n}"),
        false => PatternEncoder::new("{d(%H:%M:%S)} - {h({l})} - {m}{n}"),
    };

    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(p_encoder))
        .build();

    let level = if cfg.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let log_config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))
        .with_context(|| "Failed to configure the console logger")?;

    log4rs::init_config(log_config).with_context(|| "Failed to initialize console logger")?;
    Ok(())
}

/// Get SMT solver configuration based on selected solver
pub(crate) fn get_smt_solver(smt_config: SMTSolverDefaultOptions) -> SolverChoice {
    match smt_config {
        SMTSolverDefaultOptions::Z3 => SolverChoice::Z3,
        SMTSolverDefaultOptions::CVC5 => SolverChoice::Cvc5,
    }
}

fn get_domain(domain: DomainOption) -> DomainKind {
    match domain {
        DomainOption::Value => DomainKind::Value,
        DomainOption::Interval => DomainKind::Interval,
    }
}

/// Load the configuration from `config_file` and the environment, then
/// apply the command line `overrides`
pub(crate) fn load_config(
    config_file: Option<PathBuf>,
    overrides: ConfigOverrides,
) -> Result<CegarConfig, anyhow::Error> {
    let mut settings = ::config::Config::builder();
    if let Some(config_file) = config_file {
        if !config_file.exists() {
            return Err(anyhow::anyhow!(
                "Specified configuration file '{}' does not exist.",
                config_file.display()
            ));
        }
        settings = settings.add_source(::config::File::from(config_file));
    }

    settings = settings.add_source(
        ::config::Environment::with_prefix("CPA")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );
    let mut config = settings
        .build()
        .with_context(|| "Failed to read the configuration")?
        .try_deserialize::<CpaConfig>()
        .with_context(|| "Invalid configuration")?;

    if let Some(solver) = overrides.smt_solver {
        config.set_smt_solver(get_smt_solver(solver));
    }
    if let Some(domains) = overrides.domains {
        config.set_domains(domains.into_iter().map(get_domain).collect());
    }
    if let Some(provider) = overrides.prefix_provider {
        config.set_prefix_provider(match provider {
            PrefixProviderOption::Generic => PrefixProviderKind::Generic,
            PrefixProviderOption::Predicate => PrefixProviderKind::Predicate,
        });
    }
    if let Some(interpolation) = overrides.interpolation {
        config.set_interpolation_strategy(match interpolation {
            InterpolationOption::Edge => InterpolationStrategy::Edge,
            InterpolationOption::Prefix => InterpolationStrategy::Prefix,
        });
    }
    if let Some(max) = overrides.max_refinements {
        config.set_max_refinements(max);
    }
    if let Some(secs) = overrides.timeout {
        config.set_timeout_secs(secs);
    }
    if overrides.invariants {
        config.enable_invariant_generation();
    }

    Ok(config.into_cegar())
}

/// Parse the input file into a control-flow automaton
pub(crate) fn parse_input_file(input_file: &Path) -> Result<Cfa, anyhow::Error> {
    let f = fs::read_to_string(input_file)
        .with_context(|| format!("Unable to read program file '{}'", input_file.display()))?;
    let program: ProgramDescription =
        serde_json::from_str(&f).with_context(|| "Unable to parse the program description")?;
    program
        .into_cfa()
        .with_context(|| "The program description is not a valid control-flow automaton")
}

/// Run the analysis configured by `config` on `cfa`
///
/// If invariant generation is enabled, the generator is started before the
/// main analysis and shares its safe signal.
pub(crate) fn run_analysis(
    cfa: Arc<Cfa>,
    config: CegarConfig,
) -> Result<AnalysisResult, anyhow::Error> {
    let shutdown = ShutdownNotifier::new();
    let safe_signal = ProgramSafeSignal::new();
    let invariant_cfg = *config.invariant_generation();
    let max_reached_states = config.max_reached_states();

    let mut cegar = CegarAlgorithm::new(cfa.clone(), config, shutdown.clone())
        .with_context(|| "Failed to set up the analysis")?
        .with_safe_signal(safe_signal.clone());

    let mut generator = None;
    if invariant_cfg.enabled() {
        let mut invariant_generator = InvariantGenerator::new(cfa, &shutdown)
            .with_asynchronous(invariant_cfg.asynchronous())
            .with_shutdown_on_safe(invariant_cfg.shutdown_on_safe())
            .with_safe_signal(safe_signal)
            .with_max_reached_states(max_reached_states);

        if invariant_cfg.asynchronous() {
            invariant_generator.start()?;
            cegar = cegar.with_invariants(Arc::new(invariant_generator.published()));
        } else {
            match invariant_generator.get() {
                Ok(supplier) => cegar = cegar.with_invariants(supplier),
                Err(err) => warn!("Continuing without invariants: {err}"),
            }
        }
        generator = Some(invariant_generator);
    }

    let result = cegar.run();

    if let Some(generator) = generator.filter(InvariantGenerator::is_running) {
        debug!("Stopping the invariant generator");
        generator.cancel();
    }
    Ok(result)
}

/// Log the verdict of the analysis
pub(crate) fn display_result(result: &AnalysisResult) {
    match result {
        AnalysisResult::Safe => {
            info!("Verification result: SAFE. No target location is reachable.")
        }
        AnalysisResult::Unsafe(cex) => {
            info!("Verification result: UNSAFE. Counter example:\n{cex}");
            if !cex.is_precise() {
                warn!(
                    "The counter example was not confirmed by an SMT solver, configure one to check it precisely"
                );
            }
        }
        AnalysisResult::Unknown(reason) => {
            info!("Verification result: UNKNOWN. The analysis gave up: {reason}")
        }
    }
}
