//! Interface to SMT solvers
//!
//! Solvers are driven through [easy-smt](https://crates.io/crates/easy-smt),
//! which starts the solver as a subprocess in interactive mode. This crate
//! configures and starts popular solvers, and encodes CFA expressions and
//! paths (in static single assignment form) into SMT formulas.

use core::{error, fmt};
use std::process::Command;

use easy_smt::{Context, ContextBuilder};
use expression_encoding::SMTSolverError;
use log::{debug, error, trace, warn};

#[cfg(feature = "config_deserialize")]
use serde::Deserialize;

pub mod expression_encoding;
pub mod path_formula;

/// Z3 command
pub const Z3_PRG: &str = "z3";
/// Options to run Z3 interactively on SMT-LIB2 input
pub const Z3_ARGS: [&str; 3] = ["-smt2", "-in", "-v:0"];

/// cvc5 command
pub const CVC5_PRG: &str = "cvc5";
/// Options to run cvc5 quietly and incrementally on SMT-LIB2 input
pub const CVC5_ARGS: [&str; 3] = ["--quiet", "--lang=smt2", "--incremental"];

/// Handle to a running SMT solver
///
/// Alias for [`easy_smt::Context`].
pub type SMTSolver = Context;

/// SMT expression
///
/// Alias for [`easy_smt::SExpr`].
pub type SMTExpr = easy_smt::SExpr;

/// Check run against the `(major, minor, patch)` version of a solver
///
/// Incompatibilities are reported through the `log` crate.
type CompatibilityCheck = fn((i32, i32, i32));

/// Configuration of an [`SMTSolverBuilder`]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "config_deserialize", derive(Deserialize))]
pub struct SMTSolverBuilderCfg {
    /// Command starting the solver
    command: String,
    /// Arguments passed to the command
    #[cfg_attr(feature = "config_deserialize", serde(default))]
    args: Vec<String>,
    /// Options set in every new solver session
    #[cfg_attr(feature = "config_deserialize", serde(default))]
    opts: Vec<SMTSolverOption>,
    /// Logic to set explicitly, the solver chooses if absent
    #[cfg_attr(feature = "config_deserialize", serde(default))]
    logic: Option<String>,
    /// Version compatibility check
    #[cfg_attr(feature = "config_deserialize", serde(skip))]
    check_version: Option<CompatibilityCheck>,
}

impl PartialEq for SMTSolverBuilderCfg {
    /// Only the presence of a version check is compared
    fn eq(&self, other: &Self) -> bool {
        self.command == other.command
            && self.args == other.args
            && self.opts == other.opts
            && self.logic == other.logic
            && self.check_version.is_some() == other.check_version.is_some()
    }
}

impl SMTSolverBuilderCfg {
    /// Configuration for a custom solver command
    ///
    /// The solver must run as an interactive REPL reading
    /// [SMT-LIB2](https://smtlib.cs.uiowa.edu) and support incremental solving
    /// (`push`/`pop`).
    pub fn new(
        command: String,
        args: Vec<String>,
        opts: Vec<SMTSolverOption>,
        logic: Option<String>,
    ) -> Self {
        Self {
            command,
            args,
            opts,
            logic,
            check_version: None,
        }
    }

    /// Default configuration of Z3
    pub fn new_z3() -> Self {
        Self {
            command: Z3_PRG.to_string(),
            args: Z3_ARGS.iter().map(|s| s.to_string()).collect(),
            opts: Vec::new(),
            logic: None,
            check_version: None,
        }
    }

    /// Default configuration of cvc5
    pub fn new_cvc5() -> Self {
        let check_version = |version: (i32, i32, i32)| {
            if version.0 <= 1 && version.1 < 1 {
                warn!(
                    "Detected cvc5 < v1.1.0 (cvc5 is version {}.{}.{}), negative integers might not be handled correctly",
                    version.0, version.1, version.2
                )
            }
        };

        Self {
            command: CVC5_PRG.to_string(),
            args: CVC5_ARGS.iter().map(|s| s.to_string()).collect(),
            opts: Vec::new(),
            logic: Some("ALL".to_string()),
            check_version: Some(check_version),
        }
    }

    /// Add a per-query timeout in milliseconds
    ///
    /// Queries exceeding the timeout are answered with `unknown`.
    pub fn with_timeout_ms(mut self, timeout_ms: u32) -> Self {
        let name = if self.command == CVC5_PRG {
            "tlimit-per"
        } else {
            "timeout"
        };
        self.opts
            .push(SMTSolverOption::new_integer_opt(name.to_string(), timeout_ms));
        self
    }

    /// Command starting the solver
    pub fn command(&self) -> &str {
        &self.command
    }
}

/// Builder starting new [`SMTSolver`] sessions
///
/// Every session runs in its own solver process.
#[derive(Debug, Clone, PartialEq)]
pub struct SMTSolverBuilder {
    command: String,
    args: Vec<String>,
    opts: Vec<SMTSolverOption>,
    logic: Option<String>,
}

impl SMTSolverBuilder {
    /// Create a builder for the configured solver
    ///
    /// Fails if the solver command cannot be executed.
    pub fn new(cfg: &SMTSolverBuilderCfg) -> Result<Self, SMTSolverError> {
        match get_smt_solver_version(&cfg.command) {
            Ok(version) => {
                trace!(
                    "SMT solver {} version {}.{}.{} found",
                    cfg.command, version.0, version.1, version.2
                );
                if let Some(check_version) = cfg.check_version {
                    check_version(version);
                }
            }
            Err(GetVersionError::NotInstalled(cmd)) => {
                return Err(SMTSolverError::SolverNotInstalled(cmd));
            }
            Err(GetVersionError::ParseVersionError) => {
                warn!("Failed to parse version of SMT solver {}", cfg.command);
            }
        }

        Ok(Self {
            command: cfg.command.clone(),
            args: cfg.args.clone(),
            opts: cfg.opts.clone(),
            logic: cfg.logic.clone(),
        })
    }

    /// Try Z3 first and cvc5 second
    pub fn new_automatic_selection() -> Result<Self, SMTSolverError> {
        SMTSolverBuilder::new(&SMTSolverBuilderCfg::new_z3())
            .or_else(|_| SMTSolverBuilder::new(&SMTSolverBuilderCfg::new_cvc5()))
            .map_err(|_| SMTSolverError::SolverNotInstalled("z3 or cvc5".to_string()))
    }

    /// Start a new solver session
    pub fn new_solver(&self) -> Result<SMTSolver, SMTSolverError> {
        trace!("Starting new session of SMT solver {}", self.command);
        let mut builder = ContextBuilder::new();
        builder.solver(&self.command).solver_args(&self.args);
        let mut solver = builder.build()?;

        for opt in self.opts.iter() {
            debug!("Applying SMT solver option {opt}");
            opt.apply_option(&mut solver);
        }

        if let Some(logic) = &self.logic {
            debug!("Setting SMT solver logic to {logic}");
            solver.set_logic(logic)?;
        }

        Ok(solver)
    }

    /// Command of the configured solver
    pub fn command(&self) -> &str {
        &self.command
    }
}

/// Option set in a solver session
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config_deserialize", derive(Deserialize))]
pub enum SMTSolverOption {
    /// Option with boolean value
    BooleanOption {
        /// Name of the option, without leading colon
        name: String,
        /// Value of the option
        value: bool,
    },
    /// Option with unsigned integer value
    UnsignedIntOption {
        /// Name of the option, without leading colon
        name: String,
        /// Value of the option
        value: u32,
    },
}

impl SMTSolverOption {
    /// Create a boolean option
    pub fn new_boolean_opt(name: String, value: bool) -> Self {
        Self::BooleanOption { name, value }
    }

    /// Create an integer option
    pub fn new_integer_opt(name: String, value: u32) -> Self {
        Self::UnsignedIntOption { name, value }
    }

    /// Set the option in `solver`, failures are logged
    pub fn apply_option(&self, solver: &mut SMTSolver) {
        let (name, value) = match self {
            SMTSolverOption::BooleanOption { name, value } => {
                (name, if *value { solver.true_() } else { solver.false_() })
            }
            SMTSolverOption::UnsignedIntOption { name, value } => (name, solver.numeral(*value)),
        };
        trace!("Setting SMT solver option {self}");
        if let Err(e) = solver.set_option(&format!(":{name}"), value) {
            error!("Failed to set option {name} in SMT solver: {e}");
        }
    }
}

impl fmt::Display for SMTSolverOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SMTSolverOption::BooleanOption { name, value } => write!(f, "{name} : {value}"),
            SMTSolverOption::UnsignedIntOption { name, value } => write!(f, "{name} : {value}"),
        }
    }
}

/// Types holding an [`SMTSolver`] session
pub trait SMTSolverContext {
    /// Mutable access to the solver session
    fn get_smt_solver_mut(&mut self) -> &mut SMTSolver;

    /// Access to the solver session
    fn get_smt_solver(&self) -> &SMTSolver;

    /// Assert `expr` on the current assertion level and check satisfiability
    ///
    /// An `unknown` answer is reported as [`SMTSolverError::SolverUnknown`].
    fn assert_and_check_expr(&mut self, expr: SMTExpr) -> Result<SMTSolution, SMTSolverError> {
        self.get_smt_solver_mut().assert(expr)?;
        self.check_assertions()
    }

    /// Check satisfiability of the current assertions
    fn check_assertions(&mut self) -> Result<SMTSolution, SMTSolverError> {
        match self.get_smt_solver_mut().check()? {
            easy_smt::Response::Sat => Ok(SMTSolution::SAT),
            easy_smt::Response::Unsat => Ok(SMTSolution::UNSAT),
            easy_smt::Response::Unknown => Err(SMTSolverError::SolverUnknown),
        }
    }

    /// Check whether `expr` is unsatisfiable in a fresh assertion level
    ///
    /// The assertion level is removed afterwards, also if the check fails.
    fn is_unsat(&mut self, expr: SMTExpr) -> Result<bool, SMTSolverError> {
        self.get_smt_solver_mut().push()?;
        let res = self.assert_and_check_expr(expr);
        self.get_smt_solver_mut().pop()?;
        Ok(res? == SMTSolution::UNSAT)
    }
}

impl SMTSolverContext for SMTSolver {
    fn get_smt_solver_mut(&mut self) -> &mut SMTSolver {
        self
    }

    fn get_smt_solver(&self) -> &SMTSolver {
        self
    }
}

/// Result of an SMT query
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SMTSolution {
    /// Query was unsatisfiable
    UNSAT,
    /// Query was satisfiable
    SAT,
}

impl SMTSolution {
    /// Check whether the query was satisfiable
    pub fn is_sat(&self) -> bool {
        matches!(self, SMTSolution::SAT)
    }
}

impl fmt::Display for SMTSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SMTSolution::UNSAT => write!(f, "UNSAT"),
            SMTSolution::SAT => write!(f, "SAT"),
        }
    }
}

/// Error while determining the version of a solver
#[derive(Debug, PartialEq)]
enum GetVersionError {
    /// Solver command could not be executed
    NotInstalled(String),
    /// Output does not contain a version
    ParseVersionError,
}

impl fmt::Display for GetVersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GetVersionError::NotInstalled(s) => {
                write!(f, "Execution of `{s} --version` failed, the solver is probably not installed")
            }
            GetVersionError::ParseVersionError => {
                write!(f, "Failed to parse the version out of the output of `--version`")
            }
        }
    }
}

impl error::Error for GetVersionError {}

/// Run `cmd --version` and parse the version of the solver
fn get_smt_solver_version(cmd: &str) -> Result<(i32, i32, i32), GetVersionError> {
    let out = Command::new(cmd)
        .arg("--version")
        .output()
        .map_err(|_| GetVersionError::NotInstalled(cmd.to_owned()))?;
    if !out.status.success() {
        return Err(GetVersionError::NotInstalled(cmd.to_owned()));
    }

    let out_str = std::str::from_utf8(&out.stdout).map_err(|_| GetVersionError::ParseVersionError)?;
    parse_smt_solver_version(out_str)
}

/// Parse a version of the form `... version x.y.z ...`
fn parse_smt_solver_version(version_output: &str) -> Result<(i32, i32, i32), GetVersionError> {
    let version_prefix = "version ";
    let parsed = version_output.find(version_prefix).and_then(|start| {
        let rest = &version_output[start + version_prefix.len()..];
        let version_str = rest.split([' ', '\n', '\t']).next()?;
        let mut parts = version_str.split('.').map(|p| p.parse::<i32>());
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(Ok(major)), Some(Ok(minor)), Some(Ok(patch)), None) => Some((major, minor, patch)),
            _ => None,
        }
    });

    parsed.ok_or_else(|| {
        debug!("Failed to parse SMT solver version from output: {version_output}");
        GetVersionError::ParseVersionError
    })
}

#[cfg(test)]
mod tests {
    use easy_smt::Response;

    use super::*;

    fn test_solver_interaction(solver: &mut SMTSolver) {
        let int_sort = solver.int_sort();
        let x = solver.declare_const("x", int_sort).unwrap();

        let constr = solver.and(
            solver.lte(x, solver.numeral(-1)),
            solver.gt(x, solver.numeral(-2)),
        );
        solver.assert(constr).unwrap();
        assert_eq!(solver.check().unwrap(), Response::Sat);

        let solution = solver.get_value(vec![x]).unwrap();
        assert_eq!(solver.get_i64(solution[0].1).unwrap(), -1);
    }

    #[test]
    fn test_z3_solver() {
        let builder = SMTSolverBuilder::new(&SMTSolverBuilderCfg::new_z3()).unwrap();
        let mut solver = builder.new_solver().unwrap();
        test_solver_interaction(&mut solver);
    }

    #[test]
    fn test_is_unsat_keeps_assertion_stack() {
        let builder = SMTSolverBuilder::new(&SMTSolverBuilderCfg::new_z3().with_timeout_ms(5000)).unwrap();
        let mut solver = builder.new_solver().unwrap();

        let x = solver.declare_const("x", solver.int_sort()).unwrap();
        let pos = solver.gt(x, solver.numeral(0));
        solver.assert(pos).unwrap();

        let neg = solver.lt(x, solver.numeral(0));
        assert!(solver.is_unsat(neg).unwrap());
        assert_eq!(solver.check_assertions().unwrap(), SMTSolution::SAT);
    }

    #[test]
    fn test_not_installed() {
        let cfg = SMTSolverBuilderCfg::new("no-such-solver-binary".into(), vec![], vec![], None);
        assert!(matches!(
            SMTSolverBuilder::new(&cfg),
            Err(SMTSolverError::SolverNotInstalled(_))
        ));
    }

    #[test]
    fn test_parse_version() {
        let out = "This is cvc5 version 1.1.0 [git tag 1.1.0 branch HEAD]\ncompiled with GCC version 11.4.0\n";
        assert_eq!(parse_smt_solver_version(out), Ok((1, 1, 0)));

        let out = "Z3 version 4.12.2 - 64 bit\n";
        assert_eq!(parse_smt_solver_version(out), Ok((4, 12, 2)));

        let out = "Z3 version 4.12 - 64 bit\n";
        assert_eq!(parse_smt_solver_version(out), Err(GetVersionError::ParseVersionError));

        assert_eq!(parse_smt_solver_version("no version here"), Err(GetVersionError::ParseVersionError));
    }

    #[test]
    fn test_option_display() {
        let opt = SMTSolverOption::new_integer_opt("timeout".into(), 10);
        assert_eq!(opt.to_string(), "timeout : 10");
        let opt = SMTSolverOption::new_boolean_opt("produce-models".into(), true);
        assert_eq!(opt.to_string(), "produce-models : true");
    }
}
