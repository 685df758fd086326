//! CPA Command Line Interface
//!
//! This crate contains the CLI of the CEGAR program analysis. It reads a
//! program, given as a control-flow automaton in JSON, and checks whether any
//! of its target locations is reachable.

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, ConfigOverrides, initialize_logger, parse_input_file};
use human_panic::setup_panic;
use log::{debug, info};

mod cli;
mod cpa_config;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_panic!();

    // parse the cli arguments
    let cli = Cli::parse();
    initialize_logger(cli.log_config)?;
    match cli.command {
        cli::Commands::Check {
            input_file,
            config_file,
            smt_solver,
            domains,
            prefix_provider,
            interpolation,
            max_refinements,
            timeout,
            invariants,
        } => {
            let cfa = parse_input_file(&input_file)?;

            let n_nodes = cfa.nodes().count();
            let n_edges = cfa.edges().count();
            info!(
                "Read program '{}' with {n_nodes} locations and {n_edges} edges",
                input_file.display()
            );
            debug!("Parsed control-flow automaton:\n{cfa}");

            let overrides = ConfigOverrides {
                smt_solver,
                domains,
                prefix_provider,
                interpolation,
                max_refinements,
                timeout,
                invariants,
            };
            let config = cli::load_config(config_file, overrides)?;
            debug!("Analysis configuration: {config:?}");

            let result = cli::run_analysis(Arc::new(cfa), config)?;
            cli::display_result(&result);

            info!("Finished the analysis. Goodbye!");
            Ok(())
        }
        cli::Commands::Show { input_file } => {
            let cfa = parse_input_file(&input_file)?;
            println!("{cfa}");
            Ok(())
        }
    }
}
