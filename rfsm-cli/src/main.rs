//! rfsm-cli - Command-line debugger for rFSM state machines.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use rfsm_core::{LibrarySource, MachineOptions};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rfsm-cli")]
#[command(about = "Debugger for rFSM hierarchical state machines", long_about = None)]
#[command(version)]
struct Cli {
    /// Route model info/warn output and log step boundaries
    #[arg(short, long)]
    verbose: bool,

    /// Extra module search paths (directories or `?` patterns)
    #[arg(short, long, env = "RFSM_SEARCH_PATH", value_delimiter = ';')]
    search_path: Vec<String>,

    /// External FSM library file (bundled library when unset or missing)
    #[arg(short, long, env = "RFSM_LIBRARY")]
    library: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl Cli {
    /// Options for loading `definition`; its directory goes on the search path.
    fn machine_options(&self, definition: Option<&Path>) -> MachineOptions {
        let mut options = MachineOptions::new().with_verbose(self.verbose);
        for path in self.search_path.iter().filter(|p| !p.is_empty()) {
            options = options.with_search_path(path.clone());
        }
        if let Some(dir) = definition
            .and_then(Path::parent)
            .filter(|dir| !dir.as_os_str().is_empty())
        {
            options = options.with_search_path(dir.display().to_string());
        }
        if let Some(library) = &self.library {
            options = options.with_library(LibrarySource::External(library.clone()));
        }
        options
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start interactive REPL (default)
    Repl {
        /// Definition to load on start
        file: Option<PathBuf>,
    },

    /// Load a definition and report whether it initializes
    Check {
        /// Definition file
        file: PathBuf,
    },

    /// Print the state graph of a definition
    Graph {
        /// Definition file
        file: PathBuf,

        /// Print as JSON instead of a tree
        #[arg(long)]
        json: bool,
    },

    /// List the events a definition reacts to
    Events {
        /// Definition file
        file: PathBuf,
    },

    /// Load a definition, queue events and drive it
    Run {
        /// Definition file
        file: PathBuf,

        /// Events to queue before driving (can be repeated)
        #[arg(short, long = "event")]
        events: Vec<String>,

        /// Run exactly this many steps instead of until idle
        #[arg(long)]
        steps: Option<u32>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Repl { file }) => {
            let options = cli.machine_options(file.as_deref());
            repl::run(options, file.clone())?;
        }
        None => {
            repl::run(cli.machine_options(None), None)?;
        }
        Some(cmd) => {
            let definition = match cmd {
                Commands::Check { file }
                | Commands::Graph { file, .. }
                | Commands::Events { file }
                | Commands::Run { file, .. } => Some(file.as_path()),
                Commands::Repl { .. } => None,
            };
            let options = cli.machine_options(definition);

            match commands::execute(options, cmd) {
                Ok(output) => {
                    println!("{}", output);
                }
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
