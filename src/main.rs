//! rfsm - headless runner for rFSM hierarchical state machines.
//!
//! Loads one definition and drives it on a fixed period until interrupted,
//! a runtime fault occurs, or the configured tick budget is used up.

mod config;

use clap::Parser;
use config::Config;
use rfsm_core::{LiveModel, MachineError, MachineObserver, StateCallback, StateMachine};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rfsm")]
#[command(about = "Run an rFSM state machine periodically", long_about = None)]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "RFSM_CONFIG")]
    config: Option<PathBuf>,

    /// Definition file (overrides machine.definition)
    definition: Option<PathBuf>,
}

/// Logs every change of the active state between step boundaries.
#[derive(Default)]
struct TransitionLogger {
    before: RefCell<Option<String>>,
}

impl MachineObserver for TransitionLogger {
    fn on_pre_step(&self, model: &LiveModel<'_>) {
        *self.before.borrow_mut() = model.current_state().ok();
    }

    fn on_post_step(&self, model: &LiveModel<'_>) {
        let Ok(after) = model.current_state() else {
            return;
        };
        if let Some(before) = self.before.borrow_mut().take() {
            if before != after {
                tracing::info!("transited from {} to {}", before, after);
            }
        }
    }

    fn on_info(&self, message: &str) {
        tracing::debug!(target: "rfsm::runner", "model info: {}", message);
    }

    fn on_error(&self, message: &str) {
        tracing::debug!(target: "rfsm::runner", "model error: {}", message);
    }
}

/// Dry-run callback attached to one state.
struct StateLogger {
    state: String,
}

impl StateCallback for StateLogger {
    fn entry(&self, _model: &LiveModel<'_>) {
        tracing::info!(state = %self.state, "entry");
    }

    fn doo(&self, _model: &LiveModel<'_>) {
        tracing::info!(state = %self.state, "doo");
    }

    fn exit(&self, _model: &LiveModel<'_>) {
        tracing::info!(state = %self.state, "exit");
    }
}

fn report_fault(err: &MachineError) {
    match err.diagnostic() {
        Some(location) => tracing::error!(
            "Runtime fault at {}:{}: {}",
            location.file,
            location.line,
            location.message
        ),
        None => tracing::error!("Runtime fault: {}", err),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration (from file if given, then env overrides)
    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(c) => {
            if let Some(path) = &cli.config {
                tracing::info!("Loaded config from {}", path.display());
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };
    if let Some(definition) = cli.definition {
        config.machine.definition = Some(definition);
    }
    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return Err(e.into());
    }
    let definition = config
        .machine
        .definition
        .clone()
        .ok_or("machine.definition is required")?;

    tracing::info!("Starting rfsm runner");
    tracing::info!("  Definition: {}", definition.display());
    tracing::info!("  Period: {}ms", config.runner.period_ms);
    match config.runner.max_ticks {
        Some(n) => tracing::info!("  Max ticks: {}", n),
        None => tracing::info!("  Max ticks: unlimited"),
    }

    let mut machine = StateMachine::with_options(config.machine.machine_options());
    if let Err(e) = machine.load(&definition) {
        report_fault(&e);
        return Err(e.into());
    }
    tracing::info!("  Initial state: {}", machine.current_state()?);

    machine.set_observer(Rc::new(TransitionLogger::default()));

    // Loggers must outlive their registration
    let mut loggers = Vec::new();
    if config.runner.dry_run {
        let states: Vec<String> = machine
            .state_graph()
            .states
            .iter()
            .filter(|s| s.accepts_callbacks())
            .map(|s| s.name.clone())
            .collect();
        for state in states {
            let logger = Rc::new(StateLogger {
                state: state.clone(),
            });
            if machine.set_state_callback(&state, &logger)? {
                loggers.push(logger);
            }
        }
        tracing::info!("  Dry run: {} state(s) instrumented", loggers.len());
    }

    if !config.runner.events.is_empty() {
        machine.send_events(&config.runner.events)?;
    }

    let mut interval = tokio::time::interval(config.runner.period());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut ticks: u64 = 0;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Received shutdown signal, stopping runner...");
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = machine.run() {
                    report_fault(&e);
                    machine.close();
                    return Err(e.into());
                }
                ticks += 1;
                if config.runner.max_ticks.is_some_and(|max| ticks >= max) {
                    tracing::info!("Tick budget of {} reached", ticks);
                    break;
                }
            }
        }
    }

    tracing::info!(
        "Runner stopped after {} tick(s) in state {}",
        ticks,
        machine.current_state().unwrap_or_else(|_| "<unknown>".to_string())
    );
    machine.close();
    Ok(())
}
