//! Interactive REPL.

use crate::commands::{
    fault_message, format_events, format_queue, format_transitions, format_tree,
};
use colored::Colorize;
use rfsm_core::{LiveModel, MachineObserver, MachineOptions, StateCallback, StateMachine};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

const HELP_TEXT: &str = r#"
Available commands:
  help                          Show this help

  load <file>                   Load a definition (replaces the current one)
  reset                         Reload the current definition
  close                         Unload the current definition
  path <dir|pattern>            Add a module search path for the next load
  verbose [on|off]              Route model info/warn output (next load)

  step [n]                      Run n steps (default 1)
  run                           Run until idle
  send <event> [event...]       Queue events

  state                         Show the active state
  queue                         Show pending events
  events                        List known events
  states                        Show the state tree
  transitions                   List transitions
  graph [json]                  Show states and transitions

  dryrun                        Toggle logging callbacks on every state
  lua <chunk>                   Execute Lua in the live machine

  quit, exit                    Exit the REPL
"#;

/// Prints every hook invocation while dry run is on.
struct DryRunPrinter;

impl DryRunPrinter {
    fn print(&self, hook: &str, model: &LiveModel<'_>) {
        let state = model
            .current_state()
            .unwrap_or_else(|e| format!("<{}>", e));
        println!(
            "{} {} (active: {})",
            chrono::Local::now()
                .format("[%H:%M:%S%.3f]")
                .to_string()
                .dimmed(),
            hook.magenta(),
            state.yellow()
        );
    }
}

impl StateCallback for DryRunPrinter {
    fn entry(&self, model: &LiveModel<'_>) {
        self.print("entry", model);
    }

    fn doo(&self, model: &LiveModel<'_>) {
        self.print("doo", model);
    }

    fn exit(&self, model: &LiveModel<'_>) {
        self.print("exit", model);
    }
}

/// Prints state changes across a step and the model's diagnostics.
#[derive(Default)]
struct SessionObserver {
    before: RefCell<Option<String>>,
}

impl MachineObserver for SessionObserver {
    fn on_pre_step(&self, model: &LiveModel<'_>) {
        *self.before.borrow_mut() = model.current_state().ok();
    }

    fn on_post_step(&self, model: &LiveModel<'_>) {
        let Ok(after) = model.current_state() else {
            return;
        };
        if let Some(before) = self.before.borrow_mut().take() {
            if before != after {
                println!("  {} → {}", before, after.yellow());
            }
        }
    }

    fn on_info(&self, message: &str) {
        println!("  {}: {}", "info".blue(), message);
    }

    fn on_warning(&self, message: &str) {
        println!("  {}: {}", "warning".yellow(), message);
    }

    fn on_error(&self, message: &str) {
        println!("  {}: {}", "error".red(), message);
    }
}

/// One REPL session: the machine plus what keeps its callbacks alive.
struct Session {
    machine: StateMachine,
    dry_run: Option<Rc<DryRunPrinter>>,
}

impl Session {
    fn new(options: MachineOptions) -> Self {
        let machine = StateMachine::with_options(options);
        machine.set_observer(Rc::new(SessionObserver::default()));
        Self {
            machine,
            dry_run: None,
        }
    }

    fn definition(&self) -> PathBuf {
        self.machine
            .file_name()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    /// Loads `path`, putting its directory on the search path first.
    fn load(&mut self, path: &Path) -> Result<String, String> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            self.machine.add_search_path(dir.display().to_string());
        }
        self.dry_run = None;
        self.machine
            .load(path)
            .map_err(|e| fault_message(&e, path))?;
        self.loaded_summary()
    }

    fn reset(&mut self) -> Result<String, String> {
        self.dry_run = None;
        let path = self.definition();
        self.machine.reset().map_err(|e| fault_message(&e, &path))?;
        self.loaded_summary()
    }

    fn loaded_summary(&self) -> Result<String, String> {
        let graph = self.machine.state_graph();
        let state = self
            .machine
            .current_state()
            .map_err(|e| fault_message(&e, &self.definition()))?;
        Ok(format!(
            "{} {} ({} states, {} transitions, {})\n  State: {}",
            "Loaded".green(),
            self.definition().display().to_string().cyan(),
            graph.states.len(),
            graph.transitions.len(),
            graph.version,
            state.yellow()
        ))
    }

    fn toggle_dry_run(&mut self) -> Result<String, Box<dyn std::error::Error>> {
        if self.dry_run.take().is_some() {
            // Registry entries die with the printer.
            return Ok(format!("{} dry run", "Disabled".yellow()));
        }
        let printer = Rc::new(DryRunPrinter);
        let installed = self.machine.install_default_callbacks(&printer)?;
        self.dry_run = Some(printer);
        Ok(format!(
            "{} dry run on {} state(s)",
            "Enabled".green(),
            installed
        ))
    }
}

pub fn run(
    options: MachineOptions,
    definition: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "rfsm debugger".bold().cyan());

    let mut session = Session::new(options);
    if let Some(path) = definition {
        match session.load(&path) {
            Ok(summary) => println!("{}", summary),
            Err(e) => println!("{}: {}", "Error".red(), e),
        }
    }

    // Create readline editor
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    // Load history
    let history_path = std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(".rfsm_history"))
        .unwrap_or_else(|_| ".rfsm_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "rfsm>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&mut session, line) {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break, // Exit command
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    // Save history
    let _ = rl.save_history(&history_path);

    session.machine.close();
    println!("{}", "Bye.".dimmed());

    Ok(())
}

fn execute_repl_command(
    session: &mut Session,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let (cmd, rest) = line
        .split_once(char::is_whitespace)
        .map(|(cmd, rest)| (cmd, rest.trim()))
        .unwrap_or((line, ""));
    let cmd = cmd.to_lowercase();
    let args: Vec<&str> = rest.split_whitespace().collect();
    let machine = &session.machine;

    match cmd.as_str() {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(None),

        "load" | "l" => {
            if rest.is_empty() {
                return Ok(Some("Usage: load <file>".to_string()));
            }
            Ok(Some(session.load(Path::new(rest))?))
        }

        "reset" => Ok(Some(session.reset()?)),

        "close" => {
            session.dry_run = None;
            session.machine.close();
            Ok(Some("Closed".green().to_string()))
        }

        "path" => {
            if rest.is_empty() {
                let paths = machine.options().search_paths.join("\n  ");
                return Ok(Some(format!("  {}", paths)));
            }
            session.machine.add_search_path(rest);
            Ok(Some(format!(
                "{} {} (applies to the next load)",
                "Added".green(),
                rest.cyan()
            )))
        }

        "verbose" => {
            let verbose = match args.first().copied() {
                None => !machine.is_verbose(),
                Some("on") | Some("true") | Some("1") => true,
                Some("off") | Some("false") | Some("0") => false,
                Some(_) => return Ok(Some("Usage: verbose [on|off]".to_string())),
            };
            session.machine.set_verbose(verbose);
            Ok(Some(format!(
                "Verbose {} (applies to the next load)",
                if verbose { "on".green() } else { "off".yellow() }
            )))
        }

        "step" | "s" => {
            let n: u32 = match args.first() {
                Some(n) => n.parse()?,
                None => 1,
            };
            machine
                .step(n)
                .map_err(|e| fault_message(&e, &session.definition()))?;
            Ok(Some(format!("State: {}", machine.current_state()?.yellow())))
        }

        "run" | "r" => {
            machine
                .run()
                .map_err(|e| fault_message(&e, &session.definition()))?;
            Ok(Some(format!("State: {}", machine.current_state()?.yellow())))
        }

        "send" => {
            if args.is_empty() {
                return Ok(Some("Usage: send <event> [event...]".to_string()));
            }
            machine.send_events(&args)?;
            Ok(Some(format!(
                "{} {}\n  Pending: {}",
                "Queued".green(),
                args.join(", ").cyan(),
                format_queue(&machine.event_queue()?)
            )))
        }

        "state" => Ok(Some(machine.current_state()?.yellow().to_string())),

        "queue" => Ok(Some(format_queue(&machine.event_queue()?))),

        "events" => {
            if !machine.is_loaded() {
                return Err(rfsm_core::MachineError::NotLoaded.into());
            }
            Ok(Some(format_events(&machine.events_list())))
        }

        "states" => {
            let active = machine.current_state()?;
            Ok(Some(format_tree(machine.state_graph(), Some(&active))))
        }

        "transitions" => {
            if !machine.is_loaded() {
                return Err(rfsm_core::MachineError::NotLoaded.into());
            }
            Ok(Some(format_transitions(machine.state_graph())))
        }

        "graph" | "g" => {
            let active = machine.current_state()?;
            if args.first() == Some(&"json") {
                return Ok(Some(serde_json::to_string_pretty(machine.state_graph())?));
            }
            Ok(Some(format!(
                "{}\n{}\n{}\n{}",
                "States".bold(),
                format_tree(machine.state_graph(), Some(&active)),
                "Transitions".bold(),
                format_transitions(machine.state_graph())
            )))
        }

        "dryrun" => Ok(Some(session.toggle_dry_run()?)),

        "lua" => {
            if rest.is_empty() {
                return Ok(Some("Usage: lua <chunk>".to_string()));
            }
            machine
                .exec_chunk(rest)
                .map_err(|e| fault_message(&e, &session.definition()))?;
            Ok(Some("OK".green().to_string()))
        }

        _ => Ok(Some(format!(
            "Unknown command: {}. Type 'help' for help.",
            cmd
        ))),
    }
}
