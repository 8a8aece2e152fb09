//! Command execution and output formatting.

use crate::Commands;
use colored::Colorize;
use rfsm_core::{MachineError, MachineOptions, StateGraph, StateKind, StateMachine};
use std::path::Path;

/// Executes a one-shot command and returns the formatted output.
pub fn execute(
    options: MachineOptions,
    cmd: &Commands,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl { .. } => unreachable!(),

        Commands::Check { file } => {
            let machine = load(options, file)?;
            let graph = machine.state_graph();
            Ok(format!(
                "{} {}\n  States: {}\n  Transitions: {}\n  Events: {}\n  Initial state: {}\n  Version: {}",
                "OK".green(),
                file.display().to_string().cyan(),
                graph.states.len(),
                graph.transitions.len(),
                machine.events_list().len(),
                machine.current_state()?.yellow(),
                graph.version
            ))
        }

        Commands::Graph { file, json } => {
            let machine = load(options, file)?;
            if *json {
                Ok(serde_json::to_string_pretty(machine.state_graph())?)
            } else {
                let active = machine.current_state()?;
                Ok(format!(
                    "{}\n{}\n{}\n{}",
                    "States".bold(),
                    format_tree(machine.state_graph(), Some(&active)),
                    "Transitions".bold(),
                    format_transitions(machine.state_graph())
                ))
            }
        }

        Commands::Events { file } => {
            let machine = load(options, file)?;
            Ok(format_events(&machine.events_list()))
        }

        Commands::Run {
            file,
            events,
            steps,
        } => {
            let machine = load(options, file)?;
            let before = machine.current_state()?;
            if !events.is_empty() {
                machine.send_events(events)?;
            }
            let driven = match steps {
                Some(n) => machine.step(*n),
                None => machine.run(),
            };
            driven.map_err(|e| fault_message(&e, file))?;

            Ok(format!(
                "{} {} → {}\n  Pending: {}",
                (if steps.is_some() { "Stepped" } else { "Ran" }).green(),
                before,
                machine.current_state()?.yellow(),
                format_queue(&machine.event_queue()?)
            ))
        }
    }
}

/// Loads `path` into a new machine, reporting faults against the file.
pub fn load(options: MachineOptions, path: &Path) -> Result<StateMachine, String> {
    let mut machine = StateMachine::with_options(options);
    machine.load(path).map_err(|e| fault_message(&e, path))?;
    Ok(machine)
}

/// Renders an error, pointing at `file:line` when the message carries a
/// location inside `definition`.
pub fn fault_message(err: &MachineError, definition: &Path) -> String {
    match err.diagnostic() {
        Some(location) if location.matches_file(definition) => format!(
            "[{}] {}:{}: {}",
            err.error_code(),
            definition.display(),
            location.line,
            location.message
        ),
        _ => format!("[{}] {}", err.error_code(), err),
    }
}

/// Indented tree of the hierarchy. The active leaf and its ancestors are
/// highlighted.
pub fn format_tree(graph: &StateGraph, active: Option<&str>) -> String {
    if graph.is_empty() {
        return "  (empty)".yellow().to_string();
    }
    let mut output = String::new();
    push_children(graph, None, active, 1, &mut output);
    output.trim_end().to_string()
}

fn push_children(
    graph: &StateGraph,
    parent: Option<&str>,
    active: Option<&str>,
    depth: usize,
    output: &mut String,
) {
    for state in graph.children_of(parent) {
        let on_path = active.is_some_and(|a| {
            a == state.name
                || a.strip_prefix(state.name.as_str())
                    .is_some_and(|rest| rest.starts_with('.'))
        });
        let name = if on_path {
            state.local_name().green().bold().to_string()
        } else if state.kind == StateKind::Connector {
            state.local_name().dimmed().to_string()
        } else {
            state.local_name().cyan().to_string()
        };

        let mut hooks = Vec::new();
        if state.has_entry {
            hooks.push("entry");
        }
        if state.has_doo {
            hooks.push("doo");
        }
        if state.has_exit {
            hooks.push("exit");
        }
        let hooks = if hooks.is_empty() {
            String::new()
        } else {
            format!(" {{{}}}", hooks.join(", "))
        };

        output.push_str(&format!(
            "{}{} ({}){}\n",
            "  ".repeat(depth),
            name,
            state.kind,
            hooks.dimmed()
        ));
        push_children(graph, Some(state.name.as_str()), active, depth + 1, output);
    }
}

/// One line per transition, completion events shown as `e_done`.
pub fn format_transitions(graph: &StateGraph) -> String {
    if graph.transitions.is_empty() {
        return "  (none)".yellow().to_string();
    }
    let mut output = String::new();
    for t in &graph.transitions {
        let events = t.display_events();
        let events = if events.is_empty() {
            String::new()
        } else {
            format!(" [{}]", events.join(", "))
        };
        let priority = t
            .priority
            .map(|pn| format!(" pn={}", pn))
            .unwrap_or_default();
        output.push_str(&format!(
            "  {} → {}{}{}\n",
            t.source.cyan(),
            t.target.to_string().cyan(),
            events.yellow(),
            priority.dimmed()
        ));
    }
    output.trim_end().to_string()
}

pub fn format_events(events: &[String]) -> String {
    if events.is_empty() {
        return "No events".yellow().to_string();
    }
    events
        .iter()
        .map(|e| format!("  {}", e.cyan()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pending events in FIFO order, completion events collapsed for display.
pub fn format_queue(queue: &[String]) -> String {
    if queue.is_empty() {
        return "(empty)".dimmed().to_string();
    }
    queue
        .iter()
        .map(|e| rfsm_core::naming::display_event_name(e))
        .collect::<Vec<_>>()
        .join(", ")
}
