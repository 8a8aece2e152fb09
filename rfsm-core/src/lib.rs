//! # rfsm-core
//!
//! Host-side driver for rFSM hierarchical state machines.
//!
//! Definitions are Lua files evaluated inside an embedded runtime together
//! with the FSM library. This crate provides:
//! - Runtime context lifecycle and FSM library location
//! - The native bridge the model uses to reach host callbacks
//! - The `StateMachine` driver (load, run, step, events, queries)
//! - State graph extraction into plain host records

pub mod bridge;
pub mod callbacks;
pub mod context;
pub mod error;
pub mod extractor;
pub mod graph;
pub mod library;
pub mod machine;
pub mod marshal;
pub mod naming;

pub use bridge::{DiagnosticLevel, NativeBridge, StateHook, BRIDGE_VERSION};
pub use callbacks::{CallbackRegistry, StateCallback};
pub use context::{LiveModel, Phase, RuntimeContext};
pub use error::{Diagnostic, InitError, LoadError, MachineError, QueryError};
pub use extractor::StateGraphExtractor;
pub use graph::{GraphVersion, State, StateGraph, StateKind, Transition, TransitionTarget};
pub use library::LibrarySource;
pub use machine::{MachineObserver, MachineOptions, StateMachine};
