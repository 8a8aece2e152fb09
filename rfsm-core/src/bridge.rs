//! Host functions callable from inside the embedded model.
//!
//! The bridge is one versioned table, built once per context and exposed as
//! the global `RFSM`. Each entry is a small closure that looks up its owner
//! through the runtime's app data, validates its arguments and dispatches.
//! Malformed calls are logged and ignored. Panics raised by host code are
//! caught here and never unwind into the runtime.

use crate::context::LiveModel;
use crate::machine::MachineShared;
use crate::marshal;
use mlua::{Lua, Value, Variadic};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

/// Version stamped into the bridge table as `RFSM.version`.
pub const BRIDGE_VERSION: u32 = 1;

/// Global name of the bridge table.
pub const BRIDGE_GLOBAL: &str = "RFSM";

/// Which state hook fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateHook {
    Entry,
    Doo,
    Exit,
}

impl StateHook {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateHook::Entry => "entry",
            StateHook::Doo => "doo",
            StateHook::Exit => "exit",
        }
    }
}

/// Severity of a diagnostic raised by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy)]
enum BridgeCall {
    State(StateHook),
    PreStep,
    PostStep,
    Diagnostic(DiagnosticLevel),
}

const REGISTRATIONS: &[(&str, BridgeCall)] = &[
    ("entry", BridgeCall::State(StateHook::Entry)),
    ("doo", BridgeCall::State(StateHook::Doo)),
    ("exit", BridgeCall::State(StateHook::Exit)),
    ("pre_step", BridgeCall::PreStep),
    ("post_step", BridgeCall::PostStep),
    ("info", BridgeCall::Diagnostic(DiagnosticLevel::Info)),
    ("warn", BridgeCall::Diagnostic(DiagnosticLevel::Warning)),
    ("err", BridgeCall::Diagnostic(DiagnosticLevel::Error)),
];

/// Back-reference from a runtime to the machine that owns it.
struct BridgeOwner(Rc<MachineShared>);

pub struct NativeBridge;

impl NativeBridge {
    /// Builds the bridge table in `lua` and attaches `owner` to it.
    pub(crate) fn register(lua: &Lua, owner: Rc<MachineShared>) -> mlua::Result<()> {
        if lua.set_app_data(BridgeOwner(owner)).is_some() {
            tracing::warn!("bridge owner replaced in existing context");
        }
        let table = lua.create_table()?;
        table.set("version", BRIDGE_VERSION)?;
        for &(name, call) in REGISTRATIONS {
            let func = lua.create_function(move |lua, args: Variadic<Value>| {
                dispatch(lua, name, call, &args);
                Ok(())
            })?;
            table.set(name, func)?;
        }
        lua.set_named_registry_value(crate::context::BRIDGE_KEY, table.clone())?;
        lua.globals().set(BRIDGE_GLOBAL, table)?;
        Ok(())
    }
}

fn dispatch(lua: &Lua, name: &str, call: BridgeCall, args: &[Value]) {
    let Some(owner) = lua.app_data_ref::<BridgeOwner>().map(|o| o.0.clone()) else {
        tracing::error!(function = name, "bridge called without an owning machine");
        return;
    };
    let model = LiveModel::new(lua, &owner);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match call {
        BridgeCall::State(hook) => match marshal::single_string(args) {
            Ok(state) => owner.dispatch_state(hook, &state, &model),
            Err(reason) => {
                tracing::error!(function = name, %reason, "malformed bridge call ignored")
            }
        },
        BridgeCall::PreStep => owner.pre_step(&model),
        BridgeCall::PostStep => owner.post_step(&model),
        BridgeCall::Diagnostic(level) => owner.diagnostic(level, &marshal::message_text(args)),
    }));
    if outcome.is_err() {
        tracing::error!(function = name, "host callback panicked; call ignored");
    }
}
