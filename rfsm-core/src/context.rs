//! The embedded runtime and typed access to the live model inside it.
//!
//! A [`RuntimeContext`] owns one Lua state with the FSM library and the
//! introspection chunk installed. It moves through
//! `Created -> DefinitionLoaded -> Initialized` and is released by
//! [`RuntimeContext::destroy`] (or on drop). Everything the host asks of the
//! live model goes through [`LiveModel`]: there are no string commands.

use crate::bridge::NativeBridge;
use crate::error::{lua_message, InitError, LoadError, MachineError, QueryError};
use crate::library::{LibrarySource, INTROSPECTION_CHUNK, LIBRARY_MODULE};
use crate::machine::MachineShared;
use crate::naming;
use mlua::{Function, Lua, LuaOptions, MultiValue, StdLib, Table, Value, Variadic};
use std::path::Path;
use std::rc::Rc;

const LIBRARY_KEY: &str = "rfsm.host.library";
const QUERY_KEY: &str = "rfsm.host.query";
const MODEL_KEY: &str = "rfsm.host.model";
const FSM_KEY: &str = "rfsm.host.fsm";
pub(crate) const BRIDGE_KEY: &str = "rfsm.host.bridge";

/// Lifecycle position of a [`RuntimeContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Created,
    DefinitionLoaded,
    Initialized,
    Destroyed,
}

/// One embedded runtime instance.
pub struct RuntimeContext {
    lua: Option<Lua>,
    library: LibrarySource,
    phase: Phase,
    search_paths: Vec<String>,
}

impl RuntimeContext {
    /// Allocates the runtime and installs the FSM library from the first
    /// available source of `library`'s fallback chain. The library is exposed
    /// to definitions as the global `rfsm` and through `require 'rfsm'`.
    pub fn create(library: &LibrarySource) -> Result<Self, InitError> {
        let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::default())
            .map_err(|e| InitError::AllocationFailed(lua_message(&e)))?;
        let used = Self::install(&lua, library)?;
        tracing::debug!(library = %used, "runtime context created");
        Ok(Self {
            lua: Some(lua),
            library: used,
            phase: Phase::Created,
            search_paths: Vec::new(),
        })
    }

    fn install(lua: &Lua, library: &LibrarySource) -> Result<LibrarySource, InitError> {
        let (table, used) = library.install(lua)?;
        let failed = |e: mlua::Error| InitError::LibraryLoadFailed {
            origin: used.to_string(),
            reason: lua_message(&e),
        };
        let query: Table = lua
            .load(INTROSPECTION_CHUNK)
            .set_name("=introspect")
            .call::<_, Table>(table.clone())
            .map_err(failed)?;
        let loaded: Table = lua
            .globals()
            .get::<_, Table>("package")
            .and_then(|package| package.get::<_, Table>("loaded"))
            .map_err(failed)?;
        loaded.set(LIBRARY_MODULE, table.clone()).map_err(failed)?;
        lua.globals().set(LIBRARY_MODULE, table.clone()).map_err(failed)?;
        lua.set_named_registry_value(LIBRARY_KEY, table).map_err(failed)?;
        lua.set_named_registry_value(QUERY_KEY, query).map_err(failed)?;
        Ok(used)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Source that provided the FSM library.
    pub fn library_source(&self) -> &LibrarySource {
        &self.library
    }

    /// Patterns appended to the module search path so far.
    pub fn search_paths(&self) -> &[String] {
        &self.search_paths
    }

    /// Appends a module search pattern. A directory is turned into
    /// `<dir>/?.lua`. Only allowed before a definition is loaded.
    pub fn set_search_path(&mut self, path: &str) -> Result<(), InitError> {
        let failed = |reason: String| InitError::SearchPath {
            path: path.to_string(),
            reason,
        };
        if self.phase != Phase::Created {
            return Err(failed("definition already loaded".to_string()));
        }
        let lua = self.lua.as_ref().ok_or(InitError::Destroyed)?;
        let pattern = if path.contains('?') {
            path.to_string()
        } else {
            Path::new(path).join("?.lua").display().to_string()
        };
        let package: Table = lua
            .globals()
            .get("package")
            .map_err(|e| failed(lua_message(&e)))?;
        let current: String = package.get("path").map_err(|e| failed(lua_message(&e)))?;
        package
            .set("path", format!("{current};{pattern}"))
            .map_err(|e| failed(lua_message(&e)))?;
        tracing::debug!(pattern = %pattern, "search path extended");
        self.search_paths.push(pattern);
        Ok(())
    }

    /// Parses and evaluates a definition file, keeping the returned model.
    pub fn load_definition(&mut self, path: &Path) -> Result<(), LoadError> {
        std::fs::metadata(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if self.phase != Phase::Created {
            return Err(LoadError::ParseError(
                "a definition is already loaded in this context".to_string(),
            ));
        }
        let lua = self.lua.as_ref().ok_or(LoadError::NotLoaded)?;
        let parse = |e: mlua::Error| LoadError::ParseError(lua_message(&e));
        let library: Table = lua.named_registry_value(LIBRARY_KEY).map_err(parse)?;
        let load: Function = library.get("load").map_err(parse)?;
        let model: Table = load
            .call::<_, Table>(path.to_string_lossy().into_owned())
            .map_err(parse)?;
        lua.set_named_registry_value(MODEL_KEY, model).map_err(parse)?;
        self.phase = Phase::DefinitionLoaded;
        tracing::debug!(path = %path.display(), "definition loaded");
        Ok(())
    }

    /// Installs the host bridge table, owned by `shared`.
    pub(crate) fn register_bridge(&self, shared: Rc<MachineShared>) -> Result<(), InitError> {
        let lua = self.lua.as_ref().ok_or(InitError::Destroyed)?;
        NativeBridge::register(lua, shared)
            .map_err(|e| InitError::BridgeRegistration(lua_message(&e)))
    }

    /// Routes the model's diagnostic hooks and runs the library's `init`.
    ///
    /// With `verbose` off, `info` and `warn` are silenced inside the model;
    /// `err` is always routed to the bridge when one is registered.
    pub fn initialize(&mut self, verbose: bool) -> Result<(), InitError> {
        if self.phase != Phase::DefinitionLoaded {
            return Err(InitError::InvalidModel(
                "no definition loaded in this context".to_string(),
            ));
        }
        let lua = self.lua.as_ref().ok_or(InitError::Destroyed)?;
        let invalid = |e: mlua::Error| InitError::InvalidModel(lua_message(&e));

        let model: Table = lua.named_registry_value(MODEL_KEY).map_err(invalid)?;
        let bridge: Option<Table> = lua.named_registry_value(BRIDGE_KEY).map_err(invalid)?;
        let silent = lua
            .create_function(|_, _: Variadic<Value>| Ok(()))
            .map_err(invalid)?;
        for hook in ["info", "warn"] {
            match (&bridge, verbose) {
                (Some(bridge), true) => {
                    let routed: Function = bridge.get(hook).map_err(invalid)?;
                    model.set(hook, routed).map_err(invalid)?;
                }
                (None, true) => {}
                (_, false) => model.set(hook, silent.clone()).map_err(invalid)?,
            }
        }
        if let Some(bridge) = &bridge {
            let routed: Function = bridge.get("err").map_err(invalid)?;
            model.set("err", routed).map_err(invalid)?;
        }

        let library: Table = lua.named_registry_value(LIBRARY_KEY).map_err(invalid)?;
        let init: Function = library.get("init").map_err(invalid)?;
        let fsm: Table = init.call::<_, Table>(model).map_err(invalid)?;
        lua.set_named_registry_value(FSM_KEY, fsm).map_err(invalid)?;
        self.phase = Phase::Initialized;
        Ok(())
    }

    /// Releases the runtime. Calling it again is a no-op.
    pub fn destroy(&mut self) {
        if self.lua.take().is_some() {
            tracing::debug!("runtime context destroyed");
        }
        self.phase = Phase::Destroyed;
    }

    fn initialized(&self) -> Result<&Lua, MachineError> {
        match (&self.lua, self.phase) {
            (Some(lua), Phase::Initialized) => Ok(lua),
            _ => Err(MachineError::NotLoaded),
        }
    }

    fn call_library(&self, name: &str, extra: Option<u32>) -> Result<(), MachineError> {
        let lua = self.initialized()?;
        let library: Table = lua.named_registry_value(LIBRARY_KEY).map_err(fault)?;
        let fsm: Table = lua.named_registry_value(FSM_KEY).map_err(fault)?;
        let func: Function = library.get(name).map_err(fault)?;
        match extra {
            Some(n) => func.call::<_, ()>((fsm, n)).map_err(fault),
            None => func.call::<_, ()>(fsm).map_err(fault),
        }
    }

    /// Runs the machine until it is idle.
    pub fn run(&self) -> Result<(), MachineError> {
        self.call_library("run", None)
    }

    /// Performs exactly `n` steps.
    pub fn step(&self, n: u32) -> Result<(), MachineError> {
        self.call_library("step", Some(n))
    }

    /// Executes a Lua chunk inside the live context.
    pub fn exec_chunk(&self, source: &str) -> Result<(), MachineError> {
        let lua = self.initialized()?;
        lua.load(source).set_name("=chunk").exec().map_err(fault)
    }

    /// Executes a Lua file inside the live context.
    pub fn exec_file(&self, path: &Path) -> Result<(), MachineError> {
        let lua = self.initialized()?;
        let source = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        lua.load(source.as_str())
            .set_name(format!("@{}", path.display()))
            .exec()
            .map_err(fault)
    }

    /// Typed access to the initialized model.
    pub(crate) fn live<'a>(&'a self, shared: &'a MachineShared) -> Result<LiveModel<'a>, MachineError> {
        let lua = self.initialized()?;
        Ok(LiveModel::new(lua, shared))
    }
}

impl Drop for RuntimeContext {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("phase", &self.phase)
            .field("library", &self.library)
            .field("search_paths", &self.search_paths)
            .finish()
    }
}

fn fault(e: mlua::Error) -> MachineError {
    MachineError::RuntimeFault(lua_message(&e))
}

/// Request/response interface to a live model.
///
/// Handed to state callbacks and observers while a step is running. It can
/// query the machine and queue events; loading and closing are not reachable
/// from here.
pub struct LiveModel<'lua> {
    lua: &'lua Lua,
    shared: &'lua MachineShared,
}

impl<'lua> LiveModel<'lua> {
    pub(crate) fn new(lua: &'lua Lua, shared: &'lua MachineShared) -> Self {
        Self { lua, shared }
    }

    fn registry_table(&self, key: &str) -> Result<Table<'lua>, QueryError> {
        match self.lua.named_registry_value::<Value>(key) {
            Ok(Value::Table(table)) => Ok(table),
            Ok(_) => Err(QueryError::Lua("machine is not initialized".to_string())),
            Err(e) => Err(QueryError::Lua(lua_message(&e))),
        }
    }

    pub(crate) fn fsm(&self) -> Result<Table<'lua>, QueryError> {
        self.registry_table(FSM_KEY)
    }

    /// Looks up an introspection function by name.
    pub(crate) fn hook(&self, name: &'static str) -> Result<Function<'lua>, QueryError> {
        let query = self.registry_table(QUERY_KEY)?;
        match query.get::<_, Value>(name) {
            Ok(Value::Function(f)) => Ok(f),
            Ok(_) => Err(QueryError::MissingIntrospectionHook(name)),
            Err(e) => Err(QueryError::Lua(lua_message(&e))),
        }
    }

    fn bridge(&self) -> Result<Table<'lua>, QueryError> {
        self.registry_table(BRIDGE_KEY)
    }

    /// Active leaf in host form, or `<none>`.
    pub fn current_state(&self) -> Result<String, QueryError> {
        let fqn: String = self
            .hook("current_state")?
            .call::<_, String>(self.fsm()?)
            .map_err(|e| QueryError::Lua(lua_message(&e)))?;
        if fqn == naming::NO_STATE {
            return Ok(fqn);
        }
        Ok(naming::normalize(&fqn).to_string())
    }

    /// Copy of the pending events in FIFO order. Does not pull external
    /// event sources.
    pub fn event_queue(&self) -> Result<Vec<String>, QueryError> {
        self.hook("event_queue")?
            .call::<_, Vec<String>>(self.fsm()?)
            .map_err(|e| QueryError::Lua(lua_message(&e)))
    }

    /// All trigger names referenced by transitions, sorted, raw form.
    pub(crate) fn all_events(&self) -> Result<Vec<String>, QueryError> {
        self.hook("all_events")?
            .call::<_, Vec<String>>(self.fsm()?)
            .map_err(|e| QueryError::Lua(lua_message(&e)))
    }

    /// True when the definition's transitions reference `name`.
    pub fn is_known_event(&self, name: &str) -> bool {
        self.shared.is_known_event(name)
    }

    pub fn send_event(&self, name: &str) -> Result<(), MachineError> {
        self.send_events([name])
    }

    /// Appends events to the queue in order. Unknown names are queued anyway
    /// with a warning.
    pub fn send_events<I, S>(&self, names: I) -> Result<(), MachineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fsm = self.fsm()?;
        let library = self.registry_table(LIBRARY_KEY)?;
        let send: Function = library.get("send_events").map_err(fault)?;
        let mut args = vec![Value::Table(fsm)];
        for name in names {
            let name = name.as_ref();
            if !self.is_known_event(name) {
                tracing::warn!(event = %name, "event is not used by any transition");
            }
            args.push(Value::String(self.lua.create_string(name).map_err(fault)?));
        }
        if args.len() == 1 {
            return Ok(());
        }
        send.call::<_, ()>(MultiValue::from_vec(args)).map_err(fault)
    }

    /// Chains the bridge after the state's own entry/doo/exit hooks.
    ///
    /// Returns false when `name` is not a non-root state of the model.
    pub(crate) fn install_callbacks(&self, name: &str) -> Result<bool, QueryError> {
        let bridge = self.bridge()?;
        self.hook("install_callbacks")?
            .call::<_, bool>((self.fsm()?, name, name, bridge))
            .map_err(|e| QueryError::Lua(lua_message(&e)))
    }

    /// Restores the hooks the state had before [`Self::install_callbacks`].
    /// Returns false when nothing was installed on `name`.
    pub(crate) fn remove_callbacks(&self, name: &str) -> Result<bool, QueryError> {
        self.hook("remove_callbacks")?
            .call::<_, bool>((self.fsm()?, name))
            .map_err(|e| QueryError::Lua(lua_message(&e)))
    }

    /// Adds the bridge's pre- or post-step trampoline to the machine's hook
    /// list. Returns false if it was already present.
    pub(crate) fn enable_step_hook(&self, post: bool) -> Result<bool, QueryError> {
        let (hook, field) = if post {
            ("enable_post_step", "post_step")
        } else {
            ("enable_pre_step", "pre_step")
        };
        let trampoline: Function = self
            .bridge()?
            .get(field)
            .map_err(|e| QueryError::Lua(lua_message(&e)))?;
        self.hook(hook)?
            .call::<_, bool>((self.fsm()?, trampoline))
            .map_err(|e| QueryError::Lua(lua_message(&e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn definition(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".lua").tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    const TWO_STATES: &str = r#"
        return rfsm.state {
            A = rfsm.state {},
            B = rfsm.state {},
            rfsm.trans { src = 'initial', tgt = 'A' },
            rfsm.trans { src = 'A', tgt = 'B', events = { 'e_go' } },
        }
    "#;

    fn context() -> RuntimeContext {
        RuntimeContext::create(&LibrarySource::Auto).unwrap()
    }

    #[test]
    fn test_lifecycle_phases() {
        let file = definition(TWO_STATES);
        let mut ctx = context();
        assert_eq!(ctx.phase(), Phase::Created);
        assert_eq!(ctx.library_source(), &LibrarySource::Embedded);

        ctx.load_definition(file.path()).unwrap();
        assert_eq!(ctx.phase(), Phase::DefinitionLoaded);
        assert!(matches!(
            ctx.set_search_path("/tmp"),
            Err(InitError::SearchPath { .. })
        ));

        ctx.initialize(false).unwrap();
        assert_eq!(ctx.phase(), Phase::Initialized);

        ctx.destroy();
        ctx.destroy();
        assert_eq!(ctx.phase(), Phase::Destroyed);
        assert!(matches!(ctx.run(), Err(MachineError::NotLoaded)));
    }

    #[test]
    fn test_search_path_pattern() {
        let mut ctx = context();
        ctx.set_search_path("/opt/machines").unwrap();
        ctx.set_search_path("/opt/lib/?.lua").unwrap();
        assert_eq!(ctx.search_paths(), ["/opt/machines/?.lua", "/opt/lib/?.lua"]);
    }

    #[test]
    fn test_definition_can_require_library() {
        let file = definition(
            r#"
            local lib = require 'rfsm'
            assert(lib == rfsm)
            return lib.state {
                A = lib.state {},
                lib.trans { src = 'initial', tgt = 'A' },
            }
        "#,
        );
        let mut ctx = context();
        ctx.load_definition(file.path()).unwrap();
        ctx.initialize(false).unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        let mut ctx = context();
        let err = ctx
            .load_definition(Path::new("/nonexistent/machine.lua"))
            .unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
        assert_eq!(ctx.phase(), Phase::Created);
    }

    #[test]
    fn test_load_syntax_error_carries_location() {
        let file = definition("return rfsm.state {\n  A = rfsm.state {},\n  = broken\n}\n");
        let mut ctx = context();
        let err = ctx.load_definition(file.path()).unwrap_err();
        let text = err.to_string();
        let diagnostic = crate::Diagnostic::parse(&text).unwrap();
        assert_eq!(diagnostic.line, 3);
        assert!(diagnostic.matches_file(file.path()));
    }

    #[test]
    fn test_initialize_rejects_dangling_target() {
        let file = definition(
            r#"
            return rfsm.state {
                A = rfsm.state {},
                rfsm.trans { src = 'initial', tgt = 'A' },
                rfsm.trans { src = 'A', tgt = 'Nowhere', events = { 'e_go' } },
            }
        "#,
        );
        let mut ctx = context();
        ctx.load_definition(file.path()).unwrap();
        let err = ctx.initialize(false).unwrap_err();
        match err {
            InitError::InvalidModel(msg) => assert!(msg.contains("Nowhere")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_initialize_without_definition() {
        let mut ctx = context();
        assert!(matches!(ctx.initialize(true), Err(InitError::InvalidModel(_))));
    }

    #[test]
    fn test_exec_requires_initialization() {
        let ctx = context();
        assert!(matches!(ctx.exec_chunk("x = 1"), Err(MachineError::NotLoaded)));
        assert!(matches!(ctx.step(1), Err(MachineError::NotLoaded)));
    }
}
