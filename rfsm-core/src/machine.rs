//! State machine driver - owns one runtime context per loaded definition.
//!
//! `StateMachine` is `Unloaded` until [`StateMachine::load`] succeeds and
//! becomes `Unloaded` again on [`StateMachine::close`] or at the start of the
//! next load. Every driving or query operation on an unloaded machine fails
//! with [`MachineError::NotLoaded`].
//!
//! Callbacks run synchronously inside `run`/`step`. They receive a
//! [`LiveModel`] and can query the machine or queue events through it, but
//! cannot reach `load` or `close`.

use crate::bridge::{DiagnosticLevel, StateHook};
use crate::callbacks::{CallbackRegistry, StateCallback};
use crate::context::{LiveModel, RuntimeContext};
use crate::error::MachineError;
use crate::extractor::StateGraphExtractor;
use crate::graph::{GraphVersion, State, StateGraph};
use crate::library::LibrarySource;
use crate::naming;
use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Step-boundary and diagnostic notifications from a running machine.
///
/// All methods default to no-ops.
pub trait MachineObserver {
    fn on_pre_step(&self, _model: &LiveModel<'_>) {}
    fn on_post_step(&self, _model: &LiveModel<'_>) {}
    fn on_info(&self, _message: &str) {}
    fn on_warning(&self, _message: &str) {}
    fn on_error(&self, _message: &str) {}
}

/// Options applied on every load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineOptions {
    /// Route the model's `info`/`warn` output and log step boundaries.
    pub verbose: bool,
    /// Module search patterns or directories, applied before the definition
    /// is loaded.
    pub search_paths: Vec<String>,
    /// Where the FSM library comes from.
    pub library: LibrarySource,
}

impl MachineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_search_path(mut self, path: impl Into<String>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    pub fn with_library(mut self, library: LibrarySource) -> Self {
        self.library = library;
        self
    }
}

/// State reachable from the bridge while the machine is running.
pub(crate) struct MachineShared {
    verbose: Cell<bool>,
    pub(crate) registry: RefCell<CallbackRegistry>,
    observer: RefCell<Option<Rc<dyn MachineObserver>>>,
    events: RefCell<Vec<String>>,
}

impl MachineShared {
    pub(crate) fn new(verbose: bool) -> Self {
        Self {
            verbose: Cell::new(verbose),
            registry: RefCell::new(CallbackRegistry::new()),
            observer: RefCell::new(None),
            events: RefCell::new(Vec::new()),
        }
    }

    fn observer(&self) -> Option<Rc<dyn MachineObserver>> {
        self.observer.borrow().clone()
    }

    pub(crate) fn is_known_event(&self, name: &str) -> bool {
        self.events.borrow().iter().any(|e| e == name)
    }

    pub(crate) fn dispatch_state(&self, hook: StateHook, state: &str, model: &LiveModel<'_>) {
        let callback = self.registry.borrow().get(state);
        let Some(callback) = callback else {
            tracing::trace!(state, hook = hook.as_str(), "no callback registered");
            return;
        };
        match hook {
            StateHook::Entry => callback.entry(model),
            StateHook::Doo => callback.doo(model),
            StateHook::Exit => callback.exit(model),
        }
    }

    pub(crate) fn pre_step(&self, model: &LiveModel<'_>) {
        match self.observer() {
            Some(observer) => observer.on_pre_step(model),
            None => self.log_step("pre-step", model),
        }
    }

    pub(crate) fn post_step(&self, model: &LiveModel<'_>) {
        match self.observer() {
            Some(observer) => observer.on_post_step(model),
            None => self.log_step("post-step", model),
        }
    }

    fn log_step(&self, boundary: &str, model: &LiveModel<'_>) {
        if !self.verbose.get() {
            return;
        }
        match model.current_state() {
            Ok(state) => tracing::debug!(%state, "{boundary}"),
            Err(e) => tracing::debug!(error = %e, "{boundary}"),
        }
    }

    pub(crate) fn diagnostic(&self, level: DiagnosticLevel, message: &str) {
        let observer = self.observer();
        match level {
            DiagnosticLevel::Info => {
                tracing::info!(target: "rfsm::model", "{message}");
                if let Some(observer) = observer {
                    observer.on_info(message);
                }
            }
            DiagnosticLevel::Warning => {
                tracing::warn!(target: "rfsm::model", "{message}");
                if let Some(observer) = observer {
                    observer.on_warning(message);
                }
            }
            DiagnosticLevel::Error => {
                tracing::error!(target: "rfsm::model", "{message}");
                if let Some(observer) = observer {
                    observer.on_error(message);
                }
            }
        }
    }
}

/// Drives one hierarchical state machine definition.
pub struct StateMachine {
    options: MachineOptions,
    file_name: Option<PathBuf>,
    shared: Rc<MachineShared>,
    graph: StateGraph,
    generation: u64,
    context: Option<RuntimeContext>,
}

impl StateMachine {
    /// Creates an unloaded machine.
    pub fn new(verbose: bool) -> Self {
        Self::with_options(MachineOptions::new().with_verbose(verbose))
    }

    pub fn with_options(options: MachineOptions) -> Self {
        Self {
            shared: Rc::new(MachineShared::new(options.verbose)),
            options,
            file_name: None,
            graph: StateGraph::default(),
            generation: 0,
            context: None,
        }
    }

    pub fn options(&self) -> &MachineOptions {
        &self.options
    }

    pub fn is_verbose(&self) -> bool {
        self.options.verbose
    }

    /// Takes effect on the next load.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.options.verbose = verbose;
        self.shared.verbose.set(verbose);
    }

    /// Appends a module search path used by subsequent loads.
    pub fn add_search_path(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.options.search_paths.contains(&path) {
            self.options.search_paths.push(path);
        }
    }

    /// Installs the step and diagnostic observer, replacing any previous one.
    pub fn set_observer<O: MachineObserver + 'static>(&self, observer: Rc<O>) {
        let observer: Rc<dyn MachineObserver> = observer;
        *self.shared.observer.borrow_mut() = Some(observer);
    }

    pub fn clear_observer(&self) {
        self.shared.observer.borrow_mut().take();
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Loads `path` into a fresh runtime context.
    ///
    /// Any previous context is closed first. On failure the machine is left
    /// unloaded. Failing to read the event list or the graph afterwards is
    /// logged but does not fail the load.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), MachineError> {
        let path = path.as_ref();
        self.close();
        self.file_name = Some(path.to_path_buf());

        let context = match self.bootstrap(path) {
            Ok(context) => context,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to load state machine");
                return Err(e);
            }
        };
        self.context = Some(context);
        self.generation += 1;

        self.refresh_events();
        self.refresh_graph(path);
        tracing::info!(
            path = %path.display(),
            states = self.graph.states.len(),
            transitions = self.graph.transitions.len(),
            "state machine loaded"
        );
        Ok(())
    }

    fn bootstrap(&self, path: &Path) -> Result<RuntimeContext, MachineError> {
        let mut context = RuntimeContext::create(&self.options.library)?;
        for search_path in &self.options.search_paths {
            context.set_search_path(search_path)?;
        }
        context.load_definition(path)?;
        context.register_bridge(self.shared.clone())?;
        context.initialize(self.options.verbose)?;

        let model = context.live(&self.shared)?;
        model.enable_step_hook(false)?;
        model.enable_step_hook(true)?;
        Ok(context)
    }

    fn refresh_events(&self) {
        let events = self
            .context
            .as_ref()
            .ok_or(MachineError::NotLoaded)
            .and_then(|context| Ok(context.live(&self.shared)?.all_events()?));
        match events {
            Ok(events) => {
                *self.shared.events.borrow_mut() = events
                    .into_iter()
                    .filter(|e| naming::is_external_event(e))
                    .collect();
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot read event list");
                self.shared.events.borrow_mut().clear();
            }
        }
    }

    fn refresh_graph(&mut self, path: &Path) {
        let graph = match &self.context {
            Some(context) => StateGraphExtractor::extract(context),
            None => Err(MachineError::NotLoaded),
        };
        self.graph = match graph {
            Ok(graph) => graph.with_version(GraphVersion {
                generation: self.generation,
                checksum: checksum(path),
            }),
            Err(e) => {
                tracing::warn!(error = %e, "cannot extract state graph");
                StateGraph::default()
            }
        };
    }

    /// Releases the runtime context, callbacks and cached graph. The file
    /// name is kept for [`StateMachine::reset`].
    pub fn close(&mut self) {
        if let Some(mut context) = self.context.take() {
            context.destroy();
            tracing::debug!("state machine closed");
        }
        self.shared.registry.borrow_mut().clear();
        self.shared.events.borrow_mut().clear();
        self.graph = StateGraph::default();
    }

    /// Closes and reloads the last definition.
    pub fn reset(&mut self) -> Result<(), MachineError> {
        let path = self.file_name.clone().ok_or(MachineError::NotLoaded)?;
        self.load(path)
    }

    pub fn is_loaded(&self) -> bool {
        self.context.is_some()
    }

    /// Path passed to the last `load`.
    pub fn file_name(&self) -> Option<&Path> {
        self.file_name.as_deref()
    }

    /// The live runtime context, if loaded.
    pub fn context(&self) -> Option<&RuntimeContext> {
        self.context.as_ref()
    }

    fn loaded(&self) -> Result<&RuntimeContext, MachineError> {
        self.context.as_ref().ok_or(MachineError::NotLoaded)
    }

    fn live(&self) -> Result<LiveModel<'_>, MachineError> {
        self.loaded()?.live(&self.shared)
    }

    // =========================================================================
    // Driving
    // =========================================================================

    /// Runs until the machine is idle.
    pub fn run(&self) -> Result<(), MachineError> {
        self.loaded()?.run().inspect_err(log_fault)
    }

    /// Performs exactly `n` steps.
    pub fn step(&self, n: u32) -> Result<(), MachineError> {
        self.loaded()?.step(n).inspect_err(log_fault)
    }

    /// Queues one event. Unknown names are queued with a warning.
    pub fn send_event(&self, name: &str) -> Result<(), MachineError> {
        self.live()?.send_event(name)
    }

    /// Queues events in order.
    pub fn send_events<I, S>(&self, names: I) -> Result<(), MachineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.live()?.send_events(names)
    }

    pub fn enable_pre_step_hook(&self) -> Result<(), MachineError> {
        self.live()?.enable_step_hook(false)?;
        Ok(())
    }

    pub fn enable_post_step_hook(&self) -> Result<(), MachineError> {
        self.live()?.enable_step_hook(true)?;
        Ok(())
    }

    /// Runs a Lua chunk in the live context.
    pub fn exec_chunk(&self, source: &str) -> Result<(), MachineError> {
        self.loaded()?.exec_chunk(source)
    }

    /// Runs a Lua file in the live context.
    pub fn exec_file(&self, path: impl AsRef<Path>) -> Result<(), MachineError> {
        self.loaded()?.exec_file(path.as_ref())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Active leaf in host form, or `<none>`.
    pub fn current_state(&self) -> Result<String, MachineError> {
        Ok(self.live()?.current_state()?)
    }

    /// Pending events, FIFO. Does not mutate the queue.
    pub fn event_queue(&self) -> Result<Vec<String>, MachineError> {
        Ok(self.live()?.event_queue()?)
    }

    /// Known external events of the loaded definition, sorted.
    pub fn events_list(&self) -> Vec<String> {
        self.shared.events.borrow().clone()
    }

    /// Snapshot taken at the last successful load.
    pub fn state_graph(&self) -> &StateGraph {
        &self.graph
    }

    /// Looks up a state of the cached graph.
    pub fn state(&self, name: &str) -> Result<&State, MachineError> {
        self.loaded()?;
        self.graph
            .state(naming::normalize(name))
            .ok_or_else(|| MachineError::UnknownState(name.to_string()))
    }

    // =========================================================================
    // Callbacks
    // =========================================================================

    /// Attaches `callback` to the state `name`.
    ///
    /// Returns `Ok(false)` without registering anything when `name` is not a
    /// non-root state of the model. Connectors never take callbacks. The
    /// registry does not own `callback`; once it is dropped, dispatch skips it.
    pub fn set_state_callback<C: StateCallback + 'static>(
        &self,
        name: &str,
        callback: &Rc<C>,
    ) -> Result<bool, MachineError> {
        let model = self.live()?;
        let name = naming::normalize(name);
        if name.is_empty() || name == naming::ROOT {
            return Ok(false);
        }
        if !model.install_callbacks(name)? {
            tracing::warn!(state = name, "cannot attach callback: no such state");
            return Ok(false);
        }
        self.shared.registry.borrow_mut().insert(name, callback);
        Ok(true)
    }

    /// Detaches the callback of `name` and restores the state's own hooks.
    pub fn clear_state_callback(&self, name: &str) -> bool {
        let name = naming::normalize(name);
        let removed = self.shared.registry.borrow_mut().remove(name);
        if let Ok(model) = self.live() {
            if let Err(e) = model.remove_callbacks(name) {
                tracing::warn!(state = name, error = %e, "cannot restore state hooks");
            }
        }
        removed
    }

    /// Attaches `callback` to every state of the graph that accepts callbacks.
    /// Returns how many states were attached.
    pub fn install_default_callbacks<C: StateCallback + 'static>(
        &self,
        callback: &Rc<C>,
    ) -> Result<usize, MachineError> {
        self.loaded()?;
        let mut installed = 0;
        for state in self.graph.states.iter().filter(|s| s.accepts_callbacks()) {
            if self.set_state_callback(&state.name, callback)? {
                installed += 1;
            }
        }
        Ok(installed)
    }

    /// States that currently have a live callback.
    pub fn callback_states(&self) -> Vec<String> {
        let registry = self.shared.registry.borrow();
        registry
            .states()
            .into_iter()
            .filter(|s| registry.contains(s))
            .map(str::to_string)
            .collect()
    }
}

impl Drop for StateMachine {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("file_name", &self.file_name)
            .field("loaded", &self.is_loaded())
            .field("version", &self.graph.version)
            .finish()
    }
}

fn log_fault(e: &MachineError) {
    tracing::error!(error = %e, "runtime fault");
}

fn checksum(path: &Path) -> u32 {
    match std::fs::read(path) {
        Ok(bytes) => crc32c::crc32c(&bytes),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot checksum definition");
            0
        }
    }
}
