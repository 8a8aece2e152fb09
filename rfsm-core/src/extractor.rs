//! Builds a [`StateGraph`] from a live model.

use crate::context::{LiveModel, RuntimeContext};
use crate::error::{lua_message, MachineError, QueryError};
use crate::graph::StateGraph;
use crate::machine::MachineShared;
use crate::marshal;
use mlua::Value;

pub struct StateGraphExtractor;

impl StateGraphExtractor {
    /// Queries every non-root state and every transition of the initialized
    /// machine in `context`.
    ///
    /// Records that cannot be converted are skipped with a warning. A missing
    /// introspection hook or a failing query is an error.
    pub fn extract(context: &RuntimeContext) -> Result<StateGraph, MachineError> {
        let shared = MachineShared::new(false);
        let model = context.live(&shared)?;
        Ok(Self::extract_live(&model)?)
    }

    pub(crate) fn extract_live(model: &LiveModel<'_>) -> Result<StateGraph, QueryError> {
        let states = Self::records(model, "all_states", "state", marshal::state_record)?;
        let transitions =
            Self::records(model, "all_transitions", "transition", marshal::transition_record)?;
        Ok(StateGraph::new(states, transitions))
    }

    fn records<T>(
        model: &LiveModel<'_>,
        hook: &'static str,
        kind: &'static str,
        convert: impl Fn(Value<'_>) -> Result<T, String>,
    ) -> Result<Vec<T>, QueryError> {
        let fsm = model.fsm()?;
        let list: Vec<Value> = model
            .hook(hook)?
            .call::<_, Vec<Value>>(fsm)
            .map_err(|e| QueryError::Lua(lua_message(&e)))?;
        let mut out = Vec::with_capacity(list.len());
        for (index, value) in list.into_iter().enumerate() {
            match convert(value) {
                Ok(record) => out.push(record),
                Err(reason) => {
                    let err = QueryError::MalformedRecord {
                        kind,
                        index: index + 1,
                        reason,
                    };
                    tracing::warn!(error = %err, "record skipped");
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{StateKind, TransitionTarget};
    use crate::library::LibrarySource;
    use std::io::Write;

    fn initialized(body: &str) -> (RuntimeContext, tempfile::NamedTempFile) {
        let mut file = tempfile::Builder::new().suffix(".lua").tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        let mut ctx = RuntimeContext::create(&LibrarySource::Auto).unwrap();
        ctx.load_definition(file.path()).unwrap();
        ctx.initialize(false).unwrap();
        (ctx, file)
    }

    #[test]
    fn test_extract_nested_graph() {
        let (ctx, _file) = initialized(
            r#"
            return rfsm.state {
                Door = rfsm.state {
                    Closed = rfsm.state { entry = function() end },
                    Open = rfsm.state { doo = function() end, exit = function() end },
                    rfsm.trans { src = 'initial', tgt = 'Closed' },
                    rfsm.trans { src = 'Closed', tgt = 'Open', events = { 'e_open' }, pn = 2 },
                    rfsm.trans { src = 'Open', tgt = 'Closed', events = { 'e_close' } },
                },
                rfsm.trans { src = 'initial', tgt = 'Door' },
                rfsm.trans { src = 'Door', tgt = 'internal', events = { 'e_ping' } },
            }
        "#,
        );
        let graph = StateGraphExtractor::extract(&ctx).unwrap();

        let names: Vec<_> = graph.states.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Door", "Door.Closed", "Door.Open", "Door.initial", "initial"]
        );
        assert!(!graph.contains_state("root"));
        assert_eq!(graph.state("Door").unwrap().kind, StateKind::Composite);
        assert_eq!(graph.state("initial").unwrap().kind, StateKind::Connector);

        let closed = graph.state("Door.Closed").unwrap();
        assert_eq!(closed.kind, StateKind::Leaf);
        assert!(closed.has_entry && !closed.has_doo && !closed.has_exit);
        let open = graph.state("Door.Open").unwrap();
        assert!(!open.has_entry && open.has_doo && open.has_exit);

        assert_eq!(graph.transitions.len(), 5);
        assert!(graph.dangling_transitions().is_empty());
        let open_edge = graph.transitions_from("Door.Closed").next().unwrap();
        assert_eq!(open_edge.target, TransitionTarget::State("Door.Open".into()));
        assert_eq!(open_edge.priority, Some(2));
        let internal = graph.transitions_from("Door").next().unwrap();
        assert!(internal.is_internal());
        assert_eq!(internal.events, vec!["e_ping"]);
    }

    #[test]
    fn test_extract_is_deterministic() {
        let (ctx, _file) = initialized(
            r#"
            return rfsm.state {
                Z = rfsm.state {}, M = rfsm.state {}, A = rfsm.state {},
                rfsm.trans { src = 'initial', tgt = 'M' },
                rfsm.trans { src = 'M', tgt = 'Z', events = { 'e_z' } },
                rfsm.trans { src = 'M', tgt = 'A', events = { 'e_a' } },
            }
        "#,
        );
        let first = StateGraphExtractor::extract(&ctx).unwrap();
        let second = StateGraphExtractor::extract(&ctx).unwrap();
        assert_eq!(first, second);
        let targets: Vec<_> = first
            .transitions_from("M")
            .filter_map(|t| t.target_name())
            .collect();
        assert_eq!(targets, vec!["Z", "A"]);
    }

    #[test]
    fn test_missing_introspection_hook() {
        let (ctx, _file) = initialized(
            r#"
            return rfsm.state {
                A = rfsm.state {},
                rfsm.trans { src = 'initial', tgt = 'A' },
            }
        "#,
        );
        let shared = MachineShared::new(false);
        let model = ctx.live(&shared).unwrap();
        assert!(matches!(
            model.hook("no_such_query"),
            Err(QueryError::MissingIntrospectionHook("no_such_query"))
        ));
    }

    #[cfg(feature = "embedded-library")]
    #[test]
    fn test_malformed_records_are_skipped() {
        // Bundled library whose traversal reports a nameless node first.
        let patched = format!(
            "local M = (function()\n{}\nend)()\n{}",
            crate::library::EMBEDDED_LIBRARY,
            r#"
            local mapfsm = M.mapfsm
            function M.mapfsm(func, fsm, pred)
               local res = {}
               if pred == M.is_node then res[1] = func({ _rfsm_type = 'state' }, fsm) end
               for _, r in ipairs(mapfsm(func, fsm, pred)) do res[#res + 1] = r end
               return res
            end
            return M
            "#
        );
        let dir = tempfile::tempdir().unwrap();
        let library = dir.path().join("rfsm.lua");
        std::fs::write(&library, patched).unwrap();
        let definition = dir.path().join("machine.lua");
        std::fs::write(
            &definition,
            r#"
            return rfsm.state {
                A = rfsm.state {},
                B = rfsm.state {},
                rfsm.trans { src = 'initial', tgt = 'A' },
                rfsm.trans { src = 'A', tgt = 'B', events = { 'e1' } },
            }
        "#,
        )
        .unwrap();

        let mut ctx = RuntimeContext::create(&LibrarySource::External(library)).unwrap();
        assert!(matches!(ctx.library_source(), LibrarySource::External(_)));
        ctx.load_definition(&definition).unwrap();
        ctx.initialize(false).unwrap();

        let graph = StateGraphExtractor::extract(&ctx).unwrap();
        let names: Vec<_> = graph.states.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "initial"]);
        assert_eq!(graph.transitions.len(), 2);
    }

    #[test]
    fn test_library_without_traversal_api() {
        let dir = tempfile::tempdir().unwrap();
        let library = dir.path().join("rfsm.lua");
        std::fs::write(
            &library,
            r#"
            local M = {}
            function M.state(t) return t end
            function M.load(f) return dofile(f) end
            function M.init(m) m._intq = {} return m end
            function M.send_events(fsm, ...) end
            return M
        "#,
        )
        .unwrap();
        let definition = dir.path().join("machine.lua");
        std::fs::write(&definition, "return rfsm.state {}").unwrap();

        let mut ctx = RuntimeContext::create(&LibrarySource::External(library)).unwrap();
        ctx.load_definition(&definition).unwrap();
        ctx.initialize(false).unwrap();
        let err = StateGraphExtractor::extract(&ctx).unwrap_err();
        assert!(matches!(
            err,
            MachineError::Query(QueryError::MissingIntrospectionHook("all_states"))
        ));
    }
}
