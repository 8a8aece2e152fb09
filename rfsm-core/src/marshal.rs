//! Conversions between embedded-runtime values and host records.
//!
//! Every name read from the model passes through [`naming::normalize`] here,
//! so callers only ever see host-form names.

use crate::graph::{State, StateKind, Transition, TransitionTarget};
use crate::naming;
use mlua::{Table, Value};

/// Extracts a string, refusing numbers and other coercible values.
pub fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => s.to_str().ok().map(str::to_owned),
        _ => None,
    }
}

/// Reads a boolean field; absent means false.
pub fn as_bool(value: &Value) -> Result<bool, String> {
    match value {
        Value::Boolean(b) => Ok(*b),
        Value::Nil => Ok(false),
        other => Err(format!("expected boolean, got {}", other.type_name())),
    }
}

/// Reads an optional integral number.
pub fn as_i64(value: &Value) -> Result<Option<i64>, String> {
    match value {
        Value::Nil => Ok(None),
        Value::Integer(i) => Ok(Some(*i)),
        Value::Number(n) if n.fract() == 0.0 && n.is_finite() => Ok(Some(*n as i64)),
        other => Err(format!("expected integer, got {}", other.type_name())),
    }
}

/// Reads a sequence of strings in order. `nil` is an empty list.
pub fn string_list(value: &Value) -> Result<Vec<String>, String> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::Table(table) => table
            .clone()
            .sequence_values::<Value>()
            .enumerate()
            .map(|(i, item)| {
                let item = item.map_err(|e| e.to_string())?;
                as_string(&item).ok_or_else(|| format!("entry #{} is {}", i + 1, item.type_name()))
            })
            .collect(),
        other => Err(format!("expected list, got {}", other.type_name())),
    }
}

/// Validates the arguments of a bridge call that carries one state name.
pub fn single_string(args: &[Value]) -> Result<String, String> {
    match args {
        [value] => as_string(value).ok_or_else(|| format!("expected string, got {}", value.type_name())),
        _ => Err(format!("expected 1 argument, got {}", args.len())),
    }
}

/// Joins diagnostic arguments the way `print` would.
pub fn message_text(args: &[Value]) -> String {
    args.iter()
        .map(|value| match value {
            Value::String(s) => s.to_string_lossy().into_owned(),
            Value::Nil => "nil".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Number(n) => n.to_string(),
            other => format!("<{}>", other.type_name()),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn field<'lua>(table: &Table<'lua>, key: &str) -> Result<Value<'lua>, String> {
    table.get::<_, Value>(key).map_err(|e| e.to_string())
}

fn record(value: Value<'_>) -> Result<Table<'_>, String> {
    match value {
        Value::Table(table) => Ok(table),
        other => Err(format!("expected table, got {}", other.type_name())),
    }
}

/// Converts a `{name, kind, entry, doo, exit}` table into a [`State`].
pub fn state_record(value: Value<'_>) -> Result<State, String> {
    let table = record(value)?;
    let name = as_string(&field(&table, "name")?).ok_or("missing name")?;
    let kind = as_string(&field(&table, "kind")?)
        .map(|tag| StateKind::from_tag(&tag))
        .unwrap_or(StateKind::Unknown);
    Ok(State {
        name: naming::normalize(&name).to_string(),
        kind,
        has_entry: as_bool(&field(&table, "entry")?)?,
        has_doo: as_bool(&field(&table, "doo")?)?,
        has_exit: as_bool(&field(&table, "exit")?)?,
    })
}

/// Converts a `{source, target, internal, events, priority}` table into a
/// [`Transition`].
pub fn transition_record(value: Value<'_>) -> Result<Transition, String> {
    let table = record(value)?;
    let source = as_string(&field(&table, "source")?).ok_or("missing source")?;
    let internal = as_bool(&field(&table, "internal")?)?;
    let target = if internal {
        TransitionTarget::Internal
    } else {
        let name = as_string(&field(&table, "target")?).ok_or("missing target")?;
        TransitionTarget::State(naming::normalize(&name).to_string())
    };
    Ok(Transition {
        source: naming::normalize(&source).to_string(),
        target,
        events: string_list(&field(&table, "events")?)?,
        priority: as_i64(&field(&table, "priority")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlua::Lua;

    #[test]
    fn test_state_record() {
        let lua = Lua::new();
        let value: Value = lua
            .load("return { name = 'root.A.b', kind = 'leaf', entry = true }")
            .eval()
            .unwrap();
        let state = state_record(value).unwrap();
        assert_eq!(state.name, "A.b");
        assert_eq!(state.kind, StateKind::Leaf);
        assert!(state.has_entry);
        assert!(!state.has_doo);
        assert!(!state.has_exit);
    }

    #[test]
    fn test_transition_record() {
        let lua = Lua::new();
        let value: Value = lua
            .load("return { source = 'root.A', target = 'root.B', events = { 'e_go', 'e_done@root.A' }, priority = 2 }")
            .eval()
            .unwrap();
        let t = transition_record(value).unwrap();
        assert_eq!(t.source, "A");
        assert_eq!(t.target, TransitionTarget::State("B".into()));
        assert_eq!(t.events, vec!["e_go", "e_done@root.A"]);
        assert_eq!(t.priority, Some(2));

        let value: Value = lua
            .load("return { source = 'root.A', internal = true }")
            .eval()
            .unwrap();
        let t = transition_record(value).unwrap();
        assert!(t.is_internal());
        assert!(t.events.is_empty());
    }

    #[test]
    fn test_malformed_records() {
        let lua = Lua::new();
        let value: Value = lua.load("return { kind = 'leaf' }").eval().unwrap();
        assert!(state_record(value).is_err());

        let value: Value = lua
            .load("return { source = 'root.A', target = 'root.B', events = { 1 } }")
            .eval()
            .unwrap();
        assert!(transition_record(value).unwrap_err().contains("entry #1"));

        assert!(state_record(Value::Boolean(true)).is_err());
    }

    #[test]
    fn test_bridge_arguments() {
        let lua = Lua::new();
        let name = Value::String(lua.create_string("A").unwrap());
        assert_eq!(single_string(&[name.clone()]).unwrap(), "A");
        assert!(single_string(&[]).is_err());
        assert!(single_string(&[Value::Integer(3)]).is_err());
        assert!(single_string(&[name.clone(), name.clone()]).is_err());
        assert_eq!(message_text(&[name, Value::Integer(2), Value::Nil]), "A 2 nil");
    }
}
