//! Names crossing the boundary between the host and the embedded model.
//!
//! The embedded library qualifies every node with the implicit `root.` prefix.
//! Host-facing names never carry it. All conversions go through [`normalize`]
//! and [`qualify`] so that the stripping rule lives in exactly one place.

/// Name of the implicit top-level state.
pub const ROOT: &str = "root";

/// Sentinel returned when no state is active.
pub const NO_STATE: &str = "<none>";

/// Event the library uses to enter the initial configuration.
pub const INIT_EVENT: &str = "e_init_fsm";

/// Display label for every completion event.
pub const COMPLETION_EVENT: &str = "e_done";

/// Target marker of transitions that do not leave their source state.
pub const INTERNAL_TARGET: &str = "internal";

const ROOT_PREFIX: &str = "root.";
const COMPLETION_MARKER: &str = "e_done@";

/// Strips a single leading `root.` from a fully qualified name.
///
/// Only the leading occurrence is removed: `root.A.root.B` becomes `A.root.B`.
/// Names without the prefix are returned unchanged.
pub fn normalize(fqn: &str) -> &str {
    fqn.strip_prefix(ROOT_PREFIX).unwrap_or(fqn)
}

/// Inverse of [`normalize`]: builds the fully qualified name of a host name.
pub fn qualify(name: &str) -> String {
    format!("{ROOT_PREFIX}{name}")
}

/// Returns true for the library's initialization event.
pub fn is_init_event(event: &str) -> bool {
    event == INIT_EVENT
}

/// Returns true for completion events (`e_done@<fqn>`).
pub fn is_completion_event(event: &str) -> bool {
    event.starts_with(COMPLETION_MARKER)
}

/// Returns the normalized state a completion event belongs to.
pub fn completion_source(event: &str) -> Option<&str> {
    event.strip_prefix(COMPLETION_MARKER).map(normalize)
}

/// True for events a user can meaningfully send: neither the init event nor a
/// completion event.
pub fn is_external_event(event: &str) -> bool {
    !is_init_event(event) && !is_completion_event(event)
}

/// Collapses every `e_done@<fqn>` to `e_done`; other names pass through.
pub fn display_event_name(event: &str) -> &str {
    if is_completion_event(event) {
        COMPLETION_EVENT
    } else {
        event
    }
}
