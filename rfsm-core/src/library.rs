//! Locating the FSM library installed into every runtime context.
//!
//! Sources are tried in a fixed order: an external file (when configured and
//! present), the blob compiled into this crate, then `require 'rfsm'` over the
//! runtime's search path. The first source that is found wins; a source that
//! is found but fails to load is an error and does not fall through.

use crate::error::{lua_message, InitError};
use mlua::{Function, Lua, Table};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Library blob compiled into the crate.
#[cfg(feature = "embedded-library")]
pub const EMBEDDED_LIBRARY: &str = include_str!("../lua/rfsm.lua");

/// Query chunk installed next to the library in every context.
pub(crate) const INTROSPECTION_CHUNK: &str = include_str!("../lua/introspect.lua");

/// Module name used for search-path lookup.
pub const LIBRARY_MODULE: &str = "rfsm";

/// Where the FSM library comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "path")]
pub enum LibrarySource {
    /// Walk the whole fallback chain.
    #[default]
    Auto,
    /// A library file on disk. Falls back to the later sources when missing.
    External(PathBuf),
    /// The blob compiled into this crate.
    Embedded,
    /// `require 'rfsm'` over the runtime search path.
    SearchPath,
}

impl LibrarySource {
    /// Candidates to try, in order, starting from this source.
    pub fn candidates(&self) -> Vec<LibrarySource> {
        let mut out = Vec::with_capacity(3);
        match self {
            LibrarySource::Auto => {}
            LibrarySource::External(path) => out.push(LibrarySource::External(path.clone())),
            LibrarySource::Embedded => {}
            LibrarySource::SearchPath => {
                out.push(LibrarySource::SearchPath);
                return out;
            }
        }
        if cfg!(feature = "embedded-library") {
            out.push(LibrarySource::Embedded);
        }
        out.push(LibrarySource::SearchPath);
        out
    }

    /// Loads the library table into `lua` using the first available candidate.
    ///
    /// Returns the table together with the source that provided it.
    pub(crate) fn install<'lua>(
        &self,
        lua: &'lua Lua,
    ) -> Result<(Table<'lua>, LibrarySource), InitError> {
        let mut skipped = Vec::new();
        for candidate in self.candidates() {
            match candidate.try_load(lua)? {
                Some(table) => {
                    tracing::debug!(source = %candidate, "FSM library loaded");
                    return Ok((table, candidate));
                }
                None => skipped.push(candidate.to_string()),
            }
        }
        Err(InitError::LibraryLoadFailed {
            origin: skipped.join(", "),
            reason: "no library source available".to_string(),
        })
    }

    fn try_load<'lua>(&self, lua: &'lua Lua) -> Result<Option<Table<'lua>>, InitError> {
        let failed = |reason: String| InitError::LibraryLoadFailed {
            origin: self.to_string(),
            reason,
        };
        match self {
            LibrarySource::Auto => Ok(None),
            LibrarySource::External(path) => {
                if !path.is_file() {
                    tracing::debug!(path = %path.display(), "external FSM library not found");
                    return Ok(None);
                }
                let source = std::fs::read_to_string(path).map_err(|e| failed(e.to_string()))?;
                lua.load(source.as_str())
                    .set_name(format!("@{}", path.display()))
                    .eval::<Table>()
                    .map(Some)
                    .map_err(|e| failed(lua_message(&e)))
            }
            LibrarySource::Embedded => {
                #[cfg(feature = "embedded-library")]
                {
                    lua.load(EMBEDDED_LIBRARY)
                        .set_name("=rfsm")
                        .eval::<Table>()
                        .map(Some)
                        .map_err(|e| failed(lua_message(&e)))
                }
                #[cfg(not(feature = "embedded-library"))]
                {
                    Ok(None)
                }
            }
            LibrarySource::SearchPath => {
                let globals = lua.globals();
                let package: Table = globals.get("package").map_err(|e| failed(lua_message(&e)))?;
                let path: String = package.get("path").map_err(|e| failed(lua_message(&e)))?;
                let searchpath: Function =
                    package.get("searchpath").map_err(|e| failed(lua_message(&e)))?;
                let found: Option<String> = searchpath
                    .call::<_, Option<String>>((LIBRARY_MODULE, path))
                    .map_err(|e| failed(lua_message(&e)))?;
                if found.is_none() {
                    return Ok(None);
                }
                let require: Function = globals.get("require").map_err(|e| failed(lua_message(&e)))?;
                require
                    .call::<_, Table>(LIBRARY_MODULE)
                    .map(Some)
                    .map_err(|e| failed(lua_message(&e)))
            }
        }
    }
}

impl std::fmt::Display for LibrarySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibrarySource::Auto => write!(f, "auto"),
            LibrarySource::External(path) => write!(f, "file '{}'", path.display()),
            LibrarySource::Embedded => write!(f, "embedded"),
            LibrarySource::SearchPath => write!(f, "search path"),
        }
    }
}
