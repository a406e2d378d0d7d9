use std::collections::HashMap;
use std::env as stdenv;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Default prompt when `PS1` is unset.
pub const DEFAULT_PROMPT: &str = "$ ";

/// Process-wide state shared by every line the interpreter evaluates.
///
/// The environment contains:
/// - `vars`: the variables every spawned process receives a copy of.
/// - `current_dir`: the working directory spawned processes start in.
///
/// Variables are kept as raw `OsString`s: values that are not valid UTF-8 still
/// reach children byte for byte.
///
/// Only the `cd` built-in mutates `current_dir`. Children get a snapshot of both
/// fields at spawn time and never observe later changes.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Key-value store of environment variables (e.g., PATH, HOME).
    pub vars: HashMap<OsString, OsString>,
    /// The current working directory for command execution.
    pub current_dir: PathBuf,
}

impl Environment {
    /// Capture the current process state into a new `Environment` instance.
    pub fn new() -> Self {
        let vars = stdenv::vars_os().collect();
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self { vars, current_dir }
    }

    /// Raw value of an environment variable.
    pub fn get_var_os(&self, key: &str) -> Option<&OsStr> {
        self.vars.get(OsStr::new(key)).map(OsString::as_os_str)
    }

    /// Value of an environment variable, if it is set and valid UTF-8.
    pub fn get_var(&self, key: &str) -> Option<&str> {
        self.get_var_os(key).and_then(OsStr::to_str)
    }

    /// The prompt string, taken from `PS1`.
    pub fn prompt(&self) -> &str {
        self.get_var("PS1").unwrap_or(DEFAULT_PROMPT)
    }

    pub fn home_dir(&self) -> Option<PathBuf> {
        self.get_var_os("HOME")
            .filter(|home| !home.is_empty())
            .map(PathBuf::from)
    }

    /// Interpret `path` relative to the interpreter's working directory.
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.current_dir.join(path)
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
