//! Merge search-path variables for host child processes.
//!
//! Every variable is merged prepend-and-preserve: our entries go first, the
//! inherited value follows, nothing is ever overwritten.

use std::env;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

use crate::runtime_resolver::InterpreterEnvironment;

/// Module search path variable read by the embedded interpreter
pub const MODULE_PATH_VAR: &str = "PYTHONPATH";

/// Native library search path variable
#[cfg(target_os = "macos")]
pub const LIBRARY_PATH_VAR: &str = "DYLD_LIBRARY_PATH";
#[cfg(not(target_os = "macos"))]
pub const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";

/// Executable search path variable
pub const EXEC_PATH_VAR: &str = "PATH";

/// Prepend `entries` to an inherited path list.
///
/// Empty segments are dropped, entries that can't be represented in a path
/// list (they contain the separator) are skipped with a warning, and order is
/// preserved: new entries first, inherited ones after. Duplicates are kept.
/// Returns `None` when the merged list would be empty.
pub fn prepend_path_list(entries: &[PathBuf], inherited: Option<&OsStr>) -> Option<OsString> {
    let mut merged: Vec<PathBuf> = Vec::new();
    for entry in entries {
        if entry.as_os_str().is_empty() {
            continue;
        }
        if env::join_paths([entry]).is_err() {
            tracing::warn!(entry = %entry.display(), "Skipping path entry containing a separator");
            continue;
        }
        merged.push(entry.clone());
    }
    if let Some(inherited) = inherited {
        merged.extend(env::split_paths(inherited).filter(|p| !p.as_os_str().is_empty()));
    }
    if merged.is_empty() {
        return None;
    }
    env::join_paths(merged).ok()
}

/// Variables to set on a host child, computed against `lookup` for inherited values.
///
/// - `PYTHONPATH`: module paths, then inherited
/// - `LD_LIBRARY_PATH`: library dirs that exist on disk, then inherited
/// - `PATH`: local bin dir (if it exists), then inherited
pub fn build_child_env<F>(env: &InterpreterEnvironment, lookup: F) -> Vec<(&'static str, OsString)>
where
    F: Fn(&str) -> Option<OsString>,
{
    let mut vars = Vec::new();

    if let Some(v) = prepend_path_list(&env.module_paths, lookup(MODULE_PATH_VAR).as_deref()) {
        vars.push((MODULE_PATH_VAR, v));
    }

    let library_dirs: Vec<PathBuf> = env
        .library_paths
        .iter()
        .filter(|p| p.is_dir())
        .cloned()
        .collect();
    if let Some(v) = prepend_path_list(&library_dirs, lookup(LIBRARY_PATH_VAR).as_deref()) {
        vars.push((LIBRARY_PATH_VAR, v));
    }

    let exec_dirs: Vec<PathBuf> = env
        .exec_path_prefix
        .iter()
        .filter(|p| p.is_dir())
        .cloned()
        .collect();
    if !exec_dirs.is_empty() {
        if let Some(v) = prepend_path_list(&exec_dirs, lookup(EXEC_PATH_VAR).as_deref()) {
            vars.push((EXEC_PATH_VAR, v));
        }
    }

    for (key, value) in &vars {
        tracing::debug!(key = %key, value = %value.to_string_lossy(), "Child env");
    }
    vars
}

/// [`build_child_env`] against the current process environment.
pub fn build_child_env_from_process(env: &InterpreterEnvironment) -> Vec<(&'static str, OsString)> {
    build_child_env(env, |k| std::env::var_os(k))
}
