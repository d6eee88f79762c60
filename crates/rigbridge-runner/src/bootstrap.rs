//! Per-invocation bootstrap script for the host's embedded interpreter.
//!
//! The host is launched as `<exe> --background --python <bootstrap> -- <args>`.
//! The bootstrap puts the tool repository on `sys.path`, rebuilds `sys.argv`
//! from everything after the separator, moves into the repository and runs
//! the real target script as `__main__`.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempPath;

/// Separator between host arguments and forwarded script arguments
pub const ARG_SEPARATOR: &str = "--";

const BOOTSTRAP_PREFIX: &str = "rigbridge_bootstrap_";

const BOOTSTRAP_TEMPLATE: &str = r#"import os
import runpy
import sys
import traceback

TARGET_SCRIPT = {{TARGET_SCRIPT}}
REPO_ROOT = {{REPO_ROOT}}
SEPARATOR = {{SEPARATOR}}

if REPO_ROOT not in sys.path:
    sys.path.insert(0, REPO_ROOT)

try:
    forwarded = sys.argv[sys.argv.index(SEPARATOR) + 1:]
except ValueError:
    forwarded = []

sys.argv = [TARGET_SCRIPT] + forwarded
print(f"[bootstrap] running {TARGET_SCRIPT} with argv {sys.argv}", file=sys.stderr)

if os.path.abspath(os.getcwd()) != os.path.abspath(REPO_ROOT):
    os.chdir(REPO_ROOT)

try:
    runpy.run_path(TARGET_SCRIPT, run_name="__main__")
except SystemExit:
    raise
except BaseException as exc:
    print(f"[bootstrap] error running {TARGET_SCRIPT}: {exc!r}", file=sys.stderr)
    traceback.print_exc(file=sys.stderr)
    sys.stderr.flush()
    raise SystemExit(1) from exc
"#;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("path cannot be embedded in a script ({reason}): {path}")]
    UnrepresentablePath { path: String, reason: &'static str },

    #[error("failed to write bootstrap script: {0}")]
    Io(#[from] std::io::Error),
}

/// Substitute `{{NAME}}` placeholders in one pass.
///
/// Values are inserted verbatim and never rescanned, so a value that happens
/// to contain a placeholder is left alone. Unknown placeholders are kept.
pub fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        match values.iter().find(|(k, _)| *k == name) {
            Some((_, v)) => out.push_str(v),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

/// Render a path as a Python string literal.
///
/// JSON string syntax is a subset of Python's, so `serde_json` escaping is
/// reused. The path must be UTF-8 and free of NUL bytes.
pub fn python_string_literal(path: &Path) -> Result<String, BootstrapError> {
    let Some(s) = path.to_str() else {
        return Err(BootstrapError::UnrepresentablePath {
            path: path.to_string_lossy().into_owned(),
            reason: "not valid UTF-8",
        });
    };
    if s.contains('\0') {
        return Err(BootstrapError::UnrepresentablePath {
            path: s.replace('\0', "\\0"),
            reason: "contains NUL",
        });
    }
    serde_json::to_string(s).map_err(|_| BootstrapError::UnrepresentablePath {
        path: s.to_string(),
        reason: "escape failed",
    })
}

/// Render the bootstrap source for `target_script` inside `repo_root`.
///
/// Both paths are made absolute against our cwd: the child starts inside the
/// repository, where a relative path would no longer resolve.
pub fn render(target_script: &Path, repo_root: &Path) -> Result<String, BootstrapError> {
    let target = python_string_literal(&std::path::absolute(target_script)?)?;
    let repo = python_string_literal(&std::path::absolute(repo_root)?)?;
    let separator = python_string_literal(Path::new(ARG_SEPARATOR))?;
    Ok(render_template(
        BOOTSTRAP_TEMPLATE,
        &[
            ("TARGET_SCRIPT", &target),
            ("REPO_ROOT", &repo),
            ("SEPARATOR", &separator),
        ],
    ))
}

/// A bootstrap script on disk. The file is deleted when this value is dropped.
#[derive(Debug)]
pub struct BootstrapScript {
    path: Option<TempPath>,
}

impl BootstrapScript {
    /// Write a uniquely named bootstrap file into the system temp dir.
    pub fn synthesize(target_script: &Path, repo_root: &Path) -> Result<Self, BootstrapError> {
        let source = render(target_script, repo_root)?;
        let mut file = tempfile::Builder::new()
            .prefix(BOOTSTRAP_PREFIX)
            .suffix(".py")
            .tempfile()?;
        file.write_all(source.as_bytes())?;
        file.flush()?;
        let path = file.into_temp_path();
        tracing::debug!(path = %path.display(), target = %target_script.display(), "Bootstrap script written");
        Ok(Self { path: Some(path) })
    }

    pub fn path(&self) -> &Path {
        match &self.path {
            Some(p) => &**p,
            None => Path::new(""),
        }
    }
}

impl Drop for BootstrapScript {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let shown: PathBuf = path.to_path_buf();
            if let Err(e) = path.close() {
                tracing::warn!(path = %shown.display(), error = %e, "Failed to remove bootstrap script");
            }
        }
    }
}
