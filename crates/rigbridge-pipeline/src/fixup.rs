//! Idempotent source fix for the tool's `src/data/asset.py`.
//!
//! Some tool revisions annotate `meta` as `Dict[str, ...]`, which newer
//! interpreters reject at import time. The fix swaps in `Any` and makes sure
//! `Any` is imported.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const BROKEN_ANNOTATION: &str = "meta: Union[Dict[str, ...], None]=None";
const FIXED_ANNOTATION: &str = "meta: Union[Dict[str, Any], None]=None";
const ANY_IMPORT: &str = "from typing import Any";
const TYPING_IMPORT_PREFIX: &str = "from typing import";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupOutcome {
    Applied,
    AlreadyApplied,
    NotNeeded,
    FileMissing,
}

pub fn asset_py_path(repo_root: &Path) -> PathBuf {
    repo_root.join("src").join("data").join("asset.py")
}

/// Rewrite `content` if it carries the broken annotation.
pub fn patch_source(content: &str) -> (FixupOutcome, Option<String>) {
    if content.contains(FIXED_ANNOTATION) {
        return (FixupOutcome::AlreadyApplied, None);
    }
    if !content.contains(BROKEN_ANNOTATION) {
        return (FixupOutcome::NotNeeded, None);
    }
    let mut patched = content.replace(BROKEN_ANNOTATION, FIXED_ANNOTATION);
    if !patched.contains(ANY_IMPORT) {
        patched = match patched.find(TYPING_IMPORT_PREFIX) {
            Some(idx) => format!("{}{ANY_IMPORT}\n{}", &patched[..idx], &patched[idx..]),
            None => format!("{ANY_IMPORT}\n{patched}"),
        };
    }
    (FixupOutcome::Applied, Some(patched))
}

/// Apply the fix under `repo_root`.
///
/// The patched file is written next to the original and renamed over it, so a
/// concurrent reader sees either the old or the new source, never a partial one.
pub fn apply(repo_root: &Path) -> io::Result<FixupOutcome> {
    let path = asset_py_path(repo_root);
    let content = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(FixupOutcome::FileMissing),
        Err(e) => return Err(e),
    };
    let (outcome, patched) = patch_source(&content);
    if let Some(patched) = patched {
        let dir = path.parent().unwrap_or(repo_root);
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(patched.as_bytes())?;
        fs::set_permissions(tmp.path(), fs::metadata(&path)?.permissions())?;
        tmp.persist(&path).map_err(|e| e.error)?;
    }
    Ok(outcome)
}

/// [`apply`] with the outcome logged; errors are logged and swallowed.
pub fn apply_logged(repo_root: &Path) -> Option<FixupOutcome> {
    match apply(repo_root) {
        Ok(outcome) => {
            match outcome {
                FixupOutcome::Applied => tracing::info!("Patched tool asset.py annotation"),
                FixupOutcome::AlreadyApplied => tracing::debug!("asset.py patch already applied"),
                FixupOutcome::NotNeeded => tracing::debug!("asset.py needs no patch"),
                FixupOutcome::FileMissing => tracing::warn!(
                    path = %asset_py_path(repo_root).display(),
                    "asset.py not found, skipping patch"
                ),
            }
            Some(outcome)
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to patch asset.py, proceeding without it");
            None
        }
    }
}
