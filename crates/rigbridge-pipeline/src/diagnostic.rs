//! Environment diagnostic run inside the host before the tool stages.
//!
//! Prints interpreter details and search paths, then tries the imports the
//! tool needs. Every import failure is reported but none aborts the script,
//! so the output always covers all checks.

use std::fs;
use std::path::{Path, PathBuf};

use rigbridge_runner::bootstrap::{python_string_literal, render_template};

use crate::error::RigError;

pub const DIAGNOSTIC_FILE_NAME: &str = "env_diagnostic_test.py";

const DIAGNOSTIC_TEMPLATE: &str = r#"import os
import sys
import traceback

REPO_ROOT = {{REPO_ROOT}}

print("--- Host Python diagnostic ---")
print(f"Python executable: {sys.executable}")
print("Python version: " + sys.version.replace("\n", " "))
print(f"Working directory: {os.getcwd()}")

print("\nsys.path:")
for i, p in enumerate(sys.path):
    print(f"  {i}: {p}")

print("\nPYTHONPATH:")
print(os.environ.get("PYTHONPATH", "PYTHONPATH not set or empty"))
print("\nLD_LIBRARY_PATH:")
print(os.environ.get("LD_LIBRARY_PATH", "LD_LIBRARY_PATH not set or empty"))

print("\n--- Imports ---")

print("\n1. bpy")
try:
    import bpy
    print(f"  OK: bpy {bpy.app.version_string}")
except Exception as e:
    print(f"  FAILED: bpy: {e}")
    traceback.print_exc(file=sys.stderr)

print("\n2. tool 'src' package")
in_path = any(os.path.abspath(REPO_ROOT) == os.path.abspath(p) for p in sys.path)
print(f"  repo root {REPO_ROOT} in sys.path: {'yes' if in_path else 'no'}")
print(f"  'src' directory in cwd: {'yes' if os.path.isdir('src') else 'no'}")
if os.path.isdir("src"):
    print(f"  'src/__init__.py' present: {'yes' if os.path.isfile(os.path.join('src', '__init__.py')) else 'no'}")
try:
    from src.inference.download import download
    print("  OK: from src.inference.download import download")
except Exception as e:
    print(f"  FAILED: from src.inference.download import download: {e}")
    traceback.print_exc(file=sys.stderr)

print("\n3. flash_attn")
try:
    import flash_attn
    print(f"  OK: flash_attn {getattr(flash_attn, '__version__', 'unknown')}")
except Exception as e:
    print(f"  FAILED: flash_attn: {e}")
    traceback.print_exc(file=sys.stderr)

print("\n4. spconv")
try:
    import spconv
    version = getattr(getattr(spconv, "constants", None), "SPCONV_VERSION", None) or getattr(spconv, "__version__", "unknown")
    print(f"  OK: spconv {version}")
except Exception as e:
    print(f"  FAILED: spconv: {e}")
    traceback.print_exc(file=sys.stderr)

print("\n5. torch")
try:
    import torch
    print(f"  OK: torch {torch.__version__}")
    cuda = torch.cuda.is_available()
    print(f"  cuda available: {cuda}")
    if cuda:
        print(f"    cuda version: {torch.version.cuda}")
        print(f"    device 0: {torch.cuda.get_device_name(0)}")
        print(f"    capability: {torch.cuda.get_device_capability(0)}")
    elif "cpu" in torch.__version__:
        print("    torch build is CPU-only")
    else:
        print("    CUDA build but no device visible; check drivers")
except Exception as e:
    print(f"  FAILED: torch: {e}")
    traceback.print_exc(file=sys.stderr)

print("\n--- End of diagnostic ---")
"#;

/// Diagnostic source with `repo_root` embedded.
pub fn render(repo_root: &Path) -> Result<String, RigError> {
    let repo = python_string_literal(repo_root).map_err(|e| RigError::Unexpected(e.to_string()))?;
    Ok(render_template(DIAGNOSTIC_TEMPLATE, &[("REPO_ROOT", &repo)]))
}

/// Write the diagnostic into `dir` and return its path.
pub fn write_script(dir: &Path, repo_root: &Path) -> Result<PathBuf, RigError> {
    let path = dir.join(DIAGNOSTIC_FILE_NAME);
    fs::write(&path, render(repo_root)?)
        .map_err(|e| RigError::Unexpected(format!("writing {}: {e}", path.display())))?;
    Ok(path)
}
