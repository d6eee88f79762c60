//! Classify failed host runs from their stderr.
//!
//! Purely advisory: the exit code and artifact checks decide success, this
//! only turns the tail of stderr into a message a user can act on.

use std::sync::OnceLock;

use regex::Regex;

/// How many trailing stderr lines are inspected and quoted
pub const DIAGNOSIS_TAIL_LINES: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosisKind {
    /// The tool's `src` package was not importable inside the host
    ToolImport,
    /// The host's own `bpy` module failed to import
    HostModule,
    /// A compiled ML dependency (flash_attn, spconv, torch) failed to import
    MlDependency,
    /// The GPU ran out of memory
    OutOfMemory,
    /// The target raised and the bootstrap reported it
    ScriptException,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosis {
    pub kind: DiagnosisKind,
    pub message: String,
}

struct Signature {
    kind: DiagnosisKind,
    pattern: &'static str,
    message: &'static str,
}

// First match wins; more specific signatures come before the bootstrap catch-all.
const SIGNATURES: &[Signature] = &[
    Signature {
        kind: DiagnosisKind::ToolImport,
        pattern: r"(?i)module 'src' not found|no module named 'src'",
        message: "The rigging tool failed to import its 'src' package. The module search path inside the host interpreter is probably wrong; check the diagnostic output for sys.path.",
    },
    Signature {
        kind: DiagnosisKind::HostModule,
        pattern: r"ModuleNotFoundError: No module named 'bpy'",
        message: "The 'bpy' module could not be imported. Check the host's Python setup.",
    },
    Signature {
        kind: DiagnosisKind::MlDependency,
        pattern: r"(?i)no module named '(flash_attn|spconv|torch)[^']*'|(flash_attn|spconv)\S*\.so: (undefined symbol|cannot open shared object)",
        message: "A compiled ML dependency (flash_attn, spconv or torch) is missing or broken in the host interpreter. Re-run the host setup script.",
    },
    Signature {
        kind: DiagnosisKind::OutOfMemory,
        pattern: r"(?i)cuda out of memory|outofmemoryerror",
        message: "The GPU ran out of memory. Try a smaller mesh or run on the CPU.",
    },
];

const SCRIPT_EXCEPTION_PATTERN: &str = r"(?i)\[bootstrap\] error running";

fn compiled() -> &'static [(Regex, &'static Signature)] {
    static CELL: OnceLock<Vec<(Regex, &'static Signature)>> = OnceLock::new();
    CELL.get_or_init(|| {
        SIGNATURES
            .iter()
            .filter_map(|sig| match Regex::new(sig.pattern) {
                Ok(re) => Some((re, sig)),
                Err(e) => {
                    tracing::error!(pattern = sig.pattern, error = %e, "Invalid diagnosis pattern");
                    None
                }
            })
            .collect()
    })
}

fn script_exception_re() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(SCRIPT_EXCEPTION_PATTERN).ok()).as_ref()
}

/// Last `n` non-blank lines of `text`, joined with newlines.
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.trim().lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Classify a failed run from its stderr.
pub fn diagnose(stderr: &str) -> Diagnosis {
    let tail = tail_lines(stderr, DIAGNOSIS_TAIL_LINES);
    let quoted = if tail.is_empty() {
        "No stderr output.".to_string()
    } else {
        tail.clone()
    };

    for (re, sig) in compiled() {
        if re.is_match(&tail) {
            return Diagnosis {
                kind: sig.kind,
                message: sig.message.to_string(),
            };
        }
    }

    if script_exception_re().is_some_and(|re| re.is_match(&tail)) {
        return Diagnosis {
            kind: DiagnosisKind::ScriptException,
            message: format!("The rigging script raised an exception. Last error lines:\n{quoted}"),
        };
    }

    Diagnosis {
        kind: DiagnosisKind::Unknown,
        message: format!("Check logs. Last error lines:\n{quoted}"),
    }
}

const ERROR_MARKERS: &[&str] = &["error", "failed", "traceback"];

/// Error-like markers present in otherwise successful output (case-insensitive).
pub fn error_markers(stderr: &str) -> Vec<&'static str> {
    let lower = stderr.to_lowercase();
    ERROR_MARKERS
        .iter()
        .copied()
        .filter(|m| lower.contains(m))
        .collect()
}
