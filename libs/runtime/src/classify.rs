//! Sandbox output classification
//!
//! The sandbox reports some failures only as text on stderr. Everything that
//! pattern-matches that text lives here.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::StartupFailureKind;

static ADDRESS_IN_USE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Address already in use; toString\(\) = ([^\n]+)").expect("valid regex")
});

/// Diagnostics the sandbox prints that carry no useful information
static NOISE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"LLVM_SYMBOLIZER",
        r"recursive isolate lock",
        r"stack:( (0|[a-f\d]{4,})){3,}",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static WARNING: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.c\+\+:\d+: warning:").expect("valid regex"));

static ACCESS_VIOLATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)access violation").expect("valid regex"));

/// Classify the stderr a sandbox produced before failing to start
pub fn classify_startup_failure(stderr: &str) -> StartupFailureKind {
    match ADDRESS_IN_USE.captures(stderr) {
        Some(captures) => StartupFailureKind::AddressInUse {
            address: captures[1].trim().to_string(),
        },
        None => StartupFailureKind::Unknown,
    }
}

/// How a single output line should be surfaced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClass {
    Noise,
    Warning,
    AddressInUse { address: String },
    AccessViolation,
    Plain,
}

pub fn classify_line(line: &str) -> LineClass {
    if let Some(captures) = ADDRESS_IN_USE.captures(line) {
        return LineClass::AddressInUse {
            address: captures[1].trim().to_string(),
        };
    }
    if NOISE.iter().any(|re| re.is_match(line)) {
        return LineClass::Noise;
    }
    if WARNING.is_match(line) {
        return LineClass::Warning;
    }
    if ACCESS_VIOLATION.is_match(line) {
        return LineClass::AccessViolation;
    }
    LineClass::Plain
}
