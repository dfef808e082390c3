use colored::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal failures. Everything recoverable travels as a [`Diagnostic`] instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot read {path}: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bad configuration: {0}")]
    Config(String),

    #[error("unresolved include \"{name}\" from {path}:{line}")]
    UnresolvedInclude {
        name: String,
        path: PathBuf,
        line: u32,
    },

    #[error("preprocessor failure in {path}: {message}")]
    Preprocess { path: PathBuf, message: String },

    #[error("external tool failed: {0}")]
    Tool(String),
}

/// A recoverable problem tied to a source location. `line` is 1-based;
/// 0 means the diagnostic applies to the whole file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub path: PathBuf,
    pub line: u32,
    pub tag: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(path: impl Into<PathBuf>, line: u32, tag: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            line,
            tag: tag.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(
                f,
                "{}:{}: [{}] {}",
                self.path.display(),
                self.line,
                self.tag,
                self.message
            )
        } else {
            write!(f, "{}: [{}] {}", self.path.display(), self.tag, self.message)
        }
    }
}

/// Print diagnostics to stderr the way the rest of the tool family does:
/// a colored marker, then the location and stable tag.
pub fn report(diagnostics: &[Diagnostic], quiet: bool) {
    if quiet {
        return;
    }
    for diag in diagnostics {
        eprintln!("{} {}", "!".yellow(), diag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_display_with_line() {
        let d = Diagnostic::new("/tmp/a.hpp", 7, "unterminated-comment", "comment reaches end of file");
        assert_eq!(
            d.to_string(),
            "/tmp/a.hpp:7: [unterminated-comment] comment reaches end of file"
        );
    }

    #[test]
    fn test_diagnostic_display_whole_file() {
        let d = Diagnostic::new("/tmp/a.hpp", 0, "cache-store", "could not persist entry");
        assert_eq!(d.to_string(), "/tmp/a.hpp: [cache-store] could not persist entry");
    }
}
