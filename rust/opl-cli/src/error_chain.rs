//! Error context chaining for CLI diagnostics.
//!
//! Every command returns `Result<_, ErrorChain>`. The chain holds a primary
//! message plus the `source()` causes of whatever failed, and prints as
//! `error: ...` followed by indented `caused by:` lines.

use crate::colors::red;
use crate::config::ConfigError;
use opl_compiler::CompileError;
use opl_core::bytecode::DecodeError;
use opl_vm::VmError;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorChain {
    pub primary: String,
    /// Outermost cause first.
    pub causes: Vec<String>,
}

impl ErrorChain {
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            causes: Vec::new(),
        }
    }

    pub fn caused_by(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    /// Push the current primary message down into the causes and replace it.
    pub fn context(mut self, primary: impl Into<String>) -> Self {
        let previous = std::mem::replace(&mut self.primary, primary.into());
        self.causes.insert(0, previous);
        self
    }

    /// Plain rendering, no colors.
    pub fn format_for_display(&self) -> String {
        format!("error: {}", self)
    }

    /// Rendering for the terminal.
    pub fn render(&self) -> String {
        format!("{} {}", red("error:"), self)
    }
}

impl fmt::Display for ErrorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary)?;
        for cause in &self.causes {
            write!(f, "\n  caused by: {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorChain {}

/// Walk a `source()` chain and collect every message.
pub fn chain_from_error(err: &dyn std::error::Error) -> ErrorChain {
    let mut chain = ErrorChain::new(err.to_string());
    let mut source = err.source();
    while let Some(cause) = source {
        chain.causes.push(cause.to_string());
        source = cause.source();
    }
    chain
}

/// Context for a failed read or write of `path`.
pub fn io_error(action: &str, path: &Path, err: std::io::Error) -> ErrorChain {
    ErrorChain::new(format!("cannot {} '{}'", action, path.display())).caused_by(err.to_string())
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<String> for ErrorChain {
    fn from(msg: String) -> Self {
        Self::new(msg)
    }
}

impl From<&str> for ErrorChain {
    fn from(msg: &str) -> Self {
        Self::new(msg)
    }
}

impl From<std::io::Error> for ErrorChain {
    fn from(err: std::io::Error) -> Self {
        chain_from_error(&err)
    }
}

impl From<VmError> for ErrorChain {
    fn from(err: VmError) -> Self {
        chain_from_error(&err)
    }
}

impl From<DecodeError> for ErrorChain {
    fn from(err: DecodeError) -> Self {
        chain_from_error(&err).context("malformed program")
    }
}

impl From<CompileError> for ErrorChain {
    fn from(err: CompileError) -> Self {
        chain_from_error(&err).context("compilation failed")
    }
}

impl From<ConfigError> for ErrorChain {
    fn from(err: ConfigError) -> Self {
        chain_from_error(&err)
    }
}

impl From<serde_json::Error> for ErrorChain {
    fn from(err: serde_json::Error) -> Self {
        chain_from_error(&err).context("cannot serialize program")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn single_message() {
        let chain = ErrorChain::new("something broke");
        assert_eq!(chain.format_for_display(), "error: something broke");
    }

    #[test]
    fn causes_are_indented() {
        let chain = ErrorChain::new("run failed")
            .caused_by("undefined address: 9")
            .caused_by("inner");
        assert_eq!(
            chain.format_for_display(),
            "error: run failed\n  caused by: undefined address: 9\n  caused by: inner"
        );
    }

    #[test]
    fn context_wraps_previous_primary() {
        let chain = ErrorChain::new("unexpected end of input")
            .caused_by("inner")
            .context("malformed program");
        assert_eq!(chain.primary, "malformed program");
        assert_eq!(chain.causes, vec!["unexpected end of input", "inner"]);
    }

    #[test]
    fn config_error_keeps_toml_cause() {
        let source = toml::from_str::<toml::Value>("[runtime\n").unwrap_err();
        let err = ConfigError::Parse {
            path: PathBuf::from("/p/opl.toml"),
            source,
        };
        let chain = ErrorChain::from(err);
        assert_eq!(chain.primary, "invalid toml in '/p/opl.toml'");
        assert_eq!(chain.causes.len(), 1);
    }

    #[test]
    fn vm_error_message() {
        let chain = ErrorChain::from(VmError::UndefinedAddress(9));
        assert_eq!(chain.primary, "undefined address: 9");
        assert!(chain.causes.is_empty());
    }

    #[test]
    fn io_error_names_the_path() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let chain = io_error("read", Path::new("a.opc"), err);
        assert_eq!(chain.format_for_display(), "error: cannot read 'a.opc'\n  caused by: missing");
    }

    #[test]
    fn render_contains_message() {
        assert!(ErrorChain::new("boom").render().contains("boom"));
    }
}
