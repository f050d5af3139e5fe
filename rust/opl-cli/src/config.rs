//! Configuration file parsing for `opl.toml`.
//!
//! Searches the current directory then its ancestors, falling back to
//! `~/.config/opl/opl.toml` if no project-level file is found. Command-line
//! flags override whatever the file says.

use opl_compiler::AssumedType;
use opl_vm::ErrorMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE: &str = "opl.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read '{}'", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid toml in '{}'", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OplConfig {
    pub runtime: RuntimeSection,
    pub decompiler: DecompilerSection,
}

/// `[runtime]`: defaults for `opl run` and `opl exec`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    pub error_mode: Option<ErrorMode>,
    pub superuser: bool,
    pub restricted: bool,
    /// Directory the file opcodes are rooted at.
    pub root: Option<PathBuf>,
    pub max_steps: Option<u64>,
    pub plugin_dirs: Vec<PathBuf>,
}

/// `[decompiler]`: how untyped arguments are rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompilerSection {
    pub assume: AssumedType,
    pub try_strings: bool,
}

impl Default for DecompilerSection {
    fn default() -> Self {
        Self {
            assume: AssumedType::Bytes,
            try_strings: true,
        }
    }
}

impl OplConfig {
    /// Find and load the nearest config. Returns the default config and no
    /// path when there is none.
    pub fn discover() -> Result<(Option<PathBuf>, Self), ConfigError> {
        let start = std::env::current_dir().ok();
        let found = start
            .as_deref()
            .and_then(Self::find_from)
            .or_else(|| Self::global_path().filter(|p| p.is_file()));
        match found {
            Some(path) => {
                let cfg = Self::load_from(&path)?;
                Ok((Some(path), cfg))
            }
            None => Ok((None, Self::default())),
        }
    }

    /// The first `opl.toml` in `start` or one of its ancestors.
    pub fn find_from(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILE))
            .find(|candidate| candidate.is_file())
    }

    pub fn global_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config").join("opl").join(CONFIG_FILE))
    }

    /// Load a specific file. Relative paths inside it are anchored at the
    /// file's directory.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg = Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(match path.parent() {
            Some(base) => cfg.anchored(base),
            None => cfg,
        })
    }

    pub fn parse(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    fn anchored(mut self, base: &Path) -> Self {
        let anchor = |p: PathBuf| if p.is_relative() { base.join(p) } else { p };
        self.runtime.root = self.runtime.root.map(anchor);
        self.runtime.plugin_dirs = self.runtime.plugin_dirs.into_iter().map(anchor).collect();
        self
    }

    /// Contents written by `opl init`.
    pub fn default_template() -> &'static str {
        r#"# OPL configuration

[runtime]
# Error policy: "ds" (display and stop), "d" (display), "s" (stop), "none"
error_mode = "ds"
superuser = false
restricted = false
# root = "."
# max_steps = 1000000
# Directories searched for extension plugins; empty disables plugins
plugin_dirs = []

[decompiler]
# Rendering for non-printable arguments: "b", "i", "f" or "s"
assume = "b"
try_strings = true
"#
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
