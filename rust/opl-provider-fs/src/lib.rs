//! Host filesystem provider for the OPL file opcodes.
//!
//! Every file name is resolved inside a root directory:
//! - `read`  : file contents
//! - `write` : create or replace
//! - `delete`: remove a file
//! - `list`  : names of regular files directly under the root
//! - `run_command`: `sh -c <command>` with the root as working directory,
//!   only when commands are enabled
//!
//! Names that are absolute or climb out of the root with `..` are refused.

use opl_runtime::providers::{check_access, Access, FileProvider, ProviderError};
use std::path::{Component, Path, PathBuf};
use std::process::Command;

// ---------------------------------------------------------------------------
// Operation enum
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FsOp {
    Read,
    Write,
    Delete,
    RunCommand,
}

impl FsOp {
    fn verb(&self) -> &'static str {
        match self {
            FsOp::Read => "read",
            FsOp::Write => "write",
            FsOp::Delete => "delete",
            FsOp::RunCommand => "run command",
        }
    }
}

// ---------------------------------------------------------------------------
// HostFs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HostFs {
    root: PathBuf,
    restricted: bool,
    allow_commands: bool,
}

impl HostFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            restricted: false,
            allow_commands: false,
        }
    }

    pub fn restricted(mut self, restricted: bool) -> Self {
        self.restricted = restricted;
        self
    }

    pub fn allow_commands(mut self, allow: bool) -> Self {
        self.allow_commands = allow;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, op: FsOp, name: &str) -> Result<PathBuf, ProviderError> {
        let rel = Path::new(name);
        let escapes = name.is_empty()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(ProviderError::PermissionDenied(format!(
                "{} {}: name must stay inside {}",
                op.verb(),
                name,
                self.root.display()
            )));
        }
        Ok(self.root.join(rel))
    }
}

impl FileProvider for HostFs {
    fn read(&self, name: &str) -> Result<Vec<u8>, ProviderError> {
        let path = self.resolve(FsOp::Read, name)?;
        std::fs::read(&path).map_err(|e| ProviderError::io(name, e))
    }

    fn write(&self, name: &str, data: &[u8], access: Access) -> Result<(), ProviderError> {
        check_access(self.restricted, access, FsOp::Write.verb(), name)?;
        let path = self.resolve(FsOp::Write, name)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ProviderError::io(name, e))?;
        }
        tracing::debug!(path = %path.display(), bytes = data.len(), "write file");
        std::fs::write(&path, data).map_err(|e| ProviderError::io(name, e))
    }

    fn delete(&self, name: &str, access: Access) -> Result<(), ProviderError> {
        check_access(self.restricted, access, FsOp::Delete.verb(), name)?;
        let path = self.resolve(FsOp::Delete, name)?;
        tracing::debug!(path = %path.display(), "delete file");
        std::fs::remove_file(&path).map_err(|e| ProviderError::io(name, e))
    }

    fn list(&self) -> Result<Vec<String>, ProviderError> {
        let root = self.root.display().to_string();
        let entries = std::fs::read_dir(&self.root).map_err(|e| ProviderError::io(&root, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ProviderError::io(&root, e))?;
            let is_file = entry
                .file_type()
                .map_err(|e| ProviderError::io(&root, e))?
                .is_file();
            if is_file {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn run_command(&self, command: &str, access: Access) -> Result<u8, ProviderError> {
        if !self.allow_commands {
            return Err(ProviderError::Unsupported("run_command"));
        }
        check_access(self.restricted, access, FsOp::RunCommand.verb(), command)?;
        tracing::debug!(command, "run command");
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .status()
            .map_err(|e| ProviderError::io(command, e))?;
        // Killed by a signal: no exit code.
        Ok(status.code().map(|c| (c & 0xFF) as u8).unwrap_or(u8::MAX))
    }

    fn is_restricted(&self) -> bool {
        self.restricted
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("opl_fs_test_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_write_and_read() {
        let tmp = temp_dir();
        let host = HostFs::new(&tmp);
        host.write("hello.txt", b"hello world", Access::USER).unwrap();
        assert_eq!(host.read("hello.txt").unwrap(), b"hello world");
        assert_eq!(fs::read(tmp.join("hello.txt")).unwrap(), b"hello world");
        fs::remove_dir_all(&tmp).unwrap();
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let tmp = temp_dir();
        let host = HostFs::new(&tmp);
        assert!(matches!(host.read("nope"), Err(ProviderError::NotFound(_))));
        assert!(matches!(
            host.delete("nope", Access::USER),
            Err(ProviderError::NotFound(_))
        ));
        fs::remove_dir_all(&tmp).unwrap();
    }

    #[test]
    fn test_list_only_regular_files_sorted() {
        let tmp = temp_dir();
        fs::write(tmp.join("b"), b"").unwrap();
        fs::write(tmp.join("a"), b"").unwrap();
        fs::create_dir_all(tmp.join("sub")).unwrap();
        let host = HostFs::new(&tmp);
        assert_eq!(host.list().unwrap(), vec!["a", "b"]);
        fs::remove_dir_all(&tmp).unwrap();
    }

    #[test]
    fn test_delete() {
        let tmp = temp_dir();
        let host = HostFs::new(&tmp);
        host.write("gone", b"x", Access::USER).unwrap();
        host.delete("gone", Access::USER).unwrap();
        assert!(!tmp.join("gone").exists());
        fs::remove_dir_all(&tmp).unwrap();
    }

    #[test]
    fn test_restricted_mode() {
        let tmp = temp_dir();
        let host = HostFs::new(&tmp).restricted(true);
        assert!(matches!(
            host.write("x", b"1", Access::USER),
            Err(ProviderError::PermissionDenied(_))
        ));
        assert!(!tmp.join("x").exists());
        host.write("x", b"1", Access::SUPERUSER).unwrap();
        assert!(matches!(
            host.delete("x", Access::USER),
            Err(ProviderError::PermissionDenied(_))
        ));
        // Reads stay allowed.
        assert_eq!(host.read("x").unwrap(), b"1");
        fs::remove_dir_all(&tmp).unwrap();
    }

    #[test]
    fn test_names_cannot_escape_root() {
        let tmp = temp_dir();
        let host = HostFs::new(&tmp);
        for name in ["../escape", "/etc/passwd", "a/../../b", ""] {
            assert!(
                matches!(host.read(name), Err(ProviderError::PermissionDenied(_))),
                "{} should be refused",
                name
            );
        }
        fs::remove_dir_all(&tmp).unwrap();
    }

    #[test]
    fn test_commands_disabled_by_default() {
        let tmp = temp_dir();
        let host = HostFs::new(&tmp);
        assert!(matches!(
            host.run_command("true", Access::SUPERUSER),
            Err(ProviderError::Unsupported(_))
        ));
        fs::remove_dir_all(&tmp).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_run_command_exit_status() {
        let tmp = temp_dir();
        let host = HostFs::new(&tmp).allow_commands(true);
        assert_eq!(host.run_command("exit 3", Access::USER).unwrap(), 3);
        assert_eq!(host.run_command("true", Access::USER).unwrap(), 0);
        let restricted = HostFs::new(&tmp).allow_commands(true).restricted(true);
        assert!(matches!(
            restricted.run_command("true", Access::USER),
            Err(ProviderError::PermissionDenied(_))
        ));
        fs::remove_dir_all(&tmp).unwrap();
    }
}
