//! Host capability interfaces: print sink, file provider, input source.

use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::io::{BufRead, Read, Write};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    #[error("end of input")]
    EndOfInput,
    #[error("i/o error on {target}: {source}")]
    Io {
        target: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProviderError {
    pub fn io(target: impl Into<String>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return ProviderError::NotFound(target.into());
        }
        ProviderError::Io {
            target: target.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Print sink
// ---------------------------------------------------------------------------

/// Receives the live trace written by print opcodes.
pub trait PrintSink: Send + Sync {
    fn write(&self, text: &str);
}

/// Writes each message to stderr unchanged, keeping stdout for program output.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl StderrSink {
    /// Write `text` exactly as given and flush. Failures are dropped.
    pub fn write_to(out: &mut dyn Write, text: &str) {
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
}

impl PrintSink for StderrSink {
    fn write(&self, text: &str) {
        Self::write_to(&mut std::io::stderr().lock(), text);
    }
}

/// Collects messages in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct BufferSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn contents(&self) -> String {
        self.lines.lock().concat()
    }
}

impl PrintSink for BufferSink {
    fn write(&self, text: &str) {
        self.lines.lock().push(text.to_string());
    }
}

// ---------------------------------------------------------------------------
// File provider
// ---------------------------------------------------------------------------

/// Caller privileges passed to mutating file operations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub superuser: bool,
}

impl Access {
    pub const USER: Access = Access { superuser: false };
    pub const SUPERUSER: Access = Access { superuser: true };
}

/// Named-file storage used by the file opcodes.
///
/// Restricted providers refuse `write`, `delete` and `run_command` unless
/// the caller is superuser.
pub trait FileProvider: Send + Sync {
    fn read(&self, name: &str) -> Result<Vec<u8>, ProviderError>;
    fn write(&self, name: &str, data: &[u8], access: Access) -> Result<(), ProviderError>;
    fn delete(&self, name: &str, access: Access) -> Result<(), ProviderError>;
    fn list(&self) -> Result<Vec<String>, ProviderError>;

    /// Run a host command and return its exit status.
    fn run_command(&self, command: &str, access: Access) -> Result<u8, ProviderError> {
        let _ = (command, access);
        Err(ProviderError::Unsupported("run_command"))
    }

    fn is_restricted(&self) -> bool {
        false
    }
}

/// Shared restricted-mode gate for provider implementations.
pub fn check_access(
    restricted: bool,
    access: Access,
    action: &str,
    target: &str,
) -> Result<(), ProviderError> {
    if restricted && !access.superuser {
        tracing::debug!(action, target, "refused in restricted mode");
        return Err(ProviderError::PermissionDenied(format!(
            "{} {} (restricted mode)",
            action, target
        )));
    }
    Ok(())
}

/// In-memory file map. Used for bundle files and tests.
#[derive(Debug, Default)]
pub struct MemoryFiles {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    restricted: bool,
}

impl MemoryFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(files: BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            files: Mutex::new(files),
            restricted: false,
        }
    }

    pub fn restricted(mut self, restricted: bool) -> Self {
        self.restricted = restricted;
        self
    }

    pub fn with_file(self, name: &str, data: &[u8]) -> Self {
        self.files.lock().insert(name.to_string(), data.to_vec());
        self
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().get(name).cloned()
    }
}

impl FileProvider for MemoryFiles {
    fn read(&self, name: &str) -> Result<Vec<u8>, ProviderError> {
        self.get(name)
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }

    fn write(&self, name: &str, data: &[u8], access: Access) -> Result<(), ProviderError> {
        check_access(self.restricted, access, "write", name)?;
        self.files.lock().insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn delete(&self, name: &str, access: Access) -> Result<(), ProviderError> {
        check_access(self.restricted, access, "delete", name)?;
        self.files
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }

    fn list(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.files.lock().keys().cloned().collect())
    }

    fn is_restricted(&self) -> bool {
        self.restricted
    }
}

// ---------------------------------------------------------------------------
// Input source
// ---------------------------------------------------------------------------

/// Blocking text input for the read opcodes.
pub trait InputSource: Send + Sync {
    /// One line without its trailing newline.
    fn read_line(&self) -> Result<String, ProviderError>;
    /// Exactly `count` characters, or fewer at end of input.
    fn read_chars(&self, count: usize) -> Result<String, ProviderError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StdinInput;

impl InputSource for StdinInput {
    fn read_line(&self) -> Result<String, ProviderError> {
        let mut line = String::new();
        let read = std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| ProviderError::io("stdin", e))?;
        if read == 0 {
            return Err(ProviderError::EndOfInput);
        }
        let trimmed = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed);
        Ok(line)
    }

    fn read_chars(&self, count: usize) -> Result<String, ProviderError> {
        let mut out = String::new();
        let mut pending = Vec::new();
        let stdin = std::io::stdin();
        let mut bytes = stdin.lock().bytes();
        while out.chars().count() < count {
            match bytes.next() {
                Some(Ok(b)) => {
                    pending.push(b);
                    if let Ok(text) = std::str::from_utf8(&pending) {
                        out.push_str(text);
                        pending.clear();
                    }
                }
                Some(Err(e)) => return Err(ProviderError::io("stdin", e)),
                None => break,
            }
        }
        Ok(out)
    }
}

/// Pre-recorded input, consumed front to back.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    remaining: Mutex<VecDeque<char>>,
}

impl ScriptedInput {
    pub fn new(text: &str) -> Self {
        Self {
            remaining: Mutex::new(text.chars().collect()),
        }
    }
}

impl InputSource for ScriptedInput {
    fn read_line(&self) -> Result<String, ProviderError> {
        let mut remaining = self.remaining.lock();
        if remaining.is_empty() {
            return Err(ProviderError::EndOfInput);
        }
        let mut line = String::new();
        while let Some(ch) = remaining.pop_front() {
            if ch == '\n' {
                break;
            }
            line.push(ch);
        }
        Ok(line)
    }

    fn read_chars(&self, count: usize) -> Result<String, ProviderError> {
        let mut remaining = self.remaining.lock();
        let take = count.min(remaining.len());
        Ok(remaining.drain(..take).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_sink_writes_text_unchanged() {
        let mut out = Vec::new();
        StderrSink::write_to(&mut out, "ab");
        StderrSink::write_to(&mut out, "c");
        assert_eq!(out, b"abc");
    }

    #[test]
    fn buffer_sink_clones_share_lines() {
        let sink = BufferSink::new();
        let other = sink.clone();
        other.write("a");
        sink.write("b");
        assert_eq!(sink.lines(), vec!["a", "b"]);
        assert_eq!(other.contents(), "ab");
    }

    #[test]
    fn memory_files_crud() {
        let files = MemoryFiles::new().with_file("a", b"1");
        files.write("b", b"2", Access::USER).unwrap();
        assert_eq!(files.list().unwrap(), vec!["a", "b"]);
        assert_eq!(files.read("b").unwrap(), b"2");
        files.delete("a", Access::USER).unwrap();
        assert!(matches!(files.read("a"), Err(ProviderError::NotFound(_))));
        assert!(matches!(
            files.delete("a", Access::USER),
            Err(ProviderError::NotFound(_))
        ));
    }

    #[test]
    fn restricted_memory_files_need_superuser() {
        let files = MemoryFiles::new().restricted(true);
        assert!(matches!(
            files.write("x", b"", Access::USER),
            Err(ProviderError::PermissionDenied(_))
        ));
        files.write("x", b"ok", Access::SUPERUSER).unwrap();
        assert!(files.read("x").is_ok());
        assert!(files.is_restricted());
    }

    #[test]
    fn run_command_is_unsupported_by_default() {
        let files = MemoryFiles::new();
        assert!(matches!(
            files.run_command("ls", Access::SUPERUSER),
            Err(ProviderError::Unsupported(_))
        ));
    }

    #[test]
    fn scripted_input_lines_and_chars() {
        let input = ScriptedInput::new("first\nsecond\nxyz");
        assert_eq!(input.read_line().unwrap(), "first");
        assert_eq!(input.read_chars(3).unwrap(), "sec");
        assert_eq!(input.read_line().unwrap(), "ond");
        assert_eq!(input.read_chars(10).unwrap(), "xyz");
        assert!(matches!(input.read_line(), Err(ProviderError::EndOfInput)));
    }
}
