//! Pluggable opcode handlers.
//!
//! An [`ExtensionHandler`] is bound to one namespace. While bound, the VM
//! calls `on_begin` before and `on_end` after every instruction executed with
//! that namespace active, and routes opcodes the VM does not know natively to
//! `handle` when the handler claims them.

use crate::namespace::SharedNamespaces;
use crate::vm::VmError;
use opl_runtime::PrintSink;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ExtensionError(pub String);

impl ExtensionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<VmError> for ExtensionError {
    fn from(err: VmError) -> Self {
        Self(err.to_string())
    }
}

pub trait ExtensionHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Opcode numbers routed to [`handle`](Self::handle).
    fn claimed_opcodes(&self) -> &[u32];

    fn claims(&self, opcode: u32) -> bool {
        self.claimed_opcodes().contains(&opcode)
    }

    fn on_begin(
        &self,
        ctx: &mut ExtensionContext<'_>,
        opcode: u32,
        args: &[Vec<u8>],
    ) -> Result<(), ExtensionError> {
        let _ = (ctx, opcode, args);
        Ok(())
    }

    fn on_end(
        &self,
        ctx: &mut ExtensionContext<'_>,
        opcode: u32,
        args: &[Vec<u8>],
    ) -> Result<(), ExtensionError> {
        let _ = (ctx, opcode, args);
        Ok(())
    }

    fn handle(
        &self,
        ctx: &mut ExtensionContext<'_>,
        opcode: u32,
        args: &[Vec<u8>],
    ) -> Result<(), ExtensionError>;
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// What a handler may touch during one call. Memory access locks the
/// namespace table for the duration of that single access.
pub struct ExtensionContext<'a> {
    pub(crate) namespaces: &'a SharedNamespaces,
    pub(crate) active: u32,
    pub(crate) ip: usize,
    pub(crate) output: &'a mut Vec<u8>,
    pub(crate) sink: Option<&'a dyn PrintSink>,
}

impl<'a> ExtensionContext<'a> {
    pub fn read(&self, addr: u32) -> Result<Vec<u8>, ExtensionError> {
        let table = self.namespaces.lock();
        let value = table.memory(self.active)?.load(addr)?;
        Ok(value.to_vec())
    }

    pub fn write(&mut self, addr: u32, value: Vec<u8>) -> Result<(), ExtensionError> {
        let mut table = self.namespaces.lock();
        table.memory_mut(self.active)?.set(addr, value);
        Ok(())
    }

    pub fn delete(&mut self, addr: u32) -> Result<(), ExtensionError> {
        let mut table = self.namespaces.lock();
        table
            .memory_mut(self.active)?
            .remove(addr)
            .map(|_| ())
            .ok_or_else(|| VmError::UndefinedAddress(addr).into())
    }

    /// Append to the execution's output buffer.
    pub fn emit(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
    }

    pub fn print(&self, text: &str) {
        if let Some(sink) = self.sink {
            sink.write(text);
        }
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn active_namespace(&self) -> u32 {
        self.active
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub type ExtensionFactory = Arc<dyn Fn() -> Arc<dyn ExtensionHandler> + Send + Sync>;

/// Host-supplied handlers, looked up by name when a program binds one.
#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    factories: BTreeMap<String, ExtensionFactory>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory; every bind gets a fresh handler.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn ExtensionHandler> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Register one shared handler instance under its own name.
    pub fn register_handler(&mut self, handler: Arc<dyn ExtensionHandler>) {
        let name = handler.name().to_string();
        self.register(name, move || handler.clone());
    }

    pub fn create(&self, name: &str) -> Option<Arc<dyn ExtensionHandler>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::NamespaceTable;

    struct Echo;

    impl ExtensionHandler for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn claimed_opcodes(&self) -> &[u32] {
            &[200, 201]
        }

        fn handle(
            &self,
            ctx: &mut ExtensionContext<'_>,
            _opcode: u32,
            args: &[Vec<u8>],
        ) -> Result<(), ExtensionError> {
            for arg in args {
                ctx.emit(arg);
            }
            Ok(())
        }
    }

    #[test]
    fn claims_defaults_to_claimed_list() {
        assert!(Echo.claims(200));
        assert!(!Echo.claims(199));
    }

    #[test]
    fn registry_creates_by_name() {
        let mut registry = ExtensionRegistry::new();
        registry.register_handler(Arc::new(Echo));
        assert!(registry.contains("echo"));
        assert_eq!(registry.create("echo").map(|h| h.name().to_string()), Some("echo".into()));
        assert!(registry.create("missing").is_none());
    }

    #[test]
    fn context_reads_and_writes_active_namespace() {
        let namespaces = NamespaceTable::shared();
        namespaces.lock().create(4);
        let mut output = Vec::new();
        let mut ctx = ExtensionContext {
            namespaces: &namespaces,
            active: 4,
            ip: 9,
            output: &mut output,
            sink: None,
        };
        ctx.write(1, b"x".to_vec()).unwrap();
        assert_eq!(ctx.read(1).unwrap(), b"x");
        assert!(ctx.read(2).is_err());
        ctx.delete(1).unwrap();
        assert!(ctx.delete(1).is_err());
        ctx.emit(b"out");
        assert_eq!(ctx.ip(), 9);
        assert_eq!(ctx.active_namespace(), 4);
        assert_eq!(output, b"out");
        assert!(namespaces.lock().memory(0).unwrap().is_empty());
    }
}
