//! Namespaced memory.
//!
//! A [`Namespace`] maps 32-bit addresses to opaque byte strings. The
//! [`NamespaceTable`] holds every namespace of one execution together with the
//! extension bound to each, and is shared between threads behind a
//! `parking_lot::Mutex`.

use crate::extension::ExtensionHandler;
use crate::vm::VmError;
use opl_core::bytecode::DecodeError;
use opl_core::values::lossy;
use opl_core::wire::{put_framed, put_u32, ByteReader};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Namespace {
    cells: BTreeMap<u32, Vec<u8>>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, addr: u32) -> Option<&[u8]> {
        self.cells.get(&addr).map(Vec::as_slice)
    }

    /// Read a cell, failing on uninitialised addresses.
    pub fn load(&self, addr: u32) -> Result<&[u8], VmError> {
        self.get(addr).ok_or(VmError::UndefinedAddress(addr))
    }

    pub fn set(&mut self, addr: u32, value: Vec<u8>) {
        self.cells.insert(addr, value);
    }

    pub fn remove(&mut self, addr: u32) -> Option<Vec<u8>> {
        self.cells.remove(&addr)
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Addresses in ascending order.
    pub fn addresses(&self) -> impl Iterator<Item = u32> + '_ {
        self.cells.keys().copied()
    }

    /// `(address | length | bytes)*` in ascending address order.
    pub fn snapshot(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (addr, value) in &self.cells {
            put_u32(&mut out, *addr);
            put_framed(&mut out, value);
        }
        out
    }

    pub fn from_snapshot(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = ByteReader::new(bytes);
        let mut cells = BTreeMap::new();
        while !reader.is_empty() {
            let addr = reader.u32("snapshot address")?;
            let value = reader.framed("snapshot value")?;
            cells.insert(addr, value.to_vec());
        }
        Ok(Self { cells })
    }

    /// Replace every cell with the snapshot's contents. A malformed snapshot
    /// leaves the namespace untouched.
    pub fn restore(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        *self = Self::from_snapshot(bytes)?;
        Ok(())
    }

    /// `{addr: 'text', ...}` rendering for the memory dump opcode.
    pub fn debug_render(&self) -> String {
        let mut out = String::from("{");
        for (i, (addr, value)) in self.cells.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{}: {:?}", addr, lossy(value));
        }
        out.push('}');
        out
    }
}

// ---------------------------------------------------------------------------
// NamespaceTable
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Slot {
    memory: Namespace,
    extension: Option<Arc<dyn ExtensionHandler>>,
}

/// Every namespace of an execution, keyed by id. Starts with namespace 0.
pub struct NamespaceTable {
    slots: BTreeMap<u32, Slot>,
}

pub type SharedNamespaces = Arc<Mutex<NamespaceTable>>;

impl Default for NamespaceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceTable {
    pub fn new() -> Self {
        let mut slots = BTreeMap::new();
        slots.insert(0, Slot::default());
        Self { slots }
    }

    pub fn shared() -> SharedNamespaces {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn contains(&self, id: u32) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn get(&self, id: u32) -> Option<&Namespace> {
        self.slots.get(&id).map(|s| &s.memory)
    }

    pub fn memory(&self, id: u32) -> Result<&Namespace, VmError> {
        self.get(id).ok_or(VmError::UndefinedNamespace(id))
    }

    pub fn memory_mut(&mut self, id: u32) -> Result<&mut Namespace, VmError> {
        self.slots
            .get_mut(&id)
            .map(|s| &mut s.memory)
            .ok_or(VmError::UndefinedNamespace(id))
    }

    /// Create namespace `id`. An existing namespace is reset to empty and
    /// loses its extension.
    pub fn create(&mut self, id: u32) {
        self.slots.insert(id, Slot::default());
    }

    /// Delete namespace `id` unless it is the caller's active namespace.
    pub fn delete(&mut self, id: u32, active: u32) -> Result<(), VmError> {
        if id == active {
            return Err(VmError::CannotDeleteActiveNamespace(id));
        }
        self.slots
            .remove(&id)
            .map(|_| ())
            .ok_or(VmError::UndefinedNamespace(id))
    }

    /// Drop every namespace except `keep`.
    pub fn retain_only(&mut self, keep: u32) {
        self.slots.retain(|id, _| *id == keep);
    }

    /// Ids in ascending order.
    pub fn ids(&self) -> Vec<u32> {
        self.slots.keys().copied().collect()
    }

    pub fn extension(&self, id: u32) -> Option<Arc<dyn ExtensionHandler>> {
        self.slots.get(&id).and_then(|s| s.extension.clone())
    }

    pub fn bind(&mut self, id: u32, handler: Arc<dyn ExtensionHandler>) -> Result<(), VmError> {
        let slot = self
            .slots
            .get_mut(&id)
            .ok_or(VmError::UndefinedNamespace(id))?;
        slot.extension = Some(handler);
        Ok(())
    }

    pub fn unbind(&mut self, id: u32) -> Option<Arc<dyn ExtensionHandler>> {
        self.slots.get_mut(&id).and_then(|s| s.extension.take())
    }
}

impl std::fmt::Debug for NamespaceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (id, slot) in &self.slots {
            map.entry(id, &slot.memory);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Namespace {
        let mut ns = Namespace::new();
        ns.set(7, b"seven".to_vec());
        ns.set(1, Vec::new());
        ns.set(u32::MAX, vec![0, 1, 2]);
        ns
    }

    #[test]
    fn snapshot_is_ascending_and_framed() {
        let mut ns = Namespace::new();
        ns.set(2, vec![9]);
        ns.set(1, vec![]);
        assert_eq!(
            ns.snapshot(),
            vec![0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, 1, 9]
        );
    }

    #[test]
    fn restore_of_snapshot_is_identity() {
        let ns = sample();
        let mut other = Namespace::new();
        other.set(99, b"gone".to_vec());
        other.restore(&ns.snapshot()).unwrap();
        assert_eq!(other, ns);
        assert_eq!(Namespace::from_snapshot(&[]).unwrap(), Namespace::new());
    }

    #[test]
    fn truncated_snapshot_leaves_namespace_unchanged() {
        let snap = sample().snapshot();
        let mut target = Namespace::new();
        target.set(5, b"keep".to_vec());
        let before = target.clone();
        assert!(target.restore(&snap[..snap.len() - 1]).is_err());
        assert_eq!(target, before);
    }

    #[test]
    fn load_reports_undefined_address() {
        let ns = Namespace::new();
        assert_eq!(ns.load(4), Err(VmError::UndefinedAddress(4)));
    }

    #[test]
    fn table_starts_with_zero() {
        let table = NamespaceTable::new();
        assert_eq!(table.ids(), vec![0]);
    }

    #[test]
    fn deleting_active_namespace_fails_and_keeps_table() {
        let mut table = NamespaceTable::new();
        table.create(3);
        assert_eq!(
            table.delete(3, 3),
            Err(VmError::CannotDeleteActiveNamespace(3))
        );
        assert_eq!(table.ids(), vec![0, 3]);
        assert_eq!(table.delete(8, 0), Err(VmError::UndefinedNamespace(8)));
        table.delete(3, 0).unwrap();
        assert_eq!(table.ids(), vec![0]);
    }

    #[test]
    fn create_resets_existing_namespace() {
        let mut table = NamespaceTable::new();
        table.memory_mut(0).unwrap().set(1, vec![1]);
        table.create(0);
        assert!(table.memory(0).unwrap().is_empty());
    }

    #[test]
    fn retain_only_keeps_one() {
        let mut table = NamespaceTable::new();
        table.create(1);
        table.create(2);
        table.retain_only(1);
        assert_eq!(table.ids(), vec![1]);
    }

    #[test]
    fn debug_render_lists_cells() {
        let mut ns = Namespace::new();
        ns.set(1, b"hi".to_vec());
        ns.set(2, vec![]);
        assert_eq!(ns.debug_render(), r#"{1: "hi", 2: ""}"#);
    }
}
