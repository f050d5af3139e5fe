//! OPL VM: executes binary OPL programs over namespaced byte memory.

pub mod extension;
pub mod namespace;
pub mod plugin;
pub mod vm;

pub use extension::{ExtensionContext, ExtensionError, ExtensionHandler, ExtensionRegistry};
pub use namespace::{Namespace, NamespaceTable, SharedNamespaces};
pub use vm::{ErrorMode, ExecOptions, Execution, Vm, VmError, ERROR_MARKER};
