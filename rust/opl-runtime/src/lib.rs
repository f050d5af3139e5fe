//! OPL Runtime
//!
//! Capabilities the VM borrows from its host: where printed text goes, where
//! files live, where input comes from. Also the panic boundary used around
//! extension calls and thread joins.

pub mod panic_boundary;
pub mod providers;

pub use providers::{
    Access, BufferSink, FileProvider, InputSource, MemoryFiles, PrintSink, ProviderError,
    ScriptedInput, StderrSink, StdinInput,
};
