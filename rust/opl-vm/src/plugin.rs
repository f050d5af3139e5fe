//! C-ABI extension plugins loaded from shared libraries.
//!
//! A plugin exports:
//!
//! - `opl_plugin_abi_version() -> u32`, which must equal [`OPL_PLUGIN_ABI_VERSION`]
//! - `opl_plugin_claimed_opcodes(out: *mut u32, cap: usize) -> usize`, which
//!   writes up to `cap` opcodes and returns the total count
//! - `opl_plugin_handle(host, opcode, args, argc) -> i32`
//! - optionally `opl_plugin_on_begin` and `opl_plugin_on_end` with the same
//!   signature as `opl_plugin_handle`
//!
//! Hooks return 0 on success. They reach VM memory only through the
//! [`OplHost`] function table, which is valid for the duration of one call.

use crate::extension::{ExtensionContext, ExtensionError, ExtensionHandler};
use libloading::Library;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const OPL_PLUGIN_ABI_VERSION: u32 = 1;

/// One instruction argument, borrowed for the duration of a hook call.
#[repr(C)]
pub struct OplArg {
    pub ptr: *const u8,
    pub len: usize,
}

/// Callbacks into the VM handed to every hook.
///
/// `read` copies at most `cap` bytes of the cell into `buf` and returns the
/// full length of the value, or -1 when the address is undefined. `write`
/// returns 0 on success.
#[repr(C)]
pub struct OplHost {
    pub ctx: *mut c_void,
    pub read: unsafe extern "C" fn(ctx: *mut c_void, addr: u32, buf: *mut u8, cap: usize) -> i64,
    pub write: unsafe extern "C" fn(ctx: *mut c_void, addr: u32, data: *const u8, len: usize) -> i32,
    pub emit: unsafe extern "C" fn(ctx: *mut c_void, data: *const u8, len: usize),
}

pub type HookFn =
    unsafe extern "C" fn(host: *const OplHost, opcode: u32, args: *const OplArg, argc: usize) -> i32;
type AbiVersionFn = unsafe extern "C" fn() -> u32;
type ClaimedOpcodesFn = unsafe extern "C" fn(out: *mut u32, cap: usize) -> usize;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("cannot load plugin {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: libloading::Error,
    },
    #[error("plugin {path} does not export {symbol}")]
    MissingSymbol {
        path: String,
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },
    #[error("plugin {path} uses ABI version {found}, expected {expected}")]
    AbiMismatch {
        path: String,
        found: u32,
        expected: u32,
    },
}

// ---------------------------------------------------------------------------
// Host callbacks
// ---------------------------------------------------------------------------

unsafe extern "C" fn host_read(ctx: *mut c_void, addr: u32, buf: *mut u8, cap: usize) -> i64 {
    let ctx = &*(ctx as *const ExtensionContext<'_>);
    match ctx.read(addr) {
        Ok(value) => {
            let n = value.len().min(cap);
            if n > 0 && !buf.is_null() {
                std::ptr::copy_nonoverlapping(value.as_ptr(), buf, n);
            }
            value.len() as i64
        }
        Err(_) => -1,
    }
}

unsafe extern "C" fn host_write(ctx: *mut c_void, addr: u32, data: *const u8, len: usize) -> i32 {
    let ctx = &mut *(ctx as *mut ExtensionContext<'_>);
    match ctx.write(addr, raw_bytes(data, len).to_vec()) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

unsafe extern "C" fn host_emit(ctx: *mut c_void, data: *const u8, len: usize) {
    let ctx = &mut *(ctx as *mut ExtensionContext<'_>);
    ctx.emit(raw_bytes(data, len));
}

unsafe fn raw_bytes<'a>(data: *const u8, len: usize) -> &'a [u8] {
    if data.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(data, len)
    }
}

// ---------------------------------------------------------------------------
// PluginHandler
// ---------------------------------------------------------------------------

pub struct PluginHandler {
    name: String,
    claimed: Vec<u32>,
    handle: HookFn,
    on_begin: Option<HookFn>,
    on_end: Option<HookFn>,
    // Declared last so the hooks above never outlive the code they point into.
    _library: Option<Library>,
}

impl PluginHandler {
    /// Load a plugin from `path` and check its ABI version.
    pub fn load(name: &str, path: &Path) -> Result<Self, PluginError> {
        let shown = path.display().to_string();
        // SAFETY: loading runs the library's initialisers; plugin directories
        // are configured by the host, never by the program being executed.
        let library = unsafe { Library::new(path) }.map_err(|source| PluginError::Load {
            path: shown.clone(),
            source,
        })?;

        // SAFETY: symbol types follow the documented plugin ABI.
        let (version, claimed_fn, handle, on_begin, on_end) = unsafe {
            let version: AbiVersionFn = required(&library, &shown, "opl_plugin_abi_version")?;
            let claimed_fn: ClaimedOpcodesFn =
                required(&library, &shown, "opl_plugin_claimed_opcodes")?;
            let handle: HookFn = required(&library, &shown, "opl_plugin_handle")?;
            let on_begin = library.get::<HookFn>(b"opl_plugin_on_begin").ok().map(|s| *s);
            let on_end = library.get::<HookFn>(b"opl_plugin_on_end").ok().map(|s| *s);
            (version(), claimed_fn, handle, on_begin, on_end)
        };

        if version != OPL_PLUGIN_ABI_VERSION {
            return Err(PluginError::AbiMismatch {
                path: shown,
                found: version,
                expected: OPL_PLUGIN_ABI_VERSION,
            });
        }

        // SAFETY: the callee writes at most `cap` entries into the buffer.
        let claimed = unsafe {
            let mut buf = vec![0u32; 64];
            let total = claimed_fn(buf.as_mut_ptr(), buf.len());
            if total > buf.len() {
                buf.resize(total, 0);
                claimed_fn(buf.as_mut_ptr(), buf.len());
            }
            buf.truncate(total);
            buf
        };

        tracing::debug!(plugin = name, path = %shown, opcodes = ?claimed, "loaded plugin");
        Ok(Self {
            name: name.to_string(),
            claimed,
            handle,
            on_begin,
            on_end,
            _library: Some(library),
        })
    }

    /// Build a handler from hooks linked into the host binary.
    ///
    /// # Safety
    ///
    /// Every hook must follow the plugin ABI: it may only touch memory
    /// through the host table and the argument slice it receives.
    pub unsafe fn from_hooks(
        name: impl Into<String>,
        claimed: Vec<u32>,
        handle: HookFn,
        on_begin: Option<HookFn>,
        on_end: Option<HookFn>,
    ) -> Self {
        Self {
            name: name.into(),
            claimed,
            handle,
            on_begin,
            on_end,
            _library: None,
        }
    }

    fn call(
        &self,
        hook: HookFn,
        ctx: &mut ExtensionContext<'_>,
        opcode: u32,
        args: &[Vec<u8>],
    ) -> Result<(), ExtensionError> {
        let raw_args: Vec<OplArg> = args
            .iter()
            .map(|a| OplArg {
                ptr: a.as_ptr(),
                len: a.len(),
            })
            .collect();
        let host = OplHost {
            ctx: ctx as *mut ExtensionContext<'_> as *mut c_void,
            read: host_read,
            write: host_write,
            emit: host_emit,
        };
        // SAFETY: `host` and `raw_args` outlive the call; the callbacks only
        // dereference `ctx`, which is exclusively borrowed here.
        let status = unsafe { hook(&host, opcode, raw_args.as_ptr(), raw_args.len()) };
        if status == 0 {
            Ok(())
        } else {
            Err(ExtensionError(format!(
                "plugin {} failed on opcode {} with status {}",
                self.name, opcode, status
            )))
        }
    }
}

impl ExtensionHandler for PluginHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn claimed_opcodes(&self) -> &[u32] {
        &self.claimed
    }

    fn on_begin(
        &self,
        ctx: &mut ExtensionContext<'_>,
        opcode: u32,
        args: &[Vec<u8>],
    ) -> Result<(), ExtensionError> {
        match self.on_begin {
            Some(hook) => self.call(hook, ctx, opcode, args),
            None => Ok(()),
        }
    }

    fn on_end(
        &self,
        ctx: &mut ExtensionContext<'_>,
        opcode: u32,
        args: &[Vec<u8>],
    ) -> Result<(), ExtensionError> {
        match self.on_end {
            Some(hook) => self.call(hook, ctx, opcode, args),
            None => Ok(()),
        }
    }

    fn handle(
        &self,
        ctx: &mut ExtensionContext<'_>,
        opcode: u32,
        args: &[Vec<u8>],
    ) -> Result<(), ExtensionError> {
        self.call(self.handle, ctx, opcode, args)
    }
}

unsafe fn required<T: Copy>(
    library: &Library,
    path: &str,
    symbol: &'static str,
) -> Result<T, PluginError> {
    library
        .get::<T>(symbol.as_bytes())
        .map(|s| *s)
        .map_err(|source| PluginError::MissingSymbol {
            path: path.to_string(),
            symbol,
            source,
        })
}

/// Locate `name` as a platform shared library (`libname.so`, `name.dll`,
/// ...) in the first directory that has it. Names containing path
/// separators are never resolved.
pub fn find_plugin(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
        return None;
    }
    let file = libloading::library_filename(name);
    dirs.iter()
        .map(|dir| dir.join(&file))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::NamespaceTable;

    // Doubles the value at the address given in arg0 and emits "ok".
    unsafe extern "C" fn double_handle(
        host: *const OplHost,
        _opcode: u32,
        args: *const OplArg,
        argc: usize,
    ) -> i32 {
        let host = &*host;
        if argc != 1 {
            return 2;
        }
        let arg = &*args;
        let addr_bytes = std::slice::from_raw_parts(arg.ptr, arg.len);
        let addr = u32::from_be_bytes([addr_bytes[0], addr_bytes[1], addr_bytes[2], addr_bytes[3]]);
        let mut buf = [0u8; 16];
        let len = (host.read)(host.ctx, addr, buf.as_mut_ptr(), buf.len());
        if len < 0 {
            return 3;
        }
        let mut doubled = buf[..len as usize].to_vec();
        doubled.extend_from_within(..);
        (host.write)(host.ctx, addr, doubled.as_ptr(), doubled.len());
        (host.emit)(host.ctx, b"ok".as_ptr(), 2);
        0
    }

    unsafe extern "C" fn failing_hook(
        _host: *const OplHost,
        _opcode: u32,
        _args: *const OplArg,
        _argc: usize,
    ) -> i32 {
        7
    }

    #[test]
    fn hooks_reach_memory_through_host_table() {
        let handler = unsafe { PluginHandler::from_hooks("double", vec![210], double_handle, None, None) };
        let namespaces = NamespaceTable::shared();
        namespaces.lock().memory_mut(0).unwrap().set(5, b"ab".to_vec());
        let mut output = Vec::new();
        let mut ctx = ExtensionContext {
            namespaces: &namespaces,
            active: 0,
            ip: 0,
            output: &mut output,
            sink: None,
        };
        handler
            .handle(&mut ctx, 210, &[5u32.to_be_bytes().to_vec()])
            .unwrap();
        assert_eq!(output, b"ok");
        assert_eq!(namespaces.lock().memory(0).unwrap().get(5), Some(&b"abab"[..]));
        assert!(handler.claims(210));
    }

    #[test]
    fn nonzero_status_is_an_error() {
        let handler = unsafe {
            PluginHandler::from_hooks("bad", vec![], failing_hook, Some(failing_hook), None)
        };
        let namespaces = NamespaceTable::shared();
        let mut output = Vec::new();
        let mut ctx = ExtensionContext {
            namespaces: &namespaces,
            active: 0,
            ip: 0,
            output: &mut output,
            sink: None,
        };
        let err = handler.on_begin(&mut ctx, 1, &[]).unwrap_err();
        assert!(err.0.contains("status 7"));
        assert!(handler.on_end(&mut ctx, 1, &[]).is_ok());
    }

    #[test]
    fn find_plugin_searches_dirs_in_order() {
        let dir = std::env::temp_dir().join(format!("opl_plugin_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join(libloading::library_filename("demo"));
        std::fs::write(&file, b"not really a library").unwrap();

        let dirs = vec![PathBuf::from("/nonexistent/opl"), dir.clone()];
        assert_eq!(find_plugin("demo", &dirs), Some(file.clone()));
        assert_eq!(find_plugin("other", &dirs), None);
        assert_eq!(find_plugin("../demo", &dirs), None);

        assert!(matches!(
            PluginHandler::load("demo", &file),
            Err(PluginError::Load { .. })
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
