//! Opening plugin binaries
//!
//! A [`BinaryLoader`] turns a file into a [`LoadedBinary`]: the module
//! description exported by the binary plus whatever keeps the code behind it
//! mapped. Dropping the last reference to a [`LoadedBinary`] unmaps the code.

use crate::error::LoadError;
use libloading::{Library, Symbol};
use parking_lot::RwLock;
use plughost_api::descriptor::{
    AbiVersionFn, ModuleEntryFn, ABI_VERSION, ABI_VERSION_SYMBOL, MODULE_ENTRY_SYMBOL,
};
use plughost_api::PluginModule;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A binary mapped into the process
///
/// Field order matters: the module holds function pointers into the library,
/// so it is dropped first.
pub struct LoadedBinary {
    module: PluginModule,
    path: PathBuf,
    library: Option<Library>,
}

impl fmt::Debug for LoadedBinary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedBinary")
            .field("module", &self.module.name)
            .field("version", &self.module.version)
            .field("path", &self.path)
            .field("native", &self.library.is_some())
            .finish()
    }
}

impl LoadedBinary {
    /// Binary backed by a shared library
    pub fn native(module: PluginModule, path: impl Into<PathBuf>, library: Library) -> Self {
        Self {
            module,
            path: path.into(),
            library: Some(library),
        }
    }

    /// Binary whose code is linked into the host
    pub fn in_process(module: PluginModule, path: impl Into<PathBuf>) -> Self {
        Self {
            module,
            path: path.into(),
            library: None,
        }
    }

    /// Module description
    pub fn module(&self) -> &PluginModule {
        &self.module
    }

    /// Declared version
    pub fn version(&self) -> &str {
        &self.module.version
    }

    /// Path the binary was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LoadedBinary {
    fn drop(&mut self) {
        debug!(
            module = %self.module.name,
            path = %self.path.display(),
            "Releasing plugin binary"
        );
    }
}

/// Strategy for opening binaries
pub trait BinaryLoader: Send + Sync + fmt::Debug {
    /// Open the binary at `load_path`
    ///
    /// `original` is the path the caller asked for; `load_path` is the file
    /// actually opened, which differs when shadow copies are enabled.
    fn open(&self, original: &Path, load_path: &Path) -> Result<LoadedBinary, LoadError>;
}

/// Loads `cdylib` plugins with `libloading`
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl NativeLoader {
    /// Create a new native loader
    pub fn new() -> Self {
        Self
    }
}

impl BinaryLoader for NativeLoader {
    fn open(&self, _original: &Path, load_path: &Path) -> Result<LoadedBinary, LoadError> {
        let symbol_error = |symbol: &[u8]| LoadError::SymbolNotFound {
            path: load_path.to_path_buf(),
            symbol: String::from_utf8_lossy(symbol).into_owned(),
        };

        // Safety: loading foreign code runs its initialisers. The ABI version
        // is checked before any Rust type crosses the boundary.
        let library = unsafe { Library::new(load_path) }.map_err(|e| LoadError::Load {
            path: load_path.to_path_buf(),
            message: e.to_string(),
        })?;

        let module = unsafe {
            let abi_version: Symbol<'_, AbiVersionFn> = library
                .get(ABI_VERSION_SYMBOL)
                .map_err(|_| symbol_error(ABI_VERSION_SYMBOL))?;

            let found = abi_version();
            if found != ABI_VERSION {
                return Err(LoadError::AbiMismatch {
                    expected: ABI_VERSION,
                    found,
                });
            }

            let entry: Symbol<'_, ModuleEntryFn> = library
                .get(MODULE_ENTRY_SYMBOL)
                .map_err(|_| symbol_error(MODULE_ENTRY_SYMBOL))?;

            let raw = entry();
            if raw.is_null() {
                return Err(LoadError::NullModule(load_path.to_path_buf()));
            }

            *Box::from_raw(raw)
        };

        debug!(
            module = %module.name,
            version = %module.version,
            types = module.types.len(),
            path = %load_path.display(),
            "Opened native plugin binary"
        );

        Ok(LoadedBinary::native(module, load_path, library))
    }
}

/// Module factory for binaries linked into the host
pub type StaticModuleFn = fn() -> PluginModule;

/// Serves modules compiled into the host, keyed by binary file name
///
/// The file must still exist on disk; only its name is used to pick the
/// module. Useful for statically linked plugins and for tests.
#[derive(Debug, Default)]
pub struct StaticLoader {
    modules: RwLock<HashMap<String, StaticModuleFn>>,
}

impl StaticLoader {
    /// Create an empty loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `build` for binaries named `file_name`
    pub fn register(&self, file_name: impl Into<String>, build: StaticModuleFn) {
        self.modules.write().insert(file_name.into(), build);
    }

    /// Builder variant of [`register`](Self::register)
    pub fn with_module(self, file_name: impl Into<String>, build: StaticModuleFn) -> Self {
        self.register(file_name, build);
        self
    }

    /// Number of registered modules
    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    /// Whether no module is registered
    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }
}

impl BinaryLoader for StaticLoader {
    fn open(&self, original: &Path, load_path: &Path) -> Result<LoadedBinary, LoadError> {
        let file_name = original
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();

        let build = self
            .modules
            .read()
            .get(file_name)
            .copied()
            .ok_or_else(|| LoadError::Load {
                path: original.to_path_buf(),
                message: format!("no static module registered for `{file_name}`"),
            })?;

        let module = std::panic::catch_unwind(build)
            .map_err(|_| LoadError::NullModule(original.to_path_buf()))?;

        Ok(LoadedBinary::in_process(module, load_path))
    }
}
