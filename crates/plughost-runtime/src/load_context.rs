//! Isolated load contexts
//!
//! A [`LoadContext`] owns at most one loaded binary, for exactly one load
//! attempt. Its types never leak into another context: every instance gets
//! its own context even when two instances use the same file.

use crate::error::LoadError;
use crate::loader::{BinaryLoader, LoadedBinary};
use plughost_api::TypeDescriptor;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle of a [`LoadContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadContextState {
    /// Nothing loaded yet
    Created,
    /// Binary loaded
    Loaded,
    /// Types enumerated
    TypesResolved,
    /// Strong reference released; reclamation pending
    UnloadRequested,
}

/// Scope owning one loaded binary
pub struct LoadContext {
    name: String,
    path: PathBuf,
    loader: Arc<dyn BinaryLoader>,
    shadow_directory: Option<PathBuf>,
    shadow_path: Option<PathBuf>,
    binary: Option<Arc<LoadedBinary>>,
    tracker: Weak<LoadedBinary>,
    state: LoadContextState,
}

impl fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadContext")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("shadow_path", &self.shadow_path)
            .field("state", &self.state)
            .finish()
    }
}

impl LoadContext {
    /// Create a context for the binary at `path`
    ///
    /// When `shadow_directory` is set the binary is copied there before it is
    /// opened, so the original may be replaced while this copy is in use.
    pub fn new(
        path: impl Into<PathBuf>,
        loader: Arc<dyn BinaryLoader>,
        shadow_directory: Option<PathBuf>,
    ) -> Self {
        let path = path.into();
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("binary");
        let name = format!("{stem}-{}", Uuid::new_v4().simple());

        Self {
            name,
            path,
            loader,
            shadow_directory,
            shadow_path: None,
            binary: None,
            tracker: Weak::new(),
            state: LoadContextState::Created,
        }
    }

    /// Diagnostic name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path the context was created for
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current lifecycle state
    pub fn state(&self) -> LoadContextState {
        self.state
    }

    /// Loaded binary, until unload is requested
    pub fn binary(&self) -> Option<&Arc<LoadedBinary>> {
        self.binary.as_ref()
    }

    /// Copy of the binary that was opened, if shadow copies are enabled
    pub fn shadow_path(&self) -> Option<&Path> {
        self.shadow_path.as_deref()
    }

    pub(crate) fn tracker(&self) -> Weak<LoadedBinary> {
        self.tracker.clone()
    }

    /// Load the binary
    ///
    /// Blocking: copies files and maps code. A context loads once; a second
    /// call fails with [`LoadError::ContextReused`].
    pub fn load(&mut self) -> Result<Arc<LoadedBinary>, LoadError> {
        if self.state != LoadContextState::Created {
            return Err(LoadError::ContextReused(self.name.clone()));
        }

        if !self.path.is_file() {
            return Err(LoadError::BinaryNotFound(self.path.clone()));
        }

        let load_path = match &self.shadow_directory {
            Some(directory) => {
                let copy = self.shadow_copy(directory)?;
                self.shadow_path = Some(copy.clone());
                copy
            }
            None => self.path.clone(),
        };

        let binary = match self.loader.open(&self.path, &load_path) {
            Ok(binary) => Arc::new(binary),
            Err(e) => {
                self.remove_shadow_copy();
                return Err(e);
            }
        };

        debug!(
            context = %self.name,
            path = %self.path.display(),
            version = %binary.version(),
            "Binary loaded"
        );

        self.tracker = Arc::downgrade(&binary);
        self.binary = Some(binary.clone());
        self.state = LoadContextState::Loaded;

        Ok(binary)
    }

    /// Every type of the binary accepted by `predicate`
    ///
    /// Always walks the whole type table.
    pub fn resolve_types<F>(&mut self, predicate: F) -> Vec<TypeDescriptor>
    where
        F: Fn(&TypeDescriptor) -> bool,
    {
        let Some(binary) = &self.binary else {
            return Vec::new();
        };

        let types: Vec<TypeDescriptor> = binary
            .module()
            .types
            .iter()
            .filter(|descriptor| predicate(descriptor))
            .cloned()
            .collect();

        self.state = LoadContextState::TypesResolved;
        types
    }

    /// Whether the binary exposes a type named `type_name`
    pub fn is_resolvable(&self, type_name: &str) -> bool {
        self.binary
            .as_ref()
            .is_some_and(|binary| binary.module().types.iter().any(|t| t.name == type_name))
    }

    /// Release the context's reference to the binary
    ///
    /// Returns immediately. The binary is reclaimed once every other holder
    /// has let go; confirm with
    /// [`UnloadVerifier`](crate::unload::UnloadVerifier).
    pub fn unload(&mut self) {
        if self.binary.take().is_some() {
            debug!(context = %self.name, "Unload requested");
        }
        self.state = LoadContextState::UnloadRequested;
    }

    fn shadow_copy(&self, directory: &Path) -> Result<PathBuf, LoadError> {
        let copy_error = |source| LoadError::ShadowCopy {
            path: self.path.clone(),
            source,
        };

        fs::create_dir_all(directory).map_err(copy_error)?;

        let mut file_name = self.name.clone();
        if let Some(extension) = self.path.extension().and_then(|ext| ext.to_str()) {
            file_name.push('.');
            file_name.push_str(extension);
        }
        let target = directory.join(file_name);

        fs::copy(&self.path, &target).map_err(copy_error)?;
        debug!(
            context = %self.name,
            from = %self.path.display(),
            to = %target.display(),
            "Shadow copy created"
        );

        Ok(target)
    }

    fn remove_shadow_copy(&mut self) {
        if let Some(copy) = self.shadow_path.take() {
            if let Err(e) = fs::remove_file(&copy) {
                warn!(path = %copy.display(), error = %e, "Failed to remove shadow copy");
            }
        }
    }
}

impl Drop for LoadContext {
    fn drop(&mut self) {
        if self.binary.is_some() {
            debug!(context = %self.name, "Load context dropped without explicit unload");
            self.unload();
        }
    }
}
