//! Single-flight access to a shared, mutable backend.

use crate::error::{LongvoxError, Result};
use std::sync::{Mutex, MutexGuard};

/// Owns one backend instance and serializes every call against it.
///
/// Unloading and inference take the same lock, so shutdown waits for an
/// in-flight chunk and two jobs never interleave on the same model.
pub struct BackendGate<B: ?Sized> {
    name: String,
    slot: Mutex<Option<Box<B>>>,
}

impl<B: ?Sized> BackendGate<B> {
    pub fn loaded(name: impl Into<String>, backend: Box<B>) -> Self {
        Self {
            name: name.into(),
            slot: Mutex::new(Some(backend)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the loaded instance; later calls fail with `BackendUnavailable`.
    pub fn unload(&self) -> Result<Option<Box<B>>> {
        tracing::info!(backend = %self.name, "unloading backend");
        Ok(self.lock()?.take())
    }

    /// Run `f` against the loaded backend while holding the gate.
    pub fn with<R>(&self, f: impl FnOnce(&mut B) -> Result<R>) -> Result<R> {
        let mut slot = self.lock()?;
        match slot.as_deref_mut() {
            Some(backend) => f(backend),
            None => Err(LongvoxError::BackendUnavailable {
                backend: self.name.clone(),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Box<B>>>> {
        self.slot.lock().map_err(|_| {
            LongvoxError::Other(format!(
                "backend '{}' lock poisoned by a panicking call",
                self.name
            ))
        })
    }
}
