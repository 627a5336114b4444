//! Before-images of applied writes, used to put a half-applied commit back.

use super::TransactionalCache;
use crate::container::{CacheStore, StoredValue};
use crate::error::Result;
use crate::types::{Flag, InvocationOptions, Modification};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// What one key held before a write touched it.
#[derive(Debug)]
struct BeforeImage {
    key: Bytes,
    previous: Option<StoredValue>,
}

/// Before-images recorded while a batch of writes is applied.
///
/// Images are recorded before each write runs, so a write that fails part
/// way is covered too.
#[derive(Debug, Default)]
pub(super) struct UndoLog {
    images: Vec<BeforeImage>,
}

impl TransactionalCache {
    /// Apply a write after recording what it is about to overwrite.
    pub(super) fn apply_logged(
        &self,
        undo: &mut UndoLog,
        modification: &Modification,
        options: &InvocationOptions,
    ) -> Result<Option<Bytes>> {
        match modification.key() {
            Some(key) => {
                let previous = self.before_image(key, options)?;
                undo.images.push(BeforeImage {
                    key: Bytes::copy_from_slice(key),
                    previous,
                });
            }
            None => {
                for key in self.container.keys() {
                    if let Some(entry) = self.container.peek(&key).filter(|e| !e.stored().is_expired()) {
                        undo.images.push(BeforeImage {
                            key,
                            previous: Some(entry.into_stored_value()),
                        });
                    }
                }
            }
        }
        self.apply(modification, options)
    }

    /// Restore every recorded key, newest first.
    ///
    /// Store failures during the restore are logged and skipped so the
    /// remaining keys are still put back.
    pub(super) fn revert(&self, undo: UndoLog, options: &InvocationOptions) {
        let store = self.active_store(options);
        let restored = undo.images.len();
        for image in undo.images.into_iter().rev() {
            match image.previous {
                Some(previous) => {
                    if let Some(store) = store {
                        if let Err(e) = store.store(image.key.clone(), &previous) {
                            warn!(error = %e, "could not restore stored value");
                        }
                    }
                    self.container.insert(image.key, previous);
                }
                None => {
                    self.container.remove(&image.key);
                    if let Some(store) = store {
                        if let Err(e) = store.remove(&image.key) {
                            warn!(error = %e, "could not remove stored value");
                        }
                    }
                }
            }
        }
        debug!(restored, "applied writes reverted");
    }

    fn before_image(&self, key: &[u8], options: &InvocationOptions) -> Result<Option<StoredValue>> {
        if let Some(entry) = self.container.peek(key) {
            if !entry.stored().is_expired() {
                return Ok(Some(entry.into_stored_value()));
            }
        }
        match self.active_store(options) {
            Some(store) => Ok(store.load(key)?.filter(|stored| !stored.is_expired())),
            None => Ok(None),
        }
    }

    pub(super) fn active_store(&self, options: &InvocationOptions) -> Option<&Arc<dyn CacheStore>> {
        self.store
            .as_ref()
            .filter(|_| !options.has(Flag::SkipCacheStore))
    }
}
