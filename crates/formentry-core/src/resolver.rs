//! Memoising form lookups.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use formentry_model::{FormDescriptor, FormId};
use tracing::debug;

use crate::error::StoreError;
use crate::ports::FormResolver;

/// Caches descriptors returned by an inner resolver.
///
/// Only hits are cached, so a form added after a miss is picked up on the
/// next lookup. Stale entries stay until [`invalidate`](Self::invalidate) or
/// [`clear`](Self::clear) is called.
pub struct CachingFormResolver {
    inner: Arc<dyn FormResolver>,
    cache: Mutex<HashMap<FormId, FormDescriptor>>,
}

impl CachingFormResolver {
    pub fn new(inner: Arc<dyn FormResolver>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Drops the cached descriptor for one form.
    pub fn invalidate(&self, id: FormId) {
        self.lock().remove(&id);
    }

    /// Drops every cached descriptor.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of cached descriptors.
    pub fn cached(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<FormId, FormDescriptor>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FormResolver for CachingFormResolver {
    fn by_id(&self, id: FormId) -> Result<Option<FormDescriptor>, StoreError> {
        if let Some(form) = self.lock().get(&id) {
            debug!(form_id = %id, "Using cached form");
            return Ok(Some(form.clone()));
        }
        let found = self.inner.by_id(id)?;
        if let Some(form) = &found {
            self.lock().insert(id, form.clone());
        }
        Ok(found)
    }
}
