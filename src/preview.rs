//! Scoped preview references for selected images.
//!
//! A [`Preview`] is an opaque handle to image bytes registered in a
//! [`PreviewStore`]. The registration lives exactly as long as the handle:
//! dropping the handle revokes it.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

const REFERENCE_PREFIX: &str = "blob:hemalyzer/";

#[derive(Default)]
struct StoreInner {
    next_id: u64,
    live: HashMap<u64, Arc<[u8]>>,
}

/// Registry of live preview references.
#[derive(Clone, Default)]
pub struct PreviewStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl PreviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `bytes` and returns the handle that keeps them reachable.
    pub fn create(&self, bytes: Arc<[u8]>) -> Preview {
        let mut inner = lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.live.insert(id, bytes);
        Preview {
            id,
            store: self.inner.clone(),
        }
    }

    /// Looks up the bytes behind a reference, if it is still live.
    pub fn resolve(&self, reference: &str) -> Option<Arc<[u8]>> {
        let id = reference.strip_prefix(REFERENCE_PREFIX)?.parse().ok()?;
        lock(&self.inner).live.get(&id).cloned()
    }

    /// Number of references not yet released.
    pub fn live_count(&self) -> usize {
        lock(&self.inner).live.len()
    }
}

impl fmt::Debug for PreviewStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewStore")
            .field("live", &self.live_count())
            .finish()
    }
}

/// Handle to a registered preview. Released on drop.
pub struct Preview {
    id: u64,
    store: Arc<Mutex<StoreInner>>,
}

impl Preview {
    /// The opaque reference string, e.g. `blob:hemalyzer/3`.
    pub fn reference(&self) -> String {
        format!("{REFERENCE_PREFIX}{}", self.id)
    }
}

impl fmt::Debug for Preview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Preview").field(&self.reference()).finish()
    }
}

impl Drop for Preview {
    fn drop(&mut self) {
        if lock(&self.store).live.remove(&self.id).is_some() {
            log::debug!("Released preview {}", self.id);
        }
    }
}

fn lock(inner: &Mutex<StoreInner>) -> MutexGuard<'_, StoreInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}
