//! Set of campaigns currently being delivered by this process.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

#[derive(Debug, Clone, Default)]
pub struct ActiveCampaigns {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl ActiveCampaigns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` active. Returns `None` when it already is; the id stays
    /// active until the returned guard is dropped.
    pub fn try_acquire(&self, id: &str) -> Option<ActiveGuard> {
        let inserted = self
            .ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string());
        inserted.then(|| ActiveGuard {
            ids: Arc::clone(&self.ids),
            id: id.to_string(),
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct ActiveGuard {
    ids: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}
