//! Per-record processing claims.
//!
//! At most one transition may be in flight per record id. A claim is held
//! by a [`ClaimGuard`] and released when the guard drops, including on
//! early return or panic.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default, Clone)]
pub struct ClaimSet {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl ClaimSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id`. Returns `None` if another holder already has it.
    pub fn try_claim(&self, id: &str) -> Option<ClaimGuard> {
        let mut held = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if !held.insert(id.to_string()) {
            return None;
        }
        Some(ClaimGuard {
            set: self.inner.clone(),
            id: id.to_string(),
        })
    }

    pub fn is_claimed(&self, id: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases its claim on drop.
#[derive(Debug)]
pub struct ClaimGuard {
    set: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl ClaimGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.id);
    }
}
