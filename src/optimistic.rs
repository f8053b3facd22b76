//! Optimistic mutation with rollback, one outstanding call per entity key.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::error::{Result, SyncError};

#[derive(Clone, Default)]
pub struct Optimistic {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Releases the key when the call resolves or its future is dropped.
struct InFlight {
    set: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.key);
        }
    }
}

impl Optimistic {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn is_pending(&self, key: &str) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(key))
            .unwrap_or(false)
    }

    fn claim(&self, key: &str) -> Result<InFlight> {
        let mut set = self
            .in_flight
            .lock()
            .map_err(|_| SyncError::Pending(key.to_string()))?;
        if !set.insert(key.to_string()) {
            return Err(SyncError::Pending(key.to_string()));
        }
        Ok(InFlight {
            set: Arc::clone(&self.in_flight),
            key: key.to_string(),
        })
    }

    /// Runs `mutate` on `state` before `remote` is issued and `revert` after
    /// it fails. The state is untouched when the key is already in flight.
    pub async fn apply<S, T, M, R, Fut, V>(
        &self,
        key: &str,
        state: &mut S,
        mutate: M,
        remote: R,
        revert: V,
    ) -> Result<T>
    where
        S: ?Sized,
        M: FnOnce(&mut S),
        R: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        V: FnOnce(&mut S),
    {
        let _in_flight = self.claim(key)?;
        mutate(state);
        match remote().await {
            Ok(value) => Ok(value),
            Err(e) => {
                log::warn!("rolling back optimistic change to {}: {}", key, e);
                revert(state);
                Err(e)
            }
        }
    }

    /// Apply-on-success: `commit` only runs once `remote` has succeeded.
    pub async fn confirm<S, T, R, Fut, C>(
        &self,
        key: &str,
        state: &mut S,
        remote: R,
        commit: C,
    ) -> Result<T>
    where
        S: ?Sized,
        R: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        C: FnOnce(&mut S, &T),
    {
        let _in_flight = self.claim(key)?;
        match remote().await {
            Ok(value) => {
                commit(state, &value);
                Ok(value)
            }
            Err(e) => {
                log::warn!("change to {} failed: {}", key, e);
                Err(e)
            }
        }
    }
}
