/*
    Copyright © 2024, Crucible Labs
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Scoped snapshot/restore over both bridge roots. Used whenever a
//! transaction must be evaluated against a hypothetical state (mempool
//! acceptance, candidate-block assembly) without committing: the snapshot
//! holds the state manager exclusively for its lifetime and puts both roots
//! back on every exit path, including unwinding.

use std::ops::{Deref, DerefMut};

use tracing::error;

use crate::state::manager::StateManager;
use crate::storage::KvStore;
use crate::types::H256;

/// Exclusive borrow of a [StateManager] that restores both roots when it
/// goes out of scope.
pub struct TemporarySnapshot<'a, S: KvStore> {
    manager: &'a mut StateManager<S>,
    state_root: H256,
    funding_root: H256,
}

impl<'a, S: KvStore> TemporarySnapshot<'a, S> {
    pub fn new(manager: &'a mut StateManager<S>) -> Self {
        let state_root = manager.state_root();
        let funding_root = manager.funding_root();
        Self {
            manager,
            state_root,
            funding_root,
        }
    }
}

impl<S: KvStore> Deref for TemporarySnapshot<'_, S> {
    type Target = StateManager<S>;

    fn deref(&self) -> &Self::Target {
        self.manager
    }
}

impl<S: KvStore> DerefMut for TemporarySnapshot<'_, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.manager
    }
}

impl<S: KvStore> Drop for TemporarySnapshot<'_, S> {
    fn drop(&mut self) {
        // The captured roots were committed when the snapshot was taken, so
        // rewinding to them cannot fail on a well-behaved store.
        if self.manager.set_roots(self.state_root, self.funding_root).is_err() {
            error!(
                state_root = %hex::encode(self.state_root),
                "snapshot restore failed, store lost a committed root"
            );
        }
    }
}

impl<S: KvStore> StateManager<S> {
    /// Runs `f` against this state and restores both roots afterwards, no
    /// matter how `f` exits.
    pub fn with_snapshot<T>(&mut self, f: impl FnOnce(&mut StateManager<S>) -> T) -> T {
        let mut guard = TemporarySnapshot::new(self);
        f(&mut guard)
    }
}
