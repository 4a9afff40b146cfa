/*
    Copyright © 2024, Crucible Labs
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The authenticated key-value store interface backing both bridge tries,
//! and a versioned in-memory implementation. A disk-backed Merkle trie from
//! the node's storage layer satisfies the same trait; the bridge only ever
//! calls `root`, `set_root`, `commit` and the three map operations.

use std::collections::HashMap;

use im::OrdMap;
use tiny_keccak::{Hasher as _, Keccak};

use crate::error::StorageError;
use crate::types::H256;

pub type Key = Vec<u8>;
pub type Value = Vec<u8>;

/// An authenticated key-value store with commit/rewind semantics. `root`
/// names the last committed content; `set_root` rewinds (or fast-forwards)
/// the store to any previously committed root, bit-for-bit.
pub trait KvStore {
    fn root(&self) -> H256;

    fn set_root(&mut self, root: H256) -> Result<(), StorageError>;

    /// Seals the pending mutations and returns the new root.
    fn commit(&mut self) -> H256;

    fn get(&self, key: &[u8]) -> Option<Value>;

    fn insert(&mut self, key: Key, value: Value);

    fn remove(&mut self, key: &[u8]);
}

/// Versioned in-memory store. Every committed root keeps a structurally
/// shared snapshot of the full content map, which is what makes `set_root`
/// restoration exact.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    committed: HashMap<H256, OrdMap<Key, Value>>,
    current: OrdMap<Key, Value>,
    root: H256,
}

impl MemoryStore {
    pub fn new() -> Self {
        let current = OrdMap::new();
        let root = content_root(&current);
        let mut committed = HashMap::new();
        committed.insert(root, current.clone());
        Self {
            committed,
            current,
            root,
        }
    }

    /// Root of the empty store.
    pub fn empty_root() -> H256 {
        content_root(&OrdMap::new())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryStore {
    fn root(&self) -> H256 {
        self.root
    }

    fn set_root(&mut self, root: H256) -> Result<(), StorageError> {
        match self.committed.get(&root) {
            Some(content) => {
                self.current = content.clone();
                self.root = root;
                Ok(())
            }
            None => Err(StorageError::UnknownRoot(root)),
        }
    }

    fn commit(&mut self) -> H256 {
        let root = content_root(&self.current);
        self.committed.insert(root, self.current.clone());
        self.root = root;
        root
    }

    fn get(&self, key: &[u8]) -> Option<Value> {
        self.current.get(key).cloned()
    }

    fn insert(&mut self, key: Key, value: Value) {
        self.current.insert(key, value);
    }

    fn remove(&mut self, key: &[u8]) {
        self.current.remove(key);
    }
}

fn content_root(content: &OrdMap<Key, Value>) -> H256 {
    let mut keccak = Keccak::v256();
    for (key, value) in content {
        keccak.update(&(key.len() as u32).to_le_bytes());
        keccak.update(key);
        keccak.update(&(value.len() as u32).to_le_bytes());
        keccak.update(value);
    }
    let mut out = [0u8; 32];
    keccak.finalize(&mut out);
    out
}
