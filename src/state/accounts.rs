/*
    Copyright © 2024, Crucible Labs
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Account-side state: balances, nonces, contract code and contract storage,
//! cached over the account trie. Reads are served read-your-write first from
//! the pending write set, then from the read cache, then from the trie;
//! nothing reaches the trie until [AccountLedger::commit].

use std::cell::RefCell;
use std::collections::HashMap;

use borsh::{BorshDeserialize, BorshSerialize};
use tracing::warn;

use crate::storage::{Key, KvStore, Value};
use crate::types::{Address, H256};

const TAG_RECORD: u8 = 0;
const TAG_CODE: u8 = 1;
const TAG_STORAGE: u8 = 2;

/// The per-address record kept in the account trie.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AccountRecord {
    pub nonce: u64,
    pub balance: u64,
    pub alive: bool,
}

type StorageMap = std::collections::BTreeMap<H256, Vec<u8>>;

pub(crate) struct AccountLedger<S> {
    store: S,
    /// Pending mutations; None marks a deletion.
    writes: HashMap<Key, Option<Value>>,
    /// Original data read from the trie, cached for the transaction.
    reads: RefCell<HashMap<Key, Option<Value>>>,
}

impl<S: KvStore> AccountLedger<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            writes: HashMap::new(),
            reads: RefCell::new(HashMap::new()),
        }
    }

    pub fn record(&self, address: &Address) -> Option<AccountRecord> {
        let bytes = self.get(&account_key(address, TAG_RECORD))?;
        match AccountRecord::try_from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(_) => {
                warn!(address = %hex::encode(address), "malformed account record");
                None
            }
        }
    }

    pub fn set_record(&mut self, address: &Address, record: AccountRecord) {
        let bytes = record
            .try_to_vec()
            .expect("in-memory serialization does not fail");
        self.set(account_key(address, TAG_RECORD), Some(bytes));
    }

    pub fn is_alive(&self, address: &Address) -> bool {
        self.record(address).map_or(false, |r| r.alive)
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.record(address).map_or(0, |r| r.balance)
    }

    /// Removes the account entirely: record, code and storage.
    pub fn kill(&mut self, address: &Address) {
        self.set(account_key(address, TAG_RECORD), None);
        self.set(account_key(address, TAG_CODE), None);
        self.set(account_key(address, TAG_STORAGE), None);
    }

    pub fn code(&self, address: &Address) -> Option<Vec<u8>> {
        self.get(&account_key(address, TAG_CODE))
    }

    pub fn set_code(&mut self, address: &Address, code: Vec<u8>) {
        self.set(account_key(address, TAG_CODE), Some(code));
    }

    pub fn storage_value(&self, address: &Address, slot: &H256) -> Option<Vec<u8>> {
        self.storage_map(address).get(slot).cloned()
    }

    pub fn set_storage_value(&mut self, address: &Address, slot: H256, value: Vec<u8>) {
        let mut map = self.storage_map(address);
        if value.is_empty() {
            map.remove(&slot);
        } else {
            map.insert(slot, value);
        }
        let bytes = map
            .try_to_vec()
            .expect("in-memory serialization does not fail");
        self.set(account_key(address, TAG_STORAGE), Some(bytes));
    }

    fn storage_map(&self, address: &Address) -> StorageMap {
        match self.get(&account_key(address, TAG_STORAGE)) {
            Some(bytes) => match StorageMap::try_from_slice(&bytes) {
                Ok(map) => map,
                Err(_) => {
                    warn!(address = %hex::encode(address), "malformed contract storage");
                    StorageMap::new()
                }
            },
            None => StorageMap::new(),
        }
    }

    /// Discards all pending and cached data.
    pub fn clear(&mut self) {
        self.writes.clear();
        self.reads.borrow_mut().clear();
    }

    /// Applies the pending write set to the trie and seals it.
    pub fn commit(&mut self) -> H256 {
        for (key, value) in self.writes.drain() {
            match value {
                Some(bytes) => self.store.insert(key, bytes),
                None => self.store.remove(&key),
            }
        }
        self.reads.borrow_mut().clear();
        self.store.commit()
    }

    pub fn root(&self) -> H256 {
        self.store.root()
    }

    pub fn set_root(&mut self, root: H256) -> Result<(), crate::error::StorageError> {
        self.clear();
        self.store.set_root(root)
    }

    fn get(&self, key: &Key) -> Option<Value> {
        if let Some(value) = self.writes.get(key) {
            return value.clone();
        }
        if let Some(value) = self.reads.borrow().get(key) {
            return value.clone();
        }
        let value = self.store.get(key);
        self.reads.borrow_mut().insert(key.clone(), value.clone());
        value
    }

    fn set(&mut self, key: Key, value: Option<Value>) {
        self.writes.insert(key, value);
    }
}

fn account_key(address: &Address, tag: u8) -> Key {
    let mut key = Vec::with_capacity(address.len() + 1);
    key.extend_from_slice(address);
    key.push(tag);
    key
}
