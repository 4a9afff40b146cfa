/*
    Copyright © 2024, Crucible Labs
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The funding registry: one record per contract address naming the UTXO
//! that currently backs that address's spendable balance. Records are
//! cached on first touch and flow back to the funding trie on commit, where
//! dead records are removed rather than zeroed.

use std::collections::HashMap;

use borsh::{BorshDeserialize, BorshSerialize};
use tracing::warn;

use crate::storage::KvStore;
use crate::types::{Address, H256};

/// The funding record backing one contract address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Vin {
    pub origin_txid: H256,
    pub origin_vout: u32,
    pub value: u64,
    /// false marks a logically deleted record, purged at commit
    pub alive: bool,
}

pub(crate) struct FundingLedger<S> {
    store: S,
    cache: HashMap<Address, Vin>,
}

impl<S: KvStore> FundingLedger<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cache: HashMap::new(),
        }
    }

    /// The record for `address`, pulled into the cache on first touch.
    pub fn vin(&mut self, address: &Address) -> Option<Vin> {
        if let Some(vin) = self.cache.get(address) {
            return Some(*vin);
        }
        let bytes = self.store.get(address)?;
        match Vin::try_from_slice(&bytes) {
            Ok(vin) => {
                self.cache.insert(*address, vin);
                Some(vin)
            }
            Err(_) => {
                warn!(address = %hex::encode(address), "malformed funding record");
                None
            }
        }
    }

    pub fn set(&mut self, address: Address, vin: Vin) {
        self.cache.insert(address, vin);
    }

    /// Marks the record dead if one exists. It stays in the cache so the
    /// deletion reaches the trie at commit.
    pub fn mark_dead(&mut self, address: &Address) {
        if self.vin(address).is_some() {
            if let Some(vin) = self.cache.get_mut(address) {
                vin.alive = false;
            }
        }
    }

    /// Folds a refreshed record map into the cache: existing records are
    /// overwritten, unknown dead records are dropped.
    pub fn update(&mut self, vins: HashMap<Address, Vin>) {
        for (address, vin) in vins {
            if vin.alive || self.vin(&address).is_some() {
                self.cache.insert(address, vin);
            }
        }
    }

    /// Sum of the live funding backing `address`.
    pub fn live_value(&mut self, address: &Address) -> u64 {
        self.vin(address).filter(|v| v.alive).map_or(0, |v| v.value)
    }

    /// Writes the touched records to the funding trie, removing dead ones,
    /// and seals it.
    pub fn commit(&mut self) -> H256 {
        for (address, vin) in self.cache.drain() {
            if vin.alive {
                let bytes = vin
                    .try_to_vec()
                    .expect("in-memory serialization does not fail");
                self.store.insert(address.to_vec(), bytes);
            } else {
                self.store.remove(&address);
            }
        }
        self.store.commit()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn root(&self) -> H256 {
        self.store.root()
    }

    pub fn set_root(&mut self, root: H256) -> Result<(), crate::error::StorageError> {
        self.cache.clear();
        self.store.set_root(root)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage::MemoryStore;

    const ADDR: Address = [3u8; 20];

    fn vin(value: u64, alive: bool) -> Vin {
        Vin {
            origin_txid: [1u8; 32],
            origin_vout: 0,
            value,
            alive,
        }
    }

    #[test]
    fn dead_records_are_pruned_at_commit() {
        let mut ledger = FundingLedger::new(MemoryStore::new());
        ledger.set(ADDR, vin(500, true));
        let funded = ledger.commit();
        assert_ne!(funded, MemoryStore::empty_root());
        assert_eq!(ledger.vin(&ADDR), Some(vin(500, true)));

        ledger.mark_dead(&ADDR);
        let pruned = ledger.commit();
        assert_eq!(pruned, MemoryStore::empty_root());
        assert_eq!(ledger.vin(&ADDR), None);
    }

    #[test]
    fn update_drops_unknown_dead_records() {
        let mut ledger = FundingLedger::new(MemoryStore::new());
        let mut refreshed = HashMap::new();
        refreshed.insert(ADDR, vin(0, false));
        ledger.update(refreshed);
        assert_eq!(ledger.commit(), MemoryStore::empty_root());
    }

    #[test]
    fn live_value_ignores_dead_records() {
        let mut ledger = FundingLedger::new(MemoryStore::new());
        ledger.set(ADDR, vin(42, true));
        assert_eq!(ledger.live_value(&ADDR), 42);
        ledger.mark_dead(&ADDR);
        assert_eq!(ledger.live_value(&ADDR), 0);
    }
}
