/*
    Copyright © 2024, Crucible Labs
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Defines common data structures to be used inside this library, or from outside application.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use tiny_keccak::{Hasher as _, Keccak};

/// A 20-byte account or contract address.
pub type Address = [u8; 20];

/// A 32-byte hash.
pub type H256 = [u8; 32];

pub const NULL_ADDRESS: Address = [0u8; 20];

/// Number of ancestor block hashes an execution environment keeps available.
pub const ANCESTOR_HASH_WINDOW: usize = 256;

/// keccak256 digest, used for state root derivation.
pub fn keccak256(bytes: &[u8]) -> H256 {
    let mut keccak = Keccak::v256();
    keccak.update(bytes);
    let mut out = [0u8; 32];
    keccak.finalize(&mut out);
    out
}

/// Double SHA-256 digest, used for transaction ids on the UTXO side.
pub fn sha256d(bytes: &[u8]) -> H256 {
    let first = Sha256::digest(bytes);
    let second = Sha256::digest(first);
    second.into()
}

/// Derives the address of a newly created contract from the funding outpoint:
/// `ripemd160(sha256(origin_txid || origin_vout_le))`.
pub fn contract_address(origin_txid: &H256, origin_vout: u32) -> Address {
    let mut preimage = Vec::with_capacity(36);
    preimage.extend_from_slice(origin_txid);
    preimage.extend_from_slice(&origin_vout.to_le_bytes());
    let sha = Sha256::digest(&preimage);
    let ripe = Ripemd160::digest(sha);
    ripe.into()
}

/// Selects whether an execution's effects are persisted to both tries or
/// discarded after the call (speculative validation).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permanence {
    Committed,
    Reverted,
}

/// One internal value movement observed during a single transaction's
/// execution, including the implicit transfer from the funding outpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferInfo {
    pub from: Address,
    pub to: Address,
    pub value: u64,
}

/// A log entry emitted by contract execution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

/// Block-level data supplied to batch execution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockContext {
    /// Height of the block under execution
    pub height: u64,
    /// Address of the block proposer
    pub author: Address,
    /// Unix timestamp
    pub timestamp: u64,
    pub difficulty: u64,
    /// Ancestor block hashes, most recent first, at most [ANCESTOR_HASH_WINDOW]
    pub ancestor_hashes: Vec<H256>,
}

/// Execution environment for one transaction: block header fields plus the
/// gas already consumed by earlier transactions in the same block.
#[derive(Clone, Debug, Default)]
pub struct EnvInfo {
    pub number: u64,
    pub author: Address,
    pub timestamp: u64,
    pub difficulty: u64,
    /// Gas limit for the whole block
    pub gas_limit: u64,
    /// Gas consumed by preceding transactions in this block
    pub gas_used: u64,
    last_hashes: Vec<H256>,
}

impl EnvInfo {
    pub fn from_block(block: &BlockContext, block_gas_limit: u64) -> Self {
        let mut last_hashes = block.ancestor_hashes.clone();
        last_hashes.truncate(ANCESTOR_HASH_WINDOW);
        Self {
            number: block.height,
            author: block.author,
            timestamp: block.timestamp,
            difficulty: block.difficulty,
            gas_limit: block_gas_limit,
            gas_used: 0,
            last_hashes,
        }
    }

    /// Hash of the ancestor `depth` blocks back (1 = parent). None outside
    /// the retained window.
    pub fn ancestor_hash(&self, depth: u64) -> Option<H256> {
        if depth == 0 {
            return None;
        }
        self.last_hashes.get(depth as usize - 1).copied()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn contract_address_depends_on_outpoint() {
        let txid = [7u8; 32];
        let a0 = contract_address(&txid, 0);
        let a1 = contract_address(&txid, 1);
        assert_ne!(a0, a1);
        assert_eq!(a0, contract_address(&txid, 0));
    }

    #[test]
    fn ancestor_hash_window() {
        let hashes: Vec<H256> = (0u8..4).map(|i| [i; 32]).collect();
        let env = EnvInfo::from_block(
            &BlockContext {
                height: 10,
                ancestor_hashes: hashes,
                ..Default::default()
            },
            1_000_000,
        );
        assert_eq!(env.ancestor_hash(0), None);
        assert_eq!(env.ancestor_hash(1), Some([0u8; 32]));
        assert_eq!(env.ancestor_hash(4), Some([3u8; 32]));
        assert_eq!(env.ancestor_hash(5), None);
    }
}
