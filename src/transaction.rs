/*
    Copyright © 2024, Crucible Labs
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Transaction types on both sides of the bridge: the chain's standard
//! UTXO-model transaction (the settlement transaction is one of these), and
//! the unpacked contract transaction the state manager executes.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::envelope::VersionedEnvelope;
use crate::types::{sha256d, Address, H256};

/// Serialization version of UTXO transactions.
pub const TX_VERSION: u32 = 2;

// Script opcodes the bridge emits. Ordinary script interpretation lives
// outside this crate; these are only needed to construct outputs.
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CREATE: u8 = 0xc1;
pub const OP_CALL: u8 = 0xc2;
pub const OP_SPEND: u8 = 0xc3;

/// Raw output script.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Script(pub Vec<u8>);

impl Script {
    /// Input script authorizing the spend of a funding outpoint by a
    /// settlement transaction.
    pub fn spend() -> Self {
        Self(vec![OP_SPEND])
    }

    /// No-exec contract output: re-funds a live contract address without
    /// triggering execution when the output is processed.
    pub fn pay_to_contract(address: &Address) -> Self {
        let mut bytes = Vec::with_capacity(4 * 2 + 1 + address.len() + 1);
        for _ in 0..4 {
            Self::push_data(&mut bytes, &[0]);
        }
        Self::push_data(&mut bytes, address);
        bytes.push(OP_CALL);
        Self(bytes)
    }

    /// Standard pay-to-pubkey-hash output.
    pub fn pay_to_pubkey_hash(address: &Address) -> Self {
        let mut bytes = Vec::with_capacity(address.len() + 5);
        bytes.push(OP_DUP);
        bytes.push(OP_HASH160);
        Self::push_data(&mut bytes, address);
        bytes.push(OP_EQUALVERIFY);
        bytes.push(OP_CHECKSIG);
        Self(bytes)
    }

    pub fn is_pay_to_contract(&self) -> bool {
        self.0.last() == Some(&OP_CALL)
    }

    // Direct pushes only; every datum the bridge emits is under 76 bytes.
    fn push_data(bytes: &mut Vec<u8>, data: &[u8]) {
        bytes.push(data.len() as u8);
        bytes.extend_from_slice(data);
    }
}

/// Reference to a transaction output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, BorshSerialize, BorshDeserialize)]
pub struct OutPoint {
    pub txid: H256,
    pub vout: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TxInput {
    pub prevout: OutPoint,
    pub script: Script,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TxOutput {
    pub value: u64,
    pub script: Script,
}

/// A UTXO-model transaction in the chain's standard serialization.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            version: TX_VERSION,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
        }
    }
}

impl Transaction {
    /// The null transaction, emitted when condensation produces nothing to
    /// settle.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.try_to_vec()
            .expect("in-memory serialization does not fail")
    }

    pub fn txid(&self) -> H256 {
        sha256d(&self.serialize())
    }

    pub fn total_output_value(&self) -> u64 {
        self.outputs
            .iter()
            .fold(0u64, |acc, o| acc.saturating_add(o.value))
    }
}

/// A contract-bearing transaction unpacked from its carrier output, ready
/// for execution against the account state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractTransaction {
    pub version: VersionedEnvelope,
    pub sender: Address,
    /// None for contract creation
    pub to: Option<Address>,
    pub value: u64,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub data: Vec<u8>,
    pub nonce: u64,
    /// Id of the carrier UTXO transaction funding this call
    pub origin_txid: H256,
    /// Index of the carrier output within the funding transaction
    pub origin_vout: u32,
}

impl ContractTransaction {
    pub fn is_creation(&self) -> bool {
        self.to.is_none()
    }

    /// Upper bound of the fee this transaction can be charged.
    pub fn max_fee(&self) -> u64 {
        self.gas_limit.saturating_mul(self.gas_price)
    }
}
