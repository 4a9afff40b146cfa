/*
    Copyright © 2024, Crucible Labs
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The governance parameter oracle: consensus parameters come from reserved
//! on-chain contracts instead of compiled constants, so a governance vote
//! can retune the network without a hard fork. Every read is bounded by
//! compiled floors and ceilings, and every failure mode (missing contract,
//! malformed word, out-of-range value) falls back to the compiled default —
//! the chain keeps validating even with inconsistent governance state.

use std::cell::RefCell;
use std::collections::HashMap;

use tracing::warn;

use crate::state::manager::StateManager;
use crate::storage::KvStore;
use crate::types::{Address, H256};

/// Reserved governance proxy addresses.
pub const GAS_SCHEDULE_CONTRACT: Address = system_address(0x80);
pub const BLOCK_SIZE_CONTRACT: Address = system_address(0x81);
pub const GAS_PRICE_CONTRACT: Address = system_address(0x82);
pub const RESERVED_CONTRACT: Address = system_address(0x83);
pub const BLOCK_GAS_LIMIT_CONTRACT: Address = system_address(0x84);

pub const MIN_BLOCK_SIZE: u32 = 500_000;
pub const MAX_BLOCK_SIZE: u32 = 32_000_000;
pub const DEFAULT_BLOCK_SIZE: u32 = 2_000_000;

pub const MIN_MIN_GAS_PRICE: u64 = 1;
pub const MAX_MIN_GAS_PRICE: u64 = 10_000;
pub const DEFAULT_MIN_GAS_PRICE: u64 = 40;

pub const MIN_BLOCK_GAS_LIMIT: u64 = 10_000_000;
pub const MAX_BLOCK_GAS_LIMIT: u64 = 4_000_000_000;
pub const DEFAULT_BLOCK_GAS_LIMIT: u64 = 400_000_000;

pub const MIN_SCHEDULE_TIER: u32 = 1;
pub const MAX_SCHEDULE_TIER: u32 = 10_000_000;

/// Number of tiers a proposed gas schedule must carry.
pub const SCHEDULE_TIERS: usize = 16;

// Upper bound on proxy instance lists, so a corrupt count cannot stall
// validation.
const MAX_PARAM_INSTANCES: u64 = 256;

const fn system_address(tail: u8) -> Address {
    let mut address = [0u8; 20];
    address[19] = tail;
    address
}

/// The engine cost table governance can retune, one `u32` tier per charge
/// class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GasSchedule {
    pub tx_gas: u32,
    pub tx_create_gas: u32,
    pub tx_data_zero_gas: u32,
    pub tx_data_non_zero_gas: u32,
    pub sload_gas: u32,
    pub sstore_set_gas: u32,
    pub sstore_reset_gas: u32,
    pub sstore_refund_gas: u32,
    pub balance_gas: u32,
    pub call_gas: u32,
    pub call_value_transfer_gas: u32,
    pub create_gas: u32,
    pub log_gas: u32,
    pub log_data_gas: u32,
    pub memory_gas: u32,
    pub exp_gas: u32,
}

impl Default for GasSchedule {
    fn default() -> Self {
        Self {
            tx_gas: 21_000,
            tx_create_gas: 53_000,
            tx_data_zero_gas: 4,
            tx_data_non_zero_gas: 68,
            sload_gas: 200,
            sstore_set_gas: 20_000,
            sstore_reset_gas: 5_000,
            sstore_refund_gas: 15_000,
            balance_gas: 400,
            call_gas: 700,
            call_value_transfer_gas: 9_000,
            create_gas: 32_000,
            log_gas: 375,
            log_data_gas: 8,
            memory_gas: 3,
            exp_gas: 10,
        }
    }
}

impl GasSchedule {
    pub fn to_tiers(&self) -> [u32; SCHEDULE_TIERS] {
        [
            self.tx_gas,
            self.tx_create_gas,
            self.tx_data_zero_gas,
            self.tx_data_non_zero_gas,
            self.sload_gas,
            self.sstore_set_gas,
            self.sstore_reset_gas,
            self.sstore_refund_gas,
            self.balance_gas,
            self.call_gas,
            self.call_value_transfer_gas,
            self.create_gas,
            self.log_gas,
            self.log_data_gas,
            self.memory_gas,
            self.exp_gas,
        ]
    }

    pub fn from_tiers(tiers: &[u32]) -> Option<Self> {
        if tiers.len() != SCHEDULE_TIERS {
            return None;
        }
        Some(Self {
            tx_gas: tiers[0],
            tx_create_gas: tiers[1],
            tx_data_zero_gas: tiers[2],
            tx_data_non_zero_gas: tiers[3],
            sload_gas: tiers[4],
            sstore_set_gas: tiers[5],
            sstore_reset_gas: tiers[6],
            sstore_refund_gas: tiers[7],
            balance_gas: tiers[8],
            call_gas: tiers[9],
            call_value_transfer_gas: tiers[10],
            create_gas: tiers[11],
            log_gas: tiers[12],
            log_data_gas: tiers[13],
            memory_gas: tiers[14],
            exp_gas: tiers[15],
        })
    }
}

/// Storage slot `i` of a governance contract.
pub fn governance_slot(index: u64) -> H256 {
    let mut slot = [0u8; 32];
    slot[24..].copy_from_slice(&index.to_be_bytes());
    slot
}

/// Packs one proxy instance entry: activation height then the parameter
/// contract address.
pub fn pack_instance(activation_height: u64, contract: &Address) -> Vec<u8> {
    let mut word = vec![0u8; 32];
    word[..8].copy_from_slice(&activation_height.to_be_bytes());
    word[8..28].copy_from_slice(contract);
    word
}

/// Packs an integer parameter into a 32-byte storage word, big-endian in the
/// low-order bytes.
pub fn pack_u64(value: u64) -> Vec<u8> {
    let mut word = vec![0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

pub fn pack_u32(value: u32) -> Vec<u8> {
    pack_u64(value as u64)
}

/// Read-only oracle over the governance contracts of one state. Parsed
/// results are cached per height for the duration of a block's execution.
pub struct GovernanceOracle<'a, S> {
    state: &'a StateManager<S>,
    from_storage: bool,
    schedule_cache: RefCell<HashMap<u64, GasSchedule>>,
    block_size_cache: RefCell<HashMap<u64, u32>>,
    min_gas_price_cache: RefCell<HashMap<u64, u64>>,
    block_gas_limit_cache: RefCell<HashMap<u64, u64>>,
}

impl<'a, S: KvStore> GovernanceOracle<'a, S> {
    /// `from_storage` off short-circuits every parameter to its compiled
    /// default.
    pub fn new(state: &'a StateManager<S>, from_storage: bool) -> Self {
        Self {
            state,
            from_storage,
            schedule_cache: RefCell::new(HashMap::new()),
            block_size_cache: RefCell::new(HashMap::new()),
            min_gas_price_cache: RefCell::new(HashMap::new()),
            block_gas_limit_cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn gas_schedule(&self, height: u64) -> GasSchedule {
        if !self.from_storage {
            return GasSchedule::default();
        }
        if let Some(schedule) = self.schedule_cache.borrow().get(&height) {
            return schedule.clone();
        }
        let schedule = self
            .read_schedule(height)
            .unwrap_or_else(|| {
                warn!(height, "gas schedule unavailable or out of bounds, using default");
                GasSchedule::default()
            });
        self.schedule_cache
            .borrow_mut()
            .insert(height, schedule.clone());
        schedule
    }

    pub fn block_size(&self, height: u64) -> u32 {
        if !self.from_storage {
            return DEFAULT_BLOCK_SIZE;
        }
        if let Some(size) = self.block_size_cache.borrow().get(&height) {
            return *size;
        }
        let size = match self.read_u64_param(&BLOCK_SIZE_CONTRACT, height) {
            Some(raw) if (MIN_BLOCK_SIZE as u64..=MAX_BLOCK_SIZE as u64).contains(&raw) => {
                raw as u32
            }
            Some(raw) => {
                warn!(height, value = raw, "block size out of bounds, using default");
                DEFAULT_BLOCK_SIZE
            }
            None => DEFAULT_BLOCK_SIZE,
        };
        self.block_size_cache.borrow_mut().insert(height, size);
        size
    }

    pub fn min_gas_price(&self, height: u64) -> u64 {
        if !self.from_storage {
            return DEFAULT_MIN_GAS_PRICE;
        }
        if let Some(price) = self.min_gas_price_cache.borrow().get(&height) {
            return *price;
        }
        let price = match self.read_u64_param(&GAS_PRICE_CONTRACT, height) {
            Some(raw) if (MIN_MIN_GAS_PRICE..=MAX_MIN_GAS_PRICE).contains(&raw) => raw,
            Some(raw) => {
                warn!(height, value = raw, "min gas price out of bounds, using default");
                DEFAULT_MIN_GAS_PRICE
            }
            None => DEFAULT_MIN_GAS_PRICE,
        };
        self.min_gas_price_cache.borrow_mut().insert(height, price);
        price
    }

    pub fn block_gas_limit(&self, height: u64) -> u64 {
        if !self.from_storage {
            return DEFAULT_BLOCK_GAS_LIMIT;
        }
        if let Some(limit) = self.block_gas_limit_cache.borrow().get(&height) {
            return *limit;
        }
        let limit = match self.read_u64_param(&BLOCK_GAS_LIMIT_CONTRACT, height) {
            Some(raw) if (MIN_BLOCK_GAS_LIMIT..=MAX_BLOCK_GAS_LIMIT).contains(&raw) => raw,
            Some(raw) => {
                warn!(height, value = raw, "block gas limit out of bounds, using default");
                DEFAULT_BLOCK_GAS_LIMIT
            }
            None => DEFAULT_BLOCK_GAS_LIMIT,
        };
        self.block_gas_limit_cache.borrow_mut().insert(height, limit);
        limit
    }

    /// Resolves the parameter contract active at `height`: the latest proxy
    /// instance whose activation height is not above it.
    fn param_contract(&self, proxy: &Address, height: u64) -> Option<Address> {
        let count = self.read_u64_word(proxy, &governance_slot(0))?;
        if count == 0 {
            return None;
        }
        if count > MAX_PARAM_INSTANCES {
            warn!(proxy = %hex::encode(proxy), count, "oversized governance instance list");
            return None;
        }
        let mut chosen = None;
        for index in 1..=count {
            let word = self.read_word(proxy, &governance_slot(index))?;
            if !word[28..].iter().all(|b| *b == 0) {
                warn!(proxy = %hex::encode(proxy), index, "malformed governance instance entry");
                return None;
            }
            let mut activation = [0u8; 8];
            activation.copy_from_slice(&word[..8]);
            if u64::from_be_bytes(activation) > height {
                continue;
            }
            let mut contract = [0u8; 20];
            contract.copy_from_slice(&word[8..28]);
            chosen = Some(contract);
        }
        chosen
    }

    fn read_u64_param(&self, proxy: &Address, height: u64) -> Option<u64> {
        let contract = self.param_contract(proxy, height)?;
        self.read_u64_word(&contract, &governance_slot(0))
    }

    fn read_schedule(&self, height: u64) -> Option<GasSchedule> {
        let contract = self.param_contract(&GAS_SCHEDULE_CONTRACT, height)?;
        let count = self.read_u64_word(&contract, &governance_slot(0))?;
        if count as usize != SCHEDULE_TIERS {
            warn!(height, count, "unexpected gas schedule tier count");
            return None;
        }
        let mut tiers = Vec::with_capacity(SCHEDULE_TIERS);
        for index in 1..=count {
            let tier = self.read_u64_word(&contract, &governance_slot(index))?;
            let tier = u32::try_from(tier).ok()?;
            if !(MIN_SCHEDULE_TIER..=MAX_SCHEDULE_TIER).contains(&tier) {
                warn!(height, index, tier, "gas schedule tier out of bounds");
                return None;
            }
            tiers.push(tier);
        }
        GasSchedule::from_tiers(&tiers)
    }

    fn read_word(&self, contract: &Address, slot: &H256) -> Option<[u8; 32]> {
        let bytes = self.state.storage_read(contract, slot)?;
        match <[u8; 32]>::try_from(bytes.as_slice()) {
            Ok(word) => Some(word),
            Err(_) => {
                warn!(contract = %hex::encode(contract), "short governance storage word");
                None
            }
        }
    }

    /// A 32-byte word holding a u64 in its low-order bytes; anything wider
    /// is malformed.
    fn read_u64_word(&self, contract: &Address, slot: &H256) -> Option<u64> {
        let word = self.read_word(contract, slot)?;
        if !word[..24].iter().all(|b| *b == 0) {
            warn!(contract = %hex::encode(contract), "governance word exceeds parameter width");
            return None;
        }
        let mut value = [0u8; 8];
        value.copy_from_slice(&word[24..]);
        Some(u64::from_be_bytes(value))
    }
}
