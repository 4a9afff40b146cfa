/*
    Copyright © 2024, Crucible Labs
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! runtime defines the formulation of the bridge's block-level entry points.

use crate::batch::{BatchExecutor, BatchResult};
use crate::condense::MAX_SETTLEMENT_OUTPUTS;
use crate::engine::ExecutionEngine;
use crate::error::BlockError;
use crate::governance::{GasSchedule, GovernanceOracle};
use crate::state::manager::StateManager;
use crate::storage::KvStore;
use crate::transaction::ContractTransaction;
use crate::types::{BlockContext, Permanence};

/// Consensus limits in force for one block height, as derived from
/// governance state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockConstraints {
    pub block_size: u32,
    pub block_gas_limit: u64,
    pub min_gas_price: u64,
    pub gas_schedule: GasSchedule,
}

/// Runtime drives the bridge for whole blocks.
pub struct Runtime {
    settlement_output_limit: usize,
    governance_from_storage: bool,
}

impl Runtime {
    /// Instantiate Runtime.
    pub fn new() -> Self {
        Self {
            settlement_output_limit: MAX_SETTLEMENT_OUTPUTS,
            governance_from_storage: true,
        }
    }

    /// specify the maximum number of outputs one settlement transaction may
    /// carry.
    pub fn set_settlement_output_limit(mut self, limit: usize) -> Self {
        self.settlement_output_limit = limit;
        self
    }

    /// specify whether consensus parameters are read from governance
    /// contracts; off pins every parameter to its compiled default.
    pub fn set_governance_from_storage(mut self, from_storage: bool) -> Self {
        self.governance_from_storage = from_storage;
        self
    }

    /// Consensus limits for a block at `height`.
    pub fn block_constraints<S: KvStore>(
        &self,
        state: &StateManager<S>,
        height: u64,
    ) -> BlockConstraints {
        let oracle = GovernanceOracle::new(state, self.governance_from_storage);
        BlockConstraints {
            block_size: oracle.block_size(height),
            block_gas_limit: oracle.block_gas_limit(height),
            min_gas_price: oracle.min_gas_price(height),
            gas_schedule: oracle.gas_schedule(height),
        }
    }

    /// Whether every transaction offers at least the governance minimum gas
    /// price at `height`.
    pub fn check_min_gas_price<S: KvStore>(
        &self,
        state: &StateManager<S>,
        height: u64,
        txs: &[ContractTransaction],
    ) -> bool {
        let oracle = GovernanceOracle::new(state, self.governance_from_storage);
        let min = oracle.min_gas_price(height);
        txs.iter().all(|tx| tx.gas_price >= min)
    }

    /// Runs every contract transaction of `block` through the state manager
    /// in order and aggregates the block's execution result.
    pub fn execute_batch<S: KvStore, E: ExecutionEngine>(
        &self,
        state: &mut StateManager<S>,
        block: &BlockContext,
        txs: &[ContractTransaction],
        permanence: Permanence,
        engine: &E,
    ) -> Result<BatchResult, BlockError> {
        let block_gas_limit = {
            let oracle = GovernanceOracle::new(state, self.governance_from_storage);
            oracle.block_gas_limit(block.height)
        };
        state.set_settlement_output_limit(self.settlement_output_limit);

        let mut executor = BatchExecutor::new(block, txs, block_gas_limit, engine);
        executor.perform(state, permanence)?;
        Ok(executor.processing_results())
    }

    /// Evaluates a batch against a hypothetical state: both roots are
    /// restored afterwards regardless of the outcome.
    pub fn speculate<S: KvStore, E: ExecutionEngine>(
        &self,
        state: &mut StateManager<S>,
        block: &BlockContext,
        txs: &[ContractTransaction],
        engine: &E,
    ) -> Result<BatchResult, BlockError> {
        state.with_snapshot(|state| {
            self.execute_batch(state, block, txs, Permanence::Committed, engine)
        })
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
