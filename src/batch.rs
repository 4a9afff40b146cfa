/*
    Copyright © 2024, Crucible Labs
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Batch execution: every contract-bearing transaction of a candidate block
//! runs through the state manager in block order, bounded by the
//! governance-derived block gas limit, and the per-transaction results are
//! folded into one aggregate consumed by block assembly and validation.

use crate::engine::ExecutionEngine;
use crate::error::BlockError;
use crate::state::manager::{BridgeReceipt, ExecutionResult, StateManager};
use crate::storage::KvStore;
use crate::transaction::{ContractTransaction, Script, Transaction, TxOutput};
use crate::types::{BlockContext, EnvInfo, LogEntry, Permanence, H256};

/// Aggregate of one block's bridged executions.
#[derive(Debug, Default)]
pub struct BatchResult {
    /// Total gas billed across executed transactions
    pub used_gas: u64,
    /// Total value refunded to senders for unused gas and covered fees
    pub refund_sender: u64,
    /// One refund output per refunded sender, in transaction order
    pub refund_outputs: Vec<TxOutput>,
    /// Settlement (and overflow-refund) transactions to append to the block
    pub value_transfers: Vec<Transaction>,
    pub receipts: Vec<BridgeReceipt>,
    /// Diagnostics-only log set, including logs of failed executions
    pub logs_generated: Vec<LogEntry>,
    /// Carrier txids of transactions that no longer fit the block gas
    /// budget. Invalid for this block only.
    pub excluded: Vec<H256>,
}

/// Runs a block's contract transactions in order and assembles the
/// aggregate result.
pub struct BatchExecutor<'a, E> {
    block: &'a BlockContext,
    txs: &'a [ContractTransaction],
    block_gas_limit: u64,
    engine: &'a E,
    results: Vec<ExecutionResult>,
    executed: usize,
}

impl<'a, E: ExecutionEngine> BatchExecutor<'a, E> {
    pub fn new(
        block: &'a BlockContext,
        txs: &'a [ContractTransaction],
        block_gas_limit: u64,
        engine: &'a E,
    ) -> Self {
        Self {
            block,
            txs,
            block_gas_limit,
            engine,
            results: Vec::new(),
            executed: 0,
        }
    }

    /// Executes transactions sequentially, stopping at the first one whose
    /// gas limit no longer fits the remaining block budget. Per-transaction
    /// failures are contained in their receipts; only block-fatal conditions
    /// surface as `Err`.
    pub fn perform<S: KvStore>(
        &mut self,
        state: &mut StateManager<S>,
        permanence: Permanence,
    ) -> Result<(), BlockError> {
        let mut env = EnvInfo::from_block(self.block, self.block_gas_limit);
        for tx in self.txs {
            if env.gas_used.saturating_add(tx.gas_limit) > self.block_gas_limit {
                break;
            }
            let result = state.execute(&env, tx, permanence, self.engine)?;
            env.gas_used = env.gas_used.saturating_add(result.outcome.gas_used);
            self.results.push(result);
            self.executed += 1;
        }
        Ok(())
    }

    pub fn results(&self) -> &[ExecutionResult] {
        &self.results
    }

    /// Aggregates receipts, logs, refunds and settlement transactions.
    pub fn processing_results(self) -> BatchResult {
        let mut batch = BatchResult {
            excluded: self.txs[self.executed..]
                .iter()
                .map(|tx| tx.origin_txid)
                .collect(),
            ..BatchResult::default()
        };

        for (tx, result) in self.txs.iter().zip(self.results) {
            batch.used_gas = batch.used_gas.saturating_add(result.outcome.gas_used);

            if result.outcome.excepted.is_none() {
                let unused_gas = tx.gas_limit.saturating_sub(result.outcome.gas_used);
                let refund = unused_gas
                    .saturating_mul(tx.gas_price)
                    .saturating_add(result.outcome.fees_covered);
                if refund > 0 {
                    batch.refund_sender = batch.refund_sender.saturating_add(refund);
                    batch.refund_outputs.push(TxOutput {
                        value: refund,
                        script: Script::pay_to_pubkey_hash(&tx.sender),
                    });
                }
            }

            // Overflow rejections still carry a refund transaction that must
            // reach the chain.
            if !result.settlement.is_empty() {
                batch.value_transfers.push(result.settlement);
            }
            batch.receipts.push(result.receipt);
            batch.logs_generated.extend(result.logs_generated);
        }
        batch
    }
}
