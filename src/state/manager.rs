/*
    Copyright © 2024, Crucible Labs
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state manager executes one contract transaction at a time against the
//! execution engine while keeping the account trie and the funding trie
//! mutually consistent. It owns both roots, observes every balance movement
//! the engine makes, and turns the collected transfers into the settlement
//! transaction through the condenser.
//!
//! The invariant everything here protects: a contract-executing address's
//! spendable balance equals its live funding records, never a freely mutable
//! ledger entry.

use std::collections::BTreeSet;

use tracing::warn;

use crate::condense::{Condenser, MAX_SETTLEMENT_OUTPUTS};
use crate::engine::{CallParams, EngineError, ExecutionEngine, VmHost};
use crate::error::{BlockError, ExecutionError, ExitStatus};
use crate::state::accounts::{AccountLedger, AccountRecord};
use crate::state::funding::{FundingLedger, Vin};
use crate::storage::KvStore;
use crate::transaction::{ContractTransaction, OutPoint, Script, Transaction, TxInput, TxOutput};
use crate::types::{contract_address, Address, EnvInfo, LogEntry, Permanence, TransferInfo, H256};

/// Reserved log payload prefix by which a contract declares that it settles
/// part of the gas cost out of its own funding. The 8 bytes following the
/// token carry the big-endian amount.
pub const FEE_COVERAGE_TOKEN: &[u8] = b"ContractCoversFees";

/// A fee-coverage declaration recovered from a committed log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeePromise {
    pub contract: Address,
    pub amount: u64,
}

/// Scans committed logs for the reserved fee-coverage declaration. Only the
/// first well-formed declaration counts.
pub fn fees_promised_by_logs(logs: &[LogEntry]) -> Option<FeePromise> {
    for log in logs {
        if log.data.len() == FEE_COVERAGE_TOKEN.len() + 8 && log.data.starts_with(FEE_COVERAGE_TOKEN)
        {
            let mut amount = [0u8; 8];
            amount.copy_from_slice(&log.data[FEE_COVERAGE_TOKEN.len()..]);
            return Some(FeePromise {
                contract: log.address,
                amount: u64::from_be_bytes(amount),
            });
        }
    }
    None
}

/// Receipt of one bridged execution. Both roots are the committed roots
/// after the transaction (or the untouched pre-transaction roots when it
/// failed), and `gas_used` is cumulative within the block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeReceipt {
    pub state_root: H256,
    pub funding_root: H256,
    pub gas_used: u64,
    /// Consensus log set: empty for failed or reverted executions
    pub logs: Vec<LogEntry>,
}

/// Engine-level outcome of one bridged execution.
#[derive(Clone, Debug, Default)]
pub struct ExecutionOutcome {
    /// None on success
    pub excepted: Option<ExecutionError>,
    pub output: Vec<u8>,
    /// Gas billed to this transaction
    pub gas_used: u64,
    pub gas_refunded: u64,
    /// Gas fee amount settled by a contract instead of the funding outpoint
    pub fees_covered: u64,
    /// Created contract address, or the callee for plain calls
    pub new_address: Option<Address>,
}

impl ExecutionOutcome {
    pub fn exit_status(&self) -> ExitStatus {
        match &self.excepted {
            None => ExitStatus::Success,
            Some(err) => ExitStatus::from(err),
        }
    }
}

/// Everything one `execute` call produces.
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub outcome: ExecutionOutcome,
    pub receipt: BridgeReceipt,
    /// The settlement transaction reifying this execution's balance changes,
    /// empty when there is nothing to settle
    pub settlement: Transaction,
    /// Every log the execution emitted, kept for diagnostics even when the
    /// committed set is empty. Never feeds consensus values.
    pub logs_generated: Vec<LogEntry>,
}

pub struct StateManager<S> {
    pub(crate) accounts: AccountLedger<S>,
    pub(crate) funding: FundingLedger<S>,
    transfers: Vec<TransferInfo>,
    pending_deletes: BTreeSet<Address>,
    settlement_output_limit: usize,
}

impl<S: KvStore> StateManager<S> {
    pub fn new(account_store: S, funding_store: S) -> Self {
        Self {
            accounts: AccountLedger::new(account_store),
            funding: FundingLedger::new(funding_store),
            transfers: Vec::new(),
            pending_deletes: BTreeSet::new(),
            settlement_output_limit: MAX_SETTLEMENT_OUTPUTS,
        }
    }

    pub fn state_root(&self) -> H256 {
        self.accounts.root()
    }

    pub fn funding_root(&self) -> H256 {
        self.funding.root()
    }

    /// Rewinds both tries and drops every cached entry.
    pub fn set_roots(
        &mut self,
        state_root: H256,
        funding_root: H256,
    ) -> Result<(), crate::error::StorageError> {
        self.accounts.set_root(state_root)?;
        self.funding.set_root(funding_root)?;
        self.transfers.clear();
        self.pending_deletes.clear();
        Ok(())
    }

    pub fn set_settlement_output_limit(&mut self, limit: usize) {
        self.settlement_output_limit = limit;
    }

    /// Read-only contract storage accessor (used by the governance oracle).
    pub fn storage_read(&self, address: &Address, slot: &H256) -> Option<Vec<u8>> {
        self.accounts.storage_value(address, slot)
    }

    pub fn account_balance(&self, address: &Address) -> u64 {
        self.accounts.balance(address)
    }

    pub fn funding_record(&mut self, address: &Address) -> Option<Vin> {
        self.funding.vin(address)
    }

    /// Sum of the live funding backing `address`.
    pub fn funding_value(&mut self, address: &Address) -> u64 {
        self.funding.live_value(address)
    }

    /// Whether `contract` can settle `fees` of gas cost out of its own
    /// balance.
    pub fn account_fees_covered_by_contract(&self, contract: &Address, fees: u64) -> bool {
        self.accounts.balance(contract) >= fees
    }

    /// Seals both tries. Embedders use this after seeding genesis state.
    pub fn commit(&mut self) -> (H256, H256) {
        (self.accounts.commit(), self.funding.commit())
    }

    // State seeding, for genesis construction and fixtures.

    pub fn set_balance(&mut self, address: &Address, balance: u64) {
        let mut record = self.accounts.record(address).unwrap_or(AccountRecord {
            nonce: 0,
            balance: 0,
            alive: true,
        });
        record.balance = balance;
        record.alive = true;
        self.accounts.set_record(address, record);
    }

    pub fn set_storage_value(&mut self, address: &Address, slot: H256, value: Vec<u8>) {
        self.accounts.set_storage_value(address, slot, value);
    }

    pub fn set_contract_code(&mut self, address: &Address, code: Vec<u8>) {
        self.accounts.set_code(address, code);
    }

    pub fn set_funding_record(&mut self, address: Address, vin: Vin) {
        self.funding.set(address, vin);
    }

    /// Executes one contract transaction. Per-transaction failures come back
    /// inside the result; only block-fatal conditions surface as `Err`.
    pub fn execute<E: ExecutionEngine>(
        &mut self,
        env: &EnvInfo,
        tx: &ContractTransaction,
        permanence: Permanence,
        engine: &E,
    ) -> Result<ExecutionResult, BlockError> {
        let old_state_root = self.accounts.root();
        let old_funding_root = self.funding.root();

        if let Err(err) = tx.version.validate_executable() {
            return Ok(self.failed_result(env, tx, err, 0, Vec::new(), old_state_root, old_funding_root));
        }
        if tx.is_creation() && tx.value > 0 {
            return Ok(self.failed_result(
                env,
                tx,
                ExecutionError::CreateWithValue,
                tx.gas_limit,
                Vec::new(),
                old_state_root,
                old_funding_root,
            ));
        }

        self.transfers.clear();
        self.pending_deletes.clear();
        self.pending_deletes.insert(tx.sender);
        self.pending_deletes.insert(env.author);

        let created = tx
            .is_creation()
            .then(|| contract_address(&tx.origin_txid, tx.origin_vout));
        let target = match tx.to {
            Some(address) => address,
            None => created.unwrap_or_default(),
        };
        let result_address = Some(target);

        // The carrier outpoint backs the call: credit its value plus the
        // maximum fee, then move the value like any engine transfer so it
        // shows up in the transfer list.
        self.add_balance(&tx.sender, tx.value.saturating_add(tx.max_fee()));
        if let Err(e) = self.transfer_balance(&tx.sender, &target, tx.value) {
            self.revert_caches();
            return Ok(self.failed_result(
                env,
                tx,
                e.into(),
                tx.gas_limit,
                Vec::new(),
                old_state_root,
                old_funding_root,
            ));
        }

        let params = CallParams {
            sender: tx.sender,
            target,
            is_creation: tx.is_creation(),
            value: tx.value,
            gas: tx.gas_limit,
            gas_price: tx.gas_price,
            data: &tx.data,
            nonce: tx.nonce,
        };
        let out = engine.execute(env, &params, self);
        let gas_used = tx.gas_limit.saturating_sub(out.gas_left);

        if permanence == Permanence::Reverted {
            self.revert_caches();
            return Ok(ExecutionResult {
                outcome: ExecutionOutcome {
                    excepted: out.error.map(ExecutionError::from),
                    output: out.output,
                    gas_used,
                    gas_refunded: out.gas_refunded,
                    fees_covered: 0,
                    new_address: result_address,
                },
                receipt: BridgeReceipt {
                    state_root: old_state_root,
                    funding_root: old_funding_root,
                    gas_used: env.gas_used.saturating_add(gas_used),
                    logs: Vec::new(),
                },
                settlement: Transaction::empty(),
                logs_generated: out.logs,
            });
        }

        if let Some(engine_err) = out.error {
            warn!(error = %engine_err, "engine exception, transaction effects discarded");
            self.revert_caches();
            return Ok(ExecutionResult {
                outcome: ExecutionOutcome {
                    excepted: Some(ExecutionError::from(engine_err)),
                    output: out.output,
                    gas_used,
                    gas_refunded: out.gas_refunded,
                    fees_covered: 0,
                    new_address: result_address,
                },
                receipt: BridgeReceipt {
                    state_root: old_state_root,
                    funding_root: old_funding_root,
                    gas_used: env.gas_used.saturating_add(gas_used),
                    logs: Vec::new(),
                },
                settlement: Transaction::empty(),
                logs_generated: out.logs,
            });
        }

        // Success: apply deletions, resolve fee coverage, condense.
        self.pending_deletes.extend(out.self_destructs.iter().copied());
        let deletes = std::mem::take(&mut self.pending_deletes);
        self.delete_accounts(&deletes);

        let fee_charged = gas_used.saturating_mul(tx.gas_price);
        let (fees_covered, covering) = match fees_promised_by_logs(&out.logs) {
            Some(promise) => {
                let amount = promise.amount.min(fee_charged);
                if amount > 0 && self.account_fees_covered_by_contract(&promise.contract, amount) {
                    (amount, Some(promise.contract))
                } else {
                    if promise.amount > 0 {
                        warn!(
                            contract = %hex::encode(promise.contract),
                            amount = promise.amount,
                            "fee coverage promise not honored"
                        );
                    }
                    (0, None)
                }
            }
            None => (0, None),
        };
        if let Some(contract) = covering {
            // Checked against the account balance above; keeps the engine's
            // view of the contract in step with its funding record.
            if self.sub_balance(&contract, fees_covered).is_err() {
                warn!(contract = %hex::encode(contract), "fee coverage debit failed");
            }
        }

        let transfers = std::mem::take(&mut self.transfers);
        let condensed = Condenser::new(
            &self.accounts,
            &mut self.funding,
            &transfers,
            tx,
            &deletes,
            self.settlement_output_limit,
        )
        .build(fees_covered, covering);

        let condensed = match condensed {
            Ok(c) => c,
            Err(e) => {
                self.revert_caches();
                return Err(e.into());
            }
        };

        if condensed.overflow {
            warn!("settlement output budget exceeded, rejecting transaction");
            self.revert_caches();
            return Ok(ExecutionResult {
                outcome: ExecutionOutcome {
                    excepted: Some(ExecutionError::OutOfGas),
                    output: Vec::new(),
                    gas_used: tx.gas_limit,
                    gas_refunded: 0,
                    fees_covered: 0,
                    new_address: result_address,
                },
                receipt: BridgeReceipt {
                    state_root: old_state_root,
                    funding_root: old_funding_root,
                    gas_used: env.gas_used.saturating_add(tx.gas_limit),
                    logs: Vec::new(),
                },
                settlement: refund_transaction(tx),
                logs_generated: out.logs,
            });
        }

        self.funding.update(condensed.funding_updates);
        let (state_root, funding_root) = self.commit();

        Ok(ExecutionResult {
            outcome: ExecutionOutcome {
                excepted: None,
                output: out.output,
                gas_used,
                gas_refunded: out.gas_refunded,
                fees_covered,
                new_address: result_address,
            },
            receipt: BridgeReceipt {
                state_root,
                funding_root,
                gas_used: env.gas_used.saturating_add(gas_used),
                logs: out.logs.clone(),
            },
            settlement: condensed.settlement,
            logs_generated: out.logs,
        })
    }

    pub(crate) fn add_balance(&mut self, address: &Address, amount: u64) {
        let mut record = self.accounts.record(address).unwrap_or(AccountRecord {
            nonce: 0,
            balance: 0,
            alive: true,
        });
        record.balance = record.balance.saturating_add(amount);
        record.alive = true;
        self.accounts.set_record(address, record);
    }

    fn sub_balance(&mut self, address: &Address, amount: u64) -> Result<(), EngineError> {
        let mut record = self
            .accounts
            .record(address)
            .filter(|r| r.alive)
            .ok_or(EngineError::InsufficientBalance)?;
        record.balance = record
            .balance
            .checked_sub(amount)
            .ok_or(EngineError::InsufficientBalance)?;
        self.accounts.set_record(address, record);
        Ok(())
    }

    pub(crate) fn transfer_balance(
        &mut self,
        from: &Address,
        to: &Address,
        value: u64,
    ) -> Result<(), EngineError> {
        if value > 0 {
            self.sub_balance(from, value)?;
        }
        self.add_balance(to, value);
        if value > 0 {
            self.transfers.push(TransferInfo {
                from: *from,
                to: *to,
                value,
            });
        }
        Ok(())
    }

    fn delete_accounts(&mut self, addresses: &BTreeSet<Address>) {
        for address in addresses {
            self.accounts.kill(address);
            self.funding.mark_dead(address);
        }
    }

    fn revert_caches(&mut self) {
        self.accounts.clear();
        self.funding.clear();
        self.transfers.clear();
        self.pending_deletes.clear();
    }

    fn failed_result(
        &self,
        env: &EnvInfo,
        tx: &ContractTransaction,
        error: ExecutionError,
        gas_billed: u64,
        logs_generated: Vec<LogEntry>,
        state_root: H256,
        funding_root: H256,
    ) -> ExecutionResult {
        ExecutionResult {
            outcome: ExecutionOutcome {
                excepted: Some(error),
                output: Vec::new(),
                gas_used: gas_billed,
                gas_refunded: 0,
                fees_covered: 0,
                new_address: tx.to,
            },
            receipt: BridgeReceipt {
                state_root,
                funding_root,
                gas_used: env.gas_used.saturating_add(gas_billed),
                logs: Vec::new(),
            },
            settlement: Transaction::empty(),
            logs_generated,
        }
    }
}

impl<S: KvStore> VmHost for StateManager<S> {
    fn balance(&self, address: &Address) -> u64 {
        self.accounts.balance(address)
    }

    fn transfer(&mut self, from: &Address, to: &Address, value: u64) -> Result<(), EngineError> {
        self.transfer_balance(from, to, value)
    }

    fn storage(&self, address: &Address, key: &H256) -> Option<Vec<u8>> {
        self.accounts.storage_value(address, key)
    }

    fn set_storage(&mut self, address: &Address, key: H256, value: Vec<u8>) {
        self.accounts.set_storage_value(address, key, value);
    }

    fn code(&self, address: &Address) -> Option<Vec<u8>> {
        self.accounts.code(address)
    }

    fn set_code(&mut self, address: &Address, code: Vec<u8>) {
        self.accounts.set_code(address, code);
    }
}

/// Refund transaction synthesized when a settlement would exceed the output
/// budget: the carrier value goes straight back to the sender. Empty when
/// the call carried no value.
fn refund_transaction(tx: &ContractTransaction) -> Transaction {
    if tx.value == 0 {
        return Transaction::empty();
    }
    Transaction {
        inputs: vec![TxInput {
            prevout: OutPoint {
                txid: tx.origin_txid,
                vout: tx.origin_vout,
            },
            script: Script::spend(),
        }],
        outputs: vec![TxOutput {
            value: tx.value,
            script: Script::pay_to_pubkey_hash(&tx.sender),
        }],
        ..Transaction::default()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fee_promise_parsing() {
        let contract = [9u8; 20];
        let mut data = FEE_COVERAGE_TOKEN.to_vec();
        data.extend_from_slice(&123u64.to_be_bytes());
        let logs = vec![
            LogEntry {
                address: [1u8; 20],
                topics: vec![],
                data: b"unrelated".to_vec(),
            },
            LogEntry {
                address: contract,
                topics: vec![],
                data,
            },
        ];
        assert_eq!(
            fees_promised_by_logs(&logs),
            Some(FeePromise {
                contract,
                amount: 123
            })
        );
    }

    #[test]
    fn fee_promise_requires_exact_shape() {
        // token alone, or token with a truncated amount, is not a promise
        let log = |data: Vec<u8>| LogEntry {
            address: [2u8; 20],
            topics: vec![],
            data,
        };
        assert_eq!(fees_promised_by_logs(&[log(FEE_COVERAGE_TOKEN.to_vec())]), None);
        let mut short = FEE_COVERAGE_TOKEN.to_vec();
        short.extend_from_slice(&[0u8; 4]);
        assert_eq!(fees_promised_by_logs(&[log(short)]), None);
        assert_eq!(fees_promised_by_logs(&[]), None);
    }
}
