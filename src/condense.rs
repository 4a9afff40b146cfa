/*
    Copyright © 2024, Crucible Labs
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The transaction condenser: folds the value transfers and deletions of one
//! executed transaction into a single settlement transaction that rewrites
//! the UTXO entries of every touched contract address, plus the refreshed
//! funding-record map.
//!
//! Address iteration is over `BTreeMap`s throughout. Output order is part of
//! the settlement transaction and therefore of the block hash; a
//! non-canonical order would diverge across validating nodes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::error::CondenseError;
use crate::state::accounts::AccountLedger;
use crate::state::funding::{FundingLedger, Vin};
use crate::storage::KvStore;
use crate::transaction::{ContractTransaction, OutPoint, Script, Transaction, TxInput, TxOutput};
use crate::types::{Address, TransferInfo};

/// Most outputs one settlement transaction may carry.
pub const MAX_SETTLEMENT_OUTPUTS: usize = 1000;

/// Per-address net delta. Both sides accumulate independently and are only
/// combined in the final balance computation, so a naive net subtraction can
/// never hide an intermediate negative.
#[derive(Clone, Copy, Debug, Default)]
struct PlusMinus {
    incoming: u128,
    outgoing: u128,
}

/// What condensation hands back to the state manager.
pub(crate) struct CondenseOutcome {
    pub settlement: Transaction,
    pub funding_updates: HashMap<Address, Vin>,
    /// Set when the output budget was exceeded; the settlement must not be
    /// used and the caller rejects the transaction.
    pub overflow: bool,
}

pub(crate) struct Condenser<'a, S> {
    accounts: &'a AccountLedger<S>,
    funding: &'a mut FundingLedger<S>,
    transfers: &'a [TransferInfo],
    tx: &'a ContractTransaction,
    delete_addresses: &'a BTreeSet<Address>,
    output_limit: usize,

    plus_minus: BTreeMap<Address, PlusMinus>,
    balances: BTreeMap<Address, u64>,
    vout_indexes: BTreeMap<Address, u32>,
    vins: BTreeMap<Address, Vin>,
    overflow: bool,
}

impl<'a, S: KvStore> Condenser<'a, S> {
    pub fn new(
        accounts: &'a AccountLedger<S>,
        funding: &'a mut FundingLedger<S>,
        transfers: &'a [TransferInfo],
        tx: &'a ContractTransaction,
        delete_addresses: &'a BTreeSet<Address>,
        output_limit: usize,
    ) -> Self {
        Self {
            accounts,
            funding,
            transfers,
            tx,
            delete_addresses,
            output_limit,
            plus_minus: BTreeMap::new(),
            balances: BTreeMap::new(),
            vout_indexes: BTreeMap::new(),
            vins: BTreeMap::new(),
            overflow: false,
        }
    }

    /// Runs the full condensation pass. `fees_covered` is the gas amount a
    /// contract settles out of its own funding; it posts as one extra
    /// outgoing against `covering`.
    pub fn build(
        mut self,
        fees_covered: u64,
        covering: Option<Address>,
    ) -> Result<CondenseOutcome, CondenseError> {
        self.select_vins(fees_covered, covering);
        self.accumulate(fees_covered, covering);
        self.net_balances()?;

        let inputs = self.build_inputs();
        let outputs = self.build_outputs();
        if self.overflow {
            return Ok(CondenseOutcome {
                settlement: Transaction::empty(),
                funding_updates: HashMap::new(),
                overflow: true,
            });
        }

        let settlement = if inputs.is_empty() || outputs.is_empty() {
            Transaction::empty()
        } else {
            Transaction {
                inputs,
                outputs,
                ..Transaction::default()
            }
        };
        debug!(
            inputs = settlement.inputs.len(),
            outputs = settlement.outputs.len(),
            "condensed settlement transaction"
        );

        let funding_updates = self.refreshed_vins(&settlement);
        Ok(CondenseOutcome {
            settlement,
            funding_updates,
            overflow: false,
        })
    }

    /// Picks the funding record every touched address spends. The sender of
    /// a value-carrying transaction spends the carrier outpoint itself.
    fn select_vins(&mut self, fees_covered: u64, covering: Option<Address>) {
        for ti in self.transfers {
            if !self.vins.contains_key(&ti.from) {
                if let Some(vin) = self.funding.vin(&ti.from) {
                    self.vins.insert(ti.from, vin);
                }
                if ti.from == self.tx.sender && self.tx.value > 0 {
                    self.vins.insert(
                        ti.from,
                        Vin {
                            origin_txid: self.tx.origin_txid,
                            origin_vout: self.tx.origin_vout,
                            value: self.tx.value,
                            alive: true,
                        },
                    );
                }
            }
            if !self.vins.contains_key(&ti.to) {
                if let Some(vin) = self.funding.vin(&ti.to) {
                    self.vins.insert(ti.to, vin);
                }
            }
        }

        if fees_covered > 0 {
            if let Some(address) = covering {
                if !self.vins.contains_key(&address) {
                    if let Some(vin) = self.funding.vin(&address) {
                        self.vins.insert(address, vin);
                    }
                }
            }
        }
    }

    fn accumulate(&mut self, fees_covered: u64, covering: Option<Address>) {
        for ti in self.transfers {
            // self-transfers post both sides to preserve audit symmetry
            self.plus_minus.entry(ti.from).or_default().outgoing += ti.value as u128;
            self.plus_minus.entry(ti.to).or_default().incoming += ti.value as u128;
        }
        if fees_covered > 0 {
            if let Some(address) = covering {
                self.plus_minus.entry(address).or_default().outgoing += fees_covered as u128;
            }
        }
    }

    fn net_balances(&mut self) -> Result<(), CondenseError> {
        for (address, pm) in &self.plus_minus {
            let prior = self.vins.get(address).map_or(0, |v| v.value);
            let total = prior as u128 + pm.incoming;
            if total < pm.outgoing {
                return Err(CondenseError::NegativeBalance(*address));
            }
            let balance = u64::try_from(total - pm.outgoing)
                .map_err(|_| CondenseError::BalanceOverflow(*address))?;
            self.balances.insert(*address, balance);
        }
        Ok(())
    }

    /// Every selected record with value is consumed by the settlement
    /// transaction, whether it is being replaced or deleted.
    fn build_inputs(&self) -> Vec<TxInput> {
        self.vins
            .values()
            .filter(|vin| vin.value > 0)
            .map(|vin| TxInput {
                prevout: OutPoint {
                    txid: vin.origin_txid,
                    vout: vin.origin_vout,
                },
                script: Script::spend(),
            })
            .collect()
    }

    /// One output per address with a positive resulting balance, in
    /// canonical address order. Deleted addresses get no output; their
    /// residual value is burned out of the settlement.
    fn build_outputs(&mut self) -> Vec<TxOutput> {
        let mut outputs = Vec::new();
        for (address, balance) in &self.balances {
            if *balance == 0 || self.delete_addresses.contains(address) {
                continue;
            }
            let script = if self.accounts.is_alive(address) {
                Script::pay_to_contract(address)
            } else {
                Script::pay_to_pubkey_hash(address)
            };
            self.vout_indexes.insert(*address, outputs.len() as u32);
            outputs.push(TxOutput {
                value: *balance,
                script,
            });
            if outputs.len() > self.output_limit {
                self.overflow = true;
                return outputs;
            }
        }
        outputs
    }

    fn refreshed_vins(&self, settlement: &Transaction) -> HashMap<Address, Vin> {
        let txid = settlement.txid();
        let mut updates = HashMap::new();
        for (address, balance) in &self.balances {
            if *address == self.tx.sender {
                continue;
            }
            let vin = match self.vout_indexes.get(address) {
                Some(index) if *balance > 0 && !self.delete_addresses.contains(address) => Vin {
                    origin_txid: txid,
                    origin_vout: *index,
                    value: *balance,
                    alive: true,
                },
                _ => Vin {
                    origin_txid: txid,
                    origin_vout: 0,
                    value: 0,
                    alive: false,
                },
            };
            updates.insert(*address, vin);
        }
        updates
    }
}
