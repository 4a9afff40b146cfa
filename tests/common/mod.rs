/*
    Copyright © 2024, Crucible Labs
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Shared fixtures: an in-memory state manager and a scripted engine double
//! that exercises the bridge without running real bytecode.

// each integration suite uses its own slice of these helpers
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;

use crucible_runtime::state::FEE_COVERAGE_TOKEN;
use crucible_runtime::{
    Address, BlockContext, CallParams, ContractTransaction, EngineError, EngineOutput, EnvInfo,
    ExecutionEngine, LogEntry, MemoryStore, StateManager, VersionedEnvelope, Vin, VmHost,
};

pub const SENDER: Address = [0x11; 20];
pub const AUTHOR: Address = [0xaa; 20];

pub fn new_state() -> StateManager<MemoryStore> {
    StateManager::new(MemoryStore::new(), MemoryStore::new())
}

/// Seeds a contract whose account balance and funding record agree, the way
/// a previous settlement would have left them. The caller commits.
pub fn fund_contract(
    state: &mut StateManager<MemoryStore>,
    address: Address,
    value: u64,
    origin_txid: crucible_runtime::H256,
) {
    state.set_balance(&address, value);
    state.set_funding_record(
        address,
        Vin {
            origin_txid,
            origin_vout: 0,
            value,
            alive: true,
        },
    );
}

pub fn call_tx(to: Address, value: u64, origin_txid: crucible_runtime::H256) -> ContractTransaction {
    ContractTransaction {
        version: VersionedEnvelope::evm_default(),
        sender: SENDER,
        to: Some(to),
        value,
        gas_limit: 100_000,
        gas_price: 40,
        data: Vec::new(),
        nonce: 0,
        origin_txid,
        origin_vout: 0,
    }
}

pub fn block(height: u64) -> BlockContext {
    BlockContext {
        height,
        author: AUTHOR,
        timestamp: 1_700_000_000,
        difficulty: 1,
        ancestor_hashes: Vec::new(),
    }
}

pub fn env(height: u64, block_gas_limit: u64) -> EnvInfo {
    EnvInfo::from_block(&block(height), block_gas_limit)
}

/// One scripted behavior step the engine double performs through the host.
#[derive(Clone, Debug)]
pub enum EngineAction {
    /// Transfer out of the call target (or an explicit source).
    Transfer {
        from: Option<Address>,
        to: Address,
        value: u64,
    },
    /// Report the target (or another contract) as self-destructed.
    SelfDestruct { contract: Option<Address> },
    /// Emit a log from the call target.
    Log { topics: Vec<[u8; 32]>, data: Vec<u8> },
    /// Emit the reserved fee-coverage declaration from the call target.
    PromiseFees { amount: u64 },
    SetStorage { key: [u8; 32], value: Vec<u8> },
    /// Transfer `value` from the target to `count` distinct addresses.
    FanOut { count: u32, value: u64 },
}

#[derive(Clone, Copy, Debug)]
pub enum Fault {
    OutOfGas,
    BadInstruction,
    BadJumpDestination,
}

/// The behavior of one engine call.
#[derive(Clone, Debug)]
pub struct CallScript {
    pub actions: Vec<EngineAction>,
    pub gas_used: u64,
    pub fault: Option<Fault>,
}

impl Default for CallScript {
    fn default() -> Self {
        Self {
            actions: Vec::new(),
            gas_used: 21_000,
            fault: None,
        }
    }
}

impl CallScript {
    pub fn with_actions(actions: Vec<EngineAction>) -> Self {
        Self {
            actions,
            ..Self::default()
        }
    }

    pub fn faulting(fault: Fault) -> Self {
        Self {
            fault: Some(fault),
            ..Self::default()
        }
    }
}

/// Engine double: pops one script per call, applies its actions through the
/// host, and reports the scripted outcome.
pub struct ScriptedEngine {
    scripts: RefCell<VecDeque<CallScript>>,
}

impl ScriptedEngine {
    pub fn new(scripts: Vec<CallScript>) -> Self {
        Self {
            scripts: RefCell::new(scripts.into()),
        }
    }

    pub fn noop() -> Self {
        Self::new(Vec::new())
    }
}

impl ExecutionEngine for ScriptedEngine {
    fn execute(&self, _env: &EnvInfo, params: &CallParams, host: &mut dyn VmHost) -> EngineOutput {
        let script = self
            .scripts
            .borrow_mut()
            .pop_front()
            .unwrap_or_default();

        let mut logs = Vec::new();
        let mut self_destructs = Vec::new();
        let mut error = None;

        for action in script.actions {
            match action {
                EngineAction::Transfer { from, to, value } => {
                    let from = from.unwrap_or(params.target);
                    if let Err(e) = host.transfer(&from, &to, value) {
                        error = Some(e);
                        break;
                    }
                }
                EngineAction::SelfDestruct { contract } => {
                    self_destructs.push(contract.unwrap_or(params.target));
                }
                EngineAction::Log { topics, data } => {
                    logs.push(LogEntry {
                        address: params.target,
                        topics,
                        data,
                    });
                }
                EngineAction::PromiseFees { amount } => {
                    let mut data = FEE_COVERAGE_TOKEN.to_vec();
                    data.extend_from_slice(&amount.to_be_bytes());
                    logs.push(LogEntry {
                        address: params.target,
                        topics: Vec::new(),
                        data,
                    });
                }
                EngineAction::SetStorage { key, value } => {
                    host.set_storage(&params.target, key, value);
                }
                EngineAction::FanOut { count, value } => {
                    for i in 0..count {
                        let mut to = [0u8; 20];
                        to[..4].copy_from_slice(&(i + 1).to_be_bytes());
                        to[19] = 0xfb;
                        if let Err(e) = host.transfer(&params.target, &to, value) {
                            error = Some(e);
                            break;
                        }
                    }
                }
            }
            if error.is_some() {
                break;
            }
        }

        let error = match script.fault {
            Some(Fault::OutOfGas) => Some(EngineError::OutOfGas),
            Some(Fault::BadInstruction) => Some(EngineError::BadInstruction),
            Some(Fault::BadJumpDestination) => Some(EngineError::BadJumpDestination),
            None => error,
        };
        let gas_left = match error {
            Some(EngineError::OutOfGas) => 0,
            _ => params.gas.saturating_sub(script.gas_used),
        };

        EngineOutput {
            output: Vec::new(),
            gas_left,
            gas_refunded: 0,
            logs,
            self_destructs,
            error,
        }
    }
}
