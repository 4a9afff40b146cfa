/*
    Copyright © 2024, Crucible Labs
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The boundary to the contract execution engine. The engine itself (opcode
//! interpretation, per-instruction gas metering, call/create semantics) lives
//! outside this crate; the bridge hands it a call context and a host handle,
//! and consumes the outcome. One production engine binding and one scripted
//! test double implement [ExecutionEngine].

use crate::types::{Address, EnvInfo, LogEntry, H256};

/// Call context handed to the engine for one transaction.
#[derive(Clone, Debug)]
pub struct CallParams<'a> {
    pub sender: Address,
    /// Resolved callee: for creations, the derived contract address
    pub target: Address,
    pub is_creation: bool,
    pub value: u64,
    /// Gas available for this execution
    pub gas: u64,
    pub gas_price: u64,
    pub data: &'a [u8],
    pub nonce: u64,
}

/// Everything the engine reports back from one execution.
#[derive(Debug, Default)]
pub struct EngineOutput {
    pub output: Vec<u8>,
    pub gas_left: u64,
    /// Gas the engine's own refund rules already credited back
    pub gas_refunded: u64,
    pub logs: Vec<LogEntry>,
    /// Contracts that self-destructed during the execution
    pub self_destructs: Vec<Address>,
    /// None on success
    pub error: Option<EngineError>,
}

/// Faults the engine can report. Converted into the transaction-level
/// failure taxonomy at the state manager boundary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("out of gas")]
    OutOfGas,

    #[error("bad instruction")]
    BadInstruction,

    #[error("bad jump destination")]
    BadJumpDestination,

    #[error("execution reverted")]
    Reverted,

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("engine fault: {0}")]
    Runtime(anyhow::Error),
}

/// State operations the bridge exposes to the engine while a transaction
/// runs. Every balance movement goes through [VmHost::transfer] so the
/// bridge can observe it.
pub trait VmHost {
    fn balance(&self, address: &Address) -> u64;

    /// Moves value between accounts. Fails with
    /// [EngineError::InsufficientBalance] when `from` cannot cover `value`.
    fn transfer(&mut self, from: &Address, to: &Address, value: u64) -> Result<(), EngineError>;

    fn storage(&self, address: &Address, key: &H256) -> Option<Vec<u8>>;

    fn set_storage(&mut self, address: &Address, key: H256, value: Vec<u8>);

    fn code(&self, address: &Address) -> Option<Vec<u8>>;

    fn set_code(&mut self, address: &Address, code: Vec<u8>);
}

/// The external contract execution engine, dispatched over a trait so the
/// bridge can be exercised without running real bytecode.
pub trait ExecutionEngine {
    fn execute(&self, env: &EnvInfo, params: &CallParams, host: &mut dyn VmHost) -> EngineOutput;
}
