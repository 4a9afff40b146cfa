/*
    Copyright © 2024, Crucible Labs
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! error defines sets of error definitions in the entire life time of a
//! block's bridge execution.
//!
//! The taxonomy separates three severities: [ExecutionError] is recoverable
//! at the batch level (the offending transaction is excluded, the batch
//! continues), [CondenseError] and [StorageError] are fatal to the block,
//! and governance read failures are not errors at all (the oracle falls back
//! to compiled defaults and logs).

use crate::engine::EngineError;
use crate::types::{Address, H256};

/// Descriptive error definitions of one transaction's execution. All of
/// these leave the offending transaction without state effect and let the
/// batch continue.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// Execution exhausted the transaction gas limit.
    #[error("execution ran out of gas")]
    OutOfGas,

    /// The engine hit an illegal instruction.
    #[error("bad instruction")]
    BadInstruction,

    /// The engine hit a jump to a non-jumpable destination.
    #[error("bad jump destination")]
    BadJumpDestination,

    /// The versioned envelope carries an unrecognized format, target, or
    /// flag bits.
    #[error("unrecognized transaction version")]
    InvalidTransactionVersion,

    /// The sender's live funding records do not cover the required value.
    #[error("live funding below required value")]
    InsufficientFunding,

    /// Contract creation cannot carry value.
    #[error("contract creation cannot carry value")]
    CreateWithValue,

    /// The contract requested a revert.
    #[error("execution reverted")]
    Reverted,

    /// Opaque engine fault.
    #[error("engine fault: {0}")]
    EngineFault(String),
}

impl From<EngineError> for ExecutionError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::OutOfGas => ExecutionError::OutOfGas,
            EngineError::BadInstruction => ExecutionError::BadInstruction,
            EngineError::BadJumpDestination => ExecutionError::BadJumpDestination,
            EngineError::Reverted => ExecutionError::Reverted,
            EngineError::InsufficientBalance => ExecutionError::InsufficientFunding,
            EngineError::Runtime(e) => ExecutionError::EngineFault(e.to_string()),
        }
    }
}

/// Exit status carried in a transaction's receipt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failed,
    GasExhausted,
}

impl From<&ExecutionError> for ExitStatus {
    fn from(value: &ExecutionError) -> Self {
        match value {
            ExecutionError::OutOfGas => ExitStatus::GasExhausted,
            _ => ExitStatus::Failed,
        }
    }
}

/// Condensation failures. A negative net balance means the engine authorized
/// spending beyond available balance; the block carrying the transaction
/// must not be committed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CondenseError {
    #[error("condensation drove address {} negative", hex::encode(.0))]
    NegativeBalance(Address),

    #[error("condensed balance for address {} exceeds representable value", hex::encode(.0))]
    BalanceOverflow(Address),
}

/// Authenticated store failures.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("unknown state root {}", hex::encode(.0))]
    UnknownRoot(H256),
}

/// Block-fatal failures surfaced from batch execution.
#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error(transparent)]
    Consistency(#[from] CondenseError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
