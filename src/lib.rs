/*
    Copyright © 2024, Crucible Labs
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Crucible Runtime is the **state bridge** of a full node that fuses a
//! UTXO-based ledger with an account-based contract execution model. It
//! executes a block's contract-bearing transactions against the account
//! state machine and reconciles the resulting value movements with the UTXO
//! set that actually backs spendable coins.
//!
//! ```text
//! f(AR, FR, BD, TXs) -> (AR', FR', SETTLE, R)
//!
//! AR     = Account/contract trie root
//! FR     = UTXO-funding trie root
//! BD     = Block data (height, author, timestamp, ancestor hashes)
//! TXs    = The block's contract transactions, in block order
//! SETTLE = Settlement transactions re-funding post-execution balances
//! R      = Receipts, one per executed transaction
//! ```
//!
//! ### Example
//!
//! ```rust
//! // prepare a state manager over two stores, an engine binding, block
//! // data and the block's contract transactions, then run the batch.
//! let result = crucible_runtime::Runtime::new()
//!     .execute_batch(&mut state, &block, &txs, Permanence::Committed, &engine);
//! ```
//!
//! Consensus parameters (gas schedule, block size and gas limits, minimum
//! gas price) come from on-chain [governance] contracts rather than compiled
//! constants. Contract execution itself is an external collaborator behind
//! the [engine] trait; this crate owns everything between the engine and the
//! chain: the [envelope] gate, the dual-rooted [state] layer, value
//! condensation into settlement transactions ([condense]), and [batch]
//! orchestration.

pub mod batch;
pub use batch::{BatchExecutor, BatchResult};

pub mod condense;
pub use condense::MAX_SETTLEMENT_OUTPUTS;

pub mod engine;
pub use engine::{CallParams, EngineError, EngineOutput, ExecutionEngine, VmHost};

pub mod envelope;
pub use envelope::VersionedEnvelope;

pub mod error;
pub use error::{BlockError, CondenseError, ExecutionError, ExitStatus, StorageError};

pub mod governance;
pub use governance::{GasSchedule, GovernanceOracle};

pub mod runtime;
pub use runtime::{BlockConstraints, Runtime};

pub mod state;
pub use state::{
    AccountRecord, BridgeReceipt, ExecutionOutcome, ExecutionResult, StateManager,
    TemporarySnapshot, Vin,
};

pub mod storage;
pub use storage::{KvStore, MemoryStore};

pub mod transaction;
pub use transaction::{ContractTransaction, OutPoint, Script, Transaction, TxInput, TxOutput};

pub mod types;
pub use types::{Address, BlockContext, EnvInfo, LogEntry, Permanence, TransferInfo, H256};
