/*
    Copyright © 2024, Crucible Labs
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The bridge's state layer: the account/contract ledger and the funding
//! registry, held as two independently-rooted tries by one [StateManager]
//! with a paired commit.

pub(crate) mod accounts;
pub(crate) mod funding;
pub(crate) mod manager;
pub(crate) mod snapshot;

pub use accounts::AccountRecord;
pub use funding::Vin;
pub use manager::{
    fees_promised_by_logs, BridgeReceipt, ExecutionOutcome, ExecutionResult, FeePromise,
    StateManager, FEE_COVERAGE_TOKEN,
};
pub use snapshot::TemporarySnapshot;
