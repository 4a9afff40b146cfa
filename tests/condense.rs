/*
    Copyright © 2024, Crucible Labs
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Condensation properties: value conservation, canonical output ordering,
//! consistency enforcement and the settlement output budget.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crucible_runtime::{BlockError, ExecutionError, Permanence, Script};

mod common;
use common::{
    call_tx, env, fund_contract, new_state, CallScript, EngineAction, ScriptedEngine,
};

const C1: [u8; 20] = [0x31; 20];
const C2: [u8; 20] = [0x32; 20];
const EXTERNAL: [u8; 20] = [0x33; 20];

const BLOCK_GAS_LIMIT: u64 = 400_000_000;

#[test]
fn value_is_conserved_across_a_settlement() {
    let mut state = new_state();
    fund_contract(&mut state, C1, 400, [0x01; 32]);
    fund_contract(&mut state, C2, 250, [0x02; 32]);
    state.commit();

    let engine = ScriptedEngine::new(vec![CallScript::with_actions(vec![
        EngineAction::Transfer {
            from: None,
            to: C2,
            value: 50,
        },
        EngineAction::Transfer {
            from: Some(C2),
            to: EXTERNAL,
            value: 30,
        },
    ])]);

    let tx = call_tx(C1, 100, [0x03; 32]);
    let result = state
        .execute(&env(1, BLOCK_GAS_LIMIT), &tx, Permanence::Committed, &engine)
        .unwrap();

    assert_eq!(result.outcome.excepted, None);
    let settlement = &result.settlement;

    // inputs consume the carrier outpoint plus both prior funding records
    assert_eq!(settlement.inputs.len(), 3);
    // every unit that came in goes back out: 100 + 400 + 250
    assert_eq!(settlement.total_output_value(), 750);

    assert_eq!(state.funding_value(&C1), 450);
    assert_eq!(state.funding_value(&C2), 270);
    assert_eq!(state.funding_value(&EXTERNAL), 30);
}

#[test]
fn settlement_is_deterministic_under_transfer_reordering() {
    // accumulation is commutative, output order is canonical by address:
    // the same transfer set in any order yields byte-identical settlements
    let receivers: Vec<[u8; 20]> = (1u8..=9).map(|i| [i ^ 0x5a; 20]).collect();

    let run = |seed: u64| {
        let mut state = new_state();
        fund_contract(&mut state, C1, 1_000_000, [0x04; 32]);
        state.commit();

        let mut actions: Vec<EngineAction> = receivers
            .iter()
            .enumerate()
            .map(|(i, to)| EngineAction::Transfer {
                from: None,
                to: *to,
                value: 1_000 * (i as u64 + 1),
            })
            .collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        actions.shuffle(&mut rng);

        let engine = ScriptedEngine::new(vec![CallScript::with_actions(actions)]);
        let tx = call_tx(C1, 0, [0x05; 32]);
        let result = state
            .execute(&env(1, BLOCK_GAS_LIMIT), &tx, Permanence::Committed, &engine)
            .unwrap();
        assert_eq!(result.outcome.excepted, None);
        (result.settlement.serialize(), state.funding_root())
    };

    let (settlement_a, funding_a) = run(7);
    let (settlement_b, funding_b) = run(1234);
    assert_eq!(settlement_a, settlement_b);
    assert_eq!(funding_a, funding_b);
}

#[test]
fn output_order_is_canonical_by_address() {
    let mut state = new_state();
    fund_contract(&mut state, C1, 1_000, [0x06; 32]);
    state.commit();

    // deliberately transfer to descending addresses
    let engine = ScriptedEngine::new(vec![CallScript::with_actions(vec![
        EngineAction::Transfer {
            from: None,
            to: [0xee; 20],
            value: 10,
        },
        EngineAction::Transfer {
            from: None,
            to: [0x01; 20],
            value: 20,
        },
    ])]);

    let tx = call_tx(C1, 0, [0x07; 32]);
    let result = state
        .execute(&env(1, BLOCK_GAS_LIMIT), &tx, Permanence::Committed, &engine)
        .unwrap();

    let outputs = &result.settlement.outputs;
    assert_eq!(outputs.len(), 3);
    // [0x01..], then C1 (0x31..), then [0xee..]
    assert_eq!(outputs[0].value, 20);
    assert_eq!(outputs[1].value, 970);
    assert_eq!(outputs[2].value, 10);

    // vout indexes in the refreshed records line up with output positions
    assert_eq!(state.funding_record(&[0x01; 20]).unwrap().origin_vout, 0);
    assert_eq!(state.funding_record(&C1).unwrap().origin_vout, 1);
    assert_eq!(state.funding_record(&[0xee; 20]).unwrap().origin_vout, 2);
}

#[test]
fn unbacked_spending_is_a_consistency_violation() {
    // account balance without a funding record: the engine can move it, but
    // condensation must refuse to settle value that no record backs
    let mut state = new_state();
    state.set_balance(&C1, 300);
    let (state_root, funding_root) = state.commit();

    let engine = ScriptedEngine::new(vec![CallScript::with_actions(vec![
        EngineAction::Transfer {
            from: None,
            to: EXTERNAL,
            value: 300,
        },
    ])]);

    let tx = call_tx(C1, 0, [0x08; 32]);
    let err = state
        .execute(&env(1, BLOCK_GAS_LIMIT), &tx, Permanence::Committed, &engine)
        .unwrap_err();
    assert!(matches!(err, BlockError::Consistency(_)));

    // fatal to the block, and nothing was committed
    assert_eq!(state.state_root(), state_root);
    assert_eq!(state.funding_root(), funding_root);
}

#[test]
fn output_budget_overflow_rejects_and_refunds() {
    let mut state = new_state();
    let (state_root, funding_root) = state.commit();
    state.set_settlement_output_limit(3);

    let engine = ScriptedEngine::new(vec![CallScript::with_actions(vec![
        EngineAction::FanOut {
            count: 6,
            value: 10,
        },
    ])]);

    let tx = call_tx(C1, 100, [0x09; 32]);
    let result = state
        .execute(&env(1, BLOCK_GAS_LIMIT), &tx, Permanence::Committed, &engine)
        .unwrap();

    // surfaced as a synthetic out-of-gas with the whole limit billed
    assert_eq!(result.outcome.excepted, Some(ExecutionError::OutOfGas));
    assert_eq!(result.outcome.gas_used, tx.gas_limit);

    // the refund transaction returns the carrier value to the sender
    let refund = &result.settlement;
    assert_eq!(refund.inputs.len(), 1);
    assert_eq!(refund.inputs[0].prevout.txid, tx.origin_txid);
    assert_eq!(refund.outputs.len(), 1);
    assert_eq!(refund.outputs[0].value, 100);
    assert_eq!(
        refund.outputs[0].script,
        Script::pay_to_pubkey_hash(&common::SENDER)
    );

    assert_eq!(state.state_root(), state_root);
    assert_eq!(state.funding_root(), funding_root);
}

#[test]
fn value_to_deleted_addresses_is_burned() {
    // C1 forwards everything to C2, C2 self-destructs in the same call
    let mut state = new_state();
    fund_contract(&mut state, C1, 600, [0x0a; 32]);
    state.commit();

    let engine = ScriptedEngine::new(vec![CallScript::with_actions(vec![
        EngineAction::Transfer {
            from: None,
            to: C2,
            value: 600,
        },
        EngineAction::SelfDestruct { contract: Some(C2) },
    ])]);

    let tx = call_tx(C1, 0, [0x0b; 32]);
    let result = state
        .execute(&env(1, BLOCK_GAS_LIMIT), &tx, Permanence::Committed, &engine)
        .unwrap();

    assert_eq!(result.outcome.excepted, None);
    // C1 emptied, C2 deleted: nothing left to re-fund, value burned
    assert!(result.settlement.is_empty());
    assert_eq!(state.funding_record(&C1), None);
    assert_eq!(state.funding_record(&C2), None);
}
