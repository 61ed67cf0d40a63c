// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Shared builders for evo tests.

use crate::consensus::{Money, PROVIDER_COLLATERAL};
use crate::evo::provider_tx::ProviderRegTx;
use crate::evo::subtx::{build_sub_tx, SubTxData};
use crate::evo::user::EvoUser;
use crate::primitives::{
    Hash256, KeyId, NetAddress, OutPoint, Script, SecretKey, Transaction, Transition,
    TransitionAction, TxInput, TxOutput, TRANSACTION_PROVIDER_REGISTER,
};

/// A fully valid provider registration transaction for the given endpoint
/// and keys
pub(crate) fn build_pro_reg_tx(addr: &str, operator: KeyId, owner_key: &SecretKey) -> Transaction {
    let owner = owner_key.public_key().to_key_id();
    let payout = Script::pay_to_pub_key_hash(&KeyId::random());

    let mut tx = Transaction::new(TRANSACTION_PROVIDER_REGISTER);
    tx.inputs.push(TxInput::new(OutPoint::new(
        Hash256::hash_from_slice(addr, "test-prevout"),
        0,
    )));
    tx.outputs.push(TxOutput {
        value: PROVIDER_COLLATERAL,
        script_pubkey: payout.clone(),
    });

    let mut ptx = ProviderRegTx::new(
        0,
        NetAddress::from_str_addr(addr).unwrap(),
        operator,
        owner,
        payout,
    );
    ptx.inputs_hash = tx.calc_inputs_hash();
    ptx.sign(owner_key);
    tx.extra_payload = ptx.to_bytes();
    tx
}

/// A signed register subscription transaction burning `amount` credits
pub(crate) fn build_register_tx(name: &str, key: &SecretKey, amount: Money) -> Transaction {
    let mut data = SubTxData::register(name.to_owned(), key.public_key().to_key_id());
    data.sign(key);
    build_sub_tx(&data, amount)
}

pub(crate) fn build_topup_tx(reg_tx_id: Hash256, amount: Money) -> Transaction {
    build_sub_tx(&SubTxData::topup(reg_tx_id), amount)
}

/// A transition signed with `key`, chained onto `user`'s current last
/// transition hash
pub(crate) fn build_transition(
    user: &EvoUser,
    action: TransitionAction,
    fee: Money,
    key: &SecretKey,
) -> Transition {
    let mut ts = Transition::new(action, fee, *user.reg_tx_id());
    ts.hash_prev_transition = *user.hash_last_transition();
    ts.sign(key);
    ts
}
