// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::DBInterface;
use crate::consensus::{
    money_check, Money, EVO_TS_MAX_FEE, EVO_TS_MAX_SIZE, EVO_TS_MIN_FEE, TS_CLEANUP_INTERVAL_MS,
    TS_CLEANUP_TIMEOUT_MS,
};
use crate::evo::context::EvoContext;
use crate::evo::user::EvoUser;
use crate::evo::{EvoErr, EvoResult, RejectCode};
use crate::primitives::{Block, Hash256, Transition, TransitionAction};
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet, HashSet};

fn check_transition_signatures(ts: &Transition, user: &EvoUser) -> EvoResult<()> {
    if user.verify_sig(&ts.sign_message_digest(), &ts.user_sig).is_err() {
        return Err(EvoErr::dos(100, RejectCode::TsSig, "bad-ts-usersig"));
    }

    // TODO check quorum sigs once the quorum infrastructure exists. The
    // field is carried and hashed but must not be asserted valid.
    Ok(())
}

/// Stateless-plus-user checks for a single transition. The caller resolves
/// which user view to validate against.
pub fn check_transition_for_user(
    ts: &Transition,
    user: &EvoUser,
    check_sigs: bool,
) -> EvoResult<()> {
    if ts.serialized_size() > EVO_TS_MAX_SIZE {
        return Err(EvoErr::dos(100, RejectCode::Invalid, "bad-ts-size"));
    }

    if user.is_closed() {
        // Low score as peers may not know about the closed account yet
        return Err(EvoErr::dos(10, RejectCode::Invalid, "bad-ts-accountclosed"));
    }

    // TODO min fee depending on ts size
    if !money_check(ts.fee) || ts.fee < EVO_TS_MIN_FEE || ts.fee > EVO_TS_MAX_FEE {
        return Err(EvoErr::dos(100, RejectCode::Invalid, "bad-ts-fee"));
    }

    if user.credit_balance() < ts.fee {
        // Low score as peers may not know about the low balance (e.g. due
        // to not yet mined topups)
        return Err(EvoErr::dos(
            10,
            RejectCode::InsufficientFee,
            "bad-ts-nocredits",
        ));
    }

    if &ts.hash_prev_transition != user.hash_last_transition() {
        // Low score as peers may not know yet that the user had other
        // transitions applied
        return Err(EvoErr::dos(10, RejectCode::TsAncestor, "bad-ts-ancestor"));
    }

    if check_sigs {
        check_transition_signatures(ts, user)?;
    }

    Ok(())
}

/// Applies a checked transition to the user view
pub fn process_transition_for_user(ts: &Transition, user: &mut EvoUser) -> EvoResult<()> {
    match &ts.action {
        TransitionAction::UpdateData { .. } => {}
        TransitionAction::ResetKey { new_pub_key_id } => {
            user.push_pub_key_id(*new_pub_key_id);
        }
        TransitionAction::CloseAccount => {
            user.set_closed(true);
        }
    }
    user.set_hash_last_transition(ts.hash());
    user.add_spend(ts.fee);
    Ok(())
}

/// Reverts a transition from the user view. Any mismatch means local state
/// corruption, never peer misbehaviour.
pub fn undo_transition_for_user(ts: &Transition, user: &mut EvoUser) -> EvoResult<()> {
    let ts_hash = ts.hash();
    if user.hash_last_transition() != &ts_hash {
        return Err(EvoErr::internal(format!(
            "unexpected hash_last_transition {} for user {}, expected {}",
            user.hash_last_transition().to_hex(),
            user.reg_tx_id().to_hex(),
            ts_hash.to_hex()
        )));
    }

    match &ts.action {
        TransitionAction::UpdateData { .. } => {}
        TransitionAction::ResetKey { new_pub_key_id } => {
            let popped = user.pop_pub_key_id();
            if popped != Some(*new_pub_key_id) {
                return Err(EvoErr::internal(format!(
                    "unexpected key {:?} popped from user {}, expected {}",
                    popped,
                    user.reg_tx_id().to_hex(),
                    new_pub_key_id.to_hex()
                )));
            }
        }
        TransitionAction::CloseAccount => {
            if !user.is_closed() {
                return Err(EvoErr::internal(format!(
                    "expected user {} to be closed",
                    user.reg_tx_id().to_hex()
                )));
            }
            user.set_closed(false);
        }
    }

    user.add_spend(-ts.fee);
    if user.spent_credits() < 0 {
        return Err(EvoErr::internal("unexpected negative spent credits"));
    }

    user.set_hash_last_transition(ts.hash_prev_transition);
    Ok(())
}

/// Total burnt transition fees of a block; credited to the block reward by
/// the base-chain engine
#[must_use]
pub fn calc_transition_fees_for_block(block: &Block) -> Money {
    block.transitions.iter().map(|ts| ts.fee).sum()
}

/// Where a transition lookup found its result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionInfoSource {
    /// Confirmed, with the hash of the including block when indexed
    Registry(Option<Hash256>),
    /// Unconfirmed, currently pooled
    Mempool,
}

impl<B: DBInterface> EvoContext<B> {
    fn get_users_from_block(&self, block: &Block) -> EvoResult<BTreeMap<Hash256, EvoUser>> {
        let reg_tx_ids: BTreeSet<Hash256> = block
            .transitions
            .iter()
            .map(|ts| ts.hash_reg_tx)
            .collect();

        let mut users = BTreeMap::new();
        for reg_tx_id in reg_tx_ids {
            let Some(user) = self.users.get_user(&reg_tx_id)? else {
                return Err(EvoErr::dos(100, RejectCode::TsNoUser, "bad-ts-nouser"));
            };
            users.insert(reg_tx_id, user);
        }
        Ok(users)
    }

    /// Validates and (unless `only_check`) applies a block's transition
    /// batch: loads every referenced user, rejects duplicate transition
    /// hashes, then checks and processes in block order and persists the
    /// transitions and touched users.
    pub fn process_transitions_in_block(&self, block: &Block, only_check: bool) -> EvoResult<()> {
        let mut users = self.get_users_from_block(block)?;

        let mut ts_hashes = HashSet::new();
        for ts in &block.transitions {
            if !ts_hashes.insert(ts.hash()) {
                return Err(EvoErr::dos(100, RejectCode::Invalid, "bad-ts-dup"));
            }
        }

        for ts in &block.transitions {
            let user = users
                .get_mut(&ts.hash_reg_tx)
                .expect("users loaded from this block above");
            check_transition_for_user(ts, user, true)?;
            process_transition_for_user(ts, user)?;
        }

        if !only_check {
            let block_hash = block.hash();
            for ts in &block.transitions {
                self.users.write_transition(ts)?;
                self.users
                    .write_transition_block_hash(&ts.hash(), &block_hash)?;
            }
            for user in users.values() {
                self.users.write_user(user)?;
            }
        }

        Ok(())
    }

    /// Reverts a block's transition batch in reverse block order, deleting
    /// the stored transitions and their block index entries
    pub fn undo_transitions_in_block(&self, block: &Block) -> EvoResult<()> {
        let mut users = self
            .get_users_from_block(block)
            .map_err(|e| EvoErr::internal(format!("failed to load users for undo: {e}")))?;

        for ts in block.transitions.iter().rev() {
            let user = users
                .get_mut(&ts.hash_reg_tx)
                .ok_or_else(|| EvoErr::internal("user vanished during undo"))?;
            undo_transition_for_user(ts, user)?;

            let ts_hash = ts.hash();
            self.users.delete_transition(&ts_hash)?;
            self.users.delete_transition_block_hash(&ts_hash)?;
        }

        for user in users.values() {
            self.users.write_user(user)?;
        }

        Ok(())
    }

    /// Validates a loose transition against the chain tip. With
    /// `include_mempool` the user view is extended by pending
    /// registrations, topups and pooled ancestor transitions.
    pub fn check_transition(
        &self,
        ts: &Transition,
        check_sigs: bool,
        include_mempool: bool,
    ) -> EvoResult<()> {
        let stored = self.users.get_user(&ts.hash_reg_tx)?;
        let mut user = match stored {
            Some(user) => user,
            None => {
                let built = if include_mempool {
                    self.build_user_from_mempool(&ts.hash_reg_tx)
                } else {
                    None
                };
                // Low score as peers may not know about this user yet
                built.ok_or_else(|| EvoErr::dos(10, RejectCode::TsNoUser, "bad-ts-nouser"))?
            }
        };

        if include_mempool {
            self.topup_user_from_mempool(&mut user);
            self.apply_user_transitions_from_mempool(&mut user, &ts.hash());
        }

        check_transition_for_user(ts, &user, check_sigs)
    }

    /// Rolls the user view forward through its pooled transition chain,
    /// stopping before `stop_at_ts` or at the first invalid link. Returns
    /// whether anything was applied.
    pub fn apply_user_transitions_from_mempool(
        &self,
        user: &mut EvoUser,
        stop_at_ts: &Hash256,
    ) -> bool {
        let mut did_apply = false;
        loop {
            let Some(next) = self.ts_mempool.get_next_transition_for_user(user) else {
                break;
            };
            if &next.hash() == stop_at_ts {
                break;
            }
            if check_transition_for_user(&next, user, true).is_err() {
                break;
            }
            if process_transition_for_user(&next, user).is_err() {
                break;
            }
            did_apply = true;
        }
        did_apply
    }

    /// Entry point for a transition received from a peer or RPC. The
    /// transition is always pooled; invalid ones are not relayed, and those
    /// failing for a recoverable reason are parked for relay once they
    /// become valid. Returns whether the transition should be relayed now.
    pub fn handle_incoming_transition(&self, ts: Transition) -> EvoResult<bool> {
        let ts_hash = ts.hash();
        if self.ts_mempool.exists(&ts_hash) {
            return Ok(false);
        }

        // Pooled no matter if valid: a transition may be invalid now and
        // become valid once other subscriptions or transitions are mined
        self.ts_mempool.add_transition(ts.clone());

        if self.ts_mempool.should_cleanup(TS_CLEANUP_INTERVAL_MS) {
            self.cleanup_ts_mempool();
        }

        match self.check_transition(&ts, true, true) {
            Ok(()) => Ok(true),
            Err(err) => {
                debug!("transition {} not valid: {}", ts_hash.to_hex(), err);
                if err.is_parkable() {
                    self.ts_mempool.add_wait_for_relay(&ts_hash);
                }
                Err(err)
            }
        }
    }

    /// Parked transitions that became valid, parents first. They are
    /// unparked here; the caller relays them.
    pub fn drain_wait_for_relay(&self) -> Vec<Hash256> {
        let now_valid = self
            .ts_mempool
            .get_now_valid_wait_for_relay_transitions(|ts| {
                self.check_transition(ts, true, true).is_ok()
            });
        self.ts_mempool.remove_wait_for_relay(&now_valid);
        now_valid
    }

    /// Cleanup eligibility: a pooled transition is kept while it still
    /// chains validly onto some user view
    fn is_ts_referenced(&self, ts: &Transition) -> bool {
        let mut user = match self.users.get_user(&ts.hash_reg_tx) {
            Ok(Some(user)) => user,
            Ok(None) => match self.build_user_from_mempool(&ts.hash_reg_tx) {
                Some(user) => user,
                None => return false,
            },
            Err(_) => return false,
        };

        self.topup_user_from_mempool(&mut user);

        let chain = self
            .ts_mempool
            .get_transitions_chain(&ts.hash_prev_transition, user.hash_last_transition());
        for ts2 in &chain {
            if check_transition_for_user(ts2, &user, true).is_err() {
                return false;
            }
            if process_transition_for_user(ts2, &mut user).is_err() {
                return false;
            }
        }

        user.hash_last_transition() == &ts.hash_prev_transition
    }

    /// Drops stale pool entries that no longer connect to any user chain
    pub fn cleanup_ts_mempool(&self) {
        self.ts_mempool
            .cleanup(TS_CLEANUP_TIMEOUT_MS, |ts| self.is_ts_referenced(ts));
    }

    /// Fills a block template with pooled transitions, one per user per
    /// round so block space is distributed evenly.
    // TODO fee based selection (without losing per-user order) for miner
    // reward maximization
    pub fn add_mempool_transitions_to_block(
        &self,
        block: &mut Block,
        max_ts_space: u64,
        max_block_size: u64,
    ) {
        let mut user_ids = self.ts_mempool.get_users();
        user_ids.sort();

        let mut users: BTreeMap<Hash256, EvoUser> = BTreeMap::new();
        for reg_tx_id in user_ids {
            match self.users.get_user(&reg_tx_id) {
                Ok(Some(user)) => {
                    users.insert(reg_tx_id, user);
                }
                Ok(None) | Err(_) => {}
            }
        }

        let mut ts_space_used: u64 = block
            .transitions
            .iter()
            .map(|ts| ts.serialized_size() as u64)
            .sum();
        let mut block_size = block.serialized_size();

        loop {
            let mut stop = true;
            for user in users.values_mut() {
                let Some(ts) = self.ts_mempool.get_next_transition_for_user(user) else {
                    continue;
                };

                let ts_size = ts.serialized_size() as u64;
                if ts_space_used + ts_size > max_ts_space || block_size + ts_size > max_block_size {
                    continue;
                }

                if let Err(err) = check_transition_for_user(&ts, user, true) {
                    info!(
                        "block assembly: check failed for {}: {}",
                        ts.hash().to_hex(),
                        err
                    );
                    continue;
                }
                if let Err(err) = process_transition_for_user(&ts, user) {
                    info!(
                        "block assembly: process failed for {}: {}",
                        ts.hash().to_hex(),
                        err
                    );
                    continue;
                }

                ts_space_used += ts_size;
                block_size += ts_size;
                block.transitions.push(ts);
                stop = false;
            }
            if stop {
                break;
            }
        }
    }

    /// Looks a transition up in the registry first, then in the pool.
    /// A transition returns the same object from the registry after
    /// inclusion as from the pool before it.
    pub fn lookup_transition(
        &self,
        ts_hash: &Hash256,
    ) -> EvoResult<Option<(Transition, TransitionInfoSource)>> {
        if let Some(ts) = self.users.get_transition(ts_hash)? {
            let block_hash = self.users.get_transition_block_hash(ts_hash)?;
            return Ok(Some((ts, TransitionInfoSource::Registry(block_hash))));
        }
        if let Some(ts) = self.ts_mempool.get_transition(ts_hash) {
            return Ok(Some((ts, TransitionInfoSource::Mempool)));
        }
        Ok(None)
    }

    /// User view for queries: the stored record, optionally extended by the
    /// pending mempool state
    pub fn get_user_view(
        &self,
        reg_tx_id: &Hash256,
        include_mempool: bool,
    ) -> EvoResult<Option<EvoUser>> {
        let stored = self.users.get_user(reg_tx_id)?;
        let mut user = match stored {
            Some(user) => user,
            None => {
                if !include_mempool {
                    return Ok(None);
                }
                match self.build_user_from_mempool(reg_tx_id) {
                    Some(user) => user,
                    None => return Ok(None),
                }
            }
        };

        if include_mempool {
            self.topup_user_from_mempool(&mut user);
            self.apply_user_transitions_from_mempool(&mut user, &Hash256::zero());
        }

        Ok(Some(user))
    }
}
