// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::evo::user::EvoUser;
use crate::primitives::{Block, Hash256, Transition};
use chrono::Utc;
use log::info;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use triomphe::Arc;

struct TsEntry {
    ts: Transition,
    added_time_ms: i64,
}

type TsMap = HashMap<Hash256, Arc<TsEntry>>;

#[derive(Default)]
struct TsMempoolInner {
    transitions: TsMap,
    transitions_by_user: HashMap<Hash256, TsMap>,
    /// Transitions that failed validation for a recoverable reason and must
    /// be relayed once they become valid
    wait_for_relay: HashSet<Hash256>,
    last_cleanup_ms: i64,
}

/// Pool of unconfirmed transitions, indexed by hash and by user. A single
/// mutex guards all indices and is held for the duration of each operation.
#[derive(Default)]
pub struct TsMempool {
    inner: Mutex<TsMempoolInner>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl TsMempool {
    #[must_use]
    pub fn new() -> Self {
        Default::default()
    }

    /// Inserts a transition if absent, refreshing its timestamp otherwise.
    /// Returns whether an insertion happened.
    pub fn add_transition(&self, ts: Transition) -> bool {
        let mut inner = self.inner.lock();
        let ts_hash = ts.hash();

        if let Some(entry) = inner.transitions.get(&ts_hash) {
            let refreshed = Arc::new(TsEntry {
                ts: entry.ts.clone(),
                added_time_ms: now_ms(),
            });
            let user_map = inner
                .transitions_by_user
                .get_mut(&refreshed.ts.hash_reg_tx)
                .expect("user index out of sync");
            user_map.insert(ts_hash, refreshed.clone());
            inner.transitions.insert(ts_hash, refreshed);
            return false;
        }

        let entry = Arc::new(TsEntry {
            added_time_ms: now_ms(),
            ts,
        });

        inner
            .transitions_by_user
            .entry(entry.ts.hash_reg_tx)
            .or_default()
            .insert(ts_hash, entry.clone());
        inner.transitions.insert(ts_hash, entry);
        true
    }

    /// Purges a transition from every index
    pub fn remove_transition(&self, ts_hash: &Hash256) {
        let mut inner = self.inner.lock();
        Self::remove_locked(&mut inner, ts_hash);
    }

    fn remove_locked(inner: &mut TsMempoolInner, ts_hash: &Hash256) {
        let Some(entry) = inner.transitions.remove(ts_hash) else {
            return;
        };

        if let Some(user_map) = inner.transitions_by_user.get_mut(&entry.ts.hash_reg_tx) {
            user_map.remove(ts_hash);
            if user_map.is_empty() {
                inner.transitions_by_user.remove(&entry.ts.hash_reg_tx);
            }
        }

        inner.wait_for_relay.remove(ts_hash);
    }

    #[must_use]
    pub fn get_transition(&self, ts_hash: &Hash256) -> Option<Transition> {
        let inner = self.inner.lock();
        inner.transitions.get(ts_hash).map(|e| e.ts.clone())
    }

    #[must_use]
    pub fn exists(&self, ts_hash: &Hash256) -> bool {
        let inner = self.inner.lock();
        inner.transitions.contains_key(ts_hash)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.transitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The users that currently have pooled transitions
    #[must_use]
    pub fn get_users(&self) -> Vec<Hash256> {
        let inner = self.inner.lock();
        inner.transitions_by_user.keys().copied().collect()
    }

    /// All pooled transitions of one user, in unspecified order
    #[must_use]
    pub fn get_transitions_for_user(&self, reg_tx_id: &Hash256) -> Vec<Transition> {
        let inner = self.inner.lock();
        inner
            .transitions_by_user
            .get(reg_tx_id)
            .map(|m| m.values().map(|e| e.ts.clone()).collect())
            .unwrap_or_default()
    }

    /// The pooled successor of the user's chain: the transition whose
    /// `hash_prev_transition` equals the user's last transition hash. When
    /// several forks compete the smallest hash wins so every peer picks the
    /// same one; validation resolves the rest.
    #[must_use]
    pub fn get_next_transition_for_user(&self, user: &EvoUser) -> Option<Transition> {
        let inner = self.inner.lock();
        let user_map = inner.transitions_by_user.get(user.reg_tx_id())?;

        user_map
            .iter()
            .filter(|(_, e)| &e.ts.hash_prev_transition == user.hash_last_transition())
            .min_by_key(|(hash, _)| **hash)
            .map(|(_, e)| e.ts.clone())
    }

    /// Walks the pooled chain backwards from `last_ts_hash` until
    /// `stop_at_ts_hash` (exclusive) or until the chain leaves the pool.
    /// The result is ordered parents first.
    #[must_use]
    pub fn get_transitions_chain(
        &self,
        last_ts_hash: &Hash256,
        stop_at_ts_hash: &Hash256,
    ) -> Vec<Transition> {
        let inner = self.inner.lock();
        let mut result = Vec::new();

        let mut cur = *last_ts_hash;
        while &cur != stop_at_ts_hash {
            let Some(entry) = inner.transitions.get(&cur) else {
                break;
            };
            result.push(entry.ts.clone());
            cur = entry.ts.hash_prev_transition;
        }

        result.reverse();
        result
    }

    /// Parks a pooled transition for relay once it becomes valid
    pub fn add_wait_for_relay(&self, ts_hash: &Hash256) {
        let mut inner = self.inner.lock();
        if inner.transitions.contains_key(ts_hash) {
            inner.wait_for_relay.insert(*ts_hash);
        }
    }

    pub fn remove_wait_for_relay(&self, ts_hashes: &[Hash256]) {
        let mut inner = self.inner.lock();
        for ts_hash in ts_hashes {
            inner.wait_for_relay.remove(ts_hash);
        }
    }

    #[must_use]
    pub fn is_wait_for_relay(&self, ts_hash: &Hash256) -> bool {
        let inner = self.inner.lock();
        inner.wait_for_relay.contains(ts_hash)
    }

    /// Parked transitions that `is_valid` now accepts, ordered so that a
    /// parked parent always precedes its parked child. The validity check
    /// runs without the pool lock held; it may query the pool itself.
    #[must_use]
    pub fn get_now_valid_wait_for_relay_transitions(
        &self,
        is_valid: impl Fn(&Transition) -> bool,
    ) -> Vec<Hash256> {
        let (parked, wait_set) = {
            let inner = self.inner.lock();
            let parked: Vec<(Hash256, Transition)> = inner
                .wait_for_relay
                .iter()
                .map(|ts_hash| {
                    let entry = inner.transitions.get(ts_hash).expect("index out of sync");
                    (*ts_hash, entry.ts.clone())
                })
                .collect();
            (parked, inner.wait_for_relay.clone())
        };

        let mut tmp: VecDeque<(Hash256, Hash256)> = parked
            .into_iter()
            .filter(|(_, ts)| is_valid(ts))
            .map(|(ts_hash, ts)| (ts_hash, ts.hash_prev_transition))
            .collect();

        let mut result = Vec::new();
        let mut added: HashSet<Hash256> = HashSet::new();
        let mut stuck = 0usize;

        while let Some((ts_hash, prev)) = tmp.pop_front() {
            // a parked parent must be relayed first
            if !prev.is_zero() && wait_set.contains(&prev) && !added.contains(&prev) {
                tmp.push_back((ts_hash, prev));
                stuck += 1;
                if stuck > tmp.len() {
                    // parent was filtered out as still-invalid; its chain
                    // stays parked
                    break;
                }
                continue;
            }

            stuck = 0;
            result.push(ts_hash);
            added.insert(ts_hash);
        }

        result
    }

    /// Re-adds a disconnected block's transitions, in reverse block order
    pub fn re_add_for_block(&self, block: &Block) {
        for ts in block.transitions.iter().rev() {
            self.add_transition(ts.clone());
        }
    }

    /// Drops a connected block's transitions from the pool
    pub fn remove_for_block(&self, block: &Block) {
        let mut inner = self.inner.lock();
        for ts in &block.transitions {
            Self::remove_locked(&mut inner, &ts.hash());
        }
    }

    /// Whether the periodic cleanup pass is due
    #[must_use]
    pub fn should_cleanup(&self, interval_ms: i64) -> bool {
        let inner = self.inner.lock();
        now_ms() - inner.last_cleanup_ms >= interval_ms
    }

    /// Drops entries older than `timeout_ms` that `is_referenced` no longer
    /// ties to any user chain and that are not parked for relay. The
    /// reference check runs without the pool lock held; it may query the
    /// pool itself.
    pub fn cleanup(&self, timeout_ms: i64, is_referenced: impl Fn(&Transition) -> bool) {
        let cur_time = now_ms();

        let candidates: Vec<(Hash256, Transition)> = {
            let inner = self.inner.lock();
            inner
                .transitions
                .iter()
                .filter(|(ts_hash, entry)| {
                    cur_time - entry.added_time_ms > timeout_ms
                        && !inner.wait_for_relay.contains(*ts_hash)
                })
                .map(|(ts_hash, entry)| (*ts_hash, entry.ts.clone()))
                .collect()
        };

        let for_cleanup: Vec<Hash256> = candidates
            .into_iter()
            .filter(|(_, ts)| !is_referenced(ts))
            .map(|(ts_hash, _)| ts_hash)
            .collect();

        let mut inner = self.inner.lock();
        for ts_hash in for_cleanup {
            Self::remove_locked(&mut inner, &ts_hash);
            info!("ts mempool: {} removed by cleanup", ts_hash.to_hex());
        }

        inner.last_cleanup_ms = cur_time;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{KeyId, TransitionAction};

    fn ts_with_prev(user: Hash256, prev: Hash256, fee: i64) -> Transition {
        let mut ts = Transition::new(TransitionAction::CloseAccount, fee, user);
        ts.hash_prev_transition = prev;
        ts
    }

    fn user_hash(name: &str) -> Hash256 {
        Hash256::hash_from_slice(name, "test")
    }

    #[test]
    fn add_is_idempotent() {
        let pool = TsMempool::new();
        let ts = ts_with_prev(user_hash("u"), Hash256::zero(), 1000);

        assert!(pool.add_transition(ts.clone()));
        assert!(!pool.add_transition(ts.clone()));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get_transition(&ts.hash()), Some(ts));
    }

    #[test]
    fn remove_purges_all_indices() {
        let pool = TsMempool::new();
        let ts = ts_with_prev(user_hash("u"), Hash256::zero(), 1000);
        let ts_hash = ts.hash();

        pool.add_transition(ts);
        pool.add_wait_for_relay(&ts_hash);
        pool.remove_transition(&ts_hash);

        assert!(!pool.exists(&ts_hash));
        assert!(!pool.is_wait_for_relay(&ts_hash));
        assert!(pool.get_users().is_empty());
    }

    #[test]
    fn wait_for_relay_requires_pooled_transition() {
        let pool = TsMempool::new();
        let missing = user_hash("missing");
        pool.add_wait_for_relay(&missing);
        assert!(!pool.is_wait_for_relay(&missing));
    }

    #[test]
    fn next_transition_follows_user_chain() {
        let pool = TsMempool::new();
        let user_id = user_hash("u");
        let mut user = crate::evo::user::EvoUser::new(user_id, "u".to_owned(), KeyId::random());

        let ts1 = ts_with_prev(user_id, Hash256::zero(), 1000);
        let ts2 = ts_with_prev(user_id, ts1.hash(), 1000);
        pool.add_transition(ts2.clone());
        pool.add_transition(ts1.clone());

        assert_eq!(pool.get_next_transition_for_user(&user), Some(ts1.clone()));

        user.set_hash_last_transition(ts1.hash());
        assert_eq!(pool.get_next_transition_for_user(&user), Some(ts2));

        user.set_hash_last_transition(user_hash("elsewhere"));
        assert_eq!(pool.get_next_transition_for_user(&user), None);
    }

    #[test]
    fn ambiguous_forks_resolve_deterministically() {
        let pool = TsMempool::new();
        let user_id = user_hash("u");
        let user = crate::evo::user::EvoUser::new(user_id, "u".to_owned(), KeyId::random());

        let fork_a = ts_with_prev(user_id, Hash256::zero(), 1000);
        let fork_b = ts_with_prev(user_id, Hash256::zero(), 1001);
        pool.add_transition(fork_a.clone());
        pool.add_transition(fork_b.clone());

        let expected = if fork_a.hash() < fork_b.hash() {
            fork_a
        } else {
            fork_b
        };
        assert_eq!(pool.get_next_transition_for_user(&user), Some(expected));
    }

    #[test]
    fn chain_walk_stops_at_marker() {
        let pool = TsMempool::new();
        let user_id = user_hash("u");

        let ts1 = ts_with_prev(user_id, Hash256::zero(), 1000);
        let ts2 = ts_with_prev(user_id, ts1.hash(), 1000);
        let ts3 = ts_with_prev(user_id, ts2.hash(), 1000);
        for ts in [&ts1, &ts2, &ts3] {
            pool.add_transition(ts.clone());
        }

        let chain = pool.get_transitions_chain(&ts3.hash(), &Hash256::zero());
        assert_eq!(chain, vec![ts1.clone(), ts2.clone(), ts3.clone()]);

        let chain = pool.get_transitions_chain(&ts3.hash(), &ts1.hash());
        assert_eq!(chain, vec![ts2, ts3]);
    }

    #[test]
    fn now_valid_orders_parents_first() {
        let pool = TsMempool::new();
        let user_id = user_hash("u");

        let ts1 = ts_with_prev(user_id, Hash256::zero(), 1000);
        let ts2 = ts_with_prev(user_id, ts1.hash(), 1000);
        pool.add_transition(ts1.clone());
        pool.add_transition(ts2.clone());
        pool.add_wait_for_relay(&ts1.hash());
        pool.add_wait_for_relay(&ts2.hash());

        let now_valid = pool.get_now_valid_wait_for_relay_transitions(|_| true);
        assert_eq!(now_valid, vec![ts1.hash(), ts2.hash()]);
    }

    #[test]
    fn now_valid_skips_chains_with_invalid_parents() {
        let pool = TsMempool::new();
        let user_id = user_hash("u");

        let ts1 = ts_with_prev(user_id, Hash256::zero(), 1000);
        let ts2 = ts_with_prev(user_id, ts1.hash(), 1000);
        pool.add_transition(ts1.clone());
        pool.add_transition(ts2.clone());
        pool.add_wait_for_relay(&ts1.hash());
        pool.add_wait_for_relay(&ts2.hash());

        // the parent is still invalid, the child must stay parked
        let ts1_hash = ts1.hash();
        let now_valid = pool.get_now_valid_wait_for_relay_transitions(|ts| ts.hash() != ts1_hash);
        assert!(now_valid.is_empty());
    }

    #[test]
    fn block_connect_disconnect_cycle() {
        let pool = TsMempool::new();
        let user_id = user_hash("u");
        let ts1 = ts_with_prev(user_id, Hash256::zero(), 1000);
        let ts2 = ts_with_prev(user_id, ts1.hash(), 1000);

        let mut block = Block::new(Hash256::zero());
        block.transitions = vec![ts1.clone(), ts2.clone()];

        pool.add_transition(ts1.clone());
        pool.add_transition(ts2.clone());
        pool.remove_for_block(&block);
        assert!(pool.is_empty());

        pool.re_add_for_block(&block);
        assert_eq!(pool.len(), 2);
        assert!(pool.exists(&ts1.hash()));
        assert!(pool.exists(&ts2.hash()));
    }

    #[test]
    fn cleanup_drops_only_stale_unreferenced_entries() {
        let pool = TsMempool::new();
        let user_id = user_hash("u");
        let stale = ts_with_prev(user_id, Hash256::zero(), 1000);
        let referenced = ts_with_prev(user_id, Hash256::zero(), 1001);
        let parked = ts_with_prev(user_id, Hash256::zero(), 1002);

        pool.add_transition(stale.clone());
        pool.add_transition(referenced.clone());
        pool.add_transition(parked.clone());
        pool.add_wait_for_relay(&parked.hash());

        let referenced_hash = referenced.hash();
        // timeout of -1 ms makes every entry stale immediately
        pool.cleanup(-1, |ts| ts.hash() == referenced_hash);

        assert!(!pool.exists(&stale.hash()));
        assert!(pool.exists(&referenced_hash));
        assert!(pool.exists(&parked.hash()));
    }
}
