// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::DBInterface;
use crate::consensus::{NetworkId, Sporks};
use crate::evo::deterministic::DmnManager;
use crate::evo::ts_mempool::TsMempool;
use crate::evo::users_db::UsersDb;
use crate::evo::EvoResult;
use crate::primitives::{Block, Hash256, Transaction, TRANSACTION_PROVIDER_REGISTER};

/// Read-only view of the base transaction mempool. The base-chain engine
/// owns that pool; the evo subsystem only asks it about pending
/// subscription transactions.
pub trait TxMempoolView {
    /// The pending register subscription with the given hash, if any
    fn get_sub_tx(&self, reg_tx_id: &Hash256) -> Option<Transaction>;

    /// Pending topup subscriptions for the given user
    fn topups_for_user(&self, reg_tx_id: &Hash256) -> Vec<Transaction>;

    /// Whether a pending register subscription already claims this name
    fn sub_tx_name_exists(&self, user_name: &str) -> bool;
}

/// View used when no base mempool is attached (tests, offline tools)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTxMempool;

impl TxMempoolView for NoTxMempool {
    fn get_sub_tx(&self, _reg_tx_id: &Hash256) -> Option<Transaction> {
        None
    }

    fn topups_for_user(&self, _reg_tx_id: &Hash256) -> Vec<Transaction> {
        vec![]
    }

    fn sub_tx_name_exists(&self, _user_name: &str) -> bool {
        false
    }
}

/// Everything the evo validators touch, threaded through the entry points
/// instead of living in process-wide singletons. Owned by the node's
/// top-level service object; all block-level calls happen with the chain
/// lock held by the caller.
pub struct EvoContext<B: DBInterface> {
    pub users: UsersDb<B>,
    pub dmn: DmnManager<B>,
    pub ts_mempool: TsMempool,
    pub sporks: Sporks,
    pub network: NetworkId,
    pub tx_mempool: Box<dyn TxMempoolView + Send + Sync>,
}

impl<B: DBInterface + Clone> EvoContext<B> {
    pub fn new(db: B, sporks: Sporks, network: NetworkId) -> EvoResult<Self> {
        Ok(Self {
            users: UsersDb::new(db.clone()),
            dmn: DmnManager::new(db)?,
            ts_mempool: TsMempool::new(),
            sporks,
            network,
            tx_mempool: Box::new(NoTxMempool),
        })
    }

    pub fn with_tx_mempool(mut self, view: Box<dyn TxMempoolView + Send + Sync>) -> Self {
        self.tx_mempool = view;
        self
    }
}

impl<B: DBInterface> EvoContext<B> {
    /// Applies all evo content of a connected block: subscription
    /// transactions first (they may create the users the block's
    /// transitions refer to), then the transition batch, then the
    /// deterministic list. Finally drops confirmed transitions from the
    /// pool and drains the newly valid parked ones.
    pub fn connect_block(&self, block: &Block, height: u64) -> EvoResult<()> {
        for tx in &block.txs {
            if tx.is_sub_tx() {
                self.check_sub_tx(tx, false)?;
                self.process_sub_tx(tx)?;
            }
        }

        self.process_transitions_in_block(block, false)?;

        self.dmn
            .process_block(block, height, &self.sporks, self.network)?;

        self.ts_mempool.remove_for_block(block);
        Ok(())
    }

    /// Reverts all evo content of a disconnected block, in exact reverse
    /// order of `connect_block`, and re-absorbs the block's transitions
    /// into the pool so they may re-enter a later block.
    pub fn disconnect_block(&self, block: &Block, height: u64) -> EvoResult<()> {
        self.dmn.undo_block(block, height)?;

        self.undo_transitions_in_block(block)?;

        for tx in block.txs.iter().rev() {
            if tx.is_sub_tx() {
                self.undo_sub_tx(tx)?;
            }
        }

        self.ts_mempool.re_add_for_block(block);
        Ok(())
    }

    /// Whether a transaction carries evo content this context validates
    #[must_use]
    pub fn is_special_tx(&self, tx: &Transaction) -> bool {
        tx.is_sub_tx() || tx.tx_type == TRANSACTION_PROVIDER_REGISTER
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MemoryBackend;
    use crate::consensus::{EVO_TS_MIN_FEE};
    use crate::evo::test_utils::{
        build_pro_reg_tx, build_register_tx, build_topup_tx, build_transition,
    };
    use crate::primitives::{KeyId, SecretKey, TransitionAction};

    fn context() -> EvoContext<MemoryBackend> {
        EvoContext::new(MemoryBackend::new(), Sporks::new(0), NetworkId::Regtest).unwrap()
    }

    fn block(prev: Hash256) -> Block {
        Block::new(prev)
    }

    /// Register -> topup -> two updates -> close, then fully reorged out.
    #[test]
    fn full_user_lifecycle_and_reorg() {
        let ctx = context();
        let key = SecretKey::random();

        // block 1: register bob with 100_000 credits and top up 50_000
        let reg_tx = build_register_tx("bob", &key, 100_000);
        let reg_tx_id = reg_tx.hash();
        let mut b1 = block(Hash256::zero());
        b1.txs.push(reg_tx);
        b1.txs.push(build_topup_tx(reg_tx_id, 50_000));
        ctx.connect_block(&b1, 1).unwrap();

        let user = ctx.users.get_user(&reg_tx_id).unwrap().unwrap();
        assert_eq!(user.credit_balance(), 150_000);
        assert_eq!(user.user_name(), "bob");

        // block 2: two chained updates and a close, 1000 fee each
        let ts1 = build_transition(
            &user,
            TransitionAction::UpdateData {
                hash_data_merkle_root: Hash256::hash_from_slice("data1", "test"),
            },
            EVO_TS_MIN_FEE,
            &key,
        );
        let mut after_ts1 = user.clone();
        after_ts1.set_hash_last_transition(ts1.hash());
        let ts2 = build_transition(
            &after_ts1,
            TransitionAction::UpdateData {
                hash_data_merkle_root: Hash256::hash_from_slice("data2", "test"),
            },
            EVO_TS_MIN_FEE,
            &key,
        );
        let mut after_ts2 = after_ts1.clone();
        after_ts2.set_hash_last_transition(ts2.hash());
        let ts3 = build_transition(&after_ts2, TransitionAction::CloseAccount, EVO_TS_MIN_FEE, &key);

        let mut b2 = block(b1.hash());
        b2.transitions = vec![ts1.clone(), ts2.clone(), ts3.clone()];
        ctx.connect_block(&b2, 2).unwrap();

        let user = ctx.users.get_user(&reg_tx_id).unwrap().unwrap();
        assert_eq!(user.credit_balance(), 147_000);
        assert_eq!(user.spent_credits(), 3000);
        assert!(user.is_closed());
        assert_eq!(user.hash_last_transition(), &ts3.hash());
        assert_eq!(user.pub_key_ids().len(), 1);

        // transitions are retrievable from the registry once confirmed
        assert_eq!(
            ctx.users.get_transition(&ts1.hash()).unwrap(),
            Some(ts1.clone())
        );
        assert_eq!(
            ctx.users.get_transition_block_hash(&ts1.hash()).unwrap(),
            Some(b2.hash())
        );

        // reorg out block 2: user state back to pre-b2, transitions pooled
        ctx.disconnect_block(&b2, 2).unwrap();
        let user = ctx.users.get_user(&reg_tx_id).unwrap().unwrap();
        assert_eq!(user.credit_balance(), 150_000);
        assert_eq!(user.spent_credits(), 0);
        assert!(!user.is_closed());
        assert_eq!(user.hash_last_transition(), &Hash256::zero());
        for ts in [&ts1, &ts2, &ts3] {
            assert!(ctx.ts_mempool.exists(&ts.hash()));
            assert_eq!(ctx.users.get_transition(&ts.hash()).unwrap(), None);
        }

        // reorg out block 1 as well: the user is gone entirely
        ctx.disconnect_block(&b1, 1).unwrap();
        assert_eq!(ctx.users.get_user(&reg_tx_id).unwrap(), None);
        assert!(!ctx.users.user_name_exists("bob").unwrap());
    }

    /// Apply/undo over two blocks leaves user state bitwise identical and
    /// both transitions in the mempool.
    #[test]
    fn reorg_two_blocks_restores_state_and_repools() {
        let ctx = context();
        let key = SecretKey::random();

        let reg_tx = build_register_tx("carol", &key, 100_000);
        let reg_tx_id = reg_tx.hash();
        let mut b1 = block(Hash256::zero());
        b1.txs.push(reg_tx);
        ctx.connect_block(&b1, 1).unwrap();

        let baseline = ctx.users.get_user(&reg_tx_id).unwrap().unwrap();

        let ts1 = build_transition(
            &baseline,
            TransitionAction::UpdateData {
                hash_data_merkle_root: Hash256::hash_from_slice("d1", "test"),
            },
            EVO_TS_MIN_FEE,
            &key,
        );
        let mut b2 = block(b1.hash());
        b2.transitions = vec![ts1.clone()];
        ctx.connect_block(&b2, 2).unwrap();

        let mid = ctx.users.get_user(&reg_tx_id).unwrap().unwrap();
        let ts2 = build_transition(
            &mid,
            TransitionAction::UpdateData {
                hash_data_merkle_root: Hash256::hash_from_slice("d2", "test"),
            },
            EVO_TS_MIN_FEE,
            &key,
        );
        let mut b3 = block(b2.hash());
        b3.transitions = vec![ts2.clone()];
        ctx.connect_block(&b3, 3).unwrap();

        // disconnect in reverse order
        ctx.disconnect_block(&b3, 3).unwrap();
        ctx.disconnect_block(&b2, 2).unwrap();

        let restored = ctx.users.get_user(&reg_tx_id).unwrap().unwrap();
        assert_eq!(restored, baseline);
        assert!(ctx.ts_mempool.exists(&ts1.hash()));
        assert!(ctx.ts_mempool.exists(&ts2.hash()));
    }

    /// Providers and users coexist in one block; the whole block round-trips.
    #[test]
    fn mixed_block_apply_undo() {
        let ctx = context();
        let key = SecretKey::random();

        let mut b1 = block(Hash256::zero());
        b1.txs
            .push(build_pro_reg_tx("8.8.8.8:9999", KeyId::random(), &SecretKey::random()));
        b1.txs.push(build_register_tx("dave", &key, 100_000));
        ctx.connect_block(&b1, 1).unwrap();

        assert_eq!(ctx.dmn.list_at_tip().len(), 1);
        assert!(ctx.users.user_name_exists("dave").unwrap());

        ctx.disconnect_block(&b1, 1).unwrap();
        assert!(ctx.dmn.list_at_tip().is_empty());
        assert!(!ctx.users.user_name_exists("dave").unwrap());
    }
}
