// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::DBInterface;
use crate::consensus::{NetworkId, Sporks, DMN_SNAPSHOT_PERIOD};
use crate::evo::provider_tx::{check_pro_reg_tx, ProviderRegTx};
use crate::evo::{EvoErr, EvoResult};
use crate::primitives::{Block, Hash256, KeyId, NetAddress, Transaction, TRANSACTION_PROVIDER_REGISTER};
use bincode::{Decode, Encode};
use log::info;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use triomphe::Arc;

const DB_PRO_TX: &[u8] = b"dmn_M";
const DB_BLOCK_INFO: &[u8] = b"dmn_B";
const DB_SNAPSHOT: &[u8] = b"dmn_S";
const DB_STATE: &[u8] = b"dmn_s";

fn pro_tx_key(pro_tx_hash: &Hash256) -> Vec<u8> {
    [DB_PRO_TX, pro_tx_hash.as_bytes()].concat()
}

fn block_info_key(height: u64) -> Vec<u8> {
    [DB_BLOCK_INFO, height.to_be_bytes().as_slice()].concat()
}

fn snapshot_key(height: u64) -> Vec<u8> {
    [DB_SNAPSHOT, height.to_be_bytes().as_slice()].concat()
}

/// Mutable per-entry state tracked alongside the registration payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Default)]
pub struct DmnState {
    pub registered_height: u64,
    pub last_paid_height: u64,
}

/// A registered service node: registration payload plus tracked state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmnEntry {
    pub pro_tx_hash: Hash256,
    pub pro_tx: Arc<ProviderRegTx>,
    pub state: DmnState,
}

/// Snapshot of all registered service nodes at a block height. Iteration
/// order is the entry hash order and therefore identical on every peer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DmnList {
    height: u64,
    entries: BTreeMap<Hash256, DmnEntry>,
}

impl DmnList {
    #[must_use]
    pub fn new(height: u64) -> Self {
        Self {
            height,
            entries: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn set_height(&mut self, height: u64) {
        self.height = height;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &DmnEntry> {
        self.entries.values()
    }

    #[must_use]
    pub fn get(&self, pro_tx_hash: &Hash256) -> Option<&DmnEntry> {
        self.entries.get(pro_tx_hash)
    }

    #[must_use]
    pub fn contains(&self, pro_tx_hash: &Hash256) -> bool {
        self.entries.contains_key(pro_tx_hash)
    }

    #[must_use]
    pub fn contains_addr(&self, addr: &NetAddress) -> bool {
        self.entries.values().any(|e| &e.pro_tx.addr == addr)
    }

    /// Whether any entry holds `key_id` as its operator or owner key
    #[must_use]
    pub fn contains_key_id(&self, key_id: &KeyId) -> bool {
        self.entries
            .values()
            .any(|e| &e.pro_tx.key_id_operator == key_id || &e.pro_tx.key_id_owner == key_id)
    }

    pub fn insert(&mut self, entry: DmnEntry) {
        self.entries.insert(entry.pro_tx_hash, entry);
    }

    pub fn remove(&mut self, pro_tx_hash: &Hash256) -> Option<DmnEntry> {
        self.entries.remove(pro_tx_hash)
    }

    /// The next payee: lowest `last_paid_height`, ties broken by
    /// `registered_height`, then by entry hash
    #[must_use]
    pub fn payee(&self) -> Option<&DmnEntry> {
        self.entries.values().min_by(|a, b| {
            a.state
                .last_paid_height
                .cmp(&b.state.last_paid_height)
                .then(a.state.registered_height.cmp(&b.state.registered_height))
                .then(a.pro_tx_hash.cmp(&b.pro_tx_hash))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Default)]
struct DmnRemovedEntry {
    pro_tx_hash: Hash256,
    state: DmnState,
}

/// What a block changed in the list. Written when the block connects,
/// consumed to undo it and to reconstruct historical lists.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Default)]
struct DmnBlockInfo {
    added: Vec<Hash256>,
    removed: Vec<DmnRemovedEntry>,
    payee_pro_tx_hash: Hash256,
    prev_payee_height: u64,
}

impl DmnBlockInfo {
    fn is_null(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.payee_pro_tx_hash.is_zero()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
struct DmnManagerState {
    first_mn_height: i64,
    cur_height: u64,
    cur_block_hash: Hash256,
    blocks_with_mns_count: u64,
}

impl Default for DmnManagerState {
    fn default() -> Self {
        Self {
            first_mn_height: -1,
            cur_height: 0,
            cur_block_hash: Hash256::zero(),
            blocks_with_mns_count: 0,
        }
    }
}

struct DmnManagerInner {
    state: DmnManagerState,
    /// List at the current tip. Published copy-on-write: readers clone the
    /// `Arc` and never observe a half-applied block.
    tip: Arc<DmnList>,
}

/// Maintains the deterministic service node list across block connects and
/// disconnects. Entries enter through confirmed provider registrations and
/// leave when their collateral outpoint is spent.
pub struct DmnManager<B: DBInterface> {
    db: B,
    inner: RwLock<DmnManagerInner>,
}

impl<B: DBInterface> DmnManager<B> {
    pub fn new(db: B) -> EvoResult<Self> {
        let state: DmnManagerState = db.get(DB_STATE)?.unwrap_or_default();
        let manager = Self {
            db,
            inner: RwLock::new(DmnManagerInner {
                state: state.clone(),
                tip: Arc::new(DmnList::new(state.cur_height)),
            }),
        };

        let tip = manager.reconstruct_list(state.cur_height, &state)?;
        manager.inner.write().tip = Arc::new(tip);
        Ok(manager)
    }

    /// The list at the current tip. Cheap; shares the published snapshot.
    #[must_use]
    pub fn list_at_tip(&self) -> Arc<DmnList> {
        self.inner.read().tip.clone()
    }

    /// The registration payload of a known service node
    pub fn get_pro_tx(&self, pro_tx_hash: &Hash256) -> EvoResult<Option<ProviderRegTx>> {
        Ok(self.db.get(pro_tx_key(pro_tx_hash))?)
    }

    /// The list as of `height`. The tip snapshot is returned directly;
    /// historical lists are rebuilt from the nearest persisted snapshot
    /// plus per-block deltas.
    pub fn list_at_height(&self, height: u64) -> EvoResult<DmnList> {
        let inner = self.inner.read();
        if height == inner.state.cur_height {
            return Ok((*inner.tip).clone());
        }

        let state = inner.state.clone();
        drop(inner);
        self.reconstruct_list(height, &state)
    }

    /// Applies a connected block. Registrations are fully re-checked
    /// against the evolving list so that a second registration reusing an
    /// address or key inside the same block is rejected.
    pub fn process_block(
        &self,
        block: &Block,
        height: u64,
        sporks: &Sporks,
        network: NetworkId,
    ) -> EvoResult<()> {
        let mut inner = self.inner.write();
        let mut tip = (*inner.tip).clone();
        let mut block_info = DmnBlockInfo::default();

        // payee is selected from the pre-block list
        let payee_hash = tip.payee().map(|e| e.pro_tx_hash);

        for tx in &block.txs {
            // an input spending a registered collateral removes the entry
            for input in &tx.inputs {
                let pro_tx_hash = input.prevout.hash;
                let collateral_spent = tip
                    .get(&pro_tx_hash)
                    .map(|e| e.pro_tx.collateral_index == input.prevout.index)
                    .unwrap_or(false);

                if collateral_spent {
                    let entry = tip.remove(&pro_tx_hash).expect("entry checked above");
                    block_info.removed.push(DmnRemovedEntry {
                        pro_tx_hash,
                        state: entry.state,
                    });
                    info!(
                        "dmn: node {} removed, collateral spent. height={}, size={}",
                        pro_tx_hash.to_hex(),
                        height,
                        tip.len()
                    );
                }
            }

            if tx.tx_type == TRANSACTION_PROVIDER_REGISTER {
                let ptx = check_pro_reg_tx(tx, Some(&tip), height, sporks, network)?;
                let pro_tx_hash = tx.hash();

                self.db.put(pro_tx_key(&pro_tx_hash), &ptx)?;
                tip.insert(DmnEntry {
                    pro_tx_hash,
                    pro_tx: Arc::new(ptx),
                    state: DmnState {
                        registered_height: height,
                        last_paid_height: 0,
                    },
                });
                block_info.added.push(pro_tx_hash);

                if inner.state.first_mn_height == -1 {
                    inner.state.first_mn_height = height as i64;
                }

                info!(
                    "dmn: node {} added. height={}, size={}",
                    pro_tx_hash.to_hex(),
                    height,
                    tip.len()
                );
            }
        }

        // stamp the payee unless its collateral was spent in this block
        if let Some(payee_hash) = payee_hash {
            if let Some(entry) = tip.entries.get_mut(&payee_hash) {
                block_info.payee_pro_tx_hash = payee_hash;
                block_info.prev_payee_height = entry.state.last_paid_height;
                entry.state.last_paid_height = height;
            }
        }

        if !block_info.is_null() {
            self.db.put(block_info_key(height), &block_info)?;

            if !block_info.added.is_empty() || !block_info.removed.is_empty() {
                inner.state.blocks_with_mns_count += 1;
                if inner.state.blocks_with_mns_count % DMN_SNAPSHOT_PERIOD == 0 {
                    self.write_snapshot(height, &tip)?;
                    info!("dmn: wrote snapshot. height={}, size={}", height, tip.len());
                }
            }
        }

        inner.state.cur_height = height;
        inner.state.cur_block_hash = block.hash();
        self.db.put(DB_STATE, &inner.state)?;

        tip.set_height(height);
        inner.tip = Arc::new(tip);
        Ok(())
    }

    /// Reverts a disconnected block. The manager must be exactly at the
    /// block being undone.
    pub fn undo_block(&self, block: &Block, height: u64) -> EvoResult<()> {
        let mut inner = self.inner.write();

        if inner.state.cur_height != height || inner.state.cur_block_hash != block.hash() {
            return Err(EvoErr::internal(format!(
                "dmn undo at unexpected tip: state height {} hash {}, block height {} hash {}",
                inner.state.cur_height,
                inner.state.cur_block_hash.to_hex(),
                height,
                block.hash().to_hex()
            )));
        }

        let mut tip = (*inner.tip).clone();
        let block_info: Option<DmnBlockInfo> = self.db.get(block_info_key(height))?;

        if let Some(block_info) = block_info {
            if !block_info.payee_pro_tx_hash.is_zero() {
                let entry = tip
                    .entries
                    .get_mut(&block_info.payee_pro_tx_hash)
                    .ok_or_else(|| EvoErr::internal("dmn undo: payee not in list"))?;
                entry.state.last_paid_height = block_info.prev_payee_height;
            }

            for removed in &block_info.removed {
                let ptx: ProviderRegTx =
                    self.db.get(pro_tx_key(&removed.pro_tx_hash))?.ok_or_else(|| {
                        EvoErr::internal("dmn undo: missing payload for removed node")
                    })?;
                if tip.contains(&removed.pro_tx_hash) {
                    return Err(EvoErr::internal("dmn undo: removed node still in list"));
                }
                tip.insert(DmnEntry {
                    pro_tx_hash: removed.pro_tx_hash,
                    pro_tx: Arc::new(ptx),
                    state: removed.state,
                });
                info!(
                    "dmn: node {} restored on undo. height={}, size={}",
                    removed.pro_tx_hash.to_hex(),
                    height,
                    tip.len()
                );
            }

            let mut found = 0usize;
            for tx in block.txs.iter().rev() {
                if tx.tx_type == TRANSACTION_PROVIDER_REGISTER {
                    let pro_tx_hash = tx.hash();
                    if !block_info.added.contains(&pro_tx_hash) {
                        return Err(EvoErr::internal("dmn undo: registration not in block info"));
                    }
                    self.db.delete(pro_tx_key(&pro_tx_hash))?;
                    tip.remove(&pro_tx_hash);
                    found += 1;

                    info!(
                        "dmn: node {} removed on undo. height={}, size={}",
                        pro_tx_hash.to_hex(),
                        height,
                        tip.len()
                    );
                }
            }
            if found != block_info.added.len() {
                return Err(EvoErr::internal("dmn undo: added node count mismatch"));
            }

            self.db.delete(block_info_key(height))?;

            if !block_info.added.is_empty() || !block_info.removed.is_empty() {
                if inner.state.blocks_with_mns_count % DMN_SNAPSHOT_PERIOD == 0 {
                    self.db.delete(snapshot_key(height))?;
                }
                inner.state.blocks_with_mns_count -= 1;
            }
        }

        inner.state.cur_height = height.saturating_sub(1);
        inner.state.cur_block_hash = block.hash_prev_block;
        if inner.state.first_mn_height == height as i64 {
            inner.state.first_mn_height = -1;
        }
        self.db.put(DB_STATE, &inner.state)?;

        tip.set_height(inner.state.cur_height);
        inner.tip = Arc::new(tip);
        Ok(())
    }

    fn write_snapshot(&self, height: u64, list: &DmnList) -> EvoResult<()> {
        let snapshot: Vec<(Hash256, DmnState)> = list
            .entries()
            .map(|e| (e.pro_tx_hash, e.state))
            .collect();
        self.db.put(snapshot_key(height), &snapshot)?;
        Ok(())
    }

    fn reconstruct_list(&self, height: u64, state: &DmnManagerState) -> EvoResult<DmnList> {
        let mut list = DmnList::new(height);

        if state.first_mn_height < 0
            || (height as i64) < state.first_mn_height
            || height > state.cur_height
        {
            return Ok(list);
        }

        let mut entries: BTreeMap<Hash256, DmnState> = BTreeMap::new();

        // walk down to the nearest persisted snapshot
        let mut snapshot_height = state.first_mn_height - 1;
        let mut h = height as i64;
        while h >= state.first_mn_height {
            if let Some(snapshot) = self
                .db
                .get::<_, Vec<(Hash256, DmnState)>>(snapshot_key(h as u64))?
            {
                entries = snapshot.into_iter().collect();
                snapshot_height = h;
                break;
            }
            h -= 1;
        }

        // then roll forward through the per-block deltas
        for h in (snapshot_height + 1)..=(height as i64) {
            let Some(block_info) = self
                .db
                .get::<_, DmnBlockInfo>(block_info_key(h as u64))?
            else {
                continue;
            };

            for removed in &block_info.removed {
                entries.remove(&removed.pro_tx_hash);
            }
            for pro_tx_hash in &block_info.added {
                entries.insert(
                    *pro_tx_hash,
                    DmnState {
                        registered_height: h as u64,
                        last_paid_height: 0,
                    },
                );
            }
            if !block_info.payee_pro_tx_hash.is_zero() {
                if let Some(state) = entries.get_mut(&block_info.payee_pro_tx_hash) {
                    state.last_paid_height = h as u64;
                }
            }
        }

        for (pro_tx_hash, dmn_state) in entries {
            let ptx: ProviderRegTx = self
                .db
                .get(pro_tx_key(&pro_tx_hash))?
                .ok_or_else(|| EvoErr::internal("dmn: missing payload during reconstruction"))?;
            list.insert(DmnEntry {
                pro_tx_hash,
                pro_tx: Arc::new(ptx),
                state: dmn_state,
            });
        }

        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MemoryBackend;
    use crate::evo::test_utils::build_pro_reg_tx;
    use crate::primitives::{OutPoint, SecretKey, TxInput};

    fn manager() -> DmnManager<MemoryBackend> {
        DmnManager::new(MemoryBackend::new()).unwrap()
    }

    fn sporks() -> Sporks {
        Sporks::new(0)
    }

    fn block_with_txs(prev: Hash256, txs: Vec<Transaction>) -> Block {
        let mut block = Block::new(prev);
        block.txs = txs;
        block
    }

    fn connect(
        mgr: &DmnManager<MemoryBackend>,
        prev: Hash256,
        height: u64,
        txs: Vec<Transaction>,
    ) -> EvoResult<Block> {
        let block = block_with_txs(prev, txs);
        mgr.process_block(&block, height, &sporks(), NetworkId::Mainnet)?;
        Ok(block)
    }

    #[test]
    fn registration_enters_the_list() {
        let mgr = manager();
        let tx = build_pro_reg_tx("8.8.8.8:9999", KeyId::random(), &SecretKey::random());
        let pro_tx_hash = tx.hash();

        connect(&mgr, Hash256::zero(), 1, vec![tx]).unwrap();

        let tip = mgr.list_at_tip();
        assert_eq!(tip.len(), 1);
        assert!(tip.contains(&pro_tx_hash));
        assert_eq!(tip.get(&pro_tx_hash).unwrap().state.registered_height, 1);
    }

    #[test]
    fn duplicate_addr_in_same_block_rejected() {
        let mgr = manager();
        let a = build_pro_reg_tx("8.8.8.8:9999", KeyId::random(), &SecretKey::random());
        let b = build_pro_reg_tx("8.8.8.8:9999", KeyId::random(), &SecretKey::random());

        let err = connect(&mgr, Hash256::zero(), 1, vec![a, b]).unwrap_err();
        assert_eq!(err.what(), Some("bad-protx-dup-addr"));
        match err {
            EvoErr::Rejected(r) => assert_eq!(r.score, 10),
            EvoErr::Internal(_) => panic!("expected rejection"),
        }
    }

    #[test]
    fn duplicate_addr_across_blocks_rejected() {
        let mgr = manager();
        let a = build_pro_reg_tx("8.8.8.8:9999", KeyId::random(), &SecretKey::random());
        let block = connect(&mgr, Hash256::zero(), 1, vec![a]).unwrap();

        let b = build_pro_reg_tx("8.8.8.8:9999", KeyId::random(), &SecretKey::random());
        let err = connect(&mgr, block.hash(), 2, vec![b]).unwrap_err();
        assert_eq!(err.what(), Some("bad-protx-dup-addr"));
    }

    #[test]
    fn duplicate_operator_key_rejected() {
        let mgr = manager();
        let operator = KeyId::random();
        let a = build_pro_reg_tx("8.8.8.8:9999", operator, &SecretKey::random());
        let block = connect(&mgr, Hash256::zero(), 1, vec![a]).unwrap();

        let b = build_pro_reg_tx("9.9.9.9:9999", operator, &SecretKey::random());
        let err = connect(&mgr, block.hash(), 2, vec![b]).unwrap_err();
        assert_eq!(err.what(), Some("bad-protx-dup-key"));
    }

    #[test]
    fn collateral_spend_removes_entry_and_undo_restores_it() {
        let mgr = manager();
        let reg = build_pro_reg_tx("8.8.8.8:9999", KeyId::random(), &SecretKey::random());
        let pro_tx_hash = reg.hash();
        let b1 = connect(&mgr, Hash256::zero(), 1, vec![reg]).unwrap();
        assert_eq!(mgr.list_at_tip().len(), 1);

        // spend the collateral outpoint
        let mut spend = Transaction::new(crate::primitives::TRANSACTION_NORMAL);
        spend
            .inputs
            .push(TxInput::new(OutPoint::new(pro_tx_hash, 0)));
        let b2 = connect(&mgr, b1.hash(), 2, vec![spend]).unwrap();
        assert!(mgr.list_at_tip().is_empty());

        mgr.undo_block(&b2, 2).unwrap();
        let tip = mgr.list_at_tip();
        assert_eq!(tip.len(), 1);
        assert_eq!(tip.get(&pro_tx_hash).unwrap().state.registered_height, 1);
    }

    #[test]
    fn apply_undo_roundtrip_is_identity() {
        let mgr = manager();
        let reg1 = build_pro_reg_tx("8.8.8.8:9999", KeyId::random(), &SecretKey::random());
        let b1 = connect(&mgr, Hash256::zero(), 1, vec![reg1]).unwrap();

        let before = mgr.list_at_tip();
        let reg2 = build_pro_reg_tx("9.9.9.9:9999", KeyId::random(), &SecretKey::random());
        let b2 = connect(&mgr, b1.hash(), 2, vec![reg2]).unwrap();
        assert_eq!(mgr.list_at_tip().len(), 2);

        mgr.undo_block(&b2, 2).unwrap();
        let after = mgr.list_at_tip();
        assert_eq!(*before, *after);
    }

    #[test]
    fn undo_at_wrong_tip_is_internal_error() {
        let mgr = manager();
        let reg = build_pro_reg_tx("8.8.8.8:9999", KeyId::random(), &SecretKey::random());
        let b1 = connect(&mgr, Hash256::zero(), 1, vec![reg]).unwrap();

        let stale = block_with_txs(b1.hash(), vec![]);
        assert!(matches!(
            mgr.undo_block(&stale, 5).unwrap_err(),
            EvoErr::Internal(_)
        ));
    }

    #[test]
    fn historical_lists_are_reconstructed() {
        let mgr = manager();
        let reg1 = build_pro_reg_tx("8.8.8.8:9999", KeyId::random(), &SecretKey::random());
        let h1 = reg1.hash();
        let b1 = connect(&mgr, Hash256::zero(), 1, vec![reg1]).unwrap();

        let reg2 = build_pro_reg_tx("9.9.9.9:9999", KeyId::random(), &SecretKey::random());
        let h2 = reg2.hash();
        connect(&mgr, b1.hash(), 2, vec![reg2]).unwrap();

        let list1 = mgr.list_at_height(1).unwrap();
        assert_eq!(list1.len(), 1);
        assert!(list1.contains(&h1));

        let list2 = mgr.list_at_height(2).unwrap();
        assert_eq!(list2.len(), 2);
        assert!(list2.contains(&h2));

        assert!(mgr.list_at_height(0).unwrap().is_empty());
    }

    #[test]
    fn payee_rotates_by_last_paid_height() {
        let mgr = manager();
        let reg1 = build_pro_reg_tx("8.8.8.8:9999", KeyId::random(), &SecretKey::random());
        let h1 = reg1.hash();
        let b1 = connect(&mgr, Hash256::zero(), 1, vec![reg1]).unwrap();

        let reg2 = build_pro_reg_tx("9.9.9.9:9999", KeyId::random(), &SecretKey::random());
        let h2 = reg2.hash();
        let b2 = connect(&mgr, b1.hash(), 2, vec![reg2]).unwrap();

        // block 2 paid the only pre-block entry
        assert_eq!(mgr.list_at_tip().get(&h1).unwrap().state.last_paid_height, 2);

        // the next block pays the entry that has never been paid
        let b3 = connect(&mgr, b2.hash(), 3, vec![]).unwrap();
        assert_eq!(mgr.list_at_tip().get(&h2).unwrap().state.last_paid_height, 3);

        // then rotation comes back around
        connect(&mgr, b3.hash(), 4, vec![]).unwrap();
        assert_eq!(mgr.list_at_tip().get(&h1).unwrap().state.last_paid_height, 4);
    }

    #[test]
    fn state_survives_reload() {
        let db = MemoryBackend::new();
        let mgr = DmnManager::new(db.clone()).unwrap();
        let reg = build_pro_reg_tx("8.8.8.8:9999", KeyId::random(), &SecretKey::random());
        let pro_tx_hash = reg.hash();
        connect(&mgr, Hash256::zero(), 1, vec![reg]).unwrap();
        drop(mgr);

        let reloaded = DmnManager::new(db).unwrap();
        let tip = reloaded.list_at_tip();
        assert_eq!(tip.len(), 1);
        assert!(tip.contains(&pro_tx_hash));
    }
}
