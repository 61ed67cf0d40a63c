// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::{DBInterface, DBInterfaceErr, IteratorDirection};
use crate::evo::user::EvoUser;
use crate::primitives::{Hash256, Transition};
use streaming_iterator::StreamingIterator;

const DB_USER: &[u8] = b"evo_U";
const DB_USER_BY_NAME: &[u8] = b"evo_u";
const DB_TRANSITION: &[u8] = b"evo_T";
const DB_TRANSITION_BLOCK: &[u8] = b"evo_B";
const DB_TRANSITIONS_BY_USER: &[u8] = b"evo_J";

fn user_key(reg_tx_id: &Hash256) -> Vec<u8> {
    [DB_USER, reg_tx_id.as_bytes()].concat()
}

fn name_key(user_name: &str) -> Vec<u8> {
    [DB_USER_BY_NAME, user_name.as_bytes()].concat()
}

fn transition_key(ts_hash: &Hash256) -> Vec<u8> {
    [DB_TRANSITION, ts_hash.as_bytes()].concat()
}

fn transition_block_key(ts_hash: &Hash256) -> Vec<u8> {
    [DB_TRANSITION_BLOCK, ts_hash.as_bytes()].concat()
}

fn user_transitions_prefix(reg_tx_id: &Hash256) -> Vec<u8> {
    [DB_TRANSITIONS_BY_USER, reg_tx_id.as_bytes()].concat()
}

fn user_transition_key(reg_tx_id: &Hash256, ts_hash: &Hash256) -> Vec<u8> {
    [
        DB_TRANSITIONS_BY_USER,
        reg_tx_id.as_bytes(),
        ts_hash.as_bytes(),
    ]
    .concat()
}

/// Persistent user registry. Owns all `EvoUser` records plus the
/// confirmed-transition store and its block index. Every operation is a
/// single atomic call against the backing store; errors are fatal to block
/// processing, never consensus verdicts.
#[derive(Clone)]
pub struct UsersDb<B: DBInterface> {
    db: B,
}

impl<B: DBInterface> UsersDb<B> {
    #[must_use]
    pub fn new(db: B) -> Self {
        Self { db }
    }

    pub fn write_user(&self, user: &EvoUser) -> Result<(), DBInterfaceErr> {
        self.db.put(user_key(user.reg_tx_id()), user)?;
        self.db.put(name_key(user.user_name()), *user.reg_tx_id())
    }

    /// Removes a user and its name index entry. Only valid while undoing
    /// the registration itself.
    pub fn delete_user(&self, reg_tx_id: &Hash256) -> Result<(), DBInterfaceErr> {
        let user: Option<EvoUser> = self.db.get(user_key(reg_tx_id))?;
        let Some(user) = user else {
            return Ok(());
        };

        self.db.delete(user_key(reg_tx_id))?;
        self.db.delete(name_key(user.user_name()))
    }

    pub fn get_user(&self, reg_tx_id: &Hash256) -> Result<Option<EvoUser>, DBInterfaceErr> {
        self.db.get(user_key(reg_tx_id))
    }

    pub fn get_user_id_by_name(
        &self,
        user_name: &str,
    ) -> Result<Option<Hash256>, DBInterfaceErr> {
        self.db.get(name_key(user_name))
    }

    pub fn user_exists(&self, reg_tx_id: &Hash256) -> Result<bool, DBInterfaceErr> {
        self.db.exists(user_key(reg_tx_id))
    }

    pub fn user_name_exists(&self, user_name: &str) -> Result<bool, DBInterfaceErr> {
        self.db.exists(name_key(user_name))
    }

    pub fn write_transition(&self, ts: &Transition) -> Result<(), DBInterfaceErr> {
        let ts_hash = ts.hash();
        self.db.put(transition_key(&ts_hash), ts)?;
        self.db
            .put(user_transition_key(&ts.hash_reg_tx, &ts_hash), ())
    }

    pub fn delete_transition(&self, ts_hash: &Hash256) -> Result<(), DBInterfaceErr> {
        let ts: Option<Transition> = self.db.get(transition_key(ts_hash))?;
        let Some(ts) = ts else {
            return Ok(());
        };

        self.db.delete(transition_key(ts_hash))?;
        self.db
            .delete(user_transition_key(&ts.hash_reg_tx, ts_hash))
    }

    pub fn get_transition(&self, ts_hash: &Hash256) -> Result<Option<Transition>, DBInterfaceErr> {
        self.db.get(transition_key(ts_hash))
    }

    pub fn write_transition_block_hash(
        &self,
        ts_hash: &Hash256,
        block_hash: &Hash256,
    ) -> Result<(), DBInterfaceErr> {
        self.db.put(transition_block_key(ts_hash), *block_hash)
    }

    pub fn delete_transition_block_hash(&self, ts_hash: &Hash256) -> Result<(), DBInterfaceErr> {
        self.db.delete(transition_block_key(ts_hash))
    }

    pub fn get_transition_block_hash(
        &self,
        ts_hash: &Hash256,
    ) -> Result<Option<Hash256>, DBInterfaceErr> {
        self.db.get(transition_block_key(ts_hash))
    }

    /// Confirmed transitions of a user, at most `limit`, in stable
    /// (hash-ordered) iteration order
    pub fn list_transitions_for_user(
        &self,
        reg_tx_id: &Hash256,
        limit: usize,
    ) -> Result<Vec<Transition>, DBInterfaceErr> {
        let prefix = user_transitions_prefix(reg_tx_id);
        let mut iter = self
            .db
            .prefix_iterator::<()>(prefix.clone(), IteratorDirection::Forward);

        let mut out = Vec::new();
        while let Some((key, _)) = iter.next() {
            if out.len() >= limit {
                break;
            }
            let mut ts_hash = Hash256::zero();
            ts_hash.0.copy_from_slice(&key[prefix.len()..]);
            if let Some(ts) = self.get_transition(&ts_hash)? {
                out.push(ts);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MemoryBackend;
    use crate::primitives::{KeyId, TransitionAction};

    fn db() -> UsersDb<MemoryBackend> {
        UsersDb::new(MemoryBackend::new())
    }

    fn sample_user(name: &str) -> EvoUser {
        EvoUser::new(
            Hash256::hash_from_slice(name, "test"),
            name.to_owned(),
            KeyId::random(),
        )
    }

    #[test]
    fn write_read_delete_user() {
        let db = db();
        let user = sample_user("alice");

        db.write_user(&user).unwrap();
        assert_eq!(db.get_user(user.reg_tx_id()).unwrap(), Some(user.clone()));
        assert!(db.user_exists(user.reg_tx_id()).unwrap());
        assert!(db.user_name_exists("alice").unwrap());
        assert_eq!(
            db.get_user_id_by_name("alice").unwrap(),
            Some(*user.reg_tx_id())
        );

        db.delete_user(user.reg_tx_id()).unwrap();
        assert!(!db.user_exists(user.reg_tx_id()).unwrap());
        assert!(!db.user_name_exists("alice").unwrap());
    }

    #[test]
    fn transition_store_and_block_index() {
        let db = db();
        let user_id = Hash256::hash_from_slice("user", "test");
        let ts = Transition::new(TransitionAction::CloseAccount, 1000, user_id);
        let ts_hash = ts.hash();
        let block_hash = Hash256::hash_from_slice("block", "test");

        db.write_transition(&ts).unwrap();
        db.write_transition_block_hash(&ts_hash, &block_hash).unwrap();

        assert_eq!(db.get_transition(&ts_hash).unwrap(), Some(ts.clone()));
        assert_eq!(
            db.get_transition_block_hash(&ts_hash).unwrap(),
            Some(block_hash)
        );

        db.delete_transition(&ts_hash).unwrap();
        db.delete_transition_block_hash(&ts_hash).unwrap();
        assert_eq!(db.get_transition(&ts_hash).unwrap(), None);
        assert_eq!(db.get_transition_block_hash(&ts_hash).unwrap(), None);
    }

    #[test]
    fn list_transitions_respects_user_and_limit() {
        let db = db();
        let user_a = Hash256::hash_from_slice("a", "test");
        let user_b = Hash256::hash_from_slice("b", "test");

        for fee in [1000, 1001, 1002] {
            db.write_transition(&Transition::new(
                TransitionAction::CloseAccount,
                fee,
                user_a,
            ))
            .unwrap();
        }
        db.write_transition(&Transition::new(
            TransitionAction::CloseAccount,
            2000,
            user_b,
        ))
        .unwrap();

        assert_eq!(db.list_transitions_for_user(&user_a, 10).unwrap().len(), 3);
        assert_eq!(db.list_transitions_for_user(&user_a, 2).unwrap().len(), 2);
        assert_eq!(db.list_transitions_for_user(&user_b, 10).unwrap().len(), 1);
        let missing = Hash256::hash_from_slice("c", "test");
        assert!(db.list_transitions_for_user(&missing, 10).unwrap().is_empty());
    }
}
