// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::Money;
use crate::primitives::{verify_digest_with_key_id, Hash256, KeyId, SigErr};
use bincode::{Decode, Encode};

/// Per-account state of an evo user, keyed by the hash of the registering
/// subscription transaction.
///
/// Credits are tracked as a monotonically growing topup sum and a spend sum;
/// the balance is their difference. The key history is a stack: the top is
/// the key transitions must currently be signed with, reset-key pushes and
/// undo pops.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct EvoUser {
    reg_tx_id: Hash256,
    user_name: String,
    pub_key_ids: Vec<KeyId>,
    hash_last_transition: Hash256,
    topup_credits: Money,
    spent_credits: Money,
    closed: bool,
}

impl EvoUser {
    #[must_use]
    pub fn new(reg_tx_id: Hash256, user_name: String, pub_key_id: KeyId) -> Self {
        Self {
            reg_tx_id,
            user_name,
            pub_key_ids: vec![pub_key_id],
            hash_last_transition: Hash256::zero(),
            topup_credits: 0,
            spent_credits: 0,
            closed: false,
        }
    }

    #[must_use]
    pub fn reg_tx_id(&self) -> &Hash256 {
        &self.reg_tx_id
    }

    #[must_use]
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    #[must_use]
    pub fn topup_credits(&self) -> Money {
        self.topup_credits
    }

    #[must_use]
    pub fn spent_credits(&self) -> Money {
        self.spent_credits
    }

    #[must_use]
    pub fn credit_balance(&self) -> Money {
        self.topup_credits - self.spent_credits
    }

    pub fn add_topup(&mut self, amount: Money) {
        self.topup_credits += amount;
    }

    pub fn add_spend(&mut self, amount: Money) {
        self.spent_credits += amount;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn set_closed(&mut self, closed: bool) {
        self.closed = closed;
    }

    /// The key the user currently signs with. The stack is never empty.
    #[must_use]
    pub fn cur_pub_key_id(&self) -> &KeyId {
        self.pub_key_ids.last().expect("empty key stack")
    }

    #[must_use]
    pub fn pub_key_ids(&self) -> &[KeyId] {
        &self.pub_key_ids
    }

    pub fn push_pub_key_id(&mut self, key_id: KeyId) {
        self.pub_key_ids.push(key_id);
    }

    /// Pops the current key. Returns `None` when only the registration key
    /// remains; the stack must stay non-empty.
    pub fn pop_pub_key_id(&mut self) -> Option<KeyId> {
        if self.pub_key_ids.len() <= 1 {
            return None;
        }
        self.pub_key_ids.pop()
    }

    #[must_use]
    pub fn hash_last_transition(&self) -> &Hash256 {
        &self.hash_last_transition
    }

    pub fn set_hash_last_transition(&mut self, hash: Hash256) {
        self.hash_last_transition = hash;
    }

    /// Verifies a signature over `digest` under the user's current key
    pub fn verify_sig(&self, digest: &Hash256, sig: &[u8]) -> Result<(), SigErr> {
        verify_digest_with_key_id(digest, self.cur_pub_key_id(), sig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::SecretKey;

    fn sample_user() -> EvoUser {
        EvoUser::new(
            Hash256::hash_from_slice("regtx", "test"),
            "alice".to_owned(),
            KeyId::random(),
        )
    }

    #[test]
    fn balance_is_topups_minus_spends() {
        let mut user = sample_user();
        user.add_topup(100_000);
        user.add_spend(1000);
        user.add_spend(2000);
        assert_eq!(user.credit_balance(), 97_000);
        assert_eq!(user.topup_credits(), 100_000);
        assert_eq!(user.spent_credits(), 3000);

        user.add_spend(-3000);
        assert_eq!(user.spent_credits(), 0);
        assert_eq!(user.credit_balance(), 100_000);
    }

    #[test]
    fn key_stack_push_pop() {
        let mut user = sample_user();
        let reg_key = *user.cur_pub_key_id();
        let k2 = KeyId::random();

        user.push_pub_key_id(k2);
        assert_eq!(user.cur_pub_key_id(), &k2);
        assert_eq!(user.pub_key_ids().len(), 2);

        assert_eq!(user.pop_pub_key_id(), Some(k2));
        assert_eq!(user.cur_pub_key_id(), &reg_key);

        // registration key can never be popped
        assert_eq!(user.pop_pub_key_id(), None);
        assert_eq!(user.pub_key_ids().len(), 1);
    }

    #[test]
    fn verify_sig_uses_current_key() {
        let k1 = SecretKey::random();
        let k2 = SecretKey::random();
        let digest = Hash256::hash_from_slice("msg", "test");

        let mut user = EvoUser::new(
            Hash256::zero(),
            "bob".to_owned(),
            k1.public_key().to_key_id(),
        );
        assert!(user.verify_sig(&digest, &k1.sign_digest(&digest)).is_ok());

        user.push_pub_key_id(k2.public_key().to_key_id());
        assert!(user.verify_sig(&digest, &k1.sign_digest(&digest)).is_err());
        assert!(user.verify_sig(&digest, &k2.sign_digest(&digest)).is_ok());
    }

    #[test]
    fn user_codec_roundtrip() {
        let mut user = sample_user();
        user.add_topup(5000);
        user.push_pub_key_id(KeyId::random());
        user.set_hash_last_transition(Hash256::hash_from_slice("ts", "test"));
        user.set_closed(true);

        let decoded: EvoUser =
            crate::codec::decode(&crate::codec::encode_to_vec(&user).unwrap()).unwrap();
        assert_eq!(decoded, user);
    }
}
