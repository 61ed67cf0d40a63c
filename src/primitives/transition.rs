// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::codec::{decode_fixed_i64, decode_fixed_u32, encode_fixed_i64, encode_fixed_u32};
use crate::consensus::Money;
use crate::primitives::{Hash256, KeyId};
use bincode::{Decode, Encode};
use std::fmt;

const TS_HASH_KEY: &str = "ts";

pub const TS_ACTION_UPDATE_DATA: u8 = 1;
pub const TS_ACTION_RESET_KEY: u8 = 2;
pub const TS_ACTION_CLOSE_ACCOUNT: u8 = 3;

/// Action performed by a transition, with the action-specific payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionAction {
    UpdateData { hash_data_merkle_root: Hash256 },
    ResetKey { new_pub_key_id: KeyId },
    CloseAccount,
}

impl TransitionAction {
    #[must_use]
    pub fn discriminant(&self) -> u8 {
        match self {
            Self::UpdateData { .. } => TS_ACTION_UPDATE_DATA,
            Self::ResetKey { .. } => TS_ACTION_RESET_KEY,
            Self::CloseAccount => TS_ACTION_CLOSE_ACCOUNT,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateData { .. } => "update",
            Self::ResetKey { .. } => "resetkey",
            Self::CloseAccount => "close",
        }
    }
}

/// An off-chain signed state update, chained per user through
/// `hash_prev_transition` and batched into blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub version: u32,
    pub action: TransitionAction,
    pub fee: Money,
    pub hash_reg_tx: Hash256,
    pub hash_prev_transition: Hash256,
    pub user_sig: Vec<u8>,
    /// Carried and hashed for forward compatibility. Not verified until the
    /// quorum infrastructure lands.
    pub quorum_sigs: Vec<Vec<u8>>,
}

impl Transition {
    #[must_use]
    pub fn new(action: TransitionAction, fee: Money, hash_reg_tx: Hash256) -> Self {
        Self {
            version: crate::consensus::TS_CURRENT_VERSION,
            action,
            fee,
            hash_reg_tx,
            hash_prev_transition: Hash256::zero(),
            user_sig: vec![],
            quorum_sigs: vec![],
        }
    }

    /// Serialize to bytes
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        crate::codec::encode_to_vec(self).unwrap()
    }

    /// Transition hash. Warning, this is not cached.
    #[must_use]
    pub fn hash(&self) -> Hash256 {
        Hash256::hash_from_slice(self.to_bytes(), TS_HASH_KEY)
    }

    #[must_use]
    pub fn serialized_size(&self) -> usize {
        self.to_bytes().len()
    }

    /// Digest the user signs: the transition serialized with both signature
    /// fields empty. Invariant under mutation of either signature field.
    #[must_use]
    pub fn sign_message_digest(&self) -> Hash256 {
        let mut unsigned = self.clone();
        unsigned.user_sig = vec![];
        unsigned.quorum_sigs = vec![];
        unsigned.hash()
    }

    /// Signs the transition with the given secret key, replacing any
    /// previous user signature
    pub fn sign(&mut self, key: &crate::primitives::SecretKey) {
        self.user_sig = key.sign_digest(&self.sign_message_digest());
    }
}

impl Encode for Transition {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        encode_fixed_u32(self.version, encoder)?;
        bincode::Encode::encode(&self.action.discriminant(), encoder)?;
        encode_fixed_i64(self.fee, encoder)?;
        bincode::Encode::encode(&self.hash_reg_tx, encoder)?;
        bincode::Encode::encode(&self.hash_prev_transition, encoder)?;
        match &self.action {
            TransitionAction::UpdateData {
                hash_data_merkle_root,
            } => {
                bincode::Encode::encode(hash_data_merkle_root, encoder)?;
            }
            TransitionAction::ResetKey { new_pub_key_id } => {
                bincode::Encode::encode(new_pub_key_id, encoder)?;
            }
            TransitionAction::CloseAccount => {}
        }
        bincode::Encode::encode(&self.user_sig, encoder)?;
        bincode::Encode::encode(&self.quorum_sigs, encoder)?;
        Ok(())
    }
}

impl Decode for Transition {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        let version = decode_fixed_u32(decoder)?;
        let action_byte: u8 = bincode::Decode::decode(decoder)?;
        let fee = decode_fixed_i64(decoder)?;
        let hash_reg_tx = bincode::Decode::decode(decoder)?;
        let hash_prev_transition = bincode::Decode::decode(decoder)?;

        // An unknown action byte fails deserialization outright. Skipping
        // it would break hash identity across peers.
        let action = match action_byte {
            TS_ACTION_UPDATE_DATA => TransitionAction::UpdateData {
                hash_data_merkle_root: bincode::Decode::decode(decoder)?,
            },
            TS_ACTION_RESET_KEY => TransitionAction::ResetKey {
                new_pub_key_id: bincode::Decode::decode(decoder)?,
            },
            TS_ACTION_CLOSE_ACCOUNT => TransitionAction::CloseAccount,
            other => {
                return Err(bincode::error::DecodeError::OtherString(format!(
                    "invalid transition action {other}"
                )))
            }
        };

        let user_sig = bincode::Decode::decode(decoder)?;
        let quorum_sigs = bincode::Decode::decode(decoder)?;

        Ok(Self {
            version,
            action,
            fee,
            hash_reg_tx,
            hash_prev_transition,
            user_sig,
            quorum_sigs,
        })
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transition(hash={}, ver={:#x}, action={}, fee={}, reg_tx={}, prev={})",
            &self.hash().to_hex()[..10],
            self.version,
            self.action.name(),
            self.fee,
            self.hash_reg_tx.to_hex(),
            self.hash_prev_transition.to_hex(),
        )
    }
}
