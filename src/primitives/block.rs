// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::{Hash256, Transaction, Transition};
use bincode::{Decode, Encode};

const BLOCK_HASH_KEY: &str = "block";

/// The slice of a block this subsystem consumes: the transaction list and
/// the batched transitions. Header fields beyond the previous-block link are
/// owned by the base-chain engine.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Block {
    pub version: u32,
    pub hash_prev_block: Hash256,
    pub txs: Vec<Transaction>,
    pub transitions: Vec<Transition>,
}

impl Block {
    #[must_use]
    pub fn new(hash_prev_block: Hash256) -> Self {
        Self {
            version: 1,
            hash_prev_block,
            txs: vec![],
            transitions: vec![],
        }
    }

    /// Serialize to bytes
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        crate::codec::encode_to_vec(self).unwrap()
    }

    /// Block hash. Warning, this is not cached.
    #[must_use]
    pub fn hash(&self) -> Hash256 {
        Hash256::hash_from_slice(self.to_bytes(), BLOCK_HASH_KEY)
    }

    #[must_use]
    pub fn serialized_size(&self) -> u64 {
        self.to_bytes().len() as u64
    }
}
