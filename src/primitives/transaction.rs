// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::Money;
use crate::primitives::{Hash256, Script};
use bincode::{Decode, Encode};

/// Transaction version from which the `tx_type` field and `extra_payload`
/// are serialized
pub const TX_VERSION_SPECIAL: u16 = 3;

/// Plain payment transaction
pub const TRANSACTION_NORMAL: u16 = 0;

/// Provider (service node) registration
pub const TRANSACTION_PROVIDER_REGISTER: u16 = 1;

const TX_HASH_KEY: &str = "tx";
const INPUTS_HASH_KEY: &str = "txinputs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode)]
pub struct OutPoint {
    pub hash: Hash256,
    pub index: u32,
}

impl OutPoint {
    #[must_use]
    pub fn new(hash: Hash256, index: u32) -> Self {
        Self { hash, index }
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        crate::codec::encode_to_vec(self).unwrap()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct TxInput {
    pub prevout: OutPoint,
    pub script_sig: Script,
    pub sequence: u32,
}

impl TxInput {
    #[must_use]
    pub fn new(prevout: OutPoint) -> Self {
        Self {
            prevout,
            script_sig: Script::default(),
            sequence: 0xffff_ffff,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct TxOutput {
    pub value: Money,
    pub script_pubkey: Script,
}

/// Base transaction envelope extended with a type tag and an opaque extra
/// payload for special transactions. The base-chain engine owns full
/// script execution and UTXO bookkeeping; this subsystem only inspects
/// outputs, outpoints and the payload.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Transaction {
    pub version: u16,
    pub tx_type: u16,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub extra_payload: Vec<u8>,
}

impl Transaction {
    #[must_use]
    pub fn new(tx_type: u16) -> Self {
        Self {
            version: TX_VERSION_SPECIAL,
            tx_type,
            inputs: vec![],
            outputs: vec![],
            extra_payload: vec![],
        }
    }

    /// Serialize to bytes
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        crate::codec::encode_to_vec(self).unwrap()
    }

    /// Transaction id. Not cached, hashes the full serialization.
    #[must_use]
    pub fn hash(&self) -> Hash256 {
        Hash256::hash_from_slice(self.to_bytes(), TX_HASH_KEY)
    }

    #[must_use]
    pub fn is_special(&self) -> bool {
        self.version >= TX_VERSION_SPECIAL && self.tx_type != TRANSACTION_NORMAL
    }

    /// Whether any output carries a subscription envelope
    #[must_use]
    pub fn is_sub_tx(&self) -> bool {
        self.outputs.iter().any(|out| out.script_pubkey.is_subscription())
    }

    /// Commitment over this transaction's inputs used to bind special
    /// payloads to their enclosing transaction (replay protection). Hash of
    /// the concatenation of all input outpoints in order.
    #[must_use]
    pub fn calc_inputs_hash(&self) -> Hash256 {
        let mut buf = Vec::with_capacity(self.inputs.len() * 36);
        for input in &self.inputs {
            buf.extend_from_slice(&input.prevout.to_bytes());
        }
        Hash256::hash_from_slice(&buf, INPUTS_HASH_KEY)
    }
}
