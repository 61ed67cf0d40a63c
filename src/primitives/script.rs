// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::KeyId;
use bincode::{Decode, Encode};
use std::fmt;

pub const OP_DUP: u8 = 0x76;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;

/// Output prefix marking a subscription payload. The output value of such an
/// output is burnt and credited to the referenced user account.
pub const OP_SUBSCRIPTION: u8 = 0xc1;

const P2PKH_LEN: usize = 25;

#[derive(Clone, PartialEq, Eq, Encode, Decode, Default)]
pub struct Script(pub Vec<u8>);

impl Script {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Standard pay-to-pubkey-hash locking script for the given key id
    #[must_use]
    pub fn pay_to_pub_key_hash(key_id: &KeyId) -> Self {
        let mut bytes = Vec::with_capacity(P2PKH_LEN);
        bytes.push(OP_DUP);
        bytes.push(OP_HASH160);
        bytes.push(20);
        bytes.extend_from_slice(&key_id.0);
        bytes.push(OP_EQUALVERIFY);
        bytes.push(OP_CHECKSIG);
        Self(bytes)
    }

    /// Subscription envelope: `OP_SUBSCRIPTION` followed by a single data push
    #[must_use]
    pub fn subscription(payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(payload.len() + 4);
        bytes.push(OP_SUBSCRIPTION);
        push_data(&mut bytes, payload);
        Self(bytes)
    }

    #[must_use]
    pub fn is_pay_to_pub_key_hash(&self) -> bool {
        let s = &self.0;
        s.len() == P2PKH_LEN
            && s[0] == OP_DUP
            && s[1] == OP_HASH160
            && s[2] == 20
            && s[23] == OP_EQUALVERIFY
            && s[24] == OP_CHECKSIG
    }

    /// The key id a P2PKH script pays to
    #[must_use]
    pub fn extract_destination(&self) -> Option<KeyId> {
        if !self.is_pay_to_pub_key_hash() {
            return None;
        }
        let mut key_id = KeyId::zero();
        key_id.0.copy_from_slice(&self.0[3..23]);
        Some(key_id)
    }

    #[must_use]
    pub fn is_subscription(&self) -> bool {
        !self.0.is_empty() && self.0[0] == OP_SUBSCRIPTION
    }

    /// The payload of a subscription script, if the script is a well-formed
    /// `OP_SUBSCRIPTION` envelope with exactly one data push
    #[must_use]
    pub fn subscription_data(&self) -> Option<Vec<u8>> {
        if !self.is_subscription() || self.0.len() < 2 {
            return None;
        }

        let (data, rest) = read_push(&self.0[1..])?;
        if !rest.is_empty() {
            return None;
        }
        Some(data)
    }
}

fn push_data(out: &mut Vec<u8>, data: &[u8]) {
    match data.len() {
        n if n < OP_PUSHDATA1 as usize => {
            out.push(n as u8);
        }
        n if n <= u8::MAX as usize => {
            out.push(OP_PUSHDATA1);
            out.push(n as u8);
        }
        n => {
            debug_assert!(n <= u16::MAX as usize);
            out.push(OP_PUSHDATA2);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
    }
    out.extend_from_slice(data);
}

fn read_push(bytes: &[u8]) -> Option<(Vec<u8>, &[u8])> {
    let (len, rest) = match bytes.first()? {
        &n if n < OP_PUSHDATA1 => (n as usize, &bytes[1..]),
        &OP_PUSHDATA1 => {
            if bytes.len() < 2 {
                return None;
            }
            (bytes[1] as usize, &bytes[2..])
        }
        &OP_PUSHDATA2 => {
            if bytes.len() < 3 {
                return None;
            }
            (u16::from_le_bytes([bytes[1], bytes[2]]) as usize, &bytes[3..])
        }
        _ => return None,
    };

    if rest.len() < len {
        return None;
    }
    Some((rest[..len].to_vec(), &rest[len..]))
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Script").field(&hex::encode(&self.0)).finish()
    }
}
