// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::codec::{decode_fixed_u16, encode_fixed_u16};
use crate::consensus::{MAX_SUBTX_DATA_LEN, SUBTX_CURRENT_VERSION};
use crate::evo::{EvoErr, EvoResult, RejectCode};
use crate::primitives::{Hash256, KeyId, SecretKey, Transaction};
use bincode::{Decode, Encode};

const SUBTX_HASH_KEY: &str = "subtx";

pub const SUBTX_ACTION_REGISTER: u8 = 1;
pub const SUBTX_ACTION_TOPUP: u8 = 2;
pub const SUBTX_ACTION_RESET_KEY: u8 = 3;
pub const SUBTX_ACTION_CLOSE_ACCOUNT: u8 = 4;

/// Payload of a subscription transaction, carried in the first output
/// behind `OP_SUBSCRIPTION`. The output's value is the credit amount burnt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubTxData {
    Register {
        version: u16,
        user_name: String,
        pub_key_id: KeyId,
        sig: Vec<u8>,
    },
    Topup {
        version: u16,
        reg_tx_id: Hash256,
    },
    ResetKey {
        version: u16,
        reg_tx_id: Hash256,
        new_pub_key_id: KeyId,
        sig: Vec<u8>,
    },
    CloseAccount {
        version: u16,
        reg_tx_id: Hash256,
        sig: Vec<u8>,
    },
}

impl SubTxData {
    #[must_use]
    pub fn register(user_name: String, pub_key_id: KeyId) -> Self {
        Self::Register {
            version: SUBTX_CURRENT_VERSION,
            user_name,
            pub_key_id,
            sig: vec![],
        }
    }

    #[must_use]
    pub fn topup(reg_tx_id: Hash256) -> Self {
        Self::Topup {
            version: SUBTX_CURRENT_VERSION,
            reg_tx_id,
        }
    }

    #[must_use]
    pub fn reset_key(reg_tx_id: Hash256, new_pub_key_id: KeyId) -> Self {
        Self::ResetKey {
            version: SUBTX_CURRENT_VERSION,
            reg_tx_id,
            new_pub_key_id,
            sig: vec![],
        }
    }

    #[must_use]
    pub fn close_account(reg_tx_id: Hash256) -> Self {
        Self::CloseAccount {
            version: SUBTX_CURRENT_VERSION,
            reg_tx_id,
            sig: vec![],
        }
    }

    #[must_use]
    pub fn discriminant(&self) -> u8 {
        match self {
            Self::Register { .. } => SUBTX_ACTION_REGISTER,
            Self::Topup { .. } => SUBTX_ACTION_TOPUP,
            Self::ResetKey { .. } => SUBTX_ACTION_RESET_KEY,
            Self::CloseAccount { .. } => SUBTX_ACTION_CLOSE_ACCOUNT,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Topup { .. } => "topup",
            Self::ResetKey { .. } => "resetkey",
            Self::CloseAccount { .. } => "close",
        }
    }

    /// The user this payload targets. `None` for registrations, which
    /// create the user they refer to.
    #[must_use]
    pub fn reg_tx_id(&self) -> Option<&Hash256> {
        match self {
            Self::Register { .. } => None,
            Self::Topup { reg_tx_id, .. }
            | Self::ResetKey { reg_tx_id, .. }
            | Self::CloseAccount { reg_tx_id, .. } => Some(reg_tx_id),
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        crate::codec::encode_to_vec(self).unwrap()
    }

    /// Digest signed by the relevant key: the payload serialized with the
    /// signature field empty. Register signs with the declared key,
    /// reset-key and close sign with the user's current key.
    #[must_use]
    pub fn sign_message_digest(&self) -> Hash256 {
        let mut unsigned = self.clone();
        match &mut unsigned {
            Self::Register { sig, .. }
            | Self::ResetKey { sig, .. }
            | Self::CloseAccount { sig, .. } => sig.clear(),
            Self::Topup { .. } => {}
        }
        Hash256::hash_from_slice(unsigned.to_bytes(), SUBTX_HASH_KEY)
    }

    /// Signs the payload, replacing any previous signature. No-op for
    /// topups, which need no authorization.
    pub fn sign(&mut self, key: &SecretKey) {
        let digest = self.sign_message_digest();
        match self {
            Self::Register { sig, .. }
            | Self::ResetKey { sig, .. }
            | Self::CloseAccount { sig, .. } => *sig = key.sign_digest(&digest),
            Self::Topup { .. } => {}
        }
    }

    #[must_use]
    pub fn signature(&self) -> &[u8] {
        match self {
            Self::Register { sig, .. }
            | Self::ResetKey { sig, .. }
            | Self::CloseAccount { sig, .. } => sig,
            Self::Topup { .. } => &[],
        }
    }
}

impl Encode for SubTxData {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&self.discriminant(), encoder)?;
        match self {
            Self::Register {
                version,
                user_name,
                pub_key_id,
                sig,
            } => {
                encode_fixed_u16(*version, encoder)?;
                bincode::Encode::encode(user_name, encoder)?;
                bincode::Encode::encode(pub_key_id, encoder)?;
                bincode::Encode::encode(sig, encoder)?;
            }
            Self::Topup { version, reg_tx_id } => {
                encode_fixed_u16(*version, encoder)?;
                bincode::Encode::encode(reg_tx_id, encoder)?;
            }
            Self::ResetKey {
                version,
                reg_tx_id,
                new_pub_key_id,
                sig,
            } => {
                encode_fixed_u16(*version, encoder)?;
                bincode::Encode::encode(reg_tx_id, encoder)?;
                bincode::Encode::encode(new_pub_key_id, encoder)?;
                bincode::Encode::encode(sig, encoder)?;
            }
            Self::CloseAccount {
                version,
                reg_tx_id,
                sig,
            } => {
                encode_fixed_u16(*version, encoder)?;
                bincode::Encode::encode(reg_tx_id, encoder)?;
                bincode::Encode::encode(sig, encoder)?;
            }
        }
        Ok(())
    }
}

impl Decode for SubTxData {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        let action: u8 = bincode::Decode::decode(decoder)?;
        match action {
            SUBTX_ACTION_REGISTER => Ok(Self::Register {
                version: decode_fixed_u16(decoder)?,
                user_name: bincode::Decode::decode(decoder)?,
                pub_key_id: bincode::Decode::decode(decoder)?,
                sig: bincode::Decode::decode(decoder)?,
            }),
            SUBTX_ACTION_TOPUP => Ok(Self::Topup {
                version: decode_fixed_u16(decoder)?,
                reg_tx_id: bincode::Decode::decode(decoder)?,
            }),
            SUBTX_ACTION_RESET_KEY => Ok(Self::ResetKey {
                version: decode_fixed_u16(decoder)?,
                reg_tx_id: bincode::Decode::decode(decoder)?,
                new_pub_key_id: bincode::Decode::decode(decoder)?,
                sig: bincode::Decode::decode(decoder)?,
            }),
            SUBTX_ACTION_CLOSE_ACCOUNT => Ok(Self::CloseAccount {
                version: decode_fixed_u16(decoder)?,
                reg_tx_id: bincode::Decode::decode(decoder)?,
                sig: bincode::Decode::decode(decoder)?,
            }),
            other => Err(bincode::error::DecodeError::OtherString(format!(
                "unknown or invalid subtx action {other}"
            ))),
        }
    }
}

/// Validates the envelope shape of a subscription transaction and extracts
/// its payload. The first output must be an `OP_SUBSCRIPTION` data push,
/// every other output must be a standard payment script.
pub fn get_sub_tx_data(tx: &Transaction) -> EvoResult<SubTxData> {
    if !tx.is_sub_tx() {
        return Err(EvoErr::dos(10, RejectCode::Invalid, "bad-subtx-notsubtx"));
    }

    let Some(sub_out) = tx.outputs.first() else {
        return Err(EvoErr::dos(10, RejectCode::Invalid, "bad-subtx-opcode"));
    };

    let Some(data) = sub_out.script_pubkey.subscription_data() else {
        return Err(EvoErr::dos(10, RejectCode::Invalid, "bad-subtx-opcode"));
    };

    if data.len() > MAX_SUBTX_DATA_LEN {
        return Err(EvoErr::dos(10, RejectCode::Invalid, "bad-subtx-datalen"));
    }

    for out in &tx.outputs[1..] {
        if !out.script_pubkey.is_pay_to_pub_key_hash() {
            return Err(EvoErr::dos(10, RejectCode::Invalid, "bad-subtx-badchange"));
        }
    }

    crate::codec::decode_exact::<SubTxData>(&data)
        .map_err(|_| EvoErr::dos(10, RejectCode::Invalid, "bad-subtx-data"))
}

/// Builds a subscription transaction carrying `data` with `value` burnt
/// credits in the subscription output
#[must_use]
pub fn build_sub_tx(data: &SubTxData, value: crate::consensus::Money) -> Transaction {
    use crate::primitives::{Script, TxOutput, TRANSACTION_NORMAL};

    let mut tx = Transaction::new(TRANSACTION_NORMAL);
    tx.outputs.push(TxOutput {
        value,
        script_pubkey: Script::subscription(&data.to_bytes()),
    });
    tx
}
