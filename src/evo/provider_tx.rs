// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::codec::{decode_fixed_u16, decode_fixed_u32, encode_fixed_u16, encode_fixed_u32};
use crate::consensus::{
    money_check, NetworkId, Sporks, MIN_EVO_PROTO_VERSION, PROTOCOL_VERSION,
    PROTX_CURRENT_VERSION, PROVIDER_COLLATERAL,
};
use crate::evo::deterministic::DmnList;
use crate::evo::{EvoErr, EvoResult, RejectCode};
use crate::primitives::{
    verify_digest_with_key_id, Hash256, KeyId, NetAddress, Script, SecretKey, Transaction,
};
use bincode::{Decode, Encode};
use std::fmt;

const PROTX_HASH_KEY: &str = "protx";

/// Provider registration payload binding a collateralized stake to a
/// service node identity
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderRegTx {
    pub version: u16,
    pub protocol_version: u16,
    pub collateral_index: u32,
    pub addr: NetAddress,
    pub key_id_operator: KeyId,
    pub key_id_owner: KeyId,
    pub script_payout: Script,
    /// Replay protection: commits to the enclosing transaction's inputs
    pub inputs_hash: Hash256,
    pub sig: Vec<u8>,
}

impl ProviderRegTx {
    #[must_use]
    pub fn new(
        collateral_index: u32,
        addr: NetAddress,
        key_id_operator: KeyId,
        key_id_owner: KeyId,
        script_payout: Script,
    ) -> Self {
        Self {
            version: PROTX_CURRENT_VERSION,
            protocol_version: PROTOCOL_VERSION,
            collateral_index,
            addr,
            key_id_operator,
            key_id_owner,
            script_payout,
            inputs_hash: Hash256::zero(),
            sig: vec![],
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        crate::codec::encode_to_vec(self).unwrap()
    }

    #[must_use]
    pub fn hash(&self) -> Hash256 {
        Hash256::hash_from_slice(self.to_bytes(), PROTX_HASH_KEY)
    }

    /// Digest the owner key signs: the payload serialized with the
    /// signature field empty
    #[must_use]
    pub fn sign_message_digest(&self) -> Hash256 {
        let mut unsigned = self.clone();
        unsigned.sig = vec![];
        unsigned.hash()
    }

    /// Signs the payload with the owner key, replacing any previous
    /// signature
    pub fn sign(&mut self, key: &SecretKey) {
        self.sig = key.sign_digest(&self.sign_message_digest());
    }
}

impl Encode for ProviderRegTx {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        encode_fixed_u16(self.version, encoder)?;
        encode_fixed_u16(self.protocol_version, encoder)?;
        encode_fixed_u32(self.collateral_index, encoder)?;
        bincode::Encode::encode(&self.addr, encoder)?;
        bincode::Encode::encode(&self.key_id_operator, encoder)?;
        bincode::Encode::encode(&self.key_id_owner, encoder)?;
        bincode::Encode::encode(&self.script_payout, encoder)?;
        bincode::Encode::encode(&self.inputs_hash, encoder)?;
        bincode::Encode::encode(&self.sig, encoder)?;
        Ok(())
    }
}

impl Decode for ProviderRegTx {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        Ok(Self {
            version: decode_fixed_u16(decoder)?,
            protocol_version: decode_fixed_u16(decoder)?,
            collateral_index: decode_fixed_u32(decoder)?,
            addr: bincode::Decode::decode(decoder)?,
            key_id_operator: bincode::Decode::decode(decoder)?,
            key_id_owner: bincode::Decode::decode(decoder)?,
            script_payout: bincode::Decode::decode(decoder)?,
            inputs_hash: bincode::Decode::decode(decoder)?,
            sig: bincode::Decode::decode(decoder)?,
        })
    }
}

impl fmt::Debug for ProviderRegTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegTx")
            .field("version", &self.version)
            .field("protocol_version", &self.protocol_version)
            .field("collateral_index", &self.collateral_index)
            .field("addr", &self.addr)
            .field("key_id_operator", &self.key_id_operator)
            .field("key_id_owner", &self.key_id_owner)
            .field("inputs_hash", &self.inputs_hash)
            .finish()
    }
}

/// Extracts and decodes the provider registration payload of a special
/// transaction
pub fn get_pro_reg_tx_payload(tx: &Transaction) -> EvoResult<ProviderRegTx> {
    crate::codec::decode_exact::<ProviderRegTx>(&tx.extra_payload)
        .map_err(|_| EvoErr::dos(100, RejectCode::Invalid, "bad-tx-payload"))
}

/// Admission checks for a provider registration at a given height.
/// `list` is the deterministic list at that height; pass `None` for
/// context-free checks only (e.g. when the chain state is unavailable).
pub fn check_pro_reg_tx(
    tx: &Transaction,
    list: Option<&DmnList>,
    height: u64,
    sporks: &Sporks,
    network: NetworkId,
) -> EvoResult<ProviderRegTx> {
    let ptx = get_pro_reg_tx_payload(tx)?;

    if ptx.version != PROTX_CURRENT_VERSION {
        return Err(EvoErr::dos(100, RejectCode::Invalid, "bad-protx-version"));
    }
    if ptx.protocol_version < MIN_EVO_PROTO_VERSION || ptx.protocol_version > PROTOCOL_VERSION {
        return Err(EvoErr::dos(
            10,
            RejectCode::Invalid,
            "bad-protx-proto-version",
        ));
    }

    if ptx.collateral_index as usize >= tx.outputs.len() {
        return Err(EvoErr::dos(
            10,
            RejectCode::Invalid,
            "bad-protx-collateral-index",
        ));
    }
    let collateral = &tx.outputs[ptx.collateral_index as usize];
    if !money_check(collateral.value) || collateral.value != PROVIDER_COLLATERAL {
        return Err(EvoErr::dos(10, RejectCode::Invalid, "bad-protx-collateral"));
    }

    if !ptx.addr.is_valid() || (!network.is_regtest() && !ptx.addr.is_routable()) {
        return Err(EvoErr::dos(10, RejectCode::Invalid, "bad-protx-addr"));
    }

    if ptx.key_id_operator.is_zero() {
        return Err(EvoErr::dos(
            10,
            RejectCode::Invalid,
            "bad-protx-key-operator",
        ));
    }
    if ptx.key_id_owner.is_zero() {
        return Err(EvoErr::dos(10, RejectCode::Invalid, "bad-protx-key-owner"));
    }

    // P2SH payouts may come later; restricted while transitioning from the
    // legacy node list
    if !ptx.script_payout.is_pay_to_pub_key_hash() {
        return Err(EvoErr::dos(10, RejectCode::Invalid, "bad-protx-payee"));
    }
    let payout_dest = ptx
        .script_payout
        .extract_destination()
        .ok_or_else(|| EvoErr::dos(10, RejectCode::Invalid, "bad-protx-payee"))?;

    // don't allow reuse of keys for different purposes
    if payout_dest == ptx.key_id_operator || payout_dest == ptx.key_id_owner {
        return Err(EvoErr::dos(10, RejectCode::Invalid, "bad-protx-payee"));
    }

    if collateral.script_pubkey != ptx.script_payout {
        return Err(EvoErr::dos(
            10,
            RejectCode::Invalid,
            "bad-protx-payee-collateral",
        ));
    }

    if tx.calc_inputs_hash() != ptx.inputs_hash {
        return Err(EvoErr::dos(
            100,
            RejectCode::Invalid,
            "bad-protx-inputs-hash",
        ));
    }

    if let Some(list) = list {
        if list.contains_addr(&ptx.addr) {
            return Err(EvoErr::dos(10, RejectCode::Duplicate, "bad-protx-dup-addr"));
        }
        if list.contains_key_id(&ptx.key_id_operator) || list.contains_key_id(&ptx.key_id_owner) {
            return Err(EvoErr::dos(10, RejectCode::Duplicate, "bad-protx-dup-key"));
        }

        if sporks.is_deterministic_nodes_active(height) {
            if ptx.key_id_operator == ptx.key_id_owner {
                return Err(EvoErr::dos(10, RejectCode::Duplicate, "bad-protx-dup-key"));
            }
        } else if ptx.key_id_operator != ptx.key_id_owner {
            return Err(EvoErr::dos(
                10,
                RejectCode::Invalid,
                "bad-protx-owner-key-not-same",
            ));
        }
    }

    if verify_digest_with_key_id(&ptx.sign_message_digest(), &ptx.key_id_owner, &ptx.sig).is_err() {
        return Err(EvoErr::dos(100, RejectCode::Invalid, "bad-protx-sig"));
    }

    Ok(ptx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evo::test_utils::build_pro_reg_tx;
    use crate::primitives::{OutPoint, TxInput, TRANSACTION_PROVIDER_REGISTER};

    fn check(tx: &Transaction) -> EvoResult<ProviderRegTx> {
        check_pro_reg_tx(
            tx,
            Some(&DmnList::default()),
            100,
            &Sporks::new(0),
            NetworkId::Mainnet,
        )
    }

    #[test]
    fn valid_registration_passes() {
        let owner = SecretKey::random();
        let tx = build_pro_reg_tx("8.8.8.8:9999", KeyId::random(), &owner);
        assert!(check(&tx).is_ok());
    }

    #[test]
    fn codec_roundtrip() {
        let owner = SecretKey::random();
        let tx = build_pro_reg_tx("8.8.8.8:9999", KeyId::random(), &owner);
        let ptx = get_pro_reg_tx_payload(&tx).unwrap();
        let decoded: ProviderRegTx = crate::codec::decode(&ptx.to_bytes()).unwrap();
        assert_eq!(decoded, ptx);
    }

    #[test]
    fn garbage_payload_scores_100() {
        let mut tx = Transaction::new(TRANSACTION_PROVIDER_REGISTER);
        tx.extra_payload = vec![0xff; 3];
        let err = check(&tx).unwrap_err();
        assert_eq!(err.what(), Some("bad-tx-payload"));
        match err {
            EvoErr::Rejected(r) => assert_eq!(r.score, 100),
            EvoErr::Internal(_) => panic!("expected rejection"),
        }
    }

    #[test]
    fn wrong_collateral_value_rejected() {
        let owner = SecretKey::random();
        let mut tx = build_pro_reg_tx("8.8.8.8:9999", KeyId::random(), &owner);
        tx.outputs[0].value = PROVIDER_COLLATERAL - 1;
        assert_eq!(check(&tx).unwrap_err().what(), Some("bad-protx-collateral"));
    }

    #[test]
    fn collateral_index_out_of_bounds_rejected() {
        let owner = SecretKey::random();
        let tx = build_pro_reg_tx("8.8.8.8:9999", KeyId::random(), &owner);
        let mut ptx = get_pro_reg_tx_payload(&tx).unwrap();
        ptx.collateral_index = 5;
        ptx.sign(&owner);
        let mut tx = tx;
        tx.extra_payload = ptx.to_bytes();
        assert_eq!(
            check(&tx).unwrap_err().what(),
            Some("bad-protx-collateral-index")
        );
    }

    #[test]
    fn unroutable_addr_rejected_outside_regtest() {
        let owner = SecretKey::random();
        let tx = build_pro_reg_tx("127.0.0.1:9999", KeyId::random(), &owner);
        assert_eq!(check(&tx).unwrap_err().what(), Some("bad-protx-addr"));

        // relaxed on regtest
        assert!(check_pro_reg_tx(
            &tx,
            Some(&DmnList::default()),
            100,
            &Sporks::new(0),
            NetworkId::Regtest,
        )
        .is_ok());
    }

    #[test]
    fn inputs_hash_mismatch_scores_100() {
        let owner = SecretKey::random();
        let mut tx = build_pro_reg_tx("8.8.8.8:9999", KeyId::random(), &owner);
        // mutating the inputs invalidates the commitment
        tx.inputs.push(TxInput::new(OutPoint::new(Hash256::zero(), 1)));
        let err = check(&tx).unwrap_err();
        assert_eq!(err.what(), Some("bad-protx-inputs-hash"));
    }

    #[test]
    fn signature_must_be_owner_key() {
        let owner = SecretKey::random();
        let stranger = SecretKey::random();
        let tx = build_pro_reg_tx("8.8.8.8:9999", KeyId::random(), &owner);
        let mut ptx = get_pro_reg_tx_payload(&tx).unwrap();
        ptx.sign(&stranger);
        let mut tx = tx;
        tx.extra_payload = ptx.to_bytes();
        assert_eq!(check(&tx).unwrap_err().what(), Some("bad-protx-sig"));
    }

    #[test]
    fn operator_owner_equality_gated_by_spork() {
        let owner = SecretKey::random();
        let owner_id = owner.public_key().to_key_id();

        // distinct keys required before activation
        let distinct = build_pro_reg_tx("8.8.8.8:9999", KeyId::random(), &owner);
        let err = check_pro_reg_tx(
            &distinct,
            Some(&DmnList::default()),
            100,
            &Sporks::default(),
            NetworkId::Mainnet,
        )
        .unwrap_err();
        assert_eq!(err.what(), Some("bad-protx-owner-key-not-same"));

        // equal keys rejected after activation
        let equal = build_pro_reg_tx("8.8.8.8:9999", owner_id, &owner);
        let err = check(&equal).unwrap_err();
        assert_eq!(err.what(), Some("bad-protx-dup-key"));
    }
}
