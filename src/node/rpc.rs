// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::DBInterface;
use crate::consensus::{Money, PROVIDER_COLLATERAL};
use crate::evo::{EvoContext, EvoErr, ProviderRegTx, SubTxData, TransitionInfoSource};
use crate::primitives::{
    Hash256, KeyId, NetAddress, Script, SecretKey, Transition, TransitionAction, Transaction,
    TxOutput, TRANSACTION_PROVIDER_REGISTER,
};
use serde::{Deserialize, Serialize};
use tarpc::context;
use triomphe::Arc;

#[tarpc::service]
pub trait EvoRpcDefinition {
    /// Returns a user by registration id or username, optionally merging
    /// the mempool view
    async fn get_user(
        id_or_name: String,
        include_mempool: bool,
        verbose: bool,
    ) -> Result<UserInfo, RpcErr>;

    /// Builds an unsigned register subscription transaction
    async fn create_raw_sub_tx_register(
        user_name: String,
        pub_key_id: String,
        amount: Money,
    ) -> Result<String, RpcErr>;

    /// Builds a topup subscription transaction
    async fn create_raw_sub_tx_topup(reg_tx_id: String, amount: Money) -> Result<String, RpcErr>;

    /// Builds an unsigned update transition chained onto the user's
    /// current state
    async fn create_raw_transition_update(
        id_or_name: String,
        fee: Money,
        hash_data_merkle_root: String,
    ) -> Result<String, RpcErr>;

    /// Builds an unsigned reset-key transition
    async fn create_raw_transition_reset_key(
        id_or_name: String,
        fee: Money,
        new_pub_key_id: String,
    ) -> Result<String, RpcErr>;

    /// Builds an unsigned close-account transition
    async fn create_raw_transition_close(id_or_name: String, fee: Money) -> Result<String, RpcErr>;

    /// Signs a serialized transition with the given secret key
    async fn sign_raw_transition(hex_ts: String, secret_key: String) -> Result<String, RpcErr>;

    /// Validates a serialized transition and inserts it into the pool.
    /// Returns the transition hash; relaying is left to the network layer.
    async fn send_raw_transition(hex_ts: String, relay: bool) -> Result<String, RpcErr>;

    /// Looks a transition up in the registry, then in the pool
    async fn get_transition(ts_hash: String) -> Result<TransitionInfo, RpcErr>;

    /// Builds an unsigned provider registration envelope. The wallet funds
    /// it and fills in the inputs commitment and owner signature.
    async fn create_provider_tx_register(
        net_addr: String,
        protocol_version: u16,
        operator_key_id: String,
        owner_key_id: String,
        payout_key_id: String,
    ) -> Result<String, RpcErr>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RpcErr {
    /// The provided hash could not be deserialised.
    InvalidHash,

    /// The provided key could not be deserialised.
    InvalidKey,

    /// The provided network address could not be parsed.
    InvalidAddress,

    /// The provided payload could not be deserialised.
    InvalidPayload,

    /// No user with the given id or name.
    UserNotFound,

    /// No transition with the given hash.
    TransitionNotFound,

    /// The object was rejected by validation.
    Validation(String),

    /// Node-local failure.
    Internal(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    pub reg_tx_id: String,
    pub user_name: String,
    pub credit_balance: Money,
    pub topup_credits: Money,
    pub spent_credits: Money,
    pub pub_key_ids: Vec<String>,
    pub hash_last_transition: String,
    pub closed: bool,
    /// Confirmed transition hashes, present in verbose mode
    pub transitions: Option<Vec<String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransitionInfo {
    pub hash: String,
    pub version: u32,
    pub action: String,
    pub fee: Money,
    pub reg_tx_id: String,
    pub hash_prev_transition: String,
    pub hash_data_merkle_root: Option<String>,
    pub new_pub_key_id: Option<String>,
    pub quorum_sigs: usize,
    /// Hash of the including block, absent while unconfirmed
    pub block_hash: Option<String>,
}

impl TransitionInfo {
    fn from_transition(ts: &Transition, block_hash: Option<Hash256>) -> Self {
        let (hash_data_merkle_root, new_pub_key_id) = match &ts.action {
            TransitionAction::UpdateData {
                hash_data_merkle_root,
            } => (Some(hash_data_merkle_root.to_hex()), None),
            TransitionAction::ResetKey { new_pub_key_id } => {
                (None, Some(new_pub_key_id.to_hex()))
            }
            TransitionAction::CloseAccount => (None, None),
        };

        Self {
            hash: ts.hash().to_hex(),
            version: ts.version,
            action: ts.action.name().to_owned(),
            fee: ts.fee,
            reg_tx_id: ts.hash_reg_tx.to_hex(),
            hash_prev_transition: ts.hash_prev_transition.to_hex(),
            hash_data_merkle_root,
            new_pub_key_id,
            quorum_sigs: ts.quorum_sigs.len(),
            block_hash: block_hash.map(|h| h.to_hex()),
        }
    }
}

/// RPC server over a shared evo context
pub struct EvoRpcServer<B: DBInterface> {
    ctx: Arc<EvoContext<B>>,
}

impl<B: DBInterface> Clone for EvoRpcServer<B> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<B: DBInterface> EvoRpcServer<B> {
    #[must_use]
    pub fn new(ctx: Arc<EvoContext<B>>) -> Self {
        Self { ctx }
    }

    fn resolve_user_id(&self, id_or_name: &str) -> Result<Hash256, RpcErr> {
        if let Ok(reg_tx_id) = Hash256::from_hex(id_or_name) {
            return Ok(reg_tx_id);
        }
        self.ctx
            .users
            .get_user_id_by_name(id_or_name)
            .map_err(|e| RpcErr::Internal(format!("{e:?}")))?
            .ok_or(RpcErr::UserNotFound)
    }

    fn resolve_prev_transition(
        &self,
        id_or_name: &str,
    ) -> Result<(Hash256, Hash256), RpcErr> {
        let reg_tx_id = self.resolve_user_id(id_or_name)?;
        let user = self
            .ctx
            .get_user_view(&reg_tx_id, true)
            .map_err(|e| RpcErr::Internal(e.to_string()))?
            .ok_or(RpcErr::UserNotFound)?;
        Ok((reg_tx_id, *user.hash_last_transition()))
    }

    fn encode_hex<T: bincode::Encode>(val: &T) -> Result<String, RpcErr> {
        crate::codec::encode_to_vec(val)
            .map(hex::encode)
            .map_err(|e| RpcErr::Internal(e.to_string()))
    }

    fn decode_transition(hex_ts: &str) -> Result<Transition, RpcErr> {
        let bytes = hex::decode(hex_ts).map_err(|_| RpcErr::InvalidPayload)?;
        crate::codec::decode_exact(&bytes).map_err(|_| RpcErr::InvalidPayload)
    }
}

#[tarpc::server]
impl<B: DBInterface + Send + Sync + 'static> EvoRpcDefinition for EvoRpcServer<B> {
    async fn get_user(
        self,
        _: context::Context,
        id_or_name: String,
        include_mempool: bool,
        verbose: bool,
    ) -> Result<UserInfo, RpcErr> {
        let reg_tx_id = self.resolve_user_id(&id_or_name)?;
        let user = self
            .ctx
            .get_user_view(&reg_tx_id, include_mempool)
            .map_err(|e| RpcErr::Internal(e.to_string()))?
            .ok_or(RpcErr::UserNotFound)?;

        let transitions = if verbose {
            let list = self
                .ctx
                .users
                .list_transitions_for_user(&reg_tx_id, usize::MAX)
                .map_err(|e| RpcErr::Internal(format!("{e:?}")))?;
            Some(list.iter().map(|ts| ts.hash().to_hex()).collect())
        } else {
            None
        };

        Ok(UserInfo {
            reg_tx_id: user.reg_tx_id().to_hex(),
            user_name: user.user_name().to_owned(),
            credit_balance: user.credit_balance(),
            topup_credits: user.topup_credits(),
            spent_credits: user.spent_credits(),
            pub_key_ids: user.pub_key_ids().iter().map(KeyId::to_hex).collect(),
            hash_last_transition: user.hash_last_transition().to_hex(),
            closed: user.is_closed(),
            transitions,
        })
    }

    async fn create_raw_sub_tx_register(
        self,
        _: context::Context,
        user_name: String,
        pub_key_id: String,
        amount: Money,
    ) -> Result<String, RpcErr> {
        let pub_key_id = parse_key_id(&pub_key_id)?;
        let data = SubTxData::register(user_name, pub_key_id);
        Self::encode_hex(&crate::evo::build_sub_tx(&data, amount))
    }

    async fn create_raw_sub_tx_topup(
        self,
        _: context::Context,
        reg_tx_id: String,
        amount: Money,
    ) -> Result<String, RpcErr> {
        let reg_tx_id = Hash256::from_hex(&reg_tx_id).map_err(|_| RpcErr::InvalidHash)?;
        let data = SubTxData::topup(reg_tx_id);
        Self::encode_hex(&crate::evo::build_sub_tx(&data, amount))
    }

    async fn create_raw_transition_update(
        self,
        _: context::Context,
        id_or_name: String,
        fee: Money,
        hash_data_merkle_root: String,
    ) -> Result<String, RpcErr> {
        let root = Hash256::from_hex(&hash_data_merkle_root).map_err(|_| RpcErr::InvalidHash)?;
        let (reg_tx_id, prev) = self.resolve_prev_transition(&id_or_name)?;

        let mut ts = Transition::new(
            TransitionAction::UpdateData {
                hash_data_merkle_root: root,
            },
            fee,
            reg_tx_id,
        );
        ts.hash_prev_transition = prev;
        Self::encode_hex(&ts)
    }

    async fn create_raw_transition_reset_key(
        self,
        _: context::Context,
        id_or_name: String,
        fee: Money,
        new_pub_key_id: String,
    ) -> Result<String, RpcErr> {
        let new_pub_key_id = parse_key_id(&new_pub_key_id)?;
        let (reg_tx_id, prev) = self.resolve_prev_transition(&id_or_name)?;

        let mut ts = Transition::new(TransitionAction::ResetKey { new_pub_key_id }, fee, reg_tx_id);
        ts.hash_prev_transition = prev;
        Self::encode_hex(&ts)
    }

    async fn create_raw_transition_close(
        self,
        _: context::Context,
        id_or_name: String,
        fee: Money,
    ) -> Result<String, RpcErr> {
        let (reg_tx_id, prev) = self.resolve_prev_transition(&id_or_name)?;

        let mut ts = Transition::new(TransitionAction::CloseAccount, fee, reg_tx_id);
        ts.hash_prev_transition = prev;
        Self::encode_hex(&ts)
    }

    async fn sign_raw_transition(
        self,
        _: context::Context,
        hex_ts: String,
        secret_key: String,
    ) -> Result<String, RpcErr> {
        let mut ts = Self::decode_transition(&hex_ts)?;
        let key = SecretKey::from_hex(&secret_key).map_err(|_| RpcErr::InvalidKey)?;
        ts.sign(&key);
        Self::encode_hex(&ts)
    }

    async fn send_raw_transition(
        self,
        _: context::Context,
        hex_ts: String,
        _relay: bool,
    ) -> Result<String, RpcErr> {
        let ts = Self::decode_transition(&hex_ts)?;
        let ts_hash = ts.hash();

        match self.ctx.handle_incoming_transition(ts) {
            Ok(_) => Ok(ts_hash.to_hex()),
            // parked transitions stay pooled and may become valid later
            Err(err) if err.is_parkable() => Ok(ts_hash.to_hex()),
            Err(EvoErr::Internal(msg)) => Err(RpcErr::Internal(msg)),
            Err(err) => Err(RpcErr::Validation(err.to_string())),
        }
    }

    async fn get_transition(
        self,
        _: context::Context,
        ts_hash: String,
    ) -> Result<TransitionInfo, RpcErr> {
        let ts_hash = Hash256::from_hex(&ts_hash).map_err(|_| RpcErr::InvalidHash)?;

        match self
            .ctx
            .lookup_transition(&ts_hash)
            .map_err(|e| RpcErr::Internal(e.to_string()))?
        {
            Some((ts, TransitionInfoSource::Registry(block_hash))) => {
                Ok(TransitionInfo::from_transition(&ts, block_hash))
            }
            Some((ts, TransitionInfoSource::Mempool)) => {
                Ok(TransitionInfo::from_transition(&ts, None))
            }
            None => Err(RpcErr::TransitionNotFound),
        }
    }

    async fn create_provider_tx_register(
        self,
        _: context::Context,
        net_addr: String,
        protocol_version: u16,
        operator_key_id: String,
        owner_key_id: String,
        payout_key_id: String,
    ) -> Result<String, RpcErr> {
        let addr = NetAddress::from_str_addr(&net_addr).map_err(|_| RpcErr::InvalidAddress)?;
        let operator = parse_key_id(&operator_key_id)?;
        let owner = parse_key_id(&owner_key_id)?;
        let payout = parse_key_id(&payout_key_id)?;
        let script_payout = Script::pay_to_pub_key_hash(&payout);

        let mut ptx = ProviderRegTx::new(0, addr, operator, owner, script_payout.clone());
        ptx.protocol_version = protocol_version;

        let mut tx = Transaction::new(TRANSACTION_PROVIDER_REGISTER);
        tx.outputs.push(TxOutput {
            value: PROVIDER_COLLATERAL,
            script_pubkey: script_payout,
        });
        tx.extra_payload = ptx.to_bytes();
        Self::encode_hex(&tx)
    }
}

fn parse_key_id(s: &str) -> Result<KeyId, RpcErr> {
    if let Ok(key_id) = KeyId::from_bech32(s) {
        return Ok(key_id);
    }
    let bytes = hex::decode(s).map_err(|_| RpcErr::InvalidKey)?;
    if bytes.len() != 20 {
        return Err(RpcErr::InvalidKey);
    }
    let mut key_id = KeyId::zero();
    key_id.0.copy_from_slice(&bytes);
    Ok(key_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MemoryBackend;
    use crate::consensus::{NetworkId, Sporks, EVO_TS_MIN_FEE};
    use crate::evo::test_utils::build_register_tx;
    use futures::executor::block_on;

    fn server_with_user(key: &SecretKey) -> (EvoRpcServer<MemoryBackend>, Hash256) {
        let ctx =
            EvoContext::new(MemoryBackend::new(), Sporks::default(), NetworkId::Regtest).unwrap();
        let reg_tx = build_register_tx("alice", key, 1_000_000);
        let reg_tx_id = reg_tx.hash();
        ctx.process_sub_tx(&reg_tx).unwrap();
        (EvoRpcServer::new(Arc::new(ctx)), reg_tx_id)
    }

    #[test]
    fn get_user_by_id_and_name() {
        let key = SecretKey::random();
        let (server, reg_tx_id) = server_with_user(&key);

        let by_id = block_on(server.clone().get_user(
            context::current(),
            reg_tx_id.to_hex(),
            false,
            false,
        ))
        .unwrap();
        let by_name = block_on(server.clone().get_user(
            context::current(),
            "alice".to_owned(),
            false,
            false,
        ))
        .unwrap();
        assert_eq!(by_id, by_name);
        assert_eq!(by_id.user_name, "alice");
        assert_eq!(by_id.credit_balance, 1_000_000);

        let missing = block_on(server.clone().get_user(
            context::current(),
            "nobody".to_owned(),
            false,
            false,
        ));
        assert!(matches!(missing, Err(RpcErr::UserNotFound)));
    }

    #[test]
    fn raw_transition_construct_sign_send_get() {
        let key = SecretKey::random();
        let (server, reg_tx_id) = server_with_user(&key);

        let raw = block_on(server.clone().create_raw_transition_update(
            context::current(),
            reg_tx_id.to_hex(),
            EVO_TS_MIN_FEE,
            Hash256::hash_from_slice("data", "test").to_hex(),
        ))
        .unwrap();

        let secret_hex = hex::encode(key.0.serialize());
        let signed = block_on(server.clone().sign_raw_transition(
            context::current(),
            raw,
            secret_hex,
        ))
        .unwrap();

        let ts_hash = block_on(server.clone().send_raw_transition(
            context::current(),
            signed,
            true,
        ))
        .unwrap();

        // retrievable from the pool, unconfirmed
        let info = block_on(server.clone().get_transition(context::current(), ts_hash.clone()))
            .unwrap();
        assert_eq!(info.hash, ts_hash);
        assert_eq!(info.action, "update");
        assert_eq!(info.block_hash, None);

        // and the mempool view of the user reflects it
        let merged = block_on(server.clone().get_user(
            context::current(),
            "alice".to_owned(),
            true,
            false,
        ))
        .unwrap();
        assert_eq!(merged.hash_last_transition, ts_hash);
        assert_eq!(merged.spent_credits, EVO_TS_MIN_FEE);
    }

    #[test]
    fn send_rejects_garbage() {
        let key = SecretKey::random();
        let (server, _) = server_with_user(&key);

        let result = block_on(server.clone().send_raw_transition(
            context::current(),
            "zz".to_owned(),
            false,
        ));
        assert!(matches!(result, Err(RpcErr::InvalidPayload)));
    }

    #[test]
    fn provider_register_envelope_roundtrips() {
        let key = SecretKey::random();
        let (server, _) = server_with_user(&key);

        let raw = block_on(server.clone().create_provider_tx_register(
            context::current(),
            "8.8.8.8:9999".to_owned(),
            crate::consensus::PROTOCOL_VERSION,
            KeyId::random().to_hex(),
            KeyId::random().to_hex(),
            KeyId::random().to_hex(),
        ))
        .unwrap();

        let tx: Transaction = crate::codec::decode(&hex::decode(raw).unwrap()).unwrap();
        assert_eq!(tx.tx_type, TRANSACTION_PROVIDER_REGISTER);
        let ptx = crate::evo::get_pro_reg_tx_payload(&tx).unwrap();
        assert_eq!(ptx.protocol_version, crate::consensus::PROTOCOL_VERSION);
        assert!(ptx.sig.is_empty());
    }
}
