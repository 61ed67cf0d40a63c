// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::DBInterface;
use crate::consensus::{money_check, MIN_SUBTX_TOPUP};
use crate::evo::context::EvoContext;
use crate::evo::subtx::{get_sub_tx_data, SubTxData};
use crate::evo::user::EvoUser;
use crate::evo::{EvoErr, EvoResult, RejectCode};
use crate::primitives::{verify_digest_with_key_id, Hash256, Transaction};

impl<B: DBInterface> EvoContext<B> {
    /// Consensus checks for a subscription transaction. With
    /// `include_mempool` the username uniqueness check also consults
    /// pending registrations (admission policy, not consensus).
    pub fn check_sub_tx(&self, tx: &Transaction, include_mempool: bool) -> EvoResult<SubTxData> {
        let data = get_sub_tx_data(tx)?;

        match &data {
            SubTxData::Register {
                user_name,
                pub_key_id,
                ..
            } => {
                if self.users.user_name_exists(user_name)?
                    || (include_mempool && self.tx_mempool.sub_tx_name_exists(user_name))
                {
                    return Err(EvoErr::dos(
                        10,
                        RejectCode::Invalid,
                        "bad-subtx-dupusername",
                    ));
                }
                if !money_check(tx.outputs[0].value) || tx.outputs[0].value < MIN_SUBTX_TOPUP {
                    return Err(EvoErr::dos(10, RejectCode::Invalid, "bad-subtx-lowtopup"));
                }
                if verify_digest_with_key_id(&data.sign_message_digest(), pub_key_id, data.signature())
                    .is_err()
                {
                    return Err(EvoErr::dos(10, RejectCode::Invalid, "bad-subtx-sig"));
                }
                Ok(data)
            }
            SubTxData::Topup { reg_tx_id, .. } => {
                self.get_existing_user(reg_tx_id)?;
                if !money_check(tx.outputs[0].value) || tx.outputs[0].value < MIN_SUBTX_TOPUP {
                    return Err(EvoErr::dos(10, RejectCode::Invalid, "bad-subtx-lowtopup"));
                }
                Ok(data)
            }
            SubTxData::ResetKey { reg_tx_id, .. } | SubTxData::CloseAccount { reg_tx_id, .. } => {
                let user = self.get_existing_user(reg_tx_id)?;
                if tx.outputs[0].value != 0 {
                    return Err(EvoErr::dos(10, RejectCode::Invalid, "bad-subtx-nztopup"));
                }
                if user
                    .verify_sig(&data.sign_message_digest(), data.signature())
                    .is_err()
                {
                    return Err(EvoErr::dos(10, RejectCode::Invalid, "bad-subtx-sig"));
                }
                Ok(data)
            }
        }
    }

    /// Applies a checked subscription transaction to the registry
    pub fn process_sub_tx(&self, tx: &Transaction) -> EvoResult<()> {
        let data = get_sub_tx_data(tx)?;

        match &data {
            SubTxData::Register {
                user_name,
                pub_key_id,
                ..
            } => {
                let mut user = EvoUser::new(tx.hash(), user_name.clone(), *pub_key_id);
                user.add_topup(tx.outputs[0].value);
                self.users.write_user(&user)?;
                Ok(())
            }
            SubTxData::Topup { reg_tx_id, .. } => {
                let mut user = self.get_existing_user(reg_tx_id)?;
                user.add_topup(tx.outputs[0].value);
                self.users.write_user(&user)?;
                Ok(())
            }
            SubTxData::ResetKey {
                reg_tx_id,
                new_pub_key_id,
                ..
            } => {
                let mut user = self.get_existing_user(reg_tx_id)?;
                user.push_pub_key_id(*new_pub_key_id);
                self.users.write_user(&user)?;
                Ok(())
            }
            SubTxData::CloseAccount { reg_tx_id, .. } => {
                let mut user = self.get_existing_user(reg_tx_id)?;
                user.set_closed(true);
                self.users.write_user(&user)?;
                Ok(())
            }
        }
    }

    /// Reverts a subscription transaction during block disconnect
    pub fn undo_sub_tx(&self, tx: &Transaction) -> EvoResult<()> {
        let data = get_sub_tx_data(tx)?;

        match &data {
            SubTxData::Register { user_name, .. } => {
                self.users.delete_user(&tx.hash()).map_err(|_| {
                    EvoErr::internal(format!("failed to delete user with name {user_name}"))
                })?;
                Ok(())
            }
            SubTxData::Topup { reg_tx_id, .. } => {
                let mut user = self.get_undo_user(reg_tx_id)?;
                user.add_topup(-tx.outputs[0].value);
                self.users.write_user(&user)?;
                Ok(())
            }
            SubTxData::ResetKey {
                reg_tx_id,
                new_pub_key_id,
                ..
            } => {
                let mut user = self.get_undo_user(reg_tx_id)?;
                let popped = user.pop_pub_key_id();
                if popped != Some(*new_pub_key_id) {
                    return Err(EvoErr::internal(format!(
                        "popped key {:?} is not the expected key {}",
                        popped,
                        new_pub_key_id.to_hex()
                    )));
                }
                self.users.write_user(&user)?;
                Ok(())
            }
            SubTxData::CloseAccount { reg_tx_id, .. } => {
                let mut user = self.get_undo_user(reg_tx_id)?;
                if !user.is_closed() {
                    return Err(EvoErr::internal(format!(
                        "expected account {} to be closed",
                        reg_tx_id.to_hex()
                    )));
                }
                user.set_closed(false);
                self.users.write_user(&user)?;
                Ok(())
            }
        }
    }

    /// Reconstructs a user from a pending register subscription in the
    /// base mempool, as the chain would create it
    pub fn build_user_from_mempool(&self, reg_tx_id: &Hash256) -> Option<EvoUser> {
        let sub_tx = self.tx_mempool.get_sub_tx(reg_tx_id)?;
        let data = self.check_sub_tx(&sub_tx, false).ok()?;

        let SubTxData::Register {
            user_name,
            pub_key_id,
            ..
        } = data
        else {
            return None;
        };

        let mut user = EvoUser::new(sub_tx.hash(), user_name, pub_key_id);
        user.add_topup(sub_tx.outputs[0].value);
        Some(user)
    }

    /// Credits pending topups from the base mempool onto a user view.
    /// Returns whether anything was applied.
    pub fn topup_user_from_mempool(&self, user: &mut EvoUser) -> bool {
        let mut did_topup = false;
        for tx in self.tx_mempool.topups_for_user(user.reg_tx_id()) {
            let Ok(SubTxData::Topup { .. }) = get_sub_tx_data(&tx) else {
                continue;
            };
            user.add_topup(tx.outputs[0].value);
            did_topup = true;
        }
        did_topup
    }

    /// The user as stored, rejecting missing or closed accounts
    fn get_existing_user(&self, reg_tx_id: &Hash256) -> EvoResult<EvoUser> {
        let user = self
            .users
            .get_user(reg_tx_id)?
            .ok_or_else(|| EvoErr::dos(10, RejectCode::Invalid, "bad-subtx-noaccount"))?;
        if user.is_closed() {
            return Err(EvoErr::dos(
                10,
                RejectCode::Invalid,
                "bad-subtx-accountclosed",
            ));
        }
        Ok(user)
    }

    /// The user as stored, for undo paths where a closed flag is expected
    fn get_undo_user(&self, reg_tx_id: &Hash256) -> EvoResult<EvoUser> {
        self.users
            .get_user(reg_tx_id)?
            .ok_or_else(|| EvoErr::internal(format!("missing user {}", reg_tx_id.to_hex())))
    }
}
