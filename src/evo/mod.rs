// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::DBInterfaceErr;
use std::fmt;

pub mod context;
pub mod deterministic;
pub mod provider_tx;
pub mod subtx;
pub mod ts_mempool;
pub mod ts_validation;
pub mod user;
pub mod users;
pub mod users_db;

#[cfg(test)]
pub(crate) mod test_utils;

pub use context::*;
pub use deterministic::*;
pub use provider_tx::*;
pub use subtx::*;
pub use ts_mempool::*;
pub use ts_validation::*;
pub use user::*;
pub use users::*;
pub use users_db::*;

/// Reject categories surfaced to the peer layer. Deferred codes mark
/// conditions that may clear once more state arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectCode {
    Invalid,
    Duplicate,
    InsufficientFee,
    TsAncestor,
    TsNoUser,
    TsSig,
}

impl RejectCode {
    /// Whether a transition failing with this code should be parked in the
    /// wait-for-relay set and retried when state changes
    #[must_use]
    pub fn is_parkable(&self) -> bool {
        matches!(
            self,
            Self::TsAncestor | Self::TsNoUser | Self::InsufficientFee
        )
    }
}

/// A consensus rejection: reject code, misbehaviour score for the relaying
/// peer and a short machine-readable reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub code: RejectCode,
    pub score: u8,
    pub what: &'static str,
    pub debug: Option<String>,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.debug {
            Some(debug) => write!(f, "{} (score {}): {}", self.what, self.score, debug),
            None => write!(f, "{} (score {})", self.what, self.score),
        }
    }
}

/// Any failure produced by the evo validators. Validation never panics;
/// everything is reported through this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvoErr {
    /// Consensus rejection with an attached misbehaviour score
    Rejected(Rejection),

    /// Node-local failure: storage error or internal inconsistency during
    /// undo. Not a consensus verdict; the caller aborts block processing.
    Internal(String),
}

impl EvoErr {
    #[must_use]
    pub fn dos(score: u8, code: RejectCode, what: &'static str) -> Self {
        Self::Rejected(Rejection {
            code,
            score,
            what,
            debug: None,
        })
    }

    #[must_use]
    pub fn dos_debug(score: u8, code: RejectCode, what: &'static str, debug: String) -> Self {
        Self::Rejected(Rejection {
            code,
            score,
            what,
            debug: Some(debug),
        })
    }

    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// The rejection reason, e.g. `bad-ts-fee`, if this is a rejection
    #[must_use]
    pub fn what(&self) -> Option<&'static str> {
        match self {
            Self::Rejected(r) => Some(r.what),
            Self::Internal(_) => None,
        }
    }

    #[must_use]
    pub fn is_parkable(&self) -> bool {
        match self {
            Self::Rejected(r) => r.code.is_parkable(),
            Self::Internal(_) => false,
        }
    }
}

impl fmt::Display for EvoErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(r) => write!(f, "rejected: {r}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

pub type EvoResult<T> = Result<T, EvoErr>;

impl From<DBInterfaceErr> for EvoErr {
    fn from(other: DBInterfaceErr) -> Self {
        Self::Internal(format!("db error: {other:?}"))
    }
}
