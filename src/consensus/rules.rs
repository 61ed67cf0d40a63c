// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use static_assertions::const_assert;

/// Money type
pub type Money = i64;

/// Base units per coin
pub const COIN: Money = 100_000_000;

/// Exact output value a provider registration must lock at the collateral index
pub const PROVIDER_COLLATERAL: Money = 1000 * COIN;

/// Smallest credit top-up accepted for register and topup subscription transactions
pub const MIN_SUBTX_TOPUP: Money = COIN / 10_000;

/// Lowest fee a transition may declare. Policy copies of this and the values
/// below live in the settings and default to these constants.
pub const EVO_TS_MIN_FEE: Money = 1000;

/// Highest fee a transition may declare
pub const EVO_TS_MAX_FEE: Money = EVO_TS_MIN_FEE * 10;

/// Maximum serialized size of a single transition in bytes
pub const EVO_TS_MAX_SIZE: usize = 1500;

/// Maximum size of a subscription payload carried in a transaction output
pub const MAX_SUBTX_DATA_LEN: usize = 512;

/// Block space budget for transitions when assembling a block template
pub const MAX_TS_SPACE_PER_BLOCK: u64 = 100_000;

/// Current provider registration payload version
pub const PROTX_CURRENT_VERSION: u16 = 1;

/// Current subscription payload version
pub const SUBTX_CURRENT_VERSION: u16 = 1;

/// Current transition version. Evo 1.0.0
pub const TS_CURRENT_VERSION: u32 = 0x0001_0000;

/// Oldest peer protocol version allowed to register a provider
pub const MIN_EVO_PROTO_VERSION: u16 = 1000;

/// Protocol version spoken by this build
pub const PROTOCOL_VERSION: u16 = 1002;

/// Transition mempool runs a cleanup pass at most once per interval
pub const TS_CLEANUP_INTERVAL_MS: i64 = 1000 * 5;

/// Unreferenced transitions are dropped from the mempool after this long
pub const TS_CLEANUP_TIMEOUT_MS: i64 = 1000 * 60 * 5;

/// Deterministic list snapshots are persisted every `n` blocks that changed the list
pub const DMN_SNAPSHOT_PERIOD: u64 = 576;

const_assert!(EVO_TS_MIN_FEE > 0);
const_assert!(EVO_TS_MAX_FEE >= EVO_TS_MIN_FEE);
const_assert!(MIN_SUBTX_TOPUP > 0);

/// Money check
#[must_use]
pub fn money_check(amount: Money) -> bool {
    amount >= 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_check_rejects_negative_amounts() {
        assert!(money_check(0));
        assert!(money_check(COIN));
        assert!(!money_check(-1));
    }

    #[test]
    fn fee_window_is_well_formed() {
        assert!(EVO_TS_MIN_FEE <= EVO_TS_MAX_FEE);
        assert!(EVO_TS_MAX_FEE < MIN_SUBTX_TOPUP * 10);
    }
}
