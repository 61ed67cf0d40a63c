// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

/// Spork value meaning "never activates"
pub const SPORK_INACTIVE: u64 = u64::MAX;

/// Default activation height for the deterministic service node list
pub const SPORK_DETERMINISTIC_NODES_DEFAULT: u64 = SPORK_INACTIVE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkId {
    Mainnet,
    Testnet,
    Regtest,
}

impl NetworkId {
    pub fn from_name(name: &str) -> Result<Self, &'static str> {
        match name {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "regtest" => Ok(Self::Regtest),
            _ => Err("unknown network name"),
        }
    }

    #[must_use]
    pub fn is_regtest(&self) -> bool {
        matches!(self, Self::Regtest)
    }
}

/// Height-keyed boolean feature gates. The spork values themselves are
/// distributed out of band; the validator only ever asks whether a gate is
/// active at a given height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sporks {
    /// Height at which the deterministic node list rules activate
    pub deterministic_nodes_height: u64,
}

impl Default for Sporks {
    fn default() -> Self {
        Self {
            deterministic_nodes_height: SPORK_DETERMINISTIC_NODES_DEFAULT,
        }
    }
}

impl Sporks {
    #[must_use]
    pub fn new(deterministic_nodes_height: u64) -> Self {
        Self {
            deterministic_nodes_height,
        }
    }

    /// Whether the deterministic node list rules are active at `height`
    #[must_use]
    pub fn is_deterministic_nodes_active(&self, height: u64) -> bool {
        height >= self.deterministic_nodes_height
    }
}
