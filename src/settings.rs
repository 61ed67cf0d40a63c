// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::{
    Money, EVO_TS_MAX_FEE, EVO_TS_MIN_FEE, MIN_SUBTX_TOPUP, TS_CLEANUP_INTERVAL_MS,
    TS_CLEANUP_TIMEOUT_MS,
};
use config::{Config, ConfigError, File};
use lazy_static::lazy_static;
use log::error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{metadata, File as FsFile};
use std::io::Write;
use struct_field_names_as_array::FieldNamesAsArray;

lazy_static! {
    pub static ref SETTINGS: Settings = Settings::new().unwrap();
}

#[derive(Debug, Serialize, Deserialize, Default, FieldNamesAsArray)]
pub struct Settings {
    /// Network settings.
    pub network: Network,

    /// Node settings.
    pub node: Node,

    /// Evolution subsystem settings.
    pub evo: Evo,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let mut config_path = dirs::config_dir().unwrap();
        config_path.push("PurplecoinEvo");
        config_path.push("config.toml");
        let default_settings = Settings::default();
        if metadata(config_path.clone()).is_err() {
            let settings_str = toml::ser::to_string_pretty(&default_settings).unwrap();

            // Create configuration file
            match FsFile::create(config_path.clone()) {
                Ok(mut file) => {
                    file.write_all(settings_str.as_bytes()).unwrap_or(());
                }
                Err(err) => {
                    // If this fails, do nothing and fall back to envionment variables
                    error!("Failed to create configuration! Reason: {:#?}", err);
                }
            }
        }

        let prefix = "purplecoinevo";
        let env_source: Vec<_> = std::env::vars().collect();
        let mut s = Config::builder().add_source(
            File::with_name(&config_path.into_os_string().into_string().unwrap()).required(false),
        );

        // Set defaults
        let defaults: HashMap<String, HashMap<String, DynamicConfVal>> =
            serde_yaml::from_value(serde_yaml::to_value(&default_settings).unwrap()).unwrap();
        for (k1, inner) in &defaults {
            for (k2, v) in inner {
                match v {
                    DynamicConfVal::String(v) => {
                        s = s.set_default(format!("{k1}.{k2}"), v.as_str())?;
                    }

                    DynamicConfVal::Bool(v) => {
                        s = s.set_default(format!("{k1}.{k2}"), v.to_string())?;
                    }

                    DynamicConfVal::U16(v) => {
                        s = s.set_default(format!("{k1}.{k2}"), v.to_string())?;
                    }

                    DynamicConfVal::I64(v) => {
                        s = s.set_default(format!("{k1}.{k2}"), v.to_string())?;
                    }

                    DynamicConfVal::Sequence(v) => {
                        s = s.set_default(format!("{k1}.{k2}"), v.clone())?;
                    }

                    DynamicConfVal::Option(v) => {
                        if let Some(v) = v {
                            s = s.set_default(format!("{k1}.{k2}"), v.as_str())?;
                        }
                    }
                }
            }
        }

        // Make sure to list these in order
        let settings_modules: Vec<_> = vec![
            Network::FIELD_NAMES_AS_ARRAY,
            Node::FIELD_NAMES_AS_ARRAY,
            Evo::FIELD_NAMES_AS_ARRAY,
        ];

        // Gather all possible settings keys
        let possible_keys: HashMap<String, &str> = Settings::FIELD_NAMES_AS_ARRAY
            .iter()
            .enumerate()
            .flat_map(|(i, field)| {
                settings_modules[i].iter().map(|nested| {
                    (
                        format!(
                            "{}_{}_{}",
                            prefix,
                            field.to_owned(),
                            nested.split('_').collect::<Vec<_>>().join("")
                        ),
                        *nested,
                    )
                })
            })
            .collect();

        // Parse env vars manually and set overrides if they exist as the
        // config package `Environment` module seems to behave poorly.
        for (k, v) in &env_source {
            let k = k.to_lowercase();

            if let Some(k_postfix) = possible_keys.get(&k) {
                let mut k: Vec<_> = k.split('_').filter(|x| x != &prefix).collect();
                *k.last_mut().unwrap() = k_postfix;
                let k = k.join(".");

                // Filter empty values
                if v.as_str() == "" {
                    continue;
                }

                s = s.set_override(k, v.as_str())?;
            }
        }

        s.build()?.try_deserialize()
    }

    /// Validates the settings. Panics if settings are invalid.
    pub fn validate(&self) {
        self.network.validate();
        self.evo.validate();
    }
}

#[derive(Debug, Serialize, Deserialize, FieldNamesAsArray)]
pub struct Network {
    /// The network the node runs on. Possible values: mainnet, testnet,
    /// and regtest.
    #[serde(alias = "networkname")]
    pub network_name: String,

    /// Node listen address.
    #[serde(alias = "listenaddr")]
    pub listen_addr: String,

    /// Node listen port on mainnet.
    #[serde(alias = "listenportmainnet")]
    pub listen_port_mainnet: u16,

    /// Node listen port on testnet.
    #[serde(alias = "listenporttestnet")]
    pub listen_port_testnet: u16,

    /// Externally reachable address advertised in provider registrations.
    #[serde(alias = "externalip")]
    pub external_ip: Option<String>,

    /// Enable RPC.
    #[serde(alias = "rpcenabled")]
    pub rpc_enabled: bool,

    /// RPC listen port.
    #[serde(alias = "rpclistenport")]
    pub rpc_listen_port: u16,

    /// RPC username.
    #[serde(alias = "rpcusername")]
    pub rpc_username: String,

    /// RPC password.
    #[serde(alias = "rpcpassword")]
    pub rpc_password: String,
}

impl Default for Network {
    fn default() -> Self {
        Self {
            network_name: "mainnet".to_owned(),
            listen_addr: "0.0.0.0".to_owned(),
            listen_port_mainnet: 8098,
            listen_port_testnet: 8031,
            external_ip: None,
            rpc_enabled: true,
            rpc_listen_port: 8067,
            rpc_username: "purplecoin".to_owned(),
            rpc_password: "purplecoin".to_owned(),
        }
    }
}

impl Network {
    fn validate(&self) {
        assert!(
            matches!(
                self.network_name.as_str(),
                "mainnet" | "testnet" | "regtest"
            ),
            "invalid settings: networkname must be mainnet, testnet or regtest"
        );
    }
}

#[derive(Debug, Serialize, Deserialize, FieldNamesAsArray)]
pub struct Node {
    /// Node data directory
    #[serde(alias = "datadir")]
    pub data_dir: String,

    /// Run as a service node.
    #[serde(alias = "masternodemode")]
    pub masternode_mode: bool,

    /// Hash of our own provider registration when running as a service
    /// node.
    #[serde(alias = "masternodeprotx")]
    pub masternode_pro_tx: Option<String>,

    /// Number of signature verification threads.
    ///
    /// Default is 0 which means the number of cores of the system
    #[serde(alias = "verifierthreads")]
    pub verifier_threads: u16,

    /// If specified, we won't be storing anything to disk.
    #[serde(alias = "memoryonly")]
    pub memory_only: bool,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            data_dir: data_dir_default(),
            masternode_mode: false,
            masternode_pro_tx: None,
            verifier_threads: 0,
            memory_only: false,
        }
    }
}

/// Evolution policy knobs. The fee window, minimum topup and mempool
/// cleanup timing are policy, not consensus; they default to the consensus
/// constants.
#[derive(Debug, Serialize, Deserialize, FieldNamesAsArray)]
pub struct Evo {
    /// Lowest transition fee this node accepts into its pool.
    #[serde(alias = "tsminfee")]
    pub ts_min_fee: Money,

    /// Highest transition fee this node accepts into its pool.
    #[serde(alias = "tsmaxfee")]
    pub ts_max_fee: Money,

    /// Smallest accepted credit topup.
    #[serde(alias = "minsubtxtopup")]
    pub min_subtx_topup: Money,

    /// How often the transition mempool runs its cleanup pass, in
    /// milliseconds.
    #[serde(alias = "tscleanupintervalms")]
    pub ts_cleanup_interval_ms: i64,

    /// Age after which an unreferenced pooled transition is dropped, in
    /// milliseconds.
    #[serde(alias = "tscleanuptimeoutms")]
    pub ts_cleanup_timeout_ms: i64,
}

impl Default for Evo {
    fn default() -> Self {
        Self {
            ts_min_fee: EVO_TS_MIN_FEE,
            ts_max_fee: EVO_TS_MAX_FEE,
            min_subtx_topup: MIN_SUBTX_TOPUP,
            ts_cleanup_interval_ms: TS_CLEANUP_INTERVAL_MS,
            ts_cleanup_timeout_ms: TS_CLEANUP_TIMEOUT_MS,
        }
    }
}

impl Evo {
    fn validate(&self) {
        assert!(
            self.ts_min_fee <= self.ts_max_fee,
            "invalid settings: tsminfee must not exceed tsmaxfee"
        );
        assert!(
            self.min_subtx_topup > 0,
            "invalid settings: minsubtxtopup must be greater than 0"
        );
    }
}

fn data_dir_default() -> String {
    let mut dir = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
    dir.push("PurplecoinEvo");
    dir.into_os_string().into_string().unwrap()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DynamicConfVal {
    String(String),
    Bool(bool),
    U16(u16),
    I64(i64),
    Sequence(Vec<String>),
    Option(Option<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate();
        assert_eq!(settings.evo.ts_min_fee, EVO_TS_MIN_FEE);
        assert_eq!(settings.evo.ts_max_fee, EVO_TS_MAX_FEE);
    }

    #[test]
    fn default_network_is_mainnet() {
        let settings = Settings::default();
        assert_eq!(settings.network.network_name, "mainnet");
        assert!(crate::consensus::NetworkId::from_name(&settings.network.network_name).is_ok());
    }
}
