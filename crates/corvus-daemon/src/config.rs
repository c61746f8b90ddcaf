//! Operator-facing configuration, loaded from a TOML file. The file covers the per-instance settings (autonomous system,
//! router-id, K-values, network statements) and the per-interface knobs; everything else falls back to protocol defaults.

use crate::{
    engine::{
        InterfaceProfile,
        RouterSettings,
    },
    interface::{
        InterfaceParams,
        NetworkType,
        BANDWIDTH_DEFAULT,
        DELAY_DEFAULT,
        HELLO_INTERVAL_DEFAULT,
        HOLD_TIME_DEFAULT,
    },
};
use corvus_common::Prefix;
use corvus_eigrp::metric::KValues;
use serde::Deserialize;
use std::{
    collections::HashMap,
    fs,
    net::Ipv4Addr,
    path::Path,
    str::FromStr,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to read configuration file => {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to parse configuration => {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration => {0}")]
    Invalid(String),
}

fn default_k_values() -> [u8; 6] {
    [1, 0, 1, 0, 0, 0]
}

fn default_hello_interval() -> u16 {
    HELLO_INTERVAL_DEFAULT
}

fn default_hold_time() -> u16 {
    HOLD_TIME_DEFAULT
}

fn default_bandwidth() -> u32 {
    BANDWIDTH_DEFAULT
}

fn default_delay() -> u32 {
    DELAY_DEFAULT
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Autonomous system number, 1..=65535.
    pub as_number: u16,
    /// Statically configured router-id; wins over any host hint.
    pub router_id: Option<Ipv4Addr>,
    #[serde(default = "default_k_values")]
    pub k_values: [u8; 6],
    /// CIDR classifiers choosing which connected links take part in routing.
    #[serde(default)]
    pub networks: Vec<String>,
    /// Credentials to drop to once the raw socket exists.
    pub run_as_uid: Option<u32>,
    pub run_as_gid: Option<u32>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct InterfaceConfig {
    pub name: String,
    #[serde(default = "default_hello_interval")]
    pub hello_interval: u16,
    #[serde(default = "default_hold_time")]
    pub hold_time: u16,
    /// Link bandwidth in kbit/s.
    #[serde(default = "default_bandwidth")]
    pub bandwidth: u32,
    /// Link delay in tens of microseconds.
    #[serde(default = "default_delay")]
    pub delay: u32,
    #[serde(default)]
    pub passive: bool,
    #[serde(default)]
    pub network_type: NetworkType,
    /// Inbound distribute-list: denied prefixes are learned as unreachable.
    #[serde(default)]
    pub deny_in: Vec<String>,
    /// Outbound distribute-list: denied prefixes are never advertised.
    #[serde(default)]
    pub deny_out: Vec<String>,
}

impl Config {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.as_number == 0 {
            return Err(ConfigError::Invalid("as-number must be in 1..=65535".to_string()));
        }
        for interface in &self.interfaces {
            if interface.hello_interval == 0 {
                return Err(ConfigError::Invalid(format!(
                    "interface {}: hello-interval must be in 1..=65535",
                    interface.name
                )));
            }
            if interface.hold_time == 0 {
                return Err(ConfigError::Invalid(format!(
                    "interface {}: hold-time must be in 1..=65535",
                    interface.name
                )));
            }
            if interface.bandwidth == 0 {
                return Err(ConfigError::Invalid(format!("interface {}: bandwidth must be nonzero", interface.name)));
            }
        }
        Ok(())
    }

    /// Resolves the raw file contents into the settings the router engine consumes.
    pub fn settings(&self) -> Result<RouterSettings, ConfigError> {
        let networks = parse_prefixes(&self.networks)?;
        let mut profiles = HashMap::new();
        for interface in &self.interfaces {
            profiles.insert(
                interface.name.clone(),
                InterfaceProfile {
                    params: InterfaceParams {
                        hello_interval: interface.hello_interval,
                        hold_time: interface.hold_time,
                        bandwidth: interface.bandwidth,
                        delay: interface.delay,
                        network_type: interface.network_type,
                        passive: interface.passive,
                        ..InterfaceParams::default()
                    },
                    deny_in: parse_prefixes(&interface.deny_in)?,
                    deny_out: parse_prefixes(&interface.deny_out)?,
                },
            );
        }

        let [k1, k2, k3, k4, k5, k6] = self.k_values;
        Ok(RouterSettings {
            as_number: self.as_number,
            k_values: KValues { k1, k2, k3, k4, k5, k6 },
            router_id_static: self.router_id,
            networks,
            profiles,
        })
    }
}

fn parse_prefixes(raw: &[String]) -> Result<Vec<Prefix>, ConfigError> {
    raw.iter()
        .map(|prefix| Prefix::from_str(prefix).map_err(|error| ConfigError::Invalid(error.to_string())))
        .collect()
}
