//
// Copyright (c) The Vigil Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use serde::Deserialize;
use vigil_utils::bfd::PathType;
use vigil_utils::ip::IpAddrExt;

// Configuration of a single BFD session, as handed over by the daemon's
// configuration loader. Immutable between reloads.
//
// All intervals are expressed in microseconds.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SessionCfg {
    pub name: String,
    pub neighbor: IpAddr,
    #[serde(default)]
    pub source: Option<IpAddr>,
    #[serde(default)]
    pub multihop: bool,
    #[serde(default = "dflt_min_rx_interval")]
    pub min_rx_interval: u32,
    #[serde(default = "dflt_min_tx_interval")]
    pub min_tx_interval: u32,
    #[serde(default = "dflt_idle_tx_interval")]
    pub idle_tx_interval: u32,
    #[serde(default = "dflt_detect_mult")]
    pub detect_mult: u8,
    #[serde(default = "dflt_tx_ttl")]
    pub tx_ttl: u8,
    #[serde(default)]
    pub max_hops: u8,
    #[serde(default)]
    pub passive: bool,
    #[serde(default)]
    pub admin_down: bool,
    #[serde(default)]
    pub notify_vrrp: bool,
    #[serde(default)]
    pub notify_checker: bool,
}

// Session configuration errors.
//
// A session whose configuration fails validation is skipped; the rest of the
// configuration stays in effect.
#[derive(Debug, Eq, PartialEq)]
pub enum ConfigError {
    InvalidName(String),
    InvalidInterval(&'static str),
    InvalidDetectMult(u8),
    InvalidTtl(u8),
    UnusableAddress(IpAddr),
    AddressFamilyMismatch(IpAddr, IpAddr),
}

fn dflt_min_rx_interval() -> u32 {
    10_000
}

fn dflt_min_tx_interval() -> u32 {
    10_000
}

fn dflt_idle_tx_interval() -> u32 {
    1_000_000
}

fn dflt_detect_mult() -> u8 {
    3
}

fn dflt_tx_ttl() -> u8 {
    255
}

// ===== impl SessionCfg =====

impl SessionCfg {
    pub const MAX_NAME_LEN: usize = 32;

    pub fn path_type(&self) -> PathType {
        match self.multihop {
            true => PathType::IpMultihop,
            false => PathType::IpSingleHop,
        }
    }

    // Validates the session configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty()
            || self.name.len() > Self::MAX_NAME_LEN
            || !self.name.is_ascii()
        {
            return Err(ConfigError::InvalidName(self.name.clone()));
        }
        if self.min_rx_interval == 0 {
            return Err(ConfigError::InvalidInterval("min-rx-interval"));
        }
        if self.min_tx_interval == 0 {
            return Err(ConfigError::InvalidInterval("min-tx-interval"));
        }
        if self.idle_tx_interval == 0 {
            return Err(ConfigError::InvalidInterval("idle-tx-interval"));
        }
        if self.detect_mult == 0 {
            return Err(ConfigError::InvalidDetectMult(self.detect_mult));
        }
        if self.tx_ttl == 0 {
            return Err(ConfigError::InvalidTtl(self.tx_ttl));
        }
        if !self.neighbor.is_usable() {
            return Err(ConfigError::UnusableAddress(self.neighbor));
        }
        if let Some(source) = &self.source {
            if !source.is_usable() {
                return Err(ConfigError::UnusableAddress(*source));
            }
            if source.address_family() != self.neighbor.address_family() {
                return Err(ConfigError::AddressFamilyMismatch(
                    *source,
                    self.neighbor,
                ));
            }
        }

        Ok(())
    }
}

// ===== impl ConfigError =====

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidName(name) => {
                write!(f, "invalid session name: {name}")
            }
            ConfigError::InvalidInterval(name) => {
                write!(f, "interval can not be zero: {name}")
            }
            ConfigError::InvalidDetectMult(detect_mult) => {
                write!(f, "invalid detection multiplier: {detect_mult}")
            }
            ConfigError::InvalidTtl(ttl) => {
                write!(f, "invalid TTL: {ttl}")
            }
            ConfigError::UnusableAddress(addr) => {
                write!(f, "unusable IP address: {addr}")
            }
            ConfigError::AddressFamilyMismatch(source, neighbor) => {
                write!(
                    f,
                    "source and neighbor address family mismatch: {source}, {neighbor}"
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ===== tests =====

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cfg() -> SessionCfg {
        SessionCfg {
            name: "peer1".to_owned(),
            neighbor: "192.0.2.1".parse().unwrap(),
            source: None,
            multihop: false,
            min_rx_interval: dflt_min_rx_interval(),
            min_tx_interval: dflt_min_tx_interval(),
            idle_tx_interval: dflt_idle_tx_interval(),
            detect_mult: dflt_detect_mult(),
            tx_ttl: dflt_tx_ttl(),
            max_hops: 0,
            passive: false,
            admin_down: false,
            notify_vrrp: false,
            notify_checker: false,
        }
    }

    #[test]
    fn validate_accepts_defaults() {
        assert_eq!(base_cfg().validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_bad_name() {
        let mut cfg = base_cfg();
        cfg.name = String::new();
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidName(_))));

        cfg.name = "x".repeat(SessionCfg::MAX_NAME_LEN + 1);
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidName(_))));
    }

    #[test]
    fn validate_rejects_zero_values() {
        let mut cfg = base_cfg();
        cfg.detect_mult = 0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::InvalidDetectMult(0))
        );

        let mut cfg = base_cfg();
        cfg.min_rx_interval = 0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::InvalidInterval("min-rx-interval"))
        );
    }

    #[test]
    fn validate_rejects_mixed_families() {
        let mut cfg = base_cfg();
        cfg.source = Some("2001:db8::1".parse().unwrap());
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::AddressFamilyMismatch(..))
        ));
    }
}
