//
// Copyright (c) The Vigil Project Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::Deserialize;
use vigil_bfd::config::SessionCfg;

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub dump_file: String,
    pub logging: Logging,
    pub consumers: Consumers,
    pub sessions: Vec<SessionCfg>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    pub file: LoggingFile,
    pub stdout: LoggingStdout,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingFile {
    pub enabled: bool,
    pub dir: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingStdout {
    pub enabled: bool,
    pub style: LoggingFmtStyle,
    pub colors: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingFmtStyle {
    #[default]
    Compact,
    Full,
    Json,
    Pretty,
}

// Consumer processes fed by the BFD event emitter.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Consumers {
    pub vrrp: Consumer,
    pub checker: Consumer,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Consumer {
    pub enabled: bool,
    pub socket: String,
}

// Configuration loading errors.
#[derive(Debug)]
pub enum ConfigLoadError {
    Read(std::io::Error),
    Parse(toml::de::Error),
}

// ===== impl Config =====

impl Config {
    pub(crate) const DFLT_FILEPATH: &'static str = "/etc/vigild.toml";

    pub(crate) fn load(config_file: Option<&str>) -> Config {
        let path = config_file.unwrap_or(Config::DFLT_FILEPATH);
        match Config::try_load(path) {
            Ok(config) => config,
            Err(error) => {
                eprintln!(
                    "failed to load configuration file {path}: {error}"
                );
                eprintln!("falling back to default configuration");
                Config::default()
            }
        }
    }

    pub(crate) fn try_load(path: &str) -> Result<Config, ConfigLoadError> {
        let contents =
            std::fs::read_to_string(path).map_err(ConfigLoadError::Read)?;
        toml::from_str(&contents).map_err(ConfigLoadError::Parse)
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            dump_file: "/tmp/vigild.data".to_owned(),
            logging: Default::default(),
            consumers: Default::default(),
            sessions: Vec::new(),
        }
    }
}

// ===== impl LoggingFile =====

impl Default for LoggingFile {
    fn default() -> LoggingFile {
        LoggingFile {
            enabled: false,
            dir: "/var/log".to_owned(),
            name: "vigild.log".to_owned(),
        }
    }
}

// ===== impl LoggingStdout =====

impl Default for LoggingStdout {
    fn default() -> LoggingStdout {
        LoggingStdout {
            enabled: true,
            style: Default::default(),
            colors: false,
        }
    }
}

// ===== impl ConfigLoadError =====

impl std::fmt::Display for ConfigLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigLoadError::Read(error) => {
                write!(f, "failed to read file: {error}")
            }
            ConfigLoadError::Parse(error) => {
                write!(f, "failed to parse file: {error}")
            }
        }
    }
}

impl std::error::Error for ConfigLoadError {}
