//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub datastore: Datastore,
    pub yang: Yang,
    pub logging: Logging,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Datastore {
    pub dir: String,
    pub record_modstate: bool,
    pub changelog_file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Yang {
    pub search_paths: Vec<String>,
    pub modules: Vec<String>,
    // "module:feature" labels to enable.
    pub features: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    pub stdout: LoggingStdout,
    pub file: LoggingFile,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingStdout {
    pub enabled: bool,
    pub style: LoggingFmtStyle,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingFile {
    pub enabled: bool,
    pub path: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingFmtStyle {
    Compact,
    #[default]
    Full,
    Json,
    Pretty,
}

// ===== impl Config =====

impl Config {
    const DFLT_FILEPATH: &'static str = "/etc/arbord.toml";

    /// Loads the daemon configuration: the explicit `-f` path, the
    /// `ARBOR_CONFIGFILE` environment variable, or the default location.
    /// A parse failure is fatal (exit code 2); a missing file falls back
    /// to compiled-in defaults.
    pub fn load(config_file: Option<&str>) -> Result<Config, String> {
        let env_file = std::env::var("ARBOR_CONFIGFILE").ok();
        let config_file = config_file
            .or(env_file.as_deref())
            .unwrap_or(Config::DFLT_FILEPATH);

        match std::fs::read_to_string(config_file) {
            Ok(config_str) => toml::from_str(&config_str).map_err(|error| {
                format!("failed to parse {config_file}: {error}")
            }),
            Err(error) => {
                eprintln!(
                    "failed to load configuration file {config_file}: {error}"
                );
                eprintln!("falling back to default configuration...");
                Ok(Config::default())
            }
        }
    }
}

// ===== impl Datastore =====

impl Default for Datastore {
    fn default() -> Datastore {
        Datastore {
            dir: "/var/lib/arbor".to_owned(),
            record_modstate: true,
            changelog_file: None,
        }
    }
}

// ===== impl LoggingStdout =====

impl Default for LoggingStdout {
    fn default() -> LoggingStdout {
        LoggingStdout {
            enabled: true,
            style: Default::default(),
        }
    }
}

// ===== impl LoggingFile =====

impl Default for LoggingFile {
    fn default() -> LoggingFile {
        LoggingFile {
            enabled: false,
            path: "/var/log/arbord.log".to_owned(),
        }
    }
}
