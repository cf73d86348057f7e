//! On-disk YAML representation of the configuration snapshot, and the
//! load/save/verify operations `ConfigStore` drives.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::platform_key::platform_key_for_url;
use super::types::{GlobalDefaults, PlatformOverrideConfig, RoomConfig, RpcConfig};

/// The full configuration snapshot, as persisted to and loaded from
/// `config.yaml`. `version` is the CAS token `ConfigStore::update_cas`
/// checks against; it is bumped on every successful write, never by a
/// hand edit of the file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub defaults: GlobalDefaults,
    #[serde(default, rename = "platform_configs")]
    pub platform_overrides: HashMap<String, PlatformOverrideConfig>,
    #[serde(default, rename = "live_rooms", deserialize_with = "super::types::deserialize_rooms")]
    pub rooms: Vec<RoomConfig>,
    #[serde(default)]
    pub rpc: RpcConfig,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("writing config file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("parsing config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("serializing config: {0}")]
    Serialize(#[source] serde_yaml::Error),
    #[error("config invalid: {0}")]
    Invalid(String),
}

const FILE_HEADER: &str = "\
# Recording supervisor configuration.
#
# `version` is maintained by the supervisor itself; do not edit it by
# hand, changes made while the process is running may be overwritten.
# `live_rooms` entries may be a bare URL string (shorthand for
# `{url, listening: true}`) or a full mapping.
";

pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let config: Config = serde_yaml::from_str(&data).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    verify(&config)?;
    Ok(config)
}

/// Writes `config` to `path` atomically: serialize to a sibling `.tmp`
/// file, `fsync`, then rename over the destination. A crash mid-write
/// never leaves `path` truncated or partially written.
pub fn save(path: &Path, config: &Config) -> Result<(), ConfigError> {
    verify(config)?;
    let body = serde_yaml::to_string(config).map_err(ConfigError::Serialize)?;
    let rendered = format!("{FILE_HEADER}\n{body}");

    let tmp_path = path.with_extension("yaml.tmp");
    {
        use std::io::Write;
        let mut f = std::fs::File::create(&tmp_path).map_err(|source| ConfigError::Write {
            path: tmp_path.display().to_string(),
            source,
        })?;
        f.write_all(rendered.as_bytes())
            .map_err(|source| ConfigError::Write {
                path: tmp_path.display().to_string(),
                source,
            })?;
        f.sync_all().map_err(|source| ConfigError::Write {
            path: tmp_path.display().to_string(),
            source,
        })?;
    }
    std::fs::rename(&tmp_path, path).map_err(|source| ConfigError::Write {
        path: path.display().to_string(),
        source,
    })?;
    Ok(())
}

/// Structural validation performed before a snapshot is ever published:
/// every room URL must parse (and thus resolve to a platform key); the
/// RPC bind address, if enabled, must parse as `host:port`; polling
/// interval and output path defaults must be usable; `max_duration_sec`
/// must be either disabled (`0`) or at least a minute; listening with
/// RPC disabled and no rooms configured would leave nothing to do; and
/// every platform override is held to the same interval/duration/path
/// rules as the defaults it sits on top of.
pub fn verify(config: &Config) -> Result<(), ConfigError> {
    for room in &config.rooms {
        if platform_key_for_url(&room.url).is_none() {
            return Err(ConfigError::Invalid(format!(
                "room url {:?} does not parse",
                room.url
            )));
        }
    }
    if config.rpc.enabled && config.rpc.bind.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::Invalid(format!(
            "rpc.bind {:?} is not a valid socket address",
            config.rpc.bind
        )));
    }

    if config.defaults.interval_sec <= 0 {
        return Err(ConfigError::Invalid(format!(
            "defaults.interval_sec must be positive, got {}",
            config.defaults.interval_sec
        )));
    }
    if config.defaults.output_path.as_os_str().is_empty() {
        return Err(ConfigError::Invalid(
            "defaults.output_path must not be empty".to_string(),
        ));
    }
    if !max_duration_ok(config.defaults.max_duration_sec) {
        return Err(ConfigError::Invalid(format!(
            "defaults.max_duration_sec must be 0 or at least 60, got {}",
            config.defaults.max_duration_sec
        )));
    }
    if !config.rpc.enabled && config.rooms.is_empty() {
        return Err(ConfigError::Invalid(
            "no rooms configured and rpc is disabled, nothing for the supervisor to do".to_string(),
        ));
    }

    for (platform, override_config) in &config.platform_overrides {
        let overrides = &override_config.overrides;
        if let Some(interval_sec) = overrides.interval_sec {
            if interval_sec <= 0 {
                return Err(ConfigError::Invalid(format!(
                    "platform_configs[{platform:?}].interval_sec must be positive, got {interval_sec}"
                )));
            }
        }
        if let Some(max_duration_sec) = overrides.max_duration_sec {
            if !max_duration_ok(max_duration_sec) {
                return Err(ConfigError::Invalid(format!(
                    "platform_configs[{platform:?}].max_duration_sec must be 0 or at least 60, got {max_duration_sec}"
                )));
            }
        }
        if let Some(output_path) = &overrides.output_path {
            if !output_path.exists() {
                return Err(ConfigError::Invalid(format!(
                    "platform_configs[{platform:?}].output_path {output_path:?} does not exist"
                )));
            }
        }
    }

    Ok(())
}

/// `0` disables duration-based splitting; anything below a minute is
/// almost certainly a seconds/minutes mix-up rather than an intentional
/// setting.
fn max_duration_ok(secs: i64) -> bool {
    secs == 0 || secs >= 60
}
