//! Config data model: `spec.md` §3's `RoomConfig`, `OverridableConfig` and
//! `Config` snapshot, plus the merge rules that turn a `(room, platform)`
//! pair into a fully-specialized `ResolvedConfig`.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Selects a stream variant out of the ones an adapter reports.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamPreference {
    pub quality: Option<String>,
    #[serde(default)]
    pub attributes: Option<HashMap<String, String>>,
}

impl StreamPreference {
    /// Deep merge per spec: child keys override parent keys; an empty
    /// string value in `child.attributes` means "remove this key".
    fn merge(parent: &StreamPreference, child: &StreamPreference) -> StreamPreference {
        let quality = child.quality.clone().or_else(|| parent.quality.clone());
        let attributes = match (&parent.attributes, &child.attributes) {
            (None, None) => None,
            (Some(p), None) => Some(p.clone()),
            (None, Some(c)) => Some(c.clone()),
            (Some(p), Some(c)) => {
                let mut merged = p.clone();
                for (k, v) in c {
                    if v.is_empty() {
                        merged.remove(k);
                    } else {
                        merged.insert(k.clone(), v.clone());
                    }
                }
                Some(merged)
            }
        };
        StreamPreference { quality, attributes }
    }
}

/// Optional-per-field override bag. Absent fields fall through to the
/// parent layer in the global → platform → room merge.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OverridableConfig {
    pub interval_sec: Option<i64>,
    pub output_path: Option<PathBuf>,
    pub ffmpeg_path: Option<String>,
    pub log: Option<String>,
    pub feature: Option<String>,
    pub output_tmpl: Option<String>,
    pub split_strategies: Option<Vec<String>>,
    pub on_record_finished: Option<String>,
    pub timeout_us: Option<i64>,
    pub max_duration_sec: Option<i64>,
    pub stream_preference: Option<StreamPreference>,
}

impl OverridableConfig {
    /// `parent ← child`: present child fields replace; absent ones keep
    /// the parent's value. `stream_preference` merges deeply.
    pub fn merge(parent: &OverridableConfig, child: &OverridableConfig) -> OverridableConfig {
        OverridableConfig {
            interval_sec: child.interval_sec.or(parent.interval_sec),
            output_path: child.output_path.clone().or_else(|| parent.output_path.clone()),
            ffmpeg_path: child.ffmpeg_path.clone().or_else(|| parent.ffmpeg_path.clone()),
            log: child.log.clone().or_else(|| parent.log.clone()),
            feature: child.feature.clone().or_else(|| parent.feature.clone()),
            output_tmpl: child.output_tmpl.clone().or_else(|| parent.output_tmpl.clone()),
            split_strategies: child
                .split_strategies
                .clone()
                .or_else(|| parent.split_strategies.clone()),
            on_record_finished: child
                .on_record_finished
                .clone()
                .or_else(|| parent.on_record_finished.clone()),
            timeout_us: child.timeout_us.or(parent.timeout_us),
            max_duration_sec: child.max_duration_sec.or(parent.max_duration_sec),
            stream_preference: match (&parent.stream_preference, &child.stream_preference) {
                (None, None) => None,
                (Some(p), None) => Some(p.clone()),
                (None, Some(c)) => Some(c.clone()),
                (Some(p), Some(c)) => Some(StreamPreference::merge(p, c)),
            },
        }
    }
}

/// A persisted room entry. Identity for persistence is `url`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoomConfig {
    pub url: String,
    #[serde(default = "default_listening")]
    pub listening: bool,
    pub quality: Option<i32>,
    #[serde(default)]
    pub audio_only: bool,
    pub nick: Option<String>,
    #[serde(default)]
    pub overrides: OverridableConfig,
}

fn default_listening() -> bool {
    true
}

/// Deserialization-only shape so a `live_rooms` entry may be a bare URL
/// string (shorthand for `{url, listening: true}`) or a full object.
#[derive(Deserialize)]
#[serde(untagged)]
enum RoomConfigRepr {
    Bare(String),
    Full(RoomConfig),
}

impl From<RoomConfigRepr> for RoomConfig {
    fn from(repr: RoomConfigRepr) -> Self {
        match repr {
            RoomConfigRepr::Bare(url) => RoomConfig {
                url,
                listening: true,
                quality: None,
                audio_only: false,
                nick: None,
                overrides: OverridableConfig::default(),
            },
            RoomConfigRepr::Full(r) => r,
        }
    }
}

pub(crate) fn deserialize_rooms<'de, D>(deserializer: D) -> Result<Vec<RoomConfig>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let reprs = Vec::<RoomConfigRepr>::deserialize(deserializer)?;
    Ok(reprs.into_iter().map(RoomConfig::from).collect())
}

/// Per-platform defaults plus its rate-limit interval.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformOverrideConfig {
    #[serde(flatten)]
    pub overrides: OverridableConfig,
    pub min_access_interval_sec: Option<i64>,
}

/// Concrete, fully-resolved settings for one room after the global →
/// platform → room merge. Every field here is required at the point of
/// use (scheduler interval, recorder launch args, etc.).
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedConfig {
    pub interval_sec: i64,
    pub output_path: PathBuf,
    pub ffmpeg_path: String,
    pub log: Option<String>,
    pub feature: Option<String>,
    pub output_tmpl: String,
    pub split_strategies: Vec<String>,
    pub on_record_finished: Option<String>,
    pub timeout_us: i64,
    pub max_duration_sec: i64,
    pub stream_preference: StreamPreference,
    pub quality: Option<i32>,
    pub audio_only: bool,
    pub nick: Option<String>,
}

/// Rooms' and platforms' concrete base layer. Unlike `OverridableConfig`
/// every field here must be present; a fresh `Config` seeds this with
/// sane defaults so `resolve()` never has to invent a value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalDefaults {
    pub interval_sec: i64,
    pub output_path: PathBuf,
    pub ffmpeg_path: String,
    pub log: Option<String>,
    pub feature: Option<String>,
    pub output_tmpl: String,
    #[serde(default)]
    pub split_strategies: Vec<String>,
    pub on_record_finished: Option<String>,
    #[serde(default = "default_timeout_us")]
    pub timeout_us: i64,
    /// Longest a single recording file may run before the split policy
    /// rolls it over, in seconds. `0` disables duration-based splitting;
    /// any positive value below 60 is rejected by `verify` as almost
    /// certainly a unit mistake.
    #[serde(default)]
    pub max_duration_sec: i64,
    #[serde(default)]
    pub stream_preference: StreamPreference,
}

fn default_timeout_us() -> i64 {
    60_000_000
}

impl Default for GlobalDefaults {
    fn default() -> Self {
        GlobalDefaults {
            interval_sec: 30,
            output_path: PathBuf::from("./recordings"),
            ffmpeg_path: "ffmpeg".to_string(),
            log: None,
            feature: None,
            output_tmpl: "{host_name}/{room_name}/%Y-%m-%d %H-%M-%S".to_string(),
            split_strategies: Vec::new(),
            on_record_finished: None,
            timeout_us: default_timeout_us(),
            max_duration_sec: 0,
            stream_preference: StreamPreference::default(),
        }
    }
}

impl GlobalDefaults {
    fn as_overridable(&self) -> OverridableConfig {
        OverridableConfig {
            interval_sec: Some(self.interval_sec),
            output_path: Some(self.output_path.clone()),
            ffmpeg_path: Some(self.ffmpeg_path.clone()),
            log: self.log.clone(),
            feature: self.feature.clone(),
            output_tmpl: Some(self.output_tmpl.clone()),
            split_strategies: Some(self.split_strategies.clone()),
            on_record_finished: self.on_record_finished.clone(),
            timeout_us: Some(self.timeout_us),
            max_duration_sec: Some(self.max_duration_sec),
            stream_preference: Some(self.stream_preference.clone()),
        }
    }
}

/// RPC (HTTP/SSE surface) settings. The surface itself is out of scope;
/// only its config-verification rule ("RPC bind invalid") is in scope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_enabled")]
    pub enabled: bool,
    #[serde(default = "default_rpc_bind")]
    pub bind: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        // A freshly-initialized config has no rooms yet; leaving rpc
        // disabled too would make it rejected by `verify`'s "something
        // for the supervisor to do" rule before a single room is ever
        // added through it.
        RpcConfig {
            enabled: default_rpc_enabled(),
            bind: default_rpc_bind(),
        }
    }
}

fn default_rpc_enabled() -> bool {
    true
}

fn default_rpc_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// Resolves `(room, platform_key)` into a `ResolvedConfig` by the
/// global ← platform ← room merge rule in spec.md §4.A.
pub fn resolve(
    defaults: &GlobalDefaults,
    platform_overrides: &HashMap<String, PlatformOverrideConfig>,
    room: &RoomConfig,
    platform_key: &str,
) -> ResolvedConfig {
    let mut merged = defaults.as_overridable();
    if let Some(p) = platform_overrides.get(platform_key) {
        merged = OverridableConfig::merge(&merged, &p.overrides);
    }
    merged = OverridableConfig::merge(&merged, &room.overrides);

    ResolvedConfig {
        interval_sec: merged.interval_sec.unwrap_or(defaults.interval_sec),
        output_path: merged.output_path.unwrap_or_else(|| defaults.output_path.clone()),
        ffmpeg_path: merged.ffmpeg_path.unwrap_or_else(|| defaults.ffmpeg_path.clone()),
        log: merged.log,
        feature: merged.feature,
        output_tmpl: merged.output_tmpl.unwrap_or_else(|| defaults.output_tmpl.clone()),
        split_strategies: merged.split_strategies.unwrap_or_default(),
        on_record_finished: merged.on_record_finished,
        timeout_us: merged.timeout_us.unwrap_or(defaults.timeout_us),
        stream_preference: merged.stream_preference.unwrap_or_default(),
        quality: room.quality,
        audio_only: room.audio_only,
        nick: room.nick.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overridable(interval: Option<i64>) -> OverridableConfig {
        OverridableConfig {
            interval_sec: interval,
            ..Default::default()
        }
    }

    #[test]
    fn merge_prefers_child_when_present() {
        let parent = overridable(Some(30));
        let child = overridable(Some(10));
        assert_eq!(OverridableConfig::merge(&parent, &child).interval_sec, Some(10));
    }

    #[test]
    fn merge_falls_back_to_parent_when_child_absent() {
        let parent = overridable(Some(30));
        let child = overridable(None);
        assert_eq!(OverridableConfig::merge(&parent, &child).interval_sec, Some(30));
    }

    #[test]
    fn stream_preference_attribute_merge_removes_empty_string_keys() {
        let mut parent_attrs = HashMap::new();
        parent_attrs.insert("codec".to_string(), "h264".to_string());
        parent_attrs.insert("fps".to_string(), "30".to_string());
        let mut child_attrs = HashMap::new();
        child_attrs.insert("codec".to_string(), "av1".to_string());
        child_attrs.insert("fps".to_string(), String::new());

        let parent = StreamPreference {
            quality: None,
            attributes: Some(parent_attrs),
        };
        let child = StreamPreference {
            quality: None,
            attributes: Some(child_attrs),
        };
        let merged = StreamPreference::merge(&parent, &child);
        let attrs = merged.attributes.unwrap();
        assert_eq!(attrs.get("codec"), Some(&"av1".to_string()));
        assert_eq!(attrs.get("fps"), None);
    }

    #[test]
    fn resolve_applies_three_layer_merge() {
        let defaults = GlobalDefaults {
            interval_sec: 30,
            ..Default::default()
        };
        let mut platform_overrides = HashMap::new();
        platform_overrides.insert(
            "bilibili".to_string(),
            PlatformOverrideConfig {
                overrides: overridable(Some(15)),
                min_access_interval_sec: Some(1),
            },
        );
        let room = RoomConfig {
            url: "https://live.bilibili.com/1".to_string(),
            listening: true,
            quality: Some(10000),
            audio_only: false,
            nick: None,
            overrides: OverridableConfig::default(),
        };
        let resolved = resolve(&defaults, &platform_overrides, &room, "bilibili");
        assert_eq!(resolved.interval_sec, 15);
        assert_eq!(resolved.quality, Some(10000));
    }

    #[test]
    fn bare_room_url_shorthand_deserializes_as_listening() {
        let yaml = "- https://live.bilibili.com/123\n";
        let reprs: Vec<RoomConfigRepr> = serde_yaml::from_str(yaml).unwrap();
        let rooms: Vec<RoomConfig> = reprs.into_iter().map(RoomConfig::from).collect();
        assert_eq!(rooms.len(), 1);
        assert!(rooms[0].listening);
        assert_eq!(rooms[0].url, "https://live.bilibili.com/123");
    }
}
