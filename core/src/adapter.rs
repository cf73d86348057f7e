//! The contract this supervisor requires of a per-platform adapter, and
//! the volatile room data it produces. Real scraping adapters (one per
//! of the ~20 supported platforms) are out of scope for this crate; only
//! the trait and two deterministic test doubles live here.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::types::{RoomConfig, StreamPreference};
use crate::ids::RoomId;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum StreamFormat {
    #[default]
    Flv,
    Hls,
    Ts,
    Other,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum StreamCodec {
    #[default]
    H264,
    H265,
    Av1,
    Other,
}

/// One of possibly many stream URLs for a room, distinguished by
/// quality/format/codec/attributes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamVariant {
    pub url: String,
    pub format: StreamFormat,
    pub codec: StreamCodec,
    pub quality_label: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bitrate: Option<u32>,
    pub framerate: Option<f32>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub is_placeholder: bool,
}

/// Volatile, cached per-room info. Latest successful info is retained
/// across failures; a failure only overwrites `last_error`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room_id: String,
    pub host_name: String,
    pub room_name: String,
    pub is_live: bool,
    pub is_initializing: bool,
    pub audio_only: bool,
    #[serde(default)]
    pub last_error: String,
    #[serde(default)]
    pub available_streams: Vec<StreamVariant>,
    pub available_streams_at: i64,
    pub last_start_time: i64,
}

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("room url is not valid for this platform")]
    RoomUrlIncorrect,
    #[error("room no longer exists")]
    RoomNotExist,
    #[error("operation not implemented by this adapter")]
    NotImplemented,
    #[error("cancelled")]
    Cancelled,
    #[error("adapter io error: {0}")]
    Io(String),
}

/// The adapter contract a per-platform scraper must implement. Adapters
/// themselves (HTML/JSON parsing per host) are out of scope; this trait
/// is the seam real implementations plug into.
#[async_trait]
pub trait RoomAdapter: Send + Sync {
    async fn get_info(&self) -> Result<RoomInfo, AdapterError>;
    async fn get_stream_variants(&self) -> Result<Vec<StreamVariant>, AdapterError>;
    fn get_platform_name(&self) -> &str;
    fn update_options(&self, room_config: &RoomConfig);
    async fn close(&self);
}

/// Picks the stream variant the client-side selector would choose: exact
/// quality match first, then attribute match, then the first
/// non-placeholder variant.
pub fn select_variant<'a>(
    variants: &'a [StreamVariant],
    pref: &StreamPreference,
) -> Option<&'a StreamVariant> {
    if let Some(quality) = &pref.quality {
        if let Some(v) = variants.iter().find(|v| &v.quality_label == quality) {
            return Some(v);
        }
    }
    if let Some(attrs) = &pref.attributes {
        if let Some(v) = variants.iter().find(|v| {
            attrs
                .iter()
                .all(|(k, val)| v.attributes.get(k).is_some_and(|have| have == val))
        }) {
            return Some(v);
        }
    }
    variants.iter().find(|v| !v.is_placeholder)
}

/// Deterministic test doubles. Not behind `#[cfg(test)]` because they are
/// also used by `roomwatch-core`'s own integration tests under `tests/`,
/// which compile as a separate crate.
pub mod test_support {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// An adapter whose responses are a pre-programmed queue; each
    /// `get_info` call pops the next entry and repeats the last one once
    /// the queue is drained, so tests can script a liveness transition.
    pub struct StubAdapter {
        platform: String,
        queue: Mutex<VecDeque<Result<RoomInfo, AdapterError>>>,
        last: Mutex<Result<RoomInfo, AdapterError>>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl StubAdapter {
        pub fn new(platform: impl Into<String>, script: Vec<Result<RoomInfo, AdapterError>>) -> Self {
            StubAdapter {
                platform: platform.into(),
                queue: Mutex::new(script.into()),
                last: Mutex::new(Ok(RoomInfo::default())),
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RoomAdapter for StubAdapter {
        async fn get_info(&self) -> Result<RoomInfo, AdapterError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let next = self.queue.lock().unwrap().pop_front();
            let result = next.unwrap_or_else(|| self.last.lock().unwrap().clone_result());
            *self.last.lock().unwrap() = result.clone_result();
            result
        }

        async fn get_stream_variants(&self) -> Result<Vec<StreamVariant>, AdapterError> {
            match self.get_info().await {
                Ok(info) => Ok(info.available_streams),
                Err(e) => Err(e),
            }
        }

        fn get_platform_name(&self) -> &str {
            &self.platform
        }

        fn update_options(&self, _room_config: &RoomConfig) {}

        async fn close(&self) {}
    }

    /// Tiny helper trait so `Result<RoomInfo, AdapterError>` (whose error
    /// type isn't `Clone`) can still be "replayed" by the stub.
    trait CloneResult {
        fn clone_result(&self) -> Result<RoomInfo, AdapterError>;
    }

    impl CloneResult for Result<RoomInfo, AdapterError> {
        fn clone_result(&self) -> Result<RoomInfo, AdapterError> {
            match self {
                Ok(info) => Ok(info.clone()),
                Err(e) => Err(match e {
                    AdapterError::RoomUrlIncorrect => AdapterError::RoomUrlIncorrect,
                    AdapterError::RoomNotExist => AdapterError::RoomNotExist,
                    AdapterError::NotImplemented => AdapterError::NotImplemented,
                    AdapterError::Cancelled => AdapterError::Cancelled,
                    AdapterError::Io(s) => AdapterError::Io(s.clone()),
                }),
            }
        }
    }

    /// An adapter that always reports the room as offline; used as the
    /// default for rooms whose real platform isn't wired up yet.
    pub struct PlaceholderAdapter {
        platform: String,
    }

    impl PlaceholderAdapter {
        pub fn new(platform: impl Into<String>) -> Self {
            PlaceholderAdapter {
                platform: platform.into(),
            }
        }
    }

    #[async_trait]
    impl RoomAdapter for PlaceholderAdapter {
        async fn get_info(&self) -> Result<RoomInfo, AdapterError> {
            Ok(RoomInfo {
                is_live: false,
                ..Default::default()
            })
        }

        async fn get_stream_variants(&self) -> Result<Vec<StreamVariant>, AdapterError> {
            Ok(Vec::new())
        }

        fn get_platform_name(&self) -> &str {
            &self.platform
        }

        fn update_options(&self, _room_config: &RoomConfig) {}

        async fn close(&self) {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(label: &str, placeholder: bool) -> StreamVariant {
        StreamVariant {
            quality_label: label.into(),
            is_placeholder: placeholder,
            ..Default::default()
        }
    }

    #[test]
    fn select_variant_prefers_quality_match() {
        let variants = vec![variant("480p", false), variant("1080p", false)];
        let pref = StreamPreference {
            quality: Some("1080p".into()),
            attributes: None,
        };
        assert_eq!(select_variant(&variants, &pref).unwrap().quality_label, "1080p");
    }

    #[test]
    fn select_variant_falls_back_to_first_non_placeholder() {
        let variants = vec![variant("480p", true), variant("720p", false)];
        let pref = StreamPreference {
            quality: Some("missing".into()),
            attributes: None,
        };
        assert_eq!(select_variant(&variants, &pref).unwrap().quality_label, "720p");
    }

    #[test]
    fn select_variant_matches_on_attributes() {
        let mut high = variant("high", false);
        high.attributes.insert("codec".into(), "av1".into());
        let variants = vec![variant("low", false), high];
        let mut attrs = HashMap::new();
        attrs.insert("codec".into(), "av1".into());
        let pref = StreamPreference {
            quality: None,
            attributes: Some(attrs),
        };
        assert_eq!(select_variant(&variants, &pref).unwrap().quality_label, "high");
    }
}
