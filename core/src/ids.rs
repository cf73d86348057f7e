//! Stable opaque room identity.
//!
//! `RoomId` starts out URL-derived (an MD5 digest of `host+path`, matching
//! the real bililive/streamlink-style tools this supervisor is modeled
//! on) and may later be overridden with a platform-native id once an
//! adapter resolves one; see `registry::Registry::rename`.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct RoomId(String);

impl RoomId {
    /// Derives a stable id from a room URL by hashing `host+path`, per the
    /// "RoomID (runtime)" data model: the registry key before any
    /// platform adapter has assigned a native id.
    pub fn from_url(url: &str) -> Result<Self, url::ParseError> {
        let parsed = url::Url::parse(url)?;
        let host = parsed.host_str().unwrap_or("");
        let path = parsed.path();
        let digest = md5::compute(format!("{host}{path}"));
        Ok(RoomId(format!("{digest:x}")))
    }

    /// Wraps a platform-native id, e.g. one returned by an adapter after
    /// its first successful `get_info`.
    pub fn native(id: impl Into<String>) -> Self {
        RoomId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoomId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_url_is_deterministic() {
        let a = RoomId::from_url("https://live.bilibili.com/123").unwrap();
        let b = RoomId::from_url("https://live.bilibili.com/123").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn from_url_distinguishes_paths() {
        let a = RoomId::from_url("https://live.bilibili.com/123").unwrap();
        let b = RoomId::from_url("https://live.bilibili.com/456").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn native_round_trips_through_as_str() {
        let id = RoomId::native("custom_live_id");
        assert_eq!(id.as_str(), "custom_live_id");
    }
}
