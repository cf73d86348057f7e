//! Configuration data model, persistence and the live config store.

pub mod persist;
pub mod platform_key;
pub mod store;
pub mod types;

pub use persist::{Config, ConfigError};
pub use platform_key::platform_key_for_url;
pub use store::{ConfigStore, StoreError};
pub use types::{resolve, GlobalDefaults, OverridableConfig, PlatformOverrideConfig, ResolvedConfig, RoomConfig, RpcConfig, StreamPreference};
