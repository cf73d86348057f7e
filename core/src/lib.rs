//! The room-scheduling and recording-lifecycle core of a multi-platform
//! live-stream recording supervisor: a per-room polling scheduler with
//! platform-wide rate limiting, at-most-once listener/recorder state
//! machines keyed by room identity, and a live-reconfigurable,
//! version-controlled configuration store that feeds them.
//!
//! Per-platform scraping, the external downloader process, the HTTP/SSE
//! surface and notifications are modeled only as the interfaces this
//! crate requires of them ([`adapter::RoomAdapter`],
//! [`recorder::Downloader`]); real implementations live outside this
//! crate.

pub mod adapter;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod ids;
pub mod listener;
pub mod rate_limiter;
pub mod reconciler;
pub mod recorder;
pub mod registry;
pub mod room;
pub mod supervisor;

pub use error::{CoreError, CoreResult};
pub use ids::RoomId;
