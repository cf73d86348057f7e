//! Shared, domain-independent utilities used by the rest of the workspace:
//! a testable clock abstraction, graceful-shutdown plumbing, and the
//! tracing subscriber installer.

pub mod clock;
pub mod error;
pub mod shutdown;
pub mod tracing_setup;

pub use error::{Error, ErrorKind};
