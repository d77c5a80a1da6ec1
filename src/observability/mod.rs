//! Structured logging for the SSO service.
//!
//! Console output is configurable (pretty, compact or JSON) and filtered through
//! `RUST_LOG` or the `[observability.logging]` config section.

mod tracing_init;

pub use tracing_init::*;
