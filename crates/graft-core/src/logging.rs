//! Logging facilities for graft.
//!
//! graft uses the `tracing` crate for instrumentation. To see logs, install
//! a subscriber in your application:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("graft::model=debug")
//!     .init();
//! ```
//!
//! Mount, unmount, reset and sort operations log at `debug`. Translation of
//! individual source notifications logs at `trace`.

/// Span names used throughout graft for tracing.
pub mod span_names {
    /// Proxy reset span.
    pub const RESET: &str = "graft::reset";
    /// Mapping relocation after a layout change.
    pub const RELOCATE: &str = "graft::relocate";
}

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core crate target.
    pub const CORE: &str = "graft_core";
    /// Signal/slot system target.
    pub const SIGNAL: &str = "graft_core::signal";
    /// Merging proxy target.
    pub const MERGING: &str = "graft::model::merging";
    /// Mounting proxy target.
    pub const MOUNTING: &str = "graft::model::mounting";
    /// Source mapping and column mapping target.
    pub const MAPPING: &str = "graft::model::mapping";
    /// Performance span target.
    pub const PERF: &str = "graft::perf";
}

/// A guard that keeps a performance span entered until dropped.
#[derive(Debug)]
pub struct PerfSpan {
    _span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create a new performance span.
    ///
    /// The span will be active until the guard is dropped.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: "graft::perf", "perf", operation = name);
        Self {
            _span: span.entered(),
        }
    }
}
