//! Core plumbing for graft.
//!
//! This crate provides the pieces the model layer is built on:
//!
//! - **Signal/Slot System**: Type-safe observer connections used by every
//!   model to announce structural changes
//! - **Thread Affinity**: Debug checks that a model is driven from the
//!   thread that created it
//! - **Logging**: Tracing targets and performance spans
//!
//! # Signal/Slot Example
//!
//! ```
//! use graft_core::Signal;
//!
//! let rows_inserted = Signal::<(usize, usize)>::new();
//!
//! let conn_id = rows_inserted.connect(|&(first, last)| {
//!     println!("rows {first}..={last} inserted");
//! });
//!
//! rows_inserted.emit((0, 2));
//! rows_inserted.disconnect(conn_id);
//! ```

pub mod error;
pub mod logging;
mod signal;
pub mod thread_check;

pub use error::{GraftError, Result, SignalError};
pub use logging::PerfSpan;
pub use signal::{ConnectionGuard, ConnectionId, Signal, SignalEmitter};
pub use thread_check::ThreadAffinity;
