//! edgestat-scheduler — serializes refresh cycles.
//!
//! Every trigger, whether an HTTP request or the background timer, goes
//! through one queue drained by one worker task, so at most one refresh
//! cycle touches the snapshot file at a time.
//!
//! # Architecture
//!
//! ```text
//! RefreshScheduler::submit ──► mpsc queue ──► worker ──► Refresh::refresh
//!                                               ▲
//!                       background timer ───────┘ (armed whenever idle)
//! ```

pub mod error;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{Refresh, RefreshFuture, RefreshScheduler, SchedulerConfig, SchedulerState};
