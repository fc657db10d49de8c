//! edgestat-upstream — the three upstream calls a refresh cycle depends on.
//!
//! [`Upstream`] is the seam: [`HttpUpstream`] talks to the real API,
//! tests inject their own implementation.

pub mod client;
pub mod error;

pub use client::{HttpUpstream, HttpUpstreamConfig, Upstream, UpstreamFuture};
pub use error::{UpstreamError, UpstreamResult};
