//! gRPC client for the V2Ray / Xray `StatsService`.
//!
//! The client keeps one long-lived channel to the stats API and exposes two
//! calls: listing named traffic counters and fetching runtime statistics.
//!
//! ```no_run
//! use std::time::Duration;
//! use v2ray_stats::{ConnectOptions, StatsClient, StatsSource, with_deadline};
//!
//! # async fn run() -> v2ray_stats::Result<()> {
//! let client = StatsClient::connect("127.0.0.1:8080", ConnectOptions::default()).await?;
//! let samples = with_deadline(Duration::from_secs(3), client.query_stats("", false)).await?;
//! for sample in samples {
//!     println!("{} = {}", sample.name, sample.value);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod proto;
pub mod types;

pub use client::{ApiFlavor, ConnectOptions, StatsClient, StatsSource, with_deadline};
pub use error::{Result, StatsError};
pub use types::{CounterSample, SysStats};
