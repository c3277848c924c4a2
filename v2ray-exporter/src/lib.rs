//! Prometheus exporter for V2Ray / Xray traffic statistics.
//!
//! Every scrape of the HTTP endpoint triggers one query against the proxy's
//! `StatsService`; the returned counters are mapped onto per-inbound,
//! per-outbound and per-user traffic gauges and rendered in the text
//! exposition format.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  StatsService   │<────│    Exporter     │<────│   HTTP Server   │
//! │  (gRPC, V2Ray)  │────>│ (map + publish) │────>│    (/scrape)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! v2ray-exporter --v2ray-endpoint 127.0.0.1:10085 --listen :9550
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod config;
pub mod exporter;
pub mod http;
pub mod logging;
pub mod mapping;

pub use config::ExporterConfig;
pub use exporter::{Exporter, ExporterError, LastScrape, ScrapeReport};
pub use http::{HttpServer, create_router};
pub use logging::init_tracing;
pub use mapping::{LabeledMetricValue, TrafficFamily, map_samples, parse_stat_name};
