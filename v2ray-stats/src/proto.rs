//! Protobuf messages of the `StatsService` command API.
//!
//! Field numbers follow `app/stats/command/command.proto`, which is shared by
//! V2Ray and Xray. Only the fields read or written by the exporter are modeled;
//! unknown fields are skipped by the decoder.

/// Request for `QueryStats`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryStatsRequest {
    /// Substring filter on counter names. Empty matches all counters.
    #[prost(string, tag = "1")]
    pub pattern: ::prost::alloc::string::String,
    /// Reset counters to zero after reading them.
    #[prost(bool, tag = "2")]
    pub reset: bool,
}

/// A single named counter.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Stat {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(int64, tag = "2")]
    pub value: i64,
}

/// Response for `QueryStats`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryStatsResponse {
    #[prost(message, repeated, tag = "1")]
    pub stat: ::prost::alloc::vec::Vec<Stat>,
}

/// Request for `GetSysStats`.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SysStatsRequest {}

/// Response for `GetSysStats`: Go runtime statistics of the proxy process.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SysStatsResponse {
    #[prost(uint32, tag = "1")]
    pub num_goroutine: u32,
    #[prost(uint32, tag = "2")]
    pub num_gc: u32,
    #[prost(uint64, tag = "3")]
    pub alloc: u64,
    #[prost(uint64, tag = "4")]
    pub total_alloc: u64,
    #[prost(uint64, tag = "5")]
    pub sys: u64,
    #[prost(uint64, tag = "6")]
    pub mallocs: u64,
    #[prost(uint64, tag = "7")]
    pub frees: u64,
    #[prost(uint64, tag = "8")]
    pub live_objects: u64,
    #[prost(uint64, tag = "9")]
    pub pause_total_ns: u64,
    #[prost(uint32, tag = "10")]
    pub uptime: u32,
}
