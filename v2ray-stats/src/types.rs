//! Domain types produced by the stats client.

use crate::proto;

/// A single named counter as reported by the stats service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSample {
    /// Counter name, e.g. `inbound>>>api>>>traffic>>>uplink`.
    pub name: String,
    /// Counter value.
    pub value: i64,
}

impl CounterSample {
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

impl From<proto::Stat> for CounterSample {
    fn from(stat: proto::Stat) -> Self {
        Self {
            name: stat.name,
            value: stat.value,
        }
    }
}

/// Runtime statistics of the proxy process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SysStats {
    pub uptime_secs: u32,
    pub num_goroutine: u32,
    pub num_gc: u32,
    pub alloc_bytes: u64,
    pub total_alloc_bytes: u64,
    pub sys_bytes: u64,
    pub mallocs: u64,
    pub frees: u64,
    pub live_objects: u64,
    pub pause_total_ns: u64,
}

impl From<proto::SysStatsResponse> for SysStats {
    fn from(r: proto::SysStatsResponse) -> Self {
        Self {
            uptime_secs: r.uptime,
            num_goroutine: r.num_goroutine,
            num_gc: r.num_gc,
            alloc_bytes: r.alloc,
            total_alloc_bytes: r.total_alloc,
            sys_bytes: r.sys,
            mallocs: r.mallocs,
            frees: r.frees,
            live_objects: r.live_objects,
            pause_total_ns: r.pause_total_ns,
        }
    }
}
