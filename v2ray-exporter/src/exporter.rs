//! The exporter: one collection pass against the stats service per scrape.
//!
//! The registry is built once with every metric family pre-registered, so
//! family metadata is rendered even before the first successful scrape. Each
//! scrape only updates metric handles in place; label values appear lazily
//! and are kept across scrapes.

use std::sync::atomic::AtomicU64;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use thiserror::Error;
use tracing::{debug, warn};
use v2ray_stats::{CounterSample, StatsClient, StatsError, StatsSource, SysStats, with_deadline};

use crate::config::V2rayConfig;
use crate::mapping::{LabeledMetricValue, TrafficFamily, map_samples};

/// Prefix of every metric name.
pub const METRIC_PREFIX: &str = "v2ray";

/// Exporter errors.
#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("Failed to connect to the stats service: {0}")]
    Connection(#[source] StatsError),
    #[error("Scrape timeout must be greater than zero")]
    InvalidTimeout,
    #[error("Failed to encode metrics: {0}")]
    Encode(#[from] std::fmt::Error),
}

/// Single label keyed by [`Entity::label_name`](crate::mapping::Entity::label_name).
type EntityLabels = Vec<(&'static str, String)>;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ErrorLabels {
    kind: String,
}

/// Gauge families for the six traffic directions.
struct TrafficMetrics {
    families: Vec<(TrafficFamily, Family<EntityLabels, Gauge>)>,
}

impl TrafficMetrics {
    fn register(registry: &mut Registry) -> Self {
        let families = TrafficFamily::ALL
            .into_iter()
            .map(|family| {
                let metric = Family::<EntityLabels, Gauge>::default();
                registry.register(family.metric_name(), family.help(), metric.clone());
                (family, metric)
            })
            .collect();

        Self { families }
    }

    /// Set one label's value. `Gauge::set` is a single atomic store.
    fn publish(&self, value: &LabeledMetricValue) {
        let Some((_, metric)) = self.families.iter().find(|(f, _)| *f == value.family) else {
            return;
        };

        let labels = vec![(value.family.entity.label_name(), value.label.clone())];
        metric.get_or_create(&labels).set(value.value);
    }
}

/// Gauges fed from `GetSysStats`.
#[derive(Default)]
struct RuntimeMetrics {
    uptime_seconds: Gauge,
    num_goroutine: Gauge,
    num_gc: Gauge,
    alloc_bytes: Gauge,
    total_alloc_bytes: Gauge,
    sys_bytes: Gauge,
    mallocs: Gauge,
    frees: Gauge,
    live_objects: Gauge,
    pause_total_ns: Gauge,
}

impl RuntimeMetrics {
    fn register(registry: &mut Registry) -> Self {
        let metrics = Self::default();

        registry.register(
            "uptime_seconds",
            "Uptime of the proxy process in seconds",
            metrics.uptime_seconds.clone(),
        );

        let memstats = registry.sub_registry_with_prefix("memstats");
        memstats.register(
            "num_goroutine",
            "Number of goroutines in the proxy process",
            metrics.num_goroutine.clone(),
        );
        memstats.register(
            "num_gc",
            "Number of completed GC cycles",
            metrics.num_gc.clone(),
        );
        memstats.register(
            "alloc_bytes",
            "Bytes of allocated heap objects",
            metrics.alloc_bytes.clone(),
        );
        memstats.register(
            "total_alloc_bytes",
            "Cumulative bytes allocated for heap objects",
            metrics.total_alloc_bytes.clone(),
        );
        memstats.register(
            "sys_bytes",
            "Bytes of memory obtained from the OS",
            metrics.sys_bytes.clone(),
        );
        memstats.register(
            "mallocs",
            "Cumulative count of heap objects allocated",
            metrics.mallocs.clone(),
        );
        memstats.register(
            "frees",
            "Cumulative count of heap objects freed",
            metrics.frees.clone(),
        );
        memstats.register(
            "live_objects",
            "Number of live heap objects",
            metrics.live_objects.clone(),
        );
        memstats.register(
            "pause_total_ns",
            "Cumulative nanoseconds spent in GC stop-the-world pauses",
            metrics.pause_total_ns.clone(),
        );

        metrics
    }

    fn publish(&self, stats: &SysStats) {
        self.uptime_seconds.set(i64::from(stats.uptime_secs));
        self.num_goroutine.set(i64::from(stats.num_goroutine));
        self.num_gc.set(i64::from(stats.num_gc));
        self.alloc_bytes.set(saturating_i64(stats.alloc_bytes));
        self.total_alloc_bytes
            .set(saturating_i64(stats.total_alloc_bytes));
        self.sys_bytes.set(saturating_i64(stats.sys_bytes));
        self.mallocs.set(saturating_i64(stats.mallocs));
        self.frees.set(saturating_i64(stats.frees));
        self.live_objects.set(saturating_i64(stats.live_objects));
        self.pause_total_ns.set(saturating_i64(stats.pause_total_ns));
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Summary of a successful scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeReport {
    /// Counters returned by the stats service.
    pub samples: usize,
    /// Traffic values published to the registry.
    pub published: usize,
    pub duration: Duration,
}

/// Outcome of the most recent scrape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastScrape {
    Never,
    Succeeded(ScrapeReport),
    Failed(String),
}

/// Scrape-driven bridge from the stats service to a Prometheus registry.
pub struct Exporter<S = StatsClient> {
    source: S,
    scrape_timeout: Duration,
    registry: Registry,
    traffic: TrafficMetrics,
    runtime: RuntimeMetrics,
    up: Gauge,
    scrape_duration: Gauge<f64, AtomicU64>,
    scrapes: Counter,
    scrape_errors: Family<ErrorLabels, Counter>,
    last_scrape: Mutex<LastScrape>,
}

impl Exporter<StatsClient> {
    /// Connect to the stats service and build the exporter.
    ///
    /// A connection failure here is fatal to the process.
    pub async fn connect(config: &V2rayConfig) -> Result<Self, ExporterError> {
        let client = StatsClient::connect(&config.endpoint, config.connect_options())
            .await
            .map_err(ExporterError::Connection)?;

        Self::new(client, config.scrape_timeout())
    }
}

impl<S: StatsSource> Exporter<S> {
    /// Build an exporter over an established stats source.
    pub fn new(source: S, scrape_timeout: Duration) -> Result<Self, ExporterError> {
        if scrape_timeout.is_zero() {
            return Err(ExporterError::InvalidTimeout);
        }

        let mut registry = Registry::with_prefix(METRIC_PREFIX);

        let traffic = TrafficMetrics::register(&mut registry);
        let runtime = RuntimeMetrics::register(&mut registry);

        let up = Gauge::default();
        registry.register(
            "up",
            "Whether the last scrape of the stats service succeeded",
            up.clone(),
        );

        let scrape_duration = Gauge::<f64, AtomicU64>::default();
        registry.register(
            "scrape_duration_seconds",
            "Duration of the last scrape of the stats service",
            scrape_duration.clone(),
        );

        let scrapes = Counter::default();
        let scrape_errors = Family::<ErrorLabels, Counter>::default();
        let exporter_registry = registry.sub_registry_with_prefix("exporter");
        exporter_registry.register(
            "scrapes",
            "Scrapes attempted against the stats service",
            scrapes.clone(),
        );
        exporter_registry.register(
            "scrape_errors",
            "Scrapes that failed, by error kind",
            scrape_errors.clone(),
        );

        Ok(Self {
            source,
            scrape_timeout,
            registry,
            traffic,
            runtime,
            up,
            scrape_duration,
            scrapes,
            scrape_errors,
            last_scrape: Mutex::new(LastScrape::Never),
        })
    }

    /// Run one collection pass and publish the results.
    ///
    /// On failure the registry keeps the values of the last successful
    /// scrape; the error is logged and returned for the caller to ignore.
    pub async fn collect(&self) -> Result<ScrapeReport, StatsError> {
        let started = Instant::now();
        self.scrapes.inc();

        let result = with_deadline(self.scrape_timeout, self.fetch()).await;
        let duration = started.elapsed();
        self.scrape_duration.set(duration.as_secs_f64());

        match result {
            Ok((sys, samples)) => {
                let values = map_samples(&samples);
                for value in &values {
                    self.traffic.publish(value);
                }
                self.runtime.publish(&sys);

                let report = ScrapeReport {
                    samples: samples.len(),
                    published: values.len(),
                    duration,
                };
                debug!(
                    samples = report.samples,
                    published = report.published,
                    duration_ms = saturating_millis(duration),
                    "Scrape completed"
                );
                self.record(LastScrape::Succeeded(report));
                Ok(report)
            }
            Err(e) => {
                self.scrape_errors
                    .get_or_create(&ErrorLabels {
                        kind: e.kind().to_string(),
                    })
                    .inc();
                warn!(
                    error = %e,
                    timeout_ms = saturating_millis(self.scrape_timeout),
                    "Scrape failed, serving last known values"
                );
                self.record(LastScrape::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Store the outcome and the matching `up` value under one lock, so
    /// readiness and `v2ray_up` always describe the same scrape.
    fn record(&self, outcome: LastScrape) {
        let mut last = self.last_scrape.lock();
        self.up
            .set(i64::from(matches!(outcome, LastScrape::Succeeded(_))));
        *last = outcome;
    }

    async fn fetch(&self) -> v2ray_stats::Result<(SysStats, Vec<CounterSample>)> {
        let sys = self.source.sys_stats().await?;
        let samples = self.source.query_stats("", false).await?;
        Ok((sys, samples))
    }

    /// Encode the current registry contents in the text exposition format.
    pub fn render(&self) -> Result<String, ExporterError> {
        let mut body = String::new();
        encode(&mut body, &self.registry)?;
        Ok(body)
    }

    pub fn last_scrape(&self) -> LastScrape {
        self.last_scrape.lock().clone()
    }

    /// Ready unless the most recent scrape failed.
    pub fn is_ready(&self) -> bool {
        !matches!(*self.last_scrape.lock(), LastScrape::Failed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FixedSource {
        samples: Mutex<Vec<CounterSample>>,
        fail: AtomicBool,
    }

    impl FixedSource {
        fn new(samples: Vec<CounterSample>) -> Self {
            Self {
                samples: Mutex::new(samples),
                fail: AtomicBool::new(false),
            }
        }
    }

    impl StatsSource for FixedSource {
        async fn query_stats(
            &self,
            _pattern: &str,
            _reset: bool,
        ) -> v2ray_stats::Result<Vec<CounterSample>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StatsError::Unavailable("stats service down".to_string()));
            }
            Ok(self.samples.lock().clone())
        }

        async fn sys_stats(&self) -> v2ray_stats::Result<SysStats> {
            Ok(SysStats {
                uptime_secs: 120,
                num_goroutine: 8,
                ..Default::default()
            })
        }
    }

    fn metric_lines(body: &str) -> Vec<&str> {
        body.lines().filter(|l| !l.starts_with('#')).collect()
    }

    #[tokio::test]
    async fn test_families_rendered_before_first_scrape() {
        let exporter = Exporter::new(FixedSource::new(vec![]), Duration::from_secs(1)).unwrap();
        let body = exporter.render().unwrap();

        for family in TrafficFamily::ALL {
            let header = format!("# TYPE v2ray_{} gauge", family.metric_name());
            assert!(body.contains(&header), "missing {}", header);
        }
        assert!(body.contains("# TYPE v2ray_up gauge"));
        assert!(body.contains("# TYPE v2ray_exporter_scrapes counter"));
        assert_eq!(exporter.last_scrape(), LastScrape::Never);
    }

    #[tokio::test]
    async fn test_collect_publishes_traffic_and_runtime() {
        let source = FixedSource::new(vec![
            CounterSample::new("user>>>alice@example.com>>>traffic>>>uplink", 10),
            CounterSample::new("outbound>>>direct>>>traffic>>>downlink", 20),
        ]);
        let exporter = Exporter::new(source, Duration::from_secs(1)).unwrap();

        let report = exporter.collect().await.unwrap();
        assert_eq!(report.samples, 2);
        assert_eq!(report.published, 2);

        let body = exporter.render().unwrap();
        assert!(body.contains("v2ray_user_uplink_bytes{user=\"alice@example.com\"} 10"));
        assert!(body.contains("v2ray_outbound_downlink_bytes{tag=\"direct\"} 20"));
        assert!(body.contains("v2ray_uptime_seconds 120"));
        assert!(body.contains("v2ray_memstats_num_goroutine 8"));
        assert!(body.contains("v2ray_up 1"));
        assert!(body.contains("v2ray_exporter_scrapes_total 1"));
    }

    #[tokio::test]
    async fn test_failed_scrape_keeps_previous_values() {
        let source = FixedSource::new(vec![CounterSample::new(
            "inbound>>>socks>>>traffic>>>uplink",
            512,
        )]);
        let exporter = Exporter::new(source, Duration::from_secs(1)).unwrap();
        exporter.collect().await.unwrap();

        exporter.source.fail.store(true, Ordering::SeqCst);
        let err = exporter.collect().await.unwrap_err();
        assert_eq!(err.kind(), "rpc");

        let body = exporter.render().unwrap();
        assert!(body.contains("v2ray_inbound_uplink_bytes{tag=\"socks\"} 512"));
        assert!(body.contains("v2ray_up 0"));
        assert!(body.contains("v2ray_exporter_scrape_errors_total{kind=\"rpc\"} 1"));
        assert!(!exporter.is_ready());
        assert!(matches!(exporter.last_scrape(), LastScrape::Failed(_)));
    }

    #[tokio::test]
    async fn test_stale_entities_are_retained() {
        let source = FixedSource::new(vec![CounterSample::new(
            "inbound>>>old>>>traffic>>>downlink",
            1,
        )]);
        let exporter = Exporter::new(source, Duration::from_secs(1)).unwrap();
        exporter.collect().await.unwrap();

        *exporter.source.samples.lock() = vec![CounterSample::new(
            "inbound>>>new>>>traffic>>>downlink",
            2,
        )];
        exporter.collect().await.unwrap();

        let body = exporter.render().unwrap();
        let lines = metric_lines(&body);
        assert!(lines.contains(&"v2ray_inbound_downlink_bytes{tag=\"old\"} 1"));
        assert!(lines.contains(&"v2ray_inbound_downlink_bytes{tag=\"new\"} 2"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = Exporter::new(FixedSource::new(vec![]), Duration::ZERO);
        assert!(matches!(result, Err(ExporterError::InvalidTimeout)));
    }

    #[test]
    fn test_saturating_i64() {
        assert_eq!(saturating_i64(5), 5);
        assert_eq!(saturating_i64(u64::MAX), i64::MAX);
    }

    #[test]
    fn test_saturating_millis() {
        assert_eq!(saturating_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(saturating_millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_label_key_follows_entity() {
        let samples = TrafficFamily::ALL
            .iter()
            .map(|family| {
                CounterSample::new(
                    format!(
                        "{}>>>id>>>traffic>>>{}",
                        family.entity.as_str(),
                        family.direction.as_str()
                    ),
                    1,
                )
            })
            .collect();
        let exporter = Exporter::new(FixedSource::new(samples), Duration::from_secs(1)).unwrap();
        exporter.collect().await.unwrap();

        let body = exporter.render().unwrap();
        for family in TrafficFamily::ALL {
            let line = format!(
                "v2ray_{}{{{}=\"id\"}} 1",
                family.metric_name(),
                family.entity.label_name()
            );
            assert!(body.contains(&line), "missing {}\n{}", line, body);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_up_matches_readiness_under_concurrent_scrapes() {
        let source = FixedSource::new(vec![CounterSample::new(
            "inbound>>>api>>>traffic>>>uplink",
            3,
        )]);
        let exporter =
            std::sync::Arc::new(Exporter::new(source, Duration::from_secs(1)).unwrap());

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let exporter = exporter.clone();
                tokio::spawn(async move {
                    exporter.source.fail.store(i % 2 == 0, Ordering::SeqCst);
                    let _ = exporter.collect().await;
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let body = exporter.render().unwrap();
        let up = metric_lines(&body)
            .into_iter()
            .find(|l| l.starts_with("v2ray_up "))
            .unwrap();
        assert_eq!(up == "v2ray_up 1", exporter.is_ready(), "{}", up);
    }
}
