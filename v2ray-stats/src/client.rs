//! StatsService client.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tonic::Request;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

use crate::error::{Result, StatsError};
use crate::proto::{QueryStatsRequest, QueryStatsResponse, SysStatsRequest, SysStatsResponse};
use crate::types::{CounterSample, SysStats};

/// Which proxy implementation serves the stats API.
///
/// Both expose the same messages under a different protobuf package.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiFlavor {
    #[default]
    V2ray,
    Xray,
}

impl ApiFlavor {
    fn query_stats_path(self) -> &'static str {
        match self {
            ApiFlavor::V2ray => "/v2ray.core.app.stats.command.StatsService/QueryStats",
            ApiFlavor::Xray => "/xray.app.stats.command.StatsService/QueryStats",
        }
    }

    fn sys_stats_path(self) -> &'static str {
        match self {
            ApiFlavor::V2ray => "/v2ray.core.app.stats.command.StatsService/GetSysStats",
            ApiFlavor::Xray => "/xray.app.stats.command.StatsService/GetSysStats",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApiFlavor::V2ray => "v2ray",
            ApiFlavor::Xray => "xray",
        }
    }
}

impl std::str::FromStr for ApiFlavor {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v2ray" => Ok(ApiFlavor::V2ray),
            "xray" => Ok(ApiFlavor::Xray),
            other => Err(format!("unknown API flavor '{}' (expected v2ray or xray)", other)),
        }
    }
}

/// Connection options for [`StatsClient::connect`].
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    /// Upper bound on establishing the initial connection.
    pub connect_timeout: Duration,
    /// Service package to address.
    pub api: ApiFlavor,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            api: ApiFlavor::default(),
        }
    }
}

/// Source of traffic counters and runtime statistics.
///
/// The exporter only depends on this capability, so tests can substitute an
/// in-memory implementation for the gRPC client.
pub trait StatsSource: Send + Sync + 'static {
    /// List all counters whose name contains `pattern`, optionally resetting
    /// them after the read.
    fn query_stats(
        &self,
        pattern: &str,
        reset: bool,
    ) -> impl Future<Output = Result<Vec<CounterSample>>> + Send;

    /// Fetch runtime statistics of the proxy process.
    fn sys_stats(&self) -> impl Future<Output = Result<SysStats>> + Send;
}

impl<T: StatsSource> StatsSource for Arc<T> {
    fn query_stats(
        &self,
        pattern: &str,
        reset: bool,
    ) -> impl Future<Output = Result<Vec<CounterSample>>> + Send {
        (**self).query_stats(pattern, reset)
    }

    fn sys_stats(&self) -> impl Future<Output = Result<SysStats>> + Send {
        (**self).sys_stats()
    }
}

/// Long-lived gRPC connection to the stats service.
///
/// The underlying channel multiplexes concurrent calls; every call works on
/// its own clone of it. The connection is closed when the client is dropped.
pub struct StatsClient {
    channel: Channel,
    endpoint: String,
    api: ApiFlavor,
}

impl StatsClient {
    /// Connect to `endpoint` (`host:port`), failing if the service cannot be
    /// reached within the connect timeout.
    pub async fn connect(endpoint: &str, options: ConnectOptions) -> Result<Self> {
        let uri = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("http://{}", endpoint)
        };

        let channel_endpoint = Endpoint::from_shared(uri)
            .map_err(|e| StatsError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: error_chain(&e),
            })?
            .connect_timeout(options.connect_timeout);

        debug!(endpoint, api = options.api.as_str(), "Connecting to stats service");

        let channel = tokio::time::timeout(options.connect_timeout, channel_endpoint.connect())
            .await
            .map_err(|_| StatsError::Connection {
                endpoint: endpoint.to_string(),
                reason: format!("timed out after {:?}", options.connect_timeout),
            })?
            .map_err(|e| StatsError::Connection {
                endpoint: endpoint.to_string(),
                reason: error_chain(&e),
            })?;

        info!(endpoint, api = options.api.as_str(), "Connected to stats service");

        Ok(Self {
            channel,
            endpoint: endpoint.to_string(),
            api: options.api,
        })
    }

    async fn unary<Req, Resp>(&self, path: &'static str, message: Req) -> Result<Resp>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| StatsError::Unavailable(error_chain(&e)))?;

        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let response = grpc
            .unary(Request::new(message), PathAndQuery::from_static(path), codec)
            .await?;

        Ok(response.into_inner())
    }
}

impl StatsSource for StatsClient {
    async fn query_stats(&self, pattern: &str, reset: bool) -> Result<Vec<CounterSample>> {
        let request = QueryStatsRequest {
            pattern: pattern.to_string(),
            reset,
        };
        let response: QueryStatsResponse =
            self.unary(self.api.query_stats_path(), request).await?;

        Ok(response.stat.into_iter().map(CounterSample::from).collect())
    }

    async fn sys_stats(&self) -> Result<SysStats> {
        let response: SysStatsResponse = self
            .unary(self.api.sys_stats_path(), SysStatsRequest {})
            .await?;

        Ok(SysStats::from(response))
    }
}

impl Drop for StatsClient {
    fn drop(&mut self) {
        debug!(endpoint = %self.endpoint, "Closing stats connection");
    }
}

/// Run `call` under `timeout`.
///
/// On expiry the call's future is dropped, which abandons the in-flight RPC
/// without affecting the shared channel.
pub async fn with_deadline<T, F>(timeout: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| StatsError::Timeout(timeout))?
}

/// Render an error together with its source chain.
fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
