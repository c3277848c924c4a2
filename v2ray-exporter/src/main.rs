//! Prometheus exporter for V2Ray / Xray traffic statistics.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use v2ray_exporter::config::BasicAuthConfig;
use v2ray_exporter::{Exporter, ExporterConfig, HttpServer, init_tracing};
use v2ray_stats::ApiFlavor;

/// Prometheus exporter for V2Ray traffic statistics.
#[derive(Parser, Debug)]
#[command(name = "v2ray-exporter")]
#[command(about = "Export V2Ray / Xray traffic statistics as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address.
    #[arg(short, long, value_name = "[ADDR]:PORT")]
    listen: Option<String>,

    /// Metrics path.
    #[arg(short, long, value_name = "PATH")]
    metrics_path: Option<String>,

    /// V2Ray API endpoint.
    #[arg(short = 'e', long, value_name = "HOST:PORT")]
    v2ray_endpoint: Option<String>,

    /// The timeout in seconds for every individual scrape.
    #[arg(short = 't', long, value_name = "N")]
    scrape_timeout: Option<u64>,

    /// Basic Auth username.
    #[arg(short = 'u', long, value_name = "USERNAME")]
    basic_auth_username: Option<String>,

    /// Basic Auth password.
    #[arg(short = 'p', long, value_name = "PASSWORD")]
    basic_auth_password: Option<String>,

    /// Stats API flavor (v2ray, xray).
    #[arg(long, value_name = "FLAVOR")]
    api: Option<ApiFlavor>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Load the config file (or defaults) and apply command-line overrides.
    fn into_config(self) -> anyhow::Result<ExporterConfig> {
        let mut config = match &self.config {
            Some(path) => ExporterConfig::load_from_file(path)?,
            None => ExporterConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.http.listen = listen;
        }
        if let Some(path) = self.metrics_path {
            config.http.path = path;
        }
        if let Some(endpoint) = self.v2ray_endpoint {
            config.v2ray.endpoint = endpoint;
        }
        if let Some(timeout) = self.scrape_timeout {
            config.v2ray.scrape_timeout_secs = timeout;
        }
        if let Some(api) = self.api {
            config.v2ray.api = api;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }

        match (self.basic_auth_username, self.basic_auth_password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                config.http.basic_auth = Some(BasicAuthConfig { username, password });
            }
            (None, None) => {}
            // Logging is not initialized yet.
            _ => eprintln!("Basic Auth needs both a username and a password, ignoring the flags"),
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Help, version and usage errors all end the process cleanly.
            e.print()?;
            return Ok(());
        }
    };

    println!("V2Ray Exporter {}", env!("CARGO_PKG_VERSION"));

    let config = args.into_config()?;
    init_tracing(&config.logging)?;

    let listen_addr = config.http.listen_addr()?;

    info!(
        endpoint = %config.v2ray.endpoint,
        api = config.v2ray.api.as_str(),
        scrape_timeout_secs = config.v2ray.scrape_timeout_secs,
        "Starting V2Ray exporter"
    );

    let exporter = match Exporter::connect(&config.v2ray).await {
        Ok(exporter) => Arc::new(exporter),
        Err(e) => {
            error!(error = %e, "Cannot reach the stats service");
            return Err(e.into());
        }
    };

    let server = HttpServer::new(
        exporter.clone(),
        listen_addr,
        config.http.path.clone(),
        config.http.basic_auth.clone(),
    );
    let listener = server.bind().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut http_task = tokio::spawn(server.serve(listener, shutdown_rx));

    tokio::select! {
        reason = shutdown_signal() => {
            info!("Received {}, shutting down...", reason);
        }
        result = &mut http_task => {
            // The server only returns on its own when it fails.
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(anyhow::anyhow!("HTTP server task failed: {}", e)),
            };
        }
    }

    shutdown_tx.send(true)?;
    stop_server(http_task, SHUTDOWN_GRACE).await;

    // Last owner of the stats connection; dropping it closes the channel.
    drop(exporter);

    info!("Exporter stopped");
    Ok(())
}

/// Time the HTTP server gets to drain in-flight scrapes.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Wait for the server task to finish, aborting it after `grace`.
///
/// Returns only once the task is gone, so it no longer holds the exporter.
async fn stop_server<T>(mut task: JoinHandle<T>, grace: Duration) {
    if tokio::time::timeout(grace, &mut task).await.is_err() {
        warn!("HTTP server did not stop within {:?}, aborting it", grace);
        task.abort();
        let _ = task.await;
    }
}

/// Wait for Ctrl+C or SIGTERM and return the signal name.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "Ctrl+C",
        _ = terminate => "SIGTERM",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_defaults() {
        let args = Args::try_parse_from([
            "v2ray-exporter",
            "-l",
            ":9600",
            "-m",
            "/metrics",
            "-e",
            "10.0.0.1:10085",
            "-t",
            "7",
            "--api",
            "xray",
        ])
        .unwrap();
        let config = args.into_config().unwrap();

        assert_eq!(config.http.listen, ":9600");
        assert_eq!(config.http.path, "/metrics");
        assert_eq!(config.v2ray.endpoint, "10.0.0.1:10085");
        assert_eq!(config.v2ray.scrape_timeout_secs, 7);
        assert_eq!(config.v2ray.api, ApiFlavor::Xray);
        assert!(config.http.basic_auth.is_none());
    }

    #[test]
    fn test_basic_auth_requires_both_flags() {
        let args = Args::try_parse_from(["v2ray-exporter", "-u", "prom"]).unwrap();
        assert!(args.into_config().unwrap().http.basic_auth.is_none());

        let args =
            Args::try_parse_from(["v2ray-exporter", "-u", "prom", "-p", "s3cret"]).unwrap();
        let auth = args.into_config().unwrap().http.basic_auth.unwrap();
        assert_eq!(auth.username, "prom");
        assert_eq!(auth.password, "s3cret");
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exporter.json5");
        std::fs::write(
            &path,
            r#"{ v2ray: { endpoint: "192.168.1.1:8080", scrape_timeout_secs: 9 } }"#,
        )
        .unwrap();

        let args = Args::try_parse_from([
            "v2ray-exporter",
            "-c",
            path.to_str().unwrap(),
            "-t",
            "2",
        ])
        .unwrap();
        let config = args.into_config().unwrap();

        assert_eq!(config.v2ray.endpoint, "192.168.1.1:8080");
        assert_eq!(config.v2ray.scrape_timeout_secs, 2);
    }

    #[test]
    fn test_reserved_metrics_path_rejected() {
        let args = Args::try_parse_from(["v2ray-exporter", "-m", "/health"]).unwrap();
        assert!(args.into_config().is_err());
    }

    #[tokio::test]
    async fn test_stop_server_releases_stuck_task() {
        let owner = Arc::new(());
        let held = owner.clone();
        let task = tokio::spawn(async move {
            let _held = held;
            std::future::pending::<()>().await;
        });

        stop_server(task, Duration::from_millis(20)).await;

        assert_eq!(Arc::strong_count(&owner), 1);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let args = Args::try_parse_from(["v2ray-exporter", "-t", "0"]).unwrap();
        assert!(args.into_config().is_err());
    }
}
