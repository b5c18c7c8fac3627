use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nsclass_controller::Settings;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "nsclass-controller", version, about = "Propagates NamespaceClass templates into labelled namespaces")]
struct Args {
    /// Max concurrent reconciles for Namespace objects
    #[arg(long, env = "NSCLASS_CONCURRENT_NS_RECONCILES", default_value_t = 10)]
    concurrent_ns_reconciles: u16,

    /// Max concurrent reconciles for NamespaceClass objects
    #[arg(long, env = "NSCLASS_CONCURRENT_NSCLASS_RECONCILES", default_value_t = 2)]
    concurrent_nsclass_reconciles: u16,

    /// Prometheus listener, e.g. 0.0.0.0:9090
    #[arg(long, env = "NSCLASS_METRICS_ADDR")]
    metrics_addr: Option<std::net::SocketAddr>,

    /// First retry delay after a failed reconcile
    #[arg(long, env = "NSCLASS_BACKOFF_BASE_MS", default_value_t = 500)]
    backoff_base_ms: u64,

    /// Upper bound for the retry delay
    #[arg(long, env = "NSCLASS_BACKOFF_MAX_SECS", default_value_t = 300)]
    backoff_max_secs: u64,
}

impl Args {
    fn settings(&self) -> Settings {
        Settings {
            namespace_concurrency: self.concurrent_ns_reconciles,
            class_concurrency: self.concurrent_nsclass_reconciles,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_secs(self.backoff_max_secs),
        }
    }
}

fn init_tracing() {
    let env = std::env::var("NSCLASS_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics(addr: Option<std::net::SocketAddr>) {
    let Some(sock) = addr else { return };
    match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
        Ok(()) => info!(addr = %sock, "Prometheus metrics exporter listening"),
        Err(e) => warn!(error = %e, "failed to install metrics exporter"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    init_metrics(args.metrics_addr);

    let client = kube::Client::try_default().await.context("building kube client")?;
    nsclass_controller::run(client, args.settings()).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_flags() {
        let args = Args::try_parse_from(["nsclass-controller"]).unwrap();
        let s = args.settings();
        assert_eq!(s.namespace_concurrency, 10);
        assert_eq!(s.class_concurrency, 2);
        assert_eq!(s.backoff_base, Duration::from_millis(500));
        assert!(args.metrics_addr.is_none());
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "nsclass-controller",
            "--concurrent-ns-reconciles", "4",
            "--concurrent-nsclass-reconciles", "1",
            "--metrics-addr", "127.0.0.1:9090",
        ])
        .unwrap();
        assert_eq!(args.settings().namespace_concurrency, 4);
        assert_eq!(args.settings().class_concurrency, 1);
        assert_eq!(args.metrics_addr.map(|a| a.port()), Some(9090));
    }

    #[test]
    fn prometheus_exporter_sees_reconcile_metrics() {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder().unwrap();
        nsclass_controller::metrics::describe();
        nsclass_controller::metrics::reconcile_error("team-a", "apply-resources");
        nsclass_controller::metrics::reconcile_duration("team-a", "web", 0.25);

        let out = handle.render();
        let error_line = out
            .lines()
            .find(|l| l.starts_with(nsclass_controller::metrics::ERRORS) && l.contains(r#"phase="apply-resources""#));
        let error_line = error_line.unwrap_or_else(|| panic!("no error counter in {:?}", out));
        assert!(error_line.contains(r#"namespace="team-a""#), "line={}", error_line);
        assert!(error_line.ends_with(" 1"), "line={}", error_line);
        assert!(out.contains(nsclass_controller::metrics::DURATION), "out={}", out);
    }
}
