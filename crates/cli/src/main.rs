use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use kwatch_core::NameFilter;
use kwatch_kubehub::{ClusterApi, KubeCluster};
use kwatch_pipeline::{Filters, OutputFormat, PipelineConfig, WatchPipeline};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "kubectl-watch", version, about = "Print a live diff of every change in the cluster")]
struct Cli {
    /// Address of the Kubernetes API server; overrides the kubeconfig
    #[arg(long)]
    master: Option<String>,

    /// Path to a kubeconfig file (default: inferred)
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Colourize diffs (ignored for trace output)
    #[arg(short = 'c', long = "color", action = ArgAction::Set, default_value_t = true)]
    color: bool,

    /// Output format
    #[arg(short = 'o', long = "out", value_enum, default_value_t = Output::Default)]
    out: Output,

    /// Namespaces to watch; prefix with `!` to exclude
    #[arg(short = 'n', long = "namespace", value_delimiter = ',')]
    namespaces: Vec<String>,

    /// Group-versions to watch, e.g. `v1,apps/v1`; prefix with `!` to exclude
    #[arg(short = 'g', long = "group-version", value_delimiter = ',')]
    group_versions: Vec<String>,

    /// Resources to watch as group/version/resource, e.g. `apps/v1/deployments`
    #[arg(short = 'r', long = "group-version-resource", value_delimiter = ',')]
    resources: Vec<String>,

    /// Concurrent initial listings (default: KWATCH_WORKERS or 4)
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Default,
    Trace,
}

impl From<Output> for OutputFormat {
    fn from(o: Output) -> Self {
        match o {
            Output::Default => OutputFormat::Default,
            Output::Trace => OutputFormat::Trace,
        }
    }
}

fn init_tracing() {
    let env = std::env::var("KWATCH_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // stdout carries the change stream
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KWATCH_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KWATCH_METRICS_ADDR; expected host:port");
        }
    }
}

async fn next_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable; listening for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// First signal starts a graceful shutdown, a second one exits immediately.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        next_signal().await;
        info!("shutting down; signal again to force exit");
        cancel.cancel();
        next_signal().await;
        warn!("forced exit");
        std::process::exit(1);
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let client = kwatch_kubehub::connect(cli.master.as_deref(), cli.kubeconfig.as_deref()).await?;
    let cluster = Arc::new(KubeCluster::new(client));
    let catalog = cluster.discover().await.context("discovering server resources")?;

    let mut config = PipelineConfig::from_env();
    if let Some(workers) = cli.workers.filter(|n| *n > 0) {
        config.workers = workers;
    }
    let filters = Filters {
        namespaces: NameFilter::new(&cli.namespaces),
        group_versions: NameFilter::new(&cli.group_versions),
        resources: NameFilter::new(&cli.resources),
    };
    info!(
        group_versions = catalog.len(),
        workers = config.workers,
        format = ?cli.out,
        "starting watch"
    );

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let pipeline = WatchPipeline::new(cluster, filters, config).with_format(cli.out.into(), cli.color);
    let mut out = std::io::stdout();
    pipeline.run(catalog, &mut out, cancel).await.context("writing output")?;
    Ok(())
}
