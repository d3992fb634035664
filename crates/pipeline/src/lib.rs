//! kwatch pipeline: dispatcher -> bounded spawner -> per-resource watch loops ->
//! shared event channel -> printer.

#![forbid(unsafe_code)]

use std::io::Write;
use std::sync::Arc;

use kwatch_core::{CatalogEntry, NameFilter};
use kwatch_kubehub::ClusterApi;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

pub mod config;
pub mod dispatch;
pub mod output;
mod spawner;
mod watch;

pub use config::PipelineConfig;
pub use dispatch::dispatch;
pub use output::{print_events, OutputFormat};

/// The three user filters. Namespaces apply to events, the other two to the catalog.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub namespaces: NameFilter,
    /// Matched against `group/version`.
    pub group_versions: NameFilter,
    /// Matched against `group/version/resource`.
    pub resources: NameFilter,
}

pub struct WatchPipeline {
    cluster: Arc<dyn ClusterApi>,
    filters: Arc<Filters>,
    config: PipelineConfig,
    format: OutputFormat,
    colorize: bool,
}

impl WatchPipeline {
    pub fn new(cluster: Arc<dyn ClusterApi>, filters: Filters, config: PipelineConfig) -> Self {
        Self { cluster, filters: Arc::new(filters), config, format: OutputFormat::Default, colorize: true }
    }

    /// Colour is dropped for formats that cannot carry it.
    pub fn with_format(mut self, format: OutputFormat, colorize: bool) -> Self {
        self.format = format;
        self.colorize = colorize && format.supports_color();
        self
    }

    /// Watch every catalog resource that passes the filters and print changes to
    /// `out` until `cancel` fires. Returns the number of printed events.
    pub async fn run<W: Write + Send>(
        &self,
        catalog: Vec<CatalogEntry>,
        out: &mut W,
        cancel: CancellationToken,
    ) -> anyhow::Result<usize> {
        let tasks = TaskTracker::new();
        let (queue_tx, queue_rx) = mpsc::channel(self.config.workers.max(1));
        let (events_tx, events_rx) = mpsc::channel(self.config.event_capacity.max(1));

        tasks.spawn(dispatch(catalog, queue_tx, Arc::clone(&self.filters), cancel.clone()));
        let ctx = watch::WatchContext {
            cluster: Arc::clone(&self.cluster),
            events: events_tx,
            namespaces: Arc::new(self.filters.namespaces.clone()),
            retry_interval: self.config.retry_interval,
            cancel: cancel.clone(),
        };
        spawner::start(self.config.workers, queue_rx, ctx, self.colorize, &tasks);

        let printed = print_events(events_rx, self.format, out, &cancel).await;
        if printed.is_err() {
            cancel.cancel();
        }

        tasks.close();
        if tokio::time::timeout(self.config.shutdown_grace, tasks.wait()).await.is_err() {
            warn!(pending = tasks.len(), "watch tasks did not stop within the shutdown grace period");
        }
        let printed = printed?;
        info!(printed, "pipeline stopped");
        Ok(printed)
    }
}
