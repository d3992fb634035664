//! Walk the discovered catalog and queue every resource type that passes the filters.

use std::sync::Arc;

use kwatch_core::{parse_group_version, CatalogEntry, ResourceDescriptor};
use metrics::counter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::Filters;

/// Enqueue matching descriptors, blocking on a full queue. Dropping `queue` on
/// return closes it, which tells the spawner workers there is no more input.
pub async fn dispatch(
    catalog: Vec<CatalogEntry>,
    queue: mpsc::Sender<ResourceDescriptor>,
    filters: Arc<Filters>,
    cancel: CancellationToken,
) -> usize {
    let mut sent = 0usize;
    'catalog: for entry in catalog {
        if !filters.group_versions.matches(&entry.group_version) {
            continue;
        }
        let (group, version) = match parse_group_version(&entry.group_version) {
            Ok(gv) => gv,
            Err(e) => {
                error!(error = %e, "error parsing GroupVersion");
                continue;
            }
        };
        for resource in entry.resources {
            if !filters.resources.matches(&format!("{}/{}", entry.group_version, resource.name)) {
                continue;
            }
            let descriptor = ResourceDescriptor {
                group: group.clone(),
                version: version.clone(),
                resource: resource.name,
                kind: resource.kind,
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'catalog,
                res = queue.send(descriptor) => {
                    if res.is_err() {
                        break 'catalog;
                    }
                }
            }
            sent += 1;
            counter!("kwatch_dispatched_total", 1u64);
        }
    }
    info!(resources = sent, cancelled = cancel.is_cancelled(), "resource dispatch finished");
    sent
}
