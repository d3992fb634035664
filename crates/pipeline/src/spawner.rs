//! Bounded worker pool turning queued descriptors into running watch tasks.

use std::sync::Arc;

use kwatch_core::ResourceDescriptor;
use kwatch_kubehub::{ClusterApi, ClusterError};
use kwatch_store::{ChangeTracker, SnapshotCache};
use metrics::counter;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::watch::{watch_resource, WatchContext};

/// Spawn `workers` workers on `tasks`. Each one seeds a cache from the current
/// listing and then hands the descriptor to a long-lived watch task, so only the
/// listing is bounded by the pool size.
pub(crate) fn start(
    workers: usize,
    queue: mpsc::Receiver<ResourceDescriptor>,
    ctx: WatchContext,
    styled: bool,
    tasks: &TaskTracker,
) {
    let queue = Arc::new(Mutex::new(queue));
    for id in 0..workers.max(1) {
        let queue = Arc::clone(&queue);
        let ctx = ctx.clone();
        let spawn_on = tasks.clone();
        tasks.spawn(async move {
            let mut started = 0usize;
            loop {
                let next = {
                    let mut rx = queue.lock().await;
                    tokio::select! {
                        biased;
                        _ = ctx.cancel.cancelled() => None,
                        d = rx.recv() => d,
                    }
                };
                let Some(descriptor) = next else { break };
                let Some(cache) = seed_cache(ctx.cluster.as_ref(), &descriptor, &ctx.cancel).await else { break };
                spawn_on.spawn(watch_resource(ctx.clone(), descriptor, ChangeTracker::new(cache, styled)));
                started += 1;
            }
            debug!(worker = id, started, "spawner worker exiting");
        });
    }
    info!(workers = workers.max(1), "spawner started");
}

/// Build the initial cache from a full listing. A failed listing leaves the cache
/// empty; the watch still starts. `None` means cancelled.
async fn seed_cache(
    cluster: &dyn ClusterApi,
    descriptor: &ResourceDescriptor,
    cancel: &CancellationToken,
) -> Option<SnapshotCache> {
    let listed = tokio::select! {
        biased;
        _ = cancel.cancelled() => return None,
        res = cluster.list(descriptor) => res,
    };
    match listed {
        Ok(objects) => Some(SnapshotCache::from_objects(objects)),
        Err(e @ (ClusterError::NotFound(_) | ClusterError::Unsupported(_))) => {
            debug!(gvr = %descriptor, error = %e, "list skipped");
            Some(SnapshotCache::new())
        }
        Err(e) => {
            warn!(gvr = %descriptor, error = %e, "initial list failed; starting with empty cache");
            counter!("kwatch_list_failures_total", 1u64);
            Some(SnapshotCache::new())
        }
    }
}
