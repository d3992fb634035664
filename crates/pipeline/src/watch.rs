//! Per-resource watch loop: open a change stream, feed it through the change
//! tracker, reconnect when the server closes it.

use std::sync::Arc;
use std::time::Duration;

use kwatch_core::{namespace_of, ChangeEvent, EventType, NameFilter, ResourceDescriptor};
use kwatch_kubehub::{ChangeStream, ClusterApi, ClusterError};
use kwatch_store::ChangeTracker;
use metrics::{counter, decrement_gauge, increment_gauge};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Everything a watch loop shares with the rest of the pipeline.
#[derive(Clone)]
pub(crate) struct WatchContext {
    pub cluster: Arc<dyn ClusterApi>,
    pub events: mpsc::Sender<ChangeEvent>,
    pub namespaces: Arc<NameFilter>,
    pub retry_interval: Duration,
    pub cancel: CancellationToken,
}

enum WatchState {
    Connecting,
    Streaming(ChangeStream),
    /// Wait, then connect again.
    Reconnecting(Duration),
    Stopped,
}

/// Sleep unless cancelled first. Returns false when cancelled.
async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

pub(crate) async fn watch_resource(ctx: WatchContext, descriptor: ResourceDescriptor, mut tracker: ChangeTracker) {
    increment_gauge!("kwatch_active_watches", 1.0);
    let mut state = WatchState::Connecting;
    loop {
        state = match state {
            WatchState::Connecting => connect(&ctx, &descriptor).await,
            WatchState::Streaming(stream) => consume(&ctx, &descriptor, &mut tracker, stream).await,
            WatchState::Reconnecting(delay) => {
                counter!("kwatch_watch_reconnects_total", 1u64);
                if pause(&ctx.cancel, delay).await { WatchState::Connecting } else { WatchState::Stopped }
            }
            WatchState::Stopped => break,
        };
    }
    decrement_gauge!("kwatch_active_watches", 1.0);
    debug!(gvr = %descriptor, cached = tracker.cache().len(), "watch stopped");
}

async fn connect(ctx: &WatchContext, descriptor: &ResourceDescriptor) -> WatchState {
    loop {
        let opened = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return WatchState::Stopped,
            res = ctx.cluster.watch(descriptor) => res,
        };
        match opened {
            Ok(stream) => {
                debug!(gvr = %descriptor, "watch opened");
                return WatchState::Streaming(stream);
            }
            Err(ClusterError::NotFound(_)) => {
                debug!(gvr = %descriptor, "resource not served yet; polling");
                if !pause(&ctx.cancel, ctx.retry_interval).await {
                    return WatchState::Stopped;
                }
            }
            Err(ClusterError::Unsupported(_)) => {
                debug!(gvr = %descriptor, "watch not supported");
                return WatchState::Stopped;
            }
            Err(e) => {
                error!(gvr = %descriptor, error = %e, "error watching resources");
                return WatchState::Stopped;
            }
        }
    }
}

async fn consume(
    ctx: &WatchContext,
    descriptor: &ResourceDescriptor,
    tracker: &mut ChangeTracker,
    mut stream: ChangeStream,
) -> WatchState {
    let next = loop {
        let item = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break WatchState::Stopped,
            item = stream.next() => item,
        };
        let event = match item {
            None => {
                debug!(gvr = %descriptor, "stream closed by server");
                break WatchState::Reconnecting(Duration::ZERO);
            }
            Some(Err(ClusterError::NotFound(_))) => {
                debug!(gvr = %descriptor, "resource went away; polling");
                break WatchState::Reconnecting(ctx.retry_interval);
            }
            Some(Err(ClusterError::Unsupported(_))) => break WatchState::Stopped,
            Some(Err(e)) => {
                warn!(gvr = %descriptor, error = %e, "watch stream error; reconnecting");
                break WatchState::Reconnecting(ctx.retry_interval);
            }
            Some(Ok(event)) => event,
        };

        counter!("kwatch_watch_events_total", 1u64);
        if event.event_type == EventType::Bookmark {
            counter!("kwatch_bookmarks_total", 1u64);
            continue;
        }
        if !ctx.namespaces.matches(namespace_of(&event.object)) {
            continue;
        }
        let Some(change) = tracker.observe(event.event_type, event.object) else {
            continue;
        };
        let sent = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break WatchState::Stopped,
            res = ctx.events.send(change) => res,
        };
        if sent.is_err() {
            debug!(gvr = %descriptor, "event channel closed");
            break WatchState::Stopped;
        }
    };
    stream.stop();
    next
}
