//! Scripted in-memory `ClusterApi` for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::{stream, StreamExt};
use kwatch_core::{CatalogEntry, ObjectState, ResourceDescriptor, WatchEvent};

use crate::{ChangeStream, ClusterApi, ClusterError};

/// How a stream ends after its scripted events.
#[derive(Debug, Clone)]
pub enum StreamEnd {
    /// Server closes the stream cleanly.
    Close,
    /// Stream stays open with no further events.
    Hold,
    NotFound,
    Unsupported,
    Fail(String),
}

/// Outcome of one `watch` call.
#[derive(Debug, Clone)]
pub enum MockWatch {
    NotFound,
    Unsupported,
    Fail(String),
    Stream { events: Vec<WatchEvent>, end: StreamEnd },
}

#[derive(Default)]
struct Script {
    lists: HashMap<String, Result<Vec<ObjectState>, String>>,
    watches: HashMap<String, VecDeque<MockWatch>>,
    watch_calls: HashMap<String, usize>,
}

/// Cluster double. Watch outcomes are queued per `group/version/resource`; once a
/// queue is exhausted every further `watch` returns a stream that stays open.
#[derive(Default)]
pub struct MockCluster {
    pub catalog: Vec<CatalogEntry>,
    pub discover_error: Option<String>,
    script: Mutex<Script>,
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl MockCluster {
    pub fn new(catalog: Vec<CatalogEntry>) -> Self {
        Self { catalog, ..Self::default() }
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_list(self, gvr: &str, objects: Vec<ObjectState>) -> Self {
        self.script().lists.insert(gvr.to_string(), Ok(objects));
        self
    }

    pub fn with_list_error(self, gvr: &str, message: &str) -> Self {
        self.script().lists.insert(gvr.to_string(), Err(message.to_string()));
        self
    }

    pub fn with_watch(self, gvr: &str, outcome: MockWatch) -> Self {
        self.script().watches.entry(gvr.to_string()).or_default().push_back(outcome);
        self
    }

    /// Number of `watch` calls made for a resource type.
    pub fn watch_calls(&self, gvr: &str) -> usize {
        self.script().watch_calls.get(gvr).copied().unwrap_or(0)
    }

    /// Streams handed out so far.
    pub fn streams_opened(&self) -> usize { self.opened.load(Ordering::SeqCst) }

    /// Streams dropped or stopped so far.
    pub fn streams_released(&self) -> usize { self.released.load(Ordering::SeqCst) }

    fn open_stream(&self, events: Vec<WatchEvent>, end: StreamEnd) -> ChangeStream {
        struct Release(Arc<AtomicUsize>);
        impl Drop for Release {
            fn drop(&mut self) { self.0.fetch_add(1, Ordering::SeqCst); }
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        let guard = Release(Arc::clone(&self.released));
        let body = stream::iter(events.into_iter().map(Ok));
        let tail = match end {
            StreamEnd::Close => stream::empty().boxed(),
            StreamEnd::Hold => stream::pending().boxed(),
            StreamEnd::NotFound => stream::once(async { Err(ClusterError::NotFound("scripted".into())) }).boxed(),
            StreamEnd::Unsupported => stream::once(async { Err(ClusterError::Unsupported("scripted".into())) }).boxed(),
            StreamEnd::Fail(msg) => stream::once(async move { Err(ClusterError::Other(msg)) }).boxed(),
        };
        ChangeStream::new(body.chain(tail).map(move |item| {
            let _held = &guard;
            item
        }))
    }
}

#[async_trait::async_trait]
impl ClusterApi for MockCluster {
    async fn discover(&self) -> Result<Vec<CatalogEntry>, ClusterError> {
        match &self.discover_error {
            Some(msg) => Err(ClusterError::Other(msg.clone())),
            None => Ok(self.catalog.clone()),
        }
    }

    async fn list(&self, descriptor: &ResourceDescriptor) -> Result<Vec<ObjectState>, ClusterError> {
        match self.script().lists.get(&descriptor.gvr_key()) {
            Some(Ok(objects)) => Ok(objects.clone()),
            Some(Err(msg)) => Err(ClusterError::Other(msg.clone())),
            None => Ok(Vec::new()),
        }
    }

    async fn watch(&self, descriptor: &ResourceDescriptor) -> Result<ChangeStream, ClusterError> {
        let key = descriptor.gvr_key();
        let next = {
            let mut script = self.script();
            *script.watch_calls.entry(key.clone()).or_default() += 1;
            script.watches.get_mut(&key).and_then(|q| q.pop_front())
        };
        match next {
            Some(MockWatch::NotFound) => Err(ClusterError::NotFound(key)),
            Some(MockWatch::Unsupported) => Err(ClusterError::Unsupported(key)),
            Some(MockWatch::Fail(msg)) => Err(ClusterError::Other(msg)),
            Some(MockWatch::Stream { events, end }) => Ok(self.open_stream(events, end)),
            None => Ok(self.open_stream(Vec::new(), StreamEnd::Hold)),
        }
    }
}
