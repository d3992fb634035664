//! kwatch kubehub: the cluster API surface the watch pipeline depends on, and its
//! kube-rs implementation (dynamic discovery, list and watch).

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use futures::{stream::BoxStream, Stream, StreamExt};
use kube::{
    api::{Api, ListParams, WatchEvent as KubeWatchEvent, WatchParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::{ApiResource, DynamicObject, TypeMeta},
    discovery::Discovery,
    Client, Config,
};
use kwatch_core::{CatalogEntry, CatalogResource, EventType, ObjectState, ResourceDescriptor, WatchEvent};
use tracing::{debug, info};

pub mod mock;

pub use mock::{MockCluster, MockWatch, StreamEnd};

/// Failures reported by the cluster, classified by how a watcher should react.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// The resource kind is not (yet) served; worth polling again.
    #[error("not found: {0}")]
    NotFound(String),
    /// The operation is not supported for this kind; retrying will not help.
    #[error("not supported: {0}")]
    Unsupported(String),
    #[error("kube: {0}")]
    Kube(#[source] kube::Error),
    #[error("{0}")]
    Other(String),
}

impl ClusterError {
    fn from_status(code: u16, message: String) -> Option<Self> {
        match code {
            404 => Some(Self::NotFound(message)),
            405 => Some(Self::Unsupported(message)),
            _ => None,
        }
    }
}

impl From<kube::Error> for ClusterError {
    fn from(e: kube::Error) -> Self {
        if let kube::Error::Api(resp) = &e {
            if let Some(classified) = Self::from_status(resp.code, resp.message.clone()) {
                return classified;
            }
        }
        Self::Kube(e)
    }
}

/// An open change stream for one resource type.
pub struct ChangeStream {
    inner: BoxStream<'static, Result<WatchEvent, ClusterError>>,
}

impl ChangeStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<WatchEvent, ClusterError>> + Send + 'static,
    {
        Self { inner: stream.boxed() }
    }

    /// Next notification; `None` once the server closed the stream.
    pub async fn next(&mut self) -> Option<Result<WatchEvent, ClusterError>> {
        self.inner.next().await
    }

    /// Release the underlying connection.
    pub fn stop(self) {
        drop(self.inner);
    }
}

impl std::fmt::Debug for ChangeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeStream").finish_non_exhaustive()
    }
}

/// Cluster operations used by the watch pipeline.
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync {
    /// Enumerate served resource types, grouped by group-version.
    async fn discover(&self) -> Result<Vec<CatalogEntry>, ClusterError>;

    /// List current objects of one resource type across all namespaces.
    async fn list(&self, descriptor: &ResourceDescriptor) -> Result<Vec<ObjectState>, ClusterError>;

    /// Open a change stream for one resource type.
    async fn watch(&self, descriptor: &ResourceDescriptor) -> Result<ChangeStream, ClusterError>;
}

/// Build a kube client from an explicit kubeconfig file or the inferred
/// environment, optionally overriding the API server URL.
pub async fn connect(master: Option<&str>, kubeconfig: Option<&Path>) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kc = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
            Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                .await
                .context("loading kubeconfig")?
        }
        None => Config::infer().await.context("inferring kube config")?,
    };
    if let Some(master) = master {
        config.cluster_url = master.parse().with_context(|| format!("parsing master url {master}"))?;
    }
    let client = Client::try_from(config).context("creating kubernetes client")?;
    Ok(client)
}

/// `ClusterApi` backed by kube-rs dynamic objects.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self { Self { client } }

    fn api(&self, descriptor: &ResourceDescriptor) -> (Api<DynamicObject>, ApiResource) {
        let ar = api_resource(descriptor);
        (Api::all_with(self.client.clone(), &ar), ar)
    }
}

fn api_resource(d: &ResourceDescriptor) -> ApiResource {
    ApiResource {
        group: d.group.clone(),
        version: d.version.clone(),
        api_version: d.group_version(),
        kind: d.kind.clone(),
        plural: d.resource.clone(),
    }
}

/// List responses omit `apiVersion`/`kind` on items; fill them in so keys computed
/// from listed objects and from watch events agree.
fn to_state(ar: &ApiResource, mut obj: DynamicObject) -> Result<ObjectState, ClusterError> {
    if obj.types.is_none() {
        obj.types = Some(TypeMeta { api_version: ar.api_version.clone(), kind: ar.kind.clone() });
    }
    serde_json::to_value(&obj).map_err(|e| ClusterError::Other(format!("serializing {}: {e}", ar.kind)))
}

fn convert_event(ar: &ApiResource, ev: KubeWatchEvent<DynamicObject>) -> Result<WatchEvent, ClusterError> {
    match ev {
        KubeWatchEvent::Added(o) => Ok(WatchEvent::new(EventType::Added, to_state(ar, o)?)),
        KubeWatchEvent::Modified(o) => Ok(WatchEvent::new(EventType::Modified, to_state(ar, o)?)),
        KubeWatchEvent::Deleted(o) => Ok(WatchEvent::new(EventType::Deleted, to_state(ar, o)?)),
        KubeWatchEvent::Bookmark(_) => Ok(WatchEvent::new(EventType::Bookmark, serde_json::Value::Null)),
        KubeWatchEvent::Error(resp) => Err(ClusterError::from(kube::Error::Api(resp))),
    }
}

#[async_trait::async_trait]
impl ClusterApi for KubeCluster {
    async fn discover(&self) -> Result<Vec<CatalogEntry>, ClusterError> {
        let discovery = Discovery::new(self.client.clone()).run().await?;
        let mut by_gv: BTreeMap<String, Vec<CatalogResource>> = BTreeMap::new();
        for group in discovery.groups() {
            for (ar, _caps) in group.recommended_resources() {
                by_gv
                    .entry(ar.api_version.clone())
                    .or_default()
                    .push(CatalogResource { name: ar.plural.clone(), kind: ar.kind.clone() });
            }
        }
        let catalog: Vec<CatalogEntry> = by_gv
            .into_iter()
            .map(|(group_version, mut resources)| {
                resources.sort_by(|a, b| a.name.cmp(&b.name));
                CatalogEntry { group_version, resources }
            })
            .collect();
        info!(group_versions = catalog.len(), "discovery complete");
        Ok(catalog)
    }

    async fn list(&self, descriptor: &ResourceDescriptor) -> Result<Vec<ObjectState>, ClusterError> {
        let (api, ar) = self.api(descriptor);
        let list = api.list(&ListParams::default()).await?;
        debug!(gvr = %descriptor, count = list.items.len(), "listed");
        list.items.into_iter().map(|o| to_state(&ar, o)).collect()
    }

    async fn watch(&self, descriptor: &ResourceDescriptor) -> Result<ChangeStream, ClusterError> {
        let (api, ar) = self.api(descriptor);
        let stream = api.watch(&WatchParams::default(), "0").await?;
        let events = stream.map(move |res| match res {
            Ok(ev) => convert_event(&ar, ev),
            Err(e) => Err(ClusterError::from(e)),
        });
        Ok(ChangeStream::new(events))
    }
}
