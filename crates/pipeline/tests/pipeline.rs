use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kwatch_core::{CatalogEntry, CatalogResource, ChangeEvent, EventType, NameFilter, WatchEvent};
use kwatch_kubehub::{MockCluster, MockWatch, StreamEnd};
use kwatch_pipeline::{dispatch, print_events, Filters, OutputFormat, PipelineConfig, WatchPipeline};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn widget(replicas: i64) -> serde_json::Value {
    json!({ "kind": "Widget", "metadata": { "namespace": "a", "name": "x" }, "spec": { "replicas": replicas } })
}

fn entry(gv: &str, resources: &[(&str, &str)]) -> CatalogEntry {
    CatalogEntry {
        group_version: gv.to_string(),
        resources: resources
            .iter()
            .map(|(name, kind)| CatalogResource { name: name.to_string(), kind: kind.to_string() })
            .collect(),
    }
}

fn fast_config() -> PipelineConfig {
    PipelineConfig { retry_interval: Duration::from_millis(10), shutdown_grace: Duration::from_secs(1), ..PipelineConfig::default() }
}

async fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn seeded_object_prints_only_real_changes() {
    let catalog = vec![entry("example.io/v1", &[("widgets", "Widget")])];
    let events = vec![
        WatchEvent::new(EventType::Added, widget(1)),
        WatchEvent::new(EventType::Modified, widget(2)),
        WatchEvent::new(EventType::Modified, widget(2)),
    ];
    let cluster = Arc::new(
        MockCluster::new(catalog.clone())
            .with_list("example.io/v1/widgets", vec![widget(1)])
            .with_watch("example.io/v1/widgets", MockWatch::Stream { events, end: StreamEnd::Hold }),
    );
    let pipeline = WatchPipeline::new(cluster.clone(), Filters::default(), fast_config())
        .with_format(OutputFormat::Default, false);

    let buf = SharedBuf::default();
    let cancel = CancellationToken::new();
    let run = {
        let mut out = buf.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.run(catalog, &mut out, cancel).await })
    };

    wait_for(|| buf.text().contains("] a/x widget")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    let printed = tokio::time::timeout(Duration::from_secs(3), run).await.expect("shuts down").expect("join").expect("run ok");

    let text = buf.text();
    assert_eq!(printed, 1, "output:\n{text}");
    assert_eq!(text.matches("] a/x widget").count(), 1);
    assert!(text.lines().any(|l| l.starts_with('-') && l.contains("\"replicas\": 1")), "output:\n{text}");
    assert!(text.lines().any(|l| l.starts_with('+') && l.contains("\"replicas\": 2")), "output:\n{text}");
    assert_eq!(cluster.streams_opened(), cluster.streams_released());
}

#[tokio::test]
async fn dispatch_applies_group_version_and_resource_filters() {
    let catalog = vec![
        entry("v1", &[("pods", "Pod"), ("services", "Service")]),
        entry("apps/v1", &[("deployments", "Deployment")]),
    ];
    let filters = Filters {
        group_versions: NameFilter::new(["v1"]),
        resources: NameFilter::new(["!v1/services"]),
        ..Filters::default()
    };
    let (tx, mut rx) = mpsc::channel(8);
    let sent = dispatch(catalog, tx, Arc::new(filters), CancellationToken::new()).await;
    assert_eq!(sent, 1);
    let d = rx.recv().await.expect("one descriptor");
    assert_eq!(d.gvr_key(), "v1/pods");
    assert!(rx.recv().await.is_none(), "queue closes after dispatch");
}

#[tokio::test]
async fn negated_resource_pattern_excludes_only_that_resource() {
    let catalog = vec![
        entry("apps/v1", &[("deployments", "Deployment"), ("statefulsets", "StatefulSet")]),
        entry("batch/v1", &[("jobs", "Job")]),
    ];
    let filters = Filters {
        group_versions: NameFilter::new(["apps/v1", "!apps/v1/deployments"]),
        resources: NameFilter::new(["!apps/v1/deployments"]),
        ..Filters::default()
    };
    let (tx, mut rx) = mpsc::channel(8);
    let sent = dispatch(catalog, tx, Arc::new(filters), CancellationToken::new()).await;
    assert_eq!(sent, 1);
    assert_eq!(rx.recv().await.expect("statefulsets").gvr_key(), "apps/v1/statefulsets");
    assert!(rx.recv().await.is_none(), "batch/v1 is outside the group-version filter");
}

#[tokio::test]
async fn dispatch_skips_malformed_group_versions() {
    let catalog = vec![entry("a/b/c", &[("things", "Thing")]), entry("v1", &[("pods", "Pod")])];
    let (tx, mut rx) = mpsc::channel(8);
    let sent = dispatch(catalog, tx, Arc::new(Filters::default()), CancellationToken::new()).await;
    assert_eq!(sent, 1);
    assert_eq!(rx.recv().await.expect("pods").resource, "pods");
}

#[tokio::test]
async fn dispatch_abandons_the_catalog_on_cancel() {
    let catalog = vec![entry("v1", &[("pods", "Pod"), ("services", "Service"), ("secrets", "Secret")])];
    let (tx, mut rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(dispatch(catalog, tx, Arc::new(Filters::default()), cancel.clone()));

    // first send fits the queue, the second blocks until cancelled
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();
    let sent = tokio::time::timeout(Duration::from_secs(1), task).await.expect("returns").expect("join");
    assert_eq!(sent, 1);
    assert!(rx.recv().await.is_some());
    assert!(rx.recv().await.is_none());
}

fn change(i: usize) -> ChangeEvent {
    ChangeEvent { timestamp: chrono::Local::now(), key: format!("ns/obj-{i} v1/pod"), diff: format!("+{i}") }
}

#[tokio::test]
async fn printer_drains_buffered_events_on_cancel() {
    let (tx, rx) = mpsc::channel(16);
    for i in 0..5 {
        tx.send(change(i)).await.expect("buffered");
    }
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut out = Vec::new();
    let printed = tokio::time::timeout(Duration::from_secs(1), print_events(rx, OutputFormat::Trace, &mut out, &cancel))
        .await
        .expect("no hang")
        .expect("written");
    drop(tx);

    let text = String::from_utf8(out).expect("utf8");
    assert_eq!(printed, 5);
    assert!(text.starts_with("[\n"));
    assert!(text.ends_with("]\n"));
    assert_eq!(text.matches("\"ph\":\"i\"").count(), 5);
}

#[tokio::test]
async fn printer_without_events_writes_only_the_envelope() {
    let (_tx, rx) = mpsc::channel::<ChangeEvent>(4);
    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        stopper.cancel();
    });

    let mut out = Vec::new();
    let printed = print_events(rx, OutputFormat::Trace, &mut out, &cancel).await.expect("written");
    assert_eq!(printed, 0);
    assert_eq!(String::from_utf8(out).expect("utf8"), "[\n]\n");
}

#[tokio::test]
async fn printer_waits_for_cancel_after_producers_leave() {
    let (tx, rx) = mpsc::channel(4);
    tx.send(change(0)).await.expect("buffered");
    drop(tx);
    let cancel = CancellationToken::new();
    let mut out = Vec::new();

    let pending = tokio::time::timeout(Duration::from_millis(50), print_events(rx, OutputFormat::Default, &mut out, &cancel)).await;
    assert!(pending.is_err(), "printer must not stop on its own");
}
