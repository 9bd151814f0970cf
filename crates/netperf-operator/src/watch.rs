//! Event sources: watches on Netperf objects and worker pods, plus a periodic
//! resync that re-delivers every known object.

use std::time::Duration;

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::runtime::watcher::{self, Config as WatcherConfig, Event};
use kube::runtime::WatchStreamExt;
use tracing::{debug, warn};

use netperf_common::crd::Netperf;
use netperf_common::WORKER_LABEL_SELECTOR;
use netperf_controller::NetperfEvent;

/// Watch timeout in seconds; must stay below the client read timeout
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Translate a watcher event.
///
/// Initial-list markers carry no object and are dropped.
pub fn map_event<K>(
    event: Event<K>,
    applied: fn(K) -> NetperfEvent,
    deleted: fn(K) -> NetperfEvent,
) -> Option<NetperfEvent> {
    match event {
        Event::Apply(obj) | Event::InitApply(obj) => Some(applied(obj)),
        Event::Delete(obj) => Some(deleted(obj)),
        Event::Init | Event::InitDone => None,
    }
}

/// Change notifications for Netperf objects
pub fn job_events(api: Api<Netperf>) -> BoxStream<'static, NetperfEvent> {
    watcher::watcher(api, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .default_backoff()
        .filter_map(|res| async move {
            match res {
                Ok(event) => map_event(event, NetperfEvent::job_applied, NetperfEvent::job_deleted),
                Err(e) => {
                    warn!(error = %e, "Netperf watch error");
                    None
                }
            }
        })
        .boxed()
}

/// Change notifications for pods labelled as netperf workers
pub fn pod_events(api: Api<Pod>) -> BoxStream<'static, NetperfEvent> {
    let config = WatcherConfig::default()
        .labels(WORKER_LABEL_SELECTOR)
        .timeout(WATCH_TIMEOUT_SECS);
    watcher::watcher(api, config)
        .default_backoff()
        .filter_map(|res| async move {
            match res {
                Ok(event) => map_event(event, NetperfEvent::pod_applied, NetperfEvent::pod_deleted),
                Err(e) => {
                    warn!(error = %e, "worker pod watch error");
                    None
                }
            }
        })
        .boxed()
}

/// Snapshot of every Netperf and worker pod as change events.
///
/// A failed list is logged and contributes nothing; the next tick tries again.
pub async fn list_all(jobs: &Api<Netperf>, pods: &Api<Pod>) -> Vec<NetperfEvent> {
    let mut events = Vec::new();

    match jobs.list(&ListParams::default()).await {
        Ok(list) => events.extend(list.items.into_iter().map(NetperfEvent::job_applied)),
        Err(e) => warn!(error = %e, "resync: failed to list Netperf objects"),
    }

    match pods.list(&ListParams::default().labels(WORKER_LABEL_SELECTOR)).await {
        Ok(list) => events.extend(list.items.into_iter().map(NetperfEvent::pod_applied)),
        Err(e) => warn!(error = %e, "resync: failed to list worker pods"),
    }

    debug!(count = events.len(), "resync snapshot");
    events
}

/// Re-deliver every object once per `period`, starting one period from now
pub fn resync_events(
    jobs: Api<Netperf>,
    pods: Api<Pod>,
    period: Duration,
) -> BoxStream<'static, NetperfEvent> {
    let ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    stream::unfold((ticker, jobs, pods), |(mut ticker, jobs, pods)| async move {
        ticker.tick().await;
        let events = list_all(&jobs, &pods).await;
        Some((stream::iter(events), (ticker, jobs, pods)))
    })
    .flatten()
    .boxed()
}
