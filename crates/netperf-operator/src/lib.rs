//! Netperf operator runtime
//!
//! Wires the reconciler to the cluster: watch streams and periodic resync feed
//! a bounded-concurrency dispatcher until SIGINT/SIGTERM.

pub mod config;
pub mod dispatch;
pub mod retry;
pub mod shutdown;
pub mod startup;
pub mod watch;

use std::sync::Arc;

use futures::stream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use tracing::info;

use netperf_common::crd::Netperf;
use netperf_common::events::KubeEventPublisher;
use netperf_common::kube_utils::create_client;
use netperf_common::CONTROLLER_NAME;
use netperf_controller::{KubeAccessor, Reconciler};

use crate::config::RunArgs;

/// Run the controller until a shutdown signal arrives
pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let client = create_client(args.kubeconfig.as_deref()).await?;

    if args.skip_crd_install {
        info!("Skipping CRD installation");
    } else {
        startup::crds::ensure_crds(&client).await?;
    }

    let reconciler = Reconciler::new(
        Arc::new(KubeAccessor::new(client.clone())),
        Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME)),
        args.reconciler_settings(),
    );

    let (jobs, pods): (Api<Netperf>, Api<Pod>) = match args.watch_namespace() {
        Some(ns) => (
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client, ns),
        ),
        None => (Api::all(client.clone()), Api::all(client)),
    };

    let mut sources = vec![
        watch::job_events(jobs.clone()),
        watch::pod_events(pods.clone()),
    ];
    if let Some(period) = args.resync_interval() {
        sources.push(watch::resync_events(jobs, pods, period));
    }

    info!(
        namespace = args.watch_namespace().unwrap_or("<all>"),
        concurrency = args.concurrency(),
        resync_secs = args.resync_secs,
        "Watching Netperf objects and worker pods"
    );

    let events = stream::select_all(sources).take_until(shutdown::shutdown_signal());
    dispatch::process(
        events,
        &reconciler,
        &args.retry_config(),
        args.concurrency(),
    )
    .await;

    info!("Netperf operator stopped");
    Ok(())
}
