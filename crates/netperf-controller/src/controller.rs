//! Netperf reconciliation
//!
//! Drives a benchmark through its phases:
//! - `Initial` → create server pod → `ServerCreated`
//! - server pod `Running` with an IP → create client pod → `Testing`
//! - client pod `Succeeded` → parse log, delete both pods → `Done`
//! - any teardown failure → `Error`
//!
//! Every event re-reads the Netperf, so the stored phase is the only ordering
//! anchor. Pod names are deterministic, which makes replayed events harmless:
//! a second create hits `AlreadyExists` and is folded into the happy path.

use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::api::core::v1::Pod;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use netperf_common::crd::{Netperf, NetperfPhase, NetperfStatus, WorkerRole};
use netperf_common::events::{actions, reasons, EventPublisher};
use netperf_common::metrics;

use crate::accessor::{AccessError, ResourceAccessor, POD_KIND};
use crate::error::NetperfError;
use crate::event::NetperfEvent;
use crate::naming::{HashedNaming, PodNaming};
use crate::result::parse_throughput;
use crate::worker::{
    client_command, netperf_owner, pod_ip, pod_phase, RestartPolicy, WorkerPodBuilder,
    DEFAULT_NETPERF_IMAGE, POD_RUNNING, POD_SUCCEEDED,
};

/// Reconciler configuration
#[derive(Clone, Debug)]
pub struct ReconcilerSettings {
    /// Image for both worker roles
    pub image: String,
    /// Worker pod naming strategy
    pub naming: Arc<dyn PodNaming>,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            image: DEFAULT_NETPERF_IMAGE.to_string(),
            naming: Arc::new(HashedNaming),
        }
    }
}

/// Stateless event handler for Netperf benchmarks.
///
/// `handle` takes `&self` and may run concurrently for any mix of events.
pub struct Reconciler {
    accessor: Arc<dyn ResourceAccessor>,
    events: Arc<dyn EventPublisher>,
    settings: ReconcilerSettings,
}

impl Reconciler {
    /// Create a reconciler
    pub fn new(
        accessor: Arc<dyn ResourceAccessor>,
        events: Arc<dyn EventPublisher>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            accessor,
            events,
            settings,
        }
    }

    fn builder(&self) -> WorkerPodBuilder<'_> {
        WorkerPodBuilder::new(&self.settings.image, self.settings.naming.as_ref())
    }

    /// Handle one change notification
    #[instrument(skip_all, fields(event = event.kind(), object = %event.object_key()))]
    pub async fn handle(&self, event: &NetperfEvent) -> Result<(), NetperfError> {
        let started = Instant::now();
        let result = match event {
            NetperfEvent::Job { job, deleted: true } => {
                self.job_deleted(job);
                Ok(())
            }
            NetperfEvent::Job { job, .. } => self.reconcile_job(job).await,
            NetperfEvent::Pod { pod, deleted: true } => {
                debug!(pod = %pod.name_any(), "ignoring pod deletion");
                Ok(())
            }
            NetperfEvent::Pod { pod, .. } => self.reconcile_pod(pod).await,
        };

        metrics::record_duration(
            event.kind(),
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );
        if let Err(e) = &result {
            metrics::record_error(event.kind(), e.is_retryable());
        }
        result
    }

    // =========================================================================
    // Netperf events
    // =========================================================================

    fn job_deleted(&self, job: &Netperf) {
        info!(
            netperf = %job.name_any(),
            namespace = ?job.namespace(),
            "Netperf deleted, worker pods are garbage collected by owner reference"
        );
        metrics::JOBS_DELETED.add(1, &[]);
    }

    async fn reconcile_job(&self, observed: &Netperf) -> Result<(), NetperfError> {
        let name = observed.name_any();
        let namespace = observed
            .namespace()
            .ok_or_else(|| NetperfError::MissingNamespace {
                kind: "Netperf",
                name: name.clone(),
            })?;

        let job = match self.accessor.get_job(&namespace, &name).await {
            Ok(job) => job,
            Err(AccessError::NotFound { .. }) => {
                debug!(netperf = %name, "Netperf no longer exists");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match job.phase() {
            NetperfPhase::Initial | NetperfPhase::ServerCreated => {
                self.ensure_server_pod(&job).await
            }
            phase => {
                debug!(netperf = %name, phase = %phase, "nothing to do for phase");
                Ok(())
            }
        }
    }

    async fn ensure_server_pod(&self, job: &Netperf) -> Result<(), NetperfError> {
        let name = job.name_any();
        let builder = self.builder();
        let pod_name = builder.pod_name(job, WorkerRole::Server)?;
        let recorded = job.recorded_pod_name(WorkerRole::Server);

        if let Some(recorded) = recorded.filter(|r| *r != pod_name) {
            // Created under another naming strategy; recorded names are final
            warn!(
                netperf = %name,
                recorded = %recorded,
                expected = %pod_name,
                "recorded server pod name differs from naming strategy, keeping recorded name"
            );
            return Ok(());
        }

        let restart = RestartPolicy::Always;
        let pod = builder.build(job, WorkerRole::Server, restart, Vec::new())?;
        match self.accessor.create_pod(&pod).await {
            Ok(()) => info!(netperf = %name, pod = %pod_name, restart = %restart, "created server pod"),
            Err(AccessError::AlreadyExists { .. }) => {
                debug!(netperf = %name, pod = %pod_name, "server pod already exists")
            }
            Err(e) => {
                error!(netperf = %name, pod = %pod_name, error = %e, "failed to create server pod");
                return Err(e.into());
            }
        }

        if recorded.is_some() {
            return Ok(());
        }
        // ServerCreated without a recorded name is refilled in place
        let note = format!("Created server pod {pod_name}");
        self.advance(job, NetperfPhase::ServerCreated, note, |status| {
            status.server_pod_name = Some(pod_name)
        })
        .await
    }

    // =========================================================================
    // Pod events
    // =========================================================================

    async fn reconcile_pod(&self, pod: &Pod) -> Result<(), NetperfError> {
        let pod_name = pod.name_any();
        let Some(namespace) = pod.namespace() else {
            debug!(pod = %pod_name, "ignoring pod without namespace");
            return Ok(());
        };
        let Some(owner) = netperf_owner(pod) else {
            debug!(pod = %pod_name, "ignoring pod not owned by a Netperf");
            return Ok(());
        };

        let job = match self.accessor.get_job(&namespace, &owner.name).await {
            Ok(job) => job,
            Err(e) => {
                warn!(pod = %pod_name, netperf = %owner.name, error = %e, "cannot read owning Netperf");
                return Ok(());
            }
        };
        if job.uid().as_deref() != Some(owner.uid.as_str()) {
            debug!(pod = %pod_name, netperf = %owner.name, "pod belongs to an earlier Netperf with the same name");
            return Ok(());
        }

        if job.recorded_pod_name(WorkerRole::Server) == Some(pod_name.as_str()) {
            self.server_pod_changed(&job, pod).await
        } else if job.recorded_pod_name(WorkerRole::Client) == Some(pod_name.as_str()) {
            self.client_pod_changed(&job, pod).await
        } else {
            debug!(pod = %pod_name, netperf = %owner.name, "pod is not a recorded worker");
            Ok(())
        }
    }

    async fn server_pod_changed(&self, job: &Netperf, server: &Pod) -> Result<(), NetperfError> {
        let name = job.name_any();
        if pod_phase(server) != Some(POD_RUNNING) {
            debug!(netperf = %name, phase = ?pod_phase(server), "server pod not running yet");
            return Ok(());
        }
        if job.recorded_pod_name(WorkerRole::Client).is_some() {
            debug!(netperf = %name, "client pod already recorded");
            return Ok(());
        }
        let Some(ip) = pod_ip(server) else {
            debug!(netperf = %name, "server pod has no IP yet");
            return Ok(());
        };
        if job.phase() != NetperfPhase::ServerCreated {
            debug!(netperf = %name, phase = %job.phase(), "not waiting for a client");
            return Ok(());
        }

        let restart = RestartPolicy::OnFailure;
        let client = self
            .builder()
            .build(job, WorkerRole::Client, restart, client_command(ip))?;
        let client_name = client.name_any();
        match self.accessor.create_pod(&client).await {
            Ok(()) => info!(
                netperf = %name,
                pod = %client_name,
                server_ip = %ip,
                restart = %restart,
                "created client pod"
            ),
            Err(AccessError::AlreadyExists { .. }) => {
                debug!(netperf = %name, pod = %client_name, "client pod already exists")
            }
            Err(e) => {
                error!(netperf = %name, pod = %client_name, error = %e, "failed to create client pod");
                return Err(e.into());
            }
        }

        let note = format!("Started test from {client_name} against {ip}");
        self.advance(job, NetperfPhase::Testing, note, |status| {
            status.client_pod_name = Some(client_name)
        })
        .await
    }

    async fn client_pod_changed(&self, job: &Netperf, client: &Pod) -> Result<(), NetperfError> {
        let name = job.name_any();
        match pod_phase(client) {
            Some(POD_RUNNING) => {
                debug!(netperf = %name, "test running");
                Ok(())
            }
            Some(POD_SUCCEEDED) if job.phase() == NetperfPhase::Testing => {
                self.collect_results(job, client).await
            }
            Some(POD_SUCCEEDED) => {
                debug!(netperf = %name, phase = %job.phase(), "results already collected");
                Ok(())
            }
            phase => {
                debug!(netperf = %name, phase = ?phase, "ignoring client pod phase");
                Ok(())
            }
        }
    }

    async fn collect_results(&self, job: &Netperf, client: &Pod) -> Result<(), NetperfError> {
        let name = job.name_any();
        let namespace = job
            .namespace()
            .ok_or_else(|| NetperfError::MissingNamespace {
                kind: "Netperf",
                name: name.clone(),
            })?;

        // A missing client in Testing means an earlier teardown deleted it but
        // never recorded Done; no later event will carry the result.
        let log = match self.accessor.fetch_completed_log(client).await {
            Ok(log) => log,
            Err(e @ AccessError::NotFound { .. }) => {
                error!(netperf = %name, pod = %client.name_any(), "client pod gone before results were recorded");
                self.fail(job, format!("Client pod vanished before results were recorded: {e}"))
                    .await;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };
        let throughput = match parse_throughput(&log) {
            Ok(value) => value,
            Err(e) => {
                error!(netperf = %name, error = %e, "client output is not a netperf report");
                self.fail(job, format!("Invalid netperf output: {e}")).await;
                return Err(e.into());
            }
        };

        let Some(server_name) = job.recorded_pod_name(WorkerRole::Server) else {
            self.fail(job, "No server pod recorded".to_string()).await;
            return Err(NetperfError::MissingServerPod(name));
        };
        let server = match self.accessor.get_pod(&namespace, server_name).await {
            Ok(pod) => pod,
            Err(e) => {
                error!(netperf = %name, pod = %server_name, error = %e, "cannot read server pod");
                self.fail(job, format!("Cannot read server pod {server_name}: {e}"))
                    .await;
                return Err(e.into());
            }
        };

        for pod in [client, &server] {
            if let Err(e) = self.accessor.delete_pod(pod).await {
                let pod_name = pod.name_any();
                error!(netperf = %name, pod = %pod_name, error = %e, "failed to delete worker pod");
                self.fail(job, format!("Cannot delete {POD_KIND} {pod_name}: {e}"))
                    .await;
                return Err(e.into());
            }
            debug!(netperf = %name, pod = %pod.name_any(), "deleted worker pod");
        }

        let note = format!("Measured {throughput} bits/s");
        self.advance(job, NetperfPhase::Done, note, |status| {
            status.throughput = throughput
        })
        .await?;
        metrics::THROUGHPUT.record(throughput, &[]);
        info!(netperf = %name, throughput, "benchmark finished");
        Ok(())
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Move `job` to `Error`; a failure to persist is logged, never returned
    async fn fail(&self, job: &Netperf, reason: String) {
        if let Err(e) = self
            .advance(job, NetperfPhase::Error, reason, |_| {})
            .await
        {
            warn!(netperf = %job.name_any(), error = %e, "failed to record error phase");
        }
    }

    /// Persist `next` (plus `update`) on a copy of `job`
    async fn advance(
        &self,
        job: &Netperf,
        next: NetperfPhase,
        note: String,
        update: impl FnOnce(&mut NetperfStatus),
    ) -> Result<(), NetperfError> {
        let name = job.name_any();
        let current = job.phase();
        let refill = current == next && !current.is_terminal();
        if !refill && !current.can_advance_to(next) {
            return Err(NetperfError::IllegalTransition {
                netperf: name,
                from: current,
                to: next,
            });
        }

        let mut updated = job.clone();
        let status = updated.status.get_or_insert_with(NetperfStatus::default);
        status.phase = next;
        update(status);
        self.accessor.update_job(&updated).await?;

        if refill {
            debug!(netperf = %name, phase = %current, "filled in missing status fields");
            return Ok(());
        }
        info!(
            netperf = %name,
            from = %current,
            to = %next,
            status = next.as_status_str(),
            "phase transition"
        );
        metrics::record_transition(&current.to_string(), &next.to_string());

        let (type_, reason, action) = match next {
            NetperfPhase::ServerCreated => (EventType::Normal, reasons::SERVER_CREATED, actions::CREATE_POD),
            NetperfPhase::Testing => (EventType::Normal, reasons::TEST_STARTED, actions::CREATE_POD),
            NetperfPhase::Done => (EventType::Normal, reasons::TEST_COMPLETED, actions::COLLECT),
            NetperfPhase::Error | NetperfPhase::Initial => {
                (EventType::Warning, reasons::TEST_FAILED, actions::COLLECT)
            }
        };
        self.events
            .publish(&job.object_ref(&()), type_, reason, action, Some(note))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use k8s_openapi::api::core::v1::PodStatus;
    use kube::core::ErrorResponse;
    use netperf_common::crd::NetperfSpec;
    use netperf_common::events::NoopEventPublisher;

    use crate::accessor::MockResourceAccessor;
    use crate::naming::UidSegmentNaming;

    const UID: &str = "7d3e5a2c-1b4f-4e8a-9c6d-0a1b2c3d4e5f";
    const SERVER: &str = "netperf-server-0a1b2c3d4e5f";
    const CLIENT: &str = "netperf-client-0a1b2c3d4e5f";

    const REPORT: &str = "banner\nh1\nh2\nh3\nh4\n\n 87380 16384 16384 10.00 12345.6\n";

    fn settings() -> ReconcilerSettings {
        ReconcilerSettings {
            image: DEFAULT_NETPERF_IMAGE.to_string(),
            naming: Arc::new(UidSegmentNaming),
        }
    }

    fn job_in(phase: NetperfPhase, server: Option<&str>, client: Option<&str>) -> Netperf {
        let mut job = Netperf::new("bench", NetperfSpec::default());
        job.metadata.namespace = Some("perf".to_string());
        job.metadata.uid = Some(UID.to_string());
        job.metadata.resource_version = Some("7".to_string());
        job.status = Some(NetperfStatus {
            phase,
            server_pod_name: server.map(str::to_string),
            client_pod_name: client.map(str::to_string),
            throughput: 0.0,
        });
        job
    }

    fn worker(job: &Netperf, role: WorkerRole, phase: &str, ip: Option<&str>) -> Pod {
        let naming = UidSegmentNaming;
        let mut pod = WorkerPodBuilder::new(DEFAULT_NETPERF_IMAGE, &naming)
            .build(job, role, RestartPolicy::Always, Vec::new())
            .unwrap();
        pod.metadata.uid = Some(format!("{role}-pod-uid"));
        pod.status = Some(PodStatus {
            phase: Some(phase.to_string()),
            pod_ip: ip.map(str::to_string),
            ..Default::default()
        });
        pod
    }

    fn unavailable() -> AccessError {
        AccessError::Kube(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "etcd is sad".to_string(),
            reason: "ServiceUnavailable".to_string(),
            code: 503,
        }))
    }

    fn not_found(name: &str) -> AccessError {
        AccessError::NotFound {
            kind: POD_KIND,
            namespace: "perf".to_string(),
            name: name.to_string(),
        }
    }

    fn already_exists(name: &str) -> AccessError {
        AccessError::AlreadyExists {
            kind: POD_KIND,
            namespace: "perf".to_string(),
            name: name.to_string(),
        }
    }

    fn returns_job(mock: &mut MockResourceAccessor, job: &Netperf) {
        let job = job.clone();
        mock.expect_get_job()
            .returning(move |_, _| Ok(job.clone()));
    }

    /// Records every status written through `update_job`
    fn captures_updates(mock: &mut MockResourceAccessor) -> Arc<Mutex<Vec<NetperfStatus>>> {
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = written.clone();
        mock.expect_update_job().returning(move |job| {
            sink.lock().unwrap().push(job.status.clone().unwrap_or_default());
            Ok(job.clone())
        });
        written
    }

    /// Records every pod passed to `create_pod`
    fn captures_creates(mock: &mut MockResourceAccessor) -> Arc<Mutex<Vec<Pod>>> {
        let created = Arc::new(Mutex::new(Vec::new()));
        let sink = created.clone();
        mock.expect_create_pod().returning(move |pod| {
            sink.lock().unwrap().push(pod.clone());
            Ok(())
        });
        created
    }

    fn reconciler(mock: MockResourceAccessor) -> Reconciler {
        Reconciler::new(Arc::new(mock), Arc::new(NoopEventPublisher), settings())
    }

    // =========================================================================
    // Server creation
    // =========================================================================

    mod server_creation {
        use super::*;

        /// A fresh Netperf gets a server pod and records its name.
        #[tokio::test]
        async fn initial_job_creates_and_records_server() {
            let job = job_in(NetperfPhase::Initial, None, None);
            let mut mock = MockResourceAccessor::new();
            returns_job(&mut mock, &job);
            let created = captures_creates(&mut mock);
            let written = captures_updates(&mut mock);

            reconciler(mock)
                .handle(&NetperfEvent::job_applied(job))
                .await
                .unwrap();

            let created = created.lock().unwrap();
            assert_eq!(created.len(), 1);
            assert_eq!(created[0].name_any(), SERVER);
            assert_eq!(
                created[0].spec.as_ref().unwrap().restart_policy.as_deref(),
                Some("Always")
            );
            let written = written.lock().unwrap();
            assert_eq!(written.len(), 1);
            assert_eq!(written[0].phase, NetperfPhase::ServerCreated);
            assert_eq!(written[0].server_pod_name.as_deref(), Some(SERVER));
        }

        /// A pod left over from an interrupted attempt is adopted.
        #[tokio::test]
        async fn already_exists_still_records_name() {
            let job = job_in(NetperfPhase::Initial, None, None);
            let mut mock = MockResourceAccessor::new();
            returns_job(&mut mock, &job);
            mock.expect_create_pod()
                .returning(|_| Err(already_exists(SERVER)));
            let written = captures_updates(&mut mock);

            reconciler(mock)
                .handle(&NetperfEvent::job_applied(job))
                .await
                .unwrap();

            assert_eq!(written.lock().unwrap()[0].phase, NetperfPhase::ServerCreated);
        }

        /// The update triggered by recording the server is a no-op.
        #[tokio::test]
        async fn recorded_server_is_not_recorded_again() {
            let job = job_in(NetperfPhase::ServerCreated, Some(SERVER), None);
            let mut mock = MockResourceAccessor::new();
            returns_job(&mut mock, &job);
            mock.expect_create_pod()
                .times(1)
                .returning(|_| Err(already_exists(SERVER)));
            mock.expect_update_job().never();

            reconciler(mock)
                .handle(&NetperfEvent::job_applied(job))
                .await
                .unwrap();
        }

        /// A server recorded under another naming strategy is left alone.
        #[tokio::test]
        async fn foreign_recorded_name_is_kept() {
            let job = job_in(NetperfPhase::ServerCreated, Some("netperf-server-legacy"), None);
            let mut mock = MockResourceAccessor::new();
            returns_job(&mut mock, &job);
            mock.expect_create_pod().never();
            mock.expect_update_job().never();

            reconciler(mock)
                .handle(&NetperfEvent::job_applied(job))
                .await
                .unwrap();
        }

        /// A ServerCreated status missing its pod name is completed in place.
        #[tokio::test]
        async fn missing_recorded_name_is_filled_in() {
            let job = job_in(NetperfPhase::ServerCreated, None, None);
            let mut mock = MockResourceAccessor::new();
            returns_job(&mut mock, &job);
            mock.expect_create_pod()
                .returning(|_| Err(already_exists(SERVER)));
            let written = captures_updates(&mut mock);

            reconciler(mock)
                .handle(&NetperfEvent::job_applied(job))
                .await
                .unwrap();

            let written = written.lock().unwrap();
            assert_eq!(written[0].phase, NetperfPhase::ServerCreated);
            assert_eq!(written[0].server_pod_name.as_deref(), Some(SERVER));
        }

        #[tokio::test]
        async fn create_failure_propagates_without_status_change() {
            let job = job_in(NetperfPhase::Initial, None, None);
            let mut mock = MockResourceAccessor::new();
            returns_job(&mut mock, &job);
            mock.expect_create_pod().returning(|_| Err(unavailable()));
            mock.expect_update_job().never();

            let err = reconciler(mock)
                .handle(&NetperfEvent::job_applied(job))
                .await
                .unwrap_err();
            assert!(err.is_retryable());
        }

        #[tokio::test]
        async fn later_phases_are_ignored() {
            for phase in [NetperfPhase::Testing, NetperfPhase::Done, NetperfPhase::Error] {
                let job = job_in(phase, Some(SERVER), Some(CLIENT));
                let mut mock = MockResourceAccessor::new();
                returns_job(&mut mock, &job);
                mock.expect_create_pod().never();
                mock.expect_update_job().never();

                reconciler(mock)
                    .handle(&NetperfEvent::job_applied(job))
                    .await
                    .unwrap();
            }
        }

        /// Events are acted on against the stored object, not the event copy.
        #[tokio::test]
        async fn stale_event_uses_current_state() {
            let stored = job_in(NetperfPhase::Testing, Some(SERVER), Some(CLIENT));
            let stale = job_in(NetperfPhase::Initial, None, None);
            let mut mock = MockResourceAccessor::new();
            returns_job(&mut mock, &stored);
            mock.expect_create_pod().never();

            reconciler(mock)
                .handle(&NetperfEvent::job_applied(stale))
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn vanished_job_is_a_noop() {
            let job = job_in(NetperfPhase::Initial, None, None);
            let mut mock = MockResourceAccessor::new();
            mock.expect_get_job().returning(|_, _| {
                Err(AccessError::NotFound {
                    kind: "Netperf",
                    namespace: "perf".to_string(),
                    name: "bench".to_string(),
                })
            });
            mock.expect_create_pod().never();

            reconciler(mock)
                .handle(&NetperfEvent::job_applied(job))
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn deletion_touches_nothing() {
            let job = job_in(NetperfPhase::Testing, Some(SERVER), Some(CLIENT));
            let mut mock = MockResourceAccessor::new();
            mock.expect_get_job().never();
            mock.expect_delete_pod().never();

            reconciler(mock)
                .handle(&NetperfEvent::job_deleted(job))
                .await
                .unwrap();
        }
    }

    // =========================================================================
    // Client creation
    // =========================================================================

    mod client_creation {
        use super::*;

        #[tokio::test]
        async fn running_server_starts_client() {
            let job = job_in(NetperfPhase::ServerCreated, Some(SERVER), None);
            let server = worker(&job, WorkerRole::Server, POD_RUNNING, Some("10.0.0.5"));
            let mut mock = MockResourceAccessor::new();
            returns_job(&mut mock, &job);
            let created = captures_creates(&mut mock);
            let written = captures_updates(&mut mock);

            reconciler(mock)
                .handle(&NetperfEvent::pod_applied(server))
                .await
                .unwrap();

            let created = created.lock().unwrap();
            assert_eq!(created.len(), 1);
            assert_eq!(created[0].name_any(), CLIENT);
            let spec = created[0].spec.as_ref().unwrap();
            assert_eq!(spec.restart_policy.as_deref(), Some("OnFailure"));
            assert_eq!(
                spec.containers[0].command,
                Some(vec![
                    "netperf".to_string(),
                    "-H".to_string(),
                    "10.0.0.5".to_string(),
                ])
            );

            let written = written.lock().unwrap();
            assert_eq!(written[0].phase, NetperfPhase::Testing);
            assert_eq!(written[0].client_pod_name.as_deref(), Some(CLIENT));
            assert_eq!(written[0].server_pod_name.as_deref(), Some(SERVER));
        }

        #[tokio::test]
        async fn server_without_ip_waits() {
            let job = job_in(NetperfPhase::ServerCreated, Some(SERVER), None);
            let server = worker(&job, WorkerRole::Server, POD_RUNNING, None);
            let mut mock = MockResourceAccessor::new();
            returns_job(&mut mock, &job);
            mock.expect_create_pod().never();

            reconciler(mock)
                .handle(&NetperfEvent::pod_applied(server))
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn pending_server_waits() {
            let job = job_in(NetperfPhase::ServerCreated, Some(SERVER), None);
            let server = worker(&job, WorkerRole::Server, "Pending", Some("10.0.0.5"));
            let mut mock = MockResourceAccessor::new();
            returns_job(&mut mock, &job);
            mock.expect_create_pod().never();

            reconciler(mock)
                .handle(&NetperfEvent::pod_applied(server))
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn recorded_client_is_not_created_again() {
            let job = job_in(NetperfPhase::Testing, Some(SERVER), Some(CLIENT));
            let server = worker(&job, WorkerRole::Server, POD_RUNNING, Some("10.0.0.5"));
            let mut mock = MockResourceAccessor::new();
            returns_job(&mut mock, &job);
            mock.expect_create_pod().never();
            mock.expect_update_job().never();

            reconciler(mock)
                .handle(&NetperfEvent::pod_applied(server))
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn status_conflict_is_retryable() {
            let job = job_in(NetperfPhase::ServerCreated, Some(SERVER), None);
            let server = worker(&job, WorkerRole::Server, POD_RUNNING, Some("10.0.0.5"));
            let mut mock = MockResourceAccessor::new();
            returns_job(&mut mock, &job);
            mock.expect_create_pod().returning(|_| Ok(()));
            mock.expect_update_job().returning(|_| {
                Err(AccessError::Conflict {
                    kind: "Netperf",
                    namespace: "perf".to_string(),
                    name: "bench".to_string(),
                })
            });

            let err = reconciler(mock)
                .handle(&NetperfEvent::pod_applied(server))
                .await
                .unwrap_err();
            assert!(matches!(err, NetperfError::Access(AccessError::Conflict { .. })));
            assert!(err.is_retryable());
        }
    }

    // =========================================================================
    // Pod filtering
    // =========================================================================

    mod pod_filtering {
        use super::*;

        #[tokio::test]
        async fn pod_of_recreated_job_is_dropped() {
            let job = job_in(NetperfPhase::ServerCreated, Some(SERVER), None);
            let server = worker(&job, WorkerRole::Server, POD_RUNNING, Some("10.0.0.5"));
            let mut current = job.clone();
            current.metadata.uid = Some("11111111-2222-3333-4444-555555555555".to_string());
            let mut mock = MockResourceAccessor::new();
            returns_job(&mut mock, &current);
            mock.expect_create_pod().never();

            reconciler(mock)
                .handle(&NetperfEvent::pod_applied(server))
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn unowned_pod_is_dropped() {
            let job = job_in(NetperfPhase::ServerCreated, Some(SERVER), None);
            let mut pod = worker(&job, WorkerRole::Server, POD_RUNNING, Some("10.0.0.5"));
            pod.metadata.owner_references = None;
            let mut mock = MockResourceAccessor::new();
            mock.expect_get_job().never();

            reconciler(mock)
                .handle(&NetperfEvent::pod_applied(pod))
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn unreadable_owner_is_dropped() {
            let job = job_in(NetperfPhase::ServerCreated, Some(SERVER), None);
            let server = worker(&job, WorkerRole::Server, POD_RUNNING, Some("10.0.0.5"));
            let mut mock = MockResourceAccessor::new();
            mock.expect_get_job().returning(|_, _| Err(unavailable()));
            mock.expect_create_pod().never();

            reconciler(mock)
                .handle(&NetperfEvent::pod_applied(server))
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn unrecorded_pod_is_dropped() {
            let job = job_in(NetperfPhase::Initial, None, None);
            let server = worker(&job, WorkerRole::Server, POD_RUNNING, Some("10.0.0.5"));
            let mut mock = MockResourceAccessor::new();
            returns_job(&mut mock, &job);
            mock.expect_create_pod().never();
            mock.expect_update_job().never();

            reconciler(mock)
                .handle(&NetperfEvent::pod_applied(server))
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn pod_deletion_is_dropped() {
            let job = job_in(NetperfPhase::Testing, Some(SERVER), Some(CLIENT));
            let client = worker(&job, WorkerRole::Client, POD_SUCCEEDED, None);
            let mut mock = MockResourceAccessor::new();
            mock.expect_get_job().never();

            reconciler(mock)
                .handle(&NetperfEvent::pod_deleted(client))
                .await
                .unwrap();
        }
    }

    // =========================================================================
    // Result collection
    // =========================================================================

    mod collection {
        use super::*;

        fn testing_job() -> Netperf {
            job_in(NetperfPhase::Testing, Some(SERVER), Some(CLIENT))
        }

        /// Succeeded client: log parsed, client then server deleted, Done.
        #[tokio::test]
        async fn succeeded_client_completes_benchmark() {
            let job = testing_job();
            let client = worker(&job, WorkerRole::Client, POD_SUCCEEDED, None);
            let server = worker(&job, WorkerRole::Server, POD_RUNNING, Some("10.0.0.5"));
            let mut mock = MockResourceAccessor::new();
            returns_job(&mut mock, &job);
            mock.expect_fetch_completed_log()
                .returning(|_| Ok(REPORT.to_string()));
            mock.expect_get_pod().returning(move |ns, name| {
                assert_eq!((ns, name), ("perf", SERVER));
                Ok(server.clone())
            });
            let deleted = Arc::new(Mutex::new(Vec::new()));
            let sink = deleted.clone();
            mock.expect_delete_pod().times(2).returning(move |pod| {
                sink.lock().unwrap().push(pod.name_any());
                Ok(())
            });
            let written = captures_updates(&mut mock);

            reconciler(mock)
                .handle(&NetperfEvent::pod_applied(client))
                .await
                .unwrap();

            assert_eq!(*deleted.lock().unwrap(), vec![CLIENT, SERVER]);
            let written = written.lock().unwrap();
            assert_eq!(written.len(), 1);
            assert_eq!(written[0].phase, NetperfPhase::Done);
            assert_eq!(written[0].throughput, 12345.6);
        }

        #[tokio::test]
        async fn running_client_is_left_alone() {
            let job = testing_job();
            let client = worker(&job, WorkerRole::Client, POD_RUNNING, Some("10.0.0.6"));
            let mut mock = MockResourceAccessor::new();
            returns_job(&mut mock, &job);
            mock.expect_fetch_completed_log().never();

            reconciler(mock)
                .handle(&NetperfEvent::pod_applied(client))
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn finished_benchmark_is_not_collected_twice() {
            for phase in [NetperfPhase::Done, NetperfPhase::Error] {
                let job = job_in(phase, Some(SERVER), Some(CLIENT));
                let client = worker(&job, WorkerRole::Client, POD_SUCCEEDED, None);
                let mut mock = MockResourceAccessor::new();
                returns_job(&mut mock, &job);
                mock.expect_fetch_completed_log().never();
                mock.expect_update_job().never();

                reconciler(mock)
                    .handle(&NetperfEvent::pod_applied(client))
                    .await
                    .unwrap();
            }
        }

        #[tokio::test]
        async fn malformed_log_moves_to_error() {
            let job = testing_job();
            let client = worker(&job, WorkerRole::Client, POD_SUCCEEDED, None);
            let mut mock = MockResourceAccessor::new();
            returns_job(&mut mock, &job);
            mock.expect_fetch_completed_log()
                .returning(|_| Ok("netperf: connection refused\n\n".to_string()));
            mock.expect_delete_pod().never();
            mock.expect_get_pod().never();
            let written = captures_updates(&mut mock);

            let err = reconciler(mock)
                .handle(&NetperfEvent::pod_applied(client))
                .await
                .unwrap_err();

            assert!(matches!(err, NetperfError::Format(_)));
            let written = written.lock().unwrap();
            assert_eq!(written[0].phase, NetperfPhase::Error);
            assert_eq!(written[0].throughput, 0.0);
        }

        #[tokio::test]
        async fn log_fetch_failure_keeps_phase() {
            let job = testing_job();
            let client = worker(&job, WorkerRole::Client, POD_SUCCEEDED, None);
            let mut mock = MockResourceAccessor::new();
            returns_job(&mut mock, &job);
            mock.expect_fetch_completed_log()
                .returning(|_| Err(unavailable()));
            mock.expect_update_job().never();

            let err = reconciler(mock)
                .handle(&NetperfEvent::pod_applied(client))
                .await
                .unwrap_err();
            assert!(err.is_retryable());
        }

        #[tokio::test]
        async fn vanished_client_moves_to_error() {
            let job = testing_job();
            let client = worker(&job, WorkerRole::Client, POD_SUCCEEDED, None);
            let mut mock = MockResourceAccessor::new();
            returns_job(&mut mock, &job);
            mock.expect_fetch_completed_log()
                .returning(|_| Err(not_found(CLIENT)));
            mock.expect_get_pod().never();
            mock.expect_delete_pod().never();
            let written = captures_updates(&mut mock);

            let err = reconciler(mock)
                .handle(&NetperfEvent::pod_applied(client))
                .await
                .unwrap_err();

            assert!(matches!(err, NetperfError::Access(AccessError::NotFound { .. })));
            assert!(!err.is_retryable());
            let written = written.lock().unwrap();
            assert_eq!(written.len(), 1);
            assert_eq!(written[0].phase, NetperfPhase::Error);
        }

        #[tokio::test]
        async fn missing_server_pod_moves_to_error() {
            let job = testing_job();
            let client = worker(&job, WorkerRole::Client, POD_SUCCEEDED, None);
            let mut mock = MockResourceAccessor::new();
            returns_job(&mut mock, &job);
            mock.expect_fetch_completed_log()
                .returning(|_| Ok(REPORT.to_string()));
            mock.expect_get_pod()
                .returning(|_, name| Err(not_found(name)));
            mock.expect_delete_pod().never();
            let written = captures_updates(&mut mock);

            let err = reconciler(mock)
                .handle(&NetperfEvent::pod_applied(client))
                .await
                .unwrap_err();

            assert!(matches!(err, NetperfError::Access(AccessError::NotFound { .. })));
            assert_eq!(written.lock().unwrap()[0].phase, NetperfPhase::Error);
        }

        #[tokio::test]
        async fn failed_server_deletion_moves_to_error() {
            let job = testing_job();
            let client = worker(&job, WorkerRole::Client, POD_SUCCEEDED, None);
            let server = worker(&job, WorkerRole::Server, POD_RUNNING, Some("10.0.0.5"));
            let mut mock = MockResourceAccessor::new();
            returns_job(&mut mock, &job);
            mock.expect_fetch_completed_log()
                .returning(|_| Ok(REPORT.to_string()));
            mock.expect_get_pod()
                .returning(move |_, _| Ok(server.clone()));
            mock.expect_delete_pod().returning(|pod| {
                if pod.name_any() == SERVER {
                    Err(unavailable())
                } else {
                    Ok(())
                }
            });
            let written = captures_updates(&mut mock);

            let err = reconciler(mock)
                .handle(&NetperfEvent::pod_applied(client))
                .await
                .unwrap_err();

            assert!(err.is_retryable());
            let written = written.lock().unwrap();
            assert_eq!(written.len(), 1);
            assert_eq!(written[0].phase, NetperfPhase::Error);
        }

        /// If the error phase cannot be written, the original failure wins.
        #[tokio::test]
        async fn error_phase_write_failure_keeps_original_error() {
            let job = testing_job();
            let client = worker(&job, WorkerRole::Client, POD_SUCCEEDED, None);
            let mut mock = MockResourceAccessor::new();
            returns_job(&mut mock, &job);
            mock.expect_fetch_completed_log()
                .returning(|_| Ok("short".to_string()));
            mock.expect_update_job().returning(|_| Err(unavailable()));

            let err = reconciler(mock)
                .handle(&NetperfEvent::pod_applied(client))
                .await
                .unwrap_err();
            assert!(matches!(err, NetperfError::Format(_)));
        }
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    mod transitions {
        use super::*;

        #[tokio::test]
        async fn backwards_transition_is_rejected() {
            let mut mock = MockResourceAccessor::new();
            mock.expect_update_job().never();
            let reconciler = reconciler(mock);

            let job = job_in(NetperfPhase::Done, Some(SERVER), Some(CLIENT));
            let err = reconciler
                .advance(&job, NetperfPhase::Testing, String::new(), |_| {})
                .await
                .unwrap_err();
            assert!(matches!(err, NetperfError::IllegalTransition { .. }));
        }

        #[tokio::test]
        async fn terminal_phase_is_never_rewritten() {
            let mut mock = MockResourceAccessor::new();
            mock.expect_update_job().never();
            let reconciler = reconciler(mock);

            let job = job_in(NetperfPhase::Error, Some(SERVER), Some(CLIENT));
            assert!(reconciler
                .advance(&job, NetperfPhase::Error, String::new(), |_| {})
                .await
                .is_err());
        }

        #[tokio::test]
        async fn caller_copy_is_untouched() {
            let mut mock = MockResourceAccessor::new();
            let written = captures_updates(&mut mock);
            let reconciler = reconciler(mock);

            let job = job_in(NetperfPhase::Initial, None, None);
            reconciler
                .advance(&job, NetperfPhase::ServerCreated, String::new(), |s| {
                    s.server_pod_name = Some(SERVER.to_string())
                })
                .await
                .unwrap();
            assert_eq!(job.phase(), NetperfPhase::Initial);
            assert_eq!(written.lock().unwrap().len(), 1);
        }
    }
}
