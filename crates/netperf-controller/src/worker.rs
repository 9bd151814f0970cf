//! Worker pod construction
//!
//! Builds the server and client pods of a benchmark. Both run the same
//! netperf image; the server keeps its image entrypoint (the listener) and
//! restarts forever, the client runs one measurement against the server's IP.
//! Every pod carries a controller owner reference to its Netperf so the
//! cluster garbage-collects leftovers when the benchmark is deleted.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, Container, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    Pod, PodSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use netperf_common::crd::{Netperf, WorkerRole, API_GROUP, NETPERF_KIND};
use netperf_common::{Error, APP_LABEL_VALUE, ROLE_LABEL_KEY};

use crate::naming::{worker_pod_name, PodNaming};

/// Image used for both worker roles unless overridden
pub const DEFAULT_NETPERF_IMAGE: &str = "tailoredcloud/netperf:v2.7";

/// Node label matched by the placement constraint
const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Pod phase reported while containers run
pub const POD_RUNNING: &str = "Running";
/// Pod phase reported once all containers exited successfully
pub const POD_SUCCEEDED: &str = "Succeeded";

/// Restart policy of a worker pod
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Restart regardless of exit status (server)
    Always,
    /// Restart only on failure (client)
    OnFailure,
}

impl RestartPolicy {
    /// Value written to `spec.restartPolicy`
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Always => "Always",
            Self::OnFailure => "OnFailure",
        }
    }
}

impl std::fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client command measuring against the server at `server_ip`
pub fn client_command(server_ip: &str) -> Vec<String> {
    vec!["netperf".to_string(), "-H".to_string(), server_ip.to_string()]
}

/// Builds worker pods for one image and naming strategy
#[derive(Clone, Copy, Debug)]
pub struct WorkerPodBuilder<'a> {
    image: &'a str,
    naming: &'a dyn PodNaming,
}

impl<'a> WorkerPodBuilder<'a> {
    /// Create a builder
    pub fn new(image: &'a str, naming: &'a dyn PodNaming) -> Self {
        Self { image, naming }
    }

    /// Name the pod for `role` of `job` would get
    pub fn pod_name(&self, job: &Netperf, role: WorkerRole) -> Result<String, Error> {
        let uid = job_uid(job)?;
        worker_pod_name(self.naming, &uid, role)
    }

    /// Build the pod for `role` of `job`.
    ///
    /// An empty `command` keeps the image entrypoint.
    pub fn build(
        &self,
        job: &Netperf,
        role: WorkerRole,
        restart_policy: RestartPolicy,
        command: Vec<String>,
    ) -> Result<Pod, Error> {
        let job_name = job.name_any();
        let namespace = job.namespace().ok_or_else(|| {
            Error::validation_for_field(&job_name, "metadata.namespace", "Netperf must be namespaced")
        })?;
        let pod_name = self.pod_name(job, role)?;
        let owner = job.controller_owner_ref(&()).ok_or_else(|| {
            Error::validation_for_field(&job_name, "metadata.uid", "Netperf has no UID yet")
        })?;

        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), APP_LABEL_VALUE.to_string());
        labels.insert(ROLE_LABEL_KEY.to_string(), role.as_str().to_string());

        let container = Container {
            name: pod_name.clone(),
            image: Some(self.image.to_string()),
            command: (!command.is_empty()).then_some(command),
            ..Default::default()
        };

        Ok(Pod {
            metadata: ObjectMeta {
                name: Some(pod_name),
                namespace: Some(namespace),
                labels: Some(labels),
                owner_references: Some(vec![owner]),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![container],
                restart_policy: Some(restart_policy.as_str().to_string()),
                affinity: job.spec.node_for(role).map(node_affinity),
                ..Default::default()
            }),
            status: None,
        })
    }
}

fn job_uid(job: &Netperf) -> Result<String, Error> {
    job.uid().filter(|uid| !uid.is_empty()).ok_or_else(|| {
        Error::validation_for_field(job.name_any(), "metadata.uid", "Netperf has no UID yet")
    })
}

/// Required node affinity pinning a pod to `node`
fn node_affinity(node: &str) -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: Some(vec![NodeSelectorRequirement {
                        key: HOSTNAME_LABEL.to_string(),
                        operator: "In".to_string(),
                        values: Some(vec![node.to_string()]),
                    }]),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// =============================================================================
// Pod inspection
// =============================================================================

/// Phase reported by the kubelet, if any
pub fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref()?.phase.as_deref()
}

/// Pod IP, ignoring the empty string reported before scheduling
pub fn pod_ip(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()?
        .pod_ip
        .as_deref()
        .filter(|ip| !ip.is_empty())
}

/// Owner reference pointing at a Netperf, if the pod has one
pub fn netperf_owner(pod: &Pod) -> Option<&OwnerReference> {
    pod.owner_references().iter().find(|owner| {
        owner.kind == NETPERF_KIND && owner.api_version.split('/').next() == Some(API_GROUP)
    })
}
