//! Change notifications fed to the reconciler

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use netperf_common::crd::Netperf;

/// A created, updated or deleted object observed by a watch
#[derive(Clone, Debug)]
pub enum NetperfEvent {
    /// A Netperf changed
    Job {
        /// Object as observed
        job: Netperf,
        /// The object is gone
        deleted: bool,
    },
    /// A worker pod changed
    Pod {
        /// Object as observed
        pod: Box<Pod>,
        /// The object is gone
        deleted: bool,
    },
}

impl NetperfEvent {
    /// Netperf was created or updated
    pub fn job_applied(job: Netperf) -> Self {
        Self::Job { job, deleted: false }
    }

    /// Netperf was deleted
    pub fn job_deleted(job: Netperf) -> Self {
        Self::Job { job, deleted: true }
    }

    /// Pod was created or updated
    pub fn pod_applied(pod: Pod) -> Self {
        Self::Pod {
            pod: Box::new(pod),
            deleted: false,
        }
    }

    /// Pod was deleted
    pub fn pod_deleted(pod: Pod) -> Self {
        Self::Pod {
            pod: Box::new(pod),
            deleted: true,
        }
    }

    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Job { .. } => "netperf",
            Self::Pod { .. } => "pod",
        }
    }

    /// `namespace/name` of the object
    pub fn object_key(&self) -> String {
        let (namespace, name) = match self {
            Self::Job { job, .. } => (job.namespace(), job.name_any()),
            Self::Pod { pod, .. } => (pod.namespace(), pod.name_any()),
        };
        format!("{}/{}", namespace.unwrap_or_default(), name)
    }
}
