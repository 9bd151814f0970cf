//! Cluster access port used by the reconciler
//!
//! The reconciler never talks to the API server directly. Everything it reads
//! or writes goes through [`ResourceAccessor`], which has a kube-rs backed
//! implementation here and an in-memory one in [`crate::memory`].

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, LogParams, PostParams, Preconditions};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;

use netperf_common::crd::{Netperf, NETPERF_KIND};

/// Kind label used in [`AccessError`] messages
pub const POD_KIND: &str = "Pod";

/// Failure talking to the cluster
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// An object with the same name already exists
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        /// Object kind
        kind: &'static str,
        /// Object namespace
        namespace: String,
        /// Object name
        name: String,
    },

    /// The object does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Object kind
        kind: &'static str,
        /// Object namespace
        namespace: String,
        /// Object name
        name: String,
    },

    /// The write was based on a stale resourceVersion
    #[error("conflicting update of {kind} {namespace}/{name}")]
    Conflict {
        /// Object kind
        kind: &'static str,
        /// Object namespace
        namespace: String,
        /// Object name
        name: String,
    },

    /// The object to write is missing identifying metadata
    #[error("invalid {kind}: {message}")]
    InvalidObject {
        /// Object kind
        kind: &'static str,
        /// What is missing
        message: String,
    },

    /// Status could not be encoded
    #[error("failed to encode status: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other API failure
    #[error("kubernetes error: {0}")]
    Kube(#[source] kube::Error),
}

impl AccessError {
    /// Classify a kube-rs error for the given object
    pub fn from_kube(kind: &'static str, namespace: &str, name: &str, err: kube::Error) -> Self {
        let (namespace, name) = (namespace.to_string(), name.to_string());
        match &err {
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Self::AlreadyExists { kind, namespace, name }
            }
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict { kind, namespace, name },
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound { kind, namespace, name },
            _ => Self::Kube(err),
        }
    }

    /// Whether retrying the same event may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Kube(kube::Error::Api(ae)) => !(400..500).contains(&ae.code),
            Self::Kube(_) => true,
            Self::AlreadyExists { .. }
            | Self::NotFound { .. }
            | Self::InvalidObject { .. }
            | Self::Serialization(_) => false,
        }
    }
}

/// Read and write access to Netperf objects and their worker pods
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceAccessor: Send + Sync {
    /// Fetch the current state of a Netperf
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Netperf, AccessError>;

    /// Persist the status of `job`.
    ///
    /// The caller's copy is never modified. Fails with `Conflict` when the
    /// copy's resourceVersion is stale.
    async fn update_job(&self, job: &Netperf) -> Result<Netperf, AccessError>;

    /// Create a pod, failing with `AlreadyExists` if the name is taken
    async fn create_pod(&self, pod: &Pod) -> Result<(), AccessError>;

    /// Fetch a pod by name
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, AccessError>;

    /// Delete a pod
    async fn delete_pod(&self, pod: &Pod) -> Result<(), AccessError>;

    /// Full log output of a pod's completed container
    async fn fetch_completed_log(&self, pod: &Pod) -> Result<String, AccessError>;
}

fn object_key(
    kind: &'static str,
    obj: &impl ResourceExt,
) -> Result<(String, String), AccessError> {
    let namespace = obj.namespace().ok_or_else(|| AccessError::InvalidObject {
        kind,
        message: format!("{} has no namespace", obj.name_any()),
    })?;
    let name = obj.meta().name.clone().ok_or_else(|| AccessError::InvalidObject {
        kind,
        message: "object has no name".to_string(),
    })?;
    Ok((namespace, name))
}

/// [`ResourceAccessor`] backed by the Kubernetes API
pub struct KubeAccessor {
    client: Client,
}

impl KubeAccessor {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn jobs(&self, namespace: &str) -> Api<Netperf> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ResourceAccessor for KubeAccessor {
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Netperf, AccessError> {
        self.jobs(namespace)
            .get(name)
            .await
            .map_err(|e| AccessError::from_kube(NETPERF_KIND, namespace, name, e))
    }

    async fn update_job(&self, job: &Netperf) -> Result<Netperf, AccessError> {
        let (namespace, name) = object_key(NETPERF_KIND, job)?;
        // replace_status carries the resourceVersion from the body, so a stale
        // copy is rejected with 409 Conflict
        let body = serde_json::to_vec(job)?;
        self.jobs(&namespace)
            .replace_status(&name, &PostParams::default(), body)
            .await
            .map_err(|e| AccessError::from_kube(NETPERF_KIND, &namespace, &name, e))
    }

    async fn create_pod(&self, pod: &Pod) -> Result<(), AccessError> {
        let (namespace, name) = object_key(POD_KIND, pod)?;
        self.pods(&namespace)
            .create(&PostParams::default(), pod)
            .await
            .map_err(|e| AccessError::from_kube(POD_KIND, &namespace, &name, e))?;
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, AccessError> {
        self.pods(namespace)
            .get(name)
            .await
            .map_err(|e| AccessError::from_kube(POD_KIND, namespace, name, e))
    }

    async fn delete_pod(&self, pod: &Pod) -> Result<(), AccessError> {
        let (namespace, name) = object_key(POD_KIND, pod)?;
        // Never delete a same-named pod that replaced the one we observed
        let params = DeleteParams {
            preconditions: pod.uid().map(|uid| Preconditions {
                uid: Some(uid),
                resource_version: None,
            }),
            ..DeleteParams::background()
        };
        self.pods(&namespace)
            .delete(&name, &params)
            .await
            .map_err(|e| AccessError::from_kube(POD_KIND, &namespace, &name, e))?;
        Ok(())
    }

    async fn fetch_completed_log(&self, pod: &Pod) -> Result<String, AccessError> {
        let (namespace, name) = object_key(POD_KIND, pod)?;
        self.pods(&namespace)
            .logs(&name, &LogParams::default())
            .await
            .map_err(|e| AccessError::from_kube(POD_KIND, &namespace, &name, e))
    }
}
