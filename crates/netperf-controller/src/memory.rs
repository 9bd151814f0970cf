//! In-memory [`ResourceAccessor`]
//!
//! Behaves like a tiny API server: names are unique per namespace, writes
//! bump `metadata.resourceVersion`, stale status writes fail with `Conflict`
//! and deletes honour the UID precondition. Tests drive pod lifecycle and
//! container output through the helper methods.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use kube::core::ErrorResponse;
use kube::ResourceExt;

use netperf_common::crd::{Netperf, NETPERF_KIND};

use crate::accessor::{AccessError, ResourceAccessor, POD_KIND};

type ObjectKey = (String, String);

/// Accessor operation, used for fault injection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// [`ResourceAccessor::get_job`]
    GetJob,
    /// [`ResourceAccessor::update_job`]
    UpdateJob,
    /// [`ResourceAccessor::create_pod`]
    CreatePod,
    /// [`ResourceAccessor::get_pod`]
    GetPod,
    /// [`ResourceAccessor::delete_pod`]
    DeletePod,
    /// [`ResourceAccessor::fetch_completed_log`]
    FetchLog,
}

/// Cluster state held in process memory
#[derive(Default)]
pub struct MemoryAccessor {
    jobs: DashMap<ObjectKey, Netperf>,
    pods: DashMap<ObjectKey, Pod>,
    logs: DashMap<ObjectKey, String>,
    faults: DashMap<Operation, u32>,
    resource_version: AtomicU64,
    pods_created: AtomicU64,
    deleted: Mutex<Vec<String>>,
}

impl MemoryAccessor {
    /// Empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        (self.resource_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn take_fault(&self, op: Operation) -> Result<(), AccessError> {
        let mut injected = false;
        self.faults.remove_if_mut(&op, |_, remaining| {
            injected = true;
            *remaining -= 1;
            *remaining == 0
        });
        if injected {
            return Err(AccessError::Kube(kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: format!("injected failure for {op:?}"),
                reason: "ServiceUnavailable".to_string(),
                code: 503,
            })));
        }
        Ok(())
    }

    fn key_of(kind: &'static str, obj: &impl ResourceExt) -> Result<ObjectKey, AccessError> {
        match (obj.namespace(), obj.meta().name.clone()) {
            (Some(namespace), Some(name)) => Ok((namespace, name)),
            _ => Err(AccessError::InvalidObject {
                kind,
                message: format!("{} lacks a name or namespace", obj.name_any()),
            }),
        }
    }

    fn not_found(kind: &'static str, key: &ObjectKey) -> AccessError {
        AccessError::NotFound {
            kind,
            namespace: key.0.clone(),
            name: key.1.clone(),
        }
    }

    /// Store a Netperf as if a user had applied it; returns the stored copy
    pub fn insert_job(&self, mut job: Netperf) -> Netperf {
        job.metadata.resource_version = Some(self.next_version());
        if let Ok(key) = Self::key_of(NETPERF_KIND, &job) {
            self.jobs.insert(key, job.clone());
        }
        job
    }

    /// Remove a Netperf, leaving its pods behind
    pub fn remove_job(&self, namespace: &str, name: &str) -> Option<Netperf> {
        self.jobs
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|(_, job)| job)
    }

    /// Store a pod directly, bypassing creation bookkeeping
    pub fn insert_pod(&self, mut pod: Pod) -> Pod {
        pod.metadata.resource_version = Some(self.next_version());
        if let Ok(key) = Self::key_of(POD_KIND, &pod) {
            self.pods.insert(key, pod.clone());
        }
        pod
    }

    /// Current stored copy of a Netperf
    pub fn job(&self, namespace: &str, name: &str) -> Option<Netperf> {
        self.jobs
            .get(&(namespace.to_string(), name.to_string()))
            .map(|job| job.clone())
    }

    /// Current stored copy of a pod
    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.pods
            .get(&(namespace.to_string(), name.to_string()))
            .map(|pod| pod.clone())
    }

    /// Names of all stored pods in a namespace, sorted
    pub fn pod_names(&self, namespace: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .pods
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .map(|entry| entry.key().1.clone())
            .collect();
        names.sort();
        names
    }

    /// Simulate the kubelet reporting pod status; returns the updated pod
    pub fn set_pod_status(
        &self,
        namespace: &str,
        name: &str,
        phase: &str,
        pod_ip: Option<&str>,
    ) -> Option<Pod> {
        let version = self.next_version();
        let mut pod = self
            .pods
            .get_mut(&(namespace.to_string(), name.to_string()))?;
        pod.metadata.resource_version = Some(version);
        pod.status = Some(PodStatus {
            phase: Some(phase.to_string()),
            pod_ip: pod_ip.map(str::to_string),
            ..Default::default()
        });
        Some(pod.clone())
    }

    /// Set the container output returned by `fetch_completed_log`
    pub fn set_log(&self, namespace: &str, name: &str, log: impl Into<String>) {
        self.logs
            .insert((namespace.to_string(), name.to_string()), log.into());
    }

    /// Fail the next `times` calls of `op` with a 503
    pub fn fail_next(&self, op: Operation, times: u32) {
        if times > 0 {
            self.faults.insert(op, times);
        }
    }

    /// Number of successful pod creations
    pub fn pods_created(&self) -> u64 {
        self.pods_created.load(Ordering::SeqCst)
    }

    /// Names of deleted pods in deletion order
    pub fn deleted_pods(&self) -> Vec<String> {
        self.deleted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ResourceAccessor for MemoryAccessor {
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Netperf, AccessError> {
        self.take_fault(Operation::GetJob)?;
        let key = (namespace.to_string(), name.to_string());
        self.jobs
            .get(&key)
            .map(|job| job.clone())
            .ok_or_else(|| Self::not_found(NETPERF_KIND, &key))
    }

    async fn update_job(&self, job: &Netperf) -> Result<Netperf, AccessError> {
        self.take_fault(Operation::UpdateJob)?;
        let key = Self::key_of(NETPERF_KIND, job)?;
        let mut stored = self
            .jobs
            .get_mut(&key)
            .ok_or_else(|| Self::not_found(NETPERF_KIND, &key))?;
        if job.metadata.resource_version.is_some()
            && job.metadata.resource_version != stored.metadata.resource_version
        {
            return Err(AccessError::Conflict {
                kind: NETPERF_KIND,
                namespace: key.0,
                name: key.1,
            });
        }
        // status subresource: only status is written
        stored.status = job.status.clone();
        stored.metadata.resource_version = Some(self.next_version());
        Ok(stored.clone())
    }

    async fn create_pod(&self, pod: &Pod) -> Result<(), AccessError> {
        self.take_fault(Operation::CreatePod)?;
        let key = Self::key_of(POD_KIND, pod)?;
        let mut stored = pod.clone();
        stored.metadata.uid = Some(format!("pod-uid-{}", self.next_version()));
        stored.metadata.resource_version = Some(self.next_version());
        match self.pods.entry(key) {
            Entry::Occupied(entry) => {
                let (namespace, name) = entry.key().clone();
                Err(AccessError::AlreadyExists {
                    kind: POD_KIND,
                    namespace,
                    name,
                })
            }
            Entry::Vacant(entry) => {
                entry.insert(stored);
                self.pods_created.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, AccessError> {
        self.take_fault(Operation::GetPod)?;
        let key = (namespace.to_string(), name.to_string());
        self.pods
            .get(&key)
            .map(|pod| pod.clone())
            .ok_or_else(|| Self::not_found(POD_KIND, &key))
    }

    async fn delete_pod(&self, pod: &Pod) -> Result<(), AccessError> {
        self.take_fault(Operation::DeletePod)?;
        let key = Self::key_of(POD_KIND, pod)?;
        let removed = self.pods.remove_if(&key, |_, stored| {
            pod.uid().is_none() || pod.uid() == stored.uid()
        });
        match removed {
            Some(_) => {
                self.logs.remove(&key);
                self.deleted
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(key.1);
                Ok(())
            }
            None if self.pods.contains_key(&key) => Err(AccessError::Conflict {
                kind: POD_KIND,
                namespace: key.0,
                name: key.1,
            }),
            None => Err(Self::not_found(POD_KIND, &key)),
        }
    }

    async fn fetch_completed_log(&self, pod: &Pod) -> Result<String, AccessError> {
        self.take_fault(Operation::FetchLog)?;
        let key = Self::key_of(POD_KIND, pod)?;
        if !self.pods.contains_key(&key) {
            return Err(Self::not_found(POD_KIND, &key));
        }
        Ok(self
            .logs
            .get(&key)
            .map(|log| log.clone())
            .unwrap_or_default())
    }
}
