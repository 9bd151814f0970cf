//! Netperf CRD types
//!
//! Defines `Netperf`, a single point-to-point throughput benchmark between a
//! server pod and a client pod, each optionally pinned to a node.
//!
//! Phase strings are stored verbatim on existing objects, so the serialized
//! form of [`NetperfPhase`] must never change.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// Phase
// =============================================================================

/// Lifecycle phase of a Netperf benchmark
///
/// Phases only move forward:
/// `Initial → ServerCreated → Testing → Done | Error`.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash,
)]
pub enum NetperfPhase {
    /// Freshly created, nothing scheduled yet
    #[default]
    #[serde(rename = "")]
    Initial,
    /// Server pod has been created and recorded
    #[serde(rename = "Created server pod")]
    ServerCreated,
    /// Client pod has been created and the measurement is running
    #[serde(rename = "Started test")]
    Testing,
    /// Throughput recorded, worker pods removed
    #[serde(rename = "Done")]
    Done,
    /// The benchmark could not be completed
    #[serde(rename = "Test finished with error")]
    Error,
}

impl NetperfPhase {
    /// Whether no further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Whether `next` is the immediate successor of this phase
    pub fn can_advance_to(self, next: NetperfPhase) -> bool {
        matches!(
            (self, next),
            (Self::Initial, Self::ServerCreated)
                | (Self::ServerCreated, Self::Testing)
                | (Self::Testing, Self::Done)
                | (Self::Testing, Self::Error)
        )
    }

    /// The string persisted in `status.phase`
    pub fn as_status_str(self) -> &'static str {
        match self {
            Self::Initial => "",
            Self::ServerCreated => "Created server pod",
            Self::Testing => "Started test",
            Self::Done => "Done",
            Self::Error => "Test finished with error",
        }
    }
}

impl std::fmt::Display for NetperfPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "Initial"),
            Self::ServerCreated => write!(f, "ServerCreated"),
            Self::Testing => write!(f, "Testing"),
            Self::Done => write!(f, "Done"),
            Self::Error => write!(f, "Error"),
        }
    }
}

// =============================================================================
// Worker role
// =============================================================================

/// Role of a worker pod within a benchmark
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerRole {
    /// Runs the netperf listener
    Server,
    /// Runs the measurement against the server
    Client,
}

impl WorkerRole {
    /// Label value and pod name tag for this role
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// CRD
// =============================================================================

/// Network throughput benchmark between two pods
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "app.example.com",
    version = "v1alpha1",
    kind = "Netperf",
    plural = "netperfs",
    shortname = "np",
    namespaced,
    status = "NetperfStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Throughput","type":"number","jsonPath":".status.throughput"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NetperfSpec {
    /// Node the server pod must be scheduled on (unconstrained when empty)
    #[serde(default, alias = "server", skip_serializing_if = "Option::is_none")]
    pub server_node: Option<String>,

    /// Node the client pod must be scheduled on (unconstrained when empty)
    #[serde(default, alias = "client", skip_serializing_if = "Option::is_none")]
    pub client_node: Option<String>,
}

impl NetperfSpec {
    /// Placement constraint for the given role, if one is set
    pub fn node_for(&self, role: WorkerRole) -> Option<&str> {
        let node = match role {
            WorkerRole::Server => self.server_node.as_deref(),
            WorkerRole::Client => self.client_node.as_deref(),
        };
        node.filter(|n| !n.is_empty())
    }
}

/// Status of a Netperf benchmark, written only by the controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetperfStatus {
    /// Current phase of the benchmark
    #[serde(default)]
    pub phase: NetperfPhase,

    /// Name of the server pod, set once when the server is created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_pod_name: Option<String>,

    /// Name of the client pod, set once when the client is created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_pod_name: Option<String>,

    /// Measured throughput in bits per second (zero until measured)
    #[serde(default)]
    pub throughput: f64,
}

impl Netperf {
    /// Current phase, `Initial` when no status has been written yet
    pub fn phase(&self) -> NetperfPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Recorded pod name for the given role, ignoring empty strings
    pub fn recorded_pod_name(&self, role: WorkerRole) -> Option<&str> {
        let status = self.status.as_ref()?;
        let name = match role {
            WorkerRole::Server => status.server_pod_name.as_deref(),
            WorkerRole::Client => status.client_pod_name.as_deref(),
        };
        name.filter(|n| !n.is_empty())
    }
}

// =============================================================================
// Tests
// =============================================================================
