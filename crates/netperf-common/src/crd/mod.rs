//! Custom Resource Definitions for the Netperf operator

mod netperf;

pub use netperf::{Netperf, NetperfPhase, NetperfSpec, NetperfStatus, WorkerRole};

/// API group of all operator CRDs
pub const API_GROUP: &str = "app.example.com";

/// `apiVersion` of the Netperf CRD
pub const NETPERF_API_VERSION: &str = "app.example.com/v1alpha1";

/// Kind name used in owner references of worker pods
pub const NETPERF_KIND: &str = "Netperf";

/// Full CRD name (`<plural>.<group>`)
pub const NETPERF_CRD_NAME: &str = "netperfs.app.example.com";
