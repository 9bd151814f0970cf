//! Common types for the Netperf operator: CRDs, errors, and observability

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod metrics;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Value of the `app` label on every worker pod
pub const APP_LABEL_VALUE: &str = "netperf-operator";

/// Label key carrying the worker role (`server` / `client`)
pub const ROLE_LABEL_KEY: &str = "netperf-type";

/// Label selector matching every worker pod managed by the operator
pub const WORKER_LABEL_SELECTOR: &str = "app=netperf-operator";

/// Field manager / reporting component name
pub const CONTROLLER_NAME: &str = "netperf-controller";
