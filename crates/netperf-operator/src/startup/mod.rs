//! Operator startup helpers

pub mod crds;

/// Log the build identity once at startup
pub fn log_build_info() {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        crd = netperf_common::crd::NETPERF_CRD_NAME,
        "netperf operator starting"
    );
}
