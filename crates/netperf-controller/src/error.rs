//! Reconciler error types

use netperf_common::crd::NetperfPhase;

use crate::accessor::AccessError;
use crate::result::FormatError;

#[derive(Debug, thiserror::Error)]
pub enum NetperfError {
    #[error("{0}")]
    Access(#[from] AccessError),

    #[error("invalid netperf output: {0}")]
    Format(#[from] FormatError),

    #[error("{0}")]
    Common(#[from] netperf_common::Error),

    #[error("missing namespace on {kind} {name}")]
    MissingNamespace { kind: &'static str, name: String },

    #[error("Netperf {0} has no recorded server pod")]
    MissingServerPod(String),

    #[error("illegal phase transition for Netperf {netperf}: {from} -> {to}")]
    IllegalTransition {
        netperf: String,
        from: NetperfPhase,
        to: NetperfPhase,
    },
}

impl NetperfError {
    /// Whether re-delivering the same event may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Access(e) => e.is_retryable(),
            Self::Common(e) => e.is_retryable(),
            Self::Format(_)
            | Self::MissingNamespace { .. }
            | Self::MissingServerPod(_)
            | Self::IllegalTransition { .. } => false,
        }
    }
}
