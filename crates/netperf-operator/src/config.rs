//! Command-line configuration for the `run` subcommand

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, ValueEnum};

use netperf_controller::worker::DEFAULT_NETPERF_IMAGE;
use netperf_controller::{HashedNaming, PodNaming, ReconcilerSettings, UidSegmentNaming};

use crate::retry::RetryConfig;

/// How worker pod names are derived from the Netperf UID
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum PodNamingStrategy {
    /// Hash of the full UID
    #[default]
    Hashed,
    /// Last dash-separated segment of the UID (names used by older releases)
    UidSegment,
}

impl PodNamingStrategy {
    fn naming(self) -> Arc<dyn PodNaming> {
        match self {
            Self::Hashed => Arc::new(HashedNaming),
            Self::UidSegment => Arc::new(UidSegmentNaming),
        }
    }
}

/// Controller mode arguments
#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Namespace to watch (empty = all namespaces)
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "")]
    pub namespace: String,

    /// Image used for the netperf server and client pods
    #[arg(long, env = "NETPERF_IMAGE", default_value = DEFAULT_NETPERF_IMAGE)]
    pub image: String,

    /// Worker pod naming strategy
    #[arg(long, env = "NETPERF_POD_NAMING", value_enum, default_value_t = PodNamingStrategy::Hashed)]
    pub pod_naming: PodNamingStrategy,

    /// Seconds between full resyncs (0 disables)
    #[arg(long, env = "NETPERF_RESYNC_SECS", default_value = "5")]
    pub resync_secs: u64,

    /// Attempts per event for transient failures (0 = unlimited)
    #[arg(long, env = "NETPERF_MAX_ATTEMPTS", default_value = "5")]
    pub max_attempts: u32,

    /// Events handled in parallel
    #[arg(long, env = "NETPERF_CONCURRENCY", default_value = "4")]
    pub concurrency: usize,

    /// Path to a kubeconfig file
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Do not install or update the Netperf CRD on startup
    #[arg(long)]
    pub skip_crd_install: bool,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            image: DEFAULT_NETPERF_IMAGE.to_string(),
            pod_naming: PodNamingStrategy::default(),
            resync_secs: 5,
            max_attempts: 5,
            concurrency: 4,
            kubeconfig: None,
            skip_crd_install: false,
        }
    }
}

impl RunArgs {
    /// Namespace to restrict watches to, `None` for cluster-wide
    pub fn watch_namespace(&self) -> Option<&str> {
        let ns = self.namespace.trim();
        (!ns.is_empty()).then_some(ns)
    }

    /// Interval between resyncs, `None` when disabled
    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_secs > 0).then(|| Duration::from_secs(self.resync_secs))
    }

    /// Parallelism for the dispatcher, never zero
    pub fn concurrency(&self) -> usize {
        self.concurrency.max(1)
    }

    /// Settings handed to the reconciler
    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            image: self.image.clone(),
            naming: self.pod_naming.naming(),
        }
    }

    /// Retry policy for event dispatch
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::with_max_attempts(self.max_attempts)
    }
}
