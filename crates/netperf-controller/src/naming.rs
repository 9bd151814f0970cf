//! Worker pod naming strategies
//!
//! Pod names must be a pure function of the owning Netperf's UID and the
//! worker role, so that a replayed creation hits `AlreadyExists` instead of
//! producing a second pod.

use std::fmt::Debug;

use netperf_common::crd::WorkerRole;
use netperf_common::kube_utils::deterministic_hash;
use netperf_common::Error;

/// Number of hex characters used by [`HashedNaming`]
pub const HASH_SUFFIX_LEN: usize = 12;

/// Derives the unique part of a worker pod name from the owner's UID
pub trait PodNaming: Send + Sync + Debug {
    /// Suffix appended to `netperf-<role>-`
    fn suffix(&self, uid: &str) -> Result<String, Error>;
}

/// Truncated SHA-256 of the UID.
///
/// Independent of the UID's textual layout.
#[derive(Clone, Copy, Debug, Default)]
pub struct HashedNaming;

impl PodNaming for HashedNaming {
    fn suffix(&self, uid: &str) -> Result<String, Error> {
        if uid.is_empty() {
            return Err(Error::validation("cannot derive pod name from an empty UID"));
        }
        Ok(deterministic_hash(uid, HASH_SUFFIX_LEN))
    }
}

/// Last dash-delimited segment of a canonical UUID (`8-4-4-4-12`).
///
/// Matches the names of pods created by earlier operator releases.
#[derive(Clone, Copy, Debug, Default)]
pub struct UidSegmentNaming;

impl PodNaming for UidSegmentNaming {
    fn suffix(&self, uid: &str) -> Result<String, Error> {
        uid.split('-')
            .nth(4)
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::validation(format!("UID {uid:?} has no fifth dash-delimited segment"))
            })
    }
}

/// Full worker pod name for a role
pub fn worker_pod_name(naming: &dyn PodNaming, uid: &str, role: WorkerRole) -> Result<String, Error> {
    Ok(format!("netperf-{}-{}", role, naming.suffix(uid)?))
}
