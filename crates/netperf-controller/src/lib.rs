//! Netperf benchmark reconciler
//!
//! Turns change notifications about `Netperf` objects and their worker pods
//! into cluster actions:
//! - `worker` builds the server and client pods
//! - `result` parses the client's netperf report
//! - `accessor` is the cluster port, with kube-rs and in-memory backends
//! - `controller` holds the phase state machine

pub mod accessor;
pub mod controller;
pub mod error;
pub mod event;
pub mod memory;
pub mod naming;
pub mod result;
pub mod worker;

pub use accessor::{AccessError, KubeAccessor, ResourceAccessor};
pub use controller::{Reconciler, ReconcilerSettings};
pub use error::NetperfError;
pub use event::NetperfEvent;
pub use memory::MemoryAccessor;
pub use naming::{HashedNaming, PodNaming, UidSegmentNaming};
pub use result::{parse_throughput, FormatError};
