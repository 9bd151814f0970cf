//! Event dispatch: bounded-concurrency processing with retries for transient
//! failures

use futures::{Stream, StreamExt};
use tracing::{error, instrument};

use netperf_controller::{NetperfError, NetperfEvent, Reconciler};

use crate::retry::{retry_with_backoff, RetryConfig};

/// Handle one event, re-delivering it while the failure is transient.
///
/// Permanent failures are logged here; exhausted retries are logged by the
/// retry loop.
#[instrument(skip_all, fields(event = event.kind(), object = %event.object_key()))]
pub async fn dispatch(
    reconciler: &Reconciler,
    retry: &RetryConfig,
    event: NetperfEvent,
) -> Result<(), NetperfError> {
    let operation = format!("{} {}", event.kind(), event.object_key());
    let event = &event;
    let result = retry_with_backoff(
        retry,
        &operation,
        move || reconciler.handle(event),
        NetperfError::is_retryable,
    )
    .await;

    if let Err(e) = &result {
        if !e.is_retryable() {
            error!(error = %e, "event failed permanently");
        }
    }
    result
}

/// Drain `events`, handling up to `concurrency` of them at once
pub async fn process<S>(events: S, reconciler: &Reconciler, retry: &RetryConfig, concurrency: usize)
where
    S: Stream<Item = NetperfEvent>,
{
    events
        .for_each_concurrent(concurrency, |event| async move {
            // outcome already logged
            let _ = dispatch(reconciler, retry, event).await;
        })
        .await;
}
