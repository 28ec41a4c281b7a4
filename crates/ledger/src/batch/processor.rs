use super::Outcome;
use crate::{Error, Kind, Op, Permit, Result, Storage, Token};
use std::sync::Arc;
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;

/// Handles a single token within a worker task.
///
/// Validates the token, inserts it into `storage` when valid, and pushes
/// exactly one [`Outcome`] onto `outcome_tx`. Invalid tokens never reach
/// storage.
///
/// # Behavior
///
/// - The insert is bounded by `deadline`; one still running when it passes
///   fails as [`Io`](Kind::Io).
/// - Errors are wrapped with this operation's label and the token.
/// - An [`Internal`](crate::Kind::Internal) failure cancels `abort` before the
///   outcome is sent and before the gate slot is freed, so the coordinator
///   observes the abort ahead of the freed slot.
/// - If the consumer has gone away the outcome is dropped.
/// - `permit` is released last, ending this worker's slot.
#[allow(clippy::used_underscore_binding)]
pub(crate) async fn insert_token<S: Storage>(
    _worker_id: usize,
    storage: Arc<S>,
    token: Token,
    deadline: Option<Instant>,
    outcome_tx: mpsc::UnboundedSender<Outcome>,
    abort: CancellationToken,
    permit: Permit,
) {
    const OP: Op = Op::new("batch.insert");

    let result = match token.validate() {
        Ok(()) => insert_within(storage.as_ref(), &token, deadline).await,
        Err(e) => Err(e),
    }
    .map_err(|e| {
        Error::builder()
            .op(OP)
            .token(token.clone())
            .cause(e)
            .build()
    });

    let outcome = Outcome::new(token, result);

    if outcome.is_fatal() {
        #[cfg(feature = "tracing")]
        if let Some(_e) = outcome.error() {
            tracing::error!("Worker {_worker_id} aborting batch: {_e}");
        }
        abort.cancel();
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("{}", outcome);

    if let Err(_e) = outcome_tx.send(outcome) {
        #[cfg(feature = "tracing")]
        tracing::debug!("Worker {_worker_id} dropped outcome, consumer gone: {}", _e.0);
    }

    permit.release();
}

async fn insert_within<S: Storage>(
    storage: &S,
    token: &Token,
    deadline: Option<Instant>,
) -> Result<()> {
    let Some(deadline) = deadline else {
        return storage.insert(token).await;
    };
    match tokio::time::timeout_at(deadline, storage.insert(token)).await {
        Ok(res) => res,
        Err(elapsed) => Err(Error::builder().kind(Kind::Io).source(elapsed).build()),
    }
}
