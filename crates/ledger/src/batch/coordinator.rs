use super::{Outcome, processor::insert_token};
use crate::{Error, Gate, Kind, Op, Result, Storage, Token, TokenSource};
use core::{
    pin::Pin,
    task::{Context, Poll},
};
use futures::Stream;
use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinSet,
    time::Instant,
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a batch: `Idle → Running → {Completed | Aborted}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BatchState {
    /// Created, nothing dispatched yet.
    Idle,
    /// Dispatching and draining work.
    Running,
    /// Every token was dispatched and has reported.
    Completed,
    /// An internal storage failure or the request deadline stopped dispatch,
    /// or the consumer went away before every token was dispatched. Work already dispatched still
    /// reported.
    Aborted,
}

impl BatchState {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Completed,
            _ => Self::Aborted,
        }
    }
}

/// State shared between a [`Batch`] and its coordinating task.
#[derive(Clone, Debug)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(BatchState::Idle as u8)))
    }

    fn set(&self, state: BatchState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn get(&self) -> BatchState {
        BatchState::from_u8(self.0.load(Ordering::Acquire))
    }
}

/// Final report of a batch, delivered through [`Batch::completion`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Summary {
    pub state: BatchState,
    /// Number of tokens handed to the batch.
    pub received: usize,
    /// Number of tokens dispatched to a worker. Each produced one outcome.
    pub dispatched: usize,
}

/// Fans batches of tokens out to bounded worker tasks against a [`Storage`].
///
/// Every batch gets its own [`Gate`] sized by the configured concurrency, so
/// batches never compete for each other's slots.
pub struct Inserter<S> {
    storage: Arc<S>,
    concurrency: usize,
}

impl<S> Clone for Inserter<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            concurrency: self.concurrency,
        }
    }
}

impl<S: Storage> Inserter<S> {
    /// Creates an orchestrator running at most `concurrency` inserts at once
    /// per batch. `0` means unbounded.
    pub fn new(storage: Arc<S>, concurrency: usize) -> Self {
        Self {
            storage,
            concurrency,
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Starts inserting `tokens` and returns the live [`Batch`].
    ///
    /// Outcomes are pushed onto an unbounded channel, so the batch never waits
    /// for its consumer; a slow consumer makes lines buffer. Dropping the
    /// [`Batch`] stops further dispatch while in-flight inserts drain.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, tokens: Vec<Token>) -> Batch {
        self.start_until(tokens, None)
    }

    /// Like [`start`](Self::start), bounded by the caller's `deadline`.
    ///
    /// Every storage insert inherits the deadline: one still running when it
    /// passes reports an [`Io`](Kind::Io) failure instead of blocking its
    /// slot. Tokens not dispatched by then are dropped and the batch ends
    /// [`Aborted`](BatchState::Aborted).
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_until(&self, tokens: Vec<Token>, deadline: Option<Instant>) -> Batch {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let state = SharedState::new();

        let fut = feed_tokens(
            tokens,
            Arc::clone(&self.storage),
            Gate::new(self.concurrency),
            deadline,
            state.clone(),
            outcome_tx,
            done_tx,
        );
        #[cfg(feature = "tracing")]
        let fut = {
            use tracing::Instrument;
            fut.instrument(tracing::info_span!("batch"))
        };

        tokio::spawn(fut);

        Batch {
            outcomes: UnboundedReceiverStream::new(outcome_rx),
            completion: done_rx,
            state,
        }
    }

    /// Fetches `size` tokens from `source` and starts inserting them.
    ///
    /// A `size` of zero or less yields an empty batch that completes
    /// immediately without touching the source or the storage.
    ///
    /// # Errors
    ///
    /// Returns the source's error, wrapped with this operation's label,
    /// before any work starts.
    pub async fn ingest<T: TokenSource>(&self, source: &T, size: i64) -> Result<Batch> {
        self.ingest_until(source, size, None).await
    }

    /// Like [`ingest`](Self::ingest), with the resulting batch bounded by
    /// `deadline` as in [`start_until`](Self::start_until).
    ///
    /// # Errors
    ///
    /// Returns the source's error, wrapped with this operation's label,
    /// before any work starts.
    pub async fn ingest_until<T: TokenSource>(
        &self,
        source: &T,
        size: i64,
        deadline: Option<Instant>,
    ) -> Result<Batch> {
        const OP: Op = Op::new("batch.ingest");

        let n = usize::try_from(size).unwrap_or(0);
        if n == 0 {
            return Ok(self.start_until(Vec::new(), deadline));
        }

        let tokens = source
            .generate(n)
            .await
            .map_err(|e| Error::wrap(OP, e))?;

        if tokens.len() != n {
            #[cfg(feature = "tracing")]
            tracing::warn!("Requested {n} tokens, source returned {}", tokens.len());
        }

        Ok(self.start_until(tokens, deadline))
    }
}

/// A running batch.
///
/// Yields one [`Outcome`] per dispatched token in completion order. The
/// stream ends once every worker has finished; [`Batch::completion`] then
/// resolves with the [`Summary`].
#[must_use = "dropping a batch stops further dispatch"]
pub struct Batch {
    outcomes: UnboundedReceiverStream<Outcome>,
    completion: oneshot::Receiver<Summary>,
    state: SharedState,
}

impl Batch {
    /// Current lifecycle state.
    ///
    /// `Idle` until the coordinating task starts, `Running` while it
    /// dispatches and drains. The terminal state is set before the outcome
    /// stream ends.
    pub fn state(&self) -> BatchState {
        self.state.get()
    }

    /// Waits for the completion signal.
    ///
    /// Outcomes not yet consumed stay unread.
    ///
    /// # Errors
    ///
    /// Returns an [`Internal`](Kind::Internal) error if the coordinating task
    /// ended without signalling completion.
    pub async fn completion(self) -> Result<Summary> {
        self.completion.await.map_err(|e| {
            Error::builder()
                .op(Op::new("batch.completion"))
                .kind(Kind::Internal)
                .source(e)
                .build()
        })
    }
}

impl Stream for Batch {
    type Item = Outcome;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Outcome>> {
        Pin::new(&mut self.outcomes).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.outcomes.size_hint()
    }
}

/// Dispatches each token to its own worker task and signals completion.
///
/// # Behavior
///
/// - Acquires a gate slot before spawning each worker, so at most
///   `gate.capacity()` inserts run at once.
/// - Stops dispatching as soon as a worker reports an internal failure, the
///   consumer drops the outcome stream, or `deadline` passes. In-flight
///   workers are never cancelled; each bounds its own insert by `deadline`.
/// - Waits on the gate, joins every worker, closes the outcome channel, and
///   then sends the [`Summary`] exactly once.
async fn feed_tokens<S: Storage>(
    tokens: Vec<Token>,
    storage: Arc<S>,
    gate: Gate,
    deadline: Option<Instant>,
    state: SharedState,
    outcome_tx: mpsc::UnboundedSender<Outcome>,
    done_tx: oneshot::Sender<Summary>,
) {
    state.set(BatchState::Running);

    let received = tokens.len();
    let abort = CancellationToken::new();
    let mut workers = JoinSet::new();
    let mut dispatched = 0;

    #[cfg(feature = "tracing")]
    tracing::debug!(
        "Dispatching {received} tokens with capacity {}",
        gate.capacity()
    );

    for token in tokens {
        if abort.is_cancelled() || outcome_tx.is_closed() {
            break;
        }

        let permit = tokio::select! {
            biased;
            () = abort.cancelled() => break,
            () = expired(deadline) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Deadline passed with {} tokens left", received - dispatched);
                break;
            }
            permit = gate.acquire() => permit,
        };

        // A worker may have aborted while we were waiting for its slot.
        if abort.is_cancelled() {
            permit.release();
            break;
        }

        workers.spawn(insert_token(
            dispatched,
            Arc::clone(&storage),
            token,
            deadline,
            outcome_tx.clone(),
            abort.clone(),
            permit,
        ));
        dispatched += 1;
    }

    gate.wait().await;

    while let Some(res) = workers.join_next().await {
        if let Err(_e) = res {
            #[cfg(feature = "tracing")]
            tracing::error!("Worker task failed: {_e}");
        }
    }

    let terminal = if abort.is_cancelled() || dispatched < received {
        BatchState::Aborted
    } else {
        BatchState::Completed
    };
    state.set(terminal);

    drop(outcome_tx);

    #[cfg(feature = "tracing")]
    tracing::debug!("Batch {terminal:?}: dispatched {dispatched} of {received} tokens");

    let summary = Summary {
        state: terminal,
        received,
        dispatched,
    };
    if done_tx.send(summary).is_err() {
        #[cfg(feature = "tracing")]
        tracing::debug!("Completion signal dropped, consumer gone");
    }
}

/// Resolves once `deadline` has passed; never without one.
async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => core::future::pending().await,
    }
}
