//! Worker pool: `W` workers, one engine session each, draining a shared queue.
//!
//! Outcomes flow over a channel to a single accumulation task that scores
//! and folds them, so the aggregate has exactly one owner.

use std::ops::Range;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use suite_core::aggregate::Aggregator;
use suite_core::scoring;
use suite_core::{Fault, Outcome, PositionRecord, Report};
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::cancel::CancelSignal;
use crate::config::RunConfig;
use crate::engine::EngineSession;
use crate::error::HarnessError;
use crate::report::file_stem;

/// Everything a finished (or cancelled) run produced
#[derive(Debug)]
pub struct RunResult {
    pub engine_name: String,
    pub positions: Arc<Vec<PositionRecord>>,
    /// One per evaluated position, in suite order
    pub outcomes: Vec<Outcome>,
    pub aggregator: Aggregator,
    /// True when the run was cancelled before the queue drained
    pub truncated: bool,
    pub elapsed: Duration,
}

impl RunResult {
    pub fn report(&self, rank_limit: usize) -> Report {
        self.aggregator.report(rank_limit)
    }

    pub fn fault_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_fault()).count()
    }
}

/// Shared position queue; each index is handed out exactly once.
#[derive(Debug)]
struct WorkQueue {
    next: AtomicUsize,
    len: usize,
}

impl WorkQueue {
    fn new(len: usize) -> Self {
        Self {
            next: AtomicUsize::new(0),
            len,
        }
    }

    fn pop(&self) -> Option<usize> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed);
        (idx < self.len).then_some(idx)
    }

    /// Claim everything not handed out yet.
    fn drain(&self) -> Range<usize> {
        let start = self.next.swap(self.len, Ordering::Relaxed).min(self.len);
        start..self.len
    }
}

struct PoolContext {
    config: RunConfig,
    positions: Arc<Vec<PositionRecord>>,
    queue: WorkQueue,
    /// Set once any worker gets a configured session
    any_session: AtomicBool,
    last_start_error: Mutex<Option<String>>,
}

impl PoolContext {
    fn outcome(
        &self,
        index: usize,
        chosen_move: Option<String>,
        elapsed: Duration,
        fault: Option<Fault>,
    ) -> Outcome {
        let position = &self.positions[index];
        Outcome {
            position_index: index,
            position_id: position.label.clone(),
            category: position.id.clone(),
            chosen_move,
            elapsed,
            engine_name: self.config.engine_name.clone(),
            fault,
        }
    }

    /// Per-worker UCI transcript, when enabled
    fn transcript_path(&self, worker: usize) -> Option<PathBuf> {
        let dir = self.config.uci_log_dir.as_ref()?;
        let stem = file_stem(&self.config.engine_name);
        Some(dir.join(format!("{stem}_analysis_worker_{worker}.txt")))
    }

    /// Spawn and configure a session, retrying up to `max_spawn_attempts`.
    async fn start_session(
        &self,
        worker: usize,
        cancel: &CancelSignal,
    ) -> Result<EngineSession, HarnessError> {
        let transcript = self.transcript_path(worker);
        let mut last_error = None;
        for attempt in 1..=self.config.max_spawn_attempts {
            if cancel.is_cancelled() {
                return Err(HarnessError::Cancelled);
            }
            let result = async {
                let mut session = EngineSession::spawn_with_transcript(
                    &self.config.engine_path,
                    worker,
                    self.config.timeouts.clone(),
                    cancel.clone(),
                    transcript.as_deref(),
                )
                .await?;
                session.configure(&self.config.options).await?;
                Ok::<_, HarnessError>(session)
            }
            .await;

            match result {
                Ok(session) => {
                    self.any_session.store(true, Ordering::Relaxed);
                    debug!(worker, attempt, "Engine session ready");
                    return Ok(session);
                }
                Err(HarnessError::Cancelled) => return Err(HarnessError::Cancelled),
                Err(e) => {
                    warn!(worker, attempt, error = %e, "Failed to start engine session");
                    last_error = Some(e);
                }
            }
        }

        let err = last_error.unwrap_or_else(|| HarnessError::Handshake("no attempts made".into()));
        if let Ok(mut slot) = self.last_start_error.lock() {
            *slot = Some(err.to_string());
        }
        Err(err)
    }
}

/// Run every position through the engine with `config.workers` sessions.
///
/// Per-position failures become fault-flagged outcomes. The only fatal error
/// is that no worker could start an engine at all.
pub async fn run_suite(
    config: RunConfig,
    positions: Vec<PositionRecord>,
    cancel: CancelSignal,
) -> Result<RunResult, HarnessError> {
    config.validate()?;

    let started = Instant::now();
    let total = positions.len();
    let workers = config.workers;
    let engine_name = config.engine_name.clone();
    let positions = Arc::new(positions);

    let ctx = Arc::new(PoolContext {
        config,
        positions: positions.clone(),
        queue: WorkQueue::new(total),
        any_session: AtomicBool::new(false),
        last_start_error: Mutex::new(None),
    });

    let (tx, rx) = mpsc::unbounded_channel::<Outcome>();
    let collector = tokio::spawn(collect(rx, positions.clone()));

    info!(positions = total, workers, engine = %engine_name, "Starting analysis");

    let mut handles = Vec::with_capacity(workers);
    for worker in 1..=workers {
        let task = run_worker(worker, ctx.clone(), tx.clone(), cancel.clone())
            .instrument(info_span!("worker", worker));
        handles.push(tokio::spawn(task));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Worker task failed");
        }
    }

    let truncated = cancel.is_cancelled();
    if !truncated {
        // Whatever is left had no worker to run it
        let leftover = ctx.queue.drain();
        if !leftover.is_empty() {
            warn!(count = leftover.len(), "Recording abandoned positions");
        }
        for index in leftover {
            let _ = tx.send(ctx.outcome(index, None, Duration::ZERO, Some(Fault::Abandoned)));
        }
    }
    drop(tx);

    let (outcomes, aggregator) = collector
        .await
        .map_err(|e| HarnessError::ProcessFault(format!("outcome collector failed: {e}")))?;

    if total > 0 && !truncated && !ctx.any_session.load(Ordering::Relaxed) {
        let reason = ctx
            .last_start_error
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .unwrap_or_else(|| "unknown error".into());
        return Err(HarnessError::NoUsableSession(reason));
    }

    let elapsed = started.elapsed();
    info!(
        evaluated = outcomes.len(),
        total,
        truncated,
        elapsed_secs = elapsed.as_secs_f64(),
        "Analysis complete"
    );

    Ok(RunResult {
        engine_name,
        positions,
        outcomes,
        aggregator,
        truncated,
        elapsed,
    })
}

async fn run_worker(
    worker: usize,
    ctx: Arc<PoolContext>,
    tx: mpsc::UnboundedSender<Outcome>,
    cancel: CancelSignal,
) {
    let mut session: Option<EngineSession> = None;

    // One transcript per worker per run; replacement engines append to it
    if let Some(path) = ctx.transcript_path(worker) {
        if let Err(e) = tokio::fs::File::create(&path).await {
            warn!(worker, file = %path.display(), error = %e, "Failed to create UCI transcript");
        }
    }

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(index) = ctx.queue.pop() else {
            break;
        };

        let mut current = match session.take() {
            Some(s) => s,
            None => match ctx.start_session(worker, &cancel).await {
                Ok(s) => s,
                Err(HarnessError::Cancelled) => break,
                Err(e) => {
                    error!(worker, error = %e, "Giving up on engine, abandoning remaining work");
                    let outcome =
                        ctx.outcome(index, None, Duration::ZERO, Some(Fault::HandshakeFailed));
                    let _ = tx.send(outcome);
                    break;
                }
            },
        };

        let position = &ctx.positions[index];
        let clock = Instant::now();
        match current
            .evaluate(&position.board_state, ctx.config.move_time)
            .await
        {
            Ok(eval) => {
                debug!(
                    worker,
                    id = %position.label,
                    best_move = eval.best_move.as_deref().unwrap_or("-"),
                    depth = ?eval.depth,
                    "Position evaluated"
                );
                let _ = tx.send(ctx.outcome(index, eval.best_move, eval.elapsed, None));
                session = Some(current);
            }
            Err(HarnessError::Timeout { late_move, .. }) => {
                warn!(worker, id = %position.label, "Engine overran its time budget");
                let outcome =
                    ctx.outcome(index, late_move, clock.elapsed(), Some(Fault::Timeout));
                let _ = tx.send(outcome);
                session = Some(current);
            }
            Err(HarnessError::Cancelled) => break,
            Err(e) => {
                warn!(worker, id = %position.label, error = %e, "Evaluation failed, replacing engine");
                let outcome =
                    ctx.outcome(index, None, clock.elapsed(), Some(Fault::ProcessFault));
                let _ = tx.send(outcome);
            }
        }
    }

    if let Some(mut s) = session {
        if cancel.is_cancelled() {
            s.kill().await;
        } else {
            s.shutdown().await;
        }
    }
    debug!(worker, "Worker finished");
}

/// Single accumulation point: score and fold every outcome.
async fn collect(
    mut rx: mpsc::UnboundedReceiver<Outcome>,
    positions: Arc<Vec<PositionRecord>>,
) -> (Vec<Outcome>, Aggregator) {
    let mut aggregator = Aggregator::with_descriptions(
        positions.iter().map(|p| (p.id.clone(), p.description.clone())),
    );
    let mut outcomes = Vec::with_capacity(positions.len());
    let step = (positions.len() / 10).max(1);

    while let Some(outcome) = rx.recv().await {
        let scored = scoring::score(&positions[outcome.position_index], &outcome);
        aggregator.fold(&scored);
        outcomes.push(outcome);

        if outcomes.len() % step == 0 {
            info!(done = outcomes.len(), total = positions.len(), "Progress");
        }
    }

    outcomes.sort_by_key(|o| o.position_index);
    (outcomes, aggregator)
}
