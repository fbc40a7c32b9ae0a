//! UCI engine session (async I/O)
//!
//! One `EngineSession` owns one engine process for its whole life. The
//! protocol state is an explicit `SessionState`; every operation checks it
//! and refuses calls that make no sense in the current state. All reads are
//! bounded by timers, and the child is killed when the session is dropped.
//!
//! A session may also keep a transcript: every line sent to or read from the
//! engine is appended to a file, one timestamped entry per line.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use chrono::Local;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};

use crate::cancel::CancelSignal;
use crate::config::{EngineOption, Timeouts};
use crate::error::HarnessError;
use crate::uci::{self, EngineLine};

/// Protocol state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    /// Handshake done, options not applied yet
    Ready,
    Configuring,
    /// Waiting for a position
    Idle,
    Thinking,
    Terminating,
    /// Process gone; the session is unusable
    Closed,
}

/// What the engine said about itself during the handshake
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineIdentity {
    pub name: Option<String>,
    pub author: Option<String>,
}

/// Result of one search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// `None` when the engine reported no move
    pub best_move: Option<String>,
    /// Time from `go` to `bestmove`
    pub elapsed: Duration,
    /// Deepest `info depth` seen
    pub depth: Option<u32>,
}

enum ReadEvent {
    Line(Result<Result<Option<String>, std::io::Error>, tokio::time::error::Elapsed>),
    Cancelled,
}

/// Live handle to one engine process
pub struct EngineSession {
    worker: usize,
    state: SessionState,
    process: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    identity: EngineIdentity,
    advertised: Vec<String>,
    timeouts: Timeouts,
    cancel: CancelSignal,
    pid: Option<u32>,
    transcript: Option<File>,
}

impl EngineSession {
    /// Spawn the engine and complete the UCI handshake.
    ///
    /// Fails with `Handshake` if the process cannot be started, exits, or does
    /// not reach `readyok` within `timeouts.startup`.
    pub async fn spawn(
        path: &Path,
        worker: usize,
        timeouts: Timeouts,
        cancel: CancelSignal,
    ) -> Result<Self, HarnessError> {
        Self::spawn_with_transcript(path, worker, timeouts, cancel, None).await
    }

    /// Like `spawn`, appending the whole UCI exchange to `transcript`.
    ///
    /// A transcript that cannot be opened is logged and skipped.
    pub async fn spawn_with_transcript(
        path: &Path,
        worker: usize,
        timeouts: Timeouts,
        cancel: CancelSignal,
        transcript: Option<&Path>,
    ) -> Result<Self, HarnessError> {
        let transcript = match transcript {
            Some(file) => match OpenOptions::new().create(true).append(true).open(file).await {
                Ok(f) => Some(f),
                Err(e) => {
                    warn!(worker, file = %file.display(), error = %e, "Failed to open UCI transcript");
                    None
                }
            },
            None => None,
        };

        let mut process = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                HarnessError::Handshake(format!("failed to spawn {}: {e}", path.display()))
            })?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| HarnessError::Handshake("engine stdin not captured".into()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| HarnessError::Handshake("engine stdout not captured".into()))?;

        let pid = process.id();
        let mut session = Self {
            worker,
            state: SessionState::Uninitialized,
            process,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            identity: EngineIdentity::default(),
            advertised: Vec::new(),
            timeouts,
            cancel,
            pid,
            transcript,
        };

        let mut cancel = session.cancel.clone();
        let startup = session.timeouts.startup;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HarnessError::Cancelled),
            r = timeout(startup, session.handshake()) => match r {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(HarnessError::Handshake(e.to_string())),
                Err(_) => Err(HarnessError::Handshake(format!(
                    "no uciok/readyok within {startup:?}"
                ))),
            },
        };

        match result {
            Ok(()) => {
                session.state = SessionState::Ready;
                debug!(
                    worker,
                    name = session.identity.name.as_deref().unwrap_or("?"),
                    options = session.advertised.len(),
                    "Engine handshake complete"
                );
                Ok(session)
            }
            Err(e) => {
                session.kill().await;
                Err(e)
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> &EngineIdentity {
        &self.identity
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Whether the engine advertised an option (UCI names are case-insensitive).
    pub fn advertises(&self, name: &str) -> bool {
        self.advertised.iter().any(|o| o.eq_ignore_ascii_case(name))
    }

    /// Apply options once. Unknown or refused options are logged and
    /// returned as `ConfigurationRejected`; they never fail the session.
    pub async fn configure(
        &mut self,
        options: &[EngineOption],
    ) -> Result<Vec<HarnessError>, HarnessError> {
        self.expect_state(SessionState::Ready, "configure")?;
        self.state = SessionState::Configuring;

        let mut rejected = Vec::new();
        let mut sent: Vec<&EngineOption> = Vec::new();
        for opt in options {
            if !self.advertises(&opt.name) {
                warn!(worker = self.worker, option = %opt.name, "Engine does not support option, skipping");
                rejected.push(HarnessError::ConfigurationRejected {
                    name: opt.name.clone(),
                    reason: "not advertised by engine".into(),
                });
                continue;
            }
            if let Err(e) = self
                .send(uci::Command::SetOption {
                    name: &opt.name,
                    value: &opt.value,
                })
                .await
            {
                return Err(self.fail(e.to_string()).await);
            }
            sent.push(opt);
        }

        let refused = self.ready_or_cancel("after setoption").await?;

        for name in refused {
            if let Some(opt) = sent.iter().find(|o| o.name.eq_ignore_ascii_case(&name)) {
                warn!(worker = self.worker, option = %opt.name, "Engine refused option");
                rejected.push(HarnessError::ConfigurationRejected {
                    name: opt.name.clone(),
                    reason: "engine reported no such option".into(),
                });
            }
        }

        self.state = SessionState::Idle;
        Ok(rejected)
    }

    /// Search a position for `budget` and return the engine's move.
    ///
    /// At `budget + move_overhead` the search is stopped. A move that only
    /// arrives after `stop` is a `Timeout` (the session stays usable); no
    /// move within `stop_grace` is a `ProcessFault` and closes the session.
    pub async fn evaluate(
        &mut self,
        fen: &str,
        budget: Duration,
    ) -> Result<Evaluation, HarnessError> {
        self.expect_state(SessionState::Idle, "evaluate")?;
        let window = budget
            .checked_add(self.timeouts.move_overhead)
            .filter(|w| Instant::now().checked_add(*w).is_some())
            .ok_or_else(|| HarnessError::Config(format!("move time {budget:?} is out of range")))?;

        // Fresh game per position so hash/history from the last one is dropped
        if let Err(e) = self.send(uci::Command::UciNewGame).await {
            return Err(self.fail(e.to_string()).await);
        }
        self.ready_or_cancel("before search").await?;

        let movetime = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX).max(1);
        if let Err(e) = self.send(uci::Command::PositionFen(fen)).await {
            return Err(self.fail(e.to_string()).await);
        }
        if let Err(e) = self.send(uci::Command::GoMoveTime(movetime)).await {
            return Err(self.fail(e.to_string()).await);
        }

        self.state = SessionState::Thinking;
        let started = Instant::now();
        let mut depth = None;

        let Some(deadline) = started.checked_add(window) else {
            return Err(self.fail(format!("search window {window:?} is out of range")).await);
        };
        loop {
            match self.next_line_until(deadline).await {
                ReadEvent::Cancelled => {
                    self.kill().await;
                    return Err(HarnessError::Cancelled);
                }
                ReadEvent::Line(Err(_)) => break,
                ReadEvent::Line(Ok(Ok(Some(line)))) => match uci::parse_line(&line) {
                    EngineLine::BestMove(best_move) => {
                        self.state = SessionState::Idle;
                        return Ok(Evaluation {
                            best_move,
                            elapsed: started.elapsed(),
                            depth,
                        });
                    }
                    EngineLine::Info { depth: Some(d) } => depth = Some(d),
                    _ => {}
                },
                ReadEvent::Line(Ok(Ok(None))) => {
                    return Err(self.fail("engine exited while thinking".into()).await);
                }
                ReadEvent::Line(Ok(Err(e))) => {
                    return Err(self.fail(format!("failed to read from engine: {e}")).await);
                }
            }
        }

        debug!(worker = self.worker, ?budget, "Budget exhausted, sending stop");
        if let Err(e) = self.send(uci::Command::Stop).await {
            return Err(self.fail(e.to_string()).await);
        }

        let grace = self.timeouts.stop_grace;
        let Some(grace_deadline) = Instant::now().checked_add(grace) else {
            return Err(self.fail(format!("stop grace {grace:?} is out of range")).await);
        };
        loop {
            match self.next_line_until(grace_deadline).await {
                ReadEvent::Cancelled => {
                    self.kill().await;
                    return Err(HarnessError::Cancelled);
                }
                ReadEvent::Line(Err(_)) => {
                    return Err(self
                        .fail(format!("no bestmove within {grace:?} after stop"))
                        .await);
                }
                ReadEvent::Line(Ok(Ok(Some(line)))) => {
                    if let EngineLine::BestMove(late_move) = uci::parse_line(&line) {
                        self.state = SessionState::Idle;
                        return Err(HarnessError::Timeout { budget, late_move });
                    }
                }
                ReadEvent::Line(Ok(Ok(None))) => {
                    return Err(self.fail("engine exited after stop".into()).await);
                }
                ReadEvent::Line(Ok(Err(e))) => {
                    return Err(self.fail(format!("failed to read from engine: {e}")).await);
                }
            }
        }
    }

    /// Send `quit`, wait `quit_grace` for the process to exit, then kill it.
    pub async fn shutdown(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Terminating;

        let _ = self.send(uci::Command::Quit).await;
        match timeout(self.timeouts.quit_grace, self.process.wait()).await {
            Ok(Ok(status)) => debug!(worker = self.worker, %status, "Engine exited"),
            Ok(Err(e)) => warn!(worker = self.worker, error = %e, "Failed to wait for engine"),
            Err(_) => {
                warn!(worker = self.worker, "Engine ignored quit, killing");
                let _ = self.process.kill().await;
            }
        }
        self.state = SessionState::Closed;
    }

    /// Kill the process immediately.
    pub async fn kill(&mut self) {
        let _ = self.process.kill().await;
        self.state = SessionState::Closed;
    }

    fn expect_state(&self, expected: SessionState, op: &'static str) -> Result<(), HarnessError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(HarnessError::InvalidState {
                op,
                state: self.state,
            })
        }
    }

    /// Tear the session down after a protocol failure.
    async fn fail(&mut self, reason: String) -> HarnessError {
        warn!(worker = self.worker, state = ?self.state, %reason, "Engine fault, killing process");
        self.kill().await;
        HarnessError::ProcessFault(reason)
    }

    async fn handshake(&mut self) -> Result<(), HarnessError> {
        self.send(uci::Command::Uci).await?;
        loop {
            match uci::parse_line(&self.read_line().await?) {
                EngineLine::IdName(name) => self.identity.name = Some(name),
                EngineLine::IdAuthor(author) => self.identity.author = Some(author),
                EngineLine::Option { name } => self.advertised.push(name),
                EngineLine::UciOk => break,
                _ => {}
            }
        }
        self.sync_ready().await?;
        Ok(())
    }

    /// `sync_ready` bounded by the startup timeout and raced against cancellation.
    async fn ready_or_cancel(&mut self, what: &str) -> Result<Vec<String>, HarnessError> {
        let mut cancel = self.cancel.clone();
        let startup = self.timeouts.startup;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = timeout(startup, self.sync_ready()) => Some(r),
        };
        match result {
            None => {
                self.kill().await;
                Err(HarnessError::Cancelled)
            }
            Some(Ok(Ok(refused))) => Ok(refused),
            Some(Ok(Err(e))) => Err(self.fail(e.to_string()).await),
            Some(Err(_)) => Err(self.fail(format!("no readyok {what}")).await),
        }
    }

    /// `isready` round trip; returns any `No such option` names seen meanwhile.
    async fn sync_ready(&mut self) -> Result<Vec<String>, HarnessError> {
        self.send(uci::Command::IsReady).await?;
        let mut refused = Vec::new();
        loop {
            match uci::parse_line(&self.read_line().await?) {
                EngineLine::ReadyOk => return Ok(refused),
                EngineLine::NoSuchOption(name) => refused.push(name),
                _ => {}
            }
        }
    }

    async fn next_line_until(&mut self, deadline: Instant) -> ReadEvent {
        let mut cancel = self.cancel.clone();
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => ReadEvent::Cancelled,
            line = timeout_at(deadline, self.stdout.next_line()) => ReadEvent::Line(line),
        };
        if let ReadEvent::Line(Ok(Ok(Some(line)))) = &event {
            debug!(worker = self.worker, line = line.trim(), "engine >");
            self.record("<<", line).await;
        }
        event
    }

    /// Send a command to the engine
    async fn send(&mut self, cmd: uci::Command<'_>) -> Result<(), HarnessError> {
        debug!(worker = self.worker, cmd = %cmd, "engine <");
        let text = cmd.to_string();
        self.record(">>", &text).await;
        self.stdin
            .write_all(format!("{text}\n").as_bytes())
            .await
            .map_err(|e| HarnessError::ProcessFault(format!("failed to write to engine: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| HarnessError::ProcessFault(format!("failed to flush engine stdin: {e}")))?;
        Ok(())
    }

    /// Read one line; EOF means the engine went away.
    async fn read_line(&mut self) -> Result<String, HarnessError> {
        match self.stdout.next_line().await {
            Ok(Some(line)) => {
                debug!(worker = self.worker, line = line.trim(), "engine >");
                self.record("<<", &line).await;
                Ok(line)
            }
            Ok(None) => Err(HarnessError::ProcessFault("engine closed its output".into())),
            Err(e) => Err(HarnessError::ProcessFault(format!(
                "failed to read from engine: {e}"
            ))),
        }
    }

    /// Append one line to the transcript. A failed write closes it.
    async fn record(&mut self, direction: &str, line: &str) {
        let Some(file) = self.transcript.as_mut() else {
            return;
        };
        let pid = self.pid.map(|p| p.to_string()).unwrap_or_else(|| "?".into());
        let entry = format!(
            "{} - (PID:{pid}) - {direction} {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            line.trim_end()
        );
        let written = match file.write_all(entry.as_bytes()).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(worker = self.worker, error = %e, "Failed to write UCI transcript, closing it");
            self.transcript = None;
        }
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        // Best-effort synchronous kill in drop
        let _ = self.process.start_kill();
    }
}

/// Start a throwaway session just to read the engine's `id name`.
pub async fn query_engine_name(path: &Path, timeouts: Timeouts) -> Result<String, HarnessError> {
    let mut session = EngineSession::spawn(path, 0, timeouts, CancelSignal::never()).await?;
    let name = session.identity().name.clone();
    session.shutdown().await;
    name.filter(|n| !n.is_empty())
        .ok_or_else(|| HarnessError::Handshake("engine did not report an id name".into()))
}
