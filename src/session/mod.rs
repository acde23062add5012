//! Session controller - one interactive compile-and-run session per connection
//!
//! A session owns at most one compiler run and at most one running program.
//! Everything that happens to it (client frames, compiler completion, program
//! output and exit, the input-wait timer, server shutdown) is handled one at a
//! time by a single select loop, so no state is shared with other sessions.
//!
//! States:
//! - `Idle` -> `Compiling` on a code submission
//! - `Compiling` -> `Running` on success, back to `Idle` on a compile error
//! - `Running` <-> `WaitingForInput` driven by the input-wait heuristic
//! - `Running`/`WaitingForInput` -> `Finished` when the program exits
//!
//! A new submission in any state first kills the current compiler or program
//! (and waits for the OS to reap it) before the next compiler starts.
//!
//! The loop never waits on the program itself: input is queued, and a slow
//! client only delays the next outbound message, which still gives way to
//! shutdown.

pub mod registry;

use std::future::pending;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinError;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::artifacts::{ArtifactPaths, ArtifactStore};
use crate::compiler::{CompileJob, CompileResult, Toolchain};
use crate::config::ProbeConfig;
use crate::error::PlaygroundError;
use crate::heuristic::{InputDetector, InputProbe};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::runner::{RunEvent, RunningProcess};

pub use registry::{SessionChannel, SessionRegistry};

/// Everything sessions share read-only
pub struct SessionContext {
    pub artifacts: ArtifactStore,
    pub toolchain: Arc<Toolchain>,
    pub detector: InputDetector,
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Compiling,
    Running,
    WaitingForInput,
    Finished,
}

type CompileOutcome = Result<Option<CompileResult>, PlaygroundError>;

pub struct Session {
    id: Uuid,
    ctx: Arc<SessionContext>,
    paths: ArtifactPaths,
    state: SessionState,
    outbound: mpsc::Sender<ServerMessage>,
    shutdown: watch::Receiver<bool>,
    compile_job: Option<CompileJob>,
    process: Option<RunningProcess>,
    probe: InputProbe,
    may_read_input: bool,
    started_at: Option<Instant>,
}

impl Session {
    pub fn new(
        id: Uuid,
        ctx: Arc<SessionContext>,
        outbound: mpsc::Sender<ServerMessage>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let paths = ctx.artifacts.allocate(id);
        let probe = InputProbe::new(ctx.probe.clone());
        Self {
            id,
            ctx,
            paths,
            state: SessionState::Idle,
            outbound,
            shutdown,
            compile_job: None,
            process: None,
            probe,
            may_read_input: false,
            started_at: None,
        }
    }

    /// Drive the session until the client disconnects or shutdown is signalled.
    ///
    /// `inbound` carries raw text frames from the client; the session ends
    /// when its sender is dropped or the shutdown flag is raised. Cleanup
    /// always runs before returning.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<String>) {
        info!("Session {} opened", self.id);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_requested(&mut self.shutdown) => {
                    info!("Session {} interrupted by shutdown", self.id);
                    break;
                }
                event = next_run_event(&mut self.process) => {
                    self.on_run_event(event).await;
                }
                result = join_compile(&mut self.compile_job) => {
                    self.on_compiled(result).await;
                }
                frame = inbound.recv() => match frame {
                    Some(text) => self.on_frame(&text).await,
                    None => {
                        info!("Session {} disconnected", self.id);
                        break;
                    }
                },
                _ = probe_deadline(self.probe.deadline()) => {
                    self.request_input().await;
                }
            }
        }

        self.teardown().await;
    }

    async fn on_frame(&mut self, text: &str) {
        match ClientMessage::parse(text) {
            Ok(ClientMessage::Code { code }) => self.submit(code).await,
            Ok(ClientMessage::Input { input }) => self.provide_input(&input).await,
            Err(e) => {
                warn!("Session {}: {}", self.id, e);
                self.send(ServerMessage::internal_error()).await;
            }
        }
    }

    async fn submit(&mut self, code: String) {
        self.stop_current().await;

        if let Err(e) = self.ctx.artifacts.delete_if_exists(&self.paths.binary).await {
            warn!("Session {}: {}", self.id, e);
        }
        if let Err(e) = self.ctx.artifacts.write(&self.paths.source, &code).await {
            error!("Session {}: failed to write source: {}", self.id, e);
            self.send(ServerMessage::internal_error()).await;
            self.state = SessionState::Idle;
            return;
        }

        self.may_read_input = self.ctx.detector.may_read_input(&code);
        debug!(
            "Session {}: compiling {} bytes (may read input: {})",
            self.id,
            code.len(),
            self.may_read_input
        );

        self.compile_job = Some(CompileJob::spawn(
            Arc::clone(&self.ctx.toolchain),
            self.paths.source.clone(),
            self.paths.binary.clone(),
        ));
        self.state = SessionState::Compiling;
    }

    async fn on_compiled(&mut self, result: Result<CompileOutcome, JoinError>) {
        match result {
            Ok(Ok(Some(CompileResult { success: true, .. }))) => self.start_run().await,
            Ok(Ok(Some(CompileResult { message, .. }))) => {
                debug!("Session {}: compilation failed", self.id);
                self.send(ServerMessage::error(
                    message.unwrap_or_else(|| "Compilation failed".to_string()),
                ))
                .await;
                self.state = SessionState::Idle;
            }
            Ok(Ok(None)) => {
                debug!("Session {}: compilation cancelled", self.id);
                self.state = SessionState::Idle;
            }
            Ok(Err(e)) => {
                error!("Session {}: {}", self.id, e);
                self.send(ServerMessage::error(e.to_string())).await;
                self.state = SessionState::Idle;
            }
            Err(e) => {
                error!("Session {}: compile task failed: {}", self.id, e);
                self.send(ServerMessage::internal_error()).await;
                self.state = SessionState::Idle;
            }
        }
    }

    async fn start_run(&mut self) {
        self.send(ServerMessage::compiled()).await;

        match RunningProcess::spawn(&self.paths.binary) {
            Ok(process) => {
                info!("Session {}: running pid {:?}", self.id, process.pid());
                self.started_at = Some(process.started_at());
                self.process = Some(process);
                self.send(ServerMessage::running()).await;
                self.probe.start(self.may_read_input);
                self.state = SessionState::Running;
            }
            Err(e) => {
                error!("Session {}: {}", self.id, e);
                self.send(ServerMessage::error(e.to_string())).await;
                self.state = SessionState::Idle;
            }
        }
    }

    async fn on_run_event(&mut self, event: Option<RunEvent>) {
        match event {
            Some(RunEvent::Stdout(chunk)) => {
                let prompt_now = self.probe.on_output(&chunk);
                self.send(ServerMessage::Output { message: chunk }).await;
                if prompt_now {
                    self.request_input().await;
                }
            }
            Some(RunEvent::Stderr(chunk)) => {
                self.send(ServerMessage::error(chunk)).await;
            }
            Some(RunEvent::Exited(report)) => {
                self.release_process().await;
                info!(
                    "Session {}: program exited with {:?} after {}s",
                    self.id,
                    report.code,
                    report.timer()
                );
                self.send(ServerMessage::finished(report.timer())).await;
                self.state = SessionState::Finished;
            }
            None => {
                // Stream closed without an exit report
                self.release_process().await;
                if matches!(
                    self.state,
                    SessionState::Running | SessionState::WaitingForInput
                ) {
                    self.state = SessionState::Idle;
                }
            }
        }
    }

    async fn request_input(&mut self) {
        let alive = self
            .process
            .as_ref()
            .map(|p| !p.has_exited())
            .unwrap_or(false);

        if self.probe.fire(alive) {
            debug!(
                "Session {}: requesting input {:?} after start",
                self.id,
                self.started_at.map(|t| t.elapsed())
            );
            self.send(ServerMessage::InputRequest).await;
            self.state = SessionState::WaitingForInput;
        }
    }

    async fn provide_input(&mut self, input: &str) {
        let Some(process) = self.process.as_ref() else {
            debug!("Session {}: no running program, input dropped", self.id);
            return;
        };

        if !process.write_line(input) {
            debug!("Session {}: input not delivered", self.id);
        }
        let was_waiting = self.probe.is_waiting();
        self.probe.on_input();
        if was_waiting {
            self.state = SessionState::Running;
        }
    }

    /// Kill and reap the running program, if any
    async fn release_process(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.kill().await;
        }
        self.probe.stop();
        self.started_at = None;
    }

    /// Abort the in-flight compile and kill the running program
    async fn stop_current(&mut self) {
        if let Some(job) = self.compile_job.take() {
            job.cancel().await;
        }
        self.release_process().await;
    }

    async fn teardown(&mut self) {
        self.stop_current().await;
        self.ctx.artifacts.release(&self.paths).await;
        info!("Session {} closed", self.id);
    }

    /// Queue a message for the client, waiting while its queue is full.
    ///
    /// Gives up when the client is gone or shutdown begins.
    async fn send(&mut self, message: ServerMessage) {
        tokio::select! {
            sent = self.outbound.send(message) => {
                if sent.is_err() {
                    debug!("Session {}: client channel closed", self.id);
                }
            }
            _ = shutdown_requested(&mut self.shutdown) => {
                debug!("Session {}: message dropped for shutdown", self.id);
            }
        }
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender also ends the session
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn next_run_event(process: &mut Option<RunningProcess>) -> Option<RunEvent> {
    match process {
        Some(process) => process.next_event().await,
        None => pending().await,
    }
}

async fn join_compile(job: &mut Option<CompileJob>) -> Result<CompileOutcome, JoinError> {
    let Some(running) = job.as_mut() else {
        return pending().await;
    };
    let result = running.join().await;
    *job = None;
    result
}

async fn probe_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
