//! Handle to one running program

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use super::group;
use super::{ExitReport, RunEvent};
use crate::error::PlaygroundError;

const READ_CHUNK_SIZE: usize = 4096;

/// Output chunks buffered before the program's pipes stop being read
const EVENT_CAPACITY: usize = 64;

/// Input lines queued for a program that is not reading them yet
const INPUT_CAPACITY: usize = 64;

/// How long to wait for output to drain once the program has exited
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A spawned program and its standard streams.
///
/// The program runs in its own process group; killing it takes any children
/// it forked along. Dropping the handle without calling [`kill`] still
/// terminates the program.
///
/// [`kill`]: RunningProcess::kill
pub struct RunningProcess {
    pid: Option<u32>,
    started_at: Instant,
    input: Option<mpsc::Sender<String>>,
    writer: Option<JoinHandle<()>>,
    events: mpsc::Receiver<RunEvent>,
    kill_tx: Option<oneshot::Sender<()>>,
    reaper: Option<JoinHandle<()>>,
    exited: Arc<AtomicBool>,
}

impl RunningProcess {
    /// Spawn `binary` with piped stdin/stdout/stderr
    pub fn spawn(binary: &Path) -> Result<Self, PlaygroundError> {
        let mut child = Command::new(binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PlaygroundError::spawn(binary.to_string_lossy(), e))?;

        let started_at = Instant::now();
        let pid = child.id();
        debug!("Spawned {:?} (pid {:?})", binary, pid);

        let (tx, events) = mpsc::channel(EVENT_CAPACITY);

        let (input, writer) = match child.stdin.take() {
            Some(stdin) => {
                let (input_tx, input_rx) = mpsc::channel(INPUT_CAPACITY);
                let writer = tokio::spawn(feed_input(stdin, input_rx, pid));
                (Some(input_tx), Some(writer))
            }
            None => (None, None),
        };

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(forward_output(out, tx.clone(), RunEvent::Stdout)));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(forward_output(err, tx.clone(), RunEvent::Stderr)));

        let (kill_tx, kill_rx) = oneshot::channel();
        let exited = Arc::new(AtomicBool::new(false));

        let reaper = tokio::spawn(reap(
            child,
            pid,
            started_at,
            kill_rx,
            [stdout_task, stderr_task],
            tx,
            exited.clone(),
        ));

        Ok(Self {
            pid,
            started_at,
            input,
            writer,
            events,
            kill_tx: Some(kill_tx),
            reaper: Some(reaper),
            exited,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// True once the OS reported the program gone (exited or killed)
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Next output chunk or exit event. None after the exit event was taken,
    /// or after the program was killed.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    /// Queue one line (a newline is appended) for the program's stdin.
    ///
    /// Never waits for the program to read. Returns false when the line was
    /// dropped because the program is gone, closed its stdin, or already has
    /// a full queue of unread input.
    pub fn write_line(&self, line: &str) -> bool {
        if self.has_exited() {
            debug!("Dropping input for exited process {:?}", self.pid);
            return false;
        }
        let Some(input) = self.input.as_ref() else {
            return false;
        };

        let mut data = String::with_capacity(line.len() + 1);
        data.push_str(line);
        data.push('\n');

        match input.try_send(data) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Input queue of process {:?} is full, line dropped", self.pid);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Kill the program and wait until it has been reaped.
    ///
    /// Queued input and unread output are discarded. Calling this on an
    /// exited or already killed process does nothing.
    pub async fn kill(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            // The reaper is gone if the program already exited
            let _ = kill_tx.send(());
        }
        self.input = None;
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        // Also releases a reaper blocked on reporting the exit
        self.events.close();

        if let Some(reaper) = self.reaper.take() {
            if let Err(e) = reaper.await {
                warn!("Reaper task for process {:?} failed: {}", self.pid, e);
            }
        }
    }
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

async fn feed_input(mut stdin: ChildStdin, mut lines: mpsc::Receiver<String>, pid: Option<u32>) {
    while let Some(line) = lines.recv().await {
        let written = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            debug!("stdin of process {:?} closed: {}", pid, e);
            break;
        }
    }
}

async fn forward_output<R>(
    mut reader: R,
    tx: mpsc::Sender<RunEvent>,
    wrap: fn(String) -> RunEvent,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                // Waits while the consumer is behind, which pauses the program
                if tx.send(wrap(chunk)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Output stream read failed: {}", e);
                break;
            }
        }
    }
}

/// Wait for the program to exit or for a kill request, whichever comes first
async fn reap(
    mut child: Child,
    pid: Option<u32>,
    started_at: Instant,
    mut kill_rx: oneshot::Receiver<()>,
    readers: [Option<JoinHandle<()>>; 2],
    tx: mpsc::Sender<RunEvent>,
    exited: Arc<AtomicBool>,
) {
    let natural = match pid {
        Some(pid) => tokio::select! {
            _ = group::leader_exited(pid) => true,
            // A dropped sender means the handle is gone, which is also a kill
            _ = &mut kill_rx => false,
        },
        None => true,
    };
    let elapsed = started_at.elapsed();

    // The leader is not reaped yet, so the group id still names this group
    if let Some(pid) = pid {
        group::kill_group(pid);
    }
    let status = child.wait().await;
    exited.store(true, Ordering::Release);

    if !natural {
        for reader in readers.into_iter().flatten() {
            reader.abort();
        }
        debug!("Process {:?} killed", pid);
        return;
    }

    for reader in readers.into_iter().flatten() {
        if timeout(DRAIN_TIMEOUT, reader).await.is_err() {
            warn!("Output of process {:?} did not drain in time", pid);
        }
    }

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!("Failed to wait for process {:?}: {}", pid, e);
            None
        }
    };
    debug!("Process {:?} exited with {:?} after {:?}", pid, code, elapsed);
    let _ = tx.send(RunEvent::Exited(ExitReport { elapsed, code })).await;
}

#[cfg(test)]
pub(crate) fn is_pid_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect_until_exit(process: &mut RunningProcess) -> (String, ExitReport) {
        let mut stdout = String::new();
        loop {
            let event = timeout(Duration::from_secs(10), process.next_event())
                .await
                .expect("process did not finish in time")
                .expect("event stream closed before exit");
            match event {
                RunEvent::Stdout(chunk) => stdout.push_str(&chunk),
                RunEvent::Stderr(_) => {}
                RunEvent::Exited(report) => return (stdout, report),
            }
        }
    }

    #[tokio::test]
    async fn test_cat_echoes_input() {
        let mut process = RunningProcess::spawn(Path::new("/bin/cat")).unwrap();
        assert!(process.write_line("42"));

        let event = timeout(Duration::from_secs(10), process.next_event())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, RunEvent::Stdout("42\n".to_string()));

        let pid = process.pid().unwrap();
        process.kill().await;
        assert!(process.has_exited());
        assert!(!is_pid_alive(pid));
    }

    #[tokio::test]
    async fn test_natural_exit_reports_once() {
        let mut process = RunningProcess::spawn(Path::new("/bin/true")).unwrap();
        let (stdout, report) = collect_until_exit(&mut process).await;
        assert!(stdout.is_empty());
        assert_eq!(report.code, Some(0));

        // Nothing after the exit event
        process.kill().await;
        assert!(process.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_kill_is_idempotent() {
        let mut process = RunningProcess::spawn(Path::new("/bin/cat")).unwrap();
        process.kill().await;
        process.kill().await;
        assert!(process.has_exited());
    }

    #[tokio::test]
    async fn test_write_after_exit_is_noop() {
        let mut process = RunningProcess::spawn(Path::new("/bin/true")).unwrap();
        collect_until_exit(&mut process).await;
        assert!(!process.write_line("ignored"));
        process.kill().await;
        assert!(!process.write_line("ignored"));
    }

    #[tokio::test]
    async fn test_drop_kills_process() {
        let process = RunningProcess::spawn(Path::new("/bin/cat")).unwrap();
        let pid = process.pid().unwrap();
        drop(process);

        let deadline = Instant::now() + Duration::from_secs(5);
        while is_pid_alive(pid) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!is_pid_alive(pid));
    }

    fn script(dir: &Path, body: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("code_script.run");
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_input_never_waits_for_reader() {
        let dir = tempfile::tempdir().unwrap();
        let binary = script(dir.path(), "#!/bin/sh\nexec sleep 60\n");
        let mut process = RunningProcess::spawn(&binary).unwrap();
        let pid = process.pid().unwrap();

        // Far more than a pipe buffer plus the queue; extra lines are dropped
        let line = "x".repeat(8 * 1024);
        let accepted = (0..200).filter(|_| process.write_line(&line)).count();
        assert!(accepted > 0);
        assert!(accepted < 200);

        timeout(Duration::from_secs(5), process.kill())
            .await
            .expect("kill blocked behind unread input");
        assert!(!is_pid_alive(pid));
    }

    #[tokio::test]
    async fn test_flooding_output_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let binary = script(dir.path(), "#!/bin/sh\nexec yes flood\n");
        let mut process = RunningProcess::spawn(&binary).unwrap();
        let pid = process.pid().unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(process.events.len() <= EVENT_CAPACITY);
        // The writer is paused on a full pipe, not dead
        assert!(!process.has_exited());

        timeout(Duration::from_secs(5), process.kill())
            .await
            .expect("kill blocked behind unread output");
        assert!(!is_pid_alive(pid));
    }

    #[tokio::test]
    async fn test_kill_takes_down_forked_children() {
        let dir = tempfile::tempdir().unwrap();
        let binary = script(dir.path(), "#!/bin/sh\nsleep 60 &\nsleep 60\n");
        let mut process = RunningProcess::spawn(&binary).unwrap();
        let pid = process.pid().unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        process.kill().await;
        assert!(group::group_gone_within(pid, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_natural_exit_kills_leftover_children() {
        let dir = tempfile::tempdir().unwrap();
        let binary = script(dir.path(), "#!/bin/sh\nsleep 60 &\necho done\n");
        let mut process = RunningProcess::spawn(&binary).unwrap();
        let pid = process.pid().unwrap();

        let (stdout, report) = collect_until_exit(&mut process).await;
        assert_eq!(stdout, "done\n");
        assert_eq!(report.code, Some(0));
        assert!(group::group_gone_within(pid, Duration::from_secs(2)).await);
        process.kill().await;
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let err = RunningProcess::spawn(Path::new("/nonexistent/code_x.exe")).err().unwrap();
        assert!(matches!(err, PlaygroundError::Spawn { .. }));
    }
}
