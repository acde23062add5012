//! Compiler module - Source code compilation
//!
//! Runs the configured compiler as a subprocess against a session's source
//! artifact and collects its diagnostics. A non-zero exit is a normal
//! `CompileResult`, only a failure to start the compiler is an error.
//!
//! The compiler leads its own process group, so cancelling a compilation also
//! kills the helpers it started (`cc1plus`, `as`, `ld`, ...).

pub mod toolchain;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

use crate::error::PlaygroundError;
use crate::runner::group;

pub use toolchain::Toolchain;

/// Result of a compilation attempt
#[derive(Debug)]
pub struct CompileResult {
    pub success: bool,
    /// Compiler diagnostics, present when compilation failed
    pub message: Option<String>,
}

type CompileOutcome = Result<Option<CompileResult>, PlaygroundError>;

/// Compilation running in the background.
///
/// Dropping the job cancels it without waiting; use [`CompileJob::cancel`] to
/// also wait until every compiler process is gone.
pub struct CompileJob {
    handle: JoinHandle<CompileOutcome>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl CompileJob {
    pub fn spawn(toolchain: Arc<Toolchain>, source: PathBuf, binary: PathBuf) -> Self {
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let cancelled = async move {
                // A dropped sender cancels as well
                let _ = cancel_rx.await;
            };
            compile(&toolchain, &source, &binary, cancelled).await
        });
        Self {
            handle,
            cancel_tx: Some(cancel_tx),
        }
    }

    /// Wait for the compiler to finish. Safe to use in `select!`.
    pub async fn join(&mut self) -> Result<CompileOutcome, JoinError> {
        (&mut self.handle).await
    }

    /// Kill the compiler and its helpers, returning once they are reaped
    pub async fn cancel(mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
        if let Err(e) = (&mut self.handle).await {
            warn!("Compile task failed: {}", e);
        }
    }
}

impl Drop for CompileJob {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Compile `source` into `binary` with the given toolchain.
///
/// Returns `Ok(None)` when `cancel` resolved first; the whole compiler process
/// group has been killed and reaped by then.
pub async fn compile(
    toolchain: &Toolchain,
    source: &Path,
    binary: &Path,
    cancel: impl Future<Output = ()>,
) -> CompileOutcome {
    let args = toolchain.compile_args(source, binary);
    let (program, rest) = args.split_first().ok_or_else(|| {
        PlaygroundError::spawn(
            "compiler",
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty compile command"),
        )
    })?;

    debug!("Compiling with {:?}", args);

    let mut child = Command::new(program)
        .args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PlaygroundError::spawn(program.as_str(), e))?;

    let stdout = child.stdout.take().map(|out| tokio::spawn(read_all(out)));
    let stderr = child.stderr.take().map(|err| tokio::spawn(read_all(err)));

    let pid = child.id();
    let finished = match pid {
        Some(pid) => tokio::select! {
            _ = group::leader_exited(pid) => true,
            _ = cancel => false,
        },
        None => true,
    };

    // Helpers left behind by the compiler go too; the leader is still unreaped
    if let Some(pid) = pid {
        group::kill_group(pid);
    }
    let status = child.wait().await?;

    if !finished {
        for reader in [stdout, stderr].into_iter().flatten() {
            reader.abort();
        }
        debug!("Compiler {:?} cancelled", pid);
        return Ok(None);
    }

    if status.success() {
        return Ok(Some(CompileResult {
            success: true,
            message: None,
        }));
    }

    let stderr = collect(stderr).await;
    let stdout = collect(stdout).await;

    let error_msg = if !stderr.is_empty() {
        stderr
    } else if !stdout.is_empty() {
        stdout
    } else {
        match status.code() {
            Some(code) => format!("Compilation failed with exit code {}", code),
            None => "Compiler crashed".to_string(),
        }
    };

    Ok(Some(CompileResult {
        success: false,
        message: Some(error_msg),
    }))
}

async fn read_all<R>(mut reader: R) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        debug!("Compiler output read failed: {}", e);
    }
    buf
}

async fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    match reader {
        Some(reader) => match reader.await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => String::new(),
        },
        None => String::new(),
    }
}
