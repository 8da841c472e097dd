//! # External Process Runner
//!
//! Esegue i codec esterni (ffmpeg, pdftoppm, cwebp, ...) come processi figli.
//!
//! ## Responsabilità:
//! - Avvio asincrono con `tokio::process::Command` e `kill_on_drop`
//! - Timeout per singola invocazione
//! - Cancellazione: il figlio viene terminato appena il token scatta
//! - Lavoro CPU sul pool blocking, con checkpoint di cancellazione
//! - Helper `to_string_vec` / `args!` per costruire gli argomenti

use crate::error::{OptimizeError, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Converts any iterable of string-like items to `Vec<String>`.
///
/// ```rust,ignore
/// let args = to_string_vec(["-q", &quality.to_string(), "-mt"]);
/// ```
pub fn to_string_vec<T, I>(items: I) -> Vec<String>
where
    T: ToString,
    I: IntoIterator<Item = T>,
{
    items.into_iter().map(|item| item.to_string()).collect()
}

/// Builds an argument vector from mixed expressions.
///
/// ```rust,ignore
/// let args = args!["-crf", tier.crf(), "-y", output.display()];
/// ```
#[macro_export]
macro_rules! args {
    [$($item:expr),* $(,)?] => {
        $crate::process::to_string_vec([$($item.to_string()),*])
    };
}

/// Captured output of a successful tool run
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl ToolOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Run `program` to completion.
///
/// Fails with `Cancelled` as soon as `cancel` fires (the child is killed),
/// and with `CodecFailure` on timeout or non-zero exit.
pub async fn run_tool(
    program: &Path,
    tool_name: &str,
    args: &[String],
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ToolOutput> {
    if cancel.is_cancelled() {
        return Err(OptimizeError::Cancelled);
    }

    debug!("Running {} {:?}", tool_name, args);
    let start_time = Instant::now();

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| OptimizeError::codec(tool_name, format!("failed to start: {}", e)))?;

    // Dropping the wait future drops the child, which kills it
    let output = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("{} cancelled after {:?}", tool_name, start_time.elapsed());
            return Err(OptimizeError::Cancelled);
        }
        result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
            Ok(output) => output?,
            Err(_) => {
                warn!("{} timed out after {:?}", tool_name, timeout);
                return Err(OptimizeError::codec(
                    tool_name,
                    format!("timed out after {}s", timeout.as_secs()),
                ));
            }
        }
    };

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !output.status.success() {
        warn!("{} failed after {:?}: {}", tool_name, start_time.elapsed(), stderr);
        let cause = if stderr.is_empty() {
            output.status.to_string()
        } else {
            stderr
        };
        return Err(OptimizeError::codec(tool_name, cause));
    }

    debug!("{} completed in {:?}", tool_name, start_time.elapsed());
    Ok(ToolOutput {
        stdout: output.stdout,
        stderr,
    })
}

/// Run CPU-bound codec work on the blocking pool.
///
/// `work` receives the job token and should stop at its next checkpoint once
/// it fires. On cancellation the worker is still joined before returning, so
/// nothing writes into the job workspace after the caller drops it.
pub async fn blocking<T, F>(cancel: &CancellationToken, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&CancellationToken) -> Result<T> + Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(OptimizeError::Cancelled);
    }
    let token = cancel.clone();
    let mut handle = tokio::task::spawn_blocking(move || work(&token));
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            if let Err(e) = (&mut handle).await {
                debug!("Cancelled worker ended abnormally: {}", e);
            }
            Err(OptimizeError::Cancelled)
        }
        joined = &mut handle => joined?,
    }
}

/// Fail with `Cancelled` once `cancel` has fired. Checkpoint for blocking work.
pub fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(OptimizeError::Cancelled)
    } else {
        Ok(())
    }
}
