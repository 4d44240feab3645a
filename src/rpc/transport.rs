// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Byte-level pipes to a language server process.
//!
//! [`Transport`] owns the child process and the write end of its stdin.
//! The read end is handed out once as a [`TransportReader`] and moved into
//! the dispatcher's reader task, so reads never contend with writes.

use serde::Deserialize;
use std::process::Stdio;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::error::RpcError;

/// How long `stop` waits after the terminate signal before killing.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_millis(500);

/// Longest header line accepted, terminator included.
pub const MAX_HEADER_LINE: usize = 8 * 1024;

/// Read half of a connection.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Write half of a connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Where the server's standard error goes. It never carries protocol data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StderrSink {
    /// Discard everything the server writes to stderr.
    #[default]
    Null,
    /// Pass stderr through to our own stderr.
    Inherit,
}

impl StderrSink {
    fn stdio(self) -> Stdio {
        match self {
            Self::Null => Stdio::null(),
            Self::Inherit => Stdio::inherit(),
        }
    }
}

/// Buffered reader over the server's stdout.
pub struct TransportReader {
    inner: BufReader<BoxedReader>,
}

impl TransportReader {
    /// Wraps an arbitrary byte source.
    pub fn new(reader: BoxedReader) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    /// Reads up to and including the next `\n`.
    ///
    /// An empty vector means end of stream.
    ///
    /// # Errors
    ///
    /// Returns a framing error if no `\n` arrives within
    /// [`MAX_HEADER_LINE`] bytes, or a transport error if the read fails.
    pub async fn read_line(&mut self) -> Result<Vec<u8>, RpcError> {
        let mut line = Vec::new();
        (&mut self.inner)
            .take(MAX_HEADER_LINE as u64)
            .read_until(b'\n', &mut line)
            .await?;
        if line.len() >= MAX_HEADER_LINE && line.last() != Some(&b'\n') {
            return Err(RpcError::Framing(format!(
                "header line exceeds {MAX_HEADER_LINE} bytes"
            )));
        }
        Ok(line)
    }

    /// Reads exactly `n` bytes.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the stream ends before `n` bytes arrive.
    pub async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, RpcError> {
        let mut buf = vec![0u8; n];
        self.inner.read_exact(&mut buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                RpcError::Transport(format!("stream ended before {n} byte body was read"))
            } else {
                RpcError::from(e)
            }
        })?;
        Ok(buf)
    }
}

/// Owns one server process and the write side of its stdin.
pub struct Transport {
    label: String,
    writer: Mutex<BoxedWriter>,
    reader: StdMutex<Option<TransportReader>>,
    child: StdMutex<Option<Child>>,
    pid: Option<u32>,
    closed: AtomicBool,
}

impl Transport {
    /// Spawns `program` with piped stdin/stdout.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the process cannot be spawned.
    pub fn spawn(program: &str, args: &[String], stderr: StderrSink) -> Result<Self, RpcError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(stderr.stdio())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RpcError::Transport(format!("failed to spawn '{program}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RpcError::Transport("child stdin was not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RpcError::Transport("child stdout was not captured".into()))?;

        let pid = child.id();
        debug!("Spawned '{}' (pid {:?})", program, pid);

        Ok(Self {
            label: program.to_string(),
            writer: Mutex::new(Box::new(stdin)),
            reader: StdMutex::new(Some(TransportReader::new(Box::new(stdout)))),
            child: StdMutex::new(Some(child)),
            pid,
            closed: AtomicBool::new(false),
        })
    }

    /// Builds a transport over existing streams with no process behind them.
    pub fn from_streams(label: &str, reader: BoxedReader, writer: BoxedWriter) -> Self {
        Self {
            label: label.to_string(),
            writer: Mutex::new(writer),
            reader: StdMutex::new(Some(TransportReader::new(reader))),
            child: StdMutex::new(None),
            pid: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Name used in log messages.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// OS process id of the server, if there is one.
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Hands out the read side. Only the first call returns `Some`.
    pub fn take_reader(&self) -> Option<TransportReader> {
        self.reader.lock().ok().and_then(|mut r| r.take())
    }

    /// Writes all of `bytes` while holding the write lock, so concurrent
    /// callers never interleave inside one buffer.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the transport was stopped or the pipe
    /// is closed.
    pub async fn write(&self, bytes: &[u8]) -> Result<(), RpcError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::Transport(format!("{} is stopped", self.label)));
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        Ok(())
    }

    /// Flushes buffered bytes to the server.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the pipe is closed.
    pub async fn flush(&self) -> Result<(), RpcError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::Transport(format!("{} is stopped", self.label)));
        }
        self.writer.lock().await.flush().await?;
        Ok(())
    }

    /// Returns false once the process has exited or `stop` was called.
    pub fn is_alive(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let Ok(mut guard) = self.child.lock() else {
            return false;
        };
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => true,
        }
    }

    /// Closes stdin, asks the process to terminate, and kills it if it is
    /// still running after [`STOP_GRACE_PERIOD`]. Safe to call repeatedly.
    pub async fn stop(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Dropping stdin gives the server EOF, which most servers treat as exit.
        if let Ok(mut writer) = self.writer.try_lock() {
            let _ = writer.shutdown().await;
            *writer = Box::new(tokio::io::sink());
        }

        let child = self.child.lock().ok().and_then(|mut c| c.take());
        let Some(mut child) = child else {
            return;
        };

        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }

        if let Some(pid) = self.pid {
            send_terminate(pid).await;
        }

        match tokio::time::timeout(STOP_GRACE_PERIOD, child.wait()).await {
            Ok(Ok(status)) => debug!("{} exited with {}", self.label, status),
            Ok(Err(e)) => warn!("Failed to wait for {}: {}", self.label, e),
            Err(_) => {
                debug!("{} ignored terminate, killing", self.label);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", self.label, e);
                }
            }
        }
    }
}

/// Sends SIGTERM without `unsafe` by shelling out to `kill`.
#[cfg(unix)]
async fn send_terminate(pid: u32) {
    let status = Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = status {
        debug!("kill -TERM {} failed: {}", pid, e);
    }
}

#[cfg(not(unix))]
async fn send_terminate(_pid: u32) {}
