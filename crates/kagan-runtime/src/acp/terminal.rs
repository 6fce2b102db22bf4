//! Terminal Subsystem (spec §4.13): a spawned command whose output is kept
//! in a bounded FIFO byte ring, UTF-8-safe on truncation. No PTY crate is
//! in the teacher's or pack's dependency stack, so terminals here run over
//! plain pipes (`Stdio::piped()`, the same primitive the teacher uses for
//! every subprocess in `factory/agent_executor.rs` and `factory/pipeline.rs`)
//! rather than allocating a real pty; output still carries the requested
//! `TERM`/`FORCE_COLOR`/`COLORTERM` env so color-aware tools behave.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("terminal already released")]
    Released,
}

pub const DEFAULT_OUTPUT_BYTE_LIMIT: usize = 1024 * 1024;

struct OutputRing {
    chunks: VecDeque<Vec<u8>>,
    total_bytes: usize,
    limit: usize,
    truncated: bool,
}

impl OutputRing {
    fn new(limit: usize) -> Self {
        Self { chunks: VecDeque::new(), total_bytes: 0, limit, truncated: false }
    }

    fn push(&mut self, chunk: Vec<u8>) {
        self.total_bytes += chunk.len();
        self.chunks.push_back(chunk);
        while self.total_bytes > self.limit {
            if let Some(front) = self.chunks.pop_front() {
                self.total_bytes -= front.len();
                self.truncated = true;
            } else {
                break;
            }
        }
    }

    /// Drops leading bytes that aren't a UTF-8 char boundary so the
    /// decoded string never contains a partial multi-byte sequence.
    fn as_string(&self) -> String {
        let mut bytes: Vec<u8> = self.chunks.iter().flatten().copied().collect();
        while !bytes.is_empty() && std::str::from_utf8(&bytes).is_err() {
            bytes.remove(0);
        }
        String::from_utf8_lossy(&bytes).to_string()
    }
}

pub struct TerminalState {
    pub output: String,
    pub truncated: bool,
    pub return_code: Option<i32>,
    pub released: bool,
}

pub struct Terminal {
    child: Option<Child>,
    ring: std::sync::Arc<Mutex<OutputRing>>,
    return_code: std::sync::Arc<Mutex<Option<i32>>>,
    released: bool,
}

impl Terminal {
    pub async fn spawn(
        command: &str,
        args: &[String],
        cwd: &PathBuf,
        extra_env: &[(String, String)],
        output_byte_limit: usize,
    ) -> Result<Self, TerminalError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .current_dir(cwd)
            .env("TERM", "xterm-256color")
            .env("FORCE_COLOR", "1")
            .env("COLORTERM", "truecolor")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in extra_env {
            cmd.env(key, value);
        }
        let mut child = cmd.spawn()?;

        let ring = std::sync::Arc::new(Mutex::new(OutputRing::new(output_byte_limit)));
        let return_code = std::sync::Arc::new(Mutex::new(None));

        if let Some(stdout) = child.stdout.take() {
            let ring = ring.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut bytes = line.into_bytes();
                    bytes.push(b'\n');
                    ring.lock().await.push(bytes);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let ring = ring.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut bytes = line.into_bytes();
                    bytes.push(b'\n');
                    ring.lock().await.push(bytes);
                }
            });
        }

        Ok(Self { child: Some(child), ring, return_code, released: false })
    }

    pub async fn state(&self) -> TerminalState {
        let ring = self.ring.lock().await;
        let return_code = *self.return_code.lock().await;
        TerminalState {
            output: ring.as_string(),
            truncated: ring.truncated,
            return_code,
            released: self.released,
        }
    }

    pub async fn wait_for_exit(&mut self) -> Result<(Option<i32>, Option<i32>), TerminalError> {
        if let Some(mut child) = self.child.take() {
            let status = child.wait().await?;
            let code = status.code();
            *self.return_code.lock().await = code;
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                return Ok((code, status.signal()));
            }
            #[cfg(not(unix))]
            {
                return Ok((code, None));
            }
        }
        Ok((*self.return_code.lock().await, None))
    }

    pub async fn kill(&mut self) -> Result<(), TerminalError> {
        if let Some(child) = self.child.as_mut() {
            child.kill().await?;
        }
        Ok(())
    }

    pub async fn release(&mut self) {
        self.released = true;
        self.ring.lock().await.chunks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_evicts_oldest_chunks_past_limit() {
        let mut ring = OutputRing::new(10);
        ring.push(b"0123456789".to_vec());
        ring.push(b"abcde".to_vec());
        assert!(ring.truncated);
        assert!(ring.total_bytes <= 10);
    }

    #[test]
    fn ring_as_string_never_splits_utf8_boundary() {
        let mut ring = OutputRing::new(3);
        let multibyte = "héllo".as_bytes().to_vec();
        ring.push(multibyte);
        let s = ring.as_string();
        assert!(std::str::from_utf8(s.as_bytes()).is_ok());
    }

    #[tokio::test]
    async fn spawned_terminal_captures_stdout() {
        let mut terminal = Terminal::spawn(
            "sh",
            &["-c".to_string(), "echo hello".to_string()],
            &std::env::temp_dir(),
            &[],
            DEFAULT_OUTPUT_BYTE_LIMIT,
        )
        .await
        .unwrap();
        terminal.wait_for_exit().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let state = terminal.state().await;
        assert!(state.output.contains("hello"));
    }
}
