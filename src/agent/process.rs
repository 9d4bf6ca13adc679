//! Framed newline-JSON duplex I/O to the agent runtime subprocess (spec §6).

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc;

use crate::error::{MiddlemanError, Result};
use crate::wire::{RuntimeAbortFrame, RuntimeEventFrame, RuntimeInputFrame};

/// What to launch and where, mirroring the teacher's `BashTool` working-dir
/// + command construction (`tools/bash.rs`), generalized from a one-shot
/// command to a long-lived runtime binary.
#[derive(Debug, Clone)]
pub struct AgentProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

/// A running agent runtime subprocess. Owns the child handle exclusively;
/// no other task may read/write its pipes (spec §5 shared-resource policy).
pub struct AgentProcess {
    child: Child,
    stdin: ChildStdin,
    events: mpsc::Receiver<Result<RuntimeEventFrame>>,
    _reader_task: tokio::task::JoinHandle<()>,
}

impl AgentProcess {
    pub fn spawn(spec: &AgentProcessSpec) -> Result<Self> {
        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd
            .spawn()
            .map_err(|e| MiddlemanError::SpawnFailed(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MiddlemanError::SpawnFailed("no stdin handle".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MiddlemanError::SpawnFailed("no stdout handle".into()))?;

        let (tx, rx) = mpsc::channel(64);
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let parsed = serde_json::from_str::<RuntimeEventFrame>(&line)
                            .map_err(MiddlemanError::Serde);
                        if tx.send(parsed).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(MiddlemanError::Io(e))).await;
                        break;
                    }
                }
            }
        });

        Ok(Self {
            child,
            stdin,
            events: rx,
            _reader_task: reader_task,
        })
    }

    /// Write an input frame; malformed/unreadable responses are handled by
    /// the caller, not here (spec §4.1: "unreadable event ⇒ log and drop").
    pub async fn send_input(&mut self, frame: &RuntimeInputFrame) -> Result<()> {
        self.write_frame(frame).await
    }

    pub async fn send_abort(&mut self) -> Result<()> {
        self.write_frame(&RuntimeAbortFrame::default()).await
    }

    async fn write_frame(&mut self, frame: &impl serde::Serialize) -> Result<()> {
        let mut line = serde_json::to_vec(frame)?;
        line.push(b'\n');
        self.stdin.write_all(&line).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Receive the next event frame. `None` once the subprocess's stdout
    /// has closed (process exited).
    pub async fn next_event(&mut self) -> Option<Result<RuntimeEventFrame>> {
        self.events.recv().await
    }

    /// Forced stop: kill the process immediately.
    pub async fn kill(&mut self) -> Result<()> {
        self.child.kill().await.map_err(MiddlemanError::Io)
    }

    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        self.child.wait().await.map_err(MiddlemanError::Io)
    }
}
