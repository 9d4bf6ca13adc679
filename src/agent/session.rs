//! AgentSession: drives one agent subprocess through
//! `spawning → idle ⇄ streaming → (terminated | stopped_on_restart)`
//! (spec §4.1), modeled on the teacher's `ConversationRuntime` event loop
//! (`runtime/executor.rs`).

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use crate::error::Result;
use crate::wire::{
    AgentId, AgentStatus, ConversationEventBody, Input, LogKind, MessageRole, MessageSource,
    RuntimeEventFrame, RuntimeInputFrame,
};

use super::process::{AgentProcess, AgentProcessSpec};
use super::queue::{InputQueue, QueueAction};

/// How long to wait for graceful shutdown and for the cancellation barrier
/// (spec §4.1/§6's T₂) before escalating to a force-kill, threaded in from
/// `config.rs`'s `Timeouts` rather than hardcoded per call site.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimeouts {
    pub graceful_stop: Duration,
    pub steer_cancel: Duration,
}

#[derive(Debug)]
pub enum StopMode {
    Graceful,
    Forced,
}

#[derive(Debug)]
pub enum SessionCommand {
    Deliver(Input),
    Cancel { reason: String },
    Stop { mode: StopMode },
}

/// Emitted by the session to SwarmManager, which tags/appends/fans these
/// out (the session itself never talks to HistoryStore or subscribers).
#[derive(Debug)]
pub enum SessionEvent {
    Conversation(ConversationEventBody),
    StatusChanged {
        status: AgentStatus,
        pending_count: usize,
    },
    ContextUsage {
        used: u64,
        total: u64,
    },
    Terminated {
        reason: Option<String>,
    },
}

pub struct AgentSession {
    agent_id: AgentId,
    spec: AgentProcessSpec,
    timeouts: SessionTimeouts,
    process: Option<AgentProcess>,
    queue: InputQueue,
    status: AgentStatus,
    open_tool_calls: HashSet<String>,
    cancelling: bool,
    cancel_deadline: Option<Instant>,
    pending_steer: Option<Input>,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl AgentSession {
    /// Spawn the subprocess and start the actor loop on a fresh task.
    /// Returns the command sender and the raw event receiver for the
    /// caller (SwarmManager) to pump.
    pub fn start(
        agent_id: AgentId,
        spec: AgentProcessSpec,
        timeouts: SessionTimeouts,
    ) -> Result<(mpsc::Sender<SessionCommand>, mpsc::Receiver<SessionEvent>)> {
        let process = AgentProcess::spawn(&spec)?;
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(256);

        let mut session = Self {
            agent_id,
            spec,
            timeouts,
            process: Some(process),
            queue: InputQueue::new(),
            status: AgentStatus::Idle,
            open_tool_calls: HashSet::new(),
            cancelling: false,
            cancel_deadline: None,
            pending_steer: None,
            cmd_rx,
            event_tx,
        };

        tokio::spawn(async move {
            session.run().await;
        });

        Ok((cmd_tx, event_rx))
    }

    async fn run(&mut self) {
        self.emit_status().await;
        loop {
            let Some(process) = self.process.as_mut() else {
                break;
            };
            let cancel_deadline = self.cancelling.then_some(self.cancel_deadline).flatten();
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(SessionCommand::Deliver(input)) => self.handle_deliver(input).await,
                        Some(SessionCommand::Cancel { reason }) => self.handle_cancel(reason).await,
                        Some(SessionCommand::Stop { mode }) => {
                            self.handle_stop(mode).await;
                            break;
                        }
                        None => break,
                    }
                }
                frame = process.next_event() => {
                    match frame {
                        Some(Ok(frame)) => self.handle_frame(frame).await,
                        Some(Err(e)) => {
                            tracing::warn!(agent_id = %self.agent_id, error = %e, "dropping unreadable runtime frame");
                        }
                        None => {
                            self.handle_crash().await;
                            break;
                        }
                    }
                }
                () = async {
                    match cancel_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                }, if cancel_deadline.is_some() => {
                    tracing::warn!(agent_id = %self.agent_id, "cancellation barrier not observed within steer_cancel timeout, force-killing");
                    self.handle_cancel_timeout().await;
                    break;
                }
            }
        }
    }

    async fn handle_deliver(&mut self, input: Input) {
        match self.queue.enqueue(input, self.status) {
            QueueAction::DeliverNow(input) => self.deliver_now(input).await,
            QueueAction::Queued => self.emit_status().await,
            QueueAction::CancelAndPrepend(input) => {
                self.pending_steer = Some(input);
                self.request_cancel().await;
            }
        }
    }

    async fn deliver_now(&mut self, input: Input) {
        self.status = AgentStatus::Streaming;
        self.open_tool_calls.clear();
        let frame = RuntimeInputFrame {
            text: input.text,
            attachments: input.attachments,
            cwd: self.spec.cwd.to_string_lossy().into_owned(),
        };
        if let Some(process) = self.process.as_mut() {
            if let Err(e) = process.send_input(&frame).await {
                tracing::warn!(agent_id = %self.agent_id, error = %e, "failed to deliver input");
            }
        }
        self.emit_status().await;
    }

    async fn handle_cancel(&mut self, _reason: String) {
        // Idempotent: cancelling an already-idle session is a no-op (spec §5).
        if self.status == AgentStatus::Streaming {
            self.request_cancel().await;
        }
    }

    /// Arms the T₂ barrier timeout (spec §6): if neither a terminal
    /// `message_end` nor an aborted-marker `tool_execution_end` is observed
    /// within `timeouts.steer_cancel`, `run()`'s select loop escalates to
    /// [`Self::handle_cancel_timeout`].
    async fn request_cancel(&mut self) {
        self.cancelling = true;
        self.cancel_deadline = Some(Instant::now() + self.timeouts.steer_cancel);
        if let Some(process) = self.process.as_mut() {
            let _ = process.send_abort().await;
        }
    }

    async fn handle_stop(&mut self, mode: StopMode) {
        let Some(process) = self.process.as_mut() else {
            return;
        };
        match mode {
            StopMode::Graceful => {
                let _ = process.send_abort().await;
                if timeout(self.timeouts.graceful_stop, process.wait()).await.is_err() {
                    let _ = process.kill().await;
                }
            }
            StopMode::Forced => {
                let _ = process.kill().await;
            }
        }
        self.status = AgentStatus::Terminated;
        let _ = self.event_tx.send(SessionEvent::Terminated { reason: None }).await;
    }

    async fn handle_frame(&mut self, frame: RuntimeEventFrame) {
        match frame {
            RuntimeEventFrame::MessageStart => {
                self.emit(ConversationEventBody::ConversationLog {
                    source: "runtime_log".into(),
                    kind: LogKind::MessageStart,
                    tool_name: None,
                    tool_call_id: None,
                    text: String::new(),
                    is_error: None,
                })
                .await;
            }
            RuntimeEventFrame::MessageEnd { text } => {
                self.emit(ConversationEventBody::ConversationLog {
                    source: "runtime_log".into(),
                    kind: LogKind::MessageEnd,
                    tool_name: None,
                    tool_call_id: None,
                    text: text.unwrap_or_default(),
                    is_error: None,
                })
                .await;
                self.on_delivery_complete().await;
            }
            RuntimeEventFrame::ToolExecutionStart {
                tool_call_id,
                tool_name,
                text,
            } => {
                self.open_tool_calls.insert(tool_call_id.clone());
                self.emit(ConversationEventBody::ConversationLog {
                    source: "runtime_log".into(),
                    kind: LogKind::ToolExecutionStart,
                    tool_name: Some(tool_name),
                    tool_call_id: Some(tool_call_id),
                    text: text.unwrap_or_default(),
                    is_error: None,
                })
                .await;
            }
            RuntimeEventFrame::ToolExecutionUpdate { tool_call_id, text } => {
                self.emit(ConversationEventBody::ConversationLog {
                    source: "runtime_log".into(),
                    kind: LogKind::ToolExecutionUpdate,
                    tool_name: None,
                    tool_call_id: Some(tool_call_id),
                    text,
                    is_error: None,
                })
                .await;
            }
            RuntimeEventFrame::ToolExecutionEnd {
                tool_call_id,
                text,
                is_error,
            } => {
                self.open_tool_calls.remove(&tool_call_id);
                // spec §6: while cancelling, an aborted-marker `tool_execution_end`
                // for the last open tool call satisfies the barrier on its own,
                // without waiting on a following `message_end`.
                let completes_cancel_barrier =
                    self.cancelling && is_error && ConversationEventBody::is_cancellation_marker(&text) && self.open_tool_calls.is_empty();
                self.emit(ConversationEventBody::ConversationLog {
                    source: "runtime_log".into(),
                    kind: LogKind::ToolExecutionEnd,
                    tool_name: None,
                    tool_call_id: Some(tool_call_id),
                    text,
                    is_error: Some(is_error),
                })
                .await;
                if completes_cancel_barrier {
                    self.on_delivery_complete().await;
                }
            }
            RuntimeEventFrame::SpeakToUser { text } => {
                self.emit(ConversationEventBody::ConversationMessage {
                    role: MessageRole::Assistant,
                    text,
                    source: MessageSource::SpeakToUser,
                    source_context: None,
                    attachments: None,
                })
                .await;
            }
            RuntimeEventFrame::ContextUsage { used, total } => {
                let _ = self
                    .event_tx
                    .send(SessionEvent::ContextUsage { used, total })
                    .await;
            }
        }
    }

    /// Reached on a terminal `message_end`, or (once the runtime emits the
    /// aborted marker) at the end of a cancellation. Moves back to idle and
    /// either accepts a pending steer or pops the next queued input.
    async fn on_delivery_complete(&mut self) {
        self.cancelling = false;
        self.cancel_deadline = None;
        self.status = AgentStatus::Idle;

        if let Some(steer) = self.pending_steer.take() {
            self.queue.accept_steer(steer);
        }

        if let Some(next) = self.queue.on_delivery_complete() {
            self.deliver_now(next).await;
        } else {
            self.emit_status().await;
        }
    }

    /// Subprocess exit while streaming (spec §4.1 Failure): synthesize a
    /// `tool_execution_end` for every still-open `toolCallId`, append a
    /// system message with the crash reason, move to `terminated`.
    async fn handle_crash(&mut self) {
        self.synthesize_abort(
            "agent runtime exited",
            "runtime process exited unexpectedly",
            "runtime process exited",
        )
        .await;
    }

    /// Cancellation barrier (spec §6 T₂) exceeded with no terminal frame
    /// observed: force-kill the subprocess, then synthesize the same
    /// abort shape `handle_crash` would on an unexpected exit.
    async fn handle_cancel_timeout(&mut self) {
        if let Some(process) = self.process.as_mut() {
            let _ = process.kill().await;
        }
        self.synthesize_abort(
            "cancellation timed out",
            "runtime did not acknowledge cancellation in time",
            "cancellation timed out",
        )
        .await;
    }

    /// Shared synthesis path for both crash and cancel-timeout: emit an
    /// `[aborted]` `tool_execution_end` for every still-open `toolCallId`,
    /// append a system message, and move to `terminated`.
    async fn synthesize_abort(&mut self, tool_abort_reason: &str, system_message: &str, terminated_reason: &str) {
        let was_streaming = self.status == AgentStatus::Streaming;
        if was_streaming {
            for tool_call_id in std::mem::take(&mut self.open_tool_calls) {
                self.emit(ConversationEventBody::ConversationLog {
                    source: "runtime_log".into(),
                    kind: LogKind::ToolExecutionEnd,
                    tool_name: None,
                    tool_call_id: Some(tool_call_id),
                    text: format!("[aborted] {tool_abort_reason}"),
                    is_error: Some(true),
                })
                .await;
            }
            self.emit(ConversationEventBody::ConversationMessage {
                role: MessageRole::System,
                text: format!("Agent terminated: {system_message}"),
                source: MessageSource::System,
                source_context: None,
                attachments: None,
            })
            .await;
        }
        self.cancelling = false;
        self.cancel_deadline = None;
        self.status = AgentStatus::Terminated;
        let _ = self
            .event_tx
            .send(SessionEvent::Terminated {
                reason: Some(terminated_reason.into()),
            })
            .await;
    }

    async fn emit(&mut self, body: ConversationEventBody) {
        let _ = self.event_tx.send(SessionEvent::Conversation(body)).await;
    }

    async fn emit_status(&mut self) {
        let _ = self
            .event_tx
            .send(SessionEvent::StatusChanged {
                status: self.status,
                pending_count: self.queue.pending_count(),
            })
            .await;
    }
}

/// Helper used by `SwarmManager` to stamp a freshly built conversation
/// event with `agentId`/`timestamp` before it reaches HistoryStore.
#[must_use]
pub fn stamp(agent_id: &AgentId, body: ConversationEventBody) -> crate::wire::ConversationEvent {
    crate::wire::ConversationEvent {
        agent_id: agent_id.clone(),
        timestamp: Utc::now(),
        seq: 0,
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writes an executable shell script standing in for the agent runtime
    /// binary: the newline-JSON contract is all `AgentProcess` cares about,
    /// so a one-liner plays it without needing a real LLM runtime.
    fn scripted_runtime(dir: &std::path::Path, body: &str) -> AgentProcessSpec {
        let path = dir.join("runtime.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
        }
        AgentProcessSpec {
            program: path.to_string_lossy().into_owned(),
            args: Vec::new(),
            cwd: dir.to_path_buf(),
        }
    }

    fn test_timeouts() -> SessionTimeouts {
        SessionTimeouts {
            graceful_stop: Duration::from_secs(5),
            steer_cancel: Duration::from_millis(150),
        }
    }

    async fn next_status(rx: &mut mpsc::Receiver<SessionEvent>) -> (AgentStatus, usize) {
        loop {
            match rx.recv().await.unwrap() {
                SessionEvent::StatusChanged { status, pending_count } => return (status, pending_count),
                _ => continue,
            }
        }
    }

    /// Scenario 1 (spec §8): one delivery streams start/assistant-text/end
    /// in order, then the session returns to idle with an empty queue.
    #[tokio::test]
    async fn full_delivery_streams_in_order_then_returns_to_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = scripted_runtime(
            tmp.path(),
            r#"read -r _line
printf '{"type":"message_start"}\n'
printf '{"type":"speak_to_user","text":"hello"}\n'
printf '{"type":"message_end"}\n'
read -r _line2"#,
        );
        let (cmd_tx, mut event_rx) = AgentSession::start("a1".into(), spec, test_timeouts()).unwrap();
        let _ = next_status(&mut event_rx).await; // initial idle

        cmd_tx
            .send(SessionCommand::Deliver(Input {
                text: "hi".into(),
                attachments: vec![],
                source_context: None,
                delivery: crate::wire::Delivery::Auto,
                agent_id: "a1".into(),
            }))
            .await
            .unwrap();

        let (status, _) = next_status(&mut event_rx).await;
        assert_eq!(status, AgentStatus::Streaming);

        let SessionEvent::Conversation(ConversationEventBody::ConversationLog { kind: LogKind::MessageStart, .. }) =
            event_rx.recv().await.unwrap()
        else {
            panic!("expected message_start");
        };

        let SessionEvent::Conversation(ConversationEventBody::ConversationMessage { text, .. }) =
            event_rx.recv().await.unwrap()
        else {
            panic!("expected assistant message");
        };
        assert_eq!(text, "hello");

        let SessionEvent::Conversation(ConversationEventBody::ConversationLog { kind: LogKind::MessageEnd, .. }) =
            event_rx.recv().await.unwrap()
        else {
            panic!("expected message_end");
        };

        let (status, pending) = next_status(&mut event_rx).await;
        assert_eq!(status, AgentStatus::Idle);
        assert_eq!(pending, 0);
    }

    /// Scenario 6 (spec §8): the runtime exits mid-stream. Every open
    /// `toolCallId` gets a synthesized `[aborted]` `tool_execution_end`, a
    /// system message is appended, and the session moves to `terminated`.
    #[tokio::test]
    async fn crash_mid_stream_synthesizes_aborts_and_terminates() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = scripted_runtime(
            tmp.path(),
            r#"read -r _line
printf '{"type":"message_start"}\n'
printf '{"type":"tool_execution_start","tool_call_id":"t1","tool_name":"search"}\n'
exit 1"#,
        );
        let (cmd_tx, mut event_rx) = AgentSession::start("a1".into(), spec, test_timeouts()).unwrap();
        let _ = next_status(&mut event_rx).await; // initial idle

        cmd_tx
            .send(SessionCommand::Deliver(Input {
                text: "hi".into(),
                attachments: vec![],
                source_context: None,
                delivery: crate::wire::Delivery::Auto,
                agent_id: "a1".into(),
            }))
            .await
            .unwrap();

        let mut saw_aborted_tool_end = false;
        let mut saw_system_message = false;
        let mut saw_terminated = false;
        while let Some(event) = event_rx.recv().await {
            match event {
                SessionEvent::Conversation(ConversationEventBody::ConversationLog {
                    kind: LogKind::ToolExecutionEnd,
                    is_error: Some(true),
                    text,
                    ..
                }) if text.contains("[aborted]") => saw_aborted_tool_end = true,
                SessionEvent::Conversation(ConversationEventBody::ConversationMessage {
                    role: MessageRole::System,
                    ..
                }) => saw_system_message = true,
                SessionEvent::Terminated { .. } => {
                    saw_terminated = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_aborted_tool_end);
        assert!(saw_system_message);
        assert!(saw_terminated);
    }

    /// spec §6 T₂: a runtime that never responds to the abort frame gets
    /// force-killed once `steer_cancel` elapses, with the same synthesized
    /// `[aborted]` shape `handle_crash` produces on an unexpected exit.
    #[tokio::test]
    async fn cancel_timeout_force_kills_and_synthesizes_abort() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = scripted_runtime(
            tmp.path(),
            r#"read -r _line
printf '{"type":"message_start"}\n'
printf '{"type":"tool_execution_start","tool_call_id":"t1","tool_name":"search"}\n'
sleep 5"#,
        );
        let (cmd_tx, mut event_rx) = AgentSession::start("a1".into(), spec, test_timeouts()).unwrap();
        let _ = next_status(&mut event_rx).await; // initial idle

        cmd_tx
            .send(SessionCommand::Deliver(Input {
                text: "hi".into(),
                attachments: vec![],
                source_context: None,
                delivery: crate::wire::Delivery::Auto,
                agent_id: "a1".into(),
            }))
            .await
            .unwrap();
        let _ = next_status(&mut event_rx).await; // streaming
        let _ = event_rx.recv().await; // message_start
        let _ = event_rx.recv().await; // tool_execution_start

        cmd_tx
            .send(SessionCommand::Cancel { reason: "user requested".into() })
            .await
            .unwrap();

        let mut saw_aborted_tool_end = false;
        let mut saw_terminated = false;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while tokio::time::Instant::now() < deadline {
            let Ok(Some(event)) = timeout(Duration::from_millis(500), event_rx.recv()).await else {
                break;
            };
            match event {
                SessionEvent::Conversation(ConversationEventBody::ConversationLog {
                    kind: LogKind::ToolExecutionEnd,
                    is_error: Some(true),
                    text,
                    ..
                }) if text.contains("[aborted]") => saw_aborted_tool_end = true,
                SessionEvent::Terminated { reason } => {
                    saw_terminated = true;
                    assert_eq!(reason.as_deref(), Some("cancellation timed out"));
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_aborted_tool_end);
        assert!(saw_terminated);
    }

    /// spec §6: an aborted-marker `tool_execution_end` alone (no following
    /// `message_end`) satisfies the cancellation barrier — the session
    /// returns to idle rather than waiting out the full T₂ timeout.
    #[tokio::test]
    async fn tool_execution_end_abort_marker_completes_barrier_without_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = scripted_runtime(
            tmp.path(),
            r#"read -r _line
printf '{"type":"message_start"}\n'
printf '{"type":"tool_execution_start","tool_call_id":"t1","tool_name":"search"}\n'
read -r _abort_line
printf '{"type":"tool_execution_end","tool_call_id":"t1","text":"[aborted] by request","is_error":true}\n'
read -r _line2"#,
        );
        let (cmd_tx, mut event_rx) = AgentSession::start("a1".into(), spec, test_timeouts()).unwrap();
        let _ = next_status(&mut event_rx).await; // initial idle

        cmd_tx
            .send(SessionCommand::Deliver(Input {
                text: "hi".into(),
                attachments: vec![],
                source_context: None,
                delivery: crate::wire::Delivery::Auto,
                agent_id: "a1".into(),
            }))
            .await
            .unwrap();
        let _ = next_status(&mut event_rx).await; // streaming
        let _ = event_rx.recv().await; // message_start
        let _ = event_rx.recv().await; // tool_execution_start

        cmd_tx
            .send(SessionCommand::Cancel { reason: "user requested".into() })
            .await
            .unwrap();

        // Well under the 150ms steer_cancel timeout configured above.
        let (status, _) = timeout(Duration::from_millis(100), async {
            loop {
                if let SessionEvent::StatusChanged { status, pending_count } = event_rx.recv().await.unwrap() {
                    if status == AgentStatus::Idle {
                        return (status, pending_count);
                    }
                }
            }
        })
        .await
        .expect("barrier should complete well before the steer_cancel timeout");
        assert_eq!(status, AgentStatus::Idle);
    }
}
