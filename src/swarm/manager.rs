//! SwarmManager: the top-level supervisor (spec §4.4), modeled on the
//! teacher's `RuntimeManager` (`runtime/mod.rs`) but serialized through a
//! single actor inbox instead of an `RwLock<HashMap<...>>`, per spec §5's
//! "all state changes go through a single inbox".

use std::collections::HashMap;
use std::io::BufRead;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};

use crate::agent::{
    stamp, AgentProcessSpec, AgentSession, HistoryStore, SessionCommand, SessionEvent, SessionTimeouts, StopMode,
};
use crate::error::{MiddlemanError, Result};
use crate::persistence::DataDirs;
use crate::wire::{
    AgentDescriptor, AgentId, AgentStatus, ConversationEventBody, Input, LogKind, ModelSpec,
    Role, ServerEvent,
};

use super::subscriber_hub::{SubscriberHandle, SubscriberHub};

#[derive(Debug, Default)]
pub struct StopAllResult {
    pub stopped_workers: Vec<AgentId>,
    pub manager_stopped: bool,
}

struct AgentRecord {
    descriptor: AgentDescriptor,
    cmd_tx: mpsc::Sender<SessionCommand>,
}

enum ManagerMsg {
    CreateManager {
        name: String,
        cwd: String,
        model: ModelSpec,
        reply: oneshot::Sender<Result<AgentDescriptor>>,
    },
    DeleteManager {
        manager_id: AgentId,
        reply: oneshot::Sender<Result<()>>,
    },
    KillAgent {
        agent_id: AgentId,
        reply: oneshot::Sender<Result<()>>,
    },
    StopAllAgents {
        manager_id: AgentId,
        reply: oneshot::Sender<Result<StopAllResult>>,
    },
    HandleInput {
        input: Input,
        reply: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        agent_id: Option<AgentId>,
        reply: oneshot::Sender<(SubscriberHandle, Option<AgentId>)>,
    },
    SwitchTo {
        subscriber_id: String,
        agent_id: AgentId,
        reply: oneshot::Sender<Result<()>>,
    },
    Resubscribe {
        subscriber_id: String,
        agent_id: Option<AgentId>,
        reply: oneshot::Sender<Option<AgentId>>,
    },
    Unsubscribe {
        subscriber_id: String,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<AgentDescriptor>>,
    },
    Broadcast {
        event: ServerEvent,
    },
    ReportError {
        agent_id: AgentId,
        text: String,
    },
}

/// Cheap, cloneable front door for the SwarmManager actor.
#[derive(Clone)]
pub struct SwarmManagerHandle {
    tx: mpsc::Sender<ManagerMsg>,
}

impl SwarmManagerHandle {
    pub async fn create_manager(
        &self,
        name: String,
        cwd: String,
        model: ModelSpec,
    ) -> Result<AgentDescriptor> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerMsg::CreateManager {
            name,
            cwd,
            model,
            reply,
        })
        .await;
        rx.await.map_err(|_| MiddlemanError::CreateManagerFailed("manager actor gone".into()))?
    }

    pub async fn delete_manager(&self, manager_id: AgentId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerMsg::DeleteManager { manager_id, reply }).await;
        rx.await.map_err(|_| MiddlemanError::DeleteManagerFailed("manager actor gone".into()))?
    }

    pub async fn kill_agent(&self, agent_id: AgentId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerMsg::KillAgent { agent_id, reply }).await;
        rx.await.map_err(|_| MiddlemanError::InvalidAgent("manager actor gone".into()))?
    }

    pub async fn stop_all_agents(&self, manager_id: AgentId) -> Result<StopAllResult> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerMsg::StopAllAgents { manager_id, reply }).await;
        rx.await
            .map_err(|_| MiddlemanError::StopAllAgentsFailed("manager actor gone".into()))?
    }

    pub async fn handle_input(&self, input: Input) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerMsg::HandleInput { input, reply }).await;
        rx.await.map_err(|_| MiddlemanError::UnknownAgent("manager actor gone".into()))?
    }

    pub async fn subscribe(&self, agent_id: Option<AgentId>) -> (SubscriberHandle, Option<AgentId>) {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerMsg::Subscribe { agent_id, reply }).await;
        rx.await.expect("manager actor gone")
    }

    pub async fn switch_to(&self, subscriber_id: String, agent_id: AgentId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerMsg::SwitchTo {
            subscriber_id,
            agent_id,
            reply,
        })
        .await;
        rx.await.map_err(|_| MiddlemanError::UnknownAgent("manager actor gone".into()))?
    }

    /// Re-targets an already-registered subscriber (e.g. a second `{type:
    /// subscribe}` frame on the same connection), resolving `agent_id` the
    /// same way the initial `subscribe()` does when it is omitted. Returns
    /// the resolved target, or `None` if no agent exists yet.
    pub async fn resubscribe(&self, subscriber_id: String, agent_id: Option<AgentId>) -> Option<AgentId> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerMsg::Resubscribe { subscriber_id, agent_id, reply }).await;
        rx.await.ok().flatten()
    }

    pub async fn unsubscribe(&self, subscriber_id: String) {
        self.send(ManagerMsg::Unsubscribe { subscriber_id }).await;
    }

    pub async fn snapshot(&self) -> Vec<AgentDescriptor> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerMsg::Snapshot { reply }).await;
        rx.await.unwrap_or_default()
    }

    /// Broadcasts a non-thread-scoped event (e.g. `slack_status`) to every
    /// connected subscriber, per spec §4.6.
    pub async fn broadcast(&self, event: ServerEvent) {
        self.send(ManagerMsg::Broadcast { event }).await;
    }

    /// Records a channel-post/attachment-download failure against an agent
    /// as a `conversation_log` with `isError=true` (spec §4.6), without
    /// otherwise disturbing the event stream.
    pub async fn report_channel_error(&self, agent_id: AgentId, text: String) {
        self.send(ManagerMsg::ReportError { agent_id, text }).await;
    }

    async fn send(&self, msg: ManagerMsg) {
        let _ = self.tx.send(msg).await;
    }
}

pub struct SwarmManager {
    data_dirs: DataDirs,
    agent_runtime_program: String,
    session_timeouts: SessionTimeouts,
    agents: HashMap<AgentId, AgentRecord>,
    history: HistoryStore,
    hub: SubscriberHub,
    cmd_rx: mpsc::Receiver<ManagerMsg>,
    session_event_tx: mpsc::Sender<(AgentId, SessionEvent)>,
    session_event_rx: mpsc::Receiver<(AgentId, SessionEvent)>,
}

impl SwarmManager {
    /// Builds the manager and runs the restart-on-boot scan (spec §4.4)
    /// before returning the handle callers use.
    pub fn start(
        data_dirs: DataDirs,
        agent_runtime_program: String,
        history_capacity: usize,
        subscriber_queue_capacity: usize,
        session_timeouts: SessionTimeouts,
    ) -> SwarmManagerHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (session_event_tx, session_event_rx) = mpsc::channel(1024);

        let mut manager = Self {
            data_dirs,
            agent_runtime_program,
            session_timeouts,
            agents: HashMap::new(),
            history: HistoryStore::new(history_capacity),
            hub: SubscriberHub::new(subscriber_queue_capacity),
            cmd_rx,
            session_event_tx,
            session_event_rx,
        };

        tokio::spawn(async move {
            manager.restart_on_boot();
            // Global fatal handler (spec §9): an unhandled panic inside
            // the actor loop must not take every session down silently.
            // Catch it, best-effort stop whatever sessions are still
            // reachable, then exit 1 so the host process supervisor (or
            // the operator) observes the failure instead of a daemon
            // that looks alive but no longer drains its command inbox.
            if AssertUnwindSafe(manager.run()).catch_unwind().await.is_err() {
                tracing::error!("swarm manager actor panicked; stopping sessions and exiting");
                manager.emergency_stop_all();
                std::process::exit(1);
            }
        });

        SwarmManagerHandle { tx: cmd_tx }
    }

    /// Best-effort session teardown run from the panic handler above. The
    /// actor's own state may be inconsistent at this point, so this only
    /// asks each session to stop and does not wait for confirmation.
    fn emergency_stop_all(&self) {
        for record in self.agents.values() {
            let _ = record.cmd_tx.try_send(SessionCommand::Stop { mode: StopMode::Graceful });
        }
    }

    async fn run(&mut self) {
        loop {
            tokio::select! {
                msg = self.cmd_rx.recv() => {
                    match msg {
                        Some(msg) => self.handle_msg(msg).await,
                        None => break,
                    }
                }
                event = self.session_event_rx.recv() => {
                    match event {
                        Some((agent_id, event)) => self.handle_session_event(agent_id, event).await,
                        None => break,
                    }
                }
            }
        }
    }

    async fn handle_msg(&mut self, msg: ManagerMsg) {
        match msg {
            ManagerMsg::CreateManager { name, cwd, model, reply } => {
                let result = self.create_manager(name, cwd, model).await;
                let _ = reply.send(result);
            }
            ManagerMsg::DeleteManager { manager_id, reply } => {
                let result = self.delete_manager(&manager_id).await;
                let _ = reply.send(result);
            }
            ManagerMsg::KillAgent { agent_id, reply } => {
                let result = self.kill_agent(&agent_id).await;
                let _ = reply.send(result);
            }
            ManagerMsg::StopAllAgents { manager_id, reply } => {
                let result = self.stop_all_agents(&manager_id).await;
                let _ = reply.send(result);
            }
            ManagerMsg::HandleInput { input, reply } => {
                let result = self.handle_input(input).await;
                let _ = reply.send(result);
            }
            ManagerMsg::Subscribe { agent_id, reply } => {
                let result = self.subscribe(agent_id);
                let _ = reply.send(result);
            }
            ManagerMsg::SwitchTo { subscriber_id, agent_id, reply } => {
                let result = self.switch_to(&subscriber_id, &agent_id);
                let _ = reply.send(result);
            }
            ManagerMsg::Resubscribe { subscriber_id, agent_id, reply } => {
                let target = self.resolve_target(agent_id);
                if let Some(target) = &target {
                    let (conversation, activity) = self.history.replay(target);
                    self.hub.switch_to(&subscriber_id, target.clone(), conversation, activity);
                }
                let _ = reply.send(target);
            }
            ManagerMsg::Unsubscribe { subscriber_id } => {
                self.hub.unregister(&subscriber_id);
            }
            ManagerMsg::Snapshot { reply } => {
                let _ = reply.send(self.snapshot_vec());
            }
            ManagerMsg::Broadcast { event } => {
                self.hub.broadcast(event);
            }
            ManagerMsg::ReportError { agent_id, text } => {
                let body = ConversationEventBody::ConversationLog {
                    source: "runtime_log".into(),
                    kind: LogKind::ToolExecutionEnd,
                    tool_name: None,
                    tool_call_id: None,
                    text,
                    is_error: Some(true),
                };
                let event = stamp(&agent_id, body);
                let event = self.history.append(&agent_id, event);
                self.hub.dispatch(&event);
            }
        }
    }

    fn snapshot_vec(&self) -> Vec<AgentDescriptor> {
        self.agents.values().map(|r| r.descriptor.clone()).collect()
    }

    fn broadcast_snapshot(&mut self) {
        let agents = self.snapshot_vec();
        self.hub.broadcast(ServerEvent::AgentsSnapshot { agents });
    }

    async fn create_manager(&mut self, name: String, cwd: String, model: ModelSpec) -> Result<AgentDescriptor> {
        let path = PathBuf::from(&cwd);
        if !path.is_dir() {
            return Err(MiddlemanError::InvalidDirectory(cwd));
        }
        if self
            .agents
            .values()
            .any(|r| r.descriptor.role == Role::Manager && r.descriptor.display_name == name)
        {
            return Err(MiddlemanError::CreateManagerFailed(format!(
                "a manager named '{name}' already exists"
            )));
        }

        let agent_id = uuid::Uuid::new_v4().to_string();
        let descriptor = self.spawn_agent(agent_id.clone(), agent_id.clone(), Role::Manager, name, cwd, model, None)?;
        self.broadcast_snapshot();
        Ok(descriptor)
    }

    /// Spawns the subprocess and registers bookkeeping for one agent. When
    /// `restart_of` is `Some(existing descriptor)` (restart-on-boot, spec
    /// §4.4), the on-disk transcript is preserved and replayed into memory
    /// instead of being truncated by a fresh metadata header.
    fn spawn_agent(
        &mut self,
        agent_id: AgentId,
        manager_id: AgentId,
        role: Role,
        display_name: String,
        cwd: String,
        model: ModelSpec,
        restart_of: Option<&AgentDescriptor>,
    ) -> Result<AgentDescriptor> {
        let spec = AgentProcessSpec {
            program: self.agent_runtime_program.clone(),
            args: Vec::new(),
            cwd: PathBuf::from(&cwd),
        };
        let (cmd_tx, mut event_rx) = AgentSession::start(agent_id.clone(), spec, self.session_timeouts)?;

        let forward_tx = self.session_event_tx.clone();
        let forward_agent_id = agent_id.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if forward_tx.send((forward_agent_id.clone(), event)).await.is_err() {
                    break;
                }
            }
        });

        let now = Utc::now();
        let session_file = self.data_dirs.session_file(&agent_id);
        let descriptor = AgentDescriptor {
            agent_id: agent_id.clone(),
            manager_id,
            role,
            display_name,
            cwd,
            model,
            created_at: restart_of.map_or(now, |d| d.created_at),
            updated_at: now,
            session_file: session_file.to_string_lossy().into_owned(),
            status: AgentStatus::Idle,
            context_usage: None,
        };

        if restart_of.is_some() {
            self.history.register_from_disk(&agent_id, session_file);
        } else {
            self.write_session_header(&descriptor);
            self.history.register(&agent_id, Some(session_file));
        }
        self.agents.insert(agent_id, AgentRecord { descriptor: descriptor.clone(), cmd_tx });
        Ok(descriptor)
    }

    fn write_session_header(&self, descriptor: &AgentDescriptor) {
        let Ok(header) = serde_json::to_string(&serde_json::json!({
            "_type": "metadata",
            "descriptor": descriptor,
        })) else {
            return;
        };
        if let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&descriptor.session_file)
        {
            use std::io::Write;
            let _ = writeln!(file, "{header}");
        }
    }

    async fn delete_manager(&mut self, manager_id: &AgentId) -> Result<()> {
        if !self.agents.contains_key(manager_id) {
            return Ok(()); // idempotent: deleting an unknown id is a no-op success
        }
        let worker_ids: Vec<AgentId> = self
            .agents
            .iter()
            .filter(|(id, r)| *id != manager_id && &r.descriptor.manager_id == manager_id)
            .map(|(id, _)| id.clone())
            .collect();

        for worker_id in &worker_ids {
            self.stop_and_remove(worker_id).await;
        }
        self.stop_and_remove(manager_id).await;

        self.hub.broadcast(ServerEvent::ManagerDeleted {
            manager_id: manager_id.clone(),
            request_id: None,
        });
        self.broadcast_snapshot();
        Ok(())
    }

    async fn kill_agent(&mut self, agent_id: &AgentId) -> Result<()> {
        let record = self
            .agents
            .get(agent_id)
            .ok_or_else(|| MiddlemanError::UnknownAgent(agent_id.clone()))?;
        if record.descriptor.role == Role::Manager {
            return Err(MiddlemanError::InvalidAgent(
                "killAgent is forbidden for managers; use deleteManager".into(),
            ));
        }
        self.stop_and_remove(agent_id).await;
        self.broadcast_snapshot();
        Ok(())
    }

    async fn stop_all_agents(&mut self, manager_id: &AgentId) -> Result<StopAllResult> {
        if !self.agents.contains_key(manager_id) {
            return Err(MiddlemanError::StopAllAgentsFailed(format!(
                "unknown manager {manager_id}"
            )));
        }
        let worker_ids: Vec<AgentId> = self
            .agents
            .iter()
            .filter(|(id, r)| *id != manager_id && &r.descriptor.manager_id == manager_id)
            .map(|(id, _)| id.clone())
            .collect();

        for worker_id in &worker_ids {
            self.stop_and_remove(worker_id).await;
        }
        self.stop_and_remove(manager_id).await;
        self.broadcast_snapshot();

        Ok(StopAllResult {
            stopped_workers: worker_ids,
            manager_stopped: true,
        })
    }

    async fn stop_and_remove(&mut self, agent_id: &AgentId) {
        if let Some(record) = self.agents.remove(agent_id) {
            let _ = record
                .cmd_tx
                .send(SessionCommand::Stop { mode: StopMode::Graceful })
                .await;
        }
        self.history.remove(agent_id);
    }

    async fn handle_input(&mut self, input: Input) -> Result<()> {
        if !input.is_valid() {
            return Ok(()); // boundary behavior: silently dropped, not an error
        }
        let record = self
            .agents
            .get(&input.agent_id)
            .ok_or_else(|| MiddlemanError::UnknownAgent(input.agent_id.clone()))?;
        record
            .cmd_tx
            .send(SessionCommand::Deliver(input))
            .await
            .map_err(|_| MiddlemanError::UnknownAgent("agent session gone".into()))
    }

    /// Primary-manager selection (spec §4.4): a self-owned manager wins;
    /// else the lexicographically earliest `createdAt` manager; else the
    /// first active agent of any role; else `None`.
    fn pick_primary(&self) -> Option<AgentId> {
        self.agents
            .values()
            .filter(|r| r.descriptor.role == Role::Manager && r.descriptor.manager_id == r.descriptor.agent_id)
            .min_by_key(|r| r.descriptor.created_at)
            .map(|r| r.descriptor.agent_id.clone())
            .or_else(|| self.agents.values().next().map(|r| r.descriptor.agent_id.clone()))
    }

    fn resolve_target(&self, agent_id: Option<AgentId>) -> Option<AgentId> {
        agent_id
            .filter(|id| self.agents.contains_key(id))
            .or_else(|| self.pick_primary())
    }

    fn subscribe(&mut self, agent_id: Option<AgentId>) -> (SubscriberHandle, Option<AgentId>) {
        let handle = self.hub.register();
        let target = self.resolve_target(agent_id);

        if let Some(target) = &target {
            let (conversation, activity) = self.history.replay(target);
            self.hub.switch_to(&handle.id, target.clone(), conversation, activity);
        }

        (handle, target)
    }

    fn switch_to(&mut self, subscriber_id: &str, agent_id: &AgentId) -> Result<()> {
        if !self.agents.contains_key(agent_id) {
            return Err(MiddlemanError::UnknownAgent(agent_id.clone()));
        }
        let (conversation, activity) = self.history.replay(agent_id);
        self.hub.switch_to(subscriber_id, agent_id.clone(), conversation, activity);
        Ok(())
    }

    async fn handle_session_event(&mut self, agent_id: AgentId, event: SessionEvent) {
        match event {
            SessionEvent::Conversation(body) => {
                let event = stamp(&agent_id, body);
                let event = self.history.append(&agent_id, event);
                self.hub.dispatch(&event);
            }
            SessionEvent::StatusChanged { status, pending_count } => {
                if let Some(record) = self.agents.get_mut(&agent_id) {
                    record.descriptor.status = status;
                    record.descriptor.updated_at = Utc::now();
                }
                self.hub.broadcast(ServerEvent::AgentStatus {
                    agent_id,
                    status,
                    pending_count,
                });
            }
            SessionEvent::ContextUsage { used, total } => {
                if let Some(record) = self.agents.get_mut(&agent_id) {
                    record.descriptor.context_usage = Some(crate::wire::ContextUsage { used, total });
                    record.descriptor.updated_at = Utc::now();
                }
            }
            SessionEvent::Terminated { .. } => {
                if let Some(record) = self.agents.get_mut(&agent_id) {
                    record.descriptor.status = AgentStatus::Terminated;
                    record.descriptor.updated_at = Utc::now();
                }
                self.broadcast_snapshot();
            }
        }
    }

    /// Restart-on-boot (spec §4.4): scan persisted session files. Agents
    /// recorded as `streaming` at the previous shutdown are registered as
    /// `stopped_on_restart` (not resumed); agents that were `idle` are
    /// re-spawned so their history remains readable.
    fn restart_on_boot(&mut self) {
        if let Err(e) = self.data_dirs.ensure_all() {
            tracing::warn!(error = %e, "failed to create data directories");
            return;
        }
        let Ok(read_dir) = std::fs::read_dir(self.data_dirs.sessions_dir()) else {
            return;
        };

        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some((descriptor, was_streaming)) = Self::read_session_file(&path) else {
                continue;
            };

            if was_streaming {
                self.history.register_from_disk(&descriptor.agent_id, path.clone());
                let mut descriptor = descriptor;
                descriptor.status = AgentStatus::StoppedOnRestart;
                descriptor.updated_at = Utc::now();
                tracing::info!(agent_id = %descriptor.agent_id, "agent was streaming at shutdown; not auto-resumed");
                self.register_inert(descriptor);
            } else {
                tracing::info!(agent_id = %descriptor.agent_id, "respawning agent that was idle at shutdown");
                let cwd = descriptor.cwd.clone();
                let model = descriptor.model.clone();
                let _ = self.spawn_agent(
                    descriptor.agent_id.clone(),
                    descriptor.manager_id.clone(),
                    descriptor.role,
                    descriptor.display_name.clone(),
                    cwd,
                    model,
                    Some(&descriptor),
                );
            }
        }
    }

    /// Registers a descriptor with no backing subprocess — used only for
    /// `stopped_on_restart` agents, which are never auto-resumed.
    fn register_inert(&mut self, descriptor: AgentDescriptor) {
        let (cmd_tx, _rx) = mpsc::channel(1);
        self.agents.insert(descriptor.agent_id.clone(), AgentRecord { descriptor, cmd_tx });
    }

    /// Parses the metadata header plus a best-effort scan of the event
    /// lines to decide whether the agent was mid-stream when the daemon
    /// last exited (an open `message_start` with no matching
    /// `message_end`).
    fn read_session_file(path: &std::path::Path) -> Option<(AgentDescriptor, bool)> {
        let file = std::fs::File::open(path).ok()?;
        let mut lines = std::io::BufReader::new(file).lines();

        let header: serde_json::Value = serde_json::from_str(&lines.next()?.ok()?).ok()?;
        let descriptor: AgentDescriptor = serde_json::from_value(header.get("descriptor")?.clone()).ok()?;

        let mut streaming = false;
        for line in lines.flatten() {
            let Ok(event) = serde_json::from_str::<crate::wire::ConversationEvent>(&line) else {
                continue;
            };
            match event.body {
                ConversationEventBody::ConversationLog { kind: LogKind::MessageStart, .. } => streaming = true,
                ConversationEventBody::ConversationLog { kind: LogKind::MessageEnd, .. } => streaming = false,
                _ => {}
            }
        }

        Some((descriptor, streaming))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ModelSpec {
        ModelSpec {
            provider: "anthropic".into(),
            model_id: "claude".into(),
            thinking_level: None,
        }
    }

    /// Builds a bare `SwarmManager` without running its actor loop, so tests
    /// can drive `spawn_agent`/`delete_manager` synchronously instead of
    /// racing the handle's mpsc round trip.
    fn test_timeouts() -> SessionTimeouts {
        SessionTimeouts {
            graceful_stop: std::time::Duration::from_secs(5),
            steer_cancel: std::time::Duration::from_secs(15),
        }
    }

    fn bare_manager(root: &std::path::Path) -> SwarmManager {
        let (_cmd_tx, cmd_rx) = mpsc::channel(8);
        let (session_event_tx, session_event_rx) = mpsc::channel(8);
        SwarmManager {
            data_dirs: DataDirs::from_root(root),
            agent_runtime_program: "true".into(),
            session_timeouts: test_timeouts(),
            agents: HashMap::new(),
            history: HistoryStore::new(10),
            hub: SubscriberHub::new(10),
            cmd_rx,
            session_event_tx,
            session_event_rx,
        }
    }

    #[tokio::test]
    async fn delete_unknown_manager_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = SwarmManager::start(DataDirs::from_root(tmp.path()), "true".into(), 10, 10, test_timeouts());
        assert!(handle.delete_manager("nope".into()).await.is_ok());
        assert!(handle.delete_manager("nope".into()).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_directory_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = SwarmManager::start(DataDirs::from_root(tmp.path()), "true".into(), 10, 10, test_timeouts());
        let err = handle
            .create_manager("m".into(), "/does/not/exist".into(), ModelSpec {
                provider: "anthropic".into(),
                model_id: "claude".into(),
                thinking_level: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_DIRECTORY");
    }

    #[tokio::test]
    async fn handle_input_for_unknown_agent_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = SwarmManager::start(DataDirs::from_root(tmp.path()), "true".into(), 10, 10, test_timeouts());
        let input = Input {
            text: "hi".into(),
            attachments: vec![],
            source_context: None,
            delivery: crate::wire::Delivery::Auto,
            agent_id: "unknown".into(),
        };
        let err = handle.handle_input(input).await.unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_AGENT");
    }

    /// Scenario 3 (spec §8): deleting a manager cascades to its workers.
    #[tokio::test]
    async fn delete_manager_cascades_to_workers() {
        let tmp = tempfile::tempdir().unwrap();
        let cwd = tmp.path().to_string_lossy().into_owned();
        let mut manager = bare_manager(tmp.path());

        let root = manager
            .spawn_agent("m1".into(), "m1".into(), Role::Manager, "root".into(), cwd.clone(), model(), None)
            .unwrap();
        manager
            .spawn_agent("w1".into(), "m1".into(), Role::Worker, "worker-one".into(), cwd.clone(), model(), None)
            .unwrap();
        manager
            .spawn_agent("w2".into(), "m1".into(), Role::Worker, "worker-two".into(), cwd, model(), None)
            .unwrap();
        assert_eq!(manager.agents.len(), 3);

        manager.delete_manager(&root.agent_id).await.unwrap();
        assert!(manager.agents.is_empty());
    }

    #[tokio::test]
    async fn kill_agent_is_forbidden_for_managers() {
        let tmp = tempfile::tempdir().unwrap();
        let cwd = tmp.path().to_string_lossy().into_owned();
        let mut manager = bare_manager(tmp.path());
        let root = manager
            .spawn_agent("m1".into(), "m1".into(), Role::Manager, "root".into(), cwd, model(), None)
            .unwrap();

        let err = manager.kill_agent(&root.agent_id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_AGENT");
        assert_eq!(manager.agents.len(), 1);
    }

    #[tokio::test]
    async fn stop_all_agents_reports_every_stopped_worker() {
        let tmp = tempfile::tempdir().unwrap();
        let cwd = tmp.path().to_string_lossy().into_owned();
        let mut manager = bare_manager(tmp.path());
        let root = manager
            .spawn_agent("m1".into(), "m1".into(), Role::Manager, "root".into(), cwd.clone(), model(), None)
            .unwrap();
        manager
            .spawn_agent("w1".into(), "m1".into(), Role::Worker, "worker".into(), cwd, model(), None)
            .unwrap();

        let result = manager.stop_all_agents(&root.agent_id).await.unwrap();
        assert!(result.manager_stopped);
        assert_eq!(result.stopped_workers, vec!["w1".to_string()]);
        assert!(manager.agents.is_empty());
    }

    /// `subscribe(None)` resolution order (spec §4.4): self-owned manager
    /// with the earliest `createdAt` wins over a later-created one.
    #[tokio::test]
    async fn subscribe_with_no_agent_id_picks_earliest_manager() {
        let tmp = tempfile::tempdir().unwrap();
        let cwd = tmp.path().to_string_lossy().into_owned();
        let mut manager = bare_manager(tmp.path());
        let first = manager
            .spawn_agent("m1".into(), "m1".into(), Role::Manager, "first".into(), cwd.clone(), model(), None)
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        manager
            .spawn_agent("m2".into(), "m2".into(), Role::Manager, "second".into(), cwd, model(), None)
            .unwrap();

        let (_handle, target) = manager.subscribe(None);
        assert_eq!(target, Some(first.agent_id));
    }
}
