//! Client WebSocket handler (spec §4.5/§6): decodes `ClientCommand` frames,
//! drives SwarmManagerHandle, and streams the subscriber's outbound events
//! back to the socket — the same "init event, then live stream" composition
//! as the teacher's `api/sse.rs::sse_stream`, adapted to a duplex transport
//! so client commands and server events interleave on one connection.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use tracing::warn;

use crate::swarm::RpcTracker;
use crate::wire::{ClientCommand, DirectoryEntry, ServerEvent};

use super::AppState;

pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let (subscriber, subscribed_agent_id) = state.swarm.subscribe(None).await;
    let subscriber_id = subscriber.id.clone();

    if send_event(&mut socket, &ServerEvent::Ready { subscribed_agent_id }).await.is_err() {
        state.swarm.unsubscribe(subscriber_id).await;
        return;
    }

    let mut rpc = RpcTracker::new(state.config.timeouts.rpc_timeout(), state.config.rpc.compat_reject_by_code_prefix);
    let mut sweep = tokio::time::interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            event = subscriber.recv() => {
                resolve_if_rpc_reply(&event, &mut rpc);
                if send_event(&mut socket, &event).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_command(&text, &state, &subscriber_id, &mut rpc, &mut socket).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read error");
                        break;
                    }
                }
            }
            _ = sweep.tick() => {
                for request_id in rpc.sweep_timed_out() {
                    let _ = send_event(&mut socket, &ServerEvent::Error {
                        code: "RPC_TIMEOUT",
                        message: "request timed out".into(),
                        request_id: Some(request_id),
                    }).await;
                }
            }
        }
    }

    state.swarm.unsubscribe(subscriber_id).await;
}

/// A control-command reply resolves its tracked `requestId`, so a response
/// that arrives after the RPC timeout swept it is logged and dropped rather
/// than sent (spec §4.7).
fn resolve_if_rpc_reply(event: &ServerEvent, rpc: &mut RpcTracker) {
    let request_id = match event {
        ServerEvent::ManagerCreated { request_id, .. }
        | ServerEvent::ManagerDeleted { request_id, .. }
        | ServerEvent::StopAllAgentsResult { request_id, .. }
        | ServerEvent::DirectoriesListed { request_id, .. }
        | ServerEvent::DirectoryValidated { request_id, .. }
        | ServerEvent::DirectoryPicked { request_id, .. } => request_id.as_deref(),
        _ => None,
    };
    if let Some(request_id) = request_id {
        rpc.resolve(request_id);
    }
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).unwrap_or_default();
    socket.send(Message::Text(text)).await
}

/// Decodes and dispatches one client frame. Returns `false` when the
/// connection should be torn down.
async fn handle_command(
    text: &str,
    state: &AppState,
    subscriber_id: &str,
    rpc: &mut RpcTracker,
    socket: &mut WebSocket,
) -> bool {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            let _ = send_event(socket, &ServerEvent::Error {
                code: "RUNTIME_PROTOCOL_ERROR",
                message: format!("malformed command: {e}"),
                request_id: None,
            })
            .await;
            return true;
        }
    };

    match command {
        ClientCommand::Ping => {}

        ClientCommand::Subscribe { agent_id } => {
            state.swarm.resubscribe(subscriber_id.to_string(), agent_id).await;
        }

        ClientCommand::UserMessage { text, agent_id, delivery, attachments } => {
            let Some(agent_id) = agent_id else {
                let _ = send_event(socket, &ServerEvent::Error {
                    code: "UNKNOWN_AGENT",
                    message: "user_message requires an agentId".into(),
                    request_id: None,
                })
                .await;
                return true;
            };
            let input = crate::channels::normalize_web_input(agent_id, text, attachments, delivery.unwrap_or_default());
            if let Err(e) = state.swarm.handle_input(input).await {
                let _ = send_event(socket, &ServerEvent::Error {
                    code: e.code(),
                    message: e.to_string(),
                    request_id: None,
                })
                .await;
            }
        }

        ClientCommand::KillAgent { agent_id } => {
            if let Err(e) = state.swarm.kill_agent(agent_id).await {
                let _ = send_event(socket, &ServerEvent::Error {
                    code: e.code(),
                    message: e.to_string(),
                    request_id: None,
                })
                .await;
            }
        }

        ClientCommand::CreateManager { name, cwd, model, request_id } => {
            track(rpc, &request_id, "create_manager");
            match state.swarm.create_manager(name, cwd, model).await {
                Ok(agent) => {
                    let _ = send_event(socket, &ServerEvent::ManagerCreated { agent, request_id }).await;
                }
                Err(e) => {
                    let _ = send_event(socket, &ServerEvent::Error { code: e.code(), message: e.to_string(), request_id }).await;
                }
            }
        }

        ClientCommand::DeleteManager { manager_id, request_id } => {
            track(rpc, &request_id, "delete_manager");
            match state.swarm.delete_manager(manager_id.clone()).await {
                Ok(()) => {
                    let _ = send_event(socket, &ServerEvent::ManagerDeleted { manager_id, request_id }).await;
                }
                Err(e) => {
                    let _ = send_event(socket, &ServerEvent::Error { code: e.code(), message: e.to_string(), request_id }).await;
                }
            }
        }

        ClientCommand::StopAllAgents { manager_id, request_id } => {
            track(rpc, &request_id, "stop_all_agents");
            match state.swarm.stop_all_agents(manager_id.clone()).await {
                Ok(result) => {
                    let _ = send_event(socket, &ServerEvent::StopAllAgentsResult {
                        manager_id,
                        stopped_workers: result.stopped_workers,
                        manager_stopped: result.manager_stopped,
                        request_id,
                    })
                    .await;
                }
                Err(e) => {
                    let _ = send_event(socket, &ServerEvent::Error { code: e.code(), message: e.to_string(), request_id }).await;
                }
            }
        }

        ClientCommand::ListDirectories { path, request_id } => {
            track(rpc, &request_id, "list_directories");
            let path = path.unwrap_or_else(|| ".".into());
            let entries = list_directory_entries(&path);
            let _ = send_event(socket, &ServerEvent::DirectoriesListed { path, entries, request_id }).await;
        }

        ClientCommand::ValidateDirectory { path, request_id } => {
            track(rpc, &request_id, "validate_directory");
            let valid = std::path::Path::new(&path).is_dir();
            let _ = send_event(socket, &ServerEvent::DirectoryValidated { path, valid, request_id }).await;
        }

        ClientCommand::PickDirectory { default_path, request_id } => {
            track(rpc, &request_id, "pick_directory");
            // The daemon has no native file-picker dialog; it echoes back
            // the client-supplied default as the picked path, matching a
            // headless/server deployment where picking happens client-side.
            let _ = send_event(socket, &ServerEvent::DirectoryPicked { path: default_path, request_id }).await;
        }
    }

    true
}

fn track(rpc: &mut RpcTracker, request_id: &Option<String>, request_type: &'static str) {
    if let Some(id) = request_id {
        rpc.track(id.clone(), request_type);
    }
}

fn list_directory_entries(path: &str) -> Vec<DirectoryEntry> {
    let Ok(read_dir) = std::fs::read_dir(path) else {
        return Vec::new();
    };
    let mut entries: Vec<DirectoryEntry> = read_dir
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                return None;
            }
            let is_dir = entry.file_type().ok()?.is_dir();
            Some(DirectoryEntry { name, is_dir })
        })
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}
