//! Polling activity stream for a single sandbox.

use crate::error::Result;
use crate::sandbox::{Command, Sandbox};
use crate::service::SandboxService;
use crate::store::{ListOptions, OrderBy, SandboxStore, StoreError};
use chrono::{DateTime, SecondsFormat, Utc};
use kestrel_keys::Clock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Most commands replayed when a watcher connects.
pub const HISTORY_LIMIT: usize = 50;

const CHANNEL_CAPACITY: usize = 64;

/// Kind of [`StreamEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Connected,
    CommandHistory,
    CommandNew,
    Heartbeat,
    Error,
}

/// One event on a sandbox activity stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// RFC 3339. For command events, when the command ended.
    pub timestamp: String,
    pub sandbox_id: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl StreamEvent {
    fn connected(sandbox: &Sandbox, now: DateTime<Utc>) -> Self {
        Self {
            event_type: EventType::Connected,
            timestamp: rfc3339(now),
            sandbox_id: sandbox.id.clone(),
            data: json!({
                "sandbox_id": sandbox.id,
                "vm_name": sandbox.vm_name,
                "state": sandbox.state,
                "ip_address": sandbox.ip_address,
            }),
        }
    }

    fn command(event_type: EventType, command: &Command) -> Self {
        Self {
            event_type,
            timestamp: rfc3339(command.ended_at),
            sandbox_id: command.sandbox_id.clone(),
            data: json!({
                "command_id": command.id,
                "command": command.command,
                "stdout": command.stdout,
                "stderr": command.stderr,
                "exit_code": command.exit_code,
                "started_at": rfc3339(command.started_at),
                "ended_at": rfc3339(command.ended_at),
            }),
        }
    }

    fn heartbeat(sandbox_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            event_type: EventType::Heartbeat,
            timestamp: rfc3339(now),
            sandbox_id: sandbox_id.to_string(),
            data: serde_json::Value::Null,
        }
    }

    fn error(sandbox_id: &str, now: DateTime<Utc>, message: String) -> Self {
        Self {
            event_type: EventType::Error,
            timestamp: rfc3339(now),
            sandbox_id: sandbox_id.to_string(),
            data: json!({ "error": message }),
        }
    }
}

impl SandboxService {
    /// Watch a sandbox's command activity.
    ///
    /// Fails immediately if the sandbox does not exist. Otherwise a
    /// background task polls the store every `interval` (the configured
    /// stream interval when `None`) until the receiver is dropped or the
    /// sandbox goes away.
    pub async fn watch(
        &self,
        sandbox_id: &str,
        interval: Option<Duration>,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let sandbox = self.get_sandbox(sandbox_id).await?;
        let interval = interval
            .filter(|i| !i.is_zero())
            .unwrap_or(self.config().stream_interval);
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let watcher = Watcher {
            store: self.store(),
            clock: self.clock(),
            tx,
        };
        tokio::spawn(watcher.run(sandbox, interval));
        Ok(rx)
    }
}

struct Watcher {
    store: Arc<dyn SandboxStore>,
    clock: Arc<dyn Clock>,
    tx: mpsc::Sender<StreamEvent>,
}

impl Watcher {
    async fn commands(&self, sandbox_id: &str) -> std::result::Result<Vec<Command>, StoreError> {
        self.store
            .list_commands(sandbox_id, &ListOptions::ascending(OrderBy::StartedAt))
            .await
    }

    /// Send one event. `false` once the receiver is gone.
    async fn send(&self, event: StreamEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    async fn run(self, sandbox: Sandbox, interval: Duration) {
        let id = sandbox.id.clone();
        tracing::debug!(sandbox_id = %id, interval_ms = interval.as_millis() as u64, "Activity stream opened");

        if !self.send(StreamEvent::connected(&sandbox, self.clock.now())).await {
            return;
        }
        let history = self.commands(&id).await.unwrap_or_else(|e| {
            tracing::warn!(sandbox_id = %id, error = %e, "Failed to load command history");
            Vec::new()
        });
        let skip = history.len().saturating_sub(HISTORY_LIMIT);
        for command in &history[skip..] {
            if !self
                .send(StreamEvent::command(EventType::CommandHistory, command))
                .await
            {
                return;
            }
        }
        let mut seen: HashSet<String> = history.into_iter().map(|c| c.id).collect();

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.tx.closed() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.store.get_sandbox(&id).await {
                let message = match e {
                    StoreError::NotFound(_) => format!("sandbox {id} no longer exists"),
                    other => other.to_string(),
                };
                let _ = self
                    .send(StreamEvent::error(&id, self.clock.now(), message))
                    .await;
                break;
            }

            match self.commands(&id).await {
                Ok(commands) => {
                    for command in commands {
                        if seen.contains(&command.id) {
                            continue;
                        }
                        if !self
                            .send(StreamEvent::command(EventType::CommandNew, &command))
                            .await
                        {
                            return;
                        }
                        seen.insert(command.id);
                    }
                }
                Err(e) => tracing::warn!(sandbox_id = %id, error = %e, "Failed to poll commands"),
            }

            if !self.send(StreamEvent::heartbeat(&id, self.clock.now())).await {
                break;
            }
        }
        tracing::debug!(sandbox_id = %id, "Activity stream closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::service::CreateSandboxRequest;
    use crate::store::MemoryStore;
    use crate::test_support::{ManualClock, MockDriver};

    async fn setup() -> (SandboxService, Arc<MemoryStore>, Sandbox) {
        let store = Arc::new(MemoryStore::new());
        let service =
            SandboxService::new(MockDriver::new(), store.clone(), ServiceConfig::default())
                .unwrap()
                .with_clock(ManualClock::new());
        let sandbox = service
            .create_sandbox(CreateSandboxRequest::new("golden-ubuntu", "agent-1"))
            .await
            .unwrap();
        (service, store, sandbox)
    }

    fn command(sandbox_id: &str, n: i64) -> Command {
        let at = DateTime::from_timestamp(1_700_000_000 + n, 0).unwrap();
        Command {
            id: format!("CMD-{n:04}"),
            sandbox_id: sandbox_id.to_string(),
            command: format!("echo {n}"),
            env_json: None,
            stdout: format!("{n}\n"),
            stderr: String::new(),
            exit_code: 0,
            started_at: at,
            ended_at: at,
        }
    }

    #[tokio::test]
    async fn test_watch_unknown_sandbox() {
        let (service, _, _) = setup().await;
        let err = service.watch("SBX-missing", None).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_sequence() {
        let (service, store, sb) = setup().await;
        store.save_command(&command(&sb.id, 1)).await.unwrap();
        store.save_command(&command(&sb.id, 2)).await.unwrap();

        let mut rx = service.watch(&sb.id, None).await.unwrap();

        let connected = rx.recv().await.unwrap();
        assert_eq!(connected.event_type, EventType::Connected);
        assert_eq!(connected.data["state"], "CREATED");
        assert_eq!(connected.data["vm_name"], sb.vm_name.as_str());

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.event_type, EventType::CommandHistory);
        assert_eq!(first.data["command_id"], "CMD-0001");
        assert_eq!(second.data["command_id"], "CMD-0002");
        assert_eq!(first.timestamp, "2023-11-14T22:13:21Z");

        store.save_command(&command(&sb.id, 3)).await.unwrap();
        let new = rx.recv().await.unwrap();
        assert_eq!(new.event_type, EventType::CommandNew);
        assert_eq!(new.data["command"], "echo 3");
        assert_eq!(new.data["exit_code"], 0);
        assert_eq!(rx.recv().await.unwrap().event_type, EventType::Heartbeat);

        // Nothing new: just a heartbeat.
        assert_eq!(rx.recv().await.unwrap().event_type, EventType::Heartbeat);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_completion_emits_each_once() {
        let (service, store, sb) = setup().await;
        store.save_command(&command(&sb.id, 0)).await.unwrap();
        let mut rx = service
            .watch(&sb.id, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().event_type, EventType::Connected);
        assert_eq!(rx.recv().await.unwrap().event_type, EventType::CommandHistory);

        // The later-started command finishes and is saved first.
        store.save_command(&command(&sb.id, 2)).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.event_type, EventType::CommandNew);
        assert_eq!(first.data["command_id"], "CMD-0002");
        assert_eq!(rx.recv().await.unwrap().event_type, EventType::Heartbeat);

        store.save_command(&command(&sb.id, 1)).await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event_type, EventType::CommandNew);
        assert_eq!(second.data["command_id"], "CMD-0001");
        assert_eq!(rx.recv().await.unwrap().event_type, EventType::Heartbeat);

        assert_eq!(rx.recv().await.unwrap().event_type, EventType::Heartbeat);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_capped() {
        let (service, store, sb) = setup().await;
        for n in 0..60 {
            store.save_command(&command(&sb.id, n)).await.unwrap();
        }
        let mut rx = service.watch(&sb.id, None).await.unwrap();
        rx.recv().await.unwrap();

        let mut history = Vec::new();
        loop {
            let event = rx.recv().await.unwrap();
            if event.event_type != EventType::CommandHistory {
                assert_eq!(event.event_type, EventType::Heartbeat);
                break;
            }
            history.push(event);
        }
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history[0].data["command_id"], "CMD-0010");
        assert_eq!(history[49].data["command_id"], "CMD-0059");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_ends_when_sandbox_removed() {
        let (service, store, sb) = setup().await;
        let mut rx = service
            .watch(&sb.id, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().event_type, EventType::Connected);

        store.delete_sandbox(&sb.id).await.unwrap();
        let last = rx.recv().await.unwrap();
        assert_eq!(last.event_type, EventType::Error);
        assert!(last.data["error"].as_str().unwrap().contains("no longer exists"));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_event_wire_format() {
        let event = StreamEvent::heartbeat("SBX-1", DateTime::from_timestamp(0, 0).unwrap());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            json!({"type": "heartbeat", "timestamp": "1970-01-01T00:00:00Z", "sandbox_id": "SBX-1"})
        );
    }
}
