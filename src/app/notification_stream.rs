use std::str::FromStr;
use std::time::Duration;

use anyhow::anyhow;
use futures::stream::{self, Stream};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::app::notification_queue::NotificationQueue;
use crate::domain::notification::{NotificationKind, QueuedEvent};

/// What a frame's `id` carries.
///
/// The cursor never filters anything. Every entry still in the queue was
/// popped by nobody, so it is delivered whatever the client sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMode {
    /// The client's `Last-Event-ID` when one was given, else the event's own
    /// creation time.
    Echo,
    /// Always the event's own creation time.
    Event,
}

impl FromStr for CursorMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "echo" => Ok(Self::Echo),
            "event" => Ok(Self::Event),
            other => Err(anyhow!("unknown cursor mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub poll_interval: Duration,
    /// Reconnect delay suggested to clients in every frame.
    pub retry: Duration,
    /// Close a stream that has delivered nothing for this long.
    pub idle_timeout: Option<Duration>,
    pub cursor_mode: CursorMode,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            retry: Duration::from_millis(3000),
            idle_timeout: None,
            cursor_mode: CursorMode::Echo,
        }
    }
}

/// Fires once to end every open stream, e.g. on server shutdown.
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_fired(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the trigger fires or is dropped.
    pub async fn fired(&mut self) {
        loop {
            let fired = *self.rx.borrow_and_update();
            if fired {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

/// One text event-stream message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationFrame {
    pub event: NotificationKind,
    pub id: String,
    pub retry_ms: u64,
    pub data: String,
}

impl NotificationFrame {
    pub fn encode(&self) -> String {
        format!(
            "event: {}\nid: {}\nretry: {}\ndata: {}\n\n",
            self.event, self.id, self.retry_ms, self.data
        )
    }
}

/// Turns a recipient's queue into a live feed of frames.
#[derive(Clone)]
pub struct NotificationStreamer {
    queue: NotificationQueue,
    settings: StreamSettings,
    shutdown: ShutdownSignal,
}

impl NotificationStreamer {
    pub fn new(queue: NotificationQueue, settings: StreamSettings, shutdown: ShutdownSignal) -> Self {
        Self {
            queue,
            settings,
            shutdown,
        }
    }

    /// Opens a stream for one connection. Dropping the stream (the HTTP
    /// server does so when the client goes away) ends it.
    pub fn open(
        &self,
        recipient_id: i64,
        last_event_id: Option<String>,
    ) -> impl Stream<Item = NotificationFrame> + Send + 'static {
        debug!(recipient_id, last_event_id = ?last_event_id, "notification stream opened");

        let state = StreamState {
            queue: self.queue.clone(),
            settings: self.settings.clone(),
            shutdown: self.shutdown.clone(),
            recipient_id,
            last_event_id,
            last_activity: Instant::now(),
        };

        stream::unfold(state, |mut state| async move {
            let frame = state.next_frame().await?;
            Some((frame, state))
        })
    }
}

struct StreamState {
    queue: NotificationQueue,
    settings: StreamSettings,
    shutdown: ShutdownSignal,
    recipient_id: i64,
    last_event_id: Option<String>,
    last_activity: Instant,
}

impl StreamState {
    async fn next_frame(&mut self) -> Option<NotificationFrame> {
        loop {
            if self.shutdown.is_fired() {
                return None;
            }
            if let Some(idle_timeout) = self.settings.idle_timeout {
                if self.last_activity.elapsed() >= idle_timeout {
                    debug!(recipient_id = self.recipient_id, "notification stream idle timeout");
                    return None;
                }
            }

            let event = match self.queue.pop(self.recipient_id).await {
                Ok(event) => event,
                Err(err) => {
                    error!(error = ?err, recipient_id = self.recipient_id, "notification queue unavailable, closing stream");
                    return None;
                }
            };

            let Some(event) = event else {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.poll_interval) => {}
                    _ = self.shutdown.fired() => return None,
                }
                continue;
            };

            match self.frame(&event) {
                Ok(frame) => {
                    self.last_activity = Instant::now();
                    return Some(frame);
                }
                Err(err) => {
                    warn!(error = ?err, notification_id = event.notification_id, "failed to encode notification");
                }
            }
        }
    }

    fn frame(&self, event: &QueuedEvent) -> serde_json::Result<NotificationFrame> {
        let id = match self.settings.cursor_mode {
            CursorMode::Echo => self
                .last_event_id
                .clone()
                .unwrap_or_else(|| event.cursor()),
            CursorMode::Event => event.cursor(),
        };

        Ok(NotificationFrame {
            event: event.kind(),
            id,
            retry_ms: self.settings.retry.as_millis() as u64,
            data: serde_json::to_string(event)?,
        })
    }
}

impl Drop for StreamState {
    fn drop(&mut self) {
        debug!(recipient_id = self.recipient_id, "notification stream closed");
    }
}
