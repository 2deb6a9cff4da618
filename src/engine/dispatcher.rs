//! Debounced fan-out of state change notifications
//!
//! Three channel classes leave the engine: the checking-state map, the
//! general-state map, and one channel per resource kind carrying the current
//! context's full object list. Each channel is debounced independently:
//! repeated triggers within the window collapse into a single emission
//! carrying the payload of the last trigger.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::error::Result;
use super::resources::ResourceName;
use super::scheduler::ScheduledTask;

/// Channel carrying the per-context checking/connecting flags.
pub const CHANNEL_CHECKING_STATE: &str = "contexts-checking-state";
/// Channel carrying the per-context reachability/error/count summary.
pub const CHANNEL_GENERAL_STATE: &str = "contexts-general-state";

/// Channel carrying the current context's object list for one kind.
pub fn resource_channel(resource: ResourceName) -> String {
    format!("current-context-resources/{resource}")
}

/// Outbound notification boundary, implemented by the consumer (a UI layer,
/// a test recorder). Called at most once per channel per debounce window.
pub trait NotificationSink: Send + Sync {
    fn send(&self, channel: &str, payload: serde_json::Value);
}

struct ChannelDebouncer {
    task: ScheduledTask,
    pending: Arc<Mutex<Option<serde_json::Value>>>,
}

/// Per-channel trailing-edge debouncer in front of a [`NotificationSink`].
pub(crate) struct Dispatcher {
    sink: Arc<dyn NotificationSink>,
    token: CancellationToken,
    channels: Mutex<HashMap<String, Arc<ChannelDebouncer>>>,
}

impl Dispatcher {
    /// `parent` is the manager's root token: canceling it drops every
    /// pending emission and turns further triggers into no-ops.
    pub fn new(sink: Arc<dyn NotificationSink>, parent: &CancellationToken) -> Self {
        Self {
            sink,
            token: parent.clone(),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Record `payload` as the channel's latest snapshot and (re)start its
    /// debounce window. Serialization failures surface synchronously; a
    /// disposed dispatcher swallows the trigger.
    pub fn trigger<T: Serialize>(
        &self,
        channel: &str,
        window: Duration,
        payload: &T,
    ) -> Result<()> {
        let value = serde_json::to_value(payload)?;
        if self.token.is_cancelled() {
            return Ok(());
        }

        let debouncer = {
            let mut channels = self.channels.lock();
            channels
                .entry(channel.to_string())
                .or_insert_with(|| {
                    Arc::new(ChannelDebouncer {
                        task: ScheduledTask::new(&self.token),
                        pending: Arc::new(Mutex::new(None)),
                    })
                })
                .clone()
        };

        *debouncer.pending.lock() = Some(value);
        trace!(channel, window_ms = window.as_millis() as u64, "debounce armed");

        let sink = self.sink.clone();
        let pending = debouncer.pending.clone();
        let channel = channel.to_string();
        debouncer.task.schedule(window, async move {
            if let Some(payload) = pending.lock().take() {
                sink.send(&channel, payload);
            }
        });
        Ok(())
    }

    /// Drop every pending emission. Called on manager disposal, after the
    /// shared token has been canceled.
    pub fn clear(&self) {
        let mut channels = self.channels.lock();
        for debouncer in channels.values() {
            debouncer.task.cancel();
            debouncer.pending.lock().take();
        }
        channels.clear();
    }
}
