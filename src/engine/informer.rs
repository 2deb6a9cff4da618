//! Continuously-reconnecting watch over one (context, resource) pair

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::backoff::Backoff;
use super::client::WatchEvent;
use super::error::WatchError;
use super::resources::ResourceName;
use super::runtime::ContextRuntime;

/// Handle to a running informer task.
///
/// At most one informer exists per (context, resource) pair; the owning
/// [`ContextRuntime`] enforces that through its informer map. Disposing the
/// handle cancels the watch, the retry timer, and any in-flight list, and
/// guarantees no further cache mutation from this informer.
#[derive(Debug)]
pub(crate) struct Informer {
    token: CancellationToken,
}

impl Informer {
    pub fn spawn(runtime: Arc<ContextRuntime>, resource: ResourceName) -> Self {
        let token = runtime.token.child_token();
        let task_token = token.clone();
        tokio::spawn(async move {
            run(runtime, resource, task_token).await;
        });
        Self { token }
    }

    pub fn dispose(&self) {
        self.token.cancel();
    }
}

impl Drop for Informer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(runtime: Arc<ContextRuntime>, resource: ResourceName, token: CancellationToken) {
    let mut backoff = Backoff::new(runtime.backoff_tuning());
    loop {
        let error = tokio::select! {
            _ = token.cancelled() => return,
            result = sync_once(&runtime, resource, &mut backoff) => match result {
                Ok(()) => return,
                Err(error) => error,
            },
        };

        runtime.on_stream_error(resource, &error);
        let delay = backoff.next();
        debug!(
            context = %runtime.context.name,
            resource = %resource,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "watch failed, scheduling restart"
        );

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        // The context may have been deleted while the retry was in flight;
        // restarting a watch against it must be suppressed.
        if !runtime.still_configured() {
            debug!(
                context = %runtime.context.name,
                resource = %resource,
                "context no longer configured, suppressing watch restart"
            );
            return;
        }
    }
}

/// One list+watch attempt. Returns `Ok(())` only when the stream is consumed
/// to the point of cancellation (the surrounding select exits first in that
/// case); any transport failure maps to `Err` for the retry loop.
///
/// The backoff resets on every successful reconnect: a completed list or a
/// connect event on the stream.
async fn sync_once(
    runtime: &Arc<ContextRuntime>,
    resource: ResourceName,
    backoff: &mut Backoff,
) -> Result<(), WatchError> {
    let client = runtime
        .client()
        .ok_or_else(|| WatchError::new("context client not initialized"))?;

    let objects = client.list(resource).await?;
    backoff.reset();
    runtime.on_list_synced(resource, objects);

    let mut stream = client.watch(resource).await?;
    while let Some(event) = stream.next().await {
        match event {
            WatchEvent::Add(object) => runtime.on_add(resource, object),
            WatchEvent::Update(object) => runtime.on_update(resource, object),
            WatchEvent::Delete(object) => runtime.on_delete(resource, object),
            WatchEvent::Connect(None) => {
                backoff.reset();
                runtime.on_connect_ok(resource);
            }
            WatchEvent::Connect(Some(error)) | WatchEvent::Error(error) => return Err(error),
        }
    }
    Err(WatchError::stream_closed())
}
