//! Capability seam between the engine and the cluster transport
//!
//! The engine never talks to a network socket: it is handed a
//! [`ContextClient`] per context, exposing a list snapshot and a tagged
//! watch event stream per resource kind. The production binding lives in
//! `crate::clients`; tests script a fake.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::error::WatchError;
use super::resources::{ResourceName, ResourceObject};
use crate::config::ClusterContext;

/// One event on a watch stream.
///
/// `Connect(None)` signals a successfully (re-)established watch;
/// `Connect(Some(err))` a failed connection attempt. Data events carry the
/// affected object.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Add(ResourceObject),
    Update(ResourceObject),
    Delete(ResourceObject),
    Connect(Option<WatchError>),
    Error(WatchError),
}

pub type EventStream = BoxStream<'static, WatchEvent>;

/// List/watch capability for a single context.
///
/// `health_check` and `can_watch` back the staged startup pipeline
/// (reachability probe, then permission probe, then informer start); the
/// defaults make both stages pass-through for transports that cannot answer
/// them.
#[async_trait]
pub trait ContextClient: Send + Sync {
    /// Current collection snapshot for `resource`.
    async fn list(&self, resource: ResourceName) -> Result<Vec<ResourceObject>, WatchError>;

    /// Open a watch stream for `resource`. The stream ends (or yields
    /// [`WatchEvent::Error`]) on transport failure; reconnection is the
    /// caller's responsibility.
    async fn watch(&self, resource: ResourceName) -> Result<EventStream, WatchError>;

    /// Lightweight liveness probe against the context's endpoint.
    async fn health_check(&self) -> Result<(), WatchError> {
        Ok(())
    }

    /// Whether the context's credentials permit watching `resource`.
    async fn can_watch(&self, _resource: ResourceName) -> Result<bool, WatchError> {
        Ok(true)
    }
}

/// Builds a [`ContextClient`] for a context description.
#[async_trait]
pub trait ContextClientFactory: Send + Sync {
    async fn client_for(
        &self,
        context: &ClusterContext,
    ) -> Result<Arc<dyn ContextClient>, WatchError>;
}
