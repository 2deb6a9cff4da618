//! Multi-cluster Kubernetes context state synchronization engine
//!
//! Given kubeconfig-style context configurations, [`ContextsManager`]
//! maintains live, continuously-reconciled caches of selected resource
//! collections for each reachable context, tracks reachability through
//! retry/backoff, and publishes rate-limited change notifications through a
//! [`NotificationSink`].
//!
//! The engine never talks to a network socket itself: each context is served
//! by a [`ContextClient`] built by the [`ContextClientFactory`] handed to
//! the manager. [`clients::KubeClientFactory`] is the production binding on
//! top of the kube client; tests plug in scripted fakes.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use kube::config::Kubeconfig;
//! use kube_context_sync::{ContextsConfig, ContextsManager, NotificationSink};
//! use kube_context_sync::clients::KubeClientFactory;
//!
//! struct LogSink;
//!
//! impl NotificationSink for LogSink {
//!     fn send(&self, channel: &str, payload: serde_json::Value) {
//!         tracing::info!(channel, %payload, "state update");
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let kubeconfig = Kubeconfig::read()?;
//! let config = ContextsConfig::from_kubeconfig(&kubeconfig)?;
//! let manager = ContextsManager::new(
//!     Arc::new(KubeClientFactory::new(kubeconfig)),
//!     Arc::new(LogSink),
//! );
//! manager.update(config)?;
//! # Ok(())
//! # }
//! ```

pub mod clients;
pub mod config;
pub mod engine;

pub use config::{ClusterContext, ContextsConfig};
pub use engine::{
    Backoff, BackoffConfig, CHANNEL_CHECKING_STATE, CHANNEL_GENERAL_STATE, CheckingState,
    ContextClient, ContextClientFactory, ContextGeneralState, ContextState, ContextsManager,
    EngineConfig, Error, EventStream, NotificationSink, ResourceName, ResourceObject,
    ResourceStatePayload, ResourceWatchersRegistry, Result, WatchError, WatchEvent,
    resource_channel,
};
