//! The context state synchronization engine
//!
//! Leaves first: [`backoff`] and [`scheduler`] are the timing primitives,
//! [`resources`]/[`state`] the cached data model, [`client`] the transport
//! seam. [`informer`] maintains one reconnecting watch, [`runtime`] one
//! context's controller set, [`manager`] reconciles configuration snapshots
//! into runtimes and [`dispatcher`] rate-limits the outbound notifications.

pub mod backoff;
pub mod client;
pub mod dispatcher;
pub mod error;
mod informer;
pub mod manager;
pub mod registry;
pub mod resources;
mod runtime;
pub mod scheduler;
pub mod state;

pub use backoff::{Backoff, BackoffConfig};
pub use client::{ContextClient, ContextClientFactory, EventStream, WatchEvent};
pub use dispatcher::{
    CHANNEL_CHECKING_STATE, CHANNEL_GENERAL_STATE, NotificationSink, resource_channel,
};
pub use error::{Error, Result, WatchError};
pub use manager::{ContextsManager, EngineConfig};
pub use registry::ResourceWatchersRegistry;
pub use resources::{ResourceName, ResourceObject};
pub use state::{CheckingState, ContextGeneralState, ContextState, ResourceStatePayload};
