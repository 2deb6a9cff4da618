//! Reconciliation driver: diffs configurations into context runtimes

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::backoff::BackoffConfig;
use super::client::ContextClientFactory;
use super::dispatcher::{
    CHANNEL_CHECKING_STATE, CHANNEL_GENERAL_STATE, Dispatcher, NotificationSink, resource_channel,
};
use super::error::{Error, Result};
use super::registry::ResourceWatchersRegistry;
use super::resources::{ResourceName, ResourceObject};
use super::runtime::ContextRuntime;
use super::state::{CheckingState, ContextGeneralState, ResourceStatePayload};
use crate::config::ContextsConfig;

/// Engine tunables. The defaults match interactive use: a human is waiting
/// on the current context, background contexts can be lazy.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Backoff tuning for the current context's watches
    pub current_context_backoff: BackoffConfig,
    /// Backoff tuning for every other context
    pub background_backoff: BackoffConfig,
    /// How long a bare connect must hold before the context counts as
    /// reachable
    pub connect_delay: Duration,
    /// Debounce window for the checking-state channel
    pub checking_state_debounce: Duration,
    /// Debounce window for the general-state channel
    pub general_state_debounce: Duration,
    /// Debounce window for per-resource channels
    pub resource_state_debounce: Duration,
    /// Above this many contexts, only the current context is fully managed
    pub large_config_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            current_context_backoff: BackoffConfig::current_context(),
            background_backoff: BackoffConfig::background(),
            connect_delay: Duration::from_secs(1),
            checking_state_debounce: Duration::from_millis(200),
            general_state_debounce: Duration::from_millis(500),
            resource_state_debounce: Duration::from_millis(300),
            large_config_threshold: 10,
        }
    }
}

/// State shared between the manager front-end, context runtimes and the
/// dispatcher. Instance-owned: two managers never share a map, a counter or
/// a timer.
pub(crate) struct ManagerShared {
    pub cfg: EngineConfig,
    pub factory: Arc<dyn ContextClientFactory>,
    pub registry: ResourceWatchersRegistry,
    pub dispatcher: Dispatcher,
    pub contexts: RwLock<HashMap<String, Arc<ContextRuntime>>>,
    pub applied: Mutex<Option<ContextsConfig>>,
    pub current: RwLock<Option<String>>,
    pub root_token: CancellationToken,
}

impl ManagerShared {
    pub fn is_managed(&self, name: &str) -> bool {
        self.contexts.read().contains_key(name)
    }

    pub fn current_runtime(&self) -> Option<Arc<ContextRuntime>> {
        let current = self.current.read().clone()?;
        self.contexts.read().get(&current).cloned()
    }

    fn contexts_general_state(&self) -> BTreeMap<String, ContextGeneralState> {
        self.contexts
            .read()
            .iter()
            .map(|(name, runtime)| (name.clone(), runtime.general_state()))
            .collect()
    }

    fn checking_state(&self) -> BTreeMap<String, CheckingState> {
        self.contexts
            .read()
            .iter()
            .map(|(name, runtime)| (name.clone(), runtime.checking()))
            .collect()
    }

    pub fn notify_general(&self) {
        let payload = self.contexts_general_state();
        if let Err(error) =
            self.dispatcher
                .trigger(CHANNEL_GENERAL_STATE, self.cfg.general_state_debounce, &payload)
        {
            warn!(error = %error, "failed to dispatch general state");
        }
    }

    pub fn notify_checking(&self) {
        let payload = self.checking_state();
        if let Err(error) = self.dispatcher.trigger(
            CHANNEL_CHECKING_STATE,
            self.cfg.checking_state_debounce,
            &payload,
        ) {
            warn!(error = %error, "failed to dispatch checking state");
        }
    }

    pub fn notify_resource(
        &self,
        context: &str,
        resource: ResourceName,
        items: Vec<ResourceObject>,
    ) {
        let payload = ResourceStatePayload {
            context: context.to_string(),
            resource,
            items,
        };
        if let Err(error) = self.dispatcher.trigger(
            &resource_channel(resource),
            self.cfg.resource_state_debounce,
            &payload,
        ) {
            warn!(error = %error, resource = %resource, "failed to dispatch resource state");
        }
    }
}

/// The multi-cluster context state synchronization engine.
///
/// Feed it configuration snapshots through [`update`](Self::update); read
/// cache state through the `get_*` methods; register for a secondary
/// resource kind to lazily start its watch on the current context.
/// Notifications leave through the [`NotificationSink`] handed to the
/// constructor.
pub struct ContextsManager {
    shared: Arc<ManagerShared>,
}

impl ContextsManager {
    pub fn new(factory: Arc<dyn ContextClientFactory>, sink: Arc<dyn NotificationSink>) -> Self {
        Self::with_config(factory, sink, EngineConfig::default())
    }

    pub fn with_config(
        factory: Arc<dyn ContextClientFactory>,
        sink: Arc<dyn NotificationSink>,
        cfg: EngineConfig,
    ) -> Self {
        let root_token = CancellationToken::new();
        let dispatcher = Dispatcher::new(sink, &root_token);
        Self {
            shared: Arc::new(ManagerShared {
                cfg,
                factory,
                registry: ResourceWatchersRegistry::new(),
                dispatcher,
                contexts: RwLock::new(HashMap::new()),
                applied: Mutex::new(None),
                current: RwLock::new(None),
                root_token,
            }),
        }
    }

    /// Apply a new configuration snapshot.
    ///
    /// Structurally identical configurations are a no-op. Otherwise the diff
    /// against the previously applied configuration decides which context
    /// runtimes are disposed and which are created: removal, a changed
    /// cluster/user/namespace target, a flipped current flag, and the
    /// large-configuration restriction all force teardown. At most one
    /// coalesced general-state notification is emitted per applied change.
    #[instrument(skip_all, fields(contexts = config.contexts.len()))]
    pub fn update(&self, config: ContextsConfig) -> Result<()> {
        let shared = &self.shared;
        if shared.root_token.is_cancelled() {
            return Err(Error::Disposed);
        }
        if shared.applied.lock().as_ref() == Some(&config) {
            debug!("configuration unchanged");
            return Ok(());
        }

        let current = config.current_context.clone();
        let limited = config.contexts.len() > shared.cfg.large_config_threshold;
        if limited {
            info!(
                contexts = config.contexts.len(),
                threshold = shared.cfg.large_config_threshold,
                "large configuration, limiting to the current context"
            );
        }

        let mut changed = false;

        let stale: Vec<Arc<ContextRuntime>> = {
            let mut managed = shared.contexts.write();
            let mut stale = Vec::new();
            managed.retain(|name, runtime| {
                let is_current = current.as_deref() == Some(name.as_str());
                let keep = match config.find(name) {
                    None => false,
                    Some(fresh) => {
                        fresh.targets_same(&runtime.context)
                            && runtime.is_current == is_current
                            && !(limited && !is_current)
                    }
                };
                if !keep {
                    stale.push(runtime.clone());
                }
                keep
            });
            stale
        };
        for runtime in &stale {
            info!(context = %runtime.context.name, "disposing context controllers");
            runtime.dispose();
            changed = true;
        }

        *shared.current.write() = current.clone();

        for context in &config.contexts {
            let is_current = current.as_deref() == Some(context.name.as_str());
            if limited && !is_current {
                continue;
            }
            if shared.is_managed(&context.name) {
                continue;
            }
            info!(context = %context.name, is_current, "creating context controllers");
            let runtime = ContextRuntime::new(context.clone(), is_current, shared);
            shared
                .contexts
                .write()
                .insert(context.name.clone(), runtime.clone());
            runtime.start();
            changed = true;
        }

        *shared.applied.lock() = Some(config);

        if changed {
            shared.notify_general();
        }
        Ok(())
    }

    /// Per-context reachability/error/count summary for every managed
    /// context.
    pub fn get_contexts_general_state(&self) -> BTreeMap<String, ContextGeneralState> {
        self.shared
            .contexts
            .read()
            .iter()
            .map(|(name, runtime)| (name.clone(), runtime.general_state()))
            .collect()
    }

    /// Summary for the current context, if one is managed.
    pub fn get_current_context_general_state(&self) -> Option<ContextGeneralState> {
        self.shared
            .current_runtime()
            .map(|runtime| runtime.general_state())
    }

    /// Subscribe to a resource kind on the current context and return the
    /// cache snapshot.
    ///
    /// For a secondary kind this bumps its subscriber count; if no informer
    /// runs yet it is started when the context is reachable, otherwise the
    /// start is deferred to the next reachable transition. The returned
    /// snapshot is empty until the first sync.
    #[instrument(skip(self), fields(resource = %resource))]
    pub fn register_get_current_context_resources(
        &self,
        resource: ResourceName,
    ) -> Result<Vec<ResourceObject>> {
        let shared = &self.shared;
        if shared.root_token.is_cancelled() {
            return Err(Error::Disposed);
        }
        if resource.is_secondary() {
            shared.registry.subscribe(resource);
        }
        let Some(runtime) = shared.current_runtime() else {
            return Ok(Vec::new());
        };
        if resource.is_secondary() && !runtime.has_informer(resource) {
            if runtime.is_reachable() {
                runtime.start_informer(resource);
            } else {
                debug!(
                    context = %runtime.context.name,
                    resource = %resource,
                    "context unreachable, deferring informer start"
                );
            }
        }
        Ok(runtime.snapshot(resource))
    }

    /// Drop one subscription for `resource`.
    ///
    /// A running informer is deliberately left alone: a transient
    /// zero-subscriber window must not force teardown/recreate churn. The
    /// informer goes away with the next unreachable transition.
    pub fn unregister_get_current_context_resources(&self, resource: ResourceName) {
        if resource.is_secondary() {
            self.shared.registry.unsubscribe(resource);
        }
    }

    /// Force-rebuild a context's controllers immediately instead of waiting
    /// out its backoff.
    #[instrument(skip(self))]
    pub fn refresh_context_state(&self, name: &str) -> Result<()> {
        let shared = &self.shared;
        if shared.root_token.is_cancelled() {
            return Err(Error::Disposed);
        }

        let context = shared
            .applied
            .lock()
            .as_ref()
            .and_then(|config| config.find(name).cloned());
        let existing = shared.contexts.write().remove(name);
        if let Some(runtime) = &existing {
            runtime.dispose();
        }

        let Some(context) = context else {
            if existing.is_some() {
                shared.notify_general();
                return Ok(());
            }
            return Err(Error::UnknownContext(name.to_string()));
        };

        let is_current = shared.current.read().as_deref() == Some(name);
        let limited = shared
            .applied
            .lock()
            .as_ref()
            .is_some_and(|config| config.contexts.len() > shared.cfg.large_config_threshold);
        if limited && !is_current {
            shared.notify_general();
            return Ok(());
        }

        info!(context = name, "rebuilding context controllers");
        let runtime = ContextRuntime::new(context, is_current, shared);
        shared
            .contexts
            .write()
            .insert(name.to_string(), runtime.clone());
        runtime.start();
        shared.notify_general();
        Ok(())
    }

    /// Tear the whole engine down: every context runtime, every informer,
    /// every pending timer and debounced emission. Idempotent; nothing owned
    /// by this manager fires afterwards.
    pub fn dispose(&self) {
        let shared = &self.shared;
        if shared.root_token.is_cancelled() {
            return;
        }
        info!("disposing contexts manager");
        shared.root_token.cancel();
        let drained: Vec<_> = shared
            .contexts
            .write()
            .drain()
            .map(|(_, runtime)| runtime)
            .collect();
        for runtime in drained {
            runtime.dispose();
        }
        shared.dispatcher.clear();
        shared.applied.lock().take();
    }
}

impl Drop for ContextsManager {
    fn drop(&mut self) {
        self.dispose();
    }
}
