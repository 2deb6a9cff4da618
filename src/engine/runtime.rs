//! Per-context controller set: startup pipeline, reachability, informers

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::{Backoff, BackoffConfig};
use super::client::ContextClient;
use super::error::WatchError;
use super::informer::Informer;
use super::manager::ManagerShared;
use super::resources::{ResourceName, ResourceObject};
use super::scheduler::ScheduledTask;
use super::state::{CheckingState, ContextGeneralState, ContextState};
use crate::config::ClusterContext;

/// Owns everything one managed context needs: its state cache, its informer
/// set, its backoff and its timers. Created when a context first appears in
/// an applied configuration diff, fully disposed when it disappears or its
/// target changes.
///
/// The state cache is mutated only through this runtime.
pub(crate) struct ContextRuntime {
    pub context: ClusterContext,
    pub is_current: bool,
    me: Weak<ContextRuntime>,
    shared: Weak<ManagerShared>,
    client: OnceLock<Arc<dyn ContextClient>>,
    state: RwLock<ContextState>,
    informers: Mutex<HashMap<ResourceName, Informer>>,
    backoff_tuning: BackoffConfig,
    /// Paces the startup pipeline's probe retries; informers carry their own
    startup_backoff: Mutex<Backoff>,
    /// Delayed reachable transition after a bare connect event
    connect_task: ScheduledTask,
    pub(crate) token: CancellationToken,
}

impl ContextRuntime {
    pub fn new(
        context: ClusterContext,
        is_current: bool,
        shared: &Arc<ManagerShared>,
    ) -> Arc<Self> {
        let token = shared.root_token.child_token();
        let tuning = if is_current {
            shared.cfg.current_context_backoff.clone()
        } else {
            shared.cfg.background_backoff.clone()
        };
        Arc::new_cyclic(|me| Self {
            context,
            is_current,
            me: me.clone(),
            shared: Arc::downgrade(shared),
            client: OnceLock::new(),
            state: RwLock::new(ContextState::new()),
            informers: Mutex::new(HashMap::new()),
            backoff_tuning: tuning.clone(),
            startup_backoff: Mutex::new(Backoff::new(tuning)),
            connect_task: ScheduledTask::new(&token),
            token,
        })
    }

    /// Kick off the staged startup pipeline in the background.
    pub fn start(&self) {
        let Some(runtime) = self.me.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            runtime.startup_pipeline().await;
        });
    }

    /// Stage the context in: build the client, probe health, probe
    /// permissions, then start primary informers. Failures park the context
    /// in `Waiting` and retry on the context's backoff.
    async fn startup_pipeline(self: Arc<Self>) {
        loop {
            if self.token.is_cancelled() {
                return;
            }
            self.set_checking(CheckingState::Checking);
            match self.try_start().await {
                Ok(()) => {
                    self.set_checking(CheckingState::Idle);
                    return;
                }
                Err(error) => {
                    warn!(
                        context = %self.context.name,
                        error = %error,
                        "context startup failed"
                    );
                    self.record_error(Some(error.to_string()));
                    self.set_checking(CheckingState::Waiting);
                    let delay = self.next_startup_backoff();
                    tokio::select! {
                        _ = self.token.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    if !self.still_configured() {
                        return;
                    }
                }
            }
        }
    }

    async fn try_start(&self) -> Result<(), WatchError> {
        let client = match self.client.get() {
            Some(client) => client.clone(),
            None => {
                let shared = self
                    .shared
                    .upgrade()
                    .ok_or_else(|| WatchError::new("manager dropped"))?;
                let client = shared.factory.client_for(&self.context).await?;
                let _ = self.client.set(client.clone());
                client
            }
        };

        client.health_check().await?;

        let mut permitted = Vec::new();
        for resource in ResourceName::PRIMARY {
            if client.can_watch(resource).await? {
                permitted.push(resource);
            } else if resource.is_sentinel() {
                return Err(WatchError::permanent(format!(
                    "watch permission denied for {resource}"
                )));
            } else {
                warn!(
                    context = %self.context.name,
                    resource = %resource,
                    "watch permission denied, skipping"
                );
            }
        }

        for resource in permitted {
            self.start_informer(resource);
        }
        Ok(())
    }

    pub fn client(&self) -> Option<Arc<dyn ContextClient>> {
        self.client.get().cloned()
    }

    /// Idempotent: an informer already running for `resource` is left alone.
    pub fn start_informer(&self, resource: ResourceName) {
        if self.token.is_cancelled() {
            return;
        }
        let Some(runtime) = self.me.upgrade() else {
            return;
        };
        let mut informers = self.informers.lock();
        if informers.contains_key(&resource) {
            return;
        }
        debug!(context = %self.context.name, resource = %resource, "starting informer");
        informers.insert(resource, Informer::spawn(runtime, resource));
    }

    pub fn has_informer(&self, resource: ResourceName) -> bool {
        self.informers.lock().contains_key(&resource)
    }

    pub fn is_reachable(&self) -> bool {
        self.state.read().reachable
    }

    pub fn snapshot(&self, resource: ResourceName) -> Vec<ResourceObject> {
        self.state.read().snapshot(resource)
    }

    pub fn general_state(&self) -> ContextGeneralState {
        self.state.read().general_state()
    }

    pub fn checking(&self) -> CheckingState {
        self.state.read().checking
    }

    /// Cancel every informer, the retry wait and the delayed reachability
    /// transition. Idempotent; nothing owned by this runtime fires afterwards.
    pub fn dispose(&self) {
        debug!(context = %self.context.name, "disposing context runtime");
        self.token.cancel();
        self.connect_task.cancel();
        self.informers.lock().clear();
    }

    /// Backoff tuning for this context's class (current vs. background).
    pub(crate) fn backoff_tuning(&self) -> BackoffConfig {
        self.backoff_tuning.clone()
    }

    fn next_startup_backoff(&self) -> Duration {
        self.startup_backoff.lock().next()
    }

    /// Whether this context is still part of the managed set; a retry firing
    /// after removal must not restart anything.
    pub(crate) fn still_configured(&self) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.is_managed(&self.context.name))
    }

    // --- informer callbacks -------------------------------------------------

    pub(crate) fn on_list_synced(&self, resource: ResourceName, objects: Vec<ResourceObject>) {
        self.state.write().replace(resource, objects);
        self.publish_resource(resource);
        self.notify_general();
    }

    pub(crate) fn on_add(&self, resource: ResourceName, object: ResourceObject) {
        self.state.write().apply_upsert(resource, object);
        self.after_data_event(resource);
    }

    pub(crate) fn on_update(&self, resource: ResourceName, object: ResourceObject) {
        self.state.write().apply_upsert(resource, object);
        self.after_data_event(resource);
    }

    pub(crate) fn on_delete(&self, resource: ResourceName, object: ResourceObject) {
        self.state.write().apply_delete(resource, &object.uid);
        self.after_data_event(resource);
    }

    /// Data flowing is itself proof of reachability: mark it now, superseding
    /// any pending delayed transition.
    fn after_data_event(&self, resource: ResourceName) {
        self.state.write().error = None;
        self.connect_task.cancel();
        self.set_reachable(true);
        self.publish_resource(resource);
        self.notify_general();
    }

    /// Bare connect success. For the sentinel resource, schedule the delayed
    /// reachable transition; a connect immediately followed by a disconnect
    /// must not surface as reachable. Last signal wins: any later
    /// reachability signal cancels this one.
    pub(crate) fn on_connect_ok(&self, resource: ResourceName) {
        if !resource.is_sentinel() {
            return;
        }
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let Some(runtime) = self.me.upgrade() else {
            return;
        };
        self.connect_task
            .schedule(shared.cfg.connect_delay, async move {
                runtime.set_reachable(true);
            });
    }

    /// Record the error; sentinel failures additionally flip the context
    /// unreachable on the spot. Secondary watch failures stay local to their
    /// informer so one denied kind cannot take the whole context down.
    pub(crate) fn on_stream_error(&self, resource: ResourceName, error: &WatchError) {
        self.state.write().error = Some(error.to_string());
        if resource.is_sentinel() {
            self.connect_task.cancel();
            self.set_reachable(false);
        }
        self.notify_general();
    }

    // --- reachability transitions -------------------------------------------

    fn set_reachable(&self, reachable: bool) {
        let changed = {
            let mut state = self.state.write();
            if state.reachable == reachable {
                false
            } else {
                state.reachable = reachable;
                if reachable {
                    state.error = None;
                }
                true
            }
        };
        if !changed {
            return;
        }
        info!(context = %self.context.name, reachable, "context reachability changed");
        if reachable {
            self.start_subscribed_secondaries();
        } else {
            self.dispose_secondaries();
        }
        self.notify_general();
    }

    /// Secondary informers are lazy: start only the kinds a consumer is
    /// currently subscribed to, and only on the current context.
    fn start_subscribed_secondaries(&self) {
        if !self.is_current {
            return;
        }
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        for resource in shared.registry.subscribed() {
            self.start_informer(resource);
        }
    }

    /// Stale data must not linger once the context is known down: dispose
    /// every secondary informer and clear its cached collection.
    fn dispose_secondaries(&self) {
        let removed: Vec<ResourceName> = {
            let mut informers = self.informers.lock();
            let kinds: Vec<_> = informers
                .keys()
                .copied()
                .filter(|resource| resource.is_secondary())
                .collect();
            for resource in &kinds {
                if let Some(informer) = informers.remove(resource) {
                    informer.dispose();
                }
            }
            kinds
        };
        if removed.is_empty() {
            return;
        }
        {
            let mut state = self.state.write();
            for resource in &removed {
                state.clear(*resource);
            }
        }
        for resource in removed {
            self.publish_resource(resource);
        }
    }

    fn set_checking(&self, checking: CheckingState) {
        self.state.write().checking = checking;
        if let Some(shared) = self.shared.upgrade() {
            shared.notify_checking();
        }
    }

    fn record_error(&self, error: Option<String>) {
        self.state.write().error = error;
        self.notify_general();
    }

    // --- notifications ------------------------------------------------------

    fn publish_resource(&self, resource: ResourceName) {
        if !self.is_current {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.notify_resource(&self.context.name, resource, self.snapshot(resource));
        }
    }

    fn notify_general(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.notify_general();
        }
    }
}
