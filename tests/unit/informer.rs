//! Informer lifecycle: reachability transitions, connect delay, backoff
//! pacing and the lazy secondary informer lifecycle

use std::sync::Arc;
use std::time::Duration;

use kube_context_sync::{CheckingState, ContextsManager, ResourceName, WatchError, WatchEvent};

use crate::common::*;

fn new_manager(factory: &Arc<FakeFactory>, sink: &Arc<RecordingSink>) -> ContextsManager {
    ContextsManager::with_config(factory.clone(), sink.clone(), test_engine_config())
}

async fn single_context() -> (Arc<FakeFactory>, Arc<RecordingSink>, ContextsManager) {
    let factory = FakeFactory::new();
    let sink = RecordingSink::new();
    let manager = new_manager(&factory, &sink);
    manager.update(config_of(&["c1"], Some("c1"))).unwrap();
    settle().await;
    (factory, sink, manager)
}

fn reachable(manager: &ContextsManager) -> bool {
    manager
        .get_current_context_general_state()
        .map(|state| state.reachable)
        .unwrap_or(false)
}

mod reachability_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn starts_unreachable() {
        let (_, _, manager) = single_context().await;
        assert!(!reachable(&manager));
    }

    #[tokio::test(start_paused = true)]
    async fn data_event_marks_reachable_immediately() {
        let (factory, _, manager) = single_context().await;
        factory
            .client("c1")
            .emit(ResourceName::Pods, WatchEvent::Add(obj("p1")));
        settle().await;
        assert!(reachable(&manager));
    }

    #[tokio::test(start_paused = true)]
    async fn bare_connect_becomes_reachable_only_after_delay() {
        let (factory, _, manager) = single_context().await;
        factory
            .client("c1")
            .emit(ResourceName::Pods, WatchEvent::Connect(None));
        settle().await;
        assert!(!reachable(&manager));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(reachable(&manager));
    }

    #[tokio::test(start_paused = true)]
    async fn data_event_supersedes_pending_connect_delay() {
        let (factory, _, manager) = single_context().await;
        let client = factory.client("c1");
        client.emit(ResourceName::Pods, WatchEvent::Connect(None));
        client.emit(ResourceName::Pods, WatchEvent::Add(obj("p1")));
        settle().await;
        // last signal wins: no need to wait out the connect delay
        assert!(reachable(&manager));
    }

    #[tokio::test(start_paused = true)]
    async fn error_before_connect_delay_cancels_transition() {
        let (factory, _, manager) = single_context().await;
        let client = factory.client("c1");
        client.emit(ResourceName::Pods, WatchEvent::Connect(None));
        settle().await;
        client.emit(
            ResourceName::Pods,
            WatchEvent::Error(WatchError::new("connection reset")),
        );
        settle().await;

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!reachable(&manager));
        let state = manager.get_current_context_general_state().unwrap();
        assert!(state.error.as_deref().unwrap_or_default().contains("connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn error_is_cleared_on_next_successful_event() {
        let (factory, _, manager) = single_context().await;
        let client = factory.client("c1");
        client.emit(
            ResourceName::Pods,
            WatchEvent::Error(WatchError::new("connection reset")),
        );
        settle().await;
        assert!(manager.get_current_context_general_state().unwrap().error.is_some());

        // the informer reconnects after its backoff and data flows again
        tokio::time::sleep(Duration::from_millis(150)).await;
        client.emit(ResourceName::Pods, WatchEvent::Add(obj("p1")));
        settle().await;

        let state = manager.get_current_context_general_state().unwrap();
        assert!(state.error.is_none());
        assert!(state.reachable);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_dedups_by_uid_across_event_sequences() {
        let (factory, _, manager) = single_context().await;
        let client = factory.client("c1");
        client.emit(ResourceName::Pods, WatchEvent::Add(obj("p1")));
        client.emit(ResourceName::Pods, WatchEvent::Add(obj("p2")));
        client.emit(ResourceName::Pods, WatchEvent::Update(obj("p1")));
        client.emit(ResourceName::Pods, WatchEvent::Delete(obj("p2")));
        client.emit(ResourceName::Pods, WatchEvent::Add(obj("p2")));
        settle().await;

        let pods = manager
            .register_get_current_context_resources(ResourceName::Pods)
            .unwrap();
        let mut uids: Vec<_> = pods.iter().map(|pod| pod.uid.clone()).collect();
        uids.sort();
        assert_eq!(uids, vec!["p1", "p2"]);
    }
}

mod pipeline_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn unhealthy_context_retries_probe_before_watching() {
        let factory = FakeFactory::new();
        let sink = RecordingSink::new();
        let manager = new_manager(&factory, &sink);
        let client = factory.client("c1");
        client.set_healthy(false);

        manager.update(config_of(&["c1"], Some("c1"))).unwrap();
        settle().await;

        // probe failed: no informers yet, context parked in Waiting
        assert_eq!(client.watch_count(ResourceName::Pods), 0);
        let state = manager.get_current_context_general_state().unwrap();
        assert_eq!(state.checking, CheckingState::Waiting);
        assert!(state.error.as_deref().unwrap_or_default().contains("connection refused"));

        client.set_healthy(true);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(client.watch_count(ResourceName::Pods), 1);
        let state = manager.get_current_context_general_state().unwrap();
        assert_eq!(state.checking, CheckingState::Idle);
    }
}

mod reconnect_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn failed_lists_back_off_exponentially() {
        let factory = FakeFactory::new();
        let sink = RecordingSink::new();
        let manager = new_manager(&factory, &sink);
        let client = factory.client("c1");
        client.set_listing_fails(true);

        manager.update(config_of(&["c1"], Some("c1"))).unwrap();
        settle().await;
        // first attempt failed on the spot
        assert_eq!(client.list_count(ResourceName::Pods), 1);

        // retries at 100ms, then 200ms
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(client.list_count(ResourceName::Pods), 2);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.list_count(ResourceName::Pods), 2);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(client.list_count(ResourceName::Pods), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_sync_resets_the_backoff() {
        let factory = FakeFactory::new();
        let sink = RecordingSink::new();
        let manager = new_manager(&factory, &sink);
        let client = factory.client("c1");
        client.set_listing_fails(true);

        manager.update(config_of(&["c1"], Some("c1"))).unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        // a few failures have grown the delay; now recover
        client.set_listing_fails(false);
        tokio::time::sleep(Duration::from_secs(2)).await;
        let watches = client.watch_count(ResourceName::Pods);
        assert!(watches >= 1);

        // next failure retries at the initial delay again
        client.emit(
            ResourceName::Pods,
            WatchEvent::Error(WatchError::new("connection reset")),
        );
        settle().await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(client.watch_count(ResourceName::Pods), watches + 1);
    }
}

mod secondary_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn secondary_informer_needs_subscriber_and_reachability() {
        let (factory, _, manager) = single_context().await;
        let client = factory.client("c1");
        client.set_list(ResourceName::Services, vec![obj("s1")]);

        // subscribed but unreachable: start is deferred
        let snapshot = manager
            .register_get_current_context_resources(ResourceName::Services)
            .unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(client.watch_count(ResourceName::Services), 0);

        // reachable: the deferred informer starts
        client.emit(ResourceName::Pods, WatchEvent::Add(obj("p1")));
        settle().await;
        assert_eq!(client.watch_count(ResourceName::Services), 1);

        let snapshot = manager
            .register_get_current_context_resources(ResourceName::Services)
            .unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].uid, "s1");

        // unreachable: informer disposed, cache cleared
        client.emit(
            ResourceName::Pods,
            WatchEvent::Error(WatchError::new("connection reset")),
        );
        settle().await;
        assert!(!client.emit(ResourceName::Services, WatchEvent::Add(obj("s2"))));
        let snapshot = manager
            .register_get_current_context_resources(ResourceName::Services)
            .unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_start_fires_once_after_connect_delay() {
        let factory = FakeFactory::new();
        let sink = RecordingSink::new();
        let manager = new_manager(&factory, &sink);
        manager.update(config_of(&["c1", "c2"], Some("c1"))).unwrap();
        settle().await;
        assert_eq!(factory.created_total(), 2);
        let client = factory.client("c1");

        let snapshot = manager
            .register_get_current_context_resources(ResourceName::Services)
            .unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(client.watch_count(ResourceName::Services), 0);

        client.emit(ResourceName::Pods, WatchEvent::Connect(None));
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(client.watch_count(ResourceName::Services), 1);

        // re-registering does not spawn a second informer
        manager
            .register_get_current_context_resources(ResourceName::Services)
            .unwrap();
        settle().await;
        assert_eq!(client.watch_count(ResourceName::Services), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unregister_leaves_running_informer_alone() {
        let (factory, _, manager) = single_context().await;
        let client = factory.client("c1");
        client.emit(ResourceName::Pods, WatchEvent::Add(obj("p1")));
        settle().await;

        manager
            .register_get_current_context_resources(ResourceName::Services)
            .unwrap();
        settle().await;
        assert_eq!(client.watch_count(ResourceName::Services), 1);

        manager.unregister_get_current_context_resources(ResourceName::Services);
        assert!(client.emit(ResourceName::Services, WatchEvent::Add(obj("s1"))));
        settle().await;

        // teardown happens only through the unreachable transition
        client.emit(
            ResourceName::Pods,
            WatchEvent::Error(WatchError::new("connection reset")),
        );
        settle().await;
        assert!(!client.emit(ResourceName::Services, WatchEvent::Add(obj("s2"))));

        // back reachable with zero subscribers: not restarted
        tokio::time::sleep(Duration::from_millis(150)).await;
        client.emit(ResourceName::Pods, WatchEvent::Add(obj("p2")));
        settle().await;
        assert_eq!(client.watch_count(ResourceName::Services), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn secondary_informers_stay_off_non_current_contexts() {
        let factory = FakeFactory::new();
        let sink = RecordingSink::new();
        let manager = new_manager(&factory, &sink);
        manager.update(config_of(&["c1", "c2"], Some("c1"))).unwrap();
        settle().await;

        manager
            .register_get_current_context_resources(ResourceName::Services)
            .unwrap();
        let background = factory.client("c2");
        background.emit(ResourceName::Pods, WatchEvent::Add(obj("p1")));
        settle().await;

        assert_eq!(background.watch_count(ResourceName::Services), 0);
    }
}
