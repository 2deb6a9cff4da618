//! Configuration diffing, large-configuration mode and manager lifecycle

use std::sync::Arc;
use std::time::Duration;

use kube_context_sync::{ContextsManager, Error, ResourceName, WatchError, WatchEvent};

use crate::common::*;

fn new_manager(factory: &Arc<FakeFactory>, sink: &Arc<RecordingSink>) -> ContextsManager {
    ContextsManager::with_config(factory.clone(), sink.clone(), test_engine_config())
}

mod diffing_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn identical_config_is_a_noop() {
        let factory = FakeFactory::new();
        let sink = RecordingSink::new();
        let manager = new_manager(&factory, &sink);

        let config = config_of(&["c1", "c2"], Some("c1"));
        manager.update(config.clone()).unwrap();
        settle().await;
        assert_eq!(factory.created_total(), 2);

        manager.update(config).unwrap();
        settle().await;

        // no controller creation or disposal on the second call
        assert_eq!(factory.created_total(), 2);
        assert_eq!(factory.client("c1").watch_count(ResourceName::Pods), 1);
        assert!(
            factory
                .client("c1")
                .emit(ResourceName::Pods, WatchEvent::Add(obj("p1")))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn changed_credential_recreates_only_that_context() {
        let factory = FakeFactory::new();
        let sink = RecordingSink::new();
        let manager = new_manager(&factory, &sink);

        manager.update(config_of(&["c1", "c2"], Some("c1"))).unwrap();
        settle().await;

        let mut rotated = config_of(&["c1", "c2"], Some("c1"));
        rotated.contexts[0].user = "rotated-user".to_string();
        manager.update(rotated).unwrap();
        settle().await;

        assert_eq!(factory.created_count("c1"), 2);
        assert_eq!(factory.created_count("c2"), 1);
        assert_eq!(factory.client("c1").watch_count(ResourceName::Pods), 2);
        assert_eq!(factory.client("c2").watch_count(ResourceName::Pods), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_context_is_disposed_and_never_restarts() {
        let factory = FakeFactory::new();
        let sink = RecordingSink::new();
        let manager = new_manager(&factory, &sink);

        manager.update(config_of(&["c1", "c2"], Some("c1"))).unwrap();
        settle().await;
        let c2 = factory.client("c2");
        assert_eq!(c2.watch_count(ResourceName::Pods), 1);

        // leave a retry in flight, then remove the context
        c2.emit(
            ResourceName::Pods,
            WatchEvent::Error(WatchError::new("connection reset")),
        );
        settle().await;
        manager.update(config_of(&["c1"], Some("c1"))).unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(c2.watch_count(ResourceName::Pods), 1);
        assert!(!c2.emit(ResourceName::Pods, WatchEvent::Add(obj("p1"))));
    }

    #[tokio::test(start_paused = true)]
    async fn switching_current_context_recreates_both_sides() {
        let factory = FakeFactory::new();
        let sink = RecordingSink::new();
        let manager = new_manager(&factory, &sink);

        manager.update(config_of(&["c1", "c2"], Some("c1"))).unwrap();
        settle().await;
        manager.update(config_of(&["c1", "c2"], Some("c2"))).unwrap();
        settle().await;

        // backoff class and secondary policy depend on the current flag
        assert_eq!(factory.created_count("c1"), 2);
        assert_eq!(factory.created_count("c2"), 2);
    }
}

mod large_config_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn only_current_context_is_managed_above_threshold() {
        let factory = FakeFactory::new();
        let sink = RecordingSink::new();
        let manager = new_manager(&factory, &sink);

        let names: Vec<String> = (1..=15).map(|i| format!("c{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        manager.update(config_of(&refs, Some("c7"))).unwrap();
        settle().await;

        assert_eq!(factory.created_total(), 1);
        assert_eq!(factory.created_count("c7"), 1);
        assert_eq!(manager.get_contexts_general_state().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shrinking_below_threshold_restores_full_management() {
        let factory = FakeFactory::new();
        let sink = RecordingSink::new();
        let manager = new_manager(&factory, &sink);

        let names: Vec<String> = (1..=15).map(|i| format!("c{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        manager.update(config_of(&refs, Some("c7"))).unwrap();
        settle().await;

        manager.update(config_of(&["c1", "c7"], Some("c7"))).unwrap();
        settle().await;

        let managed = manager.get_contexts_general_state();
        assert_eq!(managed.len(), 2);
        assert!(managed.contains_key("c1"));
        // c7 survived both configurations untouched
        assert_eq!(factory.created_count("c7"), 1);
    }
}

mod lifecycle_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn refresh_rebuilds_immediately() {
        let factory = FakeFactory::new();
        let sink = RecordingSink::new();
        let manager = new_manager(&factory, &sink);

        manager.update(config_of(&["c1"], Some("c1"))).unwrap();
        settle().await;
        assert_eq!(factory.created_count("c1"), 1);

        manager.refresh_context_state("c1").unwrap();
        settle().await;
        assert_eq!(factory.created_count("c1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_of_unknown_context_fails() {
        let factory = FakeFactory::new();
        let sink = RecordingSink::new();
        let manager = new_manager(&factory, &sink);

        manager.update(config_of(&["c1"], Some("c1"))).unwrap();
        settle().await;

        let err = manager.refresh_context_state("nope").unwrap_err();
        assert!(matches!(err, Error::UnknownContext(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn disposed_manager_rejects_updates_and_goes_quiet() {
        let factory = FakeFactory::new();
        let sink = RecordingSink::new();
        let manager = new_manager(&factory, &sink);

        manager.update(config_of(&["c1"], Some("c1"))).unwrap();
        settle().await;
        manager.dispose();

        let err = manager.update(config_of(&["c1", "c2"], Some("c1"))).unwrap_err();
        assert!(matches!(err, Error::Disposed));

        settle().await;
        let before = sink.total();
        assert!(!factory.client("c1").emit(ResourceName::Pods, WatchEvent::Add(obj("p1"))));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.total(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn register_before_any_config_returns_empty() {
        let factory = FakeFactory::new();
        let sink = RecordingSink::new();
        let manager = new_manager(&factory, &sink);

        let snapshot = manager
            .register_get_current_context_resources(ResourceName::Services)
            .unwrap();
        assert!(snapshot.is_empty());
    }
}
