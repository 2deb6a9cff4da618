//! Production binding of the capability seam on top of the kube client
//!
//! One [`kube::Client`] is built per context from the kubeconfig the factory
//! was constructed with. Resource kinds map to dynamic APIs through a fixed
//! group/version/kind table, so no typed struct per kind is needed; cached
//! objects carry the full manifest as an opaque payload.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use kube::api::{Api, DynamicObject, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::{ApiResource, GroupVersionKind};
use kube::runtime::watcher;
use kube::{Client, Config};

use crate::config::ClusterContext;
use crate::engine::client::{ContextClient, ContextClientFactory, EventStream, WatchEvent};
use crate::engine::error::WatchError;
use crate::engine::resources::{ResourceName, ResourceObject};

/// Group, version, kind, plural and scope for one resource kind.
struct KindMapping {
    group: &'static str,
    version: &'static str,
    kind: &'static str,
    plural: &'static str,
    namespaced: bool,
}

fn mapping(resource: ResourceName) -> KindMapping {
    match resource {
        ResourceName::Pods => KindMapping {
            group: "",
            version: "v1",
            kind: "Pod",
            plural: "pods",
            namespaced: true,
        },
        ResourceName::Deployments => KindMapping {
            group: "apps",
            version: "v1",
            kind: "Deployment",
            plural: "deployments",
            namespaced: true,
        },
        ResourceName::Services => KindMapping {
            group: "",
            version: "v1",
            kind: "Service",
            plural: "services",
            namespaced: true,
        },
        ResourceName::Nodes => KindMapping {
            group: "",
            version: "v1",
            kind: "Node",
            plural: "nodes",
            namespaced: false,
        },
        ResourceName::PersistentVolumeClaims => KindMapping {
            group: "",
            version: "v1",
            kind: "PersistentVolumeClaim",
            plural: "persistentvolumeclaims",
            namespaced: true,
        },
        ResourceName::Ingresses => KindMapping {
            group: "networking.k8s.io",
            version: "v1",
            kind: "Ingress",
            plural: "ingresses",
            namespaced: true,
        },
        ResourceName::Routes => KindMapping {
            group: "route.openshift.io",
            version: "v1",
            kind: "Route",
            plural: "routes",
            namespaced: true,
        },
        ResourceName::ConfigMaps => KindMapping {
            group: "",
            version: "v1",
            kind: "ConfigMap",
            plural: "configmaps",
            namespaced: true,
        },
        ResourceName::Secrets => KindMapping {
            group: "",
            version: "v1",
            kind: "Secret",
            plural: "secrets",
            namespaced: true,
        },
        ResourceName::Events => KindMapping {
            group: "",
            version: "v1",
            kind: "Event",
            plural: "events",
            namespaced: true,
        },
    }
}

fn to_watch_error(error: impl std::fmt::Display) -> WatchError {
    WatchError::new(error.to_string())
}

fn to_object(object: DynamicObject, resource: ResourceName) -> ResourceObject {
    let meta = &object.metadata;
    let uid = meta.uid.clone().unwrap_or_else(|| {
        // Objects should always carry a uid; fall back to a namespace/name
        // composite so the dedup invariant still holds.
        format!(
            "{}/{}",
            meta.namespace.as_deref().unwrap_or_default(),
            meta.name.as_deref().unwrap_or_default()
        )
    });
    let kind = object
        .types
        .as_ref()
        .map(|types| types.kind.clone())
        .unwrap_or_else(|| mapping(resource).kind.to_string());
    let name = meta.name.clone();
    let namespace = meta.namespace.clone();
    let payload = serde_json::to_value(&object).unwrap_or(serde_json::Value::Null);
    ResourceObject {
        uid,
        kind: Some(kind),
        name,
        namespace,
        payload,
    }
}

/// Builds one [`KubeContextClient`] per context out of a parsed kubeconfig.
pub struct KubeClientFactory {
    kubeconfig: Kubeconfig,
}

impl KubeClientFactory {
    pub fn new(kubeconfig: Kubeconfig) -> Self {
        Self { kubeconfig }
    }
}

#[async_trait]
impl ContextClientFactory for KubeClientFactory {
    async fn client_for(
        &self,
        context: &ClusterContext,
    ) -> Result<Arc<dyn ContextClient>, WatchError> {
        let options = KubeConfigOptions {
            context: Some(context.name.clone()),
            cluster: Some(context.cluster.clone()),
            user: Some(context.user.clone()),
        };
        let config = Config::from_custom_kubeconfig(self.kubeconfig.clone(), &options)
            .await
            .map_err(to_watch_error)?;
        let client = Client::try_from(config).map_err(to_watch_error)?;
        Ok(Arc::new(KubeContextClient {
            client,
            namespace: context.namespace.clone(),
        }))
    }
}

/// List/watch capability for one context, backed by dynamic kube APIs.
pub struct KubeContextClient {
    client: Client,
    namespace: Option<String>,
}

impl KubeContextClient {
    fn api(&self, resource: ResourceName) -> Api<DynamicObject> {
        let map = mapping(resource);
        let gvk = GroupVersionKind::gvk(map.group, map.version, map.kind);
        let api_resource = ApiResource::from_gvk_with_plural(&gvk, map.plural);
        match (&self.namespace, map.namespaced) {
            (Some(namespace), true) => {
                Api::namespaced_with(self.client.clone(), namespace, &api_resource)
            }
            _ => Api::all_with(self.client.clone(), &api_resource),
        }
    }
}

#[async_trait]
impl ContextClient for KubeContextClient {
    async fn list(&self, resource: ResourceName) -> Result<Vec<ResourceObject>, WatchError> {
        let list = self
            .api(resource)
            .list(&ListParams::default())
            .await
            .map_err(to_watch_error)?;
        Ok(list
            .items
            .into_iter()
            .map(|object| to_object(object, resource))
            .collect())
    }

    async fn watch(&self, resource: ResourceName) -> Result<EventStream, WatchError> {
        let api = self.api(resource);
        let stream = watcher::watcher(api, watcher::Config::default()).filter_map(move |event| {
            let mapped = match event {
                Ok(watcher::Event::Init) => Some(WatchEvent::Connect(None)),
                Ok(watcher::Event::InitApply(object)) => {
                    Some(WatchEvent::Add(to_object(object, resource)))
                }
                Ok(watcher::Event::InitDone) => None,
                Ok(watcher::Event::Apply(object)) => {
                    Some(WatchEvent::Update(to_object(object, resource)))
                }
                Ok(watcher::Event::Delete(object)) => {
                    Some(WatchEvent::Delete(to_object(object, resource)))
                }
                Err(error) => Some(WatchEvent::Error(to_watch_error(error))),
            };
            futures::future::ready(mapped)
        });
        Ok(Box::pin(stream))
    }

    async fn health_check(&self) -> Result<(), WatchError> {
        self.client
            .apiserver_version()
            .await
            .map(|_| ())
            .map_err(to_watch_error)
    }

    async fn can_watch(&self, resource: ResourceName) -> Result<bool, WatchError> {
        let map = mapping(resource);
        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    verb: Some("watch".into()),
                    group: Some(map.group.into()),
                    resource: Some(map.plural.into()),
                    namespace: self.namespace.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let api: Api<SelfSubjectAccessReview> = Api::all(self.client.clone());
        let response = api
            .create(&PostParams::default(), &review)
            .await
            .map_err(to_watch_error)?;
        Ok(response
            .status
            .map(|status| status.allowed)
            .unwrap_or(false))
    }
}
