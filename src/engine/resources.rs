//! Resource kinds and the minimal object contract cached by the engine

use std::fmt;

use serde::{Deserialize, Serialize};

/// Resource kinds the engine knows how to synchronize.
///
/// Primary kinds are watched unconditionally for every actively-managed
/// context. Secondary kinds are watched only while at least one consumer is
/// subscribed and the owning context is reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceName {
    Pods,
    Deployments,
    Services,
    Nodes,
    PersistentVolumeClaims,
    Ingresses,
    Routes,
    ConfigMaps,
    Secrets,
    Events,
}

impl ResourceName {
    pub const ALL: [ResourceName; 10] = [
        ResourceName::Pods,
        ResourceName::Deployments,
        ResourceName::Services,
        ResourceName::Nodes,
        ResourceName::PersistentVolumeClaims,
        ResourceName::Ingresses,
        ResourceName::Routes,
        ResourceName::ConfigMaps,
        ResourceName::Secrets,
        ResourceName::Events,
    ];

    /// Kinds watched for every actively-managed context.
    pub const PRIMARY: [ResourceName; 2] = [ResourceName::Pods, ResourceName::Deployments];

    pub fn is_primary(self) -> bool {
        Self::PRIMARY.contains(&self)
    }

    pub fn is_secondary(self) -> bool {
        !self.is_primary()
    }

    /// The kind whose connect/error events gate context reachability.
    pub fn is_sentinel(self) -> bool {
        matches!(self, ResourceName::Pods)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceName::Pods => "pods",
            ResourceName::Deployments => "deployments",
            ResourceName::Services => "services",
            ResourceName::Nodes => "nodes",
            ResourceName::PersistentVolumeClaims => "persistent-volume-claims",
            ResourceName::Ingresses => "ingresses",
            ResourceName::Routes => "routes",
            ResourceName::ConfigMaps => "config-maps",
            ResourceName::Secrets => "secrets",
            ResourceName::Events => "events",
        }
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimal structural contract for a cached object.
///
/// The engine never depends on the full schema of any particular resource
/// kind: it requires a stable unique id, optionally a kind discriminator and
/// name/namespace for display, and carries the rest as an opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceObject {
    /// Stable unique id; two entries in one kind's cache never share it
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Remainder of the object, untouched by the engine
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl ResourceObject {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            kind: None,
            name: None,
            namespace: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}
