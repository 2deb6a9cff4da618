//! Context configuration: the engine's view of a kubeconfig
//!
//! The engine consumes [`ContextsConfig`] snapshots, usually derived from a
//! parsed kubeconfig. Resolution is fail-closed: a context referencing an
//! unknown cluster or user aborts the whole conversion, so a manager keeps
//! running on its previous valid configuration instead of tearing watches
//! down over a bad file.

use kube::config::Kubeconfig;
use serde::{Deserialize, Serialize};

use crate::engine::error::{Error, Result};

/// A named binding of cluster endpoint, user credential and default
/// namespace.
///
/// Identity matters for reconciliation: a context with the same name but a
/// different cluster/user/namespace triple is a *different* context and gets
/// torn down and recreated, never updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterContext {
    pub name: String,
    /// Name of the cluster entry this context points at
    pub cluster: String,
    /// Name of the user/credential entry this context authenticates with
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Resolved cluster endpoint
    pub server: String,
    #[serde(default)]
    pub skip_tls_verify: bool,
}

impl ClusterContext {
    /// Whether `other` points at the same cluster/user/namespace triple.
    /// Endpoint details are resolved from the cluster entry and follow it.
    pub fn targets_same(&self, other: &ClusterContext) -> bool {
        self.cluster == other.cluster
            && self.user == other.user
            && self.namespace == other.namespace
    }
}

/// One configuration snapshot handed to
/// [`ContextsManager::update`](crate::ContextsManager::update).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContextsConfig {
    pub contexts: Vec<ClusterContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_context: Option<String>,
}

impl ContextsConfig {
    pub fn find(&self, name: &str) -> Option<&ClusterContext> {
        self.contexts.iter().find(|context| context.name == name)
    }

    /// Resolve a parsed kubeconfig into a configuration snapshot.
    ///
    /// Every context must resolve to an existing cluster (with a server) and
    /// an existing user; the first dangling reference fails the conversion.
    pub fn from_kubeconfig(kubeconfig: &Kubeconfig) -> Result<Self> {
        let mut contexts = Vec::with_capacity(kubeconfig.contexts.len());
        for named in &kubeconfig.contexts {
            let context = named.context.as_ref().ok_or_else(|| {
                Error::InvalidConfig(format!("context {:?} has no body", named.name))
            })?;

            let cluster = kubeconfig
                .clusters
                .iter()
                .find(|candidate| candidate.name == context.cluster)
                .and_then(|candidate| candidate.cluster.as_ref())
                .ok_or_else(|| {
                    Error::InvalidConfig(format!(
                        "context {:?} references unknown cluster {:?}",
                        named.name, context.cluster
                    ))
                })?;
            let server = cluster.server.clone().ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "cluster {:?} has no server endpoint",
                    context.cluster
                ))
            })?;

            let user = context.user.clone().ok_or_else(|| {
                Error::InvalidConfig(format!("context {:?} has no user", named.name))
            })?;
            if !kubeconfig
                .auth_infos
                .iter()
                .any(|candidate| candidate.name == user)
            {
                return Err(Error::InvalidConfig(format!(
                    "context {:?} references unknown user {:?}",
                    named.name, user
                )));
            }

            contexts.push(ClusterContext {
                name: named.name.clone(),
                cluster: context.cluster.clone(),
                user,
                namespace: context.namespace.clone(),
                server,
                skip_tls_verify: cluster.insecure_skip_tls_verify.unwrap_or(false),
            });
        }

        Ok(Self {
            contexts,
            current_context: kubeconfig.current_context.clone(),
        })
    }
}
