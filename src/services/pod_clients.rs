//! One admin-API client per proxy pod, plus the primary used for writes.

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ProxyResource, ReconcileContext, RequeueDirective};
use crate::domain::ports::{PlatformApi, ProxyClient, ProxyClientFactory};

/// A pod together with its client.
#[derive(Clone)]
pub struct PodTarget {
    pub index: u32,
    pub name: String,
    pub client: Arc<dyn ProxyClient>,
}

impl std::fmt::Debug for PodTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodTarget")
            .field("index", &self.index)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Clients for every expected pod, in index order.
#[derive(Debug, Clone)]
pub struct PodClients {
    primary: PodTarget,
    pods: Vec<PodTarget>,
}

impl PodClients {
    pub fn new(primary: PodTarget, pods: Vec<PodTarget>) -> Self {
        Self { primary, pods }
    }

    /// Client of the first ready pod; authoritative for writes this tick.
    pub fn primary(&self) -> &PodTarget {
        &self.primary
    }

    pub fn pods(&self) -> &[PodTarget] {
        &self.pods
    }

    pub fn get(&self, pod: &str) -> DomainResult<&PodTarget> {
        self.pods
            .iter()
            .find(|p| p.name == pod)
            .ok_or_else(|| DomainError::InvalidReference(format!("client for Pod '{pod}' not found")))
    }

    /// Runs `f` against every pod in index order.
    ///
    /// Stops at the first error or non-zero requeue, which is returned as is.
    /// Errors are attributed to the pod they happened on.
    pub async fn for_each_pod<F, Fut>(&self, mut f: F) -> DomainResult<RequeueDirective>
    where
        F: FnMut(PodTarget) -> Fut,
        Fut: Future<Output = DomainResult<RequeueDirective>>,
    {
        for pod in &self.pods {
            let name = pod.name.clone();
            let result = f(pod.clone())
                .await
                .map_err(|e| e.context(format!("Pod '{name}'")))?;
            if !result.is_zero() {
                return Ok(result);
            }
        }
        Ok(RequeueDirective::none())
    }
}

/// Index of the first pod whose readiness probe passes.
pub async fn first_ready_pod(
    ctx: &ReconcileContext,
    proxy: &ProxyResource,
    platform: &dyn PlatformApi,
) -> DomainResult<Option<u32>> {
    for index in 0..proxy.spec.replicas {
        let pod = proxy.pod_name(index);
        if platform.is_pod_ready(ctx, proxy.namespace(), &pod).await? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

/// Builds the per-pod clients and selects the primary.
///
/// Fails with a transient error when no pod is ready.
pub async fn setup_clients(
    ctx: &ReconcileContext,
    proxy: &ProxyResource,
    platform: &dyn PlatformApi,
    factory: &dyn ProxyClientFactory,
) -> DomainResult<PodClients> {
    let Some(primary_index) = first_ready_pod(ctx, proxy, platform).await? else {
        return Err(DomainError::NotReady(format!(
            "no ready Pods found for '{}'",
            proxy.key()
        )));
    };

    let mut pods = Vec::with_capacity(proxy.spec.replicas as usize);
    for index in 0..proxy.spec.replicas {
        let client = factory.client_for_pod(ctx, proxy, index).await?;
        pods.push(PodTarget {
            index,
            name: proxy.pod_name(index),
            client,
        });
    }

    let primary = pods
        .iter()
        .find(|p| p.index == primary_index)
        .cloned()
        .ok_or_else(|| DomainError::NotReady("primary Pod client missing".to_string()))?;

    debug!(primary = %primary.name, pods = pods.len(), "pod clients ready");
    Ok(PodClients::new(primary, pods))
}
