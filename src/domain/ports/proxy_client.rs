//! REST admin API of a single proxy pod.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    ActivationState, ConfigSyncSettings, Index, ListenerAttributes, MonitorAttributes,
    ObservedObject, ProxyResource, ProxyUser, ReconcileContext, Relationships, ServerAttributes,
    ServiceAttributes,
};

/// CRUD over one proxy object type.
///
/// Missing objects are reported as `NotFound`.
#[async_trait]
pub trait ObjectApi<A>: Send + Sync
where
    A: Send + Sync + 'static,
{
    async fn get(&self, ctx: &ReconcileContext, id: &str) -> DomainResult<ObservedObject<A>>;

    async fn list(&self, ctx: &ReconcileContext) -> DomainResult<Vec<ObservedObject<A>>>;

    /// Live objects keyed by ID.
    async fn list_index(&self, ctx: &ReconcileContext) -> DomainResult<Index<ObservedObject<A>>> {
        let objects = self.list(ctx).await?;
        Ok(Index::new(objects, |o| o.id.clone()))
    }

    /// True when every ID in `ids` exists.
    async fn all_exists(&self, ctx: &ReconcileContext, ids: &[String]) -> DomainResult<bool> {
        let index = self.list_index(ctx).await?;
        Ok(ids.iter().all(|id| index.contains(id)))
    }

    async fn create(
        &self,
        ctx: &ReconcileContext,
        id: &str,
        attributes: &A,
        relationships: &Relationships,
    ) -> DomainResult<()>;

    async fn patch(
        &self,
        ctx: &ReconcileContext,
        id: &str,
        attributes: &A,
        relationships: &Relationships,
    ) -> DomainResult<()>;

    async fn delete(&self, ctx: &ReconcileContext, id: &str) -> DomainResult<()>;

    /// Set the per-pod activation state of an object.
    async fn set_state(
        &self,
        ctx: &ReconcileContext,
        id: &str,
        state: ActivationState,
    ) -> DomainResult<()>;
}

/// REST API users.
#[async_trait]
pub trait UserApi: Send + Sync {
    /// `Unauthorized` when the client's own credentials are rejected.
    async fn get(&self, ctx: &ReconcileContext, name: &str) -> DomainResult<ProxyUser>;

    async fn create(&self, ctx: &ReconcileContext, name: &str, password: &str)
        -> DomainResult<()>;

    async fn patch_password(
        &self,
        ctx: &ReconcileContext,
        name: &str,
        password: &str,
    ) -> DomainResult<()>;

    async fn delete(&self, ctx: &ReconcileContext, name: &str) -> DomainResult<()>;

    /// Remove the built-in admin account shipped with the proxy image.
    async fn delete_default_admin(&self, ctx: &ReconcileContext) -> DomainResult<()>;
}

/// Config-sync status of a single pod.
#[async_trait]
pub trait ConfigSyncApi: Send + Sync {
    async fn is_synced(&self, ctx: &ReconcileContext) -> DomainResult<bool>;

    /// Enable or refresh config sync on this pod.
    async fn enable(&self, ctx: &ReconcileContext, settings: &ConfigSyncSettings)
        -> DomainResult<()>;
}

/// The capability set exposed by one proxy pod.
pub trait ProxyClient: Send + Sync {
    fn servers(&self) -> &dyn ObjectApi<ServerAttributes>;

    fn monitors(&self) -> &dyn ObjectApi<MonitorAttributes>;

    fn services(&self) -> &dyn ObjectApi<ServiceAttributes>;

    fn listeners(&self) -> &dyn ObjectApi<ListenerAttributes>;

    fn users(&self) -> &dyn UserApi;

    fn config_sync(&self) -> &dyn ConfigSyncApi;
}

#[async_trait]
pub trait ProxyClientFactory: Send + Sync {
    /// Client authenticated as the engine's admin user.
    async fn client_for_pod(
        &self,
        ctx: &ReconcileContext,
        proxy: &ProxyResource,
        pod_index: u32,
    ) -> DomainResult<Arc<dyn ProxyClient>>;

    /// Client authenticated with the image's built-in admin credentials.
    async fn default_client_for_pod(
        &self,
        ctx: &ReconcileContext,
        proxy: &ProxyResource,
        pod_index: u32,
    ) -> DomainResult<Arc<dyn ProxyClient>>;
}
