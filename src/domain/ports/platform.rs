//! Platform-side capabilities.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    AuthReconcileItem, ConnectionOpts, DatabaseInfo, DatabaseRef, DesiredObject, ObjectKind,
    PasswordRequest, PdbOpts, ProxyResource, ProxyStatus, ReconcileContext, RequeueDirective,
    ResourceKey, SecretKeySelector, SecretRequest, ServiceOpts, StatefulSetOpts, WorkloadStatus,
};

/// Access to the orchestration platform's API server.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Fetch a proxy resource. Missing resources are `NotFound`.
    async fn get_proxy(&self, ctx: &ReconcileContext, key: &ResourceKey)
        -> DomainResult<ProxyResource>;

    /// Persist metadata and spec of a proxy resource.
    async fn patch_proxy(&self, ctx: &ReconcileContext, proxy: &ProxyResource) -> DomainResult<()>;

    /// Persist the status sub-resource.
    async fn patch_proxy_status(
        &self,
        ctx: &ReconcileContext,
        key: &ResourceKey,
        status: &ProxyStatus,
    ) -> DomainResult<()>;

    /// Resolve the backing database a proxy points at.
    async fn get_database(
        &self,
        ctx: &ReconcileContext,
        reference: &DatabaseRef,
        namespace: &str,
    ) -> DomainResult<DatabaseInfo>;

    async fn object_exists(
        &self,
        ctx: &ReconcileContext,
        kind: ObjectKind,
        key: &ResourceKey,
    ) -> DomainResult<bool>;

    /// Create an object. Already existing objects are an error.
    async fn create_object(&self, ctx: &ReconcileContext, object: &DesiredObject)
        -> DomainResult<()>;

    /// Delete every volume claim matching `labels` in `namespace`.
    async fn delete_volume_claims(
        &self,
        ctx: &ReconcileContext,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> DomainResult<()>;

    async fn stateful_set_status(
        &self,
        ctx: &ReconcileContext,
        key: &ResourceKey,
    ) -> DomainResult<WorkloadStatus>;

    /// Readiness probe result of a single pod. Unknown pods are not ready.
    async fn is_pod_ready(&self, ctx: &ReconcileContext, namespace: &str, pod: &str)
        -> DomainResult<bool>;
}

/// Builds native platform objects from options.
pub trait ObjectBuilder: Send + Sync {
    fn build_stateful_set(&self, opts: &StatefulSetOpts) -> DomainResult<DesiredObject>;

    fn build_service(&self, opts: &ServiceOpts) -> DomainResult<DesiredObject>;

    fn build_pod_disruption_budget(&self, opts: &PdbOpts) -> DomainResult<DesiredObject>;

    fn build_connection(&self, opts: &ConnectionOpts) -> DomainResult<DesiredObject>;

    /// Deployment running the metrics exporter next to the proxy.
    fn build_exporter_deployment(&self, proxy: &ProxyResource) -> DomainResult<DesiredObject>;
}

/// Generic create-or-patch of native objects.
#[async_trait]
pub trait ObjectReconciler: Send + Sync {
    async fn reconcile(&self, ctx: &ReconcileContext, desired: &DesiredObject) -> DomainResult<()>;
}

#[async_trait]
pub trait SecretReconciler: Send + Sync {
    /// Create or replace a Secret's data.
    async fn reconcile(&self, ctx: &ReconcileContext, request: &SecretRequest) -> DomainResult<()>;

    /// Ensure a password exists, generating it if requested. Returns the password.
    async fn reconcile_password(
        &self,
        ctx: &ReconcileContext,
        request: &PasswordRequest,
    ) -> DomainResult<String>;
}

#[async_trait]
pub trait SecretResolver: Send + Sync {
    /// Read the value of a secret key.
    async fn resolve(
        &self,
        ctx: &ReconcileContext,
        selector: &SecretKeySelector,
        namespace: &str,
    ) -> DomainResult<String>;
}

/// Certificate issuance for TLS-enabled proxies.
#[async_trait]
pub trait CertReconciler: Send + Sync {
    async fn reconcile(&self, ctx: &ReconcileContext, proxy: &ProxyResource)
        -> DomainResult<RequeueDirective>;

    /// Annotations that roll the pods when certificates change.
    async fn pod_annotations(
        &self,
        ctx: &ReconcileContext,
        proxy: &ProxyResource,
    ) -> DomainResult<BTreeMap<String, String>>;
}

#[async_trait]
pub trait RbacReconciler: Send + Sync {
    async fn reconcile_service_account(
        &self,
        ctx: &ReconcileContext,
        key: &ResourceKey,
        owner: &ResourceKey,
    ) -> DomainResult<()>;
}

/// Creates a database user and its grants against the backing database.
#[async_trait]
pub trait UserGrantReconciler: Send + Sync {
    /// A non-zero directive means a dependency (e.g. a secret) is not there yet.
    async fn reconcile_user_grant(
        &self,
        ctx: &ReconcileContext,
        owner: &ResourceKey,
        item: &AuthReconcileItem,
    ) -> DomainResult<RequeueDirective>;
}
