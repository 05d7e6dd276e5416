use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::{lock, Failure};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AuthReconcileItem, DatabaseInfo, DatabaseRef, DesiredObject, ObjectKind, PasswordRequest,
    ProxyResource, ProxyStatus, ReconcileContext, RequeueDirective, ResourceKey,
    SecretKeySelector, SecretRequest, WorkloadStatus,
};
use crate::domain::ports::{
    CertReconciler, ObjectReconciler, PlatformApi, RbacReconciler, SecretReconciler,
    SecretResolver, UserGrantReconciler,
};

#[derive(Debug, Default)]
struct PlatformState {
    proxies: BTreeMap<ResourceKey, ProxyResource>,
    databases: BTreeMap<ResourceKey, DatabaseInfo>,
    objects: BTreeMap<(ObjectKind, ResourceKey), DesiredObject>,
    created: BTreeMap<ObjectKind, usize>,
    secrets: BTreeMap<ResourceKey, BTreeMap<String, String>>,
    ready_pods: BTreeSet<(String, String)>,
    auto_ready: bool,
    service_accounts: BTreeSet<ResourceKey>,
    deleted_claims: Vec<(String, BTreeMap<String, String>)>,
    proxy_patches: usize,
    status_patches: usize,
    failures: BTreeMap<String, Failure>,
}

impl PlatformState {
    fn check(&self, operation: &str) -> DomainResult<()> {
        match self.failures.get(operation) {
            Some(failure) => Err(failure.into_error(operation)),
            None => Ok(()),
        }
    }
}

/// Fake API server holding resources, native objects, secrets and pod readiness.
#[derive(Debug, Default)]
pub struct MemoryPlatform {
    state: Mutex<PlatformState>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_proxy(&self, proxy: ProxyResource) {
        lock(&self.state).proxies.insert(proxy.key(), proxy);
    }

    pub fn proxy(&self, key: &ResourceKey) -> Option<ProxyResource> {
        lock(&self.state).proxies.get(key).cloned()
    }

    /// Marks a stored resource as being deleted.
    pub fn request_deletion(&self, key: &ResourceKey) {
        if let Some(proxy) = lock(&self.state).proxies.get_mut(key) {
            proxy.metadata.deletion_timestamp = Some(chrono::Utc::now());
        }
    }

    /// Replaces the spec of a stored resource, as a user edit would.
    pub fn update_spec(&self, key: &ResourceKey, edit: impl FnOnce(&mut ProxyResource)) {
        if let Some(proxy) = lock(&self.state).proxies.get_mut(key) {
            edit(proxy);
            proxy.metadata.generation += 1;
        }
    }

    pub fn insert_database(&self, database: DatabaseInfo) {
        let key = ResourceKey::new(&database.namespace, &database.name);
        lock(&self.state).databases.insert(key, database);
    }

    pub fn set_pod_ready(&self, namespace: &str, pod: &str, ready: bool) {
        let entry = (namespace.to_string(), pod.to_string());
        let mut state = lock(&self.state);
        if ready {
            state.ready_pods.insert(entry);
        } else {
            state.ready_pods.remove(&entry);
        }
    }

    /// When set, reconciling a StatefulSet makes all of its pods ready.
    pub fn set_auto_ready(&self, enabled: bool) {
        lock(&self.state).auto_ready = enabled;
    }

    pub fn has_object(&self, kind: ObjectKind, key: &ResourceKey) -> bool {
        lock(&self.state).objects.contains_key(&(kind, key.clone()))
    }

    pub fn object(&self, kind: ObjectKind, key: &ResourceKey) -> Option<DesiredObject> {
        lock(&self.state).objects.get(&(kind, key.clone())).cloned()
    }

    pub fn objects(&self) -> Vec<DesiredObject> {
        lock(&self.state).objects.values().cloned().collect()
    }

    /// Number of times an object of `kind` was created, not counting patches.
    pub fn created_count(&self, kind: ObjectKind) -> usize {
        lock(&self.state).created.get(&kind).copied().unwrap_or_default()
    }

    pub fn secret_value(&self, namespace: &str, name: &str, key: &str) -> Option<String> {
        lock(&self.state)
            .secrets
            .get(&ResourceKey::new(namespace, name))
            .and_then(|data| data.get(key).cloned())
    }

    pub fn set_secret(&self, namespace: &str, name: &str, key: &str, value: &str) {
        lock(&self.state)
            .secrets
            .entry(ResourceKey::new(namespace, name))
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn has_service_account(&self, key: &ResourceKey) -> bool {
        lock(&self.state).service_accounts.contains(key)
    }

    pub fn deleted_claims(&self) -> Vec<(String, BTreeMap<String, String>)> {
        lock(&self.state).deleted_claims.clone()
    }

    pub fn proxy_patches(&self) -> usize {
        lock(&self.state).proxy_patches
    }

    pub fn status_patches(&self) -> usize {
        lock(&self.state).status_patches
    }

    /// Makes every call of `operation` fail, e.g. `"patch_proxy_status"`.
    pub fn fail(&self, operation: &str, failure: Failure) {
        lock(&self.state)
            .failures
            .insert(operation.to_string(), failure);
    }

    pub fn clear_failures(&self) {
        lock(&self.state).failures.clear();
    }
}

#[async_trait]
impl PlatformApi for MemoryPlatform {
    async fn get_proxy(
        &self,
        ctx: &ReconcileContext,
        key: &ResourceKey,
    ) -> DomainResult<ProxyResource> {
        ctx.check()?;
        let state = lock(&self.state);
        state.check("get_proxy")?;
        state
            .proxies
            .get(key)
            .cloned()
            .ok_or_else(|| DomainError::not_found("Proxy", key.to_string()))
    }

    async fn patch_proxy(&self, ctx: &ReconcileContext, proxy: &ProxyResource) -> DomainResult<()> {
        ctx.check()?;
        let mut state = lock(&self.state);
        state.check("patch_proxy")?;
        let key = proxy.key();
        let stored = state
            .proxies
            .get_mut(&key)
            .ok_or_else(|| DomainError::not_found("Proxy", key.to_string()))?;
        stored.metadata.finalizers = proxy.metadata.finalizers.clone();
        stored.spec = proxy.spec.clone();
        let gone = stored.is_being_deleted() && stored.metadata.finalizers.is_empty();
        if gone {
            state.proxies.remove(&key);
        }
        state.proxy_patches += 1;
        Ok(())
    }

    async fn patch_proxy_status(
        &self,
        ctx: &ReconcileContext,
        key: &ResourceKey,
        status: &ProxyStatus,
    ) -> DomainResult<()> {
        ctx.check()?;
        let mut state = lock(&self.state);
        state.check("patch_proxy_status")?;
        let stored = state
            .proxies
            .get_mut(key)
            .ok_or_else(|| DomainError::not_found("Proxy", key.to_string()))?;
        stored.status = status.clone();
        state.status_patches += 1;
        Ok(())
    }

    async fn get_database(
        &self,
        ctx: &ReconcileContext,
        reference: &DatabaseRef,
        namespace: &str,
    ) -> DomainResult<DatabaseInfo> {
        ctx.check()?;
        let namespace = reference.namespace.as_deref().unwrap_or(namespace);
        let key = ResourceKey::new(namespace, &reference.name);
        lock(&self.state)
            .databases
            .get(&key)
            .cloned()
            .ok_or_else(|| DomainError::not_found("Database", key.to_string()))
    }

    async fn object_exists(
        &self,
        ctx: &ReconcileContext,
        kind: ObjectKind,
        key: &ResourceKey,
    ) -> DomainResult<bool> {
        ctx.check()?;
        Ok(self.has_object(kind, key))
    }

    async fn create_object(
        &self,
        ctx: &ReconcileContext,
        object: &DesiredObject,
    ) -> DomainResult<()> {
        ctx.check()?;
        let mut state = lock(&self.state);
        state.check(&format!("create {}", object.kind))?;
        let id = (object.kind, object.key.clone());
        if state.objects.contains_key(&id) {
            return Err(DomainError::Platform(format!(
                "{} '{}' already exists",
                object.kind, object.key
            )));
        }
        state.objects.insert(id, object.clone());
        *state.created.entry(object.kind).or_default() += 1;
        Ok(())
    }

    async fn delete_volume_claims(
        &self,
        ctx: &ReconcileContext,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> DomainResult<()> {
        ctx.check()?;
        let mut state = lock(&self.state);
        state.check("delete_volume_claims")?;
        state
            .deleted_claims
            .push((namespace.to_string(), labels.clone()));
        Ok(())
    }

    async fn stateful_set_status(
        &self,
        ctx: &ReconcileContext,
        key: &ResourceKey,
    ) -> DomainResult<WorkloadStatus> {
        ctx.check()?;
        let state = lock(&self.state);
        let sts = state
            .objects
            .get(&(ObjectKind::StatefulSet, key.clone()))
            .ok_or_else(|| DomainError::not_found("StatefulSet", key.to_string()))?;
        let replicas = sts
            .manifest
            .get("replicas")
            .and_then(serde_json::Value::as_u64)
            .and_then(|r| u32::try_from(r).ok())
            .unwrap_or_default();
        let ready_replicas = (0..replicas)
            .filter(|i| {
                state
                    .ready_pods
                    .contains(&(key.namespace.clone(), format!("{}-{i}", key.name)))
            })
            .count();
        Ok(WorkloadStatus {
            replicas,
            ready_replicas: u32::try_from(ready_replicas).unwrap_or(u32::MAX),
        })
    }

    async fn is_pod_ready(
        &self,
        ctx: &ReconcileContext,
        namespace: &str,
        pod: &str,
    ) -> DomainResult<bool> {
        ctx.check()?;
        Ok(lock(&self.state)
            .ready_pods
            .contains(&(namespace.to_string(), pod.to_string())))
    }
}

#[async_trait]
impl ObjectReconciler for MemoryPlatform {
    async fn reconcile(&self, ctx: &ReconcileContext, desired: &DesiredObject) -> DomainResult<()> {
        ctx.check()?;
        let mut state = lock(&self.state);
        state.check(&format!("reconcile {}", desired.kind))?;
        let id = (desired.kind, desired.key.clone());
        if state.objects.insert(id, desired.clone()).is_none() {
            *state.created.entry(desired.kind).or_default() += 1;
        }

        if desired.kind == ObjectKind::StatefulSet && state.auto_ready {
            let replicas = desired
                .manifest
                .get("replicas")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or_default();
            for i in 0..replicas {
                state.ready_pods.insert((
                    desired.key.namespace.clone(),
                    format!("{}-{i}", desired.key.name),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SecretReconciler for MemoryPlatform {
    async fn reconcile(&self, ctx: &ReconcileContext, request: &SecretRequest) -> DomainResult<()> {
        ctx.check()?;
        let mut state = lock(&self.state);
        state.check("reconcile Secret")?;
        state
            .secrets
            .entry(request.key.clone())
            .or_default()
            .extend(request.data.clone());
        Ok(())
    }

    async fn reconcile_password(
        &self,
        ctx: &ReconcileContext,
        request: &PasswordRequest,
    ) -> DomainResult<String> {
        ctx.check()?;
        let mut state = lock(&self.state);
        state.check("reconcile password")?;
        let data = state.secrets.entry(request.key.clone()).or_default();
        if let Some(existing) = data.get(&request.secret_key) {
            return Ok(existing.clone());
        }
        if !request.generate {
            return Err(DomainError::not_found(
                "Secret key",
                format!("{}/{}", request.key, request.secret_key),
            ));
        }
        let password = Uuid::new_v4().simple().to_string();
        data.insert(request.secret_key.clone(), password.clone());
        Ok(password)
    }
}

#[async_trait]
impl SecretResolver for MemoryPlatform {
    async fn resolve(
        &self,
        ctx: &ReconcileContext,
        selector: &SecretKeySelector,
        namespace: &str,
    ) -> DomainResult<String> {
        ctx.check()?;
        self.secret_value(namespace, &selector.name, &selector.key)
            .ok_or_else(|| {
                DomainError::not_found(
                    "Secret key",
                    format!("{namespace}/{}/{}", selector.name, selector.key),
                )
            })
    }
}

#[async_trait]
impl RbacReconciler for MemoryPlatform {
    async fn reconcile_service_account(
        &self,
        ctx: &ReconcileContext,
        key: &ResourceKey,
        _owner: &ResourceKey,
    ) -> DomainResult<()> {
        ctx.check()?;
        let mut state = lock(&self.state);
        state.check("reconcile ServiceAccount")?;
        state.service_accounts.insert(key.clone());
        Ok(())
    }
}

pub const CERT_ANNOTATION: &str = "sqlproxy.operator/certificate-hash";

/// Certificates that are always issued.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryCerts;

#[async_trait]
impl CertReconciler for MemoryCerts {
    async fn reconcile(
        &self,
        ctx: &ReconcileContext,
        _proxy: &ProxyResource,
    ) -> DomainResult<RequeueDirective> {
        ctx.check()?;
        Ok(RequeueDirective::none())
    }

    async fn pod_annotations(
        &self,
        ctx: &ReconcileContext,
        proxy: &ProxyResource,
    ) -> DomainResult<BTreeMap<String, String>> {
        ctx.check()?;
        Ok(BTreeMap::from([(
            CERT_ANNOTATION.to_string(),
            proxy.key().to_string(),
        )]))
    }
}

#[derive(Debug, Default)]
struct UserGrantState {
    reconciled: Vec<String>,
    requeue: BTreeSet<String>,
}

/// Records user/grant reconciliation instead of talking to a database.
#[derive(Debug, Default)]
pub struct MemoryUserGrants {
    state: Mutex<UserGrantState>,
}

impl MemoryUserGrants {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items named `name` answer with a requeue, as if a secret were missing.
    pub fn requeue_for(&self, name: &str) {
        lock(&self.state).requeue.insert(name.to_string());
    }

    /// Item names in reconciliation order.
    pub fn reconciled(&self) -> Vec<String> {
        lock(&self.state).reconciled.clone()
    }
}

#[async_trait]
impl UserGrantReconciler for MemoryUserGrants {
    async fn reconcile_user_grant(
        &self,
        ctx: &ReconcileContext,
        _owner: &ResourceKey,
        item: &AuthReconcileItem,
    ) -> DomainResult<RequeueDirective> {
        ctx.check()?;
        let mut state = lock(&self.state);
        state.reconciled.push(item.key.name.clone());
        if state.requeue.contains(&item.key.name) {
            return Ok(RequeueDirective::after_secs(1));
        }
        Ok(RequeueDirective::none())
    }
}
