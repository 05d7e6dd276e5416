use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{lock, Failure};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ActivationState, ConfigSyncSettings, ListenerAttributes, MonitorAttributes, MonitorModule,
    ObservedObject, ProxyResource, ProxyUser, ReconcileContext, Relationships, ServerAttributes,
    ServiceAttributes,
};
use crate::domain::ports::{ConfigSyncApi, ObjectApi, ProxyClient, ProxyClientFactory, UserApi};

/// Built-in admin account every proxy image ships with.
pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
const DEFAULT_ADMIN_PASSWORD: &str = "mariadb";

type Objects<A> = BTreeMap<String, ObservedObject<A>>;

#[derive(Debug)]
struct PodState {
    servers: Objects<ServerAttributes>,
    monitors: Objects<MonitorAttributes>,
    services: Objects<ServiceAttributes>,
    listeners: Objects<ListenerAttributes>,
    activation: BTreeMap<String, ActivationState>,
    users: BTreeMap<String, String>,
    synced: bool,
    sync_settings: Option<ConfigSyncSettings>,
    calls: Vec<String>,
    failures: BTreeMap<String, Failure>,
}

impl Default for PodState {
    fn default() -> Self {
        Self {
            servers: BTreeMap::new(),
            monitors: BTreeMap::new(),
            services: BTreeMap::new(),
            listeners: BTreeMap::new(),
            activation: BTreeMap::new(),
            users: BTreeMap::from([(
                DEFAULT_ADMIN_USERNAME.to_string(),
                DEFAULT_ADMIN_PASSWORD.to_string(),
            )]),
            synced: false,
            sync_settings: None,
            calls: Vec::new(),
            failures: BTreeMap::new(),
        }
    }
}

impl PodState {
    /// Records `call` and fails it if a failure was injected for it.
    fn record(&mut self, call: String) -> DomainResult<()> {
        let failure = self.failures.get(&call).copied();
        self.calls.push(call.clone());
        match failure {
            Some(failure) => Err(failure.into_error(&call)),
            None => Ok(()),
        }
    }

    /// The first server a monitor watches becomes primary, the rest replicas.
    fn elect_primary(&mut self, monitored: &[String]) {
        for (i, id) in monitored.iter().enumerate() {
            if let Some(server) = self.servers.get_mut(id) {
                server.state = if i == 0 {
                    "Master, Running".to_string()
                } else {
                    "Slave, Running".to_string()
                };
            }
        }
    }
}

/// One fake proxy pod, shared by every client pointed at it.
#[derive(Debug)]
pub struct MemoryPod {
    name: String,
    state: Mutex<PodState>,
}

impl MemoryPod {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(PodState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_synced(&self, synced: bool) {
        lock(&self.state).synced = synced;
    }

    pub fn is_synced(&self) -> bool {
        lock(&self.state).synced
    }

    /// Settings of the last `enable` call, if any.
    pub fn sync_settings(&self) -> Option<ConfigSyncSettings> {
        lock(&self.state).sync_settings.clone()
    }

    pub fn insert_server(&self, id: &str, state: &str) {
        let server = ObservedObject {
            id: id.to_string(),
            state: state.to_string(),
            attributes: ServerAttributes {
                address: format!("{id}.db"),
                port: 3306,
                protocol: "MariaDBBackend".to_string(),
                params: BTreeMap::new(),
            },
            relationships: Relationships::default(),
        };
        lock(&self.state).servers.insert(id.to_string(), server);
    }

    pub fn insert_monitor(&self, id: &str) {
        let monitor = ObservedObject {
            id: id.to_string(),
            state: "Running".to_string(),
            attributes: MonitorAttributes {
                module: MonitorModule::Mariadbmon,
                interval_ms: 2_000,
                cooperative_monitoring: None,
                user: String::new(),
                password: String::new(),
                params: BTreeMap::new(),
            },
            relationships: Relationships::default(),
        };
        lock(&self.state).monitors.insert(id.to_string(), monitor);
    }

    pub fn server_ids(&self) -> Vec<String> {
        lock(&self.state).servers.keys().cloned().collect()
    }

    pub fn monitor_ids(&self) -> Vec<String> {
        lock(&self.state).monitors.keys().cloned().collect()
    }

    pub fn service_ids(&self) -> Vec<String> {
        lock(&self.state).services.keys().cloned().collect()
    }

    pub fn listener_ids(&self) -> Vec<String> {
        lock(&self.state).listeners.keys().cloned().collect()
    }

    /// Runtime state string of a server, e.g. `"Master, Running"`.
    pub fn server_state(&self, id: &str) -> Option<String> {
        lock(&self.state).servers.get(id).map(|s| s.state.clone())
    }

    /// Activation state of an object, keyed as `"<kind> <id>"`.
    pub fn activation(&self, kind: &str, id: &str) -> Option<ActivationState> {
        lock(&self.state)
            .activation
            .get(&format!("{kind} {id}"))
            .copied()
    }

    pub fn has_user(&self, name: &str) -> bool {
        lock(&self.state).users.contains_key(name)
    }

    pub fn has_default_admin(&self) -> bool {
        self.has_user(DEFAULT_ADMIN_USERNAME)
    }

    /// Every call made against this pod, e.g. `"servers.create s2"`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    /// Makes every later `call` fail with `failure`.
    pub fn fail(&self, call: &str, failure: Failure) {
        lock(&self.state)
            .failures
            .insert(call.to_string(), failure);
    }

    pub fn clear_failures(&self) {
        lock(&self.state).failures.clear();
    }
}

/// Selects one object map out of the pod state.
type Select<A> = fn(&mut PodState) -> &mut Objects<A>;

fn servers(state: &mut PodState) -> &mut Objects<ServerAttributes> {
    &mut state.servers
}

fn monitors(state: &mut PodState) -> &mut Objects<MonitorAttributes> {
    &mut state.monitors
}

fn services(state: &mut PodState) -> &mut Objects<ServiceAttributes> {
    &mut state.services
}

fn listeners(state: &mut PodState) -> &mut Objects<ListenerAttributes> {
    &mut state.listeners
}

struct ObjectStore<A> {
    kind: &'static str,
    initial_state: &'static str,
    pod: Arc<MemoryPod>,
    select: Select<A>,
}

impl<A> ObjectStore<A> {
    fn new(
        kind: &'static str,
        initial_state: &'static str,
        pod: &Arc<MemoryPod>,
        select: Select<A>,
    ) -> Self {
        Self {
            kind,
            initial_state,
            pod: Arc::clone(pod),
            select,
        }
    }

    fn not_found(&self, id: &str) -> DomainError {
        DomainError::not_found(self.kind, id)
    }

    fn after_write(&self, state: &mut PodState, relationships: &Relationships) {
        if self.kind == "monitors" {
            state.elect_primary(&relationships.servers);
        }
    }
}

#[async_trait]
impl<A> ObjectApi<A> for ObjectStore<A>
where
    A: Clone + Send + Sync + 'static,
{
    async fn get(&self, ctx: &ReconcileContext, id: &str) -> DomainResult<ObservedObject<A>> {
        ctx.check()?;
        let mut state = lock(&self.pod.state);
        state.record(format!("{}.get {id}", self.kind))?;
        (self.select)(&mut *state)
            .get(id)
            .cloned()
            .ok_or_else(|| self.not_found(id))
    }

    async fn list(&self, ctx: &ReconcileContext) -> DomainResult<Vec<ObservedObject<A>>> {
        ctx.check()?;
        let mut state = lock(&self.pod.state);
        state.record(format!("{}.list", self.kind))?;
        Ok((self.select)(&mut *state).values().cloned().collect())
    }

    async fn create(
        &self,
        ctx: &ReconcileContext,
        id: &str,
        attributes: &A,
        relationships: &Relationships,
    ) -> DomainResult<()> {
        ctx.check()?;
        let mut state = lock(&self.pod.state);
        state.record(format!("{}.create {id}", self.kind))?;
        let objects = (self.select)(&mut *state);
        if objects.contains_key(id) {
            return Err(DomainError::ProxyApi {
                status: 403,
                message: format!("{} '{id}' already exists", self.kind),
            });
        }
        objects.insert(
            id.to_string(),
            ObservedObject {
                id: id.to_string(),
                state: self.initial_state.to_string(),
                attributes: attributes.clone(),
                relationships: relationships.clone(),
            },
        );
        self.after_write(&mut *state, relationships);
        Ok(())
    }

    async fn patch(
        &self,
        ctx: &ReconcileContext,
        id: &str,
        attributes: &A,
        relationships: &Relationships,
    ) -> DomainResult<()> {
        ctx.check()?;
        let mut state = lock(&self.pod.state);
        state.record(format!("{}.patch {id}", self.kind))?;
        let object = (self.select)(&mut *state)
            .get_mut(id)
            .ok_or_else(|| self.not_found(id))?;
        object.attributes = attributes.clone();
        object.relationships = relationships.clone();
        self.after_write(&mut *state, relationships);
        Ok(())
    }

    async fn delete(&self, ctx: &ReconcileContext, id: &str) -> DomainResult<()> {
        ctx.check()?;
        let mut state = lock(&self.pod.state);
        state.record(format!("{}.delete {id}", self.kind))?;
        (self.select)(&mut *state)
            .remove(id)
            .ok_or_else(|| self.not_found(id))?;
        state.activation.remove(&format!("{} {id}", self.kind));
        Ok(())
    }

    async fn set_state(
        &self,
        ctx: &ReconcileContext,
        id: &str,
        activation: ActivationState,
    ) -> DomainResult<()> {
        ctx.check()?;
        let word = match activation {
            ActivationState::Active => "active",
            ActivationState::Inactive => "inactive",
        };
        let mut state = lock(&self.pod.state);
        state.record(format!("{}.set_state {id} {word}", self.kind))?;
        if !(self.select)(&mut *state).contains_key(id) {
            return Err(self.not_found(id));
        }
        state
            .activation
            .insert(format!("{} {id}", self.kind), activation);
        Ok(())
    }
}

struct MemoryUsers {
    identity: String,
    pod: Arc<MemoryPod>,
}

impl MemoryUsers {
    fn authorize(&self, state: &PodState) -> DomainResult<()> {
        if state.users.contains_key(&self.identity) {
            Ok(())
        } else {
            Err(DomainError::Unauthorized(format!(
                "user '{}' rejected by Pod '{}'",
                self.identity, self.pod.name
            )))
        }
    }
}

#[async_trait]
impl UserApi for MemoryUsers {
    async fn get(&self, ctx: &ReconcileContext, name: &str) -> DomainResult<ProxyUser> {
        ctx.check()?;
        let mut state = lock(&self.pod.state);
        state.record(format!("users.get {name}"))?;
        self.authorize(&state)?;
        if !state.users.contains_key(name) {
            return Err(DomainError::not_found("User", name));
        }
        Ok(ProxyUser {
            name: name.to_string(),
            account: "admin".to_string(),
        })
    }

    async fn create(
        &self,
        ctx: &ReconcileContext,
        name: &str,
        password: &str,
    ) -> DomainResult<()> {
        ctx.check()?;
        let mut state = lock(&self.pod.state);
        state.record(format!("users.create {name}"))?;
        self.authorize(&state)?;
        if state.users.contains_key(name) {
            return Err(DomainError::ProxyApi {
                status: 403,
                message: format!("user '{name}' already exists"),
            });
        }
        state.users.insert(name.to_string(), password.to_string());
        Ok(())
    }

    async fn patch_password(
        &self,
        ctx: &ReconcileContext,
        name: &str,
        password: &str,
    ) -> DomainResult<()> {
        ctx.check()?;
        let mut state = lock(&self.pod.state);
        state.record(format!("users.patch_password {name}"))?;
        self.authorize(&state)?;
        let stored = state
            .users
            .get_mut(name)
            .ok_or_else(|| DomainError::not_found("User", name))?;
        *stored = password.to_string();
        Ok(())
    }

    async fn delete(&self, ctx: &ReconcileContext, name: &str) -> DomainResult<()> {
        ctx.check()?;
        let mut state = lock(&self.pod.state);
        state.record(format!("users.delete {name}"))?;
        self.authorize(&state)?;
        state
            .users
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| DomainError::not_found("User", name))
    }

    async fn delete_default_admin(&self, ctx: &ReconcileContext) -> DomainResult<()> {
        ctx.check()?;
        let mut state = lock(&self.pod.state);
        state.record("users.delete_default_admin".to_string())?;
        self.authorize(&state)?;
        state.users.remove(DEFAULT_ADMIN_USERNAME);
        Ok(())
    }
}

struct MemoryConfigSync {
    pod: Arc<MemoryPod>,
}

#[async_trait]
impl ConfigSyncApi for MemoryConfigSync {
    async fn is_synced(&self, ctx: &ReconcileContext) -> DomainResult<bool> {
        ctx.check()?;
        let mut state = lock(&self.pod.state);
        state.record("config_sync.is_synced".to_string())?;
        Ok(state.synced)
    }

    async fn enable(
        &self,
        ctx: &ReconcileContext,
        settings: &ConfigSyncSettings,
    ) -> DomainResult<()> {
        ctx.check()?;
        let mut state = lock(&self.pod.state);
        state.record("config_sync.enable".to_string())?;
        state.sync_settings = Some(settings.clone());
        state.synced = true;
        Ok(())
    }
}

/// A client bound to one pod under one identity.
pub struct MemoryClient {
    servers: ObjectStore<ServerAttributes>,
    monitors: ObjectStore<MonitorAttributes>,
    services: ObjectStore<ServiceAttributes>,
    listeners: ObjectStore<ListenerAttributes>,
    users: MemoryUsers,
    config_sync: MemoryConfigSync,
}

impl MemoryClient {
    pub fn new(pod: &Arc<MemoryPod>, identity: impl Into<String>) -> Self {
        Self {
            servers: ObjectStore::new("servers", "Running", pod, servers),
            monitors: ObjectStore::new("monitors", "Running", pod, monitors),
            services: ObjectStore::new("services", "Started", pod, services),
            listeners: ObjectStore::new("listeners", "Running", pod, listeners),
            users: MemoryUsers {
                identity: identity.into(),
                pod: Arc::clone(pod),
            },
            config_sync: MemoryConfigSync {
                pod: Arc::clone(pod),
            },
        }
    }
}

impl ProxyClient for MemoryClient {
    fn servers(&self) -> &dyn ObjectApi<ServerAttributes> {
        &self.servers
    }

    fn monitors(&self) -> &dyn ObjectApi<MonitorAttributes> {
        &self.monitors
    }

    fn services(&self) -> &dyn ObjectApi<ServiceAttributes> {
        &self.services
    }

    fn listeners(&self) -> &dyn ObjectApi<ListenerAttributes> {
        &self.listeners
    }

    fn users(&self) -> &dyn UserApi {
        &self.users
    }

    fn config_sync(&self) -> &dyn ConfigSyncApi {
        &self.config_sync
    }
}

/// Hands out clients for lazily created pods, keyed by pod name.
#[derive(Debug, Default)]
pub struct MemoryProxyFactory {
    pods: Mutex<BTreeMap<String, Arc<MemoryPod>>>,
}

impl MemoryProxyFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pod named `name`, created empty on first access.
    pub fn pod(&self, name: &str) -> Arc<MemoryPod> {
        Arc::clone(
            lock(&self.pods)
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(MemoryPod::new(name))),
        )
    }

    pub fn pod_names(&self) -> Vec<String> {
        lock(&self.pods).keys().cloned().collect()
    }
}

#[async_trait]
impl ProxyClientFactory for MemoryProxyFactory {
    async fn client_for_pod(
        &self,
        ctx: &ReconcileContext,
        proxy: &ProxyResource,
        pod_index: u32,
    ) -> DomainResult<Arc<dyn ProxyClient>> {
        ctx.check()?;
        let pod = self.pod(&proxy.pod_name(pod_index));
        Ok(Arc::new(MemoryClient::new(
            &pod,
            proxy.spec.auth.admin_username.clone(),
        )))
    }

    async fn default_client_for_pod(
        &self,
        ctx: &ReconcileContext,
        proxy: &ProxyResource,
        pod_index: u32,
    ) -> DomainResult<Arc<dyn ProxyClient>> {
        ctx.check()?;
        let pod = self.pod(&proxy.pod_name(pod_index));
        Ok(Arc::new(MemoryClient::new(&pod, DEFAULT_ADMIN_USERNAME)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_users_require_known_identity() {
        let pod = Arc::new(MemoryPod::new("proxy-0"));
        let ctx = ReconcileContext::default();
        let engine = MemoryClient::new(&pod, "sqlproxy-operator");
        let default = MemoryClient::new(&pod, DEFAULT_ADMIN_USERNAME);

        let err = engine.users().get(&ctx, "sqlproxy-operator").await.unwrap_err();
        assert!(err.is_unauthorized());

        default
            .users()
            .create(&ctx, "sqlproxy-operator", "pw")
            .await
            .unwrap();
        assert!(engine.users().get(&ctx, "sqlproxy-operator").await.is_ok());
        assert!(engine.users().get(&ctx, "metrics").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_monitor_write_elects_primary() {
        let pod = Arc::new(MemoryPod::new("proxy-0"));
        pod.insert_server("s0", "Running");
        pod.insert_server("s1", "Running");
        let client = MemoryClient::new(&pod, DEFAULT_ADMIN_USERNAME);
        let ctx = ReconcileContext::default();

        let attrs = MonitorAttributes {
            module: MonitorModule::Mariadbmon,
            interval_ms: 2_000,
            cooperative_monitoring: None,
            user: "mon".to_string(),
            password: "pw".to_string(),
            params: BTreeMap::new(),
        };
        client
            .monitors()
            .create(
                &ctx,
                "mariadbmon-monitor",
                &attrs,
                &Relationships::servers(vec!["s0".to_string(), "s1".to_string()]),
            )
            .await
            .unwrap();

        assert_eq!(pod.server_state("s0").as_deref(), Some("Master, Running"));
        assert_eq!(pod.server_state("s1").as_deref(), Some("Slave, Running"));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let pod = Arc::new(MemoryPod::new("proxy-0"));
        pod.fail("services.list", Failure::Hard);
        let client = MemoryClient::new(&pod, DEFAULT_ADMIN_USERNAME);
        let ctx = ReconcileContext::default();

        assert!(client.services().list(&ctx).await.is_err());
        assert!(client.servers().list(&ctx).await.is_ok());
        assert_eq!(pod.calls(), vec!["services.list", "servers.list"]);
    }
}
