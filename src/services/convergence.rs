//! Convergence of proxy objects toward the desired indices.
//!
//! Each object type is converged the same way: the desired index built from
//! the spec is diffed against the live index listed from a pod, then
//! added keys are created, deleted keys removed and the rest patched.
//! Created and patched objects get their activation state synced right
//! after, since that state is not part of the object's configuration.

use tracing::{debug, info, warn};

use crate::domain::errors::{DomainResult, ResultExt};
use crate::domain::models::{
    diff, ActivationState, DiffResult, ListenerAttributes, ListenerSpec, MonitorAttributes,
    ProxyResource, ReconcileContext, Relationships, SecretKeySelector, ServerAttributes,
    ServerSpec, ServiceAttributes, ServiceSpec,
};
use crate::domain::ports::{ProxyClient, SecretResolver};

/// Converges one pod's objects for one proxy resource.
pub struct Convergence<'a> {
    ctx: &'a ReconcileContext,
    proxy: &'a ProxyResource,
    client: &'a dyn ProxyClient,
    resolver: &'a dyn SecretResolver,
    log_diffs: bool,
}

impl<'a> Convergence<'a> {
    pub fn new(
        ctx: &'a ReconcileContext,
        proxy: &'a ProxyResource,
        client: &'a dyn ProxyClient,
        resolver: &'a dyn SecretResolver,
    ) -> Self {
        Self {
            ctx,
            proxy,
            client,
            resolver,
            log_diffs: false,
        }
    }

    #[must_use]
    pub const fn with_diff_logging(mut self, enabled: bool) -> Self {
        self.log_diffs = enabled;
        self
    }

    fn log_diff(&self, object: &str, diff: &DiffResult) {
        if self.log_diffs {
            debug!(
                object,
                added = ?diff.added,
                deleted = ?diff.deleted,
                rest = ?diff.rest,
                "proxy diff"
            );
        }
    }

    fn server_relationships(&self) -> Relationships {
        Relationships::servers(self.proxy.spec.server_ids())
    }

    async fn password(&self, secret: &SecretKeySelector) -> DomainResult<String> {
        self.resolver
            .resolve(self.ctx, secret, self.proxy.namespace())
            .await
    }

    // ========================================================================
    // Servers
    // ========================================================================

    pub async fn servers(&self) -> DomainResult<DiffResult> {
        info!("reconciling servers");
        let current = self.proxy.spec.server_index();
        let previous = self
            .client
            .servers()
            .list_index(self.ctx)
            .await
            .context("error getting server index")?;
        let diff = diff(&current, &previous);
        self.log_diff("server", &diff);

        let api = self.client.servers();
        let none = Relationships::default();

        for id in &diff.added {
            let Some(srv) = lookup(current.get(id), "server to add", id) else {
                continue;
            };
            api.create(self.ctx, id, &ServerAttributes::from(srv), &none)
                .await
                .context("error creating server")?;
            self.update_server_state(srv).await?;
        }

        for id in &diff.deleted {
            let Some(srv) = lookup(previous.get(id), "server to delete", id) else {
                continue;
            };
            api.delete(self.ctx, &srv.id)
                .await
                .context("error deleting server")?;
        }

        for id in &diff.rest {
            let Some(srv) = lookup(current.get(id), "server to patch", id) else {
                continue;
            };
            api.patch(self.ctx, id, &ServerAttributes::from(srv), &none)
                .await
                .context("error patching server")?;
            self.update_server_state(srv).await?;
        }

        Ok(diff)
    }

    pub async fn update_server_state(&self, srv: &ServerSpec) -> DomainResult<()> {
        self.client
            .servers()
            .set_state(
                self.ctx,
                &srv.name,
                ActivationState::from_suspended(srv.maintenance),
            )
            .await
            .context("error updating server state")
    }

    // ========================================================================
    // Monitor
    // ========================================================================

    async fn monitor_attributes(&self) -> DomainResult<MonitorAttributes> {
        let auth = &self.proxy.spec.auth;
        let password = self
            .password(&auth.monitor_password_secret_key_ref.selector)
            .await
            .context("error getting monitor password")?;
        Ok(MonitorAttributes::from_spec(
            &self.proxy.spec.monitor,
            auth.monitor_username.clone(),
            password,
        ))
    }

    /// Creates the monitor when missing, patches it otherwise.
    pub async fn monitor(&self) -> DomainResult<()> {
        info!("reconciling monitor");
        let name = self.proxy.spec.monitor.name();
        let api = self.client.monitors();

        let exists = match api.get(self.ctx, &name).await {
            Ok(_) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e.context("error getting monitor")),
        };
        let attributes = self.monitor_attributes().await?;
        let rels = self.server_relationships();

        if exists {
            api.patch(self.ctx, &name, &attributes, &rels)
                .await
                .context("error patching monitor")?;
        } else {
            api.create(self.ctx, &name, &attributes, &rels)
                .await
                .context("error creating monitor")?;
        }
        self.update_monitor_state().await
    }

    pub async fn update_monitor_state(&self) -> DomainResult<()> {
        let monitor = &self.proxy.spec.monitor;
        self.client
            .monitors()
            .set_state(
                self.ctx,
                &monitor.name(),
                ActivationState::from_suspended(monitor.suspend),
            )
            .await
            .context("error updating monitor state")
    }

    // ========================================================================
    // Services
    // ========================================================================

    async fn service_credentials(&self) -> DomainResult<(String, String)> {
        let auth = &self.proxy.spec.auth;
        let password = self
            .password(&auth.server_password_secret_key_ref.selector)
            .await
            .context("error getting server password")?;
        Ok((auth.server_username.clone(), password))
    }

    pub async fn services(&self) -> DomainResult<DiffResult> {
        info!("reconciling services");
        let current = self.proxy.spec.service_index();
        let previous = self
            .client
            .services()
            .list_index(self.ctx)
            .await
            .context("error getting service index")?;
        let diff = diff(&current, &previous);
        self.log_diff("service", &diff);

        let api = self.client.services();
        let rels = self.server_relationships();
        let (user, password) = self.service_credentials().await?;
        let attributes =
            |svc: &ServiceSpec| ServiceAttributes::from_spec(svc, user.clone(), password.clone());

        for id in &diff.added {
            let Some(svc) = lookup(current.get(id), "service to add", id) else {
                continue;
            };
            api.create(self.ctx, id, &attributes(svc), &rels)
                .await
                .context("error creating service")?;
            self.update_service_state(svc).await?;
        }

        for id in &diff.deleted {
            let Some(svc) = lookup(previous.get(id), "service to delete", id) else {
                continue;
            };
            api.delete(self.ctx, &svc.id)
                .await
                .context("error deleting service")?;
        }

        for id in &diff.rest {
            let Some(svc) = lookup(current.get(id), "service to patch", id) else {
                continue;
            };
            api.patch(self.ctx, id, &attributes(svc), &rels)
                .await
                .context("error patching service")?;
            self.update_service_state(svc).await?;
        }

        Ok(diff)
    }

    pub async fn update_service_state(&self, svc: &ServiceSpec) -> DomainResult<()> {
        self.client
            .services()
            .set_state(self.ctx, &svc.name, ActivationState::from_suspended(svc.suspend))
            .await
            .context("error updating service state")
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    pub async fn listeners(&self) -> DomainResult<DiffResult> {
        info!("reconciling listeners");
        let spec = &self.proxy.spec;
        let current = spec.listener_index();
        let previous = self
            .client
            .listeners()
            .list_index(self.ctx)
            .await
            .context("error getting listener index")?;
        let diff = diff(&current, &previous);
        self.log_diff("listener", &diff);

        let api = self.client.listeners();

        for id in &diff.added {
            let Some(listener) = lookup(current.get(id), "listener to add", id) else {
                continue;
            };
            let Some(svc) = spec.service_for_listener(id) else {
                warn!(listener = %id, "service for listener not found");
                continue;
            };
            api.create(
                self.ctx,
                id,
                &ListenerAttributes::from(listener),
                &Relationships::service(&svc.name),
            )
            .await
            .context("error creating listener")?;
            self.update_listener_state(listener).await?;
        }

        for id in &diff.deleted {
            let Some(listener) = lookup(previous.get(id), "listener to delete", id) else {
                continue;
            };
            api.delete(self.ctx, &listener.id)
                .await
                .context("error deleting listener")?;
        }

        for id in &diff.rest {
            let Some(listener) = lookup(current.get(id), "listener to patch", id) else {
                continue;
            };
            let Some(svc) = spec.service_for_listener(id) else {
                warn!(listener = %id, "service for listener not found");
                continue;
            };
            api.patch(
                self.ctx,
                id,
                &ListenerAttributes::from(listener),
                &Relationships::service(&svc.name),
            )
            .await
            .context("error patching listener")?;
            self.update_listener_state(listener).await?;
        }

        Ok(diff)
    }

    pub async fn update_listener_state(&self, listener: &ListenerSpec) -> DomainResult<()> {
        let name = listener.name.clone().unwrap_or_default();
        self.client
            .listeners()
            .set_state(self.ctx, &name, ActivationState::from_suspended(listener.suspend))
            .await
            .context("error updating listener state")
    }
}

/// Index lookups that race with a concurrent change are logged and skipped.
///
/// Only lookups are tolerated: a not-found from a create, patch or state
/// call still fails the phase, which the pipeline then skips as a whole.
fn lookup<'i, T>(found: DomainResult<&'i T>, what: &str, id: &str) -> Option<&'i T> {
    match found {
        Ok(item) => Some(item),
        Err(e) => {
            warn!(id, error = %e, "error getting {what}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::adapters::memory::{Failure, MemoryEnvironment, MemoryPod};
    use crate::domain::models::{ImagesConfig, ProxySpec, ServiceRouter};
    use crate::domain::ports::ProxyClientFactory;

    fn proxy(servers: &[&str]) -> ProxyResource {
        let mut proxy = ProxyResource::new(
            "ns",
            "proxy",
            ProxySpec {
                servers: servers
                    .iter()
                    .map(|s| ServerSpec::new(*s, format!("{s}.db")))
                    .collect(),
                services: vec![
                    ServiceSpec::new("rw", ServiceRouter::Readwritesplit, 3306),
                    ServiceSpec::new("ro", ServiceRouter::Readconnroute, 3307),
                ],
                ..ProxySpec::default()
            },
        );
        proxy.set_defaults(&ImagesConfig::default(), None);
        proxy
    }

    async fn primary(
        env: &MemoryEnvironment,
        proxy: &ProxyResource,
    ) -> (Arc<dyn ProxyClient>, Arc<MemoryPod>) {
        env.seed_secrets(proxy);
        let ctx = ReconcileContext::default();
        let client = env.proxies.client_for_pod(&ctx, proxy, 0).await.unwrap();
        (client, env.proxies.pod("proxy-0"))
    }

    #[tokio::test]
    async fn test_server_diff_scenario() {
        let env = MemoryEnvironment::new();
        let proxy = proxy(&["s0", "s1", "s2"]);
        let (client, pod) = primary(&env, &proxy).await;
        for id in ["s0", "s1", "s3"] {
            pod.insert_server(id, "Running");
        }

        let ctx = ReconcileContext::default();
        let conv = Convergence::new(&ctx, &proxy, client.as_ref(), env.platform.as_ref());
        let diff = conv.servers().await.unwrap();

        assert_eq!(diff.added, vec!["s2"]);
        assert_eq!(diff.deleted, vec!["s3"]);
        assert_eq!(diff.rest, vec!["s0", "s1"]);
        assert_eq!(pod.server_ids(), vec!["s0", "s1", "s2"]);

        let calls = pod.calls();
        assert!(calls.contains(&"servers.create s2".to_string()));
        assert!(calls.contains(&"servers.delete s3".to_string()));
        assert!(calls.contains(&"servers.patch s0".to_string()));
        assert!(calls.contains(&"servers.set_state s2 active".to_string()));
        assert!(!calls.contains(&"servers.set_state s3 active".to_string()));
    }

    #[tokio::test]
    async fn test_second_pass_only_patches() {
        let env = MemoryEnvironment::new();
        let proxy = proxy(&["s0", "s1"]);
        let (client, pod) = primary(&env, &proxy).await;
        let ctx = ReconcileContext::default();
        let conv = Convergence::new(&ctx, &proxy, client.as_ref(), env.platform.as_ref());

        conv.servers().await.unwrap();
        conv.services().await.unwrap();
        conv.listeners().await.unwrap();
        pod.clear_calls();

        assert!(conv.servers().await.unwrap().is_converged());
        assert!(conv.services().await.unwrap().is_converged());
        assert!(conv.listeners().await.unwrap().is_converged());

        let calls = pod.calls();
        assert!(calls.iter().all(|c| !c.contains(".create ") && !c.contains(".delete ")));
        assert!(calls.iter().any(|c| c == "services.patch rw"));
        assert!(calls.iter().any(|c| c == "listeners.set_state ro-listener active"));
    }

    #[tokio::test]
    async fn test_monitor_created_then_patched() {
        let env = MemoryEnvironment::new();
        let proxy = proxy(&["s0"]);
        let (client, pod) = primary(&env, &proxy).await;
        let ctx = ReconcileContext::default();
        let conv = Convergence::new(&ctx, &proxy, client.as_ref(), env.platform.as_ref());

        conv.monitor().await.unwrap();
        conv.monitor().await.unwrap();

        let calls = pod.calls();
        assert!(calls.contains(&"monitors.create mariadbmon-monitor".to_string()));
        assert!(calls.contains(&"monitors.patch mariadbmon-monitor".to_string()));
    }

    #[tokio::test]
    async fn test_hard_failure_aborts_remaining_items() {
        let env = MemoryEnvironment::new();
        let proxy = proxy(&["s0", "s1", "s2"]);
        let (client, pod) = primary(&env, &proxy).await;
        pod.fail("servers.create s1", Failure::Hard);

        let ctx = ReconcileContext::default();
        let conv = Convergence::new(&ctx, &proxy, client.as_ref(), env.platform.as_ref());
        let err = conv.servers().await.unwrap_err();

        assert!(err.to_string().starts_with("error creating server"));
        assert_eq!(pod.server_ids(), vec!["s0"]);
    }

    #[tokio::test]
    async fn test_maintenance_server_is_inactive() {
        let env = MemoryEnvironment::new();
        let mut proxy = proxy(&["s0"]);
        proxy.spec.servers[0].maintenance = true;
        let (client, pod) = primary(&env, &proxy).await;

        let ctx = ReconcileContext::default();
        Convergence::new(&ctx, &proxy, client.as_ref(), env.platform.as_ref())
            .servers()
            .await
            .unwrap();

        assert!(pod.calls().contains(&"servers.set_state s0 inactive".to_string()));
    }
}
