//! Phase Pipeline Orchestrator.
//!
//! Drives one reconcile tick of a proxy resource as an explicit, ordered list
//! of named phases. Each phase returns a [`RequeueDirective`] or an error and
//! the orchestrator applies the same policy after every phase:
//!
//! - `NotFound` errors skip the phase and the pipeline continues.
//! - Cancellation aborts the tick without touching status.
//! - Transient errors end the tick with a short requeue, leaving Ready as is.
//! - Any other error flips Ready to False and aborts the tick.
//! - A non-zero requeue aborts the tick and is returned as is.
//!
//! All waiting is expressed as requeue directives; nothing in here sleeps.

use std::sync::Arc;

use tracing::{debug, debug_span, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult, ErrorBundle, ErrorKind, ResultExt};
use crate::domain::models::{
    Config, ProxyResource, ReconcileContext, RequeueDirective, ResourceKey, ServerStatus,
};
use crate::domain::ports::{
    CertReconciler, ObjectBuilder, ObjectReconciler, PlatformApi, ProxyClientFactory,
    RbacReconciler, SecretReconciler, SecretResolver, SqlClientFactory, UserGrantReconciler,
};
use crate::infrastructure::logging::SecretScrubbingLayer;
use crate::services::change_gate::should_converge;
use crate::services::config_sync::{is_initialized, reconcile_sync};
use crate::services::convergence::Convergence;
use crate::services::pod_clients::{setup_clients, PodClients, PodTarget};
use crate::services::{auth, finalizer, platform_objects};

pub const SUSPEND_REQUEUE_SECS: u64 = 10;
pub const TRANSIENT_REQUEUE_SECS: u64 = 3;
pub const PRIMARY_ELECTION_REQUEUE_SECS: u64 = 1;

/// The phases of a tick, in execution order.
///
/// Names are stable identifiers used in tracing spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Finalizer,
    Defaulting,
    StatusInit,
    SuspendCheck,
    Secret,
    Tls,
    Auth,
    ServiceAccount,
    PlatformObjects,
    PodReadinessGate,
    ClientSetup,
    AdminBootstrap,
    InitDetection,
    ConfigSync,
    PrimaryElectionGate,
    ServersConvergence,
    MonitorConvergence,
    MonitorState,
    ServicesConvergence,
    ServiceState,
    ListenerState,
    Connection,
    Metrics,
}

impl Phase {
    pub const ALL: [Self; 23] = [
        Self::Finalizer,
        Self::Defaulting,
        Self::StatusInit,
        Self::SuspendCheck,
        Self::Secret,
        Self::Tls,
        Self::Auth,
        Self::ServiceAccount,
        Self::PlatformObjects,
        Self::PodReadinessGate,
        Self::ClientSetup,
        Self::AdminBootstrap,
        Self::InitDetection,
        Self::ConfigSync,
        Self::PrimaryElectionGate,
        Self::ServersConvergence,
        Self::MonitorConvergence,
        Self::MonitorState,
        Self::ServicesConvergence,
        Self::ServiceState,
        Self::ListenerState,
        Self::Connection,
        Self::Metrics,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Finalizer => "finalizer",
            Self::Defaulting => "defaulting",
            Self::StatusInit => "status-init",
            Self::SuspendCheck => "suspend-check",
            Self::Secret => "secret",
            Self::Tls => "tls",
            Self::Auth => "auth",
            Self::ServiceAccount => "service-account",
            Self::PlatformObjects => "platform-objects",
            Self::PodReadinessGate => "pod-readiness-gate",
            Self::ClientSetup => "client-setup",
            Self::AdminBootstrap => "admin-bootstrap",
            Self::InitDetection => "init-detection",
            Self::ConfigSync => "config-sync",
            Self::PrimaryElectionGate => "primary-election-gate",
            Self::ServersConvergence => "servers-convergence",
            Self::MonitorConvergence => "monitor-convergence",
            Self::MonitorState => "monitor-state",
            Self::ServicesConvergence => "services-convergence",
            Self::ServiceState => "service-state",
            Self::ListenerState => "listener-state",
            Self::Connection => "connection",
            Self::Metrics => "metrics",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Every capability the engine calls out to.
#[derive(Clone)]
pub struct EngineDeps {
    pub platform: Arc<dyn PlatformApi>,
    pub builder: Arc<dyn ObjectBuilder>,
    pub objects: Arc<dyn ObjectReconciler>,
    pub secrets: Arc<dyn SecretReconciler>,
    pub resolver: Arc<dyn SecretResolver>,
    pub certs: Arc<dyn CertReconciler>,
    pub rbac: Arc<dyn RbacReconciler>,
    pub user_grants: Arc<dyn UserGrantReconciler>,
    pub proxies: Arc<dyn ProxyClientFactory>,
    pub sql: Arc<dyn SqlClientFactory>,
}

/// Per-tick state, dropped when the tick ends.
#[derive(Debug)]
pub struct ReconcileRequest {
    pub proxy: ProxyResource,
    pub clients: Option<PodClients>,
    /// Set once the resource has been finalized; the tick stops right after.
    pub finalized: bool,
}

impl ReconcileRequest {
    pub fn new(proxy: ProxyResource) -> Self {
        Self {
            proxy,
            clients: None,
            finalized: false,
        }
    }

    /// Pod clients of this tick.
    ///
    /// Missing when client setup was skipped because a pod vanished mid-tick,
    /// which is a transient condition: the tick requeues and Ready is left as is.
    fn clients(&self) -> DomainResult<&PodClients> {
        self.clients
            .as_ref()
            .ok_or_else(|| DomainError::NotReady("pod clients not initialized".to_string()))
    }
}

/// Runs reconcile ticks for proxy resources.
pub struct PhaseOrchestrator {
    deps: EngineDeps,
    config: Config,
    scrubber: SecretScrubbingLayer,
}

impl PhaseOrchestrator {
    pub fn new(deps: EngineDeps, config: Config) -> Self {
        Self {
            deps,
            config,
            scrubber: SecretScrubbingLayer::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs one tick for the resource identified by `key`.
    pub async fn reconcile(
        &self,
        ctx: &ReconcileContext,
        key: &ResourceKey,
    ) -> DomainResult<RequeueDirective> {
        let tick = Uuid::new_v4();
        let span = info_span!("reconcile", resource = %key, tick = %tick);
        self.reconcile_tick(ctx, key).instrument(span).await
    }

    async fn reconcile_tick(
        &self,
        ctx: &ReconcileContext,
        key: &ResourceKey,
    ) -> DomainResult<RequeueDirective> {
        let proxy = match self.deps.platform.get_proxy(ctx, key).await {
            Ok(proxy) => proxy,
            Err(e) if e.is_not_found() => {
                debug!("resource not found, nothing to do");
                return Ok(RequeueDirective::none());
            }
            Err(e) => return Err(e.context("error getting resource")),
        };
        let mut req = ReconcileRequest::new(proxy);

        for phase in Phase::ALL {
            let span = debug_span!("phase", name = phase.name());
            let result = self.run_phase(phase, ctx, &mut req).instrument(span).await;

            match result {
                Err(e) if e.is_not_found() => {
                    debug!(phase = %phase, error = %e, "skipping phase");
                }
                Err(e) if e.kind() == ErrorKind::Cancelled => return Err(e),
                Err(e) if e.is_transient() => {
                    debug!(phase = %phase, error = %e, "not ready, requeuing");
                    return Ok(RequeueDirective::after_secs(TRANSIENT_REQUEUE_SECS));
                }
                Err(e) => {
                    warn!(phase = %phase, error = %e, "phase failed");
                    return Err(self.handle_error(ctx, &req.proxy, e).await);
                }
                Ok(result) if !result.is_zero() => {
                    debug!(phase = %phase, after = ?result.after, "requeue requested");
                    return Ok(result);
                }
                Ok(_) => {}
            }

            if req.finalized {
                return Ok(RequeueDirective::none());
            }
        }

        req.proxy.status.set_ready_running();
        if let Err(e) = self.patch_status(ctx, &req.proxy).await {
            return Err(self.handle_error(ctx, &req.proxy, e).await);
        }
        info!("reconciled");
        Ok(self.final_requeue(&req.proxy))
    }

    /// Requeue after a fully successful tick: resource override, then engine default.
    fn final_requeue(&self, proxy: &ProxyResource) -> RequeueDirective {
        match proxy.spec.requeue_interval_ms.filter(|ms| *ms > 0) {
            Some(ms) => RequeueDirective::after_millis(ms),
            None => self
                .config
                .requeue_interval()
                .map_or_else(RequeueDirective::none, RequeueDirective::after),
        }
    }

    /// Records the failure on the Ready condition and bundles it with any
    /// error hit while doing so.
    async fn handle_error(
        &self,
        ctx: &ReconcileContext,
        proxy: &ProxyResource,
        err: DomainError,
    ) -> DomainError {
        let message = self.scrubber.scrub_message(&err.to_string());
        let mut status = proxy.status.clone();
        if err.kind() == ErrorKind::Reference {
            status.set_ready_ref_resolver(message);
        } else {
            status.set_ready_failed(message);
        }

        let mut bundle = ErrorBundle::new();
        bundle.push(err);
        if let Err(patch_err) = self
            .deps
            .platform
            .patch_proxy_status(ctx, &proxy.key(), &status)
            .await
        {
            bundle.push(patch_err.context("error patching Ready condition"));
        }
        DomainError::Bundle(bundle)
    }

    async fn patch_status(&self, ctx: &ReconcileContext, proxy: &ProxyResource) -> DomainResult<()> {
        self.deps
            .platform
            .patch_proxy_status(ctx, &proxy.key(), &proxy.status)
            .await
            .context("error patching status")
    }

    fn convergence<'a>(
        &'a self,
        ctx: &'a ReconcileContext,
        proxy: &'a ProxyResource,
        pod: &'a PodTarget,
    ) -> Convergence<'a> {
        Convergence::new(ctx, proxy, pod.client.as_ref(), self.deps.resolver.as_ref())
            .with_diff_logging(self.config.log_proxy_diffs)
    }

    // ========================================================================
    // Phases
    // ========================================================================

    async fn run_phase(
        &self,
        phase: Phase,
        ctx: &ReconcileContext,
        req: &mut ReconcileRequest,
    ) -> DomainResult<RequeueDirective> {
        ctx.check()?;
        let deps = &self.deps;
        match phase {
            Phase::Finalizer => self.finalizer(ctx, req).await,
            Phase::Defaulting => self.defaulting(ctx, req).await,
            Phase::StatusInit => self.status_init(ctx, req).await,
            Phase::SuspendCheck => Ok(if req.proxy.spec.suspend {
                debug!("resource suspended");
                RequeueDirective::after_secs(SUSPEND_REQUEUE_SECS)
            } else {
                RequeueDirective::none()
            }),
            Phase::Secret => {
                platform_objects::reconcile_secrets(ctx, &req.proxy, deps.secrets.as_ref()).await
            }
            Phase::Tls => platform_objects::reconcile_tls(ctx, &req.proxy, deps.certs.as_ref()).await,
            Phase::Auth => auth::reconcile_auth(ctx, &req.proxy, deps.user_grants.as_ref()).await,
            Phase::ServiceAccount => {
                platform_objects::reconcile_service_account(ctx, &req.proxy, deps.rbac.as_ref())
                    .await
            }
            Phase::PlatformObjects => self.platform_objects(ctx, &req.proxy).await,
            Phase::PodReadinessGate => {
                platform_objects::ensure_stateful_set_ready(ctx, &req.proxy, deps.platform.as_ref())
                    .await
            }
            Phase::ClientSetup => self.client_setup(ctx, req).await,
            Phase::AdminBootstrap => {
                auth::reconcile_admin(
                    ctx,
                    &req.proxy,
                    req.clients()?,
                    deps.proxies.as_ref(),
                    deps.resolver.as_ref(),
                )
                .await
            }
            Phase::InitDetection => self.init_detection(ctx, req).await,
            Phase::ConfigSync => {
                reconcile_sync(ctx, &req.proxy, req.clients()?, deps.resolver.as_ref()).await
            }
            Phase::PrimaryElectionGate => self.primary_election_gate(ctx, req).await,
            Phase::ServersConvergence => self.converge_servers(ctx, req).await,
            Phase::MonitorConvergence => self.converge_monitor(ctx, req).await,
            Phase::MonitorState => self.monitor_state(ctx, req).await,
            Phase::ServicesConvergence => self.converge_services(ctx, req).await,
            Phase::ServiceState => self.service_state(ctx, req).await,
            Phase::ListenerState => self.listener_state(ctx, req).await,
            Phase::Connection => {
                platform_objects::reconcile_connection(
                    ctx,
                    &req.proxy,
                    deps.platform.as_ref(),
                    deps.builder.as_ref(),
                )
                .await
            }
            Phase::Metrics => {
                platform_objects::reconcile_metrics(
                    ctx,
                    &req.proxy,
                    deps.builder.as_ref(),
                    deps.objects.as_ref(),
                )
                .await
            }
        }
    }

    async fn finalizer(
        &self,
        ctx: &ReconcileContext,
        req: &mut ReconcileRequest,
    ) -> DomainResult<RequeueDirective> {
        let platform = self.deps.platform.as_ref();
        if !req.proxy.is_being_deleted() {
            finalizer::ensure_finalizer(ctx, &mut req.proxy, platform).await?;
            return Ok(RequeueDirective::none());
        }

        let bundle =
            finalizer::finalize(ctx, &mut req.proxy, platform, self.deps.sql.as_ref()).await?;
        if !bundle.is_empty() {
            warn!(errors = bundle.len(), "finalized with cleanup errors");
        }
        req.finalized = true;
        Ok(RequeueDirective::none())
    }

    async fn defaulting(
        &self,
        ctx: &ReconcileContext,
        req: &mut ReconcileRequest,
    ) -> DomainResult<RequeueDirective> {
        let database = match req.proxy.spec.database_ref.as_ref() {
            Some(reference) => Some(
                self.deps
                    .platform
                    .get_database(ctx, reference, req.proxy.namespace())
                    .await
                    .map_err(|e| match e.kind() {
                        ErrorKind::Cancelled => e,
                        _ => DomainError::InvalidReference(format!(
                            "error getting database '{}': {e}",
                            reference.name
                        )),
                    })?,
            ),
            None => None,
        };

        let before = req.proxy.spec.clone();
        req.proxy
            .set_defaults(&self.config.images, database.as_ref());
        if req.proxy.spec != before {
            self.deps
                .platform
                .patch_proxy(ctx, &req.proxy)
                .await
                .context("error patching defaults")?;
        }
        Ok(RequeueDirective::none())
    }

    async fn status_init(
        &self,
        ctx: &ReconcileContext,
        req: &mut ReconcileRequest,
    ) -> DomainResult<RequeueDirective> {
        let before = req.proxy.status.clone();
        req.proxy.status.replicas = req.proxy.spec.replicas;
        req.proxy.status.set_ready_initializing();
        if req.proxy.status != before {
            self.patch_status(ctx, &req.proxy).await?;
        }
        Ok(RequeueDirective::none())
    }

    async fn platform_objects(
        &self,
        ctx: &ReconcileContext,
        proxy: &ProxyResource,
    ) -> DomainResult<RequeueDirective> {
        let deps = &self.deps;
        let result = platform_objects::reconcile_stateful_set(
            ctx,
            proxy,
            deps.builder.as_ref(),
            deps.objects.as_ref(),
            deps.certs.as_ref(),
        )
        .await?;
        if !result.is_zero() {
            return Ok(result);
        }
        let result =
            platform_objects::reconcile_pdb(ctx, proxy, deps.platform.as_ref(), deps.builder.as_ref())
                .await?;
        if !result.is_zero() {
            return Ok(result);
        }
        platform_objects::reconcile_services(
            ctx,
            proxy,
            deps.platform.as_ref(),
            deps.builder.as_ref(),
            deps.objects.as_ref(),
        )
        .await
    }

    async fn client_setup(
        &self,
        ctx: &ReconcileContext,
        req: &mut ReconcileRequest,
    ) -> DomainResult<RequeueDirective> {
        let clients = setup_clients(
            ctx,
            &req.proxy,
            self.deps.platform.as_ref(),
            self.deps.proxies.as_ref(),
        )
        .await
        .context("error setting up clients")?;
        req.clients = Some(clients);
        Ok(RequeueDirective::none())
    }

    /// Pods missing servers or the monitor get both converged directly.
    async fn init_detection(
        &self,
        ctx: &ReconcileContext,
        req: &ReconcileRequest,
    ) -> DomainResult<RequeueDirective> {
        let proxy = &req.proxy;
        req.clients()?
            .for_each_pod(|pod| async move {
                if is_initialized(ctx, proxy, pod.client.as_ref()).await? {
                    return Ok(RequeueDirective::none());
                }
                info!(pod = %pod.name, "initializing proxy");
                let conv = self.convergence(ctx, proxy, &pod);
                conv.servers().await?;
                conv.monitor().await?;
                Ok(RequeueDirective::none())
            })
            .await
    }

    async fn primary_election_gate(
        &self,
        ctx: &ReconcileContext,
        req: &mut ReconcileRequest,
    ) -> DomainResult<RequeueDirective> {
        let servers = req
            .clients()?
            .primary()
            .client
            .servers()
            .list(ctx)
            .await
            .context("error listing servers")?;
        let servers: Vec<ServerStatus> = servers
            .into_iter()
            .map(|s| ServerStatus {
                name: s.id,
                state: s.state,
            })
            .collect();

        let before = req.proxy.status.clone();
        req.proxy.status.set_servers(servers);
        if req.proxy.status != before {
            self.patch_status(ctx, &req.proxy).await?;
        }

        let status = &req.proxy.status;
        let electing = status.servers.as_ref().is_some_and(|s| !s.is_empty())
            && status.primary_server.is_none();
        if electing {
            debug!("no primary server elected yet, requeuing");
            return Ok(RequeueDirective::after_secs(PRIMARY_ELECTION_REQUEUE_SECS));
        }
        Ok(RequeueDirective::none())
    }

    async fn converge_servers(
        &self,
        ctx: &ReconcileContext,
        req: &mut ReconcileRequest,
    ) -> DomainResult<RequeueDirective> {
        let gate = should_converge(
            &req.proxy.spec.servers,
            req.proxy.status.servers_spec.as_deref(),
        )?;
        if !gate.converge {
            debug!("servers unchanged");
            return Ok(RequeueDirective::none());
        }
        let primary = req.clients()?.primary();
        self.convergence(ctx, &req.proxy, primary).servers().await?;

        req.proxy.status.servers_spec = Some(gate.hash);
        self.patch_status(ctx, &req.proxy).await?;
        Ok(RequeueDirective::none())
    }

    async fn converge_monitor(
        &self,
        ctx: &ReconcileContext,
        req: &mut ReconcileRequest,
    ) -> DomainResult<RequeueDirective> {
        let gate = should_converge(
            &req.proxy.spec.monitor,
            req.proxy.status.monitor_spec.as_deref(),
        )?;
        if !gate.converge {
            debug!("monitor unchanged");
            return Ok(RequeueDirective::none());
        }
        let primary = req.clients()?.primary();
        self.convergence(ctx, &req.proxy, primary).monitor().await?;

        req.proxy.status.monitor_spec = Some(gate.hash);
        self.patch_status(ctx, &req.proxy).await?;
        Ok(RequeueDirective::none())
    }

    async fn converge_services(
        &self,
        ctx: &ReconcileContext,
        req: &mut ReconcileRequest,
    ) -> DomainResult<RequeueDirective> {
        let gate = should_converge(
            &req.proxy.spec.services,
            req.proxy.status.services_spec.as_deref(),
        )?;
        if !gate.converge {
            debug!("services unchanged");
            return Ok(RequeueDirective::none());
        }
        let primary = req.clients()?.primary();
        let conv = self.convergence(ctx, &req.proxy, primary);
        conv.services().await?;
        conv.listeners().await?;

        req.proxy.status.services_spec = Some(gate.hash);
        self.patch_status(ctx, &req.proxy).await?;
        Ok(RequeueDirective::none())
    }

    async fn monitor_state(
        &self,
        ctx: &ReconcileContext,
        req: &ReconcileRequest,
    ) -> DomainResult<RequeueDirective> {
        if !self.config.suspend_enabled {
            return Ok(RequeueDirective::none());
        }
        let proxy = &req.proxy;
        req.clients()?
            .for_each_pod(|pod| async move {
                self.convergence(ctx, proxy, &pod)
                    .update_monitor_state()
                    .await?;
                Ok(RequeueDirective::none())
            })
            .await
    }

    async fn service_state(
        &self,
        ctx: &ReconcileContext,
        req: &ReconcileRequest,
    ) -> DomainResult<RequeueDirective> {
        if !self.config.suspend_enabled {
            return Ok(RequeueDirective::none());
        }
        let proxy = &req.proxy;
        req.clients()?
            .for_each_pod(|pod| async move {
                let conv = self.convergence(ctx, proxy, &pod);
                for svc in &proxy.spec.services {
                    conv.update_service_state(svc).await?;
                }
                Ok(RequeueDirective::none())
            })
            .await
    }

    async fn listener_state(
        &self,
        ctx: &ReconcileContext,
        req: &ReconcileRequest,
    ) -> DomainResult<RequeueDirective> {
        if !self.config.suspend_enabled {
            return Ok(RequeueDirective::none());
        }
        let proxy = &req.proxy;
        req.clients()?
            .for_each_pod(|pod| async move {
                let conv = self.convergence(ctx, proxy, &pod);
                for listener in proxy.spec.listeners() {
                    conv.update_listener_state(&listener).await?;
                }
                Ok(RequeueDirective::none())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_names_are_unique_and_ordered() {
        let names: Vec<_> = Phase::ALL.iter().map(Phase::name).collect();
        let unique: std::collections::BTreeSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
        assert_eq!(names.first(), Some(&"finalizer"));
        assert_eq!(names.last(), Some(&"metrics"));

        let position = |p: Phase| Phase::ALL.iter().position(|x| *x == p);
        assert!(position(Phase::ClientSetup) < position(Phase::AdminBootstrap));
        assert!(position(Phase::ConfigSync) < position(Phase::ServersConvergence));
        assert!(position(Phase::ServersConvergence) < position(Phase::MonitorConvergence));
        assert!(position(Phase::MonitorConvergence) < position(Phase::ServicesConvergence));
    }

    #[test]
    fn test_final_requeue_precedence() {
        let deps = crate::adapters::memory::MemoryEnvironment::new().deps();
        let config = Config {
            requeue_interval_ms: 60_000,
            ..Config::default()
        };
        let orchestrator = PhaseOrchestrator::new(deps.clone(), config);

        let mut proxy = ProxyResource::new("ns", "proxy", Default::default());
        proxy.spec.requeue_interval_ms = Some(5_000);
        assert_eq!(
            orchestrator.final_requeue(&proxy),
            RequeueDirective::after_secs(5)
        );

        proxy.spec.requeue_interval_ms = None;
        assert_eq!(
            orchestrator.final_requeue(&proxy),
            RequeueDirective::after_secs(60)
        );

        let bare = PhaseOrchestrator::new(deps, Config::default());
        assert!(bare.final_requeue(&proxy).is_zero());
    }
}
