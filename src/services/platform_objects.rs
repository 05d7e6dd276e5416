//! Native platform objects owned by a proxy resource.

use std::collections::BTreeMap;

use tracing::debug;

use crate::domain::errors::{DomainResult, ResultExt};
use crate::domain::models::{
    ConnectionOpts, GeneratedSecretKeyRef, IntOrString, ObjectKind, PasswordRequest, PdbOpts,
    ProxyResource, ReconcileContext, RequeueDirective, ResourceKey, SecretRequest, ServiceOpts,
    ServicePort, StatefulSetOpts,
};
use crate::domain::ports::{
    CertReconciler, ObjectBuilder, ObjectReconciler, PlatformApi, RbacReconciler,
    SecretReconciler,
};
use crate::services::pod_clients::first_ready_pod;
use crate::services::proxy_config::render_proxy_config;

pub const SECRET_NOT_READY_REQUEUE_SECS: u64 = 1;
pub const POD_NOT_READY_REQUEUE_SECS: u64 = 3;

// ============================================================================
// Secrets
// ============================================================================

/// Password secrets the proxy needs, in a stable order.
pub fn password_secret_refs(proxy: &ProxyResource) -> Vec<&GeneratedSecretKeyRef> {
    let auth = &proxy.spec.auth;
    let mut refs = vec![
        &auth.admin_password_secret_key_ref,
        &auth.client_password_secret_key_ref,
        &auth.server_password_secret_key_ref,
        &auth.monitor_password_secret_key_ref,
    ];
    if let Some(sync) = auth.sync_password_secret_key_ref.as_ref() {
        refs.push(sync);
    }
    if proxy.spec.metrics_enabled() {
        refs.push(&auth.metrics_password_secret_key_ref);
    }
    refs
}

/// Reconciles the config Secret and every password Secret.
///
/// Requeues shortly when a password reference has not been defaulted yet.
pub async fn reconcile_secrets(
    ctx: &ReconcileContext,
    proxy: &ProxyResource,
    secrets: &dyn SecretReconciler,
) -> DomainResult<RequeueDirective> {
    let config_ref = proxy.config_secret_key_ref();
    let config = render_proxy_config(proxy).context("error getting proxy config")?;
    let request = SecretRequest {
        key: ResourceKey::new(proxy.namespace(), &config_ref.name),
        data: BTreeMap::from([(config_ref.key.clone(), config)]),
    };
    secrets
        .reconcile(ctx, &request)
        .await
        .context("error reconciling config Secret")?;

    for secret in password_secret_refs(proxy) {
        if !secret.selector.is_initialized() {
            debug!(
                secret_name = %secret.selector.name,
                secret_key = %secret.selector.key,
                "secret not initialized, requeuing"
            );
            return Ok(RequeueDirective::after_secs(SECRET_NOT_READY_REQUEUE_SECS));
        }
        let request = PasswordRequest {
            key: ResourceKey::new(proxy.namespace(), &secret.selector.name),
            secret_key: secret.selector.key.clone(),
            generate: secret.generate,
        };
        secrets
            .reconcile_password(ctx, &request)
            .await
            .context("error reconciling password")?;
    }
    Ok(RequeueDirective::none())
}

pub async fn reconcile_tls(
    ctx: &ReconcileContext,
    proxy: &ProxyResource,
    certs: &dyn CertReconciler,
) -> DomainResult<RequeueDirective> {
    if !proxy.spec.tls_enabled() {
        return Ok(RequeueDirective::none());
    }
    certs
        .reconcile(ctx, proxy)
        .await
        .context("error reconciling TLS")
}

pub async fn reconcile_service_account(
    ctx: &ReconcileContext,
    proxy: &ProxyResource,
    rbac: &dyn RbacReconciler,
) -> DomainResult<RequeueDirective> {
    rbac.reconcile_service_account(ctx, &proxy.service_account_key(), &proxy.key())
        .await
        .context("error reconciling ServiceAccount")?;
    Ok(RequeueDirective::none())
}

// ============================================================================
// Workload
// ============================================================================

pub async fn reconcile_stateful_set(
    ctx: &ReconcileContext,
    proxy: &ProxyResource,
    builder: &dyn ObjectBuilder,
    objects: &dyn ObjectReconciler,
    certs: &dyn CertReconciler,
) -> DomainResult<RequeueDirective> {
    let pod_annotations = if proxy.spec.tls_enabled() {
        certs
            .pod_annotations(ctx, proxy)
            .await
            .context("error getting TLS annotations")?
    } else {
        BTreeMap::new()
    };
    let opts = StatefulSetOpts {
        key: proxy.key(),
        replicas: proxy.spec.replicas,
        image: proxy.spec.image.clone().unwrap_or_default(),
        service_account: proxy.service_account_key().name,
        config_secret: proxy.config_secret_key_ref(),
        pod_annotations,
        selector_labels: proxy.selector_labels(),
    };
    let desired = builder
        .build_stateful_set(&opts)
        .context("error building StatefulSet")?;
    objects
        .reconcile(ctx, &desired)
        .await
        .context("error reconciling StatefulSet")?;
    Ok(RequeueDirective::none())
}

/// The disruption budget a proxy should have, if any.
///
/// An explicit budget always wins; otherwise multi-replica proxies get
/// `minAvailable: 50%` and single replicas get none.
pub fn pdb_decision(proxy: &ProxyResource) -> Option<PdbOpts> {
    let key = proxy.key();
    let labels = proxy.selector_labels();
    if let Some(pdb) = proxy.spec.pod_disruption_budget.as_ref() {
        return Some(PdbOpts::from_spec(key, pdb, labels));
    }
    (proxy.spec.replicas > 1).then(|| PdbOpts {
        key,
        min_available: Some(IntOrString::String("50%".to_string())),
        max_unavailable: None,
        selector_labels: labels,
    })
}

/// Creates the disruption budget if absent; an existing one is left alone.
pub async fn reconcile_pdb(
    ctx: &ReconcileContext,
    proxy: &ProxyResource,
    platform: &dyn PlatformApi,
    builder: &dyn ObjectBuilder,
) -> DomainResult<RequeueDirective> {
    let Some(opts) = pdb_decision(proxy) else {
        return Ok(RequeueDirective::none());
    };
    if platform
        .object_exists(ctx, ObjectKind::PodDisruptionBudget, &opts.key)
        .await?
    {
        return Ok(RequeueDirective::none());
    }
    let desired = builder
        .build_pod_disruption_budget(&opts)
        .context("error building PodDisruptionBudget")?;
    platform
        .create_object(ctx, &desired)
        .await
        .context("error creating PodDisruptionBudget")?;
    Ok(RequeueDirective::none())
}

fn admin_port(proxy: &ProxyResource) -> ServicePort {
    ServicePort::new("admin", proxy.spec.admin.port)
}

/// Internal headless Service, client Service and GUI Service.
pub async fn reconcile_services(
    ctx: &ReconcileContext,
    proxy: &ProxyResource,
    platform: &dyn PlatformApi,
    builder: &dyn ObjectBuilder,
    objects: &dyn ObjectReconciler,
) -> DomainResult<RequeueDirective> {
    let internal = ServiceOpts {
        key: proxy.internal_service_key(),
        headless: true,
        ports: Vec::new(),
        selector_labels: proxy.selector_labels(),
    };
    let desired = builder
        .build_service(&internal)
        .context("error building internal Service")?;
    objects.reconcile(ctx, &desired).await?;

    let mut ports = vec![admin_port(proxy)];
    ports.extend(
        proxy
            .spec
            .listeners()
            .into_iter()
            .map(|l| ServicePort::new(l.name.unwrap_or_default(), l.port)),
    );
    let client = ServiceOpts {
        key: proxy.key(),
        headless: false,
        ports,
        selector_labels: proxy.selector_labels(),
    };
    let desired = builder
        .build_service(&client)
        .context("error building Service")?;
    objects.reconcile(ctx, &desired).await?;

    reconcile_gui_service(ctx, proxy, platform, builder, objects).await
}

/// The GUI keeps per-pod session state, so its Service pins one ready pod.
async fn reconcile_gui_service(
    ctx: &ReconcileContext,
    proxy: &ProxyResource,
    platform: &dyn PlatformApi,
    builder: &dyn ObjectBuilder,
    objects: &dyn ObjectReconciler,
) -> DomainResult<RequeueDirective> {
    if !proxy.spec.admin.gui_enabled {
        return Ok(RequeueDirective::none());
    }
    let Some(index) = first_ready_pod(ctx, proxy, platform).await? else {
        debug!("no ready pod for GUI Service, requeuing");
        return Ok(RequeueDirective::after_secs(POD_NOT_READY_REQUEUE_SECS));
    };
    let gui = ServiceOpts {
        key: proxy.gui_service_key(),
        headless: false,
        ports: vec![admin_port(proxy)],
        selector_labels: proxy.pod_selector_labels(index),
    };
    let desired = builder
        .build_service(&gui)
        .context("error building GUI Service")?;
    objects.reconcile(ctx, &desired).await?;
    Ok(RequeueDirective::none())
}

/// Requeues until every replica of the StatefulSet is ready.
pub async fn ensure_stateful_set_ready(
    ctx: &ReconcileContext,
    proxy: &ProxyResource,
    platform: &dyn PlatformApi,
) -> DomainResult<RequeueDirective> {
    let status = platform.stateful_set_status(ctx, &proxy.key()).await?;
    if status.ready_replicas == status.replicas && status.ready_replicas == proxy.spec.replicas {
        return Ok(RequeueDirective::none());
    }
    debug!(
        ready = status.ready_replicas,
        replicas = status.replicas,
        "StatefulSet not ready, requeuing"
    );
    Ok(RequeueDirective::after_secs(POD_NOT_READY_REQUEUE_SECS))
}

// ============================================================================
// Extras
// ============================================================================

/// Publishes a Connection for applications, once.
pub async fn reconcile_connection(
    ctx: &ReconcileContext,
    proxy: &ProxyResource,
    platform: &dyn PlatformApi,
    builder: &dyn ObjectBuilder,
) -> DomainResult<RequeueDirective> {
    let Some(template) = proxy.spec.connection.as_ref() else {
        return Ok(RequeueDirective::none());
    };
    let key = proxy.connection_key();
    if platform
        .object_exists(ctx, ObjectKind::Connection, &key)
        .await?
    {
        return Ok(RequeueDirective::none());
    }
    let auth = &proxy.spec.auth;
    let opts = ConnectionOpts {
        key,
        username: auth.client_username.clone(),
        password_secret_key_ref: auth.client_password_secret_key_ref.selector.clone(),
        service_name: proxy.name().to_string(),
        template: template.clone(),
    };
    let desired = builder
        .build_connection(&opts)
        .context("error building Connection")?;
    platform.create_object(ctx, &desired).await?;
    Ok(RequeueDirective::none())
}

/// Exporter Deployment and Service.
pub async fn reconcile_metrics(
    ctx: &ReconcileContext,
    proxy: &ProxyResource,
    builder: &dyn ObjectBuilder,
    objects: &dyn ObjectReconciler,
) -> DomainResult<RequeueDirective> {
    let Some(metrics) = proxy.spec.metrics.as_ref().filter(|m| m.enabled) else {
        return Ok(RequeueDirective::none());
    };
    let deployment = builder
        .build_exporter_deployment(proxy)
        .context("error building exporter Deployment")?;
    objects
        .reconcile(ctx, &deployment)
        .await
        .context("error reconciling exporter Deployment")?;

    let key = proxy.metrics_key();
    let mut selector_labels = proxy.selector_labels();
    selector_labels.insert("app.kubernetes.io/component".to_string(), "exporter".to_string());
    let service = ServiceOpts {
        key,
        headless: false,
        ports: vec![ServicePort::new("metrics", metrics.exporter_port)],
        selector_labels,
    };
    let desired = builder
        .build_service(&service)
        .context("error building exporter Service")?;
    objects
        .reconcile(ctx, &desired)
        .await
        .context("error reconciling exporter Service")?;
    Ok(RequeueDirective::none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryEnvironment;
    use crate::domain::models::{ImagesConfig, PodDisruptionBudgetSpec, ProxySpec};

    fn proxy(replicas: u32) -> ProxyResource {
        let mut proxy = ProxyResource::new(
            "ns",
            "proxy",
            ProxySpec {
                replicas,
                ..ProxySpec::default()
            },
        );
        proxy.set_defaults(&ImagesConfig::default(), None);
        proxy
    }

    #[test]
    fn test_pdb_single_replica_none() {
        assert!(pdb_decision(&proxy(1)).is_none());
    }

    #[test]
    fn test_pdb_multi_replica_half() {
        let opts = pdb_decision(&proxy(3)).unwrap();
        assert_eq!(opts.min_available, Some(IntOrString::String("50%".to_string())));
        assert!(opts.max_unavailable.is_none());
    }

    #[test]
    fn test_pdb_explicit_wins() {
        let mut p = proxy(1);
        p.spec.pod_disruption_budget = Some(PodDisruptionBudgetSpec {
            min_available: None,
            max_unavailable: Some(IntOrString::Int(1)),
        });
        let opts = pdb_decision(&p).unwrap();
        assert_eq!(opts.max_unavailable, Some(IntOrString::Int(1)));
        assert!(opts.min_available.is_none());
    }

    #[tokio::test]
    async fn test_pdb_created_once() {
        let env = MemoryEnvironment::new();
        let p = proxy(3);
        let ctx = ReconcileContext::default();

        reconcile_pdb(&ctx, &p, env.platform.as_ref(), env.builder.as_ref())
            .await
            .unwrap();
        reconcile_pdb(&ctx, &p, env.platform.as_ref(), env.builder.as_ref())
            .await
            .unwrap();

        assert!(env.platform.has_object(ObjectKind::PodDisruptionBudget, &p.key()));
        assert_eq!(env.platform.created_count(ObjectKind::PodDisruptionBudget), 1);
    }

    #[tokio::test]
    async fn test_uninitialized_secret_requeues() {
        let env = MemoryEnvironment::new();
        let p = ProxyResource::new("ns", "proxy", ProxySpec::default());
        let ctx = ReconcileContext::default();

        let result = reconcile_secrets(&ctx, &p, env.platform.as_ref()).await.unwrap();
        assert_eq!(result, RequeueDirective::after_secs(1));
    }

    #[tokio::test]
    async fn test_secrets_generated() {
        let env = MemoryEnvironment::new();
        let p = proxy(3);
        let ctx = ReconcileContext::default();

        let result = reconcile_secrets(&ctx, &p, env.platform.as_ref()).await.unwrap();
        assert!(result.is_zero());
        for name in ["proxy-admin", "proxy-client", "proxy-server", "proxy-monitor", "proxy-sync"] {
            assert!(env.platform.secret_value("ns", name, "password").is_some(), "{name}");
        }
        let config = env.platform.secret_value("ns", "proxy-config", "proxy.cnf").unwrap();
        assert!(config.starts_with("[maxscale]"));
    }

    #[tokio::test]
    async fn test_gui_service_waits_for_ready_pod() {
        let env = MemoryEnvironment::new();
        let p = proxy(2);
        let ctx = ReconcileContext::default();
        let run = || {
            reconcile_services(
                &ctx,
                &p,
                env.platform.as_ref(),
                env.builder.as_ref(),
                env.platform.as_ref(),
            )
        };

        assert_eq!(run().await.unwrap(), RequeueDirective::after_secs(3));
        assert!(env.platform.has_object(ObjectKind::Service, &p.internal_service_key()));
        assert!(!env.platform.has_object(ObjectKind::Service, &p.gui_service_key()));

        env.platform.set_pod_ready("ns", "proxy-1", true);
        assert!(run().await.unwrap().is_zero());
        let gui = env.platform.object(ObjectKind::Service, &p.gui_service_key()).unwrap();
        assert_eq!(
            gui.labels.get("statefulset.kubernetes.io/pod-name").map(String::as_str),
            Some("proxy-1")
        );
    }

    #[tokio::test]
    async fn test_stateful_set_ready_gate() {
        let env = MemoryEnvironment::new();
        let p = proxy(2);
        let ctx = ReconcileContext::default();

        reconcile_stateful_set(
            &ctx,
            &p,
            env.builder.as_ref(),
            env.platform.as_ref(),
            env.certs.as_ref(),
        )
        .await
        .unwrap();
        env.platform.set_pod_ready("ns", "proxy-0", true);
        let result = ensure_stateful_set_ready(&ctx, &p, env.platform.as_ref())
            .await
            .unwrap();
        assert_eq!(result, RequeueDirective::after_secs(3));

        env.platform.set_pod_ready("ns", "proxy-1", true);
        let result = ensure_stateful_set_ready(&ctx, &p, env.platform.as_ref())
            .await
            .unwrap();
        assert!(result.is_zero());
    }
}
