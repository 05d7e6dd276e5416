//! Config-sync coordination across proxy replicas.
//!
//! Convergence only ever writes to the primary pod; the proxy's own sync
//! mechanism propagates those writes through a table in the backing
//! database. This module enables that mechanism on every pod and holds the
//! tick back until every pod reports synced.

use std::time::Duration;

use tracing::{debug, info};

use crate::domain::errors::{DomainError, DomainResult, ResultExt};
use crate::domain::models::{ConfigSyncSettings, ProxyResource, ReconcileContext, RequeueDirective};
use crate::domain::ports::{ProxyClient, SecretResolver, SqlClientFactory};
use crate::services::pod_clients::PodClients;

/// True iff every declared server and the monitor already exist on the pod.
pub async fn is_initialized(
    ctx: &ReconcileContext,
    proxy: &ProxyResource,
    client: &dyn ProxyClient,
) -> DomainResult<bool> {
    let servers_exist = client
        .servers()
        .all_exists(ctx, &proxy.spec.server_ids())
        .await
        .context("error checking if all servers exist")?;
    if !servers_exist {
        return Ok(false);
    }
    client
        .monitors()
        .all_exists(ctx, &[proxy.spec.monitor.name()])
        .await
        .context("error checking if monitor exists")
}

/// Settings pushed to pods that are not synced yet.
pub async fn sync_settings(
    ctx: &ReconcileContext,
    proxy: &ProxyResource,
    resolver: &dyn SecretResolver,
) -> DomainResult<ConfigSyncSettings> {
    let sync = proxy
        .spec
        .config
        .sync
        .as_ref()
        .ok_or_else(|| DomainError::ValidationFailed("config sync is not configured".to_string()))?;
    let auth = &proxy.spec.auth;
    let user = auth
        .sync_username
        .clone()
        .ok_or_else(|| DomainError::ValidationFailed("sync username is not set".to_string()))?;
    let secret = auth
        .sync_password_secret_key_ref
        .as_ref()
        .ok_or_else(|| DomainError::ValidationFailed("sync password is not set".to_string()))?;
    let password = resolver
        .resolve(ctx, &secret.selector, proxy.namespace())
        .await
        .context("error getting sync password")?;

    Ok(ConfigSyncSettings {
        cluster: proxy.spec.monitor.name(),
        database: sync.database.clone(),
        user,
        password,
        interval: Duration::from_millis(sync.interval_ms),
        timeout: Duration::from_millis(sync.timeout_ms),
    })
}

/// Polls every pod in index order.
///
/// The first pod that is not synced gets sync enabled and `false` is
/// returned without looking at the remaining pods.
pub async fn ensure_synced(
    ctx: &ReconcileContext,
    proxy: &ProxyResource,
    clients: &PodClients,
    resolver: &dyn SecretResolver,
) -> DomainResult<bool> {
    for pod in clients.pods() {
        let synced = pod
            .client
            .config_sync()
            .is_synced(ctx)
            .await
            .context(format!("error checking config sync in Pod '{}'", pod.name))?;
        if synced {
            continue;
        }

        info!(pod = %pod.name, "setting up config sync");
        let settings = sync_settings(ctx, proxy, resolver).await?;
        pod.client
            .config_sync()
            .enable(ctx, &settings)
            .await
            .context(format!("error enabling config sync in Pod '{}'", pod.name))?;
        return Ok(false);
    }
    Ok(true)
}

/// Requeues after the sync interval until every pod is synced.
pub async fn reconcile_sync(
    ctx: &ReconcileContext,
    proxy: &ProxyResource,
    clients: &PodClients,
    resolver: &dyn SecretResolver,
) -> DomainResult<RequeueDirective> {
    let Some(sync) = proxy.spec.config.sync.as_ref().filter(|_| proxy.spec.is_ha_enabled()) else {
        return Ok(RequeueDirective::none());
    };
    if ensure_synced(ctx, proxy, clients, resolver).await? {
        return Ok(RequeueDirective::none());
    }
    debug!(interval_ms = sync.interval_ms, "config not synced, requeuing");
    Ok(RequeueDirective::after_millis(sync.interval_ms))
}

/// Drops the sync table on the database primary. A missing table is fine.
pub async fn drop_config_table(
    ctx: &ReconcileContext,
    proxy: &ProxyResource,
    sql_clients: &dyn SqlClientFactory,
) -> DomainResult<()> {
    let Some(sync) = proxy.spec.config.sync.as_ref() else {
        return Ok(());
    };
    let sql = sql_clients
        .primary_client(ctx, proxy)
        .await
        .context("error getting primary SQL client")?;

    match sql.drop_config_table(ctx, &sync.database).await {
        Err(e) if e.is_not_found() => {
            debug!(database = %sync.database, "config sync table already gone");
            Ok(())
        }
        result => result.context("error dropping config sync table"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{Failure, MemoryEnvironment};
    use crate::domain::models::{ProxySpec, ServerSpec};
    use crate::services::pod_clients::setup_clients;

    fn ha_proxy() -> ProxyResource {
        let mut proxy = ProxyResource::new(
            "ns",
            "proxy",
            ProxySpec {
                replicas: 3,
                servers: vec![ServerSpec::new("s0", "db-0")],
                ..ProxySpec::default()
            },
        );
        proxy.set_defaults(&crate::domain::models::ImagesConfig::default(), None);
        proxy
    }

    async fn clients(env: &MemoryEnvironment, proxy: &ProxyResource) -> PodClients {
        for pod in proxy.pod_names() {
            env.platform.set_pod_ready(proxy.namespace(), &pod, true);
        }
        setup_clients(
            &ReconcileContext::default(),
            proxy,
            env.platform.as_ref(),
            env.proxies.as_ref(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_two_of_three_synced_requeues_sync_interval() {
        let env = MemoryEnvironment::new();
        let proxy = ha_proxy();
        env.seed_secrets(&proxy);
        let clients = clients(&env, &proxy).await;

        env.proxies.pod("proxy-0").set_synced(true);
        env.proxies.pod("proxy-1").set_synced(true);
        env.proxies.pod("proxy-2").set_synced(false);

        let ctx = ReconcileContext::default();
        let result = reconcile_sync(&ctx, &proxy, &clients, env.platform.as_ref())
            .await
            .unwrap();

        assert_eq!(result, RequeueDirective::after_secs(5));
        let enabled = env.proxies.pod("proxy-2").sync_settings().unwrap();
        assert_eq!(enabled.database, "mysql");
        assert_eq!(enabled.user, "proxy-sync");
        assert!(env.proxies.pod("proxy-0").sync_settings().is_none());
    }

    #[tokio::test]
    async fn test_all_synced_continues() {
        let env = MemoryEnvironment::new();
        let proxy = ha_proxy();
        let clients = clients(&env, &proxy).await;
        for pod in proxy.pod_names() {
            env.proxies.pod(&pod).set_synced(true);
        }
        let ctx = ReconcileContext::default();
        let result = reconcile_sync(&ctx, &proxy, &clients, env.platform.as_ref())
            .await
            .unwrap();
        assert!(result.is_zero());
    }

    #[tokio::test]
    async fn test_is_initialized() {
        let env = MemoryEnvironment::new();
        let proxy = ha_proxy();
        let clients = clients(&env, &proxy).await;
        let ctx = ReconcileContext::default();
        let primary = clients.primary().client.clone();

        assert!(!is_initialized(&ctx, &proxy, primary.as_ref()).await.unwrap());

        let pod = env.proxies.pod("proxy-0");
        pod.insert_server("s0", "Running");
        assert!(!is_initialized(&ctx, &proxy, primary.as_ref()).await.unwrap());

        pod.insert_monitor(&proxy.spec.monitor.name());
        assert!(is_initialized(&ctx, &proxy, primary.as_ref()).await.unwrap());
    }

    #[tokio::test]
    async fn test_drop_missing_table_is_ok() {
        let env = MemoryEnvironment::new();
        let proxy = ha_proxy();
        env.sql.fail_drop_with(Failure::NotFound);

        let ctx = ReconcileContext::default();
        drop_config_table(&ctx, &proxy, env.sql.as_ref()).await.unwrap();

        env.sql.fail_drop_with(Failure::Hard);
        assert!(drop_config_table(&ctx, &proxy, env.sql.as_ref()).await.is_err());
    }
}
