//! Internal service accounts of the proxy.
//!
//! Two kinds of accounts are managed here: database users the proxy logs in
//! with (client, server, monitor, sync), delegated to a
//! [`UserGrantReconciler`], and REST API users on every proxy pod (the
//! engine's own admin and the metrics exporter's user).

use tracing::info;

use crate::domain::errors::{DomainResult, ResultExt};
use crate::domain::models::{
    AuthReconcileItem, DatabaseRef, GrantOpts, MonitorModule, ProxyResource, ReconcileContext,
    RequeueDirective, ResourceKey, SecretKeySelector, UserOpts,
};
use crate::domain::ports::{ProxyClientFactory, SecretResolver, UserGrantReconciler};
use crate::services::pod_clients::{PodClients, PodTarget};

/// Table config sync keeps its state in.
pub const CONFIG_SYNC_TABLE: &str = "maxscale_config";

const MONITOR_PRIVILEGES: &[&str] = &[
    "BINLOG ADMIN",
    "CONNECTION ADMIN",
    "EVENT",
    "PROCESS",
    "READ_ONLY ADMIN",
    "RELOAD",
    "REPLICA MONITOR",
    "REPLICATION CLIENT",
    "REPLICATION SLAVE ADMIN",
    "REPLICATION SLAVE",
    "SELECT",
    "SET USER",
    "SHOW DATABASES",
    "SLAVE MONITOR",
    "SUPER",
];

const MULTI_MASTER_MONITOR_PRIVILEGES: &[&str] = &["SLAVE MONITOR"];

fn privileges(list: &[&str]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

fn grant(
    key: ResourceKey,
    privileges: Vec<String>,
    database: &str,
    table: &str,
    username: &str,
    database_ref: &DatabaseRef,
) -> GrantOpts {
    GrantOpts {
        key,
        privileges,
        database: database.to_string(),
        table: table.to_string(),
        username: username.to_string(),
        host: "%".to_string(),
        grant_option: false,
        database_ref: database_ref.clone(),
    }
}

/// Grants of the monitor user, which depend on the monitor module.
pub fn monitor_grants(
    key: &ResourceKey,
    username: &str,
    module: MonitorModule,
    database_ref: &DatabaseRef,
) -> Vec<GrantOpts> {
    let list = match module {
        MonitorModule::Mariadbmon => MONITOR_PRIVILEGES,
        MonitorModule::Galeramon => MULTI_MASTER_MONITOR_PRIVILEGES,
    };
    vec![grant(
        key.clone(),
        privileges(list),
        "*",
        "*",
        username,
        database_ref,
    )]
}

/// Database users and grants the proxy needs, in reconciliation order.
///
/// Empty unless user generation is on and a database is referenced.
pub fn desired_auth_items(proxy: &ProxyResource) -> Vec<AuthReconcileItem> {
    let auth = &proxy.spec.auth;
    let Some(database_ref) = proxy.spec.database_ref.as_ref().filter(|_| auth.generate) else {
        return Vec::new();
    };
    let ns = proxy.namespace();
    let user = |name: &str, secret: &SecretKeySelector, max_connections: Option<u32>| UserOpts {
        name: name.to_string(),
        password_secret_key_ref: secret.clone(),
        max_user_connections: max_connections.unwrap_or_default(),
        database_ref: database_ref.clone(),
    };

    let client_key = ResourceKey::new(ns, &auth.client_username);
    let server_key = ResourceKey::new(ns, &auth.server_username);
    let monitor_key = ResourceKey::new(ns, &auth.monitor_username);

    let mut items = vec![
        AuthReconcileItem {
            user: user(
                &auth.client_username,
                &auth.client_password_secret_key_ref.selector,
                auth.client_max_connections,
            ),
            grants: vec![grant(
                client_key.clone(),
                privileges(&["SELECT", "INSERT", "UPDATE", "DELETE"]),
                "*",
                "*",
                &auth.client_username,
                database_ref,
            )],
            key: client_key,
        },
        AuthReconcileItem {
            user: user(
                &auth.server_username,
                &auth.server_password_secret_key_ref.selector,
                auth.server_max_connections,
            ),
            grants: vec![
                grant(
                    ResourceKey::new(ns, format!("{}-mysql", auth.server_username)),
                    privileges(&["SELECT"]),
                    "mysql",
                    "*",
                    &auth.server_username,
                    database_ref,
                ),
                grant(
                    ResourceKey::new(ns, format!("{}-databases", auth.server_username)),
                    privileges(&["SHOW DATABASES"]),
                    "*",
                    "*",
                    &auth.server_username,
                    database_ref,
                ),
            ],
            key: server_key,
        },
        AuthReconcileItem {
            user: user(
                &auth.monitor_username,
                &auth.monitor_password_secret_key_ref.selector,
                auth.monitor_max_connections,
            ),
            grants: monitor_grants(
                &monitor_key,
                &auth.monitor_username,
                proxy.spec.monitor.module,
                database_ref,
            ),
            key: monitor_key,
        },
    ];

    if let (Some(sync), Some(username), Some(secret), Some(max_connections)) = (
        proxy.spec.config.sync.as_ref(),
        auth.sync_username.as_ref(),
        auth.sync_password_secret_key_ref.as_ref(),
        auth.sync_max_connections,
    ) {
        let sync_key = ResourceKey::new(ns, username);
        items.push(AuthReconcileItem {
            user: user(username, &secret.selector, Some(max_connections)),
            grants: vec![grant(
                sync_key.clone(),
                privileges(&["SELECT", "INSERT", "UPDATE", "CREATE", "DROP"]),
                &sync.database,
                CONFIG_SYNC_TABLE,
                username,
                database_ref,
            )],
            key: sync_key,
        });
    }

    items
}

/// Delegates every item in order; a requeue aborts the remaining items.
pub async fn reconcile_auth(
    ctx: &ReconcileContext,
    proxy: &ProxyResource,
    user_grants: &dyn UserGrantReconciler,
) -> DomainResult<RequeueDirective> {
    let owner = proxy.key();
    for item in desired_auth_items(proxy) {
        let result = user_grants
            .reconcile_user_grant(ctx, &owner, &item)
            .await
            .context(format!("error reconciling {} user auth", item.key.name))?;
        if !result.is_zero() {
            return Ok(result);
        }
    }
    Ok(RequeueDirective::none())
}

// ============================================================================
// REST API users
// ============================================================================

/// Ensures the engine's admin exists on every pod, then the metrics user.
pub async fn reconcile_admin(
    ctx: &ReconcileContext,
    proxy: &ProxyResource,
    clients: &PodClients,
    factory: &dyn ProxyClientFactory,
    resolver: &dyn SecretResolver,
) -> DomainResult<RequeueDirective> {
    let result = clients
        .for_each_pod(|pod| async move {
            reconcile_admin_in_pod(ctx, proxy, &pod, factory, resolver)
                .await
                .context("error reconciling API admin")?;
            Ok(RequeueDirective::none())
        })
        .await?;
    if !result.is_zero() {
        return Ok(result);
    }
    reconcile_metrics_admin(ctx, proxy, clients, resolver).await
}

async fn reconcile_admin_in_pod(
    ctx: &ReconcileContext,
    proxy: &ProxyResource,
    pod: &PodTarget,
    factory: &dyn ProxyClientFactory,
    resolver: &dyn SecretResolver,
) -> DomainResult<()> {
    let auth = &proxy.spec.auth;
    match pod.client.users().get(ctx, &auth.admin_username).await {
        Ok(_) => return Ok(()),
        Err(e) if e.is_unauthorized() || e.is_not_found() => {}
        Err(e) => return Err(e.context("error getting admin user")),
    }
    info!(pod = %pod.name, "configuring admin");

    let default_client = factory
        .default_client_for_pod(ctx, proxy, pod.index)
        .await
        .context("error getting default admin client")?;
    let password = resolver
        .resolve(
            ctx,
            &auth.admin_password_secret_key_ref.selector,
            proxy.namespace(),
        )
        .await
        .context("error getting admin password")?;
    default_client
        .users()
        .create(ctx, &auth.admin_username, &password)
        .await
        .context("error creating admin")?;

    if auth.delete_default_admin.unwrap_or(false) {
        default_client
            .users()
            .delete_default_admin(ctx)
            .await
            .context("error deleting default admin")?;
    }
    Ok(())
}

/// Creates the metrics user on pods missing it and refreshes its password
/// on the primary.
pub async fn reconcile_metrics_admin(
    ctx: &ReconcileContext,
    proxy: &ProxyResource,
    clients: &PodClients,
    resolver: &dyn SecretResolver,
) -> DomainResult<RequeueDirective> {
    if !proxy.spec.metrics_enabled() {
        return Ok(RequeueDirective::none());
    }
    let auth = &proxy.spec.auth;
    let secret = &auth.metrics_password_secret_key_ref.selector;

    let result = clients
        .for_each_pod(|pod| async move {
            if pod.client.users().get(ctx, &auth.metrics_username).await.is_ok() {
                return Ok(RequeueDirective::none());
            }
            let password = resolver
                .resolve(ctx, secret, proxy.namespace())
                .await
                .context("error getting metrics admin password")?;
            pod.client
                .users()
                .create(ctx, &auth.metrics_username, &password)
                .await
                .context("error creating metrics admin")?;
            Ok(RequeueDirective::none())
        })
        .await?;
    if !result.is_zero() {
        return Ok(result);
    }

    let primary = clients.primary();
    if primary.client.users().get(ctx, &auth.metrics_username).await.is_ok() {
        let password = resolver
            .resolve(ctx, secret, proxy.namespace())
            .await
            .context("error getting password")?;
        primary
            .client
            .users()
            .patch_password(ctx, &auth.metrics_username, &password)
            .await
            .context("error patching metrics admin")?;
    }
    Ok(RequeueDirective::none())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::adapters::memory::MemoryEnvironment;
    use crate::domain::models::{ImagesConfig, MetricsSpec, ProxySpec};
    use crate::services::pod_clients::setup_clients;

    fn proxy(replicas: u32, module: MonitorModule) -> ProxyResource {
        let mut spec = ProxySpec {
            replicas,
            database_ref: Some(DatabaseRef {
                name: "mariadb".to_string(),
                namespace: None,
            }),
            ..ProxySpec::default()
        };
        spec.monitor.module = module;
        let mut proxy = ProxyResource::new("ns", "proxy", spec);
        proxy.set_defaults(&ImagesConfig::default(), None);
        proxy
    }

    fn grant_set(grants: &[GrantOpts]) -> BTreeSet<String> {
        grants
            .iter()
            .flat_map(|g| g.privileges.iter().cloned())
            .collect()
    }

    #[test]
    fn test_items_single_replica() {
        let items = desired_auth_items(&proxy(1, MonitorModule::Mariadbmon));
        let keys: Vec<_> = items.iter().map(|i| i.key.name.as_str()).collect();
        assert_eq!(keys, vec!["proxy-client", "proxy-server", "proxy-monitor"]);

        let client = &items[0];
        assert_eq!(client.user.max_user_connections, 30);
        assert_eq!(client.grants[0].database, "*");
        assert_eq!(client.grants[0].host, "%");
        assert!(!client.grants[0].grant_option);

        let server_keys: Vec<_> = items[1].grants.iter().map(|g| g.key.name.as_str()).collect();
        assert_eq!(server_keys, vec!["proxy-server-mysql", "proxy-server-databases"]);
        assert_eq!(items[1].grants[0].database, "mysql");
    }

    #[test]
    fn test_items_with_sync() {
        let items = desired_auth_items(&proxy(3, MonitorModule::Mariadbmon));
        assert_eq!(items.len(), 4);
        let sync = &items[3];
        assert_eq!(sync.key.name, "proxy-sync");
        assert_eq!(sync.user.max_user_connections, 90);
        assert_eq!(sync.grants[0].database, "mysql");
        assert_eq!(sync.grants[0].table, CONFIG_SYNC_TABLE);
        assert!(sync.grants[0].has_privilege("DROP"));
    }

    #[test]
    fn test_no_items_without_generate_or_database() {
        let mut p = proxy(1, MonitorModule::Mariadbmon);
        p.spec.auth.generate = false;
        assert!(desired_auth_items(&p).is_empty());

        let mut p = proxy(1, MonitorModule::Mariadbmon);
        p.spec.database_ref = None;
        assert!(desired_auth_items(&p).is_empty());
    }

    #[test]
    fn test_monitor_grants_native_superset_of_multi_master() {
        let db = DatabaseRef {
            name: "db".to_string(),
            namespace: None,
        };
        let key = ResourceKey::new("ns", "mon");
        let native = grant_set(&monitor_grants(&key, "mon", MonitorModule::Mariadbmon, &db));
        let multi = grant_set(&monitor_grants(&key, "mon", MonitorModule::Galeramon, &db));

        assert!(native.is_superset(&multi));
        assert!(native.len() > multi.len());
        assert!(native.contains("REPLICA MONITOR"));
        assert!(native.contains("SUPER"));
        assert_eq!(multi, BTreeSet::from(["SLAVE MONITOR".to_string()]));
    }

    #[tokio::test]
    async fn test_reconcile_auth_stops_on_requeue() {
        let env = MemoryEnvironment::new();
        let proxy = proxy(1, MonitorModule::Mariadbmon);
        env.user_grants.requeue_for("proxy-server");

        let ctx = ReconcileContext::default();
        let result = reconcile_auth(&ctx, &proxy, env.user_grants.as_ref())
            .await
            .unwrap();

        assert!(!result.is_zero());
        assert_eq!(env.user_grants.reconciled(), vec!["proxy-client", "proxy-server"]);
    }

    #[tokio::test]
    async fn test_admin_bootstrap_through_default_client() {
        let env = MemoryEnvironment::new();
        let mut proxy = proxy(2, MonitorModule::Mariadbmon);
        proxy.spec.metrics = Some(MetricsSpec {
            enabled: true,
            ..MetricsSpec::default()
        });
        proxy.set_defaults(&ImagesConfig::default(), None);
        env.seed_secrets(&proxy);
        for pod in proxy.pod_names() {
            env.platform.set_pod_ready("ns", &pod, true);
        }

        let ctx = ReconcileContext::default();
        let clients = setup_clients(&ctx, &proxy, env.platform.as_ref(), env.proxies.as_ref())
            .await
            .unwrap();
        let result = reconcile_admin(
            &ctx,
            &proxy,
            &clients,
            env.proxies.as_ref(),
            env.platform.as_ref(),
        )
        .await
        .unwrap();
        assert!(result.is_zero());

        for pod in proxy.pod_names() {
            let pod = env.proxies.pod(&pod);
            assert!(pod.has_user("sqlproxy-operator"));
            assert!(pod.has_user("metrics"));
            assert!(!pod.has_default_admin());
        }

        // Second pass finds the admin and only refreshes the metrics password.
        let before = env.proxies.pod("proxy-1").calls().len();
        reconcile_admin(
            &ctx,
            &proxy,
            &clients,
            env.proxies.as_ref(),
            env.platform.as_ref(),
        )
        .await
        .unwrap();
        let calls = env.proxies.pod("proxy-1").calls();
        assert!(calls[before..].iter().all(|c| !c.starts_with("users.create")));
        assert!(env
            .proxies
            .pod("proxy-0")
            .calls()
            .iter()
            .any(|c| c == "users.patch_password metrics"));
    }
}
