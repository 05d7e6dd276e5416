//! Implementation of the `plan` command.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::{Deserialize, Serialize};

use super::{load_config, read_yaml};
use crate::cli::output::{list_table, output, render_list, truncate, CommandOutput};
use crate::domain::models::{
    diff, AuthReconcileItem, DatabaseInfo, DiffResult, ImagesConfig, Index, ListenerSpec,
    MonitorSpec, PdbOpts, ProxyResource, ResourceKey, ServerSpec, ServiceSpec,
};
use crate::services::auth::desired_auth_items;
use crate::services::platform_objects::pdb_decision;

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Proxy resource manifest (YAML)
    #[arg(long)]
    pub resource: PathBuf,

    /// Referenced database description (YAML)
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Object ids currently present on the proxy (YAML)
    #[arg(long)]
    pub observed: Option<PathBuf>,

    /// Configuration file instead of the `.sqlproxy/` hierarchy
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Object ids live on a proxy pod.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservedIds {
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub listeners: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PlanDiff {
    pub servers: DiffResult,
    pub services: DiffResult,
    pub listeners: DiffResult,
}

#[derive(Debug, Serialize)]
pub struct PlanOutput {
    pub resource: ResourceKey,
    pub replicas: u32,
    pub ha_enabled: bool,
    pub servers: Vec<ServerSpec>,
    pub monitor: MonitorSpec,
    pub services: Vec<ServiceSpec>,
    pub listeners: Vec<ListenerSpec>,
    pub pod_disruption_budget: Option<PdbOpts>,
    pub auth: Vec<AuthReconcileItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<PlanDiff>,
}

fn ids_index(ids: &[String]) -> Index<String> {
    Index::new(ids.iter().cloned(), String::clone)
}

/// Defaults `proxy` and describes everything the engine would converge.
pub fn build_plan(
    mut proxy: ProxyResource,
    images: &ImagesConfig,
    database: Option<&DatabaseInfo>,
    observed: Option<&ObservedIds>,
) -> PlanOutput {
    proxy.set_defaults(images, database);
    let spec = &proxy.spec;

    let diff = observed.map(|observed| PlanDiff {
        servers: diff(&spec.server_index(), &ids_index(&observed.servers)),
        services: diff(&spec.service_index(), &ids_index(&observed.services)),
        listeners: diff(&spec.listener_index(), &ids_index(&observed.listeners)),
    });

    PlanOutput {
        resource: proxy.key(),
        replicas: spec.replicas,
        ha_enabled: spec.is_ha_enabled(),
        servers: spec.server_index().values().cloned().collect(),
        monitor: spec.monitor.clone(),
        services: spec.service_index().values().cloned().collect(),
        listeners: spec.listener_index().values().cloned().collect(),
        pod_disruption_budget: pdb_decision(&proxy),
        auth: desired_auth_items(&proxy),
        diff,
    }
}

impl CommandOutput for PlanOutput {
    fn to_human(&self) -> String {
        let mut sections = vec![format!(
            "Resource {} ({} replica{}, HA {})",
            self.resource,
            self.replicas,
            if self.replicas == 1 { "" } else { "s" },
            if self.ha_enabled { "on" } else { "off" },
        )];

        let mut servers = list_table(&["name", "address", "port", "protocol", "maintenance"]);
        for srv in &self.servers {
            servers.add_row(vec![
                srv.name.clone(),
                truncate(&srv.address, 60),
                srv.port.to_string(),
                srv.protocol.clone(),
                srv.maintenance.to_string(),
            ]);
        }
        sections.push(render_list("server", &servers, self.servers.len()));

        sections.push(format!(
            "Monitor {} ({}, every {}ms)",
            self.monitor.name(),
            self.monitor.module,
            self.monitor.interval_ms
        ));

        let mut services = list_table(&["name", "router", "listener", "port"]);
        for svc in &self.services {
            services.add_row(vec![
                svc.name.clone(),
                svc.router.as_str().to_string(),
                svc.listener_name(),
                svc.listener.port.to_string(),
            ]);
        }
        sections.push(render_list("service", &services, self.services.len()));

        sections.push(match &self.pod_disruption_budget {
            Some(pdb) => format!(
                "PodDisruptionBudget {}: min_available={} max_unavailable={}",
                pdb.key,
                pdb.min_available.as_ref().map_or_else(|| "-".to_string(), ToString::to_string),
                pdb.max_unavailable.as_ref().map_or_else(|| "-".to_string(), ToString::to_string),
            ),
            None => "No PodDisruptionBudget.".to_string(),
        });

        let mut auth = list_table(&["user", "max connections", "grants"]);
        for item in &self.auth {
            let grants: Vec<String> = item
                .grants
                .iter()
                .map(|g| format!("{} ON {}.{}", g.privileges.join(","), g.database, g.table))
                .collect();
            auth.add_row(vec![
                item.user.name.clone(),
                item.user.max_user_connections.to_string(),
                grants.join("; "),
            ]);
        }
        sections.push(render_list("user", &auth, self.auth.len()));

        if let Some(diff) = &self.diff {
            let mut table = list_table(&["kind", "added", "deleted", "unchanged"]);
            for (kind, result) in [
                ("servers", &diff.servers),
                ("services", &diff.services),
                ("listeners", &diff.listeners),
            ] {
                table.add_row(vec![
                    kind.to_string(),
                    result.added.join(", "),
                    result.deleted.join(", "),
                    result.rest.join(", "),
                ]);
            }
            sections.push(format!("Diff against observed state:\n{table}"));
        }

        sections.join("\n\n")
    }
}

pub async fn execute(args: PlanArgs, json_mode: bool) -> Result<()> {
    let config = load_config(args.config.as_ref())?;
    let proxy: ProxyResource = read_yaml(&args.resource).await?;
    let database: Option<DatabaseInfo> = match &args.database {
        Some(path) => Some(read_yaml(path).await?),
        None => None,
    };
    let observed: Option<ObservedIds> = match &args.observed {
        Some(path) => Some(read_yaml(path).await?),
        None => None,
    };

    let plan = build_plan(proxy, &config.images, database.as_ref(), observed.as_ref());
    output(&plan, json_mode);
    Ok(())
}
