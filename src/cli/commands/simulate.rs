//! Implementation of the `simulate` command.
//!
//! Reconciles one resource against the in-memory adapters, tick after tick,
//! until it reports Ready or the tick budget runs out. Requeue delays are
//! reported, never slept.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tracing::info;

use super::{load_config, read_yaml};
use crate::adapters::memory::MemoryEnvironment;
use crate::application::{NextRun, ReconcileDriver};
use crate::cli::output::{list_table, output, render_list, CommandOutput};
use crate::domain::models::{Config, DatabaseInfo, ProxyResource, ReconcileContext, ResourceKey};
use crate::services::PhaseOrchestrator;

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Proxy resource manifest (YAML)
    #[arg(long)]
    pub resource: PathBuf,

    /// Referenced database description (YAML)
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Maximum number of ticks to run
    #[arg(long, default_value_t = 10)]
    pub ticks: u32,

    /// Configuration file instead of the `.sqlproxy/` hierarchy
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TickRecord {
    pub tick: u32,
    pub next: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PodState {
    pub pod: String,
    pub servers: Vec<(String, String)>,
    pub monitors: Vec<String>,
    pub services: Vec<String>,
    pub listeners: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SimulateOutput {
    pub resource: ResourceKey,
    pub converged: bool,
    pub ticks: Vec<TickRecord>,
    pub pods: Vec<PodState>,
    pub primary_server: Option<String>,
}

fn describe(next: NextRun) -> String {
    match next {
        NextRun::Requeue(d) => format!("requeue in {}ms", d.as_millis()),
        NextRun::Backoff(d) => format!("backoff {}ms", d.as_millis()),
        NextRun::Idle => "idle".to_string(),
    }
}

/// Runs up to `max_ticks` ticks of `proxy` against a fresh in-memory world.
pub async fn simulate(
    proxy: ProxyResource,
    database: Option<DatabaseInfo>,
    config: Config,
    max_ticks: u32,
) -> Result<SimulateOutput> {
    let env = MemoryEnvironment::new();
    env.platform.set_auto_ready(true);
    if let Some(database) = database {
        env.platform.insert_database(database);
    }
    let key = proxy.key();
    env.platform.insert_proxy(proxy);

    let driver = ReconcileDriver::new(Arc::new(PhaseOrchestrator::new(env.deps(), config)));
    let ctx = ReconcileContext::default();

    let mut ticks = Vec::new();
    let mut converged = false;
    for tick in 1..=max_ticks {
        let outcome = driver
            .run_once(&ctx, &key)
            .await
            .with_context(|| format!("tick {tick} did not run"))?;
        info!(tick, next = ?outcome.next, "tick finished");
        ticks.push(TickRecord {
            tick,
            next: describe(outcome.next),
            error: outcome.error.clone(),
        });

        let ready = env
            .platform
            .proxy(&key)
            .is_some_and(|p| p.status.is_ready());
        if outcome.next == NextRun::Idle || (outcome.error.is_none() && ready) {
            converged = ready;
            break;
        }
    }

    let pods = env
        .proxies
        .pod_names()
        .into_iter()
        .map(|name| {
            let pod = env.proxies.pod(&name);
            PodState {
                servers: pod
                    .server_ids()
                    .into_iter()
                    .map(|id| {
                        let state = pod.server_state(&id).unwrap_or_default();
                        (id, state)
                    })
                    .collect(),
                monitors: pod.monitor_ids(),
                services: pod.service_ids(),
                listeners: pod.listener_ids(),
                pod: name,
            }
        })
        .collect();
    let primary_server = env
        .platform
        .proxy(&key)
        .and_then(|p| p.status.primary_server);

    Ok(SimulateOutput {
        resource: key,
        converged,
        ticks,
        pods,
        primary_server,
    })
}

impl CommandOutput for SimulateOutput {
    fn to_human(&self) -> String {
        let mut ticks = list_table(&["tick", "next", "error"]);
        for record in &self.ticks {
            ticks.add_row(vec![
                record.tick.to_string(),
                record.next.clone(),
                record.error.clone().unwrap_or_default(),
            ]);
        }
        let mut sections = vec![
            format!(
                "Resource {} {} after {} tick(s)",
                self.resource,
                if self.converged { "converged" } else { "did not converge" },
                self.ticks.len()
            ),
            render_list("tick", &ticks, self.ticks.len()),
        ];

        let mut pods = list_table(&["pod", "servers", "monitors", "services", "listeners"]);
        for pod in &self.pods {
            let servers: Vec<String> = pod
                .servers
                .iter()
                .map(|(id, state)| format!("{id} [{state}]"))
                .collect();
            pods.add_row(vec![
                pod.pod.clone(),
                servers.join(", "),
                pod.monitors.join(", "),
                pod.services.join(", "),
                pod.listeners.join(", "),
            ]);
        }
        sections.push(render_list("pod", &pods, self.pods.len()));
        if let Some(primary) = &self.primary_server {
            sections.push(format!("Primary server: {primary}"));
        }
        sections.join("\n\n")
    }
}

pub async fn execute(args: SimulateArgs, json_mode: bool) -> Result<()> {
    let config = load_config(args.config.as_ref())?;
    let proxy: ProxyResource = read_yaml(&args.resource).await?;
    let database: Option<DatabaseInfo> = match &args.database {
        Some(path) => Some(read_yaml(path).await?),
        None => None,
    };

    let result = simulate(proxy, database, config, args.ticks).await?;
    output(&result, json_mode);
    Ok(())
}
