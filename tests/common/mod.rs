//! Common test utilities for integration tests
//!
//! Fixtures that wire the orchestrator to the in-memory adapters.

#![allow(dead_code)]

use sqlproxy_operator::adapters::memory::MemoryEnvironment;
use sqlproxy_operator::domain::models::{
    Config, ProxyResource, ProxySpec, ReconcileContext, RequeueDirective, ResourceKey, ServerSpec,
    ServiceRouter, ServiceSpec,
};
use sqlproxy_operator::{DomainResult, PhaseOrchestrator};

pub const NAMESPACE: &str = "db";

/// A proxy in front of two database servers with one read-write service.
pub fn proxy(name: &str, replicas: u32) -> ProxyResource {
    let spec = ProxySpec {
        replicas,
        servers: vec![
            ServerSpec::new("db-0", "db-0.db-internal.db.svc.cluster.local"),
            ServerSpec::new("db-1", "db-1.db-internal.db.svc.cluster.local"),
        ],
        services: vec![ServiceSpec::new("rw", ServiceRouter::Readwritesplit, 3306)],
        ..ProxySpec::default()
    };
    ProxyResource::new(NAMESPACE, name, spec)
}

/// A fake world whose pods become ready as soon as their StatefulSet exists.
pub fn world() -> MemoryEnvironment {
    let env = MemoryEnvironment::new();
    env.platform.set_auto_ready(true);
    env
}

/// Stores `proxy` in `env` and returns its key.
pub fn submit(env: &MemoryEnvironment, proxy: ProxyResource) -> ResourceKey {
    let key = proxy.key();
    env.platform.insert_proxy(proxy);
    key
}

pub fn orchestrator(env: &MemoryEnvironment) -> PhaseOrchestrator {
    orchestrator_with(env, Config::default())
}

pub fn orchestrator_with(env: &MemoryEnvironment, config: Config) -> PhaseOrchestrator {
    PhaseOrchestrator::new(env.deps(), config)
}

pub async fn tick(orchestrator: &PhaseOrchestrator, key: &ResourceKey) -> DomainResult<RequeueDirective> {
    orchestrator.reconcile(&ReconcileContext::default(), key).await
}

/// Ticks until the resource reports Ready, failing after `max` ticks.
pub async fn converge(
    env: &MemoryEnvironment,
    orchestrator: &PhaseOrchestrator,
    key: &ResourceKey,
    max: usize,
) -> RequeueDirective {
    for _ in 0..max {
        let result = tick(orchestrator, key).await.expect("tick failed");
        if env.platform.proxy(key).is_some_and(|p| p.status.is_ready()) {
            return result;
        }
    }
    panic!("'{key}' did not converge in {max} ticks");
}

/// Setup test logging
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
