use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::json;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    ConnectionOpts, DesiredObject, ObjectKind, PdbOpts, ProxyResource, ResourceKey, ServiceOpts,
    StatefulSetOpts,
};
use crate::domain::ports::ObjectBuilder;

/// Builds objects whose manifest is the serialized options.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryBuilder;

fn desired<T: Serialize>(
    kind: ObjectKind,
    key: &ResourceKey,
    labels: &BTreeMap<String, String>,
    opts: &T,
) -> DomainResult<DesiredObject> {
    Ok(DesiredObject {
        kind,
        key: key.clone(),
        labels: labels.clone(),
        manifest: serde_json::to_value(opts)?,
    })
}

impl ObjectBuilder for MemoryBuilder {
    fn build_stateful_set(&self, opts: &StatefulSetOpts) -> DomainResult<DesiredObject> {
        desired(ObjectKind::StatefulSet, &opts.key, &opts.selector_labels, opts)
    }

    fn build_service(&self, opts: &ServiceOpts) -> DomainResult<DesiredObject> {
        desired(ObjectKind::Service, &opts.key, &opts.selector_labels, opts)
    }

    fn build_pod_disruption_budget(&self, opts: &PdbOpts) -> DomainResult<DesiredObject> {
        desired(
            ObjectKind::PodDisruptionBudget,
            &opts.key,
            &opts.selector_labels,
            opts,
        )
    }

    fn build_connection(&self, opts: &ConnectionOpts) -> DomainResult<DesiredObject> {
        desired(ObjectKind::Connection, &opts.key, &BTreeMap::new(), opts)
    }

    fn build_exporter_deployment(&self, proxy: &ProxyResource) -> DomainResult<DesiredObject> {
        let metrics = proxy.spec.metrics.clone().unwrap_or_default();
        let manifest = json!({
            "image": metrics.exporter_image,
            "port": metrics.exporter_port,
            "user": proxy.spec.auth.metrics_username,
        });
        desired(
            ObjectKind::Deployment,
            &proxy.metrics_key(),
            &proxy.selector_labels(),
            &manifest,
        )
    }
}
