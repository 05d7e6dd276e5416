//! Descriptors of the platform-native objects the engine asks for.
//!
//! Building the actual manifests is the job of an
//! [`ObjectBuilder`](crate::domain::ports::ObjectBuilder); the engine only
//! decides which objects should exist and with which options.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::resource::ResourceKey;
use super::spec::{ConnectionTemplate, IntOrString, PodDisruptionBudgetSpec, SecretKeySelector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    StatefulSet,
    Service,
    PodDisruptionBudget,
    Secret,
    ServiceAccount,
    Connection,
    Deployment,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A fully built platform object, ready for create-or-patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredObject {
    pub kind: ObjectKind,
    pub key: ResourceKey,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub manifest: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
}

impl ServicePort {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceOpts {
    pub key: ResourceKey,
    pub headless: bool,
    pub ports: Vec<ServicePort>,
    pub selector_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PdbOpts {
    pub key: ResourceKey,
    pub min_available: Option<IntOrString>,
    pub max_unavailable: Option<IntOrString>,
    pub selector_labels: BTreeMap<String, String>,
}

impl PdbOpts {
    pub fn from_spec(
        key: ResourceKey,
        spec: &PodDisruptionBudgetSpec,
        selector_labels: BTreeMap<String, String>,
    ) -> Self {
        Self {
            key,
            min_available: spec.min_available.clone(),
            max_unavailable: spec.max_unavailable.clone(),
            selector_labels,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionOpts {
    pub key: ResourceKey,
    pub username: String,
    pub password_secret_key_ref: SecretKeySelector,
    pub service_name: String,
    pub template: ConnectionTemplate,
}

/// Options for the StatefulSet running the proxy pods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatefulSetOpts {
    pub key: ResourceKey,
    pub replicas: u32,
    pub image: String,
    pub service_account: String,
    pub config_secret: SecretKeySelector,
    pub pod_annotations: BTreeMap<String, String>,
    pub selector_labels: BTreeMap<String, String>,
}

/// A Secret whose data is fully owned by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretRequest {
    pub key: ResourceKey,
    pub data: BTreeMap<String, String>,
}

/// A password stored under `secret_key`, generated when `generate` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasswordRequest {
    pub key: ResourceKey,
    pub secret_key: String,
    pub generate: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    pub replicas: u32,
    pub ready_replicas: u32,
}
