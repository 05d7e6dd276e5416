use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::ImagesConfig;
use super::spec::{DatabaseInfo, ProxySpec, SecretKeySelector};
use super::status::ProxyStatus;

pub const FINALIZER_NAME: &str = "sqlproxy.operator/finalizer";
pub const CONFIG_SECRET_KEY: &str = "proxy.cnf";

/// Namespaced name of a platform object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub generation: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

fn default_namespace() -> String {
    "default".to_string()
}

/// The custom resource describing one proxy deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyResource {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ProxySpec,
    #[serde(default)]
    pub status: ProxyStatus,
}

impl ProxyResource {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: ProxySpec) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                namespace: namespace.into(),
                ..ObjectMeta::default()
            },
            spec,
            status: ProxyStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.namespace(), self.name())
    }

    fn suffixed_key(&self, suffix: &str) -> ResourceKey {
        ResourceKey::new(self.namespace(), format!("{}-{suffix}", self.name()))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self) -> bool {
        self.metadata.finalizers.iter().any(|f| f == FINALIZER_NAME)
    }

    pub fn add_finalizer(&mut self) {
        if !self.has_finalizer() {
            self.metadata.finalizers.push(FINALIZER_NAME.to_string());
        }
    }

    pub fn remove_finalizer(&mut self) {
        self.metadata.finalizers.retain(|f| f != FINALIZER_NAME);
    }

    /// Applies every default, including those derived from the referenced database.
    pub fn set_defaults(&mut self, images: &ImagesConfig, database: Option<&DatabaseInfo>) {
        if let Some(db) = database {
            self.spec.set_database_defaults(db);
        }
        let name = self.metadata.name.clone();
        self.spec.set_defaults(&name, &images.proxy, &images.exporter);
    }

    // ========================================================================
    // Pods
    // ========================================================================

    pub fn pod_name(&self, index: u32) -> String {
        format!("{}-{index}", self.name())
    }

    pub fn pod_names(&self) -> Vec<String> {
        (0..self.spec.replicas).map(|i| self.pod_name(i)).collect()
    }

    /// Labels selecting every pod of this proxy.
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("app.kubernetes.io/name".to_string(), "sqlproxy".to_string()),
            ("app.kubernetes.io/instance".to_string(), self.name().to_string()),
        ])
    }

    /// Labels selecting a single pod.
    pub fn pod_selector_labels(&self, index: u32) -> BTreeMap<String, String> {
        let mut labels = self.selector_labels();
        labels.insert(
            "statefulset.kubernetes.io/pod-name".to_string(),
            self.pod_name(index),
        );
        labels
    }

    // ========================================================================
    // Owned object keys
    // ========================================================================

    pub fn internal_service_key(&self) -> ResourceKey {
        self.suffixed_key("internal")
    }

    pub fn gui_service_key(&self) -> ResourceKey {
        self.suffixed_key("gui")
    }

    pub fn config_secret_key_ref(&self) -> SecretKeySelector {
        SecretKeySelector::new(format!("{}-config", self.name()), CONFIG_SECRET_KEY)
    }

    pub fn connection_key(&self) -> ResourceKey {
        self.suffixed_key("connection")
    }

    pub fn metrics_key(&self) -> ResourceKey {
        self.suffixed_key("metrics")
    }

    pub fn service_account_key(&self) -> ResourceKey {
        let name = self
            .spec
            .service_account_name
            .clone()
            .unwrap_or_else(|| self.name().to_string());
        ResourceKey::new(self.namespace(), name)
    }

    /// Address of a pod's admin API through the internal headless service.
    pub fn pod_admin_address(&self, index: u32) -> String {
        format!(
            "{}.{}.{}.svc.cluster.local:{}",
            self.pod_name(index),
            self.internal_service_key().name,
            self.namespace(),
            self.spec.admin.port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalizer_helpers() {
        let mut proxy = ProxyResource::new("ns", "proxy", ProxySpec::default());
        assert!(!proxy.has_finalizer());
        proxy.add_finalizer();
        proxy.add_finalizer();
        assert_eq!(proxy.metadata.finalizers, vec![FINALIZER_NAME]);
        proxy.remove_finalizer();
        assert!(!proxy.has_finalizer());
    }

    #[test]
    fn test_keys_and_pods() {
        let proxy = ProxyResource::new(
            "ns",
            "proxy",
            ProxySpec {
                replicas: 2,
                ..ProxySpec::default()
            },
        );
        assert_eq!(proxy.key().to_string(), "ns/proxy");
        assert_eq!(proxy.pod_names(), vec!["proxy-0", "proxy-1"]);
        assert_eq!(proxy.internal_service_key().name, "proxy-internal");
        assert_eq!(proxy.config_secret_key_ref().name, "proxy-config");
        assert_eq!(proxy.service_account_key().name, "proxy");
        assert_eq!(
            proxy.pod_admin_address(1),
            "proxy-1.proxy-internal.ns.svc.cluster.local:8989"
        );
        assert_eq!(
            proxy.pod_selector_labels(1).get("statefulset.kubernetes.io/pod-name"),
            Some(&"proxy-1".to_string())
        );
    }

    #[test]
    fn test_deserialize_manifest() {
        let proxy: ProxyResource = serde_yaml::from_str(
            r"
metadata:
  name: proxy
spec:
  replicas: 3
  database_ref:
    name: mariadb
",
        )
        .unwrap();
        assert_eq!(proxy.namespace(), "default");
        assert_eq!(proxy.spec.replicas, 3);
        assert!(!proxy.is_being_deleted());
    }
}
