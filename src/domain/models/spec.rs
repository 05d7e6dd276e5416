//! Declarative spec of a proxy resource.
//!
//! Scalar leaves with constant defaults are defaulted by serde; values that
//! depend on the resource name, the replica count or the referenced database
//! are filled in by [`ProxyResource::set_defaults`](super::ProxyResource::set_defaults).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::index::Index;

pub const DEFAULT_SERVER_PORT: u16 = 3306;
pub const DEFAULT_SERVER_PROTOCOL: &str = "MariaDBBackend";
pub const DEFAULT_LISTENER_PROTOCOL: &str = "MariaDBProtocol";
pub const DEFAULT_ADMIN_PORT: u16 = 8989;
pub const DEFAULT_EXPORTER_PORT: u16 = 9105;
pub const DEFAULT_MONITOR_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_SYNC_DATABASE: &str = "mysql";
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CONNECTIONS_PER_REPLICA: u32 = 30;

/// Either an integer or a string such as `"50%"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntOrString {
    Int(i32),
    String(String),
}

impl fmt::Display for IntOrString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// Reference to a key inside a Secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SecretKeySelector {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub key: String,
}

impl SecretKeySelector {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        !self.name.is_empty() && !self.key.is_empty()
    }
}

/// Secret key reference whose value may be generated when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GeneratedSecretKeyRef {
    #[serde(flatten)]
    pub selector: SecretKeySelector,
    #[serde(default)]
    pub generate: bool,
}

impl GeneratedSecretKeyRef {
    pub fn generated(name: impl Into<String>) -> Self {
        Self {
            selector: SecretKeySelector::new(name, "password"),
            generate: true,
        }
    }

    fn default_to(&mut self, name: impl Into<String>) {
        if self.selector.name.is_empty() {
            *self = Self::generated(name);
        }
    }
}

/// Reference to the backing database cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// What the engine needs to know about a resolved [`DatabaseRef`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseInfo {
    pub name: String,
    pub namespace: String,
    pub replicas: u32,
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default)]
    pub galera_enabled: bool,
}

impl DatabaseInfo {
    pub fn pod_name(&self, index: u32) -> String {
        format!("{}-{index}", self.name)
    }

    /// Stable DNS name of a database pod through the internal headless service.
    pub fn pod_address(&self, index: u32) -> String {
        format!(
            "{}.{}-internal.{}.svc.cluster.local",
            self.pod_name(index),
            self.name,
            self.namespace
        )
    }
}

const fn default_server_port() -> u16 {
    DEFAULT_SERVER_PORT
}

fn default_server_protocol() -> String {
    DEFAULT_SERVER_PROTOCOL.to_string()
}

fn default_listener_protocol() -> String {
    DEFAULT_LISTENER_PROTOCOL.to_string()
}

const fn default_replicas() -> u32 {
    1
}

const fn default_true() -> bool {
    true
}

/// A backend database server the proxy routes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerSpec {
    pub name: String,
    pub address: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default = "default_server_protocol")]
    pub protocol: String,
    /// Maintenance mode; a server in maintenance is inactive.
    #[serde(default)]
    pub maintenance: bool,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl ServerSpec {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port: DEFAULT_SERVER_PORT,
            protocol: default_server_protocol(),
            maintenance: false,
            params: BTreeMap::new(),
        }
    }
}

/// Routing module of a proxy service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRouter {
    #[default]
    Readwritesplit,
    Readconnroute,
}

impl ServiceRouter {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Readwritesplit => "readwritesplit",
            Self::Readconnroute => "readconnroute",
        }
    }
}

/// Listener exposing a service on a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ListenerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub port: u16,
    #[serde(default = "default_listener_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub suspend: bool,
}

impl ListenerSpec {
    pub fn new(port: u16) -> Self {
        Self {
            name: None,
            port,
            protocol: default_listener_protocol(),
            params: BTreeMap::new(),
            suspend: false,
        }
    }
}

/// A routing service and its listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServiceSpec {
    pub name: String,
    #[serde(default)]
    pub router: ServiceRouter,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub suspend: bool,
    pub listener: ListenerSpec,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, router: ServiceRouter, port: u16) -> Self {
        Self {
            name: name.into(),
            router,
            params: BTreeMap::new(),
            suspend: false,
            listener: ListenerSpec::new(port),
        }
    }

    pub fn listener_name(&self) -> String {
        self.listener
            .name
            .clone()
            .unwrap_or_else(|| format!("{}-listener", self.name))
    }
}

/// Monitor module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorModule {
    /// Native asynchronous replication.
    #[default]
    Mariadbmon,
    /// Multi-master (Galera) clusters.
    Galeramon,
}

impl MonitorModule {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mariadbmon => "mariadbmon",
            Self::Galeramon => "galeramon",
        }
    }
}

impl fmt::Display for MonitorModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How monitors of different proxy replicas coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooperativeMonitoring {
    MajorityOfAll,
    MajorityOfRunning,
}

impl CooperativeMonitoring {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MajorityOfAll => "majority_of_all",
            Self::MajorityOfRunning => "majority_of_running",
        }
    }
}

const fn default_monitor_interval_ms() -> u64 {
    DEFAULT_MONITOR_INTERVAL_MS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MonitorSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub module: MonitorModule,
    #[serde(default = "default_monitor_interval_ms")]
    pub interval_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooperative_monitoring: Option<CooperativeMonitoring>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub suspend: bool,
}

impl Default for MonitorSpec {
    fn default() -> Self {
        Self {
            name: None,
            module: MonitorModule::default(),
            interval_ms: default_monitor_interval_ms(),
            cooperative_monitoring: None,
            params: BTreeMap::new(),
            suspend: false,
        }
    }
}

impl MonitorSpec {
    pub fn name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}-monitor", self.module))
    }
}

const fn default_admin_port() -> u16 {
    DEFAULT_ADMIN_PORT
}

/// REST admin API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AdminSpec {
    #[serde(default = "default_admin_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub gui_enabled: bool,
}

impl Default for AdminSpec {
    fn default() -> Self {
        Self {
            port: default_admin_port(),
            gui_enabled: true,
        }
    }
}

fn default_sync_database() -> String {
    DEFAULT_SYNC_DATABASE.to_string()
}

const fn default_sync_interval_ms() -> u64 {
    DEFAULT_SYNC_INTERVAL_MS
}

const fn default_sync_timeout_ms() -> u64 {
    DEFAULT_SYNC_TIMEOUT_MS
}

/// SQL-table based configuration sync between proxy replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConfigSyncSpec {
    #[serde(default = "default_sync_database")]
    pub database: String,
    #[serde(default = "default_sync_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_sync_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ConfigSyncSpec {
    fn default() -> Self {
        Self {
            database: default_sync_database(),
            interval_ms: default_sync_interval_ms(),
            timeout_ms: default_sync_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProxyConfigSpec {
    /// Extra global parameters written to the rendered config file.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<ConfigSyncSpec>,
}

/// Internal service accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AuthSpec {
    /// Create client/server/monitor/sync users in the backing database.
    #[serde(default = "default_true")]
    pub generate: bool,
    #[serde(default)]
    pub admin_username: String,
    #[serde(default)]
    pub admin_password_secret_key_ref: GeneratedSecretKeyRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_default_admin: Option<bool>,
    #[serde(default)]
    pub client_username: String,
    #[serde(default)]
    pub client_password_secret_key_ref: GeneratedSecretKeyRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_max_connections: Option<u32>,
    #[serde(default)]
    pub server_username: String,
    #[serde(default)]
    pub server_password_secret_key_ref: GeneratedSecretKeyRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_max_connections: Option<u32>,
    #[serde(default)]
    pub monitor_username: String,
    #[serde(default)]
    pub monitor_password_secret_key_ref: GeneratedSecretKeyRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_max_connections: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_password_secret_key_ref: Option<GeneratedSecretKeyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_max_connections: Option<u32>,
    #[serde(default)]
    pub metrics_username: String,
    #[serde(default)]
    pub metrics_password_secret_key_ref: GeneratedSecretKeyRef,
}

impl Default for AuthSpec {
    fn default() -> Self {
        Self {
            generate: true,
            admin_username: String::new(),
            admin_password_secret_key_ref: GeneratedSecretKeyRef::default(),
            delete_default_admin: None,
            client_username: String::new(),
            client_password_secret_key_ref: GeneratedSecretKeyRef::default(),
            client_max_connections: None,
            server_username: String::new(),
            server_password_secret_key_ref: GeneratedSecretKeyRef::default(),
            server_max_connections: None,
            monitor_username: String::new(),
            monitor_password_secret_key_ref: GeneratedSecretKeyRef::default(),
            monitor_max_connections: None,
            sync_username: None,
            sync_password_secret_key_ref: None,
            sync_max_connections: None,
            metrics_username: String::new(),
            metrics_password_secret_key_ref: GeneratedSecretKeyRef::default(),
        }
    }
}

impl AuthSpec {
    pub const DEFAULT_ADMIN_USERNAME: &'static str = "sqlproxy-operator";
    pub const DEFAULT_METRICS_USERNAME: &'static str = "metrics";

    fn set_defaults(&mut self, name: &str, replicas: u32, sync: bool, metrics: bool) {
        let max_connections = DEFAULT_CONNECTIONS_PER_REPLICA * replicas.max(1);

        if self.admin_username.is_empty() {
            self.admin_username = Self::DEFAULT_ADMIN_USERNAME.to_string();
        }
        self.admin_password_secret_key_ref
            .default_to(format!("{name}-admin"));
        if self.delete_default_admin.is_none() {
            self.delete_default_admin = Some(true);
        }

        for (username, secret, connections, role) in [
            (
                &mut self.client_username,
                &mut self.client_password_secret_key_ref,
                &mut self.client_max_connections,
                "client",
            ),
            (
                &mut self.server_username,
                &mut self.server_password_secret_key_ref,
                &mut self.server_max_connections,
                "server",
            ),
            (
                &mut self.monitor_username,
                &mut self.monitor_password_secret_key_ref,
                &mut self.monitor_max_connections,
                "monitor",
            ),
        ] {
            if username.is_empty() {
                *username = format!("{name}-{role}");
            }
            secret.default_to(format!("{name}-{role}"));
            connections.get_or_insert(max_connections);
        }

        if sync {
            self.sync_username
                .get_or_insert_with(|| format!("{name}-sync"));
            self.sync_password_secret_key_ref
                .get_or_insert_with(|| GeneratedSecretKeyRef::generated(format!("{name}-sync")));
            self.sync_max_connections.get_or_insert(max_connections);
        }

        if metrics {
            if self.metrics_username.is_empty() {
                self.metrics_username = Self::DEFAULT_METRICS_USERNAME.to_string();
            }
            self.metrics_password_secret_key_ref
                .default_to(format!("{name}-metrics"));
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TlsSpec {
    #[serde(default)]
    pub enabled: bool,
    /// Issuer used for the admin API certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_cert_issuer: Option<String>,
    /// Issuer used for listener certificates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listener_cert_issuer: Option<String>,
    #[serde(default)]
    pub verify_peer_certificate: bool,
}

const fn default_exporter_port() -> u16 {
    DEFAULT_EXPORTER_PORT
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MetricsSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_exporter_port")]
    pub exporter_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exporter_image: Option<String>,
}

impl Default for MetricsSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            exporter_port: default_exporter_port(),
            exporter_image: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PodDisruptionBudgetSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_available: Option<IntOrString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,
}

/// Template for the client Connection object published for applications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConnectionTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_interval_ms: Option<u64>,
}

/// Desired state of a proxy deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProxySpec {
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub suspend: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_ref: Option<DatabaseRef>,
    #[serde(default)]
    pub servers: Vec<ServerSpec>,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
    #[serde(default)]
    pub monitor: MonitorSpec,
    #[serde(default)]
    pub admin: AdminSpec,
    #[serde(default)]
    pub config: ProxyConfigSpec,
    #[serde(default)]
    pub auth: AuthSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_disruption_budget: Option<PodDisruptionBudgetSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requeue_interval_ms: Option<u64>,
}

impl Default for ProxySpec {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            suspend: false,
            image: None,
            service_account_name: None,
            database_ref: None,
            servers: Vec::new(),
            services: Vec::new(),
            monitor: MonitorSpec::default(),
            admin: AdminSpec::default(),
            config: ProxyConfigSpec::default(),
            auth: AuthSpec::default(),
            tls: None,
            metrics: None,
            pod_disruption_budget: None,
            connection: None,
            requeue_interval_ms: None,
        }
    }
}

impl ProxySpec {
    pub const DEFAULT_REQUEUE_INTERVAL_MS: u64 = 30_000;

    pub fn is_ha_enabled(&self) -> bool {
        self.replicas > 1 && self.config.sync.is_some()
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics.as_ref().is_some_and(|m| m.enabled)
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls.as_ref().is_some_and(|t| t.enabled)
    }

    pub fn server_ids(&self) -> Vec<String> {
        self.servers.iter().map(|s| s.name.clone()).collect()
    }

    pub fn server_index(&self) -> Index<ServerSpec> {
        Index::new(self.servers.iter().cloned(), |s| s.name.clone())
    }

    pub fn service_index(&self) -> Index<ServiceSpec> {
        Index::new(self.services.iter().cloned(), |s| s.name.clone())
    }

    /// Listeners with their names resolved.
    pub fn listeners(&self) -> Vec<ListenerSpec> {
        self.services
            .iter()
            .map(|svc| ListenerSpec {
                name: Some(svc.listener_name()),
                ..svc.listener.clone()
            })
            .collect()
    }

    pub fn listener_index(&self) -> Index<ListenerSpec> {
        Index::new(self.listeners(), |l| l.name.clone().unwrap_or_default())
    }

    /// Service owning the listener named `listener`.
    pub fn service_for_listener(&self, listener: &str) -> Option<&ServiceSpec> {
        self.services
            .iter()
            .find(|svc| svc.listener_name() == listener)
    }

    pub(crate) fn set_defaults(&mut self, name: &str, proxy_image: &str, exporter_image: &str) {
        if self.image.is_none() {
            self.image = Some(proxy_image.to_string());
        }
        if self.service_account_name.is_none() {
            self.service_account_name = Some(name.to_string());
        }
        if self.requeue_interval_ms.is_none() {
            self.requeue_interval_ms = Some(Self::DEFAULT_REQUEUE_INTERVAL_MS);
        }

        for svc in &mut self.services {
            if svc.listener.name.is_none() {
                svc.listener.name = Some(format!("{}-listener", svc.name));
            }
        }

        if self.monitor.name.is_none() {
            self.monitor.name = Some(self.monitor.name());
        }
        if self.replicas > 1 && self.monitor.cooperative_monitoring.is_none() {
            self.monitor.cooperative_monitoring = Some(CooperativeMonitoring::MajorityOfAll);
        }

        if self.replicas > 1 && self.config.sync.is_none() {
            self.config.sync = Some(ConfigSyncSpec::default());
        }

        if let Some(metrics) = self.metrics.as_mut() {
            if metrics.enabled && metrics.exporter_image.is_none() {
                metrics.exporter_image = Some(exporter_image.to_string());
            }
        }

        let sync = self.config.sync.is_some();
        let metrics = self.metrics_enabled();
        self.auth.set_defaults(name, self.replicas, sync, metrics);
    }

    /// Servers and monitor module derived from the referenced database.
    ///
    /// Servers declared by the user are kept by position.
    pub(crate) fn set_database_defaults(&mut self, db: &DatabaseInfo) {
        let servers = (0..db.replicas)
            .map(|i| {
                self.servers.get(i as usize).cloned().unwrap_or_else(|| ServerSpec {
                    port: db.port,
                    ..ServerSpec::new(db.pod_name(i), db.pod_address(i))
                })
            })
            .collect();
        self.servers = servers;

        if db.galera_enabled {
            self.monitor.module = MonitorModule::Galeramon;
        } else {
            self.monitor.module = MonitorModule::Mariadbmon;
            if self.monitor.params.is_empty() {
                self.monitor.params = [
                    "auto_failover",
                    "auto_rejoin",
                    "switchover_on_low_disk_space",
                ]
                .into_iter()
                .map(|k| (k.to_string(), "true".to_string()))
                .collect();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_defaults() {
        let spec: ProxySpec = serde_yaml::from_str(
            r"
servers:
  - name: s0
    address: db-0
services:
  - name: rw
    listener:
      port: 3307
",
        )
        .unwrap();

        assert_eq!(spec.replicas, 1);
        assert_eq!(spec.servers[0].port, 3306);
        assert_eq!(spec.servers[0].protocol, "MariaDBBackend");
        assert_eq!(spec.services[0].router, ServiceRouter::Readwritesplit);
        assert_eq!(spec.services[0].listener.protocol, "MariaDBProtocol");
        assert_eq!(spec.admin.port, 8989);
        assert!(spec.admin.gui_enabled);
        assert_eq!(spec.monitor.interval_ms, 2000);
        assert!(spec.auth.generate);
    }

    #[test]
    fn test_listener_names() {
        let mut spec = ProxySpec {
            services: vec![
                ServiceSpec::new("rw", ServiceRouter::Readwritesplit, 3306),
                ServiceSpec::new("rconn", ServiceRouter::Readconnroute, 3307),
            ],
            ..ProxySpec::default()
        };
        spec.services[1].listener.name = Some("custom".to_string());

        let idx = spec.listener_index();
        assert_eq!(idx.keys(), vec!["custom", "rw-listener"]);
        assert_eq!(spec.service_for_listener("custom").map(|s| s.name.as_str()), Some("rconn"));
        assert!(spec.service_for_listener("missing").is_none());
    }

    #[test]
    fn test_monitor_name_follows_module() {
        let mut monitor = MonitorSpec::default();
        assert_eq!(monitor.name(), "mariadbmon-monitor");
        monitor.module = MonitorModule::Galeramon;
        assert_eq!(monitor.name(), "galeramon-monitor");
        monitor.name = Some("mon".to_string());
        assert_eq!(monitor.name(), "mon");
    }

    #[test]
    fn test_single_replica_defaults() {
        let mut spec = ProxySpec::default();
        spec.set_defaults("proxy", "proxy:1", "exporter:1");

        assert_eq!(spec.image.as_deref(), Some("proxy:1"));
        assert_eq!(spec.service_account_name.as_deref(), Some("proxy"));
        assert_eq!(spec.requeue_interval_ms, Some(30_000));
        assert!(spec.config.sync.is_none());
        assert!(spec.monitor.cooperative_monitoring.is_none());
        assert!(!spec.is_ha_enabled());

        assert_eq!(spec.auth.admin_username, "sqlproxy-operator");
        assert_eq!(spec.auth.admin_password_secret_key_ref.selector.name, "proxy-admin");
        assert_eq!(spec.auth.admin_password_secret_key_ref.selector.key, "password");
        assert!(spec.auth.admin_password_secret_key_ref.generate);
        assert_eq!(spec.auth.delete_default_admin, Some(true));
        assert_eq!(spec.auth.client_username, "proxy-client");
        assert_eq!(spec.auth.server_username, "proxy-server");
        assert_eq!(spec.auth.monitor_username, "proxy-monitor");
        assert_eq!(spec.auth.client_max_connections, Some(30));
        assert!(spec.auth.sync_username.is_none());
        assert!(spec.auth.metrics_username.is_empty());
    }

    #[test]
    fn test_ha_defaults() {
        let mut spec = ProxySpec {
            replicas: 3,
            metrics: Some(MetricsSpec {
                enabled: true,
                ..MetricsSpec::default()
            }),
            ..ProxySpec::default()
        };
        spec.set_defaults("proxy", "proxy:1", "exporter:1");

        assert_eq!(spec.config.sync, Some(ConfigSyncSpec::default()));
        assert_eq!(
            spec.monitor.cooperative_monitoring,
            Some(CooperativeMonitoring::MajorityOfAll)
        );
        assert!(spec.is_ha_enabled());
        assert_eq!(spec.auth.client_max_connections, Some(90));
        assert_eq!(spec.auth.sync_username.as_deref(), Some("proxy-sync"));
        assert_eq!(spec.auth.sync_max_connections, Some(90));
        assert_eq!(spec.auth.metrics_username, "metrics");
        assert_eq!(spec.auth.metrics_password_secret_key_ref.selector.name, "proxy-metrics");
        assert_eq!(
            spec.metrics.as_ref().and_then(|m| m.exporter_image.as_deref()),
            Some("exporter:1")
        );
    }

    #[test]
    fn test_defaults_keep_user_values() {
        let mut spec = ProxySpec::default();
        spec.auth.client_username = "app".to_string();
        spec.auth.client_max_connections = Some(5);
        spec.auth.delete_default_admin = Some(false);
        spec.set_defaults("proxy", "proxy:1", "exporter:1");

        assert_eq!(spec.auth.client_username, "app");
        assert_eq!(spec.auth.client_max_connections, Some(5));
        assert_eq!(spec.auth.delete_default_admin, Some(false));
    }

    #[test]
    fn test_database_defaults_replication() {
        let db = DatabaseInfo {
            name: "mariadb".to_string(),
            namespace: "default".to_string(),
            replicas: 3,
            port: 3306,
            galera_enabled: false,
        };
        let mut spec = ProxySpec {
            servers: vec![ServerSpec::new("custom-0", "10.0.0.1")],
            ..ProxySpec::default()
        };
        spec.set_database_defaults(&db);

        assert_eq!(spec.server_ids(), vec!["custom-0", "mariadb-1", "mariadb-2"]);
        assert_eq!(
            spec.servers[2].address,
            "mariadb-2.mariadb-internal.default.svc.cluster.local"
        );
        assert_eq!(spec.monitor.module, MonitorModule::Mariadbmon);
        assert_eq!(spec.monitor.params.get("auto_failover").map(String::as_str), Some("true"));
        assert_eq!(spec.monitor.params.len(), 3);
    }

    #[test]
    fn test_database_defaults_galera() {
        let db = DatabaseInfo {
            name: "galera".to_string(),
            namespace: "db".to_string(),
            replicas: 1,
            port: 3307,
            galera_enabled: true,
        };
        let mut spec = ProxySpec::default();
        spec.set_database_defaults(&db);

        assert_eq!(spec.servers[0].port, 3307);
        assert_eq!(spec.monitor.module, MonitorModule::Galeramon);
        assert!(spec.monitor.params.is_empty());
    }

    #[test]
    fn test_int_or_string() {
        let v: IntOrString = serde_json::from_str("\"50%\"").unwrap();
        assert_eq!(v, IntOrString::String("50%".to_string()));
        let v: IntOrString = serde_json::from_str("1").unwrap();
        assert_eq!(v.to_string(), "1");
    }
}
