//! Objects as seen through a proxy pod's REST admin API.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::spec::{
    CooperativeMonitoring, ListenerSpec, MonitorModule, MonitorSpec, ServerSpec, ServiceRouter,
    ServiceSpec,
};

/// Administrative enable/disable flag, local to each proxy pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationState {
    Active,
    Inactive,
}

impl ActivationState {
    pub const fn from_suspended(suspended: bool) -> Self {
        if suspended {
            Self::Inactive
        } else {
            Self::Active
        }
    }
}

/// References from one proxy object to others.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationships {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,
}

impl Relationships {
    pub fn servers(servers: Vec<String>) -> Self {
        Self {
            servers,
            services: Vec::new(),
        }
    }

    pub fn service(service: impl Into<String>) -> Self {
        Self {
            servers: Vec::new(),
            services: vec![service.into()],
        }
    }
}

/// An object listed from the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedObject<A> {
    pub id: String,
    /// Runtime state string reported by the proxy, e.g. `"Master, Running"`.
    #[serde(default)]
    pub state: String,
    pub attributes: A,
    #[serde(default)]
    pub relationships: Relationships,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAttributes {
    pub address: String,
    pub port: u16,
    pub protocol: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl From<&ServerSpec> for ServerAttributes {
    fn from(spec: &ServerSpec) -> Self {
        Self {
            address: spec.address.clone(),
            port: spec.port,
            protocol: spec.protocol.clone(),
            params: spec.params.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorAttributes {
    pub module: MonitorModule,
    pub interval_ms: u64,
    #[serde(default)]
    pub cooperative_monitoring: Option<CooperativeMonitoring>,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl MonitorAttributes {
    pub fn from_spec(spec: &MonitorSpec, user: String, password: String) -> Self {
        Self {
            module: spec.module,
            interval_ms: spec.interval_ms,
            cooperative_monitoring: spec.cooperative_monitoring,
            user,
            password,
            params: spec.params.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAttributes {
    pub router: ServiceRouter,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl ServiceAttributes {
    pub fn from_spec(spec: &ServiceSpec, user: String, password: String) -> Self {
        Self {
            router: spec.router,
            user,
            password,
            params: spec.params.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerAttributes {
    pub port: u16,
    pub protocol: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl From<&ListenerSpec> for ListenerAttributes {
    fn from(spec: &ListenerSpec) -> Self {
        Self {
            port: spec.port,
            protocol: spec.protocol.clone(),
            params: spec.params.clone(),
        }
    }
}

/// A REST API user of the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyUser {
    pub name: String,
    #[serde(default = "default_account")]
    pub account: String,
}

fn default_account() -> String {
    "admin".to_string()
}

/// Settings pushed to a pod to enable SQL-table based config sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigSyncSettings {
    pub cluster: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub interval: Duration,
    pub timeout: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation_state() {
        assert_eq!(ActivationState::from_suspended(true), ActivationState::Inactive);
        assert_eq!(ActivationState::from_suspended(false), ActivationState::Active);
    }

    #[test]
    fn test_server_attributes_from_spec() {
        let mut spec = ServerSpec::new("s0", "10.0.0.1");
        spec.params.insert("priority".to_string(), "1".to_string());
        let attrs = ServerAttributes::from(&spec);
        assert_eq!(attrs.port, 3306);
        assert_eq!(attrs.params.get("priority").map(String::as_str), Some("1"));
    }
}
