use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CONDITION_READY: &str = "Ready";

pub const REASON_INITIALIZING: &str = "Initializing";
pub const REASON_RUNNING: &str = "Running";
pub const REASON_FAILED: &str = "Failed";
pub const REASON_REF_RESOLVER: &str = "RefResolver";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    /// Reason for the condition's last transition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the status flipped
    pub last_transition_time: DateTime<Utc>,
}

/// A backend server as last observed on the primary pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerStatus {
    pub name: String,
    pub state: String,
}

impl ServerStatus {
    pub fn is_primary(&self) -> bool {
        self.state.contains("Master")
    }
}

/// Observed state of a proxy, including the last-applied spec hashes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProxyStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub replicas: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servers: Option<Vec<ServerStatus>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servers_spec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_spec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services_spec: Option<String>,
}

impl ProxyStatus {
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn ready(&self) -> Option<&Condition> {
        self.condition(CONDITION_READY)
    }

    pub fn is_ready(&self) -> bool {
        self.ready()
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Upserts a condition; the transition time only moves when the status changes.
    pub fn set_condition(
        &mut self,
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) {
        let message = message.into();
        let now = Utc::now();
        match self.conditions.iter_mut().find(|c| c.type_ == type_) {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = now;
                }
                existing.status = status;
                existing.reason = reason.to_string();
                existing.message = message;
            }
            None => self.conditions.push(Condition {
                type_: type_.to_string(),
                status,
                reason: reason.to_string(),
                message,
                last_transition_time: now,
            }),
        }
    }

    pub fn set_ready_initializing(&mut self) {
        if self.ready().is_none() {
            self.set_condition(
                CONDITION_READY,
                ConditionStatus::Unknown,
                REASON_INITIALIZING,
                "Initializing",
            );
        }
    }

    pub fn set_ready_running(&mut self) {
        self.set_condition(CONDITION_READY, ConditionStatus::True, REASON_RUNNING, "Running");
    }

    pub fn set_ready_failed(&mut self, message: impl Into<String>) {
        self.set_condition(CONDITION_READY, ConditionStatus::False, REASON_FAILED, message);
    }

    pub fn set_ready_ref_resolver(&mut self, message: impl Into<String>) {
        self.set_condition(
            CONDITION_READY,
            ConditionStatus::False,
            REASON_REF_RESOLVER,
            message,
        );
    }

    /// Replaces the observed servers and recomputes the primary.
    pub fn set_servers(&mut self, servers: Vec<ServerStatus>) {
        self.primary_server = servers
            .iter()
            .find(|s| s.is_primary())
            .map(|s| s.name.clone());
        self.servers = Some(servers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_transitions() {
        let mut status = ProxyStatus::default();
        status.set_ready_initializing();
        assert_eq!(status.ready().map(|c| c.status), Some(ConditionStatus::Unknown));

        status.set_ready_failed("boom");
        let failed_at = status.ready().unwrap().last_transition_time;
        status.set_ready_failed("boom again");
        let ready = status.ready().unwrap();
        assert_eq!(ready.last_transition_time, failed_at);
        assert_eq!(ready.message, "boom again");
        assert_eq!(ready.reason, REASON_FAILED);

        status.set_ready_initializing();
        assert_eq!(status.ready().unwrap().status, ConditionStatus::False);

        status.set_ready_running();
        assert!(status.is_ready());
        assert_eq!(status.conditions.len(), 1);
    }

    #[test]
    fn test_primary_server_from_states() {
        let mut status = ProxyStatus::default();
        status.set_servers(vec![
            ServerStatus {
                name: "s0".to_string(),
                state: "Slave, Running".to_string(),
            },
            ServerStatus {
                name: "s1".to_string(),
                state: "Master, Running".to_string(),
            },
        ]);
        assert_eq!(status.primary_server.as_deref(), Some("s1"));

        status.set_servers(vec![]);
        assert!(status.primary_server.is_none());
        assert_eq!(status.servers, Some(vec![]));
    }
}
