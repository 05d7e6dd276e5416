pub mod auth;
pub mod change_gate;
pub mod config_sync;
pub mod convergence;
pub mod finalizer;
pub mod phase_orchestrator;
pub mod platform_objects;
pub mod pod_clients;
pub mod proxy_config;

pub use change_gate::{hash_json, should_converge, GateDecision};
pub use convergence::Convergence;
pub use phase_orchestrator::{EngineDeps, Phase, PhaseOrchestrator, ReconcileRequest};
pub use pod_clients::{setup_clients, PodClients, PodTarget};
pub use proxy_config::render_proxy_config;
