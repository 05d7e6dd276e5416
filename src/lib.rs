//! sqlproxy-operator - reconciliation engine for a clustered SQL proxy
//!
//! Converges the live, per-replica runtime configuration of a multi-replica
//! SQL proxy (servers, monitor, services, listeners, admin users and
//! config-sync state) toward a declarative resource spec.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): resource model, diffing and the capability ports
//! - **Service Layer** (`services`): phases of a reconcile tick and the orchestrator
//! - **Application Layer** (`application`): scheduler-side driver
//! - **Adapters** (`adapters`): in-memory implementations of every port
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sqlproxy_operator::adapters::memory::MemoryEnvironment;
//! use sqlproxy_operator::{Config, PhaseOrchestrator, ReconcileContext, ResourceKey};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let env = MemoryEnvironment::new();
//!     let orchestrator = PhaseOrchestrator::new(env.deps(), Config::default());
//!     let ctx = ReconcileContext::default();
//!     let requeue = orchestrator.reconcile(&ctx, &ResourceKey::new("ns", "proxy")).await?;
//!     println!("{requeue:?}");
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use application::{NextRun, ReconcileDriver, TickOutcome};
pub use domain::errors::{DomainError, DomainResult, ErrorBundle, ErrorKind};
pub use domain::models::{
    diff, Config, DiffResult, Index, ProxyResource, ProxySpec, ProxyStatus, ReconcileContext,
    RequeueDirective, ResourceKey,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{EngineDeps, Phase, PhaseOrchestrator};
