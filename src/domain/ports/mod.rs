//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the async capability interfaces the engine drives:
//! - PlatformApi and friends: the orchestration platform (resources, native
//!   objects, secrets, certificates, RBAC, database users)
//! - ProxyClient: the per-pod REST admin API of the proxy
//! - SqlClient: the backing database
//!
//! These traits keep the reconciliation logic independent of any concrete
//! platform or wire client.

pub mod platform;
pub mod proxy_client;
pub mod sql_client;

pub use platform::{
    CertReconciler, ObjectBuilder, ObjectReconciler, PlatformApi, RbacReconciler,
    SecretReconciler, SecretResolver, UserGrantReconciler,
};
pub use proxy_client::{ConfigSyncApi, ObjectApi, ProxyClient, ProxyClientFactory, UserApi};
pub use sql_client::{SqlClient, SqlClientFactory};
