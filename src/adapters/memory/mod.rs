//! In-memory implementations of every port.
//!
//! They back the test suite and the `simulate` command. State lives behind
//! plain mutexes so fixtures can be arranged and inspected synchronously;
//! no lock is ever held across an await point.

mod builder;
mod platform;
mod proxy;
mod sql;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use builder::MemoryBuilder;
pub use platform::{MemoryCerts, MemoryPlatform, MemoryUserGrants};
pub use proxy::{MemoryClient, MemoryPod, MemoryProxyFactory, DEFAULT_ADMIN_USERNAME};
pub use sql::MemorySqlFactory;

use crate::domain::errors::DomainError;
use crate::domain::models::ProxyResource;
use crate::services::phase_orchestrator::EngineDeps;
use crate::services::platform_objects::password_secret_refs;

/// Failure injected into a fake call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    NotFound,
    Unauthorized,
    Hard,
}

impl Failure {
    pub(crate) fn into_error(self, operation: &str) -> DomainError {
        match self {
            Self::NotFound => DomainError::not_found("object", operation),
            Self::Unauthorized => DomainError::Unauthorized(operation.to_string()),
            Self::Hard => DomainError::ProxyApi {
                status: 500,
                message: format!("injected failure on {operation}"),
            },
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A complete fake world: platform, proxy pods and backing database.
pub struct MemoryEnvironment {
    pub platform: Arc<MemoryPlatform>,
    pub builder: Arc<MemoryBuilder>,
    pub certs: Arc<MemoryCerts>,
    pub proxies: Arc<MemoryProxyFactory>,
    pub sql: Arc<MemorySqlFactory>,
    pub user_grants: Arc<MemoryUserGrants>,
}

impl MemoryEnvironment {
    pub fn new() -> Self {
        Self {
            platform: Arc::new(MemoryPlatform::new()),
            builder: Arc::new(MemoryBuilder),
            certs: Arc::new(MemoryCerts),
            proxies: Arc::new(MemoryProxyFactory::new()),
            sql: Arc::new(MemorySqlFactory::new()),
            user_grants: Arc::new(MemoryUserGrants::new()),
        }
    }

    /// Engine dependencies wired to this environment.
    pub fn deps(&self) -> EngineDeps {
        EngineDeps {
            platform: self.platform.clone(),
            builder: self.builder.clone(),
            objects: self.platform.clone(),
            secrets: self.platform.clone(),
            resolver: self.platform.clone(),
            certs: self.certs.clone(),
            rbac: self.platform.clone(),
            user_grants: self.user_grants.clone(),
            proxies: self.proxies.clone(),
            sql: self.sql.clone(),
        }
    }

    /// Stores a password for every secret the proxy references.
    pub fn seed_secrets(&self, proxy: &ProxyResource) {
        for secret in password_secret_refs(proxy) {
            let selector = &secret.selector;
            if !selector.is_initialized() {
                continue;
            }
            if self
                .platform
                .secret_value(proxy.namespace(), &selector.name, &selector.key)
                .is_none()
            {
                self.platform.set_secret(
                    proxy.namespace(),
                    &selector.name,
                    &selector.key,
                    &format!("{}-password", selector.name),
                );
            }
        }
    }
}

impl Default for MemoryEnvironment {
    fn default() -> Self {
        Self::new()
    }
}
