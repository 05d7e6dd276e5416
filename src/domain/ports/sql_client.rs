//! Backing database access.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ProxyResource, ReconcileContext};

/// SQL connection to the backing database.
#[async_trait]
pub trait SqlClient: Send + Sync {
    /// Drop the table config sync stores its state in.
    ///
    /// A missing table is reported as `NotFound`.
    async fn drop_config_table(&self, ctx: &ReconcileContext, database: &str) -> DomainResult<()>;
}

#[async_trait]
pub trait SqlClientFactory: Send + Sync {
    /// Connect to the primary of the database referenced by `proxy`.
    async fn primary_client(
        &self,
        ctx: &ReconcileContext,
        proxy: &ProxyResource,
    ) -> DomainResult<Box<dyn SqlClient>>;
}
