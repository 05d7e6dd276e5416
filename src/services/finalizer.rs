//! Finalizer lifecycle of a proxy resource.
//!
//! While the resource is active the finalizer is kept in place. Once deletion
//! is requested every cleanup step is attempted, failures are collected, and
//! the finalizer is removed regardless so deletion cannot get stuck on a
//! target that no longer exists.

use tracing::{info, warn};

use crate::domain::errors::{DomainError, DomainResult, ErrorBundle, ErrorKind, ResultExt};
use crate::domain::models::{ProxyResource, ReconcileContext};
use crate::domain::ports::{PlatformApi, SqlClientFactory};
use crate::services::config_sync::drop_config_table;

/// Adds the finalizer to an active resource that does not carry it yet.
pub async fn ensure_finalizer(
    ctx: &ReconcileContext,
    proxy: &mut ProxyResource,
    platform: &dyn PlatformApi,
) -> DomainResult<()> {
    if proxy.has_finalizer() {
        return Ok(());
    }
    proxy.add_finalizer();
    platform
        .patch_proxy(ctx, proxy)
        .await
        .context("error adding finalizer")
}

/// Runs every cleanup step and removes the finalizer.
///
/// Returns the collected cleanup errors; they are logged, not fatal. Only a
/// cancelled tick or a failure to remove the finalizer itself is an error.
pub async fn finalize(
    ctx: &ReconcileContext,
    proxy: &mut ProxyResource,
    platform: &dyn PlatformApi,
    sql_clients: &dyn SqlClientFactory,
) -> DomainResult<ErrorBundle> {
    let mut bundle = ErrorBundle::new();
    if !proxy.has_finalizer() {
        return Ok(bundle);
    }
    info!(resource = %proxy.key(), "finalizing");

    bundle.collect(
        platform
            .delete_volume_claims(ctx, proxy.namespace(), &proxy.selector_labels())
            .await
            .context("error deleting PVCs"),
    );
    bundle.collect(drop_config_table(ctx, proxy, sql_clients).await);

    if bundle.errors().iter().any(|e| e.kind() == ErrorKind::Cancelled) {
        return Err(DomainError::Cancelled);
    }
    if !bundle.is_empty() {
        warn!(error = %bundle, "cleanup finished with errors, removing finalizer anyway");
    }

    proxy.remove_finalizer();
    platform
        .patch_proxy(ctx, proxy)
        .await
        .context("error removing finalizer")?;
    Ok(bundle)
}
