use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{lock, Failure};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ProxyResource, ReconcileContext};
use crate::domain::ports::{SqlClient, SqlClientFactory};
use crate::services::auth::CONFIG_SYNC_TABLE;

#[derive(Debug, Default)]
struct SqlState {
    drop_failure: Option<Failure>,
    drop_attempts: usize,
    dropped: Vec<String>,
}

/// Fake backing database.
#[derive(Debug, Default)]
pub struct MemorySqlFactory {
    state: Arc<Mutex<SqlState>>,
}

impl MemorySqlFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later drop of the config table fails with `failure`.
    pub fn fail_drop_with(&self, failure: Failure) {
        lock(&self.state).drop_failure = Some(failure);
    }

    pub fn drop_attempts(&self) -> usize {
        lock(&self.state).drop_attempts
    }

    /// Fully qualified tables dropped so far.
    pub fn dropped(&self) -> Vec<String> {
        lock(&self.state).dropped.clone()
    }
}

#[async_trait]
impl SqlClientFactory for MemorySqlFactory {
    async fn primary_client(
        &self,
        ctx: &ReconcileContext,
        _proxy: &ProxyResource,
    ) -> DomainResult<Box<dyn SqlClient>> {
        ctx.check()?;
        Ok(Box::new(MemorySqlClient {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemorySqlClient {
    state: Arc<Mutex<SqlState>>,
}

#[async_trait]
impl SqlClient for MemorySqlClient {
    async fn drop_config_table(&self, ctx: &ReconcileContext, database: &str) -> DomainResult<()> {
        ctx.check()?;
        let table = format!("{database}.{CONFIG_SYNC_TABLE}");
        let mut state = lock(&self.state);
        state.drop_attempts += 1;
        match state.drop_failure {
            Some(Failure::NotFound) => Err(DomainError::not_found("Table", table)),
            Some(Failure::Unauthorized) => Err(DomainError::Sql(format!(
                "access denied dropping '{table}'"
            ))),
            Some(Failure::Hard) => Err(DomainError::Sql(format!("error dropping '{table}'"))),
            None => {
                state.dropped.push(table);
                Ok(())
            }
        }
    }
}
