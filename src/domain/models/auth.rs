use serde::Serialize;

use super::resource::ResourceKey;
use super::spec::{DatabaseRef, SecretKeySelector};

/// A database user to create for one internal role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserOpts {
    pub name: String,
    pub password_secret_key_ref: SecretKeySelector,
    pub max_user_connections: u32,
    pub database_ref: DatabaseRef,
}

/// A privilege grant for a user on `database.table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantOpts {
    pub key: ResourceKey,
    pub privileges: Vec<String>,
    pub database: String,
    pub table: String,
    pub username: String,
    pub host: String,
    pub grant_option: bool,
    pub database_ref: DatabaseRef,
}

impl GrantOpts {
    pub fn has_privilege(&self, privilege: &str) -> bool {
        self.privileges.iter().any(|p| p == privilege)
    }
}

/// A user and all of its grants, reconciled atomically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthReconcileItem {
    pub key: ResourceKey,
    pub user: UserOpts,
    pub grants: Vec<GrantOpts>,
}
