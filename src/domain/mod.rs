//! Domain layer for the proxy reconciliation engine
//!
//! This module contains core domain models, errors and the capability ports
//! the engine drives.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult, ErrorBundle, ErrorKind, ResultExt};
