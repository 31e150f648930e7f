//! Repository Layer - Core Traits
//!
//! Defines the abstract key-value interface the planning is saved through.
//! Implementations can use SQLite, in-memory, etc.

use async_trait::async_trait;
use crate::domain::{DomainError, DomainResult};

/// String key-value storage
///
/// All operations are async to support various backends.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Value stored under `key`
    async fn get(&self, key: &str) -> DomainResult<Option<String>>;

    /// Insert or overwrite `key`.
    /// Fails with `QuotaExceeded` when the backend refuses the size.
    async fn put(&self, key: &str, value: &str) -> DomainResult<()>;

    /// Remove `key`, returning whether it existed
    async fn delete(&self, key: &str) -> DomainResult<bool>;

    /// Keys starting with `prefix`, sorted
    async fn keys(&self, prefix: &str) -> DomainResult<Vec<String>>;
}

/// Shared quota rule of the backends
pub(crate) fn check_quota(key: &str, value: &str, quota: Option<usize>) -> DomainResult<()> {
    match quota {
        Some(limit) if value.len() > limit => Err(DomainError::QuotaExceeded(format!(
            "{} bytes for {} exceeds the {} byte limit",
            value.len(),
            key,
            limit
        ))),
        _ => Ok(()),
    }
}
