//! Durable storage for session value snapshots.
//!
//! A backend only offers best-effort durability and sharing between processes. The in-memory
//! [`Session`](crate::Session) stays authoritative while the process runs; a backend is consulted
//! when a session is first touched and written through on every value mutation.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::{error::Result, value::Values};

#[cfg(feature = "file-store")]
pub mod file;
#[cfg(feature = "redis-store")]
pub mod redis_store;
#[cfg(feature = "sled-store")]
pub mod sled_store;

#[async_trait]
pub trait SessionBackend: Debug + Send + Sync + 'static {
    /// Load the persisted values for `id`, `Ok(None)` when nothing is stored.
    async fn load(&self, id: &str) -> Result<Option<Values>>;

    /// Persist `values` for `id`, replacing any prior entry. An empty snapshot deletes the entry.
    ///
    /// Implementations may finish the write on a detached task, in which case failures of that
    /// task are logged rather than returned.
    async fn update(&self, id: &str, values: &Values) -> Result<()>;

    /// Report whether an entry for `id` is stored, without handing back its values.
    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.load(id).await?.is_some())
    }
}
