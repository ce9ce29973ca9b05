//! Session lifecycle for the OpenID Connect client
//!
//! Owns persisted credentials and the discipline around them. A single worker
//! task serializes every store access; the public handle is cheap to clone and
//! safe to share between the host's request path and the background refresher.
//!
//! Session lifecycle:
//! 1. `TokenLifecycleManager::authorize()` → tokens validated, then persisted as one batch
//! 2. `spawn_refresh_task()` or an explicit `refresh()` → stored refresh token exchanged
//! 3. `revoke()` → one token revoked at the server and forgotten locally
//! 4. `logout()` → server logout, best-effort revocation, full local wipe

pub mod error;
pub mod manager;
pub mod refresh;
pub mod store;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use manager::{Authorized, Collaborators, TokenLifecycleManager};
pub use refresh::{CycleOutcome, refresh_cycle, spawn_refresh_task};
pub use store::{CredentialStore, FileStore, KeyNaming, MemoryStore, StorageItem, StoreError, TokenKind};
