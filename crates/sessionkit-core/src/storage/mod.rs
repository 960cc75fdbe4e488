//! Key/value persistence backends for the session store.
//!
//! This module provides:
//! - `MemoryStorage`: process-local map, used for embedding and tests
//! - `FileStorage`: JSON document in the cache directory, rewritten atomically
//! - `KeyringStorage`: OS-level secure storage via keyring
//!
//! Values are plain strings; callers own their encoding.

pub mod file;
pub mod keychain;
pub mod memory;

use anyhow::Result;

pub use self::file::FileStorage;
pub use self::keychain::KeyringStorage;
pub use self::memory::MemoryStorage;

pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Write several entries together. Backends that can commit them in one
    /// step override this; the default writes them in order.
    fn set_entries(&self, entries: &[(&str, &str)]) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Remove several keys together.
    fn remove_entries(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }
}
