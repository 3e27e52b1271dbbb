//! Key-value storage adapter.
//!
//! Implements [`StoragePort`] over an in-memory map: the simulation
//! backend used on the host and in tests.  A flash-backed build supplies
//! its own `StoragePort`; the API core stores a single postcard record
//! (`api::noise_psk`) through it.
//!
//! # Security
//!
//! - The host backend is plaintext and volatile (dev/test only).
//! - Namespace isolation: keys are stored as `namespace::key`.
//! - Writes replace the whole value, never a prefix.

use std::cell::RefCell;
use std::collections::HashMap;

use log::{debug, info};

use crate::app::ports::{StorageError, StoragePort};

/// Largest value the backend accepts, matching a single NVS blob page.
const MAX_BLOB_SIZE: usize = 4000;

pub struct NvsAdapter {
    store: RefCell<HashMap<String, Vec<u8>>>,
}

impl Default for NvsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl NvsAdapter {
    pub fn new() -> Self {
        info!("NvsAdapter: simulation backend");
        Self {
            store: RefCell::new(HashMap::new()),
        }
    }

    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let composite = Self::composite_key(namespace, key);
        match self.store.borrow().get(&composite) {
            Some(data) if data.len() > buf.len() => Err(StorageError::Full),
            Some(data) => {
                buf[..data.len()].copy_from_slice(data);
                Ok(data.len())
            }
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if data.len() > MAX_BLOB_SIZE {
            return Err(StorageError::Full);
        }
        let composite = Self::composite_key(namespace, key);
        debug!("NvsAdapter: write {} ({} bytes)", composite, data.len());
        self.store.borrow_mut().insert(composite, data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        let composite = Self::composite_key(namespace, key);
        self.store.borrow_mut().remove(&composite);
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        let composite = Self::composite_key(namespace, key);
        self.store.borrow().contains_key(&composite)
    }
}
