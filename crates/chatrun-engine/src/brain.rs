//! Key/value memory store with checkout tokens.
//!
//! A caller checks a key out, receiving the current data and a token, and
//! must present that token to update it. A later checkout of the same key
//! invalidates earlier tokens, so a stale writer is rejected instead of
//! silently overwriting.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;
use uuid::Uuid;

use crate::state::lock;

/// Errors from the memory store.
#[derive(Debug, Error)]
pub enum BrainError {
    #[error("memory '{0}' was checked out again; update rejected")]
    StaleToken(String),

    #[error("memory '{0}' is not checked out")]
    NotCheckedOut(String),
}

/// Result of a checkout.
#[derive(Debug, Clone)]
pub struct Checkout {
    pub token: String,
    pub data: Option<Vec<u8>>,
}

/// Opaque key/value store.
pub trait Brain: Send + Sync {
    /// Read `key` without checking it out.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, BrainError>;

    /// Check out `key`, returning its current data (if any) and a token.
    fn checkout(&self, key: &str) -> Result<Checkout, BrainError>;

    /// Store `data` for `key`; `token` must be from the latest checkout.
    fn update(&self, key: &str, token: &str, data: Vec<u8>) -> Result<(), BrainError>;

    /// Release a checkout without updating.
    fn checkin(&self, key: &str, token: &str);
}

#[derive(Default)]
struct Memory {
    data: Option<Vec<u8>>,
    token: Option<String>,
}

/// Process-lifetime brain.
#[derive(Default)]
pub struct MemoryBrain {
    memories: Mutex<HashMap<String, Memory>>,
}

impl MemoryBrain {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Brain for MemoryBrain {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, BrainError> {
        Ok(lock(&self.memories).get(key).and_then(|m| m.data.clone()))
    }

    fn checkout(&self, key: &str) -> Result<Checkout, BrainError> {
        let token = Uuid::new_v4().to_string();
        let mut memories = lock(&self.memories);
        let memory = memories.entry(key.to_string()).or_default();
        memory.token = Some(token.clone());
        Ok(Checkout {
            token,
            data: memory.data.clone(),
        })
    }

    fn update(&self, key: &str, token: &str, data: Vec<u8>) -> Result<(), BrainError> {
        let mut memories = lock(&self.memories);
        let memory = memories
            .get_mut(key)
            .ok_or_else(|| BrainError::NotCheckedOut(key.to_string()))?;
        match memory.token.as_deref() {
            Some(t) if t == token => {
                memory.data = Some(data);
                memory.token = None;
                Ok(())
            }
            Some(_) => Err(BrainError::StaleToken(key.to_string())),
            None => Err(BrainError::NotCheckedOut(key.to_string())),
        }
    }

    fn checkin(&self, key: &str, token: &str) {
        if let Some(memory) = lock(&self.memories).get_mut(key) {
            if memory.token.as_deref() == Some(token) {
                memory.token = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_update_roundtrip() {
        let brain = MemoryBrain::new();
        let co = brain.checkout("k").unwrap();
        assert!(co.data.is_none());
        brain.update("k", &co.token, b"v1".to_vec()).unwrap();

        assert_eq!(brain.read("k").unwrap().as_deref(), Some(&b"v1"[..]));
        let co = brain.checkout("k").unwrap();
        assert_eq!(co.data.as_deref(), Some(&b"v1"[..]));
    }

    #[test]
    fn test_stale_token_rejected() {
        let brain = MemoryBrain::new();
        let first = brain.checkout("k").unwrap();
        let second = brain.checkout("k").unwrap();

        assert!(matches!(
            brain.update("k", &first.token, b"old".to_vec()),
            Err(BrainError::StaleToken(_))
        ));
        brain.update("k", &second.token, b"new".to_vec()).unwrap();
        // the token is consumed by a successful update
        assert!(brain.update("k", &second.token, b"again".to_vec()).is_err());
    }

    #[test]
    fn test_checkin_releases() {
        let brain = MemoryBrain::new();
        let co = brain.checkout("k").unwrap();
        brain.checkin("k", &co.token);
        assert!(matches!(
            brain.update("k", &co.token, vec![]),
            Err(BrainError::NotCheckedOut(_))
        ));
    }
}
