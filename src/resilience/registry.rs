//! Keyed breaker registry.

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
use crate::Result;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Lazily creates one [`CircuitBreaker`] per key and keeps it for the life of the registry.
///
/// Every breaker shares the registry's config. Creation happens under the write lock, so two
/// concurrent first uses of the same key always observe the same instance.
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get_or_create(&self, key: &str) -> Arc<CircuitBreaker> {
        if let Some(b) = self.read().get(key) {
            return Arc::clone(b);
        }

        let mut breakers = self.write();
        let breaker = breakers.entry(key.to_string()).or_insert_with(|| {
            debug!(circuit = %key, "creating circuit breaker");
            // Validated in `new`.
            Arc::new(CircuitBreaker::from_validated(key, self.config.clone()))
        });
        Arc::clone(breaker)
    }

    pub fn get(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.read().get(key).cloned()
    }

    pub fn status(&self, key: &str) -> Option<CircuitBreakerSnapshot> {
        self.get(key).map(|b| b.snapshot())
    }

    /// Force the breaker for `key` closed. Returns `false` if the key was never used.
    pub fn reset(&self, key: &str) -> bool {
        match self.get(key) {
            Some(b) => {
                b.reset();
                true
            }
            None => false,
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}
