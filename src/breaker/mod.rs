//! Per-kind circuit breakers.
//!
//! One breaker per resource kind, created on first use. Each breaker has its
//! own lock; a failing kind never serializes calls for unrelated kinds.

mod circuit_breaker;

pub use circuit_breaker::{
    BreakerPermit, BreakerState, CircuitBreaker, CircuitBreakerState, CircuitOpen,
};

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::CircuitBreakerConfig;

/// Registry owning the breakers of one engine instance.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Breaker for `kind`, created closed on first use.
    pub fn breaker(&self, kind: &str) -> Arc<CircuitBreaker> {
        if let Some(b) = self.breakers.get(kind) {
            return b.value().clone();
        }
        self.breakers
            .entry(kind.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(kind, &self.config)))
            .value()
            .clone()
    }

    /// Ask to make one call against `kind`.
    pub fn acquire(&self, kind: &str) -> Result<BreakerPermit, CircuitOpen> {
        if !self.config.enabled {
            return Ok(BreakerPermit::unguarded());
        }
        self.breaker(kind).acquire()
    }

    /// State of every breaker created so far, by kind.
    pub fn snapshot(&self) -> BTreeMap<String, CircuitBreakerState> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }

    /// Kinds whose breaker is currently open.
    pub fn open_kinds(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter(|(_, s)| s.state == BreakerState::Open)
            .map(|(kind, _)| kind)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }
}
