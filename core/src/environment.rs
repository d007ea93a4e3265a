//! Injected dependencies of the engine.
//!
//! Services never reach for ambient global state: the datastore, the identity
//! collaborator and the clock are handed in through [`BookstoreEnvironment`].

use crate::store::{Datastore, IdentityProvider};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Clock trait - abstracts time operations for testability
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Dependencies shared by every service.
///
/// Cloning is cheap: all members are reference counted.
#[derive(Clone)]
pub struct BookstoreEnvironment {
    /// Relational store holding ledgers and orders
    pub datastore: Arc<dyn Datastore>,
    /// Authentication collaborator
    pub identity: Arc<dyn IdentityProvider>,
    /// Time source for order timestamps, coupon expiry and sweep cutoffs
    pub clock: Arc<dyn Clock>,
}

impl BookstoreEnvironment {
    /// Creates a new environment
    #[must_use]
    pub fn new(
        datastore: Arc<dyn Datastore>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            datastore,
            identity,
            clock,
        }
    }
}

impl std::fmt::Debug for BookstoreEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookstoreEnvironment").finish_non_exhaustive()
    }
}
