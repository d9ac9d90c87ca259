//! Core traits

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BufferError;
use crate::event::Marker;
use crate::identity::Principal;

/// Time abstraction for testability
pub trait Clock: Send + Sync + Debug {
    /// Get the current UTC datetime
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Real clock implementation using system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a single instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Result of a committed trim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimOutcome {
    /// Events removed from the head of the queue
    pub removed: usize,
    /// Events left in the queue after the commit
    pub remaining: usize,
    /// Read-modify-write cycles it took to commit
    pub attempts: u32,
    /// Queue version written by the commit
    pub version: u64,
}

/// Removes an applied prefix from the caller's own queue
///
/// The apply agent acknowledges through this trait so it does not need to
/// know whether the queue is local or behind a remote service.
#[async_trait]
pub trait QueueTrimmer: Send + Sync {
    /// Trim `principal`'s queue through `marker`
    async fn trim(&self, principal: &Principal, marker: &Marker)
        -> Result<TrimOutcome, BufferError>;
}
