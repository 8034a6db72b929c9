//! Crank configuration

use std::time::Duration;

use leasehold_ledger::Commitment;
use serde::{Deserialize, Serialize};

use crate::error::{CrankError, Result};

/// How batches are driven within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Scheduling {
    /// One batch fully resolved before the next starts
    Sequential,
    /// One task per batch, at most `max_in_flight` submitting at once
    Concurrent {
        #[serde(default = "default_max_in_flight")]
        max_in_flight: usize,
    },
}

impl Default for Scheduling {
    fn default() -> Self {
        Self::Concurrent {
            max_in_flight: default_max_in_flight(),
        }
    }
}

/// Settings for one crank run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrankConfig {
    /// Escrows per submitted operation
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Batches per run; the rest wait for the next run
    #[serde(default = "default_max_batches")]
    pub max_batches: usize,

    /// Retries after the first attempt, for transient failures only
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    /// Base backoff between retries, multiplied by the attempt number
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default)]
    pub scheduling: Scheduling,

    /// Escrow addresses per lookup request
    #[serde(default = "default_lookup_chunk_size")]
    pub lookup_chunk_size: usize,

    /// Pause between lookup requests
    #[serde(default)]
    pub lookup_pause_ms: u64,

    #[serde(default)]
    pub commitment: Commitment,

    /// Randomize batch membership so a stuck escrow does not always land
    /// in the same batch
    #[serde(default = "default_true")]
    pub shuffle: bool,
}

impl Default for CrankConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_batches: default_max_batches(),
            retry_budget: default_retry_budget(),
            retry_backoff_ms: default_retry_backoff_ms(),
            scheduling: Scheduling::default(),
            lookup_chunk_size: default_lookup_chunk_size(),
            lookup_pause_ms: 0,
            commitment: Commitment::default(),
            shuffle: true,
        }
    }
}

impl CrankConfig {
    /// Reject settings that would make a run do nothing or spin
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(CrankError::configuration("batch_size must be at least 1"));
        }
        if self.max_batches == 0 {
            return Err(CrankError::configuration("max_batches must be at least 1"));
        }
        if self.lookup_chunk_size == 0 {
            return Err(CrankError::configuration("lookup_chunk_size must be at least 1"));
        }
        if let Scheduling::Concurrent { max_in_flight: 0 } = self.scheduling {
            return Err(CrankError::configuration("max_in_flight must be at least 1"));
        }
        Ok(())
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn lookup_pause(&self) -> Duration {
        Duration::from_millis(self.lookup_pause_ms)
    }
}

// =============================================================================
// Default Functions
// =============================================================================

fn default_batch_size() -> usize {
    4
}

fn default_max_batches() -> usize {
    100
}

fn default_retry_budget() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_max_in_flight() -> usize {
    8
}

fn default_lookup_chunk_size() -> usize {
    2000
}

fn default_true() -> bool {
    true
}
