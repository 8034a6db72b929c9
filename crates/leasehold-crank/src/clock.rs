//! Clock reconciliation
//!
//! The ledger clock is sampled once per run. Later readings add the local
//! time elapsed since the sample, so every decision in a run uses the same
//! reference and time never runs backwards within it.

use chrono::Utc;
use leasehold_ledger::LedgerReader;
use leasehold_types::UnixTimestamp;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Where the run's reference time came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockSource {
    Ledger,
    /// Ledger clock was unavailable; local wall clock used instead
    LocalFallback,
}

/// Corrected notion of "now" for one run
#[derive(Debug, Clone)]
pub struct ClockReconciler {
    anchor: UnixTimestamp,
    sampled_at: Instant,
    source: ClockSource,
}

impl ClockReconciler {
    /// Sample the ledger clock. An unavailable clock is not fatal.
    pub async fn sample(reader: &dyn LedgerReader) -> Self {
        match reader.ledger_time().await {
            Ok(ledger_time) => {
                debug!(ledger_time, "Sampled ledger clock");
                Self::anchored(ledger_time, ClockSource::Ledger)
            }
            Err(e) => {
                warn!(error = %e, "Ledger clock unavailable, falling back to local time");
                Self::anchored(Utc::now().timestamp(), ClockSource::LocalFallback)
            }
        }
    }

    /// Anchor at a known instant, starting now
    pub fn anchored(anchor: UnixTimestamp, source: ClockSource) -> Self {
        Self {
            anchor,
            sampled_at: Instant::now(),
            source,
        }
    }

    /// Anchor plus whole seconds elapsed locally since the sample
    pub fn now(&self) -> UnixTimestamp {
        let elapsed = i64::try_from(self.sampled_at.elapsed().as_secs()).unwrap_or(i64::MAX);
        self.anchor.saturating_add(elapsed)
    }

    pub fn anchor(&self) -> UnixTimestamp {
        self.anchor
    }

    pub fn source(&self) -> ClockSource {
        self.source
    }
}
