//! Tracing and observability infrastructure
//!
//! Subscriber setup for binaries, and the anomaly counters the dispatcher
//! keeps for orphan, duplicate, late and malformed traffic.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => f.write_str("pretty"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(Error::invalid_input(format!("unknown log format: {}", other))),
        }
    }
}

/// Install the global subscriber. Filtering follows `RUST_LOG`, defaulting to `info`.
pub fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    let installed = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| Error::other(format!("Failed to install tracing subscriber: {}", e)))
}

/// Dispatcher counters
#[derive(Debug, Default)]
pub struct DispatchStats {
    conversations: AtomicU64,
    resolved: AtomicU64,
    escalations: AtomicU64,
    timeouts: AtomicU64,
    send_failures: AtomicU64,
    orphans: AtomicU64,
    duplicates: AtomicU64,
    late: AtomicU64,
    malformed: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Investigations opened
    pub conversations: u64,
    /// Investigations that posted a reply
    pub resolved: u64,
    /// Ticket escalations started
    pub escalations: u64,
    /// Roles recorded as TIMEOUT
    pub timeouts: u64,
    /// Requests that could not be posted
    pub send_failures: u64,
    /// Results for unknown or closed conversations
    pub orphans: u64,
    /// Second results for an already-answered role
    pub duplicates: u64,
    /// Results received after resolution
    pub late: u64,
    /// Specialist-room messages that failed to decode
    pub malformed: u64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            #[doc = concat!("Increment `", stringify!($field), "`")]
            pub fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl DispatchStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    counter! {
        record_conversation => conversations,
        record_resolved => resolved,
        record_escalation => escalations,
        record_send_failure => send_failures,
        record_orphan => orphans,
        record_duplicate => duplicates,
        record_late => late,
        record_malformed => malformed,
    }

    /// Add synthesized timeouts
    pub fn record_timeouts(&self, count: usize) {
        self.timeouts.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Copy the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            conversations: self.conversations.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            escalations: self.escalations.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            orphans: self.orphans.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            late: self.late.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = DispatchStats::new();
        stats.record_orphan();
        stats.record_orphan();
        stats.record_duplicate();
        stats.record_timeouts(3);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.orphans, 2);
        assert_eq!(snapshot.duplicates, 1);
        assert_eq!(snapshot.timeouts, 3);
        assert_eq!(snapshot.late, 0);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
