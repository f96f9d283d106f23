// ABOUTME: Optional diagnostics attached to a managed channel at construction.
// ABOUTME: Holds the creation backtrace, effective channel options, and traffic stats.

use std::backtrace::Backtrace;
use std::fmt;
use std::sync::Arc;

use crate::stats::{ChannelStats, StatsSnapshot};

/// A single effective channel setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOption {
    pub name: String,
    pub value: String,
}

impl ChannelOption {
    pub fn new(name: impl Into<String>, value: impl fmt::Display) -> Self {
        Self {
            name: name.into(),
            value: value.to_string(),
        }
    }
}

impl fmt::Display for ChannelOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Diagnostics for a channel. Nothing in the channel's lifecycle depends on these.
#[derive(Debug)]
pub struct ChannelDiagnostics {
    stack_trace: String,
    options: Vec<ChannelOption>,
    stats: Arc<ChannelStats>,
}

impl ChannelDiagnostics {
    /// Capture the caller's backtrace and start fresh traffic counters.
    pub fn capture(options: Vec<ChannelOption>) -> Self {
        Self {
            stack_trace: Backtrace::force_capture().to_string(),
            options,
            stats: Arc::new(ChannelStats::new()),
        }
    }

    /// Where the channel was created.
    pub fn stack_trace(&self) -> &str {
        &self.stack_trace
    }

    pub fn options(&self) -> &[ChannelOption] {
        &self.options
    }

    pub fn stats(&self) -> &Arc<ChannelStats> {
        &self.stats
    }

    pub fn traffic(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_records_options_and_fresh_stats() {
        let diagnostics = ChannelDiagnostics::capture(vec![
            ChannelOption::new("tls", false),
            ChannelOption::new("connect_timeout_ms", 250),
        ]);

        assert_eq!(diagnostics.options().len(), 2);
        assert_eq!(diagnostics.options()[1].to_string(), "connect_timeout_ms=250");
        assert_eq!(diagnostics.traffic(), StatsSnapshot::default());
        assert!(!diagnostics.stack_trace().is_empty());
    }

    #[test]
    fn test_stats_are_shared() {
        let diagnostics = ChannelDiagnostics::capture(Vec::new());
        let stats = Arc::clone(diagnostics.stats());
        stats.add_sent_bytes(10);
        assert_eq!(diagnostics.traffic().sent_bytes, 10);
    }
}
