use std::fmt;

use chrono::{DateTime, Utc};

use crate::database::models::TargetId;

/// Round-trip time statistics of one probe, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RttStats {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

impl fmt::Display for RttStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "min {:.3} ms / avg {:.3} ms / max {:.3} ms", self.min, self.avg, self.max)
    }
}

/// Result of probing one target once.
///
/// Latency statistics exist exactly when the probe succeeded, the constructors
/// are the only way to build one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOutcome {
    rtt: Option<RttStats>,
}

impl ProbeOutcome {
    pub fn success(rtt: RttStats) -> Self {
        Self { rtt: Some(rtt) }
    }

    pub fn failure() -> Self {
        Self { rtt: None }
    }

    pub fn succeeded(&self) -> bool {
        self.rtt.is_some()
    }

    pub fn rtt(&self) -> Option<RttStats> {
        self.rtt
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rtt {
            Some(rtt) => write!(f, "up ({rtt})"),
            None => write!(f, "down"),
        }
    }
}

/// Session-scoped success/failure counters of a target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub success: u64,
    pub failure: u64,
}

impl Counters {
    pub fn record(&mut self, outcome: &ProbeOutcome) {
        if outcome.succeeded() {
            self.success += 1;
        } else {
            self.failure += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.success + self.failure
    }

    /// Share of successful probes since start, 0 before the first probe
    pub fn success_percentage(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.success as f64 / total as f64 * 100.0,
        }
    }
}

/// A monitored endpoint together with its storage identity
#[derive(Debug, Clone)]
pub struct Target {
    pub id: TargetId,
    pub address: String,
    pub alias: String,
    pub counters: Counters,
}

impl Target {
    pub fn new(id: TargetId, address: String, alias: String) -> Self {
        Self { id, address, alias, counters: Counters::default() }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.alias, self.address)
    }
}

/// One row handed to storage for a target in a cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultRecord {
    /// Start of the cycle, shared by every target of that cycle
    pub timestamp: DateTime<Utc>,
    pub succeeded: bool,
    pub rtt_min: Option<f64>,
    pub rtt_avg: Option<f64>,
    pub rtt_max: Option<f64>,
}

impl ResultRecord {
    pub fn new(timestamp: DateTime<Utc>, outcome: &ProbeOutcome) -> Self {
        let rtt = outcome.rtt();
        Self {
            timestamp,
            succeeded: outcome.succeeded(),
            rtt_min: rtt.map(|r| r.min),
            rtt_avg: rtt.map(|r| r.avg),
            rtt_max: rtt.map(|r| r.max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> RttStats {
        RttStats { min: 1.5, avg: 2.5, max: 3.5 }
    }

    #[test]
    fn test_outcome_rtt_present_iff_succeeded() {
        for outcome in [ProbeOutcome::success(stats()), ProbeOutcome::failure()] {
            assert_eq!(outcome.succeeded(), outcome.rtt().is_some());
        }
        assert_eq!(ProbeOutcome::success(stats()).rtt(), Some(stats()));
        assert!(!ProbeOutcome::failure().succeeded());
    }

    #[test]
    fn test_counters() {
        let mut counters = Counters::default();
        assert_eq!(counters.success_percentage(), 0.0);

        counters.record(&ProbeOutcome::success(stats()));
        counters.record(&ProbeOutcome::success(stats()));
        counters.record(&ProbeOutcome::success(stats()));
        counters.record(&ProbeOutcome::failure());

        assert_eq!(counters, Counters { success: 3, failure: 1 });
        assert_eq!(counters.total(), 4);
        assert_eq!(counters.success_percentage(), 75.0);
    }

    #[test]
    fn test_result_record_from_outcome() {
        let now = Utc::now();

        let record = ResultRecord::new(now, &ProbeOutcome::success(stats()));
        assert!(record.succeeded);
        assert_eq!((record.rtt_min, record.rtt_avg, record.rtt_max), (Some(1.5), Some(2.5), Some(3.5)));

        let record = ResultRecord::new(now, &ProbeOutcome::failure());
        assert!(!record.succeeded);
        assert_eq!(record.rtt_avg, None);
        assert_eq!(record.timestamp, now);
    }
}
