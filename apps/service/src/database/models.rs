use chrono::{DateTime, TimeZone, Utc};
use std::fmt;

/// Storage-assigned identifier of a target, stable across restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub i64);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Row of the `targets` table
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRow {
    pub id: TargetId,
    pub address: String,
    pub alias: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted probe result joined with its latency stats
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub timestamp: DateTime<Utc>,
    pub succeeded: bool,
    pub rtt_min: Option<f64>,
    pub rtt_avg: Option<f64>,
    pub rtt_max: Option<f64>,
}

impl fmt::Display for ResultRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time = self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f");
        match (self.succeeded, self.rtt_min, self.rtt_avg, self.rtt_max) {
            (true, Some(min), Some(avg), Some(max)) => {
                write!(f, "{time}  OK  rtt min/avg/max = {min:.3}/{avg:.3}/{max:.3} ms")
            }
            (true, ..) => write!(f, "{time}  OK"),
            (false, ..) => write!(f, "{time}  KO"),
        }
    }
}

/// Convert a timestamp to Unix milliseconds
pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Convert Unix milliseconds to a timestamp
pub fn i64_to_timestamp(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}
