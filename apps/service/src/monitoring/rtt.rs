//! Parsing of the summary line printed by `ping`.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::types::RttStats;

static RTT_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"rtt min/avg/max/mdev = (\d+(?:\.\d+)?)/(\d+(?:\.\d+)?)/(\d+(?:\.\d+)?)/(\d+(?:\.\d+)?)")
        .expect("RTT summary pattern is valid")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RttParseError {
    #[error("no 'rtt min/avg/max/mdev' summary in probe output")]
    MissingSummary,
    #[error("invalid number in rtt summary: {0}")]
    InvalidNumber(String),
}

/// Extract min/avg/max from a `rtt min/avg/max/mdev = a/b/c/d ms` line.
///
/// `mdev` is ignored.
pub fn parse_rtt(raw_output: &str) -> Result<RttStats, RttParseError> {
    let captures = RTT_SUMMARY.captures(raw_output).ok_or(RttParseError::MissingSummary)?;

    let field = |index: usize| -> Result<f64, RttParseError> {
        let text = &captures[index];
        text.parse().map_err(|_| RttParseError::InvalidNumber(text.to_string()))
    };

    Ok(RttStats { min: field(1)?, avg: field(2)?, max: field(3)? })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REACHABLE: &str = "PING 8.8.8.8 (8.8.8.8) 56(84) bytes of data.
64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=10.1 ms
64 bytes from 8.8.8.8: icmp_seq=2 ttl=117 time=20.7 ms
64 bytes from 8.8.8.8: icmp_seq=3 ttl=117 time=15.5 ms
64 bytes from 8.8.8.8: icmp_seq=4 ttl=117 time=15.4 ms

--- 8.8.8.8 ping statistics ---
4 packets transmitted, 4 received, 0% packet loss, time 3004ms
rtt min/avg/max/mdev = 10.123/15.456/20.789/2.000 ms
";

    #[test]
    fn test_parse_full_report() {
        let stats = parse_rtt(REACHABLE).unwrap();
        assert_eq!(stats, RttStats { min: 10.123, avg: 15.456, max: 20.789 });
    }

    #[test]
    fn test_parse_summary_line_only() {
        let stats = parse_rtt("rtt min/avg/max/mdev = 0.042/0.051/0.067/0.009 ms").unwrap();
        assert_eq!(stats.min, 0.042);
        assert_eq!(stats.avg, 0.051);
        assert_eq!(stats.max, 0.067);
    }

    #[test]
    fn test_parse_ignores_mdev() {
        let a = parse_rtt("rtt min/avg/max/mdev = 1.000/2.000/3.000/0.100 ms").unwrap();
        let b = parse_rtt("rtt min/avg/max/mdev = 1.000/2.000/3.000/9.900 ms").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_missing_summary() {
        let unreachable = "PING 10.255.255.1 (10.255.255.1) 56(84) bytes of data.

--- 10.255.255.1 ping statistics ---
4 packets transmitted, 0 received, 100% packet loss, time 3071ms
";
        assert_eq!(parse_rtt(unreachable), Err(RttParseError::MissingSummary));
        assert_eq!(parse_rtt(""), Err(RttParseError::MissingSummary));
        assert_eq!(parse_rtt("ping: socket: Operation not permitted"), Err(RttParseError::MissingSummary));
    }

    #[test]
    fn test_parse_rejects_other_summary_formats() {
        // BSD ping and truncated captures
        assert!(parse_rtt("round-trip min/avg/max/stddev = 9.1/10.2/11.3/0.8 ms").is_err());
        assert!(parse_rtt("rtt min/avg/max/mdev = 10.123/15.4").is_err());
    }
}
