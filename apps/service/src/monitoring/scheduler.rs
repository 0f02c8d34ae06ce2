use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, warn};

use super::prober::Prober;
use super::types::{ProbeOutcome, ResultRecord, Target};
use crate::config::cycles_per_summary;
use crate::database::Storage;

/// What happens between the end of one cycle and the start of the next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Sleep for the rest of the interval
    Sleep(Duration),
    /// The cycle took the whole interval or longer, start the next one now
    Overrun(Duration),
}

/// Drift correction: the interval is measured from cycle start to cycle start
pub fn cadence(interval: Duration, elapsed: Duration) -> Cadence {
    match interval.checked_sub(elapsed) {
        Some(remaining) if !remaining.is_zero() => Cadence::Sleep(remaining),
        _ => Cadence::Overrun(elapsed - interval),
    }
}

/// Summaries go out on cycle 1 and then every `every` cycles
pub fn summary_due(cycle: u64, every: u64) -> bool {
    cycle >= 1 && (cycle - 1) % every.max(1) == 0
}

/// What a single cycle produced
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// 1-based cycle number
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// One outcome per target, in configured order
    pub outcomes: Vec<ProbeOutcome>,
    pub persist_failures: usize,
}

impl CycleReport {
    fn log(&self) {
        let reachable = self.outcomes.iter().filter(|outcome| outcome.succeeded()).count();
        debug!(
            "Cycle {} started at {}: {}/{} targets reachable, took {:?}",
            self.cycle,
            self.started_at.to_rfc3339(),
            reachable,
            self.outcomes.len(),
            self.elapsed
        );
        if self.persist_failures > 0 {
            warn!(
                "Cycle {}: {} of {} results could not be stored",
                self.cycle,
                self.persist_failures,
                self.outcomes.len()
            );
        }
    }
}

/// Drives fixed-interval polling of all targets
pub struct CycleScheduler {
    targets: Vec<Target>,
    prober: Arc<Prober>,
    storage: Arc<dyn Storage>,
    interval: Duration,
    probe_deadline: Duration,
    summary_every: u64,
    cycle: u64,
    last_started_at: Option<DateTime<Utc>>,
}

impl CycleScheduler {
    pub fn new(
        targets: Vec<Target>,
        prober: Arc<Prober>,
        storage: Arc<dyn Storage>,
        interval: Duration,
        probe_deadline: Duration,
    ) -> Self {
        Self {
            targets,
            prober,
            storage,
            interval,
            probe_deadline,
            summary_every: cycles_per_summary(interval.as_secs()),
            cycle: 0,
            last_started_at: None,
        }
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Run cycles until `shutdown` resolves.
    ///
    /// A cycle in progress is always finished, shutdown is only observed
    /// between cycles.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        loop {
            let report = self.run_cycle().await;

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Stopping after {} cycles", report.cycle);
                    return;
                }
                _ = self.pause(report.elapsed) => {}
            }
        }
    }

    /// Run a fixed number of cycles, sleeping between them but not after the last
    pub async fn run_cycles(&mut self, cycles: u64) {
        for remaining in (0..cycles).rev() {
            let report = self.run_cycle().await;
            if remaining > 0 {
                self.pause(report.elapsed).await;
            }
        }
    }

    /// Probe every target once, update counters and persist the results
    pub async fn run_cycle(&mut self) -> CycleReport {
        let start = Instant::now();
        let started_at = self.next_started_at();
        self.cycle += 1;

        // Probing: all targets at once, wait for every one of them
        let probes = self.targets.iter().map(|target| self.probe_with_deadline(target));
        let outcomes = join_all(probes).await;

        // Aggregating
        for (target, outcome) in self.targets.iter_mut().zip(&outcomes) {
            target.counters.record(outcome);
        }

        // Persisting, one write at a time
        let mut persist_failures = 0;
        for (target, outcome) in self.targets.iter().zip(&outcomes) {
            let record = ResultRecord::new(started_at, outcome);
            if let Err(e) = self.storage.record_result(target.id, &record).await {
                persist_failures += 1;
                error!("Failed to record result for {}: {:#}", target, e);
            }
        }

        if summary_due(self.cycle, self.summary_every) {
            info!("{}", self.summary());
        }

        let report = CycleReport { cycle: self.cycle, started_at, elapsed: start.elapsed(), outcomes, persist_failures };
        report.log();
        report
    }

    async fn probe_with_deadline(&self, target: &Target) -> ProbeOutcome {
        match timeout(self.probe_deadline, self.prober.probe(&target.address)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("Probe of {} did not finish within {:?}, counting it as failed", target, self.probe_deadline);
                ProbeOutcome::failure()
            }
        }
    }

    async fn pause(&self, elapsed: Duration) -> Cadence {
        let next = cadence(self.interval, elapsed);
        match next {
            Cadence::Sleep(remaining) => {
                debug!("Cycle took {:?}, next one in {:?}", elapsed, remaining);
                sleep(remaining).await;
            }
            Cadence::Overrun(_) => {
                warn!(
                    "One cycle took {:?}, interval configured of {:?} is likely too short. Consider increasing it.",
                    elapsed, self.interval
                );
            }
        }
        next
    }

    /// Wall-clock start of the next cycle, strictly after the previous one
    /// even if the system clock stalls or steps back.
    fn next_started_at(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let now = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);

        let started_at = match self.last_started_at {
            Some(last) if now <= last => last + chrono::Duration::milliseconds(1),
            _ => now,
        };
        self.last_started_at = Some(started_at);
        started_at
    }

    fn summary(&self) -> String {
        let targets = self
            .targets
            .iter()
            .map(|target| {
                format!(
                    "{}: {:.1}% success (OK: {} / KO: {})",
                    target,
                    target.counters.success_percentage(),
                    target.counters.success,
                    target.counters.failure
                )
            })
            .collect::<Vec<_>>()
            .join(" | ");

        format!("{} pings run. {}", self.cycle, targets)
    }
}
