//! In-memory `Storage` used by tests.

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

use super::Storage;
use super::models::{ResultRow, TargetId, TargetRow};
use crate::monitoring::types::ResultRecord;

#[derive(Default)]
pub struct MemoryStorage {
    targets: Mutex<Vec<TargetRow>>,
    pub records: Mutex<Vec<(TargetId, ResultRecord)>>,
    /// Writes for these targets fail
    pub failing_targets: Mutex<HashSet<TargetId>>,
    /// Every call fails, as if the store were unreachable
    pub unreachable: bool,
}

impl MemoryStorage {
    pub fn unreachable() -> Self {
        Self { unreachable: true, ..Self::default() }
    }

    pub fn fail_writes_for(&self, target_id: TargetId) {
        self.failing_targets.lock().unwrap().insert(target_id);
    }

    pub fn records_for(&self, target_id: TargetId) -> Vec<ResultRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == target_id)
            .map(|(_, record)| *record)
            .collect()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn ensure_target(&self, address: &str, alias: &str) -> Result<TargetId> {
        if self.unreachable {
            bail!("connection refused");
        }

        let mut targets = self.targets.lock().unwrap();
        if let Some(row) = targets.iter_mut().find(|row| row.address == address) {
            if row.alias != alias {
                row.alias = alias.to_string();
                row.updated_at = chrono::Utc::now();
            }
            return Ok(row.id);
        }

        let now = chrono::Utc::now();
        let id = TargetId(targets.len() as i64 + 1);
        targets.push(TargetRow { id, address: address.into(), alias: alias.into(), created_at: now, updated_at: now });
        Ok(id)
    }

    async fn record_result(&self, target_id: TargetId, record: &ResultRecord) -> Result<()> {
        if self.unreachable || self.failing_targets.lock().unwrap().contains(&target_id) {
            bail!("disk I/O error");
        }
        self.records.lock().unwrap().push((target_id, *record));
        Ok(())
    }

    async fn get_target(&self, target_id: TargetId) -> Result<Option<TargetRow>> {
        Ok(self.targets.lock().unwrap().iter().find(|row| row.id == target_id).cloned())
    }

    async fn recent_results(&self, target_id: TargetId, limit: usize) -> Result<Vec<ResultRow>> {
        Ok(self
            .records_for(target_id)
            .into_iter()
            .rev()
            .take(limit)
            .map(|record| ResultRow {
                timestamp: record.timestamp,
                succeeded: record.succeeded,
                rtt_min: record.rtt_min,
                rtt_avg: record.rtt_avg,
                rtt_max: record.rtt_max,
            })
            .collect())
    }
}
