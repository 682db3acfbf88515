use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use tollgate_core::error::{Result, TollgateError};
use tollgate_core::traits::AuditStore;
use tollgate_core::types::{AuditRecord, WorkItemId};

/// Bounded in-process audit trail. Keeps the newest `capacity` records.
pub struct InMemoryAuditStore {
    records: Mutex<VecDeque<AuditRecord>>,
    capacity: usize,
}

impl InMemoryAuditStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<AuditRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every retained record, oldest first.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.lock().iter().cloned().collect()
    }

    /// Retained records for one work item, oldest first.
    pub fn records_for(&self, id: &WorkItemId) -> Vec<AuditRecord> {
        self.lock()
            .iter()
            .filter(|r| &r.work_item_id == id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl AuditStore for InMemoryAuditStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn persist(&self, record: AuditRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut records = self.lock();
            records.push_back(record);
            while records.len() > self.capacity {
                records.pop_front();
            }
            Ok(())
        })
    }
}

/// Append-only JSONL audit file, one record per line.
///
/// The file is opened on first write and flushed after every record, so a
/// crash loses at most the record being written.
pub struct JsonlAuditStore {
    path: PathBuf,
    writer: tokio::sync::Mutex<Option<tokio::io::BufWriter<tokio::fs::File>>>,
}

impl JsonlAuditStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: tokio::sync::Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> Result<tokio::io::BufWriter<tokio::fs::File>> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        info!(path = %self.path.display(), "Audit log opened");
        Ok(tokio::io::BufWriter::new(file))
    }
}

impl AuditStore for JsonlAuditStore {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn persist(&self, record: AuditRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let line = format!("{}\n", serde_json::to_string(&record)?);

            let mut guard = self.writer.lock().await;
            if guard.is_none() {
                *guard = Some(self.open().await?);
            }
            let writer = guard
                .as_mut()
                .ok_or_else(|| TollgateError::Audit("audit log not open".into()))?;

            if let Err(e) = writer.write_all(line.as_bytes()).await {
                // Reopen on the next record.
                *guard = None;
                return Err(e.into());
            }
            writer.flush().await?;
            Ok(())
        })
    }
}

/// Mirrors audit records into the log stream under the `tollgate::audit` target.
pub struct TracingAuditStore;

impl AuditStore for TracingAuditStore {
    fn name(&self) -> &str {
        "tracing"
    }

    fn persist(&self, record: AuditRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            info!(
                target: "tollgate::audit",
                work_item_id = %record.work_item_id,
                stage = %record.stage,
                actor = %record.actor,
                action = %record.action,
                "{}",
                record.details
            );
            debug!(target: "tollgate::audit", context = %record.context, "Audit context");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::types::AuditAction;

    fn record(id: &str, details: &str) -> AuditRecord {
        AuditRecord::new(
            "checker",
            "checker-bot",
            AuditAction::ExecutionCompleted,
            details,
            WorkItemId::from(id),
            serde_json::json!({ "keys": [] }),
        )
    }

    #[tokio::test]
    async fn memory_store_keeps_newest() {
        let store = InMemoryAuditStore::new(2);
        for n in 1..=3 {
            store.persist(record("A", &format!("r{n}"))).await.unwrap();
        }
        let details: Vec<String> = store.records().into_iter().map(|r| r.details).collect();
        assert_eq!(details, vec!["r2", "r3"]);
    }

    #[tokio::test]
    async fn memory_store_filters_by_work_item() {
        let store = InMemoryAuditStore::new(10);
        store.persist(record("A", "a1")).await.unwrap();
        store.persist(record("B", "b1")).await.unwrap();
        store.persist(record("A", "a2")).await.unwrap();

        let a = store.records_for(&WorkItemId::from("A"));
        assert_eq!(a.len(), 2);
        assert_eq!(a[1].details, "a2");
    }

    #[tokio::test]
    async fn jsonl_store_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");
        let store = JsonlAuditStore::new(&path);

        store.persist(record("A", "first")).await.unwrap();
        store.persist(record("A", "second")).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: AuditRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.details, "second");
        assert_eq!(parsed.action, AuditAction::ExecutionCompleted);
    }

    #[tokio::test]
    async fn tracing_store_never_fails() {
        assert!(TracingAuditStore.persist(record("A", "x")).await.is_ok());
    }
}
