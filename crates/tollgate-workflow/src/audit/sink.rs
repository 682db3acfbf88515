use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tollgate_core::config::AuditConfig;
use tollgate_core::traits::AuditStore;
use tollgate_core::types::{AuditAction, AuditRecord, WorkItemId};

/// Non-blocking handle for emitting audit records.
///
/// Cheap to clone and safe to share across concurrent workflow runs.
/// `emit` never waits and never fails: when the queue is full or the
/// dispatcher is gone, the record is dropped and a warning is logged.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditRecord>,
    dropped: Arc<AtomicU64>,
}

impl AuditSink {
    /// Start a dispatcher delivering to `stores` and return a sink feeding it.
    pub fn spawn(
        stores: Vec<Arc<dyn AuditStore>>,
        config: &AuditConfig,
    ) -> (Self, AuditDispatcher) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let cancel = CancellationToken::new();
        let timeout = config.persist_timeout();

        info!(
            stores = stores.len(),
            queue_capacity = config.queue_capacity,
            "Audit dispatcher started"
        );
        let handle = tokio::spawn(dispatch(rx, stores, timeout, cancel.clone()));

        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            AuditDispatcher { cancel, handle },
        )
    }

    /// Queue a record built from its parts.
    pub fn emit(
        &self,
        stage: &str,
        actor: &str,
        action: AuditAction,
        details: impl Into<String>,
        work_item_id: &WorkItemId,
        context: serde_json::Value,
    ) {
        self.emit_record(AuditRecord::new(
            stage,
            actor,
            action,
            details,
            work_item_id.clone(),
            context,
        ));
    }

    /// Queue a prebuilt record. Ownership passes to the sink.
    pub fn emit_record(&self, record: AuditRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    work_item_id = %record.work_item_id,
                    action = %record.action,
                    "Audit queue full, dropping record"
                );
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    work_item_id = %record.work_item_id,
                    action = %record.action,
                    "Audit dispatcher stopped, dropping record"
                );
            }
        }
    }

    /// Records dropped because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Owner of the background delivery task.
pub struct AuditDispatcher {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl AuditDispatcher {
    /// Stop accepting records, deliver everything already queued, and wait
    /// for the task to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            error!(error = %e, "Audit dispatcher task failed");
        }
    }
}

async fn dispatch(
    mut rx: mpsc::Receiver<AuditRecord>,
    stores: Vec<Arc<dyn AuditStore>>,
    timeout: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            record = rx.recv() => match record {
                Some(record) => deliver(&stores, record, timeout).await,
                None => {
                    debug!("All audit sinks dropped, dispatcher stopping");
                    return;
                }
            },
            _ = cancel.cancelled() => break,
        }
    }

    rx.close();
    let mut drained = 0usize;
    while let Some(record) = rx.recv().await {
        deliver(&stores, record, timeout).await;
        drained += 1;
    }
    debug!(drained, "Audit dispatcher shut down");
}

async fn deliver(stores: &[Arc<dyn AuditStore>], record: AuditRecord, timeout: Duration) {
    for store in stores {
        // A store may panic while building its future as well as while it runs.
        let persist = match std::panic::catch_unwind(AssertUnwindSafe(|| {
            store.persist(record.clone())
        })) {
            Ok(fut) => AssertUnwindSafe(fut).catch_unwind(),
            Err(_) => {
                error!(
                    store = store.name(),
                    work_item_id = %record.work_item_id,
                    "Audit store panicked"
                );
                continue;
            }
        };
        match tokio::time::timeout(timeout, persist).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                error!(
                    store = store.name(),
                    work_item_id = %record.work_item_id,
                    action = %record.action,
                    error = %e,
                    "Audit delivery failed"
                );
            }
            Ok(Err(_)) => {
                error!(
                    store = store.name(),
                    work_item_id = %record.work_item_id,
                    "Audit store panicked"
                );
            }
            Err(_) => {
                error!(
                    store = store.name(),
                    work_item_id = %record.work_item_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Audit delivery timed out"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditStore;
    use futures::future::BoxFuture;
    use tollgate_core::error::{Result, TollgateError};

    struct Broken;

    impl AuditStore for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn persist(&self, _record: AuditRecord) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Err(TollgateError::Audit("disk on fire".into())) })
        }
    }

    struct Panicky;

    impl AuditStore for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }

        fn persist(&self, _record: AuditRecord) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { panic!("store bug") })
        }
    }

    struct PanicsEagerly;

    impl AuditStore for PanicsEagerly {
        fn name(&self) -> &str {
            "eager-panic"
        }

        fn persist(&self, _record: AuditRecord) -> BoxFuture<'_, Result<()>> {
            panic!("store bug before the future exists")
        }
    }

    fn emit_n(sink: &AuditSink, id: &WorkItemId, n: usize) {
        for i in 0..n {
            sink.emit(
                "maker",
                "maker",
                AuditAction::ExecutionStarted,
                format!("event {i}"),
                id,
                serde_json::Value::Null,
            );
        }
    }

    #[tokio::test]
    async fn delivers_in_emission_order() {
        let store = Arc::new(InMemoryAuditStore::new(100));
        let (sink, dispatcher) = AuditSink::spawn(vec![store.clone()], &AuditConfig::default());
        let id = WorkItemId::from("REQ-1");

        emit_n(&sink, &id, 5);
        dispatcher.shutdown().await;

        let details: Vec<String> = store.records_for(&id).into_iter().map(|r| r.details).collect();
        assert_eq!(details, vec!["event 0", "event 1", "event 2", "event 3", "event 4"]);
    }

    #[tokio::test]
    async fn failing_stores_do_not_block_healthy_ones() {
        let store = Arc::new(InMemoryAuditStore::new(100));
        let stores: Vec<Arc<dyn AuditStore>> =
            vec![Arc::new(Broken), Arc::new(Panicky), store.clone()];
        let (sink, dispatcher) = AuditSink::spawn(stores, &AuditConfig::default());

        emit_n(&sink, &WorkItemId::from("REQ-2"), 3);
        dispatcher.shutdown().await;
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn store_panicking_outside_its_future_is_contained() {
        let store = Arc::new(InMemoryAuditStore::new(100));
        let stores: Vec<Arc<dyn AuditStore>> = vec![Arc::new(PanicsEagerly), store.clone()];
        let (sink, dispatcher) = AuditSink::spawn(stores, &AuditConfig::default());
        let id = WorkItemId::from("REQ-5");

        emit_n(&sink, &id, 3);
        dispatcher.shutdown().await;

        assert_eq!(store.records_for(&id).len(), 3);
        assert_eq!(sink.dropped(), 0);
    }

    #[tokio::test]
    async fn overflow_is_dropped_not_blocked() {
        let config = AuditConfig {
            queue_capacity: 2,
            ..AuditConfig::default()
        };
        let store = Arc::new(InMemoryAuditStore::new(100));
        let (sink, dispatcher) = AuditSink::spawn(vec![store.clone()], &config);

        // The current-thread runtime cannot run the dispatcher until we yield.
        emit_n(&sink, &WorkItemId::from("REQ-3"), 10);
        assert_eq!(sink.dropped(), 8);

        dispatcher.shutdown().await;
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn emit_after_shutdown_is_harmless() {
        let (sink, dispatcher) = AuditSink::spawn(Vec::new(), &AuditConfig::default());
        dispatcher.shutdown().await;
        emit_n(&sink, &WorkItemId::from("REQ-4"), 1);
        assert_eq!(sink.dropped(), 1);
    }
}
