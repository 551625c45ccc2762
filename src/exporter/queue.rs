//! Bounded export queue in front of a [`RecordWriter`]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ExporterError, MetricRecord, MetricsExporter, RecordWriter};
use crate::metrics::{DropStage, stats};
use crate::types::QueueCapacity;

/// Queue state before `start` hands the receiver to the worker
struct Pending<W> {
    writer: W,
    rx: mpsc::Receiver<MetricRecord>,
}

/// Exporter that queues records and writes them from a single background task
pub struct QueuedExporter<W: RecordWriter> {
    name: &'static str,
    tx: Mutex<Option<mpsc::Sender<MetricRecord>>>,
    pending: Mutex<Option<Pending<W>>>,
    worker: Mutex<Option<JoinHandle<W>>>,
    dropped: AtomicU64,
}

impl<W: RecordWriter> std::fmt::Debug for QueuedExporter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedExporter")
            .field("name", &self.name)
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<W: RecordWriter> QueuedExporter<W> {
    /// Records exported before `start` wait in the queue
    pub fn new(name: &'static str, writer: W, capacity: QueueCapacity) -> Self {
        let (tx, rx) = mpsc::channel(capacity.get());
        Self {
            name,
            tx: Mutex::new(Some(tx)),
            pending: Mutex::new(Some(Pending { writer, rx })),
            worker: Mutex::new(None),
            dropped: AtomicU64::new(0),
        }
    }

    fn count_drop(&self, record: &MetricRecord) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        stats().event_dropped(DropStage::Exporter, &record.identity().instance_name);
    }
}

#[async_trait]
impl<W: RecordWriter> MetricsExporter for QueuedExporter<W> {
    fn export(&self, record: MetricRecord) {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            drop(guard);
            self.count_drop(&record);
            return;
        };
        match tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record) | TrySendError::Closed(record)) => {
                drop(guard);
                self.count_drop(&record);
            }
        }
    }

    async fn start(&self, _deadline: Duration) -> Result<(), ExporterError> {
        let Pending { mut writer, mut rx } =
            self.pending.lock().take().ok_or(ExporterError::AlreadyStarted)?;
        let name = self.name;

        let handle = tokio::spawn(async move {
            let mut written: u64 = 0;
            while let Some(record) = rx.recv().await {
                writer.write(&record);
                written += 1;
                stats().records_exported(1);
            }
            debug!(exporter = name, written, "Export queue drained");
            writer
        });
        *self.worker.lock() = Some(handle);
        info!(exporter = name, "Metrics exporter started");
        Ok(())
    }

    async fn stop(&self, deadline: Duration) -> Result<(), ExporterError> {
        // Closing the sender lets the worker drain what is queued and exit
        self.tx.lock().take();

        let handle = self.worker.lock().take();
        let writer = match handle {
            Some(handle) => match tokio::time::timeout(deadline, handle).await {
                Ok(Ok(writer)) => writer,
                Ok(Err(e)) => return Err(ExporterError::Flush(format!("export task failed: {e}"))),
                Err(_) => return Err(ExporterError::StopTimeout(deadline)),
            },
            // Never started: flush what the writer holds, discard the queue
            None => match self.pending.lock().take() {
                Some(pending) => pending.writer,
                None => return Ok(()),
            },
        };

        let mut writer = writer;
        let flushed = tokio::time::timeout(
            deadline,
            tokio::task::spawn_blocking(move || writer.flush()),
        )
        .await;

        let result = match flushed {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ExporterError::Flush(format!("flush task failed: {e}"))),
            Err(_) => Err(ExporterError::StopTimeout(deadline)),
        };
        match &result {
            Ok(()) => info!(
                exporter = self.name,
                dropped = self.dropped(),
                "Metrics exporter stopped"
            ),
            Err(e) => {
                stats().export_failure();
                warn!(exporter = self.name, error = %e, "Metrics exporter flush failed");
            }
        }
        result
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
