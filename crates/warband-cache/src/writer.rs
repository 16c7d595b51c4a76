//! Write-behind worker for fire-and-forget cache writes
//!
//! Request paths enqueue pre-encoded envelopes and return immediately. A
//! single task drains the queue, applies the operation timeout, and logs
//! failures. Nothing on the request path awaits a write.

use crate::backend::KvBackend;
use crate::stats::StoreStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug)]
pub(crate) enum WriteJob {
    Put {
        key: String,
        payload: String,
        ttl: Duration,
        /// Stale shadow copy: key and retention
        shadow: Option<(String, Duration)>,
    },
    Flush(oneshot::Sender<()>),
}

pub(crate) fn spawn_writer(
    backend: Arc<dyn KvBackend>,
    timeout: Duration,
    stats: Arc<StoreStats>,
) -> mpsc::UnboundedSender<WriteJob> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_writer(backend, timeout, stats, rx));
    tx
}

async fn run_writer(
    backend: Arc<dyn KvBackend>,
    timeout: Duration,
    stats: Arc<StoreStats>,
    mut rx: mpsc::UnboundedReceiver<WriteJob>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            WriteJob::Put {
                key,
                payload,
                ttl,
                shadow,
            } => {
                put(backend.as_ref(), timeout, &stats, &key, &payload, ttl).await;
                if let Some((shadow_key, retention)) = shadow {
                    put(backend.as_ref(), timeout, &stats, &shadow_key, &payload, retention).await;
                }
            }
            WriteJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Cache write-behind worker stopped");
}

async fn put(
    backend: &dyn KvBackend,
    timeout: Duration,
    stats: &StoreStats,
    key: &str,
    payload: &str,
    ttl: Duration,
) {
    match tokio::time::timeout(timeout, backend.set_ex(key, payload, ttl)).await {
        Ok(Ok(())) => tracing::trace!(key, "Background cache write complete"),
        Ok(Err(e)) => {
            stats.record_write_failure();
            tracing::warn!(key, error = %e, "Background cache write failed");
        }
        Err(_) => {
            stats.record_write_failure();
            tracing::warn!(key, ?timeout, "Background cache write timed out");
        }
    }
}
