use crate::db::insert_archive_batch;
use crate::errors::{Error, Result};
use crate::metrics::{ARCHIVE_LATENCY_SECONDS, BATCH_SIZE, CHANNEL_FULL_TOTAL};
use crate::model::Entry;
use crate::pipeline::EntryArchive;
use async_trait::async_trait;
use sqlx::PgPool;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant};
use tracing::{debug, error, info};

/// Archive that queues entries for the batcher.
///
/// A single channel keeps each device's entries in arrival order.
#[derive(Debug, Clone)]
pub struct ChannelArchive {
    tx: mpsc::Sender<Entry>,
}

impl ChannelArchive {
    pub fn new(tx: mpsc::Sender<Entry>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EntryArchive for ChannelArchive {
    async fn archive(&self, entry: &Entry) -> Result<()> {
        match self.tx.try_send(entry.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(entry)) => {
                CHANNEL_FULL_TOTAL.inc();
                debug!("Archive channel full, using blocking send");
                self.tx.send(entry).await.map_err(|_| Error::ChannelSend)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("Archive channel closed, cannot archive entry");
                Err(Error::ChannelSend)
            }
        }
    }
}

pub async fn run_batcher(
    mut rx: mpsc::Receiver<Entry>,
    pool: PgPool,
    max_batch: usize,
    max_wait_ms: u64,
) {
    info!(
        "Starting archive batcher with max_batch={}, max_wait_ms={}",
        max_batch, max_wait_ms
    );

    let mut buffer: Vec<Entry> = Vec::with_capacity(max_batch);
    let mut ticker = interval(Duration::from_millis(max_wait_ms));

    loop {
        tokio::select! {
            entry = rx.recv() => {
                match entry {
                    Some(e) => {
                        buffer.push(e);

                        if buffer.len() >= max_batch {
                            flush_batch(&pool, &mut buffer).await;
                        }
                    }
                    None => {
                        info!("Channel closed, flushing remaining batch");
                        flush_batch(&pool, &mut buffer).await;
                        break;
                    }
                }
            }

            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush_batch(&pool, &mut buffer).await;
                }
            }
        }
    }

    info!("Archive batcher stopped");
}

async fn flush_batch(pool: &PgPool, buffer: &mut Vec<Entry>) {
    let pool = pool.clone();
    flush_with(buffer, |batch| async move { insert_archive_batch(&pool, &batch).await }).await;
}

/// Hands the buffered entries to `insert` once. Transient database errors
/// are already retried inside `insert`; anything left is logged and dropped.
async fn flush_with<F, Fut>(buffer: &mut Vec<Entry>, insert: F)
where
    F: FnOnce(Vec<Entry>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let batch_len = buffer.len();
    if batch_len == 0 {
        return;
    }

    debug!("Flushing archive batch of {} entries", batch_len);
    BATCH_SIZE.set(batch_len as f64);

    let batch = std::mem::replace(buffer, Vec::with_capacity(batch_len));
    let start = Instant::now();

    match insert(batch).await {
        Ok(()) => {
            let elapsed = start.elapsed().as_secs_f64();
            ARCHIVE_LATENCY_SECONDS.observe(elapsed);
            debug!("Archive batch inserted in {:.3}s", elapsed);
        }
        Err(e) => {
            error!("Failed to archive batch: {}", e);
            error!(
                "CRITICAL: {} entries will be dropped due to persistent DB failure",
                batch_len
            );
        }
    }

    BATCH_SIZE.set(0.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{DecodeOutcome, FallbackText};
    use crate::model::SensorGroup;
    use chrono::Utc;

    fn entry(device_id: &str) -> Entry {
        Entry {
            timestamp: Utc::now(),
            device_id: device_id.to_string(),
            device_type: "unknown".to_string(),
            sequence: Some(1),
            raw_payload: "00".to_string(),
            decoded: DecodeOutcome::Unassigned(FallbackText::from_hex("00")),
            sensor_group: SensorGroup::Unassigned,
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_channel_archive_preserves_order() {
        tokio_test::block_on(async {
            let (tx, mut rx) = mpsc::channel(10);
            let archive = ChannelArchive::new(tx);

            archive.archive(&entry("a")).await.unwrap();
            archive.archive(&entry("b")).await.unwrap();

            assert_eq!(rx.recv().await.unwrap().device_id, "a");
            assert_eq!(rx.recv().await.unwrap().device_id, "b");
        });
    }

    #[test]
    fn test_channel_archive_closed() {
        tokio_test::block_on(async {
            let (tx, rx) = mpsc::channel(1);
            drop(rx);
            let archive = ChannelArchive::new(tx);

            assert!(matches!(
                archive.archive(&entry("a")).await,
                Err(Error::ChannelSend)
            ));
        });
    }

    #[test]
    fn test_flush_calls_insert_once_and_drops_on_failure() {
        tokio_test::block_on(async {
            let mut buffer = vec![entry("a"), entry("b")];
            let mut calls = 0;

            flush_with(&mut buffer, |batch| {
                calls += 1;
                assert_eq!(batch.len(), 2);
                async { Err(Error::ChannelSend) }
            })
            .await;

            assert_eq!(calls, 1);
            assert!(buffer.is_empty());
        });
    }

    #[test]
    fn test_flush_preserves_order() {
        tokio_test::block_on(async {
            let mut buffer = vec![entry("a"), entry("b"), entry("c")];
            let mut seen = Vec::new();

            flush_with(&mut buffer, |batch| {
                seen = batch.into_iter().map(|e| e.device_id).collect();
                async { Ok(()) }
            })
            .await;

            assert_eq!(seen, vec!["a", "b", "c"]);
            assert!(buffer.is_empty());
        });
    }

    #[test]
    fn test_flush_skips_empty_buffer() {
        tokio_test::block_on(async {
            let mut buffer = Vec::new();
            flush_with(&mut buffer, |_| async { panic!("nothing to insert") }).await;
        });
    }
}
