//! Envelope → Entry dispatch and hand-off to the persistence collaborators.

use crate::decode::{self, DecodeOutcome};
use crate::errors::Result;
use crate::metrics::{
    DECODE_FAILURES_TOTAL, ENVELOPES_TOTAL, KIND_STORE_FAILURES_TOTAL, UNASSIGNED_TOTAL,
};
use crate::model::{Entry, TelemetryEnvelope};
use crate::registry::DeviceRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn};

const UNKNOWN_DEVICE_TYPE: &str = "unknown";

/// Append-only raw archive. Called for every entry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntryArchive: Send + Sync {
    async fn archive(&self, entry: &Entry) -> Result<()>;
}

/// Curated per-kind store. Called only for successfully decoded entries and
/// expected to deduplicate on the entry's key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KindStore: Send + Sync {
    async fn persist_kind(&self, entry: &Entry) -> Result<()>;
}

/// Resolves the decoder for an envelope and builds its entry.
///
/// Pure: the same envelope and registry always produce an equal entry.
pub fn dispatch(registry: &DeviceRegistry, envelope: &TelemetryEnvelope) -> Entry {
    let device_id = envelope.normalized_device_id();
    let route = registry.resolve(&device_id);
    let decoded = decode::decode(route.group, &route.profile, &envelope.payload, envelope.anchor());

    Entry {
        timestamp: envelope.anchor(),
        device_id,
        device_type: envelope
            .device_type
            .clone()
            .unwrap_or_else(|| UNKNOWN_DEVICE_TYPE.to_string()),
        sequence: envelope.sequence,
        raw_payload: envelope.payload.clone(),
        decoded,
        sensor_group: route.group,
        received_at: envelope.received_at,
    }
}

pub struct Pipeline {
    registry: Arc<DeviceRegistry>,
    archive: Arc<dyn EntryArchive>,
    store: Arc<dyn KindStore>,
}

impl Pipeline {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        archive: Arc<dyn EntryArchive>,
        store: Arc<dyn KindStore>,
    ) -> Self {
        Self {
            registry,
            archive,
            store,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Dispatches one envelope and forwards the entry.
    ///
    /// Returns an error only when archiving fails. A failed curated write is
    /// logged and the entry is still returned, since the archive holds it.
    pub async fn ingest(&self, envelope: TelemetryEnvelope) -> Result<Entry> {
        let entry = dispatch(&self.registry, &envelope);
        let group = entry.sensor_group.as_str();
        ENVELOPES_TOTAL.with_label_values(&[group]).inc();

        match &entry.decoded {
            DecodeOutcome::Reading(_) => {
                debug!(
                    device_id = %entry.device_id,
                    sensor_group = group,
                    sequence = ?entry.sequence,
                    "Decoded envelope"
                );
            }
            DecodeOutcome::Failed(err) => {
                DECODE_FAILURES_TOTAL.with_label_values(&[group]).inc();
                warn!(
                    device_id = %entry.device_id,
                    sensor_group = group,
                    sequence = ?entry.sequence,
                    "Decode failed: {}",
                    err
                );
            }
            DecodeOutcome::Unassigned(_) => {
                UNASSIGNED_TOTAL.inc();
                debug!(device_id = %entry.device_id, "No decoder assigned to device");
            }
        }

        self.archive.archive(&entry).await?;

        if entry.decoded.reading().is_some() {
            if let Err(e) = self.store.persist_kind(&entry).await {
                KIND_STORE_FAILURES_TOTAL.inc();
                error!(
                    device_id = %entry.device_id,
                    sensor_group = group,
                    "Failed to persist curated reading: {}",
                    e
                );
            }
        }

        Ok(entry)
    }
}
