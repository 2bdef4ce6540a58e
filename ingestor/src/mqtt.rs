use crate::errors::{Error, Result};
use crate::metrics::REJECTED_TOTAL;
use crate::model::{Entry, SigfoxCallback};
use crate::pipeline::Pipeline;
use crate::validate::validate;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub async fn run_mqtt(
    broker: String,
    port: u16,
    client_id: String,
    topic: String,
    pipeline: Arc<Pipeline>,
) -> Result<()> {
    info!("Connecting to MQTT broker at {}:{}", broker, port);

    let mut mqtt_options = MqttOptions::new(client_id, broker, port);
    mqtt_options.set_keep_alive(std::time::Duration::from_secs(30));
    mqtt_options.set_clean_session(false);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10000);

    // QoS 1: the broker may redeliver, the curated store dedups
    client.subscribe(&topic, QoS::AtLeastOnce).await?;

    info!("Subscribed to {} with QoS 1", topic);

    loop {
        match eventloop.poll().await {
            Ok(notification) => {
                if let Event::Incoming(Packet::Publish(publish)) = notification {
                    debug!(
                        "Received envelope on topic {}, size: {} bytes",
                        publish.topic,
                        publish.payload.len()
                    );

                    if let Err(e) = process_message(&publish.payload, &pipeline).await {
                        match e {
                            Error::Validation(_) | Error::Json(_) => {
                                REJECTED_TOTAL.inc();
                                warn!("Rejected envelope on {}: {}", publish.topic, e);
                            }
                            _ => error!("Failed to ingest envelope: {}", e),
                        }
                    }
                }
            }
            Err(e) => {
                error!("MQTT error: {}", e);
                // rumqttc automatically reconnects, so we just log and continue
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

/// Parses, validates and ingests a single callback message.
pub async fn process_message(payload: &[u8], pipeline: &Pipeline) -> Result<Entry> {
    let callback = serde_json::from_slice::<SigfoxCallback>(payload)?;
    validate(&callback)?;

    pipeline.ingest(callback.into_envelope(Utc::now())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SensorGroup;
    use crate::pipeline::{MockEntryArchive, MockKindStore};
    use crate::registry::DeviceRegistry;

    fn pipeline(expected_archives: usize) -> Pipeline {
        let mut archive = MockEntryArchive::new();
        let mut store = MockKindStore::new();
        archive
            .expect_archive()
            .times(expected_archives)
            .returning(|_| Ok(()));
        store.expect_persist_kind().returning(|_| Ok(()));

        Pipeline::new(
            Arc::new(DeviceRegistry::builtin()),
            Arc::new(archive),
            Arc::new(store),
        )
    }

    #[test]
    fn test_process_message_valid() {
        tokio_test::block_on(async {
            let pipeline = pipeline(1);
            let payload = br#"{"device":"1F7F022","data":"0000","time":1735732800,"seqNumber":3}"#;

            let entry = process_message(payload, &pipeline).await.unwrap();
            assert_eq!(entry.device_id, "1f7f022");
            assert_eq!(entry.sensor_group, SensorGroup::Magnetic);
            assert_eq!(entry.sequence, Some(3));
        });
    }

    #[test]
    fn test_process_message_invalid_json() {
        tokio_test::block_on(async {
            let pipeline = pipeline(0);
            let result = process_message(b"invalid json", &pipeline).await;
            assert!(matches!(result, Err(Error::Json(_))));
        });
    }

    #[test]
    fn test_process_message_empty_device() {
        tokio_test::block_on(async {
            let pipeline = pipeline(0);
            let result = process_message(br#"{"device":"","data":"00"}"#, &pipeline).await;
            assert!(matches!(result, Err(Error::Validation(_))));
        });
    }

    #[test]
    fn test_process_message_bad_payload_still_ingested() {
        tokio_test::block_on(async {
            let pipeline = pipeline(1);
            let entry = process_message(br#"{"device":"c6e542","data":"zz"}"#, &pipeline)
                .await
                .unwrap();
            assert!(entry.decoded.is_failed());
        });
    }
}
