//! Load tests against a running broker and ingestor. Run with `--ignored`.

use rand::Rng;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::time::sleep;

const DEVICES: [&str; 4] = ["1fc5622", "1fc74ab", "c6e542", "1f7f022"];

#[derive(Debug, Serialize)]
struct Callback {
    device: String,
    data: String,
    time: i64,
    #[serde(rename = "seqNumber")]
    seq_number: i64,
}

impl Callback {
    fn random(device: &str, seq: i64) -> Self {
        let mut rng = rand::thread_rng();
        let data = match device {
            "1fc5622" => format!(
                "00{:02X}00{:02X}00",
                rng.gen_range(120..160u8),
                rng.gen_range(5..35u8)
            ),
            "1fc74ab" => format!(
                "01{:02X}{:08X}0000",
                rng.gen_range(120..160u8),
                rng.gen::<u32>()
            ),
            "c6e542" => format!(
                "00{:02X}{:02X}{:02X}{:08X}",
                rng.gen_range(0..2u8),
                rng.gen::<u8>(),
                rng.gen_range(120..160u8),
                seq
            ),
            _ => format!("00{:02X}", rng.gen_range(0..2u8)),
        };

        Self {
            device: device.to_string(),
            data,
            time: chrono::Utc::now().timestamp(),
            seq_number: seq,
        }
    }
}

async fn connect(client_id: &str) -> AsyncClient {
    let mut mqtt_options = MqttOptions::new(client_id, "localhost", 1883);
    mqtt_options.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 20000);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                eprintln!("MQTT error: {}", e);
                break;
            }
        }
    });

    sleep(Duration::from_millis(500)).await;
    client
}

#[tokio::test]
#[ignore]
async fn test_1000_envelopes_per_second() {
    let test_duration_secs = 10;
    let target_rate = 1000;
    let total_messages = test_duration_secs * target_rate;

    let client = connect("load-test").await;

    let start = Instant::now();
    let mut sent_count = 0;
    let mut error_count = 0;

    let burst_size = 100;
    let delay_per_burst = Duration::from_micros((burst_size * 1_000_000) / target_rate as u64);

    for batch_start in (0..total_messages).step_by(burst_size as usize) {
        for i in batch_start..std::cmp::min(batch_start + burst_size as i64, total_messages) {
            let device = DEVICES[(i as usize) % DEVICES.len()];
            let payload = serde_json::to_string(&Callback::random(device, i)).unwrap();

            match client
                .publish(format!("sigfox/{}", device), QoS::AtLeastOnce, false, payload)
                .await
            {
                Ok(_) => sent_count += 1,
                Err(e) => {
                    error_count += 1;
                    if error_count < 10 {
                        eprintln!("Send error: {}", e);
                    }
                }
            }
        }

        sleep(delay_per_burst).await;
    }

    let duration = start.elapsed();
    let actual_rate = sent_count as f64 / duration.as_secs_f64();
    println!(
        "Sent {} envelopes in {:.2}s ({:.0} msg/s), {} errors",
        sent_count,
        duration.as_secs_f64(),
        actual_rate,
        error_count
    );

    assert!(
        actual_rate >= 900.0,
        "Throughput too low: {:.2} msg/s (expected >= 900)",
        actual_rate
    );
    assert_eq!(error_count, 0, "Too many errors: {}", error_count);
}

#[tokio::test]
#[ignore]
async fn test_duplicate_delivery_burst() {
    // The same envelope published repeatedly must leave one curated row.
    let client = connect("load-test-dup").await;
    let callback = Callback::random("1f7f022", 424242);
    let payload = serde_json::to_string(&callback).unwrap();

    for _ in 0..500 {
        client
            .publish("sigfox/1f7f022", QoS::AtLeastOnce, false, payload.clone())
            .await
            .unwrap();
    }

    sleep(Duration::from_secs(2)).await;
}
