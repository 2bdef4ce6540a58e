mod envelope;

use clap::Parser;
use envelope::Kind;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use tracing::{error, info, warn};

/// Publishes synthetic Sigfox callbacks for a fleet of devices.
#[derive(Debug, Parser)]
#[command(name = "simulator")]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    /// Messages per second.
    #[arg(long, env = "RATE", default_value_t = 100)]
    rate: u64,

    #[arg(long, env = "TOPIC_PREFIX", default_value = "sigfox")]
    topic_prefix: String,

    #[arg(long, value_delimiter = ',', default_value = "1fc5622")]
    power_temp: Vec<String>,

    /// PowerTemp devices configured with the `divisor_search` profile.
    #[arg(long, value_delimiter = ',')]
    power_temp_legacy: Vec<String>,

    #[arg(long, value_delimiter = ',', default_value = "1fc74ab,1fa5f9c")]
    pulse_meter: Vec<String>,

    #[arg(long, value_delimiter = ',', default_value = "c53d89,c6d3a6")]
    water_detector: Vec<String>,

    #[arg(long, value_delimiter = ',', default_value = "1f7f022,c52fce")]
    magnetic: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    tank_level: Vec<String>,

    /// Devices with no decoder, exercising the fallback path.
    #[arg(long, value_delimiter = ',', default_value = "dead01")]
    unknown: Vec<String>,
}

impl Args {
    fn fleet(&self) -> Vec<(String, Kind)> {
        let groups = [
            (&self.power_temp, Kind::PowerTemp),
            (&self.power_temp_legacy, Kind::PowerTempLegacy),
            (&self.pulse_meter, Kind::PulseMeter),
            (&self.water_detector, Kind::WaterDetector),
            (&self.magnetic, Kind::Magnetic),
            (&self.tank_level, Kind::TankLevel),
            (&self.unknown, Kind::Unknown),
        ];

        groups
            .into_iter()
            .flat_map(|(devices, kind)| devices.iter().map(move |d| (d.clone(), kind)))
            .collect()
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let fleet = args.fleet();
    if fleet.is_empty() || args.rate == 0 {
        error!("Nothing to publish: empty fleet or zero rate");
        return;
    }

    info!("Starting Sigfox simulator");
    info!(
        "Broker: {}:{}, Rate: {} msg/s, Devices: {}",
        args.broker,
        args.port,
        args.rate,
        fleet.len()
    );

    let client_id = format!("sim-{}", uuid::Uuid::new_v4());
    let mut mqtt_options = MqttOptions::new(&client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 20000);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(2)).await;

    info!("Connected to MQTT broker, starting to publish callbacks");

    let mut rng = rand::thread_rng();
    let mut counter = 0u64;
    let mut seq = 0u32;

    let burst_size = (args.rate as usize).clamp(1, 200);
    let burst_interval = Duration::from_millis((burst_size as u64 * 1000) / args.rate);

    info!("Publishing in bursts of {} messages every {:?}", burst_size, burst_interval);

    loop {
        let burst_start = std::time::Instant::now();

        for _ in 0..burst_size {
            let (device, kind) = &fleet[(counter as usize) % fleet.len()];
            if (counter as usize) % fleet.len() == 0 {
                seq = seq.wrapping_add(1);
            }

            let callback = envelope::callback(device, *kind, &mut rng, seq);
            let topic = format!("{}/{}", args.topic_prefix, device);
            let payload = match serde_json::to_string(&callback) {
                Ok(p) => p,
                Err(e) => {
                    error!("Failed to serialize callback: {}", e);
                    continue;
                }
            };

            match client.publish(&topic, QoS::AtLeastOnce, false, payload).await {
                Ok(_) => counter += 1,
                Err(e) => warn!("Failed to publish: {}", e),
            }
        }

        if counter % 10000 < burst_size as u64 {
            info!("Published {} messages", counter);
        }

        let elapsed = burst_start.elapsed();
        if elapsed < burst_interval {
            tokio::time::sleep(burst_interval - elapsed).await;
        } else if elapsed > burst_interval * 2 {
            warn!("Burst took {:?}, target was {:?}", elapsed, burst_interval);
        }
    }
}
