//! Classwatch device simulator - a stand-in for one ESP32 classroom node
//!
//! - Publishes bulk and scalar telemetry every interval
//! - Publishes a heartbeat every 10 seconds
//! - Obeys `/{id}/buzzer` and `/{id}/command`, answers on `/{id}/buzzer/status`

mod config;
mod device;

use anyhow::{Context, Result};
use config::SimConfig;
use device::{Outbox, SimDevice};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

async fn publish_all(client: &AsyncClient, device: &SimDevice, out: Outbox) -> Result<()> {
    for (suffix, payload) in out {
        client
            .publish(device.topic(&suffix), QoS::AtMostOnce, false, payload)
            .await
            .with_context(|| format!("publish {suffix}"))?;
    }
    Ok(())
}

async fn run(cfg: SimConfig) -> Result<()> {
    let mut device = SimDevice::new(cfg.device_id.clone());
    let client_id = format!("sim_{}_{}", cfg.device_id, std::process::id());

    let mut opts = MqttOptions::new(client_id, &cfg.broker_host, cfg.broker_port);
    opts.set_keep_alive(Duration::from_secs(30));
    opts.set_clean_session(true);
    let (client, mut eventloop) = AsyncClient::new(opts, 32);

    for suffix in ["buzzer", "command"] {
        client
            .subscribe(device.topic(suffix), QoS::AtMostOnce)
            .await
            .context("Failed to subscribe")?;
    }

    let mut data_timer = interval(cfg.interval);
    let mut heartbeat_timer = interval(cfg.heartbeat_interval);
    let mut rng = rand::thread_rng();
    let started = std::time::Instant::now();

    info!(
        "[sim] {} -> {}:{} every {}s",
        device.id(),
        cfg.broker_host,
        cfg.broker_port,
        cfg.interval.as_secs()
    );

    loop {
        tokio::select! {
            _ = data_timer.tick() => {
                let reading = device.next_reading(&mut rng);
                if let Err(e) = publish_all(&client, &device, device.telemetry(&reading)).await {
                    error!("[sim] telemetry: {e:#}");
                }
            }
            _ = heartbeat_timer.tick() => {
                let body = serde_json::json!({
                    "uptime": started.elapsed().as_secs(),
                    "ts": chrono::Utc::now().to_rfc3339(),
                });
                if let Err(e) = client
                    .publish(device.topic("heartbeat"), QoS::AtMostOnce, false, body.to_string())
                    .await
                {
                    error!("[sim] heartbeat: {e}");
                }
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("[sim] connected");
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    let payload = String::from_utf8_lossy(&p.payload).into_owned();
                    let out = if p.topic == device.topic("buzzer") {
                        match device.handle_buzzer(&payload) {
                            Some(status) => vec![("buzzer/status".to_string(), status)],
                            None => {
                                warn!("[sim] ignoring buzzer payload {payload:?}");
                                Vec::new()
                            }
                        }
                    } else if p.topic == device.topic("command") {
                        device.handle_command(&payload)
                    } else {
                        debug!("[sim] unexpected topic {}", p.topic);
                        Vec::new()
                    };
                    if let Err(e) = publish_all(&client, &device, out).await {
                        error!("[sim] reply: {e:#}");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("[sim] MQTT connection error: {e}");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("classwatch_device_sim=info")),
        )
        .init();

    let cfg = SimConfig::from_env().context("Failed to read simulator config")?;
    run(cfg).await.context("Simulator stopped")
}
