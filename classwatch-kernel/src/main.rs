/**
 * CLASSWATCH KERNEL - Point d'entrée du bridge appareils / dashboard
 *
 * RÔLE : Orchestration : config, client MQTT, store, bus, records, HTTP.
 * Le listener MQTT est la seule tâche qui traite les messages entrants.
 */

use anyhow::Context;
use classwatch_kernel::bridge::{BridgeSettings, DeviceBridge};
use classwatch_kernel::bus::EventBus;
use classwatch_kernel::chart::ChartRecorder;
use classwatch_kernel::commands::CommandDispatcher;
use classwatch_kernel::config::load_config;
use classwatch_kernel::health::HealthTracker;
use classwatch_kernel::http::{self, AppState};
use classwatch_kernel::mqtt::{self, ReconnectPolicy};
use classwatch_kernel::notify::ToastBoard;
use classwatch_kernel::records::{self, JsonRecords, NoRecords, RecordsSource};
use classwatch_kernel::store::DeviceStore;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("classwatch_kernel=info")),
        )
        .init();

    let cfg = load_config().await;
    let device_ids = cfg.device_ids();
    let client_id = cfg.mqtt.fresh_client_id();

    // records (lecture vide si indisponible)
    let records: Arc<dyn RecordsSource> = match JsonRecords::open(&cfg.records.path) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            error!("[kernel] records unavailable ({}): {e}", cfg.records.path);
            Arc::new(NoRecords)
        }
    };

    let toasts = ToastBoard::new();
    let bus = EventBus::new();
    let (client, eventloop) = mqtt::create_mqtt_client(&cfg, &client_id);

    let mut settings = BridgeSettings::for_devices(&cfg.mqtt.broker_label(), &client_id, &device_ids);
    settings.reconnect = ReconnectPolicy::from(&cfg.reconnect);

    let bridge = DeviceBridge::new(
        Arc::new(client),
        settings,
        DeviceStore::new(),
        bus.clone(),
        Arc::new(toasts.clone()),
    );

    // abonnements process-wide, vivants tant que le kernel tourne
    let charts = ChartRecorder::new(cfg.chart.capacity);
    let _chart_sub = charts.attach(&bus);
    let _snapshot_writer = records::persist_snapshots(&bus, records.clone());

    let _listener = mqtt::spawn_mqtt_listener(bridge.clone(), eventloop);
    bridge.connect();

    let app_state = AppState {
        commands: CommandDispatcher::new(bridge.clone()),
        bridge,
        health_tracker: HealthTracker::new(),
        toasts,
        charts,
        records,
        device_ids,
    };
    let app = http::build_router(app_state);

    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("bind {}", cfg.http.bind))?;
    info!("[kernel] listening on http://{}", cfg.http.bind);
    axum::serve(listener, app).await.context("http server")?;
    Ok(())
}
