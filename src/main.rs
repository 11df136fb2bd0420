mod battery;
mod config;
mod context;
mod eventloop;
mod logging;
mod mqtt;
mod notify;
mod retry;
mod sunspec;

use anyhow::{Context as _, Result};
use battery::status::StatusStore;
use chrono::{Local, NaiveDateTime};
use context::{Context, Outbound};
use log::{error, info, warn};
use notify::Notification;
use paho_mqtt::{AsyncClient, ConnectOptionsBuilder, CreateOptionsBuilder, PersistenceType};
use retry::RetryPolicy;
use std::sync::Arc;
use sunspec::fronius::FroniusDevices;
use tokio::{
    select,
    signal::unix::{signal, SignalKind},
    sync::{mpsc, Mutex},
    time::{self, Duration, MissedTickBehavior},
};

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn interval(period: Duration) -> time::Interval {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn publish(client: &AsyncClient, outbox: Vec<Outbound>) {
    for outbound in outbox {
        let published = match &outbound {
            Outbound::Sensor(state) => mqtt::publish_sensor(client, state).await,
            Outbound::Status(status) => mqtt::publish_status(client, status).await,
            Outbound::Notification(notification) => mqtt::publish_notification(client, notification).await,
        };

        if let Err(e) = published {
            error!("Unable to publish: {e:#}");
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = config::Config::load()?;

    logging::init_logger(logging::parse_level(&config.log_level)?);

    let status = StatusStore::load(&config.status_file)
        .await
        .with_context(|| format!("Failed to load status file {:?}", config.status_file))?;

    let client_id = config.client_id.0.clone();

    let mut mqtt_client = AsyncClient::new(
        CreateOptionsBuilder::new()
            .server_uri(format!(
                "tcp://{host}:{port}",
                host = config.broker,
                port = config.broker_port
            ))
            .client_id(&client_id)
            .persistence(PersistenceType::None)
            .finalize(),
    )
    .context("Failed to create MQTT client")?;

    let mqtt_stream = mqtt_client.get_stream(128);

    mqtt_client
        .connect(
            ConnectOptionsBuilder::new()
                .automatic_reconnect(Duration::from_secs(2u64.pow(3)), Duration::from_secs(2u64.pow(12)))
                .max_inflight(128)
                .will_message(mqtt::offline_message(&client_id))
                .finalize(),
        )
        .await
        .context("Failed to connect to MQTT broker")?;

    mqtt::announce_online(&client_id, &mqtt_client)
        .await
        .context("Failed to announce online status")?;

    mqtt::subscribe_all(&mqtt_client)
        .await
        .context("Failed to subscribe")?;

    let devices: Arc<Mutex<FroniusDevices>> = Arc::new(Mutex::new(FroniusDevices::new(
        config.device.inverter(),
        config.device.meter(),
    )));
    let policy = RetryPolicy::from(&config.reconnect);
    let intervals = config.intervals.clone();

    let mut context = Context::new(config, devices.clone(), status, now());

    if let Err(e) = context.startup().await {
        error!("Startup failed: {e:#}");

        let notification = Notification {
            title: "Fronius Solar Start Fehler".to_owned(),
            message: format!("{e:#}"),
        };
        let _ = mqtt::publish_notification(&mqtt_client, &notification).await;
        let _ = mqtt::announce_offline(&client_id, &mqtt_client).await;

        return Err(e);
    }
    publish(&mqtt_client, context.take_outbox()).await;

    let (tx, mut rx) = mpsc::channel(16);

    tokio::spawn(eventloop::telemetry_event_loop(
        devices,
        intervals.telemetry(),
        policy,
        tx.clone(),
    ));
    tokio::spawn(eventloop::mqtt_message_event_loop(mqtt_stream, tx));

    let mut decision_timer = interval(intervals.decision());
    let mut schedule_timer = interval(intervals.schedule());
    let mut health_timer = interval(intervals.health());
    let mut grid_charge_timer = interval(intervals.grid_charge_poll());

    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    info!("Fronius battery control for {client_id} started");

    loop {
        select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = terminate.recv() => break,
            _ = hangup.recv() => context.tick(now(), true).await,
            _ = decision_timer.tick() => context.tick(now(), false).await,
            _ = schedule_timer.tick() => context.check_schedule(now()).await,
            _ = grid_charge_timer.tick() => context.poll_grid_charge(now()).await,
            _ = health_timer.tick() => {
                if let Err(e) = mqtt::publish_health(&mqtt_client).await {
                    warn!("Unable to publish health: {e:#}");
                }
            },
            event = rx.recv() => match event {
                Some(eventloop::Message::Telemetry(time_ms, measured)) => {
                    context.handle_telemetry(time_ms, measured).await;
                },
                Some(eventloop::Message::Mqtt(msg)) => match mqtt::parse(msg.topic(), msg.payload()) {
                    Ok(inbound) => context.handle_inbound(now(), inbound).await,
                    Err(e) => error!("MQTT payload error on {}: {e}", msg.topic()),
                },
                None => break,
            },
        }

        publish(&mqtt_client, context.take_outbox()).await;
    }

    info!("Shutting down");

    if let Err(e) = context.shutdown().await {
        error!("Failed to restore battery defaults: {e}");
    }
    publish(&mqtt_client, context.take_outbox()).await;

    let _ = mqtt::announce_offline(&client_id, &mqtt_client).await;

    Ok(())
}
