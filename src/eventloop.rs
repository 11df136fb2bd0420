use crate::{
    retry::{with_backoff, RetryPolicy},
    sunspec::{
        fronius::{FroniusDevices, Measurements},
        transport::Transport,
        SunspecError,
    },
};
use chrono::Utc;
use log::{debug, info, warn};
use std::{future::Future, sync::Arc};
use tokio::{
    sync::{mpsc, Mutex},
    time::{self, Duration},
};

pub enum Message {
    /// Poll time in epoch milliseconds and what the poll read.
    Telemetry(i64, Result<Measurements, SunspecError>),
    Mqtt(paho_mqtt::Message),
}

pub fn mqtt_message_event_loop(
    mqtt_stream: paho_mqtt::AsyncReceiver<Option<paho_mqtt::Message>>,
    tx: mpsc::Sender<Message>,
) -> impl Future<Output = ()> {
    async move {
        loop {
            let Ok(event) = mqtt_stream.recv().await else {
                break;
            };

            match event {
                Some(event) => {
                    if tx.send(Message::Mqtt(event)).await.is_err() {
                        break;
                    }
                },
                None => warn!("Lost connection to MQTT broker"),
            }
        }

        info!("Shutting down MQTT client");
    }
}

/// Reopens the devices when needed, then reads one snapshot. A connection
/// error closes both devices so the next poll starts from a fresh socket.
pub async fn poll_once<T: Transport>(
    devices: &Arc<Mutex<FroniusDevices<T>>>,
    policy: RetryPolicy,
) -> Result<Measurements, SunspecError> {
    if !devices.lock().await.is_open() {
        with_backoff(policy, SunspecError::is_connection, || {
            let devices = devices.clone();
            async move { devices.lock().await.open().await }
        })
        .await?;
    }

    let mut devices = devices.lock().await;
    let measured = devices.measure().await;

    if measured.as_ref().is_err_and(SunspecError::is_connection) {
        devices.close();
    }

    measured
}

pub fn telemetry_event_loop<T: Transport + 'static>(
    devices: Arc<Mutex<FroniusDevices<T>>>,
    period: Duration,
    policy: RetryPolicy,
    tx: mpsc::Sender<Message>,
) -> impl Future<Output = ()> {
    let mut timer = time::interval(period);
    timer.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    async move {
        loop {
            timer.tick().await;

            let measured = poll_once(&devices, policy).await;
            debug!("Telemetry poll done, ok: {}", measured.is_ok());

            if tx
                .send(Message::Telemetry(Utc::now().timestamp_millis(), measured))
                .await
                .is_err()
            {
                break;
            }
        }

        info!("Shutting down telemetry poller");
    }
}
