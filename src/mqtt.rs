use crate::{
    battery::{
        engine::EvStatus,
        prices::{PriceLevel, PricePoint},
        status::BatteryStatus,
    },
    notify::Notification,
    sunspec::fronius::{Measurements, Percentage, PowerFlow, WattHours, Watts},
};
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime};
use log::{debug, LevelFilter};
use paho_mqtt::{AsyncClient, Message, QOS_1 as QOS_AT_LEAST_ONCE};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use thiserror::Error;

pub const COMMAND_TOPIC: &str = "Fronius/solar/cmnd";
pub const FORECAST_TOPIC: &str = "solcast/forecasts";
pub const PRICES_TOPIC: &str = "strom/tele/preise";
pub const MAX_SUN_TOPIC: &str = "maxSun/INFO";
pub const SUN_TIMES_TOPIC: &str = "sunTimes/INFO";
pub const HOUSE_LOAD_TOPIC: &str = "strom/tele/SENSOR";
pub const METER_TOPIC: &str = "tasmota/espstrom/tele/SENSOR";
pub const EV_TOPIC: &str = "auto/tele/STATUS";
pub const HEATER_TOPIC: &str = "tasmota/heizstab/tele/SENSOR";

pub const SENSOR_TOPIC: &str = "Fronius/solar/tele/SENSOR";
pub const STATUS_TOPIC: &str = "Fronius/solar/tele/STATUS";
pub const HEALTH_TOPIC: &str = "fronius-battery/health/STATE";
pub const NOTIFY_TOPIC: &str = "mqtt-notify/notify";

pub const SUBSCRIPTIONS: [&str; 9] = [
    COMMAND_TOPIC,
    FORECAST_TOPIC,
    PRICES_TOPIC,
    MAX_SUN_TOPIC,
    SUN_TIMES_TOPIC,
    HOUSE_LOAD_TOPIC,
    METER_TOPIC,
    EV_TOPIC,
    HEATER_TOPIC,
];

fn mqtt_avail_topic(client_id: &str) -> String {
    format!("{client_id}/bridge/state")
}

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("unhandled topic '{0}'")]
    UnknownTopic(String),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid payload: {0}")]
    Invalid(String),
}

#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    ChargeMax(bool),
    /// `None` clears the override.
    ChargeTo(Option<f64>),
    PreventUnload(bool),
    /// 0 stops a running grid charge.
    GridChargePct(f64),
    ScheduleCheck,
    LogLevel(LevelFilter),
}

#[derive(Debug, PartialEq, Clone)]
pub enum Inbound {
    Command(Command),
    /// Half-hour periods as (local period end, average kW).
    Forecast(Vec<(NaiveDateTime, f64)>),
    Prices(Vec<PricePoint>),
    MaxSun(NaiveDateTime),
    SunTimes { sunrise: NaiveDateTime, sunset: NaiveDateTime },
    HouseLoad(Watts),
    /// Signed meter power, positive while importing.
    MeterPower(Watts),
    Ev(EvStatus),
    Heater(Watts),
}

fn local(time: DateTime<FixedOffset>) -> NaiveDateTime {
    time.with_timezone(&Local).naive_local()
}

fn finite(value: f64, what: &str) -> Result<f64, PayloadError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PayloadError::Invalid(format!("{what} is not a number")))
    }
}

fn flag(value: &Json) -> bool {
    match value {
        Json::Bool(b) => *b,
        Json::Number(n) => n.as_f64().map_or(false, |n| n != 0.0),
        _ => false,
    }
}

fn parse_command(object: &Map<String, Json>) -> Result<Command, PayloadError> {
    if let Some(value) = object.get("chargeMax") {
        return Ok(Command::ChargeMax(flag(value)));
    }

    if let Some(value) = object.get("chargeTo") {
        return match value {
            Json::Null | Json::Bool(false) => Ok(Command::ChargeTo(None)),
            Json::Number(n) => match n.as_f64() {
                Some(pct) if pct == 0.0 => Ok(Command::ChargeTo(None)),
                Some(pct) if (0.0..=100.0).contains(&pct) => Ok(Command::ChargeTo(Some(pct))),
                _ => Err(PayloadError::Invalid(format!("chargeTo {n} out of range"))),
            },
            other => Err(PayloadError::Invalid(format!("chargeTo {other}"))),
        };
    }

    if let Some(value) = object.get("preventUnload") {
        return Ok(Command::PreventUnload(flag(value)));
    }

    if let Some(value) = object.get("gridChargePct") {
        return match value.as_f64() {
            Some(pct) if (0.0..=100.0).contains(&pct) => Ok(Command::GridChargePct(pct)),
            _ => Err(PayloadError::Invalid(format!("gridChargePct {value}"))),
        };
    }

    if object.contains_key("scheduleCheck") {
        return Ok(Command::ScheduleCheck);
    }

    if let Some(value) = object.get("logLevel") {
        let level = value
            .as_str()
            .and_then(|level| level.parse().ok())
            .ok_or_else(|| PayloadError::Invalid(format!("logLevel {value}")))?;

        return Ok(Command::LogLevel(level));
    }

    Err(PayloadError::Invalid(format!(
        "unknown command {:?}",
        object.keys().collect::<Vec<_>>()
    )))
}

#[derive(Deserialize)]
struct ForecastPeriod {
    period_end: DateTime<FixedOffset>,
    pv_estimate90: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPrice {
    start_time: DateTime<FixedOffset>,
    cents_per_kwh: f64,
    #[serde(default = "unknown_level")]
    level: PriceLevel,
}

fn unknown_level() -> PriceLevel {
    PriceLevel::Unknown
}

#[derive(Deserialize)]
struct SunTimes {
    sunrise: DateTime<FixedOffset>,
    sunset: DateTime<FixedOffset>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HouseLoad {
    momentan_leistung: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Sml {
    leistung: f64,
}

#[derive(Deserialize)]
struct MeterSensor {
    #[serde(rename = "SML")]
    sml: Sml,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Energy {
    power: f64,
}

#[derive(Deserialize)]
struct HeaterSensor {
    #[serde(rename = "ENERGY")]
    energy: Energy,
}

/// Validates an inbound message and converts timestamps to local wall clock time.
pub fn parse(topic: &str, payload: &[u8]) -> Result<Inbound, PayloadError> {
    match topic {
        COMMAND_TOPIC => match serde_json::from_slice(payload)? {
            Json::Object(object) => Ok(Inbound::Command(parse_command(&object)?)),
            other => Err(PayloadError::Invalid(format!("command is not an object: {other}"))),
        },
        FORECAST_TOPIC => {
            let periods: Vec<ForecastPeriod> = serde_json::from_slice(payload)?;

            Ok(Inbound::Forecast(
                periods
                    .into_iter()
                    .map(|p| Ok((local(p.period_end), finite(p.pv_estimate90, "pv_estimate90")?)))
                    .collect::<Result<_, PayloadError>>()?,
            ))
        },
        PRICES_TOPIC => {
            let prices: Vec<RawPrice> = serde_json::from_slice(payload)?;

            Ok(Inbound::Prices(
                prices
                    .into_iter()
                    .map(|p| {
                        Ok(PricePoint {
                            start_time: local(p.start_time),
                            cents_per_kwh: finite(p.cents_per_kwh, "centsPerKwh")?,
                            level: p.level,
                        })
                    })
                    .collect::<Result<_, PayloadError>>()?,
            ))
        },
        MAX_SUN_TOPIC => {
            let max_sun: DateTime<FixedOffset> = serde_json::from_slice(payload)?;

            Ok(Inbound::MaxSun(local(max_sun)))
        },
        SUN_TIMES_TOPIC => {
            let times: SunTimes = serde_json::from_slice(payload)?;

            Ok(Inbound::SunTimes {
                sunrise: local(times.sunrise),
                sunset: local(times.sunset),
            })
        },
        HOUSE_LOAD_TOPIC => {
            let load: HouseLoad = serde_json::from_slice(payload)?;

            Ok(Inbound::HouseLoad(finite(load.momentan_leistung, "momentanLeistung")?))
        },
        METER_TOPIC => {
            let meter: MeterSensor = serde_json::from_slice(payload)?;

            Ok(Inbound::MeterPower(finite(meter.sml.leistung, "SML.Leistung")?))
        },
        EV_TOPIC => Ok(Inbound::Ev(serde_json::from_slice(payload)?)),
        HEATER_TOPIC => {
            let heater: HeaterSensor = serde_json::from_slice(payload)?;

            Ok(Inbound::Heater(finite(heater.energy.power, "ENERGY.Power")?))
        },
        other => Err(PayloadError::UnknownTopic(other.to_owned())),
    }
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatteryState {
    pub power_incoming: Watts,
    pub power_outgoing: Watts,
    /// Fraction, 0..=1.
    pub state_of_charge: Percentage,
    pub solar_wh: WattHours,
    pub storage_charge_wh: WattHours,
    pub storage_discharge_wh: WattHours,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InverterState {
    pub power_incoming: Watts,
    pub power_outgoing: Watts,
    pub tmp_cab: f64,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SolarState {
    pub power_outgoing: Watts,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlowState {
    pub power_incoming: Watts,
    pub power_outgoing: Watts,
}

impl From<PowerFlow> for FlowState {
    fn from(flow: PowerFlow) -> Self {
        Self {
            power_incoming: flow.incoming,
            power_outgoing: flow.outgoing,
        }
    }
}

/// The normalized telemetry snapshot.
#[derive(Serialize, Debug, PartialEq)]
pub struct SensorState {
    pub time: i64,
    pub battery: BatteryState,
    pub meter: FlowState,
    pub inverter: InverterState,
    pub solar: SolarState,
}

impl SensorState {
    pub fn new(time_ms: i64, m: &Measurements) -> Self {
        // the inverter counts AC output as positive
        let inverter = PowerFlow::from_signed(-m.inverter_power);

        Self {
            time: time_ms,
            battery: BatteryState {
                power_incoming: m.battery_charge_power,
                power_outgoing: m.battery_discharge_power,
                state_of_charge: m.state_of_charge / 100.0,
                solar_wh: m.solar_energy,
                storage_charge_wh: m.storage_charge_energy,
                storage_discharge_wh: m.storage_discharge_energy,
            },
            meter: PowerFlow::from_signed(m.meter_power).into(),
            inverter: InverterState {
                power_incoming: inverter.incoming,
                power_outgoing: inverter.outgoing,
                tmp_cab: m.cabinet_temperature.round(),
            },
            solar: SolarState {
                power_outgoing: m.solar_power,
            },
        }
    }
}

pub async fn subscribe_all(client: &AsyncClient) -> anyhow::Result<()> {
    for topic in SUBSCRIPTIONS {
        client.subscribe(topic, QOS_AT_LEAST_ONCE).await?;
    }

    Ok(())
}

pub async fn announce_online(client_id: &str, client: &AsyncClient) -> anyhow::Result<()> {
    client
        .publish(Message::new_retained(
            mqtt_avail_topic(client_id),
            b"online".to_owned(),
            QOS_AT_LEAST_ONCE,
        ))
        .await?;
    Ok(())
}

pub fn offline_message(client_id: &str) -> Message {
    Message::new_retained(mqtt_avail_topic(client_id), "offline".to_owned(), QOS_AT_LEAST_ONCE)
}

pub async fn announce_offline(client_id: &str, client: &AsyncClient) -> anyhow::Result<()> {
    client.publish(offline_message(client_id)).await?;
    Ok(())
}

async fn publish_json(
    client: &AsyncClient,
    topic: &str,
    payload: &impl Serialize,
    retained: bool,
) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(payload)?;

    debug!(
        "MQTT publish topic: '{topic}' payload: '{}'",
        String::from_utf8_lossy(&payload)
    );

    let message = if retained {
        Message::new_retained(topic, payload, QOS_AT_LEAST_ONCE)
    } else {
        Message::new(topic, payload, QOS_AT_LEAST_ONCE)
    };

    client.publish(message).await?;

    Ok(())
}

pub async fn publish_sensor(client: &AsyncClient, state: &SensorState) -> anyhow::Result<()> {
    publish_json(client, SENSOR_TOPIC, state, true).await
}

pub async fn publish_status(client: &AsyncClient, status: &BatteryStatus) -> anyhow::Result<()> {
    publish_json(client, STATUS_TOPIC, status, true).await
}

pub async fn publish_notification(client: &AsyncClient, notification: &Notification) -> anyhow::Result<()> {
    publish_json(client, NOTIFY_TOPIC, notification, false).await
}

pub async fn publish_health(client: &AsyncClient) -> anyhow::Result<()> {
    client
        .publish(Message::new(HEALTH_TOPIC, "OK", QOS_AT_LEAST_ONCE))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        chrono::Utc
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Local)
            .naive_local()
    }

    #[test]
    fn commands() {
        let parse_cmd = |json: &str| match parse(COMMAND_TOPIC, json.as_bytes()).unwrap() {
            Inbound::Command(command) => command,
            other => panic!("not a command: {other:?}"),
        };

        assert_eq!(parse_cmd(r#"{"chargeMax": true}"#), Command::ChargeMax(true));
        assert_eq!(parse_cmd(r#"{"chargeMax": null}"#), Command::ChargeMax(false));
        assert_eq!(parse_cmd(r#"{"chargeTo": 90}"#), Command::ChargeTo(Some(90.0)));
        assert_eq!(parse_cmd(r#"{"chargeTo": null}"#), Command::ChargeTo(None));
        assert_eq!(parse_cmd(r#"{"preventUnload": 1}"#), Command::PreventUnload(true));
        assert_eq!(parse_cmd(r#"{"gridChargePct": 30}"#), Command::GridChargePct(30.0));
        assert_eq!(parse_cmd(r#"{"scheduleCheck": true}"#), Command::ScheduleCheck);
        assert_eq!(parse_cmd(r#"{"logLevel": "debug"}"#), Command::LogLevel(LevelFilter::Debug));

        assert!(parse(COMMAND_TOPIC, br#"{"chargeTo": 140}"#).is_err());
        assert!(parse(COMMAND_TOPIC, br#"{"gridChargePct": "lots"}"#).is_err());
        assert!(parse(COMMAND_TOPIC, br#"{"reboot": true}"#).is_err());
        assert!(parse(COMMAND_TOPIC, b"[1]").is_err());
    }

    #[test]
    fn forecasts_and_prices_are_local_time() {
        let forecast = br#"[
            {"period_end": "2024-05-15T10:30:00.0000000Z", "pv_estimate": 2.5, "pv_estimate90": 3.1},
            {"period_end": "2024-05-15T11:00:00.0000000Z", "pv_estimate90": 0}
        ]"#;

        assert_eq!(
            parse(FORECAST_TOPIC, forecast).unwrap(),
            Inbound::Forecast(vec![(utc(2024, 5, 15, 10, 30), 3.1), (utc(2024, 5, 15, 11, 0), 0.0)])
        );

        let prices = br#"[{"startTime": "2024-11-12T00:00:00.000+01:00", "centsPerKwh": 28.4, "level": "CHEAP"},
                          {"startTime": "2024-11-12T01:00:00.000+01:00", "centsPerKwh": 27.1}]"#;

        let Inbound::Prices(points) = parse(PRICES_TOPIC, prices).unwrap() else {
            panic!("expected prices");
        };
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].start_time, utc(2024, 11, 11, 23, 0));
        assert_eq!(points[0].level, PriceLevel::Cheap);
        assert_eq!(points[1].level, PriceLevel::Unknown);
    }

    #[test]
    fn sensors() {
        assert_eq!(
            parse(
                METER_TOPIC,
                br#"{"Time": "2024-05-15T12:00:00", "SML": {"Verbrauch": 1, "Leistung": -4200}}"#
            )
            .unwrap(),
            Inbound::MeterPower(-4200.0)
        );
        assert_eq!(
            parse(HEATER_TOPIC, br#"{"ENERGY": {"Power": 2000, "Today": 3.2}}"#).unwrap(),
            Inbound::Heater(2000.0)
        );
        assert_eq!(
            parse(HOUSE_LOAD_TOPIC, br#"{"momentanLeistung": 640}"#).unwrap(),
            Inbound::HouseLoad(640.0)
        );
        assert_eq!(
            parse(EV_TOPIC, br#"{"charging": true, "socPct": 40, "targetSocPct": 80}"#).unwrap(),
            Inbound::Ev(EvStatus {
                charging: true,
                soc_pct: Some(40.0),
                target_soc_pct: Some(80.0),
            })
        );
        assert_eq!(
            parse(MAX_SUN_TOPIC, br#""2024-05-15T11:12:00Z""#).unwrap(),
            Inbound::MaxSun(utc(2024, 5, 15, 11, 12))
        );
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(matches!(parse(METER_TOPIC, b"{\"SML\": {}}"), Err(PayloadError::Json(_))));
        assert!(matches!(parse(FORECAST_TOPIC, b"not json"), Err(PayloadError::Json(_))));
        assert!(matches!(
            parse("some/other/topic", b"{}"),
            Err(PayloadError::UnknownTopic(_))
        ));
    }

    #[test]
    fn sensor_snapshot_shape() {
        let m = Measurements {
            state_of_charge: 85.0,
            solar_power: 3000.0,
            battery_charge_power: 500.0,
            battery_discharge_power: 0.0,
            meter_power: -700.0,
            inverter_power: 1500.0,
            cabinet_temperature: 41.2,
            solar_energy: 75_000.0,
            storage_charge_energy: 40_000.0,
            storage_discharge_energy: 30_000.0,
        };

        let json = serde_json::to_value(SensorState::new(1_715_774_400_000, &m)).unwrap();

        assert_eq!(json["battery"]["stateOfCharge"], 0.85);
        assert_eq!(json["battery"]["storageDischargeWh"], 30_000.0);
        assert_eq!(json["meter"]["powerOutgoing"], 700.0);
        assert_eq!(json["meter"]["powerIncoming"], 0.0);
        assert_eq!(json["inverter"]["powerOutgoing"], 1500.0);
        assert_eq!(json["inverter"]["tmpCab"], 41.0);
        assert_eq!(json["solar"]["powerOutgoing"], 3000.0);
    }
}
