use crate::sunspec::transport::DeviceConnection;
use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use lazy_static::lazy_static;
use serde::{de::Error, Deserialize, Deserializer};
use std::{fs::File, path::PathBuf, time::Duration};

lazy_static! {
    static ref CLIENT_ID_REGEX: regex::Regex = regex::Regex::new("^[a-zA-Z0-9_]+$").unwrap();
}

pub const CONFIG_PATH_ENV: &str = "FRONIUS_BATTERY_CONFIG";

const fn default_mqtt_port() -> u16 {
    1883
}
const fn default_modbus_port() -> u16 {
    502
}
const fn default_inverter_unit() -> u8 {
    1
}
const fn default_meter_unit() -> u8 {
    200
}
const fn default_timeout_ms() -> u64 {
    5000
}
fn default_client_id() -> ClientId {
    ClientId("fronius_battery".to_owned())
}
fn default_status_file() -> PathBuf {
    PathBuf::from("/var/fronius/fronius-battery.json")
}
fn default_log_level() -> String {
    "info".to_owned()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientId(pub String);

impl<'de> Deserialize<'de> for ClientId {
    fn deserialize<D>(de: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let id = String::deserialize(de)?;

        if CLIENT_ID_REGEX.is_match(&id) {
            Ok(ClientId(id))
        } else {
            Err(Error::custom("client_id must match [a-zA-Z0-9_]+"))
        }
    }
}

fn deserialize_hh_mm<'de, D>(de: D) -> Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    let time = String::deserialize(de)?;

    NaiveTime::parse_from_str(&time, "%H:%M").map_err(|e| Error::custom(format!("invalid time {time:?}: {e}")))
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_client_id")]
    pub client_id: ClientId,

    pub broker: String,

    #[serde(default = "default_mqtt_port")]
    pub broker_port: u16,

    #[serde(default = "default_status_file")]
    pub status_file: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    pub device: DeviceConfig,

    #[serde(default)]
    pub intervals: Intervals,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    #[serde(default)]
    pub charge: ChargeConfig,

    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub grid_charge: GridChargeConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DeviceConfig {
    pub host: String,

    #[serde(default = "default_modbus_port")]
    pub port: u16,

    #[serde(default = "default_inverter_unit")]
    pub inverter_unit: u8,

    #[serde(default = "default_meter_unit")]
    pub meter_unit: u8,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl DeviceConfig {
    fn connection(&self, unit_id: u8) -> DeviceConnection {
        DeviceConnection {
            host: self.host.clone(),
            port: self.port,
            unit_id,
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }

    pub fn inverter(&self) -> DeviceConnection {
        self.connection(self.inverter_unit)
    }

    pub fn meter(&self) -> DeviceConnection {
        self.connection(self.meter_unit)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Intervals {
    pub telemetry_ms: u64,
    pub decision_secs: u64,
    pub schedule_secs: u64,
    pub health_secs: u64,
    pub grid_charge_poll_secs: u64,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            telemetry_ms: 5000,
            decision_secs: 60,
            schedule_secs: 300,
            health_secs: 60,
            grid_charge_poll_secs: 60,
        }
    }
}

impl Intervals {
    pub fn telemetry(&self) -> Duration {
        Duration::from_millis(self.telemetry_ms)
    }
    pub fn decision(&self) -> Duration {
        Duration::from_secs(self.decision_secs)
    }
    pub fn schedule(&self) -> Duration {
        Duration::from_secs(self.schedule_secs)
    }
    pub fn health(&self) -> Duration {
        Duration::from_secs(self.health_secs)
    }
    pub fn grid_charge_poll(&self) -> Duration {
        Duration::from_secs(self.grid_charge_poll_secs)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ReconnectConfig {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 2000,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct NotifyConfig {
    pub after_failures: u32,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self { after_failures: 3 }
    }
}

/// A month range in which the battery is not charged above `goal_pct`
/// when tomorrow looks sunny enough.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Season {
    pub name: String,
    pub first_month: u32,
    pub last_month: u32,
    pub goal_pct: f64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ChargeConfig {
    pub dc_limit_w: f64,
    pub feed_in_margin_w: f64,
    pub high_production_w: f64,
    pub typical_charge_w: f64,
    pub low_soc_pct: f64,
    pub top_off_pct: f64,
    pub top_off_rate: f64,
    pub floor_rate: f64,
    pub after_peak_rate: f64,
    pub moderate_rate: f64,
    pub abundant_factor: f64,
    pub day_demand_w: f64,
    pub night_demand_w: f64,
    pub log_refresh_minutes: i64,
    #[serde(deserialize_with = "deserialize_hh_mm")]
    pub default_peak_sun: NaiveTime,
    pub seasons: Vec<Season>,
}

impl Default for ChargeConfig {
    fn default() -> Self {
        Self {
            dc_limit_w: 5750.0,
            feed_in_margin_w: 500.0,
            high_production_w: 3000.0,
            typical_charge_w: 2000.0,
            low_soc_pct: 20.0,
            top_off_pct: 5.0,
            top_off_rate: 0.05,
            floor_rate: 0.1,
            after_peak_rate: 0.2,
            moderate_rate: 0.4,
            abundant_factor: 3.0,
            day_demand_w: 500.0,
            night_demand_w: 200.0,
            log_refresh_minutes: 28,
            default_peak_sun: NaiveTime::from_hms_opt(13, 0, 0).unwrap_or_default(),
            seasons: vec![
                Season {
                    name: "April to October".to_owned(),
                    first_month: 4,
                    last_month: 10,
                    goal_pct: 95.0,
                },
                Season {
                    name: "May to August".to_owned(),
                    first_month: 5,
                    last_month: 8,
                    goal_pct: 80.0,
                },
            ],
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ControllerConfig {
    pub default_revert_secs: u16,
    pub managed_revert_secs: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            default_revert_secs: 60,
            managed_revert_secs: 3900,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GridChargeConfig {
    pub max_rate_pct: f64,
    pub reserve_pct: f64,
    pub meal_spike_w: f64,
    pub meal_hours: Vec<u32>,
    #[serde(deserialize_with = "deserialize_hh_mm")]
    pub default_sunrise: NaiveTime,
    /// Longest a manual grid charge runs before it is stopped.
    pub manual_hours: i64,
}

impl Default for GridChargeConfig {
    fn default() -> Self {
        Self {
            max_rate_pct: 50.0,
            reserve_pct: 20.0,
            meal_spike_w: 1500.0,
            meal_hours: vec![7, 12, 18],
            default_sunrise: NaiveTime::from_hms_opt(6, 30, 0).unwrap_or_default(),
            manual_hours: 3,
        }
    }
}

impl Config {
    pub fn path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return PathBuf::from(path);
        }

        if cfg!(debug_assertions) {
            PathBuf::from("./fronius-battery.yaml")
        } else {
            PathBuf::from("/etc/fronius-battery.yaml")
        }
    }

    pub fn load() -> Result<Self> {
        let path = Self::path();

        let file = File::open(&path).with_context(|| format!("Failed to open config file {path:?}"))?;

        let config: Config =
            serde_yaml::from_reader(file).with_context(|| format!("Failed to parse config file {path:?}"))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file {path:?}"))?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for season in &self.charge.seasons {
            if !(1..=12).contains(&season.first_month)
                || !(1..=12).contains(&season.last_month)
                || season.first_month > season.last_month
            {
                bail!(
                    "season {:?}: months {}..{} are not a range within 1..12",
                    season.name,
                    season.first_month,
                    season.last_month
                );
            }
            if !(0.0..=100.0).contains(&season.goal_pct) {
                bail!("season {:?}: goal {}% out of range", season.name, season.goal_pct);
            }
        }

        if let Some(hour) = self.grid_charge.meal_hours.iter().find(|h| **h > 23) {
            bail!("grid_charge.meal_hours: {hour} is not an hour of the day");
        }

        if !(self.grid_charge.max_rate_pct > 0.0 && self.grid_charge.max_rate_pct <= 100.0) {
            bail!("grid_charge.max_rate_pct must be within (0, 100]");
        }

        if self.grid_charge.manual_hours <= 0 {
            bail!("grid_charge.manual_hours must be positive");
        }

        if self.intervals.telemetry_ms == 0 || self.intervals.decision_secs == 0 {
            bail!("intervals must not be zero");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "
broker: 192.168.6.5
device:
  host: 192.168.6.11
";

    #[test]
    fn defaults_fill_in() {
        let config: Config = serde_yaml::from_str(MINIMAL).unwrap();

        assert_eq!(config.client_id, ClientId("fronius_battery".to_owned()));
        assert_eq!(config.broker_port, 1883);
        assert_eq!(config.device.port, 502);
        assert_eq!(config.device.meter_unit, 200);
        assert_eq!(config.device.inverter().unit_id, 1);
        assert_eq!(config.device.meter().timeout, Duration::from_millis(5000));
        assert_eq!(config.charge.dc_limit_w, 5750.0);
        assert_eq!(config.charge.seasons.len(), 2);
        assert_eq!(config.controller.managed_revert_secs, 3900);
        assert_eq!(config.grid_charge.default_sunrise, NaiveTime::from_hms_opt(6, 30, 0).unwrap());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let yaml = format!(
            "{MINIMAL}
charge:
  dc_limit_w: 6000
  default_peak_sun: '12:45'
  seasons:
    - name: summer
      first_month: 6
      last_month: 7
      goal_pct: 85
"
        );
        let config: Config = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(config.charge.dc_limit_w, 6000.0);
        assert_eq!(config.charge.low_soc_pct, 20.0);
        assert_eq!(config.charge.seasons[0].goal_pct, 85.0);
        assert_eq!(config.charge.default_peak_sun, NaiveTime::from_hms_opt(12, 45, 0).unwrap());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad_id = format!("{MINIMAL}client_id: fronius-battery\n");
        assert!(serde_yaml::from_str::<Config>(&bad_id).is_err());

        let bad_time = format!("{MINIMAL}grid_charge:\n  default_sunrise: '6 Uhr'\n");
        assert!(serde_yaml::from_str::<Config>(&bad_time).is_err());

        let mut config: Config = serde_yaml::from_str(MINIMAL).unwrap();
        config.charge.seasons[0].first_month = 11;
        assert!(config.validate().is_err());

        let mut config: Config = serde_yaml::from_str(MINIMAL).unwrap();
        config.grid_charge.meal_hours.push(24);
        assert!(config.validate().is_err());
    }
}
