use super::{
    controller::{ControllerError, ControllerMode},
    forecast::ForecastAnalysis,
    rate::{target_charge, RateInputs, Rule},
    status::{BatteryStatus, StatusError},
};
use crate::{config::ChargeConfig, sunspec::SunspecError};
use chrono::{Duration, NaiveDateTime};
use serde::Deserialize;
use std::{collections::VecDeque, fmt};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecisionError {
    #[error("insufficient data: {0}")]
    InsufficientData(&'static str),

    #[error("device access failed: {0}")]
    Device(#[from] SunspecError),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error("status update failed: {0}")]
    Status(#[from] StatusError),
}

impl DecisionError {
    /// True when the device connection has to be dropped and reopened.
    pub fn is_connection(&self) -> bool {
        match self {
            DecisionError::Device(e) => e.is_connection(),
            DecisionError::Controller(ControllerError::Write { source, .. }) => source.is_connection(),
            _ => false,
        }
    }
}

/// Keeps the last `capacity` samples. Starts with a single zero so `max()`
/// is defined before the first sample arrives.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    values: VecDeque<f64>,
    capacity: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let mut values = VecDeque::with_capacity(capacity);
        values.push_back(0.0);

        Self { values, capacity }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }
}

/// Last state reported by the wallbox integration.
#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EvStatus {
    #[serde(default)]
    pub charging: bool,
    pub soc_pct: Option<f64>,
    pub target_soc_pct: Option<f64>,
}

impl EvStatus {
    /// The car gets the PV while it is charging towards its target.
    pub fn needs_pv(&self) -> bool {
        match (self.soc_pct, self.target_soc_pct) {
            (Some(soc), Some(target)) => self.charging && soc < target,
            _ => self.charging,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Reason {
    Hold,
    LowSoc,
    ChargeMax,
    ChargeTo,
    CheaperThanLastCharge,
    Cascade(Rule),
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Reason::Hold => write!(f, "hold"),
            Reason::LowSoc => write!(f, "low state of charge"),
            Reason::ChargeMax => write!(f, "charge max"),
            Reason::ChargeTo => write!(f, "charge to"),
            Reason::CheaperThanLastCharge => write!(f, "cheaper than last charge"),
            Reason::Cascade(rule) => write!(f, "{rule:?}"),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Decision {
    pub mode: ControllerMode,
    pub reason: Reason,
    pub rationale: String,
}

impl Decision {
    fn charge(pct: f64, reason: Reason, rationale: String) -> Self {
        Self {
            mode: ControllerMode::PvCharge(pct),
            reason,
            rationale,
        }
    }

    pub fn pct(&self) -> f64 {
        match self.mode {
            ControllerMode::PvCharge(pct) | ControllerMode::GridCharge(pct) => pct,
            ControllerMode::Default => 100.0,
            ControllerMode::Hold => 0.0,
        }
    }
}

/// One tick's view of the world.
pub struct TickInputs<'a> {
    pub now: NaiveDateTime,
    pub soc_pct: f64,
    pub status: &'a BatteryStatus,
    pub forecast: Option<&'a ForecastAnalysis>,
    pub current_price_cent: Option<f64>,
    pub ev: Option<&'a EvStatus>,
    pub house_load_w: f64,
    pub after_peak_sun: bool,
}

/// Logs a decision only when it differs from the last logged one, or when
/// the last log line is too old.
#[derive(Debug, Default)]
pub struct RateLog {
    last: Option<(NaiveDateTime, i64, String)>,
}

impl RateLog {
    fn bucket(pct: f64) -> i64 {
        (pct / 5.0).round() as i64
    }

    pub fn should_log(&mut self, now: NaiveDateTime, decision: &Decision, forced: bool, refresh: Duration) -> bool {
        let bucket = Self::bucket(decision.pct());

        let log = forced
            || match &self.last {
                None => true,
                Some((at, last_bucket, rationale)) => {
                    *last_bucket != bucket || *rationale != decision.rationale || now - *at >= refresh
                },
            };

        if log {
            self.last = Some((now, bucket, decision.rationale.clone()));
        }

        log
    }
}

/// Running mean of the house load, reset when taken.
#[derive(Debug, Default)]
struct LoadAverage {
    sum: f64,
    count: u32,
}

pub struct DecisionEngine {
    dc_powers: RingBuffer,
    feed_ins: RingBuffer,
    load: LoadAverage,
    pub log: RateLog,
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self {
            dc_powers: RingBuffer::new(10),
            feed_ins: RingBuffer::new(60),
            load: LoadAverage::default(),
            log: RateLog::default(),
        }
    }
}

impl DecisionEngine {
    pub fn record_dc_power(&mut self, watt: f64) {
        self.dc_powers.push(watt);
    }

    pub fn record_feed_in(&mut self, watt: f64) {
        self.feed_ins.push(watt);
    }

    pub fn record_house_load(&mut self, watt: f64) {
        self.load.sum += watt;
        self.load.count += 1;
    }

    pub fn max_dc_power(&self) -> f64 {
        self.dc_powers.max()
    }

    pub fn max_feed_in(&self) -> f64 {
        self.feed_ins.max()
    }

    /// Mean house load since the last call.
    pub fn take_baseline(&mut self) -> Option<f64> {
        let load = std::mem::take(&mut self.load);

        (load.count > 0).then(|| (load.sum / load.count as f64).round())
    }

    /// Process-level overrides first, then the rate cascade. `None` while a
    /// grid charge owns the battery.
    pub fn decide(&self, inputs: &TickInputs, config: &ChargeConfig) -> Option<Decision> {
        let status = inputs.status;
        let soc = inputs.soc_pct;

        if status.grid_charge_active {
            return None;
        }

        if let Some(ev) = inputs.ev.filter(|ev| ev.needs_pv()) {
            return Some(Decision {
                mode: ControllerMode::Hold,
                reason: Reason::Hold,
                rationale: format!(
                    "Car charging ({:.0}% of {:.0}%). Hold battery.",
                    ev.soc_pct.unwrap_or_default(),
                    ev.target_soc_pct.unwrap_or(100.0)
                ),
            });
        }
        if status.prevent_unload {
            return Some(Decision {
                mode: ControllerMode::Hold,
                reason: Reason::Hold,
                rationale: "Prevent unload. Hold battery.".to_owned(),
            });
        }

        if soc < config.low_soc_pct {
            return Some(Decision::charge(
                100.0,
                Reason::LowSoc,
                format!("State of charge {soc}% below {}%. Charge max.", config.low_soc_pct),
            ));
        }

        if status.charge_max {
            return Some(Decision::charge(100.0, Reason::ChargeMax, "Charge max today.".to_owned()));
        }

        if let Some(charge_to) = status.charge_to.filter(|to| *to > soc) {
            return Some(Decision::charge(
                100.0,
                Reason::ChargeTo,
                format!("Charge to {charge_to}% today."),
            ));
        }

        if let (Some(price), Some(paid)) = (inputs.current_price_cent, status.battery_price_cent_at_last_charge) {
            if price < paid {
                return Some(Decision::charge(
                    100.0,
                    Reason::CheaperThanLastCharge,
                    format!("Grid price {price:.2}ct below last charge at {paid:.2}ct. Charge max."),
                ));
            }
        }

        let charge = target_charge(
            &RateInputs {
                now: inputs.now,
                soc_pct: soc,
                capacity_wh: status.capacity_wh,
                forecast: inputs.forecast,
                max_dc_power_w: self.max_dc_power(),
                max_feed_in_w: self.max_feed_in(),
                house_load_w: inputs.house_load_w,
                after_peak_sun: inputs.after_peak_sun,
                charge_to_active: status.has_charge_override(),
            },
            config,
        );

        Some(Decision::charge(charge.pct(), Reason::Cascade(charge.rule), charge.rationale))
    }
}

/// One-day overrides expire at midnight.
pub fn midnight_reset(status: &mut BatteryStatus) {
    status.charge_max = false;
    status.charge_to = None;
}
