use super::{
    forecast::HourlyForecast,
    prices::{cheapest_window, tomorrow_available, PricePoint},
};
use crate::config::GridChargeConfig;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// A scheduled night charge from the grid. Persisted with the status so an
/// active charge survives a restart.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GridChargePlan {
    pub date: NaiveDate,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub target_soc_pct: f64,
    pub rate_pct: f64,
    /// Average price of the window. Unknown for a manual charge started
    /// without a price curve.
    pub average_cent: Option<f64>,
    pub need_wh: f64,
}

impl GridChargePlan {
    /// A charge started by command: runs from now to full, or until
    /// `manual_hours` have passed.
    pub fn manual(
        now: NaiveDateTime,
        rate_pct: f64,
        soc_pct: Option<f64>,
        capacity_wh: Option<f64>,
        price_cent: Option<f64>,
        config: &GridChargeConfig,
    ) -> Self {
        let need_wh = match (soc_pct, capacity_wh) {
            (Some(soc), Some(capacity)) => (capacity * (100.0 - soc) / 100.0).max(0.0).round(),
            _ => 0.0,
        };

        Self {
            date: now.date(),
            start_time: now,
            end_time: now + Duration::hours(config.manual_hours),
            target_soc_pct: 100.0,
            rate_pct,
            average_cent: price_cent,
            need_wh,
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum PlanOutcome {
    /// Not enough information yet, try again on the next check.
    Defer(&'static str),
    /// The battery gets through the night. `reference_cent` is the cheapest
    /// night hour, what charging would have cost.
    NoCharge { reference_cent: Option<f64> },
    Charge(GridChargePlan),
}

pub struct PlanInputs<'a> {
    pub now: NaiveDateTime,
    pub soc_pct: Option<f64>,
    pub capacity_wh: Option<f64>,
    /// Average household consumption without meal spikes.
    pub baseline_w: f64,
    pub forecasts: &'a [HourlyForecast],
    pub prices: &'a [PricePoint],
    pub sunrise: NaiveTime,
}

fn hour_start(time: NaiveDateTime) -> NaiveDateTime {
    time.date().and_hms_opt(time.hour(), 0, 0).unwrap_or(time)
}

/// Walks the energy content of the battery hour by hour from the current hour
/// until tomorrow noon and returns the lowest level it reaches.
pub fn lowest_energy(
    now: NaiveDateTime,
    energy_wh: f64,
    capacity_wh: f64,
    baseline_w: f64,
    forecasts: &[HourlyForecast],
    config: &GridChargeConfig,
) -> f64 {
    let until = (now.date() + Duration::days(1)).and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default());

    let mut energy = energy_wh;
    let mut lowest = energy;
    let mut hour = hour_start(now);

    while hour < until {
        let production = forecasts
            .iter()
            .find(|f| f.start_time == hour)
            .map_or(0.0, |f| f.estimate_wh);

        let mut demand = baseline_w;
        if config.meal_hours.contains(&hour.hour()) {
            demand += config.meal_spike_w;
        }

        energy = (energy + production - demand).min(capacity_wh);
        lowest = lowest.min(energy);

        hour += Duration::hours(1);
    }

    lowest
}

/// Plans tonight's grid charge. Runs from the schedule check, at most once a day.
pub fn plan(inputs: &PlanInputs, config: &GridChargeConfig) -> PlanOutcome {
    let now = inputs.now;

    let Some(capacity_wh) = inputs.capacity_wh.filter(|c| *c > 0.0) else {
        return PlanOutcome::Defer("battery capacity unknown");
    };
    let Some(soc_pct) = inputs.soc_pct else {
        return PlanOutcome::Defer("state of charge unknown");
    };
    if !tomorrow_available(inputs.prices, now) {
        return PlanOutcome::Defer("prices for tomorrow not available yet");
    }
    if inputs.forecasts.is_empty() {
        return PlanOutcome::Defer("no forecast yet");
    }

    let sunrise = (now.date() + Duration::days(1)).and_time(inputs.sunrise);
    let energy_wh = capacity_wh * soc_pct / 100.0;
    let reserve_wh = capacity_wh * config.reserve_pct / 100.0;

    let lowest = lowest_energy(now, energy_wh, capacity_wh, inputs.baseline_w, inputs.forecasts, config);
    let need_wh = (reserve_wh - lowest).min(capacity_wh - energy_wh).round();

    if need_wh <= 0.0 {
        let reference_cent = cheapest_window(inputs.prices, now, sunrise, 1).map(|w| w.average_cent);

        return PlanOutcome::NoCharge { reference_cent };
    }

    let max_wh_per_hour = capacity_wh * config.max_rate_pct / 100.0;
    let hours = (need_wh / max_wh_per_hour).ceil().max(1.0);

    let Some(window) = cheapest_window(inputs.prices, now, sunrise, hours as usize) else {
        return PlanOutcome::Defer("no price window before sunrise");
    };

    PlanOutcome::Charge(GridChargePlan {
        date: now.date(),
        start_time: window.start_time,
        end_time: window.end_time,
        target_soc_pct: (soc_pct + need_wh / capacity_wh * 100.0).min(100.0),
        rate_pct: need_wh / hours / capacity_wh * 100.0,
        average_cent: Some(window.average_cent),
        need_wh,
    })
}

/// What the 1-minute poll should do with a plan.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Progress {
    Waiting,
    Start,
    Continue,
    Done,
    /// The window passed without the charge ever starting.
    Missed,
}

pub fn progress(plan: &GridChargePlan, now: NaiveDateTime, soc_pct: Option<f64>, active: bool) -> Progress {
    let reached = soc_pct.map_or(false, |soc| soc >= plan.target_soc_pct);

    if active {
        if reached || now >= plan.end_time {
            Progress::Done
        } else {
            Progress::Continue
        }
    } else if now < plan.start_time {
        Progress::Waiting
    } else if now >= plan.end_time {
        Progress::Missed
    } else if reached {
        Progress::Done
    } else {
        Progress::Start
    }
}
