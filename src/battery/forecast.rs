use crate::config::ChargeConfig;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ForecastError {
    #[error("invalid estimate {estimate_kw} kW for the period ending {period_end}")]
    InvalidEstimate {
        period_end: NaiveDateTime,
        estimate_kw: f64,
    },
}

/// Forecasted production for one local wall clock hour. Since the hour is
/// one hour long, `estimate_wh` is also the average power in W.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HourlyForecast {
    pub start_time: NaiveDateTime,
    pub estimate_wh: f64,
}

impl HourlyForecast {
    pub fn end_time(&self) -> NaiveDateTime {
        self.start_time + Duration::hours(1)
    }
}

fn hour_start(time: NaiveDateTime) -> NaiveDateTime {
    time.date().and_hms_opt(time.hour(), 0, 0).unwrap_or(time)
}

fn at(date: NaiveDate, hour: u32) -> NaiveDateTime {
    date.and_time(NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or_default())
}

/// Folds 30-minute periods (end time, average kW) into hourly Wh, ordered by hour.
pub fn hourly(periods: &[(NaiveDateTime, f64)]) -> Result<Vec<HourlyForecast>, ForecastError> {
    let mut hours: BTreeMap<NaiveDateTime, f64> = BTreeMap::new();

    for &(period_end, estimate_kw) in periods {
        if !estimate_kw.is_finite() || estimate_kw < 0.0 {
            return Err(ForecastError::InvalidEstimate {
                period_end,
                estimate_kw,
            });
        }

        let start = hour_start(period_end - Duration::minutes(30));
        *hours.entry(start).or_default() += estimate_kw * 1000.0 / 2.0;
    }

    Ok(hours
        .into_iter()
        .map(|(start_time, estimate_wh)| HourlyForecast {
            start_time,
            estimate_wh,
        })
        .collect())
}

/// What the rest of today and tomorrow look like, seen from `now`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ForecastAnalysis {
    pub total_forecast_wh: f64,
    pub high_production_wh: f64,
    pub high_production_hours: f64,
    pub limit_production_wh: f64,
    pub limit_production_hours: f64,
    pub tomorrow_forecast_wh: f64,
    /// Household demand from peak sun until tomorrow noon that the forecast does not cover.
    pub overnight_demand_wh: f64,
    pub high_production_estimates: Vec<f64>,
}

impl ForecastAnalysis {
    pub fn analyze(
        forecasts: &[HourlyForecast],
        now: NaiveDateTime,
        peak_sun: NaiveTime,
        config: &ChargeConfig,
    ) -> Self {
        let today = now.date();
        let tomorrow = today + Duration::days(1);
        let peak_sun = today.and_time(peak_sun);
        let evening = at(today, 22);
        let morning = at(tomorrow, 6);
        let tomorrow_noon = at(tomorrow, 12);

        let mut analysis = ForecastAnalysis::default();

        for forecast in forecasts {
            let end = forecast.end_time();
            let estimate = forecast.estimate_wh;

            if end <= now {
                continue;
            }

            if forecast.start_time.date() == today {
                analysis.total_forecast_wh += estimate;

                if estimate > config.high_production_w {
                    analysis.high_production_wh += estimate;
                    analysis.high_production_hours += 1.0;
                    analysis.high_production_estimates.push(estimate.round());
                }
                if estimate > config.dc_limit_w {
                    analysis.limit_production_wh += estimate;
                    analysis.limit_production_hours += 1.0;
                }
            } else if forecast.start_time.date() == tomorrow {
                analysis.tomorrow_forecast_wh += estimate;
            }

            if end > peak_sun && end <= tomorrow_noon {
                let demand = if end <= evening || end > morning {
                    config.day_demand_w
                } else {
                    config.night_demand_w
                };

                if estimate < demand {
                    analysis.overnight_demand_wh += demand - estimate;
                }
            }
        }

        analysis
    }
}
