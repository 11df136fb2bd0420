use super::forecast::ForecastAnalysis;
use crate::config::ChargeConfig;
use chrono::{Datelike, NaiveDateTime, Weekday};

/// Which step of the cascade produced a decision.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Rule {
    InsufficientData,
    SeasonalCap,
    TopOff,
    AboveLimit,
    NearLimit,
    WaitForLimit,
    SufficientForecast,
    LowForecast,
}

/// Everything the cascade looks at, captured at one instant.
#[derive(Debug, Clone)]
pub struct RateInputs<'a> {
    pub now: NaiveDateTime,
    pub soc_pct: f64,
    pub capacity_wh: Option<f64>,
    pub forecast: Option<&'a ForecastAnalysis>,
    /// Highest PV power over the last ticks.
    pub max_dc_power_w: f64,
    /// Highest grid feed-in over the last meter readings.
    pub max_feed_in_w: f64,
    pub house_load_w: f64,
    pub after_peak_sun: bool,
    pub charge_to_active: bool,
}

#[derive(Debug, PartialEq, Clone)]
pub struct ChargeDecision {
    /// Charge rate as a fraction of capacity per hour (C), within 0..=1.
    pub rate: f64,
    pub rule: Rule,
    pub rationale: String,
}

impl ChargeDecision {
    fn new(rate: f64, rule: Rule, rationale: String) -> Self {
        Self {
            rate: rate.clamp(0.0, 1.0),
            rule,
            rationale,
        }
    }

    pub fn pct(&self) -> f64 {
        self.rate * 100.0
    }
}

fn watt_to_rate(capacity_wh: f64, watt: f64) -> f64 {
    if capacity_wh <= 0.0 {
        return 0.0;
    }

    (watt / capacity_wh).clamp(0.0, 1.0)
}

/// Wh per hour when spreading `wh` over `hours`; no hours means all at once.
fn per_hour(wh: f64, hours: f64) -> f64 {
    wh / hours.max(1.0)
}

fn is_weekend(now: NaiveDateTime) -> bool {
    matches!(now.weekday(), Weekday::Sat | Weekday::Sun)
}

/// The priority ordered charge-rate cascade. The first matching rule wins.
pub fn target_charge(inputs: &RateInputs, config: &ChargeConfig) -> ChargeDecision {
    let capacity_wh = match inputs.capacity_wh {
        Some(capacity_wh) if capacity_wh > 0.0 => capacity_wh,
        _ => return ChargeDecision::new(0.0, Rule::InsufficientData, "Battery capacity unknown.".to_owned()),
    };
    let Some(forecast) = inputs.forecast else {
        return ChargeDecision::new(0.0, Rule::InsufficientData, "No forecast yet.".to_owned());
    };

    let soc = inputs.soc_pct;
    let to_charge_wh = (capacity_wh * (100.0 - soc) / 100.0).round();
    let rate = |watt: f64| watt_to_rate(capacity_wh, watt);
    let floor_w = capacity_wh * config.floor_rate;

    if !is_weekend(inputs.now) && !inputs.charge_to_active {
        let month = inputs.now.month();

        for season in &config.seasons {
            if (season.first_month..=season.last_month).contains(&month)
                && soc > season.goal_pct
                && forecast.tomorrow_forecast_wh > config.abundant_factor * capacity_wh
                && forecast.overnight_demand_wh < capacity_wh * season.goal_pct / 100.0
            {
                return ChargeDecision::new(
                    0.0,
                    Rule::SeasonalCap,
                    format!("{}, limit to {}%.", season.name, season.goal_pct),
                );
            }
        }
    }

    if to_charge_wh < capacity_wh * config.top_off_pct / 100.0 {
        let watt = (capacity_wh * config.top_off_rate).min(to_charge_wh);

        return ChargeDecision::new(
            rate(watt),
            Rule::TopOff,
            format!("Charge the last few Wh with {watt:.0}W ({to_charge_wh:.0}Wh to charge)."),
        );
    }

    let max_dc = inputs.max_dc_power_w;

    if max_dc > config.dc_limit_w {
        let overshoot_w = max_dc + 10.0 - inputs.house_load_w.max(0.0) - config.dc_limit_w;
        // never less than what brings the feed-in back under the limit
        let base_w = floor_w.max(overshoot_w);
        let high_hours = forecast.high_production_hours;
        let limit_hours = forecast.limit_production_hours;

        if limit_hours > 0.0 {
            return ChargeDecision::new(
                rate(base_w),
                Rule::AboveLimit,
                format!("PV ({max_dc:.0}W) over the limit and very good forecast. Charge what's over the limit."),
            );
        }

        if high_hours > 4.0 {
            let watt = per_hour(to_charge_wh, high_hours)
                .min(per_hour(to_charge_wh, limit_hours))
                .max(base_w);

            return ChargeDecision::new(
                rate(watt),
                Rule::AboveLimit,
                format!("PV ({max_dc:.0}W) over the limit and good forecast. Spread over the high production hours."),
            );
        }

        if forecast.total_forecast_wh > 3.0 * to_charge_wh {
            let (base_w, when) = if inputs.after_peak_sun {
                (base_w.max(capacity_wh * config.after_peak_rate), "After")
            } else {
                (base_w, "Before")
            };

            return ChargeDecision::new(
                rate(base_w.max(per_hour(to_charge_wh, high_hours))),
                Rule::AboveLimit,
                format!("PV ({max_dc:.0}W) over the limit and sufficient for today. {when} max sun."),
            );
        }

        return ChargeDecision::new(
            1.0,
            Rule::AboveLimit,
            format!("PV ({max_dc:.0}W) over the limit but low forecast. Charge max."),
        );
    }

    if inputs.max_feed_in_w > config.dc_limit_w - config.feed_in_margin_w {
        return ChargeDecision::new(
            rate(floor_w),
            Rule::NearLimit,
            format!(
                "Feed-in ({:.0}W) close to the limit. Charge {floor_w:.0}W.",
                inputs.max_feed_in_w
            ),
        );
    }

    if forecast.limit_production_wh > 0.0 {
        let note = if forecast.total_forecast_wh - forecast.limit_production_wh > 2.0 * to_charge_wh {
            Some("Limit expected for later and enough PV after the limit.")
        } else if forecast.limit_production_hours > 2.0 {
            Some("Long limit expected.")
        } else if forecast.high_production_hours > 4.0 {
            Some("Short limit expected and max sun.")
        } else {
            None
        };

        if let Some(note) = note {
            return ChargeDecision::new(0.0, Rule::WaitForLimit, format!("{note} Wait to reach limit."));
        }
    }

    if forecast.high_production_wh > 0.0
        && forecast.high_production_hours > to_charge_wh / config.typical_charge_w
    {
        let per_hour_w = per_hour(to_charge_wh, forecast.high_production_hours);

        return if inputs.after_peak_sun {
            ChargeDecision::new(
                rate((capacity_wh * config.after_peak_rate).max(2.0 * per_hour_w)),
                Rule::SufficientForecast,
                "High PV for enough hours to charge. After max sun.".to_owned(),
            )
        } else {
            ChargeDecision::new(
                rate(floor_w.max(per_hour_w)),
                Rule::SufficientForecast,
                "High PV for enough hours to charge. Before max sun.".to_owned(),
            )
        };
    }

    if forecast.total_forecast_wh > 3.0 * to_charge_wh {
        return ChargeDecision::new(
            config.moderate_rate,
            Rule::SufficientForecast,
            "Sufficient for today, but won't reach the limit level.".to_owned(),
        );
    }

    ChargeDecision::new(1.0, Rule::LowForecast, "Pretty low forecast for today. Charge max.".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(hour, 0, 0).unwrap()
    }

    fn sunny_tomorrow() -> ForecastAnalysis {
        ForecastAnalysis {
            total_forecast_wh: 20_000.0,
            tomorrow_forecast_wh: 35_000.0,
            overnight_demand_wh: 4_000.0,
            ..Default::default()
        }
    }

    fn inputs(now: NaiveDateTime, soc_pct: f64, forecast: &ForecastAnalysis) -> RateInputs<'_> {
        RateInputs {
            now,
            soc_pct,
            capacity_wh: Some(10_000.0),
            forecast: Some(forecast),
            max_dc_power_w: 0.0,
            max_feed_in_w: 0.0,
            house_load_w: 0.0,
            after_peak_sun: false,
            charge_to_active: false,
        }
    }

    #[test]
    fn missing_data_means_no_charge() {
        let config = ChargeConfig::default();
        let forecast = sunny_tomorrow();
        let wednesday = at(2024, 5, 15, 10);

        let mut no_capacity = inputs(wednesday, 50.0, &forecast);
        no_capacity.capacity_wh = None;
        let decision = target_charge(&no_capacity, &config);
        assert_eq!((decision.rate, decision.rule), (0.0, Rule::InsufficientData));

        let mut no_forecast = inputs(wednesday, 50.0, &forecast);
        no_forecast.forecast = None;
        assert_eq!(target_charge(&no_forecast, &config).rule, Rule::InsufficientData);
    }

    #[test]
    fn summer_cap_on_a_wednesday_in_may() {
        let config = ChargeConfig::default();
        let forecast = sunny_tomorrow();

        let decision = target_charge(&inputs(at(2024, 5, 15, 10), 85.0, &forecast), &config);

        assert_eq!(decision.rule, Rule::SeasonalCap);
        assert_eq!(decision.pct(), 0.0);
        assert_eq!(decision.rationale, "May to August, limit to 80%.");
    }

    #[test]
    fn seasonal_cap_yields_to_overrides_and_dull_tomorrows() {
        let config = ChargeConfig::default();
        let wednesday = at(2024, 5, 15, 10);

        let forecast = sunny_tomorrow();
        let mut charge_to = inputs(wednesday, 85.0, &forecast);
        charge_to.charge_to_active = true;
        assert_ne!(target_charge(&charge_to, &config).rule, Rule::SeasonalCap);

        let dull = ForecastAnalysis {
            tomorrow_forecast_wh: 25_000.0,
            ..sunny_tomorrow()
        };
        assert_ne!(target_charge(&inputs(wednesday, 85.0, &dull), &config).rule, Rule::SeasonalCap);

        let hungry_night = ForecastAnalysis {
            overnight_demand_wh: 8_500.0,
            ..sunny_tomorrow()
        };
        assert_ne!(
            target_charge(&inputs(wednesday, 85.0, &hungry_night), &config).rule,
            Rule::SeasonalCap
        );
    }

    #[test]
    fn seasonal_cap_never_on_weekends() {
        let config = ChargeConfig::default();
        let forecast = ForecastAnalysis {
            tomorrow_forecast_wh: 100_000.0,
            overnight_demand_wh: 0.0,
            ..sunny_tomorrow()
        };

        // 2024-05-18/19 and 2024-09-07/08 are weekends
        for now in [at(2024, 5, 18, 9), at(2024, 5, 19, 15), at(2024, 9, 7, 11), at(2024, 9, 8, 20)] {
            for soc in [81.0, 90.0, 96.0, 99.0] {
                let decision = target_charge(&inputs(now, soc, &forecast), &config);
                assert_ne!(decision.rule, Rule::SeasonalCap, "{now} {soc}%");
            }
        }

        // same data on the Friday before does cap
        let friday = target_charge(&inputs(at(2024, 5, 17, 9), 90.0, &forecast), &config);
        assert_eq!(friday.rule, Rule::SeasonalCap);
    }

    #[test]
    fn near_full_trickles() {
        let config = ChargeConfig::default();
        let forecast = sunny_tomorrow();

        // Saturday, so the seasonal cap is out of the way
        let decision = target_charge(&inputs(at(2024, 5, 18, 10), 96.0, &forecast), &config);

        assert_eq!(decision.rule, Rule::TopOff);
        // min(10 kWh * 0.05, 400 Wh still to charge) = 400 W
        assert!((decision.rate - 0.04).abs() < 1e-12);
    }

    #[test]
    fn near_full_wins_over_above_limit() {
        let config = ChargeConfig::default();
        let forecast = ForecastAnalysis {
            limit_production_hours: 3.0,
            limit_production_wh: 20_000.0,
            ..sunny_tomorrow()
        };

        let mut both = inputs(at(2024, 11, 6, 12), 97.0, &forecast);
        both.max_dc_power_w = 8000.0;

        assert_eq!(target_charge(&both, &config).rule, Rule::TopOff);

        both.soc_pct = 60.0;
        assert_eq!(target_charge(&both, &config).rule, Rule::AboveLimit);
    }

    #[test]
    fn above_limit_charges_the_overshoot() {
        let config = ChargeConfig::default();
        let forecast = ForecastAnalysis {
            limit_production_hours: 2.0,
            limit_production_wh: 13_000.0,
            ..sunny_tomorrow()
        };
        let mut above = inputs(at(2024, 11, 6, 12), 50.0, &forecast);
        above.house_load_w = 500.0;

        above.max_dc_power_w = 7000.0;
        // overshoot 760 W is below the 0.1 C floor
        assert!((target_charge(&above, &config).rate - 0.1).abs() < 1e-12);

        above.max_dc_power_w = 8000.0;
        // 8000 + 10 - 500 - 5750
        assert!((target_charge(&above, &config).rate - 0.176).abs() < 1e-12);
    }

    #[test]
    fn above_limit_without_limit_hours() {
        let config = ChargeConfig::default();
        let six_hours = ForecastAnalysis {
            high_production_hours: 6.0,
            high_production_wh: 24_000.0,
            ..sunny_tomorrow()
        };
        let mut above = inputs(at(2024, 11, 6, 11), 40.0, &six_hours);
        above.max_dc_power_w = 6000.0;

        // 6000 Wh to charge over 6 high hours = 1000 W, the overshoot is only 260 W
        let decision = target_charge(&above, &config);
        assert_eq!(decision.rule, Rule::AboveLimit);
        assert!((decision.rate - 0.1).abs() < 1e-12);

        let two_hours = ForecastAnalysis {
            high_production_hours: 2.0,
            ..six_hours.clone()
        };
        above.forecast = Some(&two_hours);
        above.after_peak_sun = true;
        // max(0.2 C, 6000 / 2 h) = 3000 W
        assert!((target_charge(&above, &config).rate - 0.3).abs() < 1e-12);

        let dull = ForecastAnalysis {
            total_forecast_wh: 10_000.0,
            ..two_hours.clone()
        };
        above.forecast = Some(&dull);
        assert_eq!(target_charge(&above, &config).rate, 1.0);
    }

    #[test]
    fn above_limit_always_charges_at_least_the_overshoot() {
        let config = ChargeConfig::default();
        let short_high = ForecastAnalysis {
            high_production_hours: 3.0,
            high_production_wh: 15_000.0,
            total_forecast_wh: 30_000.0,
            ..sunny_tomorrow()
        };
        let mut above = inputs(at(2024, 11, 6, 11), 50.0, &short_high);
        above.max_dc_power_w = 9000.0;

        // 9000 + 10 - 5750 = 3260 W over the limit, spreading would only be 1667 W
        let decision = target_charge(&above, &config);
        assert_eq!(decision.rule, Rule::AboveLimit);
        assert!((decision.rate - 0.326).abs() < 1e-12);

        above.after_peak_sun = true;
        assert!((target_charge(&above, &config).rate - 0.326).abs() < 1e-12);

        let long_high = ForecastAnalysis {
            high_production_hours: 6.0,
            ..short_high.clone()
        };
        above.forecast = Some(&long_high);
        assert!((target_charge(&above, &config).rate - 0.326).abs() < 1e-12);
    }

    #[test]
    fn feed_in_close_to_the_limit() {
        let config = ChargeConfig::default();
        let forecast = sunny_tomorrow();
        let mut near = inputs(at(2024, 11, 6, 12), 50.0, &forecast);
        near.max_feed_in_w = 5300.0;

        let decision = target_charge(&near, &config);
        assert_eq!(decision.rule, Rule::NearLimit);
        assert!((decision.rate - 0.1).abs() < 1e-12);
    }

    #[test]
    fn waits_for_an_expected_limit() {
        let config = ChargeConfig::default();
        let forecast = ForecastAnalysis {
            total_forecast_wh: 30_000.0,
            limit_production_wh: 6_000.0,
            limit_production_hours: 1.0,
            ..sunny_tomorrow()
        };

        let decision = target_charge(&inputs(at(2024, 11, 6, 9), 50.0, &forecast), &config);
        assert_eq!(decision.rule, Rule::WaitForLimit);
        assert_eq!(decision.rate, 0.0);
    }

    #[test]
    fn forecast_driven_rates() {
        let config = ChargeConfig::default();
        let now = at(2024, 11, 6, 9);

        let high = ForecastAnalysis {
            total_forecast_wh: 14_000.0,
            high_production_wh: 12_000.0,
            high_production_hours: 4.0,
            ..sunny_tomorrow()
        };
        // 5000 Wh to charge needs 2.5 hours, 4 are forecast: 1250 W
        let decision = target_charge(&inputs(now, 50.0, &high), &config);
        assert_eq!(decision.rule, Rule::SufficientForecast);
        assert!((decision.rate - 0.125).abs() < 1e-12);

        let mut after_peak = inputs(now, 50.0, &high);
        after_peak.after_peak_sun = true;
        assert!((target_charge(&after_peak, &config).rate - 0.25).abs() < 1e-12);

        let moderate = ForecastAnalysis {
            total_forecast_wh: 16_000.0,
            ..sunny_tomorrow()
        };
        let decision = target_charge(&inputs(now, 50.0, &moderate), &config);
        assert_eq!((decision.rule, decision.rate), (Rule::SufficientForecast, 0.4));

        let poor = ForecastAnalysis {
            total_forecast_wh: 4_000.0,
            ..sunny_tomorrow()
        };
        let decision = target_charge(&inputs(now, 50.0, &poor), &config);
        assert_eq!((decision.rule, decision.pct()), (Rule::LowForecast, 100.0));
    }

    #[test]
    fn decisions_are_deterministic() {
        let config = ChargeConfig::default();
        let forecast = sunny_tomorrow();
        let input = inputs(at(2024, 7, 3, 14), 70.0, &forecast);

        assert_eq!(target_charge(&input, &config), target_charge(&input, &config));
    }
}
