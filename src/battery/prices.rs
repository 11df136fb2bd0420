use chrono::{Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Copy, Clone)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceLevel {
    VeryCheap,
    Cheap,
    Normal,
    Expensive,
    VeryExpensive,
    #[serde(other)]
    Unknown,
}

/// Price of one hour, starting at a local wall clock time.
#[derive(Debug, PartialEq, Copy, Clone)]
pub struct PricePoint {
    pub start_time: NaiveDateTime,
    pub cents_per_kwh: f64,
    pub level: PriceLevel,
}

impl PricePoint {
    pub fn end_time(&self) -> NaiveDateTime {
        self.start_time + Duration::hours(1)
    }
}

#[derive(Debug, PartialEq, Copy, Clone)]
pub struct PriceWindow {
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub average_cent: f64,
}

/// The day-ahead auction publishes tomorrow in the early afternoon. Until then
/// the last known hour is still today.
pub fn tomorrow_available(prices: &[PricePoint], now: NaiveDateTime) -> bool {
    prices
        .iter()
        .map(|p| p.start_time)
        .max()
        .map_or(false, |last| last.date() > now.date())
}

pub fn current_price(prices: &[PricePoint], now: NaiveDateTime) -> Option<&PricePoint> {
    prices.iter().find(|p| p.start_time <= now && now < p.end_time())
}

/// Minimum cost run of `hours` consecutive price hours that lies within
/// `[from, until)`. The hour containing `from` is eligible. Ties go to the
/// earliest window.
pub fn cheapest_window(
    prices: &[PricePoint],
    from: NaiveDateTime,
    until: NaiveDateTime,
    hours: usize,
) -> Option<PriceWindow> {
    if hours == 0 {
        return None;
    }

    let from = from.date().and_hms_opt(from.hour(), 0, 0).unwrap_or(from);

    let mut eligible: Vec<&PricePoint> = prices
        .iter()
        .filter(|p| p.start_time >= from && p.end_time() <= until)
        .collect();
    eligible.sort_by_key(|p| p.start_time);

    let mut best: Option<(f64, &[&PricePoint])> = None;

    for window in eligible.windows(hours) {
        let contiguous = window
            .windows(2)
            .all(|pair| pair[0].end_time() == pair[1].start_time);

        if !contiguous {
            continue;
        }

        let cost: f64 = window.iter().map(|p| p.cents_per_kwh).sum();

        if best.map_or(true, |(best_cost, _)| cost < best_cost) {
            best = Some((cost, window));
        }
    }

    let (cost, window) = best?;
    let first = window.first()?;
    let last = window.last()?;

    Some(PriceWindow {
        start_time: first.start_time,
        end_time: last.end_time(),
        average_cent: cost / hours as f64,
    })
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Hourly points starting at `start`, one per entry of `cents`.
    pub fn prices(start: NaiveDateTime, cents: &[f64]) -> Vec<PricePoint> {
        cents
            .iter()
            .enumerate()
            .map(|(i, &cents_per_kwh)| PricePoint {
                start_time: start + Duration::hours(i as i64),
                cents_per_kwh,
                level: PriceLevel::Normal,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::prices, *};
    use chrono::NaiveDate;

    fn time(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 11, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn tomorrow_detection() {
        let today_only = prices(time(12, 0, 0), &[30.0; 24]);
        assert!(!tomorrow_available(&today_only, time(12, 13, 0)));

        let both = prices(time(12, 0, 0), &[30.0; 48]);
        assert!(tomorrow_available(&both, time(12, 13, 0)));
        assert!(!tomorrow_available(&[], time(12, 13, 0)));
    }

    #[test]
    fn current_price_is_the_running_hour() {
        let curve = prices(time(12, 0, 0), &[30.0, 31.0, 32.0]);

        assert_eq!(current_price(&curve, time(12, 1, 59)).map(|p| p.cents_per_kwh), Some(31.0));
        assert_eq!(current_price(&curve, time(12, 3, 0)), None);
    }

    #[test]
    fn cheapest_window_is_minimal_and_contiguous() {
        // 20:00 .. 07:00
        let curve = prices(
            time(12, 20, 0),
            &[35.0, 33.0, 30.0, 28.0, 25.0, 22.0, 21.0, 26.0, 20.0, 29.0, 31.0],
        );
        let sunrise = time(13, 6, 30);

        let window = cheapest_window(&curve, time(12, 21, 15), sunrise, 2).unwrap();
        assert_eq!(window.start_time, time(13, 1, 0));
        assert_eq!(window.end_time, time(13, 3, 0));
        assert_eq!(window.average_cent, 21.5);

        // 04:00 at 20 ct only fits a single hour window
        let single = cheapest_window(&curve, time(12, 21, 15), sunrise, 1).unwrap();
        assert_eq!(single.start_time, time(13, 4, 0));

        // brute force over every contiguous run
        for hours in 1..=6 {
            let window = cheapest_window(&curve, time(12, 21, 15), sunrise, hours).unwrap();
            let eligible: Vec<_> = curve
                .iter()
                .filter(|p| p.start_time >= time(12, 21, 0) && p.end_time() <= sunrise)
                .collect();
            let min = eligible
                .windows(hours)
                .map(|w| w.iter().map(|p| p.cents_per_kwh).sum::<f64>())
                .fold(f64::INFINITY, f64::min);

            assert!((window.average_cent * hours as f64 - min).abs() < 1e-9, "{hours} hours");
        }
    }

    #[test]
    fn gaps_and_ties() {
        let mut curve = prices(time(12, 22, 0), &[10.0, 10.0, 10.0, 10.0]);
        assert_eq!(
            cheapest_window(&curve, time(12, 22, 0), time(13, 6, 0), 2).map(|w| w.start_time),
            Some(time(12, 22, 0))
        );

        curve.remove(1);
        assert_eq!(
            cheapest_window(&curve, time(12, 22, 0), time(13, 6, 0), 2).map(|w| w.start_time),
            Some(time(13, 0, 0))
        );

        assert_eq!(cheapest_window(&curve, time(12, 22, 0), time(13, 6, 0), 4), None);
    }
}
