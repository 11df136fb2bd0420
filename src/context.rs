use crate::{
    battery::{
        controller::{self, ControllerMode, RevertTimes},
        engine::{midnight_reset, DecisionEngine, DecisionError, EvStatus, TickInputs},
        forecast::{self, ForecastAnalysis, HourlyForecast},
        grid_charge::{self, GridChargePlan, PlanInputs, PlanOutcome, Progress},
        prices::{current_price, PricePoint},
        status::{BatteryStatus, StatusError, StatusStore},
    },
    config::Config,
    logging,
    mqtt::{Command, Inbound, SensorState},
    notify::{Notification, Notifier},
    sunspec::{
        fronius::{FroniusDevices, Measurements},
        transport::{ModbusTcp, Transport},
        SunspecError,
    },
};
use anyhow::Context as _;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;

const HANDLE_RATE: &str = "handleRate";
const TELEMETRY: &str = "froniusInterval";
const GRID_CHARGE: &str = "gridCharge";

/// Something the dispatcher has to publish.
#[derive(Debug, PartialEq)]
pub enum Outbound {
    Sensor(SensorState),
    Status(BatteryStatus),
    Notification(Notification),
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// All process state. Owned by the dispatcher loop, so every status change
/// happens on one logical thread. The devices are shared with the telemetry
/// poller and their lock is held for a whole register sequence.
pub struct Context<T: Transport = ModbusTcp> {
    config: Config,
    devices: Arc<Mutex<FroniusDevices<T>>>,
    status: StatusStore,
    engine: DecisionEngine,
    notifier: Notifier,
    forecasts: Vec<HourlyForecast>,
    prices: Vec<PricePoint>,
    peak_sun: Option<NaiveDateTime>,
    sunrise: Option<NaiveDateTime>,
    ev: Option<EvStatus>,
    house_load_w: f64,
    heater_w: f64,
    today: NaiveDate,
    outbox: Vec<Outbound>,
}

impl<T: Transport> Context<T> {
    pub fn new(
        config: Config,
        devices: Arc<Mutex<FroniusDevices<T>>>,
        status: StatusStore,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            notifier: Notifier::new(config.notify.after_failures),
            config,
            devices,
            status,
            engine: DecisionEngine::default(),
            forecasts: Vec::new(),
            prices: Vec::new(),
            peak_sun: None,
            sunrise: None,
            ev: None,
            house_load_w: 0.0,
            heater_w: 0.0,
            today: now.date(),
            outbox: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn status(&self) -> &BatteryStatus {
        self.status.get()
    }

    pub fn take_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    fn revert_times(&self) -> RevertTimes {
        RevertTimes {
            default_secs: self.config.controller.default_revert_secs,
            managed_secs: self.config.controller.managed_revert_secs,
        }
    }

    fn peak_sun(&self, now: NaiveDateTime) -> NaiveTime {
        self.peak_sun
            .filter(|peak| peak.date() == now.date())
            .map_or(self.config.charge.default_peak_sun, |peak| peak.time())
    }

    fn sunrise(&self) -> NaiveTime {
        self.sunrise
            .map_or(self.config.grid_charge.default_sunrise, |sunrise| sunrise.time())
    }

    fn notify_failure(&mut self, source: &'static str, message: impl std::fmt::Display) {
        if let Some(notification) = self.notifier.failure(source, message) {
            self.outbox.push(Outbound::Notification(notification));
        }
    }

    async fn update_status<F>(&mut self, f: F) -> Result<(), StatusError>
    where
        F: FnOnce(&mut BatteryStatus),
    {
        let status = self.status.update(f).await?.clone();
        self.outbox.push(Outbound::Status(status));

        Ok(())
    }

    async fn apply_mode(&mut self, mode: ControllerMode) -> Result<(), DecisionError> {
        let revert = self.revert_times();
        let devices = self.devices.clone();
        let mut devices = devices.lock().await;

        controller::apply(&mut devices.inverter, mode, revert).await?;

        Ok(())
    }

    async fn drop_connection(&self) {
        self.devices.lock().await.close();
    }

    /// Opens the devices, logs who we talk to and reads the battery capacity.
    pub async fn startup(&mut self) -> anyhow::Result<()> {
        let devices = self.devices.clone();
        let mut devices = devices.lock().await;

        devices.validate().context("Invalid register map")?;
        devices.open().await.context("Failed to open Fronius devices")?;

        let identity = devices.identity().await.context("Failed to read inverter identity")?;
        info!(
            "Connected to {} {} (version {}, serial {})",
            identity.manufacturer, identity.model, identity.version, identity.serial_number
        );

        let capacity = devices.capacity().await;
        drop(devices);

        match capacity {
            Ok(capacity) => {
                info!("Battery capacity {capacity}Wh");
                self.update_status(|s| s.capacity_wh = Some(capacity)).await?;
            },
            Err(e) => {
                error!("Failed to read battery capacity: {e}");
                self.outbox.push(Outbound::Notification(Notification {
                    title: "Fronius Solar Batterie Fehler".to_owned(),
                    message: e.to_string(),
                }));
            },
        }

        self.release_stale_grid_charge()
            .await
            .context("Failed to stop a grid charge left over from before")?;

        Ok(())
    }

    /// One-day overrides end when the date changes; the day's mean house load
    /// becomes tomorrow's baseline.
    pub async fn roll_over_day(&mut self, now: NaiveDateTime) {
        if now.date() <= self.today {
            return;
        }
        self.today = now.date();

        let baseline = self.engine.take_baseline();

        let updated = self
            .update_status(|s| {
                if s.charge_max {
                    info!("Reset charge maximum.");
                }
                if s.charge_to.is_some() {
                    info!("Reset charge exception. Normal charge today.");
                }
                midnight_reset(s);
                if baseline.is_some() {
                    s.charge_baseline_w = baseline;
                }
            })
            .await;

        if let Err(e) = updated {
            error!("Failed to reset charge overrides: {e}");
        }
    }

    async fn handle_rate(&mut self, now: NaiveDateTime, forced: bool) -> Result<(), DecisionError> {
        let revert = self.revert_times();
        let devices = self.devices.clone();
        let mut devices = devices.lock().await;

        if self.status.get().capacity_wh.is_none() {
            let capacity = devices.capacity().await?;
            info!("Battery capacity {capacity}Wh");
            self.update_status(|s| s.capacity_wh = Some(capacity)).await?;
        }

        let (soc, dc_power) = devices.charge_state().await?;
        if !(0.0..=100.0).contains(&soc) {
            return Err(DecisionError::InsufficientData("state of charge out of range"));
        }
        let soc = round1(soc);
        self.engine.record_dc_power(dc_power.round());

        let peak_sun = self.peak_sun(now);
        let analysis = (!self.forecasts.is_empty())
            .then(|| ForecastAnalysis::analyze(&self.forecasts, now, peak_sun, &self.config.charge));
        let status = self.status.get().clone();

        let decision = self.engine.decide(
            &TickInputs {
                now,
                soc_pct: soc,
                status: &status,
                forecast: analysis.as_ref(),
                current_price_cent: current_price(&self.prices, now).map(|p| p.cents_per_kwh),
                ev: self.ev.as_ref(),
                house_load_w: self.house_load_w + self.heater_w,
                after_peak_sun: now.time() > peak_sun,
            },
            &self.config.charge,
        );

        let Some(decision) = decision else {
            debug!("Grid charge active, charge rate left alone");
            return Ok(());
        };

        controller::apply(&mut devices.inverter, decision.mode, revert).await?;
        drop(devices);

        let refresh = Duration::minutes(self.config.charge.log_refresh_minutes);

        if self.engine.log.should_log(now, &decision, forced, refresh) {
            info!("{} ({}): {}", decision.mode, decision.reason, decision.rationale);
            debug!(
                "SoC {soc}%, max DC {}W, max feed-in {}W, house {}W, peak sun {peak_sun}, {analysis:?}",
                self.engine.max_dc_power(),
                self.engine.max_feed_in(),
                self.house_load_w + self.heater_w,
            );
        }

        if status.controller_mode != decision.mode || status.charge_state_soc_pct != Some(soc) {
            self.update_status(|s| {
                s.controller_mode = decision.mode;
                s.charge_state_soc_pct = Some(soc);
            })
            .await?;
        }

        Ok(())
    }

    /// The decision tick. Failures are counted; one notification per streak.
    pub async fn tick(&mut self, now: NaiveDateTime, forced: bool) {
        self.roll_over_day(now).await;

        match self.handle_rate(now, forced).await {
            Ok(()) => {
                if self.notifier.success(HANDLE_RATE) {
                    info!("Charge rate handling recovered");
                }
            },
            Err(e) => {
                error!("Failed to handle charge rate: {e}");

                if e.is_connection() {
                    self.drop_connection().await;
                }
                self.notify_failure(HANDLE_RATE, e);
            },
        }
    }

    async fn plan_grid_charge(&mut self, now: NaiveDateTime) -> Result<(), DecisionError> {
        let status = self.status.get();

        if status.last_grid_charge_date == Some(now.date())
            || status.grid_charge_plan.is_some()
            || status.grid_charge_active
        {
            return Ok(());
        }

        let outcome = grid_charge::plan(
            &PlanInputs {
                now,
                soc_pct: status.charge_state_soc_pct,
                capacity_wh: status.capacity_wh,
                baseline_w: status.charge_baseline_w.unwrap_or(self.config.charge.day_demand_w),
                forecasts: &self.forecasts,
                prices: &self.prices,
                sunrise: self.sunrise(),
            },
            &self.config.grid_charge,
        );

        match outcome {
            PlanOutcome::Defer(reason) => debug!("Grid charge planning deferred: {reason}"),
            PlanOutcome::NoCharge { reference_cent } => {
                info!("No grid charge needed tonight, battery is enough");

                self.update_status(|s| {
                    s.last_grid_charge_date = Some(now.date());
                    if reference_cent.is_some() {
                        s.battery_price_cent_at_last_charge = reference_cent;
                    }
                })
                .await?;
            },
            PlanOutcome::Charge(plan) => {
                info!(
                    "Grid charge {}Wh planned {} - {} at {:.1}% ({:.2}ct), target {:.0}%",
                    plan.need_wh,
                    plan.start_time,
                    plan.end_time,
                    plan.rate_pct,
                    plan.average_cent.unwrap_or_default(),
                    plan.target_soc_pct
                );

                self.update_status(|s| {
                    s.last_grid_charge_date = Some(now.date());
                    s.grid_charge_plan = Some(plan);
                })
                .await?;
            },
        }

        Ok(())
    }

    pub async fn check_schedule(&mut self, now: NaiveDateTime) {
        if let Err(e) = self.plan_grid_charge(now).await {
            error!("Failed to plan grid charge: {e}");
        }
    }

    /// A grid charge flagged active without a plan has nothing that refreshes
    /// or ends it. Hand the battery back to the defaults and the decision tick.
    async fn release_stale_grid_charge(&mut self) -> Result<(), DecisionError> {
        let status = self.status.get();
        if !status.grid_charge_active || status.grid_charge_plan.is_some() {
            return Ok(());
        }

        warn!("Grid charge active without a plan, stopping it");

        self.apply_mode(ControllerMode::Default).await?;
        self.update_status(|s| {
            s.grid_charge_active = false;
            s.controller_mode = ControllerMode::Default;
        })
        .await?;

        Ok(())
    }

    async fn follow_grid_charge(&mut self, now: NaiveDateTime) -> Result<(), DecisionError> {
        let status = self.status.get();
        let Some(plan) = status.grid_charge_plan.clone() else {
            return self.release_stale_grid_charge().await;
        };
        let active = status.grid_charge_active;

        match grid_charge::progress(&plan, now, status.charge_state_soc_pct, active) {
            Progress::Waiting => {},
            Progress::Start | Progress::Continue => {
                let mode = ControllerMode::GridCharge(plan.rate_pct);
                self.apply_mode(mode).await?;

                if !active {
                    info!("Grid charge started, {mode} until {}", plan.end_time);

                    self.update_status(|s| {
                        s.grid_charge_active = true;
                        s.controller_mode = mode;
                    })
                    .await?;
                }
            },
            Progress::Done => {
                info!(
                    "Grid charge done at {:?}%, paid {:?}ct",
                    self.status.get().charge_state_soc_pct,
                    plan.average_cent
                );

                self.update_status(|s| {
                    s.grid_charge_active = false;
                    s.grid_charge_plan = None;
                    if plan.average_cent.is_some() {
                        s.battery_price_cent_at_last_charge = plan.average_cent;
                    }
                })
                .await?;

                self.tick(now, true).await;
            },
            Progress::Missed => {
                warn!("Grid charge window {} - {} missed", plan.start_time, plan.end_time);

                self.update_status(|s| s.grid_charge_plan = None).await?;
            },
        }

        Ok(())
    }

    pub async fn poll_grid_charge(&mut self, now: NaiveDateTime) {
        match self.follow_grid_charge(now).await {
            Ok(()) => {
                self.notifier.success(GRID_CHARGE);
            },
            Err(e) => {
                error!("Failed to follow grid charge: {e}");

                if e.is_connection() {
                    self.drop_connection().await;
                }
                self.notify_failure(GRID_CHARGE, e);
            },
        }
    }

    async fn handle_command(&mut self, now: NaiveDateTime, command: Command) -> Result<(), DecisionError> {
        match command {
            Command::ChargeMax(charge_max) => {
                if charge_max {
                    info!("Charge maximum.");
                } else {
                    info!("Charge maximum. Reset.");
                }
                self.update_status(|s| s.charge_max = charge_max).await?;
            },
            Command::ChargeTo(charge_to) => {
                match charge_to {
                    Some(pct) => info!("Charge exception. Charge {pct}% today."),
                    None => info!("Charge exception. Reset to normal charge today."),
                }
                self.update_status(|s| s.charge_to = charge_to).await?;
            },
            Command::PreventUnload(prevent_unload) => {
                info!("Prevent unload: {prevent_unload}");
                self.update_status(|s| s.prevent_unload = prevent_unload).await?;
            },
            Command::GridChargePct(pct) if pct > 0.0 => {
                let mode = ControllerMode::GridCharge(pct);
                let status = self.status.get();
                let plan = GridChargePlan::manual(
                    now,
                    pct,
                    status.charge_state_soc_pct,
                    status.capacity_wh,
                    current_price(&self.prices, now).map(|p| p.cents_per_kwh),
                    &self.config.grid_charge,
                );
                info!("Manual grid charge, {mode} until {}", plan.end_time);

                self.apply_mode(mode).await?;
                self.update_status(|s| {
                    s.grid_charge_active = true;
                    s.grid_charge_plan = Some(plan);
                    s.controller_mode = mode;
                })
                .await?;
            },
            Command::GridChargePct(_) => {
                info!("Grid charge stopped");

                self.update_status(|s| {
                    s.grid_charge_active = false;
                    s.grid_charge_plan = None;
                })
                .await?;
                self.tick(now, true).await;
            },
            Command::ScheduleCheck => self.plan_grid_charge(now).await?,
            Command::LogLevel(level) => logging::set_level(level),
        }

        Ok(())
    }

    /// Applies one validated inbound message.
    pub async fn handle_inbound(&mut self, now: NaiveDateTime, inbound: Inbound) {
        match inbound {
            Inbound::Command(command) => {
                if let Err(e) = self.handle_command(now, command).await {
                    error!("Command failed: {e}");
                }
            },
            Inbound::Forecast(periods) => match forecast::hourly(&periods) {
                Ok(forecasts) => {
                    debug!("Forecast with {} hours", forecasts.len());
                    self.forecasts = forecasts;
                },
                Err(e) => error!("Rejected forecast: {e}"),
            },
            Inbound::Prices(prices) => {
                debug!(
                    "Prices until {:?}",
                    prices.iter().map(PricePoint::end_time).max()
                );
                self.prices = prices;
            },
            Inbound::MaxSun(peak_sun) => self.peak_sun = Some(peak_sun),
            Inbound::SunTimes { sunrise, .. } => self.sunrise = Some(sunrise),
            Inbound::HouseLoad(watt) => {
                self.house_load_w = watt;
                self.engine.record_house_load(watt);
            },
            Inbound::MeterPower(watt) => self.engine.record_feed_in(-watt),
            Inbound::Ev(ev) => self.ev = Some(ev),
            Inbound::Heater(watt) => self.heater_w = watt,
        }
    }

    /// Result of one telemetry poll. Counters are persisted when they moved,
    /// the snapshot is published either way.
    pub async fn handle_telemetry(&mut self, time_ms: i64, measured: Result<Measurements, SunspecError>) {
        let m = match measured {
            Ok(m) => m,
            Err(e) => {
                error!("Failed to read Fronius data: {e}");
                self.notify_failure(TELEMETRY, e);
                return;
            },
        };

        if self.notifier.success(TELEMETRY) {
            info!("Fronius telemetry recovered");
        }

        self.engine.record_feed_in(-m.meter_power);

        let soc = round1(m.state_of_charge);
        let status = self.status.get();
        let changed = status.charge_state_soc_pct != Some(soc)
            || status.solar_wh != Some(m.solar_energy)
            || status.storage_charge_wh != Some(m.storage_charge_energy)
            || status.storage_discharge_wh != Some(m.storage_discharge_energy);

        if changed {
            let updated = self
                .update_status(|s| {
                    s.charge_state_soc_pct = Some(soc);
                    s.solar_wh = Some(m.solar_energy);
                    s.storage_charge_wh = Some(m.storage_charge_energy);
                    s.storage_discharge_wh = Some(m.storage_discharge_energy);
                })
                .await;

            if let Err(e) = updated {
                error!("Failed to persist counters: {e}");
            }
        }

        self.outbox.push(Outbound::Sensor(SensorState::new(time_ms, &m)));
    }

    /// Leaves the battery in a state that does not need this process.
    pub async fn shutdown(&mut self) -> Result<(), DecisionError> {
        if self.status.get().grid_charge_active {
            info!("Stopping grid charge");

            self.apply_mode(ControllerMode::Default).await?;
            self.update_status(|s| {
                s.grid_charge_active = false;
                s.controller_mode = ControllerMode::Default;
            })
            .await?;
        }

        self.drop_connection().await;

        Ok(())
    }
}
