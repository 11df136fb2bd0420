pub mod registers;

use super::{
    client::SunspecClient,
    transport::{DeviceConnection, ModbusTcp, Transport},
    Result, SunspecError, Value,
};
use log::info;
use std::collections::HashMap;

pub type Watts = f64;
pub type WattHours = f64;
pub type Percentage = f64;

/// A signed power reading split by direction.
#[derive(Debug, PartialEq, Copy, Clone, Default)]
pub struct PowerFlow {
    pub incoming: Watts,
    pub outgoing: Watts,
}

impl PowerFlow {
    /// Positive values count as incoming.
    pub fn from_signed(value: Watts) -> Self {
        match value {
            v if v > 0.0 => Self {
                incoming: v,
                outgoing: 0.0,
            },
            v if v < 0.0 => Self {
                incoming: 0.0,
                outgoing: -v,
            },
            _ => Self::default(),
        }
    }
}

#[derive(Debug, PartialEq, Copy, Clone)]
pub struct Measurements {
    pub state_of_charge: Percentage,
    pub solar_power: Watts,
    pub battery_charge_power: Watts,
    pub battery_discharge_power: Watts,
    /// Positive while importing from the grid.
    pub meter_power: Watts,
    /// Positive while feeding AC out of the inverter.
    pub inverter_power: Watts,
    pub cabinet_temperature: f64,
    pub solar_energy: WattHours,
    pub storage_charge_energy: WattHours,
    pub storage_discharge_energy: WattHours,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Identity {
    pub manufacturer: String,
    pub model: String,
    pub version: String,
    pub serial_number: String,
}

fn number(values: &HashMap<&'static str, Value>, name: &str) -> Result<f64> {
    values
        .get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| SunspecError::Config(format!("{name} is not numeric")))
}

fn text(values: &HashMap<&'static str, Value>, name: &str) -> String {
    values.get(name).map(ToString::to_string).unwrap_or_default()
}

/// The inverter and its smart meter. Both live behind the same Modbus/TCP
/// endpoint and are opened and closed together.
pub struct FroniusDevices<T: Transport = ModbusTcp> {
    pub inverter: SunspecClient<T>,
    pub meter: SunspecClient<T>,
}

impl<T: Transport> FroniusDevices<T> {
    pub fn new(inverter: DeviceConnection, meter: DeviceConnection) -> Self {
        Self {
            inverter: SunspecClient::new(inverter, registers::INVERTER),
            meter: SunspecClient::new(meter, registers::SMART_METER),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.inverter.validate()?;
        self.meter.validate()
    }

    pub fn is_open(&self) -> bool {
        self.inverter.is_open() && self.meter.is_open()
    }

    pub async fn open(&mut self) -> Result<()> {
        let opened = match self.inverter.open().await {
            Ok(()) => self.meter.open().await,
            Err(e) => Err(e),
        };

        if opened.is_err() {
            self.close();
        }

        opened
    }

    pub fn close(&mut self) {
        self.inverter.close();
        self.meter.close();
        info!("Inverter and SmartMeter closed");
    }

    pub async fn identity(&mut self) -> Result<Identity> {
        let values = self.inverter.read_registers(&["Mn", "Md", "Vr", "SN"]).await?;

        Ok(Identity {
            manufacturer: text(&values, "Mn"),
            model: text(&values, "Md"),
            version: text(&values, "Vr"),
            serial_number: text(&values, "SN"),
        })
    }

    pub async fn capacity(&mut self) -> Result<WattHours> {
        let capacity = self.inverter.read_register("WHRtg").await?;

        capacity
            .as_f64()
            .ok_or_else(|| SunspecError::Config("WHRtg is not numeric".to_owned()))
    }

    /// State of charge and the PV power on the two solar MPPTs, in one read.
    pub async fn charge_state(&mut self) -> Result<(Percentage, Watts)> {
        let values = self.inverter.read_registers(&["ChaState", "1_DCW", "2_DCW"]).await?;

        Ok((
            number(&values, "ChaState")?,
            number(&values, "1_DCW")? + number(&values, "2_DCW")?,
        ))
    }

    pub async fn measure(&mut self) -> Result<Measurements> {
        let meter = self.meter.read_registers(&["W"]).await?;
        let mppt = self
            .inverter
            .read_registers(&[
                "ChaState", "1_DCW", "2_DCW", "3_DCW", "4_DCW", "1_DCWH", "2_DCWH", "3_DCWH", "4_DCWH",
            ])
            .await?;
        let inverter = self.inverter.read_registers(&["W", "TmpCab"]).await?;

        Ok(Measurements {
            state_of_charge: number(&mppt, "ChaState")?,
            solar_power: number(&mppt, "1_DCW")? + number(&mppt, "2_DCW")?,
            battery_charge_power: number(&mppt, "3_DCW")?,
            battery_discharge_power: number(&mppt, "4_DCW")?,
            meter_power: number(&meter, "W")?,
            inverter_power: number(&inverter, "W")?,
            cabinet_temperature: number(&inverter, "TmpCab")?,
            solar_energy: number(&mppt, "1_DCWH")? + number(&mppt, "2_DCWH")?,
            storage_charge_energy: number(&mppt, "3_DCWH")?,
            storage_discharge_energy: number(&mppt, "4_DCWH")?,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn measure_uses_three_batched_reads() {
        let mut devices = testing::devices();

        let m = devices.measure().await.unwrap();

        assert_eq!(m.state_of_charge, 85.0);
        assert_eq!(m.solar_power, 3000.0);
        assert_eq!(m.battery_charge_power, 500.0);
        assert_eq!(m.meter_power, -700.0);
        assert_eq!(m.inverter_power, 1500.0);
        assert_eq!(m.cabinet_temperature, 41.2);
        assert_eq!(m.solar_energy, 75_000.0);
        assert_eq!(m.storage_charge_energy, 40_000.0);
        assert_eq!(m.storage_discharge_energy, 30_000.0);

        assert_eq!(devices.inverter.transport_mut().unwrap().reads.len(), 2);
        assert_eq!(devices.meter.transport_mut().unwrap().reads, vec![(40097, 2)]);
    }

    #[tokio::test]
    async fn capacity_and_identity() {
        let mut devices = testing::devices();

        assert_eq!(devices.capacity().await, Ok(10_000.0));

        let identity = devices.identity().await.unwrap();
        assert_eq!(identity.manufacturer, "Fronius");
        assert_eq!(identity.version, "1.28");
    }

    #[tokio::test]
    async fn charge_state_reads_soc_and_pv() {
        let mut devices = testing::devices();

        assert_eq!(devices.charge_state().await, Ok((85.0, 3000.0)));
    }

    #[test]
    fn power_flow_splits_by_sign() {
        assert_eq!(
            PowerFlow::from_signed(-700.0),
            PowerFlow {
                incoming: 0.0,
                outgoing: 700.0
            }
        );
        assert_eq!(PowerFlow::from_signed(0.0), PowerFlow::default());
    }
}
