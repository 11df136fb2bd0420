use crate::sunspec::{client::SunspecClient, transport::Transport, SunspecError};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Operating mode of the battery controller, as far as this process drives it.
#[derive(Serialize, Deserialize, Debug, PartialEq, Copy, Clone, Default)]
#[serde(tag = "mode", content = "pct", rename_all = "camelCase")]
pub enum ControllerMode {
    /// Hardware defaults: charge and discharge allowed, no grid charging.
    #[default]
    Default,
    /// Neither charge nor discharge, so other loads get the PV.
    Hold,
    /// Forced charge from the grid at `pct` of the maximum charge rate.
    GridCharge(f64),
    /// Charge from PV limited to `pct` of the maximum charge rate.
    PvCharge(f64),
}

impl fmt::Display for ControllerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerMode::Default => f.write_str("Default"),
            ControllerMode::Hold => f.write_str("Hold"),
            ControllerMode::GridCharge(pct) => write!(f, "GridCharge({pct:.0}%)"),
            ControllerMode::PvCharge(pct) => write!(f, "PvCharge({pct:.0}%)"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Failed writing {register}: {source}")]
    Write {
        register: &'static str,
        #[source]
        source: SunspecError,
    },
}

/// Hardware auto-revert timeouts in seconds.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct RevertTimes {
    pub default_secs: u16,
    pub managed_secs: u16,
}

// StorCtl_Mod bits
const CHARGE_CONTROL: u16 = 0b01;
const CHARGE_AND_DISCHARGE_CONTROL: u16 = 0b11;

// ChaGriSet
const CHARGE_FROM_PV: u16 = 0;
const CHARGE_FROM_GRID: u16 = 1;

#[derive(Debug, PartialEq, Copy, Clone)]
pub enum StepValue {
    Raw(u16),
    /// Percent of the maximum rate, written through the register's scale factor.
    Percent(f64),
}

#[derive(Debug, PartialEq, Copy, Clone)]
pub struct Step {
    pub register: &'static str,
    pub value: StepValue,
}

fn raw(register: &'static str, value: u16) -> Step {
    Step {
        register,
        value: StepValue::Raw(value),
    }
}

fn percent(register: &'static str, value: f64) -> Step {
    Step {
        register,
        value: StepValue::Percent(value),
    }
}

impl ControllerMode {
    /// The register writes that enter this mode, in order.
    pub fn steps(&self, revert: RevertTimes) -> Vec<Step> {
        match *self {
            ControllerMode::Default => vec![
                raw("StorCtl_Mod", 0),
                raw("ChaGriSet", CHARGE_FROM_PV),
                percent("InWRte", 100.0),
                percent("OutWRte", 100.0),
                raw("InOutWRte_RvrtTms", revert.default_secs),
            ],
            ControllerMode::Hold => vec![
                raw("StorCtl_Mod", CHARGE_AND_DISCHARGE_CONTROL),
                raw("InOutWRte_RvrtTms", revert.managed_secs),
                raw("ChaGriSet", CHARGE_FROM_PV),
                percent("InWRte", 0.0),
                percent("OutWRte", 0.0),
            ],
            ControllerMode::GridCharge(pct) => vec![
                percent("InWRte", 100.0),
                raw("StorCtl_Mod", CHARGE_AND_DISCHARGE_CONTROL),
                raw("InOutWRte_RvrtTms", revert.managed_secs),
                raw("ChaGriSet", CHARGE_FROM_GRID),
                percent("OutWRte", -pct.clamp(0.0, 100.0)),
            ],
            ControllerMode::PvCharge(pct) => vec![
                raw("StorCtl_Mod", CHARGE_CONTROL),
                raw("InOutWRte_RvrtTms", revert.managed_secs),
                raw("ChaGriSet", CHARGE_FROM_PV),
                percent("InWRte", pct.clamp(0.0, 100.0)),
            ],
        }
    }
}

/// Writes the register sequence for `mode`. Stops at the first failed write;
/// what was already written stays, the auto-revert timeout takes care of it.
pub async fn apply<T: Transport>(
    inverter: &mut SunspecClient<T>,
    mode: ControllerMode,
    revert: RevertTimes,
) -> Result<(), ControllerError> {
    for step in mode.steps(revert) {
        let written = match step.value {
            StepValue::Raw(value) => inverter.write_register(step.register, &[value]).await,
            StepValue::Percent(value) => inverter.write_value(step.register, value).await,
        }
        .map_err(|source| ControllerError::Write {
            register: step.register,
            source,
        })?;

        debug!("{mode}: {} = {written}", step.register);
    }

    Ok(())
}
