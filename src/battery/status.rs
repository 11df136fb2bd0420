use super::{controller::ControllerMode, grid_charge::GridChargePlan};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StatusError {
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid status document {path:?}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// The persisted battery document. Field names match the retained STATUS
/// message, so the same JSON can be read back after a restart.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BatteryStatus {
    #[serde(rename = "chargeStateSoCPct")]
    pub charge_state_soc_pct: Option<f64>,
    pub capacity_wh: Option<f64>,
    pub charge_baseline_w: Option<f64>,
    pub controller_mode: ControllerMode,
    pub grid_charge_active: bool,
    pub grid_charge_plan: Option<GridChargePlan>,
    pub charge_max: bool,
    pub charge_to: Option<f64>,
    pub prevent_unload: bool,
    pub battery_price_cent_at_last_charge: Option<f64>,
    pub last_grid_charge_date: Option<NaiveDate>,
    pub solar_wh: Option<f64>,
    pub storage_charge_wh: Option<f64>,
    #[serde(alias = "storageDisChargeWh")]
    pub storage_discharge_wh: Option<f64>,
}

impl BatteryStatus {
    /// True when a one-day charge override is in effect.
    pub fn has_charge_override(&self) -> bool {
        self.charge_max || self.charge_to.is_some()
    }
}

/// Owns the in-memory status and its file. Every update copies the current
/// file to `<file>.bak` before overwriting it.
pub struct StatusStore {
    path: PathBuf,
    backup: PathBuf,
    status: BatteryStatus,
}

fn backup_path(path: &Path) -> PathBuf {
    let mut backup = path.as_os_str().to_owned();
    backup.push(".bak");
    PathBuf::from(backup)
}

impl StatusStore {
    /// Reads the persisted document. A missing or unreadable file is an error,
    /// there is no fallback to defaults.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StatusError> {
        let path = path.into();

        let raw = tokio::fs::read(&path).await.map_err(|source| StatusError::Io {
            path: path.clone(),
            source,
        })?;

        let status = serde_json::from_slice(&raw).map_err(|source| StatusError::Json {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            backup: backup_path(&path),
            path,
            status,
        })
    }

    pub fn get(&self) -> &BatteryStatus {
        &self.status
    }

    /// Applies `f` to a copy of the status and persists the result. The
    /// in-memory status only changes once the file has been written.
    pub async fn update<F>(&mut self, f: F) -> Result<&BatteryStatus, StatusError>
    where
        F: FnOnce(&mut BatteryStatus),
    {
        let mut next = self.status.clone();
        f(&mut next);

        let json = serde_json::to_vec_pretty(&next).map_err(|source| StatusError::Json {
            path: self.path.clone(),
            source,
        })?;

        tokio::fs::copy(&self.path, &self.backup)
            .await
            .map_err(|source| StatusError::Io {
                path: self.backup.clone(),
                source,
            })?;

        tokio::fs::write(&self.path, json)
            .await
            .map_err(|source| StatusError::Io {
                path: self.path.clone(),
                source,
            })?;

        self.status = next;

        Ok(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read(path: &Path) -> BatteryStatus {
        serde_json::from_slice(&tokio::fs::read(path).await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn update_keeps_previous_document_as_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fronius-battery.json");
        tokio::fs::write(&path, r#"{"capacityWh": 10000, "solarWh": 5, "storageDisChargeWh": 7}"#)
            .await
            .unwrap();

        let mut store = StatusStore::load(&path).await.unwrap();
        assert_eq!(store.get().storage_discharge_wh, Some(7.0));

        let before = store.get().clone();
        store.update(|s| s.solar_wh = Some(6.0)).await.unwrap();

        assert_eq!(read(&backup_path(&path)).await, before);
        assert_eq!(read(&path).await, *store.get());
        assert_eq!(store.get().solar_wh, Some(6.0));

        let before = store.get().clone();
        store
            .update(|s| {
                s.charge_to = Some(90.0);
                s.controller_mode = ControllerMode::PvCharge(40.0);
            })
            .await
            .unwrap();

        assert_eq!(read(&backup_path(&path)).await, before);
        assert_eq!(read(&path).await.controller_mode, ControllerMode::PvCharge(40.0));
        assert!(store.get().has_charge_override());
    }

    #[tokio::test]
    async fn missing_or_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fronius-battery.json");

        assert!(matches!(StatusStore::load(&path).await, Err(StatusError::Io { .. })));

        tokio::fs::write(&path, "{not json").await.unwrap();
        assert!(matches!(StatusStore::load(&path).await, Err(StatusError::Json { .. })));
    }

    #[test]
    fn document_uses_camel_case_names() {
        let status = BatteryStatus {
            charge_state_soc_pct: Some(55.0),
            grid_charge_active: true,
            ..Default::default()
        };

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["chargeStateSoCPct"], 55.0);
        assert_eq!(json["gridChargeActive"], true);
        assert_eq!(json["controllerMode"]["mode"], "default");
    }
}
