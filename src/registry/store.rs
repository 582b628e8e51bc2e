//! Persisted device/alias table.
//!
//! A flat JSON list keyed by device id. Every mutation is written through
//! immediately (temp file + rename); a missing or unreadable file is an empty
//! table.

use crate::device::{DeviceInfo, Platform};
use crate::error::MirrorError;
use crate::platform;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: String,
    pub platform: Platform,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub os_version: String,
    pub first_seen: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub last_seen: DateTime<Utc>,
}

impl DeviceRecord {
    fn from_info(info: &DeviceInfo, now: DateTime<Utc>) -> Self {
        Self {
            id: info.id.clone(),
            platform: info.platform,
            alias: Some(default_alias(&info.id)),
            name: info.name.clone(),
            model: info.model.clone(),
            os_version: info.os_version.clone(),
            first_seen: now,
            last_seen: now,
        }
    }

    /// Alias to show, falling back to the default one.
    pub fn display_alias(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| default_alias(&self.id))
    }
}

pub fn default_alias(id: &str) -> String {
    format!("Device_{}", platform::id_suffix(id, 4))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AliasTable {
    #[serde(default)]
    devices: Vec<DeviceRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_updated: Option<DateTime<Utc>>,
}

pub struct AliasStore {
    path: PathBuf,
    table: Mutex<AliasTable>,
}

impl AliasStore {
    /// Load the table at `path`. Never fails: problems are logged and the
    /// table starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let table = match read_table(&path) {
            Ok(table) => table,
            Err(e) => {
                warn!(path = %path.display(), "{}; starting with an empty device table", e);
                AliasTable::default()
            }
        };
        debug!(path = %path.display(), devices = table.devices.len(), "Loaded device table");
        Self {
            path,
            table: Mutex::new(table),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AliasTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: &str) -> Option<DeviceRecord> {
        self.lock().devices.iter().find(|r| r.id == id).cloned()
    }

    pub fn records(&self) -> Vec<DeviceRecord> {
        self.lock().devices.clone()
    }

    /// Merge freshly queried info into the table.
    ///
    /// Unknown ids get a record with the default alias and are written out;
    /// known ids only have their properties and `last_seen` refreshed in
    /// memory. Returns the record and whether it was new.
    pub fn observe(&self, info: &DeviceInfo) -> (DeviceRecord, bool) {
        let now = Utc::now();
        let mut table = self.lock();

        if let Some(record) = table.devices.iter_mut().find(|r| r.id == info.id) {
            record.name = info.name.clone();
            record.model = info.model.clone();
            record.os_version = info.os_version.clone();
            record.last_seen = now;
            return (record.clone(), false);
        }

        let record = DeviceRecord::from_info(info, now);
        table.devices.push(record.clone());
        self.flush(&mut table);
        (record, true)
    }

    /// Rename a device. `info` creates the record when the id is not yet
    /// persisted; without it the id must already be known.
    pub fn set_alias(
        &self,
        id: &str,
        alias: &str,
        info: Option<&DeviceInfo>,
    ) -> Result<DeviceRecord, MirrorError> {
        let mut table = self.lock();
        let index = match table.devices.iter().position(|r| r.id == id) {
            Some(index) => index,
            None => {
                let info = info.ok_or_else(|| MirrorError::NotConnected(id.to_string()))?;
                table.devices.push(DeviceRecord::from_info(info, Utc::now()));
                table.devices.len() - 1
            }
        };

        table.devices[index].alias = Some(alias.to_string());
        let record = table.devices[index].clone();
        self.flush(&mut table);
        Ok(record)
    }

    fn flush(&self, table: &mut AliasTable) {
        table.last_updated = Some(Utc::now());
        if let Err(e) = write_table(&self.path, table) {
            warn!(path = %self.path.display(), "Failed to save device table: {}", e);
        }
    }
}

fn read_table(path: &Path) -> Result<AliasTable, MirrorError> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(AliasTable::default()),
        Err(e) => return Err(MirrorError::PersistenceCorrupt(e.to_string())),
    };
    if data.trim().is_empty() {
        return Ok(AliasTable::default());
    }
    serde_json::from_str(&data).map_err(|e| MirrorError::PersistenceCorrupt(e.to_string()))
}

fn write_table(path: &Path, table: &AliasTable) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(table)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)
}
