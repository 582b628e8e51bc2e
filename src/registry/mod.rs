//! Device discovery across platforms, merged with the persisted alias table.

pub mod store;

pub use store::{default_alias, AliasStore, DeviceRecord};

use crate::config::Config;
use crate::device::{
    AndroidPlatform, DeviceInfo, DevicePlatform, IosPlatform, Platform, ToolStatus,
};
use crate::error::{MirrorError, Result};
use crate::mirror::window::WindowSignaller;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// One row of the device listing.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceEntry {
    #[serde(flatten)]
    pub record: DeviceRecord,
    pub connected: bool,
    /// Filled in by whoever knows about sessions.
    pub active: bool,
}

/// Tool availability of one enabled platform.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformDependencies {
    pub platform: Platform,
    /// Every required tool resolves.
    pub ready: bool,
    pub tools: Vec<ToolStatus>,
}

pub struct DeviceRegistry {
    backends: Vec<Arc<dyn DevicePlatform>>,
    store: AliasStore,
}

impl DeviceRegistry {
    pub fn new(backends: Vec<Arc<dyn DevicePlatform>>, store: AliasStore) -> Self {
        Self { backends, store }
    }

    /// Registry with the enabled real toolchains.
    pub fn from_config(config: &Config) -> Self {
        let timeout = config.command_timeout();
        let mut backends: Vec<Arc<dyn DevicePlatform>> = Vec::new();
        if config.android.enabled {
            backends.push(Arc::new(AndroidPlatform::new(
                &config.android,
                timeout,
                config.screenshots_path(),
                WindowSignaller::new(&config.window, timeout),
            )));
        }
        if config.ios.enabled {
            backends.push(Arc::new(IosPlatform::new(
                &config.ios,
                timeout,
                config.screenshots_path(),
            )));
        }
        Self::new(backends, AliasStore::load(config.alias_path()))
    }

    pub fn backend(&self, platform: Platform) -> Option<Arc<dyn DevicePlatform>> {
        self.backends
            .iter()
            .find(|b| b.platform() == platform)
            .cloned()
    }

    /// Connected devices on every platform. A failing platform tool is
    /// logged and contributes nothing.
    pub async fn list_connected(&self) -> Vec<(Arc<dyn DevicePlatform>, String)> {
        let listings = join_all(self.backends.iter().map(|b| b.list_connected())).await;

        let mut out = Vec::new();
        for (backend, listing) in self.backends.iter().zip(listings) {
            match listing {
                Ok(ids) => out.extend(ids.into_iter().map(|id| (Arc::clone(backend), id))),
                Err(e) => warn!(platform = %backend.platform(), "Device listing failed: {}", e),
            }
        }
        out
    }

    /// The platform that currently lists `device_id`.
    ///
    /// `Ok(None)` when no platform lists it. When every platform tool failed
    /// the first failure is returned instead, so a missing `adb` is not
    /// reported as a missing device.
    pub async fn locate(&self, device_id: &str) -> Result<Option<Arc<dyn DevicePlatform>>> {
        let mut first_error = None;
        let mut any_listed = false;
        for backend in &self.backends {
            match backend.list_connected().await {
                Ok(ids) if ids.iter().any(|id| id == device_id) => {
                    return Ok(Some(Arc::clone(backend)))
                }
                Ok(_) => any_listed = true,
                Err(e) => {
                    warn!(platform = %backend.platform(), "Device listing failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) if !any_listed => Err(e),
            _ => Ok(None),
        }
    }

    pub async fn is_connected(&self, device_id: &str) -> bool {
        matches!(self.locate(device_id).await, Ok(Some(_)))
    }

    /// Info for a connected device, `None` when it is not connected.
    pub async fn device_info(&self, device_id: &str) -> Option<DeviceInfo> {
        let backend = self.locate(device_id).await.ok().flatten()?;
        Some(backend.device_info(device_id).await)
    }

    /// Join queried infos against the alias table. Returns the records and
    /// how many ids had never been seen before.
    pub fn merge_with_aliases(&self, infos: &[DeviceInfo]) -> (Vec<DeviceRecord>, usize) {
        let mut new_devices = 0;
        let records = infos
            .iter()
            .map(|info| {
                let (record, new) = self.store.observe(info);
                if new {
                    new_devices += 1;
                    info!(device_id = %record.id, alias = %record.display_alias(), "New device");
                }
                record
            })
            .collect();
        (records, new_devices)
    }

    async fn connected_records(&self) -> (Vec<DeviceRecord>, usize) {
        let connected = self.list_connected().await;
        let infos = join_all(
            connected
                .iter()
                .map(|(backend, id)| backend.device_info(id)),
        )
        .await;
        self.merge_with_aliases(&infos)
    }

    /// Connected devices first, then persisted ones that are not attached.
    pub async fn list_devices(&self) -> Vec<DeviceEntry> {
        let (records, _) = self.connected_records().await;
        let connected_ids: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();

        let mut entries: Vec<DeviceEntry> = records
            .into_iter()
            .map(|record| DeviceEntry {
                record,
                connected: true,
                active: false,
            })
            .collect();
        entries.extend(
            self.store
                .records()
                .into_iter()
                .filter(|r| !connected_ids.contains(&r.id))
                .map(|record| DeviceEntry {
                    record,
                    connected: false,
                    active: false,
                }),
        );
        entries
    }

    /// Re-query every platform; returns the number of newly seen devices.
    pub async fn refresh(&self) -> usize {
        let (records, new_devices) = self.connected_records().await;
        info!(connected = records.len(), new_devices, "Device refresh");
        new_devices
    }

    pub fn dependencies(&self) -> Vec<PlatformDependencies> {
        self.backends
            .iter()
            .map(|backend| {
                let tools = backend.check_dependencies();
                PlatformDependencies {
                    platform: backend.platform(),
                    ready: tools.iter().all(|t| t.optional || t.found()),
                    tools,
                }
            })
            .collect()
    }

    /// Rename a device that is persisted or currently connected.
    pub async fn set_alias(&self, device_id: &str, alias: &str) -> Result<DeviceRecord> {
        let alias = alias.trim();
        if alias.is_empty() {
            return Err(MirrorError::InvalidPayload("alias must not be empty".to_string()));
        }

        let info = match self.store.get(device_id) {
            Some(_) => None,
            None => self.device_info(device_id).await,
        };
        let record = self.store.set_alias(device_id, alias, info.as_ref())?;
        info!(device_id, alias, "Alias updated");
        Ok(record)
    }
}
