//! Recipient device lookup.

use std::collections::HashMap;

use {
    async_trait::async_trait,
    courier_common::Identity,
    serde::{Deserialize, Serialize},
    tokio::sync::RwLock,
};

use crate::Platform;

/// Where an identity's notifications go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub platform: Platform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl DeviceRecord {
    pub fn new(platform: Platform, address: impl Into<String>) -> Self {
        Self {
            platform,
            address: Some(address.into()),
        }
    }

    /// Record used for identities the directory does not know.
    pub fn unknown() -> Self {
        Self {
            platform: Platform::Unknown,
            address: None,
        }
    }
}

#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn lookup(&self, identity: &Identity) -> Option<DeviceRecord>;
}

#[derive(Default)]
pub struct InMemoryDeviceDirectory {
    devices: RwLock<HashMap<Identity, DeviceRecord>>,
}

impl InMemoryDeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, identity: Identity, record: DeviceRecord) {
        self.devices.write().await.insert(identity, record);
    }

    pub async fn forget(&self, identity: &Identity) -> Option<DeviceRecord> {
        self.devices.write().await.remove(identity)
    }
}

#[async_trait]
impl DeviceDirectory for InMemoryDeviceDirectory {
    async fn lookup(&self, identity: &Identity) -> Option<DeviceRecord> {
        self.devices.read().await.get(identity).cloned()
    }
}
