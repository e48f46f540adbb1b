//! Wire types for the Salus REST API and the typed decode of datapoints.

use std::collections::HashMap;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use super::property::PropertyKey;
use crate::error::UpstreamError;

#[derive(Debug, Serialize)]
pub(super) struct SignInRequest<'a> {
    pub user: SignInUser<'a>,
}

#[derive(Debug, Serialize)]
pub(super) struct SignInUser<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Deserialize)]
pub(super) struct SignInResponse {
    pub access_token: String,
    /// Token lifetime in seconds.
    pub expires_in: i64,
}

/// One entry of `GET /apiv1/devices.json`.
#[derive(Debug, Deserialize)]
pub(super) struct DeviceEntry {
    pub device: DeviceInfo,
}

#[derive(Debug, Deserialize)]
pub(super) struct DeviceInfo {
    pub key: String,
    pub product_name: String,
}

/// Body of `GET /apiv1/groups/{id}/datapoints.json`.
#[derive(Debug, Deserialize)]
pub(super) struct DatapointsResponse {
    pub datapoints: Datapoints,
}

#[derive(Debug, Deserialize)]
pub(super) struct Datapoints {
    pub devices: DatapointDevices,
}

#[derive(Debug, Deserialize)]
pub(super) struct DatapointDevices {
    #[serde(default)]
    pub device: Vec<RawDevice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDevice {
    pub id: String,
    pub properties: RawProperties,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawProperties {
    #[serde(default)]
    pub property: Vec<RawProperty>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawProperty {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

/// One device's datapoints, in the order the vendor reported them.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub id: String,
    /// Display name, filled in by the identity join.
    pub name: Option<String>,
    pub properties: Vec<(PropertyKey, Value)>,
}

impl DeviceRecord {
    /// Decode a raw device entry, checking property names against the
    /// closed key set and the required keys against `requested`.
    pub fn decode(raw: RawDevice, requested: &[PropertyKey]) -> Result<Self, UpstreamError> {
        let mut properties = Vec::with_capacity(raw.properties.property.len());
        for prop in raw.properties.property {
            let key = PropertyKey::from_str(&prop.name).map_err(|_| {
                UpstreamError::UnknownProperty {
                    device: raw.id.clone(),
                    name: prop.name.clone(),
                }
            })?;
            properties.push((key, prop.value));
        }

        for key in requested.iter().filter(|k| k.is_required()) {
            if !properties.iter().any(|(k, _)| k == key) {
                return Err(UpstreamError::MissingProperty {
                    device: raw.id,
                    name: key.name(),
                });
            }
        }

        Ok(Self {
            id: raw.id,
            name: None,
            properties,
        })
    }

    pub fn get(&self, key: PropertyKey) -> Option<&Value> {
        self.properties
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }
}

/// A vendor device joined to its display name, datapoints still raw.
#[derive(Debug, Clone)]
pub struct MappedDevice {
    pub name: String,
    pub raw: RawDevice,
}

impl MappedDevice {
    pub fn id(&self) -> &str {
        &self.raw.id
    }

    /// Decode this device's datapoints and attach its display name.
    pub fn decode(&self, requested: &[PropertyKey]) -> Result<DeviceRecord, UpstreamError> {
        let mut record = DeviceRecord::decode(self.raw.clone(), requested)?;
        record.name = Some(self.name.clone());
        Ok(record)
    }
}

/// Attach display names to raw devices, dropping ids the identity map lacks.
///
/// Runs before any decoding so that devices nobody tracks (gateways, for
/// instance) never fail a snapshot.
pub fn join_identities(
    devices: Vec<RawDevice>,
    identities: &HashMap<String, String>,
) -> Vec<MappedDevice> {
    devices
        .into_iter()
        .filter_map(|raw| match identities.get(&raw.id) {
            Some(name) => Some(MappedDevice {
                name: name.clone(),
                raw,
            }),
            None => {
                tracing::debug!(device_id = %raw.id, "Skipping device missing from identity map");
                None
            }
        })
        .collect()
}
