//! Tracked devices and the selectors that pick among them.

use indexmap::IndexMap;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::config::DeviceConfig;
use crate::error::ValidationError;

/// A device whose snapshots are logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Vendor display name (`product_name`)
    pub name: String,
    /// Worksheet that receives this device's rows
    pub worksheet: String,
    pub floor: Option<String>,
}

/// Which devices a snapshot covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    All,
    Device(String),
    Sheet(String),
    Floor(String),
}

/// Trigger request body. At most one field may be set; none means all
/// devices.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct SelectorRequest {
    /// Vendor display name of a single device
    #[serde(default)]
    #[schema(example = "Room A")]
    pub device: Option<String>,
    /// Worksheet title; selects every device logging to it
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    #[schema(example = "ground")]
    pub floor: Option<String>,
}

impl TryFrom<SelectorRequest> for Selector {
    type Error = ValidationError;

    fn try_from(req: SelectorRequest) -> Result<Self, Self::Error> {
        match (req.device, req.sheet, req.floor) {
            (None, None, None) => Ok(Selector::All),
            (Some(device), None, None) => Ok(Selector::Device(device)),
            (None, Some(sheet), None) => Ok(Selector::Sheet(sheet)),
            (None, None, Some(floor)) => Ok(Selector::Floor(floor)),
            _ => Err(ValidationError::AmbiguousSelector),
        }
    }
}

/// Configured devices in file order.
#[derive(Debug, Clone, Default)]
pub struct DeviceTable {
    devices: Vec<Device>,
}

impl DeviceTable {
    pub fn from_config(devices: &IndexMap<String, DeviceConfig>) -> Self {
        Self {
            devices: devices
                .iter()
                .map(|(name, cfg)| Device {
                    name: name.clone(),
                    worksheet: cfg.worksheet.clone().unwrap_or_else(|| name.clone()),
                    floor: cfg.floor.clone(),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Devices matching `selector`. A selector that matches nothing is an
    /// error so typos don't silently log nothing.
    pub fn select(&self, selector: &Selector) -> Result<Vec<Device>, ValidationError> {
        let (kind, value, selected): (&'static str, &str, Vec<Device>) = match selector {
            Selector::All => return Ok(self.devices.clone()),
            Selector::Device(name) => ("device", name.as_str(), self.filter(|d| &d.name == name)),
            Selector::Sheet(sheet) => ("sheet", sheet.as_str(), self.filter(|d| &d.worksheet == sheet)),
            Selector::Floor(floor) => (
                "floor",
                floor.as_str(),
                self.filter(|d| d.floor.as_ref() == Some(floor)),
            ),
        };

        if selected.is_empty() {
            return Err(ValidationError::UnknownTarget {
                kind,
                value: value.to_string(),
            });
        }
        Ok(selected)
    }

    fn filter(&self, pred: impl Fn(&Device) -> bool) -> Vec<Device> {
        self.devices.iter().filter(|d| pred(d)).cloned().collect()
    }
}
