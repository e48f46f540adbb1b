//! One snapshot cycle: select devices, fetch from the vendor, append rows.

use std::sync::Arc;

use chrono_tz::Tz;
use futures::future::join_all;
use serde_json::Value;
use tracing::info;
use tracing::warn;

use crate::devices::Device;
use crate::devices::DeviceTable;
use crate::devices::Selector;
use crate::error::DeviceFailure;
use crate::error::SnapshotError;
use crate::salus::DeviceRecord;
use crate::salus::MappedDevice;
use crate::salus::PropertyKey;
use crate::salus::SalusClient;
use crate::snapshot::RowSink;
use crate::snapshot::SnapshotWriter;
use crate::snapshot::Worksheet;
use crate::snapshot::scale_value;

/// Outcome of the decode and write phase. Devices are handled
/// independently, so both lists may be non-empty.
#[derive(Debug, Default)]
pub struct SnapshotReport {
    /// Devices whose row was appended
    pub written: Vec<String>,
    pub failed: Vec<DeviceFailure>,
}

impl SnapshotReport {
    /// Fail if any device failed, otherwise return the written devices.
    pub fn into_result(self) -> Result<Vec<String>, SnapshotError> {
        if self.failed.is_empty() {
            Ok(self.written)
        } else {
            Err(SnapshotError::Devices(self.failed))
        }
    }
}

/// Shared by every trigger: HTTP handlers, the poll loop and the CLI.
pub struct SnapshotService {
    client: SalusClient,
    sink: Arc<dyn RowSink>,
    devices: DeviceTable,
    timezone: Tz,
    sheet_name: String,
}

impl SnapshotService {
    pub fn new(
        client: SalusClient,
        sink: Arc<dyn RowSink>,
        devices: DeviceTable,
        timezone: Tz,
        sheet_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            sink,
            devices,
            timezone,
            sheet_name: sheet_name.into(),
        }
    }

    /// Spreadsheet name reported back to HTTP callers.
    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    pub fn client(&self) -> &SalusClient {
        &self.client
    }

    /// Sign in and fetch every mapped device's raw datapoints.
    pub async fn fetch(&self) -> Result<Vec<MappedDevice>, SnapshotError> {
        let token = self.client.token().await?;
        Ok(self.client.fetch_mapped_properties(&token).await?)
    }

    /// Take one snapshot of the devices `selector` picks.
    ///
    /// Selection, sign-in and fetch failures abort before anything is
    /// written. Each selected device is then decoded and written on its
    /// own, and every outcome is reported.
    #[tracing::instrument(skip(self))]
    pub async fn snapshot(&self, selector: &Selector) -> Result<SnapshotReport, SnapshotError> {
        let devices = self.devices.select(selector)?;
        let mapped = self.fetch().await?;
        Ok(self.write_devices(&devices, &mapped).await)
    }

    /// Like [`snapshot`](Self::snapshot), but writes datapoints the caller
    /// already fetched with [`fetch`](Self::fetch).
    #[tracing::instrument(skip(self, mapped))]
    pub async fn snapshot_from(
        &self,
        selector: &Selector,
        mapped: &[MappedDevice],
    ) -> Result<SnapshotReport, SnapshotError> {
        let devices = self.devices.select(selector)?;
        Ok(self.write_devices(&devices, mapped).await)
    }

    async fn write_devices(&self, devices: &[Device], mapped: &[MappedDevice]) -> SnapshotReport {
        let mut report = SnapshotReport::default();
        let mut writers = Vec::with_capacity(devices.len());

        for device in devices {
            let Some(raw) = mapped.iter().find(|m| m.name == device.name) else {
                warn!(device = %device.name, "Device not reported by the vendor, skipping");
                continue;
            };

            let record = match raw.decode(self.client.properties()) {
                Ok(record) => record,
                Err(error) => {
                    warn!(device = %device.name, %error, "Unusable datapoints");
                    report.failed.push(DeviceFailure {
                        device: device.name.clone(),
                        error: error.into(),
                    });
                    continue;
                }
            };

            let mut writer = SnapshotWriter::new(
                device.name.clone(),
                Worksheet::new(device.worksheet.clone(), self.sink.clone()),
                self.timezone,
            );
            for (key, value) in &record.properties {
                writer.add_property(key.name(), value.clone());
            }
            writers.push(writer);
        }

        let outcomes = join_all(writers.into_iter().map(|writer| async move {
            let device = writer.device().to_string();
            (device, writer.write_snapshot().await)
        }))
        .await;

        for (device, outcome) in outcomes {
            match outcome {
                Ok(()) => report.written.push(device),
                Err(error) => {
                    warn!(%device, %error, "Snapshot write failed");
                    report.failed.push(DeviceFailure {
                        device,
                        error: error.into(),
                    });
                }
            }
        }

        info!(
            written = report.written.len(),
            failed = report.failed.len(),
            "Snapshot complete"
        );
        report
    }
}

/// One-line console summary: `<name>: <temperature> <heating|idle>`.
///
/// Any non-zero running state counts as heating.
pub fn status_line(record: &DeviceRecord) -> String {
    let temperature = record
        .get(PropertyKey::Temperature)
        .cloned()
        .map(|v| scale_value(PropertyKey::Temperature.name(), v))
        .unwrap_or(Value::Null);
    let heating = record.get(PropertyKey::RunningState).is_some_and(is_truthy);

    format!(
        "{}: {} {}",
        record.name.as_deref().unwrap_or(&record.id),
        temperature,
        if heating { "heating" } else { "idle" }
    )
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(n) => n != 0.0,
            Err(_) => !s.trim().is_empty(),
        },
        Value::Null => false,
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
