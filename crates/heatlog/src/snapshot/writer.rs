use chrono::DateTime;
use chrono::Utc;
use chrono_tz::Tz;
use indexmap::IndexMap;
use serde_json::Number;
use serde_json::Value;

use super::sink::Worksheet;
use crate::error::WriteError;
use crate::salus::Scaling;

/// Name of the leading timestamp column.
pub const LOCAL_TIME: &str = "local_time";

/// Format a moment as `YYYY-MM-DD HH:MM:SS +HH:MM` in `timezone`.
pub fn local_time(now: DateTime<Utc>, timezone: Tz) -> String {
    now.with_timezone(&timezone)
        .format("%Y-%m-%d %H:%M:%S %:z")
        .to_string()
}

/// Apply a property's scaling rule to its raw value.
///
/// Nulls pass through unscaled; so do values that are not numeric.
pub fn scale_value(name: &str, value: Value) -> Value {
    if Scaling::for_name(name) == Scaling::Raw {
        return value;
    }

    let raw = match &value {
        Value::Null => return value,
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match raw.and_then(|r| Number::from_f64(r / 100.0)) {
        Some(scaled) => Value::Number(scaled),
        None => {
            tracing::warn!(property = name, %value, "Non-numeric value for scaled property, storing as-is");
            value
        }
    }
}

/// One device's row: `local_time` first, then properties in first-seen
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    fields: IndexMap<String, Value>,
}

impl SnapshotRow {
    fn new(local_time: String) -> Self {
        let mut fields = IndexMap::new();
        fields.insert(LOCAL_TIME.to_string(), Value::String(local_time));
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn values(&self) -> Vec<Value> {
        self.fields.values().cloned().collect()
    }
}

/// Accumulates one device's properties and appends them as a single row.
///
/// A writer is consumed by `write_snapshot`, so each instance produces at
/// most one row.
#[derive(Debug)]
pub struct SnapshotWriter {
    device: String,
    worksheet: Worksheet,
    timezone: Tz,
    row: Option<SnapshotRow>,
}

impl SnapshotWriter {
    pub fn new(device: impl Into<String>, worksheet: Worksheet, timezone: Tz) -> Self {
        Self {
            device: device.into(),
            worksheet,
            timezone,
            row: None,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn row(&self) -> Option<&SnapshotRow> {
        self.row.as_ref()
    }

    /// Record a property. The first call stamps the row with the current
    /// local time. Re-adding a key overwrites its value in place.
    pub fn add_property(&mut self, key: &str, value: Value) {
        let timezone = self.timezone;
        let row = self
            .row
            .get_or_insert_with(|| SnapshotRow::new(local_time(Utc::now(), timezone)));
        row.fields.insert(key.to_string(), scale_value(key, value));
    }

    /// Append the accumulated row to the worksheet.
    pub async fn write_snapshot(self) -> Result<(), WriteError> {
        let row = self
            .row
            .ok_or_else(|| WriteError::EmptySnapshot(self.device.clone()))?;

        let values = row.values();
        tracing::debug!(
            device = %self.device,
            worksheet = self.worksheet.title(),
            ?values,
            "Appending snapshot row"
        );
        self.worksheet.append_row(values).await
    }
}
