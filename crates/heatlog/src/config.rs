//! Configuration file parsing and structures.
//!
//! heatlog reads TOML. Several files may be given (typically a base file and
//! a secrets file); their tables are merged and a value defined in more than
//! one file is reported as a conflict. Secrets that are absent from every
//! file fall back to environment variables.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use chrono_tz::Tz;
use indexmap::IndexMap;
use serde::Deserialize;
use serde::Deserializer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;

use crate::salus::PropertyKey;

/// Environment fallback for `vendor.password`.
pub const ENV_VENDOR_PASSWORD: &str = "SALUS_PASSWORD";
/// Environment fallback for `api.users`, a JSON object of name to password.
pub const ENV_BASIC_AUTH_USERS: &str = "BASIC_AUTH_USERS";

/// Top-level configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub vendor: VendorConfig,
    #[serde(default)]
    pub sheets: Option<SheetsConfig>,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub poll: PollConfig,
    /// Tracked devices keyed by their vendor display name, in file order.
    #[serde(default)]
    pub devices: IndexMap<String, DeviceConfig>,
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `reqwest = "warn"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Build the subscriber filter for this config.
    pub fn targets(&self) -> Targets {
        Targets::new()
            .with_default(LevelFilter::from(self.level))
            .with_targets(
                self.overrides
                    .iter()
                    .map(|(target, level)| (target.clone(), LevelFilter::from(*level))),
            )
    }
}

/// Salus cloud account and request settings
#[derive(Clone, Deserialize)]
pub struct VendorConfig {
    #[serde(default = "default_vendor_base_url")]
    pub base_url: String,

    pub email: String,

    /// Falls back to `SALUS_PASSWORD` when empty
    #[serde(default)]
    pub password: String,

    /// Device group whose datapoints are fetched
    pub group_id: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Skip TLS certificate verification for the vendor endpoint
    #[serde(default)]
    pub insecure_tls: bool,

    /// Vendor property names to request, in column order
    #[serde(
        default = "PropertyKey::all",
        deserialize_with = "deserialize_properties"
    )]
    pub properties: Vec<PropertyKey>,
}

impl fmt::Debug for VendorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VendorConfig")
            .field("base_url", &self.base_url)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("group_id", &self.group_id)
            .field("timeout_secs", &self.timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("insecure_tls", &self.insecure_tls)
            .field("properties", &self.properties)
            .finish()
    }
}

fn default_vendor_base_url() -> String {
    "https://eu.salusconnect.io".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("heatlog/{}", env!("CARGO_PKG_VERSION"))
}

/// Google Sheets destination
#[derive(Debug, Clone, Deserialize)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,

    /// Human-readable spreadsheet name used in responses and logs
    #[serde(default)]
    pub name: Option<String>,

    /// Service-account JSON key; falls back to `GSPREAD_SA`/`GSPREAD_SA_KEY`
    #[serde(default)]
    pub service_account_key: Option<PathBuf>,

    #[serde(default = "default_sheets_api_base")]
    pub api_base: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl SheetsConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.spreadsheet_id)
    }
}

fn default_sheets_api_base() -> String {
    "https://sheets.googleapis.com".to_string()
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SnapshotConfig {
    /// IANA timezone for the `local_time` column
    #[serde(default = "default_timezone", deserialize_with = "deserialize_from_str")]
    pub timezone: Tz,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
        }
    }
}

fn default_timezone() -> Tz {
    chrono_tz::Europe::Prague
}

/// HTTP trigger endpoint
#[derive(Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Basic-auth user table; falls back to `BASIC_AUTH_USERS`
    #[serde(default)]
    pub users: HashMap<String, String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            users: HashMap::new(),
        }
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut users: Vec<_> = self.users.keys().collect();
        users.sort();
        f.debug_struct("ApiConfig")
            .field("listen", &self.listen)
            .field("port", &self.port)
            .field("users", &users)
            .finish()
    }
}

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8565
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    300
}

/// One tracked device
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceConfig {
    /// Destination worksheet; defaults to the device name
    #[serde(default)]
    pub worksheet: Option<String>,

    /// Floor grouping tag used by floor selectors
    #[serde(default)]
    pub floor: Option<String>,
}

fn deserialize_from_str<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

fn deserialize_properties<'de, D>(deserializer: D) -> Result<Vec<PropertyKey>, D::Error>
where
    D: Deserializer<'de>,
{
    let names = Vec::<String>::deserialize(deserializer)?;
    names
        .iter()
        .map(|name| {
            PropertyKey::from_str(name)
                .map_err(|_| serde::de::Error::custom(format!("unknown property '{}'", name)))
        })
        .collect()
}

impl Config {
    /// Load configuration from a single TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_files(&[path.as_ref().to_path_buf()])
    }

    /// Load and merge several TOML files, then apply environment fallbacks
    /// and validate.
    pub fn from_files(paths: &[PathBuf]) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();
        let mut origins: HashMap<String, PathBuf> = HashMap::new();

        for path in paths {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::Io(path.clone(), e))?;
            let table: toml::Table = toml::from_str(&contents)
                .map_err(|e| ConfigError::Parse(path.clone(), e))?;
            merge_tables(&mut merged, table, "", path, &mut origins)?;
        }

        let mut config: Config = toml::Value::Table(merged)
            .try_into()
            .map_err(ConfigError::Schema)?;
        config.apply_env_fallbacks()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_fallbacks(&mut self) -> Result<(), ConfigError> {
        if self.vendor.password.is_empty() {
            if let Ok(password) = std::env::var(ENV_VENDOR_PASSWORD) {
                self.vendor.password = password;
            }
        }

        if self.api.users.is_empty() {
            if let Ok(users) = std::env::var(ENV_BASIC_AUTH_USERS) {
                self.api.users = serde_json::from_str(&users)
                    .map_err(|e| ConfigError::Env(ENV_BASIC_AUTH_USERS, e.to_string()))?;
            }
        }

        Ok(())
    }

    /// Cross-field checks, all problems reported together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.vendor.password.is_empty() {
            problems.push(format!(
                "vendor.password is not set (and {} is empty)",
                ENV_VENDOR_PASSWORD
            ));
        }
        if self.vendor.properties.is_empty() {
            problems.push("vendor.properties must name at least one property".to_string());
        }
        if self.devices.is_empty() {
            problems.push("no [devices] configured".to_string());
        }
        if self.poll.interval_secs == 0 {
            problems.push("poll.interval_secs must be positive".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// Checks that only matter when the HTTP trigger is served.
    pub fn validate_for_serve(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        if self.api.users.is_empty() {
            problems.push(format!(
                "api.users is empty (and {} is not set)",
                ENV_BASIC_AUTH_USERS
            ));
        }
        if self.sheets.is_none() {
            problems.push("[sheets] is required to write snapshots".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

/// Merge `incoming` into `base`; tables merge recursively, any other value
/// may only be defined once across all files.
fn merge_tables(
    base: &mut toml::Table,
    incoming: toml::Table,
    prefix: &str,
    source: &Path,
    origins: &mut HashMap<String, PathBuf>,
) -> Result<(), ConfigError> {
    for (key, value) in incoming {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };

        if let Some(existing) = base.get_mut(&key) {
            match (existing, value) {
                (toml::Value::Table(existing), toml::Value::Table(table)) => {
                    merge_tables(existing, table, &path, source, origins)?;
                }
                _ => {
                    let first = origins.get(&path).cloned().unwrap_or_default();
                    return Err(ConfigError::Conflict {
                        key: path,
                        first,
                        second: source.to_path_buf(),
                    });
                }
            }
        } else {
            record_origins(&value, &path, source, origins);
            base.insert(key, value);
        }
    }

    Ok(())
}

fn record_origins(
    value: &toml::Value,
    path: &str,
    source: &Path,
    origins: &mut HashMap<String, PathBuf>,
) {
    origins.insert(path.to_string(), source.to_path_buf());
    if let toml::Value::Table(table) = value {
        for (key, nested) in table {
            record_origins(nested, &format!("{}.{}", path, key), source, origins);
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML in {0}: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Schema(#[source] toml::de::Error),

    #[error("'{key}' is defined in both {} and {}", .first.display(), .second.display())]
    Conflict {
        key: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Failed to read {0} from the environment: {1}")]
    Env(&'static str, String),

    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}
