pub mod api;
pub mod config;
pub mod devices;
pub mod error;
pub mod poll;
pub mod salus;
pub mod service;
pub mod sheets;
pub mod snapshot;
pub mod token;

pub use config::Config;
pub use config::LogLevel;
pub use devices::DeviceTable;
pub use devices::Selector;
pub use error::SnapshotError;
pub use service::SnapshotReport;
pub use service::SnapshotService;
