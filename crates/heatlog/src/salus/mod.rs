//! Salus cloud thermostat API.
//!
//! Signs in, lists devices, fetches group datapoints and joins the two by
//! device id.

mod client;
mod model;
mod property;

pub use client::SalusClient;
pub use model::DeviceRecord;
pub use model::MappedDevice;
pub use model::RawDevice;
pub use model::join_identities;
pub use property::PropertyKey;
pub use property::Scaling;
