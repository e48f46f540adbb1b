//! Error taxonomy for a snapshot attempt.
//!
//! Each stage of a snapshot fails with its own error type so callers can
//! tell a rejected sign-in from a bad vendor response or a failed append:
//! - `AuthError`: the vendor (or spreadsheet) credentials were refused
//! - `UpstreamError`: a vendor read failed or returned an unexpected shape
//! - `WriteError`: the backing store rejected an append
//! - `ValidationError`: the trigger request itself was bad
//!
//! `SnapshotError` wraps them for the service layer. Per-device decode and
//! write failures are collected as `DeviceFailure`s rather than aborting.

use reqwest::StatusCode;

/// Signing in to the vendor API failed.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("sign-in rejected with HTTP {status}")]
    Rejected { status: StatusCode },

    #[error("malformed sign-in response: {0}")]
    Malformed(#[source] reqwest::Error),

    #[error("sign-in response has out-of-range expires_in {0}")]
    InvalidExpiry(i64),

    #[error("sign-in request failed: {0}")]
    Transport(#[source] reqwest::Error),
}

/// A vendor read failed.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("{endpoint} returned HTTP {status}")]
    Status {
        endpoint: &'static str,
        status: StatusCode,
    },

    #[error("unexpected response shape from {endpoint}: {source}")]
    Shape {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("device {device} reported unrecognized property '{name}'")]
    UnknownProperty { device: String, name: String },

    #[error("device {device} is missing required property '{name}'")]
    MissingProperty { device: String, name: &'static str },
}

/// Appending a row to the backing store failed.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("append to worksheet '{worksheet}' rejected with HTTP {status}: {body}")]
    Rejected {
        worksheet: String,
        status: StatusCode,
        body: String,
    },

    #[error("append to worksheet '{worksheet}' failed: {source}")]
    Transport {
        worksheet: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("spreadsheet credentials unusable: {0}")]
    Credentials(String),

    #[error("no properties recorded for device '{0}'")]
    EmptySnapshot(String),

    #[error("worksheet '{0}' not found")]
    MissingWorksheet(String),
}

/// The trigger request was unauthorized or selected nothing usable.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Incorrect name or password")]
    Unauthorized,

    #[error("select at most one of device, sheet or floor")]
    AmbiguousSelector,

    #[error("invalid request body: {0}")]
    MalformedRequest(String),

    #[error("no configured device matches {kind} '{value}'")]
    UnknownTarget { kind: &'static str, value: String },
}

/// Why a single device produced no row.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

/// One device's failure, kept alongside the device it belongs to.
#[derive(Debug)]
pub struct DeviceFailure {
    pub device: String,
    pub error: DeviceError,
}

/// Anything that stops a snapshot from completing cleanly.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("{}", format_failures(.0))]
    Devices(Vec<DeviceFailure>),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl SnapshotError {
    /// Taxonomy name surfaced to HTTP callers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "AuthError",
            Self::Upstream(_) => "UpstreamError",
            Self::Devices(failures) => {
                if failures
                    .iter()
                    .any(|f| matches!(f.error, DeviceError::Write(_)))
                {
                    "WriteError"
                } else {
                    "UpstreamError"
                }
            }
            Self::Validation(_) => "ValidationError",
        }
    }
}

fn format_failures(failures: &[DeviceFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.device, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_failures_render_per_device() {
        let err = SnapshotError::Devices(vec![
            DeviceFailure {
                device: "Room A".to_string(),
                error: WriteError::MissingWorksheet("Room A".to_string()).into(),
            },
            DeviceFailure {
                device: "Cellar".to_string(),
                error: WriteError::EmptySnapshot("Cellar".to_string()).into(),
            },
        ]);

        assert_eq!(err.kind(), "WriteError");
        insta::assert_snapshot!(
            err.to_string(),
            @"Room A: worksheet 'Room A' not found; Cellar: no properties recorded for device 'Cellar'"
        );
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(
            SnapshotError::from(ValidationError::Unauthorized).kind(),
            "ValidationError"
        );
        assert_eq!(
            SnapshotError::from(UpstreamError::MissingProperty {
                device: "d1".to_string(),
                name: "ep_9:sIT600TH:RunningState",
            })
            .kind(),
            "UpstreamError"
        );
    }

    #[test]
    fn test_decode_only_failures_are_upstream() {
        let err = SnapshotError::Devices(vec![DeviceFailure {
            device: "Room A".to_string(),
            error: UpstreamError::MissingProperty {
                device: "d1".to_string(),
                name: "ep_9:sIT600TH:RunningState",
            }
            .into(),
        }]);

        assert_eq!(err.kind(), "UpstreamError");
        insta::assert_snapshot!(
            err.to_string(),
            @"Room A: device d1 is missing required property 'ep_9:sIT600TH:RunningState'"
        );
    }
}
