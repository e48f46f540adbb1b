use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use reqwest::header;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use tracing::debug;
use tracing::info;

use super::model::DatapointsResponse;
use super::model::DeviceEntry;
use super::model::MappedDevice;
use super::model::RawDevice;
use super::model::SignInRequest;
use super::model::SignInResponse;
use super::model::SignInUser;
use super::model::join_identities;
use super::property::PropertyKey;
use crate::config::VendorConfig;
use crate::error::AuthError;
use crate::error::UpstreamError;
use crate::token::Token;
use crate::token::TokenCache;

const DEVICES_ENDPOINT: &str = "devices";
const DATAPOINTS_ENDPOINT: &str = "datapoints";

/// Client for the Salus cloud API.
///
/// Holds the vendor credentials and a token cache; construct once per
/// process and share behind an `Arc`.
pub struct SalusClient {
    http: reqwest::Client,
    base_url: String,
    group_id: u64,
    email: String,
    password: String,
    properties: Vec<PropertyKey>,
    tokens: TokenCache,
}

impl SalusClient {
    pub fn new(config: &VendorConfig) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.insecure_tls)
            .build()?;

        if config.insecure_tls {
            tracing::warn!("TLS certificate verification disabled for {}", config.base_url);
        }

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            group_id: config.group_id,
            email: config.email.clone(),
            password: config.password.clone(),
            properties: config.properties.clone(),
            tokens: TokenCache::new(),
        })
    }

    /// Properties requested on every datapoints fetch.
    pub fn properties(&self) -> &[PropertyKey] {
        &self.properties
    }

    /// Obtain a fresh access token for the given account.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Token, AuthError> {
        let body = SignInRequest {
            user: SignInUser { email, password },
        };

        let response = self
            .http
            .post(format!("{}/users/sign_in.json", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(AuthError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Rejected { status });
        }

        let signed_in: SignInResponse = response.json().await.map_err(AuthError::Malformed)?;
        info!(expires_in = signed_in.expires_in, "Signed in to Salus");

        Token::expiring_in(signed_in.access_token, signed_in.expires_in, Utc::now())
            .ok_or(AuthError::InvalidExpiry(signed_in.expires_in))
    }

    /// Return the cached token, signing in again when it is missing or
    /// about to expire.
    pub async fn token(&self) -> Result<Token, AuthError> {
        self.tokens
            .get_or_refresh(|| self.authenticate(&self.email, &self.password))
            .await
    }

    /// Map of vendor device key to display name.
    pub async fn fetch_device_identities(
        &self,
        token: &Token,
    ) -> Result<HashMap<String, String>, UpstreamError> {
        let response = self
            .http
            .get(format!("{}/apiv1/devices.json", self.base_url))
            .header(header::AUTHORIZATION, auth_header(token))
            .send()
            .await
            .map_err(|source| UpstreamError::Transport {
                endpoint: DEVICES_ENDPOINT,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                endpoint: DEVICES_ENDPOINT,
                status,
            });
        }

        let devices: Vec<DeviceEntry> =
            response
                .json()
                .await
                .map_err(|source| UpstreamError::Shape {
                    endpoint: DEVICES_ENDPOINT,
                    source,
                })?;

        debug!("Fetched {} device identities", devices.len());

        Ok(devices
            .into_iter()
            .map(|entry| (entry.device.key, entry.device.product_name))
            .collect())
    }

    /// Raw datapoints for every device in the configured group.
    ///
    /// Decoding is left to the caller so one odd device in the group cannot
    /// fail the whole read.
    pub async fn fetch_device_properties(
        &self,
        token: &Token,
    ) -> Result<Vec<RawDevice>, UpstreamError> {
        let query: Vec<(&str, &str)> = self
            .properties
            .iter()
            .map(|key| ("property_names[]", key.name()))
            .collect();

        let response = self
            .http
            .get(format!(
                "{}/apiv1/groups/{}/datapoints.json",
                self.base_url, self.group_id
            ))
            .header(header::AUTHORIZATION, auth_header(token))
            .query(&query)
            .send()
            .await
            .map_err(|source| UpstreamError::Transport {
                endpoint: DATAPOINTS_ENDPOINT,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                endpoint: DATAPOINTS_ENDPOINT,
                status,
            });
        }

        let body: DatapointsResponse =
            response
                .json()
                .await
                .map_err(|source| UpstreamError::Shape {
                    endpoint: DATAPOINTS_ENDPOINT,
                    source,
                })?;

        Ok(body.datapoints.devices.device)
    }

    /// Fetch identities and datapoints concurrently and join them by id.
    ///
    /// Devices whose id has no identity are dropped before decoding.
    pub async fn fetch_mapped_properties(
        &self,
        token: &Token,
    ) -> Result<Vec<MappedDevice>, UpstreamError> {
        let (identities, devices) = tokio::try_join!(
            self.fetch_device_identities(token),
            self.fetch_device_properties(token),
        )?;

        Ok(join_identities(devices, &identities))
    }
}

fn auth_header(token: &Token) -> String {
    format!("auth_token {}", token.value)
}
