//! Google Sheets row sink.
//!
//! Authenticates as a service account (RS256-signed JWT exchanged for an
//! OAuth access token) and appends rows with `values:append`.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::Algorithm;
use jsonwebtoken::EncodingKey;
use jsonwebtoken::Header;
use reqwest::StatusCode;
use reqwest::Url;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use tracing::debug;
use tracing::info;

use crate::config::SheetsConfig;
use crate::error::WriteError;
use crate::snapshot::RowSink;
use crate::token::Token;
use crate::token::TokenCache;

/// Environment fallback holding the service-account JSON.
pub const ENV_SERVICE_ACCOUNT: &str = "GSPREAD_SA";
/// Environment override for the key's `private_key`, with `\n` escaped.
pub const ENV_SERVICE_ACCOUNT_KEY: &str = "GSPREAD_SA_KEY";

const SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// The fields of a Google service-account key file that signing needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("Failed to parse service-account key")
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read service-account key {}", path.display()))?;
        Self::from_json(&json)
    }

    /// Load from `GSPREAD_SA`, letting `GSPREAD_SA_KEY` replace the private
    /// key (secret stores often flatten newlines to a literal `\n`).
    pub fn from_env() -> anyhow::Result<Self> {
        let json = std::env::var(ENV_SERVICE_ACCOUNT)
            .with_context(|| format!("{} is not set", ENV_SERVICE_ACCOUNT))?;
        let mut key = Self::from_json(&json)?;
        if let Ok(private_key) = std::env::var(ENV_SERVICE_ACCOUNT_KEY) {
            key.private_key = unescape_newlines(&private_key);
        }
        Ok(key)
    }

    /// Key file from config, falling back to the environment.
    pub fn load(config: &SheetsConfig) -> anyhow::Result<Self> {
        match &config.service_account_key {
            Some(path) => Self::from_file(path),
            None => Self::from_env(),
        }
    }
}

fn unescape_newlines(s: &str) -> String {
    s.replace("\\n", "\n")
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Spreadsheet sink backed by the Sheets v4 REST API.
pub struct GoogleSheets {
    http: reqwest::Client,
    api_base: Url,
    spreadsheet_id: String,
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    tokens: TokenCache,
}

impl GoogleSheets {
    pub fn new(config: &SheetsConfig, key: ServiceAccountKey) -> anyhow::Result<Self> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .context("Service-account private key is not a valid RSA PEM")?;

        let api_base = Url::parse(&config.api_base)
            .with_context(|| format!("Invalid Sheets API base {}", config.api_base))?;
        if api_base.cannot_be_a_base() {
            anyhow::bail!("Sheets API base {} cannot carry a path", config.api_base);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build Sheets HTTP client")?;

        info!(
            "Using spreadsheet {} as {}",
            config.display_name(),
            key.client_email
        );

        Ok(Self {
            http,
            api_base,
            spreadsheet_id: config.spreadsheet_id.clone(),
            key,
            signing_key,
            tokens: TokenCache::new(),
        })
    }

    fn sign_assertion(&self) -> Result<String, WriteError> {
        let iat = Utc::now().timestamp();
        let claims = Claims {
            iss: self.key.client_email.clone(),
            scope: SCOPE.to_string(),
            aud: self.key.token_uri.clone(),
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| WriteError::Credentials(format!("failed to sign assertion: {}", e)))
    }

    async fn exchange_assertion(&self) -> Result<Token, WriteError> {
        let assertion = self.sign_assertion()?;

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| WriteError::Credentials(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WriteError::Credentials(format!(
                "token endpoint returned HTTP {}",
                status
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| WriteError::Credentials(format!("malformed token response: {}", e)))?;
        debug!(expires_in = body.expires_in, "Obtained Sheets access token");

        let expires_in = body.expires_in;
        Token::expiring_in(body.access_token, expires_in, Utc::now()).ok_or_else(|| {
            WriteError::Credentials(format!("token expires_in {} out of range", expires_in))
        })
    }

    async fn access_token(&self) -> Result<Token, WriteError> {
        self.tokens
            .get_or_refresh(|| self.exchange_assertion())
            .await
    }

    fn append_url(&self, worksheet: &str) -> Url {
        let mut url = self.api_base.clone();
        // `new` rejects bases that cannot carry a path.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend([
                "v4",
                "spreadsheets",
                self.spreadsheet_id.as_str(),
                "values",
                format!("{}:append", a1_range(worksheet)).as_str(),
            ]);
        }
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");
        url
    }
}

/// A1 range addressing the top-left cell of `worksheet`.
fn a1_range(worksheet: &str) -> String {
    format!("'{}'!A1", worksheet.replace('\'', "''"))
}

#[async_trait]
impl RowSink for GoogleSheets {
    async fn append_row(&self, worksheet: &str, row: Vec<Value>) -> Result<(), WriteError> {
        let token = self.access_token().await?;
        let url = self.append_url(worksheet);

        let response = self
            .http
            .post(url)
            .bearer_auth(&token.value)
            .json(&json!({ "values": [row] }))
            .send()
            .await
            .map_err(|source| WriteError::Transport {
                worksheet: worksheet.to_string(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED {
            // Revoked or rotated key; make the next append sign in again.
            self.tokens.invalidate().await;
        }
        if status == StatusCode::BAD_REQUEST && body.contains("Unable to parse range") {
            return Err(WriteError::MissingWorksheet(worksheet.to_string()));
        }

        Err(WriteError::Rejected {
            worksheet: worksheet.to_string(),
            status,
            body,
        })
    }
}
