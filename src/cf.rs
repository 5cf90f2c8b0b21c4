//! Cloud Foundry v2 API client.
//!
//! Lists applications through `/v2/apps`, following `next_url` until the
//! last page, and authenticates against the UAA token endpoint advertised by
//! `/v2/info`. Tokens are cached until shortly before they expire.

use ahash::AHashSet;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::app::{ApplicationRecord, LifecycleState};
use crate::source::{SnapshotError, SnapshotSource};

/// Tokens are refreshed this long before the reported expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Default OAuth client used by the `cf` CLI for password grants.
pub const DEFAULT_CLIENT_ID: &str = "cf";

pub const DEFAULT_RESULTS_PER_PAGE: u32 = 100;

/// Upper bound on pages followed for a single listing.
const MAX_PAGES: usize = 1000;

/// How the client authenticates against the platform.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Pre-issued bearer token, used as is.
    Token(String),
    Password {
        username: String,
        password: String,
        client_id: String,
        client_secret: String,
    },
    ClientCredentials {
        client_id: String,
        client_secret: String,
    },
}

#[derive(Debug, Clone)]
pub struct CfClientConfig {
    pub api_endpoint: String,
    pub credentials: Credentials,
    /// Raw `q` filters such as `space_guid:1234`.
    pub app_query: Vec<String>,
    pub request_timeout: Duration,
    pub skip_ssl_validation: bool,
    pub results_per_page: u32,
}

#[derive(Debug, Error)]
pub enum CfError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}: {body}")]
    Status { status: u16, url: String, body: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl From<CfError> for SnapshotError {
    fn from(e: CfError) -> Self {
        match e {
            CfError::Http(ref inner) if inner.is_timeout() => SnapshotError::Timeout,
            CfError::Http(inner) => SnapshotError::Request(inner.to_string()),
            CfError::Status { status, .. } if status == 401 || status == 403 => {
                SnapshotError::Auth(e.to_string())
            }
            CfError::Status { .. } => SnapshotError::Request(e.to_string()),
            CfError::Auth(msg) => SnapshotError::Auth(msg),
            CfError::Decode(msg) => SnapshotError::InvalidResponse(msg),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    token_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    next_url: Option<String>,
    #[serde(default = "Vec::new")]
    resources: Vec<Resource<T>>,
}

#[derive(Debug, Deserialize)]
struct Resource<T> {
    metadata: Metadata,
    entity: T,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    guid: String,
}

#[derive(Debug, Deserialize)]
struct AppEntity {
    name: String,
    space_guid: String,
    state: String,
    #[serde(default)]
    instances: u32,
}

impl From<Resource<AppEntity>> for ApplicationRecord {
    fn from(r: Resource<AppEntity>) -> Self {
        ApplicationRecord {
            guid: r.metadata.guid,
            name: r.entity.name,
            space: r.entity.space_guid,
            state: LifecycleState::from_platform(&r.entity.state),
            instances: r.entity.instances,
        }
    }
}

struct CachedToken {
    access_token: String,
    /// `None` for static tokens, which never expire client-side.
    refresh_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.refresh_at.map_or(true, |at| Instant::now() < at)
    }
}

/// Cloud Foundry API client used as the application snapshot source.
pub struct CfClient {
    http: reqwest::Client,
    config: CfClientConfig,
    token: Mutex<Option<CachedToken>>,
}

impl CfClient {
    pub fn new(config: CfClientConfig) -> Result<Self, CfError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.skip_ssl_validation)
            .user_agent(concat!("paas-prometheus-exporter/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            config,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_endpoint.trim_end_matches('/'), path)
    }

    async fn token_endpoint(&self) -> Result<String, CfError> {
        let url = self.url("/v2/info");
        let resp = self.http.get(&url).send().await?;
        let info: InfoResponse = decode(&url, resp).await?;
        Ok(info.token_endpoint)
    }

    async fn fetch_token(&self) -> Result<CachedToken, CfError> {
        let (form, client_id, client_secret) = match &self.config.credentials {
            Credentials::Token(token) => {
                return Ok(CachedToken {
                    access_token: token.clone(),
                    refresh_at: None,
                })
            }
            Credentials::Password {
                username,
                password,
                client_id,
                client_secret,
            } => (
                vec![
                    ("grant_type", "password"),
                    ("username", username.as_str()),
                    ("password", password.as_str()),
                ],
                client_id,
                client_secret,
            ),
            Credentials::ClientCredentials {
                client_id,
                client_secret,
            } => (
                vec![("grant_type", "client_credentials")],
                client_id,
                client_secret,
            ),
        };

        let url = format!(
            "{}/oauth/token",
            self.token_endpoint().await?.trim_end_matches('/')
        );
        let resp = self
            .http
            .post(&url)
            .basic_auth(client_id, Some(client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?;

        let token: TokenResponse = match decode(&url, resp).await {
            Ok(token) => token,
            Err(CfError::Status { status, body, .. }) => {
                return Err(CfError::Auth(format!("token request returned HTTP {status}: {body}")))
            }
            Err(e) => return Err(e),
        };

        debug!(expires_in = ?token.expires_in, "Obtained access token");
        Ok(CachedToken {
            access_token: token.access_token,
            refresh_at: token.expires_in.map(|secs| {
                Instant::now() + Duration::from_secs(secs).saturating_sub(TOKEN_EXPIRY_MARGIN)
            }),
        })
    }

    async fn access_token(&self) -> Result<String, CfError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.access_token.clone());
        }
        let token = self.fetch_token().await?;
        let access = token.access_token.clone();
        *cached = Some(token);
        Ok(access)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, CfError> {
        let token = self.access_token().await?;
        let resp = self
            .http
            .get(url)
            .query(query)
            .bearer_auth(token)
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            warn!(url, "Access token rejected, re-authenticating on next request");
            *self.token.lock().await = None;
        }
        decode(url, resp).await
    }

    /// Lists every application matching the configured query.
    #[instrument(skip(self))]
    pub async fn list_apps(&self) -> Result<Vec<ApplicationRecord>, CfError> {
        let per_page = self.config.results_per_page.to_string();
        let mut query: Vec<(&str, &str)> = vec![("results-per-page", per_page.as_str())];
        for q in &self.config.app_query {
            query.push(("q", q.as_str()));
        }

        let mut apps = Vec::new();
        let mut page: Page<AppEntity> = self.get_json(&self.url("/v2/apps"), &query).await?;
        let mut pages = 1usize;
        let mut seen = AHashSet::new();
        loop {
            let next = page.next_url.take();
            apps.extend(page.resources.into_iter().map(ApplicationRecord::from));
            let Some(next) = next else {
                break;
            };
            if pages >= MAX_PAGES {
                return Err(CfError::Decode(format!(
                    "application list exceeds {MAX_PAGES} pages"
                )));
            }
            if !seen.insert(next.clone()) {
                return Err(CfError::Decode(format!("next_url {next} was already visited")));
            }
            page = self.get_json(&self.url(&next), &[]).await?;
            pages += 1;
        }

        debug!(apps = apps.len(), pages, "Fetched application list");
        Ok(apps)
    }
}

#[async_trait]
impl SnapshotSource for CfClient {
    async fn list_applications(&self) -> Result<Vec<ApplicationRecord>, SnapshotError> {
        Ok(self.list_apps().await?)
    }
}

async fn decode<T: DeserializeOwned>(url: &str, resp: reqwest::Response) -> Result<T, CfError> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(CfError::Status {
            status: status.as_u16(),
            url: url.to_string(),
            body: body.chars().take(512).collect(),
        });
    }
    serde_json::from_str(&body).map_err(|e| CfError::Decode(format!("{url}: {e}")))
}
