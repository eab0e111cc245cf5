//! OpenStack Platform Adapter
//!
//! Talks to two OpenStack services:
//! - Keystone: token issue and service catalog
//! - Manila: share type listing
//!
//! A cloud whose catalog has no share service endpoint is reported as
//! `ShareTypeListing::NotSupported` rather than as an error.

use crate::domain::ports::{ShareType, ShareTypeListing, ShareTypeSource};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Catalog type of the Manila v2 API
pub const SHARE_SERVICE_TYPE: &str = "sharev2";

const TOKEN_HEADER: &str = "X-Subject-Token";
const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Tokens are renewed this many seconds before Keystone expires them
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

// =============================================================================
// Configuration
// =============================================================================

/// Keystone credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Username and password scoped to a project
    Password {
        username: String,
        password: String,
        user_domain_name: String,
        project_name: Option<String>,
        project_id: Option<String>,
        project_domain_name: String,
    },
    /// Application credential, already scoped by Keystone
    ApplicationCredential { id: String, secret: String },
}

/// Endpoint interface picked from the service catalog
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interface {
    #[default]
    Public,
    Internal,
    Admin,
}

impl Interface {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interface::Public => "public",
            Interface::Internal => "internal",
            Interface::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Interface {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim_end_matches("URL") {
            "public" => Ok(Interface::Public),
            "internal" => Ok(Interface::Internal),
            "admin" => Ok(Interface::Admin),
            other => Err(Error::Configuration(format!(
                "unknown endpoint interface: {}",
                other
            ))),
        }
    }
}

/// Configuration for the OpenStack client
#[derive(Debug, Clone)]
pub struct OpenStackConfig {
    /// Keystone auth URL, with or without the `/v3` suffix
    pub auth_url: String,
    pub credentials: Credentials,
    /// Region to pick endpoints from; any region when unset
    pub region: Option<String>,
    pub interface: Interface,
    /// Per-request HTTP timeout
    pub timeout: Duration,
}

impl Default for OpenStackConfig {
    fn default() -> Self {
        Self {
            auth_url: "http://keystone:5000/v3".to_string(),
            credentials: Credentials::Password {
                username: "admin".to_string(),
                password: String::new(),
                user_domain_name: "Default".to_string(),
                project_name: Some("admin".to_string()),
                project_id: None,
                project_domain_name: "Default".to_string(),
            },
            region: None,
            interface: Interface::Public,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CloudsFile {
    #[serde(default)]
    clouds: BTreeMap<String, CloudEntry>,
}

#[derive(Debug, Deserialize)]
struct CloudEntry {
    auth: CloudAuth,
    #[serde(default)]
    region_name: Option<String>,
    #[serde(default)]
    interface: Option<String>,
    #[serde(default)]
    auth_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CloudAuth {
    auth_url: String,
    username: Option<String>,
    password: Option<String>,
    project_name: Option<String>,
    project_id: Option<String>,
    user_domain_name: Option<String>,
    project_domain_name: Option<String>,
    domain_name: Option<String>,
    application_credential_id: Option<String>,
    application_credential_secret: Option<String>,
}

impl OpenStackConfig {
    /// Parse the named cloud out of a `clouds.yaml` document
    pub fn from_clouds_yaml(yaml: &str, cloud: &str) -> Result<Self> {
        let mut file: CloudsFile = serde_yaml::from_str(yaml)?;
        let entry = file.clouds.remove(cloud).ok_or_else(|| {
            Error::Configuration(format!("cloud {} not found in clouds.yaml", cloud))
        })?;

        if entry.auth.auth_url.is_empty() {
            return Err(Error::Configuration(format!(
                "cloud {} has no auth_url",
                cloud
            )));
        }

        let interface = match entry.interface.as_deref() {
            Some(interface) => interface.parse()?,
            None => Interface::Public,
        };

        let auth = entry.auth;
        let use_app_credential = entry.auth_type.as_deref() == Some("v3applicationcredential")
            || auth.application_credential_id.is_some();

        let credentials = if use_app_credential {
            match (auth.application_credential_id, auth.application_credential_secret) {
                (Some(id), Some(secret)) => Credentials::ApplicationCredential { id, secret },
                _ => {
                    return Err(Error::Configuration(format!(
                        "cloud {} needs application_credential_id and application_credential_secret",
                        cloud
                    )))
                }
            }
        } else {
            let (Some(username), Some(password)) = (auth.username, auth.password) else {
                return Err(Error::Configuration(format!(
                    "cloud {} needs username and password",
                    cloud
                )));
            };
            if auth.project_name.is_none() && auth.project_id.is_none() {
                return Err(Error::Configuration(format!(
                    "cloud {} needs project_name or project_id",
                    cloud
                )));
            }
            let fallback_domain = auth.domain_name.unwrap_or_else(|| "Default".to_string());
            Credentials::Password {
                username,
                password,
                user_domain_name: auth
                    .user_domain_name
                    .unwrap_or_else(|| fallback_domain.clone()),
                project_name: auth.project_name,
                project_id: auth.project_id,
                project_domain_name: auth.project_domain_name.unwrap_or(fallback_domain),
            }
        };

        Ok(Self {
            auth_url: auth.auth_url,
            credentials,
            region: entry.region_name,
            interface,
            ..Default::default()
        })
    }

    /// Read and parse a `clouds.yaml` file
    pub fn from_clouds_file(path: impl AsRef<Path>, cloud: &str) -> Result<Self> {
        let yaml = std::fs::read_to_string(path.as_ref())?;
        Self::from_clouds_yaml(&yaml, cloud)
    }

    /// Keystone token endpoint
    pub fn tokens_url(&self) -> String {
        let base = self.auth_url.trim_end_matches('/');
        if base.ends_with("/v3") {
            format!("{}/auth/tokens", base)
        } else {
            format!("{}/v3/auth/tokens", base)
        }
    }
}

// =============================================================================
// Keystone Wire Types
// =============================================================================

/// Request body for `POST /v3/auth/tokens`
fn auth_request(credentials: &Credentials) -> Value {
    match credentials {
        Credentials::Password {
            username,
            password,
            user_domain_name,
            project_name,
            project_id,
            project_domain_name,
        } => {
            let project = match project_id {
                Some(id) => json!({ "id": id }),
                None => json!({
                    "name": project_name,
                    "domain": { "name": project_domain_name },
                }),
            };
            json!({
                "auth": {
                    "identity": {
                        "methods": ["password"],
                        "password": {
                            "user": {
                                "name": username,
                                "domain": { "name": user_domain_name },
                                "password": password,
                            }
                        }
                    },
                    "scope": { "project": project }
                }
            })
        }
        Credentials::ApplicationCredential { id, secret } => json!({
            "auth": {
                "identity": {
                    "methods": ["application_credential"],
                    "application_credential": { "id": id, "secret": secret }
                }
            }
        }),
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    expires_at: DateTime<Utc>,
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogEndpoint {
    interface: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    region_id: Option<String>,
    url: String,
}

/// Find the URL of `service_type` for the given region and interface
fn find_endpoint(
    catalog: &[CatalogEntry],
    service_type: &str,
    region: Option<&str>,
    interface: Interface,
) -> Option<String> {
    catalog
        .iter()
        .filter(|entry| entry.service_type == service_type)
        .flat_map(|entry| entry.endpoints.iter())
        .filter(|ep| ep.interface == interface.as_str())
        .find(|ep| match region {
            Some(region) => {
                ep.region_id.as_deref() == Some(region) || ep.region.as_deref() == Some(region)
            }
            None => true,
        })
        .map(|ep| ep.url.trim_end_matches('/').to_string())
}

#[derive(Debug, Deserialize)]
struct ShareTypesResponse {
    share_types: Vec<ShareType>,
}

// =============================================================================
// Token Cache
// =============================================================================

/// Token plus the share endpoint resolved from its catalog
#[derive(Debug, Clone)]
struct Session {
    token: String,
    expires_at: DateTime<Utc>,
    share_endpoint: Option<String>,
}

impl Session {
    fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - ChronoDuration::seconds(TOKEN_EXPIRY_MARGIN_SECS) > now
    }
}

// =============================================================================
// OpenStack Client
// =============================================================================

/// Keystone-authenticated client for the Manila share type API
pub struct OpenStackClient {
    config: OpenStackConfig,
    http: reqwest::Client,
    session: RwLock<Option<Session>>,
}

impl OpenStackClient {
    /// Create a new client
    pub fn new(config: OpenStackConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        info!("OpenStack client for {}", config.auth_url);
        Ok(Self {
            config,
            http,
            session: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &OpenStackConfig {
        &self.config
    }

    /// Drop the cached token so the next call authenticates again
    pub async fn invalidate_token(&self) {
        *self.session.write().await = None;
    }

    async fn session(&self) -> Result<Session> {
        if let Some(session) = self.session.read().await.as_ref() {
            if session.is_valid(Utc::now()) {
                return Ok(session.clone());
            }
        }

        let mut cached = self.session.write().await;
        if let Some(session) = cached.as_ref() {
            if session.is_valid(Utc::now()) {
                return Ok(session.clone());
            }
        }

        let session = self.authenticate().await?;
        *cached = Some(session.clone());
        Ok(session)
    }

    async fn authenticate(&self) -> Result<Session> {
        let url = self.config.tokens_url();
        debug!("Requesting Keystone token from {}", url);

        let response = self
            .http
            .post(&url)
            .json(&auth_request(&self.config.credentials))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::OpenStackAuth(format!("Keystone returned {}: {}", status, body)));
        }

        let token = response
            .headers()
            .get(TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::OpenStackAuth(format!("response has no {} header", TOKEN_HEADER)))?;

        let body: TokenResponse = response.json().await?;
        let share_endpoint = find_endpoint(
            &body.token.catalog,
            SHARE_SERVICE_TYPE,
            self.config.region.as_deref(),
            self.config.interface,
        );
        match &share_endpoint {
            Some(endpoint) => debug!("Share service endpoint: {}", endpoint),
            None => debug!("No {} endpoint in service catalog", SHARE_SERVICE_TYPE),
        }

        Ok(Session {
            token,
            expires_at: body.token.expires_at,
            share_endpoint,
        })
    }
}

#[async_trait]
impl ShareTypeSource for OpenStackClient {
    async fn list_share_types(&self) -> Result<ShareTypeListing> {
        let session = self.session().await?;
        let Some(endpoint) = session.share_endpoint else {
            return Ok(ShareTypeListing::NotSupported);
        };

        let response = self
            .http
            .get(format!("{}/types", endpoint))
            .header(AUTH_TOKEN_HEADER, &session.token)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let body: ShareTypesResponse = response.json().await?;
                debug!("Manila returned {} share types", body.share_types.len());
                Ok(ShareTypeListing::Available(body.share_types))
            }
            StatusCode::UNAUTHORIZED => {
                warn!("Manila rejected the token, re-authenticating on next call");
                self.invalidate_token().await;
                Err(Error::OpenStackAuth("Manila rejected the token".to_string()))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::OpenStackApi {
                    service: "manila".to_string(),
                    reason: format!("listing share types returned {}: {}", status, body),
                })
            }
        }
    }
}
