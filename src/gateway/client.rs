//! Client for one gateway device.
//!
//! The device speaks two dialects: a protobuf-framed RPC under
//! `/tedapi` for signed named queries and config-file transfers, and a
//! legacy JSON API under `/api` guarded by a bearer token. The device
//! presents a self-signed certificate, so TLS verification is disabled
//! for this client only.

use super::device_controller::DeviceControllerResponse;
use super::proto::{
    config_type, participant, ConfigString, ConfigType, Format, MessageEnvelope, ParentMessage,
    Participant, PayloadConfigRecv, PayloadConfigSend, PayloadQuerySend, PayloadString, QueryType,
    StringValue, Tail,
};
use super::queries;
use super::site_config::SiteConfigResponse;
use anyhow::{anyhow, bail, Context, Result};
use prost::Message;
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tracing::{error, info, warn};

/// Basic-auth user the device expects on `/tedapi` requests.
const TEDAPI_USER: &str = "Tesla_Energy_Device";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug)]
pub struct GatewayClient {
    pub endpoint: Url,
    /// Device identification number, fetched once at construction.
    pub din: String,
    password: String,
    http: reqwest::Client,
    auth_token: RwLock<Option<String>>,
    /// Serializes token refresh so concurrent queries cannot stampede
    /// the device with logins.
    refresh_sem: Semaphore,
    /// Serializes the single re-authentication retry after a 401/403.
    auth_sem: Semaphore,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    token: String,
}

impl GatewayClient {
    /// Parse and validate the endpoint, then fetch the DIN the RPC
    /// envelope addresses.
    pub async fn connect(endpoint: &str, password: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .with_context(|| format!("invalid gateway endpoint: {}", endpoint))?;
        if endpoint.host_str().is_none() {
            bail!("gateway endpoint has no host: {}", endpoint);
        }

        let http = reqwest::Client::builder()
            // The device only serves its self-signed certificate.
            .danger_accept_invalid_certs(true)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build gateway http client")?;

        let mut client = Self {
            endpoint,
            din: String::new(),
            password: password.to_string(),
            http,
            auth_token: RwLock::new(None),
            refresh_sem: Semaphore::new(1),
            auth_sem: Semaphore::new(1),
        };

        let din = client.fetch_din().await.context("failed to get DIN")?;
        client.din = din;
        info!(din = %client.din, "connected to gateway");
        Ok(client)
    }

    async fn ted_request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Vec<u8>> {
        let url = self
            .endpoint
            .join(&format!("tedapi/{}", path))
            .context("invalid tedapi path")?;
        let mut request = self
            .http
            .request(method, url)
            .header("Content-Type", "application/octet-string")
            .basic_auth(TEDAPI_USER, Some(&self.password));
        if let Some(body) = body {
            request = request.body(body);
        }
        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            bail!("gateway returned {} for tedapi/{}", status, path);
        }
        Ok(bytes.to_vec())
    }

    async fn fetch_din(&self) -> Result<String> {
        let raw = self.ted_request(Method::GET, "din", None).await?;
        let din = String::from_utf8(raw).context("DIN is not valid UTF-8")?;
        let din = din.trim().to_string();
        if din.is_empty() {
            bail!("device returned an empty DIN");
        }
        Ok(din)
    }

    fn envelope(&self) -> MessageEnvelope {
        MessageEnvelope {
            delivery_channel: 1,
            sender: Some(Participant {
                id: Some(participant::Id::Local(1)),
            }),
            recipient: Some(Participant {
                id: Some(participant::Id::Din(self.din.clone())),
            }),
            config: None,
            payload: None,
        }
    }

    /// Fetch the device's `config.json` through the config-transfer
    /// envelope. Returns the raw JSON text, or None on any failure.
    pub async fn get_config(&self) -> Option<String> {
        let mut envelope = self.envelope();
        envelope.config = Some(ConfigType {
            config: Some(config_type::Config::Send(PayloadConfigSend {
                num: 1,
                file: "config.json".to_string(),
            })),
        });
        let pm = ParentMessage {
            message: Some(envelope),
            tail: Some(Tail { value: 1 }),
        };

        let response = match self
            .ted_request(Method::POST, "v1", Some(pm.encode_to_vec()))
            .await
        {
            Ok(response) => response,
            Err(err) => {
                error!(%err, "failed to get config");
                return None;
            }
        };

        let parent = match ParentMessage::decode(response.as_slice()) {
            Ok(parent) => parent,
            Err(err) => {
                error!(%err, "failed to decode config response");
                return None;
            }
        };

        let recv: Option<PayloadConfigRecv> =
            parent.message.and_then(|m| m.config).and_then(|c| match c.config {
                Some(config_type::Config::Recv(recv)) => Some(recv),
                _ => None,
            });
        let file: Option<ConfigString> = recv.and_then(|r| r.file);
        match file {
            Some(file) => Some(file.text),
            None => {
                warn!("config response carried no file");
                None
            }
        }
    }

    /// Run a named query from the catalog. Network and decode problems
    /// are logged and collapse to None; the caller treats that as
    /// transient and retries on the next cycle. An empty `payload.recv`
    /// means "no data this cycle", not an error.
    pub async fn run_query(&self, name: &str, params: Option<&str>) -> Option<String> {
        let query = match queries::get_query(name) {
            Some(query) => query,
            None => {
                info!(query = name, "query not found");
                return None;
            }
        };

        let body = match params {
            Some(params) if !params.is_empty() => params.to_string(),
            _ => query.default_params.unwrap_or("{}").to_string(),
        };

        let mut envelope = self.envelope();
        envelope.payload = Some(QueryType {
            send: Some(PayloadQuerySend {
                request_format: Format::Json as i32,
                payload: Some(PayloadString {
                    value: query.key,
                    text: query.text.to_string(),
                }),
                body: Some(StringValue { value: body }),
                signature: query.signature(),
            }),
            recv: None,
        });
        let pm = ParentMessage {
            message: Some(envelope),
            tail: Some(Tail { value: 1 }),
        };

        let response = match self
            .ted_request(Method::POST, "v1", Some(pm.encode_to_vec()))
            .await
        {
            Ok(response) => response,
            Err(err) => {
                error!(%err, query = name, "failed to run query");
                return None;
            }
        };

        let parent = match ParentMessage::decode(response.as_slice()) {
            Ok(parent) => parent,
            Err(err) => {
                error!(%err, query = name, "failed to decode query response");
                return None;
            }
        };

        match parent.message.and_then(|m| m.payload).and_then(|p| p.recv) {
            Some(recv) => Some(recv.text),
            None => {
                info!(query = name, "query response payload is empty");
                None
            }
        }
    }

    /// `run_query("DeviceControllerQuery")` parsed into the device tree.
    pub async fn fetch_controller(&self) -> Result<DeviceControllerResponse> {
        let raw = self
            .run_query("DeviceControllerQuery", None)
            .await
            .ok_or_else(|| anyhow!("failed to run DeviceControllerQuery"))?;
        serde_json::from_str(&raw).context("failed to parse device controller response")
    }

    /// Config-file envelope parsed into the site and tariff tree.
    pub async fn fetch_config(&self) -> Result<SiteConfigResponse> {
        let raw = self
            .get_config()
            .await
            .ok_or_else(|| anyhow!("failed to fetch gateway config"))?;
        serde_json::from_str(&raw).context("failed to parse gateway config")
    }

    async fn login(&self) -> Result<String> {
        let url = self
            .endpoint
            .join("api/login/Basic")
            .context("invalid login path")?;
        let response = self
            .http
            .post(url)
            .json(&serde_json::json!({
                "username": "customer",
                "password": self.password,
                "email": "gridpulse@localhost",
                "force_sm_off": false,
            }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            bail!("login failed with {}", status);
        }
        let login: LoginResponse = response.json().await.context("bad login response")?;
        if login.token.is_empty() {
            bail!("login response carried no token");
        }
        Ok(login.token)
    }

    /// Refresh the bearer token, serialized so a flood of concurrent
    /// requests performs a single login.
    async fn refresh_token(&self) -> Result<String> {
        let _permit = self
            .refresh_sem
            .acquire()
            .await
            .map_err(|_| anyhow!("gateway client is shutting down"))?;

        // Another task may have refreshed while this one waited.
        if let Some(token) = self.auth_token.read().await.clone() {
            return Ok(token);
        }

        let token = self.login().await?;
        *self.auth_token.write().await = Some(token.clone());
        Ok(token)
    }

    async fn api_request_with_token(
        &self,
        method: &Method,
        path: &str,
        token: &str,
    ) -> Result<reqwest::Response> {
        let url = self
            .endpoint
            .join(&format!("api/{}", path))
            .context("invalid api path")?;
        Ok(self
            .http
            .request(method.clone(), url)
            .bearer_auth(token)
            .send()
            .await?)
    }

    /// Request against the legacy JSON API. A 401/403 triggers exactly
    /// one re-login and retry, serialized across callers.
    pub async fn api_request(&self, method: Method, path: &str) -> Result<Vec<u8>> {
        let token = match self.auth_token.read().await.clone() {
            Some(token) => token,
            None => self.refresh_token().await?,
        };

        let response = self.api_request_with_token(&method, path, &token).await?;
        let status = response.status();
        if status != StatusCode::UNAUTHORIZED && status != StatusCode::FORBIDDEN {
            if !status.is_success() {
                bail!("gateway returned {} for api/{}", status, path);
            }
            return Ok(response.bytes().await?.to_vec());
        }

        let _permit = self
            .auth_sem
            .acquire()
            .await
            .map_err(|_| anyhow!("gateway client is shutting down"))?;
        warn!(path, "token rejected, re-authenticating");
        *self.auth_token.write().await = None;
        let token = self.refresh_token().await?;

        let response = self.api_request_with_token(&method, path, &token).await?;
        let status = response.status();
        if !status.is_success() {
            bail!("gateway returned {} for api/{} after re-auth", status, path);
        }
        Ok(response.bytes().await?.to_vec())
    }
}
