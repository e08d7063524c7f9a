use super::model::{EntitySpec, SubscriptionRecord, SubscriptionSpec};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

/// Status the broker answers a create with when the resource already exists.
pub const ALREADY_EXISTS_STATUS: StatusCode = StatusCode::UNPROCESSABLE_ENTITY;

/// Result of a create call that reached the broker.
#[derive(Clone, Debug, PartialEq)]
pub enum CreateResponse {
    /// 2xx; `id` is the broker-assigned id from the `Location` header, if any
    Created { id: Option<String> },
    /// The "already exists" status
    AlreadyExists,
    /// Any other non-2xx status
    Rejected { status: u16, body: String },
}

/// Result of fetching one entity.
#[derive(Clone, Debug, PartialEq)]
pub enum EntityLookup {
    Found(Value),
    NotFound,
    Rejected { status: u16, body: String },
}

/// Broker call failures.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerError {
    /// Request never got a response (connect error, timeout)
    Transport(String),
    /// Non-2xx response where no status is expected
    Status { status: u16, body: String },
    /// Response body was not what the endpoint returns
    Decode(String),
    /// Entity id the broker would reject, or that would change the request path
    InvalidId(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::Transport(msg) => write!(f, "broker request failed: {}", msg),
            BrokerError::Status { status, body } => {
                write!(f, "broker returned status {}: {}", status, body)
            }
            BrokerError::Decode(msg) => write!(f, "invalid broker response: {}", msg),
            BrokerError::InvalidId(id) => write!(f, "invalid entity id: {:?}", id),
        }
    }
}

impl std::error::Error for BrokerError {}

/// Longest id the broker accepts.
const MAX_ID_LEN: usize = 256;

/// Characters the broker forbids in ids.
const FORBIDDEN_ID_CHARS: &[char] = &['<', '>', '"', '\'', '=', ';', '(', ')', '&', '?', '/', '#'];

/// Checks an entity id before it is placed in a request path.
///
/// Ids are 1 to 256 printable ASCII characters without whitespace or any of
/// `<>"'=;()&?/#`.
pub fn validate_entity_id(id: &str) -> Result<(), BrokerError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id.chars().all(|c| c.is_ascii_graphic() && !FORBIDDEN_ID_CHARS.contains(&c));
    if valid {
        Ok(())
    } else {
        Err(BrokerError::InvalidId(id.to_string()))
    }
}

/// Remote context-management service.
#[async_trait]
pub trait ContextBroker: Send + Sync {
    /// Liveness probe; independent of any subscription/entity state.
    async fn version(&self) -> Result<Value, BrokerError>;

    async fn create_subscription(
        &self,
        spec: &SubscriptionSpec,
    ) -> Result<CreateResponse, BrokerError>;

    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionRecord>, BrokerError>;

    /// Subscriptions of the default tenant, listed without tenant headers.
    async fn list_default_tenant_subscriptions(
        &self,
    ) -> Result<Vec<SubscriptionRecord>, BrokerError>;

    async fn create_entity(&self, spec: &EntitySpec) -> Result<CreateResponse, BrokerError>;

    async fn get_entity(&self, id: &str) -> Result<EntityLookup, BrokerError>;

    async fn patch_entity_attrs(
        &self,
        id: &str,
        attrs: &Map<String, Value>,
    ) -> Result<(), BrokerError>;

    async fn list_entities(&self) -> Result<Vec<Value>, BrokerError>;

    /// Where the broker is reached, for diagnostics.
    fn endpoint(&self) -> &str;
}

/// NGSIv2 client for an Orion context broker.
///
/// Every request carries the tenant headers and the client-wide timeout;
/// the liveness probe uses its own, shorter timeout.
pub struct OrionClient {
    base_url: String,
    service: String,
    service_path: String,
    liveness_timeout: Duration,
    http_client: Client,
}

impl OrionClient {
    pub fn new(
        base_url: String,
        service: String,
        service_path: String,
        timeout: Duration,
        liveness_timeout: Duration,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Orion HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service,
            service_path,
            liveness_timeout,
            http_client,
        })
    }

    fn tenant(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Fiware-Service", &self.service)
            .header("Fiware-ServicePath", &self.service_path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BrokerError> {
        self.tenant(request)
            .send()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))
    }

    async fn create(&self, path: &str, body: &Value) -> Result<CreateResponse, BrokerError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.send(self.http_client.post(&url).json(body)).await?;
        let status = response.status();

        if status.is_success() {
            let id = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|loc| loc.rsplit('/').next())
                .filter(|id| !id.is_empty())
                .map(|id| id.to_string());
            return Ok(CreateResponse::Created { id });
        }
        if status == ALREADY_EXISTS_STATUS {
            return Ok(CreateResponse::AlreadyExists);
        }
        Ok(CreateResponse::Rejected {
            status: status.as_u16(),
            body: read_body(response).await,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, BrokerError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .send(self.http_client.get(&url).header("Accept", "application/json"))
            .await?;
        decode_json(response).await
    }
}

/// Non-2xx becomes `BrokerError::Status`; a 2xx body is decoded as `T`.
async fn decode_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, BrokerError> {
    let status = response.status();
    if !status.is_success() {
        return Err(BrokerError::Status {
            status: status.as_u16(),
            body: read_body(response).await,
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| BrokerError::Decode(e.to_string()))
}

async fn read_body(response: Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read body>".to_string())
}

#[async_trait]
impl ContextBroker for OrionClient {
    async fn version(&self) -> Result<Value, BrokerError> {
        let url = format!("{}/version", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .timeout(self.liveness_timeout)
            .send()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        decode_json(response).await
    }

    async fn create_subscription(
        &self,
        spec: &SubscriptionSpec,
    ) -> Result<CreateResponse, BrokerError> {
        self.create("/v2/subscriptions", &spec.to_payload()).await
    }

    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionRecord>, BrokerError> {
        self.get_json("/v2/subscriptions").await
    }

    async fn list_default_tenant_subscriptions(
        &self,
    ) -> Result<Vec<SubscriptionRecord>, BrokerError> {
        let url = format!("{}/v2/subscriptions", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        decode_json(response).await
    }

    async fn create_entity(&self, spec: &EntitySpec) -> Result<CreateResponse, BrokerError> {
        self.create("/v2/entities", &spec.to_payload()).await
    }

    async fn get_entity(&self, id: &str) -> Result<EntityLookup, BrokerError> {
        validate_entity_id(id)?;
        let url = format!("{}/v2/entities/{}", self.base_url, id);
        let response = self
            .send(self.http_client.get(&url).header("Accept", "application/json"))
            .await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(EntityLookup::NotFound);
        }
        if !status.is_success() {
            return Ok(EntityLookup::Rejected {
                status: status.as_u16(),
                body: read_body(response).await,
            });
        }
        response
            .json::<Value>()
            .await
            .map(EntityLookup::Found)
            .map_err(|e| BrokerError::Decode(e.to_string()))
    }

    async fn patch_entity_attrs(
        &self,
        id: &str,
        attrs: &Map<String, Value>,
    ) -> Result<(), BrokerError> {
        validate_entity_id(id)?;
        let url = format!("{}/v2/entities/{}/attrs", self.base_url, id);
        let response = self.send(self.http_client.patch(&url).json(attrs)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BrokerError::Status {
                status: status.as_u16(),
                body: read_body(response).await,
            });
        }
        Ok(())
    }

    async fn list_entities(&self) -> Result<Vec<Value>, BrokerError> {
        self.get_json("/v2/entities").await
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }
}
