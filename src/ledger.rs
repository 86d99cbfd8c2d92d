//! Ledger node client
//!
//! Submits solved tickets to the ledger node over JSON-RPC 1.0:
//!
//! ```json
//! {"jsonrpc":"1.0","id":"<uuid>","method":"broadcastsupportticket","params":["<176 hex chars>"]}
//! ```
//!
//! The submission is accepted when the response's `error` member is null or
//! absent. Every other outcome (transport failure, non-JSON body, RPC error
//! object) is reported as a rejected [`BroadcastOutcome`], never as an `Err`.

use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Default JSON-RPC method for ticket submission
pub const DEFAULT_METHOD: &str = "broadcastsupportticket";

/// Result of a broadcast attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastOutcome {
    pub accepted: bool,
    pub error_message: Option<String>,
}

impl BroadcastOutcome {
    /// The node accepted the ticket
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            error_message: None,
        }
    }

    /// The ticket was not accepted
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            error_message: Some(message.into()),
        }
    }
}

/// Anything that can hand a solved ticket to a ledger
#[async_trait]
pub trait SolutionBroadcaster: Send + Sync {
    /// Submit the hex-encoded header
    async fn broadcast(&self, ticket_hex: &str) -> BroadcastOutcome;
}

/// JSON-RPC 1.0 request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    pub params: Vec<Value>,
}

impl RpcRequest {
    /// Build a request with a fresh id
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "1.0".to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

/// Basic-auth credentials for the ledger node
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    /// Both parts must be non-empty for a client to be built
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Option<Self> {
        let user = user.into();
        let password = password.into();
        if user.is_empty() || password.is_empty() {
            None
        } else {
            Some(Self { user, password })
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_retries: usize,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_retries: 3,
        }
    }
}

/// Build the node endpoint from host and port
pub fn endpoint_url(host: &str, port: u16) -> String {
    format!("http://{}:{}/", host, port)
}

/// Ledger node JSON-RPC client
pub struct LedgerClient {
    client: Client,
    endpoint: Url,
    credentials: Credentials,
    method: String,
    backoff_config: BackoffConfig,
}

impl LedgerClient {
    /// Create a new ledger client
    pub fn new(endpoint: impl AsRef<str>, credentials: Credentials, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint.as_ref())
            .map_err(|e| Error::config(format!("Invalid ledger URL: {}", e)))?;

        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(Error::from)?;

        Ok(Self {
            client,
            endpoint,
            credentials,
            method: DEFAULT_METHOD.to_string(),
            backoff_config: BackoffConfig::default(),
        })
    }

    /// Use a different RPC method name
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Set custom backoff configuration
    pub fn with_backoff_config(mut self, config: BackoffConfig) -> Self {
        self.backoff_config = config;
        self
    }

    /// Node endpoint
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Send the submission and interpret the response
    async fn submit(&self, ticket_hex: &str) -> Result<BroadcastOutcome> {
        let request = RpcRequest::new(&self.method, vec![Value::String(ticket_hex.to_string())]);
        debug!(id = %request.id, method = %request.method, "Sending ticket to ledger node");

        let response = self.post_with_retry(&request).await?;
        let status = response.status();
        let body = response.text().await?;

        let parsed: RpcResponse = serde_json::from_str(&body).map_err(|e| {
            Error::ledger(format!("Non-JSON response (HTTP {}): {}", status, e))
        })?;

        match parsed.error {
            None | Some(Value::Null) => Ok(BroadcastOutcome::accepted()),
            Some(error) => Ok(BroadcastOutcome::rejected(describe_rpc_error(&error))),
        }
    }

    /// POST request with exponential backoff retry.
    ///
    /// Only connect failures are retried. A timed-out request may already
    /// have reached the node, and broadcasting a ticket twice is not
    /// harmless. Any HTTP response is returned as-is, since JSON-RPC nodes
    /// report errors with non-2xx statuses and a JSON body.
    async fn post_with_retry(&self, request: &RpcRequest) -> Result<Response> {
        let mut delay = self.backoff_config.initial_delay;
        let mut attempts = 0;

        loop {
            let result = self
                .client
                .post(self.endpoint.clone())
                .basic_auth(&self.credentials.user, Some(&self.credentials.password))
                .json(request)
                .send()
                .await;

            match result {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if !e.is_connect() || attempts >= self.backoff_config.max_retries {
                        return Err(Error::from(e));
                    }
                }
            }

            warn!(
                "Ledger request failed, retrying in {:?} (attempt {}/{})",
                delay,
                attempts + 1,
                self.backoff_config.max_retries
            );
            sleep(delay).await;

            delay = Duration::from_millis(
                ((delay.as_millis() as f64) * self.backoff_config.multiplier) as u64,
            )
            .min(self.backoff_config.max_delay);

            attempts += 1;
        }
    }
}

#[async_trait]
impl SolutionBroadcaster for LedgerClient {
    #[instrument(skip(self, ticket_hex), fields(endpoint = %self.endpoint))]
    async fn broadcast(&self, ticket_hex: &str) -> BroadcastOutcome {
        match self.submit(ticket_hex).await {
            Ok(outcome) => {
                if outcome.accepted {
                    info!("Ticket accepted by ledger node");
                } else {
                    warn!(error = ?outcome.error_message, "Ticket rejected by ledger node");
                }
                outcome
            }
            Err(e) => {
                warn!(category = e.category(), "Ticket broadcast failed: {}", e);
                BroadcastOutcome::rejected(e.to_string())
            }
        }
    }
}

/// Render an RPC error object as `message (code N)` when it has that shape
fn describe_rpc_error(error: &Value) -> String {
    match (error.get("message").and_then(Value::as_str), error.get("code")) {
        (Some(message), Some(code)) => format!("{} (code {})", message, code),
        (Some(message), None) => message.to_string(),
        _ => error.to_string(),
    }
}
