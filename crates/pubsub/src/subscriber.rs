use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::broker::{Broker, ReceivedMessage};
use crate::error::{Error, Result};

/// Production Pub/Sub endpoint
pub const DEFAULT_ENDPOINT: &str = "https://pubsub.googleapis.com";

/// Configuration for a Pub/Sub pull subscriber
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// REST endpoint, e.g. `https://pubsub.googleapis.com` or `http://localhost:8085`
    /// for the emulator
    pub endpoint: String,
    /// Full subscription path: `projects/{project}/subscriptions/{subscription}`
    pub subscription: String,
    /// OAuth2 bearer token. The emulator does not need one.
    pub access_token: Option<String>,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            subscription: "".to_string(),
            access_token: None,
        }
    }
}

/// Resolve a subscription given either as a full path or as a short name plus project.
///
/// ```
/// use nest_sync_pubsub::subscription_path;
///
/// assert_eq!(
///     subscription_path(Some("my-proj"), "events-sub").unwrap(),
///     "projects/my-proj/subscriptions/events-sub"
/// );
/// ```
pub fn subscription_path(project: Option<&str>, subscription: &str) -> Result<String> {
    let subscription = subscription.trim();
    if subscription.is_empty() {
        return Err(Error::InvalidConfig("subscription must not be empty".to_string()));
    }

    if subscription.starts_with("projects/") {
        let parts: Vec<&str> = subscription.split('/').collect();
        if parts.len() != 4 || parts[2] != "subscriptions" || parts[1].is_empty() || parts[3].is_empty()
        {
            return Err(Error::InvalidConfig(format!(
                "Invalid subscription path '{subscription}'. Expected 'projects/<project>/subscriptions/<name>'"
            )));
        }
        return Ok(subscription.to_string());
    }

    if subscription.contains('/') {
        return Err(Error::InvalidConfig(format!(
            "Invalid subscription name '{subscription}'"
        )));
    }

    match project.map(str::trim).filter(|p| !p.is_empty()) {
        Some(project) => Ok(format!("projects/{project}/subscriptions/{subscription}")),
        None => Err(Error::InvalidConfig(format!(
            "Subscription '{subscription}' is not a full path and no project was given"
        ))),
    }
}

/// Endpoint to use when talking to a local Pub/Sub emulator at `host` (e.g. `localhost:8085`).
pub fn emulator_endpoint(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest<'a> {
    ack_ids: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyAckDeadlineRequest<'a> {
    ack_ids: &'a [String],
    ack_deadline_seconds: u64,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<WireReceivedMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceivedMessage {
    ack_id: String,
    message: WireMessage,
    #[serde(default)]
    delivery_attempt: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    message_id: String,
    #[serde(default)]
    publish_time: Option<String>,
    #[serde(default)]
    attributes: HashMap<String, String>,
}

impl From<WireReceivedMessage> for ReceivedMessage {
    fn from(wire: WireReceivedMessage) -> Self {
        let message_id = wire.message.message_id;
        let data = match wire.message.data {
            Some(encoded) => match base64::engine::general_purpose::STANDARD.decode(&encoded) {
                Ok(bytes) => bytes,
                Err(e) => {
                    // Hand the raw text on; the decoder will reject it and the message gets released.
                    warn!("Message {message_id} has data that is not valid base64: {e}");
                    encoded.into_bytes()
                }
            },
            None => Vec::new(),
        };

        ReceivedMessage {
            ack_id: wire.ack_id,
            message_id,
            data,
            publish_time: wire.message.publish_time,
            delivery_attempt: wire.delivery_attempt,
            attributes: wire.message.attributes,
        }
    }
}

/// Pull subscriber speaking the Pub/Sub v1 REST API.
pub struct PubSubSubscriber {
    http: reqwest::Client,
    config: SubscriberConfig,
    closed: AtomicBool,
}

impl PubSubSubscriber {
    /// Create a subscriber. No request is made until the first pull.
    pub fn new(config: SubscriberConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(Error::InvalidConfig("endpoint must not be empty".to_string()));
        }
        // Validates the path shape; short names must already be resolved by the caller.
        subscription_path(None, &config.subscription)?;

        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            config,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    fn subscription_url(&self) -> String {
        format!(
            "{}/v1/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.subscription
        )
    }

    fn url(&self, method: &str) -> String {
        format!("{}:{method}", self.subscription_url())
    }

    /// Fetch the subscription resource once to confirm the endpoint is
    /// reachable, the credentials are accepted and the subscription exists.
    pub async fn check_subscription(&self, timeout: Duration) -> Result<()> {
        self.ensure_open()?;

        let request = self.http.get(self.subscription_url()).timeout(timeout);
        let request = match &self.config.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Err(Error::Timeout(timeout)),
            Err(e) => return Err(e.into()),
        };
        Self::check_status(response).await?;
        debug!("Subscription {} is reachable", self.config.subscription);
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn post<T: Serialize + ?Sized>(&self, method: &str, body: &T) -> reqwest::RequestBuilder {
        let request = self.http.post(self.url(method)).json(body);
        match &self.config.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Broker for PubSubSubscriber {
    async fn pull(&self, max_messages: usize, timeout: Duration) -> Result<Vec<ReceivedMessage>> {
        self.ensure_open()?;

        let response = match self
            .post("pull", &PullRequest { max_messages })
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                debug!("Pull timed out after {timeout:?} with no messages");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let response = Self::check_status(response).await?;
        let body = match response.text().await {
            Ok(body) => body,
            // Messages in this response are already leased; losing the body is a failed pull.
            Err(e) if e.is_timeout() => return Err(Error::Timeout(timeout)),
            Err(e) => return Err(e.into()),
        };
        parse_pull_response(&body)
    }

    async fn acknowledge(&self, ack_ids: &[String]) -> Result<()> {
        self.ensure_open()?;
        if ack_ids.is_empty() {
            return Ok(());
        }

        let response = self
            .post("acknowledge", &AcknowledgeRequest { ack_ids })
            .send()
            .await?;
        Self::check_status(response).await?;
        debug!("Acknowledged {} message(s)", ack_ids.len());
        Ok(())
    }

    async fn release(&self, ack_ids: &[String], delay: Duration) -> Result<()> {
        self.ensure_open()?;
        if ack_ids.is_empty() {
            return Ok(());
        }

        let response = self
            .post(
                "modifyAckDeadline",
                &ModifyAckDeadlineRequest {
                    ack_ids,
                    ack_deadline_seconds: delay.as_secs(),
                },
            )
            .send()
            .await?;
        Self::check_status(response).await?;
        debug!(
            "Released {} message(s) with redelivery delay {}s",
            ack_ids.len(),
            delay.as_secs()
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Closed subscriber for {}", self.config.subscription);
        }
        Ok(())
    }
}

fn parse_pull_response(body: &str) -> Result<Vec<ReceivedMessage>> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let response: PullResponse = serde_json::from_str(body)
        .map_err(|e| Error::InvalidResponse(format!("Failed to parse pull response: {e}")))?;
    Ok(response
        .received_messages
        .into_iter()
        .map(ReceivedMessage::from)
        .collect())
}
