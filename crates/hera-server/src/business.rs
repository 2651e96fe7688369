//! Business-operation collaborator.
//!
//! Admitted requests are forwarded as a single remote procedure call
//! carrying the action, the bound identity, the payload, its line items,
//! and any options. The gateway never looks inside the result.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{BusinessError, ServerError};

/// Payload keys that carry transaction line items.
const LINE_KEYS: &[&str] = &["lines", "transaction_lines", "line_items"];

/// One call to the business backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRequest {
    /// Remote procedure name, e.g. `hera_entity_upsert_v2`.
    pub action: String,
    /// Actor on whose behalf the call runs.
    pub actor_id: String,
    /// Tenant the call is fenced to.
    pub organization_id: String,
    /// Entity or transaction payload without line items and options.
    pub payload: Value,
    /// Transaction line items, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<Value>,
    /// Call options.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
    /// Path parameters of the matched route.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl BusinessRequest {
    /// Builds a request, splitting line items and options out of the
    /// request payload.
    ///
    /// # Example
    ///
    /// ```
    /// use hera_server::BusinessRequest;
    /// use serde_json::json;
    ///
    /// let request = BusinessRequest::new(
    ///     "hera_txn_create_v2",
    ///     "user-1",
    ///     "org-A",
    ///     json!({"transaction_type": "sale", "lines": [{"line_amount": 10}], "options": {"dry_run": true}}),
    /// );
    /// assert_eq!(request.lines.len(), 1);
    /// assert_eq!(request.options["dry_run"], true);
    /// assert_eq!(request.payload, json!({"transaction_type": "sale"}));
    /// ```
    pub fn new(
        action: impl Into<String>,
        actor_id: impl Into<String>,
        organization_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        let (payload, lines, options) = split_payload(payload);
        Self {
            action: action.into(),
            actor_id: actor_id.into(),
            organization_id: organization_id.into(),
            payload,
            lines,
            options,
            params: BTreeMap::new(),
        }
    }

    /// Attaches the route's path parameters.
    #[must_use]
    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }
}

fn split_payload(payload: Value) -> (Value, Vec<Value>, Map<String, Value>) {
    let Value::Object(mut object) = payload else {
        return (payload, Vec::new(), Map::new());
    };

    let lines = LINE_KEYS
        .iter()
        .find_map(|key| match object.remove(*key) {
            Some(Value::Array(lines)) => Some(lines),
            _ => None,
        })
        .unwrap_or_default();
    let options = match object.remove("options") {
        Some(Value::Object(options)) => options,
        _ => Map::new(),
    };
    (Value::Object(object), lines, options)
}

/// Successful result of a business call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessResponse {
    /// HTTP status to return; 200 unless the backend chose another 2xx.
    #[serde(default = "default_status")]
    pub status: u16,
    /// Result payload.
    #[serde(default)]
    pub data: Value,
}

const fn default_status() -> u16 {
    200
}

impl BusinessResponse {
    /// Creates a 200 response.
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self { status: 200, data }
    }
}

/// The business-operation backend.
#[async_trait]
pub trait BusinessClient: Send + Sync + 'static {
    /// Invokes one operation.
    async fn invoke(&self, request: BusinessRequest) -> Result<BusinessResponse, BusinessError>;
}

/// Business backend reached over HTTP.
///
/// Each call is `POST {endpoint}/rpc/{action}` with the [`BusinessRequest`]
/// as JSON. A 2xx answer is a [`BusinessResponse`]; a 4xx answer carrying
/// `{"error": {"code", "message"}}` is a rejection; anything else means
/// the backend is unavailable.
#[derive(Debug, Clone)]
pub struct HttpBusinessClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpBusinessClient {
    /// Creates a client for `endpoint`.
    ///
    /// `timeout` bounds the whole exchange at the transport level; the
    /// dispatcher applies its own timeout on top.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ServerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServerError::collaborator("business", e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorFields,
}

#[derive(Deserialize)]
struct ErrorFields {
    code: String,
    #[serde(default)]
    message: String,
}

#[async_trait]
impl BusinessClient for HttpBusinessClient {
    async fn invoke(&self, request: BusinessRequest) -> Result<BusinessResponse, BusinessError> {
        let url = format!("{}/rpc/{}", self.endpoint, request.action);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| BusinessError::unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| BusinessError::unavailable(e.to_string()))?;

        if status.is_success() {
            let mut result: BusinessResponse = serde_json::from_slice(&body)
                .map_err(|e| BusinessError::invalid_response(e.to_string()))?;
            if !(200..300).contains(&result.status) {
                result.status = status.as_u16();
            }
            return Ok(result);
        }

        if status.is_client_error() {
            if let Ok(ErrorBody { error }) = serde_json::from_slice(&body) {
                return Err(BusinessError::rejected(error.code, error.message));
            }
            return Err(BusinessError::rejected(
                "BUSINESS_RULE_VIOLATION",
                format!("operation `{}` was rejected with {status}", request.action),
            ));
        }

        Err(BusinessError::unavailable(format!(
            "operation `{}` failed with {status}",
            request.action
        )))
    }
}

type Responder = Box<dyn Fn(&BusinessRequest) -> Result<BusinessResponse, BusinessError> + Send + Sync>;

/// In-process backend that records every call.
///
/// By default each call succeeds with a fresh id and an echo of the
/// action and payload.
///
/// # Example
///
/// ```
/// use hera_server::{BusinessClient, BusinessRequest, RecordingBusinessClient};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let client = RecordingBusinessClient::new();
/// let response = client
///     .invoke(BusinessRequest::new("hera_entity_read_v2", "user-1", "org-A", json!({})))
///     .await
///     .unwrap();
/// assert_eq!(response.data["id"], "rec-1");
/// assert_eq!(client.invocations(), 1);
/// # });
/// ```
pub struct RecordingBusinessClient {
    calls: Mutex<Vec<BusinessRequest>>,
    next_id: AtomicU64,
    delay: Option<Duration>,
    responder: Option<Responder>,
}

impl RecordingBusinessClient {
    /// Creates an echoing client.
    #[must_use]
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            delay: None,
            responder: None,
        }
    }

    /// Sleeps before answering each call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answers calls with `responder` instead of the echo.
    #[must_use]
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&BusinessRequest) -> Result<BusinessResponse, BusinessError> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Returns the number of calls received.
    #[must_use]
    pub fn invocations(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns a copy of every call received.
    #[must_use]
    pub fn requests(&self) -> Vec<BusinessRequest> {
        self.calls.lock().clone()
    }

    /// Returns the most recent call.
    #[must_use]
    pub fn last_request(&self) -> Option<BusinessRequest> {
        self.calls.lock().last().cloned()
    }
}

impl Default for RecordingBusinessClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RecordingBusinessClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingBusinessClient")
            .field("invocations", &self.invocations())
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BusinessClient for RecordingBusinessClient {
    async fn invoke(&self, request: BusinessRequest) -> Result<BusinessResponse, BusinessError> {
        self.calls.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(responder) = &self.responder {
            return responder(&request);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(BusinessResponse::ok(json!({
            "id": format!("rec-{id}"),
            "action": request.action,
            "organization_id": request.organization_id,
            "payload": request.payload,
            "line_count": request.lines.len(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_payload_variants() {
        let request = BusinessRequest::new(
            "a",
            "u",
            "o",
            json!({"transaction_lines": [{"x": 1}, {"x": 2}], "header": true}),
        );
        assert_eq!(request.lines.len(), 2);
        assert_eq!(request.payload, json!({"header": true}));
        assert!(request.options.is_empty());

        let request = BusinessRequest::new("a", "u", "o", Value::Null);
        assert_eq!(request.payload, Value::Null);
        assert!(request.lines.is_empty());
    }

    #[test]
    fn test_request_serialization_skips_empty_parts() {
        let request = BusinessRequest::new("a", "u", "o", json!({"k": 1}));
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("lines").is_none());
        assert!(value.get("options").is_none());
        assert!(value.get("params").is_none());
    }

    #[test]
    fn test_response_defaults() {
        let response: BusinessResponse = serde_json::from_str(r#"{"data": {"id": 1}}"#).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.data["id"], 1);
    }

    #[tokio::test]
    async fn test_recording_client_custom_responder() {
        let client = RecordingBusinessClient::new()
            .with_responder(|_| Err(BusinessError::rejected("ENTITY_EXISTS", "duplicate")));
        let err = client
            .invoke(BusinessRequest::new("a", "u", "o", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err, BusinessError::rejected("ENTITY_EXISTS", "duplicate"));
        assert_eq!(client.invocations(), 1);
        assert_eq!(client.last_request().unwrap().action, "a");
    }

    #[tokio::test]
    async fn test_http_client_unreachable_backend() {
        let client = HttpBusinessClient::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let err = client
            .invoke(BusinessRequest::new("a", "u", "o", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, BusinessError::Unavailable { .. }));
    }
}
