//! JSON-over-HTTP remote calls
//!
//! [`HttpRowCall`] posts one unit per request, [`HttpBatchCall`] one batch.
//! Rate limiting and retries are left to the engine; this module only maps
//! HTTP outcomes onto [`CallError`] variants.

use crate::batch::{BatchResponse, BatchResponseKeys};
use crate::call::{BatchCall, RowCall};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use rowcall_core::{Batch, BatchError, CallError, Unit};
use serde_json::{json, Value};

// ============================================================================
// ENDPOINT
// ============================================================================

/// A JSON endpoint with optional bearer authentication.
#[derive(Clone)]
pub struct HttpEndpoint {
    client: Client,
    service: String,
    url: String,
    api_key: Option<String>,
}

impl HttpEndpoint {
    /// Create an endpoint. `service` labels every error it produces.
    pub fn new(service: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            service: service.into(),
            url: url.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST `body` as JSON and return the parsed JSON response.
    pub async fn post(&self, body: &Value) -> Result<Value, CallError> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(&self.service, &e))?;

        let status = response.status();
        let retry_after_ms = parse_retry_after_ms(response.headers());
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(&self.service, &e))?;

        if status.is_success() {
            parse_body(&self.service, &text)
        } else {
            Err(classify_status(&self.service, status, retry_after_ms, &text))
        }
    }
}

impl std::fmt::Debug for HttpEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEndpoint")
            .field("service", &self.service)
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// ============================================================================
// RESPONSE MAPPING
// ============================================================================

/// Map a non-success HTTP status onto a call error.
///
/// 429 is a rate-limit signal, 5xx a connection problem (both transient);
/// anything else is a remote failure for this input.
pub fn classify_status(
    service: &str,
    status: StatusCode,
    retry_after_ms: Option<u64>,
    body: &str,
) -> CallError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return CallError::RateLimited {
            service: service.to_string(),
            retry_after_ms: retry_after_ms.unwrap_or(0),
        };
    }
    let message = error_message(body);
    if status.is_server_error() {
        CallError::Connection {
            service: service.to_string(),
            reason: format!("server error {}: {}", status.as_u16(), message),
        }
    } else {
        CallError::RequestFailed {
            service: service.to_string(),
            status: status.as_u16(),
            message,
        }
    }
}

/// Parse a successful response body. An empty body is `null`.
pub fn parse_body(service: &str, text: &str) -> Result<Value, CallError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|e| CallError::InvalidResponse {
        service: service.to_string(),
        reason: format!("Failed to parse response: {}", e),
    })
}

/// Best-effort human message from an error body.
fn error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("message"))
            .or_else(|| v.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => "Unknown error".to_string(),
        None => body.trim().to_string(),
    }
}

fn transport_error(service: &str, err: &reqwest::Error) -> CallError {
    if err.is_timeout() {
        CallError::Timeout {
            service: service.to_string(),
            timeout_ms: 0,
        }
    } else {
        CallError::Connection {
            service: service.to_string(),
            reason: format!("HTTP request failed: {}", err),
        }
    }
}

fn parse_retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
        .map(|seconds| (seconds * 1000.0) as u64)
}

// ============================================================================
// ROW CALL
// ============================================================================

/// Posts one unit per request.
///
/// With a text column the body is `{"text": <value>}` and an empty text
/// short-circuits to an empty response without a request. Otherwise the whole
/// unit is posted as a JSON object.
#[derive(Debug, Clone)]
pub struct HttpRowCall {
    endpoint: HttpEndpoint,
    text_column: Option<String>,
}

impl HttpRowCall {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self {
            endpoint,
            text_column: None,
        }
    }

    pub fn with_text_column(mut self, column: impl Into<String>) -> Self {
        self.text_column = Some(column.into());
        self
    }

    /// The request body for `unit`, or `None` when there is nothing to send.
    pub fn request_body(&self, unit: &Unit) -> Result<Option<Value>, CallError> {
        match &self.text_column {
            None => Ok(Some(unit.to_json())),
            Some(column) => match text_of(self.endpoint.service(), unit, column)? {
                Some(text) => Ok(Some(json!({ "text": text }))),
                None => Ok(None),
            },
        }
    }
}

#[async_trait]
impl RowCall for HttpRowCall {
    async fn call(&self, unit: &Unit) -> Result<Value, CallError> {
        match self.request_body(unit)? {
            Some(body) => self.endpoint.post(&body).await,
            None => Ok(Value::String(String::new())),
        }
    }

    fn service_name(&self) -> &str {
        self.endpoint.service()
    }
}

// ============================================================================
// BATCH CALL
// ============================================================================

/// Posts one batch per request and reads per-entry outcomes with
/// [`BatchResponseKeys`].
///
/// The body is `{"inputs": [{<index>: i, "text": ..} | {<index>: i, "record": {..}}]}`.
#[derive(Debug, Clone)]
pub struct HttpBatchCall {
    endpoint: HttpEndpoint,
    keys: BatchResponseKeys,
    text_column: Option<String>,
}

impl HttpBatchCall {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self {
            endpoint,
            keys: BatchResponseKeys::default(),
            text_column: None,
        }
    }

    pub fn with_keys(mut self, keys: BatchResponseKeys) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_text_column(mut self, column: impl Into<String>) -> Self {
        self.text_column = Some(column.into());
        self
    }

    pub fn request_body(&self, batch: &Batch) -> Result<Value, CallError> {
        let inputs = batch
            .units()
            .iter()
            .enumerate()
            .map(|(position, unit)| {
                let mut entry = serde_json::Map::new();
                entry.insert(self.keys.index.clone(), json!(position));
                match &self.text_column {
                    Some(column) => {
                        let text = text_of(self.endpoint.service(), unit, column)?;
                        entry.insert("text".to_string(), json!(text.unwrap_or_default()));
                    }
                    None => {
                        entry.insert("record".to_string(), unit.to_json());
                    }
                }
                Ok(Value::Object(entry))
            })
            .collect::<Result<Vec<_>, CallError>>()?;
        Ok(json!({ "inputs": inputs }))
    }
}

#[async_trait]
impl BatchCall for HttpBatchCall {
    async fn call_batch(&self, batch: &Batch) -> Result<BatchResponse, CallError> {
        let body = self.request_body(batch)?;
        let response = self.endpoint.post(&body).await?;
        self.keys
            .parse(&response, batch.index())
            .map_err(|e| CallError::MalformedBatch {
                service: self.endpoint.service().to_string(),
                batch: batch.index(),
                reason: match e {
                    BatchError::MalformedResponse { reason, .. } => reason,
                    other => other.to_string(),
                },
            })
    }

    fn service_name(&self) -> &str {
        self.endpoint.service()
    }
}

/// Text of `column` in `unit`; `None` for empty or null text.
fn text_of(service: &str, unit: &Unit, column: &str) -> Result<Option<String>, CallError> {
    match unit.get(column) {
        None => Err(CallError::InvalidInput {
            service: service.to_string(),
            reason: format!("Column '{}' is not present in the input dataset", column),
        }),
        Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Ok(Some(other.to_string())),
    }
}

// =============================================================================
// TESTS
// =============================================================================
