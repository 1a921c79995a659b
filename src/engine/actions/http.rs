//! `http-request` executor
//!
//! Parameters:
//! - `url` (required)
//! - `method` (default `GET`)
//! - `headers` - object of header name to string value
//! - `body` - JSON body
//! - `timeout_ms` (default 30000)
//!
//! Succeeds on a 2xx status. The output carries `status`, `body` (parsed as
//! JSON when possible) and `elapsed_ms`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::engine::registry::StepExecutor;
use crate::engine::result::StepResult;
use crate::plan::Parameters;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct HttpRequestExecutor {
    client: reqwest::Client,
}

impl HttpRequestExecutor {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpRequestExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepExecutor for HttpRequestExecutor {
    async fn execute(
        &self,
        step_definition_id: &str,
        parameters: &Parameters,
    ) -> anyhow::Result<StepResult> {
        let Some(url) = parameters.get("url").and_then(Value::as_str) else {
            return Ok(StepResult::failure("url parameter required"));
        };

        let method = parameters
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| anyhow::anyhow!("invalid HTTP method: {}", method))?;

        let timeout_ms = parameters
            .get("timeout_ms")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        debug!(step_definition_id, %method, url, "Sending HTTP request");

        let mut request = self
            .client
            .request(method, url)
            .timeout(Duration::from_millis(timeout_ms))
            .header("Accept", "application/json");

        if let Some(Value::Object(headers)) = parameters.get("headers") {
            for (key, value) in headers {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                request = request.header(key.as_str(), value);
            }
        }

        if let Some(body) = parameters.get("body") {
            request = request.json(body);
        }

        let start = Instant::now();
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        let mut output = HashMap::new();
        output.insert("status".to_string(), Value::from(status.as_u16()));
        output.insert("body".to_string(), body);
        output.insert("elapsed_ms".to_string(), Value::from(elapsed_ms));

        Ok(StepResult {
            success: status.is_success(),
            output: Some(output),
            error: if status.is_success() {
                None
            } else {
                Some(format!("HTTP {} error", status.as_u16()))
            },
        })
    }
}
