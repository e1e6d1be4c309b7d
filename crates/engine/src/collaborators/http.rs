//! `reqwest`-backed [`HttpClient`].

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use stepflow_util::http::{parse_method, parse_response_body};
use tracing::debug;

use super::{HttpClient, HttpRequest, HttpResponse};

#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .user_agent(concat!("stepflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

fn build_headers(headers: &[(String, String)]) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name =
            HeaderName::from_bytes(name.trim().as_bytes()).map_err(|error| anyhow!("invalid header name '{name}': {error}"))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|error| anyhow!("invalid value for header '{name}': {error}"))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = parse_method(&request.method).map_err(|message| anyhow!(message))?;
        let headers = build_headers(&request.headers)?;
        let has_content_type = headers.contains_key(CONTENT_TYPE);

        let mut builder = self.client.request(method.clone(), &request.url).headers(headers);
        builder = match request.body {
            // Strings are sent as-is so callers can post form bodies or plain text.
            Some(Value::String(text)) => builder.body(text),
            Some(body) => {
                let encoded = serde_json::to_vec(&body)?;
                if !has_content_type {
                    builder = builder.header(CONTENT_TYPE, "application/json");
                }
                builder.body(encoded)
            }
            None => builder,
        };

        debug!(method = %method, url = %request.url, "sending http request");
        let response = builder
            .send()
            .await
            .with_context(|| format!("{method} {} failed", request.url))?;
        let status = response.status().as_u16();
        let raw_body = response.text().await.context("failed to read response body")?;

        Ok(HttpResponse {
            status,
            body: parse_response_body(&raw_body),
            raw_body,
        })
    }
}
