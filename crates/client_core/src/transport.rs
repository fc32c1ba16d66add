//! HTTP plumbing beneath [`crate::protocol_client::RemoteClient`].
//!
//! The [`Transport`] trait is the seam between the lifecycle client and the
//! network: it moves raw bodies and maps non-2xx statuses to
//! [`ClientError::RequestFailed`]. Decoding into typed payloads happens one
//! layer up.

use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder};
use serde_json::Value;
use shared::error::ErrorBody;
use tracing::debug;

use crate::{
    config::{ClientConfig, API_KEY_HEADER},
    error::{ClientError, ClientResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn query_opt(self, key: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a request against the service and returns the raw 2xx body.
    async fn send(&self, request: ApiRequest) -> ClientResult<String>;

    /// Multipart upload of a single `file` field to `/upload`.
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> ClientResult<String>;

    /// Fetches an absolute URL (presigned links). No credential is attached:
    /// presigned URLs authenticate themselves.
    async fn fetch_url(&self, url: &str) -> ClientResult<String>;
}

pub struct HttpTransport {
    http: Client,
    api_base: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|err| ClientError::InvalidConfig(format!("http client: {err}")))?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    async fn execute(&self, path: &str, builder: RequestBuilder) -> ClientResult<String> {
        let response = builder
            .send()
            .await
            .map_err(|err| ClientError::request_failed(path, None, Some(err.to_string())))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ClientError::request_failed(path, Some(status.as_u16()), Some(err.to_string())))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|parsed| parsed.message())
                .or_else(|| (!body.trim().is_empty()).then(|| body.trim().to_string()));
            debug!(path, status = status.as_u16(), "transport: non-success status");
            return Err(ClientError::request_failed(path, Some(status.as_u16()), detail));
        }
        Ok(body)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> ClientResult<String> {
        let url = self.url_for(&request.path);
        let mut builder = match request.method {
            Method::Get => self.http.get(url),
            Method::Post => self.http.post(url),
            Method::Delete => self.http.delete(url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let builder = self.authorize(builder);
        self.execute(&request.path, builder).await
    }

    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> ClientResult<String> {
        let part = multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = multipart::Form::new().part("file", part);
        let builder = self.authorize(self.http.post(self.url_for("/upload")).multipart(form));
        self.execute("/upload", builder).await
    }

    async fn fetch_url(&self, url: &str) -> ClientResult<String> {
        self.execute(url, self.http.get(url)).await
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
