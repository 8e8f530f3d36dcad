//! Outbound JSON HTTP client.
//!
//! Every response body is decoded as JSON into [`HttpResponse::data`]. Responses outside
//! 2xx become [`HttpError::Status`] carrying the decoded body.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: bool,
    pub status_code: u16,
    pub status_text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl HttpResponse {
    /// Field of an object body, or `Null`.
    pub fn field(&self, key: &str) -> &Value {
        self.data.get(key).unwrap_or(&Value::Null)
    }
}

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("request: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{}", .0.status_text)]
    Status(Box<HttpResponse>),
    #[error("decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Clone, Debug)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self, HttpError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpClient { client })
    }

    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
        queries: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, HttpError> {
        let mut builder = self.client.request(method.clone(), url);
        if !queries.is_empty() {
            builder = builder.query(queries);
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        if let Some(body) = body.filter(|_| method != Method::GET) {
            builder = builder.json(&body);
        }
        tracing::debug!(%method, url, "outbound request");

        let response = builder.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        let data = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };

        if !status.is_success() {
            tracing::debug!(%method, url, status = status.as_u16(), "outbound request failed");
            return Err(HttpError::Status(Box::new(HttpResponse {
                status: false,
                status_code: status.as_u16(),
                status_text: status.to_string(),
                title: "Error".into(),
                message: "Something went wrong".into(),
                data,
            })));
        }
        Ok(HttpResponse {
            status: true,
            status_code: status.as_u16(),
            status_text: status.to_string(),
            title: String::new(),
            message: String::new(),
            data,
        })
    }

    pub async fn get(
        &self,
        url: &str,
        queries: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, HttpError> {
        self.request(Method::GET, url, None, queries, headers).await
    }

    pub async fn post<B: Serialize>(
        &self,
        url: &str,
        body: &B,
        queries: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, HttpError> {
        let body = serde_json::to_value(body)?;
        self.request(Method::POST, url, Some(body), queries, headers).await
    }

    pub async fn put<B: Serialize>(
        &self,
        url: &str,
        body: &B,
        queries: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, HttpError> {
        let body = serde_json::to_value(body)?;
        self.request(Method::PUT, url, Some(body), queries, headers).await
    }

    pub async fn patch<B: Serialize>(
        &self,
        url: &str,
        body: &B,
        queries: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, HttpError> {
        let body = serde_json::to_value(body)?;
        self.request(Method::PATCH, url, Some(body), queries, headers).await
    }

    pub async fn delete(
        &self,
        url: &str,
        queries: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, HttpError> {
        self.request(Method::DELETE, url, None, queries, headers).await
    }
}
