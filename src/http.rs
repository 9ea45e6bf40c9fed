//! Request/response model and the network transport seam.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub type Headers = BTreeMap<String, String>;

/// How the request was issued by the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level page load
  Navigate,
  #[default]
  Default,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
  pub method: String,
  pub url: Url,
  pub headers: Headers,
  pub body: Option<String>,
  pub mode: RequestMode,
}

impl HttpRequest {
  pub fn new(method: &str, url: Url) -> Self {
    Self {
      method: method.to_ascii_uppercase(),
      url,
      headers: Headers::new(),
      body: None,
      mode: RequestMode::Default,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new("GET", url)
  }

  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_string(), value.to_string());
    self
  }

  pub fn with_body(mut self, body: impl Into<String>) -> Self {
    self.body = Some(body.into());
    self
  }

  /// Plain reads are the only requests the cache may answer
  pub fn is_read(&self) -> bool {
    matches!(self.method.as_str(), "GET" | "HEAD")
  }

  /// Requests that change server state and must not be lost offline
  pub fn is_mutating(&self) -> bool {
    matches!(self.method.as_str(), "POST" | "PUT" | "PATCH" | "DELETE")
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Headers::new(),
      body: body.into(),
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn body_text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
  #[error("network unavailable: {0}")]
  Unavailable(String),
  #[error("HTTP {0}")]
  Status(u16),
}

/// Sends requests to the network.
///
/// A non-2xx response is still `Ok` here; callers decide what counts as failure.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Transport backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  pub fn new(timeout: Duration) -> color_eyre::Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| color_eyre::eyre::eyre!("Failed to build HTTP client: {}", e))?;
    Ok(Self { client })
  }
}

#[async_trait]
impl Transport for ReqwestTransport {
  async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| TransportError::Unavailable(format!("invalid method: {}", e)))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| TransportError::Unavailable(e.to_string()))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| TransportError::Unavailable(e.to_string()))?
      .to_vec();

    Ok(HttpResponse {
      status,
      headers,
      body,
    })
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_method_is_normalized() {
    let req = HttpRequest::new("post", Url::parse("https://a.test/x").unwrap());
    assert_eq!(req.method, "POST");
    assert!(req.is_mutating());
    assert!(!req.is_read());
  }

  #[test]
  fn test_success_range() {
    assert!(HttpResponse::new(204, "").is_success());
    assert!(!HttpResponse::new(304, "").is_success());
    assert!(!HttpResponse::new(500, "").is_success());
  }
}
