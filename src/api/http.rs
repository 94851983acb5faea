//! Transport seam: the request/response shapes the interceptor works with and
//! the reqwest-backed implementation used by the binary.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use url::Url;

use super::error::ApiError;

/// An outgoing request, independent of the HTTP library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      headers: Vec::new(),
      body: None,
    }
  }

  /// A POST carrying a JSON body.
  pub fn post_json(url: Url, body: Vec<u8>) -> Self {
    Self {
      method: Method::POST,
      url,
      headers: vec![
        (
          "Accept".to_string(),
          "application/json, text/plain, */*".to_string(),
        ),
        ("Content-Type".to_string(), "application/json".to_string()),
      ],
      body: Some(body),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Anything other than GET/HEAD changes server state.
  pub fn is_mutation(&self) -> bool {
    !matches!(self.method, Method::GET | Method::HEAD)
  }
}

/// A fully buffered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
    serde_json::from_slice(&self.body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
  }
}

/// Something that can put a request on the wire.
///
/// `Err` means no response was obtained at all; any HTTP status, including
/// errors, comes back as `Ok`.
pub trait Fetch: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response, ApiError>> + Send;
}

/// HTTP transport backed by reqwest.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
  client: Client,
}

impl HttpTransport {
  pub fn new(timeout: Duration) -> Result<Self, ApiError> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(Self { client })
  }
}

impl Fetch for HttpTransport {
  async fn fetch(&self, request: &Request) -> Result<Response, ApiError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
      .collect();
    let body = response.bytes().await?.to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}
