use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

use crate::cache::DetailFetcher;
use crate::config::{ApiConfig, Config};

use super::types::{DistrictDetail, OxygenMetrics};

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// HTTP client for the metrics API
#[derive(Clone)]
pub struct RemoteClient {
  http: reqwest::Client,
  base_url: Url,
}

impl RemoteClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let base_url = Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid API base URL '{}': {}", config.base_url, e))?;
    if base_url.cannot_be_a_base() {
      return Err(eyre!("API base URL '{}' cannot have paths", base_url));
    }

    let mut headers = HeaderMap::new();
    if let Some(token) = Config::api_token() {
      let value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| eyre!("Invalid API token: {}", e))?;
      headers.insert(AUTHORIZATION, value);
    }

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .default_headers(headers)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base_url })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  pub fn http(&self) -> &reqwest::Client {
    &self.http
  }

  /// Build `<base>/<segments...>`, percent-encoding each segment
  fn endpoint(&self, segments: &[&str]) -> Result<Url> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| eyre!("API base URL cannot have paths"))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
    let response = self
      .http
      .get(url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", url, e))?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(eyre!(
        "{} returned {}: {}",
        url,
        status,
        truncate_body(&body)
      ));
    }

    response
      .json()
      .await
      .map_err(|e| eyre!("Invalid response from {}: {}", url, e))
  }

  /// Get the full record for one district
  pub async fn fetch_detail(&self, slug: &str) -> Result<DistrictDetail> {
    let url = self.endpoint(&["districts", slug])?;
    self.get_json(url).await
  }

  /// Run the oxygen computation remotely
  pub async fn compute(&self, district: &str, param1: f64, param2: f64) -> Result<OxygenMetrics> {
    let mut url = self.endpoint(&["compute"])?;
    url
      .query_pairs_mut()
      .append_pair("district", district)
      .append_pair("param1", &param1.to_string())
      .append_pair("param2", &param2.to_string());
    self.get_json(url).await
  }
}

#[async_trait]
impl DetailFetcher<DistrictDetail> for RemoteClient {
  async fn fetch(&self, id: &str) -> Result<DistrictDetail> {
    self.fetch_detail(id).await
  }
}

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
  if body.len() <= MAX_ERROR_BODY_LENGTH {
    return body.to_string();
  }
  let mut end = MAX_ERROR_BODY_LENGTH;
  while !body.is_char_boundary(end) {
    end -= 1;
  }
  format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client(base_url: &str) -> RemoteClient {
    RemoteClient::new(&ApiConfig {
      base_url: base_url.to_string(),
      timeout_secs: 5,
    })
    .unwrap()
  }

  #[test]
  fn test_endpoint_with_and_without_trailing_slash() {
    for base in ["http://localhost:8080/api", "http://localhost:8080/api/"] {
      let url = client(base).endpoint(&["districts", "mumbai"]).unwrap();
      assert_eq!(url.as_str(), "http://localhost:8080/api/districts/mumbai");
    }
  }

  #[test]
  fn test_endpoint_encodes_segments() {
    let url = client("http://localhost/").endpoint(&["districts", "a b/c"]).unwrap();
    assert_eq!(url.as_str(), "http://localhost/districts/a%20b%2Fc");
  }

  #[test]
  fn test_invalid_base_url() {
    let result = RemoteClient::new(&ApiConfig {
      base_url: "not a url".to_string(),
      timeout_secs: 5,
    });
    assert!(result.is_err());
  }

  #[test]
  fn test_truncate_body() {
    assert_eq!(truncate_body("short"), "short");
    let long = "é".repeat(400);
    let truncated = truncate_body(&long);
    assert!(truncated.contains("truncated, 800 total bytes"));
  }

  #[tokio::test]
  async fn test_unreachable_host_is_an_error() {
    let client = client("http://127.0.0.1:9/api");
    assert!(client.fetch_detail("mumbai").await.is_err());
  }
}
