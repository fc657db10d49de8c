//! HTTP client for the upstream statistics API.
//!
//! Catalog calls go to the API base (`/service`, `/datacenters`), the
//! real-time window goes to the real-time base
//! (`/v1/channel/{service}/ts/{since}`). Every request carries the API key
//! header and is bounded by the configured timeout.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use edgestat_core::{ApiKey, DeltaSample, Pop, PopTable, Service};

use crate::error::{UpstreamError, UpstreamResult};

const KEY_HEADER: &str = "fastly-key";

/// Boxed future returned by [`Upstream`] methods.
pub type UpstreamFuture<'a, T> = Pin<Box<dyn Future<Output = UpstreamResult<T>> + Send + 'a>>;

/// The upstream calls a refresh cycle makes.
pub trait Upstream: Send + Sync {
    /// Service catalog.
    fn list_services(&self) -> UpstreamFuture<'_, Vec<Service>>;

    /// Point-of-presence catalog reduced to `code → region`.
    fn list_pops(&self) -> UpstreamFuture<'_, PopTable>;

    /// Delta samples recorded for `service_id` after watermark `since`.
    fn fetch_window<'a>(
        &'a self,
        service_id: &'a str,
        since: u64,
    ) -> UpstreamFuture<'a, Vec<DeltaSample>>;
}

/// Connection settings for [`HttpUpstream`].
#[derive(Debug, Clone)]
pub struct HttpUpstreamConfig {
    pub api_key: ApiKey,
    pub api_base: String,
    pub rt_base: String,
    pub timeout: Option<Duration>,
}

/// [`Upstream`] over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    api_base: String,
    rt_base: String,
}

/// Real-time endpoint envelope; only `Data` is consumed.
#[derive(Debug, Deserialize)]
struct RealtimeWindow {
    #[serde(rename = "Data", default)]
    data: Vec<DeltaSample>,
    #[serde(rename = "Timestamp", default)]
    timestamp: u64,
}

impl HttpUpstream {
    pub fn new(config: HttpUpstreamConfig) -> UpstreamResult<Self> {
        let mut key = HeaderValue::from_str(config.api_key.expose())
            .map_err(|_| UpstreamError::InvalidApiKey)?;
        key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(KEY_HEADER, key);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("edgestat/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(UpstreamError::Client)?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            rt_base: config.rt_base.trim_end_matches('/').to_string(),
        })
    }

    async fn get_bytes(&self, url: &str) -> UpstreamResult<Vec<u8>> {
        let transport = |source: reqwest::Error| {
            if source.is_timeout() {
                UpstreamError::Timeout {
                    url: url.to_string(),
                }
            } else {
                UpstreamError::Http {
                    url: url.to_string(),
                    source,
                }
            }
        };

        let resp = self.client.get(url).send().await.map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        let bytes = resp.bytes().await.map_err(transport)?;
        debug!(%url, bytes = bytes.len(), "upstream response");
        Ok(bytes.to_vec())
    }
}

impl Upstream for HttpUpstream {
    fn list_services(&self) -> UpstreamFuture<'_, Vec<Service>> {
        Box::pin(async move {
            let url = format!("{}/service", self.api_base);
            let body = self.get_bytes(&url).await?;
            decode(&url, &body)
        })
    }

    fn list_pops(&self) -> UpstreamFuture<'_, PopTable> {
        Box::pin(async move {
            let url = format!("{}/datacenters", self.api_base);
            let body = self.get_bytes(&url).await?;
            decode_pops(&url, &body)
        })
    }

    fn fetch_window<'a>(
        &'a self,
        service_id: &'a str,
        since: u64,
    ) -> UpstreamFuture<'a, Vec<DeltaSample>> {
        Box::pin(async move {
            let url = format!("{}/v1/channel/{service_id}/ts/{since}", self.rt_base);
            let body = self.get_bytes(&url).await?;
            decode_window(&url, &body)
        })
    }
}

fn decode<T: DeserializeOwned>(url: &str, body: &[u8]) -> UpstreamResult<T> {
    serde_json::from_slice(body).map_err(|e| UpstreamError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}

fn decode_pops(url: &str, body: &[u8]) -> UpstreamResult<PopTable> {
    let pops: Vec<Pop> = decode(url, body)?;
    Ok(pops.into_iter().collect())
}

fn decode_window(url: &str, body: &[u8]) -> UpstreamResult<Vec<DeltaSample>> {
    let window: RealtimeWindow = decode(url, body)?;
    debug!(
        %url,
        samples = window.data.len(),
        timestamp = window.timestamp,
        "real-time window decoded"
    );
    Ok(window.data)
}
