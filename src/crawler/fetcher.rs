//! Link fetch stage
//!
//! Retrieves each link's content over HTTP. Links are skipped (dropped from
//! the pipeline, not failed) when they cannot contain HTML, point into
//! private address space, cannot be fetched, or come back with a non-2xx
//! status or a non-HTML content type. Transport errors are logged and
//! treated as skips so one unreachable host never aborts a crawl pass.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use url::Url;

use super::privnet::PrivateNetworkDetector;
use crate::pipeline::{Payload, Processor};

/// The outcome of fetching a URL.
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// Implemented by types that can perform HTTP GET requests.
#[async_trait]
pub trait UrlGetter: Send + Sync {
    async fn get(&self, url: &str) -> anyhow::Result<FetchResponse>;
}

/// A [`UrlGetter`] backed by a shared reqwest client.
pub struct HttpGetter {
    client: reqwest::Client,
}

impl HttpGetter {
    pub fn new(user_agent: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UrlGetter for HttpGetter {
    async fn get(&self, url: &str) -> anyhow::Result<FetchResponse> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(String::from);
        let body = response.text().await?;
        Ok(FetchResponse {
            status,
            content_type,
            body,
        })
    }
}

/// The fetch stage processor.
pub(crate) struct LinkFetcher {
    getter: Arc<dyn UrlGetter>,
    detector: Arc<dyn PrivateNetworkDetector>,
    exclusion: Regex,
}

impl LinkFetcher {
    pub(crate) fn new(getter: Arc<dyn UrlGetter>, detector: Arc<dyn PrivateNetworkDetector>) -> Self {
        Self {
            getter,
            detector,
            // Extensions that cannot contain HTML. Compiled from a literal;
            // cannot fail.
            exclusion: Regex::new(r"(?i)\.(?:jpg|jpeg|png|gif|ico|css|js)$").unwrap(),
        }
    }

    /// Whether the URL's host resolves into private address space. Hosts
    /// that cannot be parsed or resolved count as private.
    async fn points_to_private_network(&self, raw_url: &str) -> bool {
        let Ok(url) = Url::parse(raw_url) else {
            return true;
        };
        let Some(host) = url.host_str() else {
            return true;
        };
        self.detector.is_private(host).await.unwrap_or(true)
    }
}

#[async_trait]
impl Processor for LinkFetcher {
    async fn process(&self, mut payload: Box<dyn Payload>) -> anyhow::Result<Option<Box<dyn Payload>>> {
        let url = super::as_crawl_payload(payload.as_mut())?.url.clone();

        if self.exclusion.is_match(&url) {
            payload.mark_as_processed();
            return Ok(None);
        }
        if self.points_to_private_network(&url).await {
            payload.mark_as_processed();
            return Ok(None);
        }

        let response = match self.getter.get(&url).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(url = %url, error = %err, "fetch failed, skipping link");
                payload.mark_as_processed();
                return Ok(None);
            }
        };

        if !(200..300).contains(&response.status) {
            payload.mark_as_processed();
            return Ok(None);
        }
        let is_html = response
            .content_type
            .as_deref()
            .is_some_and(|content_type| content_type.contains("html"));
        if !is_html {
            payload.mark_as_processed();
            return Ok(None);
        }

        super::as_crawl_payload(payload.as_mut())?.raw_content = response.body;
        Ok(Some(payload))
    }
}
