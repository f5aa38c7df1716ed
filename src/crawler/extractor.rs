//! Link extraction stage
//!
//! Parses the fetched HTML and classifies the outbound links into follow
//! and no-follow sets. Relative hrefs are resolved against the document URL
//! (honouring a `<base href>` when present), non-HTTP schemes are ignored,
//! duplicates are collapsed, and destinations that resolve into private
//! address space are discarded.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use scraper::{Html, Selector};
use url::Url;

use super::privnet::PrivateNetworkDetector;
use crate::pipeline::{Payload, Processor};

/// An outbound link candidate found in the document.
struct Candidate {
    url: String,
    nofollow: bool,
}

/// The link extraction stage processor.
pub(crate) struct LinkExtractor {
    detector: Arc<dyn PrivateNetworkDetector>,
}

impl LinkExtractor {
    pub(crate) fn new(detector: Arc<dyn PrivateNetworkDetector>) -> Self {
        Self { detector }
    }
}

#[async_trait]
impl Processor for LinkExtractor {
    async fn process(&self, mut payload: Box<dyn Payload>) -> anyhow::Result<Option<Box<dyn Payload>>> {
        let (doc_url, content) = {
            let crawl = super::as_crawl_payload(payload.as_mut())?;
            (crawl.url.clone(), std::mem::take(&mut crawl.raw_content))
        };
        let Ok(doc_url) = Url::parse(&doc_url) else {
            payload.mark_as_processed();
            return Ok(None);
        };

        // The DOM is parsed and dropped inside this scope: scraper
        // documents cannot be held across an await.
        let candidates = extract_candidates(&content, &doc_url);

        // Classify candidates, filtering private destinations. Host
        // decisions are cached for the duration of the payload.
        let mut private_hosts: HashMap<String, bool> = HashMap::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut follow = Vec::new();
        let mut nofollow = Vec::new();
        for candidate in candidates {
            if !seen.insert(candidate.url.clone()) {
                continue;
            }
            let Ok(resolved) = Url::parse(&candidate.url) else {
                continue;
            };
            let Some(host) = resolved.host_str() else {
                continue;
            };
            let private = match private_hosts.get(host) {
                Some(private) => *private,
                None => {
                    let private = self.detector.is_private(host).await.unwrap_or(true);
                    private_hosts.insert(host.to_string(), private);
                    private
                }
            };
            if private {
                continue;
            }
            if candidate.nofollow {
                nofollow.push(candidate.url);
            } else {
                follow.push(candidate.url);
            }
        }

        let crawl = super::as_crawl_payload(payload.as_mut())?;
        crawl.raw_content = content;
        crawl.follow_links = follow;
        crawl.nofollow_links = nofollow;
        Ok(Some(payload))
    }
}

fn extract_candidates(content: &str, doc_url: &Url) -> Vec<Candidate> {
    let document = Html::parse_document(content);

    // A <base href> overrides the document URL for relative resolution.
    let base_url = Selector::parse("base[href]")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .and_then(|element| element.value().attr("href"))
                .and_then(|href| doc_url.join(href).ok())
        })
        .unwrap_or_else(|| doc_url.clone());

    let mut candidates = Vec::new();
    if let Ok(selector) = Selector::parse("a[href]") {
        for element in document.select(&selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let Some(url) = resolve_link(href, &base_url) else {
                continue;
            };
            let nofollow = element
                .value()
                .attr("rel")
                .map(|rel| {
                    rel.split_whitespace()
                        .any(|token| token.eq_ignore_ascii_case("nofollow"))
                })
                .unwrap_or(false);
            candidates.push(Candidate { url, nofollow });
        }
    }
    candidates
}

/// Resolves an href to an absolute http(s) URL, or `None` when the link
/// should be ignored (special schemes, fragments, unparsable values).
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    let mut resolved = base_url.join(href).ok()?;
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }
    // Fragments never change the fetched resource.
    resolved.set_fragment(None);
    Some(resolved.to_string())
}
