//! Text extraction stage
//!
//! Pulls the page title and a whitespace-normalised rendition of the body
//! text out of the fetched HTML, ready for indexing.

use async_trait::async_trait;
use scraper::{Html, Selector};

use crate::pipeline::{Payload, Processor};

/// The text extraction stage processor.
pub(crate) struct TextExtractor;

impl TextExtractor {
    pub(crate) fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Processor for TextExtractor {
    async fn process(&self, mut payload: Box<dyn Payload>) -> anyhow::Result<Option<Box<dyn Payload>>> {
        let crawl = super::as_crawl_payload(payload.as_mut())?;

        let document = Html::parse_document(&crawl.raw_content);
        crawl.title = extract_title(&document).unwrap_or_default();
        crawl.text_content = extract_text(&document);
        drop(document);

        Ok(Some(payload))
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|element| normalize_whitespace(&element.text().collect::<String>()))
        .filter(|title| !title.is_empty())
}

/// Collects the document's visible text. The body is preferred; documents
/// without one fall back to the root element.
fn extract_text(document: &Html) -> String {
    let body_text = Selector::parse("body").ok().and_then(|selector| {
        document
            .select(&selector)
            .next()
            .map(|body| body.text().collect::<Vec<_>>().join(" "))
    });
    let text = body_text
        .unwrap_or_else(|| document.root_element().text().collect::<Vec<_>>().join(" "));
    normalize_whitespace(&text)
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::payload::PayloadPool;

    async fn extract(html: &str) -> (String, String) {
        let pool = PayloadPool::new();
        let mut payload = pool.acquire();
        payload.url.push_str("https://example.com/");
        payload.raw_content.push_str(html);

        let mut forwarded = TextExtractor::new()
            .process(payload)
            .await
            .unwrap()
            .expect("payload should be forwarded");
        let crawl = super::super::as_crawl_payload(forwarded.as_mut()).unwrap();
        (crawl.title.clone(), crawl.text_content.clone())
    }

    #[tokio::test]
    async fn test_title_and_text_are_extracted() {
        let (title, text) = extract(
            r#"<html><head><title>  The Title </title></head>
               <body><h1>Heading</h1><p>Some body
               text.</p></body></html>"#,
        )
        .await;
        assert_eq!(title, "The Title");
        assert_eq!(text, "Heading Some body text.");
    }

    #[tokio::test]
    async fn test_missing_title_leaves_it_empty() {
        let (title, text) = extract("<html><body><p>words</p></body></html>").await;
        assert!(title.is_empty());
        assert_eq!(text, "words");
    }

    #[tokio::test]
    async fn test_nested_markup_flattens_to_text() {
        let (_, text) =
            extract("<body><div>alpha <span>beta</span></div><div>gamma</div></body>").await;
        assert_eq!(text, "alpha beta gamma");
    }
}
