use scraper::{Html, Selector};

use crate::config::USER_AGENT;
use crate::llm::LlmClient;
use crate::robots::RobotsPolicy;
use crate::throttle::DomainThrottle;

const FETCH_TIMEOUT_SECS: u64 = 30;
const MAX_HTML_CHARS: usize = 200_000;
const MAX_PDF_CHARS: usize = 200_000;

const EXTRACTOR_SYSTEM_PROMPT: &str = "\
Return verbatim sections relevant to the query, preserving formatting. \
Describe images. If nothing in the document is relevant, say so briefly.";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("network error fetching {url}: {source}")]
    Network { url: String, source: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("extractor llm failed: {0}")]
    Llm(#[from] crate::llm::LlmError),

    #[error("pdf extraction failed: {0}")]
    Pdf(String),
}

/// Resolves policy, cache, and rate limit for `url`, then fetches and
/// extracts query-relevant content. Returns `None` when robots policy
/// disallows the URL (a silent skip, not an error).
pub async fn fetch_and_extract(
    url: &str,
    query: &str,
    robots: &RobotsPolicy<'_>,
    throttle: &DomainThrottle,
    extractor: &dyn LlmClient,
) -> anyhow::Result<Option<String>> {
    let (allowed, crawl_delay) = robots.check_url_allowed(url).await?;
    if !allowed {
        return Ok(None);
    }

    if let Some(cached) = throttle.get_cached_response(url).await {
        let extracted = extract_from_text(&cached.content_type, &cached.text, query, extractor).await?;
        return Ok(Some(extracted));
    }

    let domain = url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_default();
    throttle.wait_for_rate_limit(&domain, crawl_delay).await;

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(FETCH_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| FetchError::Network {
            url: url.to_string(),
            source: e.to_string(),
        })?;

    let resp = match client.get(url).send().await {
        Ok(r) => r,
        Err(e) => {
            return Ok(Some(format!("Could not fetch {url}: {e}")));
        }
    };

    if !resp.status().is_success() {
        return Ok(Some(format!("Could not fetch {url}: HTTP {}", resp.status().as_u16())));
    }

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .split(';')
        .next()
        .unwrap_or("application/octet-stream")
        .trim()
        .to_ascii_lowercase();

    let cache_control = resp
        .headers()
        .get(reqwest::header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let expires = resp
        .headers()
        .get(reqwest::header::EXPIRES)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let status_code = resp.status().as_u16();

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| FetchError::Network {
            url: url.to_string(),
            source: e.to_string(),
        })?;

    if content_type == "application/pdf" {
        let extracted = extract_pdf(&bytes, query, extractor).await?;
        return Ok(Some(extracted));
    }

    if content_type.starts_with("image/") {
        let described = extractor
            .complete_with_image(
                EXTRACTOR_SYSTEM_PROMPT,
                &format!("Query: {query}"),
                &bytes,
                &content_type,
            )
            .await
            .map_err(ExtractionError::from)?;
        return Ok(Some(described));
    }

    if content_type == "text/html" || content_type.starts_with("text/") {
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let reduced = if content_type == "text/html" {
            strip_html(&text)
        } else {
            text
        };
        cache_text_response(throttle, url, status_code, cache_control.as_deref(), expires.as_deref(), &content_type, &reduced).await;
        let extracted = extract_from_text(&content_type, &reduced, query, extractor).await?;
        return Ok(Some(extracted));
    }

    Ok(Some(format!("Unsupported content type: {content_type}")))
}

async fn cache_text_response(
    throttle: &DomainThrottle,
    url: &str,
    status_code: u16,
    cache_control: Option<&str>,
    expires: Option<&str>,
    content_type: &str,
    text: &str,
) {
    throttle
        .cache_response(url, status_code, cache_control, expires, content_type, text)
        .await;
}

async fn extract_from_text(
    content_type: &str,
    text: &str,
    query: &str,
    extractor: &dyn LlmClient,
) -> Result<String, ExtractionError> {
    let _ = content_type;
    let truncated = truncate_chars(text, MAX_HTML_CHARS);
    let prompt = format!("Query: {query}\n\nDocument:\n{truncated}");
    Ok(extractor.complete(EXTRACTOR_SYSTEM_PROMPT, &prompt).await?)
}

async fn extract_pdf(bytes: &[u8], query: &str, extractor: &dyn LlmClient) -> Result<String, ExtractionError> {
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractionError::Pdf(e.to_string()))?;
    let truncated = truncate_chars(&text, MAX_PDF_CHARS);
    let prompt = format!("Query: {query}\n\nDocument:\n{truncated}");
    Ok(extractor.complete(EXTRACTOR_SYSTEM_PROMPT, &prompt).await?)
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Strips `<script>`, `<style>`, `<nav>`, `<footer>`, `<header>`, and
/// `<noscript>` elements, then collapses the remaining text nodes to lines
/// separated by newlines.
fn strip_html(html: &str) -> String {
    let document = Html::parse_document(html);
    let strip_selector = Selector::parse("script, style, nav, footer, header, noscript").unwrap();
    let strip_ids: std::collections::HashSet<_> = document
        .select(&strip_selector)
        .flat_map(|el| el.descendants().map(|n| n.id()))
        .collect();

    let mut lines = Vec::new();
    for node in document.root_element().descendants() {
        if strip_ids.contains(&node.id()) {
            continue;
        }
        if let Some(text) = node.value().as_text() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_html_drops_script_and_style() {
        let html = "<html><head><style>.a{}</style></head><body><script>x()</script><p>Hello</p><nav>Menu</nav></body></html>";
        let out = strip_html(html);
        assert!(out.contains("Hello"));
        assert!(!out.contains("x()"));
        assert!(!out.contains(".a{}"));
        assert!(!out.contains("Menu"));
    }

    #[test]
    fn truncate_chars_respects_char_boundary() {
        let s = "hello world";
        assert_eq!(truncate_chars(s, 5), "hello");
    }
}
