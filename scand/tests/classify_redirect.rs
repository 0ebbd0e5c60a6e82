//! Cross-module scenarios 1 and 2 from `spec.md` §8: URL/SEARCH queries
//! resolve to a redirect target without ever touching the chat store.
use async_trait::async_trait;

use scand::classify::{build_redirect_url, classify, QueryClass};
use scand::llm::{LlmClient, LlmError};

struct FixedReply(&'static str);

#[async_trait]
impl LlmClient for FixedReply {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
        Ok(self.0.to_string())
    }

    async fn complete_with_image(
        &self,
        _system: &str,
        _user: &str,
        _image_bytes: &[u8],
        _mime_type: &str,
    ) -> Result<String, LlmError> {
        unreachable!("classifier never sends images")
    }
}

#[tokio::test]
async fn url_query_redirects_to_bare_domain_over_https() {
    let llm = FixedReply("url");
    let class = classify(&llm, "github.com").await.unwrap();
    assert_eq!(class, QueryClass::Url);
    assert_eq!(
        build_redirect_url(class, "github.com"),
        Some("https://github.com".to_string())
    );
}

#[tokio::test]
async fn search_query_redirects_to_percent_encoded_google_search() {
    let llm = FixedReply("  search  ");
    let class = classify(&llm, "best pizza near me").await.unwrap();
    assert_eq!(class, QueryClass::Search);
    assert_eq!(
        build_redirect_url(class, "best pizza near me"),
        Some("https://www.google.com/search?q=best+pizza+near+me".to_string())
    );
}

#[tokio::test]
async fn unrecognized_llm_output_coerces_to_search() {
    let llm = FixedReply("definitely not a class");
    let class = classify(&llm, "anything").await.unwrap();
    assert_eq!(class, QueryClass::Search);
}
