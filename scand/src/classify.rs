use crate::llm::LlmClient;

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier llm failed: {0}")]
    Llm(#[from] crate::llm::LlmError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryClass {
    Url,
    Search,
    Research,
}

const SYSTEM_PROMPT: &str = "\
You classify a user's search box query into exactly one of three classes:

URL - the query is (or clearly resolves to) a web address, e.g. \"github.com\", \
\"https://news.ycombinator.com\", \"openai.com/blog\".
SEARCH - the query is a short factual or navigational lookup best served by a \
general web search, e.g. \"best pizza near me\", \"weather in Tokyo\", \"capital of France\".
RESEARCH - the query requires multi-step investigation, synthesis, or reasoning \
across several sources, e.g. \"how does TCP congestion control work?\", \
\"compare the economic policies of the last three US administrations\".

Reply with exactly one word: URL, SEARCH, or RESEARCH.";

/// Single prompted LLM call at temperature 0. The reply is uppercased and
/// trimmed; anything outside `{URL, SEARCH, RESEARCH}` is coerced to
/// `SEARCH` (misclassifying a genuine URL as SEARCH is cheap; the search
/// engine will still surface it).
pub async fn classify(llm: &dyn LlmClient, query: &str) -> Result<QueryClass, ClassifierError> {
    let raw = llm.complete(SYSTEM_PROMPT, query).await?;
    let normalized = raw.trim().to_ascii_uppercase();
    Ok(match normalized.as_str() {
        "URL" => QueryClass::Url,
        "RESEARCH" => QueryClass::Research,
        _ => QueryClass::Search,
    })
}

/// For `URL`, strips a leading `http://`/`https://` and returns the rest
/// (the caller redirects to `https://<rest>`). For `SEARCH`, returns the
/// fixed search-engine URL with the query percent-encoded.
pub fn build_redirect_url(class: QueryClass, query: &str) -> Option<String> {
    match class {
        QueryClass::Url => {
            let cleaned = query
                .trim()
                .trim_start_matches("https://")
                .trim_start_matches("http://");
            Some(format!("https://{cleaned}"))
        }
        QueryClass::Search => {
            let encoded = percent_encoding::utf8_percent_encode(
                query.trim(),
                percent_encoding::NON_ALPHANUMERIC,
            )
            .to_string()
            .replace("%20", "+");
            Some(format!("{}?q={encoded}", crate::config::SEARCH_ENGINE_URL))
        }
        QueryClass::Research => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_redirect_strips_scheme_for_url_class() {
        assert_eq!(
            build_redirect_url(QueryClass::Url, "https://github.com"),
            Some("https://github.com".to_string())
        );
        assert_eq!(
            build_redirect_url(QueryClass::Url, "github.com"),
            Some("https://github.com".to_string())
        );
    }

    #[test]
    fn build_redirect_percent_encodes_search_query() {
        assert_eq!(
            build_redirect_url(QueryClass::Search, "best pizza near me"),
            Some("https://www.google.com/search?q=best+pizza+near+me".to_string())
        );
    }

    #[test]
    fn build_redirect_research_has_no_url() {
        assert_eq!(build_redirect_url(QueryClass::Research, "anything"), None);
    }
}
