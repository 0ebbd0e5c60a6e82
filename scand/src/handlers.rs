use scan_db::PgPool;

use crate::classify::{build_redirect_url, classify, QueryClass};
use crate::llm::LlmClient;
use crate::store;

pub const OPENSEARCH_XML: &str = "\
<?xml version=\"1.0\" encoding=\"UTF-8\"?>
<OpenSearchDescription xmlns=\"http://a9.com/-/spec/opensearch/1.1/\">
  <ShortName>scand</ShortName>
  <Description>Smart search with a research agent.</Description>
  <Url type=\"text/html\" template=\"/search?q={searchTerms}\"/>
</OpenSearchDescription>";

const RECENT_SESSIONS_PAGE_SIZE: i64 = 20;

/// What the `/search` handler decided; the external web framework
/// translates this into either a 302 redirect or a JSON body, depending on
/// the request's `Accept` header.
#[derive(Debug, Clone)]
pub enum SearchOutcome {
    Redirect { url: String },
    NewResearchChat { chat_id: i64 },
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("classifier failed: {0}")]
    Classifier(#[from] crate::classify::ClassifierError),

    #[error("store failed: {0}")]
    Store(#[from] crate::store::StoreError),
}

/// `GET /search?q=<query>`. URL/SEARCH classes resolve to a redirect target
/// immediately; RESEARCH creates a chat session plus the first user message
/// and hands back its id for the caller to redirect to `/chat/<id>`.
pub async fn handle_search(
    pool: &PgPool,
    llm: &dyn LlmClient,
    user_id: i64,
    query: &str,
) -> Result<SearchOutcome, HandlerError> {
    let class = classify(llm, query).await?;
    match class {
        QueryClass::Url | QueryClass::Search => {
            let url = build_redirect_url(class, query).expect("url/search classes always redirect");
            Ok(SearchOutcome::Redirect { url })
        }
        QueryClass::Research => {
            let title = query.chars().take(500).collect::<String>();
            let chat_id = store::create_session(pool, user_id, &title).await?;
            store::append_message(pool, chat_id, "user", query, None, None).await?;
            Ok(SearchOutcome::NewResearchChat { chat_id })
        }
    }
}

/// `GET /chat/<id>`. `None` means the chat does not exist or is not owned
/// by `user_id`.
pub async fn handle_get_chat(
    pool: &PgPool,
    chat_id: i64,
    user_id: i64,
) -> Result<Option<(store::ChatSession, Vec<store::ChatMessage>)>, HandlerError> {
    let Some(session) = store::get_session(pool, chat_id, user_id).await? else {
        return Ok(None);
    };
    let messages = store::list_messages(pool, chat_id).await?;
    Ok(Some((session, messages)))
}

/// Whether a chat's last message is from `user`, i.e. it is "pending a
/// response" and `GET /chat/<id>/stream` should be driven.
pub fn needs_streaming(messages: &[store::ChatMessage]) -> bool {
    messages.last().is_some_and(|m| m.role == "user")
}

/// `POST /chat/<id>/message`. Appends a user message, bumping the session's
/// `updated_at`.
pub async fn handle_post_message(pool: &PgPool, chat_id: i64, content: &str) -> Result<i64, HandlerError> {
    Ok(store::append_message(pool, chat_id, "user", content, None, None).await?)
}

/// `GET /history?page=N`. Pages are 20 sessions wide, newest-updated first.
pub async fn handle_history(
    pool: &PgPool,
    user_id: i64,
    page: i64,
) -> Result<Vec<store::ChatSession>, HandlerError> {
    let page = page.max(1);
    let offset = (page - 1) * RECENT_SESSIONS_PAGE_SIZE;
    Ok(store::list_recent_sessions(pool, user_id, offset, RECENT_SESSIONS_PAGE_SIZE).await?)
}

/// `GET /healthz`.
pub fn handle_healthz() -> serde_json::Value {
    serde_json::json!({"ok": true})
}

/// `GET /chat/<id>/stream`'s inputs: the query to drive the agent with (the
/// content of the chat's last `user` message) and every earlier message,
/// oldest first, rendered as `"<role>: <content>"` for
/// `run_research_pipeline`'s `conversation_history` parameter. `None` when
/// the chat has no messages or its last message isn't from `user` (nothing
/// to stream a response to).
pub fn build_stream_inputs(messages: &[store::ChatMessage]) -> Option<(String, Vec<String>)> {
    let (last, earlier) = messages.split_last()?;
    if last.role != "user" {
        return None;
    }
    let history = earlier
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect();
    Some((last.content.clone(), history))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(id: i64, role: &str, content: &str) -> store::ChatMessage {
        store::ChatMessage {
            id,
            chat_id: 1,
            role: role.to_string(),
            content: content.to_string(),
            events_json: "[]".to_string(),
            usage_json: "{}".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn build_stream_inputs_splits_query_from_history() {
        let messages = vec![
            message(1, "user", "how does TCP congestion control work?"),
            message(2, "assistant", "Here's an overview..."),
            message(3, "user", "book me a flight"),
        ];
        let (query, history) = build_stream_inputs(&messages).expect("last message is from user");
        assert_eq!(query, "book me a flight");
        assert_eq!(
            history,
            vec![
                "user: how does TCP congestion control work?".to_string(),
                "assistant: Here's an overview...".to_string(),
            ]
        );
    }

    #[test]
    fn build_stream_inputs_none_when_last_message_is_assistant() {
        let messages = vec![
            message(1, "user", "q"),
            message(2, "assistant", "a"),
        ];
        assert!(build_stream_inputs(&messages).is_none());
    }

    #[test]
    fn build_stream_inputs_none_when_empty() {
        assert!(build_stream_inputs(&[]).is_none());
    }
}
