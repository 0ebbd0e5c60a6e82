use std::sync::Arc;

use once_cell::sync::OnceCell;
use scan_db::PgPool;

use crate::llm::{ChatClient, LlmClient};
use crate::search::SearchClient;
use crate::throttle::DomainThrottle;

/// Process-wide shared resources, wired once at startup (see `main.rs`) and
/// handed out through the accessors below, mirroring the teacher's
/// single-accessor-per-resource style (`index_engine()`).
struct AppServices {
    pool: PgPool,
    throttle: Arc<DomainThrottle>,
    llm: Arc<dyn LlmClient>,
    chat: Arc<dyn ChatClient>,
    extractor: Arc<dyn LlmClient>,
    search: Arc<dyn SearchClient>,
}

static APP: OnceCell<AppServices> = OnceCell::new();

/// Wires the shared resources. Called once from `main` after the database
/// pool has connected; a second call is a bug and panics. `llm` and `chat`
/// are typically two trait-object views (`LlmClient`, `ChatClient`) onto the
/// same concrete client (`GeminiClient` implements both).
pub fn init(
    pool: PgPool,
    throttle: Arc<DomainThrottle>,
    llm: Arc<dyn LlmClient>,
    chat: Arc<dyn ChatClient>,
    extractor: Arc<dyn LlmClient>,
    search: Arc<dyn SearchClient>,
) {
    APP.set(AppServices {
        pool,
        throttle,
        llm,
        chat,
        extractor,
        search,
    })
    .ok()
    .expect("services::init called twice");
}

fn app() -> &'static AppServices {
    APP.get().expect("services::init not called")
}

/// The shared database pool.
pub fn db() -> &'static PgPool {
    &app().pool
}

/// The shared domain throttle (rate limit + response cache backends).
pub fn throttle() -> &'static DomainThrottle {
    &app().throttle
}

/// The one-shot completion client used by the query classifier.
pub fn llm() -> &'static dyn LlmClient {
    app().llm.as_ref()
}

/// The tool-calling LLM client driving the research agent's loop.
pub fn chat() -> &'static dyn ChatClient {
    app().chat.as_ref()
}

/// The smaller/cheaper extractor LLM used by the fetcher.
pub fn extractor() -> &'static dyn LlmClient {
    app().extractor.as_ref()
}

/// The web-search client used by the research agent's `research` tool.
pub fn search() -> &'static dyn SearchClient {
    app().search.as_ref()
}
