use std::collections::HashSet;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc::UnboundedSender;

use crate::fetch::fetch_and_extract;
use crate::llm::{ChatClient, ChatMessage, ChatRole, ChatTurn, LlmClient, ToolCall, ToolSpec};
use crate::pipeline::{DetailEvent, PipelineEvent};
use crate::robots::RobotsPolicy;
use crate::search::{format_results, SearchClient};
use crate::throttle::DomainThrottle;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent llm failed: {0}")]
    Llm(#[from] crate::llm::LlmError),
}

/// Raised by the `ask_user` tool. Caught by the orchestrator, which ends the
/// stream cleanly; it is never surfaced as an error.
#[derive(Debug)]
pub struct ClarificationNeeded {
    pub questions: Vec<String>,
}

const SYSTEM_PROMPT: &str = "\
You are a research assistant. Use the research tool one or more times to \
investigate distinct aspects of the user's question. If the question depends \
on information only the user has (private preferences, dates, account \
details), call ask_user instead of guessing. When you have enough material, \
write a cited markdown answer referencing the sources you found.";

/// Per-invocation state: lives for exactly one pipeline run. The agent task
/// is the sole writer, so no locking is needed.
pub struct AgentContext<'a> {
    pub events: UnboundedSender<PipelineEvent>,
    pub robots: RobotsPolicy<'a>,
    pub throttle: &'a DomainThrottle,
    pub search: &'a dyn SearchClient,
    pub extractor: &'a dyn LlmClient,
    pub fetched_urls: HashSet<String>,
}

impl<'a> AgentContext<'a> {
    pub fn new(
        events: UnboundedSender<PipelineEvent>,
        robots: RobotsPolicy<'a>,
        throttle: &'a DomainThrottle,
        search: &'a dyn SearchClient,
        extractor: &'a dyn LlmClient,
    ) -> Self {
        Self {
            events,
            robots,
            throttle,
            search,
            extractor,
            fetched_urls: HashSet::new(),
        }
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event);
    }
}

fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "research".to_string(),
            description: "Search the web and fetch relevant pages for a distinct aspect of the question.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "topic": {"type": "string"},
                    "context": {"type": "string"},
                },
                "required": ["topic"],
            }),
        },
        ToolSpec {
            name: "ask_user".to_string(),
            description: "Ask the user one or more clarifying questions before continuing.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "questions": {"type": "array", "items": {"type": "string"}},
                },
                "required": ["questions"],
            }),
        },
    ]
}

/// The final assistant text plus the provider's usage snapshot for the turn
/// that produced it, if reported.
pub struct AgentAnswer {
    pub text: String,
    pub usage: Option<serde_json::Value>,
}

/// Runs the tool-use loop to completion, streaming events into
/// `ctx.events` and returning the final assistant answer.
pub async fn run_agent(
    chat: &dyn ChatClient,
    query: &str,
    ctx: &mut AgentContext<'_>,
) -> Result<Result<AgentAnswer, ClarificationNeeded>, AgentError> {
    let mut messages = vec![ChatMessage {
        role: ChatRole::User,
        content: query.to_string(),
        tool_calls: Vec::new(),
        tool_call_id: None,
    }];
    let tools = tool_specs();

    loop {
        match chat.next_turn(SYSTEM_PROMPT, &messages, &tools).await? {
            ChatTurn::Text { text, usage } => return Ok(Ok(AgentAnswer { text, usage })),
            ChatTurn::ToolCalls(calls) => {
                messages.push(ChatMessage {
                    role: ChatRole::Assistant,
                    content: String::new(),
                    tool_calls: calls.clone(),
                    tool_call_id: None,
                });
                for call in calls {
                    match run_tool(&call, ctx).await {
                        Ok(result) => messages.push(ChatMessage {
                            role: ChatRole::Tool,
                            content: result,
                            tool_calls: Vec::new(),
                            tool_call_id: Some(call.id),
                        }),
                        Err(clarification) => return Ok(Err(clarification)),
                    }
                }
            }
        }
    }
}

async fn run_tool(call: &ToolCall, ctx: &mut AgentContext<'_>) -> Result<String, ClarificationNeeded> {
    match call.name.as_str() {
        "research" => Ok(tool_research(call, ctx).await),
        "ask_user" => Err(tool_ask_user(call, ctx)),
        other => Ok(format!("Unknown tool: {other}")),
    }
}

#[derive(Deserialize)]
struct ResearchArgs {
    topic: String,
    #[serde(default)]
    context: Option<String>,
}

async fn tool_research(call: &ToolCall, ctx: &mut AgentContext<'_>) -> String {
    let args: ResearchArgs = match serde_json::from_value(call.arguments.clone()) {
        Ok(a) => a,
        Err(_) => return "Invalid research arguments.".to_string(),
    };

    ctx.emit(PipelineEvent::Detail(DetailEvent::Research {
        topic: args.topic.clone(),
    }));

    let search_query = match &args.context {
        Some(c) if !c.trim().is_empty() => format!("{} {}", args.topic, c).trim().to_string(),
        _ => args.topic.trim().to_string(),
    };
    ctx.emit(PipelineEvent::Detail(DetailEvent::Search {
        query: search_query.clone(),
    }));

    let results = match ctx.search.search(&search_query).await {
        Ok(r) => r,
        Err(_) => return format!("Search failed for: {}", args.topic),
    };
    if results.is_empty() {
        return format!("No search results found for: {}", args.topic);
    }

    let candidates: Vec<_> = results
        .iter()
        .filter(|r| !ctx.fetched_urls.contains(&r.url))
        .take(3)
        .cloned()
        .collect();

    let mut extractions = Vec::new();
    for result in &candidates {
        ctx.emit(PipelineEvent::Detail(DetailEvent::Fetch {
            url: result.url.clone(),
        }));
        let extracted = fetch_and_extract(&result.url, &args.topic, &ctx.robots, ctx.throttle, ctx.extractor)
            .await
            .unwrap_or(None);
        ctx.fetched_urls.insert(result.url.clone());
        if let Some(text) = extracted {
            extractions.push(format!("Source: {}\n{text}", result.url));
        }
    }

    if extractions.is_empty() {
        let summary = format!("No usable extractions for: {}", args.topic);
        ctx.emit(PipelineEvent::Detail(DetailEvent::Result {
            summary: summary.clone(),
        }));
        return format_results(&candidates.into_iter().take(3).collect::<Vec<_>>());
    }

    let summary = format!("Found {} source(s) for: {}", extractions.len(), args.topic);
    ctx.emit(PipelineEvent::Detail(DetailEvent::Result { summary }));
    extractions.join("\n\n---\n\n")
}

#[derive(Deserialize)]
struct AskUserArgs {
    questions: Vec<String>,
}

fn tool_ask_user(call: &ToolCall, ctx: &mut AgentContext<'_>) -> ClarificationNeeded {
    let questions = serde_json::from_value::<AskUserArgs>(call.arguments.clone())
        .map(|a| a.questions)
        .unwrap_or_default();
    ctx.emit(PipelineEvent::Clarification {
        questions: questions.clone(),
    });
    ClarificationNeeded { questions }
}
