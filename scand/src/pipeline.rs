use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::agent::{run_agent, AgentContext};
use crate::llm::{ChatClient, LlmClient};
use crate::robots::RobotsPolicy;
use crate::search::SearchClient;
use crate::store;
use crate::throttle::DomainThrottle;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("agent failed: {0}")]
    Agent(#[from] crate::agent::AgentError),

    #[error("store failed: {0}")]
    Store(#[from] crate::store::StoreError),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DetailEvent {
    Research { topic: String },
    Search { query: String },
    Fetch { url: String },
    Result { summary: String },
    Usage { payload: serde_json::Value },
}

/// The typed event stream a pipeline run produces. The SSE layer frames
/// each variant with an `event:` field equal to its lowercase name and a
/// `data:` field holding its JSON payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum PipelineEvent {
    Stage { stage: Stage },
    Detail(DetailEvent),
    Text { text: String },
    Clarification { questions: Vec<String> },
    Done,
    Error { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Researching,
    Responding,
}

/// Runs the research agent for `chat_id`, streaming `PipelineEvent`s to the
/// returned receiver. The agent runs on its own task; this function's
/// caller drains the receiver (e.g. to an SSE writer) while the background
/// task persists the final assistant message on completion.
pub fn run_research_pipeline(
    pool: scan_db::PgPool,
    chat: std::sync::Arc<dyn ChatClient>,
    search: std::sync::Arc<dyn SearchClient>,
    extractor: std::sync::Arc<dyn LlmClient>,
    throttle: std::sync::Arc<DomainThrottle>,
    chat_id: i64,
    query: String,
    additional_context: Option<String>,
    conversation_history: Vec<String>,
) -> UnboundedReceiver<PipelineEvent> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let _ = tx.send(PipelineEvent::Stage {
            stage: Stage::Researching,
        });

        let mut effective_query = query;
        if !conversation_history.is_empty() {
            effective_query = format!("{}\n\n{effective_query}", conversation_history.join("\n\n"));
        }
        if let Some(ctx_text) = additional_context.filter(|c| !c.trim().is_empty()) {
            effective_query = format!("{effective_query}\n\nAdditional context from user: {ctx_text}");
        }

        let robots = RobotsPolicy::new(&pool);
        let mut agent_ctx = AgentContext::new(tx.clone(), robots, throttle.as_ref(), search.as_ref(), extractor.as_ref());

        let mut event_log: Vec<PipelineEvent> = Vec::new();
        let mut responded = false;
        let mut text_accum = String::new();

        let outcome = run_agent(chat.as_ref(), &effective_query, &mut agent_ctx).await;

        match outcome {
            Ok(Ok(answer)) => {
                if !responded {
                    let _ = tx.send(PipelineEvent::Stage {
                        stage: Stage::Responding,
                    });
                    event_log.push(PipelineEvent::Stage {
                        stage: Stage::Responding,
                    });
                    responded = true;
                }
                let text_event = PipelineEvent::Text {
                    text: answer.text.clone(),
                };
                let _ = tx.send(text_event.clone());
                event_log.push(text_event);
                text_accum.push_str(&answer.text);

                let usage_json = if let Some(payload) = answer.usage {
                    let usage_event = PipelineEvent::Detail(DetailEvent::Usage {
                        payload: payload.clone(),
                    });
                    let _ = tx.send(usage_event.clone());
                    event_log.push(usage_event);
                    serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string())
                } else {
                    "{}".to_string()
                };

                let _ = tx.send(PipelineEvent::Done);
                event_log.push(PipelineEvent::Done);

                let events_json = serde_json::to_string(&event_log).unwrap_or_else(|_| "[]".to_string());
                let _ = store::append_message(
                    &pool,
                    chat_id,
                    "assistant",
                    &text_accum,
                    Some(&events_json),
                    Some(&usage_json),
                )
                .await;
            }
            Ok(Err(_clarification)) => {
                // ClarificationNeeded already emitted its own event inside the
                // agent loop; end the stream without persisting a message.
            }
            Err(e) => {
                let _ = tx.send(PipelineEvent::Error {
                    error: e.to_string(),
                });
            }
        }
    });

    rx
}
