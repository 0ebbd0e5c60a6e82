//! Cross-module scenario: the `PipelineEvent`/`DetailEvent` shape an SSE
//! layer depends on (`spec.md` §4.6), an `event` field equal to the
//! lowercase variant name, flattened alongside the variant's own payload.
use scand::pipeline::{DetailEvent, PipelineEvent, Stage};

#[test]
fn stage_event_has_lowercase_event_and_stage_fields() {
    let value = serde_json::to_value(PipelineEvent::Stage {
        stage: Stage::Researching,
    })
    .unwrap();
    assert_eq!(value["event"], "stage");
    assert_eq!(value["stage"], "researching");

    let value = serde_json::to_value(PipelineEvent::Stage {
        stage: Stage::Responding,
    })
    .unwrap();
    assert_eq!(value["stage"], "responding");
}

#[test]
fn detail_event_flattens_type_and_payload_under_event_detail() {
    let value = serde_json::to_value(PipelineEvent::Detail(DetailEvent::Fetch {
        url: "https://example.com/page".to_string(),
    }))
    .unwrap();
    assert_eq!(value["event"], "detail");
    assert_eq!(value["type"], "fetch");
    assert_eq!(value["url"], "https://example.com/page");
}

#[test]
fn text_clarification_done_and_error_variants_tag_correctly() {
    let text = serde_json::to_value(PipelineEvent::Text {
        text: "hello".to_string(),
    })
    .unwrap();
    assert_eq!(text["event"], "text");
    assert_eq!(text["text"], "hello");

    let clarification = serde_json::to_value(PipelineEvent::Clarification {
        questions: vec!["Where from?".to_string()],
    })
    .unwrap();
    assert_eq!(clarification["event"], "clarification");
    assert_eq!(clarification["questions"][0], "Where from?");

    let done = serde_json::to_value(PipelineEvent::Done).unwrap();
    assert_eq!(done["event"], "done");

    let error = serde_json::to_value(PipelineEvent::Error {
        error: "boom".to_string(),
    })
    .unwrap();
    assert_eq!(error["event"], "error");
    assert_eq!(error["error"], "boom");
}
