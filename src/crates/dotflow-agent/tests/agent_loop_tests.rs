//! Agent loop behavior against scripted model clients.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use dotflow_agent::agent::{run_agent, AgentError, AgentOptions};
use dotflow_agent::events::{AgentEvent, EventSink};
use dotflow_agent::loop_detector::STEERING_MESSAGE;
use dotflow_agent::tools::default_tools;
use dotflow_core::cancel::CancellationToken;
use dotflow_core::llm::{
    ContentBlock, GenerateRequest, GenerateResponse, ModelClient, ModelResult, StopReason, Usage,
};

/// Replays a fixed sequence of responses; repeats the last behavior or
/// returns plain text once the script is exhausted.
struct ScriptedClient {
    script: Mutex<VecDeque<GenerateResponse>>,
    calls: AtomicUsize,
    /// When set, every call past the script re-requests this tool call.
    always_tool: Option<(String, serde_json::Value)>,
}

impl ScriptedClient {
    fn from_script(responses: Vec<GenerateResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
            always_tool: None,
        }
    }

    fn always_requesting(name: &str, input: serde_json::Value) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            always_tool: Some((name.to_string(), input)),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn text_response(text: &str) -> GenerateResponse {
    GenerateResponse {
        blocks: vec![ContentBlock::Text {
            text: text.to_string(),
        }],
        stop_reason: StopReason::EndTurn,
        usage: Usage::default(),
    }
}

fn tool_response(id: &str, name: &str, input: serde_json::Value) -> GenerateResponse {
    GenerateResponse {
        blocks: vec![ContentBlock::ToolUse {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }],
        stop_reason: StopReason::ToolUse,
        usage: Usage::default(),
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn complete(
        &self,
        _cancel: &CancellationToken,
        _request: GenerateRequest,
    ) -> ModelResult<GenerateResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.script.lock().unwrap().pop_front() {
            return Ok(scripted);
        }
        match &self.always_tool {
            Some((name, input)) => Ok(tool_response(
                &format!("call_{}", call),
                name,
                input.clone(),
            )),
            None => Ok(text_response("done")),
        }
    }
}

fn options(max_turns: usize, events: EventSink) -> AgentOptions {
    AgentOptions {
        model: "test-model".to_string(),
        max_turns,
        events,
        ..AgentOptions::default()
    }
}

#[tokio::test]
async fn completes_after_tool_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("input.txt"), "file payload").unwrap();
    let tools = default_tools(dir.path());

    let client = ScriptedClient::from_script(vec![
        tool_response("t1", "read_file", json!({"path": "input.txt"})),
        text_response("final answer"),
    ]);

    let outcome = run_agent(
        &CancellationToken::new(),
        &client,
        &tools,
        "inspect the file",
        options(10, EventSink::disabled()),
    )
    .await
    .unwrap();

    assert_eq!(outcome.text, "final answer");
    assert_eq!(outcome.turns, 2);
    assert_eq!(client.calls(), 2);

    // Session shape: seed, assistant tool use, tool results, assistant text.
    let messages = outcome.session.messages();
    assert_eq!(messages.len(), 4);
    match &messages[2].blocks[0] {
        ContentBlock::ToolResult {
            content, is_error, ..
        } => {
            assert!(!is_error);
            assert_eq!(content, "file payload");
        }
        other => panic!("unexpected block: {other:?}"),
    }
}

#[tokio::test]
async fn max_turns_fails_on_following_turn() {
    let dir = tempfile::tempdir().unwrap();
    let tools = default_tools(dir.path());
    // Distinct inputs per call so loop detection never interferes.
    let client = ScriptedClient::from_script(
        (0..10)
            .map(|i| tool_response(&format!("t{i}"), "list_dir", json!({"path": format!("d{i}")})))
            .collect(),
    );

    let err = run_agent(
        &CancellationToken::new(),
        &client,
        &tools,
        "spin forever",
        options(3, EventSink::disabled()),
    )
    .await
    .unwrap_err();

    match err {
        AgentError::MaxTurns { turns } => assert_eq!(turns, 3),
        other => panic!("unexpected error: {other}"),
    }
    // The bound is checked after each full turn, so the failing turn is
    // the fourth.
    assert_eq!(client.calls(), 4);
}

#[tokio::test]
async fn repeated_identical_call_is_steered_not_executed() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("same.txt"), "contents").unwrap();
    let tools = default_tools(dir.path());

    let repeated = json!({"path": "same.txt"});
    let client = ScriptedClient::from_script(vec![
        tool_response("t1", "read_file", repeated.clone()),
        tool_response("t2", "read_file", repeated.clone()),
        tool_response("t3", "read_file", repeated.clone()),
        text_response("gave up"),
    ]);

    let (events, mut rx) = EventSink::channel();
    let outcome = run_agent(
        &CancellationToken::new(),
        &client,
        &tools,
        "read the same file",
        options(10, events),
    )
    .await
    .unwrap();
    assert_eq!(outcome.text, "gave up");

    // Third identical call produced a steering result instead of output.
    // Message layout: seed, then (assistant, tool results) per turn, so
    // the third turn's results are message 6.
    let messages = outcome.session.messages();
    let third_result = &messages[6].blocks[0];
    match third_result {
        ContentBlock::ToolResult {
            content, is_error, ..
        } => {
            assert!(is_error);
            assert_eq!(content, STEERING_MESSAGE);
        }
        other => panic!("unexpected block: {other:?}"),
    }

    let mut saw_steering = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, AgentEvent::Steering { ref name } if name == "read_file") {
            saw_steering = true;
        }
    }
    assert!(saw_steering);
}

#[tokio::test]
async fn interleaved_distinct_calls_do_not_trigger_steering() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "a").unwrap();
    std::fs::write(dir.path().join("b.txt"), "b").unwrap();
    let tools = default_tools(dir.path());

    let client = ScriptedClient::from_script(vec![
        tool_response("t1", "read_file", json!({"path": "a.txt"})),
        tool_response("t2", "read_file", json!({"path": "b.txt"})),
        tool_response("t3", "read_file", json!({"path": "a.txt"})),
        text_response("done"),
    ]);

    let outcome = run_agent(
        &CancellationToken::new(),
        &client,
        &tools,
        "read both",
        options(10, EventSink::disabled()),
    )
    .await
    .unwrap();

    for message in outcome.session.messages() {
        for block in &message.blocks {
            if let ContentBlock::ToolResult { content, .. } = block {
                assert_ne!(content, STEERING_MESSAGE);
            }
        }
    }
}

#[tokio::test]
async fn unknown_tool_reports_error_result_and_continues() {
    let dir = tempfile::tempdir().unwrap();
    let tools = default_tools(dir.path());
    let client = ScriptedClient::from_script(vec![
        tool_response("t1", "teleport", json!({"to": "prod"})),
        text_response("recovered"),
    ]);

    let outcome = run_agent(
        &CancellationToken::new(),
        &client,
        &tools,
        "try something odd",
        options(10, EventSink::disabled()),
    )
    .await
    .unwrap();

    assert_eq!(outcome.text, "recovered");
    match &outcome.session.messages()[2].blocks[0] {
        ContentBlock::ToolResult {
            content, is_error, ..
        } => {
            assert!(is_error);
            assert!(content.contains("teleport"));
            assert!(content.contains("not found"));
        }
        other => panic!("unexpected block: {other:?}"),
    }
}

#[tokio::test]
async fn tool_failure_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let tools = default_tools(dir.path());
    let client = ScriptedClient::from_script(vec![
        tool_response("t1", "read_file", json!({"path": "missing.txt"})),
        text_response("noted the failure"),
    ]);

    let outcome = run_agent(
        &CancellationToken::new(),
        &client,
        &tools,
        "read a missing file",
        options(10, EventSink::disabled()),
    )
    .await
    .unwrap();

    assert_eq!(outcome.text, "noted the failure");
    match &outcome.session.messages()[2].blocks[0] {
        ContentBlock::ToolResult { is_error, .. } => assert!(is_error),
        other => panic!("unexpected block: {other:?}"),
    }
}

#[tokio::test]
async fn long_run_truncates_but_keeps_seed() {
    let dir = tempfile::tempdir().unwrap();
    let tools = default_tools(dir.path());
    let client = ScriptedClient::always_requesting("list_dir", json!({"path": "."}));

    // Never finishes; fails at the turn cap. Along the way the session
    // must have been truncated without losing the seed.
    let err = run_agent(
        &CancellationToken::new(),
        &client,
        &tools,
        "the original instruction",
        options(20, EventSink::disabled()),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AgentError::MaxTurns { turns: 20 }));
}

#[tokio::test]
async fn cancellation_stops_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let tools = default_tools(dir.path());
    let client = ScriptedClient::always_requesting("list_dir", json!({"path": "."}));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = run_agent(&cancel, &client, &tools, "anything", options(10, EventSink::disabled()))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Cancelled));
    assert_eq!(client.calls(), 0);
}
