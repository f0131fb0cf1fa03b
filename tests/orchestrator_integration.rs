//! End-to-end orchestrator tests against a scripted provider
//!
//! These exercise the full turn pipeline: session handling, history
//! assembly, the bounded provider loop, per-call tool dispatch, and
//! persistence of every exchanged message.

use async_trait::async_trait;
use chatloom::config::{Config, ScopedModelConfig};
use chatloom::error::{ChatloomError, Result};
use chatloom::orchestrator::{
    Gateway, InboundNotification, Orchestrator, OutboundSender, UserIdentity, FALLBACK_ANSWER,
    MAX_ROUNDS, TOPIC_PLACEHOLDER,
};
use chatloom::providers::{
    CompletionRequest, CompletionResponse, FunctionCall, Message, Provider, TokenUsage, ToolCall,
};
use chatloom::router::{ModelRouter, PreferenceStore};
use chatloom::store::{Role, SessionStore};
use chatloom::tools::{ToolContext, ToolHandler, ToolRegistry, ToolSpec};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

enum Scripted {
    Reply(CompletionResponse),
    Fail(String),
}

/// Provider that plays back a script and records every request it saw.
///
/// When the script runs out it keeps returning `looped`, which lets tests
/// drive the round budget without writing out eight identical entries.
struct MockProvider {
    script: Mutex<VecDeque<Scripted>>,
    looped: CompletionResponse,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockProvider {
    fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            looped: CompletionResponse::new(Message::assistant("unscripted")),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn looping(response: CompletionResponse) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            looped: response,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn requests(&self) -> Arc<Mutex<Vec<CompletionRequest>>> {
        Arc::clone(&self.requests)
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.requests.lock().unwrap().push(request);
        match self.script.lock().unwrap().pop_front() {
            Some(Scripted::Reply(response)) => Ok(response),
            Some(Scripted::Fail(message)) => Err(ChatloomError::Provider(message).into()),
            None => Ok(self.looped.clone()),
        }
    }
}

struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
        Ok(args)
    }
}

struct FailingTool;

#[async_trait]
impl ToolHandler for FailingTool {
    async fn call(&self, _args: Value, _ctx: &ToolContext) -> Result<Value> {
        Err(ChatloomError::ToolExecution("disk on fire".to_string()).into())
    }
}

struct SilentTool;

#[async_trait]
impl ToolHandler for SilentTool {
    async fn call(&self, _args: Value, _ctx: &ToolContext) -> Result<Value> {
        Ok(Value::Null)
    }
}

fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        function: FunctionCall {
            name: name.to_string(),
            arguments: arguments.to_string(),
        },
    }
}

fn tool_call_reply(calls: Vec<ToolCall>) -> CompletionResponse {
    CompletionResponse::new(Message::assistant_with_tools(None, calls))
}

fn standard_registry() -> Arc<ToolRegistry> {
    let registry = ToolRegistry::new();
    registry
        .register(ToolSpec::new("echo", "Echoes its arguments", Arc::new(EchoTool)))
        .unwrap();
    registry
        .register(ToolSpec::new("broken", "Always fails", Arc::new(FailingTool)))
        .unwrap();
    registry
        .register(ToolSpec::new("silent", "Returns nothing", Arc::new(SilentTool)))
        .unwrap();
    Arc::new(registry)
}

fn test_config() -> Config {
    Config {
        models: vec![ScopedModelConfig::new("mock-model")],
        ..Default::default()
    }
}

fn build_engine(dir: &TempDir, config: Config, provider: Arc<dyn Provider>) -> Orchestrator {
    let prefs = PreferenceStore::with_path(dir.path().join("state.json"));
    let router = ModelRouter::new(config, prefs).unwrap();
    let store = SessionStore::new_with_path(dir.path().join("sessions.db")).unwrap();
    Orchestrator::new(provider, router, store, standard_registry())
}

/// Seeds an active session so the turn does not trigger topic summarization.
fn seed_session(engine: &Orchestrator, user_id: &str) -> String {
    let session = engine.store().create(user_id, "Seeded topic").unwrap();
    session.session_id
}

fn alice() -> UserIdentity {
    UserIdentity::new("u-alice", "alice")
}

#[tokio::test]
async fn test_plain_answer_persists_user_and_assistant_only() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new(vec![Scripted::Reply(
        CompletionResponse::with_usage(Message::assistant("Sunny, 21C"), TokenUsage::new(30, 12)),
    )]));
    let requests = provider.requests();
    let engine = build_engine(&dir, test_config(), provider);
    let session_id = seed_session(&engine, "u-alice");

    let answer = engine
        .run_turn("What's the weather?", &alice(), None, false)
        .await
        .unwrap();
    assert_eq!(answer, "Sunny, 21C");
    assert_eq!(requests.lock().unwrap().len(), 1);

    let entries = engine.store().load_ordered(&session_id).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].role, Role::User);
    assert_eq!(entries[0].content, "What's the weather?");
    assert_eq!(entries[0].name.as_deref(), Some("alice"));
    assert_eq!(entries[1].role, Role::Assistant);
    assert_eq!(entries[1].content, "Sunny, 21C");

    // Usage from the reply lands on the session counter
    let session = engine.store().get_active("u-alice").unwrap().unwrap();
    assert_eq!(session.total_tokens, 42);
}

#[tokio::test]
async fn test_tool_round_trip_feeds_result_back() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new(vec![
        Scripted::Reply(tool_call_reply(vec![tool_call(
            "call_1",
            "echo",
            r#"{"city":"Oslo"}"#,
        )])),
        Scripted::Reply(CompletionResponse::new(Message::assistant("It is Oslo"))),
    ]));
    let requests = provider.requests();
    let engine = build_engine(&dir, test_config(), provider);
    let session_id = seed_session(&engine, "u-alice");

    let answer = engine
        .run_turn("Where am I?", &alice(), None, false)
        .await
        .unwrap();
    assert_eq!(answer, "It is Oslo");

    let entries = engine.store().load_ordered(&session_id).unwrap();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[1].role, Role::Assistant);
    assert!(entries[1].tool_calls.is_some());
    assert_eq!(entries[2].role, Role::Tool);
    assert_eq!(entries[2].tool_call_id.as_deref(), Some("call_1"));
    let outcome: Value = serde_json::from_str(&entries[2].content).unwrap();
    assert_eq!(outcome, json!({"ok": true, "data": {"city": "Oslo"}}));

    // The second provider call saw the tool result in its history
    let second = &requests.lock().unwrap()[1];
    let last = second.messages.last().unwrap();
    assert_eq!(last.role, "tool");
    assert_eq!(last.tool_call_id.as_deref(), Some("call_1"));
}

#[tokio::test]
async fn test_failing_tool_reports_error_and_turn_continues() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new(vec![
        Scripted::Reply(tool_call_reply(vec![tool_call("call_1", "broken", "{}")])),
        Scripted::Reply(CompletionResponse::new(Message::assistant(
            "Sorry, the tool is down",
        ))),
    ]));
    let requests = provider.requests();
    let engine = build_engine(&dir, test_config(), provider);
    let session_id = seed_session(&engine, "u-alice");

    let answer = engine.run_turn("Try it", &alice(), None, false).await.unwrap();
    assert_eq!(answer, "Sorry, the tool is down");
    assert_eq!(requests.lock().unwrap().len(), 2);

    let entries = engine.store().load_ordered(&session_id).unwrap();
    let outcome: Value = serde_json::from_str(&entries[2].content).unwrap();
    assert_eq!(outcome["ok"], json!(false));
    assert!(outcome["error"].as_str().unwrap().contains("disk on fire"));
}

#[tokio::test]
async fn test_one_bad_call_in_a_batch_does_not_poison_siblings() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new(vec![
        Scripted::Reply(tool_call_reply(vec![
            tool_call("call_1", "echo", r#"{"n":1}"#),
            tool_call("call_2", "broken", "{}"),
            tool_call("call_3", "echo", r#"{"n":3}"#),
        ])),
        Scripted::Reply(CompletionResponse::new(Message::assistant("Partial results"))),
    ]));
    let engine = build_engine(&dir, test_config(), provider);
    let session_id = seed_session(&engine, "u-alice");

    engine.run_turn("Batch", &alice(), None, false).await.unwrap();

    let entries = engine.store().load_ordered(&session_id).unwrap();
    let tool_entries: Vec<_> = entries.iter().filter(|e| e.role == Role::Tool).collect();
    assert_eq!(tool_entries.len(), 3);
    assert_eq!(tool_entries[0].tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(tool_entries[1].tool_call_id.as_deref(), Some("call_2"));
    assert_eq!(tool_entries[2].tool_call_id.as_deref(), Some("call_3"));

    let first: Value = serde_json::from_str(&tool_entries[0].content).unwrap();
    let second: Value = serde_json::from_str(&tool_entries[1].content).unwrap();
    let third: Value = serde_json::from_str(&tool_entries[2].content).unwrap();
    assert_eq!(first["ok"], json!(true));
    assert_eq!(second["ok"], json!(false));
    assert_eq!(third, json!({"ok": true, "data": {"n": 3}}));
}

#[tokio::test]
async fn test_null_tool_result_becomes_no_response() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new(vec![
        Scripted::Reply(tool_call_reply(vec![tool_call("call_1", "silent", "{}")])),
        Scripted::Reply(CompletionResponse::new(Message::assistant("ok"))),
    ]));
    let engine = build_engine(&dir, test_config(), provider);
    let session_id = seed_session(&engine, "u-alice");

    engine.run_turn("Quiet", &alice(), None, false).await.unwrap();

    let entries = engine.store().load_ordered(&session_id).unwrap();
    let outcome: Value = serde_json::from_str(&entries[2].content).unwrap();
    assert_eq!(outcome, json!({"ok": false, "error": "No response"}));
}

#[tokio::test]
async fn test_unknown_tool_name_is_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new(vec![
        Scripted::Reply(tool_call_reply(vec![tool_call("call_1", "missing", "{}")])),
        Scripted::Reply(CompletionResponse::new(Message::assistant("ok"))),
    ]));
    let engine = build_engine(&dir, test_config(), provider);
    let session_id = seed_session(&engine, "u-alice");

    let answer = engine.run_turn("Go", &alice(), None, false).await.unwrap();
    assert_eq!(answer, "ok");

    let entries = engine.store().load_ordered(&session_id).unwrap();
    let outcome: Value = serde_json::from_str(&entries[2].content).unwrap();
    assert_eq!(outcome["ok"], json!(false));
    assert!(outcome["error"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn test_round_budget_exhaustion_returns_fallback() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::looping(tool_call_reply(vec![tool_call(
        "call_x",
        "echo",
        r#"{"again":true}"#,
    )])));
    let requests = provider.requests();
    let engine = build_engine(&dir, test_config(), provider);
    let session_id = seed_session(&engine, "u-alice");

    let answer = engine.run_turn("Loop", &alice(), None, false).await.unwrap();
    assert_eq!(answer, FALLBACK_ANSWER);
    assert_eq!(requests.lock().unwrap().len(), MAX_ROUNDS);

    // Every round persisted its assistant request and tool result, and the
    // fallback answer itself was not persisted
    let entries = engine.store().load_ordered(&session_id).unwrap();
    let assistants = entries.iter().filter(|e| e.role == Role::Assistant).count();
    let tools = entries.iter().filter(|e| e.role == Role::Tool).count();
    assert_eq!(assistants, MAX_ROUNDS);
    assert_eq!(tools, MAX_ROUNDS);
    assert_eq!(entries.len(), 1 + 2 * MAX_ROUNDS);
    assert!(entries.iter().all(|e| e.content != FALLBACK_ANSWER));
}

#[tokio::test]
async fn test_history_is_trimmed_to_context_length() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config();
    config.conversation.context_length = 3;
    let provider = Arc::new(MockProvider::new(vec![Scripted::Reply(
        CompletionResponse::new(Message::assistant("short memory")),
    )]));
    let requests = provider.requests();
    let engine = build_engine(&dir, config, provider);
    let session_id = seed_session(&engine, "u-alice");

    for i in 0..5 {
        engine
            .store()
            .append(
                &session_id,
                &chatloom::store::ContextEntry::user(format!("old {}", i), None),
            )
            .unwrap();
    }

    engine.run_turn("newest", &alice(), None, false).await.unwrap();

    let requests = requests.lock().unwrap();
    assert_eq!(requests[0].messages.len(), 3);
    assert_eq!(
        requests[0].messages.last().unwrap().content.as_deref(),
        Some("newest")
    );
}

#[tokio::test]
async fn test_first_turn_creates_session_with_summarized_topic() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new(vec![
        // First call is the topic summarization, second the turn itself
        Scripted::Reply(CompletionResponse::new(Message::assistant("Weather in Oslo"))),
        Scripted::Reply(CompletionResponse::new(Message::assistant("Sunny"))),
    ]));
    let requests = provider.requests();
    let engine = build_engine(&dir, test_config(), provider);

    let answer = engine
        .run_turn("What's the weather in Oslo?", &alice(), None, false)
        .await
        .unwrap();
    assert_eq!(answer, "Sunny");

    let session = engine.store().get_active("u-alice").unwrap().unwrap();
    assert_eq!(session.topic, "Weather in Oslo");

    // The summarization call carried no tools and a single user message
    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].tools.is_empty());
    assert_eq!(requests[0].messages.len(), 1);
}

#[tokio::test]
async fn test_topic_falls_back_to_placeholder_when_summarization_fails() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new(vec![
        Scripted::Fail("summarizer offline".to_string()),
        Scripted::Reply(CompletionResponse::new(Message::assistant("Still works"))),
    ]));
    let engine = build_engine(&dir, test_config(), provider);

    let answer = engine.run_turn("Hello", &alice(), None, false).await.unwrap();
    assert_eq!(answer, "Still works");

    let session = engine.store().get_active("u-alice").unwrap().unwrap();
    assert_eq!(session.topic, TOPIC_PLACEHOLDER);
}

#[tokio::test]
async fn test_force_new_starts_a_fresh_session() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new(vec![
        Scripted::Reply(CompletionResponse::new(Message::assistant("Old session"))),
        // force_new path: summarization then the turn
        Scripted::Reply(CompletionResponse::new(Message::assistant("Fresh start"))),
        Scripted::Reply(CompletionResponse::new(Message::assistant("New session"))),
    ]));
    let engine = build_engine(&dir, test_config(), provider);
    let first_id = seed_session(&engine, "u-alice");

    engine.run_turn("one", &alice(), None, false).await.unwrap();
    engine.run_turn("two", &alice(), None, true).await.unwrap();

    let active = engine.store().get_active("u-alice").unwrap().unwrap();
    assert_ne!(active.session_id, first_id);
    assert_eq!(active.topic, "Fresh start");

    // The new session starts clean
    let entries = engine.store().load_ordered(&active.session_id).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].content, "two");
}

#[tokio::test]
async fn test_routing_error_propagates_before_any_persistence() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new(vec![]));
    let engine = build_engine(&dir, test_config(), provider);
    let session_id = seed_session(&engine, "u-alice");

    let err = engine
        .run_turn("hi", &alice(), Some("no-such-model"), false)
        .await
        .expect_err("unknown model should fail");
    let err = err.downcast::<ChatloomError>().unwrap();
    assert!(matches!(err, ChatloomError::ModelNotFound(_)));

    assert!(engine.store().load_ordered(&session_id).unwrap().is_empty());
}

// --- Gateway ---

struct RecordingSender {
    next_sequence: Mutex<u64>,
    sent: Mutex<Vec<String>>,
}

impl RecordingSender {
    fn new(first_sequence: u64) -> Self {
        Self {
            next_sequence: Mutex::new(first_sequence),
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl OutboundSender for RecordingSender {
    async fn send(&self, text: &str) -> Result<u64> {
        self.sent.lock().unwrap().push(text.to_string());
        let mut next = self.next_sequence.lock().unwrap();
        let sequence = *next;
        *next += 1;
        Ok(sequence)
    }
}

fn notification(text: &str, sequence: u64) -> InboundNotification {
    InboundNotification {
        utterance: text.to_string(),
        sender: alice(),
        channel: "general".to_string(),
        sequence,
    }
}

#[tokio::test]
async fn test_gateway_drops_its_own_echo() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new(vec![Scripted::Reply(
        CompletionResponse::new(Message::assistant("Hello back")),
    )]));
    let requests = provider.requests();
    let engine = Arc::new(build_engine(&dir, test_config(), provider));
    seed_session(&engine, "u-alice");

    let gateway = Gateway::new(Arc::clone(&engine));
    let sender = RecordingSender::new(100);

    let reply = gateway.handle(notification("Hi", 7), &sender).await.unwrap();
    assert_eq!(reply.as_deref(), Some("Hello back"));
    assert_eq!(sender.sent.lock().unwrap().len(), 1);

    // The sent reply came back as sequence 100; it must be dropped
    let echo = gateway
        .handle(notification("Hello back", 100), &sender)
        .await
        .unwrap();
    assert!(echo.is_none());
    assert_eq!(sender.sent.lock().unwrap().len(), 1);
    assert_eq!(requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_gateway_answers_routing_errors_in_channel() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new(vec![]));
    let config = Config::default(); // zero models
    let engine = Arc::new(build_engine(&dir, config, provider));
    seed_session(&engine, "u-alice");

    let gateway = Gateway::new(engine);
    let sender = RecordingSender::new(1);

    let reply = gateway.handle(notification("Hi", 7), &sender).await.unwrap();
    assert_eq!(reply.as_deref(), Some("No models configured"));
    assert_eq!(sender.sent.lock().unwrap()[0], "No models configured");
}

#[tokio::test]
async fn test_gateway_propagates_provider_failures() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new(vec![Scripted::Fail(
        "upstream down".to_string(),
    )]));
    let engine = Arc::new(build_engine(&dir, test_config(), provider));
    seed_session(&engine, "u-alice");

    let gateway = Gateway::new(engine);
    let sender = RecordingSender::new(1);

    let err = gateway
        .handle(notification("Hi", 7), &sender)
        .await
        .expect_err("provider failure should propagate");
    assert!(err.to_string().contains("upstream down"));
    assert!(sender.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_reload_switches_models_for_subsequent_turns() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new(vec![Scripted::Reply(
        CompletionResponse::new(Message::assistant("before")),
    )]));
    let requests = provider.requests();
    let engine = build_engine(&dir, test_config(), provider);
    seed_session(&engine, "u-alice");

    engine.run_turn("hi", &alice(), None, false).await.unwrap();
    assert_eq!(requests.lock().unwrap()[0].model.name, "mock-model");

    let new_config = Config {
        models: vec![ScopedModelConfig::new("replacement-model")],
        ..Default::default()
    };
    engine.reload(new_config).await.unwrap();

    // The old explicit name is gone
    let err = engine
        .run_turn("hi", &alice(), Some("mock-model"), false)
        .await
        .expect_err("removed model should not resolve");
    let err = err.downcast::<ChatloomError>().unwrap();
    assert!(matches!(err, ChatloomError::ModelNotFound(_)));

    assert_eq!(
        engine.router().current_default().as_deref(),
        Some("replacement-model")
    );
}
