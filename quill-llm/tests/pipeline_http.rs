//! Generate pipeline against a local mock HTTP server.
//!
//! Covers the full request → retry → parse → clean path and the memory
//! decorator's append behavior on success and failure.

use std::time::Duration;

use mockito::{Matcher, Server};
use serde_json::json;

use quill_llm::{
    CancellationToken, GenerateOptions, Generator, Llm, LlmConfig, LlmError, Message, Prompt, Role,
};

fn config(server: &Server, max_retries: u32) -> LlmConfig {
    LlmConfig::default()
        .with_provider("openai", "gpt-4o-mini")
        .with_api_key("sk-test")
        .with_endpoint(format!("{}/v1/chat/completions", server.url()))
        .with_retries(max_retries, Duration::from_millis(1))
}

fn completion(content: &str) -> String {
    json!({
        "id": "chatcmpl-1",
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }],
        "usage": { "completion_tokens": 3 }
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// Plain pipeline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sends_prompt_and_returns_text() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_header("content-type", "application/json")
        .match_body(Matcher::PartialJson(json!({
            "model": "gpt-4o-mini",
            "messages": [{ "role": "user", "content": "Say hi" }],
            "max_tokens": 300
        })))
        .with_status(200)
        .with_body(completion("Hi!"))
        .expect(1)
        .create_async()
        .await;

    let llm = Llm::new(&config(&server, 0)).expect("client");
    let text = llm
        .generate(&Prompt::new("Say hi"), &GenerateOptions::default(), &CancellationToken::new())
        .await
        .expect("generate");

    assert_eq!(text, "Hi!");
    mock.assert_async().await;
}

#[tokio::test]
async fn call_overrides_reach_the_request() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::PartialJson(json!({ "max_tokens": 42 })))
        .with_status(200)
        .with_body(completion("ok"))
        .expect(1)
        .create_async()
        .await;

    let llm = Llm::new(&config(&server, 0)).expect("client");
    llm.generate(
        &Prompt::new("x"),
        &GenerateOptions::default().with_max_tokens(42),
        &CancellationToken::new(),
    )
    .await
    .expect("generate");

    mock.assert_async().await;
}

#[tokio::test]
async fn structured_output_is_cleaned() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_body(completion("Here you go:\n```json\n{\"score\": 0.9}\n```"))
        .create_async()
        .await;

    let llm = Llm::new(&config(&server, 0)).expect("client");
    let text = llm
        .generate(&Prompt::new("grade"), &GenerateOptions::json(), &CancellationToken::new())
        .await
        .expect("generate");

    assert_eq!(text, "{\"score\": 0.9}");
}

#[tokio::test]
async fn server_errors_are_retried_then_surfaced() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(500)
        .with_body("upstream exploded")
        .expect(3)
        .create_async()
        .await;

    let llm = Llm::new(&config(&server, 2)).expect("client");
    let err = llm
        .generate(&Prompt::new("x"), &GenerateOptions::default(), &CancellationToken::new())
        .await
        .expect_err("all attempts fail");

    match err {
        LlmError::Api { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "upstream exploded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(401)
        .with_body("{\"error\":\"invalid api key\"}")
        .expect(1)
        .create_async()
        .await;

    let llm = Llm::new(&config(&server, 3)).expect("client");
    let err = llm
        .generate(&Prompt::new("x"), &GenerateOptions::default(), &CancellationToken::new())
        .await
        .expect_err("unauthorized");

    assert!(matches!(err, LlmError::Api { status: 401, .. }));
    mock.assert_async().await;
}

#[tokio::test]
async fn malformed_body_is_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_body("<html>gateway</html>")
        .expect(2)
        .create_async()
        .await;

    let llm = Llm::new(&config(&server, 1)).expect("client");
    let err = llm
        .generate(&Prompt::new("x"), &GenerateOptions::default(), &CancellationToken::new())
        .await
        .expect_err("never decodes");

    assert!(matches!(err, LlmError::MalformedResponse(_)));
    mock.assert_async().await;
}

#[tokio::test]
async fn cancelled_token_stops_before_sending() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_body(completion("never"))
        .expect(0)
        .create_async()
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let llm = Llm::new(&config(&server, 3)).expect("client");
    let err = llm
        .generate(&Prompt::new("x"), &GenerateOptions::default(), &cancel)
        .await
        .expect_err("cancelled");

    assert!(matches!(err, LlmError::Cancelled));
    mock.assert_async().await;
}

#[tokio::test]
async fn cancellation_aborts_a_request_in_flight() {
    // Accepts connections and never answers.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let mut config = LlmConfig::default()
        .with_provider("openai", "gpt-4o-mini")
        .with_api_key("sk-test")
        .with_endpoint(format!("http://{addr}/v1/chat/completions"))
        .with_retries(3, Duration::from_millis(1));
    config.request_timeout_ms = 30_000;
    let llm = Llm::new(&config).expect("client");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = llm
        .generate(&Prompt::new("x"), &GenerateOptions::default(), &cancel)
        .await
        .expect_err("cancelled");

    assert!(matches!(err, LlmError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
    silent.abort();
}

// ---------------------------------------------------------------------------
// Memory decorator
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_choices_leave_only_the_user_message() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_body(r#"{"choices":[]}"#)
        .create_async()
        .await;

    let llm = Llm::new(&config(&server, 0).with_memory(1000)).expect("client");
    let err = llm
        .generate(&Prompt::new("hello?"), &GenerateOptions::default(), &CancellationToken::new())
        .await
        .expect_err("empty");

    assert!(matches!(err, LlmError::EmptyResponse));
    assert_eq!(llm.memory(), vec![Message::user("hello?")]);
}

#[tokio::test]
async fn conversation_history_is_sent_with_each_turn() {
    let mut server = Server::new_async().await;
    let first = server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::PartialJson(json!({
            "messages": [{ "role": "user", "content": "My name is Alice" }]
        })))
        .with_status(200)
        .with_body(completion("Nice to meet you, Alice"))
        .expect(1)
        .create_async()
        .await;
    let second = server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::PartialJson(json!({
            "messages": [
                { "role": "user", "content": "My name is Alice" },
                { "role": "assistant", "content": "Nice to meet you, Alice" },
                { "role": "user", "content": "What's my name?" }
            ]
        })))
        .with_status(200)
        .with_body(completion("Alice"))
        .expect(1)
        .create_async()
        .await;

    let llm = Llm::new(&config(&server, 0).with_memory(1000)).expect("client");
    let cancel = CancellationToken::new();
    let options = GenerateOptions::default();

    llm.generate(&Prompt::new("My name is Alice"), &options, &cancel).await.expect("turn 1");
    let answer = llm.generate(&Prompt::new("What's my name?"), &options, &cancel).await.expect("turn 2");

    assert_eq!(answer, "Alice");
    let memory = llm.memory();
    assert_eq!(memory.len(), 4);
    assert_eq!(memory[3].role, Role::Assistant);
    first.assert_async().await;
    second.assert_async().await;

    llm.clear_memory();
    assert!(llm.memory().is_empty());
}

#[tokio::test]
async fn memory_budget_evicts_old_turns() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_body(completion("okay"))
        .create_async()
        .await;

    // Heuristic counter: "okay" = 1 token, each 16-char prompt = 4 tokens.
    let llm = Llm::new(&config(&server, 0).with_memory(10)).expect("client");
    let cancel = CancellationToken::new();
    for prompt in ["first question??", "second question?", "third question!!"] {
        llm.generate(&Prompt::new(prompt), &GenerateOptions::default(), &cancel)
            .await
            .expect("turn");
    }

    let memory = llm.memory();
    let contents: Vec<&str> = memory.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["second question?", "okay", "third question!!", "okay"]);
    assert_eq!(llm.memory().len(), 4);
}
