//! Integration tests for the SSE streaming endpoint, driving the model/tool
//! loop end to end with a scripted backend.

use std::sync::Arc;
use std::time::Duration;

use archivist::llm::mock::ScriptedProvider;
use archivist::llm::ToolCall;
use archivist::server::build_app;
use archivist::tools::{Tool, ToolDispatcher, ToolError};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use http_body_util::BodyExt;
use tower::ServiceExt;

mod common;
use common::{parse_sse_events, test_app, test_app_state, usage};

async fn create_session(app: &axum::Router) -> String {
    let response = app
        .clone()
        .oneshot(Request::post("/api/v1/sessions").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    json["session_id"].as_str().unwrap().to_string()
}

async fn send_message(app: &axum::Router, session_id: &str, message: &str) -> (u16, String) {
    let response = app
        .clone()
        .oneshot(
            Request::post(format!("/api/v1/sessions/{session_id}/messages"))
                .header("content-type", "application/json")
                .body(Body::from(format!(r#"{{"message":"{message}"}}"#)))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status().as_u16();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

#[tokio::test]
async fn plain_turn_streams_content_then_summary() {
    // Scenario: content chunks "Hi", " there" and no tool calls.
    let app = test_app(vec![ScriptedProvider::chunks(
        &["Hi", " there"],
        usage(10, 4, 0),
    )])
    .await;
    let session_id = create_session(&app).await;

    let (status, body) = send_message(&app, &session_id, "Hello").await;
    assert_eq!(status, 200);

    let events = parse_sse_events(&body);
    let names: Vec<&str> = events.iter().map(|(e, _)| e.as_str()).collect();
    assert_eq!(names, vec!["message_start", "content", "content", "message_end"]);

    let start: serde_json::Value = serde_json::from_str(&events[0].1).unwrap();
    assert_eq!(start["session_id"], session_id);
    let first: serde_json::Value = serde_json::from_str(&events[1].1).unwrap();
    assert_eq!(first["text"], "Hi");
    let end: serde_json::Value = serde_json::from_str(&events[3].1).unwrap();
    assert_eq!(end["usage"]["input_tokens"], 10);

    // The finished turn is visible in history.
    let history = app
        .clone()
        .oneshot(
            Request::get(format!("/api/v1/sessions/{session_id}/history"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = history.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let turns = json["turns"].as_array().unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0]["final_text"], "Hi there");
    assert_eq!(turns[0]["outcome"]["status"], "completed");
}

#[tokio::test]
async fn tool_turn_streams_call_result_then_content() {
    // Scenario: the model requests search_docs, reads the result, answers.
    let call = ToolCall {
        id: "call_b".to_string(),
        name: "search_docs".to_string(),
        input: serde_json::json!({"query": "pinning"}),
    };
    let app = test_app(vec![
        ScriptedProvider::tool_use(call, usage(20, 10, 0)),
        ScriptedProvider::chunks(&["Pinning prevents moves."], usage(40, 12, 0)),
    ])
    .await;
    let session_id = create_session(&app).await;

    let (status, body) = send_message(&app, &session_id, "what is pinning?").await;
    assert_eq!(status, 200);

    let events = parse_sse_events(&body);
    let names: Vec<&str> = events.iter().map(|(e, _)| e.as_str()).collect();
    assert_eq!(
        names,
        vec!["message_start", "tool_call", "tool_result", "content", "message_end"]
    );

    let tool_call: serde_json::Value = serde_json::from_str(&events[1].1).unwrap();
    assert_eq!(tool_call["name"], "search_docs");
    assert_eq!(tool_call["input"]["query"], "pinning");

    let tool_result: serde_json::Value = serde_json::from_str(&events[2].1).unwrap();
    assert_eq!(tool_result["name"], "search_docs");
    // The seeded document matches the query.
    assert_eq!(tool_result["output"]["total"], 1);

    // History records steps in production order.
    let history = app
        .clone()
        .oneshot(
            Request::get(format!("/api/v1/sessions/{session_id}/history"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = history.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let steps = json["turns"][0]["steps"].as_array().unwrap();
    assert_eq!(steps[0]["type"], "tool_call");
    assert_eq!(steps[1]["type"], "tool_result");
    assert_eq!(steps[2]["type"], "content");
}

#[tokio::test]
async fn runaway_tool_loop_ends_in_error_event() {
    // Scenario: the model never stops requesting tools.
    let call = ToolCall {
        id: String::new(),
        name: "get_catalog".to_string(),
        input: serde_json::json!({}),
    };
    let mut state = test_app_state(vec![]).await;
    state.provider = Arc::new(ScriptedProvider::repeating(ScriptedProvider::tool_use(
        call,
        usage(5, 5, 0),
    )));
    let app = build_app(state, 30);
    let session_id = create_session(&app).await;

    let (status, body) = send_message(&app, &session_id, "loop").await;
    assert_eq!(status, 200);

    let events = parse_sse_events(&body);
    let (last_name, last_data) = events.last().unwrap();
    assert_eq!(last_name, "error");
    let error: serde_json::Value = serde_json::from_str(last_data).unwrap();
    assert_eq!(error["kind"], "tool_loop_exceeded");

    // The partial turn is recorded, flagged incomplete.
    let history = app
        .clone()
        .oneshot(
            Request::get(format!("/api/v1/sessions/{session_id}/history"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = history.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let turn = &json["turns"][0];
    assert_eq!(turn["outcome"]["status"], "failed");
    assert_eq!(turn["outcome"]["failure"]["kind"], "tool_loop_exceeded");
}

#[tokio::test]
async fn second_message_during_turn_is_rejected_without_history_change() {
    // A slow tool keeps the first turn in flight while the second arrives.
    struct SlowEcho;

    #[async_trait]
    impl Tool for SlowEcho {
        fn name(&self) -> &str {
            "slow_echo"
        }

        fn definition(&self) -> archivist::llm::ToolDefinition {
            archivist::llm::ToolDefinition {
                name: "slow_echo".to_string(),
                description: "Echo slowly".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
            }
        }

        async fn invoke(
            &self,
            input: &serde_json::Value,
        ) -> Result<serde_json::Value, ToolError> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(input.clone())
        }
    }

    let call = ToolCall {
        id: "call_slow".to_string(),
        name: "slow_echo".to_string(),
        input: serde_json::json!({}),
    };
    let mut state = test_app_state(vec![
        ScriptedProvider::tool_use(call, usage(5, 5, 0)),
        ScriptedProvider::chunks(&["done"], usage(5, 5, 0)),
    ])
    .await;
    state.dispatcher =
        Arc::new(ToolDispatcher::new(Duration::from_secs(5)).register(Arc::new(SlowEcho)));
    let app = build_app(state, 30);
    let session_id = create_session(&app).await;

    // Drive the first turn concurrently; it blocks in the slow tool.
    let first = {
        let app = app.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move { send_message(&app, &session_id, "first").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (status, body) = send_message(&app, &session_id, "second").await;
    assert_eq!(status, 409);
    assert!(body.contains("already in progress"));

    let (first_status, _) = first.await.unwrap();
    assert_eq!(first_status, 200);

    // Only the first turn reached history.
    let history = app
        .clone()
        .oneshot(
            Request::get(format!("/api/v1/sessions/{session_id}/history"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = history.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let turns = json["turns"].as_array().unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0]["user_message"]["content"], "first");
}

#[tokio::test]
async fn stats_accumulate_across_turns() {
    let app = test_app(vec![
        ScriptedProvider::chunks(&["one"], usage(100, 10, 0)),
        ScriptedProvider::chunks(&["two"], usage(100, 10, 900)),
    ])
    .await;
    let session_id = create_session(&app).await;

    send_message(&app, &session_id, "first").await;
    send_message(&app, &session_id, "second").await;

    let stats = app
        .clone()
        .oneshot(
            Request::get(format!("/api/v1/sessions/{session_id}/stats"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = stats.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(json["turn_count"], 2);
    assert!(json["total_cost_usd"].as_f64().unwrap() > 0.0);
    assert!(json["total_savings_usd"].as_f64().unwrap() > 0.0);
    // 900 cached of 1100 prompt tokens total.
    let ratio = json["cache_hit_ratio"].as_f64().unwrap();
    assert!((ratio - 900.0 / 1100.0).abs() < 1e-9);
    assert!(json["session_age_seconds"].as_f64().unwrap() >= 0.0);
}

#[tokio::test]
async fn model_failure_surfaces_as_error_event() {
    // Empty script queue: the backend errors at stream start.
    let app = test_app(vec![]).await;
    let session_id = create_session(&app).await;

    let (status, body) = send_message(&app, &session_id, "hello").await;
    // Stream opened before the failure: HTTP 200, error inside the stream.
    assert_eq!(status, 200);

    let events = parse_sse_events(&body);
    let (last_name, last_data) = events.last().unwrap();
    assert_eq!(last_name, "error");
    let error: serde_json::Value = serde_json::from_str(last_data).unwrap();
    assert_eq!(error["kind"], "model_error");
}
