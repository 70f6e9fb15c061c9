mod common;

use std::time::Duration;

use anyhow::Result;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use twenty_percent::ollama::{complete_pairs, completion_prompt, OllamaClient, DEFAULT_MODEL};
use twenty_percent::qa::{QaPair, PLACEHOLDER};

/// Echoes the prompt back as the answer; prompts mentioning `broken` fail.
async fn generate(Json(body): Json<Value>) -> Result<Json<Value>, StatusCode> {
    if body["model"] != DEFAULT_MODEL || body["stream"] != false {
        return Err(StatusCode::BAD_REQUEST);
    }
    let prompt = body["prompt"].as_str().unwrap_or_default();
    if prompt.contains("broken") {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(Json(json!({ "model": DEFAULT_MODEL, "response": prompt, "done": true })))
}

fn pair(question: &str, answer: Option<&str>, context: &str) -> QaPair {
    QaPair {
        question: question.to_string(),
        answer: answer.map(String::from),
        context: context.to_string(),
    }
}

#[test]
fn test_placeholders_are_answered_and_failures_dropped() -> Result<()> {
    let base = common::serve(Router::new().route("/api/generate", post(generate)));
    let client = OllamaClient::new(
        format!("{base}/api/generate"),
        DEFAULT_MODEL,
        Duration::from_secs(10),
    )?;

    let answered = pair("In which file?", Some("a.py"), "def ok():\n    pass");
    let pending = pair("What could go wrong?", Some(PLACEHOLDER), "def ok():\n    pass");
    let failing = pair("What could go wrong?", Some(PLACEHOLDER), "def broken():\n    pass");
    let (pairs, stats) = complete_pairs(
        &client,
        vec![answered.clone(), pending.clone(), failing],
    );

    assert_eq!(stats.completed, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs[0], answered);
    assert_eq!(pairs[1].answer.as_deref(), Some(completion_prompt(&pending).as_str()));
    assert!(!pairs[1].needs_completion());
    Ok(())
}

#[test]
fn test_unreachable_server_skips_every_placeholder() -> Result<()> {
    let client = OllamaClient::new(
        "http://127.0.0.1:9/api/generate",
        DEFAULT_MODEL,
        Duration::from_secs(2),
    )?;
    let pairs = vec![
        pair("Q1", Some(PLACEHOLDER), "x = 1"),
        pair("Q2", None, "x = 1"),
    ];
    let (kept, stats) = complete_pairs(&client, pairs);
    assert_eq!(stats.skipped, 1);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].question, "Q2");
    Ok(())
}
