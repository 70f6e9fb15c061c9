//! Filling placeholder answers with a language model served by Ollama.

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::qa::QaPair;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434/api/generate";
pub const DEFAULT_MODEL: &str = "llama3.2:3b";

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Blocking client for Ollama's `/api/generate` endpoint.
pub struct OllamaClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    model: String,
}

impl OllamaClient {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            model: model.into(),
        })
    }

    /// Sends one non-streaming generation request and returns the model's text.
    pub fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };
        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .with_context(|| format!("POST {}", self.endpoint))?
            .error_for_status()?;
        let body: GenerateResponse = response.json().context("decoding Ollama response")?;
        Ok(body.response)
    }
}

/// The code, then the question, then an open `Answer:` line.
pub fn completion_prompt(pair: &QaPair) -> String {
    format!("{}\n\nQuestion: {}\nAnswer:\n", pair.context, pair.question)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionStats {
    pub completed: usize,
    pub skipped: usize,
}

/// Answers every placeholder pair through `client`, keeping the order of
/// `pairs`. Pairs whose request fails or comes back empty are dropped.
pub fn complete_pairs(client: &OllamaClient, pairs: Vec<QaPair>) -> (Vec<QaPair>, CompletionStats) {
    let mut stats = CompletionStats::default();
    let mut kept = Vec::with_capacity(pairs.len());
    for mut pair in pairs {
        if !pair.needs_completion() {
            kept.push(pair);
            continue;
        }
        match client.complete(&completion_prompt(&pair)) {
            Ok(answer) if !answer.trim().is_empty() => {
                debug!(question = %pair.question, "answer received");
                pair.answer = Some(answer);
                stats.completed += 1;
                kept.push(pair);
            }
            Ok(_) => {
                warn!(question = %pair.question, "empty answer, skipping question");
                stats.skipped += 1;
            }
            Err(e) => {
                warn!(question = %pair.question, error = %format!("{e:#}"), "skipping question");
                stats.skipped += 1;
            }
        }
    }
    info!(
        completed = stats.completed,
        skipped = stats.skipped,
        "placeholder answers processed"
    );
    (kept, stats)
}
