//! Repair client
//!
//! Sends one file's diagnostic batch to a generative-AI endpoint and parses
//! the structured reply. Transient rate-limit failures are retried with
//! exponential backoff; anything else is fatal for the whole run.

use crate::batch::Batch;
use crate::config::Config;
use crate::error::{Error, Failure, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::time::Duration;

/// Instruction prepended to every repair request.
const REPAIR_INSTRUCTION: &str = r#"Return a JSON object ONLY:

{
  "updatedCode": "<full updated code ONLY>",
  "explanation": "<additional explanation or notes>",
  "errors": ["<any issues you could not fix>"]
}

Errors and file context:"#;

/// The generative-AI request/response capability.
///
/// The run only ever awaits one call at a time; an in-flight call cannot be
/// aborted, cancellation is checked between files.
pub trait TextGenerator {
    fn generate(&self, prompt: &str) -> impl Future<Output = anyhow::Result<String>> + Send;
}

/// Structured reply from the repair service.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReply {
    /// Full replacement file content. Absence means "no fix", not an error.
    pub updated_code: Option<String>,
    pub explanation: Option<String>,
    #[serde(default)]
    pub errors: Vec<serde_json::Value>,
}

/// What came back from one repair call.
#[derive(Debug, Clone)]
pub enum RepairResult {
    Reply(RepairReply),
    /// The reply was not decodable even after stripping a code fence.
    /// Recovered locally: the batch is marked unfixed and the run continues.
    ParseFailed { preview: String },
}

/// Successful return from [`RepairClient::repair`], with the waits that were
/// honored along the way.
#[derive(Debug)]
pub struct RepairOutcome {
    pub result: RepairResult,
    pub attempts: u32,
    pub backoff_waits: Vec<Duration>,
}

/// Retry/backoff knobs. `backoff_base` is the unit behind the
/// `2^attempt` law so tests can run at millisecond scale.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub request_delay: Duration,
    /// Retry every failure instead of only rate limits. Off by default:
    /// non-throttling errors abort the run.
    pub retry_all_failures: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            request_delay: Duration::from_millis(1000),
            retry_all_failures: false,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: Duration::from_secs(1),
            request_delay: Duration::from_millis(config.request_delay_ms),
            retry_all_failures: config.retry_all_failures,
        }
    }
}

/// Classify a failed attempt. Rate-limit failures within the retry cap are
/// recoverable; everything else aborts the run unless the policy opts into
/// retrying all failures.
fn classify_failure(reason: &str, attempt: u32, policy: &RetryPolicy) -> Failure {
    let rate_limited = reason.to_lowercase().contains("rate limit");
    if (rate_limited || policy.retry_all_failures) && attempt <= policy.max_retries {
        Failure::Recoverable(reason.to_string())
    } else {
        Failure::Fatal(reason.to_string())
    }
}

pub struct RepairClient<G> {
    generator: G,
    policy: RetryPolicy,
}

impl<G: TextGenerator> RepairClient<G> {
    pub fn new(generator: G, policy: RetryPolicy) -> Self {
        Self { generator, policy }
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Submit a batch and wait for a usable reply.
    ///
    /// A well-formed reply (with or without `updatedCode`) and an
    /// unparseable reply both return `Ok`; only a fatal call failure
    /// returns `Err`, which aborts the whole run.
    pub async fn repair(&self, file: &Path, batch: &Batch) -> Result<RepairOutcome> {
        let prompt = format!("{}\n{}", REPAIR_INSTRUCTION, batch.payload);
        let mut attempt: u32 = 0;
        let mut backoff_waits = Vec::new();

        loop {
            match self.generator.generate(&prompt).await {
                Ok(text) => {
                    let result = parse_repair_reply(&text);
                    if let RepairResult::ParseFailed { preview } = &result {
                        tracing::warn!(
                            "failed to parse repair reply for {}: {}",
                            file.display(),
                            preview
                        );
                    }
                    // Throttle before handing control back to the run loop.
                    tokio::time::sleep(self.policy.request_delay).await;
                    return Ok(RepairOutcome {
                        result,
                        attempts: attempt + 1,
                        backoff_waits,
                    });
                }
                Err(err) => {
                    attempt += 1;
                    let reason = err.to_string();
                    tracing::warn!(
                        "repair call failed for {} (attempt {}/{}): {}",
                        file.display(),
                        attempt,
                        self.policy.max_retries,
                        reason
                    );
                    match classify_failure(&reason, attempt, &self.policy) {
                        Failure::Fatal(reason) => {
                            return Err(Error::Repair {
                                file: file.to_path_buf(),
                                reason,
                            });
                        }
                        Failure::Recoverable(_) => {
                            let wait = self.policy.backoff_base * 2u32.pow(attempt);
                            tracing::info!(
                                "rate limit hit; retrying {} after {:.1}s",
                                file.display(),
                                wait.as_secs_f64()
                            );
                            backoff_waits.push(wait);
                            tokio::time::sleep(wait).await;
                        }
                    }
                }
            }
        }
    }
}

/// Decode a raw reply. Tries a direct decode first, then once more with a
/// wrapping markdown fence stripped.
pub fn parse_repair_reply(text: &str) -> RepairResult {
    if let Ok(reply) = serde_json::from_str::<RepairReply>(text) {
        return RepairResult::Reply(reply);
    }
    let cleaned = strip_code_fence(text);
    match serde_json::from_str::<RepairReply>(cleaned) {
        Ok(reply) => RepairResult::Reply(reply),
        Err(_) => RepairResult::ParseFailed {
            preview: truncate_str(text, 200).to_string(),
        },
    }
}

/// Strip a wrapping markdown code fence from a reply
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = if trimmed.starts_with("```json") {
        trimmed.strip_prefix("```json").unwrap_or(trimmed)
    } else if trimmed.starts_with("```") {
        trimmed.strip_prefix("```").unwrap_or(trimmed)
    } else {
        trimmed
    };
    let clean = clean.strip_suffix("```").unwrap_or(clean);
    clean.trim()
}

/// Truncate a string for display (Unicode-safe)
pub(crate) fn truncate_str(s: &str, max_chars: usize) -> &str {
    if s.chars().count() <= max_chars {
        s
    } else {
        let byte_idx = s
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        &s[..byte_idx]
    }
}

// ───────────────────────────────────────────────────────────────────────────
//  HTTP generator (OpenRouter-compatible chat completions)
// ───────────────────────────────────────────────────────────────────────────

const SYSTEM_PROMPT: &str =
    "You are a code repair assistant. You receive compiler diagnostics with file \
     context and reply with a single JSON object containing the fixed code.";

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: String,
}

/// [`TextGenerator`] backed by an OpenRouter-compatible endpoint.
pub struct HttpGenerator {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl HttpGenerator {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let api_key = config.get_api_key().ok_or_else(|| {
            anyhow::anyhow!(
                "no API key configured; set CODEMEND_API_KEY or add api_key to {}",
                Config::config_location()
            )
        })?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.clone(),
            api_key,
            model: config.model.clone(),
        })
    }
}

impl TextGenerator for HttpGenerator {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            stream: false,
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            let parsed: ChatResponse = serde_json::from_str(&text)
                .map_err(|e| anyhow::anyhow!("malformed completion response: {}\n{}", e, text))?;
            return Ok(parsed
                .choices
                .first()
                .map(|c| c.message.content.clone())
                .unwrap_or_default());
        }

        // The retry loop classifies failures by message text, so 429 must
        // carry the rate-limit marker.
        match status.as_u16() {
            429 => Err(anyhow::anyhow!(
                "rate limit hit (429): {}",
                truncate_str(&text, 200)
            )),
            401 => Err(anyhow::anyhow!("invalid API key (401)")),
            _ => Err(anyhow::anyhow!(
                "API error {}: {}",
                status,
                truncate_str(&text, 200)
            )),
        }
    }
}
