//! Language-model field extraction.
//!
//! The model is used strictly to read fields out of text that was already
//! fetched. Callers decide which of its answers to trust.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, instrument};

use subscout_shared::{OpenRouterConfig, Result, ScoutError, read_secret};

use crate::patterns::normalize_amount;

/// Page text sent to the model is cut to this many characters.
pub const MAX_MODEL_INPUT_CHARS: usize = 15_000;

const USER_AGENT: &str = concat!("subscout/", env!("CARGO_PKG_VERSION"));

const SYSTEM_PROMPT: &str =
    "You extract structured facts from contractor website text. Answer with JSON only.";

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Fields a model may report for one page. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ModelFields {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "deserialize_amount")]
    pub bond_amount: Option<u64>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    /// The sentence the model read the bonding capacity from.
    #[serde(default)]
    pub evidence_text: Option<String>,
}

/// A language-understanding capability used for extraction and normalization.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn extract_fields(&self, text: &str, source_url: &str) -> Result<ModelFields>;
}

/// Models answer amounts as numbers, numeric strings, or words.
fn deserialize_amount<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64)),
        Some(Value::String(s)) => normalize_amount(&s),
        _ => None,
    })
}

/// Parse a model reply, tolerating Markdown code fences around the JSON.
pub fn parse_model_reply(reply: &str) -> Result<ModelFields> {
    let trimmed = reply.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed);

    serde_json::from_str(body.trim())
        .map_err(|e| ScoutError::Extraction(format!("model reply is not the expected JSON: {e}")))
}

/// Truncate content to `max_chars` characters.
pub fn truncate_content(content: &str, max_chars: usize) -> &str {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => &content[..idx],
        None => content,
    }
}

fn build_prompt(text: &str, source_url: &str) -> String {
    format!(
        "Extract the following fields from this contractor website text.\n\
         Return ONLY a JSON object with these keys:\n\
         - city: the city where the contractor is based\n\
         - state: the state where the contractor is based (2-letter code)\n\
         - bond_amount: bonding capacity as an integer number of dollars (\"5 million\" -> 5000000)\n\
         - email: contact email if present\n\
         - phone_number: contact phone if present\n\
         - evidence_text: the exact sentence from the text that states the bonding capacity\n\
         Use null for anything not stated in the text. Do not guess.\n\n\
         Website: {source_url}\n\n\
         Text:\n{text}"
    )
}

// ---------------------------------------------------------------------------
// OpenRouter
// ---------------------------------------------------------------------------

/// [`LanguageModel`] backed by an OpenAI-compatible chat completions API.
#[derive(Debug, Clone)]
pub struct OpenRouterModel {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenRouterModel {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ScoutError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// Build from the `[openrouter]` section, reading the key from the environment.
    pub fn from_config(config: &OpenRouterConfig, timeout_secs: u64) -> Result<Self> {
        let api_key = read_secret(&config.api_key_env, "OpenRouter API key")?;
        Self::new(&config.base_url, api_key, &config.default_model, timeout_secs)
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": &self.model,
            "temperature": 0,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ]
        });

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "subscout")
            .json(&body)
            .send()
            .await
            .map_err(|e| ScoutError::Extraction(format!("model request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ScoutError::Extraction(format!(
                "model API returned HTTP {status}: {}",
                truncate_content(&detail, 200)
            )));
        }

        #[derive(Deserialize)]
        struct Message {
            content: Option<String>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ScoutError::Extraction(format!("malformed model response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ScoutError::Extraction("model returned no content".into()))
    }
}

#[async_trait]
impl LanguageModel for OpenRouterModel {
    fn name(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model, url = %source_url))]
    async fn extract_fields(&self, text: &str, source_url: &str) -> Result<ModelFields> {
        let prompt = build_prompt(truncate_content(text, MAX_MODEL_INPUT_CHARS), source_url);
        let reply = self.complete(&prompt).await?;
        debug!(reply_len = reply.len(), "model replied");
        parse_model_reply(&reply)
    }
}
