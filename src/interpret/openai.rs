//! Interpretation through any server implementing the OpenAI `/v1/chat/completions` API.
//!
//! Responses are cached in the store by SHA-256 of the message text. The cache is an
//! optimisation only: when it cannot be read or written we log and carry on.

use crate::db::Db;
use crate::error::Res;
use crate::interpret::{parse_response, prompt, Interpretation, Interpreter};
use crate::model::Locale;
use crate::Config;
use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

const TEMPERATURE: f32 = 0.1;
const MAX_TOKENS: u32 = 200;

pub(crate) struct OpenAiInterpreter {
    http_client: Client,
    base_url: String,
    model: String,
    api_key: String,
    locale: Locale,
    db: Db,
    cache_ttl: chrono::Duration,
}

impl OpenAiInterpreter {
    /// Reads the endpoint from the configuration and the API key from the environment variable the
    /// configuration names.
    pub(crate) fn from_config(config: &Config) -> Res<Self> {
        let llm = config.llm();
        let api_key = std::env::var(&llm.api_key_env).with_context(|| {
            format!(
                "The environment variable {} must hold the language model API key",
                llm.api_key_env
            )
        })?;
        Ok(Self {
            http_client: Client::new(),
            base_url: llm.base_url.trim_end_matches('/').to_string(),
            model: llm.model.clone(),
            api_key,
            locale: config.locale(),
            db: config.db().clone(),
            cache_ttl: config.cache_ttl(),
        })
    }

    async fn chat_completion(&self, prompt: &str) -> Res<String> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: "You interpret short messages about personal spending. \
                        Always answer with valid JSON."
                        .to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let response = self
            .http_client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to reach the language model")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Language model API error {status}: {body}");
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse the language model response")?;
        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .context("The language model returned no choices")
    }

    async fn cached(&self, hash: &str) -> Option<String> {
        match self.db.cached_interpretation(hash, Utc::now()).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Unable to read the interpretation cache: {e:#}");
                None
            }
        }
    }

    async fn save(&self, hash: &str, text: &str, output: &str) {
        if let Err(e) = self
            .db
            .save_interpretation(hash, text, output, &self.model, self.cache_ttl)
            .await
        {
            warn!("Unable to write the interpretation cache: {e:#}");
        }
    }
}

#[async_trait::async_trait]
impl Interpreter for OpenAiInterpreter {
    async fn interpret(&self, text: &str, today: NaiveDate) -> Res<Interpretation> {
        let hash = input_hash(text);
        if let Some(output) = self.cached(&hash).await {
            debug!("Using cached interpretation");
            return parse_response(&output);
        }

        info!("Interpreting message with {}", self.model);
        let output = self
            .chat_completion(&prompt(text, today, self.locale))
            .await?;
        debug!("Model response has {} characters", output.len());
        let interpretation = parse_response(&output)?;
        // Only responses that parsed are worth caching
        self.save(&hash, text, &output).await;
        Ok(interpretation)
    }
}

/// Hex SHA-256 of the message text.
pub(crate) fn input_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;
    use tempfile::TempDir;

    #[test]
    fn test_input_hash() {
        assert_eq!(
            input_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_response_deserialization() {
        let json = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant",
            "content":" {\"description\":\"Uber\",\"amount\":15,\"category\":\"Transport\",\"date\":\"2025-01-02\"} "}}]}"#;
        let response: ChatCompletionResponse = serde_json::from_str(json).unwrap();
        let parsed = parse_response(&response.choices[0].message.content).unwrap();
        assert_eq!(parsed.category, Category::Transport);
    }

    #[tokio::test]
    async fn test_cached_response_skips_the_network() {
        let dir = TempDir::new().unwrap();
        let db = Db::init(dir.path().join("cache.sqlite")).await.unwrap();
        let text = "padaria 20";
        db.save_interpretation(
            &input_hash(text),
            text,
            r#"{"description":"Padaria","amount":20,"category":"Food","date":"2025-01-05"}"#,
            "gpt-3.5-turbo",
            chrono::Duration::days(7),
        )
        .await
        .unwrap();

        let interpreter = OpenAiInterpreter {
            http_client: Client::new(),
            // Nothing listens here; a network call would fail the test
            base_url: "http://127.0.0.1:9".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            api_key: "unused".to_string(),
            locale: Locale::PtBr,
            db,
            cache_ttl: chrono::Duration::days(7),
        };
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let parsed = interpreter.interpret(text, today).await.unwrap();
        assert_eq!(parsed.description, "Padaria");
        assert!(interpreter.interpret("something else", today).await.is_err());
    }
}
