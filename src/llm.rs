//! Language capability abstraction and implementations.
//!
//! A [`LanguageProvider`] turns a prompt into completion text in a single,
//! stateless call. Concrete providers:
//!
//! - [`DisabledLanguageProvider`]: always a configuration error.
//! - [`GeminiLanguageProvider`]: `models/{model}:generateContent`.
//! - [`OpenAILanguageProvider`]: `/v1/chat/completions`.
//! - [`OllamaLanguageProvider`]: `/api/generate` with `stream: false`.
//!
//! Use [`create_language_provider`] to build the one named in config.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::LlmConfig;
use crate::embedding::qualified_gemini_model;
use crate::error::{Error, Result};
use crate::http;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// The language capability: prompt in, completion text out.
#[async_trait]
pub trait LanguageProvider: Send + Sync {
    /// Model identifier recorded alongside each answer in history.
    fn model_name(&self) -> &str;
    async fn complete(&self, prompt: &str) -> Result<String>;
}

pub struct DisabledLanguageProvider;

#[async_trait]
impl LanguageProvider for DisabledLanguageProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(Error::config(
            "language provider is disabled; set [llm] provider in config",
        ))
    }
}

/// Shared fields of the HTTP-backed providers.
struct HttpSettings {
    model: String,
    base_url: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl HttpSettings {
    fn from_config(config: &LlmConfig, provider: &str, default_base: &str) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::config(format!("llm.model required for {} provider", provider)))?;
        // The completion deadline is enforced by the caller; the per-request
        // timeout only needs to stop a hung connection.
        let client =
            http::client(config.timeout() + Duration::from_secs(5)).map_err(Error::Configuration)?;
        Ok(Self {
            model,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| default_base.to_string()),
            temperature: config.temperature,
            max_retries: config.max_retries,
            client,
        })
    }
}

// ============ Gemini ============

/// Requires `GOOGLE_API_KEY`.
pub struct GeminiLanguageProvider {
    settings: HttpSettings,
    api_key: String,
}

impl GeminiLanguageProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let mut settings = HttpSettings::from_config(config, "Gemini", GEMINI_BASE_URL)?;
        settings.model = qualified_gemini_model(&settings.model);
        let api_key = std::env::var("GOOGLE_API_KEY")
            .map_err(|_| Error::config("GOOGLE_API_KEY environment variable not set"))?;
        Ok(Self { settings, api_key })
    }
}

#[async_trait]
impl LanguageProvider for GeminiLanguageProvider {
    fn model_name(&self) -> &str {
        &self.settings.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let s = &self.settings;
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": s.temperature },
        });
        let url = format!("{}/v1beta/{}:generateContent", s.base_url, s.model);
        let json = http::post_json(
            &s.client,
            &url,
            &[("x-goog-api-key", self.api_key.clone())],
            &body,
            s.max_retries,
            "Gemini",
        )
        .await
        .map_err(Error::LanguageService)?;

        parse_gemini_completion(&json)
    }
}

fn parse_gemini_completion(json: &Value) -> Result<String> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| {
            let reason = json
                .pointer("/promptFeedback/blockReason")
                .and_then(|r| r.as_str())
                .unwrap_or("missing candidates");
            Error::language(format!("invalid Gemini response: {}", reason))
        })?;

    Ok(parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join(""))
}

// ============ OpenAI ============

/// Requires `OPENAI_API_KEY`.
pub struct OpenAILanguageProvider {
    settings: HttpSettings,
    api_key: String,
}

impl OpenAILanguageProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let settings = HttpSettings::from_config(config, "OpenAI", OPENAI_BASE_URL)?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::config("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self { settings, api_key })
    }
}

#[async_trait]
impl LanguageProvider for OpenAILanguageProvider {
    fn model_name(&self) -> &str {
        &self.settings.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let s = &self.settings;
        let body = serde_json::json!({
            "model": s.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": s.temperature,
        });
        let json = http::post_json(
            &s.client,
            &format!("{}/v1/chat/completions", s.base_url),
            &[("Authorization", format!("Bearer {}", self.api_key))],
            &body,
            s.max_retries,
            "OpenAI",
        )
        .await
        .map_err(Error::LanguageService)?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::language("invalid OpenAI response: missing message content"))
    }
}

// ============ Ollama ============

pub struct OllamaLanguageProvider {
    settings: HttpSettings,
}

impl OllamaLanguageProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            settings: HttpSettings::from_config(config, "Ollama", OLLAMA_BASE_URL)?,
        })
    }
}

#[async_trait]
impl LanguageProvider for OllamaLanguageProvider {
    fn model_name(&self) -> &str {
        &self.settings.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let s = &self.settings;
        let body = serde_json::json!({
            "model": s.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": s.temperature },
        });
        let json = http::post_json(
            &s.client,
            &format!("{}/api/generate", s.base_url),
            &[],
            &body,
            s.max_retries,
            "Ollama",
        )
        .await
        .map_err(|e| Error::language(format!("{} (is Ollama running at {}?)", e, s.base_url)))?;

        json.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::language("invalid Ollama response: missing response"))
    }
}

/// Create the [`LanguageProvider`] named by `config.provider`.
pub fn create_language_provider(config: &LlmConfig) -> Result<Box<dyn LanguageProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledLanguageProvider)),
        "gemini" => Ok(Box::new(GeminiLanguageProvider::new(config)?)),
        "openai" => Ok(Box::new(OpenAILanguageProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaLanguageProvider::new(config)?)),
        other => Err(Error::config(format!("unknown llm provider: {}", other))),
    }
}
