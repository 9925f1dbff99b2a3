// src/llm_extract.rs

use crate::config::{LlmBackend, LlmSection};
use crate::errors::ExtractError;
use crate::heuristics::HeuristicExtractor;
use crate::invoice::RawInvoice;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Instructs the model to return the bill fields as a single JSON object.
const SYSTEM_PROMPT: &str = r#"You are an invoice data extraction assistant for a construction material yard.
Given raw OCR text of a supplier bill or weighbridge ticket, extract the bill details and return ONLY valid JSON.

The JSON must have exactly these keys:
{
  "supplier": "string or null",
  "address": "string or null",
  "gstin": "string or null",
  "invoice_no": "string or null",
  "invoice_date": "YYYY-MM-DD or null",
  "vehicle_number": "string or null",
  "token_no": "string or null",
  "description": "string or null",
  "qty": number or null,
  "rate": number or null,
  "amount": number or null,
  "empty_weight": number or null,
  "load_weight": number or null,
  "net_weight": number or null,
  "tax": number or null,
  "cgst": number or null,
  "sgst": number or null,
  "round_off": number or null,
  "total": number or null,
  "amount_in_words": "string or null"
}

Notes:
- For numeric fields remove currency symbols, units and thousands separators.
- OCR text may be noisy. Do your best to reconstruct the values.
- Use null for fields you cannot determine.
- Return ONLY the JSON object, no markdown fences, no commentary."#;

/// Longest OCR text sent to the model.
const MAX_PROMPT_CHARS: usize = 12_000;

/// Turns document text into loosely typed invoice fields.
#[async_trait]
pub trait InvoiceExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    async fn extract(&self, text: &str) -> Result<RawInvoice, ExtractError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI-compatible chat completions client.
pub struct LlmExtractor {
    client: Client,
    backend: LlmBackend,
    base_url: String,
    model: String,
    api_key: String,
}

impl LlmExtractor {
    /// Resolve the configured backend into a concrete endpoint.
    pub fn from_config(llm: &LlmSection) -> Result<Self, ExtractError> {
        let (base_url, model, api_key) = match llm.backend {
            LlmBackend::Ollama => {
                info!(url = %llm.ollama.base_url, model = %llm.ollama.model, "Using Ollama (local) backend");
                // Required by the API shape, ignored by Ollama.
                (llm.ollama.base_url.clone(), llm.ollama.model.clone(), "ollama".to_string())
            }
            LlmBackend::Remote => {
                let api_key = std::env::var("LLM_API_KEY").map_err(|_| {
                    ExtractError::Llm("LLM_API_KEY env var required for remote backend".into())
                })?;
                info!(url = %llm.remote.base_url, model = %llm.remote.model, "Using remote API backend");
                (llm.remote.base_url.clone(), llm.remote.model.clone(), api_key)
            }
            LlmBackend::Heuristics => {
                return Err(ExtractError::Llm(
                    "heuristics backend selected, no model endpoint to resolve".into(),
                ));
            }
        };
        Ok(Self {
            client: Client::new(),
            backend: llm.backend,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
        })
    }

    /// Ollama answers on its root URL, outside `/v1`.
    async fn ollama_reachable(&self) -> bool {
        let health_url = self.base_url.trim_end_matches("/v1");
        match self
            .client
            .get(health_url)
            .timeout(std::time::Duration::from_secs(3))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(status = %resp.status(), "Ollama server returned non-OK status");
                false
            }
            Err(e) => {
                warn!(error = %e, "Ollama server not reachable");
                false
            }
        }
    }
}

#[async_trait]
impl InvoiceExtractor for LlmExtractor {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn extract(&self, text: &str) -> Result<RawInvoice, ExtractError> {
        if self.backend == LlmBackend::Ollama && !self.ollama_reachable().await {
            return Err(ExtractError::Llm(format!(
                "Ollama is not running at {}. Start it with: ollama serve",
                self.base_url
            )));
        }

        let text = truncate_chars(text, MAX_PROMPT_CHARS);
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: SYSTEM_PROMPT.to_string() },
                ChatMessage {
                    role: "user".to_string(),
                    content: format!("Extract the bill details from the following text:\n\n{text}"),
                },
            ],
            temperature: 0.1,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::Llm(format!("{status}: {body}")));
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| ExtractError::Llm("Empty response from LLM".into()))?;

        info!(model = %self.model, chars = content.len(), "LLM response received");
        parse_model_reply(content)
    }
}

/// Cut at a char boundary; OCR output is rarely pure ASCII.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Strip markdown fences and any reasoning text around the JSON object.
pub fn parse_model_reply(content: &str) -> Result<RawInvoice, ExtractError> {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let json_str = extract_json_object(trimmed)?;

    let value: serde_json::Value =
        serde_json::from_str(json_str).map_err(|e| ExtractError::Parse(e.to_string()))?;
    match &value {
        serde_json::Value::Object(map) if !map.is_empty() => {}
        _ => return Err(ExtractError::NoData),
    }
    serde_json::from_value(value).map_err(|e| ExtractError::Parse(e.to_string()))
}

fn extract_json_object(s: &str) -> Result<&str, ExtractError> {
    let start = s.find('{').ok_or(ExtractError::NoData)?;
    let end = s.rfind('}').ok_or_else(|| ExtractError::Parse("no closing '}' in reply".into()))?;
    if end <= start {
        return Err(ExtractError::Parse("malformed JSON in reply".into()));
    }
    Ok(&s[start..=end])
}

/// Extractor for the configured backend. A model backend that cannot be
/// set up (e.g. a missing API key) degrades to heuristics.
pub fn extractor_for(llm: &LlmSection) -> Box<dyn InvoiceExtractor> {
    if llm.backend == LlmBackend::Heuristics {
        info!("Backend set to heuristics, using regex extraction");
        return Box::new(HeuristicExtractor);
    }
    match LlmExtractor::from_config(llm) {
        Ok(extractor) => Box::new(extractor),
        Err(e) => {
            warn!(error = %e, "LLM backend unavailable, using heuristics");
            Box::new(HeuristicExtractor)
        }
    }
}

/// Run `primary`; when the model itself fails (network, API, reply shape)
/// fall back to the regex extractor.
pub async fn extract_with_fallback(
    primary: &dyn InvoiceExtractor,
    text: &str,
) -> Result<RawInvoice, ExtractError> {
    match primary.extract(text).await {
        Ok(raw) => Ok(raw),
        Err(e @ (ExtractError::Llm(_) | ExtractError::Http(_))) if primary.name() != "heuristics" => {
            warn!(error = %e, extractor = primary.name(), "Extraction failed, falling back to heuristics");
            HeuristicExtractor.extract(text).await
        }
        Err(e) => Err(e),
    }
}
