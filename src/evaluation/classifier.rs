//! Free-text condition check backed by an OpenAI-compatible chat endpoint.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::core::config::ClassifierConfig;
use crate::core::error::EvaluationError;
use crate::scanner::Listing;

const SYSTEM_PROMPT: &str = "You review second-hand marketplace listings for a buyer. \
Decide whether the seller's description reveals any defect, damage, missing part, \
repair history or other problem that makes the item worse than its stated condition. \
Answer only with a JSON object: {\"acceptable\": true|false, \"rationale\": \"<one sentence>\"}.";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClassifierVerdict {
    pub acceptable: bool,
    #[serde(default)]
    pub rationale: String,
}

#[async_trait]
pub trait ConditionClassifier: Send + Sync {
    async fn classify(&self, listing: &Listing) -> Result<ClassifierVerdict, EvaluationError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

pub struct LlmClassifier {
    http_client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmClassifier {
    pub fn new(config: &ClassifierConfig, api_key: impl Into<String>) -> Result<Self, EvaluationError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| EvaluationError::Classifier(e.to_string()))?;

        Ok(Self {
            http_client,
            api_key: api_key.into(),
            base_url: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl ConditionClassifier for LlmClassifier {
    async fn classify(&self, listing: &Listing) -> Result<ClassifierVerdict, EvaluationError> {
        let prompt = listing_prompt(listing);
        let request = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| EvaluationError::Classifier(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EvaluationError::Classifier(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| EvaluationError::MalformedVerdict(e.to_string()))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| EvaluationError::MalformedVerdict("empty completion".into()))?;

        let verdict = parse_verdict(&content)?;
        debug!(
            listing_id = %listing.id,
            acceptable = verdict.acceptable,
            "Classifier verdict"
        );
        Ok(verdict)
    }
}

/// Characters of description text sent to the model.
pub const MAX_DESCRIPTION_CHARS: usize = 8000;

fn listing_prompt(listing: &Listing) -> String {
    let description: String = listing
        .description
        .chars()
        .take(MAX_DESCRIPTION_CHARS)
        .collect();
    format!(
        "Title: {}\nCondition: {}\nDescription:\n{}",
        listing.title,
        listing.condition.as_deref().unwrap_or("unknown"),
        description
    )
}

/// Parses the model's JSON answer, tolerating a markdown code fence around it.
pub fn parse_verdict(content: &str) -> Result<ClassifierVerdict, EvaluationError> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str(unfenced).map_err(|e| EvaluationError::MalformedVerdict(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Availability;

    #[test]
    fn test_prompt_caps_description() {
        let listing = Listing {
            id: "1".into(),
            title: "OP-1".into(),
            price: None,
            condition: Some("gut".into()),
            description: "ä".repeat(MAX_DESCRIPTION_CHARS + 500),
            location: None,
            distance_km: None,
            availability: Availability::Available,
            url: "https://m.example/1".into(),
            posted_at: None,
        };

        let prompt = listing_prompt(&listing);
        assert_eq!(prompt.matches('ä').count(), MAX_DESCRIPTION_CHARS);
        assert!(prompt.starts_with("Title: OP-1\nCondition: gut"));
    }

    #[test]
    fn test_parse_plain_verdict() {
        let verdict = parse_verdict(r#"{"acceptable": false, "rationale": "dead pixels"}"#).unwrap();
        assert!(!verdict.acceptable);
        assert_eq!(verdict.rationale, "dead pixels");
    }

    #[test]
    fn test_parse_fenced_verdict() {
        let verdict =
            parse_verdict("```json\n{\"acceptable\": true, \"rationale\": \"clean\"}\n```").unwrap();
        assert!(verdict.acceptable);
    }

    #[test]
    fn test_parse_garbage_is_malformed() {
        assert!(matches!(
            parse_verdict("looks fine to me"),
            Err(EvaluationError::MalformedVerdict(_))
        ));
    }

    #[test]
    fn test_new_strips_trailing_slash() {
        let config = ClassifierConfig {
            api_base: "http://localhost:8080/v1/".into(),
            ..ClassifierConfig::default()
        };
        let classifier = LlmClassifier::new(&config, "sk-test").unwrap();
        assert_eq!(classifier.base_url, "http://localhost:8080/v1");
    }
}
