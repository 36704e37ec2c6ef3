use actix_web::{web, HttpRequest, HttpResponse};
use async_trait::async_trait;
use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::session::current_identity;

/// Single round trip to a text model. No retry, no streaming.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> AppResult<String>;
}

#[derive(Deserialize, Serialize)]
pub struct GenerateInput {
    pub prompt: String,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Deserialize, Default)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

/// Concatenates the text parts of the first candidate.
fn extract_text(body: GenerateContentResponse) -> AppResult<String> {
    let text: String = body
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.is_empty() {
        return Err(AppError::Generation("AI response contained no text".to_string()));
    }
    Ok(text)
}

/// Gemini `generateContent` over REST.
pub struct GeminiClient {
    http_client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn from_config(config: &Config) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            endpoint: config.gemini_endpoint.clone(),
            model: config.gemini_model.clone(),
            api_key: config.gemini_api_key.clone(),
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> AppResult<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::Generation("GEMINI_API_KEY is not configured".to_string()))?;
        debug!("Sending prompt to {}: {}", self.model, prompt);

        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        };
        let resp = match self
            .http_client
            .post(self.url())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                error!("AI service error: {}", resp.status());
                return Err(AppError::Generation(format!("AI service error: {}", resp.status())));
            }
            Err(e) => {
                error!("AI service unreachable: {}", e);
                return Err(AppError::Generation(format!("AI service unreachable: {}", e)));
            }
        };

        let parsed = resp
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| AppError::Generation(format!("AI response parse error: {}", e)))?;
        let text = extract_text(parsed)?;
        debug!("Received response from {}: {} chars", self.model, text.len());
        Ok(text)
    }
}

// POST /ai/generate
pub async fn generate(
    req: HttpRequest,
    data: web::Data<AppState>,
    input: web::Json<GenerateInput>,
) -> AppResult<HttpResponse> {
    current_identity(&req)?;
    if input.prompt.trim().is_empty() {
        return Err(AppError::Validation("Prompt is empty".to_string()));
    }
    let text = data.generator.generate(&input.prompt).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "text": text })))
}
