//! HTTP embedding providers (Ollama and OpenAI-compatible APIs).

use super::{check_vector, Embedder};
use crate::domain::error::{AppError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct OpenAIEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

async fn post_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
    client: &Client,
    url: &str,
    api_key: Option<&str>,
    body: &Req,
) -> Result<Resp> {
    let mut request = client.post(url);
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }

    let response = request.json(body).send().await.map_err(|e| {
        AppError::EmbeddingFailure(format!("Failed to call embedding API ({}): {}", url, e))
    })?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(AppError::EmbeddingFailure(format!(
            "Embedding API returned error {} (URL: {}): {}",
            status, url, error_text
        )));
    }

    response.json().await.map_err(|e| {
        AppError::EmbeddingFailure(format!("Failed to parse embedding response: {}", e))
    })
}

pub struct OllamaEmbedder {
    client: Client,
    url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            client: Client::new(),
            url: Self::endpoint(&base_url),
            model,
        }
    }

    fn endpoint(base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        format!("{}/api/embeddings", base.trim_end_matches('/'))
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = OllamaEmbeddingRequest {
            model: &self.model,
            prompt: text,
        };
        let response: OllamaEmbeddingResponse =
            post_json(&self.client, &self.url, None, &request).await?;
        check_vector(response.embedding)
    }

    fn describe(&self) -> String {
        format!("ollama:{} ({})", self.model, self.url)
    }
}

pub struct OpenAiEmbedder {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiEmbedder {
    pub fn new(base_url: String, model: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model,
            api_key,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = OpenAIEmbeddingRequest {
            model: &self.model,
            input: text,
        };
        let response: OpenAIEmbeddingResponse =
            post_json(&self.client, &self.url, self.api_key.as_deref(), &request).await?;
        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| {
                AppError::EmbeddingFailure("No embedding data in response".to_string())
            })?;
        check_vector(embedding)
    }

    fn describe(&self) -> String {
        format!("openai:{} ({})", self.model, self.url)
    }
}
