use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::config::InferenceConfig;
use crate::error::InferenceError;
use crate::inference::{
    Classification, Classifier, Embedder, ExtractedText, Reranker, RerankDocument, TextRecognizer,
};

/// Ollama API client, backing all inference capabilities
pub struct OllamaClient {
    client: Client,
    config: InferenceConfig,
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(config: InferenceConfig) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| InferenceError::Connection {
                url: config.base_url.clone(),
                source: e,
            })?;

        Ok(Self { client, config })
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);

        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, "Inference health check failed");
                false
            }
        }
    }

    async fn embed_raw(&self, model: &str, prompt: &str) -> Result<Vec<f32>, InferenceError> {
        let url = format!("{}/api/embeddings", self.config.base_url);

        let request = OllamaEmbeddingRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| InferenceError::Connection {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();

            if message.contains("model")
                && (message.contains("not found") || message.contains("does not exist"))
            {
                return Err(InferenceError::ModelNotFound {
                    model: model.to_string(),
                });
            }

            return Err(InferenceError::Inference { status, message });
        }

        let embedding_response: OllamaEmbeddingResponse =
            response
                .json()
                .await
                .map_err(|e| InferenceError::InvalidResponse {
                    source: serde_json::Error::io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        e.to_string(),
                    )),
                })?;

        Ok(embedding_response.embedding)
    }

    /// Generate a non-streaming chat response
    async fn chat_simple(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        format: Option<&str>,
    ) -> Result<String, InferenceError> {
        let url = format!("{}/api/chat", self.config.base_url);

        let request = OllamaChatRequest {
            model: model.to_string(),
            messages,
            stream: false,
            format: format.map(|f| f.to_string()),
            options: Some(OllamaOptions {
                // Low temperature for consistent structured output
                temperature: Some(0.2),
            }),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| InferenceError::Connection {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();

            if message.contains("model") && message.contains("not found") {
                return Err(InferenceError::ModelNotFound {
                    model: model.to_string(),
                });
            }

            return Err(InferenceError::Inference { status, message });
        }

        let chat_response: OllamaChatResponse =
            response
                .json()
                .await
                .map_err(|e| InferenceError::InvalidResponse {
                    source: serde_json::Error::io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        e.to_string(),
                    )),
                })?;

        Ok(chat_response.message.content)
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, InferenceError> {
        self.embed_raw(&self.config.embedding_model, text).await
    }

    fn model(&self) -> &str {
        &self.config.embedding_model
    }
}

#[async_trait]
impl TextRecognizer for OllamaClient {
    async fn extract_text(
        &self,
        content: &[u8],
        mime_type: &str,
        language: Option<&str>,
    ) -> Result<ExtractedText, InferenceError> {
        let image_base64 = base64::engine::general_purpose::STANDARD.encode(content);

        let language_hint = language
            .map(|l| format!(" The text is in {l}."))
            .unwrap_or_default();
        let prompt = format!(
            "Extract all text visible in this {} image.{} \
             Respond with the text only, preserving reading order. \
             Respond with an empty string if there is no text.",
            mime_type, language_hint
        );

        let text = self
            .chat_simple(
                &self.config.vision_model,
                vec![ChatMessage::user_with_image(prompt, image_base64)],
                None,
            )
            .await?;

        Ok(ExtractedText {
            text: text.trim().to_string(),
            page_count: Some(1),
        })
    }
}

#[async_trait]
impl Classifier for OllamaClient {
    async fn classify(
        &self,
        name: &str,
        text: &str,
        categories: &[String],
    ) -> Result<Classification, InferenceError> {
        let category_hint = if categories.is_empty() {
            "Choose a short category word of your own.".to_string()
        } else {
            format!("Choose the category from: {}.", categories.join(", "))
        };

        let prompt = format!(
            "Classify the following document. {} Respond with JSON: \
             {{\"category\": string, \"confidence\": number between 0 and 1, \
             \"tags\": up to 5 short keyword strings}}.\n\nFilename: {}\n\nContent:\n{}",
            category_hint, name, text
        );

        let content = self
            .chat_simple(
                &self.config.classify_model,
                vec![ChatMessage::user(prompt)],
                Some("json"),
            )
            .await?;

        serde_json::from_str(&content).map_err(|source| InferenceError::InvalidResponse { source })
    }
}

#[async_trait]
impl Reranker for OllamaClient {
    async fn rescore(
        &self,
        query: &str,
        documents: &[RerankDocument],
    ) -> Result<Vec<f32>, InferenceError> {
        let mut prompt = format!(
            "Rate how relevant each document is to the query \"{}\". \
             Respond with JSON: {{\"scores\": array of numbers between 0 and 1, \
             one per document, in order}}.\n",
            query
        );
        for (i, doc) in documents.iter().enumerate() {
            prompt.push_str(&format!("\nDocument {}:\n{}\n", i + 1, doc.text));
        }

        let content = self
            .chat_simple(
                &self.config.classify_model,
                vec![ChatMessage::user(prompt)],
                Some("json"),
            )
            .await?;

        let parsed: RerankScores = serde_json::from_str(&content)
            .map_err(|source| InferenceError::InvalidResponse { source })?;

        if parsed.scores.len() != documents.len() {
            return Err(InferenceError::InvalidResponse {
                source: serde_json::Error::io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!(
                        "expected {} scores, got {}",
                        documents.len(),
                        parsed.scores.len()
                    ),
                )),
            });
        }

        Ok(parsed.scores)
    }
}

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    /// Base64-encoded images for vision models
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            images: None,
        }
    }

    /// Create a user message with an image for vision models
    pub fn user_with_image(content: impl Into<String>, image_base64: String) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            images: Some(vec![image_base64]),
        }
    }
}

// Internal Ollama API types

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct RerankScores {
    scores: Vec<f32>,
}
