//! Frontera con los servicios externos de embeddings y generación.
//!
//! El núcleo sólo conoce los traits `EmbeddingService` y `GenerationService`;
//! `OllamaClient` los implementa contra la API HTTP de Ollama
//! (`/api/embed` y `/api/chat`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::{
    error::RagError,
    models::{ConversationTurn, Role},
};

/// Error devuelto por un servicio externo, clasificado según si merece reintento.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("servicio inalcanzable: {0}")]
    Unreachable(String),

    #[error("modelo desconocido: {0}")]
    UnknownModel(String),

    #[error("petición mal formada: {0}")]
    Malformed(String),

    #[error("el servicio respondió {status}: {message}")]
    Failed { status: u16, message: String },
}

impl ServiceError {
    /// Fallos de red, 5xx y 429 se consideran transitorios.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable(_) => true,
            Self::Failed { status, .. } => *status >= 500 || *status == 429,
            Self::UnknownModel(_) | Self::Malformed(_) => false,
        }
    }
}

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Calcula un vector por texto, respetando el orden de entrada.
    async fn embed_texts(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Completa `prompt` con el historial como contexto conversacional previo.
    /// El razonamiento de los modelos "thinking" llega ya separado de la respuesta.
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        history: &[ConversationTurn],
    ) -> Result<GeneratedText, ServiceError>;

    /// Comprueba que el servicio responde.
    async fn is_available(&self) -> bool {
        true
    }
}

/// Cliente HTTP de Ollama.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: Url,
    temperature: f32,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

impl OllamaClient {
    pub fn new(base_url: Url, timeout: Duration, temperature: f32) -> crate::error::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::invalid_config(format!("No se pudo crear el cliente HTTP: {e}")))?;
        Ok(Self {
            http,
            base_url,
            temperature,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ServiceError> {
        self.base_url
            .join(path)
            .map_err(|e| ServiceError::Malformed(format!("URL de Ollama inválida: {e}")))
    }

    async fn post_json(
        &self,
        path: &str,
        model: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ServiceError> {
        let url = self.endpoint(path)?;
        debug!("POST {url} (modelo {model})");
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => ServiceError::UnknownModel(model.to_string()),
            StatusCode::BAD_REQUEST => ServiceError::Malformed(message),
            other => ServiceError::Failed {
                status: other.as_u16(),
                message,
            },
        })
    }
}

#[async_trait]
impl EmbeddingService for OllamaClient {
    async fn embed_texts(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let body = json!({ "model": model, "input": texts });
        let response = self.post_json("api/embed", model, &body).await?;
        let parsed: EmbedResponse = response.json().await.map_err(map_transport_error)?;

        if parsed.embeddings.len() != texts.len() {
            return Err(ServiceError::Malformed(format!(
                "Número de embeddings ({}) distinto al número de textos ({})",
                parsed.embeddings.len(),
                texts.len()
            )));
        }
        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl GenerationService for OllamaClient {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        history: &[ConversationTurn],
    ) -> Result<GeneratedText, ServiceError> {
        let mut messages: Vec<ChatMessage> = history
            .iter()
            .map(|turn| ChatMessage {
                role: match turn.role {
                    Role::User => "user".to_string(),
                    Role::Assistant => "assistant".to_string(),
                },
                content: turn.content.clone(),
            })
            .collect();
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        let body = json!({
            "model": model,
            "messages": messages,
            "stream": false,
            "options": { "temperature": self.temperature },
        });
        let response = self.post_json("api/chat", model, &body).await?;
        let parsed: ChatResponse = response.json().await.map_err(map_transport_error)?;
        Ok(split_reasoning(&parsed.message.content))
    }

    async fn is_available(&self) -> bool {
        let Ok(url) = self.endpoint("api/tags") else {
            return false;
        };
        match self.http.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Ollama no responde: {e}");
                false
            }
        }
    }
}

fn map_transport_error(err: reqwest::Error) -> ServiceError {
    if err.is_decode() {
        ServiceError::Malformed(format!("respuesta no decodificable: {err}"))
    } else {
        ServiceError::Unreachable(err.to_string())
    }
}

/// Salida de un modelo "thinking" separada en razonamiento y respuesta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedText {
    pub reasoning: Option<String>,
    pub answer: String,
}

/// Separa los bloques `<think>…</think>` del texto final.
pub fn split_reasoning(raw: &str) -> GeneratedText {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut reasoning = Vec::new();
    let mut answer = String::new();
    let mut rest = raw;

    // Algunos modelos omiten la etiqueta de apertura.
    if let (None, Some(close)) = (rest.find(OPEN), rest.find(CLOSE)) {
        reasoning.push(rest[..close].trim().to_string());
        rest = &rest[close + CLOSE.len()..];
    }

    while let Some(open) = rest.find(OPEN) {
        answer.push_str(&rest[..open]);
        let after_open = &rest[open + OPEN.len()..];
        match after_open.find(CLOSE) {
            Some(close) => {
                reasoning.push(after_open[..close].trim().to_string());
                rest = &after_open[close + CLOSE.len()..];
            }
            None => {
                reasoning.push(after_open.trim().to_string());
                rest = "";
            }
        }
    }
    answer.push_str(rest);

    let reasoning: Vec<String> = reasoning.into_iter().filter(|r| !r.is_empty()).collect();
    GeneratedText {
        reasoning: (!reasoning.is_empty()).then(|| reasoning.join("\n\n")),
        answer: answer.trim().to_string(),
    }
}
