//! Operaciones expuestas a la capa HTTP: `chat`, `refresh_index` y `health`.

use std::{path::PathBuf, sync::Arc};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    config::AppConfig,
    embedding::{EmbeddingClient, RetryPolicy},
    error::{RagError, Result},
    index_manager::{IndexManager, IndexSettings, RefreshSummary},
    llm::OllamaClient,
    models::ConversationTurn,
    rag::AnswerComposer,
    retriever::Retriever,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub status: String,
    pub documents: usize,
    pub chunks_added: usize,
    pub chunks_removed: usize,
    pub chunks_unchanged: usize,
}

impl From<RefreshSummary> for RefreshReport {
    fn from(summary: RefreshSummary) -> Self {
        Self {
            status: "ok".to_string(),
            documents: summary.documents,
            chunks_added: summary.chunks_added,
            chunks_removed: summary.chunks_removed,
            chunks_unchanged: summary.chunks_unchanged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Estado del servicio: índice publicado y disponibilidad de Ollama.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
    pub status: HealthStatus,
    pub indexed: bool,
    pub chunk_count: usize,
    pub ollama_model: String,
    pub embedding_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ollama_host: Option<String>,
}

#[derive(Clone)]
pub struct RagService {
    project_root: PathBuf,
    index_manager: IndexManager,
    retriever: Retriever,
    composer: AnswerComposer,
    top_k: usize,
    max_sources: usize,
    ollama_host: Option<String>,
}

impl RagService {
    pub fn new(
        project_root: PathBuf,
        index_manager: IndexManager,
        retriever: Retriever,
        composer: AnswerComposer,
        top_k: usize,
        max_sources: usize,
    ) -> Self {
        Self {
            project_root,
            index_manager,
            retriever,
            composer,
            top_k,
            max_sources,
            ollama_host: None,
        }
    }

    pub fn with_ollama_host(mut self, host: impl Into<String>) -> Self {
        self.ollama_host = Some(host.into());
        self
    }

    /// Cablea el servicio completo contra Ollama a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let ollama = Arc::new(OllamaClient::new(
            cfg.ollama_host.clone(),
            cfg.request_timeout,
            cfg.temperature,
        )?);

        let embedder = EmbeddingClient::new(ollama.clone(), &cfg.ollama_embedding_model)
            .with_batching(cfg.embed_batch_size, cfg.embed_concurrency)
            .with_retry(RetryPolicy {
                max_attempts: cfg.embed_max_attempts,
                base_delay: cfg.embed_backoff,
            });

        let index_manager = IndexManager::new(
            IndexSettings {
                chunk_size: cfg.chunk_size,
                chunk_overlap: cfg.chunk_overlap,
                storage_dir: cfg.index_storage_path.clone(),
                docs_path: Some(cfg.dbt_docs_path.clone()),
            },
            embedder.clone(),
        )?;

        let composer =
            AnswerComposer::new(ollama, &cfg.ollama_model).with_history_turns(cfg.history_turns);

        Ok(Self::new(
            cfg.dbt_project_path.clone(),
            index_manager,
            Retriever::new(embedder),
            composer,
            cfg.similarity_top_k,
            cfg.max_sources,
        )
        .with_ollama_host(cfg.ollama_host.as_str()))
    }

    pub fn index_manager(&self) -> &IndexManager {
        &self.index_manager
    }

    /// Carga el índice persistido y, si está vacío, indexa el proyecto.
    /// Un fallo aquí no impide arrancar: `health` informará `indexed = false`.
    pub async fn startup(&self) {
        let index = self.index_manager.load().await;
        if !index.is_empty() {
            return;
        }
        info!(
            "Creando un índice nuevo a partir del proyecto dbt {}...",
            self.project_root.display()
        );
        if let Err(err) = self.index_manager.build(&self.project_root).await {
            error!("No se pudo indexar el proyecto al arrancar: {err}");
        }
    }

    pub async fn chat(&self, message: &str, history: &[ConversationTurn]) -> Result<ChatReply> {
        if message.trim().is_empty() {
            return Err(RagError::InvalidArgument {
                message: "el mensaje está vacío".to_string(),
            });
        }

        // Instantánea fija para toda la consulta, aunque llegue un refresco.
        let snapshot = self.index_manager.snapshot();
        if snapshot.is_empty() {
            return Err(RagError::EmptyIndex);
        }
        let question = self.composer.condense_question(message, history).await?;
        let retrieved = self
            .retriever
            .retrieve(&snapshot, &question, self.top_k)
            .await?;
        let mut answer = self.composer.answer(message, history, &retrieved).await?;
        answer.sources.truncate(self.max_sources);

        Ok(ChatReply {
            response: answer.text,
            sources: answer.sources,
            reasoning: answer.reasoning,
        })
    }

    pub async fn refresh_index(&self) -> Result<RefreshReport> {
        match self.index_manager.refresh(&self.project_root).await {
            Ok(summary) => Ok(summary.into()),
            Err(err) => {
                warn!("Refresco del índice fallido: {err}");
                Err(err)
            }
        }
    }

    pub async fn health(&self) -> Health {
        let snapshot = self.index_manager.snapshot();
        let status = if self.composer.generator_available().await {
            HealthStatus::Healthy
        } else {
            warn!("Ollama no está disponible");
            HealthStatus::Unhealthy
        };
        Health {
            status,
            indexed: !snapshot.is_empty(),
            chunk_count: snapshot.size(),
            ollama_model: self.composer.model().to_string(),
            embedding_model: snapshot.embedding_model().to_string(),
            ollama_host: self.ollama_host.clone(),
        }
    }
}
