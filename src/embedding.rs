//! Cliente de embeddings: lotes ordenados, reintentos con backoff exponencial
//! para fallos transitorios y verificación de la dimensión de los vectores.

use std::{sync::Arc, time::Duration};

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::warn;

use crate::{
    error::{RagError, Result},
    llm::{EmbeddingService, ServiceError},
};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

#[derive(Clone)]
pub struct EmbeddingClient {
    service: Arc<dyn EmbeddingService>,
    model: String,
    batch_size: usize,
    concurrency: usize,
    retry: RetryPolicy,
}

impl EmbeddingClient {
    pub fn new(service: Arc<dyn EmbeddingService>, model: impl Into<String>) -> Self {
        Self {
            service,
            model: model.into(),
            batch_size: 32,
            concurrency: 4,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_batching(mut self, batch_size: usize, concurrency: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embedding de un único texto.
    pub async fn embed(&self, text: &str, expected_dimension: Option<usize>) -> Result<Vec<f32>> {
        let mut vectors = self.embed_many(&[text.to_string()], expected_dimension).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::EmbeddingRejected {
                message: "respuesta vacía del servicio de embeddings".to_string(),
            })
    }

    /// Embeddings de varios textos, en el mismo orden de entrada.
    ///
    /// Si `expected_dimension` es `None`, la dimensión la fija el primer vector
    /// y todos los demás deben coincidir con ella.
    pub async fn embed_many(
        &self,
        texts: &[String],
        expected_dimension: Option<usize>,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batches: Vec<Vec<String>> = texts.chunks(self.batch_size).map(<[String]>::to_vec).collect();
        let results: Vec<Vec<Vec<f32>>> = stream::iter(batches)
            .map(|batch| self.embed_batch(batch))
            .buffered(self.concurrency)
            .try_collect()
            .await?;
        let vectors: Vec<Vec<f32>> = results.into_iter().flatten().collect();

        if vectors.len() != texts.len() {
            return Err(RagError::EmbeddingRejected {
                message: format!(
                    "se recibieron {} embeddings para {} textos",
                    vectors.len(),
                    texts.len()
                ),
            });
        }

        let expected = expected_dimension.unwrap_or(vectors[0].len());
        if expected == 0 {
            return Err(RagError::EmbeddingRejected {
                message: "el servicio devolvió un vector vacío".to_string(),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(RagError::EmbeddingDimension {
                expected,
                actual: bad.len(),
            });
        }
        Ok(vectors)
    }

    async fn embed_batch(&self, batch: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0;
        loop {
            match self.service.embed_texts(&self.model, &batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) if err.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "Fallo transitorio del servicio de embeddings ({err}); reintento {}/{} en {:?}",
                        attempt + 1,
                        self.retry.max_attempts - 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(into_rag_error(err)),
            }
        }
    }
}

fn into_rag_error(err: ServiceError) -> RagError {
    if err.is_transient() {
        RagError::EmbeddingServiceUnavailable {
            message: err.to_string(),
        }
    } else {
        RagError::EmbeddingRejected {
            message: err.to_string(),
        }
    }
}
