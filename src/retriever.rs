//! Recuperación de los chunks más similares a una consulta.

use tracing::debug;

use crate::{
    embedding::EmbeddingClient,
    error::{RagError, Result},
    models::RetrievalResult,
    vector_store::VectorIndex,
};

#[derive(Clone)]
pub struct Retriever {
    embedder: EmbeddingClient,
}

impl Retriever {
    pub fn new(embedder: EmbeddingClient) -> Self {
        Self { embedder }
    }

    /// Calcula el embedding de `query` y busca los `k` chunks más similares en
    /// `index`, una instantánea que el llamante mantiene durante la consulta.
    ///
    /// Falla con `EmptyIndex` si no hay nada indexado. Un resultado con
    /// puntuaciones bajas no es un error: el umbral de relevancia lo decide
    /// el llamante.
    pub async fn retrieve(
        &self,
        index: &VectorIndex,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        if k == 0 {
            return Err(RagError::InvalidArgument {
                message: "k debe ser mayor que 0".to_string(),
            });
        }
        if index.is_empty() {
            return Err(RagError::EmptyIndex);
        }
        if index.embedding_model() != self.embedder.model() {
            return Err(RagError::EmbeddingModelMismatch {
                expected: index.embedding_model().to_string(),
                found: self.embedder.model().to_string(),
            });
        }

        let query_vector = self.embedder.embed(query, index.dimension()).await?;
        let results = index.search(&query_vector, k)?;
        debug!(
            "Consulta '{query}': {} resultados (mejor puntuación {:?})",
            results.len(),
            results.first().map(|r| r.score)
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chunker, testing::MockEmbedder};
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    async fn index_with(embedder: &EmbeddingClient, docs: &[(&str, &str)]) -> VectorIndex {
        let mut index = VectorIndex::new(embedder.model());
        for (path, text) in docs {
            let mut chunks = chunker::chunk_text(path, text, 100, 0).unwrap();
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let vectors = embedder.embed_many(&texts, None).await.unwrap();
            for (chunk, vector) in chunks.iter_mut().zip(vectors) {
                chunk.embedding = vector;
            }
            index.add(chunks).unwrap();
        }
        index
    }

    #[tokio::test]
    async fn single_model_project_returns_its_only_chunk() {
        let embedder = EmbeddingClient::new(Arc::new(MockEmbedder::new(16)), "nomic-embed-text");
        let index = index_with(
            &embedder,
            &[("models/customers.sql", "select id, name from raw_customers")],
        )
        .await;
        assert_eq!(index.size(), 1);

        let retriever = Retriever::new(embedder);
        let results = assert_ok!(
            retriever
                .retrieve(&index, "What columns does the customers model have?", 3)
                .await
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.source_path, "models/customers.sql");
    }

    #[tokio::test]
    async fn most_similar_chunk_ranks_first() {
        let embedder = EmbeddingClient::new(Arc::new(MockEmbedder::new(64)), "m");
        let index = index_with(
            &embedder,
            &[
                ("models/customers.sql", "select id, name from raw_customers"),
                ("models/orders.sql", "select order_id, amount, status from raw_orders"),
            ],
        )
        .await;

        let retriever = Retriever::new(embedder);
        let results = retriever
            .retrieve(&index, "select order_id, amount, status from raw_orders", 2)
            .await
            .unwrap();
        assert_eq!(results[0].chunk.source_path, "models/orders.sql");
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn empty_index_is_reported_distinctly() {
        let mock = Arc::new(MockEmbedder::new(8));
        let retriever = Retriever::new(EmbeddingClient::new(mock.clone(), "m"));
        let err = assert_err!(retriever.retrieve(&VectorIndex::new("m"), "hola", 3).await);
        assert!(matches!(err, RagError::EmptyIndex));
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn zero_k_is_rejected_before_embedding() {
        let mock = Arc::new(MockEmbedder::new(8));
        let embedder = EmbeddingClient::new(mock.clone(), "m");
        let index = index_with(&embedder, &[("models/a.sql", "select 1")]).await;
        let calls = mock.calls();

        let err = assert_err!(Retriever::new(embedder).retrieve(&index, "q", 0).await);
        assert!(matches!(err, RagError::InvalidArgument { .. }));
        assert_eq!(mock.calls(), calls);
    }

    #[tokio::test]
    async fn index_from_another_model_is_incompatible() {
        let embedder = EmbeddingClient::new(Arc::new(MockEmbedder::new(8)), "m1");
        let index = index_with(&embedder, &[("models/a.sql", "select 1")]).await;
        let other = EmbeddingClient::new(Arc::new(MockEmbedder::new(8)), "m2");

        let err = assert_err!(Retriever::new(other).retrieve(&index, "q", 1).await);
        assert!(matches!(err, RagError::EmbeddingModelMismatch { .. }));
    }
}
