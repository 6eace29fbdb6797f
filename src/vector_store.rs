//! Índice vectorial en memoria sobre los `Chunk`s del proyecto.
//!
//! API pública:
//!   - `VectorIndex::add` / `remove` / `remove_ids`
//!   - `VectorIndex::search(&[f32], usize)` (similitud coseno, escaneo lineal)
//!   - `size()` / `dimension()`
//!
//! Una vez publicado por el `IndexManager`, un índice no se modifica: los
//! refrescos trabajan sobre una copia y sustituyen el puntero compartido.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::{
    error::{RagError, Result},
    models::{Chunk, RetrievalResult},
};

#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    embedding_model: String,
    /// Fijada por el primer chunk insertado; no cambia durante la vida del índice.
    dimension: Option<usize>,
    chunks: BTreeMap<String, Chunk>,
    norms: HashMap<String, f64>,
}

impl VectorIndex {
    pub fn new(embedding_model: impl Into<String>) -> Self {
        Self {
            embedding_model: embedding_model.into(),
            ..Self::default()
        }
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn size(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Dimensión de los vectores, o `None` si el índice está vacío.
    pub fn dimension(&self) -> Option<usize> {
        if self.chunks.is_empty() {
            None
        } else {
            self.dimension
        }
    }

    pub fn get(&self, id: &str) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    /// Chunks ordenados por id.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    pub fn source_paths(&self) -> BTreeSet<&str> {
        self.chunks.values().map(|c| c.source_path.as_str()).collect()
    }

    /// Inserta chunks con embedding ya calculado.
    ///
    /// Es idempotente para ids existentes con el mismo contenido; un id
    /// existente con otro contenido se retira y se sustituye. La operación es
    /// todo o nada: si algún chunk no es válido no se inserta ninguno.
    /// Devuelve cuántos chunks cambiaron el índice.
    pub fn add(&mut self, chunks: Vec<Chunk>) -> Result<usize> {
        let mut dimension = self.dimension;
        for chunk in &chunks {
            if !chunk.has_embedding() {
                return Err(RagError::InvalidArgument {
                    message: format!("el chunk {} no tiene embedding", chunk.id),
                });
            }
            match dimension {
                Some(expected) if expected != chunk.embedding.len() => {
                    return Err(RagError::EmbeddingDimension {
                        expected,
                        actual: chunk.embedding.len(),
                    });
                }
                Some(_) => {}
                None => dimension = Some(chunk.embedding.len()),
            }
        }
        self.dimension = dimension;

        let mut changed = 0;
        for chunk in chunks {
            if self.chunks.get(&chunk.id) == Some(&chunk) {
                continue;
            }
            self.norms.insert(chunk.id.clone(), norm(&chunk.embedding));
            self.chunks.insert(chunk.id.clone(), chunk);
            changed += 1;
        }
        Ok(changed)
    }

    /// Elimina todos los chunks de `source_path`. Devuelve cuántos se eliminaron.
    pub fn remove(&mut self, source_path: &str) -> usize {
        let ids: Vec<String> = self
            .chunks
            .values()
            .filter(|c| c.source_path == source_path)
            .map(|c| c.id.clone())
            .collect();
        self.remove_ids(&ids)
    }

    pub fn remove_ids(&mut self, ids: &[String]) -> usize {
        let mut removed = 0;
        for id in ids {
            self.norms.remove(id);
            if self.chunks.remove(id).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Hasta `k` chunks ordenados por similitud coseno descendente;
    /// los empates se resuelven por id ascendente.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievalResult>> {
        if k == 0 {
            return Err(RagError::InvalidArgument {
                message: "k debe ser mayor que 0".to_string(),
            });
        }
        if let Some(expected) = self.dimension() {
            if query.len() != expected {
                return Err(RagError::EmbeddingDimension {
                    expected,
                    actual: query.len(),
                });
            }
        }

        let query_norm = norm(query);
        let mut scored: Vec<(&Chunk, f32)> = self
            .chunks
            .values()
            .map(|chunk| {
                let chunk_norm = self.norms.get(&chunk.id).copied().unwrap_or(0.0);
                (chunk, cosine(query, query_norm, &chunk.embedding, chunk_norm))
            })
            .collect();

        scored.sort_by(|(a, sa), (b, sb)| sb.total_cmp(sa).then_with(|| a.id.cmp(&b.id)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(chunk, score)| RetrievalResult {
                chunk: chunk.clone(),
                score,
            })
            .collect())
    }
}

impl PartialEq for VectorIndex {
    fn eq(&self, other: &Self) -> bool {
        self.embedding_model == other.embedding_model
            && self.dimension() == other.dimension()
            && self.chunks == other.chunks
    }
}

fn norm(v: &[f32]) -> f64 {
    v.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt()
}

fn cosine(a: &[f32], a_norm: f64, b: &[f32], b_norm: f64) -> f32 {
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum();
    (dot / (a_norm * b_norm)) as f32
}

/// Similitud coseno `dot(a,b) / (‖a‖·‖b‖)`; 0 si alguno de los vectores es nulo.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    cosine(a, norm(a), b, norm(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn chunk(id: &str, source: &str, embedding: Vec<f32>) -> Chunk {
        Chunk {
            id: id.to_string(),
            source_path: source.to_string(),
            text: format!("texto de {id}"),
            offset: 0,
            embedding,
        }
    }

    fn sample() -> VectorIndex {
        let mut index = VectorIndex::new("nomic-embed-text");
        index
            .add(vec![
                chunk("a", "models/customers.sql", vec![1.0, 0.0, 0.0]),
                chunk("b", "models/orders.sql", vec![0.0, 1.0, 0.0]),
                chunk("c", "models/orders.sql", vec![0.7, 0.7, 0.0]),
                chunk("d", "models/payments.sql", vec![0.0, 0.0, 1.0]),
            ])
            .unwrap();
        index
    }

    #[test]
    fn identical_vector_ranks_first_with_similarity_one() {
        let index = sample();
        let results = assert_ok!(index.search(&[0.0, 1.0, 0.0], 4));
        assert_eq!(results[0].chunk.id, "b");
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn search_returns_min_of_k_and_size() {
        let index = sample();
        assert_eq!(index.search(&[1.0, 1.0, 1.0], 2).unwrap().len(), 2);
        assert_eq!(index.search(&[1.0, 1.0, 1.0], 10).unwrap().len(), 4);
    }

    #[test]
    fn ties_are_broken_by_id() {
        let mut index = VectorIndex::new("m");
        index
            .add(vec![
                chunk("z", "a.sql", vec![1.0, 0.0]),
                chunk("m", "a.sql", vec![2.0, 0.0]),
                chunk("a", "b.sql", vec![3.0, 0.0]),
            ])
            .unwrap();
        let ids: Vec<_> = index
            .search(&[1.0, 0.0], 3)
            .unwrap()
            .into_iter()
            .map(|r| r.chunk.id)
            .collect();
        assert_eq!(ids, vec!["a", "m", "z"]);
    }

    #[test]
    fn zero_k_is_invalid() {
        let err = assert_err!(sample().search(&[1.0, 0.0, 0.0], 0));
        assert!(matches!(err, RagError::InvalidArgument { .. }));
    }

    #[test]
    fn query_dimension_must_match() {
        let err = assert_err!(sample().search(&[1.0, 0.0], 3));
        assert!(matches!(
            err,
            RagError::EmbeddingDimension {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn add_rejects_mismatched_dimension_atomically() {
        let mut index = sample();
        let err = assert_err!(index.add(vec![
            chunk("e", "models/new.sql", vec![1.0, 0.0, 0.0]),
            chunk("f", "models/new.sql", vec![1.0, 0.0]),
        ]));
        assert!(matches!(err, RagError::EmbeddingDimension { .. }));
        assert_eq!(index.size(), 4);
        assert!(index.get("e").is_none());
    }

    #[test]
    fn add_is_idempotent_and_replaces_changed_chunks() {
        let mut index = sample();
        assert_eq!(index.add(vec![chunk("a", "models/customers.sql", vec![1.0, 0.0, 0.0])]).unwrap(), 0);
        assert_eq!(index.size(), 4);

        assert_eq!(index.add(vec![chunk("a", "models/customers.sql", vec![0.0, 0.0, 2.0])]).unwrap(), 1);
        assert_eq!(index.size(), 4);
        assert_eq!(index.get("a").unwrap().embedding, vec![0.0, 0.0, 2.0]);
    }

    #[test]
    fn remove_drops_every_chunk_of_a_source() {
        let mut index = sample();
        assert_eq!(index.remove("models/orders.sql"), 2);
        assert_eq!(index.size(), 2);
        assert!(!index.source_paths().contains("models/orders.sql"));
        assert_eq!(index.remove("models/orders.sql"), 0);
    }

    #[test]
    fn dimension_is_none_when_empty() {
        let mut index = VectorIndex::new("m");
        assert_eq!(index.dimension(), None);
        assert!(index.search(&[1.0], 3).unwrap().is_empty());
        index.add(vec![chunk("a", "a.sql", vec![1.0, 2.0])]).unwrap();
        assert_eq!(index.dimension(), Some(2));
        index.remove("a.sql");
        assert_eq!(index.dimension(), None);
        let err = assert_err!(index.add(vec![chunk("b", "b.sql", vec![1.0])]));
        assert!(matches!(err, RagError::EmbeddingDimension { .. }));
    }

    #[test]
    fn chunks_without_embedding_are_rejected() {
        let mut index = VectorIndex::new("m");
        let err = assert_err!(index.add(vec![chunk("a", "a.sql", Vec::new())]));
        assert!(matches!(err, RagError::InvalidArgument { .. }));
    }

    #[test]
    fn zero_vectors_score_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[3.0, 4.0], &[6.0, 8.0]) - 1.0).abs() < 1e-6);
    }

    mod proptest_search {
        use super::*;
        use proptest::prelude::*;

        fn vector() -> impl Strategy<Value = Vec<f32>> {
            prop::collection::vec(-10.0f32..10.0, 4)
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(300))]

            #[test]
            fn search_returns_min_k_size_in_rank_order(
                embeddings in prop::collection::vec(vector(), 0..40),
                query in vector(),
                k in 1usize..60,
            ) {
                let mut index = VectorIndex::new("m");
                let chunks: Vec<Chunk> = embeddings
                    .into_iter()
                    .enumerate()
                    .map(|(i, e)| chunk(&format!("c{i:03}"), "models/m.sql", e))
                    .collect();
                index.add(chunks).unwrap();

                let results = index.search(&query, k).unwrap();
                prop_assert_eq!(results.len(), k.min(index.size()));
                for pair in results.windows(2) {
                    let (a, b) = (&pair[0], &pair[1]);
                    prop_assert!(a.score > b.score || (a.score == b.score && a.chunk.id < b.chunk.id));
                }
                for r in &results {
                    prop_assert!(r.score >= -1.0001 && r.score <= 1.0001);
                }
            }
        }
    }
}
