//! Persistencia del índice vectorial en disco (JSON).
//!
//! El fichero guarda el modelo de embeddings y la dimensión junto a los
//! chunks, de modo que al cargarlo se detecta cualquier incompatibilidad
//! en lugar de mezclar vectores de modelos distintos.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::{RagError, Result},
    models::Chunk,
    vector_store::VectorIndex,
};

pub const INDEX_FILE: &str = "vector_index.json";
const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct PersistedIndexRef<'a> {
    format_version: u32,
    embedding_model: &'a str,
    dimension: Option<usize>,
    saved_at: DateTime<Utc>,
    chunks: Vec<&'a Chunk>,
}

#[derive(Deserialize)]
struct PersistedIndex {
    format_version: u32,
    embedding_model: String,
    dimension: Option<usize>,
    #[allow(dead_code)]
    saved_at: DateTime<Utc>,
    chunks: Vec<Chunk>,
}

pub fn index_file(dir: &Path) -> PathBuf {
    dir.join(INDEX_FILE)
}

/// Escribe el índice de forma atómica (fichero temporal + rename).
pub async fn save(dir: &Path, index: &VectorIndex) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| RagError::storage(dir, e))?;

    let persisted = PersistedIndexRef {
        format_version: FORMAT_VERSION,
        embedding_model: index.embedding_model(),
        dimension: index.dimension(),
        saved_at: Utc::now(),
        chunks: index.chunks().collect(),
    };
    let bytes = serde_json::to_vec(&persisted)
        .map_err(|e| RagError::Internal(format!("no se pudo serializar el índice: {e}")))?;

    // Un temporal por escritura: dos guardados simultáneos nunca comparten fichero.
    let target = index_file(dir);
    let tmp = dir.join(format!("{INDEX_FILE}.{}.tmp", Uuid::new_v4().simple()));
    if let Err(e) = fs::write(&tmp, bytes).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(RagError::storage(&tmp, e));
    }
    if let Err(e) = fs::rename(&tmp, &target).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(RagError::storage(&target, e));
    }

    info!(
        "Índice persistido en {} ({} chunks)",
        target.display(),
        index.size()
    );
    Ok(target)
}

/// Lee el índice persistido. `Ok(None)` si no existe.
///
/// Falla con `CorruptStore` si el fichero no es legible o es incoherente, y con
/// `EmbeddingModelMismatch` si fue construido con otro modelo de embeddings.
pub async fn read(dir: &Path, expected_model: &str) -> Result<Option<VectorIndex>> {
    let path = index_file(dir);
    let bytes = match fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(RagError::storage(&path, e)),
    };

    let corrupt = |message: String| RagError::CorruptStore {
        path: path.clone(),
        message,
    };

    let persisted: PersistedIndex =
        serde_json::from_slice(&bytes).map_err(|e| corrupt(format!("JSON inválido: {e}")))?;

    if persisted.format_version != FORMAT_VERSION {
        return Err(corrupt(format!(
            "versión de formato {} no soportada",
            persisted.format_version
        )));
    }
    if persisted.embedding_model != expected_model {
        return Err(RagError::EmbeddingModelMismatch {
            expected: persisted.embedding_model,
            found: expected_model.to_string(),
        });
    }
    if persisted.dimension.is_none() && !persisted.chunks.is_empty() {
        return Err(corrupt("falta la dimensión de los vectores".to_string()));
    }
    if let Some(dimension) = persisted.dimension {
        if let Some(bad) = persisted
            .chunks
            .iter()
            .find(|c| c.embedding.len() != dimension)
        {
            return Err(corrupt(format!(
                "el chunk {} tiene dimensión {} (se esperaba {dimension})",
                bad.id,
                bad.embedding.len()
            )));
        }
    }

    let expected_len = persisted.chunks.len();
    let mut index = VectorIndex::new(persisted.embedding_model);
    index
        .add(persisted.chunks)
        .map_err(|e| corrupt(e.to_string()))?;
    if index.size() != expected_len {
        return Err(corrupt("ids de chunk duplicados".to_string()));
    }
    Ok(Some(index))
}
