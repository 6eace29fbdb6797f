//! Ciclo de vida del índice vectorial: construcción completa, refresco
//! incremental, persistencia y publicación atómica para los lectores.
//!
//! Los lectores obtienen un `Arc<VectorIndex>` con `snapshot()` y lo usan
//! durante toda la consulta. Un refresco trabaja sobre una copia y sólo al
//! final sustituye el puntero compartido, así que una consulta ve el índice
//! anterior o el nuevo completo, nunca uno a medio construir.

use std::{
    collections::HashSet,
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    chunker,
    embedding::EmbeddingClient,
    error::{RagError, Result},
    loader::ProjectLoader,
    models::Chunk,
    storage,
    vector_store::VectorIndex,
};

#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub storage_dir: PathBuf,
    /// Directorio de SQL compilado; por defecto `<proyecto>/target/compiled`.
    pub docs_path: Option<PathBuf>,
}

/// Resumen de una construcción o refresco del índice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub documents: usize,
    pub chunks_added: usize,
    pub chunks_removed: usize,
    pub chunks_unchanged: usize,
    pub chunks_total: usize,
}

impl fmt::Display for RefreshSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} documentos, {} chunks añadidos, {} eliminados, {} sin cambios ({} en total)",
            self.documents,
            self.chunks_added,
            self.chunks_removed,
            self.chunks_unchanged,
            self.chunks_total
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateMode {
    Full,
    Incremental,
}

#[derive(Clone)]
pub struct IndexManager {
    settings: IndexSettings,
    embedder: EmbeddingClient,
    current: Arc<RwLock<Arc<VectorIndex>>>,
    writer: Arc<Mutex<()>>,
}

impl IndexManager {
    pub fn new(settings: IndexSettings, embedder: EmbeddingClient) -> Result<Self> {
        chunker::validate(settings.chunk_size, settings.chunk_overlap)?;
        let empty = Arc::new(VectorIndex::new(embedder.model()));
        Ok(Self {
            settings,
            embedder,
            current: Arc::new(RwLock::new(empty)),
            writer: Arc::new(Mutex::new(())),
        })
    }

    /// Vista de sólo lectura del índice publicado en este momento.
    pub fn snapshot(&self) -> Arc<VectorIndex> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, index: Arc<VectorIndex>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = index;
    }

    pub fn is_refreshing(&self) -> bool {
        self.writer.try_lock().is_err()
    }

    /// Reconstruye el índice desde el almacenamiento. Un almacén ausente,
    /// corrupto o de otro modelo deja un índice vacío en lugar de fallar.
    pub async fn load(&self) -> Arc<VectorIndex> {
        let _guard = self.writer.lock().await;
        let dir = &self.settings.storage_dir;

        let index = match storage::read(dir, self.embedder.model()).await {
            Ok(Some(index)) => {
                info!(
                    "Índice cargado desde {} ({} chunks)",
                    dir.display(),
                    index.size()
                );
                index
            }
            Ok(None) => {
                info!("No hay índice persistido en {}; se parte de vacío", dir.display());
                VectorIndex::new(self.embedder.model())
            }
            Err(err) => {
                warn!("Índice persistido descartado ({err}); se parte de vacío");
                VectorIndex::new(self.embedder.model())
            }
        };

        let index = Arc::new(index);
        self.publish(index.clone());
        index
    }

    /// Guarda el índice publicado. Espera a que termine cualquier refresco en
    /// curso para no pisar un almacén más reciente con una instantánea vieja.
    pub async fn persist(&self) -> Result<PathBuf> {
        let _guard = self.writer.lock().await;
        let snapshot = self.snapshot();
        storage::save(&self.settings.storage_dir, &snapshot).await
    }

    /// Indexa el proyecto desde cero en una instancia nueva.
    pub async fn build(&self, root: &Path) -> Result<RefreshSummary> {
        self.run_exclusive(root, UpdateMode::Full).await
    }

    /// Refresco incremental: sólo se calculan embeddings de los chunks nuevos
    /// o modificados y se retiran los que ya no existen.
    pub async fn refresh(&self, root: &Path) -> Result<RefreshSummary> {
        self.run_exclusive(root, UpdateMode::Incremental).await
    }

    async fn run_exclusive(&self, root: &Path, mode: UpdateMode) -> Result<RefreshSummary> {
        let guard = self.writer.clone().try_lock_owned().map_err(|_| {
            warn!("Refresco rechazado: ya hay uno en curso");
            RagError::RefreshInProgress
        })?;

        // Tarea independiente: si el llamante abandona, el refresco termina igualmente.
        let this = self.clone();
        let root = root.to_path_buf();
        tokio::spawn(async move {
            let _guard = guard;
            this.update(root, mode).await
        })
        .await?
    }

    async fn update(&self, root: PathBuf, mode: UpdateMode) -> Result<RefreshSummary> {
        let loader = match &self.settings.docs_path {
            Some(docs) => ProjectLoader::new(&root, docs),
            None => ProjectLoader::for_project(&root),
        };
        let (chunk_size, overlap) = (self.settings.chunk_size, self.settings.chunk_overlap);

        let (documents, fresh) = tokio::task::spawn_blocking(move || -> Result<(usize, Vec<Chunk>)> {
            let documents = loader.load()?;
            let mut chunks = Vec::new();
            for doc in &documents {
                chunks.extend(chunker::chunk(doc, chunk_size, overlap)?);
            }
            Ok((documents.len(), chunks))
        })
        .await??;

        let previous = self.snapshot();
        let base = match mode {
            UpdateMode::Full => Arc::new(VectorIndex::new(self.embedder.model())),
            UpdateMode::Incremental => previous.clone(),
        };
        if base.embedding_model() != self.embedder.model() {
            return Err(RagError::EmbeddingModelMismatch {
                expected: base.embedding_model().to_string(),
                found: self.embedder.model().to_string(),
            });
        }

        let (gone_sources, stale_ids) = {
            let fresh_ids: HashSet<&str> = fresh.iter().map(|c| c.id.as_str()).collect();
            let fresh_sources: HashSet<&str> =
                fresh.iter().map(|c| c.source_path.as_str()).collect();
            let gone: Vec<String> = base
                .source_paths()
                .into_iter()
                .filter(|path| !fresh_sources.contains(path))
                .map(str::to_string)
                .collect();
            let stale: Vec<String> = base
                .chunks()
                .filter(|c| {
                    fresh_sources.contains(c.source_path.as_str())
                        && !fresh_ids.contains(c.id.as_str())
                })
                .map(|c| c.id.clone())
                .collect();
            (gone, stale)
        };

        let mut unchanged = 0;
        let mut replaced = 0;
        let mut pending = Vec::new();
        for chunk in fresh {
            match base.get(&chunk.id) {
                Some(existing) if existing.text == chunk.text && existing.source_path == chunk.source_path => {
                    unchanged += 1;
                }
                Some(_) => {
                    replaced += 1;
                    pending.push(chunk);
                }
                None => pending.push(chunk),
            }
        }

        if mode == UpdateMode::Incremental
            && pending.is_empty()
            && gone_sources.is_empty()
            && stale_ids.is_empty()
        {
            info!("Índice al día; no hay cambios que aplicar");
            return Ok(RefreshSummary {
                documents,
                chunks_unchanged: unchanged,
                chunks_total: base.size(),
                ..RefreshSummary::default()
            });
        }

        let texts: Vec<String> = pending.iter().map(|c| c.text.clone()).collect();
        info!("Calculando embeddings de {} chunks", texts.len());
        let vectors = self.embedder.embed_many(&texts, base.dimension()).await?;

        let mut next = (*base).clone();
        let mut removed = replaced;
        for path in &gone_sources {
            removed += next.remove(path);
        }
        removed += next.remove_ids(&stale_ids);

        let embedded: Vec<Chunk> = pending
            .into_iter()
            .zip(vectors)
            .map(|(mut chunk, vector)| {
                chunk.embedding = vector;
                chunk
            })
            .collect();
        let added = embedded.len();
        next.add(embedded)?;

        if mode == UpdateMode::Full {
            removed = previous.size();
        }

        let next = Arc::new(next);
        storage::save(&self.settings.storage_dir, &next).await?;
        self.publish(next.clone());

        let summary = RefreshSummary {
            documents,
            chunks_added: added,
            chunks_removed: removed,
            chunks_unchanged: unchanged,
            chunks_total: next.size(),
        };
        info!("Índice actualizado: {summary}");
        Ok(summary)
    }
}
