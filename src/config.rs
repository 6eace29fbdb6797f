//! Carga y gestión de configuración de la aplicación (Ollama + proyecto dbt + índice).

use std::{env, path::PathBuf, str::FromStr, time::Duration};

use url::Url;

use crate::error::{RagError, Result};

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub ollama_host: Url,
    pub ollama_model: String,
    pub ollama_embedding_model: String,

    pub dbt_project_path: PathBuf,
    pub dbt_docs_path: PathBuf,

    pub host: String,
    pub port: u16,

    pub index_storage_path: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub similarity_top_k: usize,
    pub max_sources: usize,
    pub history_turns: usize,

    pub embed_batch_size: usize,
    pub embed_concurrency: usize,
    pub embed_max_attempts: u32,
    pub embed_backoff: Duration,
    pub request_timeout: Duration,
    pub temperature: f32,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Construye la configuración a partir de una función de búsqueda de claves.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| RagError::invalid_config(format!("Falta {key} en el entorno")))
        };

        let host_str = get("OLLAMA_HOST").unwrap_or_else(|| "http://localhost:11434".to_string());
        let ollama_host = Url::parse(&host_str)
            .map_err(|e| RagError::invalid_config(format!("OLLAMA_HOST inválido ({host_str}): {e}")))?;

        let ollama_model = required("OLLAMA_MODEL")?;
        let ollama_embedding_model = required("OLLAMA_EMBEDDING_MODEL")?;

        let dbt_project_path = PathBuf::from(required("DBT_PROJECT_PATH")?);
        let dbt_docs_path = get("DBT_DOCS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| dbt_project_path.join("target").join("compiled"));

        let cfg = Self {
            ollama_host,
            ollama_model,
            ollama_embedding_model,
            dbt_project_path,
            dbt_docs_path,
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, "PORT", 8000)?,
            index_storage_path: get("INDEX_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./storage")),
            chunk_size: parse_or(&get, "CHUNK_SIZE", 1024)?,
            chunk_overlap: parse_or(&get, "CHUNK_OVERLAP", 20)?,
            similarity_top_k: parse_or(&get, "SIMILARITY_TOP_K", 5)?,
            max_sources: parse_or(&get, "MAX_SOURCES", 5)?,
            history_turns: parse_or(&get, "HISTORY_TURNS", 6)?,
            embed_batch_size: parse_or(&get, "EMBED_BATCH_SIZE", 32)?,
            embed_concurrency: parse_or(&get, "EMBED_CONCURRENCY", 4)?,
            embed_max_attempts: parse_or(&get, "EMBED_MAX_ATTEMPTS", 3)?,
            embed_backoff: Duration::from_millis(parse_or(&get, "EMBED_BACKOFF_MS", 500)?),
            request_timeout: Duration::from_secs(parse_or(&get, "REQUEST_TIMEOUT_SECS", 120)?),
            temperature: parse_or(&get, "LLM_TEMPERATURE", 0.1)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Comprueba las restricciones entre valores (tamaño de chunk, solape, etc.).
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::invalid_config("CHUNK_SIZE debe ser mayor que 0"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::invalid_config(format!(
                "CHUNK_OVERLAP ({}) debe ser menor que CHUNK_SIZE ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        for (name, value) in [
            ("SIMILARITY_TOP_K", self.similarity_top_k),
            ("EMBED_BATCH_SIZE", self.embed_batch_size),
            ("EMBED_CONCURRENCY", self.embed_concurrency),
        ] {
            if value == 0 {
                return Err(RagError::invalid_config(format!("{name} debe ser mayor que 0")));
            }
        }
        if self.embed_max_attempts == 0 {
            return Err(RagError::invalid_config("EMBED_MAX_ATTEMPTS debe ser al menos 1"));
        }
        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| RagError::invalid_config(format!("{key} inválido ({raw}): {e}"))),
    }
}
