//! Errores estructurados del núcleo RAG.
//!
//! Cada variante lleva su tipo (`ErrorKind`), un mensaje y, cuando aplica,
//! el identificador afectado (ruta, modelo, fichero de índice), de forma que
//! la capa HTTP pueda traducirlos sin parsear texto libre.

use std::path::PathBuf;

use serde::Serialize;

pub type Result<T> = std::result::Result<T, RagError>;

/// Taxonomía de errores expuesta a la capa de servicio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    ExternalService,
    IndexConsistency,
    RefreshInProgress,
    InvalidArgument,
    EmptyIndex,
    Storage,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("Configuración inválida: {message}")]
    InvalidConfiguration { message: String },

    #[error("Proyecto dbt no encontrado o sin ficheros reconocibles: {}", path.display())]
    ProjectNotFound { path: PathBuf },

    #[error("Servicio de embeddings no disponible: {message}")]
    EmbeddingServiceUnavailable { message: String },

    #[error("El servicio de embeddings rechazó la petición: {message}")]
    EmbeddingRejected { message: String },

    #[error("Dimensión de embedding incompatible: se esperaba {expected}, se recibió {actual}")]
    EmbeddingDimension { expected: usize, actual: usize },

    #[error("Modelo de embeddings incompatible: el índice usa '{expected}', se pidió '{found}'")]
    EmbeddingModelMismatch { expected: String, found: String },

    #[error("Índice persistido corrupto en {}: {message}", path.display())]
    CorruptStore { path: PathBuf, message: String },

    #[error("Error de E/S en {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Argumento inválido: {message}")]
    InvalidArgument { message: String },

    #[error("El índice está vacío; ejecute una indexación primero")]
    EmptyIndex,

    #[error("Fallo en la generación de la respuesta: {message}")]
    GenerationFailed { message: String },

    #[error("Ya hay un refresco del índice en curso")]
    RefreshInProgress,

    #[error("Error interno: {0}")]
    Internal(String),
}

impl RagError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfiguration { .. } | Self::ProjectNotFound { .. } => {
                ErrorKind::Configuration
            }
            Self::EmbeddingServiceUnavailable { .. }
            | Self::EmbeddingRejected { .. }
            | Self::GenerationFailed { .. } => ErrorKind::ExternalService,
            Self::EmbeddingDimension { .. }
            | Self::EmbeddingModelMismatch { .. }
            | Self::CorruptStore { .. } => ErrorKind::IndexConsistency,
            Self::RefreshInProgress => ErrorKind::RefreshInProgress,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::EmptyIndex => ErrorKind::EmptyIndex,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Identificador ofensivo asociado al error, si lo hay.
    pub fn identifier(&self) -> Option<String> {
        match self {
            Self::ProjectNotFound { path }
            | Self::CorruptStore { path, .. }
            | Self::Storage { path, .. } => Some(path.display().to_string()),
            Self::EmbeddingModelMismatch { found, .. } => Some(found.clone()),
            _ => None,
        }
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }
}

impl From<tokio::task::JoinError> for RagError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("tarea abortada: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            RagError::invalid_config("x").kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            RagError::EmbeddingDimension {
                expected: 3,
                actual: 4
            }
            .kind(),
            ErrorKind::IndexConsistency
        );
        assert_eq!(RagError::RefreshInProgress.kind(), ErrorKind::RefreshInProgress);
        assert_eq!(
            RagError::GenerationFailed {
                message: "boom".into()
            }
            .kind(),
            ErrorKind::ExternalService
        );
    }

    #[test]
    fn identifier_carries_offending_path() {
        let err = RagError::ProjectNotFound {
            path: PathBuf::from("/tmp/nope"),
        };
        assert_eq!(err.identifier().as_deref(), Some("/tmp/nope"));
        assert_eq!(RagError::EmptyIndex.identifier(), None);
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ExternalService).unwrap();
        assert_eq!(json, "\"external_service\"");
    }
}
