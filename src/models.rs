//! Modelos de dominio (documentos del proyecto dbt, chunks y resultados).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tipo de fichero dbt del que procede un documento.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    SqlModel,
    Schema,
    DocBlock,
    CompiledSql,
}

/// Unidad de texto extraída del proyecto. Su identidad es `path`.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    /// Ruta relativa a la raíz del proyecto, con separadores `/`.
    pub path: String,
    pub raw_text: String,
    pub last_modified: DateTime<Utc>,
    pub kind: DocumentKind,
    /// Nombre del modelo en notación de puntos (`staging.stg_orders`), sólo para modelos.
    pub model_name: Option<String>,
}

/// Trozo de texto de un documento, la unidad de recuperación.
///
/// El embedding se calcula una única vez; si el texto de origen cambia,
/// el chunk se retira y se sustituye, nunca se edita.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source_path: String,
    pub text: String,
    /// Desplazamiento en caracteres dentro del documento.
    pub offset: usize,
    pub embedding: Vec<f32>,
}

impl Chunk {
    pub fn has_embedding(&self) -> bool {
        !self.embedding.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Turno de conversación aportado por el llamante (sólo lectura para el núcleo).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Respuesta compuesta: texto final, razonamiento opcional y fuentes citadas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub text: String,
    pub reasoning: Option<String>,
    pub sources: Vec<String>,
}
