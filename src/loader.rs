//! Carga de los ficheros de un proyecto dbt como `SourceDocument`s.
//!
//! Sólo se recorren los subdirectorios conocidos: `models/` (SQL, YAML de
//! esquema y bloques de documentación `.md`) y el directorio de SQL compilado
//! (`target/compiled` por defecto). El resto de ficheros se ignora.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde_yaml::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::{
    error::{RagError, Result},
    models::{DocumentKind, SourceDocument},
};

/// Cargador de un proyecto dbt. Es de sólo lectura y reiniciable: dos llamadas
/// a `load` sobre un directorio sin cambios devuelven lo mismo, ordenado por ruta.
#[derive(Debug, Clone)]
pub struct ProjectLoader {
    root: PathBuf,
    docs_path: PathBuf,
}

impl ProjectLoader {
    pub fn new(root: impl Into<PathBuf>, docs_path: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            docs_path: docs_path.into(),
        }
    }

    /// Cargador con el directorio de documentación por defecto (`target/compiled`).
    pub fn for_project(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let docs_path = root.join("target").join("compiled");
        Self::new(root, docs_path)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn load(&self) -> Result<Vec<SourceDocument>> {
        if !self.root.is_dir() {
            return Err(RagError::ProjectNotFound {
                path: self.root.clone(),
            });
        }

        let mut documents = BTreeMap::new();
        let models_path = self.root.join("models");

        for path in walk_files(&models_path) {
            let extension = extension_of(&path);
            let kind = match extension.as_str() {
                "sql" => DocumentKind::SqlModel,
                "yml" | "yaml" => DocumentKind::Schema,
                "md" => DocumentKind::DocBlock,
                _ => {
                    debug!("Saltando fichero no reconocido: {}", path.display());
                    continue;
                }
            };
            if let Some(doc) = self.read_document(&path, kind, &models_path) {
                documents.insert(doc.path.clone(), doc);
            }
        }

        for path in walk_files(&self.docs_path) {
            if extension_of(&path) != "sql" {
                debug!("Saltando fichero compilado no SQL: {}", path.display());
                continue;
            }
            if let Some(doc) = self.read_document(&path, DocumentKind::CompiledSql, &models_path) {
                documents.insert(doc.path.clone(), doc);
            }
        }

        if documents.is_empty() {
            return Err(RagError::ProjectNotFound {
                path: self.root.clone(),
            });
        }

        info!(
            "Cargados {} documentos del proyecto dbt {}",
            documents.len(),
            self.root.display()
        );
        Ok(documents.into_values().collect())
    }

    fn read_document(
        &self,
        path: &Path,
        kind: DocumentKind,
        models_path: &Path,
    ) -> Option<SourceDocument> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("No se pudo leer {} como texto UTF-8: {e}", path.display());
                return None;
            }
        };
        if content.trim().is_empty() {
            debug!("Fichero vacío o sin texto útil: {}", path.display());
            return None;
        }

        let raw_text = if kind == DocumentKind::Schema {
            let filename = path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            match serde_yaml::from_str::<Value>(&content) {
                Ok(yaml) => yaml_to_text(&yaml, &filename),
                Err(e) => {
                    warn!("YAML inválido en {}: {e}. Saltando fichero.", path.display());
                    return None;
                }
            }
        } else {
            content
        };

        let last_modified = fs::metadata(path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let model_name = (kind == DocumentKind::SqlModel)
            .then(|| path.strip_prefix(models_path).ok())
            .flatten()
            .map(|rel| to_slash(&rel.with_extension("")).replace('/', "."));

        Some(SourceDocument {
            path: self.relative_path(path),
            raw_text,
            last_modified,
            kind,
            model_name,
        })
    }

    fn relative_path(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        to_slash(rel)
    }
}

/// Atajo: carga un proyecto con la disposición de directorios por defecto.
pub fn load(root: &Path) -> Result<Vec<SourceDocument>> {
    ProjectLoader::for_project(root).load()
}

fn walk_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("No se pudo recorrer una entrada de {}: {e}. Saltando.", dir.display());
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("")
        .to_lowercase()
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Convierte un YAML de esquema dbt en texto legible para el índice.
fn yaml_to_text(yaml: &Value, filename: &str) -> String {
    let mut parts = vec![format!("Schema file: {filename}\n")];

    if let Some(models) = yaml.get("models").and_then(Value::as_sequence) {
        parts.push("Models:".to_string());
        for model in models.iter().filter(|m| m.is_mapping()) {
            parts.push(format!("- Model: {}", str_field(model, "name", "Unknown")));
            parts.push(format!(
                "  Description: {}",
                str_field(model, "description", "No description")
            ));
            if let Some(columns) = model.get("columns").and_then(Value::as_sequence) {
                parts.push("  Columns:".to_string());
                for column in columns.iter().filter(|c| c.is_mapping()) {
                    parts.push(format!(
                        "    - {}: {}",
                        str_field(column, "name", "unknown"),
                        str_field(column, "description", "No description")
                    ));
                }
            }
        }
    }

    if let Some(sources) = yaml.get("sources").and_then(Value::as_sequence) {
        parts.push("\nSources:".to_string());
        for source in sources.iter().filter(|s| s.is_mapping()) {
            parts.push(format!("- Source: {}", str_field(source, "name", "Unknown")));
            parts.push(format!(
                "  Description: {}",
                str_field(source, "description", "No description")
            ));
        }
    }

    parts.join("\n")
}

fn str_field<'a>(value: &'a Value, key: &str, default: &'a str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or(default)
}
