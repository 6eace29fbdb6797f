//! Chat RAG sobre proyectos dbt con modelos locales servidos por Ollama.
//!
//! El proyecto dbt se carga, se trocea y se indexa en memoria con embeddings;
//! cada pregunta recupera los trozos más similares y el modelo de generación
//! compone la respuesta citando sus fuentes.

pub mod api;
pub mod app_state;
pub mod chunker;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index_manager;
pub mod llm;
pub mod loader;
pub mod models;
pub mod rag;
pub mod retriever;
pub mod service;
pub mod storage;
pub mod vector_store;

#[cfg(test)]
mod testing;
