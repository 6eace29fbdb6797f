//! Troceado de documentos en ventanas solapadas de tamaño acotado.
//!
//! La unidad es el carácter Unicode (`char`): tanto `chunk_size`, `overlap`
//! como `Chunk::offset` se miden en caracteres, nunca en bytes.

use uuid::Uuid;

use crate::{
    error::{RagError, Result},
    models::{Chunk, SourceDocument},
};

/// Identificador estable de un chunk a partir de su origen y desplazamiento.
pub fn chunk_id(source_path: &str, offset: usize) -> String {
    let name = format!("{source_path}#{offset}");
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

pub fn validate(chunk_size: usize, overlap: usize) -> Result<()> {
    if chunk_size == 0 || overlap >= chunk_size {
        return Err(RagError::invalid_config(format!(
            "se requiere 0 <= overlap < chunk_size (chunk_size={chunk_size}, overlap={overlap})"
        )));
    }
    Ok(())
}

/// Trocea un documento. Los chunks salen sin embedding.
pub fn chunk(document: &SourceDocument, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    chunk_text(&document.path, &document.raw_text, chunk_size, overlap)
}

/// Desliza una ventana de `chunk_size` caracteres avanzando `chunk_size - overlap`.
/// El último chunk puede ser más corto pero nunca se descarta.
pub fn chunk_text(
    source_path: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    validate(chunk_size, overlap)?;
    if text.is_empty() {
        return Ok(Vec::new());
    }

    // Posiciones en bytes de cada carácter, más el final del texto.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = boundaries.len() - 1;
    let step = chunk_size - overlap;

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(total_chars);
        chunks.push(Chunk {
            id: chunk_id(source_path, start),
            source_path: source_path.to_string(),
            text: text[boundaries[start]..boundaries[end]].to_string(),
            offset: start,
            embedding: Vec::new(),
        });
        if end == total_chars {
            break;
        }
        start += step;
    }
    Ok(chunks)
}
