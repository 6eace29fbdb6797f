//! Composición de la respuesta RAG.
//!
//! Flujo:
//!   0. Si hay historial, la pregunta de seguimiento se reescribe como una
//!      pregunta independiente antes de recuperar contexto.
//!   1. Los chunks recuperados se ordenan por puntuación descendente y se
//!      insertan como contexto, cada uno con su ruta de origen.
//!   2. Se añaden los turnos recientes de la conversación.
//!   3. El modelo de generación produce una única respuesta (sin streaming).
//!   4. Se separa el razonamiento del texto final y se citan las fuentes.

use std::{collections::HashSet, sync::Arc};

use tracing::{debug, error, warn};

use crate::{
    error::{RagError, Result},
    llm::{GenerationService, ServiceError},
    models::{Answer, ConversationTurn, RetrievalResult, Role},
};

const SYSTEM_PROMPT: &str = "\
You are a helpful assistant specialized in dbt (data build tool) projects.
You can help users understand their data models, transformations, and documentation.
When answering questions, provide specific information about the dbt models,
their relationships, and how they transform data.
Only use the project context provided below. If it does not contain the answer, say so.
If you reference specific files or models, mention their names clearly.";

const CONDENSE_PROMPT: &str = "\
Given a conversation (between Human and Assistant) and a follow up message from Human,
rewrite the message to be a standalone question that captures all relevant context
from the conversation. Reply with the standalone question only.";

#[derive(Clone)]
pub struct AnswerComposer {
    generator: Arc<dyn GenerationService>,
    model: String,
    history_turns: usize,
}

impl AnswerComposer {
    pub fn new(generator: Arc<dyn GenerationService>, model: impl Into<String>) -> Self {
        Self {
            generator,
            model: model.into(),
            history_turns: 6,
        }
    }

    pub fn with_history_turns(mut self, turns: usize) -> Self {
        self.history_turns = turns;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generator_available(&self) -> bool {
        self.generator.is_available().await
    }

    /// Prompt con el contexto recuperado, de mayor a menor puntuación.
    pub fn build_prompt(&self, query: &str, retrieved: &[RetrievalResult]) -> String {
        let mut ranked: Vec<&RetrievalResult> = retrieved.iter().collect();
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });

        let context = if ranked.is_empty() {
            "No relevant context was found in the project.".to_string()
        } else {
            ranked
                .iter()
                .enumerate()
                .map(|(i, r)| format!("[{}] Source: {}\n{}", i + 1, r.chunk.source_path, r.chunk.text))
                .collect::<Vec<_>>()
                .join("\n\n---\n\n")
        };

        format!("{SYSTEM_PROMPT}\n\nProject context:\n{context}\n\nQuestion:\n{query}")
    }

    fn recent<'a>(&self, history: &'a [ConversationTurn]) -> &'a [ConversationTurn] {
        &history[history.len().saturating_sub(self.history_turns)..]
    }

    /// Reescribe una pregunta de seguimiento como pregunta independiente usando
    /// el historial reciente. Sin historial devuelve la pregunta tal cual.
    pub async fn condense_question(
        &self,
        query: &str,
        history: &[ConversationTurn],
    ) -> Result<String> {
        let recent = self.recent(history);
        if recent.is_empty() {
            return Ok(query.to_string());
        }

        let transcript = recent
            .iter()
            .map(|turn| {
                let speaker = match turn.role {
                    Role::User => "Human",
                    Role::Assistant => "Assistant",
                };
                format!("{speaker}: {}", turn.content)
            })
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "{CONDENSE_PROMPT}\n\n<Chat History>\n{transcript}\n\n<Follow Up Message>\n{query}\n\n<Standalone question>"
        );

        let generated = self
            .generator
            .complete(&self.model, &prompt, &[])
            .await
            .map_err(generation_failed)?;
        if generated.answer.is_empty() {
            warn!("La reescritura de la pregunta vino vacía; se usa la original");
            return Ok(query.to_string());
        }
        debug!("Pregunta reescrita: '{query}' -> '{}'", generated.answer);
        Ok(generated.answer)
    }

    /// Genera la respuesta. Si el servicio de generación falla no se devuelve
    /// ninguna respuesta parcial.
    pub async fn answer(
        &self,
        query: &str,
        history: &[ConversationTurn],
        retrieved: &[RetrievalResult],
    ) -> Result<Answer> {
        let prompt = self.build_prompt(query, retrieved);

        let generated = self
            .generator
            .complete(&self.model, &prompt, self.recent(history))
            .await
            .map_err(generation_failed)?;
        if generated.answer.is_empty() {
            return Err(RagError::GenerationFailed {
                message: "el modelo devolvió una respuesta vacía".to_string(),
            });
        }

        Ok(Answer {
            text: generated.answer,
            reasoning: generated.reasoning,
            sources: collect_sources(retrieved),
        })
    }
}

fn generation_failed(err: ServiceError) -> RagError {
    error!("Error del servicio de generación: {err}");
    RagError::GenerationFailed {
        message: err.to_string(),
    }
}

/// Rutas de origen sin duplicados, en el orden en que aparecen por primera vez.
pub fn collect_sources(retrieved: &[RetrievalResult]) -> Vec<String> {
    let mut seen = HashSet::new();
    retrieved
        .iter()
        .map(|r| r.chunk.source_path.as_str())
        .filter(|path| seen.insert(*path))
        .map(str::to_string)
        .collect()
}
