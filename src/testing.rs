//! Dobles de prueba para los servicios externos.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    llm::{split_reasoning, EmbeddingService, GenerationService, GeneratedText, ServiceError},
    models::ConversationTurn,
};

/// Embedder determinista: bolsa de palabras proyectada en `dim` cubetas.
pub struct MockEmbedder {
    dim: usize,
    calls: AtomicUsize,
    texts_embedded: AtomicUsize,
    unreachable: AtomicBool,
    failures: Mutex<VecDeque<ServiceError>>,
    seen: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MockEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            calls: AtomicUsize::new(0),
            texts_embedded: AtomicUsize::new(0),
            unreachable: AtomicBool::new(false),
            failures: Mutex::new(VecDeque::new()),
            seen: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts_embedded(&self) -> usize {
        self.texts_embedded.load(Ordering::SeqCst)
    }

    /// Todos los textos embebidos con éxito, en orden de llegada.
    pub fn seen_texts(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn fail_next(&self, err: ServiceError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        v[0] = 0.5;
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            let hash = word
                .bytes()
                .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3));
            v[(hash % self.dim as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingService for MockEmbedder {
    async fn embed_texts(&self, _model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ServiceError::Unreachable("connection refused".into()));
        }
        let next_failure = self.failures.lock().unwrap().pop_front();
        if let Some(err) = next_failure {
            return Err(err);
        }
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        self.seen.lock().unwrap().extend(texts.iter().cloned());
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// Generador con respuestas fijas que registra el último prompt recibido.
/// Con varias respuestas las devuelve en orden y repite la última.
pub struct MockGenerator {
    replies: Mutex<VecDeque<Result<String, String>>>,
    calls: AtomicUsize,
    available: AtomicBool,
    last_prompt: Mutex<Option<String>>,
    last_history: Mutex<Vec<ConversationTurn>>,
}

impl MockGenerator {
    pub fn replying(reply: impl Into<String>) -> Self {
        Self::with_results(vec![Ok(reply.into())])
    }

    pub fn replying_in_order(replies: &[&str]) -> Self {
        Self::with_results(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_results(vec![Err(message.into())])
    }

    fn with_results(replies: Vec<Result<String, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
            available: AtomicBool::new(true),
            last_prompt: Mutex::new(None),
            last_history: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().unwrap().clone()
    }

    pub fn last_history(&self) -> Vec<ConversationTurn> {
        self.last_history.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationService for MockGenerator {
    async fn complete(
        &self,
        _model: &str,
        prompt: &str,
        history: &[ConversationTurn],
    ) -> Result<GeneratedText, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
        *self.last_history.lock().unwrap() = history.to_vec();

        let reply = {
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop_front()
            } else {
                replies.front().cloned()
            }
        };
        match reply {
            Some(Ok(text)) => Ok(split_reasoning(&text)),
            Some(Err(message)) => Err(ServiceError::Failed {
                status: 500,
                message,
            }),
            None => Ok(split_reasoning("")),
        }
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
