use std::sync::Arc;

use crate::{config::AppConfig, service::RagService};

/// Estado compartido por todos los handlers de axum.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub service: RagService,
}

impl AppState {
    pub fn new(config: AppConfig, service: RagService) -> Self {
        Self {
            config: Arc::new(config),
            service,
        }
    }
}
