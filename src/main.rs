use anyhow::Context;
use axum::Router;
use chatdbt_ollama::{api, app_state::AppState, config::AppConfig, service::RagService};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Inicializar el servicio RAG y cargar (o construir) el índice
    let service = RagService::from_config(&cfg).context("Error inicializando el servicio RAG")?;
    service.startup().await;
    let health = service.health().await;
    info!(
        "Índice listo: indexado={} ({} chunks)",
        health.indexed, health.chunk_count
    );

    // 4. Crear estado compartido de la aplicación
    let server_addr = cfg.server_addr();
    let app_state = AppState::new(cfg, service);

    // 5. Configurar el router de la API
    let app = Router::new().merge(api::create_router(app_state)).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    // 6. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    // Apagado ordenado con Ctrl-C.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .context("Error en el servidor HTTP")?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
