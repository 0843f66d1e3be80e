//! Voice agent server entry point: load settings, build the shared
//! [`AppState`], bind the HTTP/WebSocket listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use voice_agent_backend::BackendClient;
use voice_agent_config::{load_settings, Settings};
use voice_agent_core::CircuitBreaker;
use voice_agent_llm::backend::{LlmBackend, OpenAiBackend, OpenAiConfig};
use voice_agent_pipeline::stt::{HttpSttBackend, HttpSttConfig, SttBackend};
use voice_agent_pipeline::tts::{HttpTtsBackend, HttpTtsConfig, TtsBackend};
use voice_agent_server::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = std::env::var("VOICE_AGENT_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(&settings);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting voice agent server");

    let prometheus_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("prometheus recorder installs exactly once per process");

    let backend_breaker = Arc::new(CircuitBreaker::with_params(
        "backend",
        settings.breaker.failure_threshold,
        Duration::from_secs(settings.breaker.cooldown_secs),
    ));
    let backend = BackendClient::new(settings.backend.base_url.clone(), Some(settings.backend.api_key.clone()))
        .with_breaker(backend_breaker)
        .with_timeout(Duration::from_millis(settings.backend.rpc_timeout_ms));

    let llm: Arc<dyn LlmBackend> = Arc::new(
        OpenAiBackend::new(OpenAiConfig::new(
            settings.llm.base_url.clone(),
            settings.llm.api_key.clone(),
            settings.llm.model.clone(),
        ))
        .expect("llm backend client always builds from static config"),
    );

    let stt: Arc<dyn SttBackend> = Arc::new(
        HttpSttBackend::new(
            "primary",
            HttpSttConfig::new(settings.stt.base_url.clone().unwrap_or_default(), settings.stt.api_key.clone()),
        )
        .expect("stt backend client always builds from static config"),
    );

    let tts_primary: Arc<dyn TtsBackend> = Arc::new(
        HttpTtsBackend::new(
            "primary",
            HttpTtsConfig::new("https://api.elevenlabs.io", settings.tts.primary_api_key.clone(), settings.tts.primary_voice_id.clone()),
        )
        .expect("tts backend client always builds from static config"),
    );
    let tts_fallback: Arc<dyn TtsBackend> = Arc::new(
        HttpTtsBackend::new(
            "fallback",
            HttpTtsConfig::new("https://api.openai.com/v1", settings.tts.fallback_api_key.clone(), settings.tts.fallback_voice_id.clone()),
        )
        .expect("tts backend client always builds from static config"),
    );

    let bind_addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    let state = AppState::new(settings, backend, llm, stt, tts_primary, tts_fallback);

    let router = create_router(state, prometheus_handle);
    tracing::info!(addr = %bind_addr, "listening");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(settings.log_level.as_str()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}
